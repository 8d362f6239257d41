//! Tool registry and dispatch

pub mod dashboard;
pub mod ml;
pub mod schema;
pub mod sql;

pub use dashboard::{AddChartToDashboardTool, CreateChartTool, CreateDashboardTool, LoginDashboardTool};
pub use ml::{ChooseModelTool, ModelCardReportTool, RunModelTool, TrainedModel};
pub use schema::{ParamKind, ParamSchema, ParamSpec};
pub use sql::{DescribeDatabaseTool, DropTableTool, GetInputDataTool, ProfileDatabaseTool, SqlQueryTool};

use async_trait::async_trait;
use datacrew_provider::{Tool, FINAL_OUTPUT_TOOL};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::agent::AgentDefinition;
use crate::context::SharedContext;
use crate::{AgentError, Result};

pub type ToolResult = std::result::Result<String, Box<dyn std::error::Error + Send + Sync>>;

/// A named, schema-typed callable
#[async_trait]
pub trait ToolTrait: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> ParamSchema;

    /// Whether the tool mutates durable state. Side-effecting tools must
    /// refuse to run until the context's confirmation flag is set.
    fn is_side_effecting(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value, ctx: &mut SharedContext) -> ToolResult;
}

/// A sub-agent exposed to its parent as a tool taking one `input` string
#[derive(Clone)]
pub struct AgentTool {
    pub name: String,
    pub description: String,
    pub agent: Arc<AgentDefinition>,
}

impl AgentTool {
    pub const INPUT: &'static str = "input";

    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        agent: Arc<AgentDefinition>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            agent,
        }
    }

    pub fn parameters() -> ParamSchema {
        ParamSchema::new().required(
            Self::INPUT,
            ParamKind::String,
            "Request forwarded to the agent",
        )
    }

    /// Forwarded request; arguments are validated before this is read
    pub fn input(args: &Value) -> &str {
        args.get(Self::INPUT).and_then(Value::as_str).unwrap_or("")
    }
}

/// Registered tool: a primitive handler or a delegation
#[derive(Clone)]
pub enum ToolEntry {
    Function(Arc<dyn ToolTrait>),
    Agent(AgentTool),
}

impl ToolEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Function(tool) => tool.name(),
            Self::Agent(tool) => &tool.name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Function(tool) => tool.description(),
            Self::Agent(tool) => &tool.description,
        }
    }

    pub fn parameters(&self) -> ParamSchema {
        match self {
            Self::Function(tool) => tool.parameters(),
            Self::Agent(_) => AgentTool::parameters(),
        }
    }

    pub fn is_side_effecting(&self) -> bool {
        match self {
            Self::Function(tool) => tool.is_side_effecting(),
            Self::Agent(_) => false,
        }
    }

    pub fn definition(&self) -> Tool {
        Tool::new(
            self.name(),
            self.description(),
            self.parameters().to_json_schema(),
        )
    }
}

impl fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(tool) => write!(f, "Function({})", tool.name()),
            Self::Agent(tool) => write!(f, "Agent({} -> {})", tool.name, tool.agent.name),
        }
    }
}

/// Result of one handler invocation as seen by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub output: String,
    pub is_error: bool,
}

/// Tool registry, in registration order
#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Names are unique per registry and `final_output` is
    /// reserved for the runner.
    pub fn register_entry(&mut self, entry: ToolEntry) -> Result<()> {
        let name = entry.name().to_string();
        if name == FINAL_OUTPUT_TOOL || self.index.contains_key(&name) {
            return Err(AgentError::DuplicateToolName(name));
        }
        self.index.insert(name, self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn register<T: ToolTrait + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_entry(ToolEntry::Function(Arc::new(tool)))
    }

    pub fn register_agent(&mut self, tool: AgentTool) -> Result<()> {
        self.register_entry(ToolEntry::Agent(tool))
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ToolEntry] {
        &self.entries
    }

    pub fn definitions(&self) -> Vec<Tool> {
        self.entries.iter().map(ToolEntry::definition).collect()
    }

    /// Look up `name` and check `args` against its schema. The handler is
    /// never reached when this fails.
    pub fn resolve(&self, name: &str, args: &Value) -> Result<&ToolEntry> {
        let entry = self
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;

        entry
            .parameters()
            .validate(args)
            .map_err(|reason| AgentError::InvalidArguments {
                tool: name.to_string(),
                reason,
            })?;

        Ok(entry)
    }

    /// Run a handler, turning its failure into error text for the model
    pub async fn invoke(tool: &dyn ToolTrait, args: Value, ctx: &mut SharedContext) -> ToolOutcome {
        debug!("◆ DEPLOYING TOOL: {}", tool.name());

        match tool.execute(args, ctx).await {
            Ok(output) => ToolOutcome {
                output,
                is_error: false,
            },
            Err(e) => {
                let err = AgentError::ToolExecution {
                    tool: tool.name().to_string(),
                    reason: e.to_string(),
                };
                warn!("{}", err);
                ToolOutcome {
                    output: err.to_string(),
                    is_error: true,
                }
            }
        }
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}
