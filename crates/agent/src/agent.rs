//! Agent definitions

use datacrew_provider::{Tool, FINAL_OUTPUT_TOOL};
use serde_json::Value;
use std::sync::Arc;

use crate::guardrail::Guardrail;
use crate::tools::{AgentTool, ParamKind, ParamSchema, ToolEntry, ToolRegistry, ToolTrait};
use crate::Result;

/// Structured output contract of an agent
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub fields: ParamSchema,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: ParamSchema::new(),
        }
    }

    pub fn required(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.fields = self.fields.required(name, kind, description);
        self
    }

    pub fn optional(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.fields = self.fields.optional(name, kind, description);
        self
    }

    /// Type and presence violations, plus blank required text fields
    pub fn violations(&self, candidate: &Value) -> Vec<String> {
        if !candidate.is_object() {
            return vec![format!("output is not a structured `{}` object", self.name)];
        }

        let mut violations = self.fields.violations(candidate);
        for field in self.fields.params() {
            if !field.required || field.kind != ParamKind::String {
                continue;
            }
            if let Some(Value::String(s)) = candidate.get(&field.name) {
                if s.trim().is_empty() {
                    violations.push(format!("required field `{}` is empty", field.name));
                }
            }
        }
        violations
    }

    /// The reserved tool through which the model declares its final output
    pub fn to_tool(&self) -> Tool {
        Tool::new(
            FINAL_OUTPUT_TOOL,
            format!(
                "Declare the final answer as a `{}` object. Call this exactly once, when the task is complete.",
                self.name
            ),
            self.fields.to_json_schema(),
        )
    }
}

/// Immutable agent: instructions, tools and output contracts
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    /// Model identifier; `None` uses the provider default
    pub model: Option<String>,
    pub instructions: String,
    pub tools: ToolRegistry,
    pub output_schema: Option<OutputSchema>,
    pub guardrails: Vec<Guardrail>,
}

impl AgentDefinition {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    pub fn is_structured(&self) -> bool {
        self.output_schema.is_some()
    }

    /// Tool schemas offered to the model, including `final_output` when the
    /// agent declares an output schema
    pub fn tool_definitions(&self) -> Vec<Tool> {
        let mut tools = self.tools.definitions();
        if let Some(schema) = &self.output_schema {
            tools.push(schema.to_tool());
        }
        tools
    }

    pub fn schema_violations(&self, candidate: &Value) -> Vec<String> {
        self.output_schema
            .as_ref()
            .map(|schema| schema.violations(candidate))
            .unwrap_or_default()
    }

    /// Expose this agent to another agent as a delegation tool
    pub fn as_tool(
        self: &Arc<Self>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> AgentTool {
        AgentTool::new(name, description, Arc::clone(self))
    }
}

pub struct AgentBuilder {
    name: String,
    model: Option<String>,
    instructions: String,
    tools: Vec<ToolEntry>,
    output_schema: Option<OutputSchema>,
    guardrails: Vec<Guardrail>,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: None,
            instructions: String::new(),
            tools: Vec::new(),
            output_schema: None,
            guardrails: Vec::new(),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model = if model.is_empty() { None } else { Some(model) };
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn tool<T: ToolTrait + 'static>(mut self, tool: T) -> Self {
        self.tools.push(ToolEntry::Function(Arc::new(tool)));
        self
    }

    pub fn agent_tool(mut self, tool: AgentTool) -> Self {
        self.tools.push(ToolEntry::Agent(tool));
        self
    }

    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn guardrail(mut self, guardrail: Guardrail) -> Self {
        self.guardrails.push(guardrail);
        self
    }

    /// Fails with `DuplicateToolName` if two tools share a name
    pub fn build(self) -> Result<AgentDefinition> {
        let mut tools = ToolRegistry::new();
        for entry in self.tools {
            tools.register_entry(entry)?;
        }

        Ok(AgentDefinition {
            name: self.name,
            model: self.model,
            instructions: self.instructions,
            tools,
            output_schema: self.output_schema,
            guardrails: self.guardrails,
        })
    }
}
