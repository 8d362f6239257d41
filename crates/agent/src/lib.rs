//! Tool-orchestration engine
//!
//! Agents, the shared run context, tool dispatch, the confirmation gate,
//! output guardrails and the runner state machine that ties them together.

use datacrew_provider::ProviderError;
use thiserror::Error;

pub mod agent;
pub mod confirmation;
pub mod context;
pub mod crew;
pub mod guardrail;
pub mod runner;
pub mod tools;

pub use agent::{AgentBuilder, AgentDefinition, OutputSchema};
pub use confirmation::{ConfirmationGate, Confirmer, StaticConfirmer, StdinConfirmer};
pub use context::{DashboardCredentials, DataFrame, ModelHandle, ModelSummary, SharedContext};
pub use guardrail::{
    FnGuardrail, Guardrail, GuardrailResult, JudgeGuardrail, OutputGuardrail,
    RequiredFieldsGuardrail,
};
pub use runner::{RunConfig, RunInput, RunOutput, RunResult, RunState, Runner};
pub use tools::{ParamKind, ParamSchema, ToolEntry, ToolRegistry, ToolTrait};

/// Engine errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("◆ UNKNOWN TOOL: {0}")]
    UnknownTool(String),

    #[error("◆ INVALID ARGUMENTS FOR {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("◆ DUPLICATE TOOL NAME: {0}")]
    DuplicateToolName(String),

    #[error("◆ OUTPUT VALIDATION FAILED FOR {agent}: {}", .violations.join("; "))]
    OutputValidation {
        agent: String,
        violations: Vec<String>,
    },

    #[error("◆ TURN BUDGET EXCEEDED: {0} TURNS")]
    TurnBudgetExceeded(u32),

    #[error("◆ DELEGATION DEPTH EXCEEDED: {0} LEVELS")]
    DelegationDepthExceeded(u32),

    /// Handler failure; absorbed into a tool result, never ends a run
    #[error("◆ TOOL ERROR IN {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("◆ MODEL ERROR: {0}")]
    Model(ProviderError),

    #[error("◆ UNRECOGNIZED MODEL RESPONSE: {0}")]
    UnrecognizedResponse(String),

    #[error("◆ RUN CANCELLED")]
    Cancelled,
}

impl AgentError {
    /// Failures that end one agent's run but leave the engine usable. A
    /// delegating parent receives these as a tool result instead of failing.
    pub fn is_run_local(&self) -> bool {
        matches!(
            self,
            Self::OutputValidation { .. } | Self::TurnBudgetExceeded(_) | Self::UnknownTool(_)
        )
    }
}

impl From<ProviderError> for AgentError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::UnrecognizedResponse(shape) => Self::UnrecognizedResponse(shape),
            other => Self::Model(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
