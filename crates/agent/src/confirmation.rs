//! Human confirmation gate
//!
//! `ask_for_confirmation` is an ordinary tool with no side effects of its
//! own. It suspends the run on an external yes/no answer and writes that
//! answer into the shared context, where side-effecting tools read it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::SharedContext;
use crate::tools::{ParamKind, ParamSchema, ToolResult, ToolTrait};

pub const CONFIRMATION_TOOL: &str = "ask_for_confirmation";

/// Result text of a side-effecting tool called without approval
pub const CONFIRMATION_REQUIRED: &str = "confirmation required";

/// External yes/no channel
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Only an exact `yes` (any case, surrounding space ignored) approves
pub fn is_approval(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("yes")
}

/// Asks on the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, prompt: &str) -> bool {
        let prompt = prompt.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout();
            let _ = writeln!(stdout, "\n◆ CONFIRMATION REQUESTED\n{}\n", prompt);
            let _ = write!(stdout, "Proceed? (yes/no) ");
            let _ = stdout.flush();

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => is_approval(&line),
            Ok(Err(e)) => {
                warn!("Failed to read confirmation: {}", e);
                false
            }
            Err(e) => {
                warn!("Confirmation prompt aborted: {}", e);
                false
            }
        }
    }
}

/// Always gives the same answer
#[derive(Debug, Clone, Copy)]
pub struct StaticConfirmer(pub bool);

#[async_trait]
impl Confirmer for StaticConfirmer {
    async fn confirm(&self, prompt: &str) -> bool {
        debug!("Auto-answering confirmation ({}): {}", self.0, prompt);
        self.0
    }
}

/// The `ask_for_confirmation` tool
#[derive(Clone)]
pub struct ConfirmationGate {
    confirmer: Arc<dyn Confirmer>,
}

impl ConfirmationGate {
    pub fn new(confirmer: Arc<dyn Confirmer>) -> Self {
        Self { confirmer }
    }
}

#[derive(Deserialize)]
struct ConfirmationArgs {
    text: String,
}

#[async_trait]
impl ToolTrait for ConfirmationGate {
    fn name(&self) -> &str {
        CONFIRMATION_TOOL
    }

    fn description(&self) -> &str {
        "Ask the user to approve an action before calling any tool that changes data, charts or dashboards. Call once per action."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new().required(
            "text",
            ParamKind::String,
            "Description of the pending action, shown to the user",
        )
    }

    async fn execute(&self, args: Value, ctx: &mut SharedContext) -> ToolResult {
        let args: ConfirmationArgs = serde_json::from_value(args)?;

        let approved = self.confirmer.confirm(&args.text).await;
        ctx.set_confirmation(approved);
        info!("◆ CONFIRMATION {}", if approved { "GRANTED" } else { "DENIED" });

        Ok(if approved {
            "yes: the user approved the action".to_string()
        } else {
            "no: the user denied the action; do not perform it".to_string()
        })
    }
}

/// Precondition of every side-effecting tool: the refusal to return when
/// the flag is unset, or `None` when the tool may proceed. The flag is left
/// as it is either way.
pub fn require_confirmation(ctx: &SharedContext) -> Option<String> {
    if ctx.is_confirmed() {
        None
    } else {
        Some(CONFIRMATION_REQUIRED.to_string())
    }
}
