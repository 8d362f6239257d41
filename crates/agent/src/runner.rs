//! Runner - the orchestration state machine
//!
//! One invocation drives an agent through
//! `AwaitingModel -> (DispatchingTool | Delegating)* -> ValidatingOutput`
//! until it is `Done` or `Failed`. Tool calls within a run are strictly
//! sequential; every tool and every delegated sub-agent borrows the same
//! `SharedContext`.

use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use datacrew_config::Config;
use datacrew_events::{EventSender, RunEvent};
use datacrew_memory::{Role, TranscriptStore, Turn};
use datacrew_provider::{ChatParams, Message, ModelAction, Provider, ToolCall, ToolChoice};

use crate::agent::AgentDefinition;
use crate::context::SharedContext;
use crate::guardrail::{Guardrail, GuardrailResult, JudgeGuardrail};
use crate::tools::{AgentTool, ToolEntry, ToolOutcome, ToolRegistry};
use crate::{AgentError, Result};

/// Run limits and generation settings
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Model calls allowed per agent invocation
    pub max_turns: u32,
    /// Nested agent levels allowed below the top-level agent
    pub max_delegation_depth: u32,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_delegation_depth: 3,
            max_tokens: 4096,
            temperature: 0.2,
        }
    }
}

impl RunConfig {
    pub fn from_config(config: &Config) -> Self {
        let defaults = &config.agents.defaults;
        Self {
            max_turns: config.max_turns(),
            max_delegation_depth: config.max_delegation_depth(),
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_delegation_depth(mut self, depth: u32) -> Self {
        self.max_delegation_depth = depth;
        self
    }
}

/// What a run starts from
#[derive(Debug, Clone)]
pub enum RunInput {
    Text(String),
    /// Prior transcript, replayed as conversation history
    History(Vec<Turn>),
}

impl From<&str> for RunInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for RunInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Terminal value of a successful run
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutput {
    Structured(Value),
    Text(String),
}

impl RunOutput {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Structured(value) => value.clone(),
            Self::Text(text) => Value::String(text.clone()),
        }
    }

    /// Text form used for tool results and transcripts
    pub fn render(&self) -> String {
        match self {
            Self::Structured(value) => value.to_string(),
            Self::Text(text) => text.clone(),
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// Agent that produced the output
    pub agent: String,
    pub output: RunOutput,
    /// Model calls made by that agent
    pub turns: u32,
}

/// States of one agent invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    AwaitingModel,
    DispatchingTool,
    Delegating,
    ValidatingOutput,
    Done,
    Failed,
}

type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<RunResult>> + Send + 'a>>;

/// Drives agents against a model provider
pub struct Runner<P: Provider> {
    provider: Arc<P>,
    config: RunConfig,
    events: Option<EventSender>,
    cancel: CancellationToken,
}

impl<P: Provider + 'static> Runner<P> {
    pub fn new(provider: P, config: RunConfig) -> Self {
        Self::with_shared_provider(Arc::new(provider), config)
    }

    pub fn with_shared_provider(provider: Arc<P>, config: RunConfig) -> Self {
        Self {
            provider,
            config,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Publish lifecycle events to `events`
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Stop at the next suspension point once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run `agent` to completion.
    ///
    /// The confirmation flag is cleared first, so approvals never carry over
    /// from a previous run that used the same context.
    pub async fn run(
        &self,
        agent: &AgentDefinition,
        input: impl Into<RunInput>,
        ctx: &mut SharedContext,
    ) -> Result<RunResult> {
        ctx.set_confirmation(false);
        info!("◆ RUN START: {}", agent.name);

        let messages = Self::seed(agent, input.into());
        let result = self.run_agent(agent, messages, ctx, 0).await;

        match &result {
            Ok(done) => {
                info!("◆ RUN COMPLETE: {} after {} turns", done.agent, done.turns);
                self.emit(RunEvent::RunCompleted {
                    agent: done.agent.clone(),
                    output: done.output.to_value(),
                });
            }
            Err(e) => {
                error!("◆ RUN FAILED: {}: {}", agent.name, e);
                self.emit(RunEvent::RunFailed {
                    agent: agent.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    /// Run with transcript memory: the user turn is persisted before the
    /// run, the assistant reply (or `Error: <reason>`) after it. Persistence
    /// failures are logged and do not affect the run's outcome.
    pub async fn run_with_memory(
        &self,
        agent: &AgentDefinition,
        text: &str,
        ctx: &mut SharedContext,
        memory: &mut TranscriptStore,
    ) -> Result<RunResult> {
        if let Err(e) = memory.append(Role::User, text).await {
            warn!("Failed to save transcript: {}", e);
        }

        let history = memory.history().to_vec();
        let result = self.run(agent, RunInput::History(history), ctx).await;

        let reply = match &result {
            Ok(done) => done.output.render(),
            Err(e) => format!("Error: {}", e),
        };
        if let Err(e) = memory.append(Role::Assistant, reply).await {
            warn!("Failed to save transcript: {}", e);
        }

        result
    }

    fn seed(agent: &AgentDefinition, input: RunInput) -> Vec<Message> {
        let mut messages = vec![Message::system(&agent.instructions)];
        match input {
            RunInput::Text(text) => messages.push(Message::user(text)),
            RunInput::History(turns) => messages.extend(turns.iter().map(Turn::to_message)),
        }
        messages
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            if !events.emit(event) {
                debug!("Event consumer gone, event dropped");
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }

    fn transition(agent: &AgentDefinition, state: RunState) {
        debug!("◆ {} -> {:?}", agent.name, state);
    }

    /// One agent invocation at `depth` (0 for the top-level agent).
    /// Boxed so delegation can recurse.
    fn run_agent<'a>(
        &'a self,
        agent: &'a AgentDefinition,
        mut messages: Vec<Message>,
        ctx: &'a mut SharedContext,
        depth: u32,
    ) -> RunFuture<'a> {
        Box::pin(async move {
            let structured = agent.is_structured();
            let tools = agent.tool_definitions();
            let model = agent.model.clone().unwrap_or_default();
            let mut turns = 0u32;

            loop {
                Self::transition(agent, RunState::AwaitingModel);
                if turns >= self.config.max_turns {
                    warn!("◆ {} EXHAUSTED {} TURNS", agent.name, self.config.max_turns);
                    Self::transition(agent, RunState::Failed);
                    return Err(AgentError::TurnBudgetExceeded(self.config.max_turns));
                }
                self.check_cancelled()?;
                turns += 1;
                debug!("{} turn {}/{}", agent.name, turns, self.config.max_turns);

                let params = ChatParams {
                    model: model.clone(),
                    messages: messages.clone(),
                    tools: tools.clone(),
                    max_tokens: self.config.max_tokens,
                    temperature: self.config.temperature,
                    tool_choice: ToolChoice::Auto,
                };

                let response = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                    response = self.provider.chat(params) => response?,
                };

                match response.into_action(structured)? {
                    ModelAction::Text(text) => {
                        self.emit(RunEvent::TextDelta {
                            agent: agent.name.clone(),
                            delta: text.clone(),
                        });
                        messages.push(Message::assistant(text));
                    }
                    ModelAction::ToolCall(call) => {
                        self.check_cancelled()?;
                        let outcome = self.dispatch(agent, &call, ctx, depth).await?;
                        messages.push(Message::assistant_tool_call(&call));
                        messages.push(Message::tool(&call.id, &call.name, outcome.output));
                    }
                    ModelAction::FinalOutput(candidate) => {
                        Self::transition(agent, RunState::ValidatingOutput);
                        let output = match candidate {
                            Value::String(text) if !structured => RunOutput::Text(text),
                            other => RunOutput::Structured(other),
                        };

                        let violations = self
                            .validate_output(agent, &output.to_value(), ctx, depth)
                            .await?;
                        if !violations.is_empty() {
                            Self::transition(agent, RunState::Failed);
                            return Err(AgentError::OutputValidation {
                                agent: agent.name.clone(),
                                violations,
                            });
                        }

                        if let RunOutput::Text(text) = &output {
                            self.emit(RunEvent::TextDelta {
                                agent: agent.name.clone(),
                                delta: text.clone(),
                            });
                        }
                        Self::transition(agent, RunState::Done);
                        return Ok(RunResult {
                            agent: agent.name.clone(),
                            output,
                            turns,
                        });
                    }
                }
            }
        })
    }

    /// Execute one tool call. An unknown tool fails the run; invalid
    /// arguments and handler failures come back as error results.
    async fn dispatch(
        &self,
        agent: &AgentDefinition,
        call: &ToolCall,
        ctx: &mut SharedContext,
        depth: u32,
    ) -> Result<ToolOutcome> {
        let resolved = match agent.tools.resolve(&call.name, &call.arguments) {
            Err(AgentError::UnknownTool(name)) => {
                warn!("◆ {} CALLED UNKNOWN TOOL {}", agent.name, name);
                Self::transition(agent, RunState::Failed);
                return Err(AgentError::UnknownTool(name));
            }
            other => other,
        };

        self.emit(RunEvent::ToolCallStarted {
            agent: agent.name.clone(),
            call_id: call.id.clone(),
            tool: call.name.clone(),
            arguments: call.arguments.clone(),
        });

        let outcome = match resolved {
            Ok(ToolEntry::Function(tool)) => {
                Self::transition(agent, RunState::DispatchingTool);
                ToolRegistry::invoke(tool.as_ref(), call.arguments.clone(), ctx).await
            }
            Ok(ToolEntry::Agent(sub)) => {
                Self::transition(agent, RunState::Delegating);
                self.delegate(agent, sub, AgentTool::input(&call.arguments), ctx, depth)
                    .await?
            }
            Err(e) => {
                debug!("Rejected arguments for {}: {}", call.name, e);
                ToolOutcome {
                    output: e.to_string(),
                    is_error: true,
                }
            }
        };

        self.emit(RunEvent::ToolCallFinished {
            agent: agent.name.clone(),
            call_id: call.id.clone(),
            tool: call.name.clone(),
            output: outcome.output.clone(),
            is_error: outcome.is_error,
        });

        Ok(outcome)
    }

    /// Run a sub-agent on a fresh history holding only the forwarded input
    async fn delegate(
        &self,
        parent: &AgentDefinition,
        tool: &AgentTool,
        input: &str,
        ctx: &mut SharedContext,
        depth: u32,
    ) -> Result<ToolOutcome> {
        let sub = tool.agent.as_ref();
        let result = self
            .run_nested(parent, sub, RunInput::Text(input.to_string()), ctx, depth)
            .await;

        match result {
            Ok(done) => Ok(ToolOutcome {
                output: done.output.render(),
                is_error: false,
            }),
            Err(e) if e.is_run_local() => {
                warn!("◆ DELEGATE {} FAILED: {}", sub.name, e);
                Ok(ToolOutcome {
                    output: json!({ "error": e.to_string() }).to_string(),
                    is_error: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Nested invocation bracketed by hand-off events
    async fn run_nested(
        &self,
        parent: &AgentDefinition,
        sub: &AgentDefinition,
        input: RunInput,
        ctx: &mut SharedContext,
        depth: u32,
    ) -> Result<RunResult> {
        let next = depth + 1;
        if next > self.config.max_delegation_depth {
            warn!(
                "◆ {} -> {} EXCEEDS DELEGATION DEPTH {}",
                parent.name, sub.name, self.config.max_delegation_depth
            );
            return Err(AgentError::DelegationDepthExceeded(
                self.config.max_delegation_depth,
            ));
        }

        info!("◆ HANDOFF: {} -> {}", parent.name, sub.name);
        self.emit(RunEvent::AgentSwitched {
            from: parent.name.clone(),
            to: sub.name.clone(),
        });

        let messages = Self::seed(sub, input);
        let result = self.run_agent(sub, messages, ctx, next).await;

        self.emit(RunEvent::AgentSwitched {
            from: sub.name.clone(),
            to: parent.name.clone(),
        });
        result
    }

    /// Schema check, then every guardrail in order. Guardrails are skipped
    /// when the schema already failed.
    async fn validate_output(
        &self,
        agent: &AgentDefinition,
        candidate: &Value,
        ctx: &mut SharedContext,
        depth: u32,
    ) -> Result<Vec<String>> {
        let mut violations = agent.schema_violations(candidate);
        if !violations.is_empty() {
            return Ok(violations);
        }

        for guardrail in &agent.guardrails {
            let result = match guardrail {
                Guardrail::Predicate(check) => check.check(candidate).await,
                Guardrail::Judge(judge) => self.judge(agent, judge, candidate, ctx, depth).await?,
            };

            if result.is_triggered() {
                warn!("◆ GUARDRAIL {} TRIPPED ON {}", guardrail.name(), agent.name);
                if result.violations.is_empty() {
                    violations.push(format!("guardrail `{}` tripwire triggered", guardrail.name()));
                } else {
                    violations.extend(result.violations);
                }
            }
        }
        Ok(violations)
    }

    async fn judge(
        &self,
        agent: &AgentDefinition,
        judge: &JudgeGuardrail,
        candidate: &Value,
        ctx: &mut SharedContext,
        depth: u32,
    ) -> Result<GuardrailResult> {
        let summary = judge.render_summary(candidate);
        let result = self
            .run_nested(agent, &judge.agent, RunInput::Text(summary), ctx, depth)
            .await;

        match result {
            Ok(done) => Ok(judge.interpret(&done.output.to_value())),
            Err(e) if e.is_run_local() => Ok(GuardrailResult::tripwire(format!(
                "{}: judge failed: {}",
                judge.name, e
            ))),
            Err(e) => Err(e),
        }
    }
}
