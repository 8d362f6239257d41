//! Common test utilities for engine integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use datacrew_agent::tools::ToolResult;
use datacrew_agent::{
    Confirmer, DashboardCredentials, ParamKind, ParamSchema, SharedContext, ToolTrait,
};
use datacrew_provider::{ChatParams, ChatResponse, Provider, ProviderError};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Provider replaying a fixed script of responses and recording every
/// request it receives. An exhausted script answers with an API error.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatParams>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ChatResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatParams> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(params);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Api("script exhausted".to_string()))
    }

    fn default_model(&self) -> String {
        "scripted-model".to_string()
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Confirmer answering from a fixed list, then "no"
pub struct ScriptedConfirmer {
    answers: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedConfirmer {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Confirmer for ScriptedConfirmer {
    async fn confirm(&self, prompt: &str) -> bool {
        self.asked.lock().unwrap().push(prompt.to_string());
        self.answers.lock().unwrap().pop_front().unwrap_or(false)
    }
}

/// Context with no database or dashboard behind it
pub fn empty_context() -> SharedContext {
    SharedContext::new("sqlite::memory:", DashboardCredentials::default())
}

/// Context bound to a file database at `path`, created on first connect
pub fn sqlite_context(path: &Path) -> SharedContext {
    SharedContext::new(
        format!("sqlite://{}?mode=rwc", path.display()),
        DashboardCredentials::default(),
    )
}

/// Create `path` with a `transactions` table and a `users` table
pub async fn seed_database(path: &Path) {
    use sqlx::{Connection, SqliteConnection};

    let url = format!("sqlite://{}?mode=rwc", path.display());
    let mut conn = SqliteConnection::connect(&url).await.unwrap();
    for statement in [
        "CREATE TABLE transactions (id INTEGER PRIMARY KEY, kind TEXT NOT NULL, amount REAL NOT NULL)",
        "INSERT INTO transactions (kind, amount) VALUES ('deposit', 100.0), ('withdrawal', 25.5), ('deposit', 40.0)",
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "INSERT INTO users (name) VALUES ('ada'), ('grace')",
    ] {
        sqlx::query(statement).execute(&mut conn).await.unwrap();
    }
    conn.close().await.unwrap();
}

/// Echoes its `text` argument
pub struct EchoTool;

#[async_trait]
impl ToolTrait for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text"
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new().required("text", ParamKind::String, "Text to echo")
    }

    async fn execute(&self, args: Value, _ctx: &mut SharedContext) -> ToolResult {
        Ok(args["text"].as_str().unwrap_or_default().to_string())
    }
}

/// Always fails
pub struct FailingTool;

#[async_trait]
impl ToolTrait for FailingTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new()
    }

    async fn execute(&self, _args: Value, _ctx: &mut SharedContext) -> ToolResult {
        Err("backend unavailable".into())
    }
}

/// Writes `value` into the context's best model slot
pub struct MarkBestTool;

#[async_trait]
impl ToolTrait for MarkBestTool {
    fn name(&self) -> &str {
        "mark_best"
    }

    fn description(&self) -> &str {
        "Record the best model"
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new().required("value", ParamKind::String, "Model name")
    }

    async fn execute(&self, args: Value, ctx: &mut SharedContext) -> ToolResult {
        let value = args["value"].as_str().unwrap_or_default().to_string();
        ctx.best_model = Some(value.clone());
        Ok(format!("recorded {}", value))
    }
}

/// Reads the context's best model slot
pub struct ReadBestTool;

#[async_trait]
impl ToolTrait for ReadBestTool {
    fn name(&self) -> &str {
        "read_best"
    }

    fn description(&self) -> &str {
        "Read the best model"
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new()
    }

    async fn execute(&self, _args: Value, ctx: &mut SharedContext) -> ToolResult {
        Ok(ctx.best_model.clone().unwrap_or_else(|| "none".to_string()))
    }
}

/// Counts its invocations
#[derive(Default, Clone)]
pub struct CountingTool {
    pub calls: Arc<AtomicUsize>,
}

impl CountingTool {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolTrait for CountingTool {
    fn name(&self) -> &str {
        "count"
    }

    fn description(&self) -> &str {
        "Count invocations"
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new()
    }

    async fn execute(&self, _args: Value, _ctx: &mut SharedContext) -> ToolResult {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(n.to_string())
    }
}
