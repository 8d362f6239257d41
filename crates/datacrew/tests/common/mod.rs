//! Common test utilities for datacrew integration tests
#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::{json, Value};
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Isolated home directory for one test
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub data_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let data_dir = temp_dir.path().join(".datacrew");

        Ok(Self { temp_dir, data_dir })
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn transcript_file(&self) -> PathBuf {
        self.data_dir.join("memory").join("shared.json")
    }

    /// The binary with HOME pointed at the test directory and no key in the environment
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_datacrew"));
        cmd.env("HOME", self.temp_dir.path());
        cmd.env_remove("OPENAI_API_KEY");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    pub fn write_config(&self, config: &Value) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::write(self.config_file(), serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    /// Config with a key, talking to `api_base`
    pub fn create_config(&self, api_base: &str) -> anyhow::Result<()> {
        self.write_config(&json!({
            "provider": {"api_key": "test-api-key", "api_base": api_base},
            "agents": {"defaults": {"model": "test-model"}},
            "database": {"url": "sqlite::memory:"},
        }))
    }

    pub fn write_transcript(&self, turns: &Value) -> anyhow::Result<()> {
        let path = self.transcript_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&json!({"messages": turns}))?)?;
        Ok(())
    }

    pub fn read_transcript(&self) -> anyhow::Result<Value> {
        Ok(serde_json::from_str(&std::fs::read_to_string(
            self.transcript_file(),
        )?)?)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

/// Chat completion body carrying a plain answer
pub fn completion_text(content: &str) -> String {
    json!({
        "id": "chatcmpl-test",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
    })
    .to_string()
}

/// Chat completion body carrying one tool call
pub fn completion_tool_call(name: &str, arguments: &Value) -> String {
    json!({
        "id": "chatcmpl-test",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": name, "arguments": arguments.to_string()},
                }],
            },
            "finish_reason": "tool_calls",
        }],
    })
    .to_string()
}
