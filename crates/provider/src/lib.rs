//! Model boundary
//!
//! Chat wire types, the `Provider` trait, and the `ModelAction` tagged union
//! that the runner consumes: every model response is exactly one of text, a
//! tool call, or a final output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use thiserror::Error;

pub mod openai;

pub use openai::OpenAiCompatProvider;

/// Reserved tool name a model calls to declare its final output
pub const FINAL_OUTPUT_TOOL: &str = "final_output";

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("◆ REQUEST FAILED: {0}")]
    Request(#[from] reqwest::Error),

    #[error("◆ MALFORMED JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("◆ PROVIDER REJECTED REQUEST: {0}")]
    Api(String),

    #[error("◆ NO API KEY CONFIGURED")]
    NoApiKey,

    #[error("◆ INVALID RESPONSE")]
    InvalidResponse,

    #[error("◆ UNRECOGNIZED RESPONSE SHAPE: {0}")]
    UnrecognizedResponse(String),

    #[error("◆ RATE LIMITED")]
    RateLimited,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Raw chat completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            }],
            finish_reason: "tool_calls".to_string(),
            usage: Usage::default(),
        }
    }

    /// Response declaring a structured final output
    pub fn final_output(output: Value) -> Self {
        Self::tool_call("final", FINAL_OUTPUT_TOOL, output)
    }

    /// Collapse the response into a single action.
    ///
    /// `structured` is true when the calling agent declares an output schema:
    /// plain text is then an intermediate message and the final output must
    /// come through the `final_output` tool. Without a schema, plain text is
    /// the final output.
    pub fn into_action(self, structured: bool) -> Result<ModelAction> {
        if self.tool_calls.len() > 1 {
            return Err(ProviderError::UnrecognizedResponse(format!(
                "{} tool calls in one response",
                self.tool_calls.len()
            )));
        }

        if let Some(call) = self.tool_calls.into_iter().next() {
            if call.name == FINAL_OUTPUT_TOOL {
                return Ok(ModelAction::FinalOutput(call.arguments));
            }
            return Ok(ModelAction::ToolCall(call));
        }

        match self.content {
            Some(text) if structured => Ok(ModelAction::Text(text)),
            Some(text) => Ok(ModelAction::FinalOutput(Value::String(text))),
            None => Err(ProviderError::UnrecognizedResponse(
                "no content and no tool call".to_string(),
            )),
        }
    }
}

/// One model-proposed step
#[derive(Debug, Clone, PartialEq)]
pub enum ModelAction {
    Text(String),
    ToolCall(ToolCall),
    FinalOutput(Value),
}

/// Token accounting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Conversation entry sent to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn with_role(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content.into())
    }

    /// Assistant turn that requested a tool call
    pub fn assistant_tool_call(call: &ToolCall) -> Self {
        Self {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(vec![ToolCallDef::new(
                &call.id,
                &call.name,
                call.arguments.clone(),
            )]),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool(
        call_id: impl Into<String>,
        name: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(result.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
        }
    }
}

/// Tool call as echoed back in history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDef {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCallDef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
}

/// Tool schema offered to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Request parameters
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub tool_choice: ToolChoice,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
            max_tokens: 4096,
            temperature: 0.2,
            tool_choice: ToolChoice::Auto,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ToolChoice {
    Auto,
    Required(String),
    None,
}

/// Language model backend
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse>;
    fn default_model(&self) -> String;
    fn is_configured(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_error_display() {
        assert_eq!(ProviderError::NoApiKey.to_string(), "◆ NO API KEY CONFIGURED");
        assert_eq!(
            ProviderError::Api("bad".to_string()).to_string(),
            "◆ PROVIDER REJECTED REQUEST: bad"
        );
        assert_eq!(ProviderError::RateLimited.to_string(), "◆ RATE LIMITED");
    }

    #[test]
    fn test_text_without_schema_is_final() {
        let action = ChatResponse::text("42 users").into_action(false).unwrap();
        assert_eq!(action, ModelAction::FinalOutput(json!("42 users")));
    }

    #[test]
    fn test_text_with_schema_is_intermediate() {
        let action = ChatResponse::text("thinking").into_action(true).unwrap();
        assert_eq!(action, ModelAction::Text("thinking".to_string()));
    }

    #[test]
    fn test_single_tool_call() {
        let action = ChatResponse::tool_call("c1", "describe_database", json!({}))
            .into_action(true)
            .unwrap();
        match action {
            ModelAction::ToolCall(call) => {
                assert_eq!(call.id, "c1");
                assert_eq!(call.name, "describe_database");
            }
            other => panic!("Expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_final_output_tool() {
        let output = json!({"sql_query": "SELECT 1", "query_results": "[[1]]"});
        let action = ChatResponse::final_output(output.clone())
            .into_action(true)
            .unwrap();
        assert_eq!(action, ModelAction::FinalOutput(output));
    }

    #[test]
    fn test_multiple_tool_calls_rejected() {
        let mut response = ChatResponse::tool_call("a", "x", json!({}));
        response.tool_calls.push(ToolCall {
            id: "b".to_string(),
            name: "y".to_string(),
            arguments: json!({}),
        });

        let err = response.into_action(false).unwrap_err();
        assert!(matches!(err, ProviderError::UnrecognizedResponse(_)));
    }

    #[test]
    fn test_empty_response_rejected() {
        let response = ChatResponse {
            content: None,
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        };
        assert!(matches!(
            response.into_action(false),
            Err(ProviderError::UnrecognizedResponse(_))
        ));
    }

    #[test]
    fn test_tool_call_wins_over_content() {
        let mut response = ChatResponse::tool_call("c", "sql_query", json!({"query": "SELECT 1"}));
        response.content = Some("Let me check".to_string());
        assert!(matches!(
            response.into_action(false).unwrap(),
            ModelAction::ToolCall(_)
        ));
    }

    #[test]
    fn test_message_builders() {
        let msg = Message::system("sys");
        assert_eq!(msg.role, "system");

        let msg = Message::tool("call_1", "sql_query", "[]");
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("sql_query"));
    }

    #[test]
    fn test_assistant_tool_call_message() {
        let call = ToolCall {
            id: "c9".to_string(),
            name: "drop_table".to_string(),
            arguments: json!({"table": "users"}),
        };
        let msg = Message::assistant_tool_call(&call);
        assert_eq!(msg.role, "assistant");
        assert!(msg.content.is_none());
        let defs = msg.tool_calls.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].function.name, "drop_table");
        assert_eq!(defs[0].call_type, "function");
    }

    #[test]
    fn test_tool_serialization() {
        let tool = Tool::new("describe_database", "Describe schema", json!({}));
        let json_str = serde_json::to_string(&tool).unwrap();
        assert!(json_str.contains("\"type\":\"function\""));
        assert!(json_str.contains("\"name\":\"describe_database\""));
    }

    #[test]
    fn test_message_skips_empty_fields() {
        let json_str = serde_json::to_string(&Message::user("Hello")).unwrap();
        assert_eq!(json_str, r#"{"role":"user","content":"Hello"}"#);
    }

    #[test]
    fn test_chat_params_default() {
        let params = ChatParams::default();
        assert!(params.model.is_empty());
        assert_eq!(params.max_tokens, 4096);
        assert!(matches!(params.tool_choice, ToolChoice::Auto));
    }
}
