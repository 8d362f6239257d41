//! OpenAI-compatible chat completions provider

use crate::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Tool]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<WireToolChoice<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            role: &message.role,
            content: message.content.as_deref(),
            tool_calls: message
                .tool_calls
                .as_ref()
                .map(|calls| calls.iter().map(WireToolCall::from).collect()),
            tool_call_id: message.tool_call_id.as_deref(),
            name: message.name.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireToolChoice<'a> {
    Mode(&'static str),
    Function {
        #[serde(rename = "type")]
        kind: &'static str,
        function: NamedFunction<'a>,
    },
}

#[derive(Debug, Serialize)]
struct NamedFunction<'a> {
    name: &'a str,
}

impl<'a> From<&'a ToolChoice> for WireToolChoice<'a> {
    fn from(choice: &'a ToolChoice) -> Self {
        match choice {
            ToolChoice::Auto => Self::Mode("auto"),
            ToolChoice::None => Self::Mode("none"),
            ToolChoice::Required(name) => Self::Function {
                kind: "function",
                function: NamedFunction {
                    name: name.as_str(),
                },
            },
        }
    }
}

/// Tool call in either direction. Arguments travel as a JSON-encoded string.
#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ToolCallDef> for WireToolCall {
    fn from(call: &ToolCallDef) -> Self {
        Self {
            id: call.id.clone(),
            call_type: call.call_type.clone(),
            function: WireFunction {
                name: call.function.name.clone(),
                arguments: Value::String(call.function.arguments.to_string()),
            },
        }
    }
}

impl From<WireToolCall> for ToolCall {
    /// Decodes string arguments; anything unparseable is kept as sent
    fn from(call: WireToolCall) -> Self {
        let arguments = match call.function.arguments {
            Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            other => other,
        };
        Self {
            id: call.id,
            name: call.function.name,
            arguments,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

impl ChatCompletion {
    fn into_response(self) -> Result<ChatResponse> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::InvalidResponse)?;

        Ok(ChatResponse {
            content: choice.message.content,
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(ToolCall::from)
                .collect(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage: self.usage.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

fn parse_response(body: &str) -> Result<ChatResponse> {
    serde_json::from_str::<ChatCompletion>(body)?.into_response()
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error.message)
        .unwrap_or_else(|| "unknown error".to_string())
}

/// Provider for any `/chat/completions` endpoint speaking the OpenAI dialect
pub struct OpenAiCompatProvider {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl OpenAiCompatProvider {
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_base: api_base
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| OPENAI_API_BASE.to_string()),
            default_model: default_model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
        }
    }

    /// Tools are offered one call at a time
    fn build_request<'a>(&'a self, params: &'a ChatParams) -> CompletionRequest<'a> {
        let model = if params.model.is_empty() {
            &self.default_model
        } else {
            &params.model
        };
        let has_tools = !params.tools.is_empty();

        CompletionRequest {
            model,
            messages: params.messages.iter().map(WireMessage::from).collect(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            tools: has_tools.then_some(params.tools.as_slice()),
            parallel_tool_calls: has_tools.then_some(false),
            tool_choice: has_tools.then(|| WireToolChoice::from(&params.tool_choice)),
        }
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiCompatProvider {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }
        trace!("◆ POST {}/chat/completions", self.api_base);

        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.build_request(&params))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Api(error_message(&body)));
        }

        let response = parse_response(&body)?;
        debug!("◆ MODEL RESPONSE: {} TOOL CALLS", response.tool_calls.len());
        Ok(response)
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}
