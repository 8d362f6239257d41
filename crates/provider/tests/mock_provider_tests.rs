//! Mock Provider Tests
//!
//! Verifies that the Provider trait can be mocked with mockall and that
//! mocked responses collapse into the expected model actions.

use async_trait::async_trait;
use datacrew_provider::{
    ChatParams, ChatResponse, Message, ModelAction, Provider, ProviderError, Tool,
    FINAL_OUTPUT_TOOL,
};
use mockall::mock;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

mock! {
    pub Provider {}

    #[async_trait]
    impl Provider for Provider {
        async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError>;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
    }
}

#[tokio::test]
async fn test_mock_provider_chat_returns_text() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .returning(|_| Ok(ChatResponse::text("Hello from mock!")));

    let response = assert_ok!(mock.chat(ChatParams::default()).await);

    assert_eq!(response.content, Some("Hello from mock!".to_string()));
    assert!(!response.has_tool_calls());
}

#[tokio::test]
async fn test_mock_provider_chat_returns_error() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .returning(|_| Err(ProviderError::Api("Mock API error".to_string())));

    match mock.chat(ChatParams::default()).await {
        Err(ProviderError::Api(msg)) => assert_eq!(msg, "Mock API error"),
        other => panic!("Expected Api error, got {:?}", other.map(|r| r.content)),
    }
}

#[tokio::test]
async fn test_mock_provider_sees_tool_schemas() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .withf(|params| {
            params.tools.len() == 1
                && params.tools[0].function.name == "describe_database"
                && params.messages[0].role == "system"
        })
        .returning(|_| {
            Ok(ChatResponse::tool_call(
                "call_1",
                "describe_database",
                json!({}),
            ))
        });

    let params = ChatParams {
        model: "test-model".to_string(),
        messages: vec![Message::system("You are an analyst"), Message::user("schema?")],
        tools: vec![Tool::new("describe_database", "Describe", json!({}))],
        ..Default::default()
    };

    let action = mock.chat(params).await.unwrap().into_action(false).unwrap();
    match action {
        ModelAction::ToolCall(call) => assert_eq!(call.name, "describe_database"),
        other => panic!("Expected tool call, got {:?}", other),
    }
}

#[tokio::test]
async fn test_mock_provider_sequence_of_actions() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .returning(|_| Ok(ChatResponse::tool_call("c1", "sql_query", json!({"query": "SELECT 1"}))));
    mock.expect_chat()
        .times(1)
        .returning(|_| Ok(ChatResponse::final_output(json!({"answer": 1}))));

    let first = mock.chat(ChatParams::default()).await.unwrap();
    let second = mock.chat(ChatParams::default()).await.unwrap();

    assert!(matches!(first.into_action(true).unwrap(), ModelAction::ToolCall(_)));
    assert_eq!(second.tool_calls[0].name, FINAL_OUTPUT_TOOL);
    assert_eq!(
        second.into_action(true).unwrap(),
        ModelAction::FinalOutput(json!({"answer": 1}))
    );
}

#[test]
fn test_mock_provider_metadata() {
    let mut mock = MockProvider::new();
    mock.expect_default_model()
        .returning(|| "gpt-4o-mini".to_string());
    mock.expect_is_configured().returning(|| false);

    assert_eq!(mock.default_model(), "gpt-4o-mini");
    assert!(!mock.is_configured());
}

#[tokio::test]
async fn test_mock_provider_rate_limited() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .returning(|_| Err(ProviderError::RateLimited));

    let err = assert_err!(mock.chat(ChatParams::default()).await);
    assert!(matches!(err, ProviderError::RateLimited));
}
