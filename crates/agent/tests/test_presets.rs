//! Tests for the preset analyst crew

mod common;

use common::{seed_database, sqlite_context, ScriptedProvider};
use datacrew_agent::crew::{self, DATA_MANAGER, DATA_SCIENTIST, PRESETS, SQL_ANALYST};
use datacrew_agent::{RunConfig, RunOutput, Runner, StaticConfirmer};
use datacrew_provider::{ChatResponse, FINAL_OUTPUT_TOOL};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::tempdir;

const MODEL: &str = "test-model";

fn tool_names(tools: &[datacrew_provider::Tool]) -> Vec<String> {
    tools.iter().map(|t| t.function.name.clone()).collect()
}

#[test]
fn test_sql_analyst() {
    let agent = crew::sql_analyst(MODEL).unwrap();
    assert_eq!(agent.name, SQL_ANALYST);
    assert_eq!(agent.model.as_deref(), Some(MODEL));
    assert_eq!(
        agent.tools.names(),
        vec!["describe_database", "profile_database", "sql_query"]
    );
    assert!(agent.is_structured());
    assert_eq!(
        tool_names(&agent.tool_definitions()).last().map(String::as_str),
        Some(FINAL_OUTPUT_TOOL)
    );
}

#[test]
fn test_visualisation_analyst() {
    let agent = crew::visualisation_analyst(MODEL, Arc::new(StaticConfirmer(true))).unwrap();
    assert_eq!(
        agent.tools.names(),
        vec![
            "ask_for_confirmation",
            "login_dashboard",
            "create_chart",
            "create_dashboard",
            "add_chart_to_dashboard",
        ]
    );
    assert!(agent
        .schema_violations(&json!({"chart_link": "http://dash/card/1"}))
        .is_empty());
}

#[test]
fn test_data_scientist_guardrails() {
    let plain = crew::data_scientist(MODEL, false).unwrap();
    assert_eq!(plain.guardrails.len(), 1);
    assert!(plain.tools.has("sql_agent"));
    assert!(plain.tools.has("run_model"));

    let judged = crew::data_scientist(MODEL, true).unwrap();
    assert_eq!(judged.guardrails.len(), 2);
    assert_eq!(judged.guardrails[1].name(), "ml_report_judge");
}

#[test]
fn test_data_manager_is_unstructured() {
    let agent = crew::data_manager(MODEL, Arc::new(StaticConfirmer(false))).unwrap();
    assert!(!agent.is_structured());
    assert_eq!(
        agent.tools.names(),
        vec!["sql_agent", "visualisation_agent", "ask_for_confirmation", "drop_table"]
    );
}

#[test]
fn test_preset_lookup() {
    let confirmer = Arc::new(StaticConfirmer(false));
    for name in PRESETS {
        let agent = crew::preset(name, MODEL, confirmer.clone()).unwrap().unwrap();
        assert_eq!(agent.name, *name);
    }

    let agent = crew::preset("  data scientist ", MODEL, confirmer.clone())
        .unwrap()
        .unwrap();
    assert_eq!(agent.name, DATA_SCIENTIST);

    assert!(crew::preset("Astrologer", MODEL, confirmer).is_none());
}

#[tokio::test]
async fn test_ml_report_guardrail() {
    use datacrew_agent::OutputGuardrail;

    let guardrail = crew::ml_report_guardrail();
    let ok = guardrail
        .check(&json!({"baseline_model_results": "0.8", "best_model": "nearest_centroid"}))
        .await;
    assert!(!ok.is_triggered());

    let missing = guardrail.check(&json!({"best_model": "mean"})).await;
    assert!(missing.is_triggered());
    assert_eq!(missing.violations, vec!["Missing `baseline_model_results`."]);
}

/// The data manager delegates a question to the SQL analyst, which
/// queries a real database and answers with a structured output.
#[tokio::test]
async fn test_data_manager_answers_through_sql_analyst() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("bank.db");
    seed_database(&db).await;

    let sql = "SELECT COUNT(*) AS n FROM users";
    let provider = ScriptedProvider::new(vec![
        ChatResponse::tool_call("m1", "sql_agent", json!({"input": "How many users are there?"})),
        ChatResponse::tool_call("s1", "sql_query", json!({"query": sql})),
        ChatResponse::final_output(json!({"sql_query": sql, "query_results": "2"})),
        ChatResponse::text("There are **2** users."),
    ]);
    let runner = Runner::new(provider, RunConfig::default());
    let agent = crew::data_manager(MODEL, Arc::new(StaticConfirmer(false))).unwrap();

    let mut ctx = sqlite_context(&db);
    let result = runner
        .run(&agent, "How many users are there?", &mut ctx)
        .await
        .unwrap();
    assert_eq!(result.agent, DATA_MANAGER);
    assert_eq!(result.output, RunOutput::Text("There are **2** users.".to_string()));

    let requests = runner.provider().requests();
    assert_eq!(requests.len(), 4);

    // the analyst saw the real query result
    let query_result: Value = serde_json::from_str(
        requests[2].messages.last().unwrap().content.as_deref().unwrap(),
    )
    .unwrap();
    assert_eq!(query_result["rows"], json!([[2]]));

    // the manager received the analyst's structured output as the tool result
    let handed_back: Value = serde_json::from_str(
        requests[3].messages.last().unwrap().content.as_deref().unwrap(),
    )
    .unwrap();
    assert_eq!(handed_back["query_results"], "2");
}
