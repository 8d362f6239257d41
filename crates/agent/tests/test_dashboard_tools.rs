//! Tests for the dashboarding tools against a mock dashboard server

use datacrew_agent::confirmation::CONFIRMATION_REQUIRED;
use datacrew_agent::tools::{
    AddChartToDashboardTool, CreateChartTool, CreateDashboardTool, LoginDashboardTool,
};
use datacrew_agent::{DashboardCredentials, SharedContext, ToolTrait};
use mockito::Matcher;
use serde_json::{json, Value};

fn context(url: &str, confirmed: bool) -> SharedContext {
    let mut ctx = SharedContext::new(
        "sqlite::memory:",
        DashboardCredentials {
            url: format!("{}/", url),
            username: "analyst@example.com".to_string(),
            password: "secret".to_string(),
            database_id: 2,
        },
    );
    ctx.set_confirmation(confirmed);
    ctx
}

#[tokio::test]
async fn test_login_returns_session_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/session")
        .match_body(Matcher::Json(json!({
            "username": "analyst@example.com",
            "password": "secret",
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": "session-123"}"#)
        .create_async()
        .await;

    let token = LoginDashboardTool
        .execute(json!({}), &mut context(&server.url(), false))
        .await
        .unwrap();

    assert_eq!(token, "session-123");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_login_rejected() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/api/session")
        .with_status(401)
        .create_async()
        .await;

    let err = LoginDashboardTool
        .execute(json!({}), &mut context(&server.url(), false))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn test_create_chart_requires_confirmation() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/card")
        .expect(0)
        .create_async()
        .await;

    let output = CreateChartTool
        .execute(
            json!({
                "session_token": "session-123",
                "sql_query": "SELECT 1",
                "name": "One",
                "display": "table",
            }),
            &mut context(&server.url(), false),
        )
        .await
        .unwrap();

    assert_eq!(output, CONFIRMATION_REQUIRED);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_create_chart() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/card")
        .match_header("X-Metabase-Session", "session-123")
        .match_body(Matcher::Json(json!({
            "name": "Deposits by kind",
            "display": "bar",
            "dataset_query": {
                "type": "native",
                "native": {"query": "SELECT kind, COUNT(*) FROM transactions GROUP BY kind"},
                "database": 2,
            },
            "visualization_settings": {},
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": 41, "name": "Deposits by kind"}"#)
        .create_async()
        .await;

    let url = server.url();
    let output = CreateChartTool
        .execute(
            json!({
                "session_token": "session-123",
                "sql_query": "SELECT kind, COUNT(*) FROM transactions GROUP BY kind",
                "name": "Deposits by kind",
                "display": "bar",
            }),
            &mut context(&url, true),
        )
        .await
        .unwrap();

    assert_eq!(output, format!("{}/card/41", url));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_create_chart_rejects_unknown_display() {
    let server = mockito::Server::new_async().await;
    let err = CreateChartTool
        .execute(
            json!({
                "session_token": "session-123",
                "sql_query": "SELECT 1",
                "name": "One",
                "display": "hologram",
            }),
            &mut context(&server.url(), true),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("hologram"));
}

#[tokio::test]
async fn test_create_dashboard() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/dashboard")
        .match_header("X-Metabase-Session", "session-123")
        .match_body(Matcher::Json(json!({"name": "Bank", "description": ""})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": 7}"#)
        .create_async()
        .await;

    let url = server.url();
    let output = CreateDashboardTool
        .execute(
            json!({"session_token": "session-123", "name": "Bank"}),
            &mut context(&url, true),
        )
        .await
        .unwrap();

    let created: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(created["dashboard_id"], 7);
    assert_eq!(created["url"], format!("{}/dashboard/7", url));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_add_chart_keeps_existing_cards() {
    let mut server = mockito::Server::new_async().await;
    let existing = json!({"id": 3, "card_id": 40, "col": 0, "row": 0, "size_x": 12, "size_y": 10});

    let get = server
        .mock("GET", "/api/dashboard/7")
        .match_header("X-Metabase-Session", "session-123")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": 7, "dashcards": [existing.clone()]}).to_string())
        .create_async()
        .await;

    let put = server
        .mock("PUT", "/api/dashboard/7/cards")
        .match_header("X-Metabase-Session", "session-123")
        .match_body(Matcher::Json(json!({
            "cards": [
                existing,
                {
                    "id": -1,
                    "card_id": 41,
                    "col": 12,
                    "row": 0,
                    "size_x": 12,
                    "size_y": 10,
                    "parameter_mappings": [],
                    "visualization_settings": {},
                },
            ],
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .create_async()
        .await;

    let url = server.url();
    let output = AddChartToDashboardTool
        .execute(
            json!({"session_token": "session-123", "dashboard_id": 7, "card_id": 41}),
            &mut context(&url, true),
        )
        .await
        .unwrap();

    assert_eq!(output, format!("{}/dashboard/7", url));
    get.assert_async().await;
    put.assert_async().await;
}

#[tokio::test]
async fn test_add_chart_beside_oversized_card() {
    let mut server = mockito::Server::new_async().await;
    let tall = json!({
        "id": 3,
        "card_id": 40,
        "col": 0,
        "row": 0,
        "size_x": 12,
        "size_y": 9_000_000_000i64
    });

    let get = server
        .mock("GET", "/api/dashboard/7")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": 7, "dashcards": [tall.clone()]}).to_string())
        .create_async()
        .await;

    let put = server
        .mock("PUT", "/api/dashboard/7/cards")
        .match_body(Matcher::Json(json!({
            "cards": [
                tall,
                {
                    "id": -1,
                    "card_id": 41,
                    "col": 12,
                    "row": 0,
                    "size_x": 12,
                    "size_y": 10,
                    "parameter_mappings": [],
                    "visualization_settings": {},
                },
            ],
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .create_async()
        .await;

    AddChartToDashboardTool
        .execute(
            json!({"session_token": "session-123", "dashboard_id": 7, "card_id": 41}),
            &mut context(&server.url(), true),
        )
        .await
        .unwrap();

    get.assert_async().await;
    put.assert_async().await;
}

#[tokio::test]
async fn test_add_chart_refused_without_confirmation() {
    let mut server = mockito::Server::new_async().await;
    let get = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let output = AddChartToDashboardTool
        .execute(
            json!({"session_token": "session-123", "dashboard_id": 7, "card_id": 41}),
            &mut context(&server.url(), false),
        )
        .await
        .unwrap();

    assert_eq!(output, CONFIRMATION_REQUIRED);
    get.assert_async().await;
}
