//! TOOLKIT: Dashboarding service
//!
//! Charts are saved native-SQL questions ("cards"); dashboards are grids of
//! cards. Everything except login is side-effecting.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use super::{ParamKind, ParamSchema, ToolResult, ToolTrait};
use crate::confirmation::require_confirmation;
use crate::context::SharedContext;

pub const CHART_DISPLAYS: &[&str] = &["table", "bar", "line", "pie", "scatter", "area"];

const SESSION_HEADER: &str = "X-Metabase-Session";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Dashboard grid width and the size of an appended card
const GRID_COLUMNS: i64 = 24;
const CARD_WIDTH: i64 = 12;
const CARD_HEIGHT: i64 = 10;
const MAX_GRID_ROWS: i64 = 100;
const SCAN_ROWS: i64 = MAX_GRID_ROWS + CARD_HEIGHT;

fn client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()
}

fn id_of(body: &Value) -> Result<i64, Box<dyn std::error::Error + Send + Sync>> {
    body.get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| "response carries no numeric `id`".into())
}

/// First free `CARD_WIDTH x CARD_HEIGHT` slot, scanning rows top-down and
/// columns left-to-right; below every existing card if the grid is full.
pub fn next_free_slot(cards: &[Value]) -> (i64, i64) {
    let mut occupied = HashSet::new();
    let mut bottom = 0;
    for card in cards {
        let col = card.get("col").and_then(Value::as_i64).unwrap_or(0);
        let row = card.get("row").and_then(Value::as_i64).unwrap_or(0);
        let width = card.get("size_x").and_then(Value::as_i64).unwrap_or(CARD_WIDTH);
        let height = card.get("size_y").and_then(Value::as_i64).unwrap_or(CARD_HEIGHT);
        bottom = bottom.max(row.saturating_add(height));

        // Only cells inside the scanned window can block a slot
        let cols = col.max(0)..col.saturating_add(width).min(GRID_COLUMNS);
        let rows = row.max(0)..row.saturating_add(height).min(SCAN_ROWS);
        for x in cols {
            for y in rows.clone() {
                occupied.insert((x, y));
            }
        }
    }

    for row in 0..MAX_GRID_ROWS {
        for col in (0..=GRID_COLUMNS - CARD_WIDTH).step_by(CARD_WIDTH as usize) {
            let free = (0..CARD_WIDTH)
                .all(|dx| (0..CARD_HEIGHT).all(|dy| !occupied.contains(&(col + dx, row + dy))));
            if free {
                return (col, row);
            }
        }
    }
    (0, bottom)
}

/// Opens a session and returns its token
pub struct LoginDashboardTool;

#[async_trait]
impl ToolTrait for LoginDashboardTool {
    fn name(&self) -> &str {
        "login_dashboard"
    }

    fn description(&self) -> &str {
        "Log into the dashboarding service. Returns the session token needed by every chart and dashboard tool."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new()
    }

    async fn execute(&self, _args: Value, ctx: &mut SharedContext) -> ToolResult {
        let url = format!("{}/api/session", ctx.dashboard.base_url());
        debug!("Dashboard login as {}", ctx.dashboard.username);

        let body: Value = client()?
            .post(&url)
            .json(&json!({
                "username": ctx.dashboard.username,
                "password": ctx.dashboard.password,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "login response carries no session id".into())
    }
}

#[derive(Deserialize)]
struct CreateChartArgs {
    session_token: String,
    sql_query: String,
    name: String,
    display: String,
}

/// Saves a SQL question as a chart card and returns its link
pub struct CreateChartTool;

#[async_trait]
impl ToolTrait for CreateChartTool {
    fn name(&self) -> &str {
        "create_chart"
    }

    fn description(&self) -> &str {
        "Create a chart from a SQL query and return its URL. Requires ask_for_confirmation first."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new()
            .required("session_token", ParamKind::String, "Token returned by login_dashboard")
            .required("sql_query", ParamKind::String, "SQL query behind the chart")
            .required("name", ParamKind::String, "Chart name")
            .required(
                "display",
                ParamKind::String,
                "One of: table, bar, line, pie, scatter, area",
            )
    }

    fn is_side_effecting(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &mut SharedContext) -> ToolResult {
        if let Some(refusal) = require_confirmation(ctx) {
            return Ok(refusal);
        }

        let args: CreateChartArgs = serde_json::from_value(args)?;
        if !CHART_DISPLAYS.contains(&args.display.as_str()) {
            return Err(format!(
                "unsupported display `{}`, expected one of {}",
                args.display,
                CHART_DISPLAYS.join(", ")
            )
            .into());
        }

        let base = ctx.dashboard.base_url();
        let body: Value = client()?
            .post(format!("{}/api/card", base))
            .header(SESSION_HEADER, &args.session_token)
            .json(&json!({
                "name": args.name,
                "dataset_query": {
                    "type": "native",
                    "native": { "query": args.sql_query },
                    "database": ctx.dashboard.database_id,
                },
                "display": args.display,
                "visualization_settings": {},
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let card_id = id_of(&body)?;
        info!("◆ CHART CREATED: {} (card {})", args.name, card_id);
        Ok(format!("{}/card/{}", base, card_id))
    }
}

#[derive(Deserialize)]
struct CreateDashboardArgs {
    session_token: String,
    name: String,
    #[serde(default)]
    description: String,
}

/// Creates an empty dashboard
pub struct CreateDashboardTool;

#[async_trait]
impl ToolTrait for CreateDashboardTool {
    fn name(&self) -> &str {
        "create_dashboard"
    }

    fn description(&self) -> &str {
        "Create an empty dashboard and return its id and URL. Requires ask_for_confirmation first."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new()
            .required("session_token", ParamKind::String, "Token returned by login_dashboard")
            .required("name", ParamKind::String, "Dashboard name")
            .optional("description", ParamKind::String, "Dashboard description")
    }

    fn is_side_effecting(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &mut SharedContext) -> ToolResult {
        if let Some(refusal) = require_confirmation(ctx) {
            return Ok(refusal);
        }

        let args: CreateDashboardArgs = serde_json::from_value(args)?;
        let base = ctx.dashboard.base_url();
        let body: Value = client()?
            .post(format!("{}/api/dashboard", base))
            .header(SESSION_HEADER, &args.session_token)
            .json(&json!({ "name": args.name, "description": args.description }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let dashboard_id = id_of(&body)?;
        info!("◆ DASHBOARD CREATED: {} ({})", args.name, dashboard_id);
        Ok(json!({
            "dashboard_id": dashboard_id,
            "url": format!("{}/dashboard/{}", base, dashboard_id),
        })
        .to_string())
    }
}

#[derive(Deserialize)]
struct AddChartArgs {
    session_token: String,
    dashboard_id: i64,
    card_id: i64,
}

/// Appends a chart card to a dashboard at the next free grid slot
pub struct AddChartToDashboardTool;

#[async_trait]
impl ToolTrait for AddChartToDashboardTool {
    fn name(&self) -> &str {
        "add_chart_to_dashboard"
    }

    fn description(&self) -> &str {
        "Append an existing chart to a dashboard, keeping the charts already on it. Returns the dashboard URL. Requires ask_for_confirmation first."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new()
            .required("session_token", ParamKind::String, "Token returned by login_dashboard")
            .required("dashboard_id", ParamKind::Integer, "Dashboard id")
            .required("card_id", ParamKind::Integer, "Chart card id")
    }

    fn is_side_effecting(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &mut SharedContext) -> ToolResult {
        if let Some(refusal) = require_confirmation(ctx) {
            return Ok(refusal);
        }

        let args: AddChartArgs = serde_json::from_value(args)?;
        let base = ctx.dashboard.base_url();
        let dashboard_url = format!("{}/api/dashboard/{}", base, args.dashboard_id);
        let client = client()?;

        let dashboard: Value = client
            .get(&dashboard_url)
            .header(SESSION_HEADER, &args.session_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut cards = dashboard
            .get("dashcards")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let (col, row) = next_free_slot(&cards);
        debug!("Placing card {} at col {} row {}", args.card_id, col, row);

        cards.push(json!({
            "id": -1,
            "card_id": args.card_id,
            "col": col,
            "row": row,
            "size_x": CARD_WIDTH,
            "size_y": CARD_HEIGHT,
            "parameter_mappings": [],
            "visualization_settings": {},
        }));

        client
            .put(format!("{}/cards", dashboard_url))
            .header(SESSION_HEADER, &args.session_token)
            .json(&json!({ "cards": cards }))
            .send()
            .await?
            .error_for_status()?;

        info!("◆ CHART {} ADDED TO DASHBOARD {}", args.card_id, args.dashboard_id);
        Ok(format!("{}/dashboard/{}", base, args.dashboard_id))
    }
}
