//! TOOLKIT: SQLite database
//!
//! Every tool opens its own connection to `SharedContext::database_url`.
//! Only `drop_table`, which sits behind the confirmation gate, connects
//! read-write; the rest connect read-only, so model-written SQL cannot change
//! the database.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Column, Connection, Row, SqliteConnection, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::{debug, info};

use super::{ParamKind, ParamSchema, ToolResult, ToolTrait};
use crate::confirmation::require_confirmation;
use crate::context::{DataFrame, SharedContext};

/// Distinct values above which a column is not sampled
pub const MAX_PROFILE_VALUES: i64 = 20;

/// Rows returned by `get_input_data`
pub const PREVIEW_ROWS: usize = 5;

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

async fn connect_read_only(ctx: &SharedContext) -> Result<SqliteConnection, sqlx::Error> {
    debug!("Connecting read-only to {}", ctx.database_url);
    let options = SqliteConnectOptions::from_str(&ctx.database_url)?
        .read_only(true)
        .create_if_missing(false);
    SqliteConnection::connect_with(&options).await
}

async fn connect_read_write(ctx: &SharedContext) -> Result<SqliteConnection, sqlx::Error> {
    debug!("Connecting read-write to {}", ctx.database_url);
    SqliteConnection::connect(&ctx.database_url).await
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Decode one cell by its storage class
fn cell(row: &SqliteRow, idx: usize) -> Value {
    let type_name = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row
            .try_get::<i64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get::<f64, _>(idx)
            .map(|f| json!(f))
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(idx)
            .map(|bytes| Value::String(format!("<{} bytes>", bytes.len())))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn row_values(row: &SqliteRow) -> Vec<Value> {
    (0..row.columns().len()).map(|i| cell(row, i)).collect()
}

/// Execute `sql` and collect the result set
pub async fn fetch_frame(ctx: &SharedContext, sql: &str) -> Result<DataFrame, sqlx::Error> {
    let mut conn = connect_read_only(ctx).await?;
    let rows = sqlx::query(sql).fetch_all(&mut conn).await?;

    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect()
        })
        .unwrap_or_default();
    let rows = rows.iter().map(row_values).collect();

    conn.close().await?;
    Ok(DataFrame::new(columns, rows))
}

async fn table_names(conn: &mut SqliteConnection) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(|r| r.try_get::<String, _>("name")).collect()
}

/// (name, declared type) of each column
async fn table_columns(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Vec<(String, String)>, sqlx::Error> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
        .fetch_all(&mut *conn)
        .await?;
    rows.iter()
        .map(|r| Ok((r.try_get::<String, _>("name")?, r.try_get::<String, _>("type")?)))
        .collect()
}

/// Lists tables and their columns
pub struct DescribeDatabaseTool;

#[async_trait]
impl ToolTrait for DescribeDatabaseTool {
    fn name(&self) -> &str {
        "describe_database"
    }

    fn description(&self) -> &str {
        "Describe the database schema: every table and its columns with their types."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new()
    }

    async fn execute(&self, _args: Value, ctx: &mut SharedContext) -> ToolResult {
        let mut conn = connect_read_only(ctx).await?;
        let mut schema = Map::new();

        for table in table_names(&mut conn).await? {
            let columns: Vec<Value> = table_columns(&mut conn, &table)
                .await?
                .into_iter()
                .map(|(name, kind)| json!({"column_name": name, "type": kind}))
                .collect();
            schema.insert(table, Value::Array(columns));
        }

        conn.close().await?;
        Ok(Value::Object(schema).to_string())
    }
}

/// Distinct counts and sample values per column
pub struct ProfileDatabaseTool;

#[async_trait]
impl ToolTrait for ProfileDatabaseTool {
    fn name(&self) -> &str {
        "profile_database"
    }

    fn description(&self) -> &str {
        "Profile the values each column can take (distinct count, and the values themselves when there are few), e.g. the possible transaction types."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new()
    }

    async fn execute(&self, _args: Value, ctx: &mut SharedContext) -> ToolResult {
        let mut conn = connect_read_only(ctx).await?;
        let mut profile = Map::new();

        for table in table_names(&mut conn).await? {
            let mut columns = Vec::new();
            for (name, kind) in table_columns(&mut conn, &table).await? {
                let column = quote_ident(&name);
                let from = quote_ident(&table);

                let distinct: i64 =
                    sqlx::query_scalar(&format!("SELECT COUNT(DISTINCT {}) FROM {}", column, from))
                        .fetch_one(&mut conn)
                        .await?;

                let samples: Vec<Value> = if distinct <= MAX_PROFILE_VALUES {
                    sqlx::query(&format!(
                        "SELECT DISTINCT {} FROM {} LIMIT {}",
                        column, from, MAX_PROFILE_VALUES
                    ))
                    .fetch_all(&mut conn)
                    .await?
                    .iter()
                    .map(|row| cell(row, 0))
                    .collect()
                } else {
                    Vec::new()
                };

                columns.push(json!({
                    "column_name": name,
                    "type": kind,
                    "distinct_count": distinct,
                    "sample_values": samples,
                }));
            }
            profile.insert(table, Value::Array(columns));
        }

        conn.close().await?;
        Ok(Value::Object(profile).to_string())
    }
}

#[derive(Deserialize)]
struct QueryArgs {
    query: String,
}

/// Runs a SQL statement and returns its rows
pub struct SqlQueryTool;

#[async_trait]
impl ToolTrait for SqlQueryTool {
    fn name(&self) -> &str {
        "sql_query"
    }

    fn description(&self) -> &str {
        "Execute a SQL query and return the result columns and rows as JSON."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new().required("query", ParamKind::String, "The SQL query to execute")
    }

    async fn execute(&self, args: Value, ctx: &mut SharedContext) -> ToolResult {
        let args: QueryArgs = serde_json::from_value(args)?;
        debug!("◆ QUERY: {}", args.query);

        let frame = fetch_frame(ctx, &args.query).await?;
        Ok(json!({ "columns": frame.columns, "rows": frame.rows }).to_string())
    }
}

/// Loads a result set into the context as the current dataframe
pub struct GetInputDataTool;

#[async_trait]
impl ToolTrait for GetInputDataTool {
    fn name(&self) -> &str {
        "get_input_data"
    }

    fn description(&self) -> &str {
        "Execute a SQL query returning both the input features and the target column, and keep the result as the input data for modelling. Returns the first 5 rows."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new().required(
            "query",
            ParamKind::String,
            "SQL query selecting feature columns and the target column",
        )
    }

    async fn execute(&self, args: Value, ctx: &mut SharedContext) -> ToolResult {
        let args: QueryArgs = serde_json::from_value(args)?;

        let frame = fetch_frame(ctx, &args.query).await?;
        let preview = Value::Array(frame.head(PREVIEW_ROWS)).to_string();
        info!(
            "◆ INPUT DATA LOADED: {} rows x {} columns",
            frame.len(),
            frame.columns.len()
        );
        ctx.dataframe = Some(frame);

        Ok(preview)
    }
}

#[derive(Deserialize)]
struct DropTableArgs {
    table: String,
}

/// Drops a table. Side-effecting: refuses unless confirmed.
pub struct DropTableTool;

#[async_trait]
impl ToolTrait for DropTableTool {
    fn name(&self) -> &str {
        "drop_table"
    }

    fn description(&self) -> &str {
        "Permanently drop a table from the database. Requires ask_for_confirmation first."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new().required("table", ParamKind::String, "Name of the table to drop")
    }

    fn is_side_effecting(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &mut SharedContext) -> ToolResult {
        if let Some(refusal) = require_confirmation(ctx) {
            return Ok(refusal);
        }

        let args: DropTableArgs = serde_json::from_value(args)?;
        if !Regex::new(IDENTIFIER_PATTERN)?.is_match(&args.table) {
            return Err(format!("invalid table name: {}", args.table).into());
        }

        let mut conn = connect_read_write(ctx).await?;
        if !table_names(&mut conn).await?.contains(&args.table) {
            return Err(format!("no such table: {}", args.table).into());
        }

        sqlx::query(&format!("DROP TABLE {}", quote_ident(&args.table)))
            .execute(&mut conn)
            .await?;
        conn.close().await?;

        info!("◆ TABLE DROPPED: {}", args.table);
        Ok(format!("Table `{}` dropped.", args.table))
    }
}
