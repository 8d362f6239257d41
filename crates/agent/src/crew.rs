//! Preset agents
//!
//! The analyst crew: a SQL analyst, a visualisation analyst, a data
//! scientist that delegates to the SQL analyst, and a data manager that
//! coordinates both analysts.

use std::sync::Arc;

use crate::agent::{AgentDefinition, OutputSchema};
use crate::confirmation::{ConfirmationGate, Confirmer};
use crate::guardrail::{Guardrail, JudgeGuardrail, RequiredFieldsGuardrail};
use crate::tools::{
    AddChartToDashboardTool, ChooseModelTool, CreateChartTool, CreateDashboardTool,
    DescribeDatabaseTool, DropTableTool, GetInputDataTool, LoginDashboardTool,
    ModelCardReportTool, ParamKind, ProfileDatabaseTool, RunModelTool, SqlQueryTool,
};
use crate::Result;

pub const SQL_ANALYST: &str = "SQL Analyst";
pub const VISUALISATION_ANALYST: &str = "Visualisation Analyst";
pub const DATA_SCIENTIST: &str = "Data Scientist";
pub const DATA_MANAGER: &str = "Data Manager";

/// Selectable agents, in menu order
pub const PRESETS: &[&str] = &[SQL_ANALYST, DATA_MANAGER, DATA_SCIENTIST, VISUALISATION_ANALYST];

const SQL_ANALYST_INSTRUCTIONS: &str = "\
You are a data analyst answering questions from a SQLite database. You may run SQL directly or inspect the schema first.

Rules:
- After every query, check whether the result is useful.
- An empty or near-empty result usually means a wrong assumption about tables or columns. Call `describe_database` or `profile_database` and try again.
- Never give a final answer based on an empty result without verifying the schema.
- Finish by calling `final_output` with the SQL you ran and its results.";

const VISUALISATION_ANALYST_INSTRUCTIONS: &str = "\
You are a data analyst who turns SQL queries into charts and dashboards.

Given an analytics question and the SQL query that answers it, pick a display ('table', 'bar', 'line', 'pie', 'scatter' or 'area') and create a chart. If a dashboard is requested, create one and add the charts to it.

Rules:
- Call `login_dashboard` first; every other dashboard tool needs its session token.
- Before each chart or dashboard change, call `ask_for_confirmation` describing exactly what you are about to do. If the user says no, stop and report it.
- Finish by calling `final_output` with the link to the chart or dashboard.";

const DATA_SCIENTIST_INSTRUCTIONS: &str = "\
You are a data scientist who builds and evaluates baseline predictive models from tabular data.

Steps:
1. Ask `sql_agent` to inspect the schema and write one SQL query returning both the input features and the target column. A classification target must be binary or categorical.
2. Pass that query to `get_input_data`.
3. Call `choose_model` with the target column to get the baselines that apply.
4. Call `run_model` once per suggested baseline.
5. Call `model_card_report` to summarise the results.
6. Finish by calling `final_output` with the baseline results, the best model, and, when you have them, feature importance notes and next steps.

Always include the target column in the query. If unsure which columns exist, ask `sql_agent`.";

const DATA_MANAGER_INSTRUCTIONS: &str = "\
You are a lead data analyst coordinating two specialists:
- `sql_agent` writes and runs database queries.
- `visualisation_agent` creates charts and dashboards from SQL queries. It cannot write SQL and cannot see the schema.

Decide whether a question needs a plain data answer, a single chart, or a dashboard of several charts.
- Data only: delegate to `sql_agent`.
- Visual: first get the SQL query from `sql_agent`, then pass the SQL text (not its results) to `visualisation_agent`. Reuse charts created earlier instead of regenerating them.

To remove a table, call `ask_for_confirmation` first and only then `drop_table`.

Answer in markdown.";

const ML_REPORT_JUDGE_INSTRUCTIONS: &str = "\
Examine the report and decide whether it is a proper ML report. It must include baseline model results and the best model; feature importance and next steps are optional. Answer with `final_output`.";

fn sql_output() -> OutputSchema {
    OutputSchema::new("SQLOutput")
        .required("sql_query", ParamKind::String, "The SQL query that produced the answer")
        .required("query_results", ParamKind::String, "The query results")
}

fn chart_output() -> OutputSchema {
    OutputSchema::new("ChartOutput").required(
        "chart_link",
        ParamKind::String,
        "Link to the created chart or dashboard",
    )
}

fn ml_report_output() -> OutputSchema {
    OutputSchema::new("MLReport")
        .required(
            "baseline_model_results",
            ParamKind::String,
            "Scores of every baseline trained",
        )
        .required("best_model", ParamKind::String, "The recommended model and why")
        .optional("feature_importance", ParamKind::String, "Which features matter")
        .optional("next_steps", ParamKind::String, "Recommended next steps")
}

pub fn ml_report_guardrail() -> RequiredFieldsGuardrail {
    RequiredFieldsGuardrail::new("ml_report")
        .required(&["baseline_model_results", "best_model"])
        .optional(&["feature_importance", "next_steps"])
}

/// Judge agent answering `{reasoning, is_ml_report}`
pub fn ml_report_judge(model: &str) -> Result<JudgeGuardrail> {
    let judge = AgentDefinition::builder("Guardrail check")
        .model(model)
        .instructions(ML_REPORT_JUDGE_INSTRUCTIONS)
        .output_schema(
            OutputSchema::new("MLReportOutput")
                .required("reasoning", ParamKind::String, "Why the report passes or fails")
                .required("is_ml_report", ParamKind::Boolean, "Whether it is a proper ML report"),
        )
        .build()?;

    Ok(JudgeGuardrail::new("ml_report_judge", Arc::new(judge))
        .fields(&[
            "baseline_model_results",
            "best_model",
            "feature_importance",
            "next_steps",
        ])
        .verdict_field("is_ml_report")
        .rationale_field("reasoning"))
}

pub fn sql_analyst(model: &str) -> Result<AgentDefinition> {
    AgentDefinition::builder(SQL_ANALYST)
        .model(model)
        .instructions(SQL_ANALYST_INSTRUCTIONS)
        .tool(DescribeDatabaseTool)
        .tool(ProfileDatabaseTool)
        .tool(SqlQueryTool)
        .output_schema(sql_output())
        .build()
}

pub fn visualisation_analyst(model: &str, confirmer: Arc<dyn Confirmer>) -> Result<AgentDefinition> {
    AgentDefinition::builder(VISUALISATION_ANALYST)
        .model(model)
        .instructions(VISUALISATION_ANALYST_INSTRUCTIONS)
        .tool(ConfirmationGate::new(confirmer))
        .tool(LoginDashboardTool)
        .tool(CreateChartTool)
        .tool(CreateDashboardTool)
        .tool(AddChartToDashboardTool)
        .output_schema(chart_output())
        .build()
}

/// `with_judge` adds the delegated-judgment guardrail on top of the
/// required-fields predicate
pub fn data_scientist(model: &str, with_judge: bool) -> Result<AgentDefinition> {
    let sql = Arc::new(sql_analyst(model)?);

    let mut builder = AgentDefinition::builder(DATA_SCIENTIST)
        .model(model)
        .instructions(DATA_SCIENTIST_INSTRUCTIONS)
        .agent_tool(sql.as_tool(
            "sql_agent",
            "SQL agent that inspects the database and executes SQL queries",
        ))
        .tool(GetInputDataTool)
        .tool(ChooseModelTool)
        .tool(RunModelTool)
        .tool(ModelCardReportTool)
        .output_schema(ml_report_output())
        .guardrail(Guardrail::predicate(ml_report_guardrail()));

    if with_judge {
        builder = builder.guardrail(Guardrail::judge(ml_report_judge(model)?));
    }
    builder.build()
}

pub fn data_manager(model: &str, confirmer: Arc<dyn Confirmer>) -> Result<AgentDefinition> {
    let sql = Arc::new(sql_analyst(model)?);
    let visualisation = Arc::new(visualisation_analyst(model, Arc::clone(&confirmer))?);

    AgentDefinition::builder(DATA_MANAGER)
        .model(model)
        .instructions(DATA_MANAGER_INSTRUCTIONS)
        .agent_tool(sql.as_tool(
            "sql_agent",
            "SQL expert that writes and executes database queries and returns the SQL with its results",
        ))
        .agent_tool(visualisation.as_tool(
            "visualisation_agent",
            "Visualisation expert that creates charts and dashboards from a SQL query",
        ))
        .tool(ConfirmationGate::new(confirmer))
        .tool(DropTableTool)
        .build()
}

/// Build a preset by name (case-insensitive); `None` for an unknown name
pub fn preset(
    name: &str,
    model: &str,
    confirmer: Arc<dyn Confirmer>,
) -> Option<Result<AgentDefinition>> {
    let name = name.trim();
    if name.eq_ignore_ascii_case(SQL_ANALYST) {
        Some(sql_analyst(model))
    } else if name.eq_ignore_ascii_case(VISUALISATION_ANALYST) {
        Some(visualisation_analyst(model, confirmer))
    } else if name.eq_ignore_ascii_case(DATA_SCIENTIST) {
        Some(data_scientist(model, false))
    } else if name.eq_ignore_ascii_case(DATA_MANAGER) {
        Some(data_manager(model, confirmer))
    } else {
        None
    }
}
