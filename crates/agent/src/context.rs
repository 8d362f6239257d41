//! Shared run context
//!
//! One mutable record per top-level run. The runner owns it for the run's
//! duration and lends it to every tool call and every delegated sub-agent,
//! so writes made anywhere in the call tree are visible everywhere after.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use datacrew_config::Config;

/// Connection parameters for the dashboarding service
#[derive(Debug, Clone, Default)]
pub struct DashboardCredentials {
    pub url: String,
    pub username: String,
    pub password: String,
    pub database_id: u64,
}

impl DashboardCredentials {
    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// Tabular result set with named columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl DataFrame {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).unwrap_or(&Value::Null))
                .collect(),
        )
    }

    /// First `n` rows as column-keyed records
    pub fn head(&self, n: usize) -> Vec<Value> {
        self.rows
            .iter()
            .take(n)
            .map(|row| {
                let record: Map<String, Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                Value::Object(record)
            })
            .collect()
    }
}

/// Opaque trained-model handle
#[derive(Clone)]
pub struct ModelHandle(Arc<dyn Any + Send + Sync>);

impl ModelHandle {
    pub fn new<T: Any + Send + Sync>(model: T) -> Self {
        Self(Arc::new(model))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ModelHandle(..)")
    }
}

/// Validation score of one trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model: String,
    pub score: f64,
    #[serde(rename = "type")]
    pub task: String,
}

/// State threaded through one run and all of its delegations
#[derive(Debug, Default)]
pub struct SharedContext {
    pub database_url: String,
    pub dashboard: DashboardCredentials,
    /// Last retrieved tabular result
    pub dataframe: Option<DataFrame>,
    pub trained_models: HashMap<String, ModelHandle>,
    /// Name of the highest-scoring trained model
    pub best_model: Option<String>,
    pub model_results: Vec<ModelSummary>,
    human_confirmation: bool,
}

impl SharedContext {
    pub fn new(database_url: impl Into<String>, dashboard: DashboardCredentials) -> Self {
        Self {
            database_url: database_url.into(),
            dashboard,
            ..Default::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.database.url.clone(),
            DashboardCredentials {
                url: config.dashboard.url.clone(),
                username: config.dashboard.username.clone(),
                password: config.dashboard.password.clone(),
                database_id: config.dashboard.database_id,
            },
        )
    }

    /// Whether the human approved the pending side-effecting action.
    ///
    /// The flag is run-wide: it is not scoped to one action and is not
    /// cleared when a side-effecting tool consumes it.
    pub fn is_confirmed(&self) -> bool {
        self.human_confirmation
    }

    pub fn set_confirmation(&mut self, approved: bool) {
        self.human_confirmation = approved;
    }

    /// Record a model score, tracking the best one seen so far
    pub fn record_result(&mut self, summary: ModelSummary) {
        let is_best = self
            .model_results
            .iter()
            .all(|existing| summary.score > existing.score);
        if is_best {
            self.best_model = Some(summary.model.clone());
        }
        self.model_results.push(summary);
    }
}
