//! TOOLKIT: Baseline models
//!
//! Trains small baseline models on the context's current dataframe. Feature
//! columns are encoded to numbers (text is label-encoded, missing values
//! become 0) and rows are split 80/20 deterministically: every fifth row
//! goes to validation.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use tracing::{debug, info};

use super::{ParamKind, ParamSchema, ToolResult, ToolTrait};
use crate::context::{DataFrame, ModelHandle, ModelSummary, SharedContext};

/// Integer targets with at most this many distinct values are classes
const MAX_CLASSES: usize = 20;
const VALIDATION_EVERY: usize = 5;
const MIN_ROWS: usize = 5;
const RIDGE: f64 = 1e-8;

pub const REGRESSION_MODELS: &[&str] = &["mean", "least_squares"];
pub const CLASSIFICATION_MODELS: &[&str] = &["majority_class", "nearest_centroid"];

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Regression,
    Classification,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regression => "regression",
            Self::Classification => "classification",
        }
    }

    pub fn models(&self) -> &'static [&'static str] {
        match self {
            Self::Regression => REGRESSION_MODELS,
            Self::Classification => CLASSIFICATION_MODELS,
        }
    }
}

/// Classification when the target is text or boolean, or integers with few
/// distinct values; regression otherwise.
pub fn infer_task(target: &[&Value]) -> Task {
    let present: Vec<&Value> = target.iter().copied().filter(|v| !v.is_null()).collect();

    if present.iter().any(|v| v.is_string() || v.is_boolean()) {
        return Task::Classification;
    }

    let all_integral = present
        .iter()
        .all(|v| v.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false));
    let distinct: BTreeSet<String> = present.iter().map(|v| v.to_string()).collect();

    if all_integral && distinct.len() <= MAX_CLASSES {
        Task::Classification
    } else {
        Task::Regression
    }
}

fn label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric feature matrix and target column
struct Dataset {
    features: Vec<Vec<f64>>,
    target: Vec<Value>,
    feature_names: Vec<String>,
}

impl Dataset {
    fn from_frame(df: &DataFrame, target_column: &str) -> Result<Self, BoxError> {
        let target_idx = df
            .column_index(target_column)
            .ok_or_else(|| format!("target column `{}` not found in input data", target_column))?;

        let feature_idx: Vec<usize> = (0..df.columns.len()).filter(|&i| i != target_idx).collect();
        if feature_idx.is_empty() {
            return Err("input data has no feature columns besides the target".into());
        }

        // Label encoding for text columns: sorted distinct values -> index
        let encoders: Vec<Option<BTreeMap<String, f64>>> = feature_idx
            .iter()
            .map(|&i| {
                let column: Vec<&Value> = df.rows.iter().filter_map(|r| r.get(i)).collect();
                if column.iter().any(|v| v.is_string()) {
                    let labels: BTreeSet<String> = column
                        .iter()
                        .filter(|v| !v.is_null())
                        .map(|v| label(v))
                        .collect();
                    Some(
                        labels
                            .into_iter()
                            .enumerate()
                            .map(|(n, l)| (l, n as f64))
                            .collect(),
                    )
                } else {
                    None
                }
            })
            .collect();

        let mut features = Vec::with_capacity(df.len());
        let mut target = Vec::with_capacity(df.len());
        for row in &df.rows {
            let value = row.get(target_idx).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                continue;
            }
            let encoded = feature_idx
                .iter()
                .zip(&encoders)
                .map(|(&i, encoder)| {
                    let cell = row.get(i).unwrap_or(&Value::Null);
                    match (cell, encoder) {
                        (Value::Null, _) => 0.0,
                        (cell, Some(map)) => map.get(&label(cell)).copied().unwrap_or(0.0),
                        (Value::Bool(b), None) => f64::from(u8::from(*b)),
                        (cell, None) => cell.as_f64().unwrap_or(0.0),
                    }
                })
                .collect();
            features.push(encoded);
            target.push(value);
        }

        if target.len() < MIN_ROWS {
            return Err(format!(
                "need at least {} rows with a target value, got {}",
                MIN_ROWS,
                target.len()
            )
            .into());
        }

        Ok(Self {
            features,
            target,
            feature_names: feature_idx.iter().map(|&i| df.columns[i].clone()).collect(),
        })
    }

    /// (train, validation) row indices
    fn split(&self) -> (Vec<usize>, Vec<usize>) {
        (0..self.target.len()).partition(|i| i % VALIDATION_EVERY != VALIDATION_EVERY - 1)
    }

    fn rows(&self, idx: &[usize]) -> (Vec<&Vec<f64>>, Vec<&Value>) {
        idx.iter()
            .map(|&i| (&self.features[i], &self.target[i]))
            .unzip()
    }
}

/// A fitted baseline
#[derive(Debug, Clone, PartialEq)]
pub enum TrainedModel {
    Mean {
        value: f64,
    },
    MajorityClass {
        label: String,
    },
    LeastSquares {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    NearestCentroid {
        /// Per-feature scale used before measuring distance
        scale: Vec<f64>,
        centroids: Vec<(String, Vec<f64>)>,
    },
}

/// Prediction of a trained baseline
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Value(f64),
    Label(String),
}

impl TrainedModel {
    pub fn predict(&self, features: &[f64]) -> Prediction {
        match self {
            Self::Mean { value } => Prediction::Value(*value),
            Self::MajorityClass { label } => Prediction::Label(label.clone()),
            Self::LeastSquares {
                intercept,
                coefficients,
            } => Prediction::Value(
                intercept
                    + coefficients
                        .iter()
                        .zip(features)
                        .map(|(c, x)| c * x)
                        .sum::<f64>(),
            ),
            Self::NearestCentroid { scale, centroids } => {
                let distance = |centroid: &[f64]| -> f64 {
                    centroid
                        .iter()
                        .zip(features)
                        .zip(scale)
                        .map(|((c, x), s)| ((x / s) - c).powi(2))
                        .sum()
                };
                let nearest = centroids.iter().min_by(|a, b| {
                    distance(&a.1)
                        .partial_cmp(&distance(&b.1))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                Prediction::Label(nearest.map(|(l, _)| l.clone()).unwrap_or_default())
            }
        }
    }
}

fn numeric_target(values: &[&Value]) -> Result<Vec<f64>, BoxError> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| -> BoxError { format!("target value {} is not numeric", v).into() })
        })
        .collect()
}

fn fit(model_type: &str, x: &[&Vec<f64>], y: &[&Value]) -> Result<TrainedModel, BoxError> {
    match model_type {
        "mean" => {
            let y = numeric_target(y)?;
            Ok(TrainedModel::Mean {
                value: y.iter().sum::<f64>() / y.len() as f64,
            })
        }
        "majority_class" => {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for value in y {
                *counts.entry(label(value)).or_default() += 1;
            }
            let label = counts
                .into_iter()
                .max_by_key(|(_, n)| *n)
                .map(|(l, _)| l)
                .unwrap_or_default();
            Ok(TrainedModel::MajorityClass { label })
        }
        "least_squares" => {
            let y = numeric_target(y)?;
            let (intercept, coefficients) = least_squares(x, &y)?;
            Ok(TrainedModel::LeastSquares {
                intercept,
                coefficients,
            })
        }
        "nearest_centroid" => {
            let width = x.first().map(|r| r.len()).unwrap_or(0);
            let scale: Vec<f64> = (0..width)
                .map(|j| {
                    let max = x.iter().map(|r| r[j].abs()).fold(0.0, f64::max);
                    if max > 0.0 {
                        max
                    } else {
                        1.0
                    }
                })
                .collect();

            let mut sums: BTreeMap<String, (Vec<f64>, usize)> = BTreeMap::new();
            for (row, value) in x.iter().zip(y) {
                let entry = sums
                    .entry(label(value))
                    .or_insert_with(|| (vec![0.0; width], 0));
                for (j, feature) in row.iter().enumerate() {
                    entry.0[j] += feature / scale[j];
                }
                entry.1 += 1;
            }
            let centroids = sums
                .into_iter()
                .map(|(l, (sum, n))| (l, sum.into_iter().map(|s| s / n as f64).collect()))
                .collect();
            Ok(TrainedModel::NearestCentroid { scale, centroids })
        }
        other => Err(format!(
            "unsupported model type `{}`, expected one of {} or {}",
            other,
            REGRESSION_MODELS.join(", "),
            CLASSIFICATION_MODELS.join(", ")
        )
        .into()),
    }
}

/// Ordinary least squares through the normal equations
fn least_squares(x: &[&Vec<f64>], y: &[f64]) -> Result<(f64, Vec<f64>), BoxError> {
    let width = x.first().map(|r| r.len()).unwrap_or(0) + 1;
    let mut a = vec![vec![0.0; width]; width];
    let mut b = vec![0.0; width];

    for (row, target) in x.iter().zip(y) {
        let mut augmented = Vec::with_capacity(width);
        augmented.push(1.0);
        augmented.extend(row.iter().copied());
        for i in 0..width {
            b[i] += augmented[i] * target;
            for j in 0..width {
                a[i][j] += augmented[i] * augmented[j];
            }
        }
    }
    for (i, row) in a.iter_mut().enumerate().skip(1) {
        row[i] += RIDGE;
    }

    let solution = solve(a, b).ok_or("features are collinear; cannot fit least squares")?;
    Ok((solution[0], solution[1..].to_vec()))
}

/// Gaussian elimination with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

fn r2(actual: &[f64], predicted: &[f64]) -> f64 {
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

fn score(task: Task, model: &TrainedModel, x: &[&Vec<f64>], y: &[&Value]) -> Result<f64, BoxError> {
    let predictions: Vec<Prediction> = x.iter().map(|row| model.predict(row)).collect();
    match task {
        Task::Regression => {
            let actual = numeric_target(y)?;
            let predicted: Vec<f64> = predictions
                .iter()
                .map(|p| match p {
                    Prediction::Value(v) => *v,
                    Prediction::Label(l) => l.parse().unwrap_or(0.0),
                })
                .collect();
            Ok(r2(&actual, &predicted))
        }
        Task::Classification => {
            let correct = predictions
                .iter()
                .zip(y)
                .filter(|(p, actual)| match p {
                    Prediction::Label(l) => *l == label(actual),
                    Prediction::Value(v) => actual.as_f64() == Some(v.round()),
                })
                .count();
            Ok(correct as f64 / y.len() as f64)
        }
    }
}

fn current_frame(ctx: &SharedContext) -> Result<&DataFrame, BoxError> {
    ctx.dataframe
        .as_ref()
        .ok_or_else(|| "no input data loaded; call get_input_data first".into())
}

#[derive(Deserialize)]
struct ChooseModelArgs {
    target_column: String,
}

/// Infers the task type and suggests baselines
pub struct ChooseModelTool;

#[async_trait]
impl ToolTrait for ChooseModelTool {
    fn name(&self) -> &str {
        "choose_model"
    }

    fn description(&self) -> &str {
        "Infer whether predicting the target column is classification or regression and list the baseline models to try."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new().required(
            "target_column",
            ParamKind::String,
            "Name of the column to predict",
        )
    }

    async fn execute(&self, args: Value, ctx: &mut SharedContext) -> ToolResult {
        let args: ChooseModelArgs = serde_json::from_value(args)?;
        let df = current_frame(ctx)?;
        let target = df.column(&args.target_column).ok_or_else(|| {
            format!("target column `{}` not found in input data", args.target_column)
        })?;

        let task = infer_task(&target);
        debug!("Target {} looks like {}", args.target_column, task.as_str());
        Ok(json!({ "task": task.as_str(), "models": task.models() }).to_string())
    }
}

#[derive(Deserialize)]
struct RunModelArgs {
    target_column: String,
    model_type: String,
}

/// Trains and scores one baseline, keeping the fitted model in the context
pub struct RunModelTool;

#[async_trait]
impl ToolTrait for RunModelTool {
    fn name(&self) -> &str {
        "run_model"
    }

    fn description(&self) -> &str {
        "Train and evaluate one baseline model on the input data. Returns {model, score, type}; score is accuracy for classification and R² for regression."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new()
            .required("target_column", ParamKind::String, "Name of the column to predict")
            .required(
                "model_type",
                ParamKind::String,
                "One of: mean, least_squares (regression); majority_class, nearest_centroid (classification)",
            )
    }

    async fn execute(&self, args: Value, ctx: &mut SharedContext) -> ToolResult {
        let args: RunModelArgs = serde_json::from_value(args)?;
        let data = Dataset::from_frame(current_frame(ctx)?, &args.target_column)?;

        let targets: Vec<&Value> = data.target.iter().collect();
        let task = infer_task(&targets);
        if !task.models().contains(&args.model_type.as_str()) {
            return Err(format!(
                "`{}` does not apply to a {} target; use one of {}",
                args.model_type,
                task.as_str(),
                task.models().join(", ")
            )
            .into());
        }

        let (train, validation) = data.split();
        let (x_train, y_train) = data.rows(&train);
        let (x_val, y_val) = data.rows(&validation);

        let model = fit(&args.model_type, &x_train, &y_train)?;
        let score = score(task, &model, &x_val, &y_val)?;
        info!(
            "◆ MODEL {} TRAINED on {:?}: score {:.4}",
            args.model_type, data.feature_names, score
        );

        let summary = ModelSummary {
            model: args.model_type.clone(),
            score,
            task: task.as_str().to_string(),
        };
        ctx.trained_models
            .insert(args.model_type.clone(), ModelHandle::new(model));
        ctx.record_result(summary.clone());

        Ok(serde_json::to_string(&summary)?)
    }
}

#[derive(Deserialize)]
struct ModelCardArgs {
    results_json: Option<String>,
}

/// Markdown report over model results
pub struct ModelCardReportTool;

impl ModelCardReportTool {
    pub fn render(results: &[ModelSummary]) -> Option<String> {
        let best = results
            .iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))?;

        let mut report = String::from("## Model Report\n\n");
        for result in results {
            let _ = write!(
                report,
                "**Model**: {}\n**Type**: {}\n**Validation Score**: {:.4}\n\n",
                result.model, result.task, result.score
            );
        }
        let _ = writeln!(
            report,
            "### Recommended Model: {} (Score: {:.4})",
            best.model, best.score
        );
        Some(report)
    }
}

#[async_trait]
impl ToolTrait for ModelCardReportTool {
    fn name(&self) -> &str {
        "model_card_report"
    }

    fn description(&self) -> &str {
        "Summarise model results as a markdown report and recommend the best model. Uses the results of run_model unless results_json is given."
    }

    fn parameters(&self) -> ParamSchema {
        ParamSchema::new().optional(
            "results_json",
            ParamKind::String,
            "JSON list of {model, score, type} objects",
        )
    }

    async fn execute(&self, args: Value, ctx: &mut SharedContext) -> ToolResult {
        let args: ModelCardArgs = serde_json::from_value(args)?;
        let results: Vec<ModelSummary> = match args.results_json {
            Some(raw) => serde_json::from_str(&raw)?,
            None => ctx.model_results.clone(),
        };

        ModelCardReportTool::render(&results)
            .ok_or_else(|| "no model results to report; call run_model first".into())
    }
}
