//! Output guardrails
//!
//! A guardrail inspects a candidate final output. Predicates run in-process;
//! judges hand a rendered summary to a separate agent whose structured
//! output carries a boolean verdict. The runner treats a triggered result
//! from either variant the same way.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::agent::AgentDefinition;

/// Uniform guardrail verdict
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub violations: Vec<String>,
    pub tripwire_triggered: bool,
}

impl GuardrailResult {
    pub fn pass() -> Self {
        Self::default()
    }

    /// Triggered when `violations` is non-empty
    pub fn from_violations(violations: Vec<String>) -> Self {
        let tripwire_triggered = !violations.is_empty();
        Self {
            violations,
            tripwire_triggered,
        }
    }

    pub fn tripwire(reason: impl Into<String>) -> Self {
        Self {
            violations: vec![reason.into()],
            tripwire_triggered: true,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.tripwire_triggered || !self.violations.is_empty()
    }
}

/// In-process check of a candidate output
#[async_trait]
pub trait OutputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self, output: &Value) -> GuardrailResult;
}

/// Required text fields must be non-blank; optional text fields may be
/// absent or null but not blank when present.
#[derive(Debug, Clone)]
pub struct RequiredFieldsGuardrail {
    name: String,
    required: Vec<String>,
    optional: Vec<String>,
}

impl RequiredFieldsGuardrail {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: Vec::new(),
            optional: Vec::new(),
        }
    }

    pub fn required(mut self, fields: &[&str]) -> Self {
        self.required.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    pub fn optional(mut self, fields: &[&str]) -> Self {
        self.optional.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    fn evaluate(&self, output: &Value) -> Vec<String> {
        let Some(object) = output.as_object() else {
            return vec!["output is not a structured object".to_string()];
        };

        let mut violations = Vec::new();
        for field in &self.required {
            match object.get(field) {
                None | Some(Value::Null) => violations.push(format!("Missing `{}`.", field)),
                Some(Value::String(s)) if s.trim().is_empty() => {
                    violations.push(format!("Missing `{}`.", field))
                }
                Some(_) => {}
            }
        }
        for field in &self.optional {
            if let Some(Value::String(s)) = object.get(field) {
                if s.trim().is_empty() {
                    violations.push(format!("`{}` is present but empty.", field));
                }
            }
        }
        violations
    }
}

#[async_trait]
impl OutputGuardrail for RequiredFieldsGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, output: &Value) -> GuardrailResult {
        GuardrailResult::from_violations(self.evaluate(output))
    }
}

type CheckFn = dyn Fn(&Value) -> GuardrailResult + Send + Sync;

/// Closure-backed predicate
pub struct FnGuardrail {
    name: String,
    check: Box<CheckFn>,
}

impl FnGuardrail {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> GuardrailResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Box::new(check),
        }
    }
}

#[async_trait]
impl OutputGuardrail for FnGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, output: &Value) -> GuardrailResult {
        (self.check)(output)
    }
}

/// Delegated judgment: a separate agent reads a summary of the candidate
/// and answers with `{<verdict_field>: bool, <rationale_field>: string}`.
#[derive(Clone)]
pub struct JudgeGuardrail {
    pub name: String,
    pub agent: Arc<AgentDefinition>,
    /// Fields rendered into the summary, in order; empty renders every field
    pub fields: Vec<String>,
    pub verdict_field: String,
    pub rationale_field: String,
}

impl JudgeGuardrail {
    pub fn new(name: impl Into<String>, agent: Arc<AgentDefinition>) -> Self {
        Self {
            name: name.into(),
            agent,
            fields: Vec::new(),
            verdict_field: "is_valid".to_string(),
            rationale_field: "reasoning".to_string(),
        }
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn verdict_field(mut self, field: impl Into<String>) -> Self {
        self.verdict_field = field.into();
        self
    }

    pub fn rationale_field(mut self, field: impl Into<String>) -> Self {
        self.rationale_field = field.into();
        self
    }

    /// Text handed to the judge agent
    pub fn render_summary(&self, output: &Value) -> String {
        let Some(object) = output.as_object() else {
            return render_value(output);
        };

        let fields: Vec<&str> = if self.fields.is_empty() {
            object.keys().map(String::as_str).collect()
        } else {
            self.fields.iter().map(String::as_str).collect()
        };

        fields
            .iter()
            .map(|field| {
                let value = match object.get(*field) {
                    None | Some(Value::Null) => "None".to_string(),
                    Some(value) => render_value(value),
                };
                format!("{}:\n{}", humanize(field), value)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Map the judge's final output to a guardrail result
    pub fn interpret(&self, verdict: &Value) -> GuardrailResult {
        let rationale = verdict
            .get(&self.rationale_field)
            .and_then(Value::as_str)
            .filter(|r| !r.trim().is_empty());

        match verdict.get(&self.verdict_field).and_then(Value::as_bool) {
            Some(true) => GuardrailResult::pass(),
            Some(false) => GuardrailResult::tripwire(match rationale {
                Some(r) => format!("{}: {}", self.name, r),
                None => format!("{}: output rejected", self.name),
            }),
            None => GuardrailResult::tripwire(format!(
                "{}: judge returned no `{}` verdict",
                self.name, self.verdict_field
            )),
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn humanize(field: &str) -> String {
    let text = field.replace('_', " ");
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => text,
    }
}

/// Guardrail attached to an agent
#[derive(Clone)]
pub enum Guardrail {
    Predicate(Arc<dyn OutputGuardrail>),
    Judge(JudgeGuardrail),
}

impl Guardrail {
    pub fn predicate<G: OutputGuardrail + 'static>(guardrail: G) -> Self {
        Self::Predicate(Arc::new(guardrail))
    }

    pub fn judge(guardrail: JudgeGuardrail) -> Self {
        Self::Judge(guardrail)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Predicate(g) => g.name(),
            Self::Judge(g) => &g.name,
        }
    }
}

impl fmt::Debug for Guardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Predicate(g) => write!(f, "Predicate({})", g.name()),
            Self::Judge(g) => write!(f, "Judge({} -> {})", g.name, g.agent.name),
        }
    }
}
