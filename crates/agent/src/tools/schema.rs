//! Typed parameter schemas
//!
//! Used both for tool arguments and for agent output contracts.

use serde_json::{json, Map, Value};

/// JSON type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

/// Ordered set of named, typed parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    params: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.with(name, kind, description, true)
    }

    pub fn optional(self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.with(name, kind, description, false)
    }

    fn with(mut self, name: &str, kind: ParamKind, description: &str, required: bool) -> Self {
        self.params.retain(|p| p.name != name);
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required,
        });
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// JSON Schema object offered to the model
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            properties.insert(
                param.name.clone(),
                json!({
                    "type": param.kind.as_str(),
                    "description": param.description,
                }),
            );
        }

        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Every way `args` fails the schema. `null` is treated as an empty
    /// object and as an absent value; undeclared keys are ignored.
    pub fn violations(&self, args: &Value) -> Vec<String> {
        let empty = Map::new();
        let object = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return vec![format!(
                    "expected an object of named arguments, got {}",
                    type_name(other)
                )]
            }
        };

        let mut violations = Vec::new();
        for param in &self.params {
            match object.get(&param.name) {
                None | Some(Value::Null) => {
                    if param.required {
                        violations.push(format!("missing required parameter `{}`", param.name));
                    }
                }
                Some(value) if !param.kind.matches(value) => violations.push(format!(
                    "parameter `{}` must be {}, got {}",
                    param.name,
                    param.kind.as_str(),
                    type_name(value)
                )),
                Some(_) => {}
            }
        }
        violations
    }

    pub fn validate(&self, args: &Value) -> Result<(), String> {
        let violations = self.violations(args);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations.join("; "))
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ParamSchema {
        ParamSchema::new()
            .required("query", ParamKind::String, "SQL query")
            .optional("limit", ParamKind::Integer, "Row limit")
    }

    #[test]
    fn test_json_schema_shape() {
        let value = schema().to_json_schema();
        assert_eq!(value["type"], "object");
        assert_eq!(value["properties"]["query"]["type"], "string");
        assert_eq!(value["properties"]["limit"]["type"], "integer");
        assert_eq!(value["required"], json!(["query"]));
    }

    #[test]
    fn test_valid_arguments() {
        assert!(schema().validate(&json!({"query": "SELECT 1"})).is_ok());
        assert!(schema()
            .validate(&json!({"query": "SELECT 1", "limit": 5, "extra": true}))
            .is_ok());
    }

    #[test]
    fn test_missing_required() {
        let err = schema().validate(&json!({"limit": 5})).unwrap_err();
        assert_eq!(err, "missing required parameter `query`");

        let err = schema().validate(&Value::Null).unwrap_err();
        assert!(err.contains("`query`"));
    }

    #[test]
    fn test_wrong_type() {
        let violations = schema().violations(&json!({"query": 7, "limit": 2.5}));
        assert_eq!(
            violations,
            vec![
                "parameter `query` must be string, got integer".to_string(),
                "parameter `limit` must be integer, got number".to_string(),
            ]
        );
    }

    #[test]
    fn test_non_object_arguments() {
        let err = schema().validate(&json!(["SELECT 1"])).unwrap_err();
        assert!(err.contains("got array"));
    }

    #[test]
    fn test_redeclared_param_replaces() {
        let schema = ParamSchema::new()
            .optional("x", ParamKind::String, "a")
            .required("x", ParamKind::Integer, "b");
        assert_eq!(schema.params().len(), 1);
        assert!(schema.get("x").unwrap().required);
    }
}
