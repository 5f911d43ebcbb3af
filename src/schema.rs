//! Schema validation combinators.
//!
//! A validator is a pure function from a JSON value (or its absence) and a
//! path to a [`Validated`] outcome. Primitive schemas fail fast per field in
//! a fixed order: required check, type check, length/range check,
//! pattern/format check, enum check. Compound schemas (arrays and objects)
//! aggregate every item/field error before deciding overall validity, so a
//! form can show all problems at once.
//!
//! Validators are assembled by calling code for domain shapes (agent
//! configuration, workflow names) and invoked synchronously:
//!
//! ```rust
//! use palisade::schema;
//! use palisade::Validator;
//!
//! let agent = schema::object()
//!     .field("name", schema::string().min_len(1).max_len(64))
//!     .field("temperature", schema::number().min(0.0).max(2.0).optional())
//!     .strict();
//!
//! let outcome = agent.validate(Some(&serde_json::json!({ "name": "triage-bot" })), "");
//! assert!(outcome.is_valid());
//! ```

use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::error::{DomainError, ErrorCode, Result};

/// A single violation, qualified by the path where it occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a validation call. Produced fresh per call; `data` holds the
/// normalized value when validation passed.
#[derive(Debug, Clone)]
pub struct Validated {
    pub errors: Vec<FieldError>,
    pub data: Option<Value>,
}

impl Validated {
    pub fn ok(data: Value) -> Self {
        Self {
            errors: Vec::new(),
            data: Some(data),
        }
    }

    pub fn fail(path: &str, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError::new(path, message)],
            data: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Bridge into the pipeline's error model: a failed validation becomes a
    /// `VALIDATION_ERROR` with every field error in context.
    pub fn into_result(self) -> Result<Value> {
        if self.is_valid() {
            // Valid outcomes always carry data.
            return Ok(self.data.unwrap_or(Value::Null));
        }
        let summary = self
            .errors
            .iter()
            .map(|e| {
                if e.path.is_empty() {
                    e.message.clone()
                } else {
                    format!("{}: {}", e.path, e.message)
                }
            })
            .collect::<Vec<_>>()
            .join("; ");
        let details = self
            .errors
            .iter()
            .map(|e| {
                serde_json::json!({ "path": e.path, "message": e.message })
            })
            .collect();
        Err(
            DomainError::new(ErrorCode::ValidationError, summary)
                .with_context("errors", Value::Array(details)),
        )
    }
}

/// Common interface for all schema combinators.
pub trait Validator: Send + Sync {
    /// Validate a value at `path`. `None` means the field was absent.
    fn validate(&self, value: Option<&Value>, path: &str) -> Validated;
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn is_missing(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

// ===== Primitives =====

#[derive(Default)]
pub struct StringSchema {
    optional: bool,
    default: Option<String>,
    min_len: Option<usize>,
    max_len: Option<usize>,
    pattern: Option<Regex>,
    one_of: Option<Vec<String>>,
}

pub fn string() -> StringSchema {
    StringSchema::default()
}

impl StringSchema {
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Implies `optional`: a missing field resolves to this value.
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.optional = true;
        self.default = Some(value.into());
        self
    }

    pub fn min_len(mut self, len: usize) -> Self {
        self.min_len = Some(len);
        self
    }

    pub fn max_len(mut self, len: usize) -> Self {
        self.max_len = Some(len);
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.one_of = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

impl Validator for StringSchema {
    fn validate(&self, value: Option<&Value>, path: &str) -> Validated {
        if is_missing(value) {
            if self.optional {
                return Validated::ok(
                    self.default.clone().map(Value::String).unwrap_or(Value::Null),
                );
            }
            return Validated::fail(path, "is required");
        }
        let s = match value.and_then(Value::as_str) {
            Some(s) => s,
            None => return Validated::fail(path, "must be a string"),
        };
        let len = s.chars().count();
        if let Some(min) = self.min_len {
            if len < min {
                return Validated::fail(path, format!("must be at least {min} characters"));
            }
        }
        if let Some(max) = self.max_len {
            if len > max {
                return Validated::fail(path, format!("must be at most {max} characters"));
            }
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(s) {
                return Validated::fail(path, "has an invalid format");
            }
        }
        if let Some(allowed) = &self.one_of {
            if !allowed.iter().any(|a| a == s) {
                return Validated::fail(
                    path,
                    format!("must be one of: {}", allowed.join(", ")),
                );
            }
        }
        Validated::ok(Value::String(s.to_string()))
    }
}

#[derive(Default)]
pub struct NumberSchema {
    optional: bool,
    default: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
    integer: bool,
}

pub fn number() -> NumberSchema {
    NumberSchema::default()
}

impl NumberSchema {
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Implies `optional`: a missing field resolves to this value.
    pub fn default_value(mut self, value: f64) -> Self {
        self.optional = true;
        self.default = Some(value);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn integer(mut self) -> Self {
        self.integer = true;
        self
    }
}

impl Validator for NumberSchema {
    fn validate(&self, value: Option<&Value>, path: &str) -> Validated {
        if is_missing(value) {
            if self.optional {
                let data = self
                    .default
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
                return Validated::ok(data);
            }
            return Validated::fail(path, "is required");
        }
        let n = match value.and_then(Value::as_f64) {
            Some(n) => n,
            None => return Validated::fail(path, "must be a number"),
        };
        if self.integer && n.fract() != 0.0 {
            return Validated::fail(path, "must be an integer");
        }
        if let Some(min) = self.min {
            if n < min {
                return Validated::fail(path, format!("must be at least {min}"));
            }
        }
        if let Some(max) = self.max {
            if n > max {
                return Validated::fail(path, format!("must be at most {max}"));
            }
        }
        Validated::ok(value.cloned().unwrap_or(Value::Null))
    }
}

#[derive(Default)]
pub struct BoolSchema {
    optional: bool,
    default: Option<bool>,
}

pub fn boolean() -> BoolSchema {
    BoolSchema::default()
}

impl BoolSchema {
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Implies `optional`: a missing field resolves to this value.
    pub fn default_value(mut self, value: bool) -> Self {
        self.optional = true;
        self.default = Some(value);
        self
    }
}

impl Validator for BoolSchema {
    fn validate(&self, value: Option<&Value>, path: &str) -> Validated {
        if is_missing(value) {
            if self.optional {
                return Validated::ok(self.default.map(Value::Bool).unwrap_or(Value::Null));
            }
            return Validated::fail(path, "is required");
        }
        match value.and_then(Value::as_bool) {
            Some(b) => Validated::ok(Value::Bool(b)),
            None => Validated::fail(path, "must be a boolean"),
        }
    }
}

// ===== Compounds =====

pub struct ArraySchema {
    item: Box<dyn Validator>,
    optional: bool,
    min_items: Option<usize>,
    max_items: Option<usize>,
}

pub fn array(item: impl Validator + 'static) -> ArraySchema {
    ArraySchema {
        item: Box::new(item),
        optional: false,
        min_items: None,
        max_items: None,
    }
}

impl ArraySchema {
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn min_items(mut self, n: usize) -> Self {
        self.min_items = Some(n);
        self
    }

    pub fn max_items(mut self, n: usize) -> Self {
        self.max_items = Some(n);
        self
    }
}

impl Validator for ArraySchema {
    fn validate(&self, value: Option<&Value>, path: &str) -> Validated {
        if is_missing(value) {
            if self.optional {
                return Validated::ok(Value::Null);
            }
            return Validated::fail(path, "is required");
        }
        let items = match value.and_then(Value::as_array) {
            Some(items) => items,
            None => return Validated::fail(path, "must be an array"),
        };
        if let Some(min) = self.min_items {
            if items.len() < min {
                return Validated::fail(path, format!("must have at least {min} items"));
            }
        }
        if let Some(max) = self.max_items {
            if items.len() > max {
                return Validated::fail(path, format!("must have at most {max} items"));
            }
        }

        // Aggregate every item error rather than stopping at the first.
        let mut errors = Vec::new();
        let mut normalized = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let item_path = format!("{path}[{index}]");
            let outcome = self.item.validate(Some(item), &item_path);
            if outcome.is_valid() {
                normalized.push(outcome.data.unwrap_or(Value::Null));
            } else {
                errors.extend(outcome.errors);
            }
        }

        if errors.is_empty() {
            Validated::ok(Value::Array(normalized))
        } else {
            Validated {
                errors,
                data: None,
            }
        }
    }
}

#[derive(Default)]
pub struct ObjectSchema {
    fields: Vec<(String, Box<dyn Validator>)>,
    strict: bool,
    optional: bool,
}

pub fn object() -> ObjectSchema {
    ObjectSchema::default()
}

impl ObjectSchema {
    pub fn field(mut self, name: impl Into<String>, validator: impl Validator + 'static) -> Self {
        self.fields.push((name.into(), Box::new(validator)));
        self
    }

    /// Reject input keys not declared in the shape.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

impl Validator for ObjectSchema {
    fn validate(&self, value: Option<&Value>, path: &str) -> Validated {
        if is_missing(value) {
            if self.optional {
                return Validated::ok(Value::Null);
            }
            return Validated::fail(path, "is required");
        }
        let input = match value.and_then(Value::as_object) {
            Some(map) => map,
            None => return Validated::fail(path, "must be an object"),
        };

        // Aggregate every field error rather than stopping at the first.
        let mut errors = Vec::new();
        let mut normalized = Map::new();
        for (name, validator) in &self.fields {
            let field_path = join_path(path, name);
            let outcome = validator.validate(input.get(name), &field_path);
            if outcome.is_valid() {
                normalized.insert(name.clone(), outcome.data.unwrap_or(Value::Null));
            } else {
                errors.extend(outcome.errors);
            }
        }

        if self.strict {
            for key in input.keys() {
                if !self.fields.iter().any(|(name, _)| name == key) {
                    errors.push(FieldError::new(join_path(path, key), "Unknown field"));
                }
            }
        }

        if errors.is_empty() {
            Validated::ok(Value::Object(normalized))
        } else {
            Validated {
                errors,
                data: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_constraints_fail_fast_in_fixed_order() {
        // Required before type.
        let schema = string().min_len(3);
        let out = schema.validate(None, "name");
        assert_eq!(out.errors[0].message, "is required");

        // Type before length.
        let out = schema.validate(Some(&json!(42)), "name");
        assert_eq!(out.errors[0].message, "must be a string");

        // Length before pattern.
        let schema = string()
            .min_len(3)
            .pattern(Regex::new(r"^[a-z-]+$").unwrap());
        let out = schema.validate(Some(&json!("A")), "name");
        assert_eq!(out.errors[0].message, "must be at least 3 characters");

        // Pattern before enum.
        let schema = string()
            .pattern(Regex::new(r"^[a-z-]+$").unwrap())
            .one_of(["draft", "active"]);
        let out = schema.validate(Some(&json!("UPPER")), "status");
        assert_eq!(out.errors[0].message, "has an invalid format");

        let out = schema.validate(Some(&json!("archived")), "status");
        assert_eq!(out.errors[0].message, "must be one of: draft, active");
        assert_eq!(out.errors[0].path, "status");
    }

    #[test]
    fn missing_optional_resolves_to_default_without_error() {
        let out = string().default_value("gpt-4").validate(None, "model");
        assert!(out.is_valid());
        assert_eq!(out.data, Some(json!("gpt-4")));

        let out = string().optional().validate(None, "model");
        assert!(out.is_valid());
        assert_eq!(out.data, Some(Value::Null));

        let out = number().default_value(0.7).validate(None, "temperature");
        assert_eq!(out.data, Some(json!(0.7)));

        let out = boolean().default_value(true).validate(None, "enabled");
        assert_eq!(out.data, Some(json!(true)));
    }

    #[test]
    fn number_range_and_integer_checks() {
        let schema = number().min(0.0).max(2.0);
        assert!(schema.validate(Some(&json!(1.5)), "t").is_valid());
        assert_eq!(
            schema.validate(Some(&json!(-0.1)), "t").errors[0].message,
            "must be at least 0"
        );
        assert_eq!(
            schema.validate(Some(&json!(2.5)), "t").errors[0].message,
            "must be at most 2"
        );
        assert_eq!(
            number().integer().validate(Some(&json!(1.5)), "n").errors[0].message,
            "must be an integer"
        );
        assert_eq!(
            schema.validate(Some(&json!("1")), "t").errors[0].message,
            "must be a number"
        );
    }

    #[test]
    fn object_aggregates_all_field_errors() {
        let schema = object()
            .field("name", string().min_len(1))
            .field("temperature", number().min(0.0).max(2.0));

        let out = schema.validate(
            Some(&json!({ "name": "", "temperature": 3.0 })),
            "",
        );
        assert!(!out.is_valid());
        assert_eq!(out.errors.len(), 2);
        assert!(out.errors.iter().any(|e| e.path == "name"));
        assert!(out.errors.iter().any(|e| e.path == "temperature"));
    }

    #[test]
    fn strict_object_flags_unknown_fields() {
        let schema = object().field("name", string()).strict();
        let out = schema.validate(
            Some(&json!({ "name": "bot", "role": "admin" })),
            "",
        );
        assert!(!out.is_valid());
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].path, "role");
        assert_eq!(out.errors[0].message, "Unknown field");
    }

    #[test]
    fn non_strict_object_ignores_unknown_fields() {
        let schema = object().field("name", string());
        let out = schema.validate(
            Some(&json!({ "name": "bot", "role": "admin" })),
            "",
        );
        assert!(out.is_valid());
        // Normalized output only carries declared fields.
        assert_eq!(out.data, Some(json!({ "name": "bot" })));
    }

    #[test]
    fn nested_paths_are_qualified() {
        let schema = object().field(
            "config",
            object().field("model", string().min_len(1)),
        );
        let out = schema.validate(Some(&json!({ "config": { "model": "" } })), "");
        assert_eq!(out.errors[0].path, "config.model");
    }

    #[test]
    fn array_aggregates_item_errors() {
        let schema = array(string().min_len(2));
        let out = schema.validate(Some(&json!(["ok", "x", 3])), "tags");
        assert!(!out.is_valid());
        assert_eq!(out.errors.len(), 2);
        assert_eq!(out.errors[0].path, "tags[1]");
        assert_eq!(out.errors[1].path, "tags[2]");

        let out = schema.validate(Some(&json!(["ok", "also"])), "tags");
        assert!(out.is_valid());
        assert_eq!(out.data, Some(json!(["ok", "also"])));
    }

    #[test]
    fn array_size_bounds() {
        let schema = array(string()).min_items(1).max_items(2);
        assert_eq!(
            schema.validate(Some(&json!([])), "tags").errors[0].message,
            "must have at least 1 items"
        );
        assert_eq!(
            schema
                .validate(Some(&json!(["a", "b", "c"])), "tags")
                .errors[0]
                .message,
            "must have at most 2 items"
        );
    }

    #[test]
    fn into_result_maps_to_validation_error() {
        let schema = object()
            .field("name", string().min_len(1))
            .field("enabled", boolean());
        let out = schema.validate(Some(&json!({ "name": "" })), "");
        let error = out.into_result().unwrap_err();
        assert_eq!(error.code, ErrorCode::ValidationError);
        assert!(error.message.contains("name"));
        assert!(error.message.contains("enabled"));
        assert!(error.context.get("errors").is_some());

        let out = string().validate(Some(&json!("fine")), "name");
        assert_eq!(out.into_result().unwrap(), json!("fine"));
    }
}
