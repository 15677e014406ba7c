//! Parameter types and validation against template metadata.
//!
//! Caller parameters arrive as an untyped JSON object. [`validate`] checks
//! them against a [`Template`]'s declared parameters and produces
//! [`ValidatedParams`]: only declared names, each converted to its declared
//! [`ParamType`]. Anything the template does not declare is dropped here so it
//! can never reach the renderer.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use time::Date;
use tracing::debug;

use crate::template::Template;

/// Errors raised while validating caller parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("Missing required parameter: {name}")]
    Missing { name: String },

    #[error("Parameter '{name}' must be {}", .expected.describe())]
    InvalidType { name: String, expected: ParamType },
}

impl ParamError {
    /// Name of the offending parameter.
    pub fn field(&self) -> &str {
        match self {
            Self::Missing { name } | Self::InvalidType { name, .. } => name,
        }
    }
}

/// Scalar type declared for a template parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[serde(alias = "int")]
    Integer,
    #[default]
    #[serde(alias = "str", alias = "text")]
    String,
    Date,
    #[serde(alias = "number", alias = "decimal")]
    Float,
    #[serde(alias = "bool")]
    Boolean,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::String => "string",
            Self::Date => "date",
            Self::Float => "float",
            Self::Boolean => "boolean",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Integer => "an integer",
            Self::String => "a string",
            Self::Date => "a date string (YYYY-MM-DD)",
            Self::Float => "a number",
            Self::Boolean => "a boolean",
        }
    }

    /// Convert a JSON value to this type.
    ///
    /// Returns `None` when the value has no sensible representation in the
    /// declared type.
    pub fn coerce(self, value: &Value) -> Option<ParamValue> {
        match self {
            Self::Integer => coerce_integer(value).map(ParamValue::Integer),
            Self::Float => coerce_float(value).map(ParamValue::Float),
            Self::Date => coerce_date(value).map(ParamValue::Date),
            Self::Boolean => coerce_boolean(value).map(ParamValue::Boolean),
            Self::String => coerce_string(value).map(ParamValue::Text),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .filter(|f| *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn coerce_date(value: &Value) -> Option<Date> {
    let Value::String(s) = value else {
        return None;
    };
    Date::parse(
        s.trim(),
        time::macros::format_description!("[year]-[month]-[day]"),
    )
    .ok()
}

fn coerce_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A validated, typed parameter value ready for binding.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Date(Date),
    Boolean(bool),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::Integer(_) => ParamType::Integer,
            Self::Float(_) => ParamType::Float,
            Self::Text(_) => ParamType::String,
            Self::Date(_) => ParamType::Date,
            Self::Boolean(_) => ParamType::Boolean,
        }
    }

    /// Truthiness used by conditional template blocks.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Text(s) => !s.is_empty(),
            Self::Date(_) => true,
            Self::Boolean(b) => *b,
        }
    }

    /// Canonical text form, stable across requests.
    pub fn canonical(&self) -> String {
        match self {
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => format!("{f:?}"),
            Self::Text(s) => s.clone(),
            Self::Date(d) => format_date(*d),
            Self::Boolean(b) => b.to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Integer(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Text(s) => Value::String(s.clone()),
            Self::Date(d) => Value::String(format_date(*d)),
            Self::Boolean(b) => Value::Bool(*b),
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Date(d) => serializer.serialize_str(&format_date(*d)),
            Self::Boolean(b) => serializer.serialize_bool(*b),
        }
    }
}

fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Parameters restricted to a template's declared names, typed and normalised.
///
/// Iteration follows the template's declaration order (required, then optional).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedParams {
    values: IndexMap<String, ParamValue>,
}

impl ValidatedParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Whether `name` is present and truthy.
    pub fn is_truthy(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(ParamValue::is_truthy)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, ParamValue)> for ValidatedParams {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Validate caller parameters against a template's metadata.
///
/// JSON `null` is treated as "not supplied".
pub fn validate(
    template: &Template,
    supplied: &Map<String, Value>,
) -> Result<ValidatedParams, ParamError> {
    let present = |name: &str| supplied.get(name).filter(|v| !v.is_null());

    if let Some(missing) = template.required().iter().find(|name| present(name).is_none()) {
        return Err(ParamError::Missing {
            name: missing.clone(),
        });
    }

    let mut values = IndexMap::with_capacity(supplied.len());
    for name in template.declared() {
        let Some(raw) = present(name) else {
            continue;
        };
        let expected = template.param_type(name);
        let value = expected.coerce(raw).ok_or_else(|| ParamError::InvalidType {
            name: name.to_string(),
            expected,
        })?;
        values.insert(name.to_string(), value);
    }

    if values.len() < supplied.len() {
        let dropped: Vec<&str> = supplied
            .keys()
            .filter(|k| !template.is_declared(k))
            .map(String::as_str)
            .collect();
        if !dropped.is_empty() {
            debug!(
                biz_type = %template.biz_type(),
                dropped = ?dropped,
                "Dropping undeclared parameters"
            );
        }
    }

    Ok(ValidatedParams { values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateDefinition;
    use serde_json::json;

    fn template() -> Template {
        let definition = TemplateDefinition::new(
            "SELECT * FROM orders WHERE customer_id = :customer_id \
             AND purchase_date >= :start_date \
             {% if min_amount %}AND amount >= :min_amount{% endif %} \
             {% if only_paid %}AND paid{% endif %} \
             {% if note %}AND note = :note{% endif %}",
        )
        .with_description("test orders")
        .with_required(["customer_id", "start_date"])
        .with_optional(["min_amount", "only_paid", "note"])
        .with_type("customer_id", ParamType::Integer)
        .with_type("start_date", ParamType::Date)
        .with_type("min_amount", ParamType::Float)
        .with_type("only_paid", ParamType::Boolean);
        Template::new("orders", definition).unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_required_parameter_is_named() {
        let supplied = object(json!({ "start_date": "2024-01-01" }));
        let err = validate(&template(), &supplied).unwrap_err();
        assert_eq!(
            err,
            ParamError::Missing {
                name: "customer_id".into()
            }
        );
        assert_eq!(err.field(), "customer_id");
    }

    #[test]
    fn null_counts_as_missing() {
        let err = validate(
            &template(),
            &object(json!({ "customer_id": null, "start_date": "2024-01-01" })),
        )
        .unwrap_err();
        assert!(matches!(err, ParamError::Missing { name } if name == "customer_id"));
    }

    #[test]
    fn integer_strings_are_normalised() {
        let params = validate(
            &template(),
            &object(json!({ "customer_id": " 42 ", "start_date": "2024-01-01" })),
        )
        .unwrap();
        assert_eq!(params.get("customer_id"), Some(&ParamValue::Integer(42)));
    }

    #[test]
    fn non_numeric_integer_is_rejected() {
        let err = validate(
            &template(),
            &object(json!({ "customer_id": "abc", "start_date": "2024-01-01" })),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ParamError::InvalidType {
                name: "customer_id".into(),
                expected: ParamType::Integer
            }
        );
        assert!(err.to_string().contains("must be an integer"));
    }

    #[test]
    fn malformed_date_is_rejected() {
        for bad in [json!("2024-13-01"), json!("01/02/2024"), json!(20240101)] {
            let err = validate(
                &template(),
                &object(json!({ "customer_id": 1, "start_date": bad })),
            )
            .unwrap_err();
            assert!(matches!(
                err,
                ParamError::InvalidType { ref name, expected: ParamType::Date } if name == "start_date"
            ));
        }
    }

    #[test]
    fn undeclared_parameters_are_dropped() {
        let params = validate(
            &template(),
            &object(json!({
                "customer_id": 7,
                "start_date": "2024-02-29",
                "evil": "1; DROP TABLE orders",
            })),
        )
        .unwrap();
        assert!(!params.contains("evil"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn boolean_forms() {
        for (raw, expected) in [
            (json!(true), true),
            (json!("false"), false),
            (json!("TRUE"), true),
            (json!("0"), false),
            (json!(1), true),
        ] {
            let params = validate(
                &template(),
                &object(json!({ "customer_id": 1, "start_date": "2024-01-01", "only_paid": raw })),
            )
            .unwrap();
            assert_eq!(params.get("only_paid"), Some(&ParamValue::Boolean(expected)));
        }

        let err = validate(
            &template(),
            &object(json!({ "customer_id": 1, "start_date": "2024-01-01", "only_paid": "yes" })),
        )
        .unwrap_err();
        assert_eq!(err.field(), "only_paid");
    }

    #[test]
    fn untyped_parameters_default_to_string() {
        let params = validate(
            &template(),
            &object(json!({ "customer_id": 1, "start_date": "2024-01-01", "note": 12 })),
        )
        .unwrap();
        assert_eq!(params.get("note"), Some(&ParamValue::Text("12".into())));
    }

    #[test]
    fn truthiness() {
        assert!(!ParamValue::Text(String::new()).is_truthy());
        assert!(ParamValue::Text("x".into()).is_truthy());
        assert!(!ParamValue::Integer(0).is_truthy());
        assert!(!ParamValue::Float(0.0).is_truthy());
        assert!(!ParamValue::Boolean(false).is_truthy());
        assert!(ParamValue::Integer(-1).is_truthy());
    }

    #[test]
    fn date_serialises_as_iso_string() {
        let params = validate(
            &template(),
            &object(json!({ "customer_id": 1, "start_date": "2024-03-05" })),
        )
        .unwrap();
        let date = params.get("start_date").unwrap();
        assert_eq!(serde_json::to_value(date).unwrap(), json!("2024-03-05"));
        assert_eq!(date.canonical(), "2024-03-05");
    }
}
