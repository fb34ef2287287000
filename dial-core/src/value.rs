//! Typed setting values and configuration validation rules.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Type tag fixed at creation and enforced on every value update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Json,
    Array,
    Object,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "STRING",
            ValueType::Number => "NUMBER",
            ValueType::Boolean => "BOOLEAN",
            ValueType::Json => "JSON",
            ValueType::Array => "ARRAY",
            ValueType::Object => "OBJECT",
        }
    }

    /// Check that `value` has the runtime shape this tag demands.
    ///
    /// `JSON` accepts any document, including null.
    pub fn check(&self, value: &Value) -> Result<(), ValidationError> {
        let ok = match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Json => true,
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        };
        if ok {
            Ok(())
        } else {
            Err(ValidationError::TypeMismatch {
                expected: self.as_str().to_string(),
                actual: runtime_type(value).to_string(),
            })
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STRING" => Ok(ValueType::String),
            "NUMBER" => Ok(ValueType::Number),
            "BOOLEAN" => Ok(ValueType::Boolean),
            "JSON" => Ok(ValueType::Json),
            "ARRAY" => Ok(ValueType::Array),
            "OBJECT" => Ok(ValueType::Object),
            other => Err(ValidationError::invalid(
                "type",
                format!("unknown value type {other:?}"),
            )),
        }
    }
}

fn runtime_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Plain-text rendering used by length, pattern and allowed-value checks.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Constraints a Configuration value must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<Value>,
    #[serde(default)]
    pub required: bool,
}

impl ValidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = values;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Check `value` against every rule, returning the first violation.
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        if self.required && value.is_null() {
            return Err(ValidationError::required("value"));
        }

        let rendered = render(value);
        let length = rendered.chars().count();

        if let Some(min) = self.min_length {
            if length < min {
                return Err(ValidationError::constraint(
                    "min_length",
                    format!("value length {length} is less than minimum {min}"),
                ));
            }
        }
        if let Some(max) = self.max_length {
            if length > max {
                return Err(ValidationError::constraint(
                    "max_length",
                    format!("value length {length} is greater than maximum {max}"),
                ));
            }
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = self.min_value {
                if number < min {
                    return Err(ValidationError::constraint(
                        "min_value",
                        format!("value {number} is less than minimum {min}"),
                    ));
                }
            }
            if let Some(max) = self.max_value {
                if number > max {
                    return Err(ValidationError::constraint(
                        "max_value",
                        format!("value {number} is greater than maximum {max}"),
                    ));
                }
            }
        }

        if let Some(pattern) = &self.pattern {
            let re = Regex::new(pattern)
                .map_err(|e| ValidationError::invalid("pattern", e.to_string()))?;
            if !re.is_match(&rendered) {
                return Err(ValidationError::constraint(
                    "pattern",
                    format!("value does not match pattern {pattern}"),
                ));
            }
        }

        if !self.allowed_values.is_empty()
            && !self.allowed_values.iter().any(|a| render(a) == rendered)
        {
            return Err(ValidationError::constraint(
                "allowed_values",
                format!("value {rendered} is not in allowed values"),
            ));
        }

        Ok(())
    }
}
