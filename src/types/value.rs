//! Values produced by solutions and expected by test cases.
//!
//! Solutions return arbitrary JavaScript values, so the model is wider than JSON:
//! `undefined`, non-finite numbers, negative zero and BigInt survive the trip out of
//! the sandbox. Functions, symbols and cut-off structures arrive as [`Value::Opaque`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A structured value crossing the sandbox boundary.
///
/// The serialized form is the tagged encoding the harness emits:
/// `{"type": "number", "value": 3}`, `{"type": "undefined"}`, ...
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// JavaScript `undefined`
    Undefined,
    /// `null`
    Null,
    /// A boolean
    Bool(bool),
    /// An IEEE-754 double, including `NaN`, infinities and `-0`
    Number(Number),
    /// A string
    String(String),
    /// A BigInt, kept as its decimal text
    Bigint(String),
    /// An ordered sequence
    Array(Vec<Value>),
    /// A keyed mapping (own enumerable string keys)
    Object(BTreeMap<String, Value>),
    /// Anything without structural content (functions, symbols, cycle and depth markers)
    Opaque(String),
}

impl Value {
    /// Short name of the value's kind, used in diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Bigint(_) => "bigint",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Opaque(_) => "opaque",
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(Number(n.as_f64().unwrap_or(f64::NAN))),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::Array(items.iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::from(&value)
    }
}

impl fmt::Display for Value {
    /// JSON text for JSON-shaped values, JavaScript spelling for the rest.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(&serde_json::to_string(s).map_err(|_| fmt::Error)?),
            Self::Bigint(digits) => write!(f, "{digits}n"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(map) => {
                f.write_str("{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    let key = serde_json::to_string(key).map_err(|_| fmt::Error)?;
                    write!(f, "{key}:{item}")?;
                }
                f.write_str("}")
            }
            Self::Opaque(description) => f.write_str(description),
        }
    }
}

/// A JavaScript number.
///
/// Finite values serialize as JSON numbers; `NaN`, `Infinity`, `-Infinity` and `-0`
/// serialize as strings because JSON cannot carry them.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(try_from = "NumberRepr", into = "NumberRepr")]
pub struct Number(pub f64);

impl Number {
    /// The raw double.
    #[must_use]
    pub const fn get(self) -> f64 {
        self.0
    }

    /// "Same value" equality: `NaN` equals `NaN`, `+0` differs from `-0`.
    #[must_use]
    pub fn same_value(self, other: Self) -> bool {
        if self.0.is_nan() && other.0.is_nan() {
            return true;
        }
        self.0.to_bits() == other.0.to_bits()
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0;
        if n.is_nan() {
            f.write_str("NaN")
        } else if n.is_infinite() {
            f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
        } else if n == 0.0 && n.is_sign_negative() {
            f.write_str("-0")
        } else if n.fract() == 0.0 && n.abs() < 1e21 {
            write!(f, "{n:.0}")
        } else {
            write!(f, "{n}")
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Finite(f64),
    Special(String),
}

impl TryFrom<NumberRepr> for Number {
    type Error = String;

    fn try_from(repr: NumberRepr) -> Result<Self, Self::Error> {
        match repr {
            NumberRepr::Finite(n) => Ok(Self(n)),
            NumberRepr::Special(text) => match text.as_str() {
                "NaN" => Ok(Self(f64::NAN)),
                "Infinity" => Ok(Self(f64::INFINITY)),
                "-Infinity" => Ok(Self(f64::NEG_INFINITY)),
                "-0" => Ok(Self(-0.0)),
                other => Err(format!("unknown number encoding: {other}")),
            },
        }
    }
}

impl From<Number> for NumberRepr {
    fn from(number: Number) -> Self {
        let n = number.0;
        if n.is_finite() && !(n == 0.0 && n.is_sign_negative()) {
            Self::Finite(n)
        } else {
            Self::Special(number.to_string())
        }
    }
}

/// Parse JSON without serde_json's nesting limit.
///
/// Tagged values double the nesting depth of what they encode, so moderately deep
/// solution outputs would otherwise trip the default limit of 128.
///
/// # Errors
/// Returns the underlying parse error.
pub fn from_json_str<T>(text: &str) -> serde_json::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut deserializer = serde_json::Deserializer::from_str(text);
    deserializer.disable_recursion_limit();
    let value = T::deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(value)
}
