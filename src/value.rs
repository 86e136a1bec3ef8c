//! Universal value representation and UI-boundary coercion.
//!
//! Backends decode native wire values into [`Value`] exactly once, at the
//! row boundary; the UI hands values back as text and [`parse_value`] turns
//! them into what the backend expects.

use serde::{Deserialize, Serialize};

use crate::types::{ColDef, ColType};

/// Canonical textual representation of an absent value at the UI boundary.
pub const NULL_PATTERN: &str = "<NULL>";

/// A single cell value, tagged with its native shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Converts user-typed text into the value a backend expects for `def`.
///
/// The `<NULL>` sentinel maps to [`Value::Null`] only for nullable or
/// primary-key columns. Malformed numeric input coerces to zero; callers
/// pre-validate when they need stricter behavior.
pub fn parse_value(def: &ColDef, raw: &str) -> Value {
    if raw == NULL_PATTERN && (def.nullable || def.pk) {
        return Value::Null;
    }

    match def.col_type {
        ColType::Boolean => Value::Bool(raw.eq_ignore_ascii_case("true") || raw == "1"),
        ColType::Float => Value::Float(raw.parse().unwrap_or_default()),
        ColType::Int => Value::Int(raw.parse().unwrap_or_default()),
        _ => Value::Text(raw.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(col_type: ColType, nullable: bool) -> ColDef {
        ColDef {
            name: "c".into(),
            nullable,
            col_type,
            ..ColDef::default()
        }
    }

    #[test]
    fn null_sentinel_maps_to_null_only_when_nullable() {
        assert_eq!(
            parse_value(&col(ColType::String, true), NULL_PATTERN),
            Value::Null
        );
        assert_eq!(
            parse_value(&col(ColType::String, false), NULL_PATTERN),
            Value::Text(NULL_PATTERN.into())
        );
    }

    #[test]
    fn null_sentinel_maps_to_null_for_primary_keys() {
        let mut def = col(ColType::Int, false);
        def.pk = true;
        assert_eq!(parse_value(&def, NULL_PATTERN), Value::Null);
    }

    #[test]
    fn booleans_accept_true_and_one() {
        let def = col(ColType::Boolean, false);
        assert_eq!(parse_value(&def, "true"), Value::Bool(true));
        assert_eq!(parse_value(&def, "1"), Value::Bool(true));
        assert_eq!(parse_value(&def, "yes"), Value::Bool(false));
    }

    #[test]
    fn malformed_numbers_coerce_to_zero() {
        assert_eq!(parse_value(&col(ColType::Int, false), "12x"), Value::Int(0));
        assert_eq!(
            parse_value(&col(ColType::Float, false), "abc"),
            Value::Float(0.0)
        );
    }

    #[test]
    fn bytes_serialize_as_base64() {
        let json = serde_json::to_string(&Value::Bytes(vec![1, 2, 3])).expect("should serialize");
        assert_eq!(json, r#""AQID""#);
    }
}
