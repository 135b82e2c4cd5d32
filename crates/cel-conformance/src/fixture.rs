//! Serde model of the conformance fixture format.
//!
//! Each test case pairs an expression with either an expected value or an
//! expected evaluation error:
//!
//! ```json
//! {
//!   "name": "self_eval_int_zero",
//!   "expr": "0",
//!   "value": { "int64Value": "0" }
//! }
//! ```
//!
//! Values are a tagged union mirroring the runtime value model, with 64-bit
//! integers carried as decimal strings and bytes as base64.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use cel_eval::{MapKey, Value};

/// A single conformance test case.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub name: String,
    pub expr: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub bindings: HashMap<String, Binding>,
    /// Present on cases that only make sense without the check phase; this
    /// implementation always evaluates unchecked, so the flag is accepted
    /// and ignored.
    #[serde(default)]
    pub disable_check: bool,
    #[serde(default)]
    pub value: Option<FixtureValue>,
    #[serde(default)]
    pub eval_error: Option<ErrorSet>,
}

/// A variable binding: `{"x": {"value": {"int64Value": "1"}}}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Binding {
    pub value: FixtureValue,
}

/// Expected evaluation errors. Matching is by presence, not message text:
/// any evaluation error satisfies a non-empty error set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorSet {
    pub errors: Vec<ErrorInfo>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorInfo {
    pub message: String,
}

/// JSON encoding of a runtime value.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum FixtureValue {
    #[serde(rename = "nullValue")]
    Null(serde_json::Value),
    #[serde(rename = "boolValue")]
    Bool(bool),
    #[serde(rename = "int64Value")]
    Int64(Integer64),
    #[serde(rename = "uint64Value")]
    Uint64(Unsigned64),
    #[serde(rename = "doubleValue")]
    Double(f64),
    #[serde(rename = "stringValue")]
    String(String),
    /// Base64-encoded bytes.
    #[serde(rename = "bytesValue")]
    Bytes(String),
    #[serde(rename = "listValue")]
    List(ListValue),
    #[serde(rename = "mapValue")]
    Map(MapValue),
    #[serde(rename = "typeValue")]
    Type(String),
    #[serde(rename = "enumValue")]
    Enum(EnumEntry),
}

/// int64 carried as a decimal string, tolerating plain JSON numbers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Integer64 {
    Text(String),
    Number(i64),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Unsigned64 {
    Text(String),
    Number(u64),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListValue {
    #[serde(default)]
    pub values: Vec<FixtureValue>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MapValue {
    #[serde(default)]
    pub entries: Vec<MapEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MapEntry {
    pub key: FixtureValue,
    pub value: FixtureValue,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnumEntry {
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: i32,
}

/// Errors arising while loading or translating fixture data.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("malformed fixture JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid fixture value: {0}")]
    InvalidValue(String),
    #[error("binding '{0}' is not expressible as a runtime value")]
    InvalidBinding(String),
}

/// Parse a JSON array of test cases.
pub fn load_cases(json: &str) -> Result<Vec<TestCase>, FixtureError> {
    Ok(serde_json::from_str(json)?)
}

/// Translate a fixture value into a runtime value.
pub fn to_runtime(value: &FixtureValue) -> Result<Value, FixtureError> {
    match value {
        FixtureValue::Null(_) => Ok(Value::Null),
        FixtureValue::Bool(b) => Ok(Value::Bool(*b)),
        FixtureValue::Int64(i) => match i {
            Integer64::Number(n) => Ok(Value::Int(*n)),
            Integer64::Text(s) => s
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| FixtureError::InvalidValue(format!("bad int64 '{}'", s))),
        },
        FixtureValue::Uint64(u) => match u {
            Unsigned64::Number(n) => Ok(Value::UInt(*n)),
            Unsigned64::Text(s) => s
                .parse::<u64>()
                .map(Value::UInt)
                .map_err(|_| FixtureError::InvalidValue(format!("bad uint64 '{}'", s))),
        },
        FixtureValue::Double(d) => Ok(Value::Double(*d)),
        FixtureValue::String(s) => Ok(Value::from(s.as_str())),
        FixtureValue::Bytes(encoded) => BASE64
            .decode(encoded.as_bytes())
            .map(Value::from)
            .map_err(|_| FixtureError::InvalidValue(format!("bad base64 '{}'", encoded))),
        FixtureValue::List(list) => {
            let mut out = Vec::with_capacity(list.values.len());
            for v in &list.values {
                out.push(to_runtime(v)?);
            }
            Ok(Value::from(out))
        }
        FixtureValue::Map(map) => {
            let mut entries = Vec::with_capacity(map.entries.len());
            for entry in &map.entries {
                let key = to_runtime(&entry.key)?;
                let key = MapKey::for_insert(&key)
                    .map_err(|e| FixtureError::InvalidValue(e.to_string()))?;
                entries.push((key, to_runtime(&entry.value)?));
            }
            Ok(Value::map(entries))
        }
        FixtureValue::Type(name) => Ok(Value::Type(cel_eval::TypeValue::new(name.as_str()))),
        FixtureValue::Enum(e) => Ok(Value::Enum(cel_eval::EnumValue::new(
            e.type_name.as_str(),
            e.value,
        ))),
    }
}

/// Translate a runtime value into the fixture encoding. Returns `None` for
/// kinds the fixture format does not model (messages, optionals, errors).
pub fn from_runtime(value: &Value) -> Option<FixtureValue> {
    match value {
        Value::Null => Some(FixtureValue::Null(serde_json::Value::Null)),
        Value::Bool(b) => Some(FixtureValue::Bool(*b)),
        Value::Int(i) => Some(FixtureValue::Int64(Integer64::Text(i.to_string()))),
        Value::UInt(u) => Some(FixtureValue::Uint64(Unsigned64::Text(u.to_string()))),
        Value::Double(d) => Some(FixtureValue::Double(*d)),
        Value::String(s) => Some(FixtureValue::String(s.to_string())),
        Value::Bytes(b) => Some(FixtureValue::Bytes(BASE64.encode(b))),
        Value::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items.iter() {
                values.push(from_runtime(item)?);
            }
            Some(FixtureValue::List(ListValue { values }))
        }
        Value::Map(m) => {
            let mut entries = Vec::with_capacity(m.len());
            for (k, v) in m.iter() {
                entries.push(MapEntry {
                    key: from_runtime(&k.to_value())?,
                    value: from_runtime(v)?,
                });
            }
            Some(FixtureValue::Map(MapValue { entries }))
        }
        Value::Type(t) => Some(FixtureValue::Type(t.name.to_string())),
        Value::Enum(e) => Some(FixtureValue::Enum(EnumEntry {
            type_name: e.type_name.to_string(),
            value: e.value,
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_case() {
        let cases = load_cases(
            r#"[{"name": "add", "expr": "1 + 1", "value": {"int64Value": "2"}}]"#,
        )
        .unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].expr, "1 + 1");
        assert_eq!(
            to_runtime(cases[0].value.as_ref().unwrap()).unwrap(),
            Value::Int(2)
        );
    }

    #[test]
    fn parse_error_case() {
        let cases = load_cases(
            r#"[{"name": "div", "expr": "1 / 0", "evalError": {"errors": [{"message": "divide by zero"}]}}]"#,
        )
        .unwrap();
        assert!(cases[0].eval_error.is_some());
    }

    #[test]
    fn parse_bindings() {
        let cases = load_cases(
            r#"[{"name": "var", "expr": "x", "bindings": {"x": {"value": {"uint64Value": "9"}}}, "value": {"uint64Value": "9"}}]"#,
        )
        .unwrap();
        let binding = to_runtime(&cases[0].bindings["x"].value).unwrap();
        assert_eq!(binding, Value::UInt(9));
    }

    #[test]
    fn value_roundtrip() {
        let original = Value::map([
            (MapKey::String("xs".into()), Value::from(vec![Value::Int(1), Value::Double(2.5)])),
            (MapKey::String("b".into()), Value::bytes(b"\x00\xff".to_vec())),
        ]);
        let fixture = from_runtime(&original).unwrap();
        let json = serde_json::to_string(&fixture).unwrap();
        let parsed: FixtureValue = serde_json::from_str(&json).unwrap();
        assert_eq!(to_runtime(&parsed).unwrap(), original);
    }

    #[test]
    fn bytes_encode_as_base64() {
        let fixture = from_runtime(&Value::bytes(b"Hello World!".to_vec())).unwrap();
        match &fixture {
            FixtureValue::Bytes(encoded) => assert_eq!(encoded, "SGVsbG8gV29ybGQh"),
            other => panic!("expected bytes encoding, got {:?}", other),
        }
        assert_eq!(
            to_runtime(&fixture).unwrap(),
            Value::bytes(b"Hello World!".to_vec())
        );
    }

    #[test]
    fn unsupported_kinds_do_not_encode() {
        assert!(from_runtime(&Value::optional_none()).is_none());
    }
}
