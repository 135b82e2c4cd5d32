//! Encoders extension: base64 encoding and decoding.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

use crate::error::EvalError;
use crate::functions::{Function, Overload};
use crate::value::{Kind, Value};

/// Functions contributed by the encoders extension.
pub fn extension() -> Vec<Function> {
    vec![
        Function::new("base64.encode").with_overload(Overload::function(
            "base64_encode_bytes",
            vec![Kind::Bytes],
            |args| match &args[0] {
                Value::Bytes(b) => Value::string(STANDARD.encode(b)),
                _ => Value::error(EvalError::no_matching_overload("base64.encode")),
            },
        )),
        Function::new("base64.decode").with_overload(Overload::function(
            "base64_decode_string",
            vec![Kind::String],
            |args| match &args[0] {
                Value::String(s) => {
                    // Accept both padded and unpadded input.
                    match STANDARD
                        .decode(s.as_bytes())
                        .or_else(|_| STANDARD_NO_PAD.decode(s.as_bytes()))
                    {
                        Ok(bytes) => Value::from(bytes),
                        Err(e) => Value::error(EvalError::invalid_argument(format!(
                            "invalid base64: {}",
                            e
                        ))),
                    }
                }
                _ => Value::error(EvalError::no_matching_overload("base64.decode")),
            },
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;

    fn registry() -> FunctionRegistry {
        let mut r = FunctionRegistry::new();
        for f in extension() {
            r.register(f);
        }
        r
    }

    #[test]
    fn encode_decode_roundtrip() {
        let r = registry();
        let encoded = r.dispatch(
            "base64.encode",
            &[Value::bytes(b"Hello World!".to_vec())],
            false,
        );
        assert_eq!(encoded, Value::from("SGVsbG8gV29ybGQh"));

        let decoded = r.dispatch("base64.decode", &[encoded], false);
        assert_eq!(decoded, Value::bytes(b"Hello World!".to_vec()));
    }

    #[test]
    fn decode_accepts_unpadded() {
        let r = registry();
        let decoded = r.dispatch("base64.decode", &[Value::from("aGVsbG8")], false);
        assert_eq!(decoded, Value::bytes(b"hello".to_vec()));
    }

    #[test]
    fn decode_rejects_garbage() {
        let r = registry();
        assert!(r
            .dispatch("base64.decode", &[Value::from("!@#$")], false)
            .is_error());
    }
}
