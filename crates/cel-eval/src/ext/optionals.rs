//! Optionals extension: optional construction and access functions.
//!
//! The `optMap`/`optFlatMap` macros and the `.?`/`[?]` chaining sugar are
//! handled by the parser and evaluator; this module contributes the
//! callable surface.

use crate::error::EvalError;
use crate::functions::{Function, Overload};
use crate::value::{Kind, OptionalValue, Value};

fn is_zero_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(false) => true,
        Value::Int(0) => true,
        Value::UInt(0) => true,
        Value::Double(d) => *d == 0.0,
        Value::String(s) => s.is_empty(),
        Value::Bytes(b) => b.is_empty(),
        Value::List(l) => l.is_empty(),
        Value::Map(m) => m.is_empty(),
        Value::Message(m) => m.is_zero(),
        Value::Timestamp(ts) => ts.seconds == 0 && ts.nanos == 0,
        Value::Duration(d) => d.seconds == 0 && d.nanos == 0,
        _ => false,
    }
}

/// Functions contributed by the optionals extension.
pub fn extension() -> Vec<Function> {
    vec![
        Function::new("optional.of").with_overload(Overload::function(
            "optional_of",
            vec![Kind::Dyn],
            |args| Value::optional_some(args[0].clone()),
        )),
        Function::new("optional.none").with_overload(Overload::function(
            "optional_none",
            vec![],
            |_args| Value::optional_none(),
        )),
        Function::new("optional.ofNonZeroValue").with_overload(Overload::function(
            "optional_of_non_zero_value",
            vec![Kind::Dyn],
            |args| {
                if is_zero_value(&args[0]) {
                    Value::optional_none()
                } else {
                    Value::optional_some(args[0].clone())
                }
            },
        )),
        Function::new("hasValue").with_overload(Overload::method(
            "optional_has_value",
            vec![Kind::Optional],
            |args| match &args[0] {
                Value::Optional(opt) => Value::Bool(opt.is_present()),
                _ => Value::error(EvalError::no_matching_overload("hasValue")),
            },
        )),
        Function::new("value").with_overload(Overload::method(
            "optional_value",
            vec![Kind::Optional],
            |args| match &args[0] {
                Value::Optional(OptionalValue::Some(v)) => (**v).clone(),
                Value::Optional(OptionalValue::None) => {
                    Value::error(EvalError::invalid_argument("optional.none() dereference"))
                }
                _ => Value::error(EvalError::no_matching_overload("value")),
            },
        )),
        Function::new("or").with_overload(Overload::method(
            "optional_or_optional",
            vec![Kind::Optional, Kind::Optional],
            |args| match &args[0] {
                Value::Optional(OptionalValue::Some(_)) => args[0].clone(),
                Value::Optional(OptionalValue::None) => args[1].clone(),
                _ => Value::error(EvalError::no_matching_overload("or")),
            },
        )),
        Function::new("orValue").with_overload(Overload::method(
            "optional_or_value",
            vec![Kind::Optional, Kind::Dyn],
            |args| match &args[0] {
                Value::Optional(OptionalValue::Some(v)) => (**v).clone(),
                Value::Optional(OptionalValue::None) => args[1].clone(),
                _ => Value::error(EvalError::no_matching_overload("orValue")),
            },
        )),
    ]
}
