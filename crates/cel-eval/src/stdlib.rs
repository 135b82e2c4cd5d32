//! CEL standard library: type conversions, `size`, string predicates, and
//! timestamp/duration accessors, registered as dispatchable functions.

use std::sync::Arc;

use crate::error::EvalError;
use crate::functions::{Function, FunctionRegistry, Overload};
use crate::numeric;
use crate::time::{self, TimeComponent};
use crate::value::{Duration, Kind, Timestamp, TypeValue, Value};

/// Build the standard function registry.
pub fn standard_functions() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();

    registry.register(
        Function::new("int").with_overload(Overload::function("int_dyn", vec![Kind::Dyn], to_int)),
    );
    registry.register(
        Function::new("uint")
            .with_overload(Overload::function("uint_dyn", vec![Kind::Dyn], to_uint)),
    );
    registry.register(
        Function::new("double")
            .with_overload(Overload::function("double_dyn", vec![Kind::Dyn], to_double)),
    );
    registry.register(
        Function::new("string")
            .with_overload(Overload::function("string_dyn", vec![Kind::Dyn], to_string)),
    );
    registry.register(
        Function::new("bytes")
            .with_overload(Overload::function("bytes_dyn", vec![Kind::Dyn], to_bytes)),
    );
    registry.register(
        Function::new("bool")
            .with_overload(Overload::function("bool_dyn", vec![Kind::Dyn], to_bool)),
    );
    registry.register(Function::new("timestamp").with_overload(Overload::function(
        "timestamp_dyn",
        vec![Kind::Dyn],
        to_timestamp,
    )));
    registry.register(Function::new("duration").with_overload(Overload::function(
        "duration_dyn",
        vec![Kind::Dyn],
        to_duration,
    )));
    registry.register(Function::new("dyn").with_overload(Overload::function(
        "dyn_identity",
        vec![Kind::Dyn],
        |args| args[0].clone(),
    )));
    registry.register(Function::new("type").with_overload(Overload::function(
        "type_dyn",
        vec![Kind::Dyn],
        |args| Value::Type(TypeValue::new(args[0].type_name())),
    )));

    registry.register(
        Function::new("size")
            .with_overload(Overload::function("size_dyn", vec![Kind::Dyn], size_impl))
            .with_overload(Overload::method("dyn_size", vec![Kind::Dyn], size_impl)),
    );

    registry.register(Function::new("contains").with_overload(Overload::method(
        "string_contains_string",
        vec![Kind::String, Kind::String],
        |args| match (&args[0], &args[1]) {
            (Value::String(s), Value::String(sub)) => Value::Bool(s.contains(sub.as_ref())),
            _ => Value::error(EvalError::no_matching_overload("contains")),
        },
    )));
    registry.register(Function::new("startsWith").with_overload(Overload::method(
        "string_starts_with_string",
        vec![Kind::String, Kind::String],
        |args| match (&args[0], &args[1]) {
            (Value::String(s), Value::String(p)) => Value::Bool(s.starts_with(p.as_ref())),
            _ => Value::error(EvalError::no_matching_overload("startsWith")),
        },
    )));
    registry.register(Function::new("endsWith").with_overload(Overload::method(
        "string_ends_with_string",
        vec![Kind::String, Kind::String],
        |args| match (&args[0], &args[1]) {
            (Value::String(s), Value::String(p)) => Value::Bool(s.ends_with(p.as_ref())),
            _ => Value::error(EvalError::no_matching_overload("endsWith")),
        },
    )));
    registry.register(
        Function::new("matches")
            .with_overload(Overload::method(
                "string_matches_string",
                vec![Kind::String, Kind::String],
                matches_impl,
            ))
            .with_overload(Overload::function(
                "matches_string_string",
                vec![Kind::String, Kind::String],
                matches_impl,
            )),
    );

    register_ts_accessor(&mut registry, "getFullYear", TimeComponent::FullYear, None);
    register_ts_accessor(&mut registry, "getMonth", TimeComponent::Month, None);
    register_ts_accessor(&mut registry, "getDate", TimeComponent::Date, None);
    register_ts_accessor(&mut registry, "getDayOfMonth", TimeComponent::DayOfMonth, None);
    register_ts_accessor(&mut registry, "getDayOfWeek", TimeComponent::DayOfWeek, None);
    register_ts_accessor(&mut registry, "getDayOfYear", TimeComponent::DayOfYear, None);
    register_ts_accessor(
        &mut registry,
        "getHours",
        TimeComponent::Hours,
        Some(|d: &Duration| d.seconds / 3600),
    );
    register_ts_accessor(
        &mut registry,
        "getMinutes",
        TimeComponent::Minutes,
        Some(|d: &Duration| d.seconds / 60),
    );
    register_ts_accessor(
        &mut registry,
        "getSeconds",
        TimeComponent::Seconds,
        Some(|d: &Duration| d.seconds),
    );
    register_ts_accessor(
        &mut registry,
        "getMilliseconds",
        TimeComponent::Milliseconds,
        Some(|d: &Duration| (d.to_nanos() / 1_000_000) as i64),
    );

    registry
}

/// Register a timestamp component accessor, with a UTC form, a time-zone
/// form, and (for the clock components) a total-value duration form.
fn register_ts_accessor(
    registry: &mut FunctionRegistry,
    name: &str,
    component: TimeComponent,
    duration_impl: Option<fn(&Duration) -> i64>,
) {
    let mut function = Function::new(name);

    function = function.with_overload(Overload::method(
        format!("timestamp_{}", name),
        vec![Kind::Timestamp],
        move |args| match &args[0] {
            Value::Timestamp(ts) => component_value(ts, None, component),
            _ => Value::error(EvalError::no_matching_overload("timestamp accessor")),
        },
    ));
    function = function.with_overload(Overload::method(
        format!("timestamp_{}_with_tz", name),
        vec![Kind::Timestamp, Kind::String],
        move |args| match (&args[0], &args[1]) {
            (Value::Timestamp(ts), Value::String(tz)) => component_value(ts, Some(tz), component),
            _ => Value::error(EvalError::no_matching_overload("timestamp accessor")),
        },
    ));

    if let Some(f) = duration_impl {
        function = function.with_overload(Overload::method(
            format!("duration_{}", name),
            vec![Kind::Duration],
            move |args| match &args[0] {
                Value::Duration(d) => Value::Int(f(d)),
                _ => Value::error(EvalError::no_matching_overload("duration accessor")),
            },
        ));
    }

    registry.register(function);
}

fn component_value(ts: &Timestamp, tz: Option<&str>, component: TimeComponent) -> Value {
    match time::timestamp_component(ts, tz, component) {
        Ok(v) => Value::Int(v),
        Err(e) => Value::error(e),
    }
}

// ==================== Conversions ====================

fn to_int(args: &[Value]) -> Value {
    match &args[0] {
        Value::Int(i) => Value::Int(*i),
        Value::UInt(u) => numeric::uint_to_int(*u)
            .map(Value::Int)
            .unwrap_or_else(|| Value::error(EvalError::range("uint out of int range"))),
        Value::Double(d) => numeric::double_to_int(*d)
            .map(Value::Int)
            .unwrap_or_else(|| Value::error(EvalError::range("double out of int range"))),
        Value::String(s) => s
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| Value::error(EvalError::invalid_conversion("string", "int"))),
        Value::Timestamp(ts) => Value::Int(ts.seconds),
        Value::Enum(e) => Value::Int(e.value as i64),
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "int")),
    }
}

fn to_uint(args: &[Value]) -> Value {
    match &args[0] {
        Value::UInt(u) => Value::UInt(*u),
        Value::Int(i) => numeric::int_to_uint(*i)
            .map(Value::UInt)
            .unwrap_or_else(|| Value::error(EvalError::range("int out of uint range"))),
        Value::Double(d) => numeric::double_to_uint(*d)
            .map(Value::UInt)
            .unwrap_or_else(|| Value::error(EvalError::range("double out of uint range"))),
        Value::String(s) => s
            .parse::<u64>()
            .map(Value::UInt)
            .unwrap_or_else(|_| Value::error(EvalError::invalid_conversion("string", "uint"))),
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "uint")),
    }
}

fn to_double(args: &[Value]) -> Value {
    match &args[0] {
        Value::Double(d) => Value::Double(*d),
        Value::Int(i) => Value::Double(*i as f64),
        Value::UInt(u) => Value::Double(*u as f64),
        Value::String(s) => s
            .parse::<f64>()
            .map(Value::Double)
            .unwrap_or_else(|_| Value::error(EvalError::invalid_conversion("string", "double"))),
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "double")),
    }
}

fn to_string(args: &[Value]) -> Value {
    match &args[0] {
        Value::String(s) => Value::String(s.clone()),
        Value::Int(i) => Value::string(i.to_string()),
        Value::UInt(u) => Value::string(u.to_string()),
        Value::Double(d) => Value::string(format_double(*d)),
        Value::Bool(b) => Value::string(b.to_string()),
        Value::Bytes(b) => match std::str::from_utf8(b) {
            Ok(s) => Value::string(s),
            Err(_) => Value::error(EvalError::invalid_utf8()),
        },
        Value::Timestamp(ts) => Value::string(time::format_timestamp(ts)),
        Value::Duration(d) => Value::string(time::format_duration(d)),
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "string")),
    }
}

fn to_bytes(args: &[Value]) -> Value {
    match &args[0] {
        Value::Bytes(b) => Value::Bytes(b.clone()),
        Value::String(s) => Value::Bytes(Arc::from(s.as_bytes())),
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "bytes")),
    }
}

/// String-to-bool accepts only the exact literal set from the CEL spec;
/// no case folding beyond the listed forms.
const BOOL_TRUE_STRINGS: &[&str] = &["1", "t", "true", "TRUE", "True"];
const BOOL_FALSE_STRINGS: &[&str] = &["0", "f", "false", "FALSE", "False"];

fn to_bool(args: &[Value]) -> Value {
    match &args[0] {
        Value::Bool(b) => Value::Bool(*b),
        Value::String(s) => {
            if BOOL_TRUE_STRINGS.contains(&s.as_ref()) {
                Value::Bool(true)
            } else if BOOL_FALSE_STRINGS.contains(&s.as_ref()) {
                Value::Bool(false)
            } else {
                Value::error(EvalError::invalid_conversion("string", "bool"))
            }
        }
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "bool")),
    }
}

fn to_timestamp(args: &[Value]) -> Value {
    match &args[0] {
        Value::Timestamp(ts) => Value::Timestamp(*ts),
        Value::String(s) => match time::parse_timestamp(s) {
            Ok(ts) => Value::Timestamp(ts),
            Err(e) => Value::error(e),
        },
        Value::Int(i) => {
            let ts = Timestamp::from_seconds(*i);
            if ts.is_valid() {
                Value::Timestamp(ts)
            } else {
                Value::error(EvalError::range(
                    "timestamp out of range: must be between year 0001 and 9999",
                ))
            }
        }
        other => Value::error(EvalError::invalid_conversion(
            &other.type_name(),
            "timestamp",
        )),
    }
}

fn to_duration(args: &[Value]) -> Value {
    match &args[0] {
        Value::Duration(d) => Value::Duration(*d),
        Value::String(s) => match time::parse_duration(s) {
            Ok(d) => Value::Duration(d),
            Err(e) => Value::error(e),
        },
        Value::Int(i) => {
            let d = Duration::from_seconds(*i);
            if d.is_valid() {
                Value::Duration(d)
            } else {
                Value::error(EvalError::range(
                    "duration out of range: must be within 10000 years",
                ))
            }
        }
        other => Value::error(EvalError::invalid_conversion(
            &other.type_name(),
            "duration",
        )),
    }
}

/// Format a double per CEL string conversion: minimal digits, `NaN`,
/// `+Inf`/`-Inf`.
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else {
        format!("{}", d)
    }
}

// ==================== size / matches ====================

fn size_impl(args: &[Value]) -> Value {
    match &args[0] {
        Value::String(s) => Value::Int(s.chars().count() as i64),
        Value::Bytes(b) => Value::Int(b.len() as i64),
        Value::List(l) => Value::Int(l.len() as i64),
        Value::Map(m) => Value::Int(m.len() as i64),
        other => Value::error(EvalError::no_matching_overload(&format!(
            "size({})",
            other.type_name()
        ))),
    }
}

fn matches_impl(args: &[Value]) -> Value {
    match (&args[0], &args[1]) {
        (Value::String(s), Value::String(pattern)) => {
            match regex::Regex::new(pattern.as_ref()) {
                Ok(re) => Value::Bool(re.is_match(s.as_ref())),
                Err(e) => {
                    Value::error(EvalError::invalid_argument(format!("invalid regex: {}", e)))
                }
            }
        }
        _ => Value::error(EvalError::no_matching_overload("matches")),
    }
}
