//! Evaluation error types.
//!
//! Errors propagate as `Value::Error` through evaluation, behaving like a
//! bottom value that infects any operation consuming it except where
//! short-circuit evaluation never forces the operand.

use std::fmt;

/// An error raised during CEL evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    pub message: String,
    pub kind: EvalErrorKind,
}

/// The kind of evaluation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// Division by zero.
    DivisionByZero,
    /// Modulo by zero.
    ModuloByZero,
    /// Numeric result or conversion out of the target range, including
    /// integer overflow.
    RangeError,
    /// No overload of an operator or function matches the argument kinds.
    NoMatchingOverload,
    /// Unknown function name.
    UnknownFunction,
    /// Unbound variable, raised when the reference is actually evaluated.
    UndeclaredReference,
    /// List or string index out of range.
    IndexOutOfRange,
    /// Map key not present.
    NoSuchKey,
    /// Message or map field not present / not declared.
    NoSuchField,
    /// Bytes that are not valid UTF-8 converted to string.
    InvalidUtf8,
    /// Conversion with well-formed kinds but an invalid value (bad bool
    /// string, unparsable timestamp, ...).
    InvalidConversion,
    /// Invalid argument value to a function.
    InvalidArgument,
    /// Duplicate key in a map literal.
    RepeatedMapKey,
    /// Assigning a value (usually null) to a field kind that cannot hold it.
    UnsupportedFieldType,
    /// The evaluation step budget was exhausted.
    ResourceExhausted,
    /// Unexpected internal state.
    Internal,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn division_by_zero() -> Self {
        Self::new(EvalErrorKind::DivisionByZero, "divide by zero")
    }

    pub fn modulo_by_zero() -> Self {
        Self::new(EvalErrorKind::ModuloByZero, "modulus by zero")
    }

    pub fn overflow(op: &str) -> Self {
        Self::new(EvalErrorKind::RangeError, format!("{} overflow", op))
    }

    pub fn range(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::RangeError, message)
    }

    pub fn no_matching_overload(name: &str) -> Self {
        Self::new(
            EvalErrorKind::NoMatchingOverload,
            format!("no such overload: {}", name),
        )
    }

    pub fn unknown_function(name: &str) -> Self {
        Self::new(
            EvalErrorKind::UnknownFunction,
            format!("unknown function: {}", name),
        )
    }

    pub fn undeclared_reference(name: &str) -> Self {
        Self::new(
            EvalErrorKind::UndeclaredReference,
            format!("undeclared reference to '{}'", name),
        )
    }

    pub fn index_out_of_range(index: i64, len: usize) -> Self {
        Self::new(
            EvalErrorKind::IndexOutOfRange,
            format!("index {} out of range for size {}", index, len),
        )
    }

    pub fn no_such_key(key: &str) -> Self {
        Self::new(EvalErrorKind::NoSuchKey, format!("no such key: {}", key))
    }

    pub fn no_such_field(field: &str) -> Self {
        Self::new(
            EvalErrorKind::NoSuchField,
            format!("no such field: '{}'", field),
        )
    }

    pub fn invalid_utf8() -> Self {
        Self::new(
            EvalErrorKind::InvalidUtf8,
            "invalid UTF-8 in bytes, cannot convert to string",
        )
    }

    pub fn invalid_conversion(from: &str, to: &str) -> Self {
        Self::new(
            EvalErrorKind::InvalidConversion,
            format!("cannot convert {} to {}", from, to),
        )
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::InvalidArgument, message)
    }

    pub fn repeated_map_key(key: &str) -> Self {
        Self::new(
            EvalErrorKind::RepeatedMapKey,
            format!("repeated key in map literal: {}", key),
        )
    }

    pub fn unsupported_field_type(field: &str) -> Self {
        Self::new(
            EvalErrorKind::UnsupportedFieldType,
            format!("unsupported field type for '{}'", field),
        )
    }

    pub fn resource_exhausted(budget: u64) -> Self {
        Self::new(
            EvalErrorKind::ResourceExhausted,
            format!("evaluation budget of {} steps exhausted", budget),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Internal, message)
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EvalError {}

impl From<&str> for EvalError {
    fn from(s: &str) -> Self {
        Self::new(EvalErrorKind::Internal, s)
    }
}

impl From<String> for EvalError {
    fn from(s: String) -> Self {
        Self::new(EvalErrorKind::Internal, s)
    }
}
