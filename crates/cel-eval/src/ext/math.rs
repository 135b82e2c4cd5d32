//! Math extension: min/max helpers, float classification, and bit
//! manipulation, under the `math` namespace.

use std::cmp::Ordering;

use crate::error::EvalError;
use crate::functions::{Function, Overload};
use crate::value::{Kind, Value};

/// Functions contributed by the math extension.
pub fn extension() -> Vec<Function> {
    vec![
        Function::new("math.greatest").with_overload(
            Overload::function("math_greatest", vec![Kind::Dyn], |args| {
                pick(args, Ordering::Greater)
            })
            .with_vararg(),
        ),
        Function::new("math.least").with_overload(
            Overload::function("math_least", vec![Kind::Dyn], |args| {
                pick(args, Ordering::Less)
            })
            .with_vararg(),
        ),
        Function::new("math.abs").with_overload(Overload::function(
            "math_abs",
            vec![Kind::Dyn],
            abs,
        )),
        Function::new("math.sign").with_overload(Overload::function(
            "math_sign",
            vec![Kind::Dyn],
            sign,
        )),
        Function::new("math.ceil").with_overload(Overload::function(
            "math_ceil",
            vec![Kind::Double],
            |args| double_op(args, f64::ceil),
        )),
        Function::new("math.floor").with_overload(Overload::function(
            "math_floor",
            vec![Kind::Double],
            |args| double_op(args, f64::floor),
        )),
        Function::new("math.round").with_overload(Overload::function(
            "math_round",
            vec![Kind::Double],
            |args| double_op(args, f64::round),
        )),
        Function::new("math.trunc").with_overload(Overload::function(
            "math_trunc",
            vec![Kind::Double],
            |args| double_op(args, f64::trunc),
        )),
        Function::new("math.isNaN").with_overload(Overload::function(
            "math_is_nan",
            vec![Kind::Double],
            |args| double_pred(args, f64::is_nan),
        )),
        Function::new("math.isInf").with_overload(Overload::function(
            "math_is_inf",
            vec![Kind::Double],
            |args| double_pred(args, f64::is_infinite),
        )),
        Function::new("math.isFinite").with_overload(Overload::function(
            "math_is_finite",
            vec![Kind::Double],
            |args| double_pred(args, f64::is_finite),
        )),
        Function::new("math.bitAnd").with_overload(Overload::function(
            "math_bit_and",
            vec![Kind::Dyn, Kind::Dyn],
            |args| bit_op(args, "math.bitAnd", |a, b| a & b, |a, b| a & b),
        )),
        Function::new("math.bitOr").with_overload(Overload::function(
            "math_bit_or",
            vec![Kind::Dyn, Kind::Dyn],
            |args| bit_op(args, "math.bitOr", |a, b| a | b, |a, b| a | b),
        )),
        Function::new("math.bitXor").with_overload(Overload::function(
            "math_bit_xor",
            vec![Kind::Dyn, Kind::Dyn],
            |args| bit_op(args, "math.bitXor", |a, b| a ^ b, |a, b| a ^ b),
        )),
        Function::new("math.bitNot").with_overload(Overload::function(
            "math_bit_not",
            vec![Kind::Dyn],
            |args| match &args[0] {
                Value::Int(i) => Value::Int(!i),
                Value::UInt(u) => Value::UInt(!u),
                other => Value::error(EvalError::no_matching_overload(&format!(
                    "math.bitNot({})",
                    other.type_name()
                ))),
            },
        )),
        Function::new("math.bitShiftLeft").with_overload(Overload::function(
            "math_bit_shift_left",
            vec![Kind::Dyn, Kind::Int],
            |args| shift(args, true),
        )),
        Function::new("math.bitShiftRight").with_overload(Overload::function(
            "math_bit_shift_right",
            vec![Kind::Dyn, Kind::Int],
            |args| shift(args, false),
        )),
    ]
}

/// `math.greatest`/`math.least`: one list argument or two-or-more numeric
/// arguments; comparison is heterogeneous-numeric.
fn pick(args: &[Value], want: Ordering) -> Value {
    let items: &[Value] = match args {
        [Value::List(list)] => list,
        _ => args,
    };

    if items.is_empty() {
        return Value::error(EvalError::invalid_argument(
            "math.greatest/least requires at least one argument",
        ));
    }

    let mut best = match &items[0] {
        v if v.is_numeric() => v.clone(),
        other => {
            return Value::error(EvalError::no_matching_overload(&format!(
                "math aggregate over '{}'",
                other.type_name()
            )))
        }
    };

    for item in &items[1..] {
        if !item.is_numeric() {
            return Value::error(EvalError::no_matching_overload(&format!(
                "math aggregate over '{}'",
                item.type_name()
            )));
        }
        match item.compare(&best) {
            Some(ord) if ord == want => best = item.clone(),
            Some(_) => {}
            // NaN poisons the aggregate.
            None => return Value::Double(f64::NAN),
        }
    }

    best
}

fn abs(args: &[Value]) -> Value {
    match &args[0] {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .unwrap_or_else(|| Value::error(EvalError::overflow("math.abs"))),
        Value::UInt(u) => Value::UInt(*u),
        Value::Double(d) => Value::Double(d.abs()),
        other => Value::error(EvalError::no_matching_overload(&format!(
            "math.abs({})",
            other.type_name()
        ))),
    }
}

fn sign(args: &[Value]) -> Value {
    match &args[0] {
        Value::Int(i) => Value::Int(i.signum()),
        Value::UInt(u) => Value::UInt(u64::from(*u != 0)),
        Value::Double(d) => {
            if d.is_nan() {
                Value::Double(f64::NAN)
            } else if *d == 0.0 {
                Value::Double(0.0)
            } else {
                Value::Double(d.signum())
            }
        }
        other => Value::error(EvalError::no_matching_overload(&format!(
            "math.sign({})",
            other.type_name()
        ))),
    }
}

fn double_op(args: &[Value], f: fn(f64) -> f64) -> Value {
    match &args[0] {
        Value::Double(d) => Value::Double(f(*d)),
        other => Value::error(EvalError::no_matching_overload(&format!(
            "math rounding over '{}'",
            other.type_name()
        ))),
    }
}

fn double_pred(args: &[Value], f: fn(f64) -> bool) -> Value {
    match &args[0] {
        Value::Double(d) => Value::Bool(f(*d)),
        other => Value::error(EvalError::no_matching_overload(&format!(
            "math predicate over '{}'",
            other.type_name()
        ))),
    }
}

fn bit_op(
    args: &[Value],
    name: &str,
    int_op: fn(i64, i64) -> i64,
    uint_op: fn(u64, u64) -> u64,
) -> Value {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => Value::Int(int_op(*a, *b)),
        (Value::UInt(a), Value::UInt(b)) => Value::UInt(uint_op(*a, *b)),
        _ => Value::error(EvalError::no_matching_overload(name)),
    }
}

/// Shifts by 64 or more bits yield 0; negative shift counts are errors.
fn shift(args: &[Value], left: bool) -> Value {
    let by = match &args[1] {
        Value::Int(i) => *i,
        _ => return Value::error(EvalError::no_matching_overload("bit shift")),
    };
    if by < 0 {
        return Value::error(EvalError::invalid_argument(
            "negative bit shift count",
        ));
    }

    match &args[0] {
        Value::Int(v) => {
            if by >= 64 {
                Value::Int(0)
            } else if left {
                Value::Int(((*v as u64) << by) as i64)
            } else {
                Value::Int(((*v as u64) >> by) as i64)
            }
        }
        Value::UInt(v) => {
            if by >= 64 {
                Value::UInt(0)
            } else if left {
                Value::UInt(v << by)
            } else {
                Value::UInt(v >> by)
            }
        }
        other => Value::error(EvalError::no_matching_overload(&format!(
            "bit shift over '{}'",
            other.type_name()
        ))),
    }
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
    fn greatest_and_least() {
        let r = registry();
        assert_eq!(
            r.dispatch(
                "math.greatest",
                &[Value::Int(1), Value::Double(2.5), Value::UInt(2)],
                false
            ),
            Value::Double(2.5)
        );
        assert_eq!(
            r.dispatch(
                "math.least",
                &[Value::from(vec![Value::Int(3), Value::Int(-1), Value::Int(4)])],
                false
            ),
            Value::Int(-1)
        );
        assert!(r
            .dispatch("math.greatest", &[Value::from("x")], false)
            .is_error());
    }

    #[test]
    fn abs_overflow() {
        let r = registry();
        assert_eq!(r.dispatch("math.abs", &[Value::Int(-5)], false), Value::Int(5));
        assert!(r
            .dispatch("math.abs", &[Value::Int(i64::MIN)], false)
            .is_error());
    }

    #[test]
    fn float_classification() {
        let r = registry();
        assert_eq!(
            r.dispatch("math.isNaN", &[Value::Double(f64::NAN)], false),
            Value::Bool(true)
        );
        assert_eq!(
            r.dispatch("math.isInf", &[Value::Double(f64::INFINITY)], false),
            Value::Bool(true)
        );
        assert_eq!(
            r.dispatch("math.isFinite", &[Value::Double(1.0)], false),
            Value::Bool(true)
        );
    }

    #[test]
    fn bit_operations() {
        let r = registry();
        assert_eq!(
            r.dispatch("math.bitAnd", &[Value::Int(0b1100), Value::Int(0b1010)], false),
            Value::Int(0b1000)
        );
        assert_eq!(
            r.dispatch("math.bitShiftLeft", &[Value::Int(1), Value::Int(3)], false),
            Value::Int(8)
        );
        assert_eq!(
            r.dispatch("math.bitShiftLeft", &[Value::Int(1), Value::Int(64)], false),
            Value::Int(0)
        );
        assert!(r
            .dispatch("math.bitShiftLeft", &[Value::Int(1), Value::Int(-1)], false)
            .is_error());
        // Right shift on a negative int is logical, not arithmetic.
        assert_eq!(
            r.dispatch("math.bitShiftRight", &[Value::Int(-8), Value::Int(62)], false),
            Value::Int(3)
        );
    }
}
