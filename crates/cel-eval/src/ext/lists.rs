//! Lists extension: flatten, slice, distinct, reverse.

use crate::error::EvalError;
use crate::functions::{Function, Overload};
use crate::value::{Kind, Value};

/// Functions contributed by the lists extension.
pub fn extension() -> Vec<Function> {
    vec![
        Function::new("flatten")
            .with_overload(Overload::method(
                "list_flatten",
                vec![Kind::List],
                |args| flatten(&args[0], 1),
            ))
            .with_overload(Overload::method(
                "list_flatten_int",
                vec![Kind::List, Kind::Int],
                |args| match &args[1] {
                    Value::Int(depth) if *depth >= 0 => flatten(&args[0], *depth),
                    Value::Int(_) => {
                        Value::error(EvalError::invalid_argument("flatten depth must be >= 0"))
                    }
                    _ => Value::error(EvalError::no_matching_overload("flatten")),
                },
            )),
        Function::new("slice").with_overload(Overload::method(
            "list_slice",
            vec![Kind::List, Kind::Int, Kind::Int],
            slice,
        )),
        Function::new("distinct").with_overload(Overload::method(
            "list_distinct",
            vec![Kind::List],
            distinct,
        )),
        Function::new("reverse").with_overload(Overload::method(
            "list_reverse",
            vec![Kind::List],
            |args| match &args[0] {
                Value::List(list) => {
                    let mut out: Vec<Value> = list.to_vec();
                    out.reverse();
                    Value::from(out)
                }
                _ => Value::error(EvalError::no_matching_overload("reverse")),
            },
        )),
    ]
}

fn flatten(value: &Value, depth: i64) -> Value {
    let list = match value.as_list() {
        Some(l) => l,
        None => return Value::error(EvalError::no_matching_overload("flatten")),
    };

    let mut out = Vec::with_capacity(list.len());
    flatten_into(list, depth, &mut out);
    Value::from(out)
}

fn flatten_into(list: &[Value], depth: i64, out: &mut Vec<Value>) {
    for item in list {
        match item {
            Value::List(inner) if depth > 0 => flatten_into(inner, depth - 1, out),
            other => out.push(other.clone()),
        }
    }
}

fn slice(args: &[Value]) -> Value {
    let (list, start, end) = match (&args[0], &args[1], &args[2]) {
        (Value::List(l), Value::Int(s), Value::Int(e)) => (l, *s, *e),
        _ => return Value::error(EvalError::no_matching_overload("slice")),
    };

    if start < 0 || end < 0 {
        return Value::error(EvalError::invalid_argument(
            "slice indexes must be non-negative",
        ));
    }
    if start > end {
        return Value::error(EvalError::invalid_argument(
            "slice start must not exceed end",
        ));
    }
    if end as usize > list.len() {
        return Value::error(EvalError::index_out_of_range(end, list.len()));
    }

    Value::from(list[start as usize..end as usize].to_vec())
}

/// Deduplicate by CEL equality, keeping first occurrences in order.
fn distinct(args: &[Value]) -> Value {
    let list = match args[0].as_list() {
        Some(l) => l,
        None => return Value::error(EvalError::no_matching_overload("distinct")),
    };

    let mut out: Vec<Value> = Vec::with_capacity(list.len());
    for item in list {
        if !out.iter().any(|seen| seen.equals(item)) {
            out.push(item.clone());
        }
    }
    Value::from(out)
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

    fn ints(values: &[i64]) -> Value {
        Value::from(values.iter().map(|i| Value::Int(*i)).collect::<Vec<_>>())
    }

    #[test]
    fn flatten_one_level() {
        let r = registry();
        let nested = Value::from(vec![ints(&[1, 2]), ints(&[3]), Value::Int(4)]);
        assert_eq!(
            r.dispatch("flatten", &[nested], true),
            ints(&[1, 2, 3, 4])
        );
    }

    #[test]
    fn flatten_with_depth() {
        let r = registry();
        let nested = Value::from(vec![Value::from(vec![ints(&[1]), ints(&[2])])]);
        assert_eq!(
            r.dispatch("flatten", &[nested.clone(), Value::Int(2)], true),
            ints(&[1, 2])
        );
        // Depth 0 is the identity.
        assert_eq!(
            r.dispatch("flatten", &[nested.clone(), Value::Int(0)], true),
            nested
        );
    }

    #[test]
    fn slice_bounds() {
        let r = registry();
        let list = ints(&[1, 2, 3, 4]);
        assert_eq!(
            r.dispatch("slice", &[list.clone(), Value::Int(1), Value::Int(3)], true),
            ints(&[2, 3])
        );
        assert!(r
            .dispatch("slice", &[list.clone(), Value::Int(3), Value::Int(1)], true)
            .is_error());
        assert!(r
            .dispatch("slice", &[list, Value::Int(0), Value::Int(9)], true)
            .is_error());
    }

    #[test]
    fn distinct_uses_heterogeneous_equality() {
        let r = registry();
        let list = Value::from(vec![Value::Int(1), Value::UInt(1), Value::Double(1.0), Value::Int(2)]);
        assert_eq!(
            r.dispatch("distinct", &[list], true),
            Value::from(vec![Value::Int(1), Value::Int(2)])
        );
    }
}
