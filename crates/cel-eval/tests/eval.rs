//! End-to-end evaluation tests: parse, evaluate, compare.

use cel_eval::{Env, EvalErrorKind, MapActivation, TypeValue, Value};

fn env() -> Env {
    Env::with_standard_library().with_all_extensions()
}

fn eval(source: &str) -> Value {
    env().program(source).expect("parse failed").eval_empty()
}

fn eval_with(source: &str, vars: &[(&str, Value)]) -> Value {
    let mut activation = MapActivation::new();
    for (name, value) in vars {
        activation.insert(*name, value.clone());
    }
    env().program(source).expect("parse failed").eval(&activation)
}

fn assert_error_kind(value: Value, kind: EvalErrorKind) {
    match value.as_error() {
        Some(e) => assert_eq!(e.kind, kind, "unexpected error: {}", e),
        None => panic!("expected {:?} error, got {}", kind, value),
    }
}

// === Literals & arithmetic ===

#[test]
fn basic_arithmetic() {
    assert_eq!(eval("1 + 1"), Value::Int(2));
    assert_eq!(eval("10 / 3"), Value::Int(3));
    assert_eq!(eval("10 % 3"), Value::Int(1));
    assert_eq!(eval("2u + 3u"), Value::UInt(5));
    assert_eq!(eval("1.5 * 2.0"), Value::Double(3.0));
    assert_eq!(eval("-5 + 3"), Value::Int(-2));
}

#[test]
fn int64_min_literal_evaluates() {
    assert_eq!(eval("-9223372036854775808"), Value::Int(i64::MIN));
    assert_eq!(eval("-9223372036854775808 + 1"), Value::Int(i64::MIN + 1));
}

#[test]
fn overflow_detection() {
    assert_error_kind(eval("9223372036854775807 + 1"), EvalErrorKind::RangeError);
    assert_error_kind(eval("5000000000 * 5000000000"), EvalErrorKind::RangeError);
    assert_error_kind(eval("0u - 1u"), EvalErrorKind::RangeError);
    assert_error_kind(eval("-9223372036854775808 - 1"), EvalErrorKind::RangeError);
    assert_error_kind(eval("-(-9223372036854775808)"), EvalErrorKind::RangeError);
    assert_error_kind(
        eval("-9223372036854775808 / -1"),
        EvalErrorKind::RangeError,
    );
}

#[test]
fn division_and_modulo_by_zero() {
    assert_error_kind(eval("1 / 0"), EvalErrorKind::DivisionByZero);
    assert_error_kind(eval("1u / 0u"), EvalErrorKind::DivisionByZero);
    assert_error_kind(eval("1 % 0"), EvalErrorKind::ModuloByZero);
    // Double division by zero follows IEEE, no error.
    assert_eq!(eval("1.0 / 0.0"), Value::Double(f64::INFINITY));
}

// === Short-circuit semantics ===

#[test]
fn short_circuit_masks_unevaluated_errors() {
    assert_eq!(eval("false && (1 / 0 != 0)"), Value::Bool(false));
    assert_eq!(eval("true || (1 / 0 != 0)"), Value::Bool(true));
    assert_eq!(eval("(1 / 0 > 3) || true"), Value::Bool(true));
    assert_eq!(eval("(1 / 0 > 3) && false"), Value::Bool(false));
}

#[test]
fn forced_operands_surface_errors() {
    assert_error_kind(eval("true && (1 / 0 != 0)"), EvalErrorKind::DivisionByZero);
    assert_error_kind(eval("(1 / 0 != 0) && true"), EvalErrorKind::DivisionByZero);
    assert_error_kind(eval("false || (1 / 0 != 0)"), EvalErrorKind::DivisionByZero);
    assert_error_kind(eval("(1 / 0 != 0) || false"), EvalErrorKind::DivisionByZero);
}

#[test]
fn non_bool_operands_behave_like_errors() {
    assert_error_kind(eval("1 && true"), EvalErrorKind::NoMatchingOverload);
    assert_eq!(eval("1 && false"), Value::Bool(false));
    assert_eq!(eval("'x' || true"), Value::Bool(true));
    assert_error_kind(eval("'x' || false"), EvalErrorKind::NoMatchingOverload);
}

#[test]
fn unbound_variable_masked_by_short_circuit() {
    assert_eq!(eval("x || true"), Value::Bool(true));
    assert_eq!(eval("x && false"), Value::Bool(false));
    assert_error_kind(eval("x || false"), EvalErrorKind::UndeclaredReference);
    assert_error_kind(eval("x"), EvalErrorKind::UndeclaredReference);
}

#[test]
fn ternary_never_touches_unselected_branch() {
    assert_eq!(eval("false ? 1 / 0 : 3"), Value::Int(3));
    assert_eq!(eval("true ? 3 : 1 / 0"), Value::Int(3));
    assert_eq!(eval("true ? 3 : 'a' + 1"), Value::Int(3));
    assert_error_kind(eval("(1 / 0 == 0) ? 1 : 2"), EvalErrorKind::DivisionByZero);
    assert_error_kind(eval("1 ? 2 : 3"), EvalErrorKind::NoMatchingOverload);
}

// === Heterogeneous equality ===

#[test]
fn heterogeneous_equality() {
    assert_eq!(eval("dyn(1) == 1u"), Value::Bool(true));
    assert_eq!(eval("dyn(1) == 1.0"), Value::Bool(true));
    assert_eq!(eval("1 == 1.0"), Value::Bool(true));
    assert_eq!(eval("2u == 2.0"), Value::Bool(true));
    assert_eq!(eval("1 == '1'"), Value::Bool(false));
    assert_eq!(eval("true == 1"), Value::Bool(false));
    assert_eq!(eval("null == 0"), Value::Bool(false));
    assert_eq!(eval("{'k': 'v'} == {\"k\": \"v\"}"), Value::Bool(true));
    assert_eq!(eval("[1, 2] == [1.0, 2u]"), Value::Bool(true));
}

#[test]
fn membership_uses_equality_semantics() {
    assert_eq!(eval("'elem' in [1u, 'str', 2, b'bytes']"), Value::Bool(false));
    assert_eq!(eval("'str' in [1u, 'str', 2]"), Value::Bool(true));
    assert_eq!(eval("1.0 in [1]"), Value::Bool(true));
    assert_eq!(eval("2 in [1, 2, 3]"), Value::Bool(true));
    assert_eq!(eval("'a' in {'a': 1}"), Value::Bool(true));
    assert_eq!(eval("1u in {1: 'x'}"), Value::Bool(true));
    assert_eq!(eval("'a' in {1: 'x'}"), Value::Bool(false));
    assert_error_kind(eval("1 in 'abc'"), EvalErrorKind::NoMatchingOverload);
}

#[test]
fn relations_have_no_cross_kind_overload_outside_numbers() {
    assert_error_kind(eval("1 < 'a'"), EvalErrorKind::NoMatchingOverload);
    assert_error_kind(eval("[1] < [2]"), EvalErrorKind::NoMatchingOverload);
    assert_error_kind(eval("{} < {}"), EvalErrorKind::NoMatchingOverload);
    assert_eq!(eval("1 < 2u"), Value::Bool(true));
    assert_eq!(eval("-1 < 0u"), Value::Bool(true));
    assert_eq!(eval("'a' < 'b'"), Value::Bool(true));
    assert_eq!(eval("b'a' < b'b'"), Value::Bool(true));
    assert_eq!(eval("false < true"), Value::Bool(true));
}

#[test]
fn numeric_boundary_exactness() {
    assert_eq!(
        eval("dyn(9223372036854775807) < 9223372036854775808.0"),
        Value::Bool(false)
    );
    assert_eq!(
        eval("dyn(18446744073709551615u) < 18446744073709590000.0"),
        Value::Bool(true)
    );
    assert_eq!(
        eval("dyn(-9223372036854775808) <= -9223372036854775808.0"),
        Value::Bool(true)
    );
}

#[test]
fn nan_semantics() {
    assert_eq!(eval("0.0 / 0.0 == 0.0 / 0.0"), Value::Bool(false));
    assert_eq!(eval("double('NaN') != double('NaN')"), Value::Bool(true));
    assert_eq!(eval("double('NaN') < 1.0"), Value::Bool(false));
    assert_eq!(eval("1.0 < double('NaN')"), Value::Bool(false));
    assert_eq!(eval("double('NaN') >= double('NaN')"), Value::Bool(false));
}

// === Conversions ===

#[test]
fn conversion_range_errors() {
    assert_error_kind(eval("int(18446744073709551615u)"), EvalErrorKind::RangeError);
    assert_error_kind(eval("uint(-1)"), EvalErrorKind::RangeError);
    assert_error_kind(eval("int(1e19)"), EvalErrorKind::RangeError);
    assert_eq!(eval("int(3.9)"), Value::Int(3));
    assert_eq!(eval("int(-3.9)"), Value::Int(-3));
    assert_eq!(eval("uint(3.9)"), Value::UInt(3));
    assert_eq!(eval("double(3)"), Value::Double(3.0));
}

#[test]
fn bytes_string_utf8() {
    assert_eq!(eval("string(b'hello')"), Value::from("hello"));
    assert_error_kind(eval("string(b'\\xff')"), EvalErrorKind::InvalidUtf8);
    assert_eq!(eval("bytes('hi')"), Value::bytes(b"hi".to_vec()));
    assert_eq!(eval("size(b'\\xff\\x00')"), Value::Int(2));
}

#[test]
fn bool_string_conversion() {
    assert_eq!(eval("bool('True')"), Value::Bool(true));
    assert_eq!(eval("bool('f')"), Value::Bool(false));
    assert_error_kind(eval("bool('TrUe')"), EvalErrorKind::InvalidConversion);
}

// === Macros ===

#[test]
fn exists_over_empty_list() {
    assert_eq!(eval("[].exists(e, e == 2)"), Value::Bool(false));
    assert_eq!(eval("[].all(e, e == 2)"), Value::Bool(true));
}

#[test]
fn exists_one_counts_matches() {
    assert_eq!(eval("[7].exists_one(a, a == 7)"), Value::Bool(true));
    assert_eq!(eval("[7, 7].exists_one(a, a == 7)"), Value::Bool(false));
    assert_eq!(eval("[6, 7, 8].exists_one(a, a == 7)"), Value::Bool(true));
}

#[test]
fn exists_one_does_not_short_circuit() {
    // Even though two matches are found before the error, the error on the
    // last element invalidates the result.
    assert_error_kind(
        eval("[3, 2, 1, 0].exists_one(n, 12 / n > 1)"),
        EvalErrorKind::DivisionByZero,
    );
}

#[test]
fn exists_and_all_short_circuit() {
    assert_eq!(eval("[1, 2, 3].exists(n, n == 2 || 1 / 0 > 0)"), Value::Bool(true));
    // `all` stops at the first false; the error element is never reached.
    assert_eq!(eval("[2, 0].all(x, 4 / x != 2)"), Value::Bool(false));
    assert_error_kind(
        eval("[1, 0].all(x, 4 / x != 2)"),
        EvalErrorKind::DivisionByZero,
    );
}

#[test]
fn comprehension_errors_flow_through_accumulator() {
    // The error on the first element lands in the accumulator, then a
    // later forcing `true` absorbs it through `||`.
    assert_eq!(
        eval("[0, 2, 4].exists(x, 4 / x == 2 || 4 / (4 - x) == 2)"),
        Value::Bool(true)
    );
    // With no absorbing element the error survives to the result.
    assert_error_kind(
        eval("[0, 3].exists(x, 4 / x == 2)"),
        EvalErrorKind::DivisionByZero,
    );
}

#[test]
fn map_and_filter() {
    assert_eq!(
        eval("[1, 2, 3].map(n, n * n)"),
        Value::from(vec![Value::Int(1), Value::Int(4), Value::Int(9)])
    );
    assert_eq!(
        eval("[1, 2, 3, 4].map(n, n % 2 == 0, n * 2)"),
        Value::from(vec![Value::Int(4), Value::Int(8)])
    );
    assert_eq!(
        eval("[1, 2, 3, 4].filter(n, n > 2)"),
        Value::from(vec![Value::Int(3), Value::Int(4)])
    );
}

#[test]
fn macros_over_maps_iterate_keys() {
    assert_eq!(eval("{'a': 1, 'b': 2}.exists(k, k == 'b')"), Value::Bool(true));
    assert_eq!(eval("{'a': 1}.all(k, k == 'a')"), Value::Bool(true));
    assert_eq!(
        eval("{1: 'one', 2: 'two'}.map(k, k * 2)"),
        Value::from(vec![Value::Int(2), Value::Int(4)])
    );
}

#[test]
fn two_variable_macros() {
    assert_eq!(eval("[1, 2, 3].all(i, v, i < v)"), Value::Bool(true));
    assert_eq!(eval("[0, 1].exists(i, v, i == v)"), Value::Bool(true));
    assert_eq!(eval("{'a': 1}.all(k, v, k == 'a' && v == 1)"), Value::Bool(true));
}

#[test]
fn nested_macros_shadow_by_depth() {
    assert_eq!(
        eval("[[1], [2]].all(x, x.all(x, x > 0))"),
        Value::Bool(true)
    );
    assert_eq!(
        eval("[[1, 2], [3]].map(x, x.map(x, x * 10))"),
        Value::from(vec![
            Value::from(vec![Value::Int(10), Value::Int(20)]),
            Value::from(vec![Value::Int(30)]),
        ])
    );
}

#[test]
fn has_macro_on_maps() {
    assert_eq!(eval("has({'a': 1}.a)"), Value::Bool(true));
    assert_eq!(eval("has({'a': 1}.b)"), Value::Bool(false));
    assert_error_kind(eval("has(undeclared.b)"), EvalErrorKind::UndeclaredReference);
}

// === Bindings, blocks, optionals ===

#[test]
fn bind_introduces_local() {
    assert_eq!(eval("cel.bind(a, 1 + 1, a + a)"), Value::Int(4));
    assert_eq!(
        eval_with("cel.bind(a, x * 2, a + x)", &[("x", Value::Int(5))]),
        Value::Int(15)
    );
    // The bound name shadows an outer binding for the body only.
    assert_eq!(
        eval_with("cel.bind(x, 1, x) + x", &[("x", Value::Int(10))]),
        Value::Int(11)
    );
}

#[test]
fn block_slots_evaluate_lazily_at_most_once() {
    assert_eq!(
        eval("cel.block([1 + 1, cel.index(0) * 2], cel.index(1) + cel.index(0))"),
        Value::Int(6)
    );
    // A slot referenced only by the unevaluated ternary branch is never
    // forced, so the division by zero cannot surface.
    assert_eq!(
        eval("cel.block([1 / 0], true ? 1 : cel.index(0))"),
        Value::Int(1)
    );
    assert_eq!(
        eval("cel.block([1 / 0], false && cel.index(0) > 0)"),
        Value::Bool(false)
    );
    assert_error_kind(
        eval("cel.block([1 / 0], false || cel.index(0) > 0)"),
        EvalErrorKind::DivisionByZero,
    );
}

#[test]
fn optional_values() {
    assert_eq!(eval("optional.of(42).value()"), Value::Int(42));
    assert_eq!(eval("optional.of(42).optMap(y, y + 1).value()"), Value::Int(43));
    assert_eq!(
        eval("optional.none().optMap(y, y + 1).hasValue()"),
        Value::Bool(false)
    );
    assert_eq!(
        eval("optional.of(optional.of(1)).optFlatMap(o, o).value()"),
        Value::Int(1)
    );
    assert_eq!(eval("optional.none().orValue(9)"), Value::Int(9));
    assert_eq!(eval("optional.ofNonZeroValue(0).hasValue()"), Value::Bool(false));
}

#[test]
fn optional_chaining() {
    assert_eq!(eval("{'k': 'v'}.?k.orValue('d')"), Value::from("v"));
    assert_eq!(eval("{}.?k.orValue('d')"), Value::from("d"));
    assert_eq!(eval("{'a': {'b': 1}}.?a.?b.value()"), Value::Int(1));
    assert_eq!(eval("[1, 2][?5].orValue(0)"), Value::Int(0));
    assert_eq!(eval("[1, 2][?1].value()"), Value::Int(2));
    assert_eq!(eval("{'k': 1}[?'k'].value()"), Value::Int(1));
}

#[test]
fn optional_collection_literals() {
    assert_eq!(
        eval("[1, ?optional.none(), ?optional.of(3)]"),
        Value::from(vec![Value::Int(1), Value::Int(3)])
    );
    assert_eq!(eval("{?'k': optional.none()}"), eval("{}"));
    assert_eq!(eval("{?'k': optional.of(1)}"), eval("{'k': 1}"));
}

// === Maps & lists ===

#[test]
fn repeated_map_key_across_kinds() {
    assert_error_kind(eval("{0: 1, 0u: 2}"), EvalErrorKind::RepeatedMapKey);
    assert_error_kind(eval("{'a': 1, 'a': 2}"), EvalErrorKind::RepeatedMapKey);
}

#[test]
fn map_key_restrictions() {
    assert_error_kind(eval("{1.5: 'x'}"), EvalErrorKind::NoMatchingOverload);
    assert_error_kind(eval("{null: 'x'}"), EvalErrorKind::NoMatchingOverload);
    assert_eq!(eval("{true: 'x'}[true]"), Value::from("x"));
}

#[test]
fn heterogeneous_map_key_lookup() {
    assert_eq!(eval("{1: 'a'}[1u]"), Value::from("a"));
    assert_eq!(eval("{1: 'a'}[1.0]"), Value::from("a"));
    assert_error_kind(eval("{1: 'a'}[2]"), EvalErrorKind::NoSuchKey);
    assert_error_kind(eval("{1: 'a'}['1']"), EvalErrorKind::NoSuchKey);
}

#[test]
fn list_indexing() {
    assert_eq!(eval("[1, 2, 3][0]"), Value::Int(1));
    assert_eq!(eval("[1, 2, 3][2u]"), Value::Int(3));
    assert_eq!(eval("[1, 2, 3][1.0]"), Value::Int(2));
    assert_error_kind(eval("[1, 2, 3][-1]"), EvalErrorKind::IndexOutOfRange);
    assert_error_kind(eval("[1, 2, 3][3]"), EvalErrorKind::IndexOutOfRange);
    assert_error_kind(eval("[1][0.5]"), EvalErrorKind::InvalidArgument);
}

#[test]
fn list_concat_and_size() {
    assert_eq!(
        eval("[1] + [2, 3]"),
        Value::from(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );
    assert_eq!(eval("size([1, 2, 3])"), Value::Int(3));
    assert_eq!(eval("size({'a': 1})"), Value::Int(1));
    assert_eq!(eval("size('héllo')"), Value::Int(5));
}

// === Qualified names ===

#[test]
fn longest_prefix_resolution() {
    let vars = [
        ("a.b.c", Value::Int(1)),
        (
            "a.b",
            Value::map([(cel_eval::MapKey::String("c".into()), Value::Int(2))]),
        ),
    ];
    // The full dotted binding wins over selecting `c` from the map bound
    // at the shorter prefix.
    assert_eq!(eval_with("a.b.c", &vars), Value::Int(1));

    let vars = [(
        "a.b",
        Value::map([(cel_eval::MapKey::String("d".into()), Value::Int(3))]),
    )];
    assert_eq!(eval_with("a.b.d", &vars), Value::Int(3));
}

#[test]
fn container_relative_variable_resolution() {
    let env = Env::with_standard_library().with_container("com.example");
    let program = env.program("x + 1").unwrap();
    let mut activation = MapActivation::new();
    activation.insert("com.example.x", 41i64);
    assert_eq!(program.eval(&activation), Value::Int(42));
}

// === Strings, time, encoders ===

#[test]
fn string_predicates() {
    assert_eq!(eval("'hello'.contains('ell')"), Value::Bool(true));
    assert_eq!(eval("'hello'.startsWith('he')"), Value::Bool(true));
    assert_eq!(eval("'hello'.endsWith('lo')"), Value::Bool(true));
    assert_eq!(eval("'hello'.matches('^h.*o$')"), Value::Bool(true));
    assert_eq!(eval("matches('hello', 'e')"), Value::Bool(true));
}

#[test]
fn string_extension_functions() {
    assert_eq!(eval("'hello'.charAt(1)"), Value::from("e"));
    assert_eq!(eval("'hello'.substring(1, 3)"), Value::from("el"));
    assert_eq!(eval("'HELLO'.lowerAscii()"), Value::from("hello"));
    assert_eq!(eval("' hi '.trim()"), Value::from("hi"));
    assert_eq!(eval("['a', 'b'].join('-')"), Value::from("a-b"));
    assert_eq!(eval("'a-b-c'.split('-')[1]"), Value::from("b"));
    assert_eq!(eval("'%d!'.format([42])"), Value::from("42!"));
}

#[test]
fn timestamp_roundtrip() {
    assert_eq!(
        eval("string(timestamp(timestamp('2009-02-13T23:31:30Z')))"),
        Value::from("2009-02-13T23:31:30Z")
    );
    assert_eq!(
        eval("timestamp('2009-02-13T23:31:30Z').getFullYear()"),
        Value::Int(2009)
    );
    assert_eq!(
        eval("timestamp('2009-02-13T23:31:30Z').getDate()"),
        Value::Int(13)
    );
}

#[test]
fn timestamp_and_duration_arithmetic() {
    assert_eq!(
        eval("duration('1h') + duration('30m') == duration('90m')"),
        Value::Bool(true)
    );
    assert_eq!(
        eval("timestamp('2009-02-13T23:31:30Z') - timestamp('2009-02-13T23:31:00Z') == duration('30s')"),
        Value::Bool(true)
    );
    assert_eq!(
        eval("timestamp('2009-02-13T23:31:30Z') + duration('30s') > timestamp('2009-02-13T23:31:30Z')"),
        Value::Bool(true)
    );
    assert_error_kind(
        eval("timestamp('9999-12-31T23:59:59Z') + duration('1h')"),
        EvalErrorKind::RangeError,
    );
}

#[test]
fn base64_roundtrip() {
    assert_eq!(
        eval("base64.decode(base64.encode(b'Hello World!'))"),
        Value::bytes(b"Hello World!".to_vec())
    );
    assert_eq!(
        eval("base64.encode(b'Hello World!')"),
        Value::from("SGVsbG8gV29ybGQh")
    );
}

#[test]
fn math_extension() {
    assert_eq!(eval("math.greatest(1, 2.5, 2u)"), Value::Double(2.5));
    assert_eq!(eval("math.least([3, -1, 4])"), Value::Int(-1));
    assert_eq!(eval("math.abs(-3)"), Value::Int(3));
    assert_eq!(eval("math.bitShiftLeft(1, 4)"), Value::Int(16));
}

#[test]
fn lists_extension() {
    assert_eq!(
        eval("[[1, 2], [3]].flatten()"),
        Value::from(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );
    assert_eq!(
        eval("[1, 1u, 2].distinct()"),
        Value::from(vec![Value::Int(1), Value::Int(2)])
    );
    assert_eq!(
        eval("[1, 2, 3].reverse()"),
        Value::from(vec![Value::Int(3), Value::Int(2), Value::Int(1)])
    );
}

// === Types ===

#[test]
fn type_function_and_constants() {
    assert_eq!(eval("type(1) == int"), Value::Bool(true));
    assert_eq!(eval("type('a') == string"), Value::Bool(true));
    assert_eq!(eval("type(type(1)) == type"), Value::Bool(true));
    assert_eq!(eval("type(1) == type(2)"), Value::Bool(true));
    assert_eq!(eval("type(1) == uint"), Value::Bool(false));
    assert_eq!(
        eval("type(null)"),
        Value::Type(TypeValue::new("null_type"))
    );
}

// === Determinism ===

#[test]
fn repeated_evaluation_is_bit_identical() {
    let sources = [
        "1 + 1",
        "{'b': 2, 'a': 1}.map(k, k)",
        "[3, 1, 2].map(n, n * n)",
        "string(timestamp('2009-02-13T23:31:30Z'))",
        "1 / 0",
    ];
    for source in sources {
        let program = env().program(source).unwrap();
        let first = program.eval_empty();
        for _ in 0..3 {
            let again = program.eval_empty();
            match (&first, &again) {
                (Value::Error(a), Value::Error(b)) => assert_eq!(a.message, b.message),
                _ => assert_eq!(first, again),
            }
        }
    }
}
