//! Parser integration tests over complete expressions.

use cel_parser::{parse, BinaryOp, Expr, UnaryOp};

fn node(input: &str) -> Expr {
    parse(input).expect("parse failed").node
}

#[test]
fn operator_precedence_chain() {
    // a || b && c == d + e * -f
    let ast = node("a || b && c == d + e * -f");
    let Expr::Binary { op, right, .. } = ast else {
        panic!("expected binary");
    };
    assert_eq!(op, BinaryOp::Or);
    let Expr::Binary { op, right, .. } = right.node else {
        panic!("expected &&");
    };
    assert_eq!(op, BinaryOp::And);
    let Expr::Binary { op, right, .. } = right.node else {
        panic!("expected ==");
    };
    assert_eq!(op, BinaryOp::Eq);
    let Expr::Binary { op, right, .. } = right.node else {
        panic!("expected +");
    };
    assert_eq!(op, BinaryOp::Add);
    let Expr::Binary { op, right, .. } = right.node else {
        panic!("expected *");
    };
    assert_eq!(op, BinaryOp::Mul);
    assert!(matches!(
        right.node,
        Expr::Unary {
            op: UnaryOp::Neg,
            ..
        }
    ));
}

#[test]
fn in_operator_is_a_relation() {
    let ast = node("1 in [1, 2] == true");
    // relations are left-associative: (1 in [1,2]) == true
    let Expr::Binary { op, left, .. } = ast else {
        panic!("expected binary");
    };
    assert_eq!(op, BinaryOp::Eq);
    assert!(matches!(
        left.node,
        Expr::Binary {
            op: BinaryOp::In,
            ..
        }
    ));
}

#[test]
fn postfix_chain_mixes_select_index_call() {
    let ast = node("a.b[0].c(1).d");
    let Expr::Select { operand, field, .. } = ast else {
        panic!("expected select");
    };
    assert_eq!(field, "d");
    assert!(matches!(operand.node, Expr::Call { .. }));
}

#[test]
fn twelve_levels_of_nesting() {
    let src = format!("{}1{}", "[".repeat(12), "]".repeat(12));
    assert!(parse(&src).is_ok());
}

#[test]
fn thirty_two_way_flat_sequence() {
    let src = vec!["1"; 32].join(" + ");
    assert!(parse(&src).is_ok());

    let src = vec!["true"; 32].join(" && ");
    assert!(parse(&src).is_ok());
}

#[test]
fn string_literal_forms() {
    assert_eq!(node(r#""a\"b""#), Expr::String("a\"b".to_string()));
    assert_eq!(node("'a\\'b'"), Expr::String("a'b".to_string()));
    assert_eq!(node(r#"r"a\nb""#), Expr::String("a\\nb".to_string()));
    assert_eq!(node("\"\"\"x\ny\"\"\""), Expr::String("x\ny".to_string()));
}

#[test]
fn bytes_literal_with_invalid_utf8() {
    assert_eq!(node(r#"b"\xde\xad""#), Expr::Bytes(vec![0xDE, 0xAD]));
}

#[test]
fn struct_literal_after_qualified_name() {
    let Expr::Struct { type_name, fields } = node("google.protobuf.Int32Value{value: 5}") else {
        panic!("expected struct");
    };
    assert_eq!(type_name, "google.protobuf.Int32Value");
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].name, "value");
}

#[test]
fn map_literal_brace_is_not_struct() {
    assert!(matches!(node("{1: 2}"), Expr::Map(_)));
    assert!(matches!(node("{}"), Expr::Map(entries) if entries.is_empty()));
}

#[test]
fn nested_macros_share_variable_name() {
    // Inner `x` shadows outer `x`; both must expand.
    let ast = node("[[1], [2]].all(x, x.exists(x, x > 0))");
    let Expr::Comprehension { loop_step, .. } = ast else {
        panic!("expected comprehension");
    };
    let Expr::Binary { right, .. } = loop_step.node else {
        panic!("expected &&-step");
    };
    assert!(matches!(right.node, Expr::Comprehension { .. }));
}

#[test]
fn macro_over_map_literal() {
    let ast = node("{'a': 1, 'b': 2}.exists(k, k == 'b')");
    assert!(matches!(ast, Expr::Comprehension { .. }));
}

#[test]
fn qualified_function_call_keeps_target() {
    let Expr::Call {
        target, function, ..
    } = node("math.greatest(1, 2)")
    else {
        panic!("expected call");
    };
    assert_eq!(function, "greatest");
    assert!(target.is_some());
}
