//! Protobuf message semantics: construction, field selection, presence,
//! wrappers, oneof exclusivity, enums, and Any round-trips.
//!
//! Descriptors are assembled in-process so the tests need no generated
//! code or descriptor files.

use cel_eval::{Env, EvalErrorKind, Value};
use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions, OneofDescriptorProto,
};

fn scalar_field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

fn message_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::Message as i32),
        type_name: Some(type_name.to_string()),
        ..Default::default()
    }
}

fn test_pool() -> DescriptorPool {
    let wrappers = FileDescriptorProto {
        name: Some("google/protobuf/wrappers.proto".to_string()),
        package: Some("google.protobuf".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("Int64Value".to_string()),
            field: vec![scalar_field("value", 1, Type::Int64)],
            ..Default::default()
        }],
        ..Default::default()
    };

    let any = FileDescriptorProto {
        name: Some("google/protobuf/any.proto".to_string()),
        package: Some("google.protobuf".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("Any".to_string()),
            field: vec![
                scalar_field("type_url", 1, Type::String),
                scalar_field("value", 2, Type::Bytes),
            ],
            ..Default::default()
        }],
        ..Default::default()
    };

    let map_entry = DescriptorProto {
        name: Some("MapStringInt64Entry".to_string()),
        field: vec![
            scalar_field("key", 1, Type::String),
            scalar_field("value", 2, Type::Int64),
        ],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };

    let nested_message = DescriptorProto {
        name: Some("NestedMessage".to_string()),
        field: vec![scalar_field("bb", 1, Type::Int64)],
        ..Default::default()
    };

    let nested_enum = EnumDescriptorProto {
        name: Some("NestedEnum".to_string()),
        value: vec![
            EnumValueDescriptorProto {
                name: Some("FOO".to_string()),
                number: Some(0),
                ..Default::default()
            },
            EnumValueDescriptorProto {
                name: Some("BAR".to_string()),
                number: Some(1),
                ..Default::default()
            },
            EnumValueDescriptorProto {
                name: Some("BAZ".to_string()),
                number: Some(2),
                ..Default::default()
            },
        ],
        ..Default::default()
    };

    let mut oneof_string = scalar_field("oneof_string", 14, Type::String);
    oneof_string.oneof_index = Some(0);
    let mut oneof_int64 = scalar_field("oneof_int64", 15, Type::Int64);
    oneof_int64.oneof_index = Some(0);

    let test_all_types = DescriptorProto {
        name: Some("TestAllTypes".to_string()),
        field: vec![
            scalar_field("single_int32", 1, Type::Int32),
            scalar_field("single_int64", 2, Type::Int64),
            scalar_field("single_uint32", 3, Type::Uint32),
            scalar_field("single_uint64", 4, Type::Uint64),
            scalar_field("single_double", 5, Type::Double),
            scalar_field("single_string", 6, Type::String),
            scalar_field("single_bool", 7, Type::Bool),
            scalar_field("single_bytes", 8, Type::Bytes),
            message_field("single_nested_message", 9, ".cel.test.TestAllTypes.NestedMessage"),
            FieldDescriptorProto {
                name: Some("single_nested_enum".to_string()),
                number: Some(10),
                label: Some(Label::Optional as i32),
                r#type: Some(Type::Enum as i32),
                type_name: Some(".cel.test.TestAllTypes.NestedEnum".to_string()),
                ..Default::default()
            },
            FieldDescriptorProto {
                name: Some("repeated_int64".to_string()),
                number: Some(11),
                label: Some(Label::Repeated as i32),
                r#type: Some(Type::Int64 as i32),
                ..Default::default()
            },
            FieldDescriptorProto {
                name: Some("map_string_int64".to_string()),
                number: Some(12),
                label: Some(Label::Repeated as i32),
                r#type: Some(Type::Message as i32),
                type_name: Some(".cel.test.TestAllTypes.MapStringInt64Entry".to_string()),
                ..Default::default()
            },
            message_field("single_int64_wrapper", 13, ".google.protobuf.Int64Value"),
            oneof_string,
            oneof_int64,
            message_field("single_any", 16, ".google.protobuf.Any"),
        ],
        nested_type: vec![nested_message, map_entry],
        enum_type: vec![nested_enum],
        oneof_decl: vec![OneofDescriptorProto {
            name: Some("kind".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    };

    let proto3_file = FileDescriptorProto {
        name: Some("cel/test/types.proto".to_string()),
        package: Some("cel.test".to_string()),
        syntax: Some("proto3".to_string()),
        dependency: vec![
            "google/protobuf/wrappers.proto".to_string(),
            "google/protobuf/any.proto".to_string(),
        ],
        message_type: vec![test_all_types],
        ..Default::default()
    };

    // proto2 message for explicit-presence semantics.
    let proto2_file = FileDescriptorProto {
        name: Some("cel/test2/types.proto".to_string()),
        package: Some("cel.test2".to_string()),
        syntax: Some("proto2".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("Proto2Types".to_string()),
            field: vec![
                scalar_field("single_int32", 1, Type::Int32),
                scalar_field("single_string", 2, Type::String),
            ],
            ..Default::default()
        }],
        ..Default::default()
    };

    DescriptorPool::from_file_descriptor_set(FileDescriptorSet {
        file: vec![wrappers, any, proto3_file, proto2_file],
    })
    .expect("descriptor set is well-formed")
}

fn env() -> Env {
    Env::with_standard_library()
        .with_all_extensions()
        .with_descriptor_pool(test_pool())
        .with_container("cel.test")
}

fn eval(source: &str) -> Value {
    env().program(source).expect("parse failed").eval_empty()
}

fn assert_error_kind(value: Value, kind: EvalErrorKind) {
    match value.as_error() {
        Some(e) => assert_eq!(e.kind, kind, "unexpected error: {}", e),
        None => panic!("expected {:?} error, got {}", kind, value),
    }
}

#[test]
fn construct_and_select() {
    assert_eq!(eval("TestAllTypes{single_int64: 17}.single_int64"), Value::Int(17));
    assert_eq!(eval("TestAllTypes{single_string: 'hi'}.single_string"), Value::from("hi"));
    assert_eq!(eval("TestAllTypes{single_double: 1.5}.single_double"), Value::Double(1.5));
    assert_eq!(eval("TestAllTypes{single_uint64: 7u}.single_uint64"), Value::UInt(7));
}

#[test]
fn absolute_type_name_resolution() {
    assert_eq!(
        eval(".cel.test.TestAllTypes{single_int64: 3}.single_int64"),
        Value::Int(3)
    );
    assert_eq!(
        eval("cel.test.TestAllTypes{single_int64: 3}.single_int64"),
        Value::Int(3)
    );
}

#[test]
fn unset_fields_read_defaults() {
    assert_eq!(eval("TestAllTypes{}.single_int32"), Value::Int(0));
    assert_eq!(eval("TestAllTypes{}.single_string"), Value::from(""));
    assert_eq!(eval("TestAllTypes{}.single_bool"), Value::Bool(false));
    assert_eq!(
        eval("TestAllTypes{}.repeated_int64"),
        Value::from(Vec::<Value>::new())
    );
    // Unset message field reads as the default instance.
    assert_eq!(eval("TestAllTypes{}.single_nested_message.bb"), Value::Int(0));
}

#[test]
fn proto3_presence() {
    assert_eq!(eval("has(TestAllTypes{}.single_int32)"), Value::Bool(false));
    assert_eq!(
        eval("has(TestAllTypes{single_int32: 0}.single_int32)"),
        Value::Bool(false)
    );
    assert_eq!(
        eval("has(TestAllTypes{single_int32: 1}.single_int32)"),
        Value::Bool(true)
    );
    assert_eq!(eval("has(TestAllTypes{}.repeated_int64)"), Value::Bool(false));
    assert_eq!(
        eval("has(TestAllTypes{repeated_int64: [1]}.repeated_int64)"),
        Value::Bool(true)
    );
    // A message field assigned an empty sub-message still counts as set.
    assert_eq!(
        eval("has(TestAllTypes{single_nested_message: TestAllTypes.NestedMessage{}}.single_nested_message)"),
        Value::Bool(true)
    );
    assert_eq!(
        eval("has(TestAllTypes{}.single_nested_message)"),
        Value::Bool(false)
    );
}

#[test]
fn proto2_presence_is_explicit_set() {
    assert_eq!(
        eval("has(cel.test2.Proto2Types{single_int32: 0}.single_int32)"),
        Value::Bool(true)
    );
    assert_eq!(
        eval("has(cel.test2.Proto2Types{}.single_int32)"),
        Value::Bool(false)
    );
    // -32 equal to the declared default would still be present in proto2.
    assert_eq!(
        eval("has(cel.test2.Proto2Types{single_int32: -32}.single_int32)"),
        Value::Bool(true)
    );
}

#[test]
fn wrapper_fields_distinguish_absent_from_zero() {
    assert_eq!(eval("TestAllTypes{}.single_int64_wrapper"), Value::Null);
    assert_eq!(
        eval("TestAllTypes{single_int64_wrapper: 0}.single_int64_wrapper"),
        Value::Int(0)
    );
    assert_eq!(
        eval("TestAllTypes{single_int64_wrapper: 5}.single_int64_wrapper"),
        Value::Int(5)
    );
    assert_eq!(
        eval("TestAllTypes{}.single_int64_wrapper == null"),
        Value::Bool(true)
    );
}

#[test]
fn wrapper_literal_collapses_to_primitive() {
    assert_eq!(eval("google.protobuf.Int64Value{value: 5}"), Value::Int(5));
    assert_eq!(eval("google.protobuf.Int64Value{}"), Value::Int(0));
}

#[test]
fn numeric_field_range_checks() {
    assert_error_kind(
        eval("TestAllTypes{single_int32: 5000000000}"),
        EvalErrorKind::RangeError,
    );
    assert_error_kind(
        eval("TestAllTypes{single_uint32: 5000000000u}"),
        EvalErrorKind::RangeError,
    );
    assert_eq!(
        eval("TestAllTypes{single_int32: 2147483647}.single_int32"),
        Value::Int(2147483647)
    );
}

#[test]
fn unknown_fields_are_errors() {
    assert_error_kind(eval("TestAllTypes{bad_field: 1}"), EvalErrorKind::NoSuchField);
    assert_error_kind(eval("TestAllTypes{}.bad_field"), EvalErrorKind::NoSuchField);
    assert_error_kind(eval("has(TestAllTypes{}.bad_field)"), EvalErrorKind::NoSuchField);
}

#[test]
fn unknown_type_is_an_error() {
    assert_error_kind(
        eval("NoSuchMessage{x: 1}"),
        EvalErrorKind::UndeclaredReference,
    );
}

#[test]
fn null_assignment_rules() {
    assert_error_kind(
        eval("TestAllTypes{single_int32: null}"),
        EvalErrorKind::UnsupportedFieldType,
    );
    assert_error_kind(
        eval("TestAllTypes{repeated_int64: null}"),
        EvalErrorKind::UnsupportedFieldType,
    );
    // Null on a message field leaves it unset.
    assert_eq!(
        eval("has(TestAllTypes{single_nested_message: null}.single_nested_message)"),
        Value::Bool(false)
    );
}

#[test]
fn wrong_value_kind_for_field() {
    assert_error_kind(
        eval("TestAllTypes{single_int64: 'nope'}"),
        EvalErrorKind::UnsupportedFieldType,
    );
    assert_error_kind(
        eval("TestAllTypes{single_int64: 1u}"),
        EvalErrorKind::UnsupportedFieldType,
    );
}

#[test]
fn enum_values() {
    assert_eq!(
        eval("TestAllTypes{single_nested_enum: TestAllTypes.NestedEnum.BAR}.single_nested_enum == TestAllTypes.NestedEnum.BAR"),
        Value::Bool(true)
    );
    assert_eq!(
        eval("int(TestAllTypes.NestedEnum.BAZ)"),
        Value::Int(2)
    );
    assert_eq!(
        eval("TestAllTypes{single_nested_enum: 2}.single_nested_enum == TestAllTypes.NestedEnum.BAZ"),
        Value::Bool(true)
    );
}

#[test]
fn legacy_enum_mode_yields_integers() {
    let env = Env::with_standard_library()
        .with_descriptor_pool(test_pool())
        .with_container("cel.test")
        .with_legacy_enums();
    let result = env
        .program("TestAllTypes{single_nested_enum: 1}.single_nested_enum")
        .unwrap()
        .eval_empty();
    assert_eq!(result, Value::Int(1));
}

#[test]
fn oneof_assignment_clears_siblings() {
    assert_eq!(
        eval("has(TestAllTypes{oneof_string: 'x', oneof_int64: 5}.oneof_string)"),
        Value::Bool(false)
    );
    assert_eq!(
        eval("has(TestAllTypes{oneof_string: 'x', oneof_int64: 5}.oneof_int64)"),
        Value::Bool(true)
    );
    assert_eq!(
        eval("TestAllTypes{oneof_int64: 5, oneof_string: 'x'}.oneof_string"),
        Value::from("x")
    );
}

#[test]
fn repeated_and_map_fields() {
    assert_eq!(
        eval("TestAllTypes{repeated_int64: [1, 2, 3]}.repeated_int64[1]"),
        Value::Int(2)
    );
    assert_eq!(
        eval("TestAllTypes{map_string_int64: {'a': 1, 'b': 2}}.map_string_int64['b']"),
        Value::Int(2)
    );
    assert_eq!(
        eval("TestAllTypes{repeated_int64: [1, 2, 3]}.repeated_int64.map(n, n * 2)[2]"),
        Value::Int(6)
    );
    assert_eq!(
        eval("'a' in TestAllTypes{map_string_int64: {'a': 1}}.map_string_int64"),
        Value::Bool(true)
    );
}

#[test]
fn message_equality() {
    assert_eq!(
        eval("TestAllTypes{single_int64: 1} == TestAllTypes{single_int64: 1}"),
        Value::Bool(true)
    );
    assert_eq!(
        eval("TestAllTypes{single_int64: 1} == TestAllTypes{single_int64: 2}"),
        Value::Bool(false)
    );
    // Cross-kind equality with a message is false, not an error.
    assert_eq!(eval("TestAllTypes{} == 1"), Value::Bool(false));
}

#[test]
fn message_type_values() {
    assert_eq!(
        eval("type(TestAllTypes{}) == TestAllTypes"),
        Value::Bool(true)
    );
    assert_eq!(
        eval("type(TestAllTypes{}) == cel.test.TestAllTypes"),
        Value::Bool(true)
    );
}

#[test]
fn any_round_trip() {
    // Packing into Any and reading back unpacks through the registry.
    assert_eq!(
        eval("TestAllTypes{single_any: TestAllTypes{single_int64: 12}}.single_any.single_int64"),
        Value::Int(12)
    );
    assert_eq!(
        eval("TestAllTypes{single_any: TestAllTypes{single_int64: 12}}.single_any == TestAllTypes{single_int64: 12}"),
        Value::Bool(true)
    );
}

#[test]
fn optional_field_syntax_on_messages() {
    assert_eq!(
        eval("TestAllTypes{?single_int64: optional.of(7)}.single_int64"),
        Value::Int(7)
    );
    assert_eq!(
        eval("has(TestAllTypes{?single_int64: optional.none()}.single_int64)"),
        Value::Bool(false)
    );
    assert_eq!(
        eval("TestAllTypes{single_int64: 9}.?single_int64.value()"),
        Value::Int(9)
    );
    assert_eq!(
        eval("TestAllTypes{}.?single_int64.hasValue()"),
        Value::Bool(false)
    );
}

#[test]
fn comprehensions_over_message_collections() {
    assert_eq!(
        eval("TestAllTypes{repeated_int64: [1, 2, 3]}.repeated_int64.exists(n, n == 2)"),
        Value::Bool(true)
    );
    assert_eq!(
        eval("TestAllTypes{map_string_int64: {'a': 1}}.map_string_int64.all(k, k == 'a')"),
        Value::Bool(true)
    );
}
