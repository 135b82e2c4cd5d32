//! Protobuf-aware value semantics.
//!
//! The host supplies a `prost_reflect::DescriptorPool`; the evaluator
//! consumes it read-only for message construction, field selection,
//! presence tests, enum resolution, and `Any`/well-known-type handling.

use std::sync::Arc;

use prost::Message;
use prost_reflect::{
    DescriptorPool, DynamicMessage, EnumDescriptor, FieldDescriptor, Kind as FieldKind,
    MessageDescriptor, ReflectMessage, Value as PbValue,
};

use crate::error::EvalError;
use crate::value::{Duration, MapKey, Timestamp, Value, ValueMap};

/// A protobuf message value. The message is immutable once constructed;
/// cloning shares the underlying storage.
#[derive(Debug, Clone)]
pub struct ProtoMessage {
    inner: Arc<DynamicMessage>,
}

impl ProtoMessage {
    pub fn new(message: DynamicMessage) -> Self {
        Self {
            inner: Arc::new(message),
        }
    }

    pub fn descriptor(&self) -> MessageDescriptor {
        self.inner.descriptor()
    }

    pub fn type_name(&self) -> String {
        self.inner.descriptor().full_name().to_string()
    }

    pub fn message(&self) -> &DynamicMessage {
        &self.inner
    }

    /// Message equality: same descriptor and equal field values.
    pub fn equals(&self, other: &ProtoMessage) -> bool {
        self.inner.descriptor() == other.inner.descriptor() && *self.inner == *other.inner
    }

    /// True when no field carries presence or a non-default value.
    pub fn is_zero(&self) -> bool {
        let desc = self.inner.descriptor();
        let zero = desc.fields().all(|f| !self.inner.has_field(&f));
        zero
    }
}

/// A strongly typed enum value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub type_name: Arc<str>,
    pub value: i32,
}

impl EnumValue {
    pub fn new(type_name: impl Into<Arc<str>>, value: i32) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }
}

/// Read-only registry of message and enum descriptors, with
/// container-relative name resolution following C++ namespace rules.
#[derive(Debug, Clone, Default)]
pub struct ProtoRegistry {
    pool: DescriptorPool,
}

impl ProtoRegistry {
    pub fn new(pool: DescriptorPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn get_message(&self, name: &str) -> Option<MessageDescriptor> {
        self.pool
            .get_message_by_name(name.strip_prefix('.').unwrap_or(name))
    }

    pub fn get_enum(&self, name: &str) -> Option<EnumDescriptor> {
        self.pool
            .get_enum_by_name(name.strip_prefix('.').unwrap_or(name))
    }

    /// Resolve a possibly-relative message name within a container. A name
    /// with a leading dot resolves from the root only; otherwise each
    /// container prefix is tried longest-first.
    pub fn resolve_message(&self, name: &str, container: &str) -> Option<MessageDescriptor> {
        self.resolve(name, container, |n| self.get_message(n))
    }

    pub fn resolve_enum(&self, name: &str, container: &str) -> Option<EnumDescriptor> {
        self.resolve(name, container, |n| self.get_enum(n))
    }

    fn resolve<T>(
        &self,
        name: &str,
        container: &str,
        lookup: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        if let Some(absolute) = name.strip_prefix('.') {
            return lookup(absolute);
        }
        let mut prefix = container;
        loop {
            let candidate = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", prefix, name)
            };
            if let Some(found) = lookup(&candidate) {
                return Some(found);
            }
            match prefix.rfind('.') {
                Some(idx) => prefix = &prefix[..idx],
                None if !prefix.is_empty() => prefix = "",
                None => return None,
            }
        }
    }
}

// ==================== Message construction ====================

/// Build a message value from evaluated literal fields. Well-known types
/// collapse to their native CEL representation, so
/// `google.protobuf.Int32Value{value: 5}` evaluates to `5`.
pub fn construct_message(
    registry: &ProtoRegistry,
    descriptor: &MessageDescriptor,
    fields: Vec<(String, Value, bool)>,
    strong_enums: bool,
) -> Value {
    let mut message = DynamicMessage::new(descriptor.clone());

    for (name, value, optional) in fields {
        let field = match descriptor.get_field_by_name(&name) {
            Some(f) => f,
            None => return Value::error(EvalError::no_such_field(&name)),
        };

        // Optional-entry fields only apply when the optional is present.
        let value = if optional {
            match value {
                Value::Optional(opt) => match opt.as_value() {
                    Some(v) => v.clone(),
                    None => continue,
                },
                other => {
                    return Value::error(EvalError::invalid_argument(format!(
                        "optional field '{}' must be assigned an optional, got '{}'",
                        name,
                        other.type_name()
                    )))
                }
            }
        } else {
            value
        };

        if matches!(value, Value::Null) {
            match null_assignment(registry, &field, &name) {
                Ok(Some(pb)) => {
                    message.set_field(&field, pb);
                    continue;
                }
                Ok(None) => continue, // leaves the field unset
                Err(e) => return Value::error(e),
            }
        }

        match field_value(registry, &field, &value, &name) {
            // Setting any member of a oneof clears its siblings; the
            // dynamic message handles that internally.
            Ok(pb) => message.set_field(&field, pb),
            Err(e) => return Value::error(e),
        }
    }

    unwrap_well_known(registry, message, strong_enums)
}

/// Handling for `null` on a field: allowed for `google.protobuf.Value`
/// (becomes `null_value`), `Any` (packs a null `Value`), and singular
/// message fields (stays unset); an error anywhere else.
fn null_assignment(
    registry: &ProtoRegistry,
    field: &FieldDescriptor,
    name: &str,
) -> Result<Option<PbValue>, EvalError> {
    if field.is_list() || field.is_map() {
        return Err(EvalError::unsupported_field_type(name));
    }
    match field.kind() {
        FieldKind::Message(desc) => match desc.full_name() {
            "google.protobuf.Value" => {
                let msg = value_to_json_value(registry, &Value::Null)?;
                Ok(Some(PbValue::Message(msg)))
            }
            "google.protobuf.Any" => {
                let msg = pack_any(registry, &Value::Null)?;
                Ok(Some(PbValue::Message(msg)))
            }
            _ => Ok(None),
        },
        _ => Err(EvalError::unsupported_field_type(name)),
    }
}

/// Convert a CEL value into a protobuf field value, validating kind and
/// numeric range against the declared field type.
fn field_value(
    registry: &ProtoRegistry,
    field: &FieldDescriptor,
    value: &Value,
    name: &str,
) -> Result<PbValue, EvalError> {
    if field.is_map() {
        let map = value
            .as_map()
            .ok_or_else(|| EvalError::unsupported_field_type(name))?;
        let entry = match field.kind() {
            FieldKind::Message(m) => m,
            _ => return Err(EvalError::internal("map field without entry message")),
        };
        let key_field = entry
            .map_entry_key_field();
        let value_field = entry.map_entry_value_field();

        let mut out = std::collections::HashMap::new();
        for (key, val) in map.iter() {
            let pb_key = map_key_value(&key_field, key, name)?;
            let pb_val = scalar_value(registry, &value_field, val, name)?;
            out.insert(pb_key, pb_val);
        }
        return Ok(PbValue::Map(out));
    }

    if field.is_list() {
        let list = value
            .as_list()
            .ok_or_else(|| EvalError::unsupported_field_type(name))?;
        let mut out = Vec::with_capacity(list.len());
        for elem in list {
            if matches!(elem, Value::Null) {
                return Err(EvalError::unsupported_field_type(name));
            }
            out.push(scalar_value(registry, field, elem, name)?);
        }
        return Ok(PbValue::List(out));
    }

    scalar_value(registry, field, value, name)
}

fn map_key_value(
    key_field: &FieldDescriptor,
    key: &MapKey,
    name: &str,
) -> Result<prost_reflect::MapKey, EvalError> {
    use prost_reflect::MapKey as PbKey;
    match (key_field.kind(), key) {
        (FieldKind::Bool, MapKey::Bool(b)) => Ok(PbKey::Bool(*b)),
        (FieldKind::Int32 | FieldKind::Sint32 | FieldKind::Sfixed32, MapKey::Int(i)) => {
            i32::try_from(*i)
                .map(PbKey::I32)
                .map_err(|_| EvalError::range(format!("int32 key out of range for '{}'", name)))
        }
        (FieldKind::Int64 | FieldKind::Sint64 | FieldKind::Sfixed64, MapKey::Int(i)) => {
            Ok(PbKey::I64(*i))
        }
        (FieldKind::Uint32 | FieldKind::Fixed32, MapKey::UInt(u)) => u32::try_from(*u)
            .map(PbKey::U32)
            .map_err(|_| EvalError::range(format!("uint32 key out of range for '{}'", name))),
        (FieldKind::Uint64 | FieldKind::Fixed64, MapKey::UInt(u)) => Ok(PbKey::U64(*u)),
        (FieldKind::String, MapKey::String(s)) => Ok(PbKey::String(s.to_string())),
        _ => Err(EvalError::unsupported_field_type(name)),
    }
}

fn scalar_value(
    registry: &ProtoRegistry,
    field: &FieldDescriptor,
    value: &Value,
    name: &str,
) -> Result<PbValue, EvalError> {
    match field.kind() {
        FieldKind::Bool => match value {
            Value::Bool(b) => Ok(PbValue::Bool(*b)),
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        FieldKind::Int32 | FieldKind::Sint32 | FieldKind::Sfixed32 => match value {
            Value::Int(i) => i32::try_from(*i).map(PbValue::I32).map_err(|_| {
                EvalError::range(format!("int32 field '{}' value out of range", name))
            }),
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        FieldKind::Int64 | FieldKind::Sint64 | FieldKind::Sfixed64 => match value {
            Value::Int(i) => Ok(PbValue::I64(*i)),
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        FieldKind::Uint32 | FieldKind::Fixed32 => match value {
            Value::UInt(u) => u32::try_from(*u).map(PbValue::U32).map_err(|_| {
                EvalError::range(format!("uint32 field '{}' value out of range", name))
            }),
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        FieldKind::Uint64 | FieldKind::Fixed64 => match value {
            Value::UInt(u) => Ok(PbValue::U64(*u)),
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        FieldKind::Float => match value {
            Value::Double(d) => {
                if d.is_finite() && (*d > f32::MAX as f64 || *d < f32::MIN as f64) {
                    Err(EvalError::range(format!(
                        "float field '{}' value out of range",
                        name
                    )))
                } else {
                    Ok(PbValue::F32(*d as f32))
                }
            }
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        FieldKind::Double => match value {
            Value::Double(d) => Ok(PbValue::F64(*d)),
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        FieldKind::String => match value {
            Value::String(s) => Ok(PbValue::String(s.to_string())),
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        FieldKind::Bytes => match value {
            Value::Bytes(b) => Ok(PbValue::Bytes(prost::bytes::Bytes::copy_from_slice(b))),
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        FieldKind::Enum(desc) => match value {
            Value::Int(i) => i32::try_from(*i).map(PbValue::EnumNumber).map_err(|_| {
                EvalError::range(format!("enum field '{}' value out of range", name))
            }),
            Value::Enum(e) => {
                if e.type_name.as_ref() == desc.full_name() {
                    Ok(PbValue::EnumNumber(e.value))
                } else {
                    Err(EvalError::unsupported_field_type(name))
                }
            }
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        FieldKind::Message(desc) => message_field_value(registry, &desc, value, name),
    }
}

/// Convert a CEL value into a message-typed field, honoring well-known
/// wrapper and JSON types.
fn message_field_value(
    registry: &ProtoRegistry,
    desc: &MessageDescriptor,
    value: &Value,
    name: &str,
) -> Result<PbValue, EvalError> {
    let full_name = desc.full_name();
    match full_name {
        "google.protobuf.Timestamp" => match value {
            Value::Timestamp(ts) => Ok(PbValue::Message(timestamp_message(desc, ts))),
            Value::Message(m) if m.type_name() == full_name => {
                Ok(PbValue::Message(m.message().clone()))
            }
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        "google.protobuf.Duration" => match value {
            Value::Duration(d) => Ok(PbValue::Message(duration_message(desc, d))),
            Value::Message(m) if m.type_name() == full_name => {
                Ok(PbValue::Message(m.message().clone()))
            }
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        "google.protobuf.Int32Value" => wrapper_from(desc, value, name, |v| match v {
            Value::Int(i) => i32::try_from(*i).ok().map(PbValue::I32),
            _ => None,
        }),
        "google.protobuf.Int64Value" => wrapper_from(desc, value, name, |v| match v {
            Value::Int(i) => Some(PbValue::I64(*i)),
            _ => None,
        }),
        "google.protobuf.UInt32Value" => wrapper_from(desc, value, name, |v| match v {
            Value::UInt(u) => u32::try_from(*u).ok().map(PbValue::U32),
            _ => None,
        }),
        "google.protobuf.UInt64Value" => wrapper_from(desc, value, name, |v| match v {
            Value::UInt(u) => Some(PbValue::U64(*u)),
            _ => None,
        }),
        "google.protobuf.FloatValue" => wrapper_from(desc, value, name, |v| match v {
            Value::Double(d) => Some(PbValue::F32(*d as f32)),
            _ => None,
        }),
        "google.protobuf.DoubleValue" => wrapper_from(desc, value, name, |v| match v {
            Value::Double(d) => Some(PbValue::F64(*d)),
            _ => None,
        }),
        "google.protobuf.BoolValue" => wrapper_from(desc, value, name, |v| match v {
            Value::Bool(b) => Some(PbValue::Bool(*b)),
            _ => None,
        }),
        "google.protobuf.StringValue" => wrapper_from(desc, value, name, |v| match v {
            Value::String(s) => Some(PbValue::String(s.to_string())),
            _ => None,
        }),
        "google.protobuf.BytesValue" => wrapper_from(desc, value, name, |v| match v {
            Value::Bytes(b) => Some(PbValue::Bytes(prost::bytes::Bytes::copy_from_slice(b))),
            _ => None,
        }),
        "google.protobuf.Value" => Ok(PbValue::Message(value_to_json_value(registry, value)?)),
        "google.protobuf.Struct" => match value {
            Value::Map(_) => Ok(PbValue::Message(value_to_json_struct(registry, value)?)),
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        "google.protobuf.ListValue" => match value {
            Value::List(_) => Ok(PbValue::Message(value_to_json_list(registry, value)?)),
            _ => Err(EvalError::unsupported_field_type(name)),
        },
        "google.protobuf.Any" => Ok(PbValue::Message(pack_any(registry, value)?)),
        _ => match value {
            Value::Message(m) if m.descriptor() == *desc => {
                Ok(PbValue::Message(m.message().clone()))
            }
            _ => Err(EvalError::unsupported_field_type(name)),
        },
    }
}

fn wrapper_from(
    desc: &MessageDescriptor,
    value: &Value,
    name: &str,
    convert: impl Fn(&Value) -> Option<PbValue>,
) -> Result<PbValue, EvalError> {
    if let Value::Message(m) = value {
        if m.descriptor() == *desc {
            return Ok(PbValue::Message(m.message().clone()));
        }
    }
    let inner = convert(value).ok_or_else(|| {
        if value.is_numeric() {
            EvalError::range(format!("wrapper field '{}' value out of range", name))
        } else {
            EvalError::unsupported_field_type(name)
        }
    })?;
    let mut msg = DynamicMessage::new(desc.clone());
    if let Some(f) = desc.get_field_by_name("value") {
        msg.set_field(&f, inner);
    }
    Ok(PbValue::Message(msg))
}

fn timestamp_message(desc: &MessageDescriptor, ts: &Timestamp) -> DynamicMessage {
    let mut msg = DynamicMessage::new(desc.clone());
    if let Some(f) = desc.get_field_by_name("seconds") {
        msg.set_field(&f, PbValue::I64(ts.seconds));
    }
    if let Some(f) = desc.get_field_by_name("nanos") {
        msg.set_field(&f, PbValue::I32(ts.nanos));
    }
    msg
}

fn duration_message(desc: &MessageDescriptor, d: &Duration) -> DynamicMessage {
    let mut msg = DynamicMessage::new(desc.clone());
    if let Some(f) = desc.get_field_by_name("seconds") {
        msg.set_field(&f, PbValue::I64(d.seconds));
    }
    if let Some(f) = desc.get_field_by_name("nanos") {
        msg.set_field(&f, PbValue::I32(d.nanos));
    }
    msg
}

// ==================== Field selection & presence ====================

/// Select a field from a message.
pub fn message_field(
    registry: &ProtoRegistry,
    message: &ProtoMessage,
    field_name: &str,
    strong_enums: bool,
) -> Value {
    let descriptor = message.descriptor();
    let field = match descriptor.get_field_by_name(field_name) {
        Some(f) => f,
        None => return Value::error(EvalError::no_such_field(field_name)),
    };

    // An unset wrapper field reads as null, distinguishing absence from a
    // present-and-zero wrapper.
    if let FieldKind::Message(desc) = field.kind() {
        if !field.is_list() && !field.is_map() {
            if is_wrapper_type(&desc) && !message.message().has_field(&field) {
                return Value::Null;
            }
        }
    }

    let raw = message.message().get_field(&field).into_owned();
    pb_to_cel(registry, raw, &field, strong_enums)
}

/// Presence test for `has(msg.field)`: explicit presence where the field
/// tracks it (proto2 scalars, message fields, oneofs), non-default for
/// proto3 implicit scalars, and non-empty for repeated/map fields.
pub fn message_has_field(message: &ProtoMessage, field_name: &str) -> Value {
    let descriptor = message.descriptor();
    let field = match descriptor.get_field_by_name(field_name) {
        Some(f) => f,
        None => return Value::error(EvalError::no_such_field(field_name)),
    };

    if field.is_list() || field.is_map() {
        let raw = message.message().get_field(&field);
        let non_empty = match raw.as_ref() {
            PbValue::List(l) => !l.is_empty(),
            PbValue::Map(m) => !m.is_empty(),
            _ => false,
        };
        return Value::Bool(non_empty);
    }

    Value::Bool(message.message().has_field(&field))
}

/// Convert a protobuf field value to a CEL value.
fn pb_to_cel(
    registry: &ProtoRegistry,
    value: PbValue,
    field: &FieldDescriptor,
    strong_enums: bool,
) -> Value {
    match value {
        PbValue::Bool(b) => Value::Bool(b),
        PbValue::I32(i) => Value::Int(i as i64),
        PbValue::I64(i) => Value::Int(i),
        PbValue::U32(u) => Value::UInt(u as u64),
        PbValue::U64(u) => Value::UInt(u),
        PbValue::F32(f) => Value::Double(f as f64),
        PbValue::F64(f) => Value::Double(f),
        PbValue::String(s) => Value::String(Arc::from(s.as_str())),
        PbValue::Bytes(b) => Value::Bytes(Arc::from(b.as_ref())),
        PbValue::EnumNumber(n) => {
            let enum_desc = match field.kind() {
                FieldKind::Enum(d) => d,
                _ => return Value::error(EvalError::internal("enum value on non-enum field")),
            };
            if strong_enums {
                Value::Enum(EnumValue::new(enum_desc.full_name(), n))
            } else {
                Value::Int(n as i64)
            }
        }
        PbValue::Message(msg) => unwrap_well_known(registry, msg, strong_enums),
        PbValue::List(list) => {
            let values: Vec<Value> = list
                .into_iter()
                .map(|v| pb_to_cel(registry, v, field, strong_enums))
                .collect();
            Value::from(values)
        }
        PbValue::Map(map) => {
            let entry = match field.kind() {
                FieldKind::Message(m) => m,
                _ => return Value::error(EvalError::internal("map value on non-map field")),
            };
            let value_field = entry.map_entry_value_field();
            let mut out = ValueMap::new();
            for (k, v) in map {
                let key = match k {
                    prost_reflect::MapKey::Bool(b) => MapKey::Bool(b),
                    prost_reflect::MapKey::I32(i) => MapKey::Int(i as i64),
                    prost_reflect::MapKey::I64(i) => MapKey::Int(i),
                    prost_reflect::MapKey::U32(u) => MapKey::UInt(u as u64),
                    prost_reflect::MapKey::U64(u) => MapKey::UInt(u),
                    prost_reflect::MapKey::String(s) => MapKey::String(Arc::from(s.as_str())),
                };
                out.insert(key, pb_to_cel(registry, v, &value_field, strong_enums));
            }
            Value::Map(Arc::new(out))
        }
    }
}

// ==================== Well-known types ====================

pub fn is_wrapper_type(desc: &MessageDescriptor) -> bool {
    matches!(
        desc.full_name(),
        "google.protobuf.BoolValue"
            | "google.protobuf.Int32Value"
            | "google.protobuf.Int64Value"
            | "google.protobuf.UInt32Value"
            | "google.protobuf.UInt64Value"
            | "google.protobuf.FloatValue"
            | "google.protobuf.DoubleValue"
            | "google.protobuf.StringValue"
            | "google.protobuf.BytesValue"
    )
}

/// Collapse well-known types to native CEL values; other messages stay
/// `Value::Message`.
pub fn unwrap_well_known(
    registry: &ProtoRegistry,
    message: DynamicMessage,
    strong_enums: bool,
) -> Value {
    let descriptor = message.descriptor();
    match descriptor.full_name() {
        "google.protobuf.Timestamp" => {
            let ts = Timestamp::new(
                get_i64(&message, "seconds").unwrap_or(0),
                get_i32(&message, "nanos").unwrap_or(0),
            );
            if ts.is_valid() {
                Value::Timestamp(ts)
            } else {
                Value::error(EvalError::range(
                    "timestamp out of range: must be between year 0001 and 9999",
                ))
            }
        }
        "google.protobuf.Duration" => {
            let d = Duration::new(
                get_i64(&message, "seconds").unwrap_or(0),
                get_i32(&message, "nanos").unwrap_or(0),
            );
            if d.is_valid() {
                Value::Duration(d)
            } else {
                Value::error(EvalError::range(
                    "duration out of range: must be within 10000 years",
                ))
            }
        }
        "google.protobuf.Int32Value" | "google.protobuf.Int64Value" => {
            Value::Int(get_i64(&message, "value").unwrap_or(0))
        }
        "google.protobuf.UInt32Value" | "google.protobuf.UInt64Value" => {
            Value::UInt(get_u64(&message, "value").unwrap_or(0))
        }
        "google.protobuf.FloatValue" | "google.protobuf.DoubleValue" => {
            Value::Double(get_f64(&message, "value").unwrap_or(0.0))
        }
        "google.protobuf.BoolValue" => {
            Value::Bool(get_bool(&message, "value").unwrap_or(false))
        }
        "google.protobuf.StringValue" => {
            Value::string(get_string(&message, "value").unwrap_or_default())
        }
        "google.protobuf.BytesValue" => {
            Value::bytes(get_bytes(&message, "value").unwrap_or_default())
        }
        "google.protobuf.Value" => unwrap_json_value(registry, &message, strong_enums),
        "google.protobuf.Struct" => unwrap_json_struct(registry, &message, strong_enums),
        "google.protobuf.ListValue" => unwrap_json_list(registry, &message, strong_enums),
        "google.protobuf.Any" => unpack_any(registry, &message, strong_enums),
        _ => Value::Message(ProtoMessage::new(message)),
    }
}

fn unwrap_json_value(
    registry: &ProtoRegistry,
    message: &DynamicMessage,
    strong_enums: bool,
) -> Value {
    let descriptor = message.descriptor();
    for field in descriptor.fields() {
        if !message.has_field(&field) {
            continue;
        }
        let value = message.get_field(&field).into_owned();
        return match (field.name(), value) {
            ("null_value", _) => Value::Null,
            ("bool_value", PbValue::Bool(b)) => Value::Bool(b),
            ("number_value", PbValue::F64(d)) => Value::Double(d),
            ("string_value", PbValue::String(s)) => Value::string(s),
            ("struct_value", PbValue::Message(m)) => {
                unwrap_json_struct(registry, &m, strong_enums)
            }
            ("list_value", PbValue::Message(m)) => unwrap_json_list(registry, &m, strong_enums),
            _ => Value::Null,
        };
    }
    // No kind set; the default Value is null.
    Value::Null
}

fn unwrap_json_struct(
    registry: &ProtoRegistry,
    message: &DynamicMessage,
    strong_enums: bool,
) -> Value {
    let descriptor = message.descriptor();
    let mut out = ValueMap::new();
    if let Some(fields_field) = descriptor.get_field_by_name("fields") {
        if let PbValue::Map(map) = message.get_field(&fields_field).as_ref() {
            for (k, v) in map {
                if let prost_reflect::MapKey::String(key) = k {
                    let value = match v {
                        PbValue::Message(m) => unwrap_json_value(registry, m, strong_enums),
                        _ => Value::Null,
                    };
                    out.insert(MapKey::String(Arc::from(key.as_str())), value);
                }
            }
        }
    }
    Value::Map(Arc::new(out))
}

fn unwrap_json_list(
    registry: &ProtoRegistry,
    message: &DynamicMessage,
    strong_enums: bool,
) -> Value {
    let descriptor = message.descriptor();
    let mut out = Vec::new();
    if let Some(values_field) = descriptor.get_field_by_name("values") {
        if let PbValue::List(list) = message.get_field(&values_field).as_ref() {
            for v in list {
                out.push(match v {
                    PbValue::Message(m) => unwrap_json_value(registry, m, strong_enums),
                    _ => Value::Null,
                });
            }
        }
    }
    Value::from(out)
}

fn value_to_json_value(
    registry: &ProtoRegistry,
    value: &Value,
) -> Result<DynamicMessage, EvalError> {
    let desc = registry
        .get_message("google.protobuf.Value")
        .ok_or_else(|| EvalError::internal("google.protobuf.Value not in registry"))?;
    let mut msg = DynamicMessage::new(desc.clone());

    let (field_name, pb) = match value {
        Value::Null => ("null_value", PbValue::EnumNumber(0)),
        Value::Bool(b) => ("bool_value", PbValue::Bool(*b)),
        Value::Int(i) => ("number_value", PbValue::F64(*i as f64)),
        Value::UInt(u) => ("number_value", PbValue::F64(*u as f64)),
        Value::Double(d) => ("number_value", PbValue::F64(*d)),
        Value::String(s) => ("string_value", PbValue::String(s.to_string())),
        Value::List(_) => (
            "list_value",
            PbValue::Message(value_to_json_list(registry, value)?),
        ),
        Value::Map(_) => (
            "struct_value",
            PbValue::Message(value_to_json_struct(registry, value)?),
        ),
        other => {
            return Err(EvalError::invalid_conversion(
                &other.type_name(),
                "google.protobuf.Value",
            ))
        }
    };

    let field = desc
        .get_field_by_name(field_name)
        .ok_or_else(|| EvalError::internal("malformed google.protobuf.Value descriptor"))?;
    msg.set_field(&field, pb);
    Ok(msg)
}

fn value_to_json_struct(
    registry: &ProtoRegistry,
    value: &Value,
) -> Result<DynamicMessage, EvalError> {
    let desc = registry
        .get_message("google.protobuf.Struct")
        .ok_or_else(|| EvalError::internal("google.protobuf.Struct not in registry"))?;
    let map = value
        .as_map()
        .ok_or_else(|| EvalError::invalid_conversion(&value.type_name(), "google.protobuf.Struct"))?;

    let mut msg = DynamicMessage::new(desc.clone());
    if let Some(fields_field) = desc.get_field_by_name("fields") {
        let mut out = std::collections::HashMap::new();
        for (key, val) in map.iter() {
            let key = match key {
                MapKey::String(s) => s.to_string(),
                other => {
                    return Err(EvalError::invalid_conversion(
                        &other.to_value().type_name(),
                        "Struct key",
                    ))
                }
            };
            out.insert(
                prost_reflect::MapKey::String(key),
                PbValue::Message(value_to_json_value(registry, val)?),
            );
        }
        msg.set_field(&fields_field, PbValue::Map(out));
    }
    Ok(msg)
}

fn value_to_json_list(
    registry: &ProtoRegistry,
    value: &Value,
) -> Result<DynamicMessage, EvalError> {
    let desc = registry
        .get_message("google.protobuf.ListValue")
        .ok_or_else(|| EvalError::internal("google.protobuf.ListValue not in registry"))?;
    let list = value
        .as_list()
        .ok_or_else(|| EvalError::invalid_conversion(&value.type_name(), "ListValue"))?;

    let mut msg = DynamicMessage::new(desc.clone());
    if let Some(values_field) = desc.get_field_by_name("values") {
        let mut out = Vec::with_capacity(list.len());
        for elem in list {
            out.push(PbValue::Message(value_to_json_value(registry, elem)?));
        }
        msg.set_field(&values_field, PbValue::List(out));
    }
    Ok(msg)
}

// ==================== Any packing / unpacking ====================

/// Pack a value into a `google.protobuf.Any`. Messages pack directly;
/// primitives wrap in their wrapper type (or `Value`/`Struct`/`ListValue`)
/// first.
pub fn pack_any(registry: &ProtoRegistry, value: &Value) -> Result<DynamicMessage, EvalError> {
    let any_desc = registry
        .get_message("google.protobuf.Any")
        .ok_or_else(|| EvalError::internal("google.protobuf.Any not in registry"))?;

    let inner: DynamicMessage = match value {
        Value::Message(m) => m.message().clone(),
        Value::Timestamp(ts) => {
            let desc = registry
                .get_message("google.protobuf.Timestamp")
                .ok_or_else(|| EvalError::internal("Timestamp not in registry"))?;
            timestamp_message(&desc, ts)
        }
        Value::Duration(d) => {
            let desc = registry
                .get_message("google.protobuf.Duration")
                .ok_or_else(|| EvalError::internal("Duration not in registry"))?;
            duration_message(&desc, d)
        }
        Value::Bool(_) => wrap_primitive(registry, "google.protobuf.BoolValue", value)?,
        Value::Int(_) => wrap_primitive(registry, "google.protobuf.Int64Value", value)?,
        Value::UInt(_) => wrap_primitive(registry, "google.protobuf.UInt64Value", value)?,
        Value::Double(_) => wrap_primitive(registry, "google.protobuf.DoubleValue", value)?,
        Value::String(_) => wrap_primitive(registry, "google.protobuf.StringValue", value)?,
        Value::Bytes(_) => wrap_primitive(registry, "google.protobuf.BytesValue", value)?,
        Value::Null => value_to_json_value(registry, value)?,
        Value::Map(_) => value_to_json_struct(registry, value)?,
        Value::List(_) => value_to_json_list(registry, value)?,
        other => {
            return Err(EvalError::invalid_conversion(
                &other.type_name(),
                "google.protobuf.Any",
            ))
        }
    };

    let mut any = DynamicMessage::new(any_desc.clone());
    let type_url = format!("type.googleapis.com/{}", inner.descriptor().full_name());
    let encoded = inner.encode_to_vec();

    if let Some(f) = any_desc.get_field_by_name("type_url") {
        any.set_field(&f, PbValue::String(type_url));
    }
    if let Some(f) = any_desc.get_field_by_name("value") {
        any.set_field(&f, PbValue::Bytes(prost::bytes::Bytes::from(encoded)));
    }
    Ok(any)
}

fn wrap_primitive(
    registry: &ProtoRegistry,
    wrapper_name: &str,
    value: &Value,
) -> Result<DynamicMessage, EvalError> {
    let desc = registry
        .get_message(wrapper_name)
        .ok_or_else(|| EvalError::internal(format!("{} not in registry", wrapper_name)))?;
    let mut msg = DynamicMessage::new(desc.clone());
    let field = desc
        .get_field_by_name("value")
        .ok_or_else(|| EvalError::internal("malformed wrapper descriptor"))?;
    let pb = match value {
        Value::Bool(b) => PbValue::Bool(*b),
        Value::Int(i) => PbValue::I64(*i),
        Value::UInt(u) => PbValue::U64(*u),
        Value::Double(d) => PbValue::F64(*d),
        Value::String(s) => PbValue::String(s.to_string()),
        Value::Bytes(b) => PbValue::Bytes(prost::bytes::Bytes::copy_from_slice(b)),
        _ => return Err(EvalError::internal("primitive expected")),
    };
    msg.set_field(&field, pb);
    Ok(msg)
}

/// Unpack a `google.protobuf.Any` by resolving its `type_url` through the
/// registry. An Any without a `type_url` stays as-is (byte-level equality
/// applies); an unresolvable URL is an error.
pub fn unpack_any(
    registry: &ProtoRegistry,
    message: &DynamicMessage,
    strong_enums: bool,
) -> Value {
    let type_url = get_string(message, "type_url").unwrap_or_default();
    if type_url.is_empty() {
        return Value::Message(ProtoMessage::new(message.clone()));
    }

    let type_name = type_url.rsplit('/').next().unwrap_or(&type_url);
    let desc = match registry.get_message(type_name) {
        Some(d) => d,
        None => {
            return Value::error(EvalError::invalid_argument(format!(
                "unknown type in Any: '{}'",
                type_url
            )))
        }
    };

    let bytes = get_bytes(message, "value").unwrap_or_default();
    match DynamicMessage::decode(desc, bytes.as_slice()) {
        Ok(inner) => unwrap_well_known(registry, inner, strong_enums),
        Err(e) => Value::error(EvalError::invalid_argument(format!(
            "malformed Any payload: {}",
            e
        ))),
    }
}

// ==================== Field extraction helpers ====================

fn get_i64(message: &DynamicMessage, field_name: &str) -> Option<i64> {
    let field = message.descriptor().get_field_by_name(field_name)?;
    match message.get_field(&field).as_ref() {
        PbValue::I64(v) => Some(*v),
        PbValue::I32(v) => Some(*v as i64),
        _ => None,
    }
}

fn get_i32(message: &DynamicMessage, field_name: &str) -> Option<i32> {
    let field = message.descriptor().get_field_by_name(field_name)?;
    match message.get_field(&field).as_ref() {
        PbValue::I32(v) => Some(*v),
        PbValue::I64(v) => Some(*v as i32),
        _ => None,
    }
}

fn get_u64(message: &DynamicMessage, field_name: &str) -> Option<u64> {
    let field = message.descriptor().get_field_by_name(field_name)?;
    match message.get_field(&field).as_ref() {
        PbValue::U64(v) => Some(*v),
        PbValue::U32(v) => Some(*v as u64),
        _ => None,
    }
}

fn get_f64(message: &DynamicMessage, field_name: &str) -> Option<f64> {
    let field = message.descriptor().get_field_by_name(field_name)?;
    match message.get_field(&field).as_ref() {
        PbValue::F64(v) => Some(*v),
        PbValue::F32(v) => Some(*v as f64),
        _ => None,
    }
}

fn get_bool(message: &DynamicMessage, field_name: &str) -> Option<bool> {
    let field = message.descriptor().get_field_by_name(field_name)?;
    match message.get_field(&field).as_ref() {
        PbValue::Bool(v) => Some(*v),
        _ => None,
    }
}

fn get_string(message: &DynamicMessage, field_name: &str) -> Option<String> {
    let field = message.descriptor().get_field_by_name(field_name)?;
    match message.get_field(&field).as_ref() {
        PbValue::String(v) => Some(v.clone()),
        _ => None,
    }
}

fn get_bytes(message: &DynamicMessage, field_name: &str) -> Option<Vec<u8>> {
    let field = message.descriptor().get_field_by_name(field_name)?;
    match message.get_field(&field).as_ref() {
        PbValue::Bytes(v) => Some(v.to_vec()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolution_follows_container() {
        // Resolution candidates only; an empty pool answers nothing.
        let registry = ProtoRegistry::default();
        assert!(registry.resolve_message("Missing", "a.b.c").is_none());
        assert!(registry.get_message(".absolute.Name").is_none());
    }
}
