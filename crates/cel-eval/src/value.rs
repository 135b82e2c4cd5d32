//! Runtime values for CEL evaluation.
//!
//! `Value` is a closed tagged union covering every CEL runtime value.
//! Equality is heterogeneous: comparing values of different kinds yields
//! `false` rather than an error, except across the numeric tower where
//! values compare mathematically.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::EvalError;
use crate::numeric;
use crate::proto::{EnumValue, ProtoMessage};

/// A CEL runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    /// Unicode string (Arc for cheap cloning).
    String(Arc<str>),
    /// Byte sequence (Arc for cheap cloning).
    Bytes(Arc<[u8]>),
    /// Ordered, heterogeneous list.
    List(Arc<[Value]>),
    /// Keyed collection; see [`ValueMap`] for key semantics.
    Map(Arc<ValueMap>),
    /// Protobuf message backed by a descriptor.
    Message(ProtoMessage),
    /// Named enum value (strong enum mode; legacy mode yields `Int`).
    Enum(EnumValue),
    /// Timestamp (seconds and nanos since the Unix epoch).
    Timestamp(Timestamp),
    /// Duration (seconds and nanos).
    Duration(Duration),
    /// A CEL type reified as a value.
    Type(TypeValue),
    /// Present-or-absent wrapper from the optionals extension.
    Optional(OptionalValue),
    /// Propagating evaluation failure. Not user-constructible.
    Error(Arc<EvalError>),
}

/// Value kinds, used as dispatch signatures for overload resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Bool,
    Int,
    UInt,
    Double,
    String,
    Bytes,
    List,
    Map,
    Message,
    Enum,
    Timestamp,
    Duration,
    Type,
    Optional,
    Error,
    /// Wildcard matching any runtime kind.
    Dyn,
}

/// A CEL timestamp. Valid timestamps lie between years 0001 and 9999.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Nanoseconds, 0..=999_999_999.
    pub nanos: i32,
}

/// Seconds from the epoch to 0001-01-01T00:00:00Z.
pub const TIMESTAMP_MIN_SECONDS: i64 = -62_135_596_800;
/// Seconds from the epoch to 9999-12-31T23:59:59Z.
pub const TIMESTAMP_MAX_SECONDS: i64 = 253_402_300_799;
/// Durations are limited to roughly +/-10000 years.
pub const DURATION_MAX_SECONDS: i64 = 315_576_000_000;

impl Timestamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    pub fn from_seconds(seconds: i64) -> Self {
        Self { seconds, nanos: 0 }
    }

    pub fn is_valid(&self) -> bool {
        (TIMESTAMP_MIN_SECONDS..=TIMESTAMP_MAX_SECONDS).contains(&self.seconds)
            && (0..=999_999_999).contains(&self.nanos)
    }
}

/// A CEL duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration {
    pub seconds: i64,
    /// Nanoseconds; negative durations carry nanos in -999_999_999..=0.
    pub nanos: i32,
}

impl Duration {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    pub fn from_seconds(seconds: i64) -> Self {
        Self { seconds, nanos: 0 }
    }

    pub fn from_nanos(total: i128) -> Option<Self> {
        let seconds = i64::try_from(total / 1_000_000_000).ok()?;
        let nanos = (total % 1_000_000_000) as i32;
        let d = Self { seconds, nanos };
        d.is_valid().then_some(d)
    }

    pub fn to_nanos(&self) -> i128 {
        self.seconds as i128 * 1_000_000_000 + self.nanos as i128
    }

    pub fn is_valid(&self) -> bool {
        self.seconds.abs() <= DURATION_MAX_SECONDS && self.nanos.abs() < 1_000_000_000
    }
}

/// Runtime representation of a CEL type, produced by `type()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeValue {
    pub name: Arc<str>,
}

impl TypeValue {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }
}

/// A CEL optional value.
#[derive(Debug, Clone)]
pub enum OptionalValue {
    None,
    Some(Box<Value>),
}

impl OptionalValue {
    pub fn none() -> Self {
        OptionalValue::None
    }

    pub fn some(value: Value) -> Self {
        OptionalValue::Some(Box::new(value))
    }

    pub fn is_present(&self) -> bool {
        matches!(self, OptionalValue::Some(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            OptionalValue::None => None,
            OptionalValue::Some(v) => Some(v),
        }
    }
}

/// A map key. CEL permits bool, int, uint, and string keys; int and uint
/// keys unify by numeric value so that `{0: x}` and `0u` address the same
/// entry, per heterogeneous equality.
#[derive(Debug, Clone)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    UInt(u64),
    String(Arc<str>),
}

impl MapKey {
    fn rank(&self) -> u8 {
        match self {
            MapKey::Bool(_) => 0,
            MapKey::Int(_) | MapKey::UInt(_) => 1,
            MapKey::String(_) => 2,
        }
    }

    fn numeric(&self) -> i128 {
        match self {
            MapKey::Int(i) => *i as i128,
            MapKey::UInt(u) => *u as i128,
            _ => unreachable!("numeric() called on non-numeric key"),
        }
    }

    /// Key for inserting into a map literal. Only the four declared key
    /// kinds are accepted.
    pub fn for_insert(value: &Value) -> Result<Self, EvalError> {
        match value {
            Value::Bool(b) => Ok(MapKey::Bool(*b)),
            Value::Int(i) => Ok(MapKey::Int(*i)),
            Value::UInt(u) => Ok(MapKey::UInt(*u)),
            Value::String(s) => Ok(MapKey::String(s.clone())),
            other => Err(EvalError::new(
                crate::error::EvalErrorKind::NoMatchingOverload,
                format!("unsupported map key type: {}", other.type_name()),
            )),
        }
    }

    /// Key for lookups. Integral doubles coerce to their numeric key so that
    /// `{1: 'a'}[1.0]` resolves; anything else is `None` (treated as a
    /// missing key by the caller).
    pub fn for_lookup(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            Value::Int(i) => Some(MapKey::Int(*i)),
            Value::UInt(u) => Some(MapKey::UInt(*u)),
            Value::String(s) => Some(MapKey::String(s.clone())),
            Value::Double(d) => {
                let n = numeric::double_as_integer(*d)?;
                if n >= 0 && n <= u64::MAX as i128 {
                    Some(MapKey::UInt(n as u64))
                } else {
                    Some(MapKey::Int(n as i64))
                }
            }
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Bool(b) => Value::Bool(*b),
            MapKey::Int(i) => Value::Int(*i),
            MapKey::UInt(u) => Value::UInt(*u),
            MapKey::String(s) => Value::String(s.clone()),
        }
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MapKey {}

impl PartialOrd for MapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.rank().cmp(&other.rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (MapKey::Bool(a), MapKey::Bool(b)) => a.cmp(b),
            (MapKey::String(a), MapKey::String(b)) => a.cmp(b),
            _ => self.numeric().cmp(&other.numeric()),
        }
    }
}

/// A CEL map. Backed by a BTreeMap so that enumeration order is
/// deterministic for a given literal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueMap {
    entries: BTreeMap<MapKey, Value>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &MapKey) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: MapKey, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    pub fn contains_key(&self, key: &MapKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }
}

impl FromIterator<(MapKey, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (MapKey, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// ==================== Constructors ====================

impl Value {
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn bytes(b: impl Into<Arc<[u8]>>) -> Self {
        Value::Bytes(b.into())
    }

    pub fn list(elements: impl Into<Arc<[Value]>>) -> Self {
        Value::List(elements.into())
    }

    pub fn map(entries: impl IntoIterator<Item = (MapKey, Value)>) -> Self {
        Value::Map(Arc::new(entries.into_iter().collect()))
    }

    pub fn timestamp(seconds: i64, nanos: i32) -> Self {
        Value::Timestamp(Timestamp::new(seconds, nanos))
    }

    pub fn duration(seconds: i64, nanos: i32) -> Self {
        Value::Duration(Duration::new(seconds, nanos))
    }

    pub fn optional_none() -> Self {
        Value::Optional(OptionalValue::None)
    }

    pub fn optional_some(value: Value) -> Self {
        Value::Optional(OptionalValue::some(value))
    }

    pub fn error(err: impl Into<EvalError>) -> Self {
        Value::Error(Arc::new(err.into()))
    }
}

// ==================== Kind & type information ====================

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::UInt(_) => Kind::UInt,
            Value::Double(_) => Kind::Double,
            Value::String(_) => Kind::String,
            Value::Bytes(_) => Kind::Bytes,
            Value::List(_) => Kind::List,
            Value::Map(_) => Kind::Map,
            Value::Message(_) => Kind::Message,
            Value::Enum(_) => Kind::Enum,
            Value::Timestamp(_) => Kind::Timestamp,
            Value::Duration(_) => Kind::Duration,
            Value::Type(_) => Kind::Type,
            Value::Optional(_) => Kind::Optional,
            Value::Error(_) => Kind::Error,
        }
    }

    /// The CEL type name of this value, as surfaced by `type()` and in
    /// diagnostics.
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null_type".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::UInt(_) => "uint".to_string(),
            Value::Double(_) => "double".to_string(),
            Value::String(_) => "string".to_string(),
            Value::Bytes(_) => "bytes".to_string(),
            Value::List(_) => "list".to_string(),
            Value::Map(_) => "map".to_string(),
            Value::Message(m) => m.type_name().to_string(),
            Value::Enum(e) => e.type_name.to_string(),
            Value::Timestamp(_) => "google.protobuf.Timestamp".to_string(),
            Value::Duration(_) => "google.protobuf.Duration".to_string(),
            Value::Type(_) => "type".to_string(),
            Value::Optional(_) => "optional_type".to_string(),
            Value::Error(_) => "error".to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::UInt(_) | Value::Double(_))
    }

    pub fn as_error(&self) -> Option<&EvalError> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }
}

// ==================== Accessors ====================

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_optional(&self) -> Option<&OptionalValue> {
        match self {
            Value::Optional(o) => Some(o),
            _ => None,
        }
    }
}

// ==================== Heterogeneous equality & ordering ====================

impl Value {
    /// CEL equality: cross-kind comparisons are `false` unless both sides
    /// are numeric, in which case mathematical value decides. `NaN` is
    /// unequal to everything including itself.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, val_a)| {
                        b.get(key).is_some_and(|val_b| val_a.equals(val_b))
                    })
            }
            (Value::Message(a), Value::Message(b)) => a.equals(b),
            (Value::Enum(a), Value::Enum(b)) => a.type_name == b.type_name && a.value == b.value,
            // Enum values are integers underneath; compare numerically
            // against bare ints for legacy interop.
            (Value::Enum(e), Value::Int(i)) | (Value::Int(i), Value::Enum(e)) => {
                e.value as i64 == *i
            }
            (Value::Optional(a), Value::Optional(b)) => match (a, b) {
                (OptionalValue::None, OptionalValue::None) => true,
                (OptionalValue::Some(x), OptionalValue::Some(y)) => x.equals(y),
                _ => false,
            },
            _ if self.is_numeric() && other.is_numeric() => {
                self.compare(other) == Some(Ordering::Equal)
            }
            _ => false,
        }
    }

    /// CEL ordering. `Some` for comparable pairs, `None` otherwise. A
    /// numeric pair involving NaN is `None`; the evaluator turns that into
    /// `false` for every relation rather than an error.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::UInt(a), Value::UInt(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => {
                Some((a.seconds, a.nanos).cmp(&(b.seconds, b.nanos)))
            }
            (Value::Duration(a), Value::Duration(b)) => {
                Some((a.seconds, a.nanos).cmp(&(b.seconds, b.nanos)))
            }
            (Value::Int(a), Value::UInt(b)) => Some(numeric::compare_int_uint(*a, *b)),
            (Value::UInt(a), Value::Int(b)) => {
                Some(numeric::compare_int_uint(*b, *a).reverse())
            }
            (Value::Int(a), Value::Double(b)) => numeric::compare_int_double(*a, *b),
            (Value::Double(a), Value::Int(b)) => {
                numeric::compare_int_double(*b, *a).map(Ordering::reverse)
            }
            (Value::UInt(a), Value::Double(b)) => numeric::compare_uint_double(*a, *b),
            (Value::Double(a), Value::UInt(b)) => {
                numeric::compare_uint_double(*b, *a).map(Ordering::reverse)
            }
            _ => None,
        }
    }
}

/// Strict structural equality, mainly for tests and internal bookkeeping.
/// CEL's `==` is [`Value::equals`].
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Message(a), Value::Message(b)) => a.equals(b),
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Optional(a), Value::Optional(b)) => match (a, b) {
                (OptionalValue::None, OptionalValue::None) => true,
                (OptionalValue::Some(x), OptionalValue::Some(y)) => x == y,
                _ => false,
            },
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

// ==================== Conversions from Rust types ====================

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v.as_str()))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Arc::from(v))
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(Arc::from(v))
    }
}

// ==================== Display ====================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}u", v),
            Value::Double(v) => {
                if v.is_nan() {
                    write!(f, "NaN")
                } else if v.is_infinite() {
                    write!(f, "{}Inf", if v.is_sign_positive() { "+" } else { "-" })
                } else if v.fract() == 0.0 && v.abs() < 1e15 {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Value::String(v) => write!(f, "\"{}\"", v),
            Value::Bytes(v) => write!(f, "b\"{}\"", String::from_utf8_lossy(v)),
            Value::List(v) => {
                write!(f, "[")?;
                for (i, elem) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", elem)?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (key, value)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key.to_value(), value)?;
                }
                write!(f, "}}")
            }
            Value::Message(m) => write!(f, "{}{{...}}", m.type_name()),
            Value::Enum(e) => write!(f, "{}({})", e.type_name, e.value),
            Value::Timestamp(t) => write!(f, "timestamp({}s)", t.seconds),
            Value::Duration(d) => write!(f, "duration({}s)", d.seconds),
            Value::Type(t) => write!(f, "{}", t.name),
            Value::Optional(o) => match o {
                OptionalValue::None => write!(f, "optional.none()"),
                OptionalValue::Some(v) => write!(f, "optional.of({})", v),
            },
            Value::Error(e) => write!(f, "error({})", e),
        }
    }
}
