use crate::hex::encode_hex;
use indexmap::IndexMap;
use std::fmt;

/// Declared byte order of a byte-sequence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Network,
    Big,
    Little,
    Native,
}

impl ByteOrder {
    /// Network order is big-endian by definition; native resolves at
    /// compile time.
    pub fn is_big(self) -> bool {
        match self {
            ByteOrder::Big | ByteOrder::Network => true,
            ByteOrder::Little => false,
            ByteOrder::Native => cfg!(target_endian = "big"),
        }
    }
}

/// A C-like enumeration whose variants are statically listable, so a
/// default name can be computed from the underlying integer.
///
/// Name lookup is case-insensitive, matching the loose matching the bus
/// applies to configuration strings.
pub trait NamedEnum: Copy + Sized + 'static {
    fn entries() -> &'static [(Self, &'static str)];

    fn value(self) -> i64;

    fn name(self) -> Option<&'static str> {
        Self::name_of(self.value())
    }

    fn name_of(value: i64) -> Option<&'static str> {
        Self::entries()
            .iter()
            .find(|(e, _)| e.value() == value)
            .map(|(_, n)| *n)
    }

    fn from_value(value: i64) -> Option<Self> {
        Self::entries()
            .iter()
            .find(|(e, _)| e.value() == value)
            .map(|(e, _)| *e)
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::entries()
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(e, _)| *e)
    }
}

/// Declare a C-like enum together with its [`NamedEnum`] entry table.
#[macro_export]
macro_rules! named_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident : $repr:ty {
        $($(#[$vmeta:meta])* $variant:ident = $val:expr),+ $(,)?
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $val),+
        }

        impl $crate::NamedEnum for $name {
            fn entries() -> &'static [(Self, &'static str)] {
                &[$(($name::$variant, stringify!($variant))),+]
            }

            fn value(self) -> i64 {
                self as i64
            }
        }
    };
}

/// The polymorphic container that is the common currency for every message
/// payload and configuration value on the bus.
///
/// Exactly one variant is held at a time. Integer and float variants carry
/// their declared bit width, which bounds both storage and any produced
/// encoding. Strings are normalized to UTF-8 regardless of the codepoint
/// width they arrived in. The map variant retains insertion order so that
/// encodings are deterministic.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int {
        bits: u8,
        value: i128,
    },
    UInt {
        bits: u8,
        value: u128,
    },
    Float {
        bits: u8,
        value: f64,
    },
    String(String),
    Bytes {
        order: ByteOrder,
        data: Vec<u8>,
    },
    Enum {
        value: i64,
        name: Option<String>,
    },
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
}

static NULL: Value = Value::Null;

fn mask_signed(bits: u8, value: i128) -> i128 {
    if bits == 0 || bits >= 128 {
        return value;
    }
    // Sign-extend from the declared width.
    let shift = 128 - bits as u32;
    (value << shift) >> shift
}

fn mask_unsigned(bits: u8, value: u128) -> u128 {
    if bits == 0 || bits >= 128 {
        return value;
    }
    value & ((1u128 << bits) - 1)
}

impl Value {
    /// A signed integer constrained to the given bit width; out-of-range
    /// input is truncated to the two's-complement value of that width.
    pub fn int_with_bits(bits: u8, value: i128) -> Self {
        let bits = bits.clamp(1, 128);
        Value::Int {
            bits,
            value: mask_signed(bits, value),
        }
    }

    /// An unsigned integer constrained to the given bit width.
    pub fn uint_with_bits(bits: u8, value: u128) -> Self {
        let bits = bits.clamp(1, 128);
        Value::UInt {
            bits,
            value: mask_unsigned(bits, value),
        }
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Value::Bytes {
            order: ByteOrder::Network,
            data: data.into(),
        }
    }

    pub fn bytes_with_order(order: ByteOrder, data: impl Into<Vec<u8>>) -> Self {
        Value::Bytes {
            order,
            data: data.into(),
        }
    }

    /// An enum value with an explicit name.
    pub fn enumerated(value: i64, name: impl Into<String>) -> Self {
        Value::Enum {
            value,
            name: Some(name.into()),
        }
    }

    /// An enum value of a statically-listable enumeration; the default name
    /// is computed from the integer when the value is known.
    pub fn from_enum<E: NamedEnum>(e: E) -> Self {
        Value::Enum {
            value: e.value(),
            name: e.name().map(str::to_string),
        }
    }

    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    pub fn map() -> Self {
        Value::Map(IndexMap::new())
    }

    /// Parse a boundary string into the most specific typed value: bool,
    /// integer, float, else the string itself. Configuration values coming
    /// from URL query parameters pass through here.
    pub fn from_str_guess(s: &str) -> Self {
        let t = s.trim();
        if t.eq_ignore_ascii_case("true") {
            return Value::Bool(true);
        }
        if t.eq_ignore_ascii_case("false") {
            return Value::Bool(false);
        }
        if t.eq_ignore_ascii_case("null") || t.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = t.parse::<i64>() {
            return Value::from(i);
        }
        if let Ok(u) = t.parse::<u64>() {
            return Value::from(u);
        }
        if let Ok(f) = t.parse::<f64>() {
            return Value::Float {
                bits: 64,
                value: f,
            };
        }
        Value::String(s.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Element count for containers, string length in characters, byte
    /// count for byte sequences; scalars count as one, null as zero.
    pub fn len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Array(a) => a.len(),
            Value::Map(m) => m.len(),
            Value::String(s) => s.chars().count(),
            Value::Bytes { data, .. } => data.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only map lookup. An absent key yields null and the container is
    /// never mutated.
    pub fn get(&self, key: &str) -> &Value {
        match self {
            Value::Map(m) => m.get(key).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    /// Read-only array index. Out-of-range yields null.
    pub fn at(&self, index: usize) -> &Value {
        match self {
            Value::Array(a) => a.get(index).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    /// Mutable map access. Rewrites this value to a map if it is not one,
    /// discarding the old content, and inserts a null entry for a missing
    /// key.
    pub fn get_mut(&mut self, key: &str) -> &mut Value {
        if !self.is_map() {
            *self = Value::map();
        }
        match self {
            Value::Map(m) => m.entry(key.to_string()).or_insert(Value::Null),
            _ => unreachable!(),
        }
    }

    /// Mutable array access. Rewrites this value to an array if it is not
    /// one, then grows with nulls so the index exists.
    pub fn at_mut(&mut self, index: usize) -> &mut Value {
        if !self.is_array() {
            *self = Value::array();
        }
        match self {
            Value::Array(a) => {
                if a.len() <= index {
                    a.resize(index + 1, Value::Null);
                }
                &mut a[index]
            }
            _ => unreachable!(),
        }
    }

    /// Append to an array, rewriting this value to an array first if
    /// necessary.
    pub fn push(&mut self, value: impl Into<Value>) {
        if !self.is_array() {
            *self = Value::array();
        }
        if let Value::Array(a) = self {
            a.push(value.into());
        }
    }

    /// Insert into a map, rewriting this value to a map first if necessary.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if !self.is_map() {
            *self = Value::map();
        }
        if let Value::Map(m) = self {
            m.insert(key.into(), value.into());
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        match self {
            Value::Map(m) => Some(m.keys().map(String::as_str)),
            _ => None,
        }
        .into_iter()
        .flatten()
    }

    pub fn items(&self) -> impl Iterator<Item = &Value> {
        match self {
            Value::Array(a) => Some(a.iter()),
            _ => None,
        }
        .into_iter()
        .flatten()
    }

    /// Bool conversion: null is false, numbers by non-zero, strings by
    /// content ("true"/"false" or numeric), containers by non-emptiness.
    /// Never fails.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int { value, .. } => *value != 0,
            Value::UInt { value, .. } => *value != 0,
            Value::Float { value, .. } => *value != 0.0,
            Value::Enum { value, .. } => *value != 0,
            Value::String(s) => {
                let t = s.trim();
                if t.eq_ignore_ascii_case("true") {
                    true
                } else if t.eq_ignore_ascii_case("false") {
                    false
                } else if let Ok(n) = t.parse::<f64>() {
                    n != 0.0
                } else {
                    !t.is_empty()
                }
            }
            Value::Bytes { data, .. } => !data.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Integer conversion: null is 0, containers yield their element count,
    /// bad conversions yield 0. Never fails.
    pub fn to_int(&self) -> i64 {
        match self {
            Value::Null => 0,
            Value::Bool(b) => *b as i64,
            Value::Int { value, .. } => *value as i64,
            Value::UInt { value, .. } => *value as i64,
            Value::Float { value, .. } => *value as i64,
            Value::Enum { value, .. } => *value,
            Value::String(s) => {
                let t = s.trim();
                t.parse::<i64>()
                    .ok()
                    .or_else(|| t.parse::<f64>().ok().map(|f| f as i64))
                    .unwrap_or(0)
            }
            Value::Bytes { data, .. } => data.len() as i64,
            Value::Array(a) => a.len() as i64,
            Value::Map(m) => m.len() as i64,
        }
    }

    pub fn to_uint(&self) -> u64 {
        match self {
            Value::UInt { value, .. } => *value as u64,
            _ => self.to_int().max(0) as u64,
        }
    }

    pub fn to_float(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => *b as i64 as f64,
            Value::Int { value, .. } => *value as f64,
            Value::UInt { value, .. } => *value as f64,
            Value::Float { value, .. } => *value,
            Value::Enum { value, .. } => *value as f64,
            Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            Value::Bytes { data, .. } => data.len() as f64,
            Value::Array(a) => a.len() as f64,
            Value::Map(m) => m.len() as f64,
        }
    }

    /// String conversion: null renders as "null", enums by name when one is
    /// known, bytes as hex. Containers render in a compact JSON-like shape
    /// for diagnostics. Never fails.
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes { data, .. } => Some(data),
            _ => None,
        }
    }

    /// The enum name when one is held, otherwise the stringified number.
    pub fn enum_name(&self) -> Option<String> {
        match self {
            Value::Enum { value, name } => Some(
                name.clone()
                    .unwrap_or_else(|| value.to_string()),
            ),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int { value, .. } => write!(f, "{}", value),
            Value::UInt { value, .. } => write!(f, "{}", value),
            Value::Float { value, .. } => write!(f, "{}", value),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes { data, .. } => write!(f, "{}", encode_hex(data)),
            Value::Enum { value, name } => match name {
                Some(n) => write!(f, "{}", n),
                None => write!(f, "{}", value),
            },
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match v {
                        Value::String(s) => write!(f, "\"{}\"", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match v {
                        Value::String(s) => write!(f, "\"{}\":\"{}\"", k, s)?,
                        other => write!(f, "\"{}\":{}", k, other)?,
                    }
                }
                write!(f, "}}")
            }
        }
    }
}

// Equality is structural, with numeric variants comparing by value so that
// a codec round-trip which widens a 10-bit integer to 64 bits still
// compares equal. Enums compare to integers by the underlying value; the
// name is advisory.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Bytes { data: a, .. }, Bytes { data: b, .. }) => a == b,
            (Array(a), Array(b)) => a == b,
            (Map(a), Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map_or(false, |o| v == o))
            }
            (Float { value: a, .. }, Float { value: b, .. }) => a == b,
            (a, b) => match (a.as_integer(), b.as_integer()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl Value {
    /// The exact integer held by an integral variant, if any.
    fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Int { value, .. } => Some(*value),
            Value::UInt { value, .. } => i128::try_from(*value).ok(),
            Value::Enum { value, .. } => Some(*value as i128),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! value_from_int {
    ($($t:ty => $bits:expr),+ $(,)?) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int { bits: $bits, value: v as i128 }
            }
        })+
    };
}

macro_rules! value_from_uint {
    ($($t:ty => $bits:expr),+ $(,)?) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::UInt { bits: $bits, value: v as u128 }
            }
        })+
    };
}

value_from_int!(i8 => 8, i16 => 16, i32 => 32, i64 => 64, i128 => 128);
value_from_uint!(u8 => 8, u16 => 16, u32 => 32, u64 => 64, u128 => 128);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float {
            bits: 32,
            value: v as f64,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float {
            bits: 64,
            value: v,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::bytes(v.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(x) => x.into(),
            None => Value::Null,
        }
    }
}
