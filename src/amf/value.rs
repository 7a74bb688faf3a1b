//! AMF0 value types
//!
//! A single closed enum covers every AMF0 value the RTMP control channel can
//! carry. Objects and ECMA arrays keep their properties in insertion order so
//! that re-encoding a decoded value reproduces the wire bytes exactly.

/// AMF0 value representation
#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    /// IEEE 754 double (marker 0x00)
    Number(f64),

    /// Integer-valued number. AMF0 has no integer type on the wire; this
    /// variant exists for encoder dispatch only and emits the same marker
    /// 0x00 double bytes as [`Amf0Value::Number`].
    Integer(i64),

    /// Boolean (marker 0x01)
    Boolean(bool),

    /// UTF-8 string (marker 0x02, or 0x0C when longer than 65535 bytes)
    String(String),

    /// Key-value object, properties in insertion order (marker 0x03)
    Object(Vec<(String, Amf0Value)>),

    /// Null (marker 0x05)
    Null,

    /// Undefined (marker 0x06)
    Undefined,

    /// Reference index into the decode-side object table (marker 0x07).
    /// Only the index is carried; no reference table is maintained.
    Reference(u16),

    /// ECMA array: same property encoding as an object plus an advisory
    /// 32-bit count (marker 0x08)
    EcmaArray(Vec<(String, Amf0Value)>),

    /// Dense array with an authoritative 32-bit count (marker 0x0A)
    StrictArray(Vec<Amf0Value>),

    /// Date as milliseconds since the Unix epoch; the 16-bit timezone field
    /// is ignored on decode and written as zero on encode (marker 0x0B)
    Date(f64),

    /// XML document, same shape as a string (marker 0x0F)
    XmlDocument(String),

    /// Object with a class-name tag (marker 0x10). Decode only: encoding a
    /// typed object always fails.
    TypedObject {
        class_name: String,
        properties: Vec<(String, Amf0Value)>,
    },
}

impl Amf0Value {
    /// Try to get this value as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf0Value::String(s) => Some(s),
            Amf0Value::XmlDocument(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Amf0Value::Number(n) => Some(*n),
            Amf0Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Amf0Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value's properties (objects, ECMA arrays, typed objects)
    pub fn as_object(&self) -> Option<&[(String, Amf0Value)]> {
        match self {
            Amf0Value::Object(props) => Some(props),
            Amf0Value::EcmaArray(props) => Some(props),
            Amf0Value::TypedObject { properties, .. } => Some(properties),
            _ => None,
        }
    }

    /// Check if this value is null or undefined
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Amf0Value::Null | Amf0Value::Undefined)
    }

    /// Get a property from an object-like value
    pub fn get(&self, key: &str) -> Option<&Amf0Value> {
        self.as_object()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Get a string property from an object-like value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Get a number property from an object-like value
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }
}

impl Default for Amf0Value {
    fn default() -> Self {
        Amf0Value::Null
    }
}

impl From<bool> for Amf0Value {
    fn from(v: bool) -> Self {
        Amf0Value::Boolean(v)
    }
}

impl From<f64> for Amf0Value {
    fn from(v: f64) -> Self {
        Amf0Value::Number(v)
    }
}

impl From<i64> for Amf0Value {
    fn from(v: i64) -> Self {
        Amf0Value::Integer(v)
    }
}

impl From<u32> for Amf0Value {
    fn from(v: u32) -> Self {
        Amf0Value::Integer(v as i64)
    }
}

impl From<String> for Amf0Value {
    fn from(v: String) -> Self {
        Amf0Value::String(v)
    }
}

impl From<&str> for Amf0Value {
    fn from(v: &str) -> Self {
        Amf0Value::String(v.to_string())
    }
}
