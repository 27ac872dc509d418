//! Document value model.
//!
//! A [`Document`] is an ordered mapping from field name to [`Value`]. Plain JSON
//! shapes map directly onto `Value` variants, while database-native types that
//! JSON cannot express (identifiers, dates, binary payloads, ...) live in the
//! [`Scalar`] variant and are written through the Extended JSON codec in
//! [`crate::extjson`].

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// A dynamically typed document value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// JSON `null`
    Null,
    /// Boolean value
    Bool(bool),
    /// Plain JSON number; keeps the integer/float distinction of its text form
    Number(serde_json::Number),
    /// UTF-8 string
    String(String),
    /// Ordered sequence of values
    Array(Vec<Value>),
    /// Nested document
    Object(Document),
    /// Extended scalar type
    Scalar(Scalar),
}

/// Database-native scalar types that need a tagged text encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// 12-byte unique identifier
    ObjectId(ObjectId),
    /// Milliseconds since the Unix epoch, UTC
    DateTime(i64),
    /// Binary payload with its subtype byte
    Binary {
        /// Binary subtype (0x00 generic, 0x04 UUID, ...)
        subtype: u8,
        /// Raw bytes
        bytes: Vec<u8>,
    },
    /// Regular expression with its option flags.
    ///
    /// Options are written in sorted order, so a value built with unsorted
    /// flags reads back sorted. Build it with [`Scalar::regex`] to keep
    /// round trips exact.
    Regex {
        /// Pattern source
        pattern: String,
        /// Option flags, one character each
        options: String,
    },
    /// Explicit 64-bit integer
    Int64(i64),
    /// 128-bit decimal kept in its textual form
    Decimal(String),
}

impl Scalar {
    /// Regular expression with its option flags sorted.
    pub fn regex(pattern: impl Into<String>, options: &str) -> Self {
        Scalar::Regex {
            pattern: pattern.into(),
            options: sorted_flags(options),
        }
    }

    /// Short name of the scalar kind, used in log and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Scalar::ObjectId(_) => "objectId",
            Scalar::DateTime(_) => "date",
            Scalar::Binary { .. } => "binary",
            Scalar::Regex { .. } => "regex",
            Scalar::Int64(_) => "int64",
            Scalar::Decimal(_) => "decimal",
        }
    }
}

pub(crate) fn sorted_flags(options: &str) -> String {
    let mut flags: Vec<char> = options.chars().collect();
    flags.sort_unstable();
    flags.into_iter().collect()
}

/// A 12-byte document identifier: 4-byte big-endian seconds, 5 random bytes,
/// 3-byte big-endian counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

static OID_COUNTER: AtomicU32 = AtomicU32::new(0);

impl ObjectId {
    /// Wraps raw identifier bytes.
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh identifier from the current time, random bytes and a
    /// process-wide counter.
    pub fn generate() -> Self {
        let secs = chrono::Utc::now().timestamp() as u32;
        let random: [u8; 5] = rand::random();
        let count = OID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&random);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
        Self(bytes)
    }

    /// Parses a 24-digit hexadecimal identifier. Returns `None` for any other
    /// input.
    pub fn parse_hex(hex: &str) -> Option<Self> {
        if hex.len() != 24 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    /// Raw identifier bytes.
    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Lowercase hexadecimal form.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

/// An ordered mapping from field name to value.
///
/// Field order is significant and preserved: two documents with the same fields
/// in a different order compare unequal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Sets `key` to `value`, replacing an existing value in place or appending
    /// a new field. Returns the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((key, value));
                None
            }
        }
    }

    /// Inserts a field at the front of the document, as stores do for a
    /// generated `_id`.
    pub fn insert_first(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        self.fields.retain(|(k, _)| *k != key);
        self.fields.insert(0, (key, value.into()));
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null)
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

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Object(v)
    }
}

impl From<Scalar> for Value {
    fn from(v: Scalar) -> Self {
        Value::Scalar(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::Scalar(Scalar::ObjectId(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regex_options_are_sorted() {
        assert_eq!(
            Scalar::regex("^a", "xmi"),
            Scalar::Regex {
                pattern: "^a".to_string(),
                options: "imx".to_string(),
            }
        );
    }

    #[test]
    fn test_object_id_hex_round_trip() {
        let oid = ObjectId::parse_hex("507f1f77bcf86cd799439011").unwrap();
        assert_eq!(oid.to_hex(), "507f1f77bcf86cd799439011");
        assert_eq!(oid.bytes()[0], 0x50);
    }

    #[test]
    fn test_object_id_rejects_bad_hex() {
        assert!(ObjectId::parse_hex("507f1f77bcf86cd79943901").is_none());
        assert!(ObjectId::parse_hex("zz7f1f77bcf86cd799439011").is_none());
        assert!(ObjectId::parse_hex("").is_none());
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = ObjectId::generate();
        let b = ObjectId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_document_preserves_field_order() {
        let mut doc = Document::new();
        doc.insert("b", 1);
        doc.insert("a", 2);
        doc.insert("b", 3);
        let keys: Vec<&str> = doc.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(doc.get("b"), Some(&Value::from(3)));

        doc.insert_first("_id", ObjectId::generate());
        assert_eq!(doc.iter().next().map(|(k, _)| k), Some("_id"));
        assert_eq!(doc.len(), 3);
    }
}
