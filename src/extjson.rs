//! Extended JSON codec.
//!
//! Maps [`Value`] to and from a JSON text form in which every extended scalar
//! is a single-purpose tagged object:
//!
//! | Scalar | Canonical | Relaxed |
//! |--------|-----------|---------|
//! | `ObjectId` | `{"$oid": "<24 hex>"}` | same |
//! | `DateTime` | `{"$date": {"$numberLong": "<ms>"}}` | `{"$date": "<RFC 3339>"}` for years 1970..=9999 |
//! | `Binary` | `{"$binary": {"base64": "..", "subType": "00"}}` | same |
//! | `Regex` | `{"$regularExpression": {"pattern": "..", "options": ".."}}` | same |
//! | `Int64` | `{"$numberLong": "<i64>"}` | plain number |
//! | `Decimal` | `{"$numberDecimal": ".."}` | same |
//!
//! Plain strings are always JSON strings, so a string that happens to look like
//! an identifier never decodes as one. Objects are different: a stored object
//! whose exact shape is a tag, such as `{"$oid": "<24 hex>"}`, cannot be told
//! apart from the scalar and decodes as one. Objects with any extra key stay
//! plain objects.
//!
//! Decoding comes in two flavours. Strict decoding rejects a recognised tag with
//! a malformed payload. Lenient decoding keeps such an object as a plain
//! structural value, which lets archives written by other encoders import
//! without losing the collection.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value as Json};
use tracing::debug;

use crate::error::ExtJsonError;
use crate::value::{sorted_flags, Document, ObjectId, Scalar, Value};

/// Last millisecond of year 9999, the upper bound for relaxed date strings.
const MAX_RELAXED_DATE_MS: i64 = 253_402_300_799_999;

/// Output flavour of the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtJsonMode {
    /// Every extended scalar keeps its type tag.
    #[default]
    Canonical,
    /// Human-friendlier dates and untagged 64-bit integers.
    Relaxed,
}

impl ExtJsonMode {
    /// Format tag recorded in the backup manifest.
    pub fn format_tag(&self) -> &'static str {
        match self {
            ExtJsonMode::Canonical => "extended-json/canonical",
            ExtJsonMode::Relaxed => "extended-json/relaxed",
        }
    }
}

/// Encodes a value.
pub fn to_json(value: &Value, mode: ExtJsonMode) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::Number(n.clone()),
        Value::String(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(items.iter().map(|v| to_json(v, mode)).collect()),
        Value::Object(doc) => document_to_json(doc, mode),
        Value::Scalar(scalar) => scalar_to_json(scalar, mode),
    }
}

/// Encodes a document as a JSON object, preserving field order.
pub fn document_to_json(doc: &Document, mode: ExtJsonMode) -> Json {
    let map: Map<String, Json> = doc
        .iter()
        .map(|(k, v)| (k.to_string(), to_json(v, mode)))
        .collect();
    Json::Object(map)
}

fn tagged(tag: &str, payload: Json) -> Json {
    let mut map = Map::new();
    map.insert(tag.to_string(), payload);
    Json::Object(map)
}

fn scalar_to_json(scalar: &Scalar, mode: ExtJsonMode) -> Json {
    match scalar {
        Scalar::ObjectId(oid) => tagged("$oid", Json::String(oid.to_hex())),
        Scalar::DateTime(ms) => {
            let relaxed = mode == ExtJsonMode::Relaxed && (0..=MAX_RELAXED_DATE_MS).contains(ms);
            match DateTime::<Utc>::from_timestamp_millis(*ms) {
                Some(dt) if relaxed => tagged(
                    "$date",
                    Json::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
                ),
                _ => tagged("$date", tagged("$numberLong", Json::String(ms.to_string()))),
            }
        }
        Scalar::Binary { subtype, bytes } => {
            let mut inner = Map::new();
            inner.insert("base64".to_string(), Json::String(BASE64.encode(bytes)));
            inner.insert("subType".to_string(), Json::String(format!("{:02x}", subtype)));
            tagged("$binary", Json::Object(inner))
        }
        Scalar::Regex { pattern, options } => {
            let mut inner = Map::new();
            inner.insert("pattern".to_string(), Json::String(pattern.clone()));
            inner.insert("options".to_string(), Json::String(sorted_flags(options)));
            tagged("$regularExpression", Json::Object(inner))
        }
        Scalar::Int64(n) => match mode {
            ExtJsonMode::Canonical => tagged("$numberLong", Json::String(n.to_string())),
            ExtJsonMode::Relaxed => Json::Number((*n).into()),
        },
        Scalar::Decimal(d) => tagged("$numberDecimal", Json::String(d.clone())),
    }
}

/// Decodes a JSON value. With `strict`, malformed type tags are errors;
/// otherwise they stay plain objects.
pub fn from_json(json: &Json, strict: bool) -> Result<Value, ExtJsonError> {
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => Ok(Value::Number(n.clone())),
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(items) => items
            .iter()
            .map(|v| from_json(v, strict))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Json::Object(map) => {
            if let Some(decoded) = decode_tag(map) {
                match decoded {
                    Ok(value) => return Ok(value),
                    Err(e) if strict => return Err(e),
                    Err(e) => debug!("Keeping malformed tagged value as plain object: {}", e),
                }
            }
            decode_plain_object(map, strict).map(Value::Object)
        }
    }
}

/// Decodes a JSON object into a document. Tagged scalars at the top level are
/// not documents.
pub fn document_from_json(json: &Json, strict: bool) -> Result<Document, ExtJsonError> {
    match json {
        Json::Object(map) => decode_plain_object(map, strict),
        _ => Err(ExtJsonError::NotADocument { index: 0 }),
    }
}

fn decode_plain_object(map: &Map<String, Json>, strict: bool) -> Result<Document, ExtJsonError> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), from_json(v, strict)?)))
        .collect()
}

fn invalid(tag: &'static str, reason: impl Into<String>) -> ExtJsonError {
    ExtJsonError::InvalidTag {
        tag,
        reason: reason.into(),
    }
}

fn expect_str<'a>(tag: &'static str, json: &'a Json) -> Result<&'a str, ExtJsonError> {
    json.as_str()
        .ok_or_else(|| invalid(tag, format!("expected a string, found {}", json)))
}

/// Recognises a tagged object by its exact key set. `None` means the object is
/// not a tag and should be decoded structurally.
fn decode_tag(map: &Map<String, Json>) -> Option<Result<Value, ExtJsonError>> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();

    let value = match keys.as_slice() {
        ["$oid"] => decode_oid(&map["$oid"]),
        ["$date"] => decode_date(&map["$date"]),
        ["$binary"] => decode_binary(&map["$binary"]),
        ["$binary", "$type"] => decode_legacy_binary(&map["$binary"], &map["$type"]),
        ["$regularExpression"] => decode_regex(&map["$regularExpression"]),
        ["$options", "$regex"] => decode_legacy_regex(&map["$regex"], &map["$options"]),
        ["$numberLong"] => decode_number_long(&map["$numberLong"]).map(Scalar::Int64),
        ["$numberDecimal"] => decode_decimal(&map["$numberDecimal"]),
        ["$numberInt"] => return Some(decode_number_int(&map["$numberInt"])),
        ["$numberDouble"] => return Some(decode_number_double(&map["$numberDouble"])),
        _ => return None,
    };
    Some(value.map(Value::Scalar))
}

fn decode_oid(json: &Json) -> Result<Scalar, ExtJsonError> {
    let hex = expect_str("$oid", json)?;
    ObjectId::parse_hex(hex)
        .map(Scalar::ObjectId)
        .ok_or_else(|| invalid("$oid", format!("'{}' is not 24 hex digits", hex)))
}

fn decode_date(json: &Json) -> Result<Scalar, ExtJsonError> {
    match json {
        Json::Object(inner) if inner.len() == 1 && inner.contains_key("$numberLong") => {
            decode_number_long(&inner["$numberLong"]).map(Scalar::DateTime)
        }
        Json::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Scalar::DateTime(dt.timestamp_millis()))
            .map_err(|e| invalid("$date", format!("'{}': {}", s, e))),
        Json::Number(n) => n
            .as_i64()
            .map(Scalar::DateTime)
            .ok_or_else(|| invalid("$date", format!("{} is not an integer", n))),
        other => Err(invalid("$date", format!("unsupported payload {}", other))),
    }
}

fn decode_subtype(tag: &'static str, json: &Json) -> Result<u8, ExtJsonError> {
    let hex = expect_str(tag, json)?;
    if hex.is_empty() || hex.len() > 2 {
        return Err(invalid(tag, format!("subtype '{}' is not one hex byte", hex)));
    }
    u8::from_str_radix(hex, 16).map_err(|e| invalid(tag, format!("subtype '{}': {}", hex, e)))
}

fn decode_base64(tag: &'static str, json: &Json) -> Result<Vec<u8>, ExtJsonError> {
    let text = expect_str(tag, json)?;
    BASE64
        .decode(text)
        .map_err(|e| invalid(tag, format!("bad base64: {}", e)))
}

fn decode_binary(json: &Json) -> Result<Scalar, ExtJsonError> {
    let inner = json
        .as_object()
        .filter(|m| m.len() == 2)
        .ok_or_else(|| invalid("$binary", "expected {base64, subType}"))?;
    let (Some(data), Some(subtype)) = (inner.get("base64"), inner.get("subType")) else {
        return Err(invalid("$binary", "expected {base64, subType}"));
    };
    Ok(Scalar::Binary {
        subtype: decode_subtype("$binary", subtype)?,
        bytes: decode_base64("$binary", data)?,
    })
}

fn decode_legacy_binary(data: &Json, subtype: &Json) -> Result<Scalar, ExtJsonError> {
    Ok(Scalar::Binary {
        subtype: decode_subtype("$type", subtype)?,
        bytes: decode_base64("$binary", data)?,
    })
}

fn decode_regex(json: &Json) -> Result<Scalar, ExtJsonError> {
    let inner = json
        .as_object()
        .filter(|m| m.len() == 2)
        .ok_or_else(|| invalid("$regularExpression", "expected {pattern, options}"))?;
    let (Some(pattern), Some(options)) = (inner.get("pattern"), inner.get("options")) else {
        return Err(invalid("$regularExpression", "expected {pattern, options}"));
    };
    Ok(Scalar::regex(
        expect_str("$regularExpression", pattern)?,
        expect_str("$regularExpression", options)?,
    ))
}

fn decode_legacy_regex(pattern: &Json, options: &Json) -> Result<Scalar, ExtJsonError> {
    Ok(Scalar::regex(
        expect_str("$regex", pattern)?,
        expect_str("$options", options)?,
    ))
}

fn decode_number_long(json: &Json) -> Result<i64, ExtJsonError> {
    let text = expect_str("$numberLong", json)?;
    text.parse::<i64>()
        .map_err(|e| invalid("$numberLong", format!("'{}': {}", text, e)))
}

fn decode_number_int(json: &Json) -> Result<Value, ExtJsonError> {
    let text = expect_str("$numberInt", json)?;
    text.parse::<i32>()
        .map(|n| Value::Number(n.into()))
        .map_err(|e| invalid("$numberInt", format!("'{}': {}", text, e)))
}

fn decode_number_double(json: &Json) -> Result<Value, ExtJsonError> {
    let text = expect_str("$numberDouble", json)?;
    let parsed = text
        .parse::<f64>()
        .map_err(|e| invalid("$numberDouble", format!("'{}': {}", text, e)))?;
    Number::from_f64(parsed)
        .map(Value::Number)
        .ok_or_else(|| invalid("$numberDouble", format!("'{}' has no JSON number form", text)))
}

fn decode_decimal(json: &Json) -> Result<Scalar, ExtJsonError> {
    let text = expect_str("$numberDecimal", json)?;
    if is_decimal_literal(text) {
        Ok(Scalar::Decimal(text.to_string()))
    } else {
        Err(invalid("$numberDecimal", format!("'{}' is not a decimal", text)))
    }
}

/// Accepts `[sign] digits [. digits] [e [sign] digits]` plus the special
/// values NaN and (signed) Infinity.
fn is_decimal_literal(text: &str) -> bool {
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    if matches!(unsigned, "Infinity" | "Inf") || text == "NaN" {
        return true;
    }

    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => (&unsigned[..pos], Some(&unsigned[pos + 1..])),
        None => (unsigned, None),
    };

    let mut parts = mantissa.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next().unwrap_or("");
    let digits_ok = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if int_part.is_empty() && frac_part.is_empty() {
        return false;
    }
    if !digits_ok(int_part) || !digits_ok(frac_part) {
        return false;
    }

    match exponent {
        None => true,
        Some(exp) => {
            let exp = exp.strip_prefix(['-', '+']).unwrap_or(exp);
            !exp.is_empty() && digits_ok(exp)
        }
    }
}

/// Serializes a document sequence as a pretty-printed JSON array.
pub fn to_pretty_string(docs: &[Document], mode: ExtJsonMode) -> Result<String, serde_json::Error> {
    let array = Json::Array(docs.iter().map(|d| document_to_json(d, mode)).collect());
    serde_json::to_string_pretty(&array)
}

/// Serializes one document on a single line in canonical form.
pub fn to_line(doc: &Document) -> Result<String, serde_json::Error> {
    serde_json::to_string(&document_to_json(doc, ExtJsonMode::Canonical))
}

/// Parses one single-line document, strict first, lenient on a tag failure.
pub fn parse_line(text: &str) -> Result<Document, ExtJsonError> {
    let json: Json = serde_json::from_str(text)?;
    match document_from_json(&json, true) {
        Err(ExtJsonError::InvalidTag { .. }) => document_from_json(&json, false),
        other => other,
    }
}

/// Parses the text of an archive entry into a document sequence.
///
/// The strict decoder runs first; if a type tag is malformed the whole entry is
/// decoded again leniently. Invalid JSON, a non-array top level and non-object
/// elements are errors in both passes.
pub fn parse_documents(text: &str) -> Result<Vec<Document>, ExtJsonError> {
    let json: Json = serde_json::from_str(text)?;
    let Json::Array(items) = json else {
        return Err(ExtJsonError::NotASequence);
    };

    match decode_documents(&items, true) {
        Err(ExtJsonError::InvalidTag { tag, reason }) => {
            debug!(
                "Strict decode failed ({} {}), retrying with plain structural values",
                tag, reason
            );
            decode_documents(&items, false)
        }
        other => other,
    }
}

fn decode_documents(items: &[Json], strict: bool) -> Result<Vec<Document>, ExtJsonError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Json::Object(map) => decode_plain_object(map, strict),
            _ => Err(ExtJsonError::NotADocument { index }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Document {
        let mut address = Document::new();
        address.insert("city", "Lisbon");
        address.insert("zip", 1100);

        let mut doc = Document::new();
        doc.insert(
            "_id",
            ObjectId::parse_hex("507f1f77bcf86cd799439011").unwrap(),
        );
        doc.insert("name", "Ada");
        doc.insert("joined", Scalar::DateTime(1_700_000_000_123));
        doc.insert("address", address);
        doc.insert(
            "tags",
            vec![Value::from("a"), Value::from(2.5), Value::Null],
        );
        doc.insert(
            "avatar",
            Scalar::Binary {
                subtype: 0,
                bytes: vec![0, 1, 2, 255],
            },
        );
        doc.insert("pattern", Scalar::regex("^a.*", "mi"));
        doc.insert("big", Scalar::Int64(9_007_199_254_740_993));
        doc.insert("price", Scalar::Decimal("19.99".into()));
        doc.insert("active", true);
        doc
    }

    #[test]
    fn test_canonical_round_trip() {
        let doc = sample();
        let text = to_pretty_string(&[doc.clone()], ExtJsonMode::Canonical).unwrap();
        let parsed = parse_documents(&text).unwrap();
        assert_eq!(parsed, vec![doc]);
    }

    #[test]
    fn test_canonical_tags() {
        let json = document_to_json(&sample(), ExtJsonMode::Canonical);
        assert_eq!(json["_id"], json!({"$oid": "507f1f77bcf86cd799439011"}));
        assert_eq!(
            json["joined"],
            json!({"$date": {"$numberLong": "1700000000123"}})
        );
        assert_eq!(
            json["avatar"],
            json!({"$binary": {"base64": "AAEC/w==", "subType": "00"}})
        );
        assert_eq!(json["big"], json!({"$numberLong": "9007199254740993"}));
        assert_eq!(json["price"], json!({"$numberDecimal": "19.99"}));
    }

    #[test]
    fn test_field_order_survives_encoding() {
        let text = to_line(&sample()).unwrap();
        let name_pos = text.find("\"name\"").unwrap();
        let joined_pos = text.find("\"joined\"").unwrap();
        assert!(text.starts_with("{\"_id\""));
        assert!(name_pos < joined_pos);
    }

    #[test]
    fn test_relaxed_mode() {
        let mut doc = Document::new();
        doc.insert("at", Scalar::DateTime(1_700_000_000_123));
        doc.insert("before_epoch", Scalar::DateTime(-1));
        doc.insert("n", Scalar::Int64(42));
        let json = document_to_json(&doc, ExtJsonMode::Relaxed);
        assert_eq!(json["at"], json!({"$date": "2023-11-14T22:13:20.123Z"}));
        assert_eq!(json["before_epoch"], json!({"$date": {"$numberLong": "-1"}}));
        assert_eq!(json["n"], json!(42));

        let back = document_from_json(&json, true).unwrap();
        assert_eq!(back.get("at"), Some(&Value::Scalar(Scalar::DateTime(1_700_000_000_123))));
        assert_eq!(back.get("n"), Some(&Value::from(42)));
    }

    #[test]
    fn test_identifier_looking_string_stays_string() {
        let mut doc = Document::new();
        doc.insert("ref", "507f1f77bcf86cd799439011");
        doc.insert("_id", ObjectId::parse_hex("507f1f77bcf86cd799439011").unwrap());
        let text = to_pretty_string(&[doc.clone()], ExtJsonMode::Canonical).unwrap();
        let parsed = parse_documents(&text).unwrap();
        assert_eq!(
            parsed[0].get("ref"),
            Some(&Value::String("507f1f77bcf86cd799439011".into()))
        );
        assert!(matches!(
            parsed[0].get("_id"),
            Some(Value::Scalar(Scalar::ObjectId(_)))
        ));
        assert_ne!(parsed[0].get("ref"), parsed[0].get("_id"));
    }

    #[test]
    fn test_malformed_tag_falls_back_to_plain_object() {
        let text = r#"[{"_id": {"$oid": "not-an-id"}, "n": {"$numberLong": "7"}}]"#;
        let parsed = parse_documents(text).unwrap();
        let id = parsed[0].get("_id").unwrap();
        let Value::Object(inner) = id else {
            panic!("expected plain object, got {:?}", id);
        };
        assert_eq!(inner.get("$oid"), Some(&Value::String("not-an-id".into())));
        assert_eq!(parsed[0].get("n"), Some(&Value::Scalar(Scalar::Int64(7))));

        let json: Json = serde_json::from_str(r#"{"$oid": "not-an-id"}"#).unwrap();
        assert!(matches!(
            from_json(&json, true),
            Err(ExtJsonError::InvalidTag { tag: "$oid", .. })
        ));
    }

    #[test]
    fn test_legacy_and_numeric_tags() {
        let text = r#"[{
            "b": {"$binary": "AQI=", "$type": "4"},
            "r": {"$regex": "x+", "$options": "i"},
            "d": {"$date": 86400000},
            "i": {"$numberInt": "12"},
            "f": {"$numberDouble": "1.5"}
        }]"#;
        let doc = &parse_documents(text).unwrap()[0];
        assert_eq!(
            doc.get("b"),
            Some(&Value::Scalar(Scalar::Binary {
                subtype: 4,
                bytes: vec![1, 2]
            }))
        );
        assert_eq!(
            doc.get("r"),
            Some(&Value::Scalar(Scalar::Regex {
                pattern: "x+".into(),
                options: "i".into()
            }))
        );
        assert_eq!(doc.get("d"), Some(&Value::Scalar(Scalar::DateTime(86_400_000))));
        assert_eq!(doc.get("i"), Some(&Value::from(12)));
        assert_eq!(doc.get("f"), Some(&Value::from(1.5)));
    }

    #[test]
    fn test_tag_shaped_object_decodes_as_scalar() {
        let json = serde_json::json!({"ref": {"$oid": "507f1f77bcf86cd799439011"}});
        let doc = document_from_json(&json, true).unwrap();
        assert_eq!(
            doc.get("ref"),
            Some(&Value::Scalar(Scalar::ObjectId(
                ObjectId::parse_hex("507f1f77bcf86cd799439011").unwrap()
            )))
        );
    }

    #[test]
    fn test_objects_with_extra_keys_are_not_tags() {
        let text = r#"[{"q": {"$oid": "507f1f77bcf86cd799439011", "extra": 1}}]"#;
        let doc = &parse_documents(text).unwrap()[0];
        assert!(matches!(doc.get("q"), Some(Value::Object(_))));
    }

    #[test]
    fn test_structural_errors() {
        assert!(matches!(
            parse_documents(r#"{"a": 1}"#),
            Err(ExtJsonError::NotASequence)
        ));
        assert!(matches!(
            parse_documents(r#"[{"a": 1}, 3]"#),
            Err(ExtJsonError::NotADocument { index: 1 })
        ));
        assert!(matches!(
            parse_documents("[{"),
            Err(ExtJsonError::Syntax(_))
        ));
        assert!(parse_documents("[]").unwrap().is_empty());
    }

    #[test]
    fn test_decimal_literals() {
        for ok in ["0", "-1.5", "1e10", "+3.25E-2", ".5", "NaN", "-Infinity"] {
            assert!(is_decimal_literal(ok), "{} should be accepted", ok);
        }
        for bad in ["", "abc", "1.2.3", "1e", "--1", "."] {
            assert!(!is_decimal_literal(bad), "{} should be rejected", bad);
        }
    }
}
