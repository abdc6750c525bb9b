//! Special-type codec.
//!
//! Converts between typed [`Value`] trees and their JSON wire form. Timestamps
//! and binary blobs have no JSON representation, so they travel as tagged
//! objects:
//!
//! ```json
//! {"_bsonType": "Date", "millis": 1706745600000}
//! {"_bsonType": "Binary", "type": 0, "encoded": "aGVsbG8="}
//! ```
//!
//! Decoding walks every nested map and array. An object carrying the tag
//! field with any other tag is rejected with [`Error::UnknownSpecialType`].

use crate::{error::Result, Document, Error, Map, Value};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde_json::{json, Value as Json};

/// Field naming the special type of a tagged object.
pub const TYPE_TAG: &str = "_bsonType";

pub const DATE_TAG: &str = "Date";
pub const BINARY_TAG: &str = "Binary";

/// Encode a value into its JSON wire form.
pub fn encode_value(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::Number(n.clone()),
        Value::String(s) => Json::String(s.clone()),
        Value::Timestamp(ts) => json!({ TYPE_TAG: DATE_TAG, "millis": ts.timestamp_millis() }),
        Value::Bytes(bytes) => {
            json!({ TYPE_TAG: BINARY_TAG, "type": 0, "encoded": STANDARD.encode(bytes) })
        }
        Value::Array(items) => Json::Array(items.iter().map(encode_value).collect()),
        Value::Map(map) => Json::Object(encode_map(map)),
    }
}

fn encode_map(map: &Map) -> serde_json::Map<String, Json> {
    map.iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect()
}

/// Encode a whole document into a JSON object.
pub fn encode_document(doc: &Document) -> Json {
    Json::Object(encode_map(doc.fields()))
}

/// Decode a JSON wire value, restoring tagged special types.
pub fn decode_value(json: Json) -> Result<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => Value::Number(n),
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(
            items
                .into_iter()
                .map(decode_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        Json::Object(object) => match object.get(TYPE_TAG) {
            Some(tag) => decode_tagged(tag, &object)?,
            None => Value::Map(decode_object(object)?),
        },
    })
}

fn decode_object(object: serde_json::Map<String, Json>) -> Result<Map> {
    object
        .into_iter()
        .map(|(key, value)| Ok((key, decode_value(value)?)))
        .collect()
}

fn decode_tagged(tag: &Json, object: &serde_json::Map<String, Json>) -> Result<Value> {
    match tag.as_str() {
        Some(DATE_TAG) => decode_date(object.get("millis")).map(Value::Timestamp),
        Some(BINARY_TAG) => decode_binary(object.get("encoded")).map(Value::Bytes),
        Some(other) => Err(Error::UnknownSpecialType(other.to_string())),
        None => Err(Error::UnknownSpecialType(tag.to_string())),
    }
}

fn decode_date(millis: Option<&Json>) -> Result<DateTime<Utc>> {
    let invalid = |reason: &str| Error::InvalidSpecialType {
        tag: DATE_TAG.to_string(),
        reason: reason.to_string(),
    };

    // Clients may send millis as a number or as a numeric string.
    let millis = match millis {
        Some(Json::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| invalid("millis must be an integer"))?,
        Some(Json::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid("millis must be an integer"))?,
        _ => return Err(invalid("missing millis")),
    };

    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| invalid("millis out of range"))
}

fn decode_binary(encoded: Option<&Json>) -> Result<Vec<u8>> {
    let invalid = |reason: String| Error::InvalidSpecialType {
        tag: BINARY_TAG.to_string(),
        reason,
    };

    let encoded = encoded
        .and_then(Json::as_str)
        .ok_or_else(|| invalid("missing encoded payload".to_string()))?;
    STANDARD
        .decode(encoded)
        .map_err(|e| invalid(format!("bad base64: {e}")))
}

/// Decode a JSON object into a document.
pub fn decode_document(json: Json) -> Result<Document> {
    match json {
        Json::Object(object) if !object.contains_key(TYPE_TAG) => {
            Ok(Document::from_map(decode_object(object)?))
        }
        other => Err(Error::InvalidDocument(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "tagged object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2014, 11, 21, 9, 30, 0).unwrap()
            + chrono::Duration::milliseconds(123)
    }

    #[test]
    fn encodes_a_date() {
        let json = encode_value(&Value::Timestamp(sample_date()));
        assert_eq!(
            json,
            json!({"_bsonType": "Date", "millis": sample_date().timestamp_millis()})
        );
    }

    #[test]
    fn decodes_a_date() {
        let millis = sample_date().timestamp_millis();
        let value = decode_value(json!({"_bsonType": "Date", "millis": millis})).unwrap();
        assert_eq!(value, Value::Timestamp(sample_date()));

        let value =
            decode_value(json!({"_bsonType": "Date", "millis": millis.to_string()})).unwrap();
        assert_eq!(value, Value::Timestamp(sample_date()));
    }

    #[test]
    fn encodes_and_decodes_binary() {
        let json = encode_value(&Value::Bytes(b"Hello world".to_vec()));
        assert_eq!(
            json,
            json!({"_bsonType": "Binary", "type": 0, "encoded": "SGVsbG8gd29ybGQ="})
        );
        assert_eq!(
            decode_value(json).unwrap(),
            Value::Bytes(b"Hello world".to_vec())
        );
    }

    #[test]
    fn walks_nested_maps_and_arrays() {
        let json = json!({
            "_id": "1",
            "when": {"_bsonType": "Date", "millis": 1000},
            "nested": {
                "deeper": {"blob": {"_bsonType": "Binary", "type": 0, "encoded": "AAEC"}},
                "list": [{"at": {"_bsonType": "Date", "millis": 2000}}, 5]
            }
        });

        let doc = decode_document(json.clone()).unwrap();
        assert_eq!(
            doc.get_path("nested.deeper.blob"),
            Some(&Value::Bytes(vec![0, 1, 2]))
        );
        let Some(Value::Array(list)) = doc.get_path("nested.list") else {
            panic!("expected array");
        };
        assert_eq!(
            list[0].as_map().unwrap()["at"],
            Value::Timestamp(DateTime::<Utc>::from_timestamp_millis(2000).unwrap())
        );

        assert_eq!(encode_document(&doc), json);
    }

    #[test]
    fn rejects_unknown_tags() {
        let err = decode_value(json!({"a": {"_bsonType": "ObjectId", "value": "x"}})).unwrap_err();
        assert_eq!(err, Error::UnknownSpecialType("ObjectId".into()));

        let err = decode_value(json!({"_bsonType": 7})).unwrap_err();
        assert!(matches!(err, Error::UnknownSpecialType(_)));
    }

    #[test]
    fn rejects_broken_payloads() {
        assert!(matches!(
            decode_value(json!({"_bsonType": "Date"})),
            Err(Error::InvalidSpecialType { .. })
        ));
        assert!(matches!(
            decode_value(json!({"_bsonType": "Binary", "encoded": "not base64!"})),
            Err(Error::InvalidSpecialType { .. })
        ));
    }

    #[test]
    fn documents_must_be_plain_objects() {
        assert!(decode_document(json!([1, 2])).is_err());
        assert!(decode_document(json!({"_bsonType": "Date", "millis": 1})).is_err());
    }
}
