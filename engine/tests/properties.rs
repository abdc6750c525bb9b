//! Property and edge case tests for docsync-engine.
//!
//! These cover the identity round-trip and the special-type codec inverses.

use chrono::{DateTime, Utc};
use docsync_engine::{
    codec::{decode_document, decode_value, encode_document, encode_value},
    DocId, Document, Map, OperationSet, Value,
};
use proptest::prelude::*;
use serde_json::json;

fn segment() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_-]{1,12}"
}

fn collection() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 1..4).prop_map(|parts| parts.join("."))
}

fn key() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.:-]{1,24}"
}

fn special_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        (-8_000_000_000_000i64..8_000_000_000_000i64).prop_map(|ms| {
            Value::Timestamp(DateTime::<Utc>::from_timestamp_millis(ms).unwrap())
        }),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Bytes),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,16}".prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        Just(Value::Null),
    ]
}

fn nested_value() -> impl Strategy<Value = Value> {
    special_leaf().prop_recursive(6, 64, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4).prop_map(Value::Map),
        ]
    })
}

proptest! {
    #[test]
    fn client_id_round_trips(db in segment(), coll in collection(), key in key()) {
        let client_id = format!("{db}.{coll}${key}");
        let id = DocId::parse(&client_id).unwrap();

        prop_assert_eq!(id.to_client_id(), client_id);
        prop_assert_eq!(id.database(), db.as_str());
        prop_assert_eq!(id.collection(), coll.as_str());
        prop_assert_eq!(id.key(), key.as_str());
    }

    #[test]
    fn from_parts_agrees_with_parse(db in segment(), coll in collection(), key in key()) {
        let built = DocId::from_parts(db.clone(), coll.clone(), key.clone()).unwrap();
        prop_assert_eq!(DocId::parse(&built.to_client_id()).unwrap(), built);
    }

    #[test]
    fn codec_is_an_exact_inverse(value in nested_value()) {
        let encoded = encode_value(&value);
        let decoded = decode_value(encoded.clone()).unwrap();

        prop_assert_eq!(&decoded, &value);
        prop_assert_eq!(encode_value(&decoded), encoded);
    }
}

#[test]
fn deep_nesting_survives_round_trip() {
    let when = DateTime::<Utc>::from_timestamp_millis(1_417_000_000_123).unwrap();
    let mut value = Value::Map(Map::from([
        ("at".to_string(), Value::Timestamp(when)),
        ("blob".to_string(), Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef])),
    ]));
    for depth in 0..100 {
        value = Value::Map(Map::from([(format!("level{depth}"), value)]));
    }

    let mut doc = Document::new("deep");
    doc.insert("tree", value);

    let json = encode_document(&doc);
    assert_eq!(decode_document(json).unwrap(), doc);
}

#[test]
fn modifies_a_document_but_not_its_binary() {
    let blob = vec![137, 80, 78, 71, 13, 10, 26, 10];
    let mut doc = Document::new("img");
    doc.insert("_version", 1u64);
    doc.insert("image", Value::Bytes(blob.clone()));
    doc.insert("title", "before");

    let wire_ops = json!({"$set": {"title": "after"}});
    let mut ops = OperationSet::from_value(decode_value(wire_ops).unwrap()).unwrap();
    ops.prepare_for_push();
    ops.apply_to(&mut doc).unwrap();

    assert_eq!(doc.get("image"), Some(&Value::Bytes(blob)));
    assert_eq!(doc.get("title"), Some(&Value::from("after")));
    assert_eq!(doc.version(), Some(2));
}

#[test]
fn modifies_a_document_and_its_binary() {
    let mut doc = Document::new("img");
    doc.insert("image", Value::Bytes(vec![1, 2, 3]));

    let wire_ops = json!({
        "$set": {"image": {"_bsonType": "Binary", "type": 0, "encoded": "BAUG"}}
    });
    let ops = OperationSet::from_value(decode_value(wire_ops).unwrap()).unwrap();
    ops.apply_to(&mut doc).unwrap();

    assert_eq!(doc.get("image"), Some(&Value::Bytes(vec![4, 5, 6])));
    assert_eq!(
        encode_document(&doc)["image"],
        json!({"_bsonType": "Binary", "type": 0, "encoded": "BAUG"})
    );
}

#[test]
fn unicode_keys_and_values() {
    let names = ["日本語テスト", "Привет мир", "🎉🚀💯", "Hello\nWorld\tTab"];
    for (i, name) in names.iter().enumerate() {
        let id = DocId::from_parts("app", "notes", format!("{name}-{i}")).unwrap();
        assert_eq!(DocId::parse(&id.to_client_id()).unwrap(), id);

        let mut doc = Document::new(id.key());
        doc.insert(*name, *name);
        assert_eq!(decode_document(encode_document(&doc)).unwrap(), doc);
    }
}
