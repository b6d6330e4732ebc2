//! Filter DSL behavior through the table surface

use manifold_core::{Error, Record, TableDefinition, Value};
use manifold_engine::Database;
use serde_json::json;

fn rec(json: serde_json::Value) -> Record {
    Record::from_json(&json).unwrap()
}

fn users_db() -> Database {
    let db = Database::new([("users", TableDefinition::with_primary_key(["id"]))], None).unwrap();
    db.get("users")
        .unwrap()
        .bulk_insert(vec![
            rec(json!({"id": 1, "name": "Jhon",    "age": 35})),
            rec(json!({"id": 2, "name": "Maria",   "age": 28})),
            rec(json!({"id": 3, "name": "jhonny",  "age": 22})),
            rec(json!({"id": 4, "name": "Ana",     "age": 41})),
            rec(json!({"id": 5, "name": "Brandon", "age": 30})),
        ])
        .unwrap();
    db
}

fn ids(rows: &[Record]) -> Vec<i64> {
    rows.iter()
        .map(|r| match r.get("id").unwrap() {
            Value::Int(i) => *i,
            other => panic!("unexpected id {other:?}"),
        })
        .collect()
}

#[test]
fn test_or_combines_range_and_like() {
    let db = users_db();
    let rows = db
        .get("users")
        .unwrap()
        .select(&[], &json!({"$or": [{"id": {"$gte": 3}}, {"name": {"$like": "jh%"}}]}))
        .unwrap();
    // ids >= 3 plus the case-insensitive jh% names, each exactly once
    assert_eq!(ids(&rows), vec![1, 3, 4, 5]);
}

#[test]
fn test_eq_on_every_field_finds_exactly_the_record() {
    let db = users_db();
    let users = db.get("users").unwrap();

    let exact = json!({"id": {"$eq": 2}, "name": {"$eq": "Maria"}, "age": {"$eq": 28}});
    let rows = users.select(&[], &exact).unwrap();
    assert_eq!(rows, vec![rec(json!({"id": 2, "name": "Maria", "age": 28}))]);

    let absent = json!({"id": {"$eq": 2}, "name": {"$eq": "Maria"}, "age": {"$eq": 99}});
    assert!(users.select(&[], &absent).unwrap().is_empty());
}

#[test]
fn test_projection_limits_fields() {
    let db = users_db();
    let rows = db
        .get("users")
        .unwrap()
        .select(&["name"], &json!({"age": {"$lt": 30}}))
        .unwrap();
    assert_eq!(
        rows,
        vec![rec(json!({"name": "Maria"})), rec(json!({"name": "jhonny"}))]
    );
}

#[test]
fn test_membership_and_negation() {
    let db = users_db();
    let users = db.get("users").unwrap();

    assert_eq!(
        ids(&users.select(&[], &json!({"id": {"$in": [1, 4, 9]}})).unwrap()),
        vec![1, 4]
    );
    assert_eq!(
        ids(&users.select(&[], &json!({"id": {"$nin": [1, 2, 3]}})).unwrap()),
        vec![4, 5]
    );
    assert_eq!(
        ids(&users
            .select(&[], &json!({"$not": {"name": {"$like": "%a%"}}}))
            .unwrap()),
        vec![1, 3]
    );
}

#[test]
fn test_update_through_filter() {
    let db = users_db();
    let users = db.get("users").unwrap();

    let affected = users
        .update(&rec(json!({"adult": true})), &json!({"age": {"$gte": 30}}))
        .unwrap();
    assert_eq!(affected, 3);
    assert_eq!(users.select(&[], &json!({"adult": true})).unwrap().len(), 3);
}

#[test]
fn test_invalid_filters_are_rejected() {
    let db = users_db();
    let users = db.get("users").unwrap();

    assert!(matches!(
        users.select(&[], &json!({"id": {"$near": 3}})).unwrap_err(),
        Error::InvalidFilter(_)
    ));
    assert!(matches!(
        users.select(&[], &json!({"id": {"$in": 3}})).unwrap_err(),
        Error::InvalidFilter(_)
    ));
}

#[test]
fn test_empty_filter_selects_all() {
    let db = users_db();
    assert_eq!(db.get("users").unwrap().select(&[], &json!({})).unwrap().len(), 5);
}
