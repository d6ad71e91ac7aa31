#![cfg(all(feature = "memory", feature = "docstore"))]

use std::time::Duration;

use serde_json::json;

use dynquery::core::{DynQueryError, ExprDecl, QueryProvider, ShapeRef, Stage, Value};
use dynquery::docstore::prelude::*;
use dynquery::docstore::DOCSTORE_DRIVER;
use dynquery::memory::{MemoryCollection, MemoryProvider};
use dynquery::record;

fn sale_shape() -> ShapeRef {
    Shape::new(
        "Sale",
        vec![
            FieldDef::new("city", FieldKind::Text),
            FieldDef::new("total", FieldKind::Int),
        ],
    )
    .with_group_expr(ExprDecl::group_sum("total", "total", FieldKind::Int))
    .into_ref()
}

fn documents() -> Vec<serde_json::Value> {
    vec![
        json!({ "city": "A", "total": 10 }),
        json!({ "city": "A", "total": 5 }),
        json!({ "city": "B", "total": 3 }),
    ]
}

fn rows() -> Vec<Value> {
    vec![
        Value::Record(record! { city: "A", total: 10 }),
        Value::Record(record! { city: "A", total: 5 }),
        Value::Record(record! { city: "B", total: 3 }),
    ]
}

async fn run_docstore(raw: &str) -> Vec<Value> {
    let provider = DocStoreProvider::new();
    let query = provider
        .query(
            DocCollection::new(sale_shape(), documents()).into_query(),
            raw,
        )
        .unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        provider.materialize(query, MaterializeOptions::default()),
    )
    .await
    .expect("materialization should finish promptly")
    .unwrap()
}

#[tokio::test]
async fn docstore_and_memory_agree_on_grouped_sums() {
    let raw = "groupby=city&select=city,total";

    let memory = MemoryProvider::new();
    let memory_query = memory
        .query(MemoryCollection::new(sale_shape(), rows()).into_query(), raw)
        .unwrap();
    let memory_rows = memory.to_vec(&memory_query).unwrap();

    let docstore_rows = run_docstore(raw).await;
    assert_eq!(memory_rows, docstore_rows);
}

#[tokio::test]
async fn docstore_pipelines_carry_the_native_group_stage() {
    let provider = DocStoreProvider::new();
    let query = provider
        .query(
            DocCollection::new(sale_shape(), documents()).into_query(),
            "groupby=city&select=city",
        )
        .unwrap();
    assert!(query.stages().iter().any(|stage| matches!(
        stage,
        Stage::Custom { driver, .. } if *driver == DOCSTORE_DRIVER
    )));

    let rows = provider
        .materialize(query, MaterializeOptions::default())
        .await
        .unwrap();
    let cities: Vec<&Value> = rows
        .iter()
        .map(|row| {
            row.as_record()
                .and_then(|record| record.get("city"))
                .expect("city")
        })
        .collect();
    assert_eq!(
        cities,
        [&Value::Text("A".into()), &Value::Text("B".into())]
    );
}

#[tokio::test]
async fn documents_with_mismatched_key_case_still_project() {
    let provider = DocStoreProvider::new();
    let query = provider
        .query(
            DocCollection::new(
                sale_shape(),
                vec![json!({ "City": "A", "Total": 1 })],
            )
            .into_query(),
            "select=city,total",
        )
        .unwrap();
    let rows = provider
        .materialize(query, MaterializeOptions::default())
        .await
        .unwrap();
    let record = rows[0].as_record().expect("record");
    assert_eq!(record.get("city"), Some(&Value::Text("A".into())));
    assert_eq!(record.get("total"), Some(&Value::Int(1)));
}

#[tokio::test]
async fn cancellation_stops_an_in_flight_materialization() {
    let provider = DocStoreProvider::new();
    let query = provider
        .query(
            DocCollection::new(sale_shape(), documents()).into_query(),
            "groupby=city&select=city,total",
        )
        .unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = provider
        .materialize(query, MaterializeOptions::with_cancel(cancel))
        .await
        .unwrap_err();
    assert!(matches!(err, DynQueryError::Cancelled));
}

#[tokio::test]
async fn memory_rows_cannot_feed_a_docstore_drain() {
    let docstore = DocStoreProvider::new();
    let memory_query = MemoryCollection::new(sale_shape(), rows()).into_query();
    let query = docstore.query(memory_query, "select=city").unwrap();
    let err = docstore
        .materialize(query, MaterializeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DynQueryError::Execution(_)));
}
