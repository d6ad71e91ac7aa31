#![cfg(feature = "memory")]

use dynquery::core::{DynQueryError, ExprDecl, QueryProvider, ShapeRef, Value};
use dynquery::memory::prelude::*;

fn sale_shape() -> ShapeRef {
    Shape::new(
        "Sale",
        vec![
            FieldDef::new("city", FieldKind::Text),
            FieldDef::new("state", FieldKind::Text),
            FieldDef::new("total", FieldKind::Int),
        ],
    )
    .with_group_expr(ExprDecl::group_sum("total", "total", FieldKind::Int))
    .with_group_expr(ExprDecl::group_count("sales"))
    .with_group_expr(ExprDecl::group_avg("average", "total"))
    .into_ref()
}

fn sales() -> Vec<Value> {
    vec![
        Value::Record(record! { city: "A", state: "X", total: 10 }),
        Value::Record(record! { city: "A", state: "X", total: 5 }),
        Value::Record(record! { city: "B", state: "Y", total: 3 }),
    ]
}

fn run(raw: &str) -> Vec<Value> {
    let provider = MemoryProvider::new();
    let query = provider
        .query(MemoryCollection::new(sale_shape(), sales()).into_query(), raw)
        .unwrap();
    provider.to_vec(&query).unwrap()
}

#[test]
fn grouped_sums_collapse_to_one_row_per_key() {
    let rows = run("groupby=city&select=city,total");
    assert_eq!(rows.len(), 2);

    let first = rows[0].as_record().expect("record");
    assert_eq!(first.get("city"), Some(&Value::Text("A".into())));
    assert_eq!(first.get("total"), Some(&Value::Int(15)));

    let second = rows[1].as_record().expect("record");
    assert_eq!(second.get("city"), Some(&Value::Text("B".into())));
    assert_eq!(second.get("total"), Some(&Value::Int(3)));
}

#[test]
fn groups_keep_first_encounter_order() {
    let rows = run("groupby=city&select=city");
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

#[test]
fn keys_and_aggregates_sit_side_by_side() {
    let rows = run("groupby=city,state&select=city,state,sales,average");
    let first = rows[0].as_record().expect("record");
    assert_eq!(first.get("city"), Some(&Value::Text("A".into())));
    assert_eq!(first.get("state"), Some(&Value::Text("X".into())));
    assert_eq!(first.get("sales"), Some(&Value::Int(2)));
    assert_eq!(first.get("average"), Some(&Value::Float(7.5)));
    assert_eq!(first.get("Key"), None);
    assert_eq!(first.get("Items"), None);
}

#[test]
fn grouping_keys_always_appear_in_the_output() {
    let rows = run("groupby=city&select=total");
    assert_eq!(rows.len(), 2);
    let first = rows[0].as_record().expect("record");
    assert_eq!(first.get("city"), Some(&Value::Text("A".into())));
    assert_eq!(first.get("total"), Some(&Value::Int(15)));
}

#[test]
fn groupby_without_select_yields_the_keys() {
    let rows = run("groupby=city");
    assert_eq!(rows.len(), 2);
    let first = rows[0].as_record().expect("record");
    assert_eq!(first.get("city"), Some(&Value::Text("A".into())));
    assert_eq!(first.len(), 1);
}

#[test]
fn pagination_applies_to_the_grouped_rows() {
    let rows = run("groupby=city&select=city,total&skip=1");
    assert_eq!(rows.len(), 1);
    let record = rows[0].as_record().expect("record");
    assert_eq!(record.get("city"), Some(&Value::Text("B".into())));
}

#[test]
fn unknown_grouping_path_fails_up_front() {
    let provider = MemoryProvider::new();
    let err = provider
        .query(
            MemoryCollection::new(sale_shape(), sales()).into_query(),
            "groupby=bogus&select=bogus",
        )
        .unwrap_err();
    assert!(matches!(
        err,
        DynQueryError::UnknownField { ref field, .. } if field == "bogus"
    ));
}

#[test]
fn selecting_an_aggregate_without_grouping_is_unknown() {
    let provider = MemoryProvider::new();
    let err = provider
        .query(
            MemoryCollection::new(sale_shape(), sales()).into_query(),
            "select=sales",
        )
        .unwrap_err();
    // Group-scope aggregates only exist on the synthesized group shape.
    assert!(matches!(
        err,
        DynQueryError::UnknownField { ref field, .. } if field == "sales"
    ));
}
