use compact_str::CompactString;

use crate::error::{DynQueryError, Result};
use crate::expr::{Expr, ParamId, ProjectionExpr};
use crate::projection::{BuiltProjection, build_projection};
use crate::provider::QueryProvider;
use crate::query::DynQuery;
use crate::shape::{FieldKind, ShapeCache, ShapeRef};

/// Field of a group record holding the key projection's value.
pub const KEY_FIELD: &str = "Key";
/// Field of a group record holding the member sequence.
pub const ITEMS_FIELD: &str = "Items";

/// Synthesizes the element shape produced by grouping items of `source` by
/// `key_shape`: the key record, the member sequence, and every group-scope
/// aggregate declared on the source lifted into an expression field.
pub fn group_shape(
    source: &ShapeRef,
    key_shape: &ShapeRef,
    cache: &ShapeCache,
) -> Result<ShapeRef> {
    let mut fields: Vec<(CompactString, FieldKind)> = vec![
        (KEY_FIELD.into(), FieldKind::Record(key_shape.clone())),
        (ITEMS_FIELD.into(), FieldKind::Seq(source.clone())),
    ];
    for decl in source.group_exprs() {
        decl.validate()?;
        let name = decl.name();
        if name.eq_ignore_ascii_case(KEY_FIELD) || name.eq_ignore_ascii_case(ITEMS_FIELD) {
            return Err(DynQueryError::InvalidAggregateDeclaration {
                name: name.to_string(),
                reason: "name collides with a reserved group field".into(),
            });
        }
        fields.push((name.into(), FieldKind::Expr(decl.clone())));
    }
    Ok(cache.get(&fields, false))
}

/// Builds the key projection for a group-by over the given paths.
pub(crate) fn key_projection(
    paths: &[String],
    source: &ShapeRef,
    cache: &ShapeCache,
) -> Result<(ProjectionExpr, ShapeRef)> {
    let param = ParamId::fresh();
    let built = build_projection(paths, source, Expr::Param(param), false, cache)?;
    let shape = built.record_shape().cloned().ok_or_else(|| {
        DynQueryError::Execution("group key projection must yield records".into())
    })?;
    Ok((ProjectionExpr::new(param, built.expr), shape))
}

/// Rewrites the requested output paths against the group shape. The output
/// field set is the union of grouping and selection paths, grouping paths
/// first, duplicates collapsed to their first occurrence; paths whose head
/// is a lifted aggregate stay bare and everything else reads through the
/// key record.
pub(crate) fn output_paths(
    group: &ShapeRef,
    group_paths: &[String],
    select_paths: &[String],
) -> Vec<String> {
    let mut requested: Vec<&String> = Vec::new();
    for path in group_paths.iter().chain(select_paths) {
        if !requested
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(path))
        {
            requested.push(path);
        }
    }
    requested
        .iter()
        .map(|path| {
            let head = path.split('.').next().unwrap_or_default().trim();
            match group.field(head) {
                Some(field) if matches!(field.kind(), FieldKind::Expr(_)) => (*path).clone(),
                _ => format!("{KEY_FIELD}.{path}"),
            }
        })
        .collect()
}

/// Collapses the key record of a grouped output projection into the top
/// level, so the produced records carry the grouped fields and aggregates
/// side by side instead of nesting the keys under a wrapper field.
fn inline_key(built: BuiltProjection, cache: &ShapeCache) -> Result<(Expr, ShapeRef)> {
    let BuiltProjection { expr, kind } = built;
    let (outer_shape, bindings) = match expr {
        Expr::Construct { shape, bindings } => (shape, bindings),
        other => {
            let FieldKind::Record(shape) = kind else {
                return Err(DynQueryError::Execution(
                    "grouped projection must yield records".into(),
                ));
            };
            return Ok((other, shape));
        }
    };
    let key_at = bindings
        .iter()
        .position(|(name, _)| name.eq_ignore_ascii_case(KEY_FIELD));
    let Some(key_at) = key_at else {
        return Ok((
            Expr::Construct {
                shape: outer_shape.clone(),
                bindings,
            },
            outer_shape,
        ));
    };

    if bindings.len() == 1 {
        // Keys only: unwrap to the key record itself.
        let (_, expr) = bindings.into_iter().next().unwrap_or_else(|| {
            unreachable!("binding count was checked")
        });
        let shape = outer_shape
            .field(KEY_FIELD)
            .and_then(|field| field.kind().record_shape())
            .cloned()
            .ok_or_else(|| {
                DynQueryError::Execution("group key projection must yield records".into())
            })?;
        return Ok((expr, shape));
    }

    // Keys mixed with aggregates: splice the key record's bindings in place
    // of the wrapper field. The key reads already route through it, so only
    // the construction tree changes.
    let (inner_shape, inner_bindings) = match &bindings[key_at].1 {
        Expr::NullGuard { inner, .. } => match inner.as_ref() {
            Expr::Construct { shape, bindings } => (shape.clone(), bindings.clone()),
            _ => {
                return Err(DynQueryError::Execution(
                    "group key projection must yield records".into(),
                ));
            }
        },
        Expr::Construct { shape, bindings } => (shape.clone(), bindings.clone()),
        _ => {
            return Err(DynQueryError::Execution(
                "group key projection must yield records".into(),
            ));
        }
    };

    let mut fields: Vec<(CompactString, FieldKind)> = Vec::new();
    let mut merged: Vec<(CompactString, Expr)> = Vec::new();
    let kind_of = |shape: &ShapeRef, name: &str| -> Result<FieldKind> {
        shape
            .field(name)
            .map(|field| field.kind().clone())
            .ok_or_else(|| DynQueryError::UnknownField {
                shape: shape.name().to_string(),
                field: name.to_string(),
            })
    };
    for (index, (name, expr)) in bindings.into_iter().enumerate() {
        if index == key_at {
            for (inner_name, inner_expr) in &inner_bindings {
                fields.push((inner_name.clone(), kind_of(&inner_shape, inner_name)?));
                merged.push((inner_name.clone(), inner_expr.clone()));
            }
        } else {
            let kind = match kind_of(&outer_shape, &name)? {
                FieldKind::Expr(decl) => decl.result_kind().clone(),
                kind => kind,
            };
            fields.push((name.clone(), kind));
            merged.push((name, expr));
        }
    }
    for (index, (name, _)) in merged.iter().enumerate() {
        if merged[..index]
            .iter()
            .any(|(other, _)| other.eq_ignore_ascii_case(name))
        {
            return Err(DynQueryError::ConflictingSelection {
                shape: outer_shape.name().to_string(),
                field: name.to_string(),
            });
        }
    }

    let shape = cache.get(&fields, false);
    let ordered = shape
        .fields()
        .iter()
        .filter_map(|field| {
            merged
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(field.name()))
                .cloned()
        })
        .collect();
    Ok((
        Expr::Construct {
            shape: shape.clone(),
            bindings: ordered,
        },
        shape,
    ))
}

/// Composes a group-by with its output projection onto a pipeline.
///
/// The group-by itself is dispatched through the provider, so drivers with
/// an incompatible native grouping operator substitute their own stage while
/// the key and output projections stay shared.
pub fn build_grouped_query<P>(
    provider: &P,
    query: DynQuery,
    group_paths: &[String],
    select_paths: &[String],
) -> Result<DynQuery>
where
    P: QueryProvider + ?Sized,
{
    let cache = provider.shape_cache();
    let source_shape = query.shape();
    let (key, key_shape) = key_projection(group_paths, &source_shape, cache)?;
    let grouped_shape = group_shape(&source_shape, &key_shape, cache)?;
    let grouped = provider.invoke_group_by(query, key, key_shape, grouped_shape.clone())?;

    let paths = output_paths(&grouped_shape, group_paths, select_paths);
    let param = ParamId::fresh();
    let built = build_projection(&paths, &grouped_shape, Expr::Param(param), false, cache)?;
    let (expr, shape) = inline_key(built, cache)?;
    provider.invoke_select(grouped, ProjectionExpr::new(param, expr), shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprDecl;
    use crate::record;
    use crate::shape::{FieldDef, Shape};
    use crate::value::Value;

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

    fn grouped(cache: &ShapeCache) -> ShapeRef {
        let source = sale_shape();
        let (_, key_shape) =
            key_projection(&["city".to_string()], &source, cache).unwrap();
        group_shape(&source, &key_shape, cache).unwrap()
    }

    #[test]
    fn group_shape_lifts_declared_aggregates() {
        let cache = ShapeCache::new();
        let shape = grouped(&cache);
        assert!(matches!(
            shape.field(KEY_FIELD).map(FieldDef::kind),
            Some(FieldKind::Record(_))
        ));
        assert!(matches!(
            shape.field(ITEMS_FIELD).map(FieldDef::kind),
            Some(FieldKind::Seq(_))
        ));
        assert!(matches!(
            shape.field("total").map(FieldDef::kind),
            Some(FieldKind::Expr(_))
        ));
    }

    #[test]
    fn reserved_aggregate_names_are_rejected() {
        let source = Shape::new("Sale", vec![FieldDef::new("total", FieldKind::Int)])
            .with_group_expr(ExprDecl::group_count("Items"))
            .into_ref();
        let cache = ShapeCache::new();
        let key_shape = cache.get(&[("city".into(), FieldKind::Text)], false);
        let err = group_shape(&source, &key_shape, &cache).unwrap_err();
        assert!(matches!(
            err,
            DynQueryError::InvalidAggregateDeclaration { .. }
        ));
    }

    #[test]
    fn aggregate_heads_stay_bare_and_keys_are_prefixed() {
        let cache = ShapeCache::new();
        let shape = grouped(&cache);
        let paths = output_paths(
            &shape,
            &["city".to_string()],
            &["city".to_string(), "total".to_string()],
        );
        assert_eq!(paths, ["Key.city", "total"]);
    }

    #[test]
    fn grouping_paths_join_the_selection() {
        let cache = ShapeCache::new();
        let shape = grouped(&cache);
        let paths = output_paths(&shape, &["city".to_string()], &["total".to_string()]);
        assert_eq!(paths, ["Key.city", "total"]);
    }

    #[test]
    fn empty_selection_defaults_to_the_grouping_paths() {
        let cache = ShapeCache::new();
        let shape = grouped(&cache);
        let paths = output_paths(&shape, &["city".to_string()], &[]);
        assert_eq!(paths, ["Key.city"]);
    }

    fn eval_output(paths: &[String], group_value: Value) -> (Value, ShapeRef) {
        let cache = ShapeCache::new();
        let shape = grouped(&cache);
        let param = ParamId::fresh();
        let built =
            build_projection(paths, &shape, Expr::Param(param), false, &cache).unwrap();
        let (expr, out_shape) = inline_key(built, &cache).unwrap();
        let value = ProjectionExpr::new(param, expr).eval_for(&group_value).unwrap();
        (value, out_shape)
    }

    #[test]
    fn keys_only_output_unwraps_the_key_record() {
        let (value, shape) = eval_output(
            &["Key.city".to_string()],
            Value::Record(record! { Key: record! { city: "A" }, Items: Vec::new() }),
        );
        assert_eq!(shape.fields().len(), 1);
        let record = value.as_record().expect("record");
        assert_eq!(record.get("city"), Some(&Value::Text("A".into())));
        assert_eq!(record.get(KEY_FIELD), None);
    }

    #[test]
    fn mixed_output_inlines_keys_beside_aggregates() {
        let (value, shape) = eval_output(
            &["Key.city".to_string(), "total".to_string()],
            Value::Record(record! {
                Key: record! { city: "A" },
                Items: vec![
                    Value::Record(record! { city: "A", total: 10 }),
                    Value::Record(record! { city: "A", total: 5 }),
                ]
            }),
        );
        let names: Vec<&str> = shape.fields().iter().map(FieldDef::name).collect();
        assert_eq!(names, ["city", "total"]);
        let record = value.as_record().expect("record");
        assert_eq!(record.get("city"), Some(&Value::Text("A".into())));
        assert_eq!(record.get("total"), Some(&Value::Int(15)));
    }

    #[test]
    fn aggregates_only_output_keeps_the_construct() {
        let (value, shape) = eval_output(
            &["total".to_string()],
            Value::Record(record! {
                Key: record! { city: "A" },
                Items: vec![Value::Record(record! { city: "A", total: 7 })]
            }),
        );
        assert_eq!(shape.fields().len(), 1);
        let record = value.as_record().expect("record");
        assert_eq!(record.get("total"), Some(&Value::Int(7)));
    }

    #[test]
    fn colliding_key_and_aggregate_names_fail() {
        let source = Shape::new(
            "Sale",
            vec![
                FieldDef::new("total", FieldKind::Int),
                FieldDef::new("city", FieldKind::Text),
            ],
        )
        .with_group_expr(ExprDecl::group_sum("total", "total", FieldKind::Int))
        .into_ref();
        let cache = ShapeCache::new();
        let (_, key_shape) =
            key_projection(&["total".to_string()], &source, &cache).unwrap();
        let shape = group_shape(&source, &key_shape, &cache).unwrap();
        let param = ParamId::fresh();
        let built = build_projection(
            &["Key.total".to_string(), "total".to_string()],
            &shape,
            Expr::Param(param),
            false,
            &cache,
        )
        .unwrap();
        let err = inline_key(built, &cache).unwrap_err();
        assert!(matches!(err, DynQueryError::ConflictingSelection { .. }));
    }
}
