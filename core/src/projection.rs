use compact_str::CompactString;

use crate::error::{DynQueryError, Result};
use crate::expr::{Expr, ParamId};
use crate::shape::{FieldKind, ShapeCache, ShapeRef};

/// A built projection: the construction tree plus the kind of value it
/// yields. The kind is a record for the common case and the single field's
/// kind when the projection was flattened.
#[derive(Debug, Clone)]
pub struct BuiltProjection {
    pub expr: Expr,
    pub kind: FieldKind,
}

impl BuiltProjection {
    /// Shape of the produced records, when the projection yields records.
    pub fn record_shape(&self) -> Option<&ShapeRef> {
        match &self.kind {
            FieldKind::Record(shape) => Some(shape),
            _ => None,
        }
    }
}

struct HeadGroup {
    /// Declared field name (case restored from the shape)
    name: CompactString,
    kind: FieldKind,
    rests: Vec<String>,
    has_bare: bool,
}

/// Builds a record-construction tree over `source_shape` from dotted field
/// paths, rooted at the `source` expression.
///
/// Heads without a remainder become direct field reads (or spliced fragments
/// for declared aggregate-expression fields). Heads with a remainder recurse:
/// sequence fields map a sub-projection per element, record fields project
/// the nested record; both are wrapped in a null guard keyed on the field
/// being absent. With `flatten_single`, a projection of exactly one field
/// returns that field's read expression instead of a one-field record.
pub fn build_projection<S: AsRef<str>>(
    paths: &[S],
    source_shape: &ShapeRef,
    source: Expr,
    flatten_single: bool,
    cache: &ShapeCache,
) -> Result<BuiltProjection> {
    let mut groups: Vec<HeadGroup> = Vec::new();
    for path in paths {
        let path = path.as_ref().trim();
        if path.is_empty() {
            continue;
        }
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head.trim(), Some(rest.trim())),
            None => (path, None),
        };
        let field = source_shape.field(head).ok_or_else(|| {
            DynQueryError::UnknownField {
                shape: source_shape.name().to_string(),
                field: head.to_string(),
            }
        })?;
        let index = match groups
            .iter()
            .position(|group| group.name.eq_ignore_ascii_case(head))
        {
            Some(index) => index,
            None => {
                groups.push(HeadGroup {
                    name: field.name().into(),
                    kind: field.kind().clone(),
                    rests: Vec::new(),
                    has_bare: false,
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];
        match rest {
            Some(rest) => group.rests.push(rest.to_string()),
            None => group.has_bare = true,
        }
    }

    // A head both with and without sub-fields is invalid.
    for group in &groups {
        if group.has_bare && !group.rests.is_empty() {
            return Err(DynQueryError::ConflictingSelection {
                shape: source_shape.name().to_string(),
                field: group.name.to_string(),
            });
        }
    }

    let mut shape_fields: Vec<(CompactString, FieldKind)> = Vec::with_capacity(groups.len());
    let mut bindings: Vec<(CompactString, Expr)> = Vec::with_capacity(groups.len());
    for group in &groups {
        let (kind, read) = build_field(group, source_shape, &source, cache)?;
        shape_fields.push((group.name.clone(), kind));
        bindings.push((group.name.clone(), read));
    }

    if flatten_single && bindings.len() == 1 {
        let (_, expr) = bindings.remove(0);
        let (_, kind) = shape_fields.remove(0);
        return Ok(BuiltProjection { expr, kind });
    }

    let shape = cache.get(&shape_fields, false);
    // The cached shape's field order is authoritative: an equal signature
    // requested earlier in a different order already fixed it.
    let ordered = shape
        .fields()
        .iter()
        .filter_map(|field| {
            bindings
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(field.name()))
                .cloned()
        })
        .collect();
    Ok(BuiltProjection {
        expr: Expr::Construct {
            shape: shape.clone(),
            bindings: ordered,
        },
        kind: FieldKind::Record(shape),
    })
}

fn build_field(
    group: &HeadGroup,
    source_shape: &ShapeRef,
    source: &Expr,
    cache: &ShapeCache,
) -> Result<(FieldKind, Expr)> {
    if group.has_bare {
        return match &group.kind {
            FieldKind::Expr(decl) => {
                let spliced = decl.splice(source)?;
                Ok((decl.result_kind().clone(), spliced))
            }
            kind => Ok((
                kind.clone(),
                Expr::field(source.clone(), group.name.clone()),
            )),
        };
    }

    match &group.kind {
        FieldKind::Seq(element_shape) => {
            let read = Expr::field(source.clone(), group.name.clone());
            build_seq_field(&group.rests, element_shape, read, cache)
        }
        FieldKind::Record(sub_shape) => {
            let read = Expr::field(source.clone(), group.name.clone());
            build_record_field(&group.rests, sub_shape, read, cache)
        }
        FieldKind::Expr(decl) => {
            // Sub-paths continue through the spliced fragment's result.
            let spliced = decl.splice(source)?;
            match decl.result_kind() {
                FieldKind::Record(sub_shape) => {
                    build_record_field(&group.rests, sub_shape, spliced, cache)
                }
                FieldKind::Seq(element_shape) => {
                    build_seq_field(&group.rests, element_shape, spliced, cache)
                }
                _ => Err(DynQueryError::UnknownField {
                    shape: format!("{}.{}", source_shape.name(), group.name),
                    field: group.rests.first().cloned().unwrap_or_default(),
                }),
            }
        }
        _ => Err(DynQueryError::UnknownField {
            shape: format!("{}.{}", source_shape.name(), group.name),
            field: group.rests.first().cloned().unwrap_or_default(),
        }),
    }
}

/// Per-element sub-projection over a sequence field, null-guarded on the
/// sequence itself.
fn build_seq_field(
    rests: &[String],
    element_shape: &ShapeRef,
    read: Expr,
    cache: &ShapeCache,
) -> Result<(FieldKind, Expr)> {
    let element = ParamId::fresh();
    let sub = build_projection(rests, element_shape, Expr::Param(element), false, cache)?;
    let sub_shape = sub
        .record_shape()
        .cloned()
        .ok_or_else(|| DynQueryError::Execution("sequence projection must yield records".into()))?;
    let mapped = Expr::MapSeq {
        source: Box::new(read.clone()),
        param: element,
        body: Box::new(sub.expr),
    };
    Ok((
        FieldKind::Seq(sub_shape),
        Expr::null_guard(read, mapped),
    ))
}

/// Sub-projection over a nested record field, null-guarded on the field.
fn build_record_field(
    rests: &[String],
    sub_shape: &ShapeRef,
    read: Expr,
    cache: &ShapeCache,
) -> Result<(FieldKind, Expr)> {
    let sub = build_projection(rests, sub_shape, read.clone(), false, cache)?;
    let kind = sub.kind.clone();
    Ok((kind, Expr::null_guard(read, sub.expr)))
}
