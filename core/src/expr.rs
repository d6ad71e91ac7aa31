use std::cmp::Ordering;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::error::{DynQueryError, Result};
use crate::shape::{FieldKind, ShapeRef};
use crate::value::{Record, Value};

/// Identifies one lambda placeholder within a composed expression tree.
///
/// Splicing a declared fragment into a projection substitutes the fragment's
/// placeholder with the current source expression, so ids only need to be
/// unique across the trees that get composed together; a process-wide counter
/// guarantees that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(u32);

impl ParamId {
    /// Allocates a fresh placeholder id.
    pub fn fresh() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        ParamId(NEXT.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

/// A projection expression tree: "construct a value by reading from a source
/// item placeholder".
///
/// Trees are built by [`build_projection`](crate::projection::build_projection),
/// attached to a pipeline stage, and interpreted by [`Expr::eval`] when a
/// backend enumerates the pipeline.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A lambda placeholder bound at evaluation time
    Param(ParamId),
    Literal(Value),
    /// Read a named field from the record produced by `source`.
    Field {
        source: Box<Expr>,
        name: CompactString,
    },
    /// Null propagation: if `source` evaluates to `Null`, the whole read is
    /// `Null` instead of evaluating `inner`.
    NullGuard {
        source: Box<Expr>,
        inner: Box<Expr>,
    },
    /// Map `body` over each element of the sequence produced by `source`,
    /// binding `param` to the element.
    MapSeq {
        source: Box<Expr>,
        param: ParamId,
        body: Box<Expr>,
    },
    /// Construct a record of `shape`, evaluating one binding per field.
    Construct {
        shape: ShapeRef,
        bindings: Vec<(CompactString, Expr)>,
    },
    /// Sum of the numeric elements of a sequence (`Null` elements skipped)
    Sum(Box<Expr>),
    /// Element count of a sequence
    Count(Box<Expr>),
    /// Mean of the numeric elements of a sequence; `Null` when empty
    Avg(Box<Expr>),
    /// Smallest element of a sequence; `Null` when empty
    Min(Box<Expr>),
    /// Largest element of a sequence; `Null` when empty
    Max(Box<Expr>),
}

impl Expr {
    pub fn field(source: Expr, name: impl Into<CompactString>) -> Self {
        Expr::Field {
            source: Box::new(source),
            name: name.into(),
        }
    }

    pub fn null_guard(source: Expr, inner: Expr) -> Self {
        Expr::NullGuard {
            source: Box::new(source),
            inner: Box::new(inner),
        }
    }

    /// Reads a dotted path off `source`, one field hop per segment.
    pub fn read_path(source: Expr, path: &str) -> Self {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .fold(source, |expr, segment| Expr::field(expr, segment.trim()))
    }

    /// Evaluates the tree against the given placeholder bindings.
    pub fn eval(&self, env: &mut Env) -> Result<Value> {
        match self {
            Expr::Param(param) => env.lookup(*param).cloned().ok_or_else(|| {
                DynQueryError::Execution("unbound placeholder in projection".into())
            }),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Field { source, name } => match source.eval(env)? {
                Value::Null => Ok(Value::Null),
                Value::Record(record) => Ok(record.get(name).cloned().unwrap_or(Value::Null)),
                other => Err(DynQueryError::Execution(format!(
                    "cannot read field '{name}' of non-record value {other:?}"
                ))),
            },
            Expr::NullGuard { source, inner } => {
                if source.eval(env)?.is_null() {
                    Ok(Value::Null)
                } else {
                    inner.eval(env)
                }
            }
            Expr::MapSeq { source, param, body } => match source.eval(env)? {
                Value::Null => Ok(Value::Null),
                Value::Seq(items) => {
                    let mut mapped = Vec::with_capacity(items.len());
                    for item in items {
                        env.push(*param, item);
                        let result = body.eval(env);
                        env.pop();
                        mapped.push(result?);
                    }
                    Ok(Value::Seq(mapped))
                }
                other => Err(DynQueryError::Execution(format!(
                    "cannot map over non-sequence value {other:?}"
                ))),
            },
            Expr::Construct { bindings, .. } => {
                let mut record = Record::with_capacity(bindings.len());
                for (name, binding) in bindings {
                    record.push(name.clone(), binding.eval(env)?);
                }
                Ok(Value::Record(record))
            }
            Expr::Sum(inner) => fold_numeric(inner.eval(env)?, Fold::Sum),
            Expr::Avg(inner) => fold_numeric(inner.eval(env)?, Fold::Avg),
            Expr::Count(inner) => match inner.eval(env)? {
                Value::Null => Ok(Value::Int(0)),
                Value::Seq(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(DynQueryError::Execution(format!(
                    "cannot count non-sequence value {other:?}"
                ))),
            },
            Expr::Min(inner) => pick_extreme(inner.eval(env)?, Ordering::Less),
            Expr::Max(inner) => pick_extreme(inner.eval(env)?, Ordering::Greater),
        }
    }
}

enum Fold {
    Sum,
    Avg,
}

fn fold_numeric(value: Value, fold: Fold) -> Result<Value> {
    let items = match value {
        Value::Null => Vec::new(),
        Value::Seq(items) => items,
        other => {
            return Err(DynQueryError::Execution(format!(
                "cannot aggregate non-sequence value {other:?}"
            )));
        }
    };
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut count: usize = 0;
    let mut is_float = false;
    for item in items {
        match item {
            Value::Null => {}
            Value::Int(n) => {
                int_total += n;
                float_total += n as f64;
                count += 1;
            }
            Value::Float(f) => {
                float_total += f;
                count += 1;
                is_float = true;
            }
            other => {
                return Err(DynQueryError::Execution(format!(
                    "cannot aggregate non-numeric value {other:?}"
                )));
            }
        }
    }
    match fold {
        Fold::Sum if is_float => Ok(Value::Float(float_total)),
        Fold::Sum => Ok(Value::Int(int_total)),
        Fold::Avg if count == 0 => Ok(Value::Null),
        Fold::Avg => Ok(Value::Float(float_total / count as f64)),
    }
}

fn pick_extreme(value: Value, keep: Ordering) -> Result<Value> {
    let items = match value {
        Value::Null => Vec::new(),
        Value::Seq(items) => items,
        other => {
            return Err(DynQueryError::Execution(format!(
                "cannot aggregate non-sequence value {other:?}"
            )));
        }
    };
    let mut best: Option<Value> = None;
    for item in items {
        if item.is_null() {
            continue;
        }
        best = match best {
            None => Some(item),
            Some(current) => {
                if compare_values(&item, &current)? == keep {
                    Some(item)
                } else {
                    Some(current)
                }
            }
        };
    }
    Ok(best.unwrap_or(Value::Null))
}

fn compare_values(a: &Value, b: &Value) -> Result<Ordering> {
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    };
    ordering.ok_or_else(|| {
        DynQueryError::Execution(format!("cannot compare values {a:?} and {b:?}"))
    })
}

/// Evaluation environment: placeholder bindings, innermost last.
#[derive(Debug, Default)]
pub struct Env {
    vars: SmallVec<[(ParamId, Value); 2]>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, param: ParamId, value: Value) {
        self.vars.push((param, value));
    }

    pub fn pop(&mut self) {
        self.vars.pop();
    }

    pub fn lookup(&self, param: ParamId) -> Option<&Value> {
        self.vars
            .iter()
            .rev()
            .find(|(bound, _)| *bound == param)
            .map(|(_, value)| value)
    }
}

/// Replaces every occurrence of placeholder `from` with `to`.
///
/// Used to splice a declared fragment into a tree with its placeholder
/// rebound to the current source expression.
pub fn rebind_param(expr: &Expr, from: ParamId, to: &Expr) -> Expr {
    match expr {
        Expr::Param(param) if *param == from => to.clone(),
        Expr::Param(param) => Expr::Param(*param),
        Expr::Literal(value) => Expr::Literal(value.clone()),
        Expr::Field { source, name } => Expr::Field {
            source: Box::new(rebind_param(source, from, to)),
            name: name.clone(),
        },
        Expr::NullGuard { source, inner } => Expr::NullGuard {
            source: Box::new(rebind_param(source, from, to)),
            inner: Box::new(rebind_param(inner, from, to)),
        },
        Expr::MapSeq { source, param, body } => Expr::MapSeq {
            source: Box::new(rebind_param(source, from, to)),
            param: *param,
            body: Box::new(rebind_param(body, from, to)),
        },
        Expr::Construct { shape, bindings } => Expr::Construct {
            shape: shape.clone(),
            bindings: bindings
                .iter()
                .map(|(name, binding)| (name.clone(), rebind_param(binding, from, to)))
                .collect(),
        },
        Expr::Sum(inner) => Expr::Sum(Box::new(rebind_param(inner, from, to))),
        Expr::Count(inner) => Expr::Count(Box::new(rebind_param(inner, from, to))),
        Expr::Avg(inner) => Expr::Avg(Box::new(rebind_param(inner, from, to))),
        Expr::Min(inner) => Expr::Min(Box::new(rebind_param(inner, from, to))),
        Expr::Max(inner) => Expr::Max(Box::new(rebind_param(inner, from, to))),
    }
}

fn collect_free_params(expr: &Expr, bound: &mut Vec<ParamId>, free: &mut Vec<ParamId>) {
    match expr {
        Expr::Param(param) => {
            if !bound.contains(param) && !free.contains(param) {
                free.push(*param);
            }
        }
        Expr::Literal(_) => {}
        Expr::Field { source, .. } => collect_free_params(source, bound, free),
        Expr::NullGuard { source, inner } => {
            collect_free_params(source, bound, free);
            collect_free_params(inner, bound, free);
        }
        Expr::MapSeq { source, param, body } => {
            collect_free_params(source, bound, free);
            bound.push(*param);
            collect_free_params(body, bound, free);
            bound.pop();
        }
        Expr::Construct { bindings, .. } => {
            for (_, binding) in bindings {
                collect_free_params(binding, bound, free);
            }
        }
        Expr::Sum(inner)
        | Expr::Count(inner)
        | Expr::Avg(inner)
        | Expr::Min(inner)
        | Expr::Max(inner) => collect_free_params(inner, bound, free),
    }
}

/// Placeholders an expression reads without binding them itself.
pub fn free_params(expr: &Expr) -> Vec<ParamId> {
    let mut bound = Vec::new();
    let mut free = Vec::new();
    collect_free_params(expr, &mut bound, &mut free);
    free
}

/// The lambda analog handed to query operators: a body expression plus the
/// placeholder it reads its source item through.
#[derive(Debug, Clone)]
pub struct ProjectionExpr {
    param: ParamId,
    body: Expr,
}

impl ProjectionExpr {
    pub fn new(param: ParamId, body: Expr) -> Self {
        Self { param, body }
    }

    pub fn param(&self) -> ParamId {
        self.param
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }

    /// Evaluates the projection for one source item.
    pub fn eval_for(&self, item: &Value) -> Result<Value> {
        let mut env = Env::new();
        env.push(self.param, item.clone());
        self.body.eval(&mut env)
    }
}

/// A pre-declared, single-parameter expression fragment: a named
/// aggregate-expression field.
///
/// Reads that resolve to one of these splice the fragment in with its
/// placeholder rebound to the current source, instead of reading a stored
/// field.
#[derive(Debug, Clone)]
pub struct ExprDecl {
    name: CompactString,
    param: ParamId,
    body: Box<Expr>,
    result: Box<FieldKind>,
}

impl ExprDecl {
    pub fn new(
        name: impl Into<CompactString>,
        param: ParamId,
        body: Expr,
        result: FieldKind,
    ) -> Self {
        Self {
            name: name.into(),
            param,
            body: Box::new(body),
            result: Box::new(result),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn result_kind(&self) -> &FieldKind {
        &self.result
    }

    /// Checks the fragment is a well-formed single-parameter expression.
    pub fn validate(&self) -> Result<()> {
        if matches!(*self.result, FieldKind::Expr(_)) {
            return Err(DynQueryError::InvalidAggregateDeclaration {
                name: self.name.to_string(),
                reason: "result kind must not itself be an expression field".into(),
            });
        }
        let free = free_params(&self.body);
        if free.iter().any(|param| *param != self.param) {
            return Err(DynQueryError::InvalidAggregateDeclaration {
                name: self.name.to_string(),
                reason: "fragment reads a placeholder other than its own parameter".into(),
            });
        }
        Ok(())
    }

    /// Validates the fragment and splices it with the placeholder rebound to
    /// `source`.
    pub fn splice(&self, source: &Expr) -> Result<Expr> {
        self.validate()?;
        Ok(rebind_param(&self.body, self.param, source))
    }

    /// Declares `sum(members.field)` as a group-scope aggregate.
    pub fn group_sum(name: impl Into<CompactString>, field: &str, result: FieldKind) -> Self {
        Self::group_fold(name, field, result, Expr::Sum)
    }

    /// Declares `count(members)` as a group-scope aggregate.
    pub fn group_count(name: impl Into<CompactString>) -> Self {
        let group = ParamId::fresh();
        let members = Expr::field(Expr::Param(group), crate::group::ITEMS_FIELD);
        Self::new(
            name,
            group,
            Expr::Count(Box::new(members)),
            FieldKind::Int,
        )
    }

    /// Declares `avg(members.field)` as a group-scope aggregate.
    pub fn group_avg(name: impl Into<CompactString>, field: &str) -> Self {
        Self::group_fold(name, field, FieldKind::Float, Expr::Avg)
    }

    /// Declares `min(members.field)` as a group-scope aggregate.
    pub fn group_min(name: impl Into<CompactString>, field: &str, result: FieldKind) -> Self {
        Self::group_fold(name, field, result, Expr::Min)
    }

    /// Declares `max(members.field)` as a group-scope aggregate.
    pub fn group_max(name: impl Into<CompactString>, field: &str, result: FieldKind) -> Self {
        Self::group_fold(name, field, result, Expr::Max)
    }

    fn group_fold(
        name: impl Into<CompactString>,
        field: &str,
        result: FieldKind,
        fold: fn(Box<Expr>) -> Expr,
    ) -> Self {
        let group = ParamId::fresh();
        let member = ParamId::fresh();
        let members = Expr::field(Expr::Param(group), crate::group::ITEMS_FIELD);
        let mapped = Expr::MapSeq {
            source: Box::new(members),
            param: member,
            body: Box::new(Expr::read_path(Expr::Param(member), field)),
        };
        Self::new(name, group, fold(Box::new(mapped)), result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    #[test]
    fn field_read_propagates_null() {
        let param = ParamId::fresh();
        let expr = Expr::read_path(Expr::Param(param), "a.b");
        let mut env = Env::new();
        env.push(param, Value::Record(record! { a: Value::Null }));
        assert_eq!(expr.eval(&mut env).unwrap(), Value::Null);
    }

    #[test]
    fn null_guard_short_circuits() {
        let param = ParamId::fresh();
        let guard = Expr::null_guard(
            Expr::field(Expr::Param(param), "a"),
            Expr::Literal(Value::Int(1)),
        );
        let mut env = Env::new();
        env.push(param, Value::Record(record! { a: Value::Null }));
        assert_eq!(guard.eval(&mut env).unwrap(), Value::Null);

        let mut env = Env::new();
        env.push(param, Value::Record(record! { a: 5 }));
        assert_eq!(guard.eval(&mut env).unwrap(), Value::Int(1));
    }

    #[test]
    fn sum_over_mapped_sequence() {
        let group = ParamId::fresh();
        let member = ParamId::fresh();
        let expr = Expr::Sum(Box::new(Expr::MapSeq {
            source: Box::new(Expr::field(Expr::Param(group), "Items")),
            param: member,
            body: Box::new(Expr::field(Expr::Param(member), "total")),
        }));
        let mut env = Env::new();
        env.push(
            group,
            Value::Record(record! {
                Items: vec![
                    Value::Record(record! { total: 10 }),
                    Value::Record(record! { total: 5 }),
                ]
            }),
        );
        assert_eq!(expr.eval(&mut env).unwrap(), Value::Int(15));
    }

    #[test]
    fn rebind_substitutes_only_the_target_param() {
        let outer = ParamId::fresh();
        let inner = ParamId::fresh();
        let body = Expr::field(Expr::Param(outer), "x");
        let rebound = rebind_param(&body, outer, &Expr::field(Expr::Param(inner), "y"));
        let mut env = Env::new();
        env.push(inner, Value::Record(record! { y: record! { x: 7 } }));
        assert_eq!(rebound.eval(&mut env).unwrap(), Value::Int(7));
    }

    #[test]
    fn decl_with_foreign_placeholder_is_invalid() {
        let param = ParamId::fresh();
        let foreign = ParamId::fresh();
        let decl = ExprDecl::new(
            "bad",
            param,
            Expr::field(Expr::Param(foreign), "x"),
            FieldKind::Int,
        );
        let err = decl.splice(&Expr::Param(ParamId::fresh())).unwrap_err();
        assert!(matches!(
            err,
            crate::error::DynQueryError::InvalidAggregateDeclaration { .. }
        ));
    }

    #[test]
    fn map_seq_param_shadows_and_restores() {
        let param = ParamId::fresh();
        let decl = ExprDecl::group_sum("total", "total", FieldKind::Int);
        let spliced = decl.splice(&Expr::Param(param)).unwrap();
        assert_eq!(free_params(&spliced), vec![param]);
    }
}
