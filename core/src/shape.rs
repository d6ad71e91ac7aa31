use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use compact_str::{CompactString, format_compact};

use crate::expr::ExprDecl;

/// Shared handle to a field shape. Shapes synthesized from equal signatures
/// are pointer-equal, so projections composed over them line up structurally.
pub type ShapeRef = Arc<Shape>;

/// Semantic kind of a declared field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Text,
    /// Reference to a nested record
    Record(ShapeRef),
    /// Enumerable of nested records
    Seq(ShapeRef),
    /// A named aggregate-expression field; reads splice the declared fragment
    Expr(ExprDecl),
}

impl FieldKind {
    /// Canonical signature token used in cache keys.
    pub(crate) fn signature(&self) -> CompactString {
        match self {
            FieldKind::Bool => "bool".into(),
            FieldKind::Int => "int".into(),
            FieldKind::Float => "float".into(),
            FieldKind::Text => "text".into(),
            FieldKind::Record(shape) => format_compact!("record<{}>", shape.name()),
            FieldKind::Seq(shape) => format_compact!("seq<{}>", shape.name()),
            FieldKind::Expr(decl) => {
                format_compact!("expr<{}:{}>", decl.name(), decl.result_kind().signature())
            }
        }
    }

    /// Shape of the nested record, for record and sequence kinds.
    pub fn record_shape(&self) -> Option<&ShapeRef> {
        match self {
            FieldKind::Record(shape) | FieldKind::Seq(shape) => Some(shape),
            _ => None,
        }
    }
}

/// One declared field of a shape.
#[derive(Debug, Clone)]
pub struct FieldDef {
    name: CompactString,
    kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: impl Into<CompactString>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }
}

/// Declared field shape of a source item or synthesized record.
///
/// A shape is the structural description the engine validates paths against;
/// runtime data stays in the generic [`Record`](crate::value::Record) model.
/// `group_exprs` carries group-scope aggregate declarations that are lifted
/// onto the synthesized group shape when items of this shape are grouped.
#[derive(Debug)]
pub struct Shape {
    name: CompactString,
    fields: Vec<FieldDef>,
    group_exprs: Vec<ExprDecl>,
}

impl Shape {
    pub fn new(name: impl Into<CompactString>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            group_exprs: Vec::new(),
        }
    }

    /// Adds a group-scope aggregate declaration.
    #[must_use]
    pub fn with_group_expr(mut self, decl: ExprDecl) -> Self {
        self.group_exprs.push(decl);
        self
    }

    pub fn into_ref(self) -> ShapeRef {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Case-insensitive field resolution. The declared name is preserved on
    /// the returned definition.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(name))
    }

    pub fn group_exprs(&self) -> &[ExprDecl] {
        &self.group_exprs
    }
}

fn canonical_signature(fields: &[(CompactString, FieldKind)], nested: bool) -> CompactString {
    let mut parts: Vec<CompactString> = fields
        .iter()
        .map(|(name, kind)| format_compact!("{}={}", name.to_ascii_lowercase(), kind.signature()))
        .collect();
    parts.sort_unstable();
    let mut key = CompactString::new(if nested { "n+" } else { "" });
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push('+');
        }
        key.push_str(part);
    }
    key
}

/// Memoizing synthesizer for composite record shapes.
///
/// Shapes are created lazily on first signature request and cached for the
/// lifetime of the cache; concurrent first requests for one signature
/// converge on a single shared shape (first writer wins). Construction may
/// race, but only one result is ever published.
#[derive(Debug, Default)]
pub struct ShapeCache {
    shapes: RwLock<HashMap<CompactString, ShapeRef>>,
    next_id: AtomicU64,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache. Tests construct fresh instances instead for
    /// isolation.
    pub fn global() -> &'static ShapeCache {
        static GLOBAL: OnceLock<ShapeCache> = OnceLock::new();
        GLOBAL.get_or_init(ShapeCache::new)
    }

    /// Returns the shared shape for the given field signature, synthesizing
    /// it on first request.
    ///
    /// With `nested` set, fields sharing a dotted prefix (`a.x`, `a.y`)
    /// collapse into one field `a` whose kind is a synthesized sub-record
    /// over the remainders. Without it, each dotted name is treated as one
    /// already-resolved field.
    pub fn get(&self, fields: &[(CompactString, FieldKind)], nested: bool) -> ShapeRef {
        let key = canonical_signature(fields, nested);
        {
            let shapes = self.shapes.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(shape) = shapes.get(&key) {
                return shape.clone();
            }
        }
        let shape = Arc::new(self.synthesize(fields, nested));
        let mut shapes = self.shapes.write().unwrap_or_else(PoisonError::into_inner);
        shapes.entry(key).or_insert(shape).clone()
    }

    fn synthesize(&self, fields: &[(CompactString, FieldKind)], nested: bool) -> Shape {
        let name = format_compact!("t_{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        if !nested {
            let defs = fields
                .iter()
                .map(|(field, kind)| FieldDef::new(field.clone(), kind.clone()))
                .collect();
            return Shape::new(name, defs);
        }
        // Group by head segment; heads with remainders become sub-records.
        let mut heads: Vec<(CompactString, Vec<(CompactString, FieldKind)>, Option<FieldKind>)> =
            Vec::new();
        for (field, kind) in fields {
            let (head, rest) = match field.split_once('.') {
                Some((head, rest)) => (CompactString::from(head), Some(CompactString::from(rest))),
                None => (field.clone(), None),
            };
            let index = match heads
                .iter()
                .position(|(name, ..)| name.eq_ignore_ascii_case(&head))
            {
                Some(index) => index,
                None => {
                    heads.push((head, Vec::new(), None));
                    heads.len() - 1
                }
            };
            let entry = &mut heads[index];
            match rest {
                Some(rest) => entry.1.push((rest, kind.clone())),
                None => entry.2 = Some(kind.clone()),
            }
        }
        let defs = heads
            .into_iter()
            .map(|(head, subs, bare)| {
                if subs.is_empty() {
                    FieldDef::new(head, bare.unwrap_or(FieldKind::Text))
                } else {
                    FieldDef::new(head, FieldKind::Record(self.get(&subs, true)))
                }
            })
            .collect();
        Shape::new(name, defs)
    }
}
