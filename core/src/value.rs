use compact_str::CompactString;
use smallvec::SmallVec;

/// A runtime value flowing through a pipeline.
///
/// Synthesized output records are built from these instead of emitted types:
/// the engine projects into a generic tagged value model and keeps the
/// structural description in a separate [`Shape`](crate::shape::Shape).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value; also the result of a null-propagated read
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Record(Record),
    Seq(Vec<Value>),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub const fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::Record(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Seq(value)
    }
}

/// An ordered field-name to value mapping with case-insensitive lookup.
///
/// Field order is the order fields were pushed; projections push in the
/// synthesized shape's field order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: SmallVec<[(CompactString, Box<Value>); 4]>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: SmallVec::with_capacity(capacity),
        }
    }

    /// Appends a field. Does not check for duplicates.
    pub fn push(&mut self, name: impl Into<CompactString>, value: impl Into<Value>) {
        self.fields.push((name.into(), Box::new(value.into())));
    }

    /// Case-insensitive field read.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| &**value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), &**value))
    }
}

impl<N: Into<CompactString>, V: Into<Value>> FromIterator<(N, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(name, value)| (name.into(), Box::new(value.into())))
                .collect(),
        }
    }
}

/// Builds a [`Record`] value from field/value pairs.
///
/// ```
/// use dynquery_core::{record, value::Value};
///
/// let row = record! { city: "A", total: 10 };
/// assert_eq!(row.get("CITY"), Some(&Value::Text("A".into())));
/// ```
#[macro_export]
macro_rules! record {
    { $($name:ident : $value:expr),* $(,)? } => {{
        let mut record = $crate::value::Record::new();
        $(record.push(stringify!($name), $crate::value::Value::from($value));)*
        record
    }};
}
