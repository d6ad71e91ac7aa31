use dynquery_core::value::{Record, Value};

/// Converts a JSON document into the engine's value model.
///
/// Numbers become integers when they fit, floats otherwise. Object keys keep
/// their document spelling; field reads are case-insensitive anyway.
pub fn document_to_value(document: &serde_json::Value) -> Value {
    match document {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(flag) => Value::Bool(*flag),
        serde_json::Value::Number(number) => number
            .as_i64()
            .map(Value::Int)
            .or_else(|| number.as_f64().map(Value::Float))
            .unwrap_or(Value::Null),
        serde_json::Value::String(text) => Value::Text(text.clone()),
        serde_json::Value::Array(items) => {
            Value::Seq(items.iter().map(document_to_value).collect())
        }
        serde_json::Value::Object(fields) => {
            let mut record = Record::with_capacity(fields.len());
            for (name, field) in fields {
                record.push(name.as_str(), document_to_value(field));
            }
            Value::Record(record)
        }
    }
}
