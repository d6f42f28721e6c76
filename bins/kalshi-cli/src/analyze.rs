//! JSON shape analysis over JSONL dumps

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Per key, how many times each JSON value type was seen
pub type TypeCounts = BTreeMap<String, BTreeMap<&'static str, u64>>;

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn analyze_json_types<'a, I>(records: I) -> TypeCounts
where
    I: IntoIterator<Item = &'a Map<String, Value>>,
{
    let mut counts = TypeCounts::new();
    for record in records {
        for (key, value) in record {
            *counts.entry(key.clone()).or_default().entry(type_name(value)).or_insert(0) += 1;
        }
    }
    counts
}
