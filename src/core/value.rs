//! The in-memory representation of model data.
//!
//! A model's document is a tree of [`DataValue`] nodes. Every node carries a
//! [`ValueId`] that stays stable for the node's lifetime, so operations can
//! address any part of the document without structural paths.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use super::id::{ValueId, ValueIdGenerator};

/// One node of a model's document tree.
#[derive(Clone, Debug, PartialEq)]
pub enum DataValue {
    Object(ObjectValue),
    Array(ArrayValue),
    String(StringValue),
    Double(DoubleValue),
    Boolean(BooleanValue),
    Date(DateValue),
    Null(NullValue),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectValue {
    pub vid: ValueId,
    pub children: BTreeMap<String, DataValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArrayValue {
    pub vid: ValueId,
    pub children: Vec<DataValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StringValue {
    pub vid: ValueId,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DoubleValue {
    pub vid: ValueId,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BooleanValue {
    pub vid: ValueId,
    pub value: bool,
}

/// Milliseconds since the Unix epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct DateValue {
    pub vid: ValueId,
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NullValue {
    pub vid: ValueId,
}

impl DataValue {
    pub fn vid(&self) -> &ValueId {
        match self {
            DataValue::Object(v) => &v.vid,
            DataValue::Array(v) => &v.vid,
            DataValue::String(v) => &v.vid,
            DataValue::Double(v) => &v.vid,
            DataValue::Boolean(v) => &v.vid,
            DataValue::Date(v) => &v.vid,
            DataValue::Null(v) => &v.vid,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            DataValue::Object(_) => "object",
            DataValue::Array(_) => "array",
            DataValue::String(_) => "string",
            DataValue::Double(_) => "double",
            DataValue::Boolean(_) => "boolean",
            DataValue::Date(_) => "date",
            DataValue::Null(_) => "null",
        }
    }

    /// Walk the subtree rooted here, visiting every node.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a DataValue)) {
        f(self);
        match self {
            DataValue::Object(obj) => {
                for child in obj.children.values() {
                    child.visit(f);
                }
            }
            DataValue::Array(arr) => {
                for child in &arr.children {
                    child.visit(f);
                }
            }
            _ => {}
        }
    }

    /// Convert a JSON value into a data value tree, minting a fresh id for
    /// every node. Numbers become doubles; there is no JSON form for dates.
    pub fn from_json(json: &JsonValue, ids: &mut ValueIdGenerator) -> DataValue {
        match json {
            JsonValue::Null => DataValue::Null(NullValue { vid: ids.next_id() }),
            JsonValue::Bool(b) => DataValue::Boolean(BooleanValue {
                vid: ids.next_id(),
                value: *b,
            }),
            JsonValue::Number(n) => DataValue::Double(DoubleValue {
                vid: ids.next_id(),
                value: n.as_f64().unwrap_or(0.0),
            }),
            JsonValue::String(s) => DataValue::String(StringValue {
                vid: ids.next_id(),
                value: s.clone(),
            }),
            JsonValue::Array(items) => {
                let vid = ids.next_id();
                let children = items
                    .iter()
                    .map(|item| DataValue::from_json(item, ids))
                    .collect();
                DataValue::Array(ArrayValue { vid, children })
            }
            JsonValue::Object(entries) => {
                let vid = ids.next_id();
                let children = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), DataValue::from_json(v, ids)))
                    .collect();
                DataValue::Object(ObjectValue { vid, children })
            }
        }
    }

    /// Project the subtree to plain JSON, dropping value ids. Dates become
    /// their millisecond timestamps.
    pub fn to_json(&self) -> JsonValue {
        match self {
            DataValue::Null(_) => JsonValue::Null,
            DataValue::Boolean(v) => JsonValue::Bool(v.value),
            DataValue::Double(v) => serde_json::Number::from_f64(v.value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DataValue::Date(v) => JsonValue::from(v.value),
            DataValue::String(v) => JsonValue::String(v.value.clone()),
            DataValue::Array(arr) => {
                JsonValue::Array(arr.children.iter().map(DataValue::to_json).collect())
            }
            DataValue::Object(obj) => JsonValue::Object(
                obj.children
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<ObjectValue> for DataValue {
    fn from(v: ObjectValue) -> Self {
        DataValue::Object(v)
    }
}

impl From<ArrayValue> for DataValue {
    fn from(v: ArrayValue) -> Self {
        DataValue::Array(v)
    }
}
