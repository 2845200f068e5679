//! The live document tree.
//!
//! [`ValueTree`] owns a model's data between snapshots. Nodes live in a flat
//! arena keyed by value id, with containers referencing children by id, so
//! operation targets resolve in O(1) and nothing ever needs a parent link.
//!
//! `apply` is total on a well-formed operation against the current tree.
//! Every violation is an [`ApplyError`], which the coordinator treats as
//! model-fatal.

use std::collections::{BTreeMap, HashMap};

use super::error::ApplyError;
use super::id::ValueId;
use super::operation::{AppliedDiscreteOperation, DiscreteOperation};
use super::value::{
    ArrayValue, BooleanValue, DataValue, DateValue, DoubleValue, NullValue, ObjectValue,
    StringValue,
};

#[derive(Clone, Debug)]
enum Node {
    Object(BTreeMap<String, ValueId>),
    Array(Vec<ValueId>),
    String(String),
    Double(f64),
    Boolean(bool),
    Date(i64),
    Null,
}

impl Node {
    fn type_name(&self) -> &'static str {
        match self {
            Node::Object(_) => "object",
            Node::Array(_) => "array",
            Node::String(_) => "string",
            Node::Double(_) => "double",
            Node::Boolean(_) => "boolean",
            Node::Date(_) => "date",
            Node::Null => "null",
        }
    }
}

/// A model's document between snapshots.
#[derive(Clone, Debug)]
pub struct ValueTree {
    root: ValueId,
    nodes: HashMap<ValueId, Node>,
}

impl ValueTree {
    /// Build a tree from a materialized root, registering every node.
    pub fn new(root: ObjectValue) -> Result<Self, ApplyError> {
        let root_vid = root.vid.clone();
        let mut tree = Self {
            root: root_vid,
            nodes: HashMap::new(),
        };
        tree.register(&DataValue::Object(root))?;
        Ok(tree)
    }

    pub fn root_vid(&self) -> &ValueId {
        &self.root
    }

    pub fn contains(&self, vid: &ValueId) -> bool {
        self.nodes.contains_key(vid)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Materialize the subtree rooted at `vid` as a deep copy.
    pub fn get(&self, vid: &ValueId) -> Option<DataValue> {
        self.nodes.get(vid).map(|node| self.materialize_node(vid, node))
    }

    /// Deep copy of the whole document, for snapshots and open replies.
    pub fn materialize(&self) -> ObjectValue {
        match self.get(&self.root) {
            Some(DataValue::Object(obj)) => obj,
            // The root is registered as an object at construction and
            // no operation can replace the root node itself.
            _ => unreachable!("tree root must be a registered object"),
        }
    }

    /// Apply one discrete operation, returning its applied form with
    /// inverse data. No-op operations validate nothing and mutate nothing.
    pub fn apply(&mut self, op: &DiscreteOperation) -> Result<AppliedDiscreteOperation, ApplyError> {
        if op.is_noop() {
            return Ok(self.applied_noop(op));
        }

        match op {
            DiscreteOperation::StringInsert {
                vid,
                index,
                value,
                no_op,
            } => {
                let current = self.string_mut(vid)?;
                let len = current.chars().count();
                if *index > len {
                    return Err(ApplyError::IndexOutOfBounds {
                        vid: vid.clone(),
                        index: *index,
                        len,
                    });
                }
                let at = char_to_byte(current, *index);
                current.insert_str(at, value);
                Ok(AppliedDiscreteOperation::StringInsert {
                    vid: vid.clone(),
                    no_op: *no_op,
                    index: *index,
                    value: value.clone(),
                })
            }

            DiscreteOperation::StringRemove {
                vid,
                index,
                value,
                no_op,
            } => {
                let remove_chars = value.chars().count();
                let current = self.string_mut(vid)?;
                let len = current.chars().count();
                if *index >= len || index + remove_chars > len {
                    return Err(ApplyError::IndexOutOfBounds {
                        vid: vid.clone(),
                        index: *index,
                        len,
                    });
                }
                let start = char_to_byte(current, *index);
                let end = char_to_byte(current, index + remove_chars);
                let removed: String = current.drain(start..end).collect();
                Ok(AppliedDiscreteOperation::StringRemove {
                    vid: vid.clone(),
                    no_op: *no_op,
                    index: *index,
                    value: removed,
                })
            }

            DiscreteOperation::StringSet { vid, value, no_op } => {
                let current = self.string_mut(vid)?;
                let old_value = std::mem::replace(current, value.clone());
                Ok(AppliedDiscreteOperation::StringSet {
                    vid: vid.clone(),
                    no_op: *no_op,
                    value: value.clone(),
                    old_value,
                })
            }

            DiscreteOperation::ArrayInsert {
                vid,
                index,
                value,
                no_op,
            } => {
                let len = self.array_len(vid)?;
                if *index > len {
                    return Err(ApplyError::IndexOutOfBounds {
                        vid: vid.clone(),
                        index: *index,
                        len,
                    });
                }
                let child = self.register(value)?;
                self.array_mut(vid)?.insert(*index, child);
                Ok(AppliedDiscreteOperation::ArrayInsert {
                    vid: vid.clone(),
                    no_op: *no_op,
                    index: *index,
                    value: value.clone(),
                })
            }

            DiscreteOperation::ArrayRemove { vid, index, no_op } => {
                let len = self.array_len(vid)?;
                if *index >= len {
                    return Err(ApplyError::IndexOutOfBounds {
                        vid: vid.clone(),
                        index: *index,
                        len,
                    });
                }
                let child = self.array_mut(vid)?.remove(*index);
                let old_value = self
                    .get(&child)
                    .ok_or(ApplyError::MissingValue { vid: child.clone() })?;
                self.unregister(&child);
                Ok(AppliedDiscreteOperation::ArrayRemove {
                    vid: vid.clone(),
                    no_op: *no_op,
                    index: *index,
                    old_value,
                })
            }

            DiscreteOperation::ArrayReplace {
                vid,
                index,
                value,
                no_op,
            } => {
                let len = self.array_len(vid)?;
                if *index >= len {
                    return Err(ApplyError::IndexOutOfBounds {
                        vid: vid.clone(),
                        index: *index,
                        len,
                    });
                }
                let previous = self.array_mut(vid)?[*index].clone();
                let old_value = self
                    .get(&previous)
                    .ok_or(ApplyError::MissingValue { vid: previous.clone() })?;
                self.unregister(&previous);
                let child = self.register(value)?;
                self.array_mut(vid)?[*index] = child;
                Ok(AppliedDiscreteOperation::ArrayReplace {
                    vid: vid.clone(),
                    no_op: *no_op,
                    index: *index,
                    value: value.clone(),
                    old_value,
                })
            }

            DiscreteOperation::ArrayMove {
                vid,
                from_index,
                to_index,
                no_op,
            } => {
                let len = self.array_len(vid)?;
                if *from_index >= len {
                    return Err(ApplyError::IndexOutOfBounds {
                        vid: vid.clone(),
                        index: *from_index,
                        len,
                    });
                }
                if *to_index >= len {
                    return Err(ApplyError::IndexOutOfBounds {
                        vid: vid.clone(),
                        index: *to_index,
                        len,
                    });
                }
                let children = self.array_mut(vid)?;
                let child = children.remove(*from_index);
                children.insert(*to_index, child);
                Ok(AppliedDiscreteOperation::ArrayMove {
                    vid: vid.clone(),
                    no_op: *no_op,
                    from_index: *from_index,
                    to_index: *to_index,
                })
            }

            DiscreteOperation::ArraySet { vid, value, no_op } => {
                let old_children = match self.nodes.get(vid) {
                    Some(Node::Array(children)) => children.clone(),
                    Some(node) => {
                        return Err(ApplyError::WrongType {
                            vid: vid.clone(),
                            expected: "array",
                            actual: node.type_name(),
                        });
                    }
                    None => return Err(ApplyError::MissingValue { vid: vid.clone() }),
                };
                let old_value = old_children
                    .iter()
                    .map(|child| {
                        self.get(child)
                            .ok_or(ApplyError::MissingValue { vid: child.clone() })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                for child in &old_children {
                    self.unregister(child);
                }
                let new_children = value
                    .iter()
                    .map(|child| self.register(child))
                    .collect::<Result<Vec<_>, _>>()?;
                *self.array_mut(vid)? = new_children;
                Ok(AppliedDiscreteOperation::ArraySet {
                    vid: vid.clone(),
                    no_op: *no_op,
                    value: value.clone(),
                    old_value,
                })
            }

            DiscreteOperation::ObjectAddProperty {
                vid,
                property,
                value,
                no_op,
            } => {
                let old_value = self.replace_property(vid, property, value)?;
                Ok(AppliedDiscreteOperation::ObjectAddProperty {
                    vid: vid.clone(),
                    no_op: *no_op,
                    property: property.clone(),
                    value: value.clone(),
                    old_value,
                })
            }

            DiscreteOperation::ObjectSetProperty {
                vid,
                property,
                value,
                no_op,
            } => {
                let old_value = self.replace_property(vid, property, value)?;
                Ok(AppliedDiscreteOperation::ObjectSetProperty {
                    vid: vid.clone(),
                    no_op: *no_op,
                    property: property.clone(),
                    value: value.clone(),
                    old_value,
                })
            }

            DiscreteOperation::ObjectRemoveProperty {
                vid,
                property,
                no_op,
            } => {
                let child = match self.object_mut(vid)?.remove(property) {
                    Some(child) => child,
                    None => {
                        return Err(ApplyError::MissingProperty {
                            vid: vid.clone(),
                            property: property.clone(),
                        });
                    }
                };
                let old_value = self
                    .get(&child)
                    .ok_or(ApplyError::MissingValue { vid: child.clone() })?;
                self.unregister(&child);
                Ok(AppliedDiscreteOperation::ObjectRemoveProperty {
                    vid: vid.clone(),
                    no_op: *no_op,
                    property: property.clone(),
                    old_value,
                })
            }

            DiscreteOperation::ObjectSet { vid, value, no_op } => {
                let old_children = match self.nodes.get(vid) {
                    Some(Node::Object(children)) => children.clone(),
                    Some(node) => {
                        return Err(ApplyError::WrongType {
                            vid: vid.clone(),
                            expected: "object",
                            actual: node.type_name(),
                        });
                    }
                    None => return Err(ApplyError::MissingValue { vid: vid.clone() }),
                };
                let old_value = old_children
                    .iter()
                    .map(|(key, child)| {
                        self.get(child)
                            .map(|value| (key.clone(), value))
                            .ok_or(ApplyError::MissingValue { vid: child.clone() })
                    })
                    .collect::<Result<BTreeMap<_, _>, _>>()?;
                for child in old_children.values() {
                    self.unregister(child);
                }
                let new_children = value
                    .iter()
                    .map(|(key, child)| Ok((key.clone(), self.register(child)?)))
                    .collect::<Result<BTreeMap<_, _>, ApplyError>>()?;
                *self.object_mut(vid)? = new_children;
                Ok(AppliedDiscreteOperation::ObjectSet {
                    vid: vid.clone(),
                    no_op: *no_op,
                    value: value.clone(),
                    old_value,
                })
            }

            DiscreteOperation::NumberAdd { vid, value, no_op } => {
                let current = self.double_mut(vid)?;
                *current = clamp_finite(*current + *value);
                Ok(AppliedDiscreteOperation::NumberAdd {
                    vid: vid.clone(),
                    no_op: *no_op,
                    value: *value,
                })
            }

            DiscreteOperation::NumberSet { vid, value, no_op } => {
                let current = self.double_mut(vid)?;
                let old_value = std::mem::replace(current, *value);
                Ok(AppliedDiscreteOperation::NumberSet {
                    vid: vid.clone(),
                    no_op: *no_op,
                    value: *value,
                    old_value,
                })
            }

            DiscreteOperation::BooleanSet { vid, value, no_op } => {
                let node = self.node_mut(vid)?;
                let Node::Boolean(current) = node else {
                    return Err(ApplyError::WrongType {
                        vid: vid.clone(),
                        expected: "boolean",
                        actual: node.type_name(),
                    });
                };
                let old_value = std::mem::replace(current, *value);
                Ok(AppliedDiscreteOperation::BooleanSet {
                    vid: vid.clone(),
                    no_op: *no_op,
                    value: *value,
                    old_value,
                })
            }

            DiscreteOperation::DateSet { vid, value, no_op } => {
                let node = self.node_mut(vid)?;
                let Node::Date(current) = node else {
                    return Err(ApplyError::WrongType {
                        vid: vid.clone(),
                        expected: "date",
                        actual: node.type_name(),
                    });
                };
                let old_value = std::mem::replace(current, *value);
                Ok(AppliedDiscreteOperation::DateSet {
                    vid: vid.clone(),
                    no_op: *no_op,
                    value: *value,
                    old_value,
                })
            }
        }
    }

    fn replace_property(
        &mut self,
        vid: &ValueId,
        property: &str,
        value: &DataValue,
    ) -> Result<Option<DataValue>, ApplyError> {
        let previous = self.object_mut(vid)?.get(property).cloned();
        let old_value = match previous {
            Some(child) => {
                let old = self
                    .get(&child)
                    .ok_or(ApplyError::MissingValue { vid: child.clone() })?;
                self.unregister(&child);
                Some(old)
            }
            None => None,
        };
        let child = self.register(value)?;
        self.object_mut(vid)?.insert(property.to_string(), child);
        Ok(old_value)
    }

    fn register(&mut self, value: &DataValue) -> Result<ValueId, ApplyError> {
        let vid = value.vid().clone();
        let mut duplicate = None;
        value.visit(&mut |node| {
            if duplicate.is_none() && self.nodes.contains_key(node.vid()) {
                duplicate = Some(node.vid().clone());
            }
        });
        if let Some(vid) = duplicate {
            return Err(ApplyError::DuplicateValue { vid });
        }

        fn insert(nodes: &mut HashMap<ValueId, Node>, value: &DataValue) {
            let node = match value {
                DataValue::Object(obj) => {
                    let children = obj
                        .children
                        .iter()
                        .map(|(key, child)| {
                            insert(nodes, child);
                            (key.clone(), child.vid().clone())
                        })
                        .collect();
                    Node::Object(children)
                }
                DataValue::Array(arr) => {
                    let children = arr
                        .children
                        .iter()
                        .map(|child| {
                            insert(nodes, child);
                            child.vid().clone()
                        })
                        .collect();
                    Node::Array(children)
                }
                DataValue::String(v) => Node::String(v.value.clone()),
                DataValue::Double(v) => Node::Double(v.value),
                DataValue::Boolean(v) => Node::Boolean(v.value),
                DataValue::Date(v) => Node::Date(v.value),
                DataValue::Null(_) => Node::Null,
            };
            nodes.insert(value.vid().clone(), node);
        }

        insert(&mut self.nodes, value);
        Ok(vid)
    }

    fn unregister(&mut self, vid: &ValueId) {
        let Some(node) = self.nodes.remove(vid) else {
            return;
        };
        match node {
            Node::Object(children) => {
                for child in children.values() {
                    self.unregister(child);
                }
            }
            Node::Array(children) => {
                for child in &children {
                    self.unregister(child);
                }
            }
            _ => {}
        }
    }

    fn materialize_node(&self, vid: &ValueId, node: &Node) -> DataValue {
        match node {
            Node::Object(children) => DataValue::Object(ObjectValue {
                vid: vid.clone(),
                children: children
                    .iter()
                    .filter_map(|(key, child)| {
                        self.nodes
                            .get(child)
                            .map(|node| (key.clone(), self.materialize_node(child, node)))
                    })
                    .collect(),
            }),
            Node::Array(children) => DataValue::Array(ArrayValue {
                vid: vid.clone(),
                children: children
                    .iter()
                    .filter_map(|child| {
                        self.nodes
                            .get(child)
                            .map(|node| self.materialize_node(child, node))
                    })
                    .collect(),
            }),
            Node::String(value) => DataValue::String(StringValue {
                vid: vid.clone(),
                value: value.clone(),
            }),
            Node::Double(value) => DataValue::Double(DoubleValue {
                vid: vid.clone(),
                value: *value,
            }),
            Node::Boolean(value) => DataValue::Boolean(BooleanValue {
                vid: vid.clone(),
                value: *value,
            }),
            Node::Date(value) => DataValue::Date(DateValue {
                vid: vid.clone(),
                value: *value,
            }),
            Node::Null => DataValue::Null(NullValue { vid: vid.clone() }),
        }
    }

    /// Inverse data for a no-op operation. Nothing is validated or mutated;
    /// no-op operations exist only to keep version accounting dense, and
    /// their inverse fields are never consulted.
    fn applied_noop(&self, op: &DiscreteOperation) -> AppliedDiscreteOperation {
        let placeholder = DataValue::Null(NullValue {
            vid: op.vid().clone(),
        });
        match op {
            DiscreteOperation::StringInsert {
                vid,
                index,
                value,
                no_op,
            } => AppliedDiscreteOperation::StringInsert {
                vid: vid.clone(),
                no_op: *no_op,
                index: *index,
                value: value.clone(),
            },
            DiscreteOperation::StringRemove {
                vid,
                index,
                value,
                no_op,
            } => AppliedDiscreteOperation::StringRemove {
                vid: vid.clone(),
                no_op: *no_op,
                index: *index,
                value: value.clone(),
            },
            DiscreteOperation::StringSet { vid, value, no_op } => AppliedDiscreteOperation::StringSet {
                vid: vid.clone(),
                no_op: *no_op,
                value: value.clone(),
                old_value: String::new(),
            },
            DiscreteOperation::ArrayInsert {
                vid,
                index,
                value,
                no_op,
            } => AppliedDiscreteOperation::ArrayInsert {
                vid: vid.clone(),
                no_op: *no_op,
                index: *index,
                value: value.clone(),
            },
            DiscreteOperation::ArrayRemove { vid, index, no_op } => {
                AppliedDiscreteOperation::ArrayRemove {
                    vid: vid.clone(),
                    no_op: *no_op,
                    index: *index,
                    old_value: placeholder,
                }
            }
            DiscreteOperation::ArrayReplace {
                vid,
                index,
                value,
                no_op,
            } => AppliedDiscreteOperation::ArrayReplace {
                vid: vid.clone(),
                no_op: *no_op,
                index: *index,
                value: value.clone(),
                old_value: placeholder,
            },
            DiscreteOperation::ArrayMove {
                vid,
                from_index,
                to_index,
                no_op,
            } => AppliedDiscreteOperation::ArrayMove {
                vid: vid.clone(),
                no_op: *no_op,
                from_index: *from_index,
                to_index: *to_index,
            },
            DiscreteOperation::ArraySet { vid, value, no_op } => AppliedDiscreteOperation::ArraySet {
                vid: vid.clone(),
                no_op: *no_op,
                value: value.clone(),
                old_value: Vec::new(),
            },
            DiscreteOperation::ObjectAddProperty {
                vid,
                property,
                value,
                no_op,
            } => AppliedDiscreteOperation::ObjectAddProperty {
                vid: vid.clone(),
                no_op: *no_op,
                property: property.clone(),
                value: value.clone(),
                old_value: None,
            },
            DiscreteOperation::ObjectSetProperty {
                vid,
                property,
                value,
                no_op,
            } => AppliedDiscreteOperation::ObjectSetProperty {
                vid: vid.clone(),
                no_op: *no_op,
                property: property.clone(),
                value: value.clone(),
                old_value: None,
            },
            DiscreteOperation::ObjectRemoveProperty {
                vid,
                property,
                no_op,
            } => AppliedDiscreteOperation::ObjectRemoveProperty {
                vid: vid.clone(),
                no_op: *no_op,
                property: property.clone(),
                old_value: placeholder,
            },
            DiscreteOperation::ObjectSet { vid, value, no_op } => AppliedDiscreteOperation::ObjectSet {
                vid: vid.clone(),
                no_op: *no_op,
                value: value.clone(),
                old_value: BTreeMap::new(),
            },
            DiscreteOperation::NumberAdd { vid, value, no_op } => AppliedDiscreteOperation::NumberAdd {
                vid: vid.clone(),
                no_op: *no_op,
                value: *value,
            },
            DiscreteOperation::NumberSet { vid, value, no_op } => AppliedDiscreteOperation::NumberSet {
                vid: vid.clone(),
                no_op: *no_op,
                value: *value,
                old_value: 0.0,
            },
            DiscreteOperation::BooleanSet { vid, value, no_op } => AppliedDiscreteOperation::BooleanSet {
                vid: vid.clone(),
                no_op: *no_op,
                value: *value,
                old_value: false,
            },
            DiscreteOperation::DateSet { vid, value, no_op } => AppliedDiscreteOperation::DateSet {
                vid: vid.clone(),
                no_op: *no_op,
                value: *value,
                old_value: 0,
            },
        }
    }

    fn node_mut(&mut self, vid: &ValueId) -> Result<&mut Node, ApplyError> {
        self.nodes
            .get_mut(vid)
            .ok_or(ApplyError::MissingValue { vid: vid.clone() })
    }

    fn string_mut(&mut self, vid: &ValueId) -> Result<&mut String, ApplyError> {
        let node = self.node_mut(vid)?;
        match node {
            Node::String(value) => Ok(value),
            other => Err(ApplyError::WrongType {
                vid: vid.clone(),
                expected: "string",
                actual: other.type_name(),
            }),
        }
    }

    fn double_mut(&mut self, vid: &ValueId) -> Result<&mut f64, ApplyError> {
        let node = self.node_mut(vid)?;
        match node {
            Node::Double(value) => Ok(value),
            other => Err(ApplyError::WrongType {
                vid: vid.clone(),
                expected: "double",
                actual: other.type_name(),
            }),
        }
    }

    fn array_mut(&mut self, vid: &ValueId) -> Result<&mut Vec<ValueId>, ApplyError> {
        let node = self.node_mut(vid)?;
        match node {
            Node::Array(children) => Ok(children),
            other => Err(ApplyError::WrongType {
                vid: vid.clone(),
                expected: "array",
                actual: other.type_name(),
            }),
        }
    }

    fn object_mut(&mut self, vid: &ValueId) -> Result<&mut BTreeMap<String, ValueId>, ApplyError> {
        let node = self.node_mut(vid)?;
        match node {
            Node::Object(children) => Ok(children),
            other => Err(ApplyError::WrongType {
                vid: vid.clone(),
                expected: "object",
                actual: other.type_name(),
            }),
        }
    }

    fn array_len(&self, vid: &ValueId) -> Result<usize, ApplyError> {
        match self.nodes.get(vid) {
            Some(Node::Array(children)) => Ok(children.len()),
            Some(node) => Err(ApplyError::WrongType {
                vid: vid.clone(),
                expected: "array",
                actual: node.type_name(),
            }),
            None => Err(ApplyError::MissingValue { vid: vid.clone() }),
        }
    }
}

fn char_to_byte(s: &str, char_index: usize) -> usize {
    s.char_indices()
        .nth(char_index)
        .map(|(byte, _)| byte)
        .unwrap_or(s.len())
}

/// IEEE-754 addition can escape the finite range; the engine clamps rather
/// than letting a non-finite value poison later transforms.
fn clamp_finite(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else if value == f64::INFINITY {
        f64::MAX
    } else if value == f64::NEG_INFINITY {
        f64::MIN
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::ValueIdGenerator;
    use serde_json::json;

    fn tree_from(json: serde_json::Value) -> ValueTree {
        let mut ids = ValueIdGenerator::server();
        let DataValue::Object(root) = DataValue::from_json(&json, &mut ids) else {
            panic!("root must be an object");
        };
        ValueTree::new(root).unwrap()
    }

    fn find_vid(tree: &ValueTree, pred: impl Fn(&DataValue) -> bool) -> ValueId {
        let root = DataValue::Object(tree.materialize());
        let mut found = None;
        root.visit(&mut |v| {
            if found.is_none() && pred(v) {
                found = Some(v.vid().clone());
            }
        });
        found.expect("value present")
    }

    fn string_vid(tree: &ValueTree) -> ValueId {
        find_vid(tree, |v| matches!(v, DataValue::String(_)))
    }

    #[test]
    fn string_insert_and_remove_roundtrip() {
        let mut tree = tree_from(json!({"s": "AB"}));
        let vid = string_vid(&tree);

        tree.apply(&DiscreteOperation::StringInsert {
            vid: vid.clone(),
            no_op: false,
            index: 1,
            value: "xy".into(),
        })
        .unwrap();
        assert_eq!(
            tree.get(&vid),
            Some(DataValue::String(StringValue {
                vid: vid.clone(),
                value: "AxyB".into()
            }))
        );

        let applied = tree
            .apply(&DiscreteOperation::StringRemove {
                vid: vid.clone(),
                no_op: false,
                index: 1,
                value: "xy".into(),
            })
            .unwrap();
        assert_eq!(
            applied,
            AppliedDiscreteOperation::StringRemove {
                vid: vid.clone(),
                no_op: false,
                index: 1,
                value: "xy".into()
            }
        );
    }

    #[test]
    fn string_indices_count_chars_not_bytes() {
        let mut tree = tree_from(json!({"s": "aé"}));
        let vid = string_vid(&tree);
        tree.apply(&DiscreteOperation::StringInsert {
            vid: vid.clone(),
            no_op: false,
            index: 2,
            value: "!".into(),
        })
        .unwrap();
        assert_eq!(
            tree.get(&vid),
            Some(DataValue::String(StringValue {
                vid,
                value: "aé!".into()
            }))
        );
    }

    #[test]
    fn out_of_bounds_remove_is_an_error() {
        let mut tree = tree_from(json!({"a": [1.0, 2.0, 3.0]}));
        let vid = find_vid(&tree, |v| matches!(v, DataValue::Array(_)));
        let err = tree
            .apply(&DiscreteOperation::ArrayRemove {
                vid,
                no_op: false,
                index: 7,
            })
            .unwrap_err();
        assert!(matches!(err, ApplyError::IndexOutOfBounds { index: 7, .. }));
    }

    #[test]
    fn array_move_relocates_to_resting_index() {
        let mut tree = tree_from(json!({"a": ["x", "y", "z"]}));
        let vid = find_vid(&tree, |v| matches!(v, DataValue::Array(_)));
        tree.apply(&DiscreteOperation::ArrayMove {
            vid: vid.clone(),
            no_op: false,
            from_index: 0,
            to_index: 2,
        })
        .unwrap();
        let DataValue::Array(arr) = tree.get(&vid).unwrap() else {
            panic!("array expected");
        };
        let values: Vec<_> = arr
            .children
            .iter()
            .map(|v| match v {
                DataValue::String(s) => s.value.clone(),
                _ => panic!("string expected"),
            })
            .collect();
        assert_eq!(values, vec!["y", "z", "x"]);
    }

    #[test]
    fn removed_subtree_vids_are_unregistered() {
        let mut tree = tree_from(json!({"o": {"inner": [1.0, 2.0]}}));
        let outer = tree.root_vid().clone();
        let before = tree.node_count();
        tree.apply(&DiscreteOperation::ObjectRemoveProperty {
            vid: outer,
            no_op: false,
            property: "o".into(),
        })
        .unwrap();
        // object node + array node + two doubles
        assert_eq!(tree.node_count(), before - 4);
    }

    #[test]
    fn duplicate_vid_registration_is_an_error() {
        let mut tree = tree_from(json!({"s": "x"}));
        let vid = string_vid(&tree);
        let root = tree.root_vid().clone();
        let err = tree
            .apply(&DiscreteOperation::ObjectAddProperty {
                vid: root,
                no_op: false,
                property: "dup".into(),
                value: DataValue::String(StringValue {
                    vid,
                    value: "again".into(),
                }),
            })
            .unwrap_err();
        assert!(matches!(err, ApplyError::DuplicateValue { .. }));
    }

    #[test]
    fn number_add_clamps_to_finite() {
        let mut tree = tree_from(json!({"n": 1.0}));
        let vid = find_vid(&tree, |v| matches!(v, DataValue::Double(_)));
        tree.apply(&DiscreteOperation::NumberSet {
            vid: vid.clone(),
            no_op: false,
            value: f64::MAX,
        })
        .unwrap();
        tree.apply(&DiscreteOperation::NumberAdd {
            vid: vid.clone(),
            no_op: false,
            value: f64::MAX,
        })
        .unwrap();
        assert_eq!(
            tree.get(&vid),
            Some(DataValue::Double(DoubleValue {
                vid,
                value: f64::MAX
            }))
        );
    }

    #[test]
    fn noop_apply_mutates_nothing() {
        let mut tree = tree_from(json!({"s": "AB"}));
        let vid = string_vid(&tree);
        let before = tree.materialize();
        tree.apply(&DiscreteOperation::StringRemove {
            vid,
            no_op: true,
            index: 99,
            value: "zz".into(),
        })
        .unwrap();
        assert_eq!(tree.materialize(), before);
    }
}
