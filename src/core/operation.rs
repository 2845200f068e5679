//! The operation algebra.
//!
//! A model mutation is either one [`DiscreteOperation`] or a compound batch
//! of them applied atomically. Every discrete operation targets a single
//! value id and carries enough information for forward application and for
//! transformation against concurrent operations.
//!
//! [`AppliedDiscreteOperation`] is the post-application form enriched with
//! the inverse data needed to undo it; [`AppliedOperation`] is its batch
//! mirror of [`Operation`], and is what the operation log stores.

use std::collections::BTreeMap;

use super::id::ValueId;
use super::value::DataValue;

/// A submitted mutation: one discrete operation or an atomic batch.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    Compound(CompoundOperation),
    Discrete(DiscreteOperation),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompoundOperation {
    pub ops: Vec<DiscreteOperation>,
}

impl Operation {
    pub fn compound(ops: Vec<DiscreteOperation>) -> Self {
        Operation::Compound(CompoundOperation { ops })
    }

    /// True when nothing would change on application.
    pub fn is_noop(&self) -> bool {
        match self {
            Operation::Discrete(op) => op.is_noop(),
            Operation::Compound(c) => c.ops.iter().all(DiscreteOperation::is_noop),
        }
    }
}

impl From<DiscreteOperation> for Operation {
    fn from(op: DiscreteOperation) -> Self {
        Operation::Discrete(op)
    }
}

/// One structural mutation of the tree.
///
/// String indices count Unicode scalar values (`char`s); all participants
/// must measure in the same unit.
#[derive(Clone, Debug, PartialEq)]
pub enum DiscreteOperation {
    StringInsert {
        vid: ValueId,
        no_op: bool,
        index: usize,
        value: String,
    },
    StringRemove {
        vid: ValueId,
        no_op: bool,
        index: usize,
        value: String,
    },
    StringSet {
        vid: ValueId,
        no_op: bool,
        value: String,
    },
    ArrayInsert {
        vid: ValueId,
        no_op: bool,
        index: usize,
        value: DataValue,
    },
    ArrayRemove {
        vid: ValueId,
        no_op: bool,
        index: usize,
    },
    ArrayReplace {
        vid: ValueId,
        no_op: bool,
        index: usize,
        value: DataValue,
    },
    /// Relocate the element at `from_index`; `to_index` is the element's
    /// resting index in the resulting array.
    ArrayMove {
        vid: ValueId,
        no_op: bool,
        from_index: usize,
        to_index: usize,
    },
    ArraySet {
        vid: ValueId,
        no_op: bool,
        value: Vec<DataValue>,
    },
    ObjectAddProperty {
        vid: ValueId,
        no_op: bool,
        property: String,
        value: DataValue,
    },
    ObjectSetProperty {
        vid: ValueId,
        no_op: bool,
        property: String,
        value: DataValue,
    },
    ObjectRemoveProperty {
        vid: ValueId,
        no_op: bool,
        property: String,
    },
    ObjectSet {
        vid: ValueId,
        no_op: bool,
        value: BTreeMap<String, DataValue>,
    },
    NumberAdd {
        vid: ValueId,
        no_op: bool,
        value: f64,
    },
    NumberSet {
        vid: ValueId,
        no_op: bool,
        value: f64,
    },
    BooleanSet {
        vid: ValueId,
        no_op: bool,
        value: bool,
    },
    DateSet {
        vid: ValueId,
        no_op: bool,
        value: i64,
    },
}

impl DiscreteOperation {
    pub fn vid(&self) -> &ValueId {
        match self {
            DiscreteOperation::StringInsert { vid, .. }
            | DiscreteOperation::StringRemove { vid, .. }
            | DiscreteOperation::StringSet { vid, .. }
            | DiscreteOperation::ArrayInsert { vid, .. }
            | DiscreteOperation::ArrayRemove { vid, .. }
            | DiscreteOperation::ArrayReplace { vid, .. }
            | DiscreteOperation::ArrayMove { vid, .. }
            | DiscreteOperation::ArraySet { vid, .. }
            | DiscreteOperation::ObjectAddProperty { vid, .. }
            | DiscreteOperation::ObjectSetProperty { vid, .. }
            | DiscreteOperation::ObjectRemoveProperty { vid, .. }
            | DiscreteOperation::ObjectSet { vid, .. }
            | DiscreteOperation::NumberAdd { vid, .. }
            | DiscreteOperation::NumberSet { vid, .. }
            | DiscreteOperation::BooleanSet { vid, .. }
            | DiscreteOperation::DateSet { vid, .. } => vid,
        }
    }

    pub fn is_noop(&self) -> bool {
        match self {
            DiscreteOperation::StringInsert { no_op, .. }
            | DiscreteOperation::StringRemove { no_op, .. }
            | DiscreteOperation::StringSet { no_op, .. }
            | DiscreteOperation::ArrayInsert { no_op, .. }
            | DiscreteOperation::ArrayRemove { no_op, .. }
            | DiscreteOperation::ArrayReplace { no_op, .. }
            | DiscreteOperation::ArrayMove { no_op, .. }
            | DiscreteOperation::ArraySet { no_op, .. }
            | DiscreteOperation::ObjectAddProperty { no_op, .. }
            | DiscreteOperation::ObjectSetProperty { no_op, .. }
            | DiscreteOperation::ObjectRemoveProperty { no_op, .. }
            | DiscreteOperation::ObjectSet { no_op, .. }
            | DiscreteOperation::NumberAdd { no_op, .. }
            | DiscreteOperation::NumberSet { no_op, .. }
            | DiscreteOperation::BooleanSet { no_op, .. }
            | DiscreteOperation::DateSet { no_op, .. } => *no_op,
        }
    }

    /// Return the same operation with the no-op flag raised. Versions are
    /// still consumed by no-op operations, so transformation neutralizes an
    /// operation by flagging it rather than dropping it.
    pub fn into_noop(mut self) -> Self {
        match &mut self {
            DiscreteOperation::StringInsert { no_op, .. }
            | DiscreteOperation::StringRemove { no_op, .. }
            | DiscreteOperation::StringSet { no_op, .. }
            | DiscreteOperation::ArrayInsert { no_op, .. }
            | DiscreteOperation::ArrayRemove { no_op, .. }
            | DiscreteOperation::ArrayReplace { no_op, .. }
            | DiscreteOperation::ArrayMove { no_op, .. }
            | DiscreteOperation::ArraySet { no_op, .. }
            | DiscreteOperation::ObjectAddProperty { no_op, .. }
            | DiscreteOperation::ObjectSetProperty { no_op, .. }
            | DiscreteOperation::ObjectRemoveProperty { no_op, .. }
            | DiscreteOperation::ObjectSet { no_op, .. }
            | DiscreteOperation::NumberAdd { no_op, .. }
            | DiscreteOperation::NumberSet { no_op, .. }
            | DiscreteOperation::BooleanSet { no_op, .. }
            | DiscreteOperation::DateSet { no_op, .. } => *no_op = true,
        }
        self
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            DiscreteOperation::StringInsert { .. } => "string_insert",
            DiscreteOperation::StringRemove { .. } => "string_remove",
            DiscreteOperation::StringSet { .. } => "string_set",
            DiscreteOperation::ArrayInsert { .. } => "array_insert",
            DiscreteOperation::ArrayRemove { .. } => "array_remove",
            DiscreteOperation::ArrayReplace { .. } => "array_replace",
            DiscreteOperation::ArrayMove { .. } => "array_move",
            DiscreteOperation::ArraySet { .. } => "array_set",
            DiscreteOperation::ObjectAddProperty { .. } => "object_add_property",
            DiscreteOperation::ObjectSetProperty { .. } => "object_set_property",
            DiscreteOperation::ObjectRemoveProperty { .. } => "object_remove_property",
            DiscreteOperation::ObjectSet { .. } => "object_set",
            DiscreteOperation::NumberAdd { .. } => "number_add",
            DiscreteOperation::NumberSet { .. } => "number_set",
            DiscreteOperation::BooleanSet { .. } => "boolean_set",
            DiscreteOperation::DateSet { .. } => "date_set",
        }
    }
}

/// An operation after application, mirroring [`Operation`]'s shape.
#[derive(Clone, Debug, PartialEq)]
pub enum AppliedOperation {
    Compound(Vec<AppliedDiscreteOperation>),
    Discrete(AppliedDiscreteOperation),
}

impl AppliedOperation {
    /// Recover the forward operation for transformation against history.
    pub fn to_operation(&self) -> Operation {
        match self {
            AppliedOperation::Discrete(op) => Operation::Discrete(op.to_discrete()),
            AppliedOperation::Compound(ops) => Operation::Compound(CompoundOperation {
                ops: ops.iter().map(AppliedDiscreteOperation::to_discrete).collect(),
            }),
        }
    }

    pub fn is_noop(&self) -> bool {
        match self {
            AppliedOperation::Discrete(op) => op.is_noop(),
            AppliedOperation::Compound(ops) => {
                ops.iter().all(AppliedDiscreteOperation::is_noop)
            }
        }
    }
}

impl From<AppliedDiscreteOperation> for AppliedOperation {
    fn from(op: AppliedDiscreteOperation) -> Self {
        AppliedOperation::Discrete(op)
    }
}

/// A discrete operation after application, enriched with inverse data.
#[derive(Clone, Debug, PartialEq)]
pub enum AppliedDiscreteOperation {
    StringInsert {
        vid: ValueId,
        no_op: bool,
        index: usize,
        value: String,
    },
    StringRemove {
        vid: ValueId,
        no_op: bool,
        index: usize,
        value: String,
    },
    StringSet {
        vid: ValueId,
        no_op: bool,
        value: String,
        old_value: String,
    },
    ArrayInsert {
        vid: ValueId,
        no_op: bool,
        index: usize,
        value: DataValue,
    },
    ArrayRemove {
        vid: ValueId,
        no_op: bool,
        index: usize,
        old_value: DataValue,
    },
    ArrayReplace {
        vid: ValueId,
        no_op: bool,
        index: usize,
        value: DataValue,
        old_value: DataValue,
    },
    ArrayMove {
        vid: ValueId,
        no_op: bool,
        from_index: usize,
        to_index: usize,
    },
    ArraySet {
        vid: ValueId,
        no_op: bool,
        value: Vec<DataValue>,
        old_value: Vec<DataValue>,
    },
    ObjectAddProperty {
        vid: ValueId,
        no_op: bool,
        property: String,
        value: DataValue,
        old_value: Option<DataValue>,
    },
    ObjectSetProperty {
        vid: ValueId,
        no_op: bool,
        property: String,
        value: DataValue,
        old_value: Option<DataValue>,
    },
    ObjectRemoveProperty {
        vid: ValueId,
        no_op: bool,
        property: String,
        old_value: DataValue,
    },
    ObjectSet {
        vid: ValueId,
        no_op: bool,
        value: BTreeMap<String, DataValue>,
        old_value: BTreeMap<String, DataValue>,
    },
    NumberAdd {
        vid: ValueId,
        no_op: bool,
        value: f64,
    },
    NumberSet {
        vid: ValueId,
        no_op: bool,
        value: f64,
        old_value: f64,
    },
    BooleanSet {
        vid: ValueId,
        no_op: bool,
        value: bool,
        old_value: bool,
    },
    DateSet {
        vid: ValueId,
        no_op: bool,
        value: i64,
        old_value: i64,
    },
}

impl AppliedDiscreteOperation {
    pub fn vid(&self) -> &ValueId {
        self.as_discrete_parts().0
    }

    pub fn is_noop(&self) -> bool {
        self.as_discrete_parts().1
    }

    fn as_discrete_parts(&self) -> (&ValueId, bool) {
        match self {
            AppliedDiscreteOperation::StringInsert { vid, no_op, .. }
            | AppliedDiscreteOperation::StringRemove { vid, no_op, .. }
            | AppliedDiscreteOperation::StringSet { vid, no_op, .. }
            | AppliedDiscreteOperation::ArrayInsert { vid, no_op, .. }
            | AppliedDiscreteOperation::ArrayRemove { vid, no_op, .. }
            | AppliedDiscreteOperation::ArrayReplace { vid, no_op, .. }
            | AppliedDiscreteOperation::ArrayMove { vid, no_op, .. }
            | AppliedDiscreteOperation::ArraySet { vid, no_op, .. }
            | AppliedDiscreteOperation::ObjectAddProperty { vid, no_op, .. }
            | AppliedDiscreteOperation::ObjectSetProperty { vid, no_op, .. }
            | AppliedDiscreteOperation::ObjectRemoveProperty { vid, no_op, .. }
            | AppliedDiscreteOperation::ObjectSet { vid, no_op, .. }
            | AppliedDiscreteOperation::NumberAdd { vid, no_op, .. }
            | AppliedDiscreteOperation::NumberSet { vid, no_op, .. }
            | AppliedDiscreteOperation::BooleanSet { vid, no_op, .. }
            | AppliedDiscreteOperation::DateSet { vid, no_op, .. } => (vid, *no_op),
        }
    }

    /// Strip the inverse data, recovering the forward operation. The history
    /// window transforms against this view.
    pub fn to_discrete(&self) -> DiscreteOperation {
        match self {
            AppliedDiscreteOperation::StringInsert {
                vid,
                no_op,
                index,
                value,
            } => DiscreteOperation::StringInsert {
                vid: vid.clone(),
                no_op: *no_op,
                index: *index,
                value: value.clone(),
            },
            AppliedDiscreteOperation::StringRemove {
                vid,
                no_op,
                index,
                value,
            } => DiscreteOperation::StringRemove {
                vid: vid.clone(),
                no_op: *no_op,
                index: *index,
                value: value.clone(),
            },
            AppliedDiscreteOperation::StringSet {
                vid, no_op, value, ..
            } => DiscreteOperation::StringSet {
                vid: vid.clone(),
                no_op: *no_op,
                value: value.clone(),
            },
            AppliedDiscreteOperation::ArrayInsert {
                vid,
                no_op,
                index,
                value,
            } => DiscreteOperation::ArrayInsert {
                vid: vid.clone(),
                no_op: *no_op,
                index: *index,
                value: value.clone(),
            },
            AppliedDiscreteOperation::ArrayRemove {
                vid, no_op, index, ..
            } => DiscreteOperation::ArrayRemove {
                vid: vid.clone(),
                no_op: *no_op,
                index: *index,
            },
            AppliedDiscreteOperation::ArrayReplace {
                vid,
                no_op,
                index,
                value,
                ..
            } => DiscreteOperation::ArrayReplace {
                vid: vid.clone(),
                no_op: *no_op,
                index: *index,
                value: value.clone(),
            },
            AppliedDiscreteOperation::ArrayMove {
                vid,
                no_op,
                from_index,
                to_index,
            } => DiscreteOperation::ArrayMove {
                vid: vid.clone(),
                no_op: *no_op,
                from_index: *from_index,
                to_index: *to_index,
            },
            AppliedDiscreteOperation::ArraySet {
                vid, no_op, value, ..
            } => DiscreteOperation::ArraySet {
                vid: vid.clone(),
                no_op: *no_op,
                value: value.clone(),
            },
            AppliedDiscreteOperation::ObjectAddProperty {
                vid,
                no_op,
                property,
                value,
                ..
            } => DiscreteOperation::ObjectAddProperty {
                vid: vid.clone(),
                no_op: *no_op,
                property: property.clone(),
                value: value.clone(),
            },
            AppliedDiscreteOperation::ObjectSetProperty {
                vid,
                no_op,
                property,
                value,
                ..
            } => DiscreteOperation::ObjectSetProperty {
                vid: vid.clone(),
                no_op: *no_op,
                property: property.clone(),
                value: value.clone(),
            },
            AppliedDiscreteOperation::ObjectRemoveProperty {
                vid,
                no_op,
                property,
                ..
            } => DiscreteOperation::ObjectRemoveProperty {
                vid: vid.clone(),
                no_op: *no_op,
                property: property.clone(),
            },
            AppliedDiscreteOperation::ObjectSet {
                vid, no_op, value, ..
            } => DiscreteOperation::ObjectSet {
                vid: vid.clone(),
                no_op: *no_op,
                value: value.clone(),
            },
            AppliedDiscreteOperation::NumberAdd { vid, no_op, value } => DiscreteOperation::NumberAdd {
                vid: vid.clone(),
                no_op: *no_op,
                value: *value,
            },
            AppliedDiscreteOperation::NumberSet {
                vid, no_op, value, ..
            } => DiscreteOperation::NumberSet {
                vid: vid.clone(),
                no_op: *no_op,
                value: *value,
            },
            AppliedDiscreteOperation::BooleanSet {
                vid, no_op, value, ..
            } => DiscreteOperation::BooleanSet {
                vid: vid.clone(),
                no_op: *no_op,
                value: *value,
            },
            AppliedDiscreteOperation::DateSet {
                vid, no_op, value, ..
            } => DiscreteOperation::DateSet {
                vid: vid.clone(),
                no_op: *no_op,
                value: *value,
            },
        }
    }
}
