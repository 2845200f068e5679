//! Core domain types for the convergence engine.
//!
//! Module hierarchy follows type dependency order:
//! - id: ModelId, CollectionId, SessionId, ValueId
//! - value: the DataValue tree representation
//! - operation: the discrete/compound operation algebra
//! - tree: the live document (arena + vid index)
//! - ot: the transformation function matrix
//! - concurrency: server- and client-side concurrency controllers

pub mod concurrency;
pub mod error;
pub mod id;
pub mod operation;
pub mod ot;
pub mod tree;
pub mod value;

pub use concurrency::{
    ClientConcurrencyControl, ConcurrencyError, ProcessedOperation, ServerConcurrencyControl,
};
pub use error::{ApplyError, CoreError, InvalidId, TransformError};
pub use id::{
    CollectionId, ModelId, SERVER_VID_PREFIX, SessionId, ValueId, ValueIdGenerator,
};
pub use operation::{
    AppliedDiscreteOperation, AppliedOperation, CompoundOperation, DiscreteOperation, Operation,
};
pub use ot::{transform, transform_discrete};
pub use tree::ValueTree;
pub use value::{
    ArrayValue, BooleanValue, DataValue, DateValue, DoubleValue, NullValue, ObjectValue,
    StringValue,
};
