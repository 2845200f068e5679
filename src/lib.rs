#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod daemon;
pub mod error;
pub mod telemetry;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core and runtime types at crate root for convenience
pub use crate::config::{Config, LogFormat, LoggingConfig, RealtimeConfig};
pub use crate::core::{
    AppliedDiscreteOperation, AppliedOperation, ApplyError, ArrayValue, BooleanValue,
    ClientConcurrencyControl, CollectionId, CompoundOperation, ConcurrencyError, CoreError,
    DataValue, DateValue, DiscreteOperation, DoubleValue, InvalidId, ModelId, NullValue,
    ObjectValue, Operation, ProcessedOperation, ServerConcurrencyControl, SessionId, StringValue,
    TransformError, ValueId, ValueIdGenerator, ValueTree, transform, transform_discrete,
};
pub use crate::daemon::{
    Clock, CloseError, CodecError, ForceCloseReason, LoadedModel, MemoryModelStore, ModelManager,
    ModelMetaData, ModelOperation, ModelRequest, ModelStore, OpenError, OpenRequest, OpenSuccess,
    Participants, RealtimeModelCoordinator, SessionEvent, SessionHandle, Snapshot, SnapshotConfig,
    SnapshotPolicy, StoreError, SubmitError,
};
