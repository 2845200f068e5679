//! Daemon module - the convergence service runtime.
//!
//! Provides:
//! - The per-model realtime coordinator (state machine + OT sequencing)
//! - The model manager owning coordinator lifecycles
//! - Session handles and event fan-out with per-recipient FIFO
//! - The persistence contract, in-memory store, and binary codec
//! - Snapshot policy evaluation
//! - A monotonic wall clock for operation timestamps

pub mod clock;
pub mod codec;
pub mod coordinator;
pub mod manager;
pub mod messages;
pub mod session;
pub mod snapshot;
pub mod store;

pub use clock::Clock;
pub use codec::CodecError;
pub use coordinator::RealtimeModelCoordinator;
pub use manager::ModelManager;
pub use messages::{
    CloseError, ForceCloseReason, ModelRequest, OpenError, OpenRequest, OpenSuccess, SessionEvent,
    SubmitError,
};
pub use session::{Participants, SessionHandle};
pub use snapshot::{SnapshotConfig, SnapshotPolicy};
pub use store::{
    LoadedModel, MemoryModelStore, ModelMetaData, ModelOperation, ModelStore, OperationStream,
    Snapshot, StoreError,
};
