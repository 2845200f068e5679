//! Coordinator message surface.
//!
//! Session actors talk to a coordinator through [`ModelRequest`] values on
//! its inbound channel; every ask carries a typed reply sender. Events flow
//! back through one dedicated [`SessionEvent`] channel per participant,
//! which is what guarantees per-recipient FIFO delivery.

use bytes::Bytes;
use crossbeam::channel::Sender;
use thiserror::Error;

use crate::core::{ModelId, ObjectValue, Operation, SessionId};

use super::store::ModelMetaData;

/// Inbound messages, delivered to the coordinator's single consumer.
pub enum ModelRequest {
    Open(OpenRequest),
    Close {
        session_id: SessionId,
        reply: Sender<Result<(), CloseError>>,
    },
    Submit {
        session_id: SessionId,
        /// Client-chosen sequence number echoed back in the acknowledgement.
        seq: u32,
        context_version: u64,
        op: Operation,
    },
    /// Initial document data from a cold-start opener. Only valid while the
    /// coordinator is in the data-requested state.
    DataResponse {
        session_id: SessionId,
        root: ObjectValue,
    },
    /// Presence cursor update, relayed verbatim to the other participants.
    ReferenceUpdate {
        session_id: SessionId,
        payload: Bytes,
    },
    /// The model was deleted externally.
    Deleted,
}

pub struct OpenRequest {
    pub session_id: SessionId,
    /// The participant's event channel; the coordinator keeps the sender
    /// for the lifetime of the participation.
    pub events: Sender<SessionEvent>,
    pub reply: Sender<Result<OpenSuccess, OpenError>>,
}

#[derive(Clone, Debug)]
pub struct OpenSuccess {
    pub root: ObjectValue,
    pub meta: ModelMetaData,
    pub participants: Vec<SessionId>,
}

/// Events pushed to one participant, in strict version order.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Cold start: the coordinator needs this opener to supply the
    /// initial document.
    DataRequest { model_id: ModelId },
    /// The participant's own submission was sequenced.
    Ack {
        seq: u32,
        version: u64,
        timestamp: i64,
    },
    /// A submission was rejected without closing the model.
    SubmitRejected { seq: u32, error: SubmitError },
    /// Another participant's operation, already transformed.
    RemoteOperation {
        version: u64,
        timestamp: i64,
        session_id: SessionId,
        op: Operation,
    },
    ParticipantOpened { session_id: SessionId },
    ParticipantClosed { session_id: SessionId },
    Reference {
        session_id: SessionId,
        payload: Bytes,
    },
    /// The model is going away; the participant must drop its state.
    ForceClose { reason: ForceCloseReason },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum OpenError {
    #[error("model is already open in this session")]
    AlreadyOpen,
    #[error("data-request-timeout")]
    DataRequestTimeout,
    #[error("initial data response was invalid: {reason}")]
    BadDataResponse { reason: String },
    #[error("storage failure while opening: {reason}")]
    Storage { reason: String },
    #[error("model was deleted")]
    Deleted,
    #[error("model is shutting down")]
    ShuttingDown,
    #[error("open handshake timed out")]
    Timeout,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CloseError {
    #[error("model is not open in this session")]
    NotOpen,
}

/// A submission rejected without closing anything. An invalid context
/// version is not represented here: it force-closes the submitting session
/// instead ([`ForceCloseReason::InvalidContextVersion`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubmitError {
    #[error("model is not initialized yet")]
    NotInitialized,
}

/// Why a model was force-closed, as shown to clients. Engine-internal
/// errors are deliberately collapsed; details stay in the server log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceCloseReason {
    Internal,
    Deleted,
    StorageFailure,
    InvalidContextVersion,
}

impl ForceCloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ForceCloseReason::Internal => "internal",
            ForceCloseReason::Deleted => "deleted",
            ForceCloseReason::StorageFailure => "storage-failure",
            ForceCloseReason::InvalidContextVersion => "invalid-context-version",
        }
    }
}

impl std::fmt::Display for ForceCloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
