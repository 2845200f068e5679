//! Core engine errors (identifiers, tree application, transformation).
//!
//! These are bounded and stable: core errors represent invariant violations
//! inside the engine, not library implementation details. None of them is
//! surfaced to a client as-is; the coordinator translates every one of them
//! into a forced close.

use thiserror::Error;

use super::id::ValueId;

/// Invalid identifier string.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("model id `{raw}` is invalid: {reason}")]
    Model { raw: String, reason: String },
    #[error("collection id `{raw}` is invalid: {reason}")]
    Collection { raw: String, reason: String },
    #[error("session id `{raw}` is invalid: {reason}")]
    Session { raw: String, reason: String },
    #[error("value id `{raw}` is invalid: {reason}")]
    Value { raw: String, reason: String },
}

/// Fatal failure applying an operation to the live tree.
///
/// `apply` is total on well-formed operations against the current tree; any
/// of these means the submitter and the server disagree about the document
/// shape, which is model-fatal.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ApplyError {
    #[error("value {vid} does not exist in the tree")]
    MissingValue { vid: ValueId },
    #[error("value {vid} is a {actual}, operation requires a {expected}")]
    WrongType {
        vid: ValueId,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("index {index} out of bounds for {vid} of length {len}")]
    IndexOutOfBounds {
        vid: ValueId,
        index: usize,
        len: usize,
    },
    #[error("property `{property}` does not exist on {vid}")]
    MissingProperty { vid: ValueId, property: String },
    #[error("value id {vid} already registered in the tree")]
    DuplicateValue { vid: ValueId },
}

/// Failure inside the transformation matrix.
///
/// The matrix is total over well-formed pairs; reaching one of these means
/// an operation was malformed (e.g. a recorded remove value whose length
/// disagrees with its peer's index math), which is model-fatal.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum TransformError {
    #[error("operations target the same value {vid} but different value types")]
    TypeMismatch { vid: ValueId },
    #[error("invalid operation during transformation: {reason}")]
    InvalidOperation { reason: String },
}

/// Canonical error enum for the core engine.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Transform(#[from] TransformError),
}
