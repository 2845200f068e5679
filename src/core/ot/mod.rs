//! The operation transformation matrix.
//!
//! `transform(server, client)` takes two operations that were produced
//! concurrently against the same state and returns the pair `(server',
//! client')` such that applying `server` then `client'` reaches the same
//! state as applying `client` then `server'` (the TP1 property).
//!
//! The matrix is total: every ordered pair of discrete kinds that can target
//! the same value has an entry, enumerated as a two-dimensional match per
//! value family. Operations on different values commute untouched, no-op
//! operations pass through unchanged, and compounds expand by the left fold
//! implemented here once for both orientations.
//!
//! Ties between equal positions are always broken in favor of the
//! server-side operation, including inside the remove/insert compositions
//! the array module builds for moves.

mod array;
mod object;
mod scalar;
mod string;

use super::error::TransformError;
use super::operation::{CompoundOperation, DiscreteOperation, Operation};

/// Transform a concurrent pair. `server` is the operation that was (or will
/// be) sequenced first; `client` is the operation rebased over it.
pub fn transform(
    server: &Operation,
    client: &Operation,
) -> Result<(Operation, Operation), TransformError> {
    match (server, client) {
        (Operation::Discrete(s), Operation::Discrete(c)) => transform_discrete(s, c),
        // Compound on the server side: fold the client through the server's
        // components, threading the progressively transformed client into
        // each next pair.
        (Operation::Compound(s), _) => {
            let mut client_cur = client.clone();
            let mut server_out = Vec::new();
            for component in &s.ops {
                let (component_t, client_t) =
                    transform(&Operation::Discrete(component.clone()), &client_cur)?;
                push_flat(&mut server_out, component_t);
                client_cur = client_t;
            }
            Ok((
                Operation::Compound(CompoundOperation { ops: server_out }),
                client_cur,
            ))
        }
        // Compound on the client side, symmetric fold.
        (Operation::Discrete(_), Operation::Compound(c)) => {
            let mut server_cur = server.clone();
            let mut client_out = Vec::new();
            for component in &c.ops {
                let (server_t, component_t) =
                    transform(&server_cur, &Operation::Discrete(component.clone()))?;
                push_flat(&mut client_out, component_t);
                server_cur = server_t;
            }
            Ok((
                server_cur,
                Operation::Compound(CompoundOperation { ops: client_out }),
            ))
        }
    }
}

/// Transform one discrete pair.
pub fn transform_discrete(
    server: &DiscreteOperation,
    client: &DiscreteOperation,
) -> Result<(Operation, Operation), TransformError> {
    // Operations addressing different values never interact.
    if server.vid() != client.vid() {
        return Ok(identity(server, client));
    }
    // No-op operations are preserved: versions are still consumed, so the
    // pair passes through untouched and the no-op stays a no-op.
    if server.is_noop() || client.is_noop() {
        return Ok(identity(server, client));
    }

    match (family(server), family(client)) {
        (Family::String, Family::String) => Ok(string::transform(server, client)),
        (Family::Array, Family::Array) => {
            let (s, c) = array::transform(server, client)?;
            Ok((Operation::Discrete(s), Operation::Discrete(c)))
        }
        (Family::Object, Family::Object) => {
            let (s, c) = object::transform(server, client);
            Ok((Operation::Discrete(s), Operation::Discrete(c)))
        }
        (Family::Number, Family::Number)
        | (Family::Boolean, Family::Boolean)
        | (Family::Date, Family::Date) => {
            let (s, c) = scalar::transform(server, client);
            Ok((Operation::Discrete(s), Operation::Discrete(c)))
        }
        _ => Err(TransformError::TypeMismatch {
            vid: server.vid().clone(),
        }),
    }
}

fn identity(server: &DiscreteOperation, client: &DiscreteOperation) -> (Operation, Operation) {
    (
        Operation::Discrete(server.clone()),
        Operation::Discrete(client.clone()),
    )
}

fn push_flat(out: &mut Vec<DiscreteOperation>, op: Operation) {
    match op {
        Operation::Discrete(op) => out.push(op),
        Operation::Compound(c) => out.extend(c.ops),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Family {
    String,
    Array,
    Object,
    Number,
    Boolean,
    Date,
}

fn family(op: &DiscreteOperation) -> Family {
    match op {
        DiscreteOperation::StringInsert { .. }
        | DiscreteOperation::StringRemove { .. }
        | DiscreteOperation::StringSet { .. } => Family::String,
        DiscreteOperation::ArrayInsert { .. }
        | DiscreteOperation::ArrayRemove { .. }
        | DiscreteOperation::ArrayReplace { .. }
        | DiscreteOperation::ArrayMove { .. }
        | DiscreteOperation::ArraySet { .. } => Family::Array,
        DiscreteOperation::ObjectAddProperty { .. }
        | DiscreteOperation::ObjectSetProperty { .. }
        | DiscreteOperation::ObjectRemoveProperty { .. }
        | DiscreteOperation::ObjectSet { .. } => Family::Object,
        DiscreteOperation::NumberAdd { .. } | DiscreteOperation::NumberSet { .. } => {
            Family::Number
        }
        DiscreteOperation::BooleanSet { .. } => Family::Boolean,
        DiscreteOperation::DateSet { .. } => Family::Date,
    }
}
