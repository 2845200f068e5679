//! Scalar family transforms: NumberAdd/NumberSet, BooleanSet, DateSet.
//!
//! Additions commute. A Set beats a concurrent Add from either side, and
//! Set/Set races go to the server.

use crate::core::operation::DiscreteOperation;

pub(super) fn transform(
    server: &DiscreteOperation,
    client: &DiscreteOperation,
) -> (DiscreteOperation, DiscreteOperation) {
    use DiscreteOperation::*;

    match (server, client) {
        (NumberAdd { .. }, NumberAdd { .. }) => (server.clone(), client.clone()),
        (NumberSet { .. }, NumberAdd { .. }) => {
            (server.clone(), client.clone().into_noop())
        }
        (NumberAdd { .. }, NumberSet { .. }) => {
            (server.clone().into_noop(), client.clone())
        }
        (NumberSet { .. }, NumberSet { .. })
        | (BooleanSet { .. }, BooleanSet { .. })
        | (DateSet { .. }, DateSet { .. }) => (server.clone(), client.clone().into_noop()),
        _ => unreachable!("scalar transform called with mismatched pair"),
    }
}
