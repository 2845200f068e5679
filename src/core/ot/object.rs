//! Object family transforms: AddProperty, SetProperty, RemoveProperty, Set.
//!
//! Operations on different properties commute untouched. On the same
//! property, a write/write race is server-wins, a write beats a concurrent
//! remove, and two removes annihilate. A wholesale Set beats every other
//! object operation from either side.

use crate::core::operation::DiscreteOperation;

pub(super) fn transform(
    server: &DiscreteOperation,
    client: &DiscreteOperation,
) -> (DiscreteOperation, DiscreteOperation) {
    use DiscreteOperation::*;

    match (server, client) {
        (ObjectSet { .. }, _) => (server.clone(), client.clone().into_noop()),
        (_, ObjectSet { .. }) => (server.clone().into_noop(), client.clone()),

        _ => {
            if property(server) != property(client) {
                return (server.clone(), client.clone());
            }
            match (is_write(server), is_write(client)) {
                // Write/write on one property: the server's value stands.
                (true, true) => (server.clone(), client.clone().into_noop()),
                // A write beats a concurrent remove of the same property.
                (true, false) => (server.clone(), client.clone().into_noop()),
                (false, true) => (server.clone().into_noop(), client.clone()),
                // Both removed it.
                (false, false) => (
                    server.clone().into_noop(),
                    client.clone().into_noop(),
                ),
            }
        }
    }
}

fn property(op: &DiscreteOperation) -> &str {
    match op {
        DiscreteOperation::ObjectAddProperty { property, .. }
        | DiscreteOperation::ObjectSetProperty { property, .. }
        | DiscreteOperation::ObjectRemoveProperty { property, .. } => property,
        _ => unreachable!("object transform called with non-object pair"),
    }
}

fn is_write(op: &DiscreteOperation) -> bool {
    matches!(
        op,
        DiscreteOperation::ObjectAddProperty { .. } | DiscreteOperation::ObjectSetProperty { .. }
    )
}
