//! Array family transforms: Insert, Remove, Replace, Move, Set.
//!
//! Moves are modeled as a (remove, insert) pair and transformed by
//! composition through the non-move rules. Composition cannot see element
//! identity, so the pairs where both operations touch the same element
//! (move/move on one source, remove or replace of the moved element) carry
//! explicit rules: the moved element is tracked to its resting position, a
//! concurrent remove follows it there, and a concurrent replace survives as
//! an insert when the server already deleted the element out from under it.

use crate::core::error::TransformError;
use crate::core::operation::DiscreteOperation;
use crate::core::value::{DataValue, NullValue};

pub(super) fn transform(
    server: &DiscreteOperation,
    client: &DiscreteOperation,
) -> Result<(DiscreteOperation, DiscreteOperation), TransformError> {
    use DiscreteOperation::*;

    match (server, client) {
        // A wholesale set beats everything; two sets go to the server.
        (ArraySet { .. }, _) => Ok((server.clone(), client.clone().into_noop())),
        (_, ArraySet { .. }) => Ok((server.clone().into_noop(), client.clone())),

        (ArrayMove { .. }, ArrayMove { .. }) => move_vs_move(server, client),
        (ArrayMove { .. }, _) => server_move(server, client),
        (_, ArrayMove { .. }) => client_move(server, client),

        _ => Ok(non_move(server, client)),
    }
}

/// The {Insert, Remove, Replace} sub-matrix. Total, and safe to reuse for
/// move components because it never produces anything but those kinds.
fn non_move(
    server: &DiscreteOperation,
    client: &DiscreteOperation,
) -> (DiscreteOperation, DiscreteOperation) {
    use DiscreteOperation::*;

    if server.is_noop() || client.is_noop() {
        return (server.clone(), client.clone());
    }

    match (server, client) {
        (ArrayInsert { index: si, .. }, ArrayInsert { index: ci, .. }) => {
            // Equal insert positions hold the server, shift the client.
            if si <= ci {
                (server.clone(), with_index(client, ci + 1))
            } else {
                (with_index(server, si + 1), client.clone())
            }
        }

        (ArrayInsert { index: si, .. }, ArrayRemove { index: ci, .. }) => {
            if si <= ci {
                (server.clone(), with_index(client, ci + 1))
            } else {
                (with_index(server, si - 1), client.clone())
            }
        }

        (ArrayInsert { index: si, .. }, ArrayReplace { index: ci, .. }) => {
            if si <= ci {
                (server.clone(), with_index(client, ci + 1))
            } else {
                (server.clone(), client.clone())
            }
        }

        (ArrayRemove { index: si, .. }, ArrayInsert { index: ci, .. }) => {
            if ci <= si {
                (with_index(server, si + 1), client.clone())
            } else {
                (server.clone(), with_index(client, ci - 1))
            }
        }

        (ArrayRemove { index: si, .. }, ArrayRemove { index: ci, .. }) => {
            if si < ci {
                (server.clone(), with_index(client, ci - 1))
            } else if si > ci {
                (with_index(server, si - 1), client.clone())
            } else {
                // Both removed the same element.
                (server.clone().into_noop(), client.clone().into_noop())
            }
        }

        (
            ArrayRemove { index: si, .. },
            ArrayReplace {
                vid,
                index: ci,
                value,
                no_op,
            },
        ) => {
            if si < ci {
                (server.clone(), with_index(client, ci - 1))
            } else if si > ci {
                (server.clone(), client.clone())
            } else {
                // The server deleted the element the client replaced; the
                // replacement value survives as an insert.
                (
                    server.clone().into_noop(),
                    ArrayInsert {
                        vid: vid.clone(),
                        no_op: *no_op,
                        index: *ci,
                        value: value.clone(),
                    },
                )
            }
        }

        (ArrayReplace { index: si, .. }, ArrayInsert { index: ci, .. }) => {
            if ci <= si {
                (with_index(server, si + 1), client.clone())
            } else {
                (server.clone(), client.clone())
            }
        }

        (
            ArrayReplace {
                vid,
                index: si,
                value,
                no_op,
            },
            ArrayRemove { index: ci, .. },
        ) => {
            if ci < si {
                (with_index(server, si - 1), client.clone())
            } else if ci > si {
                (server.clone(), client.clone())
            } else {
                (
                    ArrayInsert {
                        vid: vid.clone(),
                        no_op: *no_op,
                        index: *si,
                        value: value.clone(),
                    },
                    client.clone().into_noop(),
                )
            }
        }

        (ArrayReplace { index: si, .. }, ArrayReplace { index: ci, .. }) => {
            if si == ci {
                (server.clone(), client.clone().into_noop())
            } else {
                (server.clone(), client.clone())
            }
        }

        _ => unreachable!("non_move called with a move or set operand"),
    }
}

fn server_move(
    server: &DiscreteOperation,
    client: &DiscreteOperation,
) -> Result<(DiscreteOperation, DiscreteOperation), TransformError> {
    use DiscreteOperation::*;

    let ArrayMove {
        to_index: t,
        from_index: f,
        ..
    } = server
    else {
        unreachable!("server_move without a move");
    };

    match client {
        // The client removed the element the server is moving: the move
        // dies and the remove chases the element to its resting position.
        ArrayRemove { index, .. } if index == f => {
            Ok((server.clone().into_noop(), with_index(client, *t)))
        }
        // The client replaced the element being moved: both survive, the
        // replacement follows the element.
        ArrayReplace { index, .. } if index == f => Ok((server.clone(), with_index(client, *t))),
        _ => {
            let (remove, insert) = decompose(server);
            let (remove_t, client_1) = non_move(&remove, client);
            let (insert_t, client_2) = non_move(&insert, &client_1);
            Ok((recompose(server, &remove_t, &insert_t)?, client_2))
        }
    }
}

fn client_move(
    server: &DiscreteOperation,
    client: &DiscreteOperation,
) -> Result<(DiscreteOperation, DiscreteOperation), TransformError> {
    use DiscreteOperation::*;

    let ArrayMove {
        to_index: t,
        from_index: f,
        ..
    } = client
    else {
        unreachable!("client_move without a move");
    };

    match server {
        ArrayRemove { index, .. } if index == f => {
            Ok((with_index(server, *t), client.clone().into_noop()))
        }
        ArrayReplace { index, .. } if index == f => Ok((with_index(server, *t), client.clone())),
        _ => {
            let (remove, insert) = decompose(client);
            let (server_1, remove_t) = non_move(server, &remove);
            let (server_2, insert_t) = non_move(&server_1, &insert);
            Ok((server_2, recompose(client, &remove_t, &insert_t)?))
        }
    }
}

fn move_vs_move(
    server: &DiscreteOperation,
    client: &DiscreteOperation,
) -> Result<(DiscreteOperation, DiscreteOperation), TransformError> {
    let DiscreteOperation::ArrayMove {
        vid,
        no_op,
        from_index: sf,
        to_index: st,
    } = server
    else {
        unreachable!("move_vs_move without moves");
    };
    let DiscreteOperation::ArrayMove {
        from_index: cf,
        to_index: ct,
        ..
    } = client
    else {
        unreachable!("move_vs_move without moves");
    };

    if sf == cf {
        if st == ct {
            // Identical moves.
            return Ok((server.clone().into_noop(), client.clone().into_noop()));
        }
        // Both moved the same element; the server's destination wins. The
        // array minus that element is identical on both paths, so only the
        // source needs rebasing onto the client's placement.
        return Ok((
            DiscreteOperation::ArrayMove {
                vid: vid.clone(),
                no_op: *no_op,
                from_index: *ct,
                to_index: *st,
            },
            client.clone().into_noop(),
        ));
    }

    // Distinct elements: compose both moves and fold component-wise, the
    // same left fold the compound expansion uses.
    let (server_remove, server_insert) = decompose(server);
    let (client_remove, client_insert) = decompose(client);

    let mut client_components = [client_remove, client_insert];
    let mut server_out = Vec::with_capacity(2);
    for component in [server_remove, server_insert] {
        let mut current = component;
        for client_component in client_components.iter_mut() {
            let (current_t, client_t) = non_move(&current, client_component);
            current = current_t;
            *client_component = client_t;
        }
        server_out.push(current);
    }

    Ok((
        recompose(server, &server_out[0], &server_out[1])?,
        recompose(client, &client_components[0], &client_components[1])?,
    ))
}

/// Split a move into the remove/insert pair it is equivalent to. The insert
/// carries a placeholder value; composition only consumes indices.
fn decompose(op: &DiscreteOperation) -> (DiscreteOperation, DiscreteOperation) {
    let DiscreteOperation::ArrayMove {
        vid,
        no_op,
        from_index,
        to_index,
    } = op
    else {
        unreachable!("decompose on non-move");
    };
    (
        DiscreteOperation::ArrayRemove {
            vid: vid.clone(),
            no_op: *no_op,
            index: *from_index,
        },
        DiscreteOperation::ArrayInsert {
            vid: vid.clone(),
            no_op: *no_op,
            index: *to_index,
            value: DataValue::Null(NullValue { vid: vid.clone() }),
        },
    )
}

fn recompose(
    original: &DiscreteOperation,
    remove_t: &DiscreteOperation,
    insert_t: &DiscreteOperation,
) -> Result<DiscreteOperation, TransformError> {
    if remove_t.is_noop() || insert_t.is_noop() {
        return Ok(original.clone().into_noop());
    }
    let (
        DiscreteOperation::ArrayRemove {
            index: from_index, ..
        },
        DiscreteOperation::ArrayInsert {
            index: to_index, ..
        },
    ) = (remove_t, insert_t)
    else {
        return Err(TransformError::InvalidOperation {
            reason: "move components changed kind during composition".into(),
        });
    };
    let DiscreteOperation::ArrayMove { vid, no_op, .. } = original else {
        unreachable!("recompose on non-move");
    };
    Ok(DiscreteOperation::ArrayMove {
        vid: vid.clone(),
        no_op: *no_op,
        from_index: *from_index,
        to_index: *to_index,
    })
}

fn with_index(op: &DiscreteOperation, index: usize) -> DiscreteOperation {
    use DiscreteOperation::*;
    match op {
        ArrayInsert {
            vid, no_op, value, ..
        } => ArrayInsert {
            vid: vid.clone(),
            no_op: *no_op,
            index,
            value: value.clone(),
        },
        ArrayRemove { vid, no_op, .. } => ArrayRemove {
            vid: vid.clone(),
            no_op: *no_op,
            index,
        },
        ArrayReplace {
            vid, no_op, value, ..
        } => ArrayReplace {
            vid: vid.clone(),
            no_op: *no_op,
            index,
            value: value.clone(),
        },
        _ => unreachable!("with_index on non-indexed operation"),
    }
}
