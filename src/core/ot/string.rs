//! String family transforms: Insert, Remove, Set.
//!
//! Indices count Unicode scalar values. A wholesale Set beats concurrent
//! index operations from either side; equal-position insert ties hold the
//! server index and shift the client. An insert landing strictly inside a
//! concurrent remove survives, bisecting that remove into a compound of two
//! removes around the inserted text.

use crate::core::operation::{DiscreteOperation, Operation};

pub(super) fn transform(
    server: &DiscreteOperation,
    client: &DiscreteOperation,
) -> (Operation, Operation) {
    use DiscreteOperation::*;

    match (server, client) {
        // Wholesale sets obliterate concurrent index edits; two sets are
        // decided in the server's favor.
        (StringSet { .. }, _) => (
            Operation::Discrete(server.clone()),
            Operation::Discrete(client.clone().into_noop()),
        ),
        (_, StringSet { .. }) => (
            Operation::Discrete(server.clone().into_noop()),
            Operation::Discrete(client.clone()),
        ),

        (
            StringInsert {
                index: si,
                value: sv,
                ..
            },
            StringInsert {
                index: ci,
                value: cv,
                ..
            },
        ) => {
            let slen = char_len(sv);
            let clen = char_len(cv);
            // Equal indices tie-break to the server: its insert stays put
            // and the client's shifts past it.
            if si <= ci {
                (
                    Operation::Discrete(server.clone()),
                    Operation::Discrete(shift_insert(client, *ci + slen)),
                )
            } else {
                (
                    Operation::Discrete(shift_insert(server, *si + clen)),
                    Operation::Discrete(client.clone()),
                )
            }
        }

        (
            StringInsert {
                vid,
                index: si,
                value: sv,
                no_op,
            },
            StringRemove {
                index: ci,
                value: cv,
                ..
            },
        ) => {
            let slen = char_len(sv);
            let clen = char_len(cv);
            if *si <= *ci {
                (
                    Operation::Discrete(server.clone()),
                    Operation::Discrete(shift_remove(client, *ci + slen)),
                )
            } else if *si >= *ci + clen {
                (
                    Operation::Discrete(shift_insert(server, *si - clen)),
                    Operation::Discrete(client.clone()),
                )
            } else {
                // Insert strictly inside the removed range: the insert
                // survives at the range start, the remove bisects around
                // the inserted text.
                let offset = *si - *ci;
                let pre = chars_range(cv, 0, offset);
                let post = chars_range(cv, offset, clen);
                let survivor = StringInsert {
                    vid: vid.clone(),
                    no_op: *no_op,
                    index: *ci,
                    value: sv.clone(),
                };
                let bisected = Operation::compound(vec![
                    remove_like(client, *ci, pre),
                    remove_like(client, *ci + slen, post),
                ]);
                (Operation::Discrete(survivor), bisected)
            }
        }

        (
            StringRemove {
                vid,
                index: si,
                value: sv,
                ..
            },
            StringInsert {
                index: ci,
                value: cv,
                ..
            },
        ) => {
            let slen = char_len(sv);
            let clen = char_len(cv);
            if *ci <= *si {
                (
                    Operation::Discrete(shift_remove(server, *si + clen)),
                    Operation::Discrete(client.clone()),
                )
            } else if *ci >= *si + slen {
                (
                    Operation::Discrete(server.clone()),
                    Operation::Discrete(shift_insert(client, *ci - slen)),
                )
            } else {
                let offset = *ci - *si;
                let pre = chars_range(sv, 0, offset);
                let post = chars_range(sv, offset, slen);
                let bisected = Operation::compound(vec![
                    remove_like(server, *si, pre),
                    remove_like(server, *si + clen, post),
                ]);
                let survivor = StringInsert {
                    vid: vid.clone(),
                    no_op: false,
                    index: *si,
                    value: cv.clone(),
                };
                (bisected, Operation::Discrete(survivor))
            }
        }

        (
            StringRemove {
                index: si,
                value: sv,
                ..
            },
            StringRemove {
                index: ci,
                value: cv,
                ..
            },
        ) => {
            let slen = char_len(sv);
            let clen = char_len(cv);
            let (ss, se) = (*si, *si + slen);
            let (cs, ce) = (*ci, *ci + clen);

            if se <= cs {
                (
                    Operation::Discrete(server.clone()),
                    Operation::Discrete(shift_remove(client, cs - slen)),
                )
            } else if ce <= ss {
                (
                    Operation::Discrete(shift_remove(server, ss - clen)),
                    Operation::Discrete(client.clone()),
                )
            } else if ss <= cs && ce <= se {
                // Server range covers the client's: the client has nothing
                // left to remove; the server removes what the client did
                // not already take.
                let excised = excise(sv, cs - ss, ce - ss);
                (
                    remove_or_noop(server, ss, excised),
                    Operation::Discrete(client.clone().into_noop()),
                )
            } else if cs <= ss && se <= ce {
                let excised = excise(cv, ss - cs, se - cs);
                (
                    Operation::Discrete(server.clone().into_noop()),
                    remove_or_noop(client, cs, excised),
                )
            } else if ss < cs {
                // Partial overlap, server range first.
                (
                    remove_or_noop(server, ss, chars_range(sv, 0, cs - ss)),
                    remove_or_noop(client, ss, chars_range(cv, se - cs, clen)),
                )
            } else {
                // Partial overlap, client range first.
                (
                    remove_or_noop(server, cs, chars_range(sv, ce - ss, slen)),
                    remove_or_noop(client, cs, chars_range(cv, 0, ss - cs)),
                )
            }
        }

        _ => unreachable!("string transform called with non-string pair"),
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Substring by char positions `[from, to)`.
fn chars_range(s: &str, from: usize, to: usize) -> String {
    s.chars().skip(from).take(to.saturating_sub(from)).collect()
}

/// Remove the char range `[from, to)` from `s`, keeping the remainder.
fn excise(s: &str, from: usize, to: usize) -> String {
    let mut out: String = s.chars().take(from).collect();
    out.extend(s.chars().skip(to));
    out
}

fn shift_insert(op: &DiscreteOperation, index: usize) -> DiscreteOperation {
    match op {
        DiscreteOperation::StringInsert { vid, no_op, value, .. } => {
            DiscreteOperation::StringInsert {
                vid: vid.clone(),
                no_op: *no_op,
                index,
                value: value.clone(),
            }
        }
        _ => unreachable!("shift_insert on non-insert"),
    }
}

fn shift_remove(op: &DiscreteOperation, index: usize) -> DiscreteOperation {
    match op {
        DiscreteOperation::StringRemove { vid, no_op, value, .. } => {
            DiscreteOperation::StringRemove {
                vid: vid.clone(),
                no_op: *no_op,
                index,
                value: value.clone(),
            }
        }
        _ => unreachable!("shift_remove on non-remove"),
    }
}

fn remove_like(op: &DiscreteOperation, index: usize, value: String) -> DiscreteOperation {
    match op {
        DiscreteOperation::StringRemove { vid, no_op, .. } => DiscreteOperation::StringRemove {
            vid: vid.clone(),
            no_op: *no_op,
            index,
            value,
        },
        _ => unreachable!("remove_like on non-remove"),
    }
}

fn remove_or_noop(op: &DiscreteOperation, index: usize, value: String) -> Operation {
    if value.is_empty() {
        Operation::Discrete(op.clone().into_noop())
    } else {
        Operation::Discrete(remove_like(op, index, value))
    }
}
