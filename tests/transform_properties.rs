//! Property coverage for the transformation matrix.
//!
//! The central claim is TP1: for concurrent operations `s` and `c` with
//! `(s', c') = tf(s, c)`, applying `s` then `c'` reaches the same tree as
//! applying `c` then `s'`. The generators below produce pairs that are
//! individually applicable to a shared base tree, per value family.

use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use convergence_server::{
    DataValue, DiscreteOperation, DoubleValue, ObjectValue, Operation, StringValue, ValueId,
    ValueTree, transform, transform_discrete,
};

fn vid(s: &str) -> ValueId {
    ValueId::new(s).unwrap()
}

/// Root `{"s": <base>}` with the string at vid `s1`.
fn string_tree(base: &str) -> ValueTree {
    let root = ObjectValue {
        vid: vid("root"),
        children: BTreeMap::from([(
            "s".to_string(),
            DataValue::String(StringValue {
                vid: vid("s1"),
                value: base.to_string(),
            }),
        )]),
    };
    ValueTree::new(root).unwrap()
}

/// Root `{"arr": [0.0, 1.0, ...]}` with the array at vid `a1`.
fn array_tree(len: usize) -> ValueTree {
    let children = (0..len)
        .map(|i| {
            DataValue::Double(DoubleValue {
                vid: vid(&format!("elem{i}")),
                value: i as f64,
            })
        })
        .collect();
    let root = ObjectValue {
        vid: vid("root"),
        children: BTreeMap::from([(
            "arr".to_string(),
            DataValue::Array(convergence_server::ArrayValue {
                vid: vid("a1"),
                children,
            }),
        )]),
    };
    ValueTree::new(root).unwrap()
}

/// Root `{"o": {"a": 1.0, "b": 2.0}}` with the object at vid `o1`.
fn object_tree() -> ValueTree {
    let inner = ObjectValue {
        vid: vid("o1"),
        children: BTreeMap::from([
            (
                "a".to_string(),
                DataValue::Double(DoubleValue {
                    vid: vid("pa"),
                    value: 1.0,
                }),
            ),
            (
                "b".to_string(),
                DataValue::Double(DoubleValue {
                    vid: vid("pb"),
                    value: 2.0,
                }),
            ),
        ]),
    };
    let root = ObjectValue {
        vid: vid("root"),
        children: BTreeMap::from([("o".to_string(), DataValue::Object(inner))]),
    };
    ValueTree::new(root).unwrap()
}

fn apply_any(tree: &mut ValueTree, op: &Operation) {
    match op {
        Operation::Discrete(op) => {
            tree.apply(op).unwrap();
        }
        Operation::Compound(compound) => {
            for sub in &compound.ops {
                tree.apply(sub).unwrap();
            }
        }
    }
}

/// Assert TP1 on a discrete pair against a base tree.
fn assert_tp1(
    base: &ValueTree,
    server: &DiscreteOperation,
    client: &DiscreteOperation,
) -> Result<(), TestCaseError> {
    let (server_t, client_t) = transform_discrete(server, client).unwrap();

    let mut path_server_first = base.clone();
    path_server_first.apply(server).unwrap();
    apply_any(&mut path_server_first, &client_t);

    let mut path_client_first = base.clone();
    path_client_first.apply(client).unwrap();
    apply_any(&mut path_client_first, &server_t);

    prop_assert_eq!(
        path_server_first.materialize(),
        path_client_first.materialize(),
        "divergence: server={:?} client={:?} server'={:?} client'={:?}",
        server,
        client,
        server_t,
        client_t
    );
    Ok(())
}

// ---- string family -----------------------------------------------------

const STRING_BASE: &str = "abcdefgh";

fn string_op(base: String, side: &'static str) -> BoxedStrategy<DiscreteOperation> {
    let len = base.chars().count();
    let insert = (0..=len, proptest::string::string_regex("[x-z]{1,3}").unwrap()).prop_map(
        |(index, value)| DiscreteOperation::StringInsert {
            vid: vid("s1"),
            no_op: false,
            index,
            value,
        },
    );
    let set = proptest::string::string_regex("[m-p]{0,4}")
        .unwrap()
        .prop_map(move |value| DiscreteOperation::StringSet {
            vid: vid("s1"),
            no_op: false,
            value: format!("{side}{value}"),
        });
    if len == 0 {
        return prop_oneof![insert, set].boxed();
    }
    let remove = (0..len)
        .prop_flat_map(move |start| (Just(start), 1..=(len - start)))
        .prop_map(move |(start, rlen)| DiscreteOperation::StringRemove {
            vid: vid("s1"),
            no_op: false,
            index: start,
            value: base[start..start + rlen].to_string(),
        });
    prop_oneof![insert, remove, set].boxed()
}

fn string_case() -> impl Strategy<Value = (String, DiscreteOperation, DiscreteOperation)> {
    (0usize..=STRING_BASE.len()).prop_flat_map(|len| {
        let base = STRING_BASE[..len].to_string();
        (
            Just(base.clone()),
            string_op(base.clone(), "srv"),
            string_op(base, "cli"),
        )
    })
}

proptest! {
    #[test]
    fn tp1_holds_for_string_pairs((base, server, client) in string_case()) {
        let tree = string_tree(&base);
        assert_tp1(&tree, &server, &client)?;
    }

    #[test]
    fn noops_pass_through_string_pairs((_base, server, client) in string_case()) {
        let noop_client = client.clone().into_noop();
        let (server_t, client_t) = transform_discrete(&server, &noop_client).unwrap();
        prop_assert_eq!(server_t, Operation::Discrete(server));
        prop_assert_eq!(client_t, Operation::Discrete(noop_client));
    }
}

// ---- array family ------------------------------------------------------

fn array_value(side: &'static str, tag: usize) -> DataValue {
    DataValue::Double(DoubleValue {
        vid: vid(&format!("{side}{tag}")),
        value: 100.0 + tag as f64,
    })
}

fn array_op(len: usize, side: &'static str) -> BoxedStrategy<DiscreteOperation> {
    let insert = (0..=len, 0usize..4).prop_map(move |(index, tag)| {
        DiscreteOperation::ArrayInsert {
            vid: vid("a1"),
            no_op: false,
            index,
            value: array_value(side, tag),
        }
    });
    let set = (0usize..3).prop_map(move |count| DiscreteOperation::ArraySet {
        vid: vid("a1"),
        no_op: false,
        value: (0..count).map(|i| array_value(side, 10 + i)).collect(),
    });
    if len == 0 {
        return prop_oneof![insert, set].boxed();
    }
    let remove = (0..len).prop_map(|index| DiscreteOperation::ArrayRemove {
        vid: vid("a1"),
        no_op: false,
        index,
    });
    let replace = (0..len, 4usize..8).prop_map(move |(index, tag)| {
        DiscreteOperation::ArrayReplace {
            vid: vid("a1"),
            no_op: false,
            index,
            value: array_value(side, tag),
        }
    });
    let mv = (0..len, 0..len).prop_map(|(from_index, to_index)| DiscreteOperation::ArrayMove {
        vid: vid("a1"),
        no_op: false,
        from_index,
        to_index,
    });
    prop_oneof![insert, remove, replace, mv, set].boxed()
}

fn array_case() -> impl Strategy<Value = (usize, DiscreteOperation, DiscreteOperation)> {
    (0usize..=5).prop_flat_map(|len| (Just(len), array_op(len, "srv"), array_op(len, "cli")))
}

proptest! {
    #[test]
    fn tp1_holds_for_array_pairs((len, server, client) in array_case()) {
        let tree = array_tree(len);
        assert_tp1(&tree, &server, &client)?;
    }
}

// ---- object family -----------------------------------------------------

fn object_value(side: &'static str, tag: usize) -> DataValue {
    DataValue::Double(DoubleValue {
        vid: vid(&format!("{side}-obj{tag}")),
        value: 200.0 + tag as f64,
    })
}

fn object_op(side: &'static str) -> BoxedStrategy<DiscreteOperation> {
    let keys = prop_oneof![Just("a"), Just("b"), Just("c")];
    let add = (keys.clone(), 0usize..3).prop_map(move |(key, tag)| {
        DiscreteOperation::ObjectAddProperty {
            vid: vid("o1"),
            no_op: false,
            property: key.to_string(),
            value: object_value(side, tag),
        }
    });
    let set = (keys, 3usize..6).prop_map(move |(key, tag)| {
        DiscreteOperation::ObjectSetProperty {
            vid: vid("o1"),
            no_op: false,
            property: key.to_string(),
            value: object_value(side, tag),
        }
    });
    // Removes are restricted to properties present in the base tree.
    let remove = prop_oneof![Just("a"), Just("b")].prop_map(|key| {
        DiscreteOperation::ObjectRemoveProperty {
            vid: vid("o1"),
            no_op: false,
            property: key.to_string(),
        }
    });
    let whole = (0usize..3).prop_map(move |count| DiscreteOperation::ObjectSet {
        vid: vid("o1"),
        no_op: false,
        value: (0..count)
            .map(|i| (format!("k{i}"), object_value(side, 6 + i)))
            .collect(),
    });
    prop_oneof![add, set, remove, whole].boxed()
}

proptest! {
    #[test]
    fn tp1_holds_for_object_pairs(server in object_op("srv"), client in object_op("cli")) {
        let tree = object_tree();
        assert_tp1(&tree, &server, &client)?;
    }
}

// ---- compound expansion ------------------------------------------------

/// Two independent strings so compound members are always applicable in any
/// interleaving.
fn two_string_tree() -> ValueTree {
    let root = ObjectValue {
        vid: vid("root"),
        children: BTreeMap::from([
            (
                "x".to_string(),
                DataValue::String(StringValue {
                    vid: vid("s1"),
                    value: "abcd".into(),
                }),
            ),
            (
                "y".to_string(),
                DataValue::String(StringValue {
                    vid: vid("s2"),
                    value: "wxyz".into(),
                }),
            ),
        ]),
    };
    ValueTree::new(root).unwrap()
}

fn insert_into(target: &str, index: usize, value: &str) -> DiscreteOperation {
    DiscreteOperation::StringInsert {
        vid: vid(target),
        no_op: false,
        index,
        value: value.into(),
    }
}

proptest! {
    /// TP1 for a discrete server op against a compound client op, and the
    /// left-fold definition of the expansion.
    #[test]
    fn compound_expansion_is_the_left_fold(
        server_index in 0usize..=4,
        first_index in 0usize..=4,
        second_index in 0usize..=4,
    ) {
        let server = Operation::Discrete(insert_into("s1", server_index, "S"));
        let c1 = insert_into("s1", first_index, "p");
        let c2 = insert_into("s2", second_index, "q");
        let client = Operation::compound(vec![c1.clone(), c2.clone()]);

        let (server_t, client_t) = transform(&server, &client).unwrap();

        // Left fold by hand.
        let (server_1, c1_t) = transform(&server, &Operation::Discrete(c1)).unwrap();
        let (server_2, c2_t) = transform(&server_1, &Operation::Discrete(c2)).unwrap();
        let folded = match (c1_t, c2_t) {
            (Operation::Discrete(a), Operation::Discrete(b)) => Operation::compound(vec![a, b]),
            _ => unreachable!("string inserts stay discrete"),
        };
        prop_assert_eq!(&server_t, &server_2);
        prop_assert_eq!(&client_t, &folded);

        // And TP1 holds across the expansion.
        let base = two_string_tree();
        let mut path_server_first = base.clone();
        apply_any(&mut path_server_first, &server);
        apply_any(&mut path_server_first, &client_t);
        let mut path_client_first = base.clone();
        apply_any(&mut path_client_first, &client);
        apply_any(&mut path_client_first, &server_t);
        prop_assert_eq!(
            path_server_first.materialize(),
            path_client_first.materialize()
        );
    }
}

// ---- scalar matrix (small enough to enumerate) -------------------------

#[test]
fn scalar_matrix_is_tp1() {
    let base = {
        let root = ObjectValue {
            vid: vid("root"),
            children: BTreeMap::from([(
                "n".to_string(),
                DataValue::Double(DoubleValue {
                    vid: vid("n1"),
                    value: 10.0,
                }),
            )]),
        };
        ValueTree::new(root).unwrap()
    };

    let ops = [
        DiscreteOperation::NumberAdd {
            vid: vid("n1"),
            no_op: false,
            value: 2.5,
        },
        DiscreteOperation::NumberAdd {
            vid: vid("n1"),
            no_op: false,
            value: -4.0,
        },
        DiscreteOperation::NumberSet {
            vid: vid("n1"),
            no_op: false,
            value: 7.0,
        },
        DiscreteOperation::NumberSet {
            vid: vid("n1"),
            no_op: false,
            value: -1.0,
        },
    ];

    for server in &ops {
        for client in &ops {
            let (server_t, client_t) = transform_discrete(server, client).unwrap();
            let mut path1 = base.clone();
            path1.apply(server).unwrap();
            apply_any(&mut path1, &client_t);
            let mut path2 = base.clone();
            path2.apply(client).unwrap();
            apply_any(&mut path2, &server_t);
            assert_eq!(
                path1.materialize(),
                path2.materialize(),
                "diverged on {server:?} vs {client:?}"
            );
        }
    }
}
