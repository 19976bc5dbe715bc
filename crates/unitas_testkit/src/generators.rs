//! Property-based test generators using proptest.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::BTreeMap;
use unitas_core::{EntityReference, QualifiedName, Value};

/// Strategy for references drawn from a small pool, so collisions happen.
pub fn reference_strategy(pool: usize) -> impl Strategy<Value = EntityReference> {
    (0..pool.max(1)).prop_map(|i| EntityReference::parse(&format!("e{i}")))
}

/// Strategy for arbitrary identities, including ones containing `:`.
pub fn identity_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9:_-]{1,24}").expect("Invalid regex")
}

/// Strategy for qualified names whose type part may itself contain `:`.
pub fn qualified_name_strategy() -> impl Strategy<Value = QualifiedName> {
    (
        prop::string::string_regex("[A-Za-z][A-Za-z0-9:.]{0,15}").expect("Invalid regex"),
        prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex"),
    )
        .prop_map(|(declaring, name)| QualifiedName::new(declaring, name))
}

/// Strategy for property values, nested up to a few levels.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        ".{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        (0i64..4_102_444_800, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
            Value::Timestamp(Utc.timestamp_opt(secs, nanos).single().unwrap_or_default())
        }),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::List),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|map: BTreeMap<String, Value>| Value::Map(map)),
        ]
    })
}

/// One edit to a many-association.
#[derive(Debug, Clone)]
pub enum ManyOp {
    /// Append a target.
    Push(usize),
    /// Insert a target at a position, clamped to the current length.
    Insert {
        /// Requested position.
        index: usize,
        /// Target from the pool.
        target: usize,
    },
    /// Remove the first occurrence of a target.
    Remove(usize),
    /// Remove every target.
    Clear,
}

/// Strategy for many-association edits over a pool of `pool` targets.
pub fn many_op_strategy(pool: usize) -> impl Strategy<Value = ManyOp> {
    let pool = pool.max(1);
    prop_oneof![
        4 => (0..pool).prop_map(ManyOp::Push),
        3 => (0usize..8, 0..pool).prop_map(|(index, target)| ManyOp::Insert { index, target }),
        2 => (0..pool).prop_map(ManyOp::Remove),
        1 => Just(ManyOp::Clear),
    ]
}

/// Strategy for a sequence of many-association edits.
pub fn many_op_sequence_strategy(
    pool: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<ManyOp>> {
    prop::collection::vec(many_op_strategy(pool), 0..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 128,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Few cases, for suites that touch the filesystem.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 24,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
