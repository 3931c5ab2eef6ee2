//! Property-based test generators using proptest.

use objstore_core::{KeySpace, ObjectKey, StoredObject};
use proptest::prelude::*;

/// Strategy for any key space.
pub fn key_space_strategy() -> impl Strategy<Value = KeySpace> {
    prop::sample::select(KeySpace::ALL.to_vec())
}

/// Strategy for raw keys of every valid length.
pub fn object_key_strategy() -> impl Strategy<Value = ObjectKey> {
    prop::collection::vec(any::<u8>(), 1..=ObjectKey::MAX_LEN)
        .prop_map(|bytes| ObjectKey::from_bytes(&bytes).unwrap_or_else(|_| ObjectKey::digest(&bytes)))
}

/// Strategy for payloads, empty ones included.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

/// Strategy for a batch of content-addressed entries, duplicates possible.
pub fn batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<(ObjectKey, StoredObject)>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 0..max_len).prop_map(
        |payloads| {
            payloads
                .into_iter()
                .map(|payload| (ObjectKey::digest(&payload), StoredObject::from(payload)))
                .collect()
        },
    )
}

/// One step of a random store workload.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Put a payload under its digest.
    Put(KeySpace, Vec<u8>),
    /// Put a batch of payloads.
    PutBatch(KeySpace, Vec<Vec<u8>>),
    /// Clear a key space.
    Clear(KeySpace),
}

/// Strategy for workloads of up to `max_len` operations.
pub fn store_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    let small_payload = || prop::collection::vec(any::<u8>(), 0..64);
    let op = prop_oneof![
        6 => (key_space_strategy(), small_payload()).prop_map(|(s, p)| StoreOp::Put(s, p)),
        3 => (key_space_strategy(), prop::collection::vec(small_payload(), 0..8))
            .prop_map(|(s, ps)| StoreOp::PutBatch(s, ps)),
        1 => key_space_strategy().prop_map(StoreOp::Clear),
    ];
    prop::collection::vec(op, 0..max_len)
}
