//! Property tests comparing each backend against a model.

use objstore_core::{KeySpace, ObjectKey};
use objstore_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

type Model = HashMap<KeySpace, HashSet<ObjectKey>>;

fn apply(parts: &StoreParts, model: &mut Model, op: &StoreOp) {
    match op {
        StoreOp::Put(space, payload) => {
            let key = parts.put_content(*space, payload).unwrap();
            model.entry(*space).or_default().insert(key);
        }
        StoreOp::PutBatch(space, payloads) => {
            let mut batch = parts.begin_write(0);
            for payload in payloads {
                let key = batch.put_content(*space, payload).unwrap();
                model.entry(*space).or_default().insert(key);
            }
            batch.flush().unwrap();
        }
        StoreOp::Clear(space) => {
            parts.clear_key_space(*space).unwrap();
            model.remove(space);
        }
    }
}

fn assert_matches(parts: &StoreParts, model: &Model) {
    for space in KeySpace::ALL {
        let listed: HashSet<ObjectKey> = parts.enumerate(space).unwrap().collect();
        let expected = model.get(&space).cloned().unwrap_or_default();
        assert_eq!(listed, expected, "space {space}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn memory_store_follows_model(ops in store_ops_strategy(40)) {
        let parts = make_memory_store(enabled_faults()).unwrap();
        let mut model = Model::new();
        for op in &ops {
            apply(&parts, &mut model, op);
        }
        assert_matches(&parts, &model);
    }

    #[test]
    fn log_store_follows_model_across_reopen(ops in store_ops_strategy(40)) {
        let parts = make_log_store(enabled_faults()).unwrap();
        let mut model = Model::new();
        for op in &ops {
            apply(&parts, &mut model, op);
        }
        assert_matches(&parts, &model);

        let parts = parts.reopen().unwrap();
        assert_matches(&parts, &model);
        parts.compact().unwrap();
        assert_matches(&parts, &model);
    }

    #[test]
    fn payloads_round_trip(space in key_space_strategy(), payload in payload_strategy()) {
        let parts = make_log_store(enabled_faults()).unwrap();
        let key = parts.put_content(space, &payload).unwrap();
        prop_assert_eq!(&parts.get(space, &key).unwrap()[..], &payload[..]);
    }
}
