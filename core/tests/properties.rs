//! Property tests for the round-trip and FIFO-ordering invariants.

use proptest::prelude::*;
use xchg::{AsyncEngine, BulkEngine, Configuration, EngineConfig, Exchange};
use xchg_transport::initialize;

proptest! {
    /// `pop` immediately followed by `unpop` returns the engine to the state
    /// prior to `pop`; popping again yields the same item from the same
    /// source.
    #[test]
    fn pop_unpop_roundtrip_is_identity(items in prop::collection::vec(any::<i64>(), 1..20)) {
        let guards = initialize(Configuration::Thread, move |transport| {
            let config = EngineConfig::new(32, 8).unwrap();
            let mut engine = BulkEngine::init(transport, config).unwrap();
            for value in &items {
                let bytes = value.to_le_bytes();
                assert!(engine.push(&bytes, 0));
            }
            while engine.proceed(true) {}

            let mut first_pass = [0u8; 8];
            let src = engine.pop(&mut first_pass);
            assert!(src.is_some());
            assert!(engine.unpop());
            let mut second_pass = [0u8; 8];
            let src_again = engine.pop(&mut second_pass);
            assert_eq!(src, src_again);
            assert_eq!(first_pass, second_pass);
        })
        .unwrap();
        guards.join().unwrap();
    }

    /// Same as `pop_unpop_roundtrip_is_identity`, but through `pull`/`unpull`.
    #[test]
    fn pull_unpull_roundtrip_is_identity(items in prop::collection::vec(any::<i64>(), 1..20)) {
        let guards = initialize(Configuration::Thread, move |transport| {
            let config = EngineConfig::new(32, 8).unwrap();
            let mut engine = BulkEngine::init(transport, config).unwrap();
            for value in &items {
                let bytes = value.to_le_bytes();
                assert!(engine.push(&bytes, 0));
            }
            while engine.proceed(true) {}

            let (src, first_pass) = engine.pull().unwrap();
            let first_pass = first_pass.to_vec();
            assert!(engine.unpull());
            let (src_again, second_pass) = engine.pull().unwrap();
            assert_eq!(src, src_again);
            assert_eq!(first_pass, second_pass);
        })
        .unwrap();
        guards.join().unwrap();
    }

    /// `pop`/`unpop` round-trip for the barrier-free engine.
    #[test]
    fn async_pop_unpop_roundtrip_is_identity(items in prop::collection::vec(any::<i64>(), 1..20)) {
        let guards = initialize(Configuration::Thread, move |transport| {
            let config = EngineConfig::new(32, 8).unwrap();
            let mut engine = AsyncEngine::init(transport, config).unwrap();
            for value in &items {
                let bytes = value.to_le_bytes();
                loop {
                    if engine.push(&bytes, 0) {
                        break;
                    }
                    engine.proceed(false);
                }
            }
            while engine.proceed(true) {}

            let mut first_pass = [0u8; 8];
            let src = engine.pop(&mut first_pass);
            assert!(src.is_some());
            assert!(engine.unpop());
            let mut second_pass = [0u8; 8];
            let src_again = engine.pop(&mut second_pass);
            assert_eq!(src, src_again);
            assert_eq!(first_pass, second_pass);
        })
        .unwrap();
        guards.join().unwrap();
    }

    /// `pull`/`unpull` round-trip for the barrier-free engine.
    #[test]
    fn async_pull_unpull_roundtrip_is_identity(items in prop::collection::vec(any::<i64>(), 1..20)) {
        let guards = initialize(Configuration::Thread, move |transport| {
            let config = EngineConfig::new(32, 8).unwrap();
            let mut engine = AsyncEngine::init(transport, config).unwrap();
            for value in &items {
                let bytes = value.to_le_bytes();
                loop {
                    if engine.push(&bytes, 0) {
                        break;
                    }
                    engine.proceed(false);
                }
            }
            while engine.proceed(true) {}

            let (src, first_pass) = engine.pull().unwrap();
            let first_pass = first_pass.to_vec();
            assert!(engine.unpull());
            let (src_again, second_pass) = engine.pull().unwrap();
            assert_eq!(src, src_again);
            assert_eq!(first_pass, second_pass);
        })
        .unwrap();
        guards.join().unwrap();
    }

    /// For every ordered (src, dst) pair, the popped sequence equals the
    /// pushed sequence, regardless of how much backpressure the random
    /// workload triggers along the way.
    #[test]
    fn fifo_per_source_ordering(batches in prop::collection::vec(prop::collection::vec(any::<i64>(), 0..8), 3)) {
        let peers = batches.len();

        let guards = initialize(Configuration::Process(peers), move |transport| {
            let config = EngineConfig::new(4, 8).unwrap();
            let mut engine = BulkEngine::init(transport, config).unwrap();
            let self_id = engine.self_id();
            let my_items = batches[self_id].clone();
            let dst = (self_id + 1) % peers;

            let mut popped = Vec::new();
            let mut buf = [0u8; 8];
            for value in &my_items {
                let bytes = value.to_le_bytes();
                loop {
                    if engine.push(&bytes, dst) {
                        break;
                    }
                    engine.proceed(false);
                    while let Some(src) = engine.pop(&mut buf) {
                        popped.push((src, i64::from_le_bytes(buf)));
                    }
                }
            }
            while engine.proceed(true) {
                while let Some(src) = engine.pop(&mut buf) {
                    popped.push((src, i64::from_le_bytes(buf)));
                }
            }
            (self_id, popped, batches.clone())
        })
        .unwrap();

        for (self_id, popped, batches) in guards.join().unwrap() {
            let expected_src = (self_id + peers - 1) % peers;
            let expected = batches[expected_src].clone();
            let actual: Vec<i64> =
                popped.into_iter().filter(|(src, _)| *src == expected_src).map(|(_, v)| v).collect();
            assert_eq!(actual, expected);
        }
    }

    /// Same FIFO-per-source property as `fifo_per_source_ordering`, but
    /// against the barrier-free engine under a small ring (`buffer_items`
    /// kept tiny relative to batch sizes so credit is scarce and tiles queue
    /// up). `debug_assert!`s in `AsyncEngine::retire`/`drain_new_messages`
    /// turn a violated credit or ring-occupancy invariant into a test
    /// failure rather than a silently corrupted result.
    #[test]
    fn async_fifo_per_source_ordering_under_load(
        batches in prop::collection::vec(prop::collection::vec(any::<i64>(), 0..16), 4),
    ) {
        let peers = batches.len();

        let guards = initialize(Configuration::Process(peers), move |transport| {
            let config = EngineConfig::new(2, 8).unwrap();
            let mut engine = AsyncEngine::init(transport, config).unwrap();
            let self_id = engine.self_id();
            let my_items = batches[self_id].clone();
            let dst = (self_id + 1) % peers;

            let mut popped = Vec::new();
            let mut buf = [0u8; 8];
            for value in &my_items {
                let bytes = value.to_le_bytes();
                loop {
                    if engine.push(&bytes, dst) {
                        break;
                    }
                    engine.proceed(false);
                    while let Some(src) = engine.pop(&mut buf) {
                        popped.push((src, i64::from_le_bytes(buf)));
                    }
                }
            }
            while engine.proceed(true) {
                while let Some(src) = engine.pop(&mut buf) {
                    popped.push((src, i64::from_le_bytes(buf)));
                }
            }
            while let Some(src) = engine.pop(&mut buf) {
                popped.push((src, i64::from_le_bytes(buf)));
            }
            (self_id, popped, batches.clone())
        })
        .unwrap();

        for (self_id, popped, batches) in guards.join().unwrap() {
            let expected_src = (self_id + peers - 1) % peers;
            let expected = batches[expected_src].clone();
            let actual: Vec<i64> =
                popped.into_iter().filter(|(src, _)| *src == expected_src).map(|(_, v)| v).collect();
            assert_eq!(actual, expected);
        }
    }
}
