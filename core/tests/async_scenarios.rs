//! End-to-end scenarios for the barrier-free engine.

use xchg::{AsyncEngine, Configuration, EngineConfig, Exchange};
use xchg_transport::initialize;

#[test]
fn self_loopback_async() {
    let guards = initialize(Configuration::Thread, move |transport| {
        let config = EngineConfig::new(8, 8).unwrap();
        let mut engine = AsyncEngine::init(transport, config).unwrap();
        let mut popped = Vec::new();
        let mut buf = [0u8; 8];
        for i in 0..100i64 {
            let bytes = i.to_le_bytes();
            loop {
                if engine.push(&bytes, 0) {
                    break;
                }
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
        popped
    })
    .unwrap();

    let popped = guards.join().unwrap().remove(0);
    let expected: Vec<(usize, i64)> = (0..100i64).map(|i| (0usize, i)).collect();
    assert_eq!(popped, expected);
}

/// Seven peers finish sending quickly; peer 0 keeps shipping a long run of
/// items specifically to peer 3. No peer should observe termination before
/// every item addressed to it has actually arrived.
#[test]
fn termination_race() {
    let peers = 8;

    let guards = initialize(Configuration::Process(peers), move |transport| {
        let config = EngineConfig::new(4, 8).unwrap();
        let mut engine = AsyncEngine::init(transport, config).unwrap();
        let self_id = engine.self_id();

        let ring_dst = (self_id + 1) % peers;
        let mut sends: Vec<(usize, i64)> = (0..3).map(|i| (ring_dst, 1000 * self_id as i64 + i)).collect();
        if self_id == 0 {
            sends.extend((0..50i64).map(|i| (3usize, 9000 + i)));
        }

        let mut popped: Vec<(usize, i64)> = Vec::new();
        let mut buf = [0u8; 8];
        for (dst, value) in &sends {
            let bytes = value.to_le_bytes();
            loop {
                if engine.push(&bytes, *dst) {
                    break;
                }
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
        (self_id, popped)
    })
    .unwrap();

    let results = guards.join().unwrap();

    let total_pushed = peers * 3 + 50;
    let total_popped: usize = results.iter().map(|(_, popped)| popped.len()).sum();
    assert_eq!(total_popped, total_pushed);

    let (_, popped3) = results.iter().find(|(id, _)| *id == 3).unwrap();
    let from_zero: Vec<i64> = popped3.iter().filter(|(src, _)| *src == 0).map(|(_, v)| *v).collect();
    let expected_from_zero: Vec<i64> = (0..50i64).map(|i| 9000 + i).collect();
    assert_eq!(from_zero, expected_from_zero);
}
