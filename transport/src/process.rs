//! The in-process reference transport: one OS thread per peer, symmetric
//! regions as `Arc`-shared rows guarded per-partition, atomics as real
//! `AtomicI64` words, and `std::sync::Barrier` for the collective fence.

use std::any::Any;
use std::cell::RefCell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::Transport;

/// A symmetric byte region: one `Vec<u8>` partition per peer.
///
/// Each partition is guarded by its own mutex, standing in for the
/// network-level serialization a real one-sided put/get would have; puts and
/// gets against *different* peers' partitions never contend with each other.
#[derive(Clone)]
pub struct SymmetricBytes {
    rows: Arc<Vec<Mutex<Vec<u8>>>>,
}

/// A symmetric region of 64-bit atomics: one `Vec<AtomicI64>` partition per
/// peer.
#[derive(Clone)]
pub struct SymmetricAtomics {
    rows: Arc<Vec<Vec<AtomicI64>>>,
}

/// State shared by every peer's [`ProcessTransport`] in one run.
struct Shared {
    peers: usize,
    barrier: Barrier,
    /// Scratch staging for `reduce_add`/`prefix_add`/`reduce_max`: one slot
    /// per peer, written by that peer, read by everyone after a barrier.
    scratch: Vec<AtomicI64>,
    /// A single rendezvous slot used to hand out freshly allocated symmetric
    /// regions. Collective allocations must happen in the same relative
    /// order on every peer, the same way any other collective call must.
    rendezvous: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

/// One peer's handle onto the in-process transport.
pub struct ProcessTransport {
    shared: Arc<Shared>,
    self_id: usize,
    rng: RefCell<SmallRng>,
}

impl ProcessTransport {
    /// Builds `peers` handles sharing one `Shared` instance, one per peer id.
    pub(crate) fn new_vector(peers: usize) -> Vec<ProcessTransport> {
        let shared = Arc::new(Shared {
            peers,
            barrier: Barrier::new(peers),
            scratch: (0..peers).map(|_| AtomicI64::new(0)).collect(),
            rendezvous: Mutex::new(None),
        });
        (0..peers)
            .map(|self_id| ProcessTransport {
                shared: shared.clone(),
                self_id,
                rng: RefCell::new(SmallRng::seed_from_u64(0x5eed_c0ff ^ self_id as u64)),
            })
            .collect()
    }

    /// Collectively builds one shared `T`, visible identically to every peer.
    ///
    /// Peer 0 constructs the value between the two barriers; every peer
    /// (including peer 0) reads it back out after the second barrier, so the
    /// construction is visible before anyone observes it.
    fn rendezvous<T: Send + Sync + 'static>(&self, make: impl FnOnce() -> T) -> Arc<T> {
        self.shared.barrier.wait();
        if self.self_id == 0 {
            let mut slot = self.shared.rendezvous.lock().unwrap();
            *slot = Some(Arc::new(make()) as Arc<dyn Any + Send + Sync>);
        }
        self.shared.barrier.wait();
        let slot = self.shared.rendezvous.lock().unwrap();
        slot.as_ref()
            .expect("rendezvous slot empty after barrier")
            .clone()
            .downcast::<T>()
            .expect("rendezvous type mismatch: allocations ran out of order across peers")
    }
}

impl Transport for ProcessTransport {
    fn peer_count(&self) -> usize {
        self.shared.peers
    }

    fn self_id(&self) -> usize {
        self.self_id
    }

    fn alloc_bytes(&self, bytes_per_peer: usize) -> SymmetricBytes {
        let peers = self.shared.peers;
        let rows = self.rendezvous(move || {
            (0..peers)
                .map(|_| Mutex::new(vec![0u8; bytes_per_peer]))
                .collect::<Vec<_>>()
        });
        SymmetricBytes { rows }
    }

    fn alloc_atomics(&self, words_per_peer: usize) -> SymmetricAtomics {
        let peers = self.shared.peers;
        let rows = self.rendezvous(move || {
            (0..peers)
                .map(|_| (0..words_per_peer).map(|_| AtomicI64::new(0)).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        });
        SymmetricAtomics { rows }
    }

    fn put(&self, region: &SymmetricBytes, dst: usize, remote_offset: usize, local: &[u8]) {
        let mut partition = region.rows[dst].lock().unwrap();
        partition[remote_offset..remote_offset + local.len()].copy_from_slice(local);
    }

    fn get(&self, region: &SymmetricBytes, src: usize, remote_offset: usize, local: &mut [u8]) {
        let partition = region.rows[src].lock().unwrap();
        local.copy_from_slice(&partition[remote_offset..remote_offset + local.len()]);
    }

    fn atomic_fetch_add(
        &self,
        region: &SymmetricAtomics,
        dst: usize,
        remote_offset: usize,
        delta: i64,
    ) -> i64 {
        region.rows[dst][remote_offset].fetch_add(delta, Ordering::SeqCst)
    }

    fn atomic_cas(
        &self,
        region: &SymmetricAtomics,
        dst: usize,
        remote_offset: usize,
        expected: i64,
        new: i64,
    ) -> i64 {
        match region.rows[dst][remote_offset].compare_exchange(
            expected,
            new,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(prior) => prior,
            Err(prior) => prior,
        }
    }

    fn atomic_load(&self, region: &SymmetricAtomics, dst: usize, remote_offset: usize) -> i64 {
        region.rows[dst][remote_offset].load(Ordering::SeqCst)
    }

    fn atomic_store(&self, region: &SymmetricAtomics, dst: usize, remote_offset: usize, value: i64) {
        region.rows[dst][remote_offset].store(value, Ordering::SeqCst);
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn reduce_add(&self, value: i64) -> i64 {
        self.shared.scratch[self.self_id].store(value, Ordering::SeqCst);
        self.shared.barrier.wait();
        let total = self.shared.scratch.iter().map(|s| s.load(Ordering::SeqCst)).sum();
        self.shared.barrier.wait();
        total
    }

    fn prefix_add(&self, value: i64) -> i64 {
        self.shared.scratch[self.self_id].store(value, Ordering::SeqCst);
        self.shared.barrier.wait();
        let total = self.shared.scratch[..self.self_id]
            .iter()
            .map(|s| s.load(Ordering::SeqCst))
            .sum();
        self.shared.barrier.wait();
        total
    }

    fn reduce_max(&self, value: i64) -> i64 {
        self.shared.scratch[self.self_id].store(value, Ordering::SeqCst);
        self.shared.barrier.wait();
        let max = self
            .shared
            .scratch
            .iter()
            .map(|s| s.load(Ordering::SeqCst))
            .max()
            .unwrap_or(0);
        self.shared.barrier.wait();
        max
    }

    fn rand_int64(&self, upper: i64) -> i64 {
        debug_assert!(upper > 0, "rand_int64 upper bound must be positive");
        self.rng.borrow_mut().gen_range(0..upper)
    }
}
