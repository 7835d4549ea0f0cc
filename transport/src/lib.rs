//! A symmetric shared-memory transport for the exchange engines in `xchg`.
//!
//! This crate provides the one-sided put/get, remote-atomic, barrier, and
//! reduction primitives the `xchg` engines are written against, plus one
//! concrete in-process implementation (one OS thread per peer) suitable for
//! tests and single-machine use. A networked (TCP / RDMA-library) back end is
//! out of scope here; the trait is written so one could be added without
//! touching the engines.

mod initialize;
mod process;

pub use initialize::{initialize, initialize_from, Configuration, WorkerGuards};
pub use process::{ProcessTransport, SymmetricAtomics, SymmetricBytes};

use thiserror::Error;

/// Failures at the transport boundary.
///
/// In-band backpressure (a full tile, a cleared-credit bit) is not a
/// `TransportError` — it is the engines' own return-code protocol. This enum
/// is reserved for failures of the transport itself.
#[derive(Error, Debug)]
pub enum TransportError {
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    SpawnFailed(std::io::Error),
    /// A worker thread panicked instead of returning normally.
    #[error("worker thread panicked")]
    WorkerPanicked,
    /// The requested peer count could not be satisfied by this transport.
    #[error("invalid peer count: {0}")]
    InvalidPeerCount(usize),
}

/// One-sided shared-memory operations, a barrier, reductions, and a per-peer
/// PRNG stream, addressed symmetrically: every peer allocates the same shape
/// of region and addresses every other peer's partition by its rank.
///
/// Implementations are only ever driven by the one peer thread that owns
/// them; concurrent remote access comes from *other* peers' instances calling
/// `put`/`get`/`atomic_*` against a shared allocation, never from multiple
/// threads sharing one `Transport` value.
pub trait Transport {
    /// Total number of peers in this run.
    fn peer_count(&self) -> usize;

    /// This peer's id in `[0, peer_count())`.
    fn self_id(&self) -> usize;

    /// Collectively allocates a symmetric byte region with `bytes_per_peer`
    /// bytes of local partition on every peer. Must be called in the same
    /// relative order, with the same size, on every peer.
    fn alloc_bytes(&self, bytes_per_peer: usize) -> SymmetricBytes;

    /// Collectively allocates a symmetric region of 64-bit atomics with
    /// `words_per_peer` words of local partition on every peer. Same
    /// collective-ordering requirement as [`Transport::alloc_bytes`].
    fn alloc_atomics(&self, words_per_peer: usize) -> SymmetricAtomics;

    /// One-sided write of `local` into `dst`'s partition of `region`, starting
    /// at `remote_offset` bytes.
    fn put(&self, region: &SymmetricBytes, dst: usize, remote_offset: usize, local: &[u8]);

    /// One-sided read of `local.len()` bytes from `src`'s partition of
    /// `region`, starting at `remote_offset` bytes, into `local`.
    fn get(&self, region: &SymmetricBytes, src: usize, remote_offset: usize, local: &mut [u8]);

    /// Atomically adds `delta` to the 64-bit word at `remote_offset` (in
    /// words) within `dst`'s partition of `region`, returning the prior
    /// value.
    fn atomic_fetch_add(
        &self,
        region: &SymmetricAtomics,
        dst: usize,
        remote_offset: usize,
        delta: i64,
    ) -> i64;

    /// Atomically compares-and-swaps the 64-bit word at `remote_offset` (in
    /// words) within `dst`'s partition of `region`, returning the prior
    /// value regardless of whether the swap took effect.
    fn atomic_cas(
        &self,
        region: &SymmetricAtomics,
        dst: usize,
        remote_offset: usize,
        expected: i64,
        new: i64,
    ) -> i64;

    /// Atomically loads the 64-bit word at `remote_offset` (in words) within
    /// `dst`'s partition of `region`.
    fn atomic_load(&self, region: &SymmetricAtomics, dst: usize, remote_offset: usize) -> i64;

    /// Atomically stores `value` into the 64-bit word at `remote_offset` (in
    /// words) within `dst`'s partition of `region`.
    fn atomic_store(&self, region: &SymmetricAtomics, dst: usize, remote_offset: usize, value: i64);

    /// Collective fence: returns only once every peer has called `barrier`.
    fn barrier(&self);

    /// Collective sum-reduction of `value` across all peers; every peer gets
    /// the total.
    fn reduce_add(&self, value: i64) -> i64;

    /// Collective exclusive prefix-sum of `value`; peer `k` gets the sum of
    /// `value` over peers `[0, k)`.
    fn prefix_add(&self, value: i64) -> i64;

    /// Collective max-reduction of `value` across all peers; every peer gets
    /// the maximum.
    fn reduce_max(&self, value: i64) -> i64;

    /// Draws the next value from this peer's own PRNG stream, uniform in
    /// `[0, upper)`. Not synchronized with other peers' streams in any way.
    fn rand_int64(&self, upper: i64) -> i64;
}
