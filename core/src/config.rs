//! Engine configuration and the error boundary.

use thiserror::Error;

/// Failures that can occur at the init/teardown boundary.
///
/// In-band backpressure (a full tile, `can_send == 0`) is never an `Err`
/// here — it stays on the return-code protocol the push/pop/send surface
/// uses, so the hot path never allocates or unwinds. `EngineError` is
/// reserved for the genuinely exceptional cases: a malformed configuration,
/// an allocation request too large to address, or a transport failure.
#[derive(Error, Debug)]
pub enum EngineError {
    /// `buffer_items` or `item_bytes` was zero, or `peers` was zero.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(&'static str),
    /// The requested tile layout (`peers * buffer_items * item_bytes`)
    /// overflows `usize` and cannot be addressed by this transport.
    #[error("symmetric allocation size overflowed addressable space")]
    OutOfMemory,
    /// The underlying transport failed.
    #[error(transparent)]
    TransportFault(#[from] xchg_transport::TransportError),
}

/// Immutable engine configuration: buffer capacity and item size.
///
/// `P` (peer count) and `self` (this peer's id) come from the `Transport`
/// passed to `init`, not from this struct — identical `EngineConfig` values
/// are required on every peer, but the transport is what actually carries
/// the per-peer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Buffer capacity in items per (src, dst) pair.
    pub buffer_items: usize,
    /// Item size in bytes.
    pub item_bytes: usize,
}

impl EngineConfig {
    /// Validates and builds a configuration.
    pub fn new(buffer_items: usize, item_bytes: usize) -> Result<Self, EngineError> {
        if buffer_items == 0 {
            return Err(EngineError::InvalidConfig("buffer_items must be non-zero"));
        }
        if item_bytes == 0 {
            return Err(EngineError::InvalidConfig("item_bytes must be non-zero"));
        }
        Ok(EngineConfig { buffer_items, item_bytes })
    }

    /// Bytes occupied by one (src, dst) tile, i.e. `buffer_items * item_bytes`.
    pub fn tile_bytes(&self) -> usize {
        self.buffer_items * self.item_bytes
    }

    /// Bytes occupied by one peer's full row of tiles, i.e.
    /// `peers * buffer_items * item_bytes`; checked against `usize` overflow
    /// since an unreasonable `(peers, B, S)` triple cannot be addressed.
    pub fn row_bytes(&self, peers: usize) -> Result<usize, EngineError> {
        self.buffer_items
            .checked_mul(self.item_bytes)
            .and_then(|tile| tile.checked_mul(peers))
            .ok_or(EngineError::OutOfMemory)
    }
}
