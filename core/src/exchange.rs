//! The operation surface shared by both engine variants.

/// Operations common to [`BulkEngine`](crate::BulkEngine) and
/// [`AsyncEngine`](crate::AsyncEngine).
///
/// `exchange` (bulk-only) and `send` (async-only) are deliberately *not*
/// part of this trait: the two engines agree on this surface modulo
/// `exchange` being a bulk-only operation, so each keeps its own extra
/// inherent method instead of forcing a shared no-op on the other.
pub trait Exchange {
    /// Stages `item` (exactly `item_bytes` long) for delivery to `dst`.
    /// Returns `false` (without blocking) if the send tile to `dst` is full;
    /// the caller must drain inbound data and/or advance the engine before
    /// retrying.
    fn push(&mut self, item: &[u8], dst: usize) -> bool;

    /// Copies the next unread item into `item` (exactly `item_bytes` long),
    /// returning its source peer, or `None` if every receive tile is
    /// currently drained.
    fn pop(&mut self, item: &mut [u8]) -> Option<usize>;

    /// Undoes the most recent `pop` or `pull`, one level deep.
    fn unpop(&mut self) -> bool;

    /// As `pop`, but returns a reference into the engine's own scratch copy
    /// of the item instead of copying into a caller-supplied buffer.
    fn pull(&mut self) -> Option<(usize, &[u8])>;

    /// Undoes the most recent `pull` (or `pop`), one level deep.
    fn unpull(&mut self) -> bool;

    /// Advances the termination protocol. `done` (`done_cond` for bulk,
    /// `done_pushing` for async) should be `true` once this peer has no more
    /// items to push. Returns `true` while further work may still be
    /// possible anywhere in the system; `false` once every peer has
    /// announced done and every receive tile is drained.
    fn proceed(&mut self, done: bool) -> bool;

    /// Returns the engine to its post-`init` state without releasing
    /// allocations: cursors, termination flags, and (for async) credit and
    /// ring state are zeroed.
    fn reset(&mut self);

    /// Total peer count `P`.
    fn peers(&self) -> usize;

    /// This peer's id in `[0, peers())`.
    fn self_id(&self) -> usize;
}
