//! Event and setup types for exchange-engine logging.
//!
//! This crate carries no formatting or I/O: it only describes *what happened*
//! inside a [`BulkEngine`](https://docs.rs/xchg/*/xchg/struct.BulkEngine.html) or
//! an async exchange engine, as plain `Serialize`/`Deserialize` data. A host
//! application wires a [`Logger`] to whatever sink it likes (stdout, a file, an
//! in-memory collector for tests); an engine handed no logger pays nothing.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Identifies which engine variant produced a stream of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    /// The barrier-synchronous engine.
    Bulk,
    /// The barrier-free engine.
    Async,
}

/// Identifying information about an engine instance, logged once at `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeSetup {
    /// Which engine variant this is.
    pub engine: EngineKind,
    /// This peer's id.
    pub self_id: usize,
    /// Total peer count.
    pub peers: usize,
    /// Buffer capacity in items per (src, dst) pair.
    pub buffer_items: usize,
    /// Item size in bytes.
    pub item_bytes: usize,
}

/// Things that happen over the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeEvent {
    /// A push attempt, successful or not.
    Push(PushEvent),
    /// A tile shipment (bulk exchange copy, or async `send`).
    Send(SendEvent),
    /// A pop, successful or not.
    Pop(PopEvent),
    /// A `proceed` call and its outcome.
    Proceed(ProceedEvent),
    /// A (src, dst) tile state transition, mostly useful for the async engine.
    State(StateEvent),
}

/// An attempted push into the send tile addressed to `dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PushEvent {
    /// Destination peer.
    pub dst: usize,
    /// Whether the item was accepted (tile had room) or rejected (backpressure).
    pub accepted: bool,
}

/// A tile shipment from `self` to `dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SendEvent {
    /// Destination peer.
    pub dst: usize,
    /// Number of items shipped.
    pub count: usize,
    /// True if this shipment carries the `islast` marker (async only).
    pub islast: bool,
}

/// An attempted pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PopEvent {
    /// Source peer, if an item was popped.
    pub src: Option<usize>,
    /// Whether an item was returned.
    pub popped: bool,
}

/// A `proceed` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProceedEvent {
    /// The `done_cond` / `done_pushing` flag passed in.
    pub done_requested: bool,
    /// What `proceed` returned: `true` to keep calling, `false` once terminated.
    pub more_work: bool,
}

/// A (src, dst) tile moving between credit states, async engine only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateEvent {
    /// The peer on the other end of the tile.
    pub peer: usize,
    /// True if this event concerns a send-side tile, false for receive-side.
    pub is_send_side: bool,
    /// New state, as a small enum logged by discriminant for portability.
    pub state: TileState,
}

/// The states a single (src, dst) tile passes through, from the receiver's
/// point of view (see the async engine's state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileState {
    /// No shipment outstanding.
    Idle,
    /// A shipment has arrived and is queued behind an older one.
    Queued,
    /// A shipment is the current tile being drained.
    Draining,
}

/// A cheaply cloneable handle that forwards events to an installed action.
///
/// A plain `Fn(T)` sink with no internal buffering. Buffering and batching,
/// if wanted, are the sink's problem, not this type's.
pub struct Logger<T> {
    action: Rc<dyn Fn(T)>,
}

impl<T> Logger<T> {
    /// Builds a logger that forwards every event to `action`.
    pub fn new(action: impl Fn(T) + 'static) -> Self {
        Logger { action: Rc::new(action) }
    }

    /// Records an event.
    pub fn log(&self, event: T) {
        (self.action)(event)
    }
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger { action: self.action.clone() }
    }
}

/// The logger type engines accept for [`ExchangeEvent`] streams.
pub type ExchangeLogger = Logger<ExchangeEvent>;
