//! Buffered all-to-all message exchange for bulk-synchronous and
//! asynchronous parallel programs running across a fixed set of `P` peers.
//!
//! Applications push small fixed-size items addressed to remote peers; the
//! engine aggregates them into per-destination tiles, ships whole tiles over
//! a one-sided [`Transport`], delivers them on the destination side as
//! consumable item streams, and runs a termination protocol so every peer
//! can agree the computation is finished.
//!
//! Two engines share the [`Exchange`] push/pop surface:
//!
//! - [`BulkEngine`] — barrier-synchronous: collective `push`, then collective
//!   `exchange`, then collective `pop`. Termination via a shared flag array.
//! - [`AsyncEngine`] — barrier-free: each peer ships full tiles to any peer
//!   at any time over one-sided puts and a small lock-free credit/ring
//!   protocol. Termination via `islast` messages and a done counter.
//!
//! Neither engine interprets item contents; items are opaque `&[u8]` records
//! of a fixed size `S` chosen at `init`. Ordering across items from the same
//! source peer is FIFO; there is no ordering guarantee across sources.

mod async_engine;
mod bulk;
mod config;
mod exchange;
mod tile;

pub use async_engine::AsyncEngine;
pub use bulk::BulkEngine;
pub use config::{EngineConfig, EngineError};
pub use exchange::Exchange;

pub use xchg_logging::{
    EngineKind, ExchangeEvent, ExchangeLogger, ExchangeSetup, Logger, PopEvent, ProceedEvent, PushEvent,
    SendEvent, StateEvent, TileState,
};
pub use xchg_transport::{initialize, initialize_from, Configuration, Transport, TransportError, WorkerGuards};
