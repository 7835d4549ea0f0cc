//! The barrier-synchronous exchange engine.

use xchg_logging::{
    EngineKind, ExchangeEvent, ExchangeLogger, ExchangeSetup, PopEvent, ProceedEvent, PushEvent, SendEvent,
};
use xchg_transport::{SymmetricAtomics, SymmetricBytes, Transport};

use crate::config::{EngineConfig, EngineError};
use crate::exchange::Exchange;
use crate::tile::Tile;

/// Per-source bookkeeping for a receive tile: how many items the last
/// exchange delivered, and how many of those this peer has already popped.
#[derive(Debug, Clone, Copy, Default)]
struct RecvCursor {
    len: usize,
    pos: usize,
}

impl RecvCursor {
    fn is_empty(&self) -> bool {
        self.pos >= self.len
    }
}

/// What `unpop`/`unpull` rewind.
#[derive(Debug, Clone, Copy)]
struct LastPop {
    src: usize,
}

/// Barrier-synchronous all-to-all exchange: collective `push` / `exchange` /
/// `pop`, termination via a shared `wait_done` flag array.
pub struct BulkEngine<T: Transport> {
    transport: T,
    config: EngineConfig,
    peers: usize,

    send_tiles: Vec<Tile>,
    recv_region: SymmetricBytes,
    recv_counts: SymmetricAtomics,
    wait_done: SymmetricAtomics,

    recv_state: Vec<RecvCursor>,
    first_ne_rcv: usize,
    notify_done: bool,
    last_pop: Option<LastPop>,
    pull_scratch: Vec<u8>,

    logger: Option<ExchangeLogger>,
}

impl<T: Transport> BulkEngine<T> {
    /// Collective: allocates the send/receive tile rows and the `wait_done`
    /// array. `config` must be identical on every peer.
    pub fn init(transport: T, config: EngineConfig) -> Result<Self, EngineError> {
        let peers = transport.peer_count();
        if peers == 0 {
            return Err(EngineError::InvalidConfig("peer count must be non-zero"));
        }
        let row_bytes = config.row_bytes(peers)?;

        let recv_region = transport.alloc_bytes(row_bytes);
        let recv_counts = transport.alloc_atomics(peers);
        let wait_done = transport.alloc_atomics(peers);

        let send_tiles = (0..peers).map(|_| Tile::new(config.buffer_items, config.item_bytes)).collect();
        let recv_state = vec![RecvCursor::default(); peers];
        let pull_scratch = vec![0u8; config.item_bytes];

        Ok(BulkEngine {
            transport,
            config,
            peers,
            send_tiles,
            recv_region,
            recv_counts,
            wait_done,
            recv_state,
            first_ne_rcv: 0,
            notify_done: false,
            last_pop: None,
            pull_scratch,
            logger: None,
        })
    }

    /// Installs a logger; events already emitted before this call are lost.
    pub fn set_logger(&mut self, logger: ExchangeLogger) {
        self.logger = Some(logger);
    }

    /// Setup information suitable for a one-time log record.
    pub fn setup(&self) -> ExchangeSetup {
        ExchangeSetup {
            engine: EngineKind::Bulk,
            self_id: self.transport.self_id(),
            peers: self.peers,
            buffer_items: self.config.buffer_items,
            item_bytes: self.config.item_bytes,
        }
    }

    fn log(&self, event: ExchangeEvent) {
        if let Some(logger) = &self.logger {
            logger.log(event);
        }
    }

    /// Minimum headroom across every destination; callers can push this many
    /// items to *any* single destination without risking a rejected push.
    pub fn min_headroom(&self) -> usize {
        self.send_tiles.iter().map(Tile::headroom).min().unwrap_or(0)
    }

    /// Pops from a specific source only, ignoring every other receive tile.
    pub fn pop_thread(&mut self, item: &mut [u8], src: usize) -> bool {
        assert!(src < self.peers, "src out of range");
        if self.recv_state[src].is_empty() {
            return false;
        }
        self.read_item(src, self.recv_state[src].pos, item);
        self.recv_state[src].pos += 1;
        self.last_pop = Some(LastPop { src });
        true
    }

    /// Undoes the last `pop_thread` from `src`, if any was performed.
    pub fn unpop_thread(&mut self, src: usize) -> bool {
        match self.last_pop {
            Some(LastPop { src: last }) if last == src && self.recv_state[src].pos > 0 => {
                self.recv_state[src].pos -= 1;
                self.last_pop = None;
                true
            }
            _ => false,
        }
    }

    fn offset(&self, src: usize) -> usize {
        src * self.config.tile_bytes()
    }

    fn read_item(&self, src: usize, pos: usize, item: &mut [u8]) {
        let offset = self.offset(src) + pos * self.config.item_bytes;
        self.transport.get(&self.recv_region, self.transport.self_id(), offset, item);
    }

    /// Finds the lowest-indexed source at or after `first_ne_rcv` with an
    /// unread item, advancing `first_ne_rcv` past any tiles found empty.
    fn find_next_nonempty(&mut self) -> Option<usize> {
        while self.first_ne_rcv < self.peers && self.recv_state[self.first_ne_rcv].is_empty() {
            self.first_ne_rcv += 1;
        }
        (self.first_ne_rcv..self.peers).find(|&src| !self.recv_state[src].is_empty())
    }

    /// Ships every send tile to its destination and barriers. Every peer's
    /// send tiles are empty and every receive tile holds the newest batch
    /// destined to it once this returns.
    pub fn exchange(&mut self) {
        let self_id = self.transport.self_id();
        let mut order: Vec<usize> = (0..self.peers).collect();
        for i in (1..self.peers).rev() {
            let j = self.transport.rand_int64((i + 1) as i64) as usize;
            order.swap(i, j);
        }

        for &dst in &order {
            let count = self.send_tiles[dst].len();
            let offset = self.offset(self_id);
            self.transport.put(&self.recv_region, dst, offset, self.send_tiles[dst].staged());
            self.transport.atomic_store(&self.recv_counts, dst, self_id, count as i64);
            self.log(ExchangeEvent::Send(SendEvent { dst, count, islast: false }));
            self.send_tiles[dst].clear();
        }

        self.transport.barrier();

        for src in 0..self.peers {
            let count = self.transport.atomic_load(&self.recv_counts, self_id, src);
            self.recv_state[src] = RecvCursor { len: count as usize, pos: 0 };
        }
        self.first_ne_rcv = 0;
    }

    /// Collective teardown: waits for every peer to reach this call, then
    /// drops `self`, releasing the symmetric regions via RAII once every
    /// peer's handle is gone.
    pub fn clear(self) {
        self.transport.barrier();
    }
}

impl<T: Transport> Exchange for BulkEngine<T> {
    fn push(&mut self, item: &[u8], dst: usize) -> bool {
        assert!(dst < self.peers, "dst out of range");
        let accepted = self.send_tiles[dst].push(item);
        self.log(ExchangeEvent::Push(PushEvent { dst, accepted }));
        accepted
    }

    fn pop(&mut self, item: &mut [u8]) -> Option<usize> {
        let src = self.find_next_nonempty()?;
        self.read_item(src, self.recv_state[src].pos, item);
        self.recv_state[src].pos += 1;
        self.last_pop = Some(LastPop { src });
        self.log(ExchangeEvent::Pop(PopEvent { src: Some(src), popped: true }));
        Some(src)
    }

    fn unpop(&mut self) -> bool {
        match self.last_pop.take() {
            Some(LastPop { src }) => {
                self.recv_state[src].pos -= 1;
                self.first_ne_rcv = self.first_ne_rcv.min(src);
                true
            }
            None => false,
        }
    }

    fn pull(&mut self) -> Option<(usize, &[u8])> {
        let src = self.find_next_nonempty()?;
        let pos = self.recv_state[src].pos;
        let item_bytes = self.config.item_bytes;
        let offset = self.offset(src) + pos * item_bytes;
        self.transport.get(&self.recv_region, self.transport.self_id(), offset, &mut self.pull_scratch);
        self.recv_state[src].pos += 1;
        self.last_pop = Some(LastPop { src });
        Some((src, &self.pull_scratch[..]))
    }

    fn unpull(&mut self) -> bool {
        self.unpop()
    }

    fn proceed(&mut self, done_cond: bool) -> bool {
        let self_id = self.transport.self_id();
        if done_cond && !self.notify_done {
            for d in 0..self.peers {
                self.transport.atomic_store(&self.wait_done, d, self_id, 1);
            }
            self.notify_done = true;
        }

        let all_announced = (0..self.peers).all(|k| self.transport.atomic_load(&self.wait_done, self_id, k) == 1);
        let all_drained = self.recv_state.iter().all(RecvCursor::is_empty);

        let more_work = !(all_announced && all_drained);
        if more_work {
            self.exchange();
        }
        self.log(ExchangeEvent::Proceed(ProceedEvent { done_requested: done_cond, more_work }));
        more_work
    }

    fn reset(&mut self) {
        let self_id = self.transport.self_id();
        for tile in &mut self.send_tiles {
            tile.clear();
        }
        for k in 0..self.peers {
            self.transport.atomic_store(&self.wait_done, self_id, k, 0);
            self.transport.atomic_store(&self.recv_counts, self_id, k, 0);
        }
        for cursor in &mut self.recv_state {
            *cursor = RecvCursor::default();
        }
        self.first_ne_rcv = 0;
        self.notify_done = false;
        self.last_pop = None;
        self.transport.barrier();
    }

    fn peers(&self) -> usize {
        self.peers
    }

    fn self_id(&self) -> usize {
        self.transport.self_id()
    }
}
