//! The barrier-free exchange engine: one-sided shipments, a single credit
//! bit per (src, dst) pair, and a per-peer ring of ship announcements.

use std::collections::VecDeque;

use xchg_logging::{
    EngineKind, ExchangeEvent, ExchangeLogger, ExchangeSetup, PopEvent, ProceedEvent, PushEvent, SendEvent,
    StateEvent, TileState,
};
use xchg_transport::{SymmetricAtomics, SymmetricBytes, Transport};

use crate::config::{EngineConfig, EngineError};
use crate::exchange::Exchange;
use crate::tile::Tile;

/// Bits [63:32] carry the item count, bits [31:1] the sending peer, bit [0]
/// the `islast` marker.
const COUNT_SHIFT: u32 = 32;
const SENDER_SHIFT: u32 = 1;
const SENDER_MASK: i64 = 0x7fff_ffff;
const ISLAST_MASK: i64 = 1;

fn pack_message(count: usize, sender: usize, islast: bool) -> i64 {
    ((count as i64) << COUNT_SHIFT) | ((sender as i64) << SENDER_SHIFT) | (islast as i64)
}

fn unpack_message(word: i64) -> (usize, usize, bool) {
    // Shift the bit pattern as unsigned so a `count` occupying the top bit
    // of its field doesn't sign-extend back in.
    let bits = word as u64;
    let count = (bits >> COUNT_SHIFT) as usize;
    let sender = ((bits >> SENDER_SHIFT) & SENDER_MASK as u64) as usize;
    let islast = (bits & ISLAST_MASK as u64) != 0;
    (count, sender, islast)
}

/// Smallest power of two at least `2 * peers`, per the ring-sizing rule: each
/// source has at most one in-flight tile (so at most `peers` outstanding
/// messages), with a spare factor of two.
fn ring_size_for(peers: usize) -> usize {
    let want = peers.saturating_mul(2).max(1);
    want.next_power_of_two()
}

/// A ship-announcement this peer has observed but not yet fully drained.
#[derive(Debug, Clone, Copy)]
struct PendingTile {
    src: usize,
    count: usize,
}

/// The inbound tile currently being drained by `pop`/`pull`.
#[derive(Debug, Clone, Copy)]
struct ActiveTile {
    src: usize,
    count: usize,
    pos: usize,
}

/// What `unpop`/`unpull` rewind, one level deep.
#[derive(Debug, Clone)]
enum LastPop {
    /// The item came straight out of the currently active inbound tile: the
    /// source, the tile's full count (needed to reconstruct an exhausted
    /// tile), and whether that pop retired the tile.
    Active { src: usize, count: usize, exhausted: bool },
    /// The item came out of the backlog (see [`AsyncEngine::backlog`]);
    /// undoing this just pushes it back onto the front of the backlog.
    Backlog { src: usize, bytes: Vec<u8> },
}

/// Barrier-free exchange: `push`/`send` ship whole tiles as soon as the
/// receiver has credit, `pop`/`pull` drain them in arrival order, and
/// `proceed` drives the `islast`/`num_done_sending` termination protocol.
pub struct AsyncEngine<T: Transport> {
    transport: T,
    config: EngineConfig,
    peers: usize,
    ring_mask: usize,

    send_tiles: Vec<Tile>,
    recv_region: SymmetricBytes,
    can_send: SymmetricAtomics,
    msg_queue: SymmetricAtomics,
    num_msgs: SymmetricAtomics,

    num_popped: usize,
    active_buffer_queue: VecDeque<PendingTile>,
    current_active: Option<ActiveTile>,
    num_done_sending: usize,
    all_done: bool,
    announced_done: bool,
    last_pop: Option<LastPop>,
    pull_scratch: Vec<u8>,
    /// Items drained internally (by `proceed`'s force-send wait loop) ahead
    /// of the application actually asking for them. `pop`/`pull` serve this
    /// queue first, FIFO, before touching `current_active`.
    backlog: VecDeque<(usize, Vec<u8>)>,

    logger: Option<ExchangeLogger>,
}

impl<T: Transport> AsyncEngine<T> {
    /// Collective: allocates the receive tile row, `can_send` flags, and the
    /// message ring. `config` must be identical on every peer.
    pub fn init(transport: T, config: EngineConfig) -> Result<Self, EngineError> {
        let peers = transport.peer_count();
        if peers == 0 {
            return Err(EngineError::InvalidConfig("peer count must be non-zero"));
        }
        let row_bytes = config.row_bytes(peers)?;
        let ring_size = ring_size_for(peers);

        let recv_region = transport.alloc_bytes(row_bytes);
        let can_send = transport.alloc_atomics(peers);
        let msg_queue = transport.alloc_atomics(ring_size);
        let num_msgs = transport.alloc_atomics(1);

        let send_tiles = (0..peers).map(|_| Tile::new(config.buffer_items, config.item_bytes)).collect();
        let pull_scratch = vec![0u8; config.item_bytes];

        let self_id = transport.self_id();
        for d in 0..peers {
            transport.atomic_store(&can_send, self_id, d, 1);
        }

        Ok(AsyncEngine {
            transport,
            config,
            peers,
            ring_mask: ring_size - 1,
            send_tiles,
            recv_region,
            can_send,
            msg_queue,
            num_msgs,
            num_popped: 0,
            active_buffer_queue: VecDeque::new(),
            current_active: None,
            num_done_sending: 0,
            all_done: false,
            announced_done: false,
            last_pop: None,
            pull_scratch,
            backlog: VecDeque::new(),
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
            engine: EngineKind::Async,
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

    fn offset(&self, src: usize) -> usize {
        src * self.config.tile_bytes()
    }

    /// Attempts to ship the tile staged for `dst`, atomically claiming a
    /// ring slot on `dst` to announce it. Returns `false` without shipping
    /// anything if `dst` has not yet returned credit for the previous tile.
    pub fn send(&mut self, dst: usize, islast: bool) -> bool {
        assert!(dst < self.peers, "dst out of range");
        let self_id = self.transport.self_id();
        if self.transport.atomic_load(&self.can_send, self_id, dst) == 0 {
            return false;
        }

        let count = self.send_tiles[dst].len();
        let offset = self.offset(self_id);
        self.transport.put(&self.recv_region, dst, offset, self.send_tiles[dst].staged());

        self.transport.atomic_store(&self.can_send, self_id, dst, 0);

        let prior = self.transport.atomic_fetch_add(&self.num_msgs, dst, 0, 1);
        let slot = (prior as usize) & self.ring_mask;
        let word = pack_message(count, self_id, islast);
        self.transport.atomic_store(&self.msg_queue, dst, slot, word);

        self.send_tiles[dst].clear();
        self.log(ExchangeEvent::Send(SendEvent { dst, count, islast }));
        self.log(ExchangeEvent::State(StateEvent { peer: dst, is_send_side: true, state: TileState::Idle }));
        true
    }

    /// Observes newly arrived ship announcements on this peer's ring and
    /// appends them to `active_buffer_queue`, tallying `islast` markers.
    fn drain_new_messages(&mut self) {
        let self_id = self.transport.self_id();
        let available = self.transport.atomic_load(&self.num_msgs, self_id, 0) as usize;
        while self.num_popped < available {
            let slot = self.num_popped & self.ring_mask;
            let word = self.transport.atomic_load(&self.msg_queue, self_id, slot);
            let (count, sender, islast) = unpack_message(word);
            if islast {
                self.num_done_sending += 1;
                if self.num_done_sending == self.peers {
                    self.all_done = true;
                }
            }
            self.active_buffer_queue.push_back(PendingTile { src: sender, count });
            self.log(ExchangeEvent::State(StateEvent {
                peer: sender,
                is_send_side: false,
                state: TileState::Queued,
            }));
            self.num_popped += 1;
            // At most one in-flight tile per source can be queued ahead of
            // being drained: the ring never holds more outstanding messages
            // than credit allows.
            debug_assert!(available - self.num_popped <= self.ring_mask + 1);
        }
    }

    /// Ensures `current_active` holds a non-empty tile when one is
    /// available, pulling fresh announcements and skipping zero-item
    /// (`islast`-only) shipments, which retire immediately.
    fn activate(&mut self) {
        if self.current_active.is_some() {
            return;
        }
        self.drain_new_messages();
        while let Some(pending) = self.active_buffer_queue.pop_front() {
            if pending.count == 0 {
                self.retire(pending.src);
                continue;
            }
            self.current_active = Some(ActiveTile { src: pending.src, count: pending.count, pos: 0 });
            self.log(ExchangeEvent::State(StateEvent {
                peer: pending.src,
                is_send_side: false,
                state: TileState::Draining,
            }));
            return;
        }
    }

    /// Returns credit to `src`, marking its tile IDLE again on this peer.
    fn retire(&mut self, src: usize) {
        let self_id = self.transport.self_id();
        // A tile can only be retired once per shipment: credit must have
        // been outstanding (0) before we return it.
        debug_assert_eq!(self.transport.atomic_load(&self.can_send, src, self_id), 0);
        self.transport.atomic_store(&self.can_send, src, self_id, 1);
        self.log(ExchangeEvent::State(StateEvent { peer: src, is_send_side: false, state: TileState::Idle }));
    }

    /// Reads the next item out of `current_active`, advancing its cursor and
    /// retiring the tile on exhaustion. Shared by the public pop path and the
    /// internal backlog drain; does not touch `last_pop` or `self.backlog`.
    fn take_active_item(&mut self, item: &mut [u8]) -> Option<(usize, usize, bool)> {
        self.activate();
        let active = self.current_active.as_mut()?;
        let src = active.src;
        let count = active.count;
        let pos = active.pos;
        let self_id = self.transport.self_id();
        let offset = src * self.config.tile_bytes() + pos * self.config.item_bytes;
        self.transport.get(&self.recv_region, self_id, offset, item);
        active.pos += 1;
        let exhausted = active.pos == count;
        if exhausted {
            self.current_active = None;
            self.retire(src);
        }
        Some((src, count, exhausted))
    }

    fn pop_into(&mut self, item: &mut [u8]) -> Option<usize> {
        if let Some((src, bytes)) = self.backlog.pop_front() {
            item.copy_from_slice(&bytes);
            self.last_pop = Some(LastPop::Backlog { src, bytes });
            self.log(ExchangeEvent::Pop(PopEvent { src: Some(src), popped: true }));
            return Some(src);
        }
        let (src, count, exhausted) = self.take_active_item(item)?;
        self.last_pop = Some(LastPop::Active { src, count, exhausted });
        self.log(ExchangeEvent::Pop(PopEvent { src: Some(src), popped: true }));
        Some(src)
    }

    /// Drains one item out of `current_active`, if any, into the backlog
    /// instead of handing it to the caller. Used only by `proceed`'s
    /// force-send wait loop so no application data is ever discarded while
    /// this peer waits for send credit.
    fn drain_into_backlog(&mut self) -> bool {
        let mut scratch = vec![0u8; self.config.item_bytes];
        match self.take_active_item(&mut scratch) {
            Some((src, _, _)) => {
                self.backlog.push_back((src, scratch));
                true
            }
            None => false,
        }
    }

    fn undo_last_pop(&mut self) -> bool {
        match self.last_pop.take() {
            Some(LastPop::Active { src, count, exhausted }) => {
                if exhausted {
                    let self_id = self.transport.self_id();
                    // Undo the credit write-back: the tile isn't actually
                    // drained yet.
                    self.transport.atomic_store(&self.can_send, src, self_id, 0);
                    self.current_active = Some(ActiveTile { src, count, pos: count - 1 });
                } else if let Some(active) = self.current_active.as_mut() {
                    active.pos -= 1;
                }
                true
            }
            Some(LastPop::Backlog { src, bytes }) => {
                self.backlog.push_front((src, bytes));
                true
            }
            None => false,
        }
    }

    /// Collective teardown: waits for every peer to reach this call, then
    /// drops `self`, releasing the symmetric regions via RAII once every
    /// peer's handle is gone.
    pub fn clear(self) {
        self.transport.barrier();
    }
}

impl<T: Transport> Exchange for AsyncEngine<T> {
    fn push(&mut self, item: &[u8], dst: usize) -> bool {
        assert!(dst < self.peers, "dst out of range");
        if self.send_tiles[dst].push(item) {
            self.log(ExchangeEvent::Push(PushEvent { dst, accepted: true }));
            return true;
        }
        if !self.send(dst, false) {
            self.log(ExchangeEvent::Push(PushEvent { dst, accepted: false }));
            return false;
        }
        let accepted = self.send_tiles[dst].push(item);
        debug_assert!(accepted, "tile must be empty immediately after a successful send");
        self.log(ExchangeEvent::Push(PushEvent { dst, accepted }));
        accepted
    }

    fn pop(&mut self, item: &mut [u8]) -> Option<usize> {
        self.pop_into(item)
    }

    fn unpop(&mut self) -> bool {
        self.undo_last_pop()
    }

    fn pull(&mut self) -> Option<(usize, &[u8])> {
        let item_bytes = self.config.item_bytes;
        let mut scratch = std::mem::take(&mut self.pull_scratch);
        let src = self.pop_into(&mut scratch[..item_bytes]);
        self.pull_scratch = scratch;
        src.map(|src| (src, &self.pull_scratch[..item_bytes]))
    }

    fn unpull(&mut self) -> bool {
        self.undo_last_pop()
    }

    fn proceed(&mut self, done_pushing: bool) -> bool {
        if done_pushing && !self.announced_done {
            for dst in 0..self.peers {
                while !self.send(dst, true) {
                    // Cooperatively drain inbound data while waiting for
                    // `dst` to return credit, so the system can't deadlock
                    // with everyone waiting on everyone else. Drained items
                    // go to the backlog, not the floor: `pop`/`pull` will
                    // hand them back to the caller later.
                    if !self.drain_into_backlog() {
                        // Nothing to drain right now either; yield briefly.
                        std::thread::yield_now();
                    }
                }
            }
            self.announced_done = true;
        }

        self.activate();
        let more_work = !(self.all_done
            && self.current_active.is_none()
            && self.active_buffer_queue.is_empty()
            && self.backlog.is_empty());
        self.log(ExchangeEvent::Proceed(ProceedEvent { done_requested: done_pushing, more_work }));
        more_work
    }

    fn reset(&mut self) {
        let self_id = self.transport.self_id();
        for tile in &mut self.send_tiles {
            tile.clear();
        }
        for d in 0..self.peers {
            self.transport.atomic_store(&self.can_send, self_id, d, 1);
        }
        self.transport.atomic_store(&self.num_msgs, self_id, 0, 0);
        self.num_popped = 0;
        self.active_buffer_queue.clear();
        self.current_active = None;
        self.num_done_sending = 0;
        self.all_done = false;
        self.announced_done = false;
        self.last_pop = None;
        self.backlog.clear();
        self.transport.barrier();
    }

    fn peers(&self) -> usize {
        self.peers
    }

    fn self_id(&self) -> usize {
        self.transport.self_id()
    }
}
