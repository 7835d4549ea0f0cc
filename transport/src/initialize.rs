//! Spawns one worker thread per peer and hands each one a `Transport`.

use std::sync::Arc;
use std::thread;

use crate::process::ProcessTransport;
use crate::TransportError;

/// Possible configurations for the in-process transport.
pub enum Configuration {
    /// A single peer, run without spawning a thread of its own.
    Thread,
    /// `n` peers, each run on its own OS thread within this process.
    Process(usize),
}

impl Configuration {
    fn peer_count(&self) -> usize {
        match self {
            Configuration::Thread => 1,
            Configuration::Process(peers) => *peers,
        }
    }
}

/// Initializes the transport and runs `func` once per peer.
///
/// `func` runs identically (in source, not necessarily in the values it
/// observes) on every peer; each invocation gets its own [`ProcessTransport`]
/// handle. Returns once every worker thread has been spawned; call
/// [`WorkerGuards::join`] to wait for completion and collect results.
pub fn initialize<T, F>(config: Configuration, func: F) -> Result<WorkerGuards<T>, TransportError>
where
    T: Send + 'static,
    F: Fn(ProcessTransport) -> T + Send + Sync + 'static,
{
    let peers = config.peer_count();
    if peers == 0 {
        return Err(TransportError::InvalidPeerCount(peers));
    }
    initialize_from(ProcessTransport::new_vector(peers), func)
}

/// As [`initialize`], but takes already-built transport handles directly.
pub fn initialize_from<T, F>(
    transports: Vec<ProcessTransport>,
    func: F,
) -> Result<WorkerGuards<T>, TransportError>
where
    T: Send + 'static,
    F: Fn(ProcessTransport) -> T + Send + Sync + 'static,
{
    let logic = Arc::new(func);
    let mut guards = Vec::with_capacity(transports.len());
    for (index, transport) in transports.into_iter().enumerate() {
        let logic = logic.clone();
        let guard = thread::Builder::new()
            .name(format!("peer-{index}"))
            .spawn(move || (*logic)(transport))
            .map_err(TransportError::SpawnFailed)?;
        guards.push(guard);
    }
    Ok(WorkerGuards { guards })
}

/// Join handles for the worker threads spawned by [`initialize`].
pub struct WorkerGuards<T: Send + 'static> {
    guards: Vec<thread::JoinHandle<T>>,
}

impl<T: Send + 'static> WorkerGuards<T> {
    /// Waits for every peer to finish, returning their results in peer-id
    /// order, or the first panic encountered.
    pub fn join(self) -> Result<Vec<T>, TransportError> {
        self.guards
            .into_iter()
            .map(|guard| guard.join().map_err(|_| TransportError::WorkerPanicked))
            .collect()
    }
}
