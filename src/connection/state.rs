//! Pool bookkeeping shared by every worker.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Identity of one dialed socket within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// Dialing the remote address, possibly between retries.
    #[default]
    Dialing,
    /// Connected and dispatching messages.
    Connected,
    /// Read loop ended, connection being torn down.
    Draining,
    /// Worker finished; slots are never refilled.
    Exited,
}

impl WorkerState {
    /// Check if the slot currently holds a live connection.
    pub fn is_connected(&self) -> bool {
        *self == WorkerState::Connected
    }

    /// Check if the worker has finished.
    pub fn is_exited(&self) -> bool {
        *self == WorkerState::Exited
    }
}

/// Pool-wide connection statistics.
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    /// Number of dial attempts, successful or not.
    pub dial_attempts: u64,
    /// Number of failed dial attempts.
    pub dial_failures: u64,
    /// Number of connections established.
    pub connect_count: u64,
    /// Number of connections torn down.
    pub disconnect_count: u64,
    /// Time of last successful connection.
    pub last_connected: Option<Instant>,
    /// Time of last disconnect.
    pub last_disconnected: Option<Instant>,
    /// Time of last dial failure.
    pub last_error: Option<Instant>,
}

impl ClientStats {
    /// Record a successful dial.
    pub fn record_connect(&mut self) {
        self.dial_attempts += 1;
        self.connect_count += 1;
        self.last_connected = Some(Instant::now());
    }

    /// Record a failed dial.
    pub fn record_failure(&mut self) {
        self.dial_attempts += 1;
        self.dial_failures += 1;
        self.last_error = Some(Instant::now());
    }

    /// Record a connection teardown.
    pub fn record_disconnect(&mut self) {
        self.disconnect_count += 1;
        self.last_disconnected = Some(Instant::now());
    }
}

/// State guarded by the pool lock.
///
/// `H` is the handle kept per live connection so that shutdown can force it
/// closed.
#[derive(Debug)]
pub(crate) struct PoolState<H> {
    /// Live connections; `None` while the pool is not running.
    conns: Option<HashMap<ConnId, H>>,
    /// Set once by close, cleared by the next start.
    closing: bool,
    /// Closes that have swept the registry but not yet joined their workers.
    closes_pending: usize,
    slots: Vec<WorkerState>,
    stats: ClientStats,
}

impl<H> Default for PoolState<H> {
    fn default() -> Self {
        Self {
            conns: None,
            closing: false,
            closes_pending: 0,
            slots: Vec::new(),
            stats: ClientStats::default(),
        }
    }
}

impl<H> PoolState<H> {
    pub fn is_running(&self) -> bool {
        self.conns.is_some()
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Check if a close is still waiting for its workers.
    pub fn is_close_pending(&self) -> bool {
        self.closes_pending > 0
    }

    /// Enter the running state with `conn_num` dialing slots.
    pub fn start(&mut self, conn_num: usize) {
        self.conns = Some(HashMap::new());
        self.closing = false;
        self.slots = vec![WorkerState::Dialing; conn_num];
    }

    /// Track a freshly dialed connection.
    ///
    /// Hands the connection back if shutdown has begun; the caller must then
    /// close it.
    pub fn register(&mut self, id: ConnId, slot: usize, handle: H) -> Result<(), H> {
        if self.closing {
            self.set_slot(slot, WorkerState::Exited);
            return Err(handle);
        }
        if let Some(conns) = self.conns.as_mut() {
            conns.insert(id, handle);
        }
        self.stats.record_connect();
        self.set_slot(slot, WorkerState::Connected);
        Ok(())
    }

    /// Stop tracking a connection. Tolerates a registry already cleared by
    /// close.
    pub fn deregister(&mut self, id: ConnId, slot: usize) -> Option<H> {
        self.stats.record_disconnect();
        self.set_slot(slot, WorkerState::Exited);
        self.conns.as_mut().and_then(|conns| conns.remove(&id))
    }

    pub fn record_dial_failure(&mut self) {
        self.stats.record_failure();
    }

    pub fn set_slot(&mut self, slot: usize, state: WorkerState) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = state;
        }
    }

    /// Signal shutdown and hand back every tracked connection.
    ///
    /// Must be paired with [`finish_close`](Self::finish_close) once the
    /// workers have been joined.
    pub fn close(&mut self) -> Vec<H> {
        self.closing = true;
        self.closes_pending += 1;
        self.conns
            .take()
            .map(|conns| conns.into_values().collect())
            .unwrap_or_default()
    }

    pub fn finish_close(&mut self) {
        self.closes_pending = self.closes_pending.saturating_sub(1);
    }

    pub fn connection_count(&self) -> usize {
        self.conns.as_ref().map_or(0, HashMap::len)
    }

    pub fn slots(&self) -> &[WorkerState] {
        &self.slots
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_state() {
        assert!(WorkerState::Connected.is_connected());
        assert!(!WorkerState::Dialing.is_connected());
        assert!(WorkerState::Exited.is_exited());
        assert_eq!(WorkerState::default(), WorkerState::Dialing);
    }

    #[test]
    fn test_client_stats() {
        let mut stats = ClientStats::default();

        stats.record_failure();
        stats.record_failure();
        stats.record_connect();
        assert_eq!(stats.dial_attempts, 3);
        assert_eq!(stats.dial_failures, 2);
        assert_eq!(stats.connect_count, 1);
        assert!(stats.last_connected.is_some());
        assert!(stats.last_error.is_some());

        stats.record_disconnect();
        assert_eq!(stats.disconnect_count, 1);
    }

    #[test]
    fn test_pool_state_lifecycle() {
        let mut state: PoolState<&'static str> = PoolState::default();
        assert!(!state.is_running());

        state.start(2);
        assert!(state.is_running());
        assert_eq!(state.slots(), &[WorkerState::Dialing, WorkerState::Dialing]);

        state.register(ConnId(1), 0, "a").unwrap();
        state.register(ConnId(2), 1, "b").unwrap();
        assert_eq!(state.connection_count(), 2);
        assert!(state.slots()[0].is_connected());

        assert_eq!(state.deregister(ConnId(1), 0), Some("a"));
        assert_eq!(state.connection_count(), 1);
        assert!(state.slots()[0].is_exited());

        let mut swept = state.close();
        swept.sort();
        assert_eq!(swept, vec!["b"]);
        assert!(!state.is_running());
        assert!(state.is_closing());

        // Late teardown after close finds nothing to remove
        assert_eq!(state.deregister(ConnId(2), 1), None);

        assert!(state.is_close_pending());
        state.finish_close();
        assert!(!state.is_close_pending());
    }

    #[test]
    fn test_overlapping_closes_stay_pending() {
        let mut state: PoolState<u8> = PoolState::default();
        state.start(1);
        state.close();
        state.close();

        state.finish_close();
        assert!(state.is_close_pending());
        state.finish_close();
        assert!(!state.is_close_pending());
    }

    #[test]
    fn test_register_after_close_hands_back() {
        let mut state: PoolState<u8> = PoolState::default();
        state.start(1);
        state.close();

        assert_eq!(state.register(ConnId(9), 0, 7), Err(7));
        assert_eq!(state.connection_count(), 0);
        assert_eq!(state.stats().connect_count, 0);
    }
}
