//! Fixed fan-out TCP client pool.

use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, debug_span, error, info, trace, warn};

use crate::agent::Agent;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::transport::TcpConn;

use super::config::ClientConfig;
use super::connector::{Connector, DialGate};
use super::state::{ClientStats, ConnId, PoolState, WorkerState};

/// Builds the agent for each new connection.
pub type AgentFactory<A> = Arc<dyn Fn(TcpConn) -> A + Send + Sync>;

/// Everything guarded by the pool lock.
struct Locked<A> {
    config: ClientConfig,
    new_agent: Option<AgentFactory<A>>,
    pool: PoolState<TcpStream>,
}

struct Shared<A: Agent> {
    locked: Mutex<Locked<A>>,
    /// Wakes dialers sleeping between retries when close begins.
    wake: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dispatcher: Dispatcher<A::Id, A>,
    next_conn_id: AtomicU64,
}

/// A pool of outbound TCP connections to one address.
///
/// [`start`](TcpClient::start) spawns one worker thread per connection
/// slot. Each worker dials until it succeeds, wraps the socket in a
/// [`TcpConn`] and an agent built by the agent factory, then reads messages
/// and routes them through the dispatcher until the connection fails or a
/// message arrives with no registered handler. A worker never redials after
/// its connection ends, so the number of live connections only shrinks
/// between `start` and [`close`](TcpClient::close).
///
/// `close` must be called to stop the workers; dropping the client does not.
///
/// # Example
///
/// ```no_run
/// use tcpool::agent::FramedAgent;
/// use tcpool::connection::{ClientConfig, TcpClient};
///
/// let client = TcpClient::with_agent_factory(
///     ClientConfig::new("127.0.0.1:3563").with_conn_num(4),
///     FramedAgent::new,
/// );
/// client.reg_handler(1, |agent: &FramedAgent, payload| {
///     let _ = agent.write_msg(2, &payload);
/// });
///
/// client.start().unwrap();
/// // ...
/// client.close();
/// ```
pub struct TcpClient<A: Agent> {
    shared: Arc<Shared<A>>,
}

impl<A: Agent> TcpClient<A> {
    /// Create a stopped client. An agent factory must be set before start.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                locked: Mutex::new(Locked {
                    config,
                    new_agent: None,
                    pool: PoolState::default(),
                }),
                wake: Condvar::new(),
                workers: Mutex::new(Vec::new()),
                dispatcher: Dispatcher::new(),
                next_conn_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create a stopped client with its agent factory.
    pub fn with_agent_factory<F>(config: ClientConfig, new_agent: F) -> Self
    where
        F: Fn(TcpConn) -> A + Send + Sync + 'static,
    {
        let client = Self::new(config);
        client.set_agent_factory(new_agent);
        client
    }

    /// Set the agent factory used for connections dialed by the next start.
    pub fn set_agent_factory<F>(&self, new_agent: F)
    where
        F: Fn(TcpConn) -> A + Send + Sync + 'static,
    {
        self.shared.locked.lock().new_agent = Some(Arc::new(new_agent));
    }

    /// Install the handler for message `id`, replacing any previous one.
    ///
    /// Safe to call while the pool is running.
    pub fn reg_handler<F>(&self, id: A::Id, handler: F)
    where
        F: Fn(&A, bytes::Bytes) + Send + Sync + 'static,
    {
        self.shared.dispatcher.reg_handler(id, handler);
    }

    /// Get the dispatcher shared by every connection.
    pub fn dispatcher(&self) -> &Dispatcher<A::Id, A> {
        &self.shared.dispatcher
    }

    /// Get the configuration, normalized once the pool has started.
    pub fn config(&self) -> ClientConfig {
        self.shared.locked.lock().config.clone()
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        self.shared.locked.lock().pool.is_running()
    }

    /// Number of connections dialed and not yet torn down.
    pub fn connection_count(&self) -> usize {
        self.shared.locked.lock().pool.connection_count()
    }

    /// State of every worker slot from the last start.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared.locked.lock().pool.slots().to_vec()
    }

    /// Snapshot of the pool statistics.
    pub fn stats(&self) -> ClientStats {
        self.shared.locked.lock().pool.stats().clone()
    }

    /// Validate the configuration and spawn the workers.
    ///
    /// Returns immediately; workers dial in the background. A `start` that
    /// overlaps a [`close`](TcpClient::close) waits for the close to finish.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingAgentFactory`] if no agent factory was set
    /// - [`Error::AlreadyRunning`] if the pool has not been closed since the
    ///   last start
    /// - [`Error::Config`] for an empty address or unusable parser limits
    /// - [`Error::Io`] if a worker thread cannot be spawned; workers already
    ///   spawned are stopped and the pool is left closed
    pub fn start(&self) -> Result<()> {
        self.start_with(|slot, work| {
            thread::Builder::new()
                .name(format!("tcpool-conn-{slot}"))
                .spawn(work)
        })
    }

    fn start_with<S>(&self, mut spawn: S) -> Result<()>
    where
        S: FnMut(usize, Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>>,
    {
        // Lock order is workers, then pool state, as in close
        let mut workers = self.shared.workers.lock();

        let (config, new_agent) = {
            let mut locked = self.shared.locked.lock();
            if let Err(e) = locked.config.normalize() {
                error!(error = %e, "invalid client configuration");
                return Err(e);
            }
            let Some(new_agent) = locked.new_agent.clone() else {
                error!("agent factory must be set before start");
                return Err(Error::MissingAgentFactory);
            };
            if locked.pool.is_running() {
                error!("client is already running");
                return Err(Error::AlreadyRunning);
            }

            let conn_num = locked.config.conn_num;
            locked.pool.start(conn_num);
            (Arc::new(locked.config.clone()), new_agent)
        };

        for slot in 0..config.conn_num {
            let shared = Arc::clone(&self.shared);
            let worker_config = Arc::clone(&config);
            let worker_agent = Arc::clone(&new_agent);
            let work: Box<dyn FnOnce() + Send> =
                Box::new(move || shared.run_worker(slot, &worker_config, &worker_agent));

            match spawn(slot, work) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!(slot, error = %e, "failed to spawn worker, stopping pool");
                    {
                        let mut locked = self.shared.locked.lock();
                        for unspawned in slot..config.conn_num {
                            locked.pool.set_slot(unspawned, WorkerState::Exited);
                        }
                    }
                    self.shared.stop_workers(&mut workers);
                    return Err(e.into());
                }
            }
        }

        info!(addr = %config.addr, conn_num = config.conn_num, "client started");
        Ok(())
    }

    /// Close every connection and wait for all workers to exit.
    ///
    /// Sockets are shut down to unblock pending reads and dialers sleeping
    /// between retries are woken. A worker in the middle of a dial attempt
    /// finishes it first, bounded by the dial timeout.
    pub fn close(&self) {
        let mut workers = self.shared.workers.lock();
        let count = self.shared.stop_workers(&mut workers);
        info!(workers = count, "client closed");
    }
}

impl<A: Agent> Shared<A> {
    /// Sweep the registry, wake dialers and join `workers`.
    ///
    /// The caller holds the workers lock, so no start can interleave.
    fn stop_workers(&self, workers: &mut Vec<JoinHandle<()>>) -> usize {
        {
            let mut locked = self.locked.lock();
            for stream in locked.pool.close() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            self.wake.notify_all();
        }

        let count = workers.len();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }

        self.locked.lock().pool.finish_close();
        count
    }

    fn run_worker(&self, slot: usize, config: &ClientConfig, new_agent: &AgentFactory<A>) {
        let span = debug_span!("worker", slot, addr = %config.addr);
        let _enter = span.enter();

        let connector = Connector {
            addr: &config.addr,
            connect_timeout: config.connect_timeout,
            interval: config.connect_interval,
        };
        let Some(stream) = connector.dial(self) else {
            debug!("dial abandoned on shutdown");
            self.locked.lock().pool.set_slot(slot, WorkerState::Exited);
            return;
        };

        let conn_id = ConnId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let tracked = match stream.try_clone() {
            Ok(tracked) => tracked,
            Err(e) => {
                warn!(error = %e, "failed to clone socket handle");
                let _ = stream.shutdown(Shutdown::Both);
                self.locked.lock().pool.set_slot(slot, WorkerState::Exited);
                return;
            }
        };

        {
            let mut locked = self.locked.lock();
            if let Err(tracked) = locked.pool.register(conn_id, slot, tracked) {
                let _ = tracked.shutdown(Shutdown::Both);
                debug!("connected after shutdown, dropping socket");
                return;
            }
        }
        // Deregisters even if a handler panics
        let _registration = Registration {
            shared: self,
            conn_id,
            slot,
        };

        let conn = match TcpConn::new(stream, config.pending_write_num, config.parser.clone()) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "failed to set up connection");
                return;
            }
        };
        debug!(%conn_id, local = %conn.local_addr(), "connected");

        let mut agent = new_agent(conn.clone());
        self.serve(&mut agent);

        self.locked.lock().pool.set_slot(slot, WorkerState::Draining);
        conn.close();
    }

    fn serve(&self, agent: &mut A) {
        loop {
            let (id, payload) = match agent.read() {
                Ok(msg) => msg,
                Err(e) => {
                    if self.is_closing() {
                        debug!("connection closed by shutdown");
                    } else if e.is_disconnect() {
                        debug!(error = %e, "connection closed by peer");
                    } else {
                        warn!(error = %e, "read failed, closing connection");
                    }
                    break;
                }
            };

            let Some(handler) = self.dispatcher.handler(&id) else {
                warn!(?id, "no handler registered for message, closing connection");
                break;
            };
            trace!(?id, len = payload.len(), "dispatching message");
            handler(&*agent, payload);
        }

        agent.on_close();
    }
}

impl<A: Agent> DialGate for Shared<A> {
    fn is_closing(&self) -> bool {
        self.locked.lock().pool.is_closing()
    }

    fn wait_retry(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut locked = self.locked.lock();
        locked.pool.record_dial_failure();

        while !locked.pool.is_closing() {
            if self.wake.wait_until(&mut locked, deadline).timed_out() {
                break;
            }
        }
        !locked.pool.is_closing()
    }
}

/// Removes a connection from the pool registry when its worker finishes.
struct Registration<'a, A: Agent> {
    shared: &'a Shared<A>,
    conn_id: ConnId,
    slot: usize,
}

impl<A: Agent> Drop for Registration<'_, A> {
    fn drop(&mut self) {
        let mut locked = self.shared.locked.lock();
        locked.pool.deregister(self.conn_id, self.slot);
        debug!(conn_id = %self.conn_id, "connection torn down");
    }
}

impl<A: Agent> std::fmt::Debug for TcpClient<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let locked = self.shared.locked.lock();
        f.debug_struct("TcpClient")
            .field("addr", &locked.config.addr)
            .field("running", &locked.pool.is_running())
            .field("connections", &locked.pool.connection_count())
            .finish()
    }
}
