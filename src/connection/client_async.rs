//! Async fixed fan-out TCP client pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, debug_span, error, info, trace, warn};

use crate::agent_async::AsyncAgent;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::transport_async::AsyncTcpConn;

use super::config::ClientConfig;
use super::connector::{AsyncConnector, AsyncDialGate};
use super::state::{ClientStats, ConnId, PoolState, WorkerState};

/// Builds the async agent for each new connection.
pub type AsyncAgentFactory<A> = Arc<dyn Fn(AsyncTcpConn) -> A + Send + Sync>;

struct Locked<A> {
    config: ClientConfig,
    new_agent: Option<AsyncAgentFactory<A>>,
    pool: PoolState<AsyncTcpConn>,
}

struct Shared<A: AsyncAgent> {
    locked: Mutex<Locked<A>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<JoinSet<()>>,
    dispatcher: Dispatcher<A::Id, A>,
    next_conn_id: AtomicU64,
}

/// Tokio version of [`TcpClient`](super::TcpClient).
///
/// Workers are tasks on the current runtime instead of threads. Behavior
/// is otherwise the same: a fixed number of slots, dial-with-retry, no
/// redial after a connection ends, and a `close` that waits for every
/// worker.
pub struct AsyncTcpClient<A: AsyncAgent> {
    shared: Arc<Shared<A>>,
}

impl<A: AsyncAgent> AsyncTcpClient<A> {
    /// Create a stopped client. An agent factory must be set before start.
    pub fn new(config: ClientConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                locked: Mutex::new(Locked {
                    config,
                    new_agent: None,
                    pool: PoolState::default(),
                }),
                shutdown,
                tasks: Mutex::new(JoinSet::new()),
                dispatcher: Dispatcher::new(),
                next_conn_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create a stopped client with its agent factory.
    pub fn with_agent_factory<F>(config: ClientConfig, new_agent: F) -> Self
    where
        F: Fn(AsyncTcpConn) -> A + Send + Sync + 'static,
    {
        let client = Self::new(config);
        client.set_agent_factory(new_agent);
        client
    }

    /// Set the agent factory used for connections dialed by the next start.
    pub fn set_agent_factory<F>(&self, new_agent: F)
    where
        F: Fn(AsyncTcpConn) -> A + Send + Sync + 'static,
    {
        self.shared.locked.lock().new_agent = Some(Arc::new(new_agent));
    }

    /// Install the handler for message `id`, replacing any previous one.
    pub fn reg_handler<F>(&self, id: A::Id, handler: F)
    where
        F: Fn(&A, Bytes) + Send + Sync + 'static,
    {
        self.shared.dispatcher.reg_handler(id, handler);
    }

    pub fn dispatcher(&self) -> &Dispatcher<A::Id, A> {
        &self.shared.dispatcher
    }

    pub fn config(&self) -> ClientConfig {
        self.shared.locked.lock().config.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.locked.lock().pool.is_running()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.locked.lock().pool.connection_count()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared.locked.lock().pool.slots().to_vec()
    }

    pub fn stats(&self) -> ClientStats {
        self.shared.locked.lock().pool.stats().clone()
    }

    /// Validate the configuration and spawn the worker tasks.
    ///
    /// # Errors
    ///
    /// Same as [`TcpClient::start`](super::TcpClient::start), plus
    /// [`Error::Closing`] while a [`close`](AsyncTcpClient::close) is still
    /// waiting for its workers.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut tasks = self.shared.tasks.lock();

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
            if locked.pool.is_close_pending() {
                warn!("client is still closing");
                return Err(Error::Closing);
            }
            if locked.pool.is_running() {
                error!("client is already running");
                return Err(Error::AlreadyRunning);
            }

            let conn_num = locked.config.conn_num;
            locked.pool.start(conn_num);
            self.shared.shutdown.send_replace(false);
            (Arc::new(locked.config.clone()), new_agent)
        };

        for slot in 0..config.conn_num {
            let span = debug_span!("worker", slot, addr = %config.addr);
            let worker = Arc::clone(&self.shared).run_worker(
                slot,
                Arc::clone(&config),
                Arc::clone(&new_agent),
            );
            tasks.spawn(worker.instrument(span));
        }

        info!(addr = %config.addr, conn_num = config.conn_num, "async client started");
        Ok(())
    }

    /// Close every connection and wait for all worker tasks to finish.
    ///
    /// Until this returns, [`start`](AsyncTcpClient::start) fails with
    /// [`Error::Closing`].
    pub async fn close(&self) {
        // Lock order is tasks, then pool state, as in start
        let mut tasks = {
            let mut tasks = self.shared.tasks.lock();
            let conns = {
                let mut locked = self.shared.locked.lock();
                let conns = locked.pool.close();
                self.shared.shutdown.send_replace(true);
                conns
            };
            for conn in conns {
                conn.destroy();
            }
            std::mem::replace(&mut *tasks, JoinSet::new())
        };
        let _pending = PendingClose {
            shared: &*self.shared,
        };

        let count = tasks.len();
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                if e.is_panic() {
                    error!("worker task panicked");
                }
            }
        }

        info!(workers = count, "async client closed");
    }
}

/// Clears the pending close mark, even if the close future is dropped.
struct PendingClose<'a, A: AsyncAgent> {
    shared: &'a Shared<A>,
}

impl<A: AsyncAgent> Drop for PendingClose<'_, A> {
    fn drop(&mut self) {
        self.shared.locked.lock().pool.finish_close();
    }
}

impl<A: AsyncAgent> Shared<A> {
    async fn run_worker(
        self: Arc<Self>,
        slot: usize,
        config: Arc<ClientConfig>,
        new_agent: AsyncAgentFactory<A>,
    ) {
        let connector = AsyncConnector {
            addr: &config.addr,
            connect_timeout: config.connect_timeout,
            interval: config.connect_interval,
        };
        let Some(stream) = connector.dial(&*self).await else {
            debug!("dial abandoned on shutdown");
            self.locked.lock().pool.set_slot(slot, WorkerState::Exited);
            return;
        };

        let conn = match AsyncTcpConn::new(stream, config.pending_write_num, config.parser.clone()) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "failed to set up connection");
                self.locked.lock().pool.set_slot(slot, WorkerState::Exited);
                return;
            }
        };

        let conn_id = ConnId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let registered = self.locked.lock().pool.register(conn_id, slot, conn.clone());
        if let Err(conn) = registered {
            conn.destroy();
            debug!("connected after shutdown, dropping socket");
            return;
        }
        let _registration = Registration {
            shared: &*self,
            conn_id,
            slot,
        };
        debug!(%conn_id, local = %conn.local_addr(), "connected");

        let mut agent = new_agent(conn.clone());
        self.serve(&mut agent).await;

        self.locked.lock().pool.set_slot(slot, WorkerState::Draining);
        conn.close().await;
    }

    async fn serve(&self, agent: &mut A) {
        loop {
            let (id, payload) = match agent.read().await {
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

        agent.on_close().await;
    }
}

impl<A: AsyncAgent> AsyncDialGate for Shared<A> {
    fn is_closing(&self) -> bool {
        self.locked.lock().pool.is_closing()
    }

    async fn wait_retry(&self, interval: Duration) -> bool {
        let shutdown = self.shutdown.subscribe();
        {
            let mut locked = self.locked.lock();
            locked.pool.record_dial_failure();
            if locked.pool.is_closing() {
                return false;
            }
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => !self.is_closing(),
            () = wait_shutdown(shutdown) => false,
        }
    }
}

async fn wait_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closing| *closing).await;
}

struct Registration<'a, A: AsyncAgent> {
    shared: &'a Shared<A>,
    conn_id: ConnId,
    slot: usize,
}

impl<A: AsyncAgent> Drop for Registration<'_, A> {
    fn drop(&mut self) {
        self.shared.locked.lock().pool.deregister(self.conn_id, self.slot);
        debug!(conn_id = %self.conn_id, "connection torn down");
    }
}

impl<A: AsyncAgent> std::fmt::Debug for AsyncTcpClient<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let locked = self.shared.locked.lock();
        f.debug_struct("AsyncTcpClient")
            .field("addr", &locked.config.addr)
            .field("running", &locked.pool.is_running())
            .field("connections", &locked.pool.connection_count())
            .finish()
    }
}
