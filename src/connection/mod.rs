//! Client connection pools.
//!
//! This module provides:
//! - [`TcpClient`], a pool of reconnecting dialers on OS threads
//! - [`AsyncTcpClient`], the same pool on tokio tasks (`tokio` feature)
//! - [`ClientConfig`] for the address, fan-out and retry pacing
//!
//! A pool opens `conn_num` connections to one address. Each slot dials until
//! it connects, then serves its connection until the connection ends. Slots
//! are not refilled: lost connections stay lost until the pool is closed and
//! started again.
//!
//! # Example
//!
//! ```no_run
//! use tcpool::agent::FramedAgent;
//! use tcpool::connection::{ClientConfig, TcpClient};
//! use std::time::Duration;
//!
//! let config = ClientConfig::new("127.0.0.1:3563")
//!     .with_conn_num(8)
//!     .with_connect_interval(Duration::from_secs(1));
//!
//! let client = TcpClient::with_agent_factory(config, FramedAgent::new);
//! client.reg_handler(1, |agent: &FramedAgent, payload| {
//!     println!("{} sent {} bytes", agent.peer_addr(), payload.len());
//! });
//!
//! client.start().unwrap();
//! // ...
//! client.close();
//! ```

mod client;
mod config;
mod connector;
mod state;

#[cfg(feature = "tokio")]
mod client_async;

pub use client::{AgentFactory, TcpClient};
pub use config::{
    ClientConfig, DEFAULT_CONN_NUM, DEFAULT_CONNECT_INTERVAL, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_PENDING_WRITE_NUM,
};
pub use state::{ClientStats, ConnId, WorkerState};

#[cfg(feature = "tokio")]
pub use client_async::{AsyncAgentFactory, AsyncTcpClient};
