//! Fixed fan-out TCP client pool built on std::net.
//!
//! A [`TcpClient`] keeps a fixed number of connections open to one remote
//! address. Each connection gets its own worker that dials with retry,
//! reads length-prefixed frames, and routes each message to a handler
//! looked up by message identifier in a shared [`Dispatcher`].
//!
//! # Features
//!
//! - Dial-with-retry at a fixed interval, interrupted promptly by close
//! - Configurable length-prefixed framing ([`MsgParser`])
//! - Bounded per-connection write queues drained by a writer thread
//! - Pluggable per-connection agents ([`Agent`]) with a stock
//!   [`FramedAgent`] that prefixes each message with a 2-byte id
//! - Tokio counterparts behind the `tokio` feature
//!
//! # Example
//!
//! ```no_run
//! use tcpool::{ClientConfig, FramedAgent, TcpClient};
//!
//! let client = TcpClient::with_agent_factory(
//!     ClientConfig::new("127.0.0.1:3563").with_conn_num(4),
//!     FramedAgent::new,
//! );
//!
//! // Answer every ping (id 1) with a pong (id 2)
//! client.reg_handler(1, |agent: &FramedAgent, payload| {
//!     let _ = agent.write_msg(2, &payload);
//! });
//!
//! client.start().unwrap();
//! // ...
//! client.close();
//! ```
//!
//! # Wire format
//!
//! With the default parser and [`FramedAgent`]:
//!
//! ```text
//! +--------+--------+--------+--------+---- ... ----+
//! |  length (u16)   |  msg id (u16)   |   payload   |
//! +--------+--------+--------+--------+---- ... ----+
//! ```
//!
//! The length counts the id and payload bytes. Integers are big-endian
//! unless the parser is configured for little-endian.

pub mod agent;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod transport;

// Async modules (require tokio feature)
#[cfg(feature = "tokio")]
pub mod agent_async;
#[cfg(feature = "tokio")]
pub mod codec_async;
#[cfg(feature = "tokio")]
pub mod transport_async;

// Re-export commonly used types at the crate root
pub use agent::{Agent, FramedAgent, MsgId};
pub use codec::{LengthField, MsgParser};
pub use connection::{ClientConfig, ClientStats, TcpClient, WorkerState};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use transport::TcpConn;

#[cfg(feature = "tokio")]
pub use agent_async::{AsyncAgent, AsyncFramedAgent};
#[cfg(feature = "tokio")]
pub use connection::AsyncTcpClient;
#[cfg(feature = "tokio")]
pub use transport_async::AsyncTcpConn;
