//! Blocking transport for pooled connections.
//!
//! [`TcpConn`] wraps one connected socket with frame reads on the calling
//! thread and a bounded, thread-drained write queue.

pub mod tcp;

pub use tcp::TcpConn;
