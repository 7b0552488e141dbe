//! Async transport for pooled connections using Tokio.
//!
//! [`AsyncTcpConn`] is the tokio counterpart of
//! [`TcpConn`](crate::transport::TcpConn): reads on the calling task, writes
//! through a bounded channel drained by a writer task.

mod tcp;

pub use tcp::AsyncTcpConn;
