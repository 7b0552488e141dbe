//! Async per-connection agents.
//!
//! Tokio counterparts of [`Agent`](crate::agent::Agent) and
//! [`FramedAgent`](crate::agent::FramedAgent), driven by
//! [`AsyncTcpClient`](crate::connection::AsyncTcpClient).

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::agent::{MsgId, encode_id, split_id};
use crate::error::Result;
use crate::transport_async::AsyncTcpConn;

/// A per-connection message source driven by an async pool worker.
pub trait AsyncAgent: Send + 'static {
    /// Message identifier type used as the dispatcher key.
    type Id: Eq + Hash + Debug + Send + Sync + 'static;

    /// Wait for the next message.
    fn read(&mut self) -> impl Future<Output = Result<(Self::Id, Bytes)>> + Send;

    /// Called once after the read loop has ended.
    fn on_close(&mut self) -> impl Future<Output = ()> + Send;
}

type CloseHook = Box<dyn FnOnce(&AsyncTcpConn) + Send>;

/// Stock async agent over an [`AsyncTcpConn`] using [`MsgId`] prefixed frames.
pub struct AsyncFramedAgent {
    conn: AsyncTcpConn,
    close_hook: Option<CloseHook>,
}

impl AsyncFramedAgent {
    /// Create an agent over a pooled connection.
    pub fn new(conn: AsyncTcpConn) -> Self {
        Self {
            conn,
            close_hook: None,
        }
    }

    /// Run `hook` when the pool finishes with this connection.
    pub fn with_close_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&AsyncTcpConn) + Send + 'static,
    {
        self.close_hook = Some(Box::new(hook));
        self
    }

    /// Get the underlying connection.
    pub fn conn(&self) -> &AsyncTcpConn {
        &self.conn
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    /// Queue a message for the peer without waiting.
    pub fn write_msg(&self, id: MsgId, payload: &[u8]) -> Result<()> {
        let id = encode_id(self.conn.parser(), id);
        self.conn.write_msg(&[id.as_slice(), payload])
    }

    /// Close the connection immediately.
    pub fn destroy(&self) {
        self.conn.destroy();
    }
}

impl AsyncAgent for AsyncFramedAgent {
    type Id = MsgId;

    async fn read(&mut self) -> Result<(MsgId, Bytes)> {
        let body = self.conn.read_msg().await?;
        split_id(self.conn.parser(), body)
    }

    async fn on_close(&mut self) {
        if let Some(hook) = self.close_hook.take() {
            hook(&self.conn);
        }
    }
}

impl std::fmt::Debug for AsyncFramedAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFramedAgent")
            .field("conn", &self.conn)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgParser;
    use crate::codec_async::write_frame_async;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn test_async_agent_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let conn = AsyncTcpConn::new(client, 8, MsgParser::default()).unwrap();
        let mut agent = AsyncFramedAgent::new(conn);

        write_frame_async(
            &MsgParser::default(),
            &mut server,
            &[[0x01u8, 0x00].as_slice(), b"data".as_slice()],
        )
        .await
        .unwrap();

        let (id, payload) = agent.read().await.unwrap();
        assert_eq!(id, 0x0100);
        assert_eq!(payload.as_ref(), b"data");
    }
}
