//! Per-connection agents.
//!
//! An agent sits between a pooled socket and the dispatcher: it turns the
//! byte stream into `(id, payload)` messages and receives a close callback
//! once its connection is finished.
//!
//! [`FramedAgent`] is the stock agent. Its frames carry a two-byte message
//! identifier ahead of the payload:
//!
//! ```text
//! +--------+--------+--------+---- ... ----+
//! | length field    | msg id |   payload   |
//! +--------+--------+--------+---- ... ----+
//! ```

use std::fmt::Debug;
use std::hash::Hash;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::codec::MsgParser;
use crate::error::{Error, Result};
use crate::transport::TcpConn;

/// Message identifier used by the stock agents.
pub type MsgId = u16;

/// Size of the encoded [`MsgId`] prefix.
pub const MSG_ID_LEN: usize = 2;

/// A per-connection message source driven by a pool worker.
///
/// The worker calls [`read`](Agent::read) until it fails or yields an
/// identifier without a handler, then calls [`on_close`](Agent::on_close)
/// exactly once.
pub trait Agent: 'static {
    /// Message identifier type used as the dispatcher key.
    type Id: Eq + Hash + Debug + Send + Sync + 'static;

    /// Block until the next message arrives.
    fn read(&mut self) -> Result<(Self::Id, Bytes)>;

    /// Called once after the read loop has ended.
    fn on_close(&mut self);
}

type CloseHook = Box<dyn FnOnce(&TcpConn) + Send>;

/// Stock agent over a [`TcpConn`] using [`MsgId`] prefixed frames.
pub struct FramedAgent {
    conn: TcpConn,
    close_hook: Option<CloseHook>,
}

impl FramedAgent {
    /// Create an agent over a pooled connection.
    pub fn new(conn: TcpConn) -> Self {
        Self {
            conn,
            close_hook: None,
        }
    }

    /// Run `hook` when the pool finishes with this connection.
    pub fn with_close_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&TcpConn) + Send + 'static,
    {
        self.close_hook = Some(Box::new(hook));
        self
    }

    /// Get the underlying connection.
    pub fn conn(&self) -> &TcpConn {
        &self.conn
    }

    /// Get the local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.conn.local_addr()
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }

    /// Queue a message for the peer.
    pub fn write_msg(&self, id: MsgId, payload: &[u8]) -> Result<()> {
        let id = encode_id(self.conn.parser(), id);
        self.conn.write_msg(&[id.as_slice(), payload])
    }

    /// Close the connection after queued messages are written.
    pub fn close(&self) {
        self.conn.close();
    }

    /// Close the connection immediately.
    pub fn destroy(&self) {
        self.conn.destroy();
    }
}

impl Agent for FramedAgent {
    type Id = MsgId;

    fn read(&mut self) -> Result<(MsgId, Bytes)> {
        let body = self.conn.read_msg()?;
        split_id(self.conn.parser(), body)
    }

    fn on_close(&mut self) {
        if let Some(hook) = self.close_hook.take() {
            hook(&self.conn);
        }
    }
}

impl std::fmt::Debug for FramedAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedAgent")
            .field("conn", &self.conn)
            .finish()
    }
}

/// Encode a message identifier in the parser's byte order.
pub(crate) fn encode_id(parser: &MsgParser, id: MsgId) -> [u8; MSG_ID_LEN] {
    if parser.little_endian {
        id.to_le_bytes()
    } else {
        id.to_be_bytes()
    }
}

/// Split a frame body into its identifier and payload.
pub(crate) fn split_id(parser: &MsgParser, mut body: Bytes) -> Result<(MsgId, Bytes)> {
    if body.len() < MSG_ID_LEN {
        return Err(Error::MessageTooShort {
            len: body.len(),
            min: MSG_ID_LEN,
        });
    }

    let payload = body.split_off(MSG_ID_LEN);
    let raw = [body[0], body[1]];
    let id = if parser.little_endian {
        u16::from_le_bytes(raw)
    } else {
        u16::from_be_bytes(raw)
    };
    Ok((id, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connected_agent() -> (FramedAgent, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let conn = TcpConn::new(client, 8, MsgParser::default()).unwrap();
        (FramedAgent::new(conn), server)
    }

    #[test]
    fn test_split_id_byte_order() {
        let body = Bytes::from_static(&[0x01, 0x02, b'x']);

        let (id, payload) = split_id(&MsgParser::default(), body.clone()).unwrap();
        assert_eq!(id, 0x0102);
        assert_eq!(payload.as_ref(), b"x");

        let le = MsgParser::default().with_little_endian(true);
        let (id, _) = split_id(&le, body).unwrap();
        assert_eq!(id, 0x0201);
    }

    #[test]
    fn test_split_id_too_short() {
        let err = split_id(&MsgParser::default(), Bytes::from_static(&[0x01])).unwrap_err();
        assert!(matches!(err, Error::MessageTooShort { len: 1, min: 2 }));
    }

    #[test]
    fn test_agent_read_and_write() {
        let (mut agent, mut server) = connected_agent();
        let parser = MsgParser::default();

        parser
            .write_frame(&mut server, &[[0x00u8, 0x2A].as_slice(), b"hello".as_slice()])
            .unwrap();
        let (id, payload) = agent.read().unwrap();
        assert_eq!(id, 42);
        assert_eq!(payload.as_ref(), b"hello");

        agent.write_msg(7, b"reply").unwrap();
        let body = parser.read_frame(&mut server).unwrap();
        assert_eq!(body.as_ref(), b"\x00\x07reply");
    }

    #[test]
    fn test_close_hook_runs_once() {
        let (agent, _server) = connected_agent();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut agent = agent.with_close_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        agent.on_close();
        agent.on_close();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
