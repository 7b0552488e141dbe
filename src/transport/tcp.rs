//! Queue-backed TCP connection.

use std::io::{self, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::codec::MsgParser;
use crate::error::{Error, Result};

/// Item on a connection's outbound queue.
enum Outbound {
    Frame(Bytes),
    Close,
}

struct Inner {
    reader: Mutex<BufReader<TcpStream>>,
    stream: TcpStream,
    queue: Mutex<Option<SyncSender<Outbound>>>,
    closed: AtomicBool,
    parser: MsgParser,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

/// A framed TCP connection with a bounded outbound queue.
///
/// Reads happen on the caller's thread. Writes are encoded immediately and
/// queued for a dedicated writer thread, so handlers never block on a slow
/// peer. If the queue is full the connection is destroyed.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct TcpConn {
    inner: Arc<Inner>,
}

impl TcpConn {
    /// Wrap a connected stream, spawning its writer thread.
    ///
    /// `pending_write_num` is the outbound queue depth.
    pub fn new(stream: TcpStream, pending_write_num: usize, parser: MsgParser) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let reader = BufReader::new(stream.try_clone()?);
        let writer = stream.try_clone()?;

        let (tx, rx) = mpsc::sync_channel(pending_write_num.max(1));
        thread::Builder::new()
            .name(format!("tcpool-writer-{peer_addr}"))
            .spawn(move || write_loop(writer, rx))?;

        Ok(Self {
            inner: Arc::new(Inner {
                reader: Mutex::new(reader),
                stream,
                queue: Mutex::new(Some(tx)),
                closed: AtomicBool::new(false),
                parser,
                local_addr,
                peer_addr,
            }),
        })
    }

    /// Get the local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Get the peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Get the frame parser in use.
    pub fn parser(&self) -> &MsgParser {
        &self.inner.parser
    }

    /// Check if the connection was closed or destroyed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Read the next frame body, blocking until one arrives.
    pub fn read_msg(&self) -> Result<Bytes> {
        let mut reader = self.inner.reader.lock();
        self.inner.parser.read_frame(&mut *reader)
    }

    /// Queue the concatenation of `parts` as one frame.
    pub fn write_msg(&self, parts: &[&[u8]]) -> Result<()> {
        let frame = self.inner.parser.encode_frame(parts)?;
        self.write(frame)
    }

    /// Queue an already encoded frame.
    pub fn write(&self, frame: Bytes) -> Result<()> {
        let mut queue = self.inner.queue.lock();
        let Some(tx) = queue.as_ref() else {
            return Err(Error::ConnectionClosed);
        };

        match tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(peer = %self.inner.peer_addr, "write queue full, closing connection");
                *queue = None;
                self.shutdown_socket();
                Err(Error::ConnectionClosed)
            }
            Err(TrySendError::Disconnected(_)) => {
                *queue = None;
                self.inner.closed.store(true, Ordering::Release);
                Err(Error::ConnectionClosed)
            }
        }
    }

    /// Close gracefully: frames already queued are written first.
    pub fn close(&self) {
        let tx = self.inner.queue.lock().take();
        let Some(tx) = tx else {
            return;
        };
        self.inner.closed.store(true, Ordering::Release);

        // Blocks while the queue is full; fails once the writer is gone
        if tx.send(Outbound::Close).is_err() {
            self.shutdown_socket();
        }
    }

    /// Close immediately, discarding queued frames.
    pub fn destroy(&self) {
        self.inner.queue.lock().take();
        self.shutdown_socket();
    }

    fn shutdown_socket(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let _ = self.inner.stream.shutdown(Shutdown::Both);
    }
}

impl std::fmt::Debug for TcpConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConn")
            .field("local_addr", &self.inner.local_addr)
            .field("peer_addr", &self.inner.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn write_loop(mut stream: TcpStream, rx: Receiver<Outbound>) {
    while let Ok(Outbound::Frame(frame)) = rx.recv() {
        if let Err(e) = stream.write_all(&frame) {
            debug!(error = %e, "write failed, stopping writer");
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_write_and_read() {
        let (client, server) = pair();
        let parser = MsgParser::default();
        let conn = TcpConn::new(client, 8, parser.clone()).unwrap();
        let peer = TcpConn::new(server, 8, parser).unwrap();

        conn.write_msg(&[b"ping".as_slice()]).unwrap();
        assert_eq!(peer.read_msg().unwrap().as_ref(), b"ping");

        peer.write_msg(&[b"po".as_slice(), b"ng".as_slice()]).unwrap();
        assert_eq!(conn.read_msg().unwrap().as_ref(), b"pong");
        assert_eq!(conn.peer_addr(), peer.local_addr());
    }

    #[test]
    fn test_close_flushes_queue() {
        let (client, mut server) = pair();
        let parser = MsgParser::default();
        let conn = TcpConn::new(client, 16, parser.clone()).unwrap();

        for i in 0..3u8 {
            conn.write_msg(&[[i].as_slice()]).unwrap();
        }
        conn.close();
        assert!(conn.is_closed());

        for i in 0..3u8 {
            assert_eq!(parser.read_frame(&mut server).unwrap().as_ref(), &[i]);
        }
        let err = parser.read_frame(&mut server).unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_write_after_close() {
        let (client, _server) = pair();
        let conn = TcpConn::new(client, 4, MsgParser::default()).unwrap();
        conn.close();

        assert!(matches!(
            conn.write_msg(&[b"late".as_slice()]),
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_destroy_unblocks_reader() {
        let (client, _server) = pair();
        let conn = TcpConn::new(client, 4, MsgParser::default()).unwrap();

        let reader = conn.clone();
        let handle = thread::spawn(move || reader.read_msg());

        conn.destroy();
        assert!(handle.join().unwrap().is_err());
        assert!(conn.is_closed());
    }

    #[test]
    fn test_oversized_write_rejected() {
        let (client, _server) = pair();
        let parser = MsgParser::default().with_msg_len(1, 4);
        let conn = TcpConn::new(client, 4, parser).unwrap();

        assert!(matches!(
            conn.write_msg(&[b"too long".as_slice()]),
            Err(Error::MessageTooLong { len: 8, max: 4 })
        ));
        assert!(!conn.is_closed());
    }
}
