//! Async queue-backed TCP connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::MsgParser;
use crate::codec_async::read_frame_async;
use crate::error::{Error, Result};

enum Outbound {
    Frame(Bytes),
    Close,
}

struct Inner {
    reader: tokio::sync::Mutex<BufReader<OwnedReadHalf>>,
    queue: Mutex<Option<mpsc::Sender<Outbound>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    closed: watch::Sender<bool>,
    parser: MsgParser,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

/// An async framed TCP connection with a bounded outbound queue.
///
/// Must be created inside a tokio runtime. Cloning yields another handle to
/// the same connection.
#[derive(Clone)]
pub struct AsyncTcpConn {
    inner: Arc<Inner>,
}

impl AsyncTcpConn {
    /// Wrap a connected stream, spawning its writer task.
    pub fn new(stream: TcpStream, pending_write_num: usize, parser: MsgParser) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let (tx, rx) = mpsc::channel(pending_write_num.max(1));
        let writer = tokio::spawn(write_loop(write_half, rx));
        let (closed, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                reader: tokio::sync::Mutex::new(BufReader::new(read_half)),
                queue: Mutex::new(Some(tx)),
                writer: Mutex::new(Some(writer)),
                closed,
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
        *self.inner.closed.borrow()
    }

    /// Read the next frame body.
    ///
    /// Resolves to [`Error::ConnectionClosed`] as soon as the connection is
    /// destroyed, even while waiting for data.
    pub async fn read_msg(&self) -> Result<Bytes> {
        let closed = self.inner.closed.subscribe();
        let mut reader = self.inner.reader.lock().await;

        tokio::select! {
            frame = read_frame_async(&self.inner.parser, &mut *reader) => frame,
            () = wait_closed(closed) => Err(Error::ConnectionClosed),
        }
    }

    /// Queue the concatenation of `parts` as one frame.
    pub fn write_msg(&self, parts: &[&[u8]]) -> Result<()> {
        let frame = self.inner.parser.encode_frame(parts)?;
        self.write(frame)
    }

    /// Queue an already encoded frame without waiting.
    pub fn write(&self, frame: Bytes) -> Result<()> {
        let mut queue = self.inner.queue.lock();
        let Some(tx) = queue.as_ref() else {
            return Err(Error::ConnectionClosed);
        };

        match tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(peer = %self.inner.peer_addr, "write queue full, closing connection");
                *queue = None;
                drop(queue);
                self.abort_writer();
                Err(Error::ConnectionClosed)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                *queue = None;
                self.inner.closed.send_replace(true);
                Err(Error::ConnectionClosed)
            }
        }
    }

    /// Close gracefully: frames already queued are written first.
    pub async fn close(&self) {
        let tx = self.inner.queue.lock().take();
        let Some(tx) = tx else {
            return;
        };
        self.inner.closed.send_replace(true);

        if tx.send(Outbound::Close).await.is_err() {
            self.abort_writer();
        }
    }

    /// Close immediately, discarding queued frames.
    pub fn destroy(&self) {
        self.inner.queue.lock().take();
        self.abort_writer();
    }

    fn abort_writer(&self) {
        self.inner.closed.send_replace(true);
        if let Some(writer) = self.inner.writer.lock().take() {
            writer.abort();
        }
    }
}

impl std::fmt::Debug for AsyncTcpConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTcpConn")
            .field("local_addr", &self.inner.local_addr)
            .field("peer_addr", &self.inner.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|c| *c).await;
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(Outbound::Frame(frame)) = rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            debug!(error = %e, "write failed, stopping writer");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
