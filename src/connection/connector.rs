//! Dial-with-retry against a fixed address.
//!
//! Failed dials are retried forever at a fixed interval. The only way out
//! short of success is a shutdown signal from the owning pool.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{error, warn};

use crate::error::Error;

/// Shutdown signal and retry pacing supplied by the owning pool.
pub(crate) trait DialGate {
    /// Check if shutdown has been signaled.
    fn is_closing(&self) -> bool;

    /// Record a failed attempt and wait `interval`, waking early on shutdown.
    ///
    /// Returns `false` if the dial should be abandoned.
    fn wait_retry(&self, interval: Duration) -> bool;
}

/// Blocking dial parameters for one pool.
#[derive(Debug, Clone)]
pub(crate) struct Connector<'a> {
    pub addr: &'a str,
    pub connect_timeout: Duration,
    pub interval: Duration,
}

impl Connector<'_> {
    /// Dial until a socket is obtained or `gate` signals shutdown.
    pub fn dial<G: DialGate>(&self, gate: &G) -> Option<TcpStream> {
        loop {
            match dial_once(self.addr, self.connect_timeout) {
                Ok(stream) => return Some(stream),
                Err(e) => {
                    if gate.is_closing() {
                        return None;
                    }
                    log_dial_failure(self.addr, &Error::from(e), self.interval);
                    if !gate.wait_retry(self.interval) {
                        return None;
                    }
                }
            }
        }
    }
}

fn log_dial_failure(addr: &str, e: &Error, interval: Duration) {
    if e.is_recoverable() {
        warn!(%addr, error = %e, "connect failed, retrying in {:?}", interval);
    } else {
        error!(%addr, error = %e, "connect failed, retrying in {:?}", interval);
    }
}

/// Resolve `addr` and try each resolved address once.
pub(crate) fn dial_once(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for sock_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sock_addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
    }))
}

#[cfg(feature = "tokio")]
mod async_dial {
    use std::future::Future;
    use std::time::Duration;

    use tokio::net::TcpStream;
    use tokio::time::timeout;

    use crate::error::{Error, Result};

    /// Async counterpart of [`DialGate`](super::DialGate).
    pub(crate) trait AsyncDialGate: Sync {
        fn is_closing(&self) -> bool;

        fn wait_retry(&self, interval: Duration) -> impl Future<Output = bool> + Send;
    }

    /// Async dial parameters for one pool.
    #[derive(Debug, Clone)]
    pub(crate) struct AsyncConnector<'a> {
        pub addr: &'a str,
        pub connect_timeout: Duration,
        pub interval: Duration,
    }

    impl AsyncConnector<'_> {
        /// Dial until a socket is obtained or `gate` signals shutdown.
        pub async fn dial<G: AsyncDialGate>(&self, gate: &G) -> Option<TcpStream> {
            loop {
                match dial_once_async(self.addr, self.connect_timeout).await {
                    Ok(stream) => return Some(stream),
                    Err(e) => {
                        if gate.is_closing() {
                            return None;
                        }
                        super::log_dial_failure(self.addr, &e, self.interval);
                        if !gate.wait_retry(self.interval).await {
                            return None;
                        }
                    }
                }
            }
        }
    }

    pub(crate) async fn dial_once_async(addr: &str, duration: Duration) -> Result<TcpStream> {
        let stream = timeout(duration, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout)??;
        Ok(stream)
    }
}

#[cfg(feature = "tokio")]
pub(crate) use async_dial::{AsyncConnector, AsyncDialGate};

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::net::TcpListener;

    /// Gate that allows a fixed number of retries.
    struct CountingGate {
        retries_left: Cell<u32>,
        waits: Cell<u32>,
    }

    impl DialGate for CountingGate {
        fn is_closing(&self) -> bool {
            self.retries_left.get() == 0
        }

        fn wait_retry(&self, _interval: Duration) -> bool {
            self.waits.set(self.waits.get() + 1);
            self.retries_left.set(self.retries_left.get() - 1);
            true
        }
    }

    fn refused_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[test]
    fn test_dial_success() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let gate = CountingGate {
            retries_left: Cell::new(3),
            waits: Cell::new(0),
        };

        let connector = Connector {
            addr: &addr,
            connect_timeout: Duration::from_secs(1),
            interval: Duration::from_millis(10),
        };
        assert!(connector.dial(&gate).is_some());
        assert_eq!(gate.waits.get(), 0);
    }

    #[test]
    fn test_dial_retries_until_shutdown() {
        let addr = refused_addr();
        let gate = CountingGate {
            retries_left: Cell::new(3),
            waits: Cell::new(0),
        };

        let connector = Connector {
            addr: &addr,
            connect_timeout: Duration::from_secs(1),
            interval: Duration::from_millis(10),
        };
        assert!(connector.dial(&gate).is_none());
        assert_eq!(gate.waits.get(), 3);
    }

    #[test]
    fn test_refused_is_recoverable() {
        let err = dial_once(&refused_addr(), Duration::from_secs(1)).unwrap_err();
        assert!(Error::from(err).is_recoverable());
    }

    #[test]
    fn test_dial_once_bad_address() {
        let err = dial_once("not an address", Duration::from_millis(100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
