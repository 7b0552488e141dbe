//! Client pool configuration.

use std::time::Duration;

use tracing::warn;

use crate::codec::MsgParser;
use crate::error::{Error, Result};

/// Default number of connections per pool.
pub const DEFAULT_CONN_NUM: usize = 1;

/// Default pause between failed dial attempts.
pub const DEFAULT_CONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Default outbound queue depth per connection.
pub const DEFAULT_PENDING_WRITE_NUM: usize = 100;

/// Default timeout for a single dial attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client pool configuration.
///
/// Zero values for `conn_num`, `connect_interval`, `pending_write_num` and
/// `connect_timeout` are replaced by their defaults when the pool starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Remote address, anything `ToSocketAddrs` accepts (`host:port`).
    pub addr: String,
    /// Number of connections to open.
    pub conn_num: usize,
    /// Fixed pause between failed dial attempts.
    pub connect_interval: Duration,
    /// Outbound queue depth per connection.
    pub pending_write_num: usize,
    /// Timeout for a single dial attempt.
    pub connect_timeout: Duration,
    /// Frame codec for every connection.
    pub parser: MsgParser,
}

impl ClientConfig {
    /// Create a configuration for `addr` with default tunables.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn_num: DEFAULT_CONN_NUM,
            connect_interval: DEFAULT_CONNECT_INTERVAL,
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            parser: MsgParser::default(),
        }
    }

    /// Set the number of connections.
    pub fn with_conn_num(mut self, conn_num: usize) -> Self {
        self.conn_num = conn_num;
        self
    }

    /// Set the pause between failed dial attempts.
    pub fn with_connect_interval(mut self, interval: Duration) -> Self {
        self.connect_interval = interval;
        self
    }

    /// Set the outbound queue depth.
    pub fn with_pending_write_num(mut self, pending: usize) -> Self {
        self.pending_write_num = pending;
        self
    }

    /// Set the dial timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the frame codec.
    pub fn with_parser(mut self, parser: MsgParser) -> Self {
        self.parser = parser;
        self
    }

    /// Replace zero tunables with defaults and validate the rest.
    ///
    /// Returns the names of the fields that were reset.
    pub fn normalize(&mut self) -> Result<Vec<&'static str>> {
        let mut reset = Vec::new();

        if self.conn_num == 0 {
            self.conn_num = DEFAULT_CONN_NUM;
            warn!(conn_num = self.conn_num, "invalid conn_num, reset to default");
            reset.push("conn_num");
        }
        if self.connect_interval.is_zero() {
            self.connect_interval = DEFAULT_CONNECT_INTERVAL;
            warn!(
                connect_interval = ?self.connect_interval,
                "invalid connect_interval, reset to default"
            );
            reset.push("connect_interval");
        }
        if self.pending_write_num == 0 {
            self.pending_write_num = DEFAULT_PENDING_WRITE_NUM;
            warn!(
                pending_write_num = self.pending_write_num,
                "invalid pending_write_num, reset to default"
            );
            reset.push("pending_write_num");
        }
        if self.connect_timeout.is_zero() {
            self.connect_timeout = DEFAULT_CONNECT_TIMEOUT;
            warn!(
                connect_timeout = ?self.connect_timeout,
                "invalid connect_timeout, reset to default"
            );
            reset.push("connect_timeout");
        }

        if self.addr.trim().is_empty() {
            return Err(Error::config("addr must not be empty"));
        }
        self.parser.validate()?;

        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::LengthField;

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new("127.0.0.1:3563")
            .with_conn_num(4)
            .with_connect_interval(Duration::from_millis(250))
            .with_pending_write_num(16);

        assert_eq!(config.conn_num, 4);
        assert_eq!(config.connect_interval, Duration::from_millis(250));
        assert_eq!(config.pending_write_num, 16);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_normalize_defaults_zero_values() {
        let mut config = ClientConfig::new("127.0.0.1:3563")
            .with_conn_num(0)
            .with_connect_interval(Duration::ZERO)
            .with_pending_write_num(0)
            .with_connect_timeout(Duration::ZERO);

        let reset = config.normalize().unwrap();
        assert_eq!(
            reset,
            vec![
                "conn_num",
                "connect_interval",
                "pending_write_num",
                "connect_timeout"
            ]
        );
        assert_eq!(config.conn_num, DEFAULT_CONN_NUM);
        assert_eq!(config.connect_interval, DEFAULT_CONNECT_INTERVAL);
        assert_eq!(config.pending_write_num, DEFAULT_PENDING_WRITE_NUM);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_normalize_keeps_valid_values() {
        let mut config = ClientConfig::new("localhost:1").with_conn_num(3);
        assert!(config.normalize().unwrap().is_empty());
        assert_eq!(config.conn_num, 3);
    }

    #[test]
    fn test_normalize_rejects_bad_values() {
        let mut config = ClientConfig::new("  ");
        assert!(matches!(config.normalize(), Err(Error::Config(_))));

        let mut config = ClientConfig::new("127.0.0.1:1").with_parser(
            MsgParser::default()
                .with_length_field(LengthField::U8)
                .with_msg_len(512, 1024),
        );
        assert!(matches!(config.normalize(), Err(Error::Config(_))));
    }
}
