//! Tunable transport parameters.
//!
//! One [`Config`] is handed to each connection at construction.  Defaults are
//! sized for a LAN or loopback transfer; the CLI overrides a subset.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Largest UDP payload we will ever build or receive.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Smallest datagram that still leaves room for an ACK frame beside data.
pub const MIN_DATAGRAM_SIZE: usize = 256;

/// Address the CLI listens on / connects to when none is given.
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4269;

/// Per-stream frame payload range used when the CLI varies frame sizes.
pub const RANDOM_FRAME_SIZE: RangeInclusive<usize> = 1000..=2000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on an encoded packet, header included.
    pub max_datagram_size: usize,
    /// Congestion window at start and after a timeout.
    pub initial_cwnd: usize,
    /// Hard ceiling on the congestion window.
    pub max_cwnd: usize,
    /// Slow-start threshold before the first loss.
    pub initial_ssthresh: usize,
    /// RTO used before the first RTT sample.
    pub initial_rto: Duration,
    /// RTO floor.
    pub min_rto: Duration,
    /// RTO cap after back-off.
    pub max_rto: Duration,
    /// Multiplier applied to the RTO for each retransmission of the same data.
    pub rto_backoff: u32,
    /// A byte range retransmitted more often than this kills the connection.
    pub max_retransmits: u32,
    /// Later packets that must be acknowledged before a gap counts as loss.
    pub fast_retransmit_threshold: u32,
    /// Per-stream receive buffer credit advertised to the peer.
    pub stream_receive_window: u64,
    /// When set, every stream caps its DATA payloads at a size drawn from
    /// this range when the stream opens.
    pub stream_frame_size: Option<RangeInclusive<usize>>,
    /// First handshake retransmission timeout; doubles per retry.
    pub handshake_timeout: Duration,
    /// Handshake retransmissions before the connect attempt fails.
    pub max_handshake_retries: u32,
    /// How long `Closing` waits for final ACKs, and how long a closed
    /// connection keeps answering the peer.
    pub close_timeout: Duration,
    /// Silence from the peer that fails an established connection.
    pub idle_timeout: Duration,
    /// Timer granularity of the driver task.
    pub tick_interval: Duration,
    /// File sent by the CLI when `--file` is absent.
    pub default_file: PathBuf,
    /// Streams opened by the CLI when `--streams` is absent.
    pub default_stream_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        let max_datagram_size = 1200;
        Self {
            max_datagram_size,
            initial_cwnd: 10 * max_datagram_size,
            max_cwnd: 8 * 1024 * 1024,
            initial_ssthresh: 512 * 1024,
            initial_rto: Duration::from_millis(300),
            min_rto: Duration::from_millis(50),
            max_rto: Duration::from_secs(10),
            rto_backoff: 2,
            max_retransmits: 10,
            fast_retransmit_threshold: 3,
            stream_receive_window: 256 * 1024,
            stream_frame_size: None,
            handshake_timeout: Duration::from_millis(250),
            max_handshake_retries: 5,
            close_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_millis(10),
            default_file: PathBuf::from("inputs/1mb_file.txt"),
            default_stream_count: 3,
        }
    }
}

impl Config {
    /// Reject combinations the connection cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_datagram_size < MIN_DATAGRAM_SIZE {
            return Err(ConfigError::DatagramTooSmall(self.max_datagram_size));
        }
        if self.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(ConfigError::DatagramTooLarge(self.max_datagram_size));
        }
        if self.initial_cwnd < self.max_datagram_size {
            return Err(ConfigError::CwndTooSmall);
        }
        if self.max_cwnd < self.initial_cwnd {
            return Err(ConfigError::CwndCeilingTooLow);
        }
        if self.min_rto.is_zero() || self.min_rto > self.max_rto {
            return Err(ConfigError::RtoBounds);
        }
        if self.rto_backoff == 0 {
            return Err(ConfigError::Backoff);
        }
        if self.fast_retransmit_threshold == 0 {
            return Err(ConfigError::FastRetransmitThreshold);
        }
        if self.stream_receive_window == 0 {
            return Err(ConfigError::ReceiveWindow);
        }
        if self
            .stream_frame_size
            .as_ref()
            .is_some_and(|r| r.is_empty() || *r.start() == 0)
        {
            return Err(ConfigError::FrameSize);
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::TickInterval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{DATA_FRAME_OVERHEAD, HEADER_LEN};

    #[test]
    fn defaults_are_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn cwnd_must_hold_a_datagram() {
        let config = Config {
            initial_cwnd: 100,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::CwndTooSmall));
    }

    #[test]
    fn tiny_datagram_rejected() {
        let config = Config {
            max_datagram_size: HEADER_LEN + DATA_FRAME_OVERHEAD,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DatagramTooSmall(_))
        ));
    }

    #[test]
    fn rto_floor_above_cap_rejected() {
        let config = Config {
            min_rto: Duration::from_secs(20),
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::RtoBounds));
    }

    #[test]
    #[allow(clippy::reversed_empty_ranges)]
    fn frame_size_range_must_be_usable() {
        for range in [0..=10, 2000..=1000] {
            let config = Config {
                stream_frame_size: Some(range),
                ..Config::default()
            };
            assert_eq!(config.validate(), Err(ConfigError::FrameSize));
        }
        let config = Config {
            stream_frame_size: Some(RANDOM_FRAME_SIZE),
            ..Config::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }
}
