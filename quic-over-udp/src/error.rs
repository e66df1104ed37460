//! Error taxonomy.
//!
//! Transient transport faults (a malformed datagram, one failed send) are
//! handled inside the connection and never reach the application.  Only
//! terminal faults surface, through [`ConnectError`], [`WriteError`] and
//! [`ReadError`].

use std::io;

use thiserror::Error;

use crate::packet::StreamId;

/// A datagram that could not be decoded.  It is dropped without affecting the
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("datagram truncated")]
    Truncated,
    #[error("packet carries no frames")]
    EmptyPacket,
    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),
    #[error("stream id {0} out of range")]
    InvalidStreamId(u32),
    #[error("ack range is empty or out of order")]
    InvalidAckRange,
    #[error("invalid value in field `{0}`")]
    InvalidField(&'static str),
    #[error("{0} trailing bytes after the last frame")]
    TrailingBytes(usize),
    #[error("checksum verification failed")]
    ChecksumFailed,
}

/// Failures of the underlying datagram primitive.
#[derive(Debug, Error)]
pub enum DatagramError {
    #[error("failed to bind socket: {0}")]
    Bind(#[source] io::Error),
    #[error("datagram send failed: {0}")]
    Send(#[source] io::Error),
    #[error("datagram receive failed: {0}")]
    Recv(#[source] io::Error),
    #[error("timed out waiting for a datagram")]
    Timeout,
}

/// Terminal connection faults.  Cloned into every pending operation when the
/// connection dies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("handshake failed after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },
    #[error("connection lost: retransmission budget exhausted")]
    ConnectionLost,
    #[error("connection reset by peer (code {code})")]
    Reset { code: u32 },
    #[error("no packets from peer within the idle timeout")]
    IdleTimeout,
    #[error("connection closed locally")]
    LocallyClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_datagram_size {0} too small to carry a data frame")]
    DatagramTooSmall(usize),
    #[error("max_datagram_size {0} exceeds the UDP payload limit")]
    DatagramTooLarge(usize),
    #[error("initial_cwnd must hold at least one full datagram")]
    CwndTooSmall,
    #[error("max_cwnd must not be below initial_cwnd")]
    CwndCeilingTooLow,
    #[error("min_rto must be non-zero and not above max_rto")]
    RtoBounds,
    #[error("rto_backoff must be at least 1")]
    Backoff,
    #[error("fast_retransmit_threshold must be at least 1")]
    FastRetransmitThreshold,
    #[error("stream_receive_window must be non-zero")]
    ReceiveWindow,
    #[error("stream_frame_size must be a non-empty range above zero")]
    FrameSize,
    #[error("tick_interval must be non-zero")]
    TickInterval,
}

/// `connect` / `accept` never reached `Established`.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Datagram(#[from] DatagramError),
    #[error("handshake did not complete: {0}")]
    Handshake(#[source] ConnectionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("connection is not established yet")]
    NotConnected,
    #[error("connection is closing or closed")]
    Closed,
    #[error("unknown stream {0}")]
    UnknownStream(StreamId),
    #[error("stream {0} already finished")]
    StreamFinished(StreamId),
    #[error("no stream ids left to open")]
    StreamsExhausted,
    #[error("stream {stream_id} was reset (code {code})")]
    StreamReset { stream_id: StreamId, code: u32 },
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("unknown stream {0}")]
    UnknownStream(StreamId),
    #[error("stream {stream_id} was reset (code {code})")]
    StreamReset { stream_id: StreamId, code: u32 },
    #[error("connection closed before the stream finished")]
    Closed,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
