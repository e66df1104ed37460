//! `quic-over-udp` is a QUIC-like reliable multi-stream transport over UDP.
//!
//! # Architecture
//!
//! ```text
//!   application ──write──▶ ┌─────────┐ ◀──read── application
//!                          │ Session │  async API, suspends on credit/data
//!                          └────┬────┘
//!                               │ one mutex
//!  ┌────────────────────────────▼─────────────────────────────────┐
//!  │                    Connection (sans-I/O)                     │
//!  │  state machine ─ StreamMap (mux/demux) ─ Stream reassembly   │
//!  │  Recovery (RTO + fast retransmit) ─ CongestionController     │
//!  └────────────────────────────┬─────────────────────────────────┘
//!                               │ encoded packets
//!                       ┌───────▼──────┐
//!                       │ driver task  │  select!: recv / tick / wake
//!                       └───────┬──────┘
//!                               │ raw datagrams
//!            ┌──────────────────▼─────────────────┐
//!            │ DatagramSocket: Socket | Simulator │
//!            └────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format (serialise / deserialise)
//! - [`range_set`]: sorted disjoint ranges for ACKs and acked bytes
//! - [`reassembly`]: out-of-order byte ranges to an in-order stream
//! - [`rtt`]: smoothed RTT and retransmission timeout
//! - [`recovery`]: in-flight packets and loss detection
//! - [`congestion`]: slow start / congestion avoidance window
//! - [`flow`]: per-stream flow-control credit
//! - [`stream`]: per-stream send and receive halves
//! - [`mux`]: stream table, frame packing and routing
//! - [`state`]: connection phases
//! - [`connection`]: the protocol core
//! - [`session`]: async API and driver task
//! - [`socket`]: async datagram socket abstraction
//! - [`simulator`]: lossy/reordering network layer for testing
//! - [`stats`]: transfer statistics
//! - [`config`]: transport parameters
//! - [`error`]: error types

pub mod config;
pub mod congestion;
pub mod connection;
pub mod error;
pub mod flow;
pub mod mux;
pub mod packet;
pub mod range_set;
pub mod reassembly;
pub mod recovery;
pub mod rtt;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod stats;
pub mod stream;

pub use config::Config;
pub use connection::Connection;
pub use error::{ConnectError, ConnectionError, ReadError, WriteError};
pub use session::Session;
