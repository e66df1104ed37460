//! Connection-wide congestion window (Reno-style AIMD).
//!
//! One window is shared by every stream.  Below `ssthresh` the window grows by
//! the number of bytes acknowledged (doubling per round trip); above it by one
//! maximum segment per window's worth of ACKs.
//!
//! A loss episode starts with the first loss of a packet sent after the
//! previous episode began.  Each episode halves `ssthresh` exactly once; the
//! window drops to the new threshold on a gap loss and back to its initial
//! value on a timeout.  Neither ever goes below the initial window.

use crate::config::Config;
use crate::recovery::LossKind;

#[derive(Debug, Clone)]
pub struct CongestionController {
    cwnd: usize,
    ssthresh: usize,
    initial_cwnd: usize,
    max_cwnd: usize,
    mss: usize,
    /// Bytes acknowledged since the last additive increase.
    acked_since_increase: usize,
    /// Packets numbered below this belong to the current loss episode.
    recovery_start: Option<u64>,
    loss_episodes: u64,
}

impl CongestionController {
    pub fn new(config: &Config) -> Self {
        Self {
            cwnd: config.initial_cwnd,
            ssthresh: config.initial_ssthresh.max(config.initial_cwnd),
            initial_cwnd: config.initial_cwnd,
            max_cwnd: config.max_cwnd,
            mss: config.max_datagram_size,
            acked_since_increase: 0,
            recovery_start: None,
            loss_episodes: 0,
        }
    }

    /// Whether a packet of `size` bytes fits next to `bytes_in_flight`.
    pub fn can_send(&self, bytes_in_flight: usize, size: usize) -> bool {
        bytes_in_flight + size <= self.cwnd
    }

    /// Grow the window for an acknowledged packet.
    pub fn on_ack(&mut self, packet_seq: u64, bytes: usize) {
        if self.in_recovery(packet_seq) {
            return;
        }

        if self.cwnd < self.ssthresh {
            self.cwnd += bytes;
        } else {
            self.acked_since_increase += bytes;
            if self.acked_since_increase >= self.cwnd {
                self.acked_since_increase -= self.cwnd;
                self.cwnd += self.mss;
            }
        }
        self.cwnd = self.cwnd.min(self.max_cwnd);
    }

    /// React to the loss of `packet_seq`.
    ///
    /// `next_packet_seq` is the number the next new packet will carry; losses
    /// of anything sent before it are folded into the episode started here.
    /// Returns `true` if this loss opened a new episode.
    pub fn on_loss(&mut self, packet_seq: u64, next_packet_seq: u64, kind: LossKind) -> bool {
        if self.in_recovery(packet_seq) {
            return false;
        }

        self.recovery_start = Some(next_packet_seq);
        self.loss_episodes += 1;
        self.ssthresh = (self.cwnd / 2).max(self.initial_cwnd);
        self.cwnd = match kind {
            LossKind::Gap => self.ssthresh,
            LossKind::Timeout => self.initial_cwnd,
        };
        self.acked_since_increase = 0;

        log::debug!(
            "[cc] loss episode #{} ({kind:?}) at seq={packet_seq}: cwnd={} ssthresh={}",
            self.loss_episodes,
            self.cwnd,
            self.ssthresh
        );
        true
    }

    pub fn cwnd(&self) -> usize {
        self.cwnd
    }

    pub fn ssthresh(&self) -> usize {
        self.ssthresh
    }

    pub fn loss_episodes(&self) -> u64 {
        self.loss_episodes
    }

    fn in_recovery(&self, packet_seq: u64) -> bool {
        self.recovery_start.is_some_and(|start| packet_seq < start)
    }
}
