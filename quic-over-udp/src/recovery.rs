//! Loss detection and retransmission bookkeeping.
//!
//! Every ack-eliciting packet is registered here as a [`SentPacket`] until it
//! is acknowledged or declared lost.  Two independent detectors declare loss:
//!
//! - **timeout**: the packet has been outstanding longer than the RTO, backed
//!   off once per prior retransmission of its contents;
//! - **ACK gap**: `fast_retransmit_threshold` packets sent after it have been
//!   acknowledged while it has not.
//!
//! Lost packets are handed back to the connection, which re-queues their
//! frames under fresh packet numbers.  The old record is retired here.

use std::collections::BTreeMap;
use std::ops::Range;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::packet::Frame;
use crate::rtt::RttEstimator;

/// A frame that must reach the peer, tagged with how many times its contents
/// have already been retransmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub frame: Frame,
    pub attempt: u32,
}

impl SentFrame {
    pub fn new(frame: Frame) -> Self {
        Self { frame, attempt: 0 }
    }
}

/// In-flight record for one packet.
#[derive(Debug, Clone)]
pub struct SentPacket {
    pub packet_seq: u64,
    pub sent_at: Instant,
    /// Encoded size, counted against the congestion window.
    pub size: usize,
    pub frames: Vec<SentFrame>,
    /// Packets sent later that have since been acknowledged.
    later_acks: u32,
}

impl SentPacket {
    pub fn new(packet_seq: u64, sent_at: Instant, size: usize, frames: Vec<SentFrame>) -> Self {
        Self {
            packet_seq,
            sent_at,
            size,
            frames,
            later_acks: 0,
        }
    }

    /// Highest retransmission count among the carried frames.
    pub fn attempt(&self) -> u32 {
        self.frames.iter().map(|f| f.attempt).max().unwrap_or(0)
    }
}

/// Why a packet was declared lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    Gap,
    Timeout,
}

#[derive(Debug, Default)]
pub struct AckOutcome {
    pub acked: Vec<SentPacket>,
    pub lost: Vec<SentPacket>,
    pub rtt_sample: Option<Duration>,
}

#[derive(Debug)]
pub struct Recovery {
    in_flight: BTreeMap<u64, SentPacket>,
    bytes_in_flight: usize,
    rtt: RttEstimator,
    threshold: u32,
    largest_acked: Option<u64>,
}

impl Recovery {
    pub fn new(config: &Config) -> Self {
        Self {
            in_flight: BTreeMap::new(),
            bytes_in_flight: 0,
            rtt: RttEstimator::new(config),
            threshold: config.fast_retransmit_threshold,
            largest_acked: None,
        }
    }

    pub fn on_send(&mut self, packet: SentPacket) {
        log::trace!(
            "[recovery] in flight seq={} size={} attempt={}",
            packet.packet_seq,
            packet.size,
            packet.attempt()
        );
        self.bytes_in_flight += packet.size;
        self.in_flight.insert(packet.packet_seq, packet);
    }

    /// Retire every packet covered by `ranges` and run gap-based detection.
    pub fn on_ack(&mut self, ranges: &[Range<u64>], now: Instant) -> AckOutcome {
        let mut outcome = AckOutcome::default();

        for range in ranges {
            let seqs: Vec<u64> = self.in_flight.range(range.clone()).map(|(&s, _)| s).collect();
            for seq in seqs {
                if let Some(packet) = self.in_flight.remove(&seq) {
                    self.bytes_in_flight -= packet.size;
                    outcome.acked.push(packet);
                }
            }
        }
        if outcome.acked.is_empty() {
            return outcome;
        }
        outcome.acked.sort_by_key(|p| p.packet_seq);

        // Only first transmissions give unambiguous samples.
        if let Some(newest) = outcome.acked.last() {
            self.largest_acked = self.largest_acked.max(Some(newest.packet_seq));
            if newest.attempt() == 0 {
                let sample = now.saturating_duration_since(newest.sent_at);
                self.rtt.on_sample(sample);
                outcome.rtt_sample = Some(sample);
            }
        }

        let acked_seqs: Vec<u64> = outcome.acked.iter().map(|p| p.packet_seq).collect();
        let newest = acked_seqs[acked_seqs.len() - 1];
        let mut lost = Vec::new();
        for (&seq, packet) in self.in_flight.range_mut(..newest) {
            let later = acked_seqs.len() - acked_seqs.partition_point(|&s| s <= seq);
            packet.later_acks += later as u32;
            if packet.later_acks >= self.threshold {
                lost.push(seq);
            }
        }
        outcome.lost = self.retire(lost);
        if !outcome.lost.is_empty() {
            log::debug!(
                "[recovery] {} packet(s) lost by ack gap, first seq={}",
                outcome.lost.len(),
                outcome.lost[0].packet_seq
            );
        }
        outcome
    }

    /// Declare lost every packet whose backed-off RTO has expired.
    pub fn tick(&mut self, now: Instant) -> Vec<SentPacket> {
        let expired: Vec<u64> = self
            .in_flight
            .values()
            .filter(|p| now >= p.sent_at + self.rtt.backed_off(p.attempt()))
            .map(|p| p.packet_seq)
            .collect();
        let lost = self.retire(expired);
        if !lost.is_empty() {
            log::debug!(
                "[recovery] {} packet(s) timed out, rto={:?}",
                lost.len(),
                self.rtt.rto()
            );
        }
        lost
    }

    /// Earliest instant at which [`tick`](Self::tick) would find a loss.
    pub fn next_timeout(&self) -> Option<Instant> {
        self.in_flight
            .values()
            .map(|p| p.sent_at + self.rtt.backed_off(p.attempt()))
            .min()
    }

    /// Forget every record; used when the connection terminates.
    pub fn clear(&mut self) {
        self.in_flight.clear();
        self.bytes_in_flight = 0;
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }

    pub fn packets_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    fn retire(&mut self, seqs: Vec<u64>) -> Vec<SentPacket> {
        let mut retired = Vec::with_capacity(seqs.len());
        for seq in seqs {
            if let Some(packet) = self.in_flight.remove(&seq) {
                self.bytes_in_flight -= packet.size;
                retired.push(packet);
            }
        }
        retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            initial_rto: Duration::from_millis(100),
            min_rto: Duration::from_millis(10),
            fast_retransmit_threshold: 3,
            ..Config::default()
        }
    }

    fn fin_packet(seq: u64, at: Instant, attempt: u32) -> SentPacket {
        SentPacket::new(
            seq,
            at,
            100,
            vec![SentFrame {
                frame: Frame::Fin,
                attempt,
            }],
        )
    }

    #[test]
    fn ack_retires_packets_and_releases_bytes() {
        let t0 = Instant::now();
        let mut rec = Recovery::new(&config());
        for seq in 0..3 {
            rec.on_send(fin_packet(seq, t0, 0));
        }
        assert_eq!(rec.bytes_in_flight(), 300);

        let outcome = rec.on_ack(&[0..2], t0 + Duration::from_millis(20));
        assert_eq!(outcome.acked.len(), 2);
        assert!(outcome.lost.is_empty());
        assert_eq!(outcome.rtt_sample, Some(Duration::from_millis(20)));
        assert_eq!(rec.bytes_in_flight(), 100);
    }

    #[test]
    fn three_later_acks_declare_gap_loss() {
        let t0 = Instant::now();
        let mut rec = Recovery::new(&config());
        for seq in 0..5 {
            rec.on_send(fin_packet(seq, t0, 0));
        }

        let outcome = rec.on_ack(&[1..3], t0);
        assert!(outcome.lost.is_empty());

        // Third later packet acknowledged: seq 0 is now lost.
        let outcome = rec.on_ack(&[3..4], t0);
        assert_eq!(outcome.lost.len(), 1);
        assert_eq!(outcome.lost[0].packet_seq, 0);
        assert_eq!(rec.packets_in_flight(), 1);
    }

    #[test]
    fn duplicate_ack_does_not_count_twice() {
        let t0 = Instant::now();
        let mut rec = Recovery::new(&config());
        for seq in 0..3 {
            rec.on_send(fin_packet(seq, t0, 0));
        }
        rec.on_ack(&[1..3], t0);
        let outcome = rec.on_ack(&[1..3], t0);
        assert!(outcome.acked.is_empty());
        assert!(outcome.lost.is_empty());
        assert_eq!(rec.packets_in_flight(), 1);
    }

    #[test]
    fn timeout_detects_loss_after_rto() {
        let t0 = Instant::now();
        let mut rec = Recovery::new(&config());
        rec.on_send(fin_packet(0, t0, 0));

        assert!(rec.tick(t0 + Duration::from_millis(99)).is_empty());
        let lost = rec.tick(t0 + Duration::from_millis(100));
        assert_eq!(lost.len(), 1);
        assert_eq!(rec.bytes_in_flight(), 0);
    }

    #[test]
    fn retransmitted_contents_wait_longer() {
        let t0 = Instant::now();
        let mut rec = Recovery::new(&config());
        rec.on_send(fin_packet(0, t0, 2));

        assert_eq!(rec.next_timeout(), Some(t0 + Duration::from_millis(400)));
        assert!(rec.tick(t0 + Duration::from_millis(399)).is_empty());
        assert_eq!(rec.tick(t0 + Duration::from_millis(400)).len(), 1);
    }

    #[test]
    fn retransmission_yields_no_rtt_sample() {
        let t0 = Instant::now();
        let mut rec = Recovery::new(&config());
        rec.on_send(fin_packet(0, t0, 1));
        let outcome = rec.on_ack(&[0..1], t0 + Duration::from_millis(500));
        assert_eq!(outcome.acked.len(), 1);
        assert_eq!(outcome.rtt_sample, None);
        assert_eq!(rec.rtt().smoothed(), None);
    }
}
