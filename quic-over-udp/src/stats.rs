//! Transfer statistics.
//!
//! Counters are updated by the connection as packets move and can be
//! snapshotted at any time via `Session::stats`.  Rates are computed over the
//! interval between the first and last packet that touched a stream.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::packet::{Frame, StreamId};

/// Receive-side counters for one stream.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    /// Packets carrying at least one frame of this stream.
    pub packets: u64,
    pub frames: u64,
    /// Encoded size of this stream's frames.
    pub wire_bytes: u64,
    pub payload_bytes: u64,
    pub first_seen: Option<Instant>,
    pub last_seen: Option<Instant>,
}

impl StreamStats {
    pub fn elapsed(&self) -> Duration {
        match (self.first_seen, self.last_seen) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            _ => Duration::ZERO,
        }
    }

    /// Payload bytes per second.
    pub fn data_rate(&self) -> f64 {
        rate(self.payload_bytes, self.elapsed())
    }

    /// Packets per second.
    pub fn packet_rate(&self) -> f64 {
        rate(self.packets, self.elapsed())
    }

    fn touch(&mut self, now: Instant) {
        self.first_seen.get_or_insert(now);
        self.last_seen = Some(now);
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub frames_received: u64,
    pub payload_received: u64,
    /// Frames re-queued after their packet was declared lost.
    pub retransmitted_frames: u64,
    pub lost_packets: u64,
    pub loss_episodes: u64,
    pub duplicate_packets: u64,
    pub malformed_packets: u64,
    /// Latest smoothed RTT, once a sample exists.
    pub smoothed_rtt: Option<Duration>,
    pub first_received: Option<Instant>,
    pub last_received: Option<Instant>,
    pub streams: BTreeMap<StreamId, StreamStats>,
}

impl ConnectionStats {
    pub fn elapsed(&self) -> Duration {
        match (self.first_received, self.last_received) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            _ => Duration::ZERO,
        }
    }

    pub fn data_rate(&self) -> f64 {
        rate(self.payload_received, self.elapsed())
    }

    pub fn packet_rate(&self) -> f64 {
        rate(self.packets_received, self.elapsed())
    }

    pub(crate) fn on_sent(&mut self, len: usize) {
        self.packets_sent += 1;
        self.bytes_sent += len as u64;
    }

    pub(crate) fn on_received(&mut self, now: Instant, len: usize, frames: &[Frame]) {
        self.packets_received += 1;
        self.bytes_received += len as u64;
        self.frames_received += frames.len() as u64;
        self.first_received.get_or_insert(now);
        self.last_received = Some(now);

        let mut touched: Vec<StreamId> = Vec::new();
        for frame in frames {
            if let Frame::Data {
                stream_id, payload, ..
            } = frame
            {
                let stream = self.streams.entry(*stream_id).or_default();
                stream.frames += 1;
                stream.wire_bytes += frame.encoded_len() as u64;
                stream.payload_bytes += payload.len() as u64;
                stream.touch(now);
                self.payload_received += payload.len() as u64;
                if !touched.contains(stream_id) {
                    touched.push(*stream_id);
                    stream.packets += 1;
                }
            }
        }
    }
}

impl fmt::Display for ConnectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, s) in &self.streams {
            writeln!(f, "stream {id}:")?;
            writeln!(f, "  payload bytes:  {}", s.payload_bytes)?;
            writeln!(f, "  wire bytes:     {}", s.wire_bytes)?;
            writeln!(f, "  frames:         {}", s.frames)?;
            writeln!(f, "  packets:        {}", s.packets)?;
            writeln!(f, "  elapsed:        {:.3}s", s.elapsed().as_secs_f64())?;
            writeln!(f, "  data rate:      {:.1} B/s", s.data_rate())?;
            writeln!(f, "  packet rate:    {:.1} pkt/s", s.packet_rate())?;
        }
        writeln!(f, "connection:")?;
        writeln!(
            f,
            "  sent:           {} packets, {} bytes",
            self.packets_sent, self.bytes_sent
        )?;
        writeln!(
            f,
            "  received:       {} packets, {} bytes, {} frames",
            self.packets_received, self.bytes_received, self.frames_received
        )?;
        writeln!(
            f,
            "  lost:           {} packets in {} episodes, {} frames resent",
            self.lost_packets, self.loss_episodes, self.retransmitted_frames
        )?;
        writeln!(
            f,
            "  dropped:        {} duplicate, {} malformed",
            self.duplicate_packets, self.malformed_packets
        )?;
        if let Some(rtt) = self.smoothed_rtt {
            writeln!(f, "  smoothed rtt:   {:.1} ms", rtt.as_secs_f64() * 1000.0)?;
        }
        writeln!(f, "  data rate:      {:.1} B/s", self.data_rate())?;
        write!(f, "  packet rate:    {:.1} pkt/s", self.packet_rate())
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_stream_counters_split_by_frame() {
        let t0 = Instant::now();
        let mut stats = ConnectionStats::default();
        let frames = vec![
            Frame::Data {
                stream_id: 1,
                offset: 0,
                fin: false,
                payload: vec![0; 100],
            },
            Frame::Data {
                stream_id: 1,
                offset: 100,
                fin: false,
                payload: vec![0; 50],
            },
            Frame::Data {
                stream_id: 2,
                offset: 0,
                fin: true,
                payload: vec![0; 10],
            },
            Frame::Ack { ranges: vec![0..1] },
        ];
        stats.on_received(t0, 400, &frames);
        stats.on_received(t0 + Duration::from_secs(2), 50, &frames[2..3]);

        let one = &stats.streams[&1];
        assert_eq!((one.packets, one.frames, one.payload_bytes), (1, 2, 150));
        let two = &stats.streams[&2];
        assert_eq!((two.packets, two.frames, two.payload_bytes), (2, 2, 20));
        assert_eq!(two.data_rate(), 10.0);
        assert_eq!(stats.frames_received, 5);
        assert_eq!(stats.packet_rate(), 1.0);
    }

    #[test]
    fn rates_are_zero_without_elapsed_time() {
        let stats = ConnectionStats::default();
        assert_eq!(stats.data_rate(), 0.0);
        assert!(stats.to_string().contains("connection:"));
    }
}
