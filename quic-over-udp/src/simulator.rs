//! Fault-injecting network layer for tests and demos.
//!
//! Real networks drop, reorder, duplicate and corrupt packets.  To exercise
//! the reliability machinery without depending on actual network conditions,
//! [`Simulator`] wraps any [`DatagramSocket`] and applies a seeded fault model
//! to every outgoing datagram:
//!
//! | Fault       | Description                                            |
//! |-------------|--------------------------------------------------------|
//! | Drop first  | Silently drop the first `drop_first` datagrams.        |
//! | Packet loss | Drop a datagram with probability `loss_rate`.          |
//! | Reordering  | Hold a datagram back by `reorder_delay` so later ones  |
//! |             | overtake it.                                           |
//! | Duplication | Deliver a datagram twice.                              |
//! | Corruption  | Flip one byte; the checksum must catch it.             |
//!
//! Receives pass straight through, so wrapping both ends gives a symmetric
//! lossy link.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::socket::{DatagramError, DatagramSocket};

/// Configuration for the fault model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is held back.
    pub reorder_rate: f64,
    /// Delay applied to held-back datagrams.
    pub reorder_delay: Duration,
    /// Probability that a datagram is sent twice.
    pub duplicate_rate: f64,
    /// Probability that one byte of a datagram is flipped.
    pub corrupt_rate: f64,
    /// Datagrams dropped unconditionally before the fault model applies.
    pub drop_first: u32,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::from_millis(5),
            duplicate_rate: 0.0,
            corrupt_rate: 0.0,
            drop_first: 0,
            seed: 0,
        }
    }
}

/// What the simulator did to outgoing traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub offered: u64,
    pub dropped: u64,
    pub reordered: u64,
    pub duplicated: u64,
    pub corrupted: u64,
}

#[derive(Debug)]
struct Faults {
    config: SimulatorConfig,
    rng: StdRng,
    stats: SimulatorStats,
}

/// One copy of a datagram to put on the wire.
struct Delivery {
    delay: Option<Duration>,
    corrupt: Option<(usize, u8)>,
}

/// A [`DatagramSocket`] that misbehaves on purpose.
#[derive(Debug)]
pub struct Simulator<S> {
    inner: Arc<S>,
    faults: Mutex<Faults>,
}

impl<S: DatagramSocket> Simulator<S> {
    pub fn new(inner: S, config: SimulatorConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            faults: Mutex::new(Faults {
                rng: StdRng::seed_from_u64(config.seed),
                config,
                stats: SimulatorStats::default(),
            }),
        }
    }

    /// Change the loss probability of a running link.
    pub fn set_loss_rate(&self, rate: f64) {
        self.faults().config.loss_rate = rate.clamp(0.0, 1.0);
    }

    pub fn stats(&self) -> SimulatorStats {
        self.faults().stats.clone()
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Roll the dice for one outgoing datagram of `len` bytes.
    fn plan(&self, len: usize) -> Vec<Delivery> {
        let mut guard = self.faults();
        let Faults { config, rng, stats } = &mut *guard;
        stats.offered += 1;

        if config.drop_first > 0 {
            config.drop_first -= 1;
            stats.dropped += 1;
            log::trace!("[sim] dropped (drop-first, {} left)", config.drop_first);
            return Vec::new();
        }
        if rng.gen::<f64>() < config.loss_rate {
            stats.dropped += 1;
            log::trace!("[sim] dropped");
            return Vec::new();
        }

        let copies = if rng.gen::<f64>() < config.duplicate_rate {
            stats.duplicated += 1;
            2
        } else {
            1
        };
        (0..copies)
            .map(|_| {
                let delay = (rng.gen::<f64>() < config.reorder_rate).then(|| {
                    stats.reordered += 1;
                    config.reorder_delay
                });
                let corrupt = (len > 0 && rng.gen::<f64>() < config.corrupt_rate).then(|| {
                    stats.corrupted += 1;
                    (rng.gen_range(0..len), rng.gen_range(1..=u8::MAX))
                });
                Delivery { delay, corrupt }
            })
            .collect()
    }
}

impl<S: DatagramSocket> DatagramSocket for Simulator<S> {
    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), DatagramError> {
        for delivery in self.plan(datagram.len()) {
            let mut bytes = datagram.to_vec();
            if let Some((pos, mask)) = delivery.corrupt {
                bytes[pos] ^= mask;
            }
            match delivery.delay {
                None => self.inner.send_to(&bytes, dest).await?,
                Some(delay) => {
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Err(e) = inner.send_to(&bytes, dest).await {
                            log::debug!("[sim] delayed send failed: {e}");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), DatagramError> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{recv_with_timeout, Socket};

    async fn ephemeral() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn pass_through_by_default() {
        let sim = Simulator::new(ephemeral().await, SimulatorConfig::default());
        let peer = ephemeral().await;
        sim.send_to(b"hello", peer.local_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = recv_with_timeout(&peer, &mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(sim.stats().dropped, 0);
    }

    #[tokio::test]
    async fn drop_first_swallows_leading_datagrams() {
        let config = SimulatorConfig {
            drop_first: 2,
            ..SimulatorConfig::default()
        };
        let sim = Simulator::new(ephemeral().await, config);
        let peer = ephemeral().await;
        for msg in [b"1st", b"2nd", b"3rd"] {
            sim.send_to(msg, peer.local_addr).await.unwrap();
        }

        let mut buf = [0u8; 16];
        let (n, _) = recv_with_timeout(&peer, &mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"3rd");
        assert_eq!(sim.stats().dropped, 2);
    }

    #[tokio::test]
    async fn full_loss_delivers_nothing() {
        let sim = Simulator::new(ephemeral().await, SimulatorConfig::default());
        sim.set_loss_rate(1.0);
        let peer = ephemeral().await;
        sim.send_to(b"gone", peer.local_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let err = recv_with_timeout(&peer, &mut buf, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, DatagramError::Timeout));
    }

    #[tokio::test]
    async fn duplicates_arrive_twice() {
        let config = SimulatorConfig {
            duplicate_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let sim = Simulator::new(ephemeral().await, config);
        let peer = ephemeral().await;
        sim.send_to(b"twice", peer.local_addr).await.unwrap();

        let mut buf = [0u8; 16];
        for _ in 0..2 {
            let (n, _) = recv_with_timeout(&peer, &mut buf, Duration::from_secs(2))
                .await
                .unwrap();
            assert_eq!(&buf[..n], b"twice");
        }
    }
}
