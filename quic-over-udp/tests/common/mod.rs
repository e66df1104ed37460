//! Deterministic two-endpoint harness.
//!
//! Drives a client and a server [`Connection`] through an in-memory link
//! with seeded loss, duplication and reordering, on a virtual clock that
//! advances one millisecond per step.  No sockets, no real time.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use quic_over_udp::packet::StreamId;
use quic_over_udp::state::ConnectionState;
use quic_over_udp::stream::ReadOutcome;
use quic_over_udp::{Config, Connection};

pub const STEP: Duration = Duration::from_millis(1);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic payload of `len` bytes, distinct per `salt`.
pub fn pattern(len: usize, salt: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(salt))
        .collect()
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub loss: f64,
    pub duplicate: f64,
    /// Datagrams due in the same step are shuffled in groups of this size.
    pub reorder_window: usize,
    pub latency: Duration,
    /// Client-to-server datagrams dropped before the loss model applies.
    pub drop_first: u32,
    pub seed: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            loss: 0.0,
            duplicate: 0.0,
            reorder_window: 1,
            latency: Duration::from_millis(5),
            drop_first: 0,
            seed: 0,
        }
    }
}

#[derive(Default)]
struct Direction {
    in_flight: Vec<(Instant, Vec<u8>)>,
    drop_first: u32,
}

impl Direction {
    fn offer(&mut self, link: &LinkConfig, rng: &mut StdRng, now: Instant, datagram: Vec<u8>) {
        if self.drop_first > 0 {
            self.drop_first -= 1;
            return;
        }
        if rng.gen::<f64>() < link.loss {
            return;
        }
        let at = now + link.latency;
        if rng.gen::<f64>() < link.duplicate {
            self.in_flight.push((at, datagram.clone()));
        }
        self.in_flight.push((at, datagram));
    }

    fn take_due(&mut self, rng: &mut StdRng, now: Instant, window: usize) -> Vec<Vec<u8>> {
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.in_flight = later;
        let mut due: Vec<Vec<u8>> = due.into_iter().map(|(_, d)| d).collect();
        if window > 1 {
            for group in due.chunks_mut(window) {
                group.shuffle(rng);
            }
        }
        due
    }
}

pub struct Harness {
    pub client: Connection,
    pub server: Connection,
    pub now: Instant,
    pub start: Instant,
    link: LinkConfig,
    rng: StdRng,
    to_server: Direction,
    to_client: Direction,
}

impl Harness {
    pub fn new(config: Config, link: LinkConfig) -> Self {
        init_logging();
        let now = Instant::now();
        Self {
            client: Connection::client(config.clone(), now).unwrap(),
            server: Connection::server(config, now).unwrap(),
            now,
            start: now,
            rng: StdRng::seed_from_u64(link.seed),
            to_server: Direction {
                drop_first: link.drop_first,
                ..Direction::default()
            },
            to_client: Direction::default(),
            link,
        }
    }

    pub fn set_loss(&mut self, loss: f64) {
        self.link.loss = loss;
    }

    pub fn elapsed(&self) -> Duration {
        self.now - self.start
    }

    /// Advance the virtual clock by one step.
    pub fn step(&mut self) {
        self.client.handle_timeout(self.now);
        self.server.handle_timeout(self.now);

        while let Some(d) = self.client.poll_transmit(self.now) {
            self.to_server.offer(&self.link, &mut self.rng, self.now, d);
        }
        while let Some(d) = self.server.poll_transmit(self.now) {
            self.to_client.offer(&self.link, &mut self.rng, self.now, d);
        }

        let window = self.link.reorder_window;
        for d in self.to_server.take_due(&mut self.rng, self.now, window) {
            self.server.handle_datagram(self.now, &d);
        }
        for d in self.to_client.take_due(&mut self.rng, self.now, window) {
            self.client.handle_datagram(self.now, &d);
        }

        assert!(self.client.cwnd() <= self.client.config().max_cwnd);
        assert!(self.server.cwnd() <= self.server.config().max_cwnd);
        self.now += STEP;
    }

    /// Step until `done` holds; returns `false` if `max_steps` ran out.
    pub fn run_until(&mut self, mut done: impl FnMut(&mut Self) -> bool, max_steps: usize) -> bool {
        for _ in 0..max_steps {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    pub fn connect(&mut self) {
        self.client.connect(self.now);
        let up = self.run_until(
            |h| {
                h.client.state() == ConnectionState::Established
                    && h.server.state() == ConnectionState::Established
            },
            60_000,
        );
        assert!(up, "handshake did not complete");
    }

    /// Write each payload on its own client stream, `chunk` bytes per stream
    /// per step in turn, while the server reads.  Returns what the server
    /// read, keyed by stream id.
    pub fn transfer(
        &mut self,
        payloads: &[Vec<u8>],
        chunk: usize,
        max_steps: usize,
    ) -> BTreeMap<StreamId, Vec<u8>> {
        let ids: Vec<StreamId> = payloads
            .iter()
            .map(|_| self.client.open_stream().unwrap())
            .collect();
        let mut written = vec![0usize; payloads.len()];
        let mut done = vec![false; payloads.len()];
        let mut received: BTreeMap<StreamId, Vec<u8>> = BTreeMap::new();
        let mut finished = BTreeSet::new();

        for _ in 0..max_steps {
            for (i, &id) in ids.iter().enumerate() {
                if done[i] {
                    continue;
                }
                let data = &payloads[i];
                let end = (written[i] + chunk).min(data.len());
                let n = self
                    .client
                    .write(id, &data[written[i]..end], end == data.len())
                    .unwrap();
                written[i] += n;
                done[i] = written[i] == data.len();
            }

            while let Some(id) = self.server.accept_stream() {
                received.entry(id).or_default();
            }
            for (&id, buf) in received.iter_mut() {
                if finished.contains(&id) {
                    continue;
                }
                loop {
                    match self.server.read(id).unwrap() {
                        ReadOutcome::Data(d) => buf.extend_from_slice(&d),
                        ReadOutcome::Blocked => break,
                        ReadOutcome::Finished => {
                            finished.insert(id);
                            break;
                        }
                    }
                }
            }
            if finished.len() == ids.len() {
                return received;
            }
            self.step();
        }
        panic!(
            "transfer incomplete after {max_steps} steps: {} of {} streams finished",
            finished.len(),
            ids.len()
        );
    }
}
