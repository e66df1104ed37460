//! Async application API over one [`Connection`].
//!
//! A [`Session`] shares the sans-I/O core with a background driver task
//! through one mutex.  The driver multiplexes three event sources with
//! `tokio::select!`:
//!
//! 1. datagrams arriving on the socket,
//! 2. the periodic timer tick (handshake, RTO, idle and close timers),
//! 3. wake-ups from application calls that queued something to send.
//!
//! After each event it flushes every datagram the core is willing to send
//! and notifies suspended application calls, which then re-check their
//! condition under the lock.  Terminal states wake every waiter, so no
//! suspended read or write outlives the connection.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::config::{Config, MAX_UDP_PAYLOAD};
use crate::connection::Connection;
use crate::error::{ConnectError, ConnectionError, ReadError, WriteError};
use crate::packet::StreamId;
use crate::socket::DatagramSocket;
use crate::state::ConnectionState;
use crate::stats::ConnectionStats;
use crate::stream::ReadOutcome;

#[derive(Debug)]
struct Shared {
    conn: Mutex<Connection>,
    /// Signalled by the driver after every event.
    changed: Notify,
    /// Signalled by the application after queueing work for the driver.
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owns the driver task.  Dropping the last session stops the driver unless
/// it is lingering after an orderly close.
#[derive(Debug)]
struct DriverHandle {
    task: JoinHandle<()>,
    shared: Arc<Shared>,
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        if self.shared.lock().state() != ConnectionState::Closed {
            self.task.abort();
        }
    }
}

/// A connection plus the task that drives it.  Cheap to clone; clones share
/// the same connection.
#[derive(Debug, Clone)]
pub struct Session {
    shared: Arc<Shared>,
    peer: SocketAddr,
    local: SocketAddr,
    _driver: Arc<DriverHandle>,
}

impl Session {
    /// Actively open a connection to `peer` and wait for the handshake.
    pub async fn connect<S: DatagramSocket>(
        socket: S,
        peer: SocketAddr,
        config: Config,
    ) -> Result<Self, ConnectError> {
        let now = Instant::now();
        let mut conn = Connection::client(config, now)?;
        conn.connect(now);
        log::info!("[session] connecting to {peer}");

        let session = Self::spawn(socket, peer, conn);
        session
            .wait_for(|conn| match conn.state() {
                ConnectionState::Idle | ConnectionState::Handshaking => None,
                ConnectionState::Failed | ConnectionState::Closed => Some(Err(
                    ConnectError::Handshake(terminal_error(conn)),
                )),
                _ => Some(Ok(())),
            })
            .await?;
        Ok(session)
    }

    /// Wait for a peer's handshake on `socket` and complete it.
    pub async fn accept<S: DatagramSocket>(socket: S, config: Config) -> Result<Self, ConnectError> {
        let mut conn = Connection::server(config, Instant::now())?;
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        log::info!("[session] waiting for a peer on {}", socket.local_addr());

        let peer = loop {
            let (n, from) = socket.recv_from(&mut buf).await?;
            conn.handle_datagram(Instant::now(), &buf[..n]);
            if conn.state() == ConnectionState::Established {
                break from;
            }
        };
        log::info!("[session] accepted {peer}");
        Ok(Self::spawn(socket, peer, conn))
    }

    fn spawn<S: DatagramSocket>(socket: S, peer: SocketAddr, conn: Connection) -> Self {
        let local = socket.local_addr();
        let shared = Arc::new(Shared {
            conn: Mutex::new(conn),
            changed: Notify::new(),
            wake: Notify::new(),
        });
        let task = tokio::spawn(drive(Arc::new(socket), peer, Arc::clone(&shared)));
        Self {
            _driver: Arc::new(DriverHandle {
                task,
                shared: Arc::clone(&shared),
            }),
            shared,
            peer,
            local,
        }
    }

    /// Re-evaluate `poll` under the lock after every driver event until it
    /// yields a value.
    async fn wait_for<T>(&self, mut poll: impl FnMut(&mut Connection) -> Option<T>) -> T {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let ready = poll(&mut self.shared.lock());
            if let Some(value) = ready {
                return value;
            }
            notified.await;
        }
    }

    fn kick(&self) {
        self.shared.wake.notify_one();
    }

    pub fn open_stream(&self) -> Result<StreamId, WriteError> {
        self.shared.lock().open_stream()
    }

    /// Next stream the peer opened, or `None` once the peer has finished
    /// (or the connection has ended) and every opened stream has been
    /// handed out.
    pub async fn accept_stream(&self) -> Option<StreamId> {
        self.wait_for(|conn| match conn.accept_stream() {
            Some(id) => Some(Some(id)),
            None if conn.is_peer_finished() || conn.state().is_terminal() => Some(None),
            None => None,
        })
        .await
    }

    /// Write all of `data`, suspending while flow or congestion credit is
    /// exhausted.  `fin` ends the stream after the last byte.
    pub async fn write(&self, stream_id: StreamId, data: &[u8], fin: bool) -> Result<(), WriteError> {
        let mut written = 0;
        loop {
            let n = self
                .wait_for(|conn| match conn.write(stream_id, &data[written..], fin) {
                    Ok(0) if written < data.len() => None,
                    other => Some(other),
                })
                .await?;
            written += n;
            self.kick();
            if written == data.len() {
                return Ok(());
            }
        }
    }

    /// Next chunk of in-order bytes, or `None` at the end of the stream.
    pub async fn read(&self, stream_id: StreamId) -> Result<Option<Vec<u8>>, ReadError> {
        let outcome = self
            .wait_for(|conn| match conn.read(stream_id) {
                Ok(ReadOutcome::Blocked) => None,
                other => Some(other),
            })
            .await?;
        match outcome {
            ReadOutcome::Data(data) => {
                self.kick();
                Ok(Some(data))
            }
            _ => Ok(None),
        }
    }

    /// Read until the peer's FIN.
    pub async fn read_to_end(&self, stream_id: StreamId) -> Result<Vec<u8>, ReadError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read(stream_id).await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    pub fn reset_stream(&self, stream_id: StreamId, code: u32) -> Result<(), WriteError> {
        self.shared.lock().reset_stream(stream_id, code)?;
        self.kick();
        self.shared.changed.notify_waiters();
        Ok(())
    }

    /// Finish every stream and wait until both sides are done: the peer has
    /// acknowledged everything we sent and sent its own FIN, or the close
    /// timeout has passed.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        self.shared.lock().close(Instant::now());
        self.kick();
        self.shared.changed.notify_waiters();
        self.closed().await
    }

    /// Fail the connection at once and tell the peer.
    pub fn abort(&self, code: u32) {
        self.shared.lock().abort(code);
        self.kick();
        self.shared.changed.notify_waiters();
    }

    /// Wait for the connection to end without closing our side.
    pub async fn closed(&self) -> Result<(), ConnectionError> {
        self.wait_for(|conn| match conn.state() {
            ConnectionState::Closed => Some(Ok(())),
            ConnectionState::Failed => Some(Err(terminal_error(conn))),
            _ => None,
        })
        .await
    }

    /// Send each buffer on its own stream, all streams concurrently, and
    /// finish them.  Returns the stream ids in input order.
    pub async fn send_files(&self, files: Vec<Vec<u8>>) -> Result<Vec<StreamId>, WriteError> {
        let mut ids = Vec::with_capacity(files.len());
        let mut tasks = JoinSet::new();
        for file in files {
            let id = self.open_stream()?;
            ids.push(id);
            let session = self.clone();
            tasks.spawn(async move { session.write(id, &file, true).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => result?,
                Err(e) => {
                    log::warn!("[session] writer task failed: {e}");
                    return Err(WriteError::Closed);
                }
            }
        }
        Ok(ids)
    }

    /// Collect every stream the peer opens, each read to its end.
    pub async fn receive_files(&self) -> Result<BTreeMap<StreamId, Vec<u8>>, ReadError> {
        let mut tasks = JoinSet::new();
        while let Some(id) = self.accept_stream().await {
            let session = self.clone();
            tasks.spawn(async move { (id, session.read_to_end(id).await) });
        }
        let mut files = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    files.insert(id, result?);
                }
                Err(e) => {
                    log::warn!("[session] reader task failed: {e}");
                    return Err(ReadError::Closed);
                }
            }
        }
        Ok(files)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.shared.lock().stats().clone()
    }

    pub fn cwnd(&self) -> usize {
        self.shared.lock().cwnd()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

fn terminal_error(conn: &Connection) -> ConnectionError {
    conn.error()
        .cloned()
        .unwrap_or(ConnectionError::LocallyClosed)
}

// ---------------------------------------------------------------------------
// Background driver
// ---------------------------------------------------------------------------

async fn drive<S: DatagramSocket>(socket: Arc<S>, peer: SocketAddr, shared: Arc<Shared>) {
    let (tick, linger) = {
        let conn = shared.lock();
        (conn.config().tick_interval, conn.config().close_timeout)
    };
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
    let mut closed_at: Option<Instant> = None;

    let state = loop {
        flush(&*socket, peer, &shared).await;
        shared.changed.notify_waiters();

        let state = shared.lock().state();
        match state {
            ConnectionState::Failed => break state,
            ConnectionState::Closed => {
                // Keep answering retransmitted FINs for a while.
                let since = *closed_at.get_or_insert_with(Instant::now);
                if since.elapsed() >= linger {
                    break state;
                }
            }
            _ => {}
        }

        tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok((n, from)) if from == peer => {
                    shared.lock().handle_datagram(Instant::now(), &buf[..n]);
                }
                Ok((_, from)) => log::trace!("[session] ignored datagram from {from}"),
                Err(e) => log::debug!("[session] receive failed: {e}"),
            },
            _ = interval.tick() => shared.lock().handle_timeout(Instant::now()),
            _ = shared.wake.notified() => {}
        }
    };

    log::debug!("[session] driver for {peer} exiting ({state})");
    shared.changed.notify_waiters();
}

/// Send everything the connection is willing to send right now.
async fn flush<S: DatagramSocket>(socket: &S, peer: SocketAddr, shared: &Shared) {
    let datagrams: Vec<Vec<u8>> = {
        let mut conn = shared.lock();
        let now = Instant::now();
        std::iter::from_fn(|| conn.poll_transmit(now)).collect()
    };
    for datagram in datagrams {
        // A failed send looks like loss; recovery retransmits.
        if let Err(e) = socket.send_to(&datagram, peer).await {
            log::debug!("[session] send failed: {e}");
        }
    }
}
