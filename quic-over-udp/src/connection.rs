//! Per-connection protocol core.
//!
//! A [`Connection`] owns the complete state of one peer-to-peer session and
//! performs no I/O.  The owner feeds it datagrams and clock ticks and asks it
//! for datagrams to put on the wire:
//!
//! - [`Connection::handle_datagram`] decodes a datagram and routes each frame
//!   to the state machine, the loss detector or a stream;
//! - [`Connection::poll_transmit`] builds the next packet, if any;
//! - [`Connection::handle_timeout`] runs the handshake, RTO, idle and close
//!   timers.
//!
//! Application calls ([`open_stream`](Connection::open_stream),
//! [`write`](Connection::write), [`read`](Connection::read),
//! [`close`](Connection::close)) never block; they report how much was done
//! and the async [`crate::session::Session`] waits for progress.

use std::collections::VecDeque;
use std::ops::Range;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::congestion::CongestionController;
use crate::error::{ConfigError, ConnectionError, ReadError, WriteError};
use crate::mux::{Lookup, StreamMap};
use crate::packet::{
    Frame, HandshakeKind, Header, Packet, StreamId, DATA_FRAME_OVERHEAD, FRAME_HEADER_LEN,
    HEADER_LEN, MAX_ACK_RANGES,
};
use crate::range_set::RangeSet;
use crate::recovery::{LossKind, Recovery, SentFrame, SentPacket};
use crate::state::ConnectionState;
use crate::stats::ConnectionStats;
use crate::stream::ReadOutcome;

/// Which end of the handshake this connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

#[derive(Debug, Default)]
struct HandshakeTimer {
    /// Initials sent so far.
    attempts: u32,
    deadline: Option<Instant>,
    send_pending: bool,
}

#[derive(Debug)]
pub struct Connection {
    config: Config,
    role: Role,
    state: ConnectionState,
    conn_id: u32,
    next_packet_seq: u64,
    /// Smaller of our limit and the peer's.
    max_datagram_size: usize,
    recovery: Recovery,
    congestion: CongestionController,
    streams: StreamMap,
    /// Packet numbers received from the peer.
    received: RangeSet,
    ack_pending: bool,
    /// Non-stream frames waiting for a packet.
    control: VecDeque<SentFrame>,
    handshake: HandshakeTimer,
    accept_pending: bool,
    reset_pending: Option<u32>,
    /// The application called `close`; no new data after the streams drain.
    close_requested: bool,
    fin_queued: bool,
    fin_acked: bool,
    /// The peer's FIN arrived: it has nothing more to send.
    peer_finished: bool,
    /// Moves forward whenever the peer is heard from while closing.
    close_deadline: Option<Instant>,
    last_heard: Instant,
    error: Option<ConnectionError>,
    stats: ConnectionStats,
}

impl Connection {
    /// A connection that will open with [`connect`](Self::connect).
    pub fn client(config: Config, now: Instant) -> Result<Self, ConfigError> {
        Self::new(config, Role::Client, rand::random(), now)
    }

    /// A connection that waits for the peer's handshake initial.
    pub fn server(config: Config, now: Instant) -> Result<Self, ConfigError> {
        Self::new(config, Role::Server, 0, now)
    }

    fn new(config: Config, role: Role, conn_id: u32, now: Instant) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            role,
            state: ConnectionState::Idle,
            conn_id,
            next_packet_seq: 0,
            max_datagram_size: config.max_datagram_size,
            recovery: Recovery::new(&config),
            congestion: CongestionController::new(&config),
            streams: StreamMap::new(
                role == Role::Client,
                config.stream_receive_window,
                config.stream_frame_size.clone(),
            ),
            received: RangeSet::new(),
            ack_pending: false,
            control: VecDeque::new(),
            handshake: HandshakeTimer::default(),
            accept_pending: false,
            reset_pending: None,
            close_requested: false,
            fin_queued: false,
            fin_acked: false,
            peer_finished: false,
            close_deadline: None,
            last_heard: now,
            error: None,
            stats: ConnectionStats::default(),
            config,
        })
    }

    /// Start the handshake.  The initial goes out on the next
    /// [`poll_transmit`](Self::poll_transmit).
    pub fn connect(&mut self, now: Instant) {
        if self.role != Role::Client || self.state != ConnectionState::Idle {
            return;
        }
        log::info!("[conn] Idle → Handshaking conn_id={:#010x}", self.conn_id);
        self.state = ConnectionState::Handshaking;
        self.handshake.send_pending = true;
        self.last_heard = now;
    }

    // ── inbound ─────────────────────────────────────────────────────────

    /// Process one datagram from the peer.  Undecodable datagrams are
    /// counted and dropped.
    pub fn handle_datagram(&mut self, now: Instant, datagram: &[u8]) {
        if self.state == ConnectionState::Failed {
            return;
        }
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.malformed_packets += 1;
                log::debug!("[conn] dropped {}-byte datagram: {e}", datagram.len());
                return;
            }
        };
        let Header { conn_id, packet_seq } = packet.header;

        if matches!(
            self.state,
            ConnectionState::Idle | ConnectionState::Handshaking
        ) {
            for frame in &packet.frames {
                if let Frame::Handshake {
                    kind,
                    stream_window,
                    max_datagram_size,
                } = *frame
                {
                    self.on_handshake(now, conn_id, kind, stream_window, max_datagram_size);
                }
            }
            if !self.state.is_active() {
                log::trace!("[conn] ignored seq={packet_seq} before handshake completed");
            }
            return;
        }

        if conn_id != self.conn_id {
            log::trace!("[conn] dropped seq={packet_seq} for conn_id={conn_id:#010x}");
            return;
        }
        if self.state == ConnectionState::Closed
            && packet.frames.iter().any(|f| matches!(f, Frame::Data { .. }))
        {
            log::debug!("[conn] dropped seq={packet_seq} carrying data after close, not acknowledged");
            return;
        }
        self.last_heard = now;
        if self.close_requested && self.close_deadline.is_some() {
            self.close_deadline = Some(now + self.config.close_timeout);
        }
        self.stats.on_received(now, datagram.len(), &packet.frames);

        let duplicate = self.received.contains(packet_seq);
        self.received.insert(packet_seq..packet_seq + 1);
        self.received.retain_highest(MAX_ACK_RANGES);
        if packet.frames.iter().any(Frame::is_ack_eliciting) {
            self.ack_pending = true;
        }
        if duplicate {
            self.stats.duplicate_packets += 1;
            log::trace!("[conn] duplicate seq={packet_seq}");
            return;
        }
        if self.state == ConnectionState::Closed {
            return;
        }

        log::trace!(
            "[conn] ← seq={packet_seq} frames={} len={}",
            packet.frames.len(),
            datagram.len()
        );
        for frame in packet.frames {
            self.dispatch(now, conn_id, frame);
            if self.state.is_terminal() {
                return;
            }
        }
        self.streams.retire_finished();
        self.check_close_progress();
    }

    fn dispatch(&mut self, now: Instant, conn_id: u32, frame: Frame) {
        match frame {
            Frame::Data {
                stream_id,
                offset,
                fin,
                payload,
            } => {
                if let Err(e) = self.streams.on_data(stream_id, offset, &payload, fin) {
                    log::debug!("[conn] stream {stream_id}: dropped data at {offset}: {e}");
                }
            }
            Frame::Ack { ranges } => self.on_ack(now, &ranges),
            Frame::Handshake {
                kind,
                stream_window,
                max_datagram_size,
            } => self.on_handshake(now, conn_id, kind, stream_window, max_datagram_size),
            Frame::Fin => self.on_peer_fin(),
            Frame::Reset {
                stream_id: None,
                code,
            } => self.fail(ConnectionError::Reset { code }),
            Frame::Reset {
                stream_id: Some(id),
                code,
            } => self.streams.on_reset(id, code),
            Frame::WindowUpdate {
                stream_id,
                max_data,
            } => self.streams.on_window_update(stream_id, max_data),
        }
    }

    fn on_handshake(
        &mut self,
        now: Instant,
        conn_id: u32,
        kind: HandshakeKind,
        stream_window: u64,
        max_datagram_size: u16,
    ) {
        match (self.role, self.state, kind) {
            (Role::Server, ConnectionState::Idle, HandshakeKind::Initial) => {
                self.conn_id = conn_id;
                self.apply_peer_params(stream_window, max_datagram_size);
                self.state = ConnectionState::Established;
                self.accept_pending = true;
                self.last_heard = now;
                log::info!("[conn] Idle → Established conn_id={conn_id:#010x}");
            }
            (Role::Server, state, HandshakeKind::Initial)
                if state.is_active() && conn_id == self.conn_id =>
            {
                log::debug!("[conn] repeated handshake initial, re-sending accept");
                self.accept_pending = true;
            }
            (Role::Client, ConnectionState::Handshaking, HandshakeKind::Accept)
                if conn_id == self.conn_id =>
            {
                self.apply_peer_params(stream_window, max_datagram_size);
                self.state = ConnectionState::Established;
                self.handshake.deadline = None;
                self.last_heard = now;
                log::info!(
                    "[conn] Handshaking → Established after {} attempt(s)",
                    self.handshake.attempts
                );
            }
            _ => log::trace!("[conn] ignored {kind:?} handshake in {}", self.state),
        }
    }

    fn apply_peer_params(&mut self, stream_window: u64, max_datagram_size: u16) {
        self.streams.set_peer_window(stream_window);
        let peer = max_datagram_size as usize;
        if peer >= crate::config::MIN_DATAGRAM_SIZE {
            self.max_datagram_size = self.max_datagram_size.min(peer);
        }
    }

    fn on_ack(&mut self, now: Instant, ranges: &[Range<u64>]) {
        let outcome = self.recovery.on_ack(ranges, now);
        self.stats.smoothed_rtt = self.recovery.rtt().smoothed();
        for packet in &outcome.acked {
            self.congestion.on_ack(packet.packet_seq, packet.size);
            for sent in &packet.frames {
                match &sent.frame {
                    Frame::Data {
                        stream_id,
                        offset,
                        fin,
                        payload,
                    } => self
                        .streams
                        .on_data_acked(*stream_id, *offset, payload.len(), *fin),
                    Frame::Fin => self.fin_acked = true,
                    _ => {}
                }
            }
        }
        if !outcome.lost.is_empty() {
            self.on_lost(outcome.lost, LossKind::Gap);
        }
    }

    /// Re-queue the frames of lost packets under fresh packet numbers.
    fn on_lost(&mut self, lost: Vec<SentPacket>, kind: LossKind) {
        for packet in lost {
            self.stats.lost_packets += 1;
            if self
                .congestion
                .on_loss(packet.packet_seq, self.next_packet_seq, kind)
            {
                self.stats.loss_episodes += 1;
            }
            for sent in packet.frames {
                let Some(frame) = self.still_needed(sent.frame) else {
                    continue;
                };
                let attempt = sent.attempt + 1;
                if attempt > self.config.max_retransmits {
                    log::warn!(
                        "[conn] frame lost after {} retransmissions, giving up",
                        sent.attempt
                    );
                    self.fail(ConnectionError::ConnectionLost);
                    return;
                }
                self.stats.retransmitted_frames += 1;
                match frame {
                    Frame::Data {
                        stream_id,
                        offset,
                        fin,
                        payload,
                    } => {
                        self.streams
                            .requeue(stream_id, offset, payload, fin, attempt);
                    }
                    frame => self.control.push_back(SentFrame { frame, attempt }),
                }
            }
        }
    }

    /// The frame to send in place of a lost one, if the peer still needs it.
    fn still_needed(&self, frame: Frame) -> Option<Frame> {
        match frame {
            Frame::Data {
                stream_id,
                offset,
                fin,
                ref payload,
            } => self
                .streams
                .needs_retransmit(stream_id, offset, payload.len(), fin)
                .then_some(frame),
            Frame::Fin => (!self.fin_acked).then_some(Frame::Fin),
            Frame::WindowUpdate { stream_id, .. } => {
                self.streams
                    .current_max_data(stream_id)
                    .map(|max_data| Frame::WindowUpdate {
                        stream_id,
                        max_data,
                    })
            }
            frame @ Frame::Reset { .. } => Some(frame),
            Frame::Ack { .. } | Frame::Handshake { .. } => None,
        }
    }

    /// The peer will send nothing more.  Our side keeps writing until the
    /// application closes it too.
    fn on_peer_fin(&mut self) {
        if !self.peer_finished {
            log::debug!("[conn] peer finished sending");
            self.peer_finished = true;
        }
        if self.state == ConnectionState::Established {
            log::info!("[conn] Established → Closing (peer finished)");
            self.state = ConnectionState::Closing;
        }
    }

    // ── timers ──────────────────────────────────────────────────────────

    /// Run every timer that has expired by `now`.
    pub fn handle_timeout(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Handshaking => {
                let Some(deadline) = self.handshake.deadline else {
                    return;
                };
                if now < deadline {
                    return;
                }
                if self.handshake.attempts > self.config.max_handshake_retries {
                    self.fail(ConnectionError::HandshakeFailed {
                        attempts: self.handshake.attempts,
                    });
                } else {
                    log::debug!(
                        "[conn] handshake attempt {} timed out, retrying",
                        self.handshake.attempts
                    );
                    self.handshake.deadline = None;
                    self.handshake.send_pending = true;
                }
            }
            ConnectionState::Established | ConnectionState::Closing => {
                let lost = self.recovery.tick(now);
                if !lost.is_empty() {
                    self.on_lost(lost, LossKind::Timeout);
                    if self.state.is_terminal() {
                        return;
                    }
                }
                if now.saturating_duration_since(self.last_heard) >= self.config.idle_timeout {
                    self.fail(ConnectionError::IdleTimeout);
                    return;
                }
                if self.close_deadline.is_some_and(|d| now >= d) {
                    self.finish_close("close timeout");
                }
            }
            _ => {}
        }
    }

    /// Earliest instant at which [`handle_timeout`](Self::handle_timeout)
    /// has work to do.
    pub fn next_timeout(&self) -> Option<Instant> {
        match self.state {
            ConnectionState::Handshaking => self.handshake.deadline,
            ConnectionState::Established | ConnectionState::Closing => [
                self.recovery.next_timeout(),
                self.close_deadline,
                Some(self.last_heard + self.config.idle_timeout),
            ]
            .into_iter()
            .flatten()
            .min(),
            _ => None,
        }
    }

    // ── outbound ────────────────────────────────────────────────────────

    /// Build the next datagram to send, or `None` when there is nothing
    /// the congestion window allows.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<Vec<u8>> {
        if let Some(code) = self.reset_pending.take() {
            return Some(self.build(vec![Frame::Reset {
                stream_id: None,
                code,
            }]));
        }
        match self.state {
            ConnectionState::Idle | ConnectionState::Failed => return None,
            ConnectionState::Handshaking => return self.poll_handshake(now),
            _ => {}
        }
        if self.accept_pending {
            self.accept_pending = false;
            let accept = self.handshake_frame(HandshakeKind::Accept);
            return Some(self.build(vec![accept]));
        }

        let mut space = self.max_datagram_size - HEADER_LEN;
        let mut frames = Vec::new();
        if self.ack_pending {
            self.ack_pending = false;
            let fit = (space - FRAME_HEADER_LEN - 2) / 16;
            let ranges: Vec<Range<u64>> = self
                .received
                .iter_desc()
                .take(fit.min(MAX_ACK_RANGES))
                .collect();
            if !ranges.is_empty() {
                let ack = Frame::Ack { ranges };
                space -= ack.encoded_len();
                frames.push(ack);
            }
        }

        let mut sent = Vec::new();
        if self.state.is_active() {
            for (stream_id, max_data) in self.streams.take_window_updates() {
                self.control.push_back(SentFrame::new(Frame::WindowUpdate {
                    stream_id,
                    max_data,
                }));
            }
            if self
                .congestion
                .can_send(self.recovery.bytes_in_flight(), self.max_datagram_size)
            {
                while let Some(next) = self.control.front() {
                    let len = next.frame.encoded_len();
                    if len > space {
                        break;
                    }
                    space -= len;
                    sent.extend(self.control.pop_front());
                }
                if space > DATA_FRAME_OVERHEAD {
                    self.streams.fill(&mut space, &mut sent);
                }
            }
        }
        if frames.is_empty() && sent.is_empty() {
            return None;
        }

        let packet_seq = self.next_packet_seq;
        frames.extend(sent.iter().map(|s| s.frame.clone()));
        let datagram = self.build(frames);
        if !sent.is_empty() {
            self.recovery
                .on_send(SentPacket::new(packet_seq, now, datagram.len(), sent));
        }
        Some(datagram)
    }

    fn poll_handshake(&mut self, now: Instant) -> Option<Vec<u8>> {
        if !self.handshake.send_pending {
            return None;
        }
        self.handshake.send_pending = false;
        self.handshake.attempts += 1;
        let wait = backoff(
            self.config.handshake_timeout,
            self.handshake.attempts - 1,
            self.config.max_rto,
        );
        self.handshake.deadline = Some(now + wait);
        log::debug!(
            "[conn] → handshake initial attempt={} wait={wait:?}",
            self.handshake.attempts
        );
        let initial = self.handshake_frame(HandshakeKind::Initial);
        Some(self.build(vec![initial]))
    }

    fn handshake_frame(&self, kind: HandshakeKind) -> Frame {
        Frame::Handshake {
            kind,
            stream_window: self.config.stream_receive_window,
            max_datagram_size: self.config.max_datagram_size as u16,
        }
    }

    fn build(&mut self, frames: Vec<Frame>) -> Vec<u8> {
        let packet = Packet {
            header: Header {
                conn_id: self.conn_id,
                packet_seq: self.next_packet_seq,
            },
            frames,
        };
        self.next_packet_seq += 1;
        let datagram = packet.encode();
        self.stats.on_sent(datagram.len());
        log::trace!(
            "[conn] → seq={} frames={} len={}",
            packet.header.packet_seq,
            packet.frames.len(),
            datagram.len()
        );
        datagram
    }

    // ── application ─────────────────────────────────────────────────────

    /// Allocate the next locally-initiated stream.
    pub fn open_stream(&mut self) -> Result<StreamId, WriteError> {
        self.check_writable()?;
        self.streams.open().ok_or(WriteError::StreamsExhausted)
    }

    /// Next stream the peer opened that has not been handed out yet.
    pub fn accept_stream(&mut self) -> Option<StreamId> {
        self.streams.take_opened()
    }

    /// Accept as many bytes of `data` as stream credit and the congestion
    /// budget allow.  `fin` marks the end of the stream once the final byte
    /// has been accepted.  Returns the number of bytes taken; zero means
    /// the caller should wait for ACKs or a window update.
    pub fn write(&mut self, stream_id: StreamId, data: &[u8], fin: bool) -> Result<usize, WriteError> {
        self.check_writable()?;
        let budget = self.write_budget();
        match self.streams.lookup(stream_id) {
            Lookup::Open(stream) => {
                if let Some(code) = stream.reset {
                    return Err(WriteError::StreamReset { stream_id, code });
                }
                if stream.send.is_finished() {
                    return Err(WriteError::StreamFinished(stream_id));
                }
                Ok(stream.send.write(data, fin, budget))
            }
            Lookup::Retired => Err(WriteError::StreamFinished(stream_id)),
            Lookup::NotYetSeen | Lookup::Unknown => Err(WriteError::UnknownStream(stream_id)),
        }
    }

    /// Congestion window not yet claimed by in-flight or queued bytes.
    fn write_budget(&self) -> usize {
        self.congestion
            .cwnd()
            .saturating_sub(self.recovery.bytes_in_flight() + self.streams.pending_bytes())
    }

    fn check_writable(&self) -> Result<(), WriteError> {
        match self.state {
            ConnectionState::Idle | ConnectionState::Handshaking => Err(WriteError::NotConnected),
            ConnectionState::Established => Ok(()),
            ConnectionState::Closing if !self.close_requested => Ok(()),
            ConnectionState::Closing | ConnectionState::Closed => Err(WriteError::Closed),
            ConnectionState::Failed => Err(self.terminal_error().into()),
        }
    }

    /// Read whatever contiguous bytes `stream_id` has buffered.
    pub fn read(&mut self, stream_id: StreamId) -> Result<ReadOutcome, ReadError> {
        if self.state == ConnectionState::Failed {
            return Err(self.terminal_error().into());
        }
        let outcome = match self.streams.lookup(stream_id) {
            Lookup::Open(stream) => {
                if let Some(code) = stream.reset {
                    return Err(ReadError::StreamReset { stream_id, code });
                }
                stream.recv.read()
            }
            Lookup::Retired => return Ok(ReadOutcome::Finished),
            Lookup::NotYetSeen => ReadOutcome::Blocked,
            Lookup::Unknown => return Err(ReadError::UnknownStream(stream_id)),
        };
        match outcome {
            ReadOutcome::Blocked if self.state == ConnectionState::Closed => Err(ReadError::Closed),
            ReadOutcome::Finished => {
                self.streams.retire_finished();
                Ok(ReadOutcome::Finished)
            }
            outcome => Ok(outcome),
        }
    }

    /// Abandon one stream in both directions and tell the peer.
    pub fn reset_stream(&mut self, stream_id: StreamId, code: u32) -> Result<(), WriteError> {
        self.check_writable()?;
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or(WriteError::UnknownStream(stream_id))?;
        if stream.reset.is_some() {
            return Ok(());
        }
        stream.reset = Some(code);
        stream.send.abandon();
        self.control.push_back(SentFrame::new(Frame::Reset {
            stream_id: Some(stream_id),
            code,
        }));
        log::debug!("[conn] stream {stream_id} reset locally (code {code})");
        Ok(())
    }

    /// Finish every stream and shut down once the peer has acknowledged
    /// everything.
    pub fn close(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Idle | ConnectionState::Handshaking => {
                self.error = Some(ConnectionError::LocallyClosed);
                self.finish_close("closed before handshake");
            }
            ConnectionState::Established | ConnectionState::Closing if !self.close_requested => {
                self.begin_close(now);
                self.check_close_progress();
            }
            _ => {}
        }
    }

    /// Tear the connection down at once and send a connection RESET.
    pub fn abort(&mut self, code: u32) {
        if self.state.is_terminal() {
            return;
        }
        if self.state.is_active() {
            self.reset_pending = Some(code);
        }
        self.fail(ConnectionError::LocallyClosed);
    }

    fn begin_close(&mut self, now: Instant) {
        if self.state == ConnectionState::Established {
            log::info!("[conn] Established → Closing");
        } else {
            log::info!("[conn] closing after the peer finished");
        }
        self.close_requested = true;
        self.streams.finish_all();
        self.state = ConnectionState::Closing;
        self.close_deadline = Some(now + self.config.close_timeout);
    }

    /// Closed needs both directions done: our FIN acknowledged and the
    /// peer's FIN received.
    fn check_close_progress(&mut self) {
        if self.state != ConnectionState::Closing {
            return;
        }
        if self.close_requested && !self.fin_queued {
            // Streams the peer opened after our close also get a FIN.
            self.streams.finish_all();
            if !self.streams.has_outstanding() {
                log::debug!("[conn] every stream acknowledged, sending FIN");
                self.control.push_back(SentFrame::new(Frame::Fin));
                self.fin_queued = true;
            }
        }
        if self.fin_acked && self.peer_finished {
            self.finish_close("both sides finished");
        }
    }

    fn finish_close(&mut self, reason: &str) {
        log::info!("[conn] {} → Closed ({reason})", self.state);
        self.state = ConnectionState::Closed;
        self.close_deadline = None;
        self.recovery.clear();
        self.control.clear();
        self.streams.release();
    }

    fn fail(&mut self, error: ConnectionError) {
        if self.state == ConnectionState::Failed {
            return;
        }
        log::warn!("[conn] {} → Failed: {error}", self.state);
        self.state = ConnectionState::Failed;
        self.error = Some(error);
        self.ack_pending = false;
        self.accept_pending = false;
        self.handshake.deadline = None;
        self.close_deadline = None;
        self.recovery.clear();
        self.control.clear();
        self.streams.clear();
    }

    fn terminal_error(&self) -> ConnectionError {
        self.error.clone().unwrap_or(ConnectionError::ConnectionLost)
    }

    // ── inspection ──────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The fault that failed the connection, or `LocallyClosed` after a
    /// close before the handshake finished.
    pub fn error(&self) -> Option<&ConnectionError> {
        self.error.as_ref()
    }

    pub fn conn_id(&self) -> u32 {
        self.conn_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn cwnd(&self) -> usize {
        self.congestion.cwnd()
    }

    /// The peer has sent FIN; it opens no more streams and writes no more
    /// bytes.
    pub fn is_peer_finished(&self) -> bool {
        self.peer_finished
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.recovery.bytes_in_flight()
    }
}

/// `base * 2^attempt`, capped.
fn backoff(base: Duration, attempt: u32, cap: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(cap)
}
