//! Stream multiplexing and demultiplexing.
//!
//! [`StreamMap`] owns every live stream of a connection.  On the send side it
//! packs DATA frames from several streams into one packet, visiting streams
//! round-robin so a stream that is out of flow credit never holds up the
//! others.  On the receive side it routes DATA, WINDOW_UPDATE and stream
//! RESET frames to their stream, creating peer-initiated streams on first
//! reference and ignoring frames for streams that have already been retired.
//!
//! Stream ids carry their initiator in the low bit: even ids are opened by
//! the connecting side, odd ids by the accepting side.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::{Bound, RangeInclusive};

use rand::Rng;

use crate::packet::{StreamId, DATA_FRAME_OVERHEAD, MAX_STREAM_ID};
use crate::recovery::SentFrame;
use crate::stream::{Stream, StreamError};

/// Smallest slice of a packet offered to each stream on the first pass.
const MIN_FRAME_SHARE: usize = 256;

/// Result of looking a stream up on behalf of the application.
pub enum Lookup<'a> {
    Open(&'a mut Stream),
    /// Finished in both directions and forgotten.
    Retired,
    /// Peer-initiated id the peer has not used yet.
    NotYetSeen,
    /// Local id that was never opened.
    Unknown,
}

#[derive(Debug)]
pub struct StreamMap {
    streams: BTreeMap<StreamId, Stream>,
    retired: BTreeSet<StreamId>,
    is_client: bool,
    next_local: StreamId,
    /// Initial credit the peer grants each stream.
    send_window: u64,
    /// Initial credit we grant each stream.
    recv_window: u64,
    /// Stream served last; the next packet starts after it.
    cursor: Option<StreamId>,
    /// Peer-opened streams not yet handed to the application.
    opened: VecDeque<StreamId>,
    /// Each new stream draws its frame payload cap from here.
    frame_size: Option<RangeInclusive<usize>>,
}

impl StreamMap {
    pub fn new(is_client: bool, recv_window: u64, frame_size: Option<RangeInclusive<usize>>) -> Self {
        Self {
            streams: BTreeMap::new(),
            retired: BTreeSet::new(),
            is_client,
            next_local: if is_client { 0 } else { 1 },
            send_window: 0,
            recv_window,
            cursor: None,
            opened: VecDeque::new(),
            frame_size,
        }
    }

    fn new_stream(&self, id: StreamId) -> Stream {
        let mut stream = Stream::new(id, self.send_window, self.recv_window);
        if let Some(range) = &self.frame_size {
            stream.frame_limit = rand::thread_rng().gen_range(range.clone());
            log::trace!("[mux] stream {id} frames capped at {} bytes", stream.frame_limit);
        }
        stream
    }

    /// Set the per-stream credit the peer advertised in its handshake.
    pub fn set_peer_window(&mut self, window: u64) {
        self.send_window = window;
    }

    pub fn is_local(&self, id: StreamId) -> bool {
        (id & 1 == 0) == self.is_client
    }

    /// Allocate the next locally-initiated stream.
    pub fn open(&mut self) -> Option<StreamId> {
        let id = self.next_local;
        if id > MAX_STREAM_ID {
            return None;
        }
        self.next_local += 2;
        let stream = self.new_stream(id);
        self.streams.insert(id, stream);
        log::debug!("[mux] opened stream {id}");
        Some(id)
    }

    pub fn lookup(&mut self, id: StreamId) -> Lookup<'_> {
        if self.retired.contains(&id) {
            return Lookup::Retired;
        }
        let is_local = self.is_local(id);
        match self.streams.get_mut(&id) {
            Some(stream) => Lookup::Open(stream),
            None if is_local => Lookup::Unknown,
            None => Lookup::NotYetSeen,
        }
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    /// Route a DATA frame.  Returns the number of novel bytes.
    pub fn on_data(
        &mut self,
        id: StreamId,
        offset: u64,
        payload: &[u8],
        fin: bool,
    ) -> Result<usize, StreamError> {
        if self.retired.contains(&id) {
            return Ok(0);
        }
        if !self.streams.contains_key(&id) {
            if self.is_local(id) {
                log::debug!("[mux] data for unopened local stream {id} ignored");
                return Ok(0);
            }
            let stream = self.new_stream(id);
            self.streams.insert(id, stream);
            self.opened.push_back(id);
            log::debug!("[mux] peer opened stream {id}");
        }
        match self.streams.get_mut(&id) {
            Some(stream) if stream.reset.is_none() => stream.recv.on_data(offset, payload, fin),
            _ => Ok(0),
        }
    }

    pub fn on_window_update(&mut self, id: StreamId, max_data: u64) {
        if let Some(stream) = self.streams.get_mut(&id) {
            if stream.send.update_window(max_data) {
                log::trace!("[mux] stream {id} credit now {max_data}");
            }
        }
    }

    /// The peer abandoned `id`.
    pub fn on_reset(&mut self, id: StreamId, code: u32) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.reset.get_or_insert(code);
            stream.send.abandon();
            log::debug!("[mux] stream {id} reset by peer (code {code})");
        }
    }

    pub fn on_data_acked(&mut self, id: StreamId, offset: u64, len: usize, fin: bool) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.send.on_acked(offset, len, fin);
        }
    }

    /// Put a lost DATA frame back in its stream's queue.
    pub fn requeue(&mut self, id: StreamId, offset: u64, payload: Vec<u8>, fin: bool, attempt: u32) -> bool {
        match self.streams.get_mut(&id) {
            Some(stream) if stream.reset.is_none() => stream.send.on_lost(offset, payload, fin, attempt),
            _ => false,
        }
    }

    /// A lost DATA frame still has to reach the peer.
    pub fn needs_retransmit(&self, id: StreamId, offset: u64, len: usize, fin: bool) -> bool {
        self.streams
            .get(&id)
            .is_some_and(|s| s.reset.is_none() && !s.send.is_acked(offset, len, fin))
    }

    /// Current receive limit of a stream that still expects data.
    pub fn current_max_data(&self, id: StreamId) -> Option<u64> {
        self.streams
            .get(&id)
            .filter(|s| s.reset.is_none() && !s.recv.is_finished())
            .map(|s| s.recv.max_data())
    }

    /// Window limits that have moved since they were last announced.
    pub fn take_window_updates(&mut self) -> Vec<(StreamId, u64)> {
        self.streams
            .values_mut()
            .filter(|s| s.reset.is_none())
            .filter_map(|s| s.recv.take_window_update().map(|max| (s.id, max)))
            .collect()
    }

    /// Fill up to `space` bytes of a packet with DATA frames.
    pub fn fill(&mut self, space: &mut usize, out: &mut Vec<SentFrame>) {
        let order: Vec<StreamId> = match self.cursor {
            Some(c) => self
                .streams
                .range((Bound::Excluded(c), Bound::Unbounded))
                .chain(self.streams.range(..=c))
                .filter(|(_, s)| s.reset.is_none() && s.send.has_sendable())
                .map(|(&id, _)| id)
                .collect(),
            None => self
                .streams
                .iter()
                .filter(|(_, s)| s.reset.is_none() && s.send.has_sendable())
                .map(|(&id, _)| id)
                .collect(),
        };
        if order.is_empty() {
            return;
        }

        // First pass spreads the packet across streams; later passes let
        // whoever still has data take the rest.
        let mut share = (*space / order.len()).max(MIN_FRAME_SHARE);
        loop {
            let mut progressed = false;
            for &id in &order {
                if *space < DATA_FRAME_OVERHEAD {
                    return;
                }
                let Some(stream) = self.streams.get_mut(&id) else {
                    continue;
                };
                let room = (share.min(*space) - DATA_FRAME_OVERHEAD).min(stream.frame_limit);
                if let Some(frame) = stream.send.next_frame(id, room) {
                    *space -= frame.frame.encoded_len();
                    self.cursor = Some(id);
                    out.push(frame);
                    progressed = true;
                }
            }
            if !progressed {
                if share >= *space {
                    return;
                }
                share = *space;
            }
        }
    }

    /// Written bytes not yet transmitted, across all streams.
    pub fn pending_bytes(&self) -> usize {
        self.streams.values().map(|s| s.send.pending_bytes()).sum()
    }

    /// Queue a FIN on every stream that has not sent one.
    pub fn finish_all(&mut self) {
        for stream in self.streams.values_mut() {
            if stream.reset.is_none() && !stream.send.is_finished() {
                stream.send.finish();
            }
        }
    }

    /// Some stream still has bytes or a FIN the peer has not acknowledged.
    pub fn has_outstanding(&self) -> bool {
        self.streams
            .values()
            .any(|s| s.reset.is_none() && (s.send.has_outstanding() || s.send.pending_bytes() > 0))
    }

    /// Forget streams that are finished in both directions.
    pub fn retire_finished(&mut self) {
        let done: Vec<StreamId> = self
            .streams
            .values()
            .filter(|s| s.is_retirable())
            .map(|s| s.id)
            .collect();
        for id in done {
            self.streams.remove(&id);
            self.retired.insert(id);
            log::debug!("[mux] stream {id} retired");
        }
    }

    pub fn take_opened(&mut self) -> Option<StreamId> {
        self.opened.pop_front()
    }

    /// Drop send state and unreadable receive state; keep bytes the
    /// application may still read.
    pub fn release(&mut self) {
        for stream in self.streams.values_mut() {
            stream.send.abandon();
            stream.recv.release_unreadable();
        }
    }

    pub fn clear(&mut self) {
        self.streams.clear();
        self.opened.clear();
    }
}
