//! Per-stream send and receive state.
//!
//! A [`Stream`] is bidirectional.  Its [`SendStream`] holds bytes the
//! application wrote but the peer has not acknowledged; its [`RecvStream`]
//! reassembles what the peer sent and enforces the advertised window.

use std::collections::VecDeque;

use thiserror::Error;

use crate::flow::{ReceiveWindow, SendWindow};
use crate::packet::{Frame, StreamId};
use crate::range_set::RangeSet;
use crate::reassembly::{ReassemblyError, Reassembler};
use crate::recovery::SentFrame;

/// What a read on a stream produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(Vec<u8>),
    /// Nothing contiguous yet.
    Blocked,
    /// Every byte up to the peer's FIN has been read.
    Finished,
}

/// A DATA frame the stream refused.  The frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("data ends at {end}, past the advertised limit {limit}")]
    FlowControl { end: u64, limit: u64 },
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
}

#[derive(Debug)]
struct Chunk {
    offset: u64,
    payload: Vec<u8>,
    fin: bool,
    attempt: u32,
}

#[derive(Debug)]
pub struct SendStream {
    /// Written but never transmitted.
    pending: VecDeque<u8>,
    /// Offset of the first byte in `pending`.
    send_offset: u64,
    /// Total bytes accepted from the application.
    write_offset: u64,
    /// Lost chunks waiting to go out again, oldest first.
    retransmit: VecDeque<Chunk>,
    fin_queued: bool,
    fin_sent: bool,
    fin_acked: bool,
    acked: RangeSet,
    window: SendWindow,
}

impl SendStream {
    pub fn new(max_data: u64) -> Self {
        Self {
            pending: VecDeque::new(),
            send_offset: 0,
            write_offset: 0,
            retransmit: VecDeque::new(),
            fin_queued: false,
            fin_sent: false,
            fin_acked: false,
            acked: RangeSet::new(),
            window: SendWindow::new(max_data),
        }
    }

    /// Accept as much of `data` as flow credit and `budget` allow.
    ///
    /// `fin` only takes effect once the final byte has been accepted.
    pub fn write(&mut self, data: &[u8], fin: bool, budget: usize) -> usize {
        let credit = self.window.credit(self.write_offset);
        let n = data.len().min(budget).min(credit as usize);
        self.pending.extend(&data[..n]);
        self.write_offset += n as u64;
        if fin && n == data.len() {
            self.fin_queued = true;
        }
        n
    }

    /// Mark the end of the stream without writing more bytes.
    pub fn finish(&mut self) {
        self.fin_queued = true;
    }

    pub fn is_finished(&self) -> bool {
        self.fin_queued
    }

    /// Flow credit left for new writes.
    pub fn credit(&self) -> u64 {
        self.window.credit(self.write_offset)
    }

    pub fn update_window(&mut self, max_data: u64) -> bool {
        self.window.update(max_data)
    }

    /// Bytes written but not yet transmitted once.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn has_sendable(&self) -> bool {
        !self.retransmit.is_empty()
            || !self.pending.is_empty()
            || (self.fin_queued && !self.fin_sent)
    }

    /// Pull the next DATA frame carrying at most `max_payload` bytes.
    ///
    /// Retransmissions go first.  A queued retransmission that does not fit
    /// holds back this stream until a packet with more room is built.
    pub fn next_frame(&mut self, stream_id: StreamId, max_payload: usize) -> Option<SentFrame> {
        while let Some(chunk) = self.retransmit.front() {
            if self.is_acked(chunk.offset, chunk.payload.len(), chunk.fin) {
                self.retransmit.pop_front();
                continue;
            }
            if chunk.payload.len() > max_payload {
                return None;
            }
            let chunk = self.retransmit.pop_front()?;
            return Some(SentFrame {
                frame: Frame::Data {
                    stream_id,
                    offset: chunk.offset,
                    fin: chunk.fin,
                    payload: chunk.payload,
                },
                attempt: chunk.attempt,
            });
        }

        let n = self.pending.len().min(max_payload);
        let fin = self.fin_queued && !self.fin_sent && n == self.pending.len();
        if n == 0 && !fin {
            return None;
        }
        let payload: Vec<u8> = self.pending.drain(..n).collect();
        let offset = self.send_offset;
        self.send_offset += n as u64;
        if fin {
            self.fin_sent = true;
        }
        Some(SentFrame::new(Frame::Data {
            stream_id,
            offset,
            fin,
            payload,
        }))
    }

    pub fn on_acked(&mut self, offset: u64, len: usize, fin: bool) {
        self.acked.insert(offset..offset + len as u64);
        if fin {
            self.fin_acked = true;
        }
    }

    /// Queue a lost chunk for retransmission unless it was acknowledged via
    /// another copy.  Returns `true` if it was queued.
    pub fn on_lost(&mut self, offset: u64, payload: Vec<u8>, fin: bool, attempt: u32) -> bool {
        if self.is_acked(offset, payload.len(), fin) {
            return false;
        }
        self.retransmit.push_back(Chunk {
            offset,
            payload,
            fin,
            attempt,
        });
        true
    }

    /// Some written byte or a requested FIN, sent or not, still awaits
    /// acknowledgement.
    pub fn has_outstanding(&self) -> bool {
        !self.acked.covers(&(0..self.write_offset)) || (self.fin_queued && !self.fin_acked)
    }

    /// FIN and every byte before it acknowledged.
    pub fn is_complete(&self) -> bool {
        self.fin_acked && !self.has_outstanding()
    }

    /// Drop every unsent and unacknowledged byte.
    pub fn abandon(&mut self) {
        self.pending.clear();
        self.retransmit.clear();
        self.fin_queued = true;
        self.fin_sent = true;
        self.fin_acked = true;
        self.acked.insert(0..self.write_offset);
    }

    /// The range (and FIN, if set) has been acknowledged.
    pub fn is_acked(&self, offset: u64, len: usize, fin: bool) -> bool {
        self.acked.covers(&(offset..offset + len as u64)) && (!fin || self.fin_acked)
    }
}

#[derive(Debug)]
pub struct RecvStream {
    reassembler: Reassembler,
    window: ReceiveWindow,
}

impl RecvStream {
    pub fn new(window: u64) -> Self {
        Self {
            reassembler: Reassembler::new(),
            window: ReceiveWindow::new(window),
        }
    }

    /// Feed a DATA frame.  Returns the number of novel bytes.
    pub fn on_data(&mut self, offset: u64, payload: &[u8], fin: bool) -> Result<usize, StreamError> {
        let end = offset.saturating_add(payload.len() as u64);
        if !self.window.permits(end) {
            return Err(StreamError::FlowControl {
                end,
                limit: self.window.max_data(),
            });
        }
        Ok(self.reassembler.insert(offset, payload, fin)?)
    }

    pub fn read(&mut self) -> ReadOutcome {
        let data = self.reassembler.read_contiguous();
        if !data.is_empty() {
            self.window.on_consumed(data.len() as u64);
            ReadOutcome::Data(data)
        } else if self.reassembler.is_finished() {
            ReadOutcome::Finished
        } else {
            ReadOutcome::Blocked
        }
    }

    pub fn is_finished(&self) -> bool {
        self.reassembler.is_finished()
    }

    pub fn take_window_update(&mut self) -> Option<u64> {
        self.window.take_update()
    }

    pub fn max_data(&self) -> u64 {
        self.window.max_data()
    }

    /// Keep only what the application can still read.
    pub fn release_unreadable(&mut self) {
        self.reassembler.retain_contiguous();
    }
}

#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,
    pub send: SendStream,
    pub recv: RecvStream,
    /// Error code once either side reset the stream.
    pub reset: Option<u32>,
    /// Largest payload this stream puts in one DATA frame.
    pub frame_limit: usize,
}

impl Stream {
    pub fn new(id: StreamId, send_window: u64, recv_window: u64) -> Self {
        Self {
            id,
            send: SendStream::new(send_window),
            recv: RecvStream::new(recv_window),
            reset: None,
            frame_limit: usize::MAX,
        }
    }

    /// Both directions are done and the stream can be forgotten.  A stream
    /// the peer finished stays open for our reply until our FIN is acked.
    pub fn is_retirable(&self) -> bool {
        self.recv.is_finished() && self.send.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_of(frame: &SentFrame) -> (u64, Vec<u8>, bool) {
        match &frame.frame {
            Frame::Data {
                offset,
                payload,
                fin,
                ..
            } => (*offset, payload.clone(), *fin),
            other => panic!("not a data frame: {other:?}"),
        }
    }

    #[test]
    fn write_is_capped_by_flow_credit() {
        let mut s = SendStream::new(10);
        assert_eq!(s.write(b"0123456789abc", true, usize::MAX), 10);
        assert!(!s.is_finished());
        assert_eq!(s.credit(), 0);

        s.update_window(20);
        assert_eq!(s.write(b"abc", true, usize::MAX), 3);
        assert!(s.is_finished());
    }

    #[test]
    fn write_is_capped_by_budget() {
        let mut s = SendStream::new(100);
        assert_eq!(s.write(b"abcdef", false, 4), 4);
        assert_eq!(s.pending_bytes(), 4);
    }

    #[test]
    fn frames_split_at_max_payload_and_carry_fin_last() {
        let mut s = SendStream::new(100);
        s.write(b"abcdefg", true, usize::MAX);

        let first = s.next_frame(1, 4).unwrap();
        assert_eq!(data_of(&first), (0, b"abcd".to_vec(), false));
        let second = s.next_frame(1, 4).unwrap();
        assert_eq!(data_of(&second), (4, b"efg".to_vec(), true));
        assert!(s.next_frame(1, 4).is_none());
    }

    #[test]
    fn empty_fin_is_sent_once() {
        let mut s = SendStream::new(100);
        s.finish();
        let frame = s.next_frame(3, 10).unwrap();
        assert_eq!(data_of(&frame), (0, vec![], true));
        assert!(!s.has_sendable());
    }

    #[test]
    fn lost_chunk_goes_first_with_bumped_attempt() {
        let mut s = SendStream::new(100);
        s.write(b"abcdef", false, usize::MAX);
        let first = s.next_frame(1, 3).unwrap();
        let (offset, payload, fin) = data_of(&first);

        assert!(s.on_lost(offset, payload, fin, 1));
        let again = s.next_frame(1, 3).unwrap();
        assert_eq!(again.attempt, 1);
        assert_eq!(data_of(&again), (0, b"abc".to_vec(), false));
    }

    #[test]
    fn acked_chunk_is_not_requeued() {
        let mut s = SendStream::new(100);
        s.write(b"abc", true, usize::MAX);
        s.next_frame(1, 10).unwrap();
        s.on_acked(0, 3, true);
        assert!(!s.on_lost(0, b"abc".to_vec(), true, 1));
        assert!(s.is_complete());
        assert!(!s.has_outstanding());
    }

    #[test]
    fn queued_fin_is_outstanding_until_acked() {
        let mut s = SendStream::new(100);
        assert!(!s.has_outstanding());
        s.finish();
        assert!(s.has_outstanding());

        s.next_frame(1, 10).unwrap();
        assert!(s.has_outstanding());
        s.on_acked(0, 0, true);
        assert!(!s.has_outstanding());
        assert!(s.is_complete());
    }

    #[test]
    fn receive_window_rejects_overrun() {
        let mut r = RecvStream::new(4);
        assert_eq!(r.on_data(0, b"abcd", false), Ok(4));
        assert_eq!(
            r.on_data(4, b"e", false),
            Err(StreamError::FlowControl { end: 5, limit: 4 })
        );
    }

    #[test]
    fn reading_credits_the_window() {
        let mut r = RecvStream::new(4);
        r.on_data(0, b"abcd", false).unwrap();
        assert_eq!(r.read(), ReadOutcome::Data(b"abcd".to_vec()));
        assert_eq!(r.take_window_update(), Some(8));
        assert_eq!(r.read(), ReadOutcome::Blocked);
    }

    #[test]
    fn finished_after_fin_is_read() {
        let mut r = RecvStream::new(16);
        r.on_data(0, b"hi", true).unwrap();
        assert_eq!(r.read(), ReadOutcome::Data(b"hi".to_vec()));
        assert_eq!(r.read(), ReadOutcome::Finished);
    }
}
