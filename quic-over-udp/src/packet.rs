//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is one [`Packet`]: a fixed header
//! followed by one or more self-length-prefixed [`Frame`]s.  This module
//! only transforms bytes; no I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Connection ID                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                    Packet Sequence Number                     +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Frame Count          |            Checksum           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Frame Type   |         Frame Length          |  Body ...     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       ... more frames                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Header size: [`HEADER_LEN`] = 16 bytes.
//! conn_id(4) + packet_seq(8) + frame_count(2) + checksum(2)
//!
//! Frame bodies:
//!
//! | Type | Frame          | Body                                                 |
//! |------|----------------|------------------------------------------------------|
//! | 0x01 | DATA           | stream_id(4) offset(8) flags(1) payload              |
//! | 0x02 | ACK            | count(2) then count × (start(8) end(8)), descending  |
//! | 0x03 | HANDSHAKE      | kind(1) stream_window(8) max_datagram(2)             |
//! | 0x04 | FIN            | empty                                                |
//! | 0x05 | RESET          | scope(1) stream_id(4) code(4)                        |
//! | 0x06 | WINDOW_UPDATE  | stream_id(4) max_data(8)                             |

use std::ops::Range;

pub use crate::error::PacketError;

/// Identifies one stream within a connection.
pub type StreamId = u32;

/// Stream ids live in the non-negative half of a signed 32-bit integer.
pub const MAX_STREAM_ID: StreamId = i32::MAX as u32;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 16;

/// Type tag plus length prefix in front of every frame body.
pub const FRAME_HEADER_LEN: usize = 3;

/// Everything in a DATA frame except its payload.
pub const DATA_FRAME_OVERHEAD: usize = FRAME_HEADER_LEN + DATA_BODY_FIXED;

/// Upper bound on the ranges one ACK frame carries.
pub const MAX_ACK_RANGES: usize = 32;

const DATA_BODY_FIXED: usize = 13;
const DATA_FLAG_FIN: u8 = 0b0000_0001;

// Byte offset of the checksum within the serialised header.
const OFF_CHECKSUM: usize = 14;

/// Frame type tags.
pub mod frame_type {
    pub const DATA: u8 = 0x01;
    pub const ACK: u8 = 0x02;
    pub const HANDSHAKE: u8 = 0x03;
    pub const FIN: u8 = 0x04;
    pub const RESET: u8 = 0x05;
    pub const WINDOW_UPDATE: u8 = 0x06;
}

/// Which half of the handshake a HANDSHAKE frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeKind {
    /// Sent by the connecting side.
    Initial,
    /// The listener's reply.
    Accept,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A chunk of stream bytes starting at `offset`.
    Data {
        stream_id: StreamId,
        offset: u64,
        fin: bool,
        payload: Vec<u8>,
    },
    /// Received packet sequence numbers, highest range first, ends exclusive.
    Ack { ranges: Vec<Range<u64>> },
    /// Connection setup; carries the sender's transport parameters.
    Handshake {
        kind: HandshakeKind,
        stream_window: u64,
        max_datagram_size: u16,
    },
    /// The sender is done with the whole connection.
    Fin,
    /// Abort a single stream (`Some`) or the whole connection (`None`).
    Reset {
        stream_id: Option<StreamId>,
        code: u32,
    },
    /// The receiver now accepts stream bytes below `max_data`.
    WindowUpdate { stream_id: StreamId, max_data: u64 },
}

impl Frame {
    /// Size of this frame on the wire, prefix included.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LEN
            + match self {
                Frame::Data { payload, .. } => DATA_BODY_FIXED + payload.len(),
                Frame::Ack { ranges } => 2 + 16 * ranges.len().min(MAX_ACK_RANGES),
                Frame::Handshake { .. } => 11,
                Frame::Fin => 0,
                Frame::Reset { .. } => 9,
                Frame::WindowUpdate { .. } => 12,
            }
    }

    /// Whether receiving this frame obliges the peer to send an ACK.
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(self, Frame::Ack { .. } | Frame::Handshake { .. })
    }

    fn type_tag(&self) -> u8 {
        match self {
            Frame::Data { .. } => frame_type::DATA,
            Frame::Ack { .. } => frame_type::ACK,
            Frame::Handshake { .. } => frame_type::HANDSHAKE,
            Frame::Fin => frame_type::FIN,
            Frame::Reset { .. } => frame_type::RESET,
            Frame::WindowUpdate { .. } => frame_type::WINDOW_UPDATE,
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        let body_len = (self.encoded_len() - FRAME_HEADER_LEN) as u16;
        buf.push(self.type_tag());
        buf.extend_from_slice(&body_len.to_be_bytes());

        match self {
            Frame::Data {
                stream_id,
                offset,
                fin,
                payload,
            } => {
                buf.extend_from_slice(&stream_id.to_be_bytes());
                buf.extend_from_slice(&offset.to_be_bytes());
                buf.push(if *fin { DATA_FLAG_FIN } else { 0 });
                buf.extend_from_slice(payload);
            }
            Frame::Ack { ranges } => {
                let count = ranges.len().min(MAX_ACK_RANGES);
                buf.extend_from_slice(&(count as u16).to_be_bytes());
                for range in &ranges[..count] {
                    buf.extend_from_slice(&range.start.to_be_bytes());
                    buf.extend_from_slice(&range.end.to_be_bytes());
                }
            }
            Frame::Handshake {
                kind,
                stream_window,
                max_datagram_size,
            } => {
                buf.push(match kind {
                    HandshakeKind::Initial => 0,
                    HandshakeKind::Accept => 1,
                });
                buf.extend_from_slice(&stream_window.to_be_bytes());
                buf.extend_from_slice(&max_datagram_size.to_be_bytes());
            }
            Frame::Fin => {}
            Frame::Reset { stream_id, code } => {
                buf.push(u8::from(stream_id.is_some()));
                buf.extend_from_slice(&stream_id.unwrap_or(0).to_be_bytes());
                buf.extend_from_slice(&code.to_be_bytes());
            }
            Frame::WindowUpdate {
                stream_id,
                max_data,
            } => {
                buf.extend_from_slice(&stream_id.to_be_bytes());
                buf.extend_from_slice(&max_data.to_be_bytes());
            }
        }
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, PacketError> {
        let tag = reader.u8()?;
        let len = reader.u16()? as usize;
        let mut body = Reader::new(reader.take(len)?);

        let frame = match tag {
            frame_type::DATA => {
                let stream_id = stream_id(body.u32()?)?;
                let offset = body.u64()?;
                let flags = body.u8()?;
                if flags & !DATA_FLAG_FIN != 0 {
                    return Err(PacketError::InvalidField("data flags"));
                }
                let payload = body.rest().to_vec();
                if offset.checked_add(payload.len() as u64).is_none() {
                    return Err(PacketError::InvalidField("data offset"));
                }
                Frame::Data {
                    stream_id,
                    offset,
                    fin: flags & DATA_FLAG_FIN != 0,
                    payload,
                }
            }
            frame_type::ACK => {
                let count = body.u16()? as usize;
                if count == 0 || count > MAX_ACK_RANGES {
                    return Err(PacketError::InvalidAckRange);
                }
                let mut ranges: Vec<Range<u64>> = Vec::with_capacity(count);
                for _ in 0..count {
                    let start = body.u64()?;
                    let end = body.u64()?;
                    if start >= end {
                        return Err(PacketError::InvalidAckRange);
                    }
                    if let Some(prev) = ranges.last() {
                        if end > prev.start {
                            return Err(PacketError::InvalidAckRange);
                        }
                    }
                    ranges.push(start..end);
                }
                Frame::Ack { ranges }
            }
            frame_type::HANDSHAKE => {
                let kind = match body.u8()? {
                    0 => HandshakeKind::Initial,
                    1 => HandshakeKind::Accept,
                    _ => return Err(PacketError::InvalidField("handshake kind")),
                };
                Frame::Handshake {
                    kind,
                    stream_window: body.u64()?,
                    max_datagram_size: body.u16()?,
                }
            }
            frame_type::FIN => Frame::Fin,
            frame_type::RESET => {
                let scope = body.u8()?;
                let raw_id = body.u32()?;
                let code = body.u32()?;
                let stream_id = match scope {
                    0 => None,
                    1 => Some(stream_id(raw_id)?),
                    _ => return Err(PacketError::InvalidField("reset scope")),
                };
                Frame::Reset { stream_id, code }
            }
            frame_type::WINDOW_UPDATE => Frame::WindowUpdate {
                stream_id: stream_id(body.u32()?)?,
                max_data: body.u64()?,
            },
            other => return Err(PacketError::UnknownFrameType(other)),
        };

        if body.remaining() != 0 {
            return Err(PacketError::InvalidField("frame length"));
        }
        Ok(frame)
    }
}

fn stream_id(raw: u32) -> Result<StreamId, PacketError> {
    if raw > MAX_STREAM_ID {
        return Err(PacketError::InvalidStreamId(raw));
    }
    Ok(raw)
}

/// Fixed-size packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Chosen by the connecting side; identical in both directions.
    pub conn_id: u32,
    /// Connection-scoped, strictly increasing, never reused.
    pub packet_seq: u64,
}

/// A complete protocol datagram: header + frames.
///
/// The frame count and checksum are derived on [`Packet::encode`] and
/// verified on [`Packet::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub frames: Vec<Frame>,
}

impl Packet {
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.frames.iter().map(Frame::encoded_len).sum::<usize>()
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());

        buf.extend_from_slice(&self.header.conn_id.to_be_bytes());
        buf.extend_from_slice(&self.header.packet_seq.to_be_bytes());
        buf.extend_from_slice(&(self.frames.len() as u16).to_be_bytes());
        // Checksum field is zero while computing the checksum.
        buf.extend_from_slice(&0u16.to_be_bytes());

        for frame in &self.frames {
            frame.encode_into(&mut buf);
        }

        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        buf
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// Fails if the header is short, the checksum does not verify, any frame
    /// length overruns the buffer, a frame type or stream id is invalid, the
    /// frame count disagrees with the frames present, or bytes are left over.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::Truncated);
        }

        let mut header = Reader::new(&buf[..HEADER_LEN]);
        let conn_id = header.u32()?;
        let packet_seq = header.u64()?;
        let frame_count = header.u16()?;
        let checksum = header.u16()?;

        // Verify checksum: zero the stored field, recompute, compare.
        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
        if internet_checksum(&scratch) != checksum {
            return Err(PacketError::ChecksumFailed);
        }

        if frame_count == 0 {
            return Err(PacketError::EmptyPacket);
        }

        let mut reader = Reader::new(&buf[HEADER_LEN..]);
        let mut frames = Vec::with_capacity(usize::from(frame_count).min(64));
        for _ in 0..frame_count {
            frames.push(Frame::decode(&mut reader)?);
        }
        if reader.remaining() != 0 {
            return Err(PacketError::TrailingBytes(reader.remaining()));
        }

        Ok(Packet {
            header: Header {
                conn_id,
                packet_seq,
            },
            frames,
        })
    }
}

/// Bounds-checked big-endian cursor.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        if self.buf.len() < n {
            return Err(PacketError::Truncated);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, PacketError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, PacketError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, PacketError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// The caller must zero any checksum field within `data` first.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);

    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    // Odd trailing byte, padded with zero on the right.
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFF_CONN_ID: usize = 0;
    const OFF_PACKET_SEQ: usize = 4;
    const OFF_FRAME_COUNT: usize = 12;

    fn data(stream_id: StreamId, offset: u64, payload: &[u8], fin: bool) -> Frame {
        Frame::Data {
            stream_id,
            offset,
            fin,
            payload: payload.to_vec(),
        }
    }

    fn packet(packet_seq: u64, frames: Vec<Frame>) -> Packet {
        Packet {
            header: Header {
                conn_id: 0xdead_beef,
                packet_seq,
            },
            frames,
        }
    }

    /// Rewrite the checksum after hand-editing encoded bytes.
    fn reseal(bytes: &mut [u8]) {
        bytes[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&[0, 0]);
        let csum = internet_checksum(bytes);
        bytes[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
    }

    #[test]
    fn multi_frame_packet_survives_the_wire() {
        let pkt = packet(
            7,
            vec![
                Frame::Ack {
                    ranges: vec![10..12, 3..8],
                },
                data(1, 4096, b"hello", false),
                data(2, 0, b"", true),
                Frame::WindowUpdate {
                    stream_id: 1,
                    max_data: 1 << 20,
                },
                Frame::Reset {
                    stream_id: Some(3),
                    code: 9,
                },
                Frame::Fin,
            ],
        );
        let bytes = pkt.encode();
        assert_eq!(bytes.len(), pkt.encoded_len());
        assert_eq!(Packet::decode(&bytes), Ok(pkt));
    }

    #[test]
    fn handshake_frame_decodes() {
        let pkt = packet(
            0,
            vec![Frame::Handshake {
                kind: HandshakeKind::Accept,
                stream_window: 65_536,
                max_datagram_size: 1200,
            }],
        );
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded.frames, pkt.frames);
    }

    #[test]
    fn header_fields_big_endian_on_wire() {
        let pkt = Packet {
            header: Header {
                conn_id: 0x0102_0304,
                packet_seq: 0x0506_0708_090a_0b0c,
            },
            frames: vec![Frame::Fin],
        };
        let bytes = pkt.encode();
        assert_eq!(&bytes[OFF_CONN_ID..OFF_CONN_ID + 4], &[1, 2, 3, 4]);
        assert_eq!(
            &bytes[OFF_PACKET_SEQ..OFF_PACKET_SEQ + 8],
            &[5, 6, 7, 8, 9, 10, 11, 12]
        );
        assert_eq!(&bytes[OFF_FRAME_COUNT..OFF_FRAME_COUNT + 2], &[0, 1]);
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Packet::decode(&[]), Err(PacketError::Truncated));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Packet::decode(&[0u8; HEADER_LEN - 1]),
            Err(PacketError::Truncated)
        );
    }

    #[test]
    fn decode_corrupt_byte_returns_checksum_error() {
        let mut bytes = packet(1, vec![data(0, 0, b"test", false)]).encode();
        bytes[HEADER_LEN + 5] ^= 0xff;
        assert_eq!(Packet::decode(&bytes), Err(PacketError::ChecksumFailed));
    }

    #[test]
    fn frame_length_past_end_of_buffer_is_rejected() {
        let mut bytes = packet(1, vec![data(0, 0, b"abcd", false)]).encode();
        bytes.truncate(bytes.len() - 2);
        reseal(&mut bytes);
        assert_eq!(Packet::decode(&bytes), Err(PacketError::Truncated));
    }

    #[test]
    fn frame_count_larger_than_frames_present_is_rejected() {
        let mut bytes = packet(1, vec![Frame::Fin]).encode();
        bytes[OFF_FRAME_COUNT + 1] = 2;
        reseal(&mut bytes);
        assert_eq!(Packet::decode(&bytes), Err(PacketError::Truncated));
    }

    #[test]
    fn leftover_bytes_are_rejected() {
        let mut bytes = packet(1, vec![Frame::Fin]).encode();
        bytes.extend_from_slice(&[0, 0, 0]);
        reseal(&mut bytes);
        assert_eq!(Packet::decode(&bytes), Err(PacketError::TrailingBytes(3)));
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let mut bytes = packet(1, vec![Frame::Fin]).encode();
        bytes[HEADER_LEN] = 0x7f;
        reseal(&mut bytes);
        assert_eq!(
            Packet::decode(&bytes),
            Err(PacketError::UnknownFrameType(0x7f))
        );
    }

    #[test]
    fn negative_stream_id_is_rejected() {
        let mut bytes = packet(1, vec![data(0, 0, b"x", false)]).encode();
        // Body starts after the 3-byte frame prefix; stream id comes first.
        bytes[HEADER_LEN + FRAME_HEADER_LEN] = 0x80;
        reseal(&mut bytes);
        assert_eq!(
            Packet::decode(&bytes),
            Err(PacketError::InvalidStreamId(0x8000_0000))
        );
    }

    #[test]
    fn packet_without_frames_is_rejected() {
        let bytes = packet(1, vec![]).encode();
        assert_eq!(Packet::decode(&bytes), Err(PacketError::EmptyPacket));
    }

    #[test]
    fn empty_ack_range_is_rejected() {
        let bytes = packet(1, vec![Frame::Ack { ranges: vec![5..5] }]).encode();
        assert_eq!(Packet::decode(&bytes), Err(PacketError::InvalidAckRange));
    }

    #[test]
    fn ascending_ack_ranges_are_rejected() {
        let bytes = packet(
            1,
            vec![Frame::Ack {
                ranges: vec![1..2, 4..6],
            }],
        )
        .encode();
        assert_eq!(Packet::decode(&bytes), Err(PacketError::InvalidAckRange));
    }

    #[test]
    fn ack_frame_is_capped_at_max_ranges() {
        let ranges: Vec<Range<u64>> = (0..40u64).rev().map(|i| i * 4..i * 4 + 2).collect();
        let pkt = packet(1, vec![Frame::Ack { ranges }]);
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        match &decoded.frames[0] {
            Frame::Ack { ranges } => {
                assert_eq!(ranges.len(), MAX_ACK_RANGES);
                assert_eq!(ranges[0], 156..158);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn only_ack_and_handshake_are_not_ack_eliciting() {
        assert!(!Frame::Ack { ranges: vec![0..1] }.is_ack_eliciting());
        assert!(!Frame::Handshake {
            kind: HandshakeKind::Initial,
            stream_window: 0,
            max_datagram_size: 0,
        }
        .is_ack_eliciting());
        assert!(Frame::Fin.is_ack_eliciting());
        assert!(data(0, 0, b"", true).is_ack_eliciting());
    }

    #[test]
    fn header_len_constant_is_correct() {
        // conn_id(4) + packet_seq(8) + frame_count(2) + checksum(2) = 16
        assert_eq!(HEADER_LEN, 16);
        assert_eq!(OFF_CHECKSUM + 2, HEADER_LEN);
    }
}
