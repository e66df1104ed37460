//! Per-stream reassembly of out-of-order byte ranges.
//!
//! DATA frames may arrive in any order, overlap, or repeat.  The
//! [`Reassembler`] stores only bytes it has not seen, keyed by stream offset,
//! and hands the application the contiguous prefix starting at the read
//! position.  Bytes leave the buffer as soon as they are read.
//!
//! ```text
//!  read_offset            gap              received_end
//!       │◀── contiguous ──▶│◀───▶│◀─ held ─▶│
//!  ─────┼──────────────────┼─────┼──────────┼────▶ offset
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("final size changed from {known} to {claimed}")]
    FinalSizeChanged { known: u64, claimed: u64 },
    #[error("data ends at {end}, beyond final size {final_size}")]
    BeyondFinalSize { end: u64, final_size: u64 },
    #[error("offset overflows the stream")]
    OffsetOverflow,
}

#[derive(Debug, Default)]
pub struct Reassembler {
    /// Disjoint segments, every key at or above `read_offset`.
    segments: BTreeMap<u64, Vec<u8>>,
    /// Bytes already handed to the application.
    read_offset: u64,
    /// Highest `offset + len` seen so far.
    received_end: u64,
    /// Stream length, once a FIN has been seen.
    final_size: Option<u64>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `payload` at `offset`.
    ///
    /// Returns the number of previously unseen bytes.  Repeated or
    /// overlapping ranges are idempotent; only the novel part is kept.
    pub fn insert(&mut self, offset: u64, payload: &[u8], fin: bool) -> Result<usize, ReassemblyError> {
        let end = offset
            .checked_add(payload.len() as u64)
            .ok_or(ReassemblyError::OffsetOverflow)?;

        if let Some(final_size) = self.final_size {
            if end > final_size {
                return Err(ReassemblyError::BeyondFinalSize { end, final_size });
            }
            if fin && end != final_size {
                return Err(ReassemblyError::FinalSizeChanged {
                    known: final_size,
                    claimed: end,
                });
            }
        } else if fin {
            if end < self.received_end {
                return Err(ReassemblyError::FinalSizeChanged {
                    known: self.received_end,
                    claimed: end,
                });
            }
            self.final_size = Some(end);
        }
        self.received_end = self.received_end.max(end);

        let mut cursor = offset.max(self.read_offset);
        if let Some((&start, seg)) = self.segments.range(..=cursor).next_back() {
            cursor = cursor.max(start + seg.len() as u64);
        }

        let mut novel = 0;
        while cursor < end {
            let next = self
                .segments
                .range(cursor..)
                .next()
                .map(|(&start, seg)| (start, start + seg.len() as u64));
            let gap_end = match next {
                Some((start, _)) if start < end => start,
                _ => end,
            };
            if gap_end > cursor {
                let lo = (cursor - offset) as usize;
                let hi = (gap_end - offset) as usize;
                self.segments.insert(cursor, payload[lo..hi].to_vec());
                novel += hi - lo;
            }
            cursor = match next {
                Some((start, seg_end)) if start < end => seg_end,
                _ => end,
            };
        }

        Ok(novel)
    }

    /// Drain the contiguous prefix at the read position.
    ///
    /// The returned iterator yields chunks in order and stops at the first
    /// gap.  Consumed bytes cannot be read again.
    pub fn read(&mut self) -> Drain<'_> {
        Drain { inner: self }
    }

    /// [`read`](Self::read) collected into one buffer.
    pub fn read_contiguous(&mut self) -> Vec<u8> {
        self.read().flatten().collect()
    }

    /// Every byte up to the final size has been read.
    pub fn is_finished(&self) -> bool {
        self.final_size == Some(self.read_offset)
    }

    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    /// Bytes held but not yet read.
    pub fn buffered(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }

    /// Discard everything that is not readable right now.
    pub fn retain_contiguous(&mut self) {
        let mut expected = self.read_offset;
        let mut keep = BTreeMap::new();
        while let Some((start, seg)) = self.segments.pop_first() {
            if start != expected {
                break;
            }
            expected += seg.len() as u64;
            keep.insert(start, seg);
        }
        self.segments = keep;
    }
}

/// Iterator returned by [`Reassembler::read`].
pub struct Drain<'a> {
    inner: &'a mut Reassembler,
}

impl Iterator for Drain<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let (&start, _) = self.inner.segments.first_key_value()?;
        if start != self.inner.read_offset {
            return None;
        }
        let (_, chunk) = self.inner.segments.pop_first()?;
        self.inner.read_offset += chunk.len() as u64;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_bytes_are_readable_immediately() {
        let mut r = Reassembler::new();
        assert_eq!(r.insert(0, b"hello", false), Ok(5));
        assert_eq!(r.read_contiguous(), b"hello");
        assert_eq!(r.read_offset(), 5);
    }

    #[test]
    fn gap_blocks_reading_until_filled() {
        let mut r = Reassembler::new();
        r.insert(5, b"world", false).unwrap();
        assert!(r.read_contiguous().is_empty());

        r.insert(0, b"hello", false).unwrap();
        assert_eq!(r.read_contiguous(), b"helloworld");
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let mut once = Reassembler::new();
        once.insert(0, b"abcdef", false).unwrap();

        let mut twice = Reassembler::new();
        twice.insert(0, b"abcdef", false).unwrap();
        assert_eq!(twice.insert(0, b"abcdef", false), Ok(0));

        assert_eq!(once.read_contiguous(), twice.read_contiguous());
    }

    #[test]
    fn overlap_stores_only_novel_bytes() {
        let mut r = Reassembler::new();
        r.insert(2, b"cd", false).unwrap();
        r.insert(6, b"gh", false).unwrap();
        // Covers both held segments plus the gaps around them.
        assert_eq!(r.insert(0, b"abcdefghij", false), Ok(6));
        assert_eq!(r.buffered(), 10);
        assert_eq!(r.read_contiguous(), b"abcdefghij");
    }

    #[test]
    fn data_below_read_position_is_discarded() {
        let mut r = Reassembler::new();
        r.insert(0, b"abc", false).unwrap();
        r.read_contiguous();
        assert_eq!(r.insert(0, b"abcde", false), Ok(2));
        assert_eq!(r.read_contiguous(), b"de");
    }

    #[test]
    fn drain_stops_at_first_gap() {
        let mut r = Reassembler::new();
        r.insert(0, b"ab", false).unwrap();
        r.insert(2, b"cd", false).unwrap();
        r.insert(6, b"gh", false).unwrap();
        let chunks: Vec<Vec<u8>> = r.read().collect();
        assert_eq!(chunks, vec![b"ab".to_vec(), b"cd".to_vec()]);
        assert_eq!(r.buffered(), 2);
    }

    #[test]
    fn fin_finishes_after_last_byte_is_read() {
        let mut r = Reassembler::new();
        r.insert(3, b"def", true).unwrap();
        assert_eq!(r.final_size(), Some(6));
        assert!(!r.is_finished());

        r.insert(0, b"abc", false).unwrap();
        assert_eq!(r.read_contiguous(), b"abcdef");
        assert!(r.is_finished());
    }

    #[test]
    fn empty_fin_at_contiguous_end_finishes() {
        let mut r = Reassembler::new();
        r.insert(0, b"xyz", false).unwrap();
        r.read_contiguous();
        r.insert(3, b"", true).unwrap();
        assert!(r.is_finished());
    }

    #[test]
    fn data_past_final_size_is_rejected() {
        let mut r = Reassembler::new();
        r.insert(0, b"ab", true).unwrap();
        assert_eq!(
            r.insert(2, b"c", false),
            Err(ReassemblyError::BeyondFinalSize {
                end: 3,
                final_size: 2
            })
        );
    }

    #[test]
    fn conflicting_fin_is_rejected() {
        let mut r = Reassembler::new();
        r.insert(0, b"abcd", false).unwrap();
        assert!(matches!(
            r.insert(0, b"ab", true),
            Err(ReassemblyError::FinalSizeChanged { .. })
        ));
    }

    #[test]
    fn retain_contiguous_drops_out_of_order_segments() {
        let mut r = Reassembler::new();
        r.insert(0, b"ab", false).unwrap();
        r.insert(5, b"f", false).unwrap();
        r.retain_contiguous();
        assert_eq!(r.buffered(), 2);
        assert_eq!(r.read_contiguous(), b"ab");
    }
}
