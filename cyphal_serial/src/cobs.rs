//!
//! Consistent Overhead Byte Stuffing: the interior of every frame is free of
//! the `0x00` delimiter byte, which is reserved exclusively as a frame
//! boundary marker.
//!

use heapless::Vec as HVec;

/// Maximum number of non-zero data bytes between two encoded code bytes.
/// A run longer than this is split with an overflow block (code `0xFF`)
/// that carries no implicit zero.
const MAX_BLOCK: usize = 254;

/// Incremental COBS encoder.
///
/// Bytes are pushed one at a time; whenever a block boundary is reached
/// (a zero byte is pushed, or `MAX_BLOCK` non-zero bytes have accumulated)
/// the encoder emits one fragment of at most 255 bytes (a code byte plus up
/// to 254 data bytes) to the sink. Working memory is bounded at 254 bytes
/// regardless of transfer size.
pub struct CobsEncoder {
    block: HVec<u8, MAX_BLOCK>,
}

impl CobsEncoder {
    pub fn new() -> Self {
        CobsEncoder { block: HVec::new() }
    }

    /// Pushes one byte of the original (pre-COBS) stream through the
    /// encoder. Returns `false` if the sink aborted the transfer, in which
    /// case no further bytes should be pushed.
    #[must_use]
    pub fn push(&mut self, byte: u8, sink: &mut dyn FnMut(&[u8]) -> bool) -> bool {
        if byte == 0 {
            return self.flush(false, sink);
        }
        if self.block.push(byte).is_err() {
            if !self.flush(true, sink) {
                return false;
            }
            let _ = self.block.push(byte);
        }
        true
    }

    /// Flushes the final, un-terminated block. Must be called exactly once
    /// after the last payload byte, before the closing delimiter is emitted.
    #[must_use]
    pub fn finish(&mut self, sink: &mut dyn FnMut(&[u8]) -> bool) -> bool {
        self.flush(false, sink)
    }

    fn flush(&mut self, overflow: bool, sink: &mut dyn FnMut(&[u8]) -> bool) -> bool {
        let code = if overflow { 0xFFu8 } else { self.block.len() as u8 + 1 };
        let mut fragment = [0u8; MAX_BLOCK + 1];
        fragment[0] = code;
        fragment[1..1 + self.block.len()].copy_from_slice(&self.block);
        let len = 1 + self.block.len();
        self.block.clear();
        sink(&fragment[..len])
    }
}

impl Default for CobsEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Up to two bytes decoded from a single input byte: a data byte may be
/// immediately followed by an implicit zero that COBS removed on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    buf: [u8; 2],
    len: u8,
}

impl Decoded {
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }
}

/// Byte-at-a-time COBS decoder.
///
/// This type is delimiter-agnostic by design: the `0x00` frame boundary is
/// never passed to [`CobsDecoder::feed`] — the caller (the reassembler)
/// intercepts delimiters and calls [`CobsDecoder::reset`] instead, which is
/// what makes "any decoder state is safely reset to `AwaitFrameStart` on a
/// delimiter" trivially true.
///
/// Completing a non-overflow block never means the original stream had a
/// zero there *and* more data follows — it might be the frame's very last
/// block, in which case the next thing the caller sees is the real `0x00`
/// delimiter, not more wire bytes. Since a block boundary alone can't tell
/// those two cases apart, the implicit zero a completed block owes is kept
/// as `pending_zero` and only actually emitted once a further byte is fed
/// through [`CobsDecoder::feed`]; [`CobsDecoder::reset`] silently drops it,
/// so a frame's terminal block never produces a spurious trailing zero.
pub struct CobsDecoder {
    awaiting_code: bool,
    remaining: u8,
    suppress_trailing_zero: bool,
    pending_zero: bool,
}

impl CobsDecoder {
    pub fn new() -> Self {
        CobsDecoder {
            awaiting_code: true,
            remaining: 0,
            suppress_trailing_zero: false,
            pending_zero: false,
        }
    }

    /// Returns the decoder to its just-constructed state. Called on every
    /// frame delimiter; any zero still owed from the last block is dropped,
    /// since that delimiter is the real frame boundary, not an interior zero.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feeds one non-zero wire byte through the decoder.
    ///
    /// The caller must never pass `0x00` — that byte is the frame delimiter
    /// and is handled one layer up.
    pub fn feed(&mut self, byte: u8) -> Decoded {
        debug_assert_ne!(byte, 0, "frame delimiter must not reach the COBS decoder");
        let mut out = Decoded::default();

        if self.pending_zero {
            out.buf[out.len as usize] = 0;
            out.len += 1;
            self.pending_zero = false;
        }

        if self.awaiting_code {
            let code = byte;
            if code == 0xFF {
                self.remaining = 254;
                self.suppress_trailing_zero = true;
            } else {
                self.remaining = code - 1;
                self.suppress_trailing_zero = false;
            }
            self.awaiting_code = false;
            if self.remaining == 0 {
                self.awaiting_code = true;
                self.pending_zero = !self.suppress_trailing_zero;
            }
        } else {
            self.remaining -= 1;
            out.buf[out.len as usize] = byte;
            out.len += 1;
            if self.remaining == 0 {
                self.awaiting_code = true;
                self.pending_zero = !self.suppress_trailing_zero;
            }
        }
        out
    }
}

impl Default for CobsDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode_all(data: &[u8]) -> heapless::Vec<u8, 1024> {
        let mut out: heapless::Vec<u8, 1024> = heapless::Vec::new();
        let mut encoder = CobsEncoder::new();
        for &b in data {
            let ok = encoder.push(b, &mut |frag| {
                out.extend_from_slice(frag).unwrap();
                true
            });
            assert!(ok);
        }
        let ok = encoder.finish(&mut |frag| {
            out.extend_from_slice(frag).unwrap();
            true
        });
        assert!(ok);
        out
    }

    fn decode_all(encoded: &[u8]) -> heapless::Vec<u8, 1024> {
        let mut out: heapless::Vec<u8, 1024> = heapless::Vec::new();
        let mut decoder = CobsDecoder::new();
        for &b in encoded {
            let decoded = decoder.feed(b);
            out.extend_from_slice(decoded.as_slice()).unwrap();
        }
        out
    }

    fn round_trip(data: &[u8]) {
        let encoded = encode_all(data);
        assert!(!encoded.contains(&0), "COBS output must never contain a zero byte");
        let decoded = decode_all(&encoded);
        assert_eq!(decoded.as_slice(), data);
    }

    #[test]
    fn empty_input() {
        round_trip(&[]);
    }

    #[test]
    fn no_zeros() {
        round_trip(b"hello");
    }

    #[test]
    fn leading_and_trailing_zero() {
        round_trip(&[0, 1, 2, 3, 0]);
    }

    #[test]
    fn adjacent_zeros() {
        round_trip(&[1, 0, 0, 0, 2]);
    }

    #[test]
    fn long_run_without_zero_exceeds_one_block() {
        let data: heapless::Vec<u8, 600> = (0..600u16).map(|i| (i % 255 + 1) as u8).collect();
        round_trip(&data);
    }

    #[test]
    fn all_zero_bytes() {
        round_trip(&[0, 0, 0, 0]);
    }
}
