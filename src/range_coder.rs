//! Carry-propagating range coder.
//!
//! The coder keeps the interval `[low, low + range)` in a 32-bit word and
//! shifts out one byte whenever `range` drops to [`BOTTOM`]. A byte whose
//! value could still change because of a later carry is held back: the
//! encoder keeps one pending byte plus a count of deferred `0xFF` bytes, and
//! resolves the whole run at once (`buffer` then `0xFF...` when no carry
//! arrives, `buffer + 1` then `0x00...` when it does).
//!
//! Decoding is split in two steps so the caller can consult its model in
//! between: [`RangeDecoder::decode_cumulative_freq`] probes the current
//! cumulative frequency without narrowing the interval, and
//! [`RangeDecoder::decode_update`] commits the symbol the caller found.
//!
//! ```text
//! stream = 0x00 | renormalised bytes ... | last | count[23:16] count[15:8] count[7:0]
//! ```

use crate::error::{Error, Result};

/// Width of the coder word in bits.
pub const CODE_BITS: u32 = 32;

/// Upper end of the coder interval.
pub const TOP: u32 = 1 << (CODE_BITS - 1);

/// Renormalisation threshold. Totals must not exceed this value.
pub const BOTTOM: u32 = TOP >> 8;

const SHIFT_BITS: u32 = CODE_BITS - 9;
const EXTRA_BITS: u32 = (CODE_BITS - 2) % 8 + 1;

/// First byte of every stream.
const HEADER_BYTE: u8 = 0x00;

/// Trailing byte-count bytes written by [`RangeEncoder::finish`].
const COUNT_BYTES: usize = 3;

fn check_interval(freq: u32, cum_freq: u32, total_freq: u32) -> Result<()> {
    if total_freq == 0 || total_freq > BOTTOM {
        return Err(Error::invalid(format!(
            "total frequency {total_freq} outside 1..={BOTTOM}"
        )));
    }
    if freq == 0 || cum_freq.saturating_add(freq) > total_freq {
        return Err(Error::invalid(format!(
            "symbol interval [{cum_freq}, {cum_freq}+{freq}) outside total {total_freq}"
        )));
    }
    Ok(())
}

/// Range encoder writing into an owned byte vector.
#[derive(Debug)]
pub struct RangeEncoder {
    low: u32,
    range: u32,
    /// Byte waiting for a possible carry.
    buffer: u8,
    /// Number of deferred bytes behind `buffer`.
    pending: u32,
    byte_count: u32,
    output: Vec<u8>,
}

impl RangeEncoder {
    /// Create a new encoder with the full code range.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a new encoder with a pre-sized output buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            low: 0,
            range: TOP,
            buffer: HEADER_BYTE,
            pending: 0,
            byte_count: 0,
            output: Vec::with_capacity(capacity),
        }
    }

    fn flush_pending(&mut self, fill: u8) {
        for _ in 0..self.pending {
            self.output.push(fill);
        }
        self.pending = 0;
    }

    fn normalize(&mut self) {
        while self.range <= BOTTOM {
            if self.low < (0xff << SHIFT_BITS) {
                // no carry can reach the buffered byte any more
                self.output.push(self.buffer);
                self.flush_pending(0xff);
                self.buffer = (self.low >> SHIFT_BITS) as u8;
            } else if self.low & TOP != 0 {
                // carry arrived; it cannot happen again for this run
                self.output.push(self.buffer.wrapping_add(1));
                self.flush_pending(0x00);
                self.buffer = (self.low >> SHIFT_BITS) as u8;
            } else {
                self.pending += 1;
            }
            self.range <<= 8;
            self.low = (self.low << 8) & (TOP - 1);
            self.byte_count = self.byte_count.wrapping_add(1);
        }
    }

    /// Encode a symbol occupying `[cum_freq, cum_freq + freq)` out of `total_freq`.
    ///
    /// # Errors
    /// Returns `Error::InvalidInput` if `freq` is 0, the interval exceeds the
    /// total, or `total_freq` is larger than [`BOTTOM`].
    pub fn encode(&mut self, freq: u32, cum_freq: u32, total_freq: u32) -> Result<()> {
        check_interval(freq, cum_freq, total_freq)?;
        self.normalize();
        let r = self.range / total_freq;
        let tmp = r * cum_freq;
        self.low = self.low.wrapping_add(tmp);
        if cum_freq + freq < total_freq {
            self.range = r * freq;
        } else {
            self.range -= tmp;
        }
        Ok(())
    }

    /// Encode a symbol against a total of `1 << shift`.
    pub fn encode_shift(&mut self, freq: u32, cum_freq: u32, shift: u32) -> Result<()> {
        if shift > SHIFT_BITS {
            return Err(Error::invalid(format!("shift {shift} exceeds {SHIFT_BITS}")));
        }
        check_interval(freq, cum_freq, 1 << shift)?;
        self.normalize();
        let r = self.range >> shift;
        let tmp = r * cum_freq;
        self.low = self.low.wrapping_add(tmp);
        if (cum_freq + freq) >> shift != 0 {
            self.range -= tmp;
        } else {
            self.range = r * freq;
        }
        Ok(())
    }

    /// Encode a raw 16-bit value under a flat distribution.
    pub fn encode_u16(&mut self, value: u16) -> Result<()> {
        self.encode_shift(1, u32::from(value), 16)
    }

    /// Bytes emitted so far, not counting the pending run.
    pub fn bytes_written(&self) -> usize {
        self.output.len()
    }

    /// Number of deferred bytes currently waiting for carry resolution.
    pub fn pending_run(&self) -> u32 {
        self.pending
    }

    /// Flush the pending byte and carry run, append the trailer and return the stream.
    ///
    /// The trailer is the final rounding byte followed by the low 24 bits of
    /// the total byte count, so the stream length can be recovered from its
    /// end with [`trailer_length`].
    pub fn finish(mut self) -> Vec<u8> {
        self.normalize();
        self.byte_count = self.byte_count.wrapping_add(5);
        let tmp = if (self.low & (BOTTOM - 1)) < ((self.byte_count & 0x00ff_ffff) >> 1) {
            self.low >> SHIFT_BITS
        } else {
            (self.low >> SHIFT_BITS) + 1
        };
        if tmp > 0xff {
            self.output.push(self.buffer.wrapping_add(1));
            self.flush_pending(0x00);
        } else {
            self.output.push(self.buffer);
            self.flush_pending(0xff);
        }
        self.output.push(tmp as u8);
        self.output.push((self.byte_count >> 16) as u8);
        self.output.push((self.byte_count >> 8) as u8);
        self.output.push(self.byte_count as u8);
        self.output
    }
}

impl Default for RangeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Range decoder reading from a borrowed byte slice.
#[derive(Debug)]
pub struct RangeDecoder<'a> {
    low: u32,
    range: u32,
    buffer: u8,
    /// `range / total` of the last probe, reused by `decode_update`.
    step: u32,
    input: &'a [u8],
    position: usize,
}

impl<'a> RangeDecoder<'a> {
    /// Start decoding `input`.
    ///
    /// # Errors
    /// Returns `Error::Format` for an empty stream or a wrong header byte and
    /// `Error::TruncatedStream` if the stream ends right after the header.
    pub fn new(input: &'a [u8]) -> Result<Self> {
        let header = *input
            .first()
            .ok_or_else(|| Error::format("empty range-coded stream"))?;
        if header != HEADER_BYTE {
            return Err(Error::format(format!(
                "unexpected stream header byte 0x{header:02x}"
            )));
        }
        let buffer = *input
            .get(1)
            .ok_or(Error::TruncatedStream { position: 1 })?;
        Ok(Self {
            low: u32::from(buffer) >> (8 - EXTRA_BITS),
            range: 1 << EXTRA_BITS,
            buffer,
            step: 0,
            input,
            position: 2,
        })
    }

    fn next_byte(&mut self) -> Result<u8> {
        let byte = *self
            .input
            .get(self.position)
            .ok_or(Error::TruncatedStream {
                position: self.position,
            })?;
        self.position += 1;
        Ok(byte)
    }

    fn normalize(&mut self) -> Result<()> {
        while self.range <= BOTTOM {
            self.low = (self.low << 8) | ((u32::from(self.buffer) << EXTRA_BITS) & 0xff);
            self.buffer = self.next_byte()?;
            self.low |= u32::from(self.buffer) >> (8 - EXTRA_BITS);
            self.range <<= 8;
        }
        Ok(())
    }

    /// Probe the cumulative frequency of the next symbol. Does not consume it.
    ///
    /// The result is clamped to `total_freq - 1`.
    pub fn decode_cumulative_freq(&mut self, total_freq: u32) -> Result<u32> {
        if total_freq == 0 || total_freq > BOTTOM {
            return Err(Error::invalid(format!(
                "total frequency {total_freq} outside 1..={BOTTOM}"
            )));
        }
        self.normalize()?;
        self.step = self.range / total_freq;
        let tmp = self.low / self.step;
        Ok(tmp.min(total_freq - 1))
    }

    /// Probe the cumulative frequency against a total of `1 << shift`.
    pub fn decode_cumulative_shift(&mut self, shift: u32) -> Result<u32> {
        if shift > SHIFT_BITS {
            return Err(Error::invalid(format!("shift {shift} exceeds {SHIFT_BITS}")));
        }
        self.normalize()?;
        self.step = self.range >> shift;
        let tmp = self.low / self.step;
        if tmp >> shift != 0 {
            Ok((1 << shift) - 1)
        } else {
            Ok(tmp)
        }
    }

    /// Narrow the interval to the symbol found after the last probe.
    pub fn decode_update(&mut self, freq: u32, cum_freq: u32, total_freq: u32) -> Result<()> {
        check_interval(freq, cum_freq, total_freq)?;
        let tmp = self.step.wrapping_mul(cum_freq);
        self.low = self.low.wrapping_sub(tmp);
        if cum_freq + freq < total_freq {
            self.range = self.step.wrapping_mul(freq);
        } else {
            self.range = self.range.wrapping_sub(tmp);
        }
        Ok(())
    }

    /// Decode a raw 16-bit value written by [`RangeEncoder::encode_u16`].
    pub fn decode_u16(&mut self) -> Result<u16> {
        let value = self.decode_cumulative_shift(16)?;
        self.decode_update(1, value, 1 << 16)?;
        Ok(value as u16)
    }

    /// Consume the remaining renormalisation bytes and return the stream length read.
    pub fn finish(mut self) -> Result<usize> {
        self.normalize()?;
        Ok(self.position)
    }
}

/// Byte count recorded in the trailer of a finished stream.
///
/// Only the low 24 bits are stored. Returns `None` for streams too short to
/// carry a trailer.
pub fn trailer_length(stream: &[u8]) -> Option<u32> {
    if stream.len() < COUNT_BYTES + 1 {
        return None;
    }
    let tail = &stream[stream.len() - COUNT_BYTES..];
    Some((u32::from(tail[0]) << 16) | (u32::from(tail[1]) << 8) | u32::from(tail[2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_script(stream: &[u8], script: &[(u32, u32, u32)]) -> usize {
        let mut decoder = RangeDecoder::new(stream).unwrap();
        for &(freq, cum_freq, total) in script {
            let cf = decoder.decode_cumulative_freq(total).unwrap();
            assert!(cum_freq <= cf && cf < cum_freq + freq, "cf {cf} for {cum_freq}+{freq}");
            decoder.decode_update(freq, cum_freq, total).unwrap();
        }
        decoder.finish().unwrap()
    }

    #[test]
    fn test_range_basic_roundtrip() {
        let symbols = [(0u32, 128u32), (128, 64), (192, 64)];
        let input = [0usize, 1, 2, 0, 0, 2, 1, 1, 0];

        let mut encoder = RangeEncoder::new();
        for &idx in &input {
            let (cum_freq, freq) = symbols[idx];
            encoder.encode(freq, cum_freq, 256).unwrap();
        }
        let stream = encoder.finish();

        let mut decoder = RangeDecoder::new(&stream).unwrap();
        let mut output = Vec::new();
        for _ in 0..input.len() {
            let cf = decoder.decode_cumulative_freq(256).unwrap();
            let idx = if cf < 128 {
                0
            } else if cf < 192 {
                1
            } else {
                2
            };
            output.push(idx);
            let (cum_freq, freq) = symbols[idx];
            decoder.decode_update(freq, cum_freq, 256).unwrap();
        }
        assert_eq!(decoder.finish().unwrap(), stream.len());
        assert_eq!(output, input);
    }

    #[test]
    fn test_deferred_carry_run_resolves_with_carry() {
        // The second symbol parks `low` just below TOP with a 0xff top byte.
        // Each following symbol defers one more 0xff byte, four in all, and
        // the last pushes `low` across TOP so the whole run flips to zeros.
        let script = [
            (256, 0x10ff, 0x1_0000),
            (2, 1, 512),
            (2, 0xff, 512),
            (2, 0xff, 512),
            (2, 0xff, 512),
            (1, 1, 2),
        ];
        let mut encoder = RangeEncoder::new();
        let mut max_run = 0;
        for &(freq, cum_freq, total) in &script {
            encoder.encode(freq, cum_freq, total).unwrap();
            max_run = max_run.max(encoder.pending_run());
        }
        assert_eq!(max_run, 4);
        let stream = encoder.finish();

        assert_eq!(
            stream,
            vec![0x00, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0a]
        );
        assert_eq!(decode_script(&stream, &script), stream.len());
    }

    #[test]
    fn test_deferred_run_without_carry() {
        // Always taking the upper half keeps the top byte at 0xff forever.
        let script = vec![(1u32, 1u32, 2u32); 200];
        let mut encoder = RangeEncoder::new();
        for &(freq, cum_freq, total) in &script {
            encoder.encode(freq, cum_freq, total).unwrap();
        }
        assert!(encoder.pending_run() >= 2);
        let stream = encoder.finish();

        assert_eq!(stream[0], 0x00);
        assert!(stream[1..25].iter().all(|&b| b == 0xff));
        assert_eq!(decode_script(&stream, &script), stream.len());
    }

    #[test]
    fn test_trailer_records_stream_length() {
        let mut encoder = RangeEncoder::new();
        for i in 0..5000u32 {
            encoder.encode(1, i % 7, 7).unwrap();
        }
        let stream = encoder.finish();
        assert_eq!(trailer_length(&stream), Some(stream.len() as u32));
        assert_eq!(trailer_length(&[0, 1, 2]), None);
    }

    #[test]
    fn test_empty_stream_is_format_error() {
        assert!(matches!(RangeDecoder::new(&[]), Err(Error::Format(_))));
        assert!(matches!(RangeDecoder::new(&[0x42, 0]), Err(Error::Format(_))));
    }

    #[test]
    fn test_truncated_stream_is_reported() {
        let mut encoder = RangeEncoder::new();
        for i in 0..64u32 {
            encoder.encode_u16((i * 977) as u16).unwrap();
        }
        let stream = encoder.finish();

        let mut decoder = RangeDecoder::new(&stream[..6]).unwrap();
        let result = (0..64).try_for_each(|_| decoder.decode_u16().map(|_| ()));
        assert!(matches!(result, Err(Error::TruncatedStream { .. })));
    }

    #[test]
    fn test_raw_u16_roundtrip() {
        let values = [0u16, 1, 0xffff, 0x8000, 60000, 12345, 0xfffe];
        let mut encoder = RangeEncoder::new();
        for &v in &values {
            encoder.encode_u16(v).unwrap();
        }
        let stream = encoder.finish();
        let mut decoder = RangeDecoder::new(&stream).unwrap();
        for &v in &values {
            assert_eq!(decoder.decode_u16().unwrap(), v);
        }
        assert_eq!(decoder.finish().unwrap(), stream.len());
    }

    #[test]
    fn test_encode_rejects_bad_intervals() {
        let mut encoder = RangeEncoder::new();
        assert!(encoder.encode(0, 0, 10).is_err());
        assert!(encoder.encode(5, 6, 10).is_err());
        assert!(encoder.encode(1, 0, BOTTOM + 1).is_err());
        assert!(encoder.encode(1, 0, 0).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_range_roundtrip_small_alphabet(
            a in 1u32..5000,
            b in 1u32..5000,
            c in 1u32..5000,
            input in prop::collection::vec(0usize..3, 1..400),
        ) {
            let total = a + b + c;
            let symbols = [(0u32, a), (a, b), (a + b, c)];

            let mut encoder = RangeEncoder::new();
            for &idx in &input {
                let (cum_freq, freq) = symbols[idx];
                encoder.encode(freq, cum_freq, total).unwrap();
            }
            let stream = encoder.finish();
            prop_assert_eq!(trailer_length(&stream), Some(stream.len() as u32));

            let mut decoder = RangeDecoder::new(&stream).unwrap();
            let mut output = Vec::with_capacity(input.len());
            for _ in 0..input.len() {
                let cf = decoder.decode_cumulative_freq(total).unwrap();
                let idx = if cf < a { 0 } else if cf < a + b { 1 } else { 2 };
                output.push(idx);
                let (cum_freq, freq) = symbols[idx];
                decoder.decode_update(freq, cum_freq, total).unwrap();
            }
            prop_assert_eq!(decoder.finish().unwrap(), stream.len());
            prop_assert_eq!(input, output);
        }
    }
}
