//! Block-framed range coding of byte sequences.
//!
//! ```text
//! repeat:
//!   marker        1 of 2   (1 = block follows, 0 = end)
//!   counts        256 x u16, flat coded
//!   symbols       block_size x symbol under the block's table
//! end marker, then the coder trailer
//! ```
//!
//! The block size is not transmitted; it is the sum of the counts. A block
//! shorter than [`BLOCK_SIZE`] ends the data, so an input whose length is a
//! multiple of [`BLOCK_SIZE`] (including an empty input) carries one final
//! empty block.

use tracing::trace;

use crate::block_stats::{BlockStats, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::range_coder::{RangeDecoder, RangeEncoder};

const MORE_DATA: u32 = 1;
const END_OF_DATA: u32 = 0;

/// Range-code an arbitrary byte sequence.
pub fn encode_bytes(input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = RangeEncoder::with_capacity(input.len() + input.len() / 8 + 1024);
    let mut offset = 0;
    loop {
        let end = (offset + BLOCK_SIZE).min(input.len());
        let block = &input[offset..end];
        offset = end;

        encoder.encode(1, MORE_DATA, 2)?;
        let stats = BlockStats::from_symbols(block)?;
        stats.write_to(&mut encoder)?;
        stats.encode_block(&mut encoder, block)?;
        trace!(
            block_len = block.len(),
            written = encoder.bytes_written(),
            "encoded block"
        );

        if block.len() < BLOCK_SIZE {
            break;
        }
    }
    encoder.encode(1, END_OF_DATA, 2)?;
    Ok(encoder.finish())
}

/// Decode a stream produced by [`encode_bytes`].
///
/// With `expected_len` set, producing a different number of symbols is a
/// format error.
pub fn decode_bytes(stream: &[u8], expected_len: Option<usize>) -> Result<Vec<u8>> {
    let mut decoder = RangeDecoder::new(stream)?;
    let mut output = Vec::with_capacity(expected_len.unwrap_or(stream.len()));

    loop {
        let marker = decoder.decode_cumulative_freq(2)?;
        decoder.decode_update(1, marker, 2)?;
        if marker == END_OF_DATA {
            break;
        }

        let stats = BlockStats::read_from(&mut decoder)?;
        let block_size = stats.block_size() as usize;
        if let Some(expected) = expected_len {
            if output.len() + block_size > expected {
                return Err(Error::format(format!(
                    "stream holds more than the expected {expected} symbols"
                )));
            }
        }
        let lookup = stats.lookup();
        for _ in 0..block_size {
            output.push(lookup.decode_symbol(&mut decoder)?);
        }
        trace!(block_size, decoded = output.len(), "decoded block");
    }
    let consumed = decoder.finish()?;
    if consumed != stream.len() {
        return Err(Error::format(format!(
            "stream ends after {consumed} bytes, {} supplied",
            stream.len()
        )));
    }

    if let Some(expected) = expected_len {
        if output.len() != expected {
            return Err(Error::format(format!(
                "decoded {} symbols, expected {expected}",
                output.len()
            )));
        }
    }
    Ok(output)
}
