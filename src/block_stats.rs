//! Per-block frequency tables.
//!
//! Every block of up to [`BLOCK_SIZE`] byte symbols is coded under its own
//! static model. The encoder counts the block, writes the 256 raw counts with
//! the coder's flat 16-bit primitive, and then codes each symbol against the
//! cumulative table. The decoder reads the counts back, rebuilds the same
//! table, and adds an inverse lookup from cumulative frequency to symbol.

use crate::error::{Error, Result};
use crate::range_coder::{RangeDecoder, RangeEncoder};

/// Maximum number of symbols per block.
///
/// Keeps every raw count within 16 bits and every total far below the
/// coder's renormalisation threshold.
pub const BLOCK_SIZE: usize = 60_000;

/// Number of distinct symbols.
pub const ALPHABET_SIZE: usize = 256;

/// Cumulative frequency table of one block.
///
/// `cumulative[s]` is the number of symbols below `s` and
/// `cumulative[256]` is the block size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockStats {
    counts: [u16; ALPHABET_SIZE],
    cumulative: [u32; ALPHABET_SIZE + 1],
}

impl BlockStats {
    /// Count the symbols of one block.
    ///
    /// # Errors
    /// Returns `Error::InvalidInput` if the block is longer than [`BLOCK_SIZE`].
    pub fn from_symbols(block: &[u8]) -> Result<Self> {
        if block.len() > BLOCK_SIZE {
            return Err(Error::invalid(format!(
                "block of {} symbols exceeds {BLOCK_SIZE}",
                block.len()
            )));
        }
        let mut counts = [0u16; ALPHABET_SIZE];
        for &symbol in block {
            counts[symbol as usize] += 1;
        }
        Ok(Self::from_counts(counts))
    }

    fn from_counts(counts: [u16; ALPHABET_SIZE]) -> Self {
        let total: u32 = counts.iter().map(|&c| u32::from(c)).sum();
        let mut cumulative = [0u32; ALPHABET_SIZE + 1];
        cumulative[ALPHABET_SIZE] = total;
        // top down: cumulative[s] = cumulative[s + 1] - count[s]
        for s in (0..ALPHABET_SIZE).rev() {
            cumulative[s] = cumulative[s + 1] - u32::from(counts[s]);
        }
        Self { counts, cumulative }
    }

    /// Read the 256 raw counts of a block and rebuild the table.
    ///
    /// # Errors
    /// Returns `Error::Format` if the counts add up to more than [`BLOCK_SIZE`].
    pub fn read_from(decoder: &mut RangeDecoder<'_>) -> Result<Self> {
        let mut counts = [0u16; ALPHABET_SIZE];
        for count in counts.iter_mut() {
            *count = decoder.decode_u16()?;
        }
        let total: u32 = counts.iter().map(|&c| u32::from(c)).sum();
        if total as usize > BLOCK_SIZE {
            return Err(Error::format(format!(
                "inconsistent block table: {total} symbols exceed {BLOCK_SIZE}"
            )));
        }
        Ok(Self::from_counts(counts))
    }

    /// Write the raw counts with the flat 16-bit primitive.
    pub fn write_to(&self, encoder: &mut RangeEncoder) -> Result<()> {
        for &count in &self.counts {
            encoder.encode_u16(count)?;
        }
        Ok(())
    }

    /// Number of symbols in the block.
    pub fn block_size(&self) -> u32 {
        self.cumulative[ALPHABET_SIZE]
    }

    /// Raw count of `symbol`.
    pub fn count(&self, symbol: u8) -> u32 {
        u32::from(self.counts[symbol as usize])
    }

    /// `(freq, cum_freq)` of `symbol`.
    #[inline]
    pub fn interval(&self, symbol: u8) -> (u32, u32) {
        let s = symbol as usize;
        (self.cumulative[s + 1] - self.cumulative[s], self.cumulative[s])
    }

    /// The cumulative table, 257 entries.
    pub fn cumulative(&self) -> &[u32] {
        &self.cumulative
    }

    /// Encode every symbol of `block` under this table.
    pub fn encode_block(&self, encoder: &mut RangeEncoder, block: &[u8]) -> Result<()> {
        let total = self.block_size();
        for &symbol in block {
            let (freq, cum_freq) = self.interval(symbol);
            encoder.encode(freq, cum_freq, total)?;
        }
        Ok(())
    }

    /// Build the decoder's inverse lookup table.
    pub fn lookup(&self) -> SymbolLookup<'_> {
        let total = self.block_size() as usize;
        let mut table = vec![0u16; total + 1];
        for s in 0..ALPHABET_SIZE {
            let lo = self.cumulative[s] as usize;
            let hi = self.cumulative[s + 1] as usize;
            table[lo..hi].fill(s as u16);
        }
        table[total] = ALPHABET_SIZE as u16;
        SymbolLookup { stats: self, table }
    }
}

/// Inverse table mapping a cumulative frequency in `[0, block_size)` to its symbol.
#[derive(Debug)]
pub struct SymbolLookup<'a> {
    stats: &'a BlockStats,
    table: Vec<u16>,
}

impl SymbolLookup<'_> {
    /// Symbol owning cumulative frequency `cf`.
    ///
    /// Zero-frequency symbols are skipped by scanning forward from the table
    /// entry, so ties resolve to the same symbol the encoder used.
    pub fn symbol(&self, cf: u32) -> Result<u8> {
        let total = self.stats.block_size();
        if cf >= total {
            return Err(Error::format(format!(
                "cumulative frequency {cf} outside block of {total}"
            )));
        }
        let cumulative = self.stats.cumulative();
        let mut symbol = self.table[cf as usize] as usize;
        while cumulative[symbol + 1] <= cf {
            symbol += 1;
        }
        Ok(symbol as u8)
    }

    /// Decode one symbol: probe, look up, commit.
    pub fn decode_symbol(&self, decoder: &mut RangeDecoder<'_>) -> Result<u8> {
        let total = self.stats.block_size();
        let cf = decoder.decode_cumulative_freq(total)?;
        let symbol = self.symbol(cf)?;
        let (freq, cum_freq) = self.stats.interval(symbol);
        decoder.decode_update(freq, cum_freq, total)?;
        Ok(symbol)
    }
}
