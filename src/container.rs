//! Self-describing byte layout for an [`EncodedField`].
//!
//! ```text
//! magic "FPK\x01" | width u8 | tolabs | midval | halfspanval | wlev u8 | nlay u8
//! nlay x (deps, minval, len u64) | data
//! ```
//!
//! Scalars are little-endian at the sample width (4 or 8 bytes).

use crate::error::{Error, Result};
use crate::layered::{EncodedField, FieldHeader, Layer};
use crate::sample::Sample;

const MAGIC: [u8; 4] = *b"FPK\x01";

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                Error::format(format!(
                    "container truncated: need {n} bytes at offset {}",
                    self.position
                ))
            })?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn sample<T: Sample>(&mut self) -> Result<T> {
        T::read_le(self.take(T::WIDTH)?)
            .ok_or_else(|| Error::format("malformed sample in container"))
    }
}

impl<T: Sample> EncodedField<T> {
    /// Serialize header, layers and data into one buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let per_layer = 2 * T::WIDTH + 8;
        let mut out =
            Vec::with_capacity(7 + 3 * T::WIDTH + per_layer * self.layers.len() + self.data.len());
        out.extend_from_slice(&MAGIC);
        out.push(T::WIDTH as u8);
        self.header.tolabs.write_le(&mut out);
        self.header.midval.write_le(&mut out);
        self.header.halfspanval.write_le(&mut out);
        out.push(self.header.wlev);
        out.push(self.header.nlay);
        for layer in &self.layers {
            layer.deps.write_le(&mut out);
            layer.minval.write_le(&mut out);
            out.extend_from_slice(&(layer.len as u64).to_le_bytes());
        }
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse a buffer written by [`EncodedField::to_bytes`].
    ///
    /// # Errors
    /// Returns `Error::Format` on a bad magic, a sample width that does not
    /// match `T`, truncation, or layer lengths that disagree with the data.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader { bytes, position: 0 };
        if reader.take(MAGIC.len())? != &MAGIC[..] {
            return Err(Error::format("not an encoded field (bad magic)"));
        }
        let width = reader.u8()?;
        if usize::from(width) != T::WIDTH {
            return Err(Error::format(format!(
                "container holds {width}-byte samples, expected {}",
                T::WIDTH
            )));
        }
        let tolabs = reader.sample()?;
        let midval = reader.sample()?;
        let halfspanval = reader.sample()?;
        let wlev = reader.u8()?;
        let nlay = reader.u8()?;

        let mut layers = Vec::with_capacity(usize::from(nlay));
        let mut total = 0usize;
        for _ in 0..nlay {
            let deps = reader.sample()?;
            let minval = reader.sample()?;
            let len = usize::try_from(reader.u64()?)
                .map_err(|_| Error::format("layer length does not fit in memory"))?;
            total = total
                .checked_add(len)
                .ok_or_else(|| Error::format("layer lengths overflow"))?;
            layers.push(Layer { deps, minval, len });
        }

        let data = &bytes[reader.position..];
        if data.len() != total {
            return Err(Error::format(format!(
                "layers announce {total} data bytes, container holds {}",
                data.len()
            )));
        }

        Ok(Self {
            header: FieldHeader {
                tolabs,
                midval,
                halfspanval,
                wlev,
                nlay,
            },
            layers,
            data: data.to_vec(),
        })
    }
}
