//! Codec configuration.

use crate::error::{Error, Result};
use crate::transform::MAX_HAAR_LEVELS;

/// Default cap on the number of layers per field.
pub const DEFAULT_MAX_LAYERS: u8 = 8;

/// Default multiplier on `max_layers * max(ntot, 1024)` for the encoded buffer.
pub const DEFAULT_SAFETY_FACTOR: usize = 2;

/// Default transform depth when a transform is requested.
pub const DEFAULT_TRANSFORM_LEVELS: u8 = 4;

/// Default finest-to-coarsest cutoff for local tolerances.
pub const DEFAULT_DETAIL_CUTOFF_LEVEL: u8 = 1;

/// Smallest element count the capacity formula uses.
pub const MIN_CAPACITY_ELEMENTS: usize = 1024;

/// Tunables of the layered codec.
///
/// The decoder only needs `max_layers` (to reject oversized headers); the rest
/// shapes encoding and travels with the output as metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CodecConfig {
    /// Hard cap on the number of layers emitted per field.
    pub max_layers: u8,
    /// Expansion allowance for incompressible data.
    pub safety_factor: usize,
    /// Transform depth used when the caller asks for a transform.
    pub transform_levels: u8,
    /// Coefficients at this detail level or finer honour local tolerances.
    pub detail_cutoff_level: u8,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_layers: DEFAULT_MAX_LAYERS,
            safety_factor: DEFAULT_SAFETY_FACTOR,
            transform_levels: DEFAULT_TRANSFORM_LEVELS,
            detail_cutoff_level: DEFAULT_DETAIL_CUTOFF_LEVEL,
        }
    }
}

impl CodecConfig {
    /// Set the layer cap.
    pub fn with_max_layers(mut self, max_layers: u8) -> Self {
        self.max_layers = max_layers;
        self
    }

    /// Set the buffer safety factor.
    pub fn with_safety_factor(mut self, safety_factor: usize) -> Self {
        self.safety_factor = safety_factor;
        self
    }

    /// Set the transform depth.
    pub fn with_transform_levels(mut self, levels: u8) -> Self {
        self.transform_levels = levels;
        self
    }

    /// Set the local tolerance cutoff level.
    pub fn with_detail_cutoff_level(mut self, level: u8) -> Self {
        self.detail_cutoff_level = level;
        self
    }

    /// Check the configuration for values the codec cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_layers == 0 {
            return Err(Error::invalid("max_layers must be at least 1"));
        }
        if self.safety_factor == 0 {
            return Err(Error::invalid("safety_factor must be at least 1"));
        }
        if self.transform_levels > MAX_HAAR_LEVELS {
            return Err(Error::invalid(format!(
                "transform_levels {} exceeds {MAX_HAAR_LEVELS}",
                self.transform_levels
            )));
        }
        Ok(())
    }

    /// Worst-case encoded size for a grid of `ntot` points.
    pub fn max_encoded_bytes(&self, ntot: usize) -> usize {
        self.safety_factor
            .saturating_mul(usize::from(self.max_layers))
            .saturating_mul(ntot.max(MIN_CAPACITY_ELEMENTS))
    }
}
