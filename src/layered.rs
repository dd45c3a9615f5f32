//! Layered quantization of scalar fields.
//!
//! Each layer quantizes the current residual to one byte per sample over its
//! own `[minval, maxval]` range, range-codes the bytes, and subtracts what the
//! codes reconstruct. The next layer therefore sees a residual at most half a
//! quantization step wide, and every layer refines the previous ones:
//!
//! ```text
//! field ~= sum over layers of (code * deps + minval)
//! ```
//!
//! Iteration stops at the first layer whose natural step `(max - min) / 255`
//! is finer than the absolute tolerance (that layer is coded at the tolerance
//! instead), or when the configured layer cap is reached.
//!
//! A constant field produces no layers; it is reconstructed from `midval`.

use tracing::{debug, warn};

use crate::byte_stream::{decode_bytes, encode_bytes};
use crate::config::CodecConfig;
use crate::error::{Error, Result};
use crate::sample::Sample;
use crate::transform::{Coefficient, GridDims, Haar, Identity, Transform};

/// Number of quantization steps per layer (`alphabet - 1`).
const STEPS_PER_LAYER: f64 = 255.0;

/// Relative tolerances laid over physical space in `mx * my * mz` blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct CutoffMask<T> {
    dims: GridDims,
    values: Vec<T>,
}

impl<T: Sample> CutoffMask<T> {
    /// One tolerance for the whole field.
    pub fn uniform(tolerance: T) -> Self {
        Self {
            dims: GridDims::new(1, 1, 1),
            values: vec![tolerance],
        }
    }

    /// A block mask, `x` varying fastest.
    ///
    /// # Errors
    /// Returns `Error::InvalidInput` if the value count does not match the
    /// dimensions or any value is negative or not finite.
    pub fn new(dims: GridDims, values: Vec<T>) -> Result<Self> {
        if dims.is_empty() || values.len() != dims.len() {
            return Err(Error::invalid(format!(
                "mask of {}x{}x{} needs {} values, got {}",
                dims.nx,
                dims.ny,
                dims.nz,
                dims.len(),
                values.len()
            )));
        }
        if let Some(k) = values.iter().position(|v| !v.is_finite() || *v < T::zero()) {
            return Err(Error::invalid(format!(
                "mask value {:?} at block {k} is not a finite non-negative tolerance",
                values[k]
            )));
        }
        Ok(Self { dims, values })
    }

    /// Mask dimensions.
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Whether the mask varies in space.
    pub fn is_spatial(&self) -> bool {
        self.values.len() > 1
    }

    /// Smallest tolerance anywhere.
    pub fn min(&self) -> T {
        self.values
            .iter()
            .copied()
            .fold(T::infinity(), |acc, v| acc.min(v))
    }

    /// Tolerance of the block covering grid point `(jx, jy, jz)`.
    pub fn local(&self, grid: GridDims, jx: usize, jy: usize, jz: usize) -> T {
        let kx = jx * self.dims.nx / grid.nx;
        let ky = jy * self.dims.ny / grid.ny;
        let kz = jz * self.dims.nz / grid.nz;
        self.values[self.dims.index(kx, ky, kz)]
    }
}

/// Scalars needed to decode a field, besides the per-layer arrays.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldHeader<T> {
    /// Absolute tolerance actually applied (0 for a constant field).
    pub tolabs: T,
    /// Centre of the original value range.
    pub midval: T,
    /// Half-width of the original value range.
    pub halfspanval: T,
    /// Transform depth applied, 0 if none.
    pub wlev: u8,
    /// Number of layers emitted.
    pub nlay: u8,
}

/// One quantization pass.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Layer<T> {
    /// Quantization step.
    pub deps: T,
    /// Residual minimum the codes are offset from.
    pub minval: T,
    /// Length of the layer's range-coded stream.
    pub len: usize,
}

/// A fully encoded field: header, per-layer arrays and the concatenated streams.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedField<T> {
    /// Field scalars.
    pub header: FieldHeader<T>,
    /// Layers in coding order.
    pub layers: Vec<Layer<T>>,
    /// All layer streams back to back.
    pub data: Vec<u8>,
}

impl<T: Sample> EncodedField<T> {
    /// Reassemble an encoded field from separately stored parts.
    pub fn from_parts(
        header: FieldHeader<T>,
        deps: &[T],
        minvals: &[T],
        lengths: &[usize],
        data: Vec<u8>,
    ) -> Result<Self> {
        let nlay = usize::from(header.nlay);
        if deps.len() < nlay || minvals.len() < nlay || lengths.len() < nlay {
            return Err(Error::format(format!(
                "header announces {nlay} layers, per-layer arrays are shorter"
            )));
        }
        let layers = (0..nlay)
            .map(|i| Layer {
                deps: deps[i],
                minval: minvals[i],
                len: lengths[i],
            })
            .collect();
        Ok(Self {
            header,
            layers,
            data,
        })
    }

    /// Total encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        self.data.len()
    }

    /// Per-layer quantization steps.
    pub fn deps(&self) -> Vec<T> {
        self.layers.iter().map(|l| l.deps).collect()
    }

    /// Per-layer minima.
    pub fn minvals(&self) -> Vec<T> {
        self.layers.iter().map(|l| l.minval).collect()
    }

    /// Per-layer stream lengths.
    pub fn lengths(&self) -> Vec<usize> {
        self.layers.iter().map(|l| l.len).collect()
    }

    fn check(&self, max_layers: u8) -> Result<()> {
        let nlay = usize::from(self.header.nlay);
        if nlay != self.layers.len() {
            return Err(Error::format(format!(
                "header announces {nlay} layers, found {}",
                self.layers.len()
            )));
        }
        if self.header.nlay > max_layers {
            return Err(Error::format(format!(
                "{nlay} layers exceed the configured maximum of {max_layers}"
            )));
        }
        let total = self
            .layers
            .iter()
            .try_fold(0usize, |acc, l| acc.checked_add(l.len))
            .ok_or_else(|| Error::format("layer lengths overflow"))?;
        if total != self.data.len() {
            return Err(Error::format(format!(
                "layer lengths add up to {total}, buffer holds {}",
                self.data.len()
            )));
        }
        Ok(())
    }
}

/// Answer of the capacity query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capacity {
    /// Most layers a field can produce.
    pub max_layers: u8,
    /// Encoded size the encoder will never exceed.
    pub max_encoded_bytes: usize,
}

/// The layered encoder/decoder.
#[derive(Clone, Debug)]
pub struct LayeredCodec<X = Haar> {
    config: CodecConfig,
    transform: X,
}

impl LayeredCodec<Haar> {
    /// Create a codec using the built-in Haar transform.
    pub fn new(config: CodecConfig) -> Result<Self> {
        Self::with_transform(config, Haar)
    }
}

impl<X: Transform> LayeredCodec<X> {
    /// Create a codec with a custom transform.
    pub fn with_transform(config: CodecConfig, transform: X) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, transform })
    }

    /// The active configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Layer cap and worst-case encoded size for `dims`.
    pub fn capacity(&self, dims: GridDims) -> Capacity {
        Capacity {
            max_layers: self.config.max_layers,
            max_encoded_bytes: self.config.max_encoded_bytes(dims.len()),
        }
    }

    fn locate(&self, dims: GridDims, wlev: u8, jx: usize, jy: usize, jz: usize) -> Coefficient {
        if wlev == 0 {
            Identity.locate(dims, wlev, jx, jy, jz)
        } else {
            self.transform.locate(dims, wlev, jx, jy, jz)
        }
    }

    fn accuracy_coefficient(&self, wlev: u8) -> f64 {
        if wlev == 0 {
            Identity.accuracy_coefficient(wlev)
        } else {
            self.transform.accuracy_coefficient(wlev)
        }
    }

    /// Encode `field` to within the tolerances of `mask`.
    ///
    /// Tolerances are relative to `max(|min|, |max|)` of the field. The field
    /// is used as scratch space: on return it holds the final residual in
    /// transform space.
    ///
    /// # Errors
    /// - `Error::InvalidInput` for a size mismatch or non-finite samples.
    /// - `Error::BufferOverflow` when the streams outgrow [`Self::capacity`].
    /// - `Error::Transform` from the transform.
    pub fn encode<T: Sample>(
        &self,
        dims: GridDims,
        field: &mut [T],
        apply_transform: bool,
        mask: &CutoffMask<T>,
    ) -> Result<EncodedField<T>> {
        check_field(dims, field)?;
        let ntot = dims.len();
        let wlev = if apply_transform {
            self.config.transform_levels
        } else {
            0
        };

        let (minval, maxval) = min_max(field);
        let two = T::one() + T::one();
        let halfspanval = (maxval - minval) / two;
        let midval = minval + halfspanval;

        if halfspanval <= two * T::min_positive_value() {
            debug!(?midval, ntot, "constant field, no layers emitted");
            return Ok(EncodedField {
                header: FieldHeader {
                    tolabs: T::zero(),
                    midval,
                    halfspanval,
                    wlev,
                    nlay: 0,
                },
                layers: Vec::new(),
                data: Vec::new(),
            });
        }

        if wlev > 0 {
            self.transform.forward(field, dims, wlev)?;
        }

        let scale =
            minval.abs().max(maxval.abs()) / T::narrow(self.accuracy_coefficient(wlev));
        let tolabs = mask.min() * scale;
        let capacity = self.config.max_encoded_bytes(ntot);
        let max_layers = self.config.max_layers;
        let half = T::narrow(0.5);
        let steps = T::narrow(STEPS_PER_LAYER);

        let mut codes = vec![0u8; ntot];
        let mut layers = Vec::with_capacity(usize::from(max_layers));
        let mut data = Vec::new();
        let mut converged = false;

        for ilay in 0..max_layers {
            let (lo, hi) = min_max(field);
            let mut deps = (hi - lo) / steps;
            let mut last = false;
            if deps < tolabs {
                deps = tolabs;
                last = true;
                converged = true;
            }
            if ilay + 1 >= max_layers {
                last = true;
            }
            let inv = if deps > T::zero() {
                T::one() / deps
            } else {
                T::zero()
            };

            if mask.is_spatial() {
                let span = hi - lo;
                for jp in 0..ntot {
                    let (jx, jy, jz) = dims.coords(jp);
                    let coef = self.locate(dims, wlev, jx, jy, jz);
                    let local = if coef.level <= self.config.detail_cutoff_level {
                        mask.local(dims, jx, jy, jz) * scale
                    } else {
                        tolabs
                    };
                    let jw = coef.index;
                    if span < local {
                        // below the local tolerance: drop the sample from this layer
                        codes[jw] = 0;
                        field[jw] = lo;
                    } else {
                        codes[jw] = ((field[jw] - lo) * inv + half).to_code();
                    }
                }
            } else {
                for (code, &v) in codes.iter_mut().zip(field.iter()) {
                    *code = ((v - lo) * inv + half).to_code();
                }
            }

            for (v, &code) in field.iter_mut().zip(&codes) {
                *v = *v - (T::from_code(code) * deps + lo);
            }

            let stream = encode_bytes(&codes)?;
            let required = data.len() + stream.len();
            if required > capacity {
                return Err(Error::BufferOverflow { required, capacity });
            }
            data.extend_from_slice(&stream);
            debug!(
                layer = ilay,
                deps = ?deps,
                minval = ?lo,
                encoded = stream.len(),
                total = data.len(),
                "encoded layer"
            );
            layers.push(Layer {
                deps,
                minval: lo,
                len: stream.len(),
            });

            if last {
                break;
            }
        }

        if !converged {
            warn!(
                max_layers,
                tolabs = ?tolabs,
                "layer cap reached before the tolerance was met"
            );
        }

        Ok(EncodedField {
            header: FieldHeader {
                tolabs,
                midval,
                halfspanval,
                wlev,
                nlay: layers.len() as u8,
            },
            layers,
            data,
        })
    }

    /// Reconstruct a field from all of its layers.
    pub fn decode<T: Sample>(&self, dims: GridDims, encoded: &EncodedField<T>) -> Result<Vec<T>> {
        self.decode_progressive(dims, encoded, encoded.header.nlay)
    }

    /// Reconstruct a field from its first `layers` layers only.
    ///
    /// Fewer layers give a coarser approximation; passing `nlay` is
    /// [`Self::decode`].
    pub fn decode_progressive<T: Sample>(
        &self,
        dims: GridDims,
        encoded: &EncodedField<T>,
        layers: u8,
    ) -> Result<Vec<T>> {
        if dims.is_empty() {
            return Err(Error::invalid("grid has no points"));
        }
        encoded.check(self.config.max_layers)?;
        let ntot = dims.len();
        let header = &encoded.header;

        if header.nlay == 0 {
            return Ok(vec![header.midval; ntot]);
        }

        let mut field = vec![T::zero(); ntot];
        let mut offset = 0;
        for (ilay, layer) in encoded.layers.iter().take(usize::from(layers)).enumerate() {
            let stream = &encoded.data[offset..offset + layer.len];
            offset += layer.len;
            let codes = decode_bytes(stream, Some(ntot))?;
            for (v, &code) in field.iter_mut().zip(&codes) {
                *v = *v + (T::from_code(code) * layer.deps + layer.minval);
            }
            debug!(layer = ilay, bytes = layer.len, "decoded layer");
        }

        if header.wlev > 0 {
            self.transform.inverse(&mut field, dims, header.wlev)?;
        }
        Ok(field)
    }
}

/// Encode with the default configuration and the Haar transform.
pub fn encode<T: Sample>(
    dims: GridDims,
    field: &mut [T],
    apply_transform: bool,
    mask: &CutoffMask<T>,
) -> Result<EncodedField<T>> {
    LayeredCodec::new(CodecConfig::default())?.encode(dims, field, apply_transform, mask)
}

/// Decode from separately stored header, per-layer arrays and data.
pub fn decode<T: Sample>(
    dims: GridDims,
    header: FieldHeader<T>,
    deps: &[T],
    minvals: &[T],
    lengths: &[usize],
    data: &[u8],
) -> Result<Vec<T>> {
    let encoded = EncodedField::from_parts(header, deps, minvals, lengths, data.to_vec())?;
    LayeredCodec::new(CodecConfig::default())?.decode(dims, &encoded)
}

/// Capacity of a grid under the default configuration.
pub fn capacity(dims: GridDims) -> Capacity {
    Capacity {
        max_layers: CodecConfig::default().max_layers,
        max_encoded_bytes: CodecConfig::default().max_encoded_bytes(dims.len()),
    }
}

fn check_field<T: Sample>(dims: GridDims, field: &[T]) -> Result<()> {
    if dims.is_empty() {
        return Err(Error::invalid("grid has no points"));
    }
    if field.len() != dims.len() {
        return Err(Error::invalid(format!(
            "field holds {} samples, grid {}x{}x{} needs {}",
            field.len(),
            dims.nx,
            dims.ny,
            dims.nz,
            dims.len()
        )));
    }
    if let Some(j) = field.iter().position(|v| !v.is_finite()) {
        return Err(Error::invalid(format!(
            "sample {j} is not finite ({:?})",
            field[j]
        )));
    }
    Ok(())
}

fn min_max<T: Sample>(field: &[T]) -> (T, T) {
    field
        .iter()
        .fold((field[0], field[0]), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> LayeredCodec {
        LayeredCodec::new(CodecConfig::default()).unwrap()
    }

    fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_constant_field_has_no_layers() {
        let dims = GridDims::new(4, 4, 4);
        let mut field = vec![2.5f64; dims.len()];
        let encoded = codec()
            .encode(dims, &mut field, true, &CutoffMask::uniform(0.01))
            .unwrap();
        assert_eq!(encoded.header.nlay, 0);
        assert_eq!(encoded.header.tolabs, 0.0);
        assert_eq!(encoded.encoded_len(), 0);

        let decoded = codec().decode(dims, &encoded).unwrap();
        assert!(decoded.iter().all(|&v| v == 2.5));
    }

    #[test]
    fn test_ramp_without_transform() {
        let dims = GridDims::new(1, 1, 256);
        let ramp: Vec<f64> = (0..256).map(f64::from).collect();
        // 0.5 absolute on a field peaking at 255
        let mask = CutoffMask::uniform(0.5 / 255.0);

        let mut first = ramp.clone();
        let a = codec().encode(dims, &mut first, false, &mask).unwrap();
        let mut second = ramp.clone();
        let b = codec().encode(dims, &mut second, false, &mask).unwrap();
        assert_eq!(a, b);

        assert!(a.header.nlay >= 1);
        assert_eq!(a.header.wlev, 0);
        assert!((a.header.tolabs - 0.5).abs() < 1e-12);

        let decoded = codec().decode(dims, &a).unwrap();
        assert!(max_abs_diff(&decoded, &ramp) <= 0.5);
    }

    #[test]
    fn test_tolerance_is_relative_to_peak_magnitude() {
        let dims = GridDims::new(8, 8, 1);
        let original: Vec<f64> = (0..64).map(|j| 1000.0 + (j as f64 * 0.37).cos()).collect();
        let mut field = original.clone();
        let encoded = codec()
            .encode(dims, &mut field, false, &CutoffMask::uniform(1e-6))
            .unwrap();
        let peak = original.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!((encoded.header.tolabs - 1e-6 * peak).abs() < 1e-12);

        let decoded = codec().decode(dims, &encoded).unwrap();
        assert!(max_abs_diff(&decoded, &original) <= encoded.header.tolabs);
    }

    #[test]
    fn test_clamped_final_layer_may_raise_max_residual() {
        let dims = GridDims::new(4, 1, 1);
        let original = vec![0.0f64, 255.0, 0.01, 0.99];
        let mut field = original.clone();
        let encoded = codec()
            .encode(dims, &mut field, false, &CutoffMask::uniform(0.1 / 255.0))
            .unwrap();
        assert_eq!(encoded.header.nlay, 2);
        assert!((encoded.layers[1].deps - 0.1).abs() < 1e-12);

        let coarse = codec().decode_progressive(dims, &encoded, 1).unwrap();
        let full = codec().decode(dims, &encoded).unwrap();
        let after_first = max_abs_diff(&coarse, &original);
        let after_final = max_abs_diff(&full, &original);
        assert!((after_first - 0.01).abs() < 1e-9);
        assert!((after_final - 0.02).abs() < 1e-9);
        assert!(after_final <= encoded.header.tolabs / 2.0);
    }

    #[test]
    fn test_layer_cap_stops_iteration() {
        let dims = GridDims::new(16, 4, 4);
        let mut field: Vec<f64> = (0..dims.len()).map(|j| (j as f64).sin() * 1e3).collect();
        let codec = LayeredCodec::new(CodecConfig::default().with_max_layers(2)).unwrap();
        let encoded = codec
            .encode(dims, &mut field, false, &CutoffMask::uniform(0.0))
            .unwrap();
        assert_eq!(encoded.header.nlay, 2);
        assert_eq!(encoded.layers.len(), 2);
    }

    #[test]
    fn test_spatial_mask_relaxes_one_region() {
        let dims = GridDims::new(32, 1, 1);
        let original: Vec<f64> = (0..32).map(|j| 10.0 + (j as f64 * 0.9).sin()).collect();
        // left half tight, right half loose enough to swallow a whole layer
        let mask = CutoffMask::new(GridDims::new(2, 1, 1), vec![1e-4, 0.5]).unwrap();
        let mut field = original.clone();
        let encoded = codec().encode(dims, &mut field, false, &mask).unwrap();
        let decoded = codec().decode(dims, &encoded).unwrap();

        let peak = original.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        for j in 0..32 {
            let local = (if j < 16 { 1e-4 } else { 0.5 }) * peak;
            let err = (decoded[j] - original[j]).abs();
            assert!(err <= local, "sample {j}: error {err} over {local}");
        }
    }

    #[test]
    fn test_field_size_mismatch_rejected() {
        let dims = GridDims::new(2, 2, 2);
        let mut field = vec![1.0f32; 7];
        assert!(matches!(
            codec().encode(dims, &mut field, false, &CutoffMask::uniform(0.1)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_non_finite_sample_rejected() {
        let dims = GridDims::new(2, 1, 1);
        let mut field = vec![1.0f64, f64::NAN];
        assert!(codec()
            .encode(dims, &mut field, false, &CutoffMask::uniform(0.1))
            .is_err());
    }

    #[test]
    fn test_mask_validation() {
        assert!(CutoffMask::new(GridDims::new(2, 2, 1), vec![0.1f64; 3]).is_err());
        assert!(CutoffMask::new(GridDims::new(2, 1, 1), vec![0.1f64, -1.0]).is_err());
        let mask = CutoffMask::new(GridDims::new(2, 1, 1), vec![0.3f64, 0.1]).unwrap();
        assert_eq!(mask.min(), 0.1);
        assert!(mask.is_spatial());
        assert_eq!(mask.local(GridDims::new(10, 1, 1), 4, 0, 0), 0.3);
        assert_eq!(mask.local(GridDims::new(10, 1, 1), 5, 0, 0), 0.1);
    }

    #[test]
    fn test_free_functions_use_split_arrays() {
        let dims = GridDims::new(6, 5, 4);
        let original: Vec<f64> = (0..dims.len()).map(|j| (j as f64 * 0.05).exp()).collect();
        let mut field = original.clone();
        let encoded = encode(dims, &mut field, true, &CutoffMask::uniform(1e-3)).unwrap();
        assert_eq!(encoded.header.wlev, CodecConfig::default().transform_levels);
        assert!(encoded.encoded_len() <= capacity(dims).max_encoded_bytes);
        assert_eq!(capacity(dims).max_encoded_bytes, 2 * 8 * 1024);

        let decoded = decode(
            dims,
            encoded.header,
            &encoded.deps(),
            &encoded.minvals(),
            &encoded.lengths(),
            &encoded.data,
        )
        .unwrap();
        assert_eq!(decoded, codec().decode(dims, &encoded).unwrap());
    }

    #[test]
    fn test_decode_rejects_inconsistent_layers() {
        let dims = GridDims::new(8, 1, 1);
        let mut field: Vec<f64> = (0..8).map(f64::from).collect();
        let mut encoded = codec()
            .encode(dims, &mut field, false, &CutoffMask::uniform(0.01))
            .unwrap();
        encoded.data.pop();
        assert!(matches!(codec().decode(dims, &encoded), Err(Error::Format(_))));
    }
}
