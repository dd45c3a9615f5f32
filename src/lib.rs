//! # Layered Range Coding of Scalar Fields
//!
//! *Error-bounded compression of large 3D simulation output.*
//!
//! ## Intuition First
//!
//! Think of writing down a long list of measurements with a ruler that only
//! has 256 marks. The first pass, with the marks spread over the whole value
//! range, gets every number roughly right. Then you measure what is left
//! over, the residual, with a fresh ruler stretched over the *residual's*
//! range, which is 256 times narrower. A few passes bring every value within
//! the tolerance you asked for, and each pass is just a stream of bytes that an
//! entropy coder can squeeze hard, because smooth fields produce very skewed
//! byte histograms.
//!
//! ## The Problem
//!
//! CFD output is huge, floating-point and smooth, and its consumers usually
//! tolerate a known absolute error. General-purpose compressors see only
//! noisy mantissa bits. Fixed-bit-depth quantizers waste bits in quiet
//! regions and lose accuracy in busy ones.
//!
//! ## Historical Context
//!
//! ```text
//! 1979  Martin      Range encoding: arithmetic coding with byte renormalisation
//! 1987  Witten      Practical arithmetic coding with carry handling
//! 1995  Sweldens    Lifting scheme for reversible wavelet transforms
//! 1998  Schindler   Byte-oriented range coder with deferred carry bytes
//! 2017  Kolomenskiy Wavelet + layered range coding for CFD big data
//! ```
//!
//! ## Mathematical Formulation
//!
//! With residual `r_0 = W(f)` (the transformed field) and per-layer
//! `m_k = min r_k`, `Δ_k = max((max r_k - m_k) / 255, τ)`:
//!
//! ```text
//! q_k = floor((r_k - m_k) / Δ_k + 1/2)        (one byte per sample)
//! r_{k+1} = r_k - (q_k Δ_k + m_k)              (|r_{k+1}| <= Δ_k / 2)
//! f ≈ W⁻¹( Σ_k q_k Δ_k + m_k )
//! ```
//!
//! Iteration stops at the first `k` with `Δ_k = τ`, so the coefficient error
//! is at most `τ / 2`.
//!
//! ## Complexity Analysis
//!
//! - **Time**: `O(L · N)` for `L` layers over `N` samples; each symbol costs
//!   one division in the range coder.
//! - **Space**: `O(N)` scratch for codes plus the encoded output.
//!
//! ## Failure Modes
//!
//! 1. **Incompressible data**: noise-like residuals expand slightly under the
//!    per-block tables; the encoder fails with `BufferOverflow` rather than
//!    exceeding the declared capacity.
//! 2. **Layer cap**: a tolerance far below the field's dynamic range may need
//!    more layers than configured; the result is then coarser than requested.
//! 3. **Malformed input to the decoder**: truncated streams and inconsistent
//!    tables are reported as errors, never decoded into garbage.
//!
//! ## Implementation Notes
//!
//! This crate provides:
//! - [`range_coder`]: the 32-bit carry-deferring range coder.
//! - [`block_stats`] / [`byte_stream`]: block framing with explicit histograms.
//! - [`layered`]: the layered quantizer and the `encode` / `decode` /
//!   `capacity` entry points.
//! - [`transform`]: the transform contract, with an identity and a Haar
//!   lifting implementation.
//!
//! ## References
//!
//! - Martin, G. N. N. (1979). "Range encoding: an algorithm for removing redundancy from a digitised message."
//! - Schindler, M. (1998). "A fast renormalisation for arithmetic coding." DCC '98.
//! - Kolomenskiy, D., Onishi, R., Uehara, H. (2017). "Wavelet-Based Compression of CFD Big Data."

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block_stats;
pub mod byte_stream;
pub mod config;
mod container;
pub mod error;
pub mod layered;
pub mod range_coder;
pub mod sample;
pub mod transform;

pub use block_stats::{BlockStats, SymbolLookup, BLOCK_SIZE};
pub use byte_stream::{decode_bytes, encode_bytes};
pub use config::CodecConfig;
pub use error::{Error, Result};
pub use layered::{
    capacity, decode, encode, Capacity, CutoffMask, EncodedField, FieldHeader, Layer,
    LayeredCodec,
};
pub use range_coder::{trailer_length, RangeDecoder, RangeEncoder};
pub use sample::Sample;
pub use transform::{Coefficient, GridDims, Haar, Identity, Transform};
