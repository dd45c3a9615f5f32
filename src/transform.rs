//! Decorrelation transforms.
//!
//! The layered engine only needs four things from a transform: run it in
//! place, undo it in place, say which coefficient a physical grid point maps
//! to (and at which detail level), and bound how much a per-coefficient error
//! can grow on the way back to physical space.
//!
//! [`Haar`] works in place without reordering: after `L` levels, a point whose
//! coordinates are all multiples of `2^(l-1)`, with at least one odd multiple,
//! holds a detail coefficient of level `l`. Points on the `2^L` lattice keep the
//! coarse approximation.

use crate::error::{Error, Result};
use crate::sample::Sample;

/// Extents of a structured 3D grid, `x` varying fastest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridDims {
    /// Points along x.
    pub nx: usize,
    /// Points along y.
    pub ny: usize,
    /// Points along z.
    pub nz: usize,
}

impl GridDims {
    /// Create grid dimensions.
    pub const fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    /// Total number of points.
    pub fn len(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Whether the grid has no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Linear index of `(jx, jy, jz)`.
    #[inline]
    pub fn index(&self, jx: usize, jy: usize, jz: usize) -> usize {
        jx + self.nx * (jy + self.ny * jz)
    }

    /// Coordinates of linear index `j`.
    #[inline]
    pub fn coords(&self, j: usize) -> (usize, usize, usize) {
        (j % self.nx, (j / self.nx) % self.ny, j / (self.nx * self.ny))
    }

    fn check<T>(&self, grid: &[T]) -> Result<()> {
        if grid.len() != self.len() {
            return Err(Error::Transform(format!(
                "grid holds {} samples, dimensions {}x{}x{} need {}",
                grid.len(),
                self.nx,
                self.ny,
                self.nz,
                self.len()
            )));
        }
        Ok(())
    }
}

/// Where a physical grid point lives after the transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Coefficient {
    /// Detail level, 1 = finest. 0 when no transform is applied and
    /// `levels + 1` for the coarse approximation.
    pub level: u8,
    /// Linear index into the transformed grid.
    pub index: usize,
}

/// Reversible in-place transform over a 3D grid.
pub trait Transform {
    /// Apply `levels` decomposition levels in place.
    fn forward<T: Sample>(&self, grid: &mut [T], dims: GridDims, levels: u8) -> Result<()>;

    /// Undo [`Transform::forward`] in place.
    fn inverse<T: Sample>(&self, grid: &mut [T], dims: GridDims, levels: u8) -> Result<()>;

    /// Map physical point `(jx, jy, jz)` to its coefficient.
    fn locate(&self, dims: GridDims, levels: u8, jx: usize, jy: usize, jz: usize) -> Coefficient;

    /// Bound on the physical-space error per unit of coefficient tolerance.
    ///
    /// The engine divides the requested tolerance by this value.
    fn accuracy_coefficient(&self, levels: u8) -> f64;
}

/// No-op transform.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Transform for Identity {
    fn forward<T: Sample>(&self, grid: &mut [T], dims: GridDims, _levels: u8) -> Result<()> {
        dims.check(grid)
    }

    fn inverse<T: Sample>(&self, grid: &mut [T], dims: GridDims, _levels: u8) -> Result<()> {
        dims.check(grid)
    }

    fn locate(&self, dims: GridDims, _levels: u8, jx: usize, jy: usize, jz: usize) -> Coefficient {
        Coefficient {
            level: 0,
            index: dims.index(jx, jy, jz),
        }
    }

    fn accuracy_coefficient(&self, _levels: u8) -> f64 {
        1.0
    }
}

/// In-place multi-level 3D Haar lifting.
///
/// Each level lifts pairs `(a, b)` spaced `2^(l-1)` apart along x, then y,
/// then z: `d = b - a`, `s = a + d / 2`. Odd extents leave the last point of
/// a line untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct Haar;

/// Deepest supported decomposition.
pub const MAX_HAAR_LEVELS: u8 = 24;

#[derive(Clone, Copy, Debug)]
enum Axis {
    X,
    Y,
    Z,
}

impl Haar {
    fn lift_axis<T: Sample>(grid: &mut [T], dims: GridDims, axis: Axis, step: usize, inverse: bool) {
        let (extent, stride) = match axis {
            Axis::X => (dims.nx, 1),
            Axis::Y => (dims.ny, dims.nx),
            Axis::Z => (dims.nz, dims.nx * dims.ny),
        };
        if step >= extent {
            return;
        }
        let half = T::narrow(0.5);
        let pair = 2 * step;
        for jz in (0..dims.nz).step_by(step) {
            for jy in (0..dims.ny).step_by(step) {
                for jx in (0..dims.nx).step_by(step) {
                    let c = match axis {
                        Axis::X => jx,
                        Axis::Y => jy,
                        Axis::Z => jz,
                    };
                    if c % pair != 0 || c + step >= extent {
                        continue;
                    }
                    let i = dims.index(jx, jy, jz);
                    let k = i + step * stride;
                    if inverse {
                        let a = grid[i] - grid[k] * half;
                        grid[k] = grid[k] + a;
                        grid[i] = a;
                    } else {
                        let d = grid[k] - grid[i];
                        grid[i] = grid[i] + d * half;
                        grid[k] = d;
                    }
                }
            }
        }
    }

    fn check_levels(levels: u8) -> Result<()> {
        if levels > MAX_HAAR_LEVELS {
            return Err(Error::Transform(format!(
                "{levels} levels exceed the supported {MAX_HAAR_LEVELS}"
            )));
        }
        Ok(())
    }
}

impl Transform for Haar {
    fn forward<T: Sample>(&self, grid: &mut [T], dims: GridDims, levels: u8) -> Result<()> {
        dims.check(grid)?;
        Self::check_levels(levels)?;
        for l in 0..levels {
            let step = 1usize << l;
            for axis in [Axis::X, Axis::Y, Axis::Z] {
                Self::lift_axis(grid, dims, axis, step, false);
            }
        }
        Ok(())
    }

    fn inverse<T: Sample>(&self, grid: &mut [T], dims: GridDims, levels: u8) -> Result<()> {
        dims.check(grid)?;
        Self::check_levels(levels)?;
        for l in (0..levels).rev() {
            let step = 1usize << l;
            for axis in [Axis::Z, Axis::Y, Axis::X] {
                Self::lift_axis(grid, dims, axis, step, true);
            }
        }
        Ok(())
    }

    fn locate(&self, dims: GridDims, levels: u8, jx: usize, jy: usize, jz: usize) -> Coefficient {
        let zeros = |j: usize| if j == 0 { u32::MAX } else { j.trailing_zeros() };
        let finest = zeros(jx).min(zeros(jy)).min(zeros(jz));
        let level = if finest >= u32::from(levels) {
            levels.saturating_add(1)
        } else {
            finest as u8 + 1
        };
        Coefficient {
            level,
            index: dims.index(jx, jy, jz),
        }
    }

    /// A coefficient error `e` grows to at most `e * (1 + 19L/8)` after `L`
    /// inverse levels; quantization leaves `e <= tol / 2`.
    fn accuracy_coefficient(&self, levels: u8) -> f64 {
        if levels == 0 {
            1.0
        } else {
            (8.0 + 19.0 * f64::from(levels)) / 16.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(dims: GridDims) -> Vec<f64> {
        (0..dims.len())
            .map(|j| {
                let (x, y, z) = dims.coords(j);
                (x as f64 * 0.7).sin() + y as f64 * 0.25 - (z as f64).sqrt()
            })
            .collect()
    }

    #[test]
    fn test_haar_roundtrip_odd_extents() {
        let dims = GridDims::new(7, 5, 9);
        let original = ramp(dims);
        let mut grid = original.clone();
        Haar.forward(&mut grid, dims, 3).unwrap();
        assert_ne!(grid, original);
        Haar.inverse(&mut grid, dims, 3).unwrap();
        for (a, b) in grid.iter().zip(&original) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_haar_constant_has_zero_details() {
        let dims = GridDims::new(8, 8, 8);
        let mut grid = vec![3.0f32; dims.len()];
        Haar.forward(&mut grid, dims, 2).unwrap();
        for j in 0..dims.len() {
            let (x, y, z) = dims.coords(j);
            let c = Haar.locate(dims, 2, x, y, z);
            if c.level <= 2 {
                assert_eq!(grid[j], 0.0, "detail at {x},{y},{z}");
            } else {
                assert_eq!(grid[j], 3.0);
            }
        }
    }

    #[test]
    fn test_haar_levels_of_points() {
        let dims = GridDims::new(16, 16, 16);
        assert_eq!(Haar.locate(dims, 3, 1, 0, 0).level, 1);
        assert_eq!(Haar.locate(dims, 3, 2, 4, 0).level, 2);
        assert_eq!(Haar.locate(dims, 3, 4, 0, 8).level, 3);
        assert_eq!(Haar.locate(dims, 3, 8, 8, 0).level, 4);
        assert_eq!(Haar.locate(dims, 3, 0, 0, 0).level, 4);
        assert_eq!(Haar.locate(dims, 3, 5, 5, 5).index, dims.index(5, 5, 5));
    }

    #[test]
    fn test_size_mismatch_is_transform_error() {
        let mut grid = vec![0.0f64; 10];
        let dims = GridDims::new(2, 2, 2);
        assert!(matches!(
            Haar.forward(&mut grid, dims, 1),
            Err(Error::Transform(_))
        ));
        assert!(Identity.inverse(&mut grid, dims, 0).is_err());
    }

    #[test]
    fn test_identity_locates_level_zero() {
        let dims = GridDims::new(3, 4, 5);
        let c = Identity.locate(dims, 4, 2, 3, 4);
        assert_eq!(c, Coefficient { level: 0, index: dims.len() - 1 });
        assert_eq!(Identity.accuracy_coefficient(4), 1.0);
    }
}
