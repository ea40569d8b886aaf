//! 4×4 affine math and per-node point mapping
//!
//! [`PointMapper`] carries one source-space point through the full chain:
//! offset, displacement-field lookup, atlas-space composition, and the dual
//! region-grid lookup. [`AffineMatrix`] is the small row-major matrix type
//! used for both the displacement and region transforms.
//!
//! # Index conventions
//!
//! The transform matrices come from tooling with 1-based indexing, so every
//! projected component is ceiled and then decremented before use as a voxel
//! index. Displacement indices are clamped into range to tolerate edge
//! rounding; region indices are not clamped, and an index outside the grid
//! means "no region". Index arithmetic stays in floating point until an
//! index is known to be in range, so arbitrarily large projections clamp or
//! miss cleanly; a non-finite projection faults the node. The legacy region
//! grid is indexed with the projected triple reversed while the
//! alternate-format grid takes it unreversed; the two grids store the same
//! physical volume with flipped axis order, and both lookups must agree on
//! the same physical point.

use crate::error::{Result, TransformError};
use crate::volume::{VolumeHeader, VoxelSource};

/// Row-major 4×4 affine matrix applied by row-wise dot product
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix(pub [[f64; 4]; 4]);

impl AffineMatrix {
    /// The identity transform
    pub fn identity() -> Self {
        AffineMatrix([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Diagonal scale plus translation
    pub fn scale_translation(scale: [f64; 3], translation: [f64; 3]) -> Self {
        AffineMatrix([
            [scale[0], 0.0, 0.0, translation[0]],
            [0.0, scale[1], 0.0, translation[1]],
            [0.0, 0.0, scale[2], translation[2]],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Pure translation
    pub fn translation(translation: [f64; 3]) -> Self {
        Self::scale_translation([1.0, 1.0, 1.0], translation)
    }

    /// Apply to a homogeneous 4-vector by row-wise dot product
    pub fn apply(&self, point: [f64; 4]) -> [f64; 4] {
        let mut out = [0.0; 4];
        for (row, coefficients) in self.0.iter().enumerate() {
            out[row] = coefficients
                .iter()
                .zip(point.iter())
                .map(|(c, p)| c * p)
                .sum();
        }
        out
    }

    /// Matrix inverse by Gauss-Jordan elimination with partial pivoting.
    /// Returns `None` for singular matrices.
    pub fn inverse(&self) -> Option<Self> {
        let mut a = self.0;
        let mut inv = Self::identity().0;
        for col in 0..4 {
            let mut pivot = col;
            for row in (col + 1)..4 {
                if a[row][col].abs() > a[pivot][col].abs() {
                    pivot = row;
                }
            }
            if a[pivot][col].abs() < 1e-12 {
                return None;
            }
            a.swap(col, pivot);
            inv.swap(col, pivot);

            let scale = a[col][col];
            for k in 0..4 {
                a[col][k] /= scale;
                inv[col][k] /= scale;
            }
            for row in 0..4 {
                if row == col {
                    continue;
                }
                let factor = a[row][col];
                if factor != 0.0 {
                    for k in 0..4 {
                        a[row][k] -= factor * a[col][k];
                        inv[row][k] -= factor * inv[col][k];
                    }
                }
            }
        }
        Some(AffineMatrix(inv))
    }

    /// World-to-index transform derived from a header's spatial metadata
    /// (direction vectors as columns plus the origin), when present and
    /// invertible.
    pub fn world_to_index(header: &VolumeHeader) -> Option<Self> {
        let (axes, origin) = header.spatial_frame()?;
        let index_to_world = AffineMatrix([
            [axes[0][0], axes[1][0], axes[2][0], origin[0]],
            [axes[0][1], axes[1][1], axes[2][1], origin[1]],
            [axes[0][2], axes[1][2], axes[2][2], origin[2]],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        index_to_world.inverse()
    }
}

/// Result of mapping one source-space point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappedPoint {
    /// Atlas-space coordinates
    pub atlas: [f64; 3],
    /// Structure id sampled from the legacy (CCF v2.5) region grid
    pub legacy_structure: Option<i64>,
    /// Structure id sampled from the current (CCF v3.0) region grid
    pub current_structure: Option<i64>,
}

/// Maps source-space points into atlas space against a fixed set of open
/// grids. Borrows the grids for the duration of one run's node loop.
pub struct PointMapper<'a> {
    offset: [f64; 3],
    displacement_transform: AffineMatrix,
    displacement: &'a mut dyn VoxelSource,
    region_transform: AffineMatrix,
    legacy_regions: &'a mut dyn VoxelSource,
    alternate_regions: &'a mut dyn VoxelSource,
}

impl<'a> PointMapper<'a> {
    /// Bind the per-run offset, transforms and open grids
    pub fn new(
        offset: [f64; 3],
        displacement_transform: AffineMatrix,
        displacement: &'a mut dyn VoxelSource,
        region_transform: AffineMatrix,
        legacy_regions: &'a mut dyn VoxelSource,
        alternate_regions: &'a mut dyn VoxelSource,
    ) -> Self {
        Self {
            offset,
            displacement_transform,
            displacement,
            region_transform,
            legacy_regions,
            alternate_regions,
        }
    }

    /// Map one point. An `Err` here is a per-node fault: the caller records
    /// the node with NaN coordinates and absent regions and keeps going.
    pub fn map_point(&mut self, source: [f64; 3]) -> Result<MappedPoint> {
        let shifted = [
            source[0] + self.offset[0],
            source[1] + self.offset[1],
            source[2] + self.offset[2],
        ];

        let displacement = self.displacement_at(shifted)?;
        let atlas = [
            shifted[0] + displacement[0],
            shifted[1] + displacement[1],
            shifted[2] + displacement[2],
        ];

        let (legacy_structure, current_structure) = self.regions_at(atlas)?;
        Ok(MappedPoint {
            atlas,
            legacy_structure,
            current_structure,
        })
    }

    /// Look up the 3-component displacement vector for a shifted source
    /// point. The projected index addresses the grid's three trailing axes;
    /// the leading axis selects the displacement component.
    fn displacement_at(&mut self, shifted: [f64; 3]) -> Result<[f64; 3]> {
        let extents = self.displacement.extents();
        if extents.len() != 4 {
            return Err(TransformError::Sample(format!(
                "displacement grid must have 4 axes, found {}",
                extents.len()
            )));
        }
        let spatial_extents = [extents[1], extents[2], extents[3]];

        let projected = self.displacement_transform.apply(homogeneous(shifted));
        let mut index = [0u64; 3];
        for axis in 0..3 {
            // 1-based source convention, then clamp to tolerate edge rounding.
            let i = projected_index(projected[axis])?;
            let last = spatial_extents[axis].saturating_sub(1) as f64;
            index[axis] = i.clamp(0.0, last) as u64;
        }

        let mut displacement = [0.0; 3];
        for (component, slot) in displacement.iter_mut().enumerate() {
            let sample_index = [component as u64, index[0], index[1], index[2]];
            *slot = self
                .displacement
                .sample(&sample_index)?
                .ok_or_else(|| {
                    TransformError::Sample(format!(
                        "displacement sample missing at {:?} after clamping",
                        sample_index
                    ))
                })?;
        }
        Ok(displacement)
    }

    /// Sample both region grids for an atlas-space point. Out-of-range
    /// indices yield no region for either grid; there is no clamping here.
    fn regions_at(&mut self, atlas: [f64; 3]) -> Result<(Option<i64>, Option<i64>)> {
        let projected = self.region_transform.apply(homogeneous(atlas));
        let mut index = [0.0f64; 3];
        for axis in 0..3 {
            index[axis] = projected_index(projected[axis])?;
        }
        let reversed = [index[2], index[1], index[0]];

        let extents = self.legacy_regions.extents();
        if extents.len() != 3 {
            return Err(TransformError::Sample(format!(
                "region grid must have 3 axes, found {}",
                extents.len()
            )));
        }
        let legacy_extents = [extents[0], extents[1], extents[2]];
        let in_range = (0..3)
            .all(|axis| reversed[axis] >= 0.0 && reversed[axis] < legacy_extents[axis] as f64);
        if !in_range {
            return Ok((None, None));
        }

        // The legacy grid stores axes in the opposite order from the
        // projection, so it takes the reversed triple; the alternate reader
        // indexes in projection order. Both address the same physical voxel.
        let reversed = [reversed[0] as u64, reversed[1] as u64, reversed[2] as u64];
        let forward = [index[0] as u64, index[1] as u64, index[2] as u64];
        let legacy = self
            .legacy_regions
            .sample(&reversed)?
            .map(|value| value as i64);
        let alternate = self
            .alternate_regions
            .sample(&forward)?
            .map(|value| value as i64);
        Ok((legacy, alternate))
    }
}

fn homogeneous(point: [f64; 3]) -> [f64; 4] {
    [point[0], point[1], point[2], 1.0]
}

/// Projected component to a 0-based index, kept in float space so magnitudes
/// past the integer range stay well-defined. A non-finite projection cannot
/// address any voxel and faults the node.
fn projected_index(component: f64) -> Result<f64> {
    if !component.is_finite() {
        return Err(TransformError::Sample(format!(
            "projected coordinate {} cannot address a voxel",
            component
        )));
    }
    Ok(component.ceil() - 1.0)
}
