//! Scan centerline and cross-sheet ray correspondence.
//!
//! The scan's central axis ships as a polyline ordered by depth. Clamped
//! interpolation along it gives a stable ray origin at any depth; rays cast
//! from that origin through a picked surface point mark the same physical
//! location on every sheet they cross.

use crate::chunk::{ChunkedGeometry, SegmentId};
use crate::geometry::{Point3D, Ray};
use crate::spatial::Bvh;
use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum CenterlineError {
    #[error("centerline position array length {0} is not a multiple of 3")]
    BadStride(usize),

    #[error("centerline has no samples")]
    Empty,

    #[error("centerline depth not increasing at sample {0}")]
    NotMonotonic(usize),
}

/// One surface intersection of a correspondence ray
#[derive(Debug, Clone)]
pub struct Correspondence {
    pub segment_id: SegmentId,
    pub point: Point3D,
    pub distance: f64,
    pub primitive_index: u32,
    /// Barycentric (u, v) within the hit triangle
    pub uv: (f64, f64),
}

/// Read-only lookup table over the scan's central-axis polyline,
/// monotonic in z.
pub struct Centerline {
    samples: Vec<Point3D>,
}

impl Centerline {
    /// Validates stride and strict depth monotonicity. A single sample is
    /// legal; every query then returns it.
    pub fn from_positions(positions: &[f64]) -> Result<Self, CenterlineError> {
        if positions.len() % 3 != 0 {
            return Err(CenterlineError::BadStride(positions.len()));
        }
        if positions.is_empty() {
            return Err(CenterlineError::Empty);
        }

        let samples: Vec<Point3D> = positions
            .chunks_exact(3)
            .map(|c| Point3D::new(c[0], c[1], c[2]))
            .collect();

        for (i, pair) in samples.windows(2).enumerate() {
            if pair[1].z <= pair[0].z {
                return Err(CenterlineError::NotMonotonic(i + 1));
            }
        }

        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[Point3D] {
        &self.samples
    }

    /// Interpolated axis position at depth `z`, clamped to the polyline's
    /// depth range. Exact at sample depths.
    pub fn center_at(&self, z: f64) -> Point3D {
        let first = self.samples[0];
        let last = self.samples[self.samples.len() - 1];
        if z <= first.z {
            return first;
        }
        if z >= last.z {
            return last;
        }

        // First sample strictly deeper than z; its predecessor brackets.
        let hi = self.samples.partition_point(|p| p.z < z);
        let a = self.samples[hi - 1];
        let b = self.samples[hi];
        if (b.z - a.z).abs() < 1e-15 {
            return a;
        }

        let t = (z - a.z) / (b.z - a.z);
        Point3D::from(a.coords + (b.coords - a.coords) * t)
    }

    /// Position at a fractional sample index, for sweeping along the axis
    /// with a slider. Clamped to the polyline ends.
    pub fn position_along(&self, f: f64) -> Point3D {
        let max = (self.samples.len() - 1) as f64;
        let f = f.clamp(0.0, max);
        let i = f.floor() as usize;
        if i >= self.samples.len() - 1 {
            return self.samples[self.samples.len() - 1];
        }
        let w = f - i as f64;
        let a = self.samples[i];
        let b = self.samples[i + 1];
        Point3D::from(a.coords + (b.coords - a.coords) * w)
    }

    /// Every surface intersection of the ray from `origin` through
    /// `through` whose chunk is in the active set, ascending by distance.
    /// Overlapping sheets legitimately yield multiple hits; the caller
    /// wants all of them.
    pub fn corresponding_points(
        &self,
        origin: Point3D,
        through: Point3D,
        bvh: &Bvh,
        geometry: &ChunkedGeometry,
        active: &HashSet<SegmentId>,
    ) -> Vec<Correspondence> {
        let ray = Ray::toward(origin, through);
        bvh.raycast(&ray)
            .into_iter()
            .filter_map(|hit| {
                let chunk = bvh.resolve_chunk(geometry, hit.primitive_index)?;
                if !active.contains(&chunk.id) {
                    return None;
                }
                Some(Correspondence {
                    segment_id: chunk.id.clone(),
                    point: hit.point,
                    distance: hit.distance,
                    primitive_index: hit.primitive_index,
                    uv: hit.uv,
                })
            })
            .collect()
    }
}
