//! Flatten/unflatten coordinate mapping.
//!
//! A segment mesh's UVs encode a planar unwrap of its curved surface. The
//! mapper computes, per vertex, where that vertex sits on a flat sheet whose
//! physical size matches the patch's estimated surface area, interpolates
//! between the true shape and the sheet, and inverts a hit on the sheet back
//! to the original 3D coordinate.

use crate::buffer::VertexBuffer;
use crate::geometry::{Point3D, Triangle, Vector3D};
use rayon::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum FlattenError {
    #[error("vertex buffer has no uv attribute")]
    MissingUvs,

    #[error("vertex buffer is empty")]
    EmptyBuffer,

    #[error("invalid flatten inputs: area {area}, texture {width}x{height}")]
    BadInputs { area: f64, width: f64, height: f64 },
}

/// Sheet orientation; the unwrap texture may be stored flipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flip {
    None,
    Vertical,
}

impl Flip {
    fn sign(self) -> f64 {
        match self {
            Flip::None => 1.0,
            Flip::Vertical => -1.0,
        }
    }
}

/// Inputs describing the unwrap sheet
#[derive(Debug, Clone, Copy)]
pub struct FlattenConfig {
    /// Estimated surface area of the patch
    pub area: f64,
    /// Unwrap texture size in pixels; its aspect shapes the sheet
    pub texture_width: f64,
    pub texture_height: f64,
    pub flip: Flip,
}

/// Recompute threshold on the interpolation parameter. A slider drag emits
/// many sub-epsilon changes; only interaction-scale moves trigger the full
/// position/normal pass.
const FLATTEN_EPSILON: f64 = 1e-4;

/// Per-chunk mapping between original and flattened vertex positions.
///
/// The original and fully-flattened buffers are computed once and never
/// mutated; changing the interpolation parameter only rewrites the derived
/// "current" buffer.
pub struct FlattenMapping {
    original: Vec<f64>,
    flattened: Vec<f64>,
    uvs: Vec<f64>,
    current: Vec<f64>,
    normals: Vec<f64>,
    t: f64,
    /// Side lengths of the fully-flattened sheet
    sheet_size: (f64, f64),
}

impl FlattenMapping {
    pub fn new(buffer: &VertexBuffer, config: FlattenConfig) -> Result<Self, FlattenError> {
        if buffer.is_empty() {
            return Err(FlattenError::EmptyBuffer);
        }
        let uvs = buffer.uvs().ok_or(FlattenError::MissingUvs)?;
        if config.area <= 0.0 || config.texture_width <= 0.0 || config.texture_height <= 0.0 {
            return Err(FlattenError::BadInputs {
                area: config.area,
                width: config.texture_width,
                height: config.texture_height,
            });
        }

        let original = buffer.positions().to_vec();
        let count = buffer.vertex_count();

        // Sheet center is the patch's bounding-box centroid.
        let mut min = Point3D::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Point3D::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for i in 0..count {
            let p = buffer.position(i);
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }
        let center = Point3D::from((min.coords + max.coords) / 2.0);

        let r = config.texture_height / config.texture_width;
        let scale = (config.area / r).sqrt();
        let flip = config.flip.sign();

        let mut flattened = Vec::with_capacity(original.len());
        for i in 0..count {
            let (u, v) = (uvs[2 * i], uvs[2 * i + 1]);
            let dir = Vector3D::new(u - 0.5, (v - 0.5) * flip * r, 0.0);
            let p = center + dir * scale;
            flattened.extend_from_slice(&[p.x, p.y, p.z]);
        }

        log::debug!(
            "flatten mapping: {} vertices, sheet {:.1} x {:.1}",
            count,
            scale,
            scale * r
        );

        let mut mapping = Self {
            current: original.clone(),
            normals: vec![0.0; original.len()],
            original,
            flattened,
            uvs: uvs.to_vec(),
            t: 0.0,
            sheet_size: (scale, scale * r),
        };
        mapping.recompute_current();
        Ok(mapping)
    }

    pub fn vertex_count(&self) -> usize {
        self.original.len() / 3
    }

    /// True 3D positions (t = 0)
    pub fn original_positions(&self) -> &[f64] {
        &self.original
    }

    /// Fully-flattened sheet positions (t = 1)
    pub fn flattened_positions(&self) -> &[f64] {
        &self.flattened
    }

    /// UVs carried through unchanged for rendering
    pub fn uvs(&self) -> &[f64] {
        &self.uvs
    }

    /// Width and height of the flat sheet
    pub fn sheet_size(&self) -> (f64, f64) {
        self.sheet_size
    }

    pub fn flatten_parameter(&self) -> f64 {
        self.t
    }

    /// Set the interpolation parameter and recompute the derived buffers if
    /// it moved by more than the epsilon. Frame-rate interpolation between
    /// the two fixed buffers belongs in the renderer, not here.
    pub fn set_flatten(&mut self, t: f64) {
        let t = t.clamp(0.0, 1.0);
        if (t - self.t).abs() <= FLATTEN_EPSILON {
            return;
        }
        self.t = t;
        self.recompute_current();
    }

    /// Interpolated positions at the current parameter
    pub fn current_positions(&self) -> &[f64] {
        &self.current
    }

    /// Face normals of the current positions, one per corner (the mesh is a
    /// triangle soup, so corners of a face share its normal)
    pub fn current_normals(&self) -> &[f64] {
        &self.normals
    }

    fn recompute_current(&mut self) {
        let t = self.t;
        self.current
            .par_iter_mut()
            .zip(self.original.par_iter().zip(self.flattened.par_iter()))
            .for_each(|(out, (&o, &f))| *out = o + (f - o) * t);

        // Triangle-soup normal pass over consecutive vertex triples; a
        // ragged tail shorter than a full face keeps its zeroed normals.
        let current = &self.current;
        self.normals
            .par_chunks_mut(9)
            .enumerate()
            .for_each(|(tri, face)| {
                if face.len() < 9 {
                    return;
                }
                let base = tri * 9;
                let p = |k: usize| {
                    Point3D::new(
                        current[base + 3 * k],
                        current[base + 3 * k + 1],
                        current[base + 3 * k + 2],
                    )
                };
                let n = Triangle::new(p(0), p(1), p(2)).normal();
                for k in 0..3 {
                    face[3 * k] = n.x;
                    face[3 * k + 1] = n.y;
                    face[3 * k + 2] = n.z;
                }
            });
    }

    /// Original position of the triangle corner closest in UV to `uv`,
    /// blended by inverse UV distance (see `unflatten`).
    pub fn unflatten_primitive(&self, primitive_index: u32, bary: (f64, f64)) -> Point3D {
        let base = primitive_index as usize * 3;
        let vertex = |k: usize| {
            Point3D::new(
                self.original[3 * (base + k)],
                self.original[3 * (base + k) + 1],
                self.original[3 * (base + k) + 2],
            )
        };
        let uv = |k: usize| (self.uvs[2 * (base + k)], self.uvs[2 * (base + k) + 1]);

        let (ua, va) = uv(0);
        let (ub, vb) = uv(1);
        let (uc, vc) = uv(2);
        let (bu, bv) = bary;

        // Hit uv from the barycentric coordinates of the raycast.
        let u = ua + (ub - ua) * bu + (uc - ua) * bv;
        let v = va + (vb - va) * bu + (vc - va) * bv;

        unflatten(
            (u, v),
            [vertex(0), vertex(1), vertex(2)],
            [(ua, va), (ub, vb), (uc, vc)],
        )
    }
}

/// Map a surface hit's UV back to the original 3D coordinate by inverse
/// UV-distance weighting over the enclosing triangle.
///
/// This is deliberately not true barycentric-by-area interpolation: near
/// degenerate (close-to-colinear) UV triangles the inverse-distance weights
/// stay bounded where exact barycentric coordinates blow up. The error for
/// well-shaped triangles is below visualization tolerance.
pub fn unflatten(
    uv: (f64, f64),
    vertices: [Point3D; 3],
    vertex_uvs: [(f64, f64); 3],
) -> Point3D {
    const MIN_DISTANCE: f64 = 1e-12;

    let mut weights = [0.0f64; 3];
    for (k, &(u, v)) in vertex_uvs.iter().enumerate() {
        let d = ((uv.0 - u).powi(2) + (uv.1 - v).powi(2)).sqrt();
        if d < MIN_DISTANCE {
            // Exactly on a vertex: that vertex wins outright.
            return vertices[k];
        }
        weights[k] = 1.0 / d;
    }

    let total: f64 = weights.iter().sum();
    let mut result = Vector3D::zeros();
    for k in 0..3 {
        result += vertices[k].coords * (weights[k] / total);
    }
    Point3D::from(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::VertexBuffer;

    /// Curved two-triangle patch with UVs spanning [0,1]²
    fn curved_patch() -> VertexBuffer {
        let positions = vec![
            0.0, 0.0, 0.0, //
            2.0, 0.0, 1.0, //
            2.0, 2.0, 0.0, //
            0.0, 0.0, 0.0, //
            2.0, 2.0, 0.0, //
            0.0, 2.0, 1.0,
        ];
        let uvs = vec![
            0.0, 0.0, 1.0, 0.0, 1.0, 1.0, //
            0.0, 0.0, 1.0, 1.0, 0.0, 1.0,
        ];
        VertexBuffer::from_positions(positions)
            .unwrap()
            .with_uvs(uvs)
            .unwrap()
    }

    fn square_config() -> FlattenConfig {
        FlattenConfig {
            area: 4.0,
            texture_width: 100.0,
            texture_height: 100.0,
            flip: Flip::None,
        }
    }

    #[test]
    fn test_missing_uvs_rejected() {
        let buffer = VertexBuffer::from_positions(vec![0.0; 9]).unwrap();
        assert!(matches!(
            FlattenMapping::new(&buffer, square_config()),
            Err(FlattenError::MissingUvs)
        ));
    }

    #[test]
    fn test_flat_sheet_corners() {
        // area = 4, r = 1: scale = 2, so UV corners land at center ± 1.
        let mut mapping = FlattenMapping::new(&curved_patch(), square_config()).unwrap();
        mapping.set_flatten(1.0);

        // Patch bounds are [0,2] x [0,2] x [0,1]; centroid (1, 1, 0.5).
        let pos = mapping.current_positions();
        let corner = Point3D::new(pos[0], pos[1], pos[2]); // uv (0,0)
        assert!((corner - Point3D::new(0.0, 0.0, 0.5)).norm() < 1e-12);

        let far = Point3D::new(pos[6], pos[7], pos[8]); // uv (1,1)
        assert!((far - Point3D::new(2.0, 2.0, 0.5)).norm() < 1e-12);
    }

    #[test]
    fn test_t_zero_is_original() {
        let mapping = FlattenMapping::new(&curved_patch(), square_config()).unwrap();
        assert_eq!(mapping.current_positions(), mapping.original_positions());
    }

    #[test]
    fn test_idempotent_recompute() {
        let mut mapping = FlattenMapping::new(&curved_patch(), square_config()).unwrap();
        mapping.set_flatten(0.37);
        let first = mapping.current_positions().to_vec();
        mapping.set_flatten(0.37);
        assert_eq!(mapping.current_positions(), &first[..]);
    }

    #[test]
    fn test_sub_epsilon_change_skipped() {
        let mut mapping = FlattenMapping::new(&curved_patch(), square_config()).unwrap();
        mapping.set_flatten(0.5);
        let before = mapping.current_positions().to_vec();
        mapping.set_flatten(0.5 + 5e-5);
        assert_eq!(mapping.current_positions(), &before[..]);
        assert_eq!(mapping.flatten_parameter(), 0.5);
    }

    #[test]
    fn test_flattened_normals_are_z() {
        let mut mapping = FlattenMapping::new(&curved_patch(), square_config()).unwrap();
        mapping.set_flatten(1.0);
        for n in mapping.current_normals().chunks(3) {
            assert!(n[0].abs() < 1e-12);
            assert!(n[1].abs() < 1e-12);
            assert!((n[2].abs() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_unflatten_vertex_roundtrip() {
        let mapping = FlattenMapping::new(&curved_patch(), square_config()).unwrap();

        // A hit exactly at a triangle corner recovers that corner's
        // original position, for every corner of both triangles.
        for prim in 0..2u32 {
            for (k, bary) in [(0, (0.0, 0.0)), (1, (1.0, 0.0)), (2, (0.0, 1.0))] {
                let base = prim as usize * 3 + k;
                let expected = Point3D::new(
                    mapping.original_positions()[3 * base],
                    mapping.original_positions()[3 * base + 1],
                    mapping.original_positions()[3 * base + 2],
                );
                let got = mapping.unflatten_primitive(prim, bary);
                assert!((got - expected).norm() < 1e-9);
            }
        }
    }

    #[test]
    fn test_unflatten_interior_stays_in_hull() {
        let vertices = [
            Point3D::new(0.0, 0.0, 0.0),
            Point3D::new(2.0, 0.0, 1.0),
            Point3D::new(2.0, 2.0, 0.0),
        ];
        let uvs = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)];
        let p = unflatten((0.6, 0.3), vertices, uvs);

        // Convex combination of the three vertices.
        assert!(p.x >= 0.0 && p.x <= 2.0);
        assert!(p.y >= 0.0 && p.y <= 2.0);
        assert!(p.z >= 0.0 && p.z <= 1.0);
    }

    #[test]
    fn test_unflatten_equidistant_is_mean() {
        let vertices = [
            Point3D::new(0.0, 0.0, 0.0),
            Point3D::new(3.0, 0.0, 0.0),
            Point3D::new(0.0, 3.0, 0.0),
        ];
        // UVs form an equilateral arrangement around the query point.
        let uvs = [(0.0, 0.0), (1.0, 0.0), (0.5, 3.0f64.sqrt() / 2.0)];
        let center = (0.5, 3.0f64.sqrt() / 6.0);
        let p = unflatten(center, vertices, uvs);
        let mean = Point3D::new(1.0, 1.0, 0.0);
        assert!((p - mean).norm() < 1e-9);
    }
}
