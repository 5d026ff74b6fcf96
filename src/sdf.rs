//! Distance-field rasterization.
//!
//! The viewer shades segment outlines on a 2D slice card by thresholding a
//! per-pixel distance-to-surface grid. Each pixel of the slice is mapped
//! into mesh space and evaluated against the spatial index, row-parallel.
//! The values are raw unsigned distances; consumers apply their own
//! `surface` threshold.

use crate::chunk::ChunkedGeometry;
use crate::geometry::{Point3D, Vector3D};
use crate::spatial::{Bvh, BvhOptions, SpatialError};
use nalgebra::UnitQuaternion;
use rayon::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum SdfError {
    #[error("zero-sized distance grid ({width}x{height})")]
    BadResolution { width: u32, height: u32 },

    #[error(transparent)]
    Spatial(#[from] SpatialError),
}

/// Placement of the sampled slice: maps the normalized unit cube
/// (centered on the origin) into mesh space.
#[derive(Debug, Clone)]
pub struct PlacementTransform {
    pub center: Point3D,
    pub rotation: UnitQuaternion<f64>,
    pub scale: Vector3D,
}

impl PlacementTransform {
    /// Axis-aligned placement, the common case for slice cards.
    pub fn axis_aligned(center: Point3D, scale: Vector3D) -> Self {
        Self {
            center,
            rotation: UnitQuaternion::identity(),
            scale,
        }
    }

    /// Normalized cube coordinate (components in [-0.5, 0.5]) to mesh space.
    pub fn to_mesh(&self, n: Vector3D) -> Point3D {
        self.center + self.rotation * n.component_mul(&self.scale)
    }
}

/// A rendered 2D grid of distance samples, tagged with the transform and
/// resolution that produced it. Owns its pixel buffer; dropping the field
/// releases it. Never partially updated, only regenerated wholesale.
#[derive(Debug)]
pub struct SdfField {
    data: Vec<f32>,
    width: u32,
    height: u32,
    transform: PlacementTransform,
}

/// Depth of the sampled slice inside the normalized cube
const MID_DEPTH: f64 = 0.5;

impl SdfField {
    /// Rasterize a distance grid against an already-built index.
    pub fn render(
        bvh: &Bvh,
        transform: &PlacementTransform,
        width: u32,
        height: u32,
    ) -> Result<Self, SdfError> {
        if width == 0 || height == 0 {
            return Err(SdfError::BadResolution { width, height });
        }
        if bvh.primitive_count() == 0 {
            // An all-far grid is indistinguishable from "surface far away"
            // downstream, so refuse instead of rendering one.
            return Err(SpatialError::EmptyGeometry.into());
        }

        let mut data = vec![0.0f32; (width * height) as usize];

        data.par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                let ny = (y as f64 + 0.5) / height as f64 - 0.5;
                for (x, out) in row.iter_mut().enumerate() {
                    let nx = (x as f64 + 0.5) / width as f64 - 0.5;
                    let n = Vector3D::new(nx, ny, MID_DEPTH - 0.5);
                    let p = transform.to_mesh(n);
                    // Unbounded query; the grid stores the true distance and
                    // thresholding happens at sampling time.
                    let hit = bvh
                        .closest_point(&p, f64::INFINITY)
                        .map_or(f64::INFINITY, |h| h.distance);
                    *out = hit as f32;
                }
            });

        log::info!("sdf: rendered {}x{} grid", width, height);

        Ok(Self {
            data,
            width,
            height,
            transform: transform.clone(),
        })
    }

    /// Build a fresh index over `geometry` and rasterize. Returns the index
    /// alongside the field so the caller can keep it for picking.
    pub fn render_geometry(
        geometry: &ChunkedGeometry,
        transform: &PlacementTransform,
        width: u32,
        height: u32,
    ) -> Result<(Self, Bvh), SdfError> {
        let bvh = Bvh::build(geometry, BvhOptions::default())?;
        let field = Self::render(&bvh, transform, width, height)?;
        Ok((field, bvh))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn transform(&self) -> &PlacementTransform {
        &self.transform
    }

    /// Raw single-channel pixels, row-major
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    /// Bilinear sample at grid uv in [0,1]², clamped at the borders
    pub fn sample(&self, u: f64, v: f64) -> f32 {
        let fx = (u.clamp(0.0, 1.0) * self.width as f64 - 0.5)
            .clamp(0.0, self.width as f64 - 1.0);
        let fy = (v.clamp(0.0, 1.0) * self.height as f64 - 0.5)
            .clamp(0.0, self.height as f64 - 1.0);

        let x0 = fx.floor() as u32;
        let y0 = fy.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let tx = (fx - x0 as f64) as f32;
        let ty = (fy - y0 as f64) as f32;

        let top = self.pixel(x0, y0) * (1.0 - tx) + self.pixel(x1, y0) * tx;
        let bottom = self.pixel(x0, y1) * (1.0 - tx) + self.pixel(x1, y1) * tx;
        top * (1.0 - ty) + bottom * ty
    }

    /// The downstream shader's surface test: is the sampled distance within
    /// the given threshold?
    pub fn is_near_surface(&self, u: f64, v: f64, surface: f64) -> bool {
        (self.sample(u, v) as f64) <= surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::VertexBuffer;
    use crate::chunk::ChunkedGeometryBuilder;
    use crate::geometry::ClipBox;

    fn clip() -> ClipBox {
        ClipBox::new(0.0, 0.0, 0.0, 2.0, 2.0, 2.0)
    }

    /// Unit square centered on the origin in the z=0 plane
    fn centered_square() -> ChunkedGeometry {
        let positions = vec![
            -0.5, -0.5, 0.0, 0.5, -0.5, 0.0, 0.5, 0.5, 0.0, //
            -0.5, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0,
        ];
        let buffer = VertexBuffer::from_positions(positions).unwrap();
        let mut builder = ChunkedGeometryBuilder::new();
        builder.append(&buffer, "square", clip()).unwrap();
        builder.finalize().unwrap()
    }

    fn unit_transform() -> PlacementTransform {
        PlacementTransform::axis_aligned(
            Point3D::new(0.0, 0.0, 0.0),
            Vector3D::new(2.0, 2.0, 2.0),
        )
    }

    #[test]
    fn test_empty_geometry_fails_fast() {
        let geometry = ChunkedGeometryBuilder::new().finalize().unwrap();
        assert!(SdfField::render_geometry(&geometry, &unit_transform(), 8, 8).is_err());
    }

    #[test]
    fn test_zero_resolution_rejected() {
        let geometry = centered_square();
        assert!(matches!(
            SdfField::render_geometry(&geometry, &unit_transform(), 0, 4),
            Err(SdfError::BadResolution { width: 0, height: 4 })
        ));
        assert!(matches!(
            SdfField::render_geometry(&geometry, &unit_transform(), 4, 0),
            Err(SdfError::BadResolution { width: 4, height: 0 })
        ));
    }

    #[test]
    fn test_center_near_corners_far() {
        let geometry = centered_square();
        let (field, _bvh) =
            SdfField::render_geometry(&geometry, &unit_transform(), 33, 33).unwrap();

        // Center pixel of the slice sits on the surface.
        let center = field.pixel(16, 16);
        assert!(center < 0.05, "center distance {center}");

        // The slice spans [-1, 1]²; its corners are well off the square.
        let corner = field.pixel(0, 0);
        assert!(corner > center);
        assert!(corner as f64 > 0.5);
    }

    #[test]
    fn test_field_tagged_with_inputs() {
        let geometry = centered_square();
        let transform = unit_transform();
        let (field, _) = SdfField::render_geometry(&geometry, &transform, 16, 8).unwrap();

        assert_eq!(field.width(), 16);
        assert_eq!(field.height(), 8);
        assert_eq!(field.transform().center, transform.center);
        assert_eq!(field.data().len(), 16 * 8);
    }

    #[test]
    fn test_threshold_sampling() {
        let geometry = centered_square();
        let (field, _) =
            SdfField::render_geometry(&geometry, &unit_transform(), 33, 33).unwrap();

        assert!(field.is_near_surface(0.5, 0.5, 0.1));
        assert!(!field.is_near_surface(0.0, 0.0, 0.1));
    }

    #[test]
    fn test_rerender_is_deterministic() {
        let geometry = centered_square();
        let (a, bvh) =
            SdfField::render_geometry(&geometry, &unit_transform(), 17, 17).unwrap();
        let b = SdfField::render(&bvh, &unit_transform(), 17, 17).unwrap();
        assert_eq!(a.data(), b.data());
    }
}
