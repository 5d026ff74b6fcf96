//! Decoded per-mesh vertex attributes.
//!
//! The loader hands the core flat numeric arrays (stride 3 for positions and
//! normals, stride 2 for uv). A `VertexBuffer` validates the strides once and
//! is immutable afterwards; the core only ever borrows it.

use crate::geometry::{Point3D, Vector3D};

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("position array length {0} is not a multiple of 3")]
    BadPositionStride(usize),

    #[error("uv array length {got} does not match {expected} vertices")]
    BadUvLength { got: usize, expected: usize },

    #[error("normal array length {got} does not match {expected} vertices")]
    BadNormalLength { got: usize, expected: usize },
}

/// One source mesh's decoded attributes
#[derive(Debug, Clone, Default)]
pub struct VertexBuffer {
    positions: Vec<f64>,
    uvs: Option<Vec<f64>>,
    normals: Option<Vec<f64>>,
}

impl VertexBuffer {
    /// Positions only; a zero-length buffer is legal.
    pub fn from_positions(positions: Vec<f64>) -> Result<Self, BufferError> {
        if positions.len() % 3 != 0 {
            return Err(BufferError::BadPositionStride(positions.len()));
        }
        Ok(Self {
            positions,
            uvs: None,
            normals: None,
        })
    }

    pub fn with_uvs(mut self, uvs: Vec<f64>) -> Result<Self, BufferError> {
        if uvs.len() != self.vertex_count() * 2 {
            return Err(BufferError::BadUvLength {
                got: uvs.len(),
                expected: self.vertex_count() * 2,
            });
        }
        self.uvs = Some(uvs);
        Ok(self)
    }

    pub fn with_normals(mut self, normals: Vec<f64>) -> Result<Self, BufferError> {
        if normals.len() != self.positions.len() {
            return Err(BufferError::BadNormalLength {
                got: normals.len(),
                expected: self.positions.len(),
            });
        }
        self.normals = Some(normals);
        Ok(self)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn uvs(&self) -> Option<&[f64]> {
        self.uvs.as_deref()
    }

    pub fn normals(&self) -> Option<&[f64]> {
        self.normals.as_deref()
    }

    pub fn position(&self, i: usize) -> Point3D {
        Point3D::new(
            self.positions[3 * i],
            self.positions[3 * i + 1],
            self.positions[3 * i + 2],
        )
    }

    pub fn uv(&self, i: usize) -> Option<(f64, f64)> {
        self.uvs
            .as_ref()
            .map(|uvs| (uvs[2 * i], uvs[2 * i + 1]))
    }

    pub fn normal(&self, i: usize) -> Option<Vector3D> {
        self.normals.as_ref().map(|n| {
            Vector3D::new(n[3 * i], n[3 * i + 1], n[3 * i + 2])
        })
    }
}
