//! Chunked geometry store.
//!
//! Segment surface meshes arrive one file at a time; the viewer concatenates
//! them into a single position buffer and keeps, per input, the vertex range
//! it landed in. A nearest-surface hit anywhere in the concatenated buffer
//! then resolves back to its source segment id by binary search over the
//! range table.

use crate::buffer::VertexBuffer;
use crate::geometry::{ClipBox, Point3D, Triangle};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("append after finalize")]
    GeometryFrozen,

    #[error("vertex index {0} beyond known chunk ranges")]
    ChunkNotFound(u32),
}

/// Identifier of one source segment mesh
pub type SegmentId = String;

/// Contiguous vertex range of one appended segment mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: SegmentId,
    pub clip: ClipBox,
    /// Cumulative vertex count before this chunk
    pub range_start: u32,
    /// Cumulative vertex count after this chunk
    pub range_end: u32,
}

impl Chunk {
    pub fn vertex_count(&self) -> u32 {
        self.range_end - self.range_start
    }

    pub fn is_empty(&self) -> bool {
        self.range_start == self.range_end
    }
}

/// Append-only assembly of the concatenated buffer.
///
/// Construction is single-threaded by contract: callers serialize their
/// appends. `finalize` freezes the builder; any later append fails with
/// `GeometryFrozen`.
#[derive(Debug, Default)]
pub struct ChunkedGeometryBuilder {
    positions: Vec<f64>,
    chunks: Vec<Chunk>,
    frozen: bool,
}

/// Vertex range of a freshly appended chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHandle {
    pub index: usize,
    pub range_start: u32,
    pub range_end: u32,
}

impl ChunkedGeometryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one segment's positions. Input order is preserved; an empty
    /// buffer still records a zero-length chunk.
    pub fn append(
        &mut self,
        buffer: &VertexBuffer,
        id: impl Into<SegmentId>,
        clip: ClipBox,
    ) -> Result<ChunkHandle, ChunkError> {
        if self.frozen {
            return Err(ChunkError::GeometryFrozen);
        }

        let range_start = (self.positions.len() / 3) as u32;
        self.positions.extend_from_slice(buffer.positions());
        let range_end = (self.positions.len() / 3) as u32;

        self.chunks.push(Chunk {
            id: id.into(),
            clip,
            range_start,
            range_end,
        });

        Ok(ChunkHandle {
            index: self.chunks.len() - 1,
            range_start,
            range_end,
        })
    }

    /// Freeze the buffer and hand it over. Appending or finalizing again
    /// after this returns `GeometryFrozen`.
    pub fn finalize(&mut self) -> Result<ChunkedGeometry, ChunkError> {
        if self.frozen {
            return Err(ChunkError::GeometryFrozen);
        }
        self.frozen = true;
        let positions = std::mem::take(&mut self.positions);
        let chunks = std::mem::take(&mut self.chunks);
        log::info!(
            "chunked geometry: {} chunks, {} vertices",
            chunks.len(),
            positions.len() / 3
        );
        Ok(ChunkedGeometry { positions, chunks })
    }
}

/// One concatenated position buffer plus its ordered chunk table.
/// Immutable; a changed segment set is a whole new instance.
#[derive(Debug, Clone)]
pub struct ChunkedGeometry {
    positions: Vec<f64>,
    chunks: Vec<Chunk>,
}

impl ChunkedGeometry {
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn vertex_count(&self) -> u32 {
        (self.positions.len() / 3) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn vertex(&self, i: u32) -> Point3D {
        let i = i as usize;
        Point3D::new(
            self.positions[3 * i],
            self.positions[3 * i + 1],
            self.positions[3 * i + 2],
        )
    }

    /// Resolve a vertex index to its chunk: first chunk whose `range_end`
    /// exceeds the index. Zero-length chunks never match.
    pub fn lookup_chunk(&self, vertex_index: u32) -> Option<&Chunk> {
        if vertex_index >= self.vertex_count() {
            return None;
        }

        // partition_point gives the count of chunks with range_end <= index;
        // the next chunk is the first with range_end > index.
        let pos = self
            .chunks
            .partition_point(|c| c.range_end <= vertex_index);

        // Skip zero-length chunks sharing the same boundary.
        self.chunks[pos..].iter().find(|c| !c.is_empty())
    }

    /// `lookup_chunk` for call sites where a miss is a programming error
    /// (e.g. resolving an index the spatial index itself produced).
    pub fn require_chunk(&self, vertex_index: u32) -> Result<&Chunk, ChunkError> {
        self.lookup_chunk(vertex_index)
            .ok_or(ChunkError::ChunkNotFound(vertex_index))
    }

    pub fn chunk_by_id(&self, id: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.id == id)
    }

    /// Extract one chunk's positions into a standalone single-chunk
    /// geometry (the focused-segment buffer).
    pub fn extract_chunk(&self, id: &str) -> Option<ChunkedGeometry> {
        let chunk = self.chunk_by_id(id)?;
        if chunk.is_empty() {
            return None;
        }

        let start = chunk.range_start as usize * 3;
        let end = chunk.range_end as usize * 3;
        Some(ChunkedGeometry {
            positions: self.positions[start..end].to_vec(),
            chunks: vec![Chunk {
                id: chunk.id.clone(),
                clip: chunk.clip,
                range_start: 0,
                range_end: chunk.vertex_count(),
            }],
        })
    }

    /// View every consecutive vertex triple as a triangle. Point clouds with
    /// counts not divisible by 3 leave a ragged tail of degenerate
    /// one-point triangles rather than dropping vertices. `None` past the
    /// last primitive.
    pub fn triangle(&self, primitive_index: u32) -> Option<Triangle> {
        let base = primitive_index * 3;
        let n = self.vertex_count();
        if base >= n {
            return None;
        }
        let v0 = self.vertex(base);
        let v1 = if base + 1 < n { self.vertex(base + 1) } else { v0 };
        let v2 = if base + 2 < n { self.vertex(base + 2) } else { v0 };
        Some(Triangle::new(v0, v1, v2))
    }

    pub fn primitive_count(&self) -> u32 {
        self.vertex_count().div_ceil(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::VertexBuffer;

    fn clip() -> ClipBox {
        ClipBox::new(0.0, 0.0, 0.0, 10.0, 10.0, 10.0)
    }

    fn points(n: usize) -> VertexBuffer {
        VertexBuffer::from_positions((0..n * 3).map(|i| i as f64).collect()).unwrap()
    }

    #[test]
    fn test_ranges_contiguous() {
        let mut builder = ChunkedGeometryBuilder::new();
        builder.append(&points(3), "a", clip()).unwrap();
        builder.append(&points(5), "b", clip()).unwrap();
        builder.append(&points(2), "c", clip()).unwrap();
        let geometry = builder.finalize().unwrap();

        let chunks = geometry.chunks();
        assert_eq!(chunks[0].range_start, 0);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].range_end, pair[1].range_start);
        }
        assert_eq!(chunks.last().unwrap().range_end, geometry.vertex_count());
    }

    #[test]
    fn test_lookup_covers_every_vertex() {
        let mut builder = ChunkedGeometryBuilder::new();
        builder.append(&points(3), "a", clip()).unwrap();
        builder.append(&points(5), "b", clip()).unwrap();
        let geometry = builder.finalize().unwrap();

        for v in 0..geometry.vertex_count() {
            let chunk = geometry.lookup_chunk(v).unwrap();
            assert!(chunk.range_start <= v && v < chunk.range_end);
        }
    }

    #[test]
    fn test_two_buffer_scenario() {
        // 3 + 5 points: index 3 and 7 land in the second chunk, 8 is out of range
        let mut builder = ChunkedGeometryBuilder::new();
        builder.append(&points(3), "first", clip()).unwrap();
        builder.append(&points(5), "second", clip()).unwrap();
        let geometry = builder.finalize().unwrap();

        assert_eq!(geometry.lookup_chunk(3).unwrap().id, "second");
        assert_eq!(geometry.lookup_chunk(7).unwrap().id, "second");
        assert!(geometry.lookup_chunk(8).is_none());
        assert!(matches!(
            geometry.require_chunk(8),
            Err(ChunkError::ChunkNotFound(8))
        ));
    }

    #[test]
    fn test_zero_length_chunk_skipped() {
        let mut builder = ChunkedGeometryBuilder::new();
        builder.append(&points(2), "a", clip()).unwrap();
        builder.append(&points(0), "empty", clip()).unwrap();
        builder.append(&points(2), "b", clip()).unwrap();
        let geometry = builder.finalize().unwrap();

        // Vertex 2 sits at the empty chunk's boundary but belongs to "b".
        assert_eq!(geometry.lookup_chunk(2).unwrap().id, "b");
        assert!(geometry.chunks()[1].is_empty());
    }

    #[test]
    fn test_append_preserves_order() {
        let mut builder = ChunkedGeometryBuilder::new();
        let handle = builder.append(&points(4), "a", clip()).unwrap();
        assert_eq!(handle.range_start, 0);
        assert_eq!(handle.range_end, 4);

        let handle = builder.append(&points(1), "b", clip()).unwrap();
        assert_eq!(handle.range_start, 4);
        assert_eq!(handle.range_end, 5);
        assert_eq!(handle.index, 1);
    }

    #[test]
    fn test_extract_chunk() {
        let mut builder = ChunkedGeometryBuilder::new();
        builder.append(&points(3), "a", clip()).unwrap();
        builder.append(&points(5), "b", clip()).unwrap();
        let geometry = builder.finalize().unwrap();

        let focus = geometry.extract_chunk("b").unwrap();
        assert_eq!(focus.vertex_count(), 5);
        assert_eq!(focus.chunks()[0].range_start, 0);
        assert_eq!(focus.vertex(0), geometry.vertex(3));
        assert!(geometry.extract_chunk("missing").is_none());
    }

    #[test]
    fn test_append_after_finalize() {
        let mut builder = ChunkedGeometryBuilder::new();
        builder.append(&points(3), "a", clip()).unwrap();
        let _geometry = builder.finalize().unwrap();
        assert!(matches!(
            builder.append(&points(1), "late", clip()),
            Err(ChunkError::GeometryFrozen)
        ));
    }

    #[test]
    fn test_double_finalize() {
        let mut builder = ChunkedGeometryBuilder::new();
        builder.append(&points(2), "a", clip()).unwrap();
        let geometry = builder.finalize().unwrap();
        assert_eq!(geometry.vertex_count(), 2);
        assert!(matches!(builder.finalize(), Err(ChunkError::GeometryFrozen)));
    }

    #[test]
    fn test_triangle_view_bounds() {
        let geometry = ChunkedGeometryBuilder::new().finalize().unwrap();
        assert_eq!(geometry.primitive_count(), 0);
        assert!(geometry.triangle(0).is_none());

        // 4 points: one full triangle plus a degenerate one-point tail.
        let mut builder = ChunkedGeometryBuilder::new();
        builder.append(&points(4), "a", clip()).unwrap();
        let geometry = builder.finalize().unwrap();
        assert_eq!(geometry.primitive_count(), 2);
        let tail = geometry.triangle(1).unwrap();
        assert_eq!(tail.v0, tail.v1);
        assert_eq!(tail.v0, tail.v2);
        assert!(geometry.triangle(2).is_none());
    }

    #[test]
    fn test_empty_geometry() {
        let geometry = ChunkedGeometryBuilder::new().finalize().unwrap();
        assert!(geometry.is_empty());
        assert!(geometry.lookup_chunk(0).is_none());
    }
}
