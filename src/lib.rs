// Core modules for the volumetric scan segment viewer
pub mod buffer;
pub mod centerline;
pub mod chunk;
pub mod flatten;
pub mod geometry;
pub mod sdf;
pub mod session;
pub mod spatial;

// Re-export commonly used types
pub use buffer::{BufferError, VertexBuffer};
pub use centerline::{Centerline, CenterlineError, Correspondence};
pub use chunk::{Chunk, ChunkError, ChunkHandle, ChunkedGeometry, ChunkedGeometryBuilder, SegmentId};
pub use flatten::{FlattenConfig, FlattenError, FlattenMapping, Flip};
pub use geometry::{Aabb, ClipBox, Point3D, Ray, Triangle, Vector3D};
pub use sdf::{PlacementTransform, SdfError, SdfField};
pub use session::{PickResult, SessionError, ViewerSession};
pub use spatial::{Bvh, BvhOptions, RayHit, SpatialError, SurfaceHit};

/// Main result type for the viewer core
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the viewer core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Spatial index error: {0}")]
    Spatial(#[from] SpatialError),

    #[error("Sdf error: {0}")]
    Sdf(#[from] SdfError),

    #[error("Flatten error: {0}")]
    Flatten(#[from] FlattenError),

    #[error("Centerline error: {0}")]
    Centerline(#[from] CenterlineError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}
