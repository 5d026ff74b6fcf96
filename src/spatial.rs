//! BVH spatial index over a chunked geometry buffer.
//!
//! Built once per concatenated buffer and never mutated; replacing the
//! geometry means building a fresh index. Answers two queries: nearest
//! surface point within a radius (click resolution) and all ray
//! intersections in distance order (cross-sheet correspondence).

use crate::chunk::{Chunk, ChunkedGeometry};
use crate::geometry::{Aabb, Point3D, Ray, Triangle};

#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    #[error("cannot build index over empty geometry")]
    EmptyGeometry,
}

/// Build options. Leaf size 1 keeps point-cloud chunks precise, where each
/// "triangle" is a single sample.
#[derive(Debug, Clone, Copy)]
pub struct BvhOptions {
    pub max_leaf_primitives: usize,
}

impl Default for BvhOptions {
    fn default() -> Self {
        Self {
            max_leaf_primitives: 1,
        }
    }
}

/// Nearest-surface query result
#[derive(Debug, Clone, Copy)]
pub struct SurfaceHit {
    pub point: Point3D,
    pub primitive_index: u32,
    pub distance: f64,
}

/// One ray intersection
#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    pub point: Point3D,
    /// Barycentric (u, v) of the hit within its triangle
    pub uv: (f64, f64),
    pub primitive_index: u32,
    pub distance: f64,
}

#[derive(Debug)]
enum Node {
    Internal {
        bounds: Aabb,
        left: usize,
        right: usize,
    },
    Leaf {
        bounds: Aabb,
        /// Range into the reordered primitive index list
        start: usize,
        end: usize,
    },
}

impl Node {
    fn bounds(&self) -> &Aabb {
        match self {
            Node::Internal { bounds, .. } => bounds,
            Node::Leaf { bounds, .. } => bounds,
        }
    }
}

/// Bounding-volume hierarchy over the triangles (or degenerate
/// point-triangles) of one `ChunkedGeometry`.
pub struct Bvh {
    nodes: Vec<Node>,
    /// Primitive indices, reordered by the build
    primitives: Vec<u32>,
    triangles: Vec<Triangle>,
    root: usize,
}

impl Bvh {
    /// Median-split build over the geometry's primitives, O(n log n).
    pub fn build(geometry: &ChunkedGeometry, opts: BvhOptions) -> Result<Self, SpatialError> {
        if geometry.is_empty() {
            return Err(SpatialError::EmptyGeometry);
        }

        let primitive_count = geometry.primitive_count();
        let triangles: Vec<Triangle> = (0..primitive_count)
            .filter_map(|i| geometry.triangle(i))
            .collect();
        let centroids: Vec<Point3D> = triangles.iter().map(|t| t.centroid()).collect();

        let mut primitives: Vec<u32> = (0..primitive_count).collect();
        let mut nodes = Vec::with_capacity(2 * primitive_count as usize);
        let max_leaf = opts.max_leaf_primitives.max(1);

        let root = Self::build_node(
            &triangles,
            &centroids,
            &mut primitives,
            &mut nodes,
            0,
            primitive_count as usize,
            max_leaf,
        );

        log::debug!(
            "bvh: {} primitives, {} nodes, leaf size {}",
            primitive_count,
            nodes.len(),
            max_leaf
        );

        Ok(Self {
            nodes,
            primitives,
            triangles,
            root,
        })
    }

    fn build_node(
        triangles: &[Triangle],
        centroids: &[Point3D],
        primitives: &mut [u32],
        nodes: &mut Vec<Node>,
        start: usize,
        end: usize,
        max_leaf: usize,
    ) -> usize {
        let mut bounds = Aabb::empty();
        for &p in &primitives[start..end] {
            bounds.expand_triangle(&triangles[p as usize]);
        }

        if end - start <= max_leaf {
            nodes.push(Node::Leaf { bounds, start, end });
            return nodes.len() - 1;
        }

        // Split at the median along the widest centroid axis.
        let mut centroid_bounds = Aabb::empty();
        for &p in &primitives[start..end] {
            centroid_bounds.expand_point(&centroids[p as usize]);
        }
        let extent = centroid_bounds.extent();
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };

        let mid = (start + end) / 2;
        primitives[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
            centroids[a as usize][axis]
                .partial_cmp(&centroids[b as usize][axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let left = Self::build_node(triangles, centroids, primitives, nodes, start, mid, max_leaf);
        let right = Self::build_node(triangles, centroids, primitives, nodes, mid, end, max_leaf);

        nodes.push(Node::Internal {
            bounds,
            left,
            right,
        });
        nodes.len() - 1
    }

    pub fn primitive_count(&self) -> usize {
        self.triangles.len()
    }

    /// Nearest surface point within `max_distance` of `p`, or `None`.
    /// Absence is an ordinary outcome, not an error.
    pub fn closest_point(&self, p: &Point3D, max_distance: f64) -> Option<SurfaceHit> {
        let mut best: Option<SurfaceHit> = None;
        let mut best_sq = max_distance * max_distance;
        self.closest_point_node(self.root, p, &mut best, &mut best_sq);
        best
    }

    fn closest_point_node(
        &self,
        node: usize,
        p: &Point3D,
        best: &mut Option<SurfaceHit>,
        best_sq: &mut f64,
    ) {
        match &self.nodes[node] {
            Node::Leaf { start, end, .. } => {
                for &prim in &self.primitives[*start..*end] {
                    let tri = &self.triangles[prim as usize];
                    let q = tri.closest_point(p);
                    let d_sq = (q - p).norm_squared();
                    if d_sq <= *best_sq {
                        *best_sq = d_sq;
                        *best = Some(SurfaceHit {
                            point: q,
                            primitive_index: prim,
                            distance: d_sq.sqrt(),
                        });
                    }
                }
            }
            Node::Internal { left, right, .. } => {
                // Descend the nearer child first so its result prunes the other.
                let d_left = self.nodes[*left].bounds().distance_squared(p);
                let d_right = self.nodes[*right].bounds().distance_squared(p);
                let (first, d_first, second, d_second) = if d_left <= d_right {
                    (*left, d_left, *right, d_right)
                } else {
                    (*right, d_right, *left, d_left)
                };

                if d_first <= *best_sq {
                    self.closest_point_node(first, p, best, best_sq);
                }
                if d_second <= *best_sq {
                    self.closest_point_node(second, p, best, best_sq);
                }
            }
        }
    }

    /// Every intersection along the ray, ascending by distance. Each call
    /// re-walks the tree; the result is finite and independent of previous
    /// casts. Degenerate point-primitives never intersect.
    pub fn raycast(&self, ray: &Ray) -> Vec<RayHit> {
        let mut hits = Vec::new();
        let mut stack = vec![self.root];

        while let Some(node) = stack.pop() {
            match &self.nodes[node] {
                Node::Leaf { bounds, start, end } => {
                    if bounds.intersect_ray(ray).is_none() {
                        continue;
                    }
                    for &prim in &self.primitives[*start..*end] {
                        let tri = &self.triangles[prim as usize];
                        if let Some((t, u, v)) = tri.intersect_ray(ray) {
                            hits.push(RayHit {
                                point: ray.at(t),
                                uv: (u, v),
                                primitive_index: prim,
                                distance: t,
                            });
                        }
                    }
                }
                Node::Internal {
                    bounds,
                    left,
                    right,
                } => {
                    if bounds.intersect_ray(ray).is_some() {
                        stack.push(*left);
                        stack.push(*right);
                    }
                }
            }
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits
    }

    /// Resolve a query's primitive to its source chunk: the primitive's
    /// first vertex index against the geometry's chunk table.
    pub fn resolve_chunk<'a>(
        &self,
        geometry: &'a ChunkedGeometry,
        primitive_index: u32,
    ) -> Option<&'a Chunk> {
        geometry.lookup_chunk(primitive_index * 3)
    }
}
