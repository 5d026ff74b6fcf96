//! Viewer session: single owner of the active geometry, its spatial index,
//! and the distance-field grids derived from them.
//!
//! The geometry/index pair is replaced as one unit at one program point, so
//! no query can observe an index built from superseded geometry. Superseded
//! pairs and their grids drop together. Everything here is request/response
//! on one thread; there is no background work.

use crate::chunk::{Chunk, ChunkedGeometry, SegmentId};
use crate::geometry::{ClipBox, Point3D, Ray, Vector3D};
use crate::sdf::{PlacementTransform, SdfError, SdfField};
use crate::spatial::{Bvh, BvhOptions, SpatialError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no active geometry installed")]
    NoGeometry,

    #[error("no focused segment")]
    NoFocus,

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Sdf(#[from] SdfError),
}

/// Click resolution result
#[derive(Debug, Clone)]
pub struct PickResult {
    pub segment_id: SegmentId,
    pub clip: ClipBox,
    pub point: Point3D,
    pub distance: f64,
}

struct ActiveSet {
    geometry: ChunkedGeometry,
    bvh: Bvh,
    sdf: Option<SdfField>,
}

struct FocusSet {
    id: SegmentId,
    geometry: ChunkedGeometry,
    bvh: Bvh,
    sdf: Option<SdfField>,
}

/// One logical viewer session
pub struct ViewerSession {
    options: BvhOptions,
    active: Option<ActiveSet>,
    focus: Option<FocusSet>,
}

impl ViewerSession {
    pub fn new(options: BvhOptions) -> Self {
        Self {
            options,
            active: None,
            focus: None,
        }
    }

    /// Install a freshly assembled geometry. The index is built first; only
    /// once both are ready does the swap happen, and the superseded pair
    /// (with its grids and any focus derived from the old chunk table)
    /// drops here.
    pub fn install(&mut self, geometry: ChunkedGeometry) -> Result<(), SessionError> {
        let bvh = Bvh::build(&geometry, self.options)?;
        log::info!(
            "session: installing geometry with {} chunks",
            geometry.chunks().len()
        );
        self.active = Some(ActiveSet {
            geometry,
            bvh,
            sdf: None,
        });
        self.focus = None;
        Ok(())
    }

    pub fn has_geometry(&self) -> bool {
        self.active.is_some()
    }

    pub fn geometry(&self) -> Option<&ChunkedGeometry> {
        self.active.as_ref().map(|a| &a.geometry)
    }

    pub fn bvh(&self) -> Option<&Bvh> {
        self.active.as_ref().map(|a| &a.bvh)
    }

    pub fn focus_id(&self) -> Option<&str> {
        self.focus.as_ref().map(|f| f.id.as_str())
    }

    /// Focus one segment: extract its vertex range into a standalone
    /// geometry and index it. Returns true when a new focus set was built;
    /// refocusing the current segment is a no-op, and an unknown or
    /// zero-length segment clears the focus.
    pub fn set_focus(&mut self, id: Option<&str>) -> Result<bool, SessionError> {
        let Some(id) = id else {
            self.focus = None;
            return Ok(false);
        };

        if self.focus.as_ref().is_some_and(|f| f.id == id) {
            return Ok(false);
        }

        let active = self.active.as_ref().ok_or(SessionError::NoGeometry)?;
        let Some(geometry) = active.geometry.extract_chunk(id) else {
            log::debug!("session: focus target {id:?} unknown or empty, clearing focus");
            self.focus = None;
            return Ok(false);
        };

        let bvh = Bvh::build(&geometry, self.options)?;
        self.focus = Some(FocusSet {
            id: id.to_string(),
            geometry,
            bvh,
            sdf: None,
        });
        Ok(true)
    }

    pub fn focus_geometry(&self) -> Option<&ChunkedGeometry> {
        self.focus.as_ref().map(|f| &f.geometry)
    }

    /// Regenerate the all-segments grid wholesale
    pub fn render_sdf(
        &mut self,
        transform: &PlacementTransform,
        width: u32,
        height: u32,
    ) -> Result<&SdfField, SessionError> {
        let active = self.active.as_mut().ok_or(SessionError::NoGeometry)?;
        let field = SdfField::render(&active.bvh, transform, width, height)?;
        Ok(active.sdf.insert(field))
    }

    /// Regenerate the focused-segment grid wholesale
    pub fn render_focus_sdf(
        &mut self,
        transform: &PlacementTransform,
        width: u32,
        height: u32,
    ) -> Result<&SdfField, SessionError> {
        let focus = self.focus.as_mut().ok_or(SessionError::NoFocus)?;
        let field = SdfField::render(&focus.bvh, transform, width, height)?;
        Ok(focus.sdf.insert(field))
    }

    pub fn sdf(&self) -> Option<&SdfField> {
        self.active.as_ref().and_then(|a| a.sdf.as_ref())
    }

    pub fn focus_sdf(&self) -> Option<&SdfField> {
        self.focus.as_ref().and_then(|f| f.sdf.as_ref())
    }

    /// Click resolution: nearest surface within `max_distance`, resolved to
    /// its segment. `None` means "no segment under cursor" and is a normal
    /// outcome, as is an uninstalled session.
    pub fn pick(&self, p: &Point3D, max_distance: f64) -> Option<PickResult> {
        let active = self.active.as_ref()?;
        let hit = active.bvh.closest_point(p, max_distance)?;
        let chunk = active.bvh.resolve_chunk(&active.geometry, hit.primitive_index)?;
        Some(Self::result_from(chunk, hit.point, hit.distance))
    }

    /// Every segment surface along a ray, nearest first. Overlapping
    /// sheets each contribute a hit.
    pub fn pick_all(&self, origin: Point3D, direction: Vector3D) -> Vec<PickResult> {
        let Some(active) = self.active.as_ref() else {
            return Vec::new();
        };
        let ray = Ray::new(origin, direction);
        active
            .bvh
            .raycast(&ray)
            .into_iter()
            .filter_map(|hit| {
                let chunk = active.bvh.resolve_chunk(&active.geometry, hit.primitive_index)?;
                Some(Self::result_from(chunk, hit.point, hit.distance))
            })
            .collect()
    }

    fn result_from(chunk: &Chunk, point: Point3D, distance: f64) -> PickResult {
        PickResult {
            segment_id: chunk.id.clone(),
            clip: chunk.clip,
            point,
            distance,
        }
    }
}
