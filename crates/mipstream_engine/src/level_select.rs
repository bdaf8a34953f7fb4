use crate::frustum::{Frustum, Plane};

use mipstream_core::{Aabb3, ResolutionLevel};

use float_ord::FloatOrd;
use itertools::Itertools;
use nalgebra::{Matrix3, Point3, Vector3};

const FEASIBILITY_EPS: f64 = 1e-6;

/// Per-frame level-selection math for one volume.
///
/// Construction maps a one-pixel step on the near and far clip planes back into source space,
/// giving the source-space size of one screen pixel at either end of the view ray (`sn`, `sf`).
/// A level is worth loading when its voxel footprint along the view direction is at least as
/// large as the pixel footprint at the queried depth; anything finer cannot be resolved on
/// screen.
#[derive(Clone, Debug)]
pub struct LevelSelector {
    /// Projected footprint per level, same order as the pyramid's level list.
    footprints: Vec<f64>,
    sn: f64,
    sf: f64,
    /// Unit view direction in source space.
    dir: Vector3<f64>,
    near_center: Point3<f64>,
    /// `1 / depth` of the frustum along `dir`; zero when near and far coincide.
    inv_depth_range: f64,
}

impl LevelSelector {
    /// `frustum` must come from the same combined projection·view·model matrix that maps this
    /// volume's source coordinates to clip coordinates. Returns `None` when the pyramid has no
    /// levels.
    pub fn new(frustum: &Frustum, viewport_width: u32, levels: &[ResolutionLevel]) -> Option<Self> {
        if levels.is_empty() || viewport_width == 0 {
            return None;
        }

        let px = 2.0 / viewport_width as f64;

        let near_center = frustum.unproject(Point3::new(0.0, 0.0, -1.0));
        let near_step = frustum.unproject(Point3::new(px, 0.0, -1.0));
        let far_center = frustum.unproject(Point3::new(0.0, 0.0, 1.0));
        let far_step = frustum.unproject(Point3::new(px, 0.0, 1.0));

        let sn = (near_step - near_center).norm();
        let sf = (far_step - far_center).norm();

        let axis = far_center - near_center;
        let len = axis.norm();
        let dir = if len < 1e-12 {
            // Degenerate near/far separation; fall back to an arbitrary axis so footprints
            // stay finite. Depth interpolation is disabled below.
            Vector3::z()
        } else {
            axis / len
        };

        let depth_range = (far_center - near_center).dot(&dir);
        let inv_depth_range = if depth_range.abs() < 1e-12 {
            0.0
        } else {
            1.0 / depth_range
        };

        let footprints = levels
            .iter()
            .map(|level| {
                let f = level.voxel_size();

                (f.x * dir.x.abs())
                    .max(f.y * dir.y.abs())
                    .max(f.z * dir.z.abs())
            })
            .collect();

        Some(Self {
            footprints,
            sn,
            sf,
            dir,
            near_center,
            inv_depth_range,
        })
    }

    #[inline]
    pub fn num_levels(&self) -> usize {
        self.footprints.len()
    }

    #[inline]
    pub fn footprint(&self, level: usize) -> f64 {
        self.footprints[level]
    }

    #[inline]
    pub fn view_direction(&self) -> Vector3<f64> {
        self.dir
    }

    /// The source-space size of one screen pixel at `p`, interpolated linearly between the
    /// near- and far-plane footprints by the point's normalized depth.
    pub fn pixel_size_at(&self, p: Point3<f64>) -> f64 {
        let drel = ((p - self.near_center).dot(&self.dir) * self.inv_depth_range)
            .max(0.0)
            .min(1.0);

        self.sn + drel * (self.sf - self.sn)
    }

    /// The finest level whose footprint covers a pixel of size `sd`. Between the two levels
    /// bracketing `sd`, the one with the smaller absolute footprint distance wins.
    pub fn best_level_for_size(&self, sd: f64) -> usize {
        for (i, &sl) in self.footprints.iter().enumerate() {
            if sl >= sd {
                if i > 0 && (sd - self.footprints[i - 1]).abs() < (sl - sd).abs() {
                    return i - 1;
                }

                return i;
            }
        }

        self.footprints.len() - 1
    }

    /// The ideal level for a source-space point.
    #[inline]
    pub fn best_level(&self, p: Point3<f64>) -> usize {
        self.best_level_for_size(self.pixel_size_at(p))
    }

    /// The base level for a whole volume: the level at the visible point closest to the near
    /// plane, i.e. the point of the frustum ∩ bounds polytope minimizing depth along the view
    /// direction. Returns `None` when the intersection is empty (the volume is not visible
    /// this frame).
    pub fn base_level(&self, frustum: &Frustum, bounds: &Aabb3) -> Option<usize> {
        let mut planes = Vec::with_capacity(12);
        planes.extend_from_slice(frustum.planes());
        planes.extend_from_slice(&box_planes(bounds));

        let closest = closest_feasible_point(&planes, self.dir)?;

        Some(self.best_level(closest))
    }
}

/// The six inward half-spaces of an axis-aligned box.
pub fn box_planes(aabb: &Aabb3) -> [Plane; 6] {
    let (min, max) = (aabb.minimum, aabb.maximum);

    [
        Plane { normal: Vector3::x(), d: -min.x },
        Plane { normal: -Vector3::x(), d: max.x },
        Plane { normal: Vector3::y(), d: -min.y },
        Plane { normal: -Vector3::y(), d: max.y },
        Plane { normal: Vector3::z(), d: -min.z },
        Plane { normal: -Vector3::z(), d: max.z },
    ]
}

/// Minimizes `dir · p` over the polytope given by inward half-spaces, by enumerating plane
/// triples. A linear objective over a bounded nonempty polytope attains its minimum at a
/// vertex, so this is exact; the polytope here is always bounded because it includes the six
/// box faces. Returns `None` when the polytope is empty.
pub fn closest_feasible_point(planes: &[Plane], dir: Vector3<f64>) -> Option<Point3<f64>> {
    let mut best: Option<(FloatOrd<f64>, Point3<f64>)> = None;

    for (i, j, k) in (0..planes.len()).tuple_combinations() {
        let a = Matrix3::from_rows(&[
            planes[i].normal.transpose(),
            planes[j].normal.transpose(),
            planes[k].normal.transpose(),
        ]);
        let inv = match a.try_inverse() {
            Some(inv) => inv,
            None => continue,
        };
        let b = Vector3::new(-planes[i].d, -planes[j].d, -planes[k].d);
        let p = Point3::from(inv * b);

        let eps = FEASIBILITY_EPS * (1.0 + p.coords.norm());
        if planes.iter().any(|pl| pl.signed_distance(p) < -eps) {
            continue;
        }

        let score = FloatOrd(dir.dot(&p.coords));
        match &best {
            Some((s, _)) if *s <= score => {}
            _ => best = Some((score, p)),
        }
    }

    best.map(|(_, p)| p)
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
