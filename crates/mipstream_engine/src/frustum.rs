use mipstream_core::Aabb3;

use nalgebra::{Matrix4, Point3, Vector3, Vector4};

/// A half-space `normal · p + d >= 0`, with `normal` of unit length.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vector3<f64>,
    pub d: f64,
}

impl Plane {
    /// Builds a plane from unnormalized coefficients. Returns `None` for a degenerate normal.
    pub fn from_coefficients(v: Vector4<f64>) -> Option<Self> {
        let normal = Vector3::new(v.x, v.y, v.z);
        let len = normal.norm();
        if len < 1e-12 {
            return None;
        }

        Some(Self {
            normal: normal / len,
            d: v.w / len,
        })
    }

    #[inline]
    pub fn signed_distance(&self, p: Point3<f64>) -> f64 {
        self.normal.dot(&p.coords) + self.d
    }
}

/// The view frustum in source space, as six inward-facing planes plus the inverse transform
/// used to map NDC points back into source space.
#[derive(Clone, Debug)]
pub struct Frustum {
    planes: [Plane; 6],
    inv: Matrix4<f64>,
}

impl Frustum {
    /// Extracts the frustum of `m`, a matrix mapping source coordinates to clip coordinates
    /// (`-w <= x, y, z <= w`). The planes are the row combinations `r3 ± r_i`. Returns `None`
    /// when `m` is singular or produces degenerate planes.
    pub fn from_matrix(m: &Matrix4<f64>) -> Option<Self> {
        let inv = m.try_inverse()?;

        let row = |i: usize| Vector4::new(m[(i, 0)], m[(i, 1)], m[(i, 2)], m[(i, 3)]);
        let r3 = row(3);

        let planes = [
            Plane::from_coefficients(r3 + row(0))?, // left
            Plane::from_coefficients(r3 - row(0))?, // right
            Plane::from_coefficients(r3 + row(1))?, // bottom
            Plane::from_coefficients(r3 - row(1))?, // top
            Plane::from_coefficients(r3 + row(2))?, // near
            Plane::from_coefficients(r3 - row(2))?, // far
        ];

        Some(Self { planes, inv })
    }

    #[inline]
    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    /// Maps a point in normalized device coordinates back into source space.
    pub fn unproject(&self, ndc: Point3<f64>) -> Point3<f64> {
        let h = self.inv * Vector4::new(ndc.x, ndc.y, ndc.z, 1.0);

        Point3::new(h.x / h.w, h.y / h.w, h.z / h.w)
    }

    /// The eight source-space corners of the frustum.
    pub fn corners(&self) -> [Point3<f64>; 8] {
        let c = |x: f64, y: f64, z: f64| self.unproject(Point3::new(x, y, z));

        [
            c(-1.0, -1.0, -1.0),
            c(1.0, -1.0, -1.0),
            c(-1.0, 1.0, -1.0),
            c(1.0, 1.0, -1.0),
            c(-1.0, -1.0, 1.0),
            c(1.0, -1.0, 1.0),
            c(-1.0, 1.0, 1.0),
            c(1.0, 1.0, 1.0),
        ]
    }

    #[inline]
    pub fn contains(&self, p: Point3<f64>) -> bool {
        self.planes.iter().all(|pl| pl.signed_distance(p) >= 0.0)
    }

    /// Plane test against `aabb`. A box whose most-inward corner is behind any plane cannot
    /// intersect the frustum; everything else is treated as intersecting.
    pub fn intersects_aabb(&self, aabb: &Aabb3) -> bool {
        for plane in &self.planes {
            // The box corner furthest along the plane normal.
            let p = Point3::new(
                if plane.normal.x >= 0.0 {
                    aabb.maximum.x
                } else {
                    aabb.minimum.x
                },
                if plane.normal.y >= 0.0 {
                    aabb.maximum.y
                } else {
                    aabb.minimum.y
                },
                if plane.normal.z >= 0.0 {
                    aabb.maximum.z
                } else {
                    aabb.minimum.z
                },
            );

            if plane.signed_distance(p) < 0.0 {
                return false;
            }
        }

        true
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
