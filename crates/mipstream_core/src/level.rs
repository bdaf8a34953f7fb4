use nalgebra::{Point3, Vector3};

/// One layer of a resolution pyramid: the integer factor by which each axis is downsampled
/// relative to full resolution. Level 0 of a pyramid is usually `[1, 1, 1]`.
///
/// Factors are per-axis and need not be equal; anisotropic microscopy data commonly downsamples
/// Z less aggressively than X and Y.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ResolutionLevel {
    pub factors: Vector3<i32>,
}

impl ResolutionLevel {
    #[inline]
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        assert!(x > 0 && y > 0 && z > 0);

        Self {
            factors: Vector3::new(x, y, z),
        }
    }

    /// The full-resolution level.
    #[inline]
    pub fn full() -> Self {
        Self::new(1, 1, 1)
    }

    /// The size of one voxel of this level, measured in full-resolution voxels.
    #[inline]
    pub fn voxel_size(&self) -> Vector3<f64> {
        self.factors.cast()
    }

    /// Maps a point in full-resolution voxel coordinates to this level's voxel coordinates.
    #[inline]
    pub fn to_level(&self, p: Point3<f64>) -> Point3<f64> {
        Point3::new(
            p.x / self.factors.x as f64,
            p.y / self.factors.y as f64,
            p.z / self.factors.z as f64,
        )
    }

    /// Maps a point in this level's voxel coordinates back to full-resolution coordinates.
    #[inline]
    pub fn to_full(&self, p: Point3<f64>) -> Point3<f64> {
        Point3::new(
            p.x * self.factors.x as f64,
            p.y * self.factors.y as f64,
            p.z * self.factors.z as f64,
        )
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
