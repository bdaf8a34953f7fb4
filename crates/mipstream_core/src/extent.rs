use itertools::iproduct;
use nalgebra::{Point3, Vector3};

/// An axis-aligned box on the 3D integer lattice, stored as *inclusive* minimum and maximum
/// corners. Block grids and per-level voxel bounds are both described with this type.
///
/// An extent whose maximum is less than its minimum on any axis is empty.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct GridExtent {
    /// The least point contained in the extent.
    pub minimum: Point3<i32>,
    /// The greatest point contained in the extent.
    pub maximum: Point3<i32>,
}

impl GridExtent {
    #[inline]
    pub fn from_min_and_max(minimum: Point3<i32>, maximum: Point3<i32>) -> Self {
        Self { minimum, maximum }
    }

    /// The extent covering `[minimum, minimum + shape)`.
    #[inline]
    pub fn from_min_and_shape(minimum: Point3<i32>, shape: Vector3<i32>) -> Self {
        Self {
            minimum,
            maximum: minimum + shape - Vector3::new(1, 1, 1),
        }
    }

    /// The number of lattice points on each axis.
    #[inline]
    pub fn shape(&self) -> Vector3<i32> {
        self.maximum - self.minimum + Vector3::new(1, 1, 1)
    }

    #[inline]
    pub fn num_points(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let s = self.shape();

        s.x as usize * s.y as usize * s.z as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.minimum.x > self.maximum.x
            || self.minimum.y > self.maximum.y
            || self.minimum.z > self.maximum.z
    }

    #[inline]
    pub fn contains(&self, p: Point3<i32>) -> bool {
        self.minimum.x <= p.x
            && p.x <= self.maximum.x
            && self.minimum.y <= p.y
            && p.y <= self.maximum.y
            && self.minimum.z <= p.z
            && p.z <= self.maximum.z
    }

    /// The extent shared by `self` and `other`. May be empty.
    #[inline]
    pub fn intersection(&self, other: &Self) -> Self {
        Self {
            minimum: Point3::new(
                self.minimum.x.max(other.minimum.x),
                self.minimum.y.max(other.minimum.y),
                self.minimum.z.max(other.minimum.z),
            ),
            maximum: Point3::new(
                self.maximum.x.min(other.maximum.x),
                self.maximum.y.min(other.maximum.y),
                self.maximum.z.min(other.maximum.z),
            ),
        }
    }

    /// Iterate over all lattice points in ZYX order (X varies fastest).
    pub fn iter_points(&self) -> impl Iterator<Item = Point3<i32>> {
        let min = self.minimum;
        let max = self.maximum;

        iproduct!(min.z..=max.z, min.y..=max.y, min.x..=max.x)
            .map(|(z, y, x)| Point3::new(x, y, z))
    }
}

/// An axis-aligned box in continuous source space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb3 {
    pub minimum: Point3<f64>,
    pub maximum: Point3<f64>,
}

impl Aabb3 {
    #[inline]
    pub fn from_min_and_max(minimum: Point3<f64>, maximum: Point3<f64>) -> Self {
        Self { minimum, maximum }
    }

    /// The smallest box containing all of `points`. Returns `None` for an empty iterator.
    pub fn bounding(points: impl IntoIterator<Item = Point3<f64>>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut aabb = Self::from_min_and_max(first, first);
        for p in iter {
            aabb.minimum = Point3::new(
                aabb.minimum.x.min(p.x),
                aabb.minimum.y.min(p.y),
                aabb.minimum.z.min(p.z),
            );
            aabb.maximum = Point3::new(
                aabb.maximum.x.max(p.x),
                aabb.maximum.y.max(p.y),
                aabb.maximum.z.max(p.z),
            );
        }

        Some(aabb)
    }

    /// The continuous box covering the lattice points of `extent`, i.e. `[min, max + 1)`.
    #[inline]
    pub fn covering_extent(extent: &GridExtent) -> Self {
        Self {
            minimum: extent.minimum.cast(),
            maximum: extent.maximum.cast() + Vector3::new(1.0, 1.0, 1.0),
        }
    }

    #[inline]
    pub fn center(&self) -> Point3<f64> {
        self.minimum + (self.maximum - self.minimum) / 2.0
    }

    /// The eight corners, in no particular order.
    pub fn corners(&self) -> [Point3<f64>; 8] {
        let (a, b) = (self.minimum, self.maximum);

        [
            Point3::new(a.x, a.y, a.z),
            Point3::new(b.x, a.y, a.z),
            Point3::new(a.x, b.y, a.z),
            Point3::new(b.x, b.y, a.z),
            Point3::new(a.x, a.y, b.z),
            Point3::new(b.x, a.y, b.z),
            Point3::new(a.x, b.y, b.z),
            Point3::new(b.x, b.y, b.z),
        ]
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
