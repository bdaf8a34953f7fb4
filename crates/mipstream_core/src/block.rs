use nalgebra::Point3;

/// The unit of caching and GPU residency: one fixed-size block of one resolution level.
///
/// `grid` is the block's position on the level's block grid, i.e. the block covers level voxels
/// `[grid * block_shape, (grid + 1) * block_shape)`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BlockKey {
    pub level: u8,
    pub grid: Point3<i32>,
}

impl BlockKey {
    #[inline]
    pub fn new(level: u8, grid: Point3<i32>) -> Self {
        Self { level, grid }
    }
}
