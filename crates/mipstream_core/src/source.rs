use crate::{BlockKey, GridExtent, PixelType, ResolutionLevel};

use auto_impl::auto_impl;
use nalgebra::{Matrix4, Vector3};
use thiserror::Error;

/// Whether a stack is a whole in-memory volume or a blocked resolution pyramid.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StackKind {
    Simple,
    Multiresolution,
}

/// Voxel data produced for one block. `complete` is false when the backing store could only
/// partially supply the block (e.g. data still loading from disk); partial blocks are uploaded
/// anyway and re-requested on a later frame.
#[derive(Clone, Debug)]
pub struct BlockData {
    pub bytes: Vec<u8>,
    pub complete: bool,
}

/// A failure to read voxel data from a backing source.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("failed to read source data: {reason}")]
pub struct ReadError {
    pub reason: String,
}

impl ReadError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A blocked resolution pyramid. One instance describes one volume at one timepoint; switching
/// timepoints replaces the source wholesale.
///
/// Implementations must be callable from worker threads; block reads for distinct keys may run
/// concurrently.
#[auto_impl(&, Arc)]
pub trait MultiresSource: Send + Sync {
    /// The pyramid levels, finest first. Never empty.
    fn resolutions(&self) -> &[ResolutionLevel];

    /// The voxel bounding interval of `level`, in that level's voxel coordinates.
    fn level_bounds(&self, level: usize) -> GridExtent;

    /// Maps full-resolution voxel coordinates to world coordinates.
    fn transform(&self) -> Matrix4<f64>;

    fn pixel_type(&self) -> PixelType;

    /// Whether the backing store can fully supply `key` right now, without blocking on I/O that
    /// has not completed.
    fn can_supply(&self, key: BlockKey, block_shape: Vector3<i32>) -> bool;

    /// Produce the voxel data for `key`. Voxels outside [`Self::level_bounds`] are padding and
    /// may hold any value.
    fn read_block(
        &self,
        key: BlockKey,
        block_shape: Vector3<i32>,
    ) -> Result<BlockData, ReadError>;
}

/// A whole, non-blocked volume, small enough to be uploaded as a single texture.
#[auto_impl(&, Arc)]
pub trait SimpleSource: Send + Sync {
    /// Stable identity of this stack, used to key the whole-volume texture cache.
    fn id(&self) -> u64;

    fn dimensions(&self) -> Vector3<i32>;

    /// Maps voxel coordinates to world coordinates.
    fn transform(&self) -> Matrix4<f64>;

    fn pixel_type(&self) -> PixelType;

    /// Bumped whenever the voxel contents change; a cached texture with an older version is
    /// stale and gets re-uploaded.
    fn version(&self) -> u64;

    fn read(&self) -> Result<Vec<u8>, ReadError>;
}
