//! Out-of-core streaming of multiresolution volumes into a fixed GPU tile budget.
//!
//! Every frame, the [`VolumeManager`] decides which blocks of each visible volume must be
//! resident in the shared [`TileCache`], at which pyramid level, and drives the asynchronous
//! fill pipeline that loads them. The decision is screen-space-error driven: the
//! [`LevelSelector`] picks the finest level whose voxel footprint still covers one screen
//! pixel at the block's depth.
//!
//! The GPU itself is behind two seams: [`GpuContext`] (texture allocation and uploads) and
//! [`ProgramFactory`] (shader assembly per [`ShaderSignature`]). Both have trivial in-memory
//! implementations in the tests; real backends live with the renderer.

pub mod blocks;
pub mod cache;
pub mod context;
pub mod error;
pub mod fill;
pub mod frustum;
pub mod level_select;
pub mod manager;
pub mod shader;
pub mod stacks;

pub use blocks::*;
pub use cache::*;
pub use context::*;
pub use error::*;
pub use fill::*;
pub use frustum::*;
pub use level_select::*;
pub use manager::*;
pub use shader::*;
pub use stacks::*;

/// Hash types to use for small keys like `BlockKey`.
pub type SmallKeyHashMap<K, V> = ahash::AHashMap<K, V>;
pub type SmallKeyHashSet<K> = ahash::AHashSet<K>;

pub mod prelude {
    pub use super::{
        CacheSpec, CameraView, EngineError, FillTask, FrameStats, Frustum, GpuContext,
        LevelSelector, LutEntry, LutImage, Program, ProgramFactory, RequiredBlock,
        RequiredBlockSet, ShaderSignature, SimpleVolume, StackManager, TextureId, TileCache,
        TileState, Volume, VolumeBlocks, VolumeId, VolumeManager, VolumeSource,
    };
    pub use mipstream_core::prelude::*;
}

#[cfg(test)]
pub(crate) mod test_util;
