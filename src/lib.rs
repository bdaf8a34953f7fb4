//! Out-of-core streaming of multiresolution volume data into a fixed GPU tile budget.
//!
//! This library is organized into two crates:
//! - **core**: the data model shared by sources and the engine: grid extents, resolution
//!   levels, pixel types, block keys, and the source traits backing stores implement
//! - **engine**: the streaming machinery: per-frame level selection, the shared tile cache,
//!   the fill/upload pipeline, per-volume lookup textures, and the frame orchestrator
//!
//! Start with [`engine::VolumeManager`]: register volumes, call
//! [`update`](engine::VolumeManager::update) once per frame with the camera, and draw with the
//! bound program once [`ready_to_render`](engine::VolumeManager::ready_to_render) is true.

pub use mipstream_core as core;
pub use mipstream_engine as engine;

pub mod prelude {
    pub use super::core::prelude::*;
    pub use super::engine::prelude::*;
}
