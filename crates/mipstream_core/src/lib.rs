//! The core data model for multiresolution volume streaming.
//!
//! A volume is stored as a pyramid of downsampled levels. Each level is a 3D integer lattice of
//! voxels, addressed by [`GridExtent`]s, and split into fixed-size blocks addressed by
//! [`BlockKey`]s. The [`MultiresSource`] and [`SimpleSource`] traits are the seams through which
//! the streaming engine reads voxel data; implementations live with the I/O layer, not here.

pub mod block;
pub mod extent;
pub mod level;
pub mod pixel;
pub mod source;

pub use block::*;
pub use extent::*;
pub use level::*;
pub use pixel::*;
pub use source::*;

pub mod prelude {
    pub use super::{
        Aabb3, BlockData, BlockKey, GridExtent, MultiresSource, PixelType, ResolutionLevel,
        SimpleSource, StackKind,
    };
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
