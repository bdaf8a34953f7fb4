use crate::blocks::LutImage;
use crate::cache::TileLocation;

use mipstream_core::PixelType;

use nalgebra::Vector3;

/// Opaque handle to a GPU texture, issued by a [`GpuContext`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TextureId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TextureDesc {
    /// Size in texels; 2D textures use `z == 1`.
    pub size: Vector3<i32>,
    pub format: PixelType,
}

/// CPU-side pixel data for small auxiliary textures (transfer functions, colormaps).
#[derive(Clone, Debug)]
pub struct TextureData {
    pub desc: TextureDesc,
    pub bytes: Vec<u8>,
}

/// The upload side of the GPU, as seen by the streaming engine.
///
/// The engine never touches a graphics API directly; it allocates handles and pushes bytes
/// through this trait. Implementations are expected to be cheap to call from the single update
/// thread; heavy work belongs behind the handle.
pub trait GpuContext {
    /// Whether the context can accept uploads right now. While `false`, whole-volume uploads
    /// are deferred and retried next frame.
    fn ready_for_upload(&self) -> bool {
        true
    }

    fn create_texture(&mut self, desc: TextureDesc) -> TextureId;

    /// Releases a texture created by this context. Evicted handles may be destroyed lazily;
    /// the default does nothing.
    fn destroy_texture(&mut self, _texture: TextureId) {}

    /// Replaces the full contents of `texture`.
    fn upload_texture(&mut self, texture: TextureId, bytes: &[u8]);

    /// Uploads one block worth of voxels into the shared cache texture at `location` (tile
    /// grid coordinates).
    fn upload_tile(&mut self, location: TileLocation, bytes: &[u8]);

    /// Replaces the contents of a volume's lookup texture. The lookup image's extents follow
    /// the camera, so implementations own (re)sizing the texture's storage from
    /// [`LutImage::size`] on each upload; the [`TextureDesc`] the handle was created with is
    /// only a placeholder.
    fn upload_lut(&mut self, texture: TextureId, lut: &LutImage);
}
