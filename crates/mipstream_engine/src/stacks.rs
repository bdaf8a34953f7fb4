use crate::context::{GpuContext, TextureDesc, TextureId};
use crate::SmallKeyHashMap;

use mipstream_core::{PixelType, ReadError, SimpleSource};

use nalgebra::{Matrix4, Vector3};
use tracing::debug;

/// Everything the renderer needs to bind one simple (whole, non-blocked) volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimpleVolume {
    pub texture: TextureId,
    pub transform: Matrix4<f64>,
    pub dimensions: Vector3<i32>,
    /// World-space size of one voxel along its smallest axis; bounds the ray-march step.
    pub voxel_world_size: f64,
}

#[derive(Clone, Copy, Debug)]
struct StackEntry {
    texture: TextureId,
    /// Source version whose voxels are on the GPU; `None` while the upload is still deferred.
    uploaded_version: Option<u64>,
    last_used: u64,
}

/// Cache of whole-volume textures for simple stacks, keyed by stack identity and pixel type.
///
/// Uploads are skipped when the cached texture already holds the source's current version, and
/// deferred (entry created, flagged not-uploaded) while the context reports it cannot accept
/// uploads; deferred entries retry on the next frame's visit. A once-per-frame [`Self::sweep`]
/// evicts entries not touched since the previous sweep.
pub struct StackManager {
    entries: SmallKeyHashMap<(u64, PixelType), StackEntry>,
    /// Monotone frame counter, bumped by each sweep.
    counter: u64,
    last_sweep: u64,
}

impl Default for StackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StackManager {
    pub fn new() -> Self {
        Self {
            entries: SmallKeyHashMap::default(),
            counter: 1,
            last_sweep: 0,
        }
    }

    #[inline]
    pub fn num_cached(&self) -> usize {
        self.entries.len()
    }

    /// Whether the current contents of `source` are on the GPU.
    pub fn is_uploaded(&self, source: &dyn SimpleSource) -> bool {
        self.entries
            .get(&(source.id(), source.pixel_type()))
            .map(|e| e.uploaded_version == Some(source.version()))
            .unwrap_or(false)
    }

    /// Ensures a texture exists for `source` and that its contents are current, then returns
    /// the binding info. A deferred or failed upload still returns the (stale or empty)
    /// texture; the caller retries by visiting again next frame.
    pub fn simple_volume(
        &mut self,
        source: &dyn SimpleSource,
        ctx: &mut dyn GpuContext,
    ) -> Result<SimpleVolume, ReadError> {
        let key = (source.id(), source.pixel_type());
        let counter = self.counter;

        let entry = self.entries.entry(key).or_insert_with(|| {
            let texture = ctx.create_texture(TextureDesc {
                size: source.dimensions(),
                format: source.pixel_type(),
            });

            StackEntry {
                texture,
                uploaded_version: None,
                last_used: counter,
            }
        });
        entry.last_used = counter;
        let texture = entry.texture;
        let needs_upload = entry.uploaded_version != Some(source.version());

        if needs_upload {
            if ctx.ready_for_upload() {
                let version = source.version();
                let bytes = source.read()?;
                ctx.upload_texture(texture, &bytes);
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.uploaded_version = Some(version);
                }
            } else {
                debug!(stack = source.id(), "upload deferred, context not ready");
            }
        }

        Ok(SimpleVolume {
            texture,
            transform: source.transform(),
            dimensions: source.dimensions(),
            voxel_world_size: min_voxel_world_size(&source.transform()),
        })
    }

    /// Evicts entries not touched since the previous sweep and advances the frame counter.
    /// Call exactly once per frame, after every visible stack has been visited.
    pub fn sweep(&mut self, ctx: &mut dyn GpuContext) {
        let horizon = self.last_sweep;
        let mut evicted = Vec::new();
        self.entries.retain(|_, e| {
            if e.last_used > horizon {
                true
            } else {
                evicted.push(e.texture);
                false
            }
        });
        for texture in evicted {
            ctx.destroy_texture(texture);
        }

        self.last_sweep = self.counter;
        self.counter += 1;
    }
}

/// The world-space extent of one voxel along its smallest axis, from the columns of a
/// voxel-to-world transform.
pub fn min_voxel_world_size(transform: &Matrix4<f64>) -> f64 {
    let axis = |col: usize| {
        Vector3::new(
            transform[(0, col)],
            transform[(1, col)],
            transform[(2, col)],
        )
        .norm()
    };

    axis(0).min(axis(1)).min(axis(2))
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
