use crate::blocks::VolumeBlocks;
use crate::cache::{CacheSpec, TileCache};
use crate::context::{GpuContext, TextureData, TextureDesc, TextureId};
use crate::error::EngineError;
use crate::fill::{process_fill_tasks, FillTask};
use crate::shader::{
    color_map_name, lut_sampler_name, signature_segments, transfer_function_name, volume_name,
    Program, ProgramFactory, ShaderSignature, UniformValue, VolumeSignature, CACHE_TEXTURE,
};
use crate::stacks::StackManager;
use crate::{SmallKeyHashMap, SmallKeyHashSet};

use mipstream_core::{MultiresSource, PixelType, SimpleSource, StackKind};

use futures::executor::ThreadPool;
use nalgebra::{Matrix4, Vector3};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle to a registered volume.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct VolumeId(u64);

/// The backing data of one volume.
#[derive(Clone)]
pub enum VolumeSource {
    Simple(Arc<dyn SimpleSource>),
    Multiresolution(Arc<dyn MultiresSource>),
}

impl VolumeSource {
    #[inline]
    pub fn kind(&self) -> StackKind {
        match self {
            Self::Simple(_) => StackKind::Simple,
            Self::Multiresolution(_) => StackKind::Multiresolution,
        }
    }

    #[inline]
    pub fn pixel_type(&self) -> PixelType {
        match self {
            Self::Simple(s) => s.pixel_type(),
            Self::Multiresolution(s) => s.pixel_type(),
        }
    }

    /// Maps voxel coordinates to world coordinates.
    #[inline]
    pub fn transform(&self) -> Matrix4<f64> {
        match self {
            Self::Simple(s) => s.transform(),
            Self::Multiresolution(s) => s.transform(),
        }
    }
}

/// The intensity window mapped onto the transfer function.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayRange {
    pub min: f64,
    pub max: f64,
}

impl Default for DisplayRange {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

/// One renderable volume: its data source plus display parameters.
pub struct Volume {
    pub source: VolumeSource,
    pub visible: bool,
    pub display_range: DisplayRange,
    pub transfer_function: Option<TextureData>,
    pub color_map: Option<TextureData>,
}

impl Volume {
    pub fn simple(source: Arc<dyn SimpleSource>) -> Self {
        Self::from_source(VolumeSource::Simple(source))
    }

    pub fn multiresolution(source: Arc<dyn MultiresSource>) -> Self {
        Self::from_source(VolumeSource::Multiresolution(source))
    }

    fn from_source(source: VolumeSource) -> Self {
        Self {
            source,
            visible: true,
            display_range: DisplayRange::default(),
            transfer_function: None,
            color_map: None,
        }
    }
}

/// Camera state for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraView {
    /// Projection times view; volumes append their own voxel-to-world transform.
    pub view_projection: Matrix4<f64>,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ManagerState {
    /// Structure changed (volume set or signature); bindings are not yet trustworthy.
    Created,
    /// Every expected binding was present at the end of the last update.
    Ready,
}

/// Counters describing the last processed frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub visible_volumes: usize,
    pub required_blocks: usize,
    pub fill_tasks: usize,
    pub coarsening_steps: usize,
    pub truncated_tasks: usize,
    /// Every required block satisfied at its ideal level by a complete tile.
    pub all_complete: bool,
}

#[derive(Clone, Copy, Debug, Default)]
struct AuxTextures {
    transfer_function: Option<TextureId>,
    color_map: Option<TextureId>,
}

/// Top-level orchestrator: registry of volumes, per-signature program cache, the shared block
/// cache and its fill pipeline, and the per-frame update that keeps them coherent.
///
/// One `update` per frame, from a single thread. The renderer draws with the program returned
/// by [`Self::current_program`] once [`Self::ready_to_render`] is true.
pub struct VolumeManager<F> {
    factory: F,
    volumes: Vec<(VolumeId, Volume)>,
    next_id: u64,

    cache: TileCache,
    cache_texture: Option<TextureId>,
    blocks: SmallKeyHashMap<VolumeId, VolumeBlocks>,
    lut_textures: SmallKeyHashMap<VolumeId, TextureId>,
    aux_textures: SmallKeyHashMap<VolumeId, AuxTextures>,

    programs: SmallKeyHashMap<ShaderSignature, Program>,
    failed_signatures: SmallKeyHashSet<ShaderSignature>,
    current_signature: ShaderSignature,

    stacks: StackManager,
    pool: Option<ThreadPool>,

    state: ManagerState,
    freeze_required_blocks: bool,
    repaint_requested: bool,
    stats: FrameStats,
    min_world_voxel_size: Option<f64>,
}

impl<F: ProgramFactory> VolumeManager<F> {
    pub fn new(factory: F, cache: TileCache) -> Self {
        Self {
            factory,
            volumes: Vec::new(),
            next_id: 0,
            cache,
            cache_texture: None,
            blocks: SmallKeyHashMap::default(),
            lut_textures: SmallKeyHashMap::default(),
            aux_textures: SmallKeyHashMap::default(),
            programs: SmallKeyHashMap::default(),
            failed_signatures: SmallKeyHashSet::default(),
            current_signature: ShaderSignature::default(),
            stacks: StackManager::new(),
            pool: None,
            state: ManagerState::Created,
            freeze_required_blocks: false,
            repaint_requested: false,
            stats: FrameStats::default(),
            min_world_voxel_size: None,
        }
    }

    /// A manager whose shared cache fits in `cache_size_mb` megabytes.
    pub fn with_cache_budget(factory: F, spec: CacheSpec, cache_size_mb: usize) -> Self {
        Self::new(factory, TileCache::with_size_budget(spec, cache_size_mb))
    }

    /// Runs block production on `pool` instead of inline.
    pub fn with_worker_pool(mut self, pool: ThreadPool) -> Self {
        self.pool = Some(pool);

        self
    }

    pub fn add(&mut self, volume: Volume) -> VolumeId {
        let id = VolumeId(self.next_id);
        self.next_id += 1;

        if let VolumeSource::Multiresolution(source) = &volume.source {
            self.blocks.insert(
                id,
                VolumeBlocks::new(source.clone(), self.cache.spec().block_shape),
            );
        }
        self.volumes.push((id, volume));
        self.state = ManagerState::Created;
        self.repaint_requested = true;

        id
    }

    pub fn remove(&mut self, id: VolumeId) -> Option<Volume> {
        let i = self.volumes.iter().position(|(v, _)| *v == id)?;
        let (_, volume) = self.volumes.remove(i);
        self.blocks.remove(&id);
        self.lut_textures.remove(&id);
        self.aux_textures.remove(&id);
        self.state = ManagerState::Created;
        self.repaint_requested = true;

        Some(volume)
    }

    pub fn volume(&self, id: VolumeId) -> Option<&Volume> {
        self.volumes.iter().find(|(v, _)| *v == id).map(|(_, v)| v)
    }

    pub fn volume_mut(&mut self, id: VolumeId) -> Option<&mut Volume> {
        self.state = ManagerState::Created;

        self.volumes
            .iter_mut()
            .find(|(v, _)| *v == id)
            .map(|(_, v)| v)
    }

    /// Marks a volume's render state dirty, e.g. after its transfer function changed.
    pub fn notify_update(&mut self, id: VolumeId) {
        self.aux_textures.remove(&id);
        self.state = ManagerState::Created;
        self.repaint_requested = true;
    }

    pub fn request_repaint(&mut self) {
        self.repaint_requested = true;
    }

    /// Whether the last update left work unfinished and another frame should be drawn soon.
    #[inline]
    pub fn repaint_needed(&self) -> bool {
        self.repaint_requested
    }

    /// Whether every registered stack had its expected bindings at the end of the last update.
    #[inline]
    pub fn ready_to_render(&self) -> bool {
        self.state == ManagerState::Ready
    }

    #[inline]
    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }

    /// While set, block requirements are not recomputed: the camera can move freely without
    /// changing residency or streaming anything. Debugging aid for inspecting one frame's
    /// block set from other angles.
    pub fn set_freeze_required_blocks(&mut self, freeze: bool) {
        self.freeze_required_blocks = freeze;
        if !freeze {
            self.repaint_requested = true;
        }
    }

    #[inline]
    pub fn freeze_required_blocks(&self) -> bool {
        self.freeze_required_blocks
    }

    /// The smallest world-space voxel size among the volumes bound in the last update; bounds
    /// the renderer's ray-march step. `None` until a frame bound at least one volume.
    #[inline]
    pub fn min_world_voxel_size(&self) -> Option<f64> {
        self.min_world_voxel_size
    }

    #[inline]
    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// The program for the current signature, if it has been compiled.
    pub fn current_program(&self) -> Option<&Program> {
        self.programs.get(&self.current_signature)
    }

    /// Replaces the shared cache with one fitting `new_size_mb` megabytes. All resident blocks
    /// are dropped and re-streamed over the following frames.
    pub fn recreate_cache(&mut self, ctx: &mut dyn GpuContext, new_size_mb: usize) {
        let spec = *self.cache.spec();
        if let Some(texture) = self.cache_texture.take() {
            ctx.destroy_texture(texture);
        }
        self.cache = TileCache::with_size_budget(spec, new_size_mb);
        self.state = ManagerState::Created;
        self.repaint_requested = true;
        debug!(tiles = self.cache.max_tiles(), "recreated block cache");
    }

    /// Processes one frame end to end and returns whether the scene is ready to draw.
    pub fn update(&mut self, camera: &CameraView, ctx: &mut dyn GpuContext) -> bool {
        self.repaint_requested = false;
        self.stats = FrameStats::default();

        let visible = self.visible_ids();
        self.stats.visible_volumes = visible.len();

        let signature = self.signature_of(&visible);
        if signature != self.current_signature {
            self.state = ManagerState::Created;
            self.current_signature = signature;
        }

        let have_program = self.ensure_program();
        self.ensure_cache_texture(ctx);

        // A source replaced since the last frame (a timepoint switch) invalidates the block
        // state built for the old one.
        for &id in &visible {
            self.sync_blocks(id);
        }

        let mut all_complete = true;
        if self.freeze_required_blocks {
            // Residency is pinned: keep the block sets and LUTs of the last unfrozen frame
            // and only refresh the bindings.
            for &id in &visible {
                if let Some(blocks) = self.blocks.get(&id) {
                    self.stats.required_blocks += blocks.required_blocks().blocks.len();
                }
            }
        } else {
            // Per-volume frame state: frustum, base level, required blocks.
            for &id in &visible {
                if let Some(blocks) = self.blocks.get_mut(&id) {
                    let pvm = camera.view_projection * blocks.source().transform();
                    blocks.init(&pvm, camera.viewport_width);
                    self.stats.required_blocks += blocks.required_blocks().blocks.len();
                }
            }

            // One timestamp per frame, taken before any tile is (re)assigned;
            // `TileCache::assign` stamps stolen tiles with it so a frame never steals the
            // same tile twice.
            let timestamp = self.cache.next_timestamp();

            let tasks = self.budget_fit_tasks(&visible);
            self.stats.fill_tasks = tasks.len();
            process_fill_tasks(tasks, self.pool.as_ref(), &mut self.cache, ctx);

            for &id in &visible {
                if let Some(blocks) = self.blocks.get_mut(&id) {
                    all_complete &= blocks.make_lut(&mut self.cache, timestamp);
                }
            }
        }
        self.stats.all_complete = all_complete;

        let bindings_ok = self.bind_frame(&visible, ctx);

        self.stacks.sweep(ctx);

        let ready = have_program && bindings_ok;
        self.state = if ready {
            ManagerState::Ready
        } else {
            ManagerState::Created
        };
        if !all_complete || !ready {
            self.repaint_requested = true;
        }

        ready
    }

    /// The visible volumes in binding order: multiresolution stacks first, then simple stacks,
    /// each group in registration order. Binding indices and the signature both follow this
    /// order.
    fn visible_ids(&self) -> Vec<VolumeId> {
        let group = |kind: StackKind| {
            self.volumes
                .iter()
                .filter(move |(_, v)| v.visible && v.source.kind() == kind)
                .map(|(id, _)| *id)
        };

        group(StackKind::Multiresolution)
            .chain(group(StackKind::Simple))
            .collect()
    }

    /// Rebuilds a volume's block state when its source was replaced (the pyramid of a new
    /// timepoint arrives as a fresh source). Without this, streaming would keep reading from
    /// the source captured at registration.
    fn sync_blocks(&mut self, id: VolumeId) {
        let volume = match self.volumes.iter().find(|(v, _)| *v == id) {
            Some((_, v)) => v,
            None => return,
        };

        match &volume.source {
            VolumeSource::Multiresolution(source) => {
                let stale = self
                    .blocks
                    .get(&id)
                    .map(|b| !Arc::ptr_eq(b.source(), source))
                    .unwrap_or(true);
                if stale {
                    self.blocks.insert(
                        id,
                        VolumeBlocks::new(source.clone(), self.cache.spec().block_shape),
                    );
                }
            }
            VolumeSource::Simple(_) => {
                self.blocks.remove(&id);
            }
        }
    }

    fn signature_of(&self, visible: &[VolumeId]) -> ShaderSignature {
        ShaderSignature::new(visible.iter().filter_map(|id| {
            self.volume(*id).map(|v| VolumeSignature {
                kind: v.source.kind(),
                pixel: v.source.pixel_type(),
            })
        }))
    }

    /// Compiles the current signature's program if it is new. A signature that failed to
    /// assemble stays failed; previously compiled signatures remain usable.
    fn ensure_program(&mut self) -> bool {
        let signature = self.current_signature.clone();
        if self.programs.contains_key(&signature) {
            return true;
        }
        if self.failed_signatures.contains(&signature) {
            return false;
        }

        let segments = signature_segments(&signature);
        match self.factory.compile(&signature, &segments) {
            Ok(handle) => {
                self.programs
                    .insert(signature.clone(), Program::new(signature, handle));

                true
            }
            Err(e) => {
                warn!(error = %e, "shader assembly failed; volumes with this signature stay hidden");
                if let EngineError::ShaderAssembly { signature, .. } = e {
                    self.failed_signatures.insert(signature);
                }

                false
            }
        }
    }

    fn ensure_cache_texture(&mut self, ctx: &mut dyn GpuContext) {
        if self.cache_texture.is_none() {
            self.cache_texture = Some(ctx.create_texture(TextureDesc {
                size: self.cache.texture_size(),
                format: self.cache.spec().format,
            }));
        }
    }

    /// Gathers all volumes' fill tasks and fits them into the tile budget: coarsen the base
    /// level of the largest contributor that can still coarsen, else truncate the excess from
    /// the largest contributors.
    fn budget_fit_tasks(&mut self, visible: &[VolumeId]) -> Vec<FillTask> {
        let budget = self.cache.max_tiles();

        loop {
            // Fresh dedupe set per attempt; coarsening changes every volume's keys.
            let mut dedupe = SmallKeyHashSet::default();
            let mut per_volume: Vec<(VolumeId, Vec<FillTask>)> = Vec::new();
            for &id in visible {
                if let Some(blocks) = self.blocks.get(&id) {
                    per_volume.push((id, blocks.fill_tasks(&self.cache, &mut dedupe)));
                }
            }

            let mut total: usize = per_volume.iter().map(|(_, t)| t.len()).sum();
            if total <= budget {
                return per_volume.into_iter().flat_map(|(_, t)| t).collect();
            }

            per_volume.sort_by_key(|(_, t)| std::cmp::Reverse(t.len()));

            let coarsen = per_volume.iter().find_map(|(id, _)| {
                let blocks = self.blocks.get(id)?;

                (blocks.base_level() < blocks.max_level()).then(|| *id)
            });
            if let Some(id) = coarsen {
                if let Some(blocks) = self.blocks.get_mut(&id) {
                    let coarser = blocks.base_level() + 1;
                    debug!(?id, level = coarser, "over tile budget; coarsening base level");
                    blocks.set_base_level(coarser);
                }
                self.stats.coarsening_steps += 1;
                continue;
            }

            // Everyone is at the coarsest level; drop the excess, largest contributor first.
            while total > budget {
                per_volume.sort_by_key(|(_, t)| std::cmp::Reverse(t.len()));
                match per_volume.first_mut().and_then(|(_, t)| t.pop()) {
                    Some(_) => {
                        total -= 1;
                        self.stats.truncated_tasks += 1;
                    }
                    None => break,
                }
            }

            return per_volume.into_iter().flat_map(|(_, t)| t).collect();
        }
    }

    /// Uploads per-volume LUTs and auxiliary textures and (re)binds everything into the
    /// current program. Returns whether every expected binding is present.
    fn bind_frame(&mut self, visible: &[VolumeId], ctx: &mut dyn GpuContext) -> bool {
        for &id in visible {
            self.ensure_aux_textures(id, ctx);
        }
        self.min_world_voxel_size = None;

        let mut num_multires = 0;
        let mut num_simple = 0;
        let mut min_voxel = f64::INFINITY;
        let mut stacks_pending = false;

        let program = match self.programs.get_mut(&self.current_signature) {
            Some(p) => p,
            None => return false,
        };

        if self.current_signature.uses_block_cache() {
            match self.cache_texture {
                Some(texture) => program.set_texture(CACHE_TEXTURE, texture),
                None => return false,
            }
        }

        for (i, &id) in visible.iter().enumerate() {
            let volume = match self.volumes.iter().find(|(v, _)| *v == id) {
                Some((_, v)) => v,
                None => continue,
            };

            program.set_uniform(
                format!("display_min_{}", i),
                UniformValue::Float(volume.display_range.min),
            );
            program.set_uniform(
                format!("display_max_{}", i),
                UniformValue::Float(volume.display_range.max),
            );
            if let Some(aux) = self.aux_textures.get(&id) {
                if let Some(t) = aux.transfer_function {
                    program.set_texture(transfer_function_name(i), t);
                }
                if let Some(t) = aux.color_map {
                    program.set_texture(color_map_name(i), t);
                }
            }

            match &volume.source {
                VolumeSource::Multiresolution(_) => {
                    num_multires += 1;
                    let blocks = match self.blocks.get(&id) {
                        Some(b) => b,
                        None => continue,
                    };

                    // Placeholder allocation; `upload_lut` owns (re)sizing the storage to the
                    // image's extents on every upload.
                    let lut_texture = *self.lut_textures.entry(id).or_insert_with(|| {
                        ctx.create_texture(TextureDesc {
                            size: Vector3::new(1, 1, 1),
                            format: PixelType::U16,
                        })
                    });
                    if !blocks.lut().is_empty() {
                        ctx.upload_lut(lut_texture, blocks.lut());
                    }
                    program.set_texture(lut_sampler_name(i), lut_texture);
                    program.set_uniform(
                        format!("lut_offset_{}", i),
                        UniformValue::Vec3(blocks.lut().offset().coords.cast()),
                    );
                    program.set_uniform(
                        format!("voxel_size_{}", i),
                        UniformValue::Float(blocks.base_voxel_world_size()),
                    );
                    min_voxel = min_voxel.min(blocks.base_voxel_world_size());
                }
                VolumeSource::Simple(source) => {
                    num_simple += 1;
                    match self.stacks.simple_volume(source.as_ref(), ctx) {
                        Ok(simple) => {
                            program.set_texture(volume_name(i), simple.texture);
                            program.set_uniform(
                                format!("voxel_size_{}", i),
                                UniformValue::Float(simple.voxel_world_size),
                            );
                            min_voxel = min_voxel.min(simple.voxel_world_size);
                            if !self.stacks.is_uploaded(source.as_ref()) {
                                stacks_pending = true;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "simple stack read failed; keeping stale texture");
                            stacks_pending = true;
                        }
                    }
                }
            }
        }

        // Expected bindings: the shared cache, one LUT per multiresolution volume, one texture
        // per simple volume.
        let cache_ok = !self.current_signature.uses_block_cache()
            || program.texture(CACHE_TEXTURE).is_some();
        let bindings_ok = cache_ok
            && program.textures_with_prefix("lut_sampler_") >= num_multires
            && program.textures_with_prefix("volume_") >= num_simple;

        self.min_world_voxel_size = min_voxel.is_finite().then(|| min_voxel);
        if stacks_pending {
            // A deferred or failed whole-volume upload retries on the next visit.
            self.repaint_requested = true;
        }

        bindings_ok
    }

    fn ensure_aux_textures(&mut self, id: VolumeId, ctx: &mut dyn GpuContext) {
        if self.aux_textures.contains_key(&id) {
            return;
        }
        let volume = match self.volumes.iter().find(|(v, _)| *v == id) {
            Some((_, v)) => v,
            None => return,
        };

        let mut upload = |data: &Option<TextureData>| {
            data.as_ref().map(|data| {
                let texture = ctx.create_texture(data.desc);
                ctx.upload_texture(texture, &data.bytes);

                texture
            })
        };

        let aux = AuxTextures {
            transfer_function: upload(&volume.transfer_function),
            color_map: upload(&volume.color_map),
        };
        self.aux_textures.insert(id, aux);
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_util::{
        head_on_pvm, looking_away_pvm, RecordingContext, RecordingFactory, TestPyramid,
        TestSimpleStack,
    };

    use pretty_assertions::assert_eq;

    fn camera() -> CameraView {
        CameraView {
            view_projection: head_on_pvm(),
            viewport_width: 8,
            viewport_height: 8,
        }
    }

    fn big_cache() -> TileCache {
        TileCache::new(
            Vector3::new(8, 8, 8),
            CacheSpec::new(PixelType::U16, Vector3::new(2, 2, 2)),
        )
    }

    fn multires_volume() -> Volume {
        Volume::multiresolution(Arc::new(TestPyramid::cube_16()))
    }

    #[test]
    fn multires_volume_becomes_ready_and_stable() {
        let mut manager = VolumeManager::new(RecordingFactory::default(), big_cache());
        let mut ctx = RecordingContext::default();
        manager.add(multires_volume());

        assert!(!manager.ready_to_render());
        assert!(manager.update(&camera(), &mut ctx));
        assert!(manager.ready_to_render());
        assert!(manager.frame_stats().all_complete);
        assert!(!manager.repaint_needed());

        // The warmed-up second frame re-requests the same resident keys but reads and
        // uploads nothing.
        let first = manager.frame_stats();
        let uploads = ctx.tile_uploads.len();
        assert!(manager.update(&camera(), &mut ctx));
        assert_eq!(ctx.tile_uploads.len(), uploads);
        assert_eq!(manager.frame_stats().fill_tasks, first.fill_tasks);
    }

    #[test]
    fn fill_work_fits_in_tile_budget_by_coarsening() {
        // Eight tiles cannot hold the 64 level-1 blocks the camera asks for; the volume must
        // coarsen until its tasks fit.
        let cache = TileCache::new(
            Vector3::new(2, 2, 2),
            CacheSpec::new(PixelType::U16, Vector3::new(2, 2, 2)),
        );
        let mut manager = VolumeManager::new(RecordingFactory::default(), cache);
        let mut ctx = RecordingContext::default();
        manager.add(multires_volume());

        manager.update(&camera(), &mut ctx);
        let stats = manager.frame_stats();
        assert!(stats.coarsening_steps > 0);
        assert!(stats.fill_tasks <= 8);
        assert_eq!(stats.truncated_tasks, 0);
    }

    #[test]
    fn excess_tasks_are_truncated_at_the_coarsest_level() {
        // Four tiles, but even the coarsest level needs eight blocks.
        let cache = TileCache::new(
            Vector3::new(4, 1, 1),
            CacheSpec::new(PixelType::U16, Vector3::new(2, 2, 2)),
        );
        let mut manager = VolumeManager::new(RecordingFactory::default(), cache);
        let mut ctx = RecordingContext::default();
        manager.add(multires_volume());

        manager.update(&camera(), &mut ctx);
        let stats = manager.frame_stats();
        assert!(stats.fill_tasks <= 4);
        assert!(stats.truncated_tasks > 0);
        // Unsatisfied blocks keep the repaint loop alive.
        assert!(manager.repaint_needed());
    }

    #[test]
    fn signature_change_recompiles_once() {
        let mut manager = VolumeManager::new(RecordingFactory::default(), big_cache());
        let mut ctx = RecordingContext::default();
        manager.add(multires_volume());
        manager.update(&camera(), &mut ctx);
        assert_eq!(manager.factory.compiled.len(), 1);

        // Adding a simple stack changes the signature and resets readiness.
        let id = manager.add(Volume::simple(Arc::new(TestSimpleStack::new(
            1,
            Vector3::new(4, 4, 4),
        ))));
        assert!(!manager.ready_to_render());

        assert!(manager.update(&camera(), &mut ctx));
        assert_eq!(manager.factory.compiled.len(), 2);

        // Removing it brings back the first signature without a third compile.
        manager.remove(id);
        assert!(manager.update(&camera(), &mut ctx));
        assert_eq!(manager.factory.compiled.len(), 2);
    }

    #[test]
    fn failed_signature_stays_failed_but_others_work() {
        let simple_signature = ShaderSignature::new([VolumeSignature {
            kind: StackKind::Simple,
            pixel: PixelType::U8,
        }]);
        let factory = RecordingFactory {
            rejecting: vec![simple_signature],
            ..Default::default()
        };
        let mut manager = VolumeManager::new(factory, big_cache());
        let mut ctx = RecordingContext::default();

        let id = manager.add(Volume::simple(Arc::new(TestSimpleStack::new(
            1,
            Vector3::new(4, 4, 4),
        ))));
        assert!(!manager.update(&camera(), &mut ctx));
        assert!(!manager.update(&camera(), &mut ctx));
        assert!(manager.factory.compiled.is_empty());

        manager.remove(id);
        manager.add(multires_volume());
        assert!(manager.update(&camera(), &mut ctx));
        assert_eq!(manager.factory.compiled.len(), 1);
    }

    #[test]
    fn simple_volume_is_bound_by_index_after_multires() {
        let mut manager = VolumeManager::new(RecordingFactory::default(), big_cache());
        let mut ctx = RecordingContext::default();
        manager.add(Volume::simple(Arc::new(TestSimpleStack::new(
            1,
            Vector3::new(4, 4, 4),
        ))));
        manager.add(multires_volume());

        assert!(manager.update(&camera(), &mut ctx));
        let program = manager.current_program().unwrap();
        // The multiresolution stack sorts first, so the simple stack binds at index 1.
        assert!(program.texture(&lut_sampler_name(0)).is_some());
        assert!(program.texture(&volume_name(1)).is_some());
        assert!(program.texture(CACHE_TEXTURE).is_some());
    }

    #[test]
    fn recreate_cache_restreams_blocks() {
        let mut manager = VolumeManager::new(RecordingFactory::default(), big_cache());
        let mut ctx = RecordingContext::default();
        manager.add(multires_volume());
        assert!(manager.update(&camera(), &mut ctx));

        manager.recreate_cache(&mut ctx, 1);
        assert!(!manager.ready_to_render());
        assert!(manager.repaint_needed());

        manager.update(&camera(), &mut ctx);
        assert!(manager.frame_stats().fill_tasks > 0);
    }

    #[test]
    fn replaced_source_is_streamed_after_a_timepoint_switch() {
        let mut manager = VolumeManager::new(RecordingFactory::default(), big_cache());
        let mut ctx = RecordingContext::default();
        let id = manager.add(multires_volume());
        assert!(manager.update(&camera(), &mut ctx));

        let next_timepoint: Arc<dyn MultiresSource> = Arc::new(TestPyramid::cube_16());
        if let Some(v) = manager.volume_mut(id) {
            v.source = VolumeSource::Multiresolution(next_timepoint.clone());
        }
        assert!(manager.update(&camera(), &mut ctx));

        // Block state now reads from the replacement, not the source captured at `add`.
        let blocks = manager.blocks.get(&id).unwrap();
        assert!(Arc::ptr_eq(blocks.source(), &next_timepoint));
        assert!(!blocks.required_blocks().blocks.is_empty());
    }

    #[test]
    fn frozen_required_blocks_ignore_camera_motion() {
        let mut manager = VolumeManager::new(RecordingFactory::default(), big_cache());
        let mut ctx = RecordingContext::default();
        manager.add(multires_volume());
        assert!(manager.update(&camera(), &mut ctx));
        let warm = manager.frame_stats();
        let uploads = ctx.tile_uploads.len();

        manager.set_freeze_required_blocks(true);
        let away = CameraView {
            view_projection: looking_away_pvm(),
            ..camera()
        };
        assert!(manager.update(&away, &mut ctx));
        assert_eq!(manager.frame_stats().required_blocks, warm.required_blocks);
        assert_eq!(manager.frame_stats().fill_tasks, 0);
        assert_eq!(ctx.tile_uploads.len(), uploads);

        // Unfreezing recomputes from the real camera; nothing is visible over there.
        manager.set_freeze_required_blocks(false);
        assert!(manager.repaint_needed());
        manager.update(&away, &mut ctx);
        assert_eq!(manager.frame_stats().required_blocks, 0);
    }

    #[test]
    fn min_world_voxel_size_spans_all_bound_volumes() {
        let mut manager = VolumeManager::new(RecordingFactory::default(), big_cache());
        let mut ctx = RecordingContext::default();
        manager.add(multires_volume());

        assert!(manager.update(&camera(), &mut ctx));
        // The pyramid renders from level 1, whose voxels are 2 world units across.
        assert_eq!(manager.min_world_voxel_size(), Some(2.0));

        manager.add(Volume::simple(Arc::new(TestSimpleStack::new(
            1,
            Vector3::new(4, 4, 4),
        ))));
        assert!(manager.update(&camera(), &mut ctx));
        assert_eq!(manager.min_world_voxel_size(), Some(1.0));
    }

    #[test]
    fn deferred_stack_upload_keeps_repaint_alive() {
        let mut manager = VolumeManager::new(RecordingFactory::default(), big_cache());
        let mut ctx = RecordingContext::default();
        ctx.ready = false;
        manager.add(Volume::simple(Arc::new(TestSimpleStack::new(
            1,
            Vector3::new(4, 4, 4),
        ))));

        assert!(manager.update(&camera(), &mut ctx));
        assert!(ctx.texture_uploads.is_empty());
        assert!(manager.repaint_needed());

        ctx.ready = true;
        assert!(manager.update(&camera(), &mut ctx));
        assert_eq!(ctx.texture_uploads.len(), 1);
        assert!(!manager.repaint_needed());
    }

    #[test]
    fn invisible_volume_contributes_nothing() {
        let mut manager = VolumeManager::new(RecordingFactory::default(), big_cache());
        let mut ctx = RecordingContext::default();
        let id = manager.add(multires_volume());
        if let Some(v) = manager.volume_mut(id) {
            v.visible = false;
        }

        assert!(manager.update(&camera(), &mut ctx));
        let stats = manager.frame_stats();
        assert_eq!(stats.visible_volumes, 0);
        assert_eq!(stats.fill_tasks, 0);
        assert!(ctx.tile_uploads.is_empty());
    }
}
