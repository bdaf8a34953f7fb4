use crate::cache::{TileCache, TileState};
use crate::fill::FillTask;
use crate::frustum::Frustum;
use crate::level_select::LevelSelector;
use crate::SmallKeyHashSet;

use mipstream_core::{Aabb3, BlockKey, GridExtent, MultiresSource, ResolutionLevel};

use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Point3, Vector3};
use std::sync::Arc;

/// A visible block at the base level, with the level it should ideally be rendered at.
/// `best_level` is never finer than the frame's base level.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RequiredBlock {
    pub grid: Point3<i32>,
    pub best_level: u8,
}

/// The per-frame set of visible blocks of one volume, on the base level's block grid. Carries
/// no identity across frames; it is recomputed from scratch every frame.
#[derive(Clone, Debug, PartialEq)]
pub struct RequiredBlockSet {
    pub grid_min: Point3<i32>,
    pub grid_max: Point3<i32>,
    pub blocks: Vec<RequiredBlock>,
}

impl Default for RequiredBlockSet {
    fn default() -> Self {
        Self {
            grid_min: Point3::origin(),
            grid_max: Point3::origin(),
            blocks: Vec::new(),
        }
    }
}

/// One texel of a volume's lookup texture: the physical cache tile holding a base-level grid
/// cell's data, and the pyramid level that data comes from.
///
/// `lod` is the satisfied level plus one; zero means no resident data (the shader skips the
/// cell). Keeping the zero sentinel out of the valid range lets a cleared image mean "nothing
/// resident".
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Pod, Zeroable)]
pub struct LutEntry {
    pub tile: [u16; 3],
    pub lod: u16,
}

pub const LUT_EMPTY: LutEntry = LutEntry {
    tile: [0; 3],
    lod: 0,
};

/// A volume's lookup image, one [`LutEntry`] per base-level grid cell, addressed relative to
/// `offset` (the required set's `grid_min`).
#[derive(Clone, Debug, PartialEq)]
pub struct LutImage {
    offset: Point3<i32>,
    size: Vector3<i32>,
    entries: Vec<LutEntry>,
}

impl Default for LutImage {
    fn default() -> Self {
        Self {
            offset: Point3::origin(),
            size: Vector3::zeros(),
            entries: Vec::new(),
        }
    }
}

impl LutImage {
    pub fn new(offset: Point3<i32>, size: Vector3<i32>) -> Self {
        let n = (size.x.max(0) as usize) * (size.y.max(0) as usize) * (size.z.max(0) as usize);

        Self {
            offset,
            size,
            entries: vec![LUT_EMPTY; n],
        }
    }

    #[inline]
    pub fn offset(&self) -> Point3<i32> {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> Vector3<i32> {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entry(&self, grid: Point3<i32>) -> LutEntry {
        self.entries[self.index(grid)]
    }

    #[inline]
    pub fn set_entry(&mut self, grid: Point3<i32>, entry: LutEntry) {
        let i = self.index(grid);
        self.entries[i] = entry;
    }

    /// The raw texel bytes, ready for upload.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.entries)
    }

    #[inline]
    fn index(&self, grid: Point3<i32>) -> usize {
        let p = grid - self.offset.coords;
        debug_assert!(p.x >= 0 && p.y >= 0 && p.z >= 0);

        p.x as usize + self.size.x as usize * (p.y as usize + self.size.y as usize * p.z as usize)
    }
}

/// Per-volume block bookkeeping: finds the visible blocks each frame, refines their levels,
/// builds deduplicated fill tasks and the lookup image consumed by the shader.
///
/// The heavy per-frame inputs (frustum, level selector, base level) are recomputed by
/// [`VolumeBlocks::init`]; everything downstream reads them.
pub struct VolumeBlocks {
    source: Arc<dyn MultiresSource>,
    block_shape: Vector3<i32>,
    frustum: Option<Frustum>,
    selector: Option<LevelSelector>,
    base_level: usize,
    required: RequiredBlockSet,
    lut: LutImage,
}

impl VolumeBlocks {
    pub fn new(source: Arc<dyn MultiresSource>, block_shape: Vector3<i32>) -> Self {
        Self {
            source,
            block_shape,
            frustum: None,
            selector: None,
            base_level: 0,
            required: RequiredBlockSet::default(),
            lut: LutImage::default(),
        }
    }

    #[inline]
    pub fn source(&self) -> &Arc<dyn MultiresSource> {
        &self.source
    }

    #[inline]
    pub fn base_level(&self) -> usize {
        self.base_level
    }

    /// The coarsest level of the pyramid.
    #[inline]
    pub fn max_level(&self) -> usize {
        self.source.resolutions().len() - 1
    }

    #[inline]
    pub fn required_blocks(&self) -> &RequiredBlockSet {
        &self.required
    }

    #[inline]
    pub fn lut(&self) -> &LutImage {
        &self.lut
    }

    /// Whether any part of the volume was inside the frustum at the last `init`.
    #[inline]
    pub fn is_visible(&self) -> bool {
        !self.required.blocks.is_empty()
    }

    /// Recomputes the per-frame state from the camera. `pvm` must map this volume's
    /// full-resolution voxel coordinates to clip coordinates. A volume outside the frustum
    /// (or a singular matrix) yields an empty required set, not an error.
    pub fn init(&mut self, pvm: &Matrix4<f64>, viewport_width: u32) {
        self.frustum = Frustum::from_matrix(pvm);
        self.selector = match &self.frustum {
            Some(f) => LevelSelector::new(f, viewport_width, self.source.resolutions()),
            None => None,
        };

        let base = match (&self.frustum, &self.selector) {
            (Some(f), Some(sel)) => sel.base_level(f, &self.source_space_bounds()),
            _ => None,
        };

        match base {
            Some(level) => {
                self.base_level = level;
                self.rebuild_required();
            }
            None => {
                self.required = RequiredBlockSet::default();
            }
        }
    }

    /// Moves the base level (e.g. coarsening under cache pressure) and recomputes the
    /// required set. Clamped to the pyramid's levels.
    pub fn set_base_level(&mut self, level: usize) {
        let level = level.min(self.max_level());
        if level == self.base_level {
            return;
        }
        self.base_level = level;
        if self.frustum.is_some() && self.selector.is_some() {
            self.rebuild_required();
        }
    }

    /// Re-evaluates each required block's ideal level at its source-space center, clamped to
    /// be no finer than `min_level`.
    pub fn assign_best_levels(&mut self, min_level: usize) {
        let sel = match &self.selector {
            Some(sel) => sel,
            None => return,
        };
        let level = self.source.resolutions()[self.base_level];
        let bs = self.block_shape;
        let max_level = self.source.resolutions().len() - 1;

        for block in &mut self.required.blocks {
            let best = sel.best_level(block_center(level, bs, block.grid));
            block.best_level = best.max(min_level).min(max_level) as u8;
        }
    }

    /// Builds this frame's fill tasks. For every required block, walks from its assigned level
    /// up to the coarsest level and emits one task for the first key that is already
    /// cache-resident, fully suppliable by the source, or the guaranteed coarsest fallback.
    /// `dedupe` is shared across all volumes in the frame; a key already requested is reused,
    /// never tasked twice.
    pub fn fill_tasks(
        &self,
        cache: &TileCache,
        dedupe: &mut SmallKeyHashSet<BlockKey>,
    ) -> Vec<FillTask> {
        let max_level = self.max_level();
        let mut tasks = Vec::new();

        for block in &self.required.blocks {
            for level in block.best_level as usize..=max_level {
                let key = self.key_at_level(block.grid, level);

                if dedupe.contains(&key) {
                    break;
                }

                let accept = cache.contains(&key)
                    || self.source.can_supply(key, self.block_shape)
                    || level == max_level;
                if accept {
                    dedupe.insert(key);
                    tasks.push(FillTask::new(key, self.source.clone(), self.block_shape));
                    break;
                }
            }
        }

        tasks
    }

    /// Rebuilds the lookup image against the current cache contents, stamping every used tile
    /// with `timestamp`. Returns `true` iff every required block was satisfied exactly at its
    /// assigned level by a complete tile; `false` asks the caller to schedule another repaint.
    ///
    /// A block whose entire level chain has no resident tile (the cache raced an eviction)
    /// gets the sentinel entry and renders empty.
    pub fn make_lut(&mut self, cache: &mut TileCache, timestamp: u64) -> bool {
        if self.required.blocks.is_empty() {
            self.lut = LutImage::default();

            return true;
        }

        let span = self.required.grid_max - self.required.grid_min + Vector3::new(1, 1, 1);
        let mut lut = LutImage::new(self.required.grid_min, span);
        let max_level = self.max_level();
        let mut complete = true;

        for block in &self.required.blocks {
            let mut satisfied = None;
            for level in block.best_level as usize..=max_level {
                let key = self.key_at_level(block.grid, level);
                if let Some(tile) = cache.get(&key) {
                    if tile.state() != TileState::Empty {
                        satisfied = Some((key, level, tile.location(), tile.state()));
                        break;
                    }
                }
            }

            match satisfied {
                Some((key, level, location, state)) => {
                    lut.set_entry(
                        block.grid,
                        LutEntry {
                            tile: [
                                location.0.x as u16,
                                location.0.y as u16,
                                location.0.z as u16,
                            ],
                            lod: level as u16 + 1,
                        },
                    );
                    cache.mark_used(&key, timestamp);

                    if level != block.best_level as usize || state != TileState::Complete {
                        complete = false;
                    }
                }
                None => {
                    lut.set_entry(block.grid, LUT_EMPTY);
                    complete = false;
                }
            }
        }

        self.lut = lut;

        complete
    }

    /// The world-space size of one voxel at the base level, along its smallest axis. Used by
    /// the renderer to bound the ray-march step.
    pub fn base_voxel_world_size(&self) -> f64 {
        let t = self.source.transform();
        let f = self.source.resolutions()[self.base_level].factors;

        let axis = |col: usize, factor: i32| {
            Vector3::new(t[(0, col)], t[(1, col)], t[(2, col)]).norm() * factor as f64
        };

        axis(0, f.x).min(axis(1, f.y)).min(axis(2, f.z))
    }

    /// The key of the block covering this base-level grid cell at `level`.
    fn key_at_level(&self, grid: Point3<i32>, level: usize) -> BlockKey {
        let resolutions = self.source.resolutions();
        let center_full = block_center(resolutions[self.base_level], self.block_shape, grid);
        let in_level = resolutions[level].to_level(center_full);

        BlockKey::new(
            level as u8,
            Point3::new(
                div_floor(in_level.x.floor() as i32, self.block_shape.x),
                div_floor(in_level.y.floor() as i32, self.block_shape.y),
                div_floor(in_level.z.floor() as i32, self.block_shape.z),
            ),
        )
    }

    /// Full-resolution source-space bounding box of the volume.
    fn source_space_bounds(&self) -> Aabb3 {
        let level = self.source.resolutions()[0];
        let b = Aabb3::covering_extent(&self.source.level_bounds(0));

        Aabb3::from_min_and_max(level.to_full(b.minimum), level.to_full(b.maximum))
    }

    /// Enumerates the base-level grid cells intersecting the frustum and assigns their best
    /// levels (floored at the base level).
    fn rebuild_required(&mut self) {
        let frustum = match &self.frustum {
            Some(f) => f,
            None => return,
        };
        let level = self.source.resolutions()[self.base_level];
        let bounds = self.source.level_bounds(self.base_level);
        let bs = self.block_shape;

        // Frustum corners in this level's voxel coordinates.
        let mut corners = frustum.corners();
        for c in &mut corners {
            *c = level.to_level(*c);
        }
        let view_box = match Aabb3::bounding(corners.iter().copied()) {
            Some(b) => b,
            None => return,
        };

        let clipped = intersect_aabb(&view_box, &Aabb3::covering_extent(&bounds));
        if clipped.minimum.x >= clipped.maximum.x
            || clipped.minimum.y >= clipped.maximum.y
            || clipped.minimum.z >= clipped.maximum.z
        {
            self.required = RequiredBlockSet::default();

            return;
        }

        let grid_min = Point3::new(
            div_floor(clipped.minimum.x.floor() as i32, bs.x),
            div_floor(clipped.minimum.y.floor() as i32, bs.y),
            div_floor(clipped.minimum.z.floor() as i32, bs.z),
        );
        let grid_max = Point3::new(
            div_floor(clipped.maximum.x.ceil() as i32 - 1, bs.x),
            div_floor(clipped.maximum.y.ceil() as i32 - 1, bs.y),
            div_floor(clipped.maximum.z.ceil() as i32 - 1, bs.z),
        );

        let mut blocks = Vec::new();
        for grid in GridExtent::from_min_and_max(grid_min, grid_max).iter_points() {
            // Exact per-block test; the grid interval alone is just the AABB of the frustum.
            let block_box = block_source_box(level, bs, grid);
            if frustum.intersects_aabb(&block_box) {
                blocks.push(RequiredBlock {
                    grid,
                    best_level: self.base_level as u8,
                });
            }
        }

        self.required = RequiredBlockSet {
            grid_min,
            grid_max,
            blocks,
        };
        self.assign_best_levels(self.base_level);
    }
}

/// The source-space (full-resolution) box of a block on `level`'s grid.
fn block_source_box(level: ResolutionLevel, block_shape: Vector3<i32>, grid: Point3<i32>) -> Aabb3 {
    let min = Point3::new(
        (grid.x * block_shape.x) as f64,
        (grid.y * block_shape.y) as f64,
        (grid.z * block_shape.z) as f64,
    );
    let max = min + block_shape.cast::<f64>();

    Aabb3::from_min_and_max(level.to_full(min), level.to_full(max))
}

/// The source-space center of a block on `level`'s grid.
fn block_center(level: ResolutionLevel, block_shape: Vector3<i32>, grid: Point3<i32>) -> Point3<f64> {
    let b = block_source_box(level, block_shape, grid);

    b.center()
}

fn intersect_aabb(a: &Aabb3, b: &Aabb3) -> Aabb3 {
    Aabb3::from_min_and_max(
        Point3::new(
            a.minimum.x.max(b.minimum.x),
            a.minimum.y.max(b.minimum.y),
            a.minimum.z.max(b.minimum.z),
        ),
        Point3::new(
            a.maximum.x.min(b.maximum.x),
            a.maximum.y.min(b.maximum.y),
            a.maximum.z.min(b.maximum.z),
        ),
    )
}

#[inline]
fn div_floor(a: i32, b: i32) -> i32 {
    let d = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        d - 1
    } else {
        d
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

    use crate::cache::CacheSpec;
    use crate::test_util::{head_on_pvm, looking_away_pvm, TestPyramid};

    use mipstream_core::PixelType;
    use pretty_assertions::assert_eq;

    fn blocks_for_cube_16() -> VolumeBlocks {
        VolumeBlocks::new(Arc::new(TestPyramid::cube_16()), Vector3::new(2, 2, 2))
    }

    fn warm_cache() -> TileCache {
        TileCache::new(
            Vector3::new(8, 8, 8),
            CacheSpec::new(PixelType::U16, Vector3::new(2, 2, 2)),
        )
    }

    #[test]
    fn head_on_view_requires_level_one_blocks() {
        // One screen pixel per level-1 voxel: base level must be 1, and level 1 of the 16^3
        // volume is an 8^3 voxel box, i.e. at most 4^3 = 64 blocks of 2^3.
        let mut vb = blocks_for_cube_16();
        vb.init(&head_on_pvm(), 8);

        assert_eq!(vb.base_level(), 1);
        let required = vb.required_blocks();
        assert!(!required.blocks.is_empty());
        assert!(required.blocks.len() <= 64);
        assert!(required.blocks.iter().all(|b| b.best_level >= 1));

        // No fill task may target level 0.
        let mut dedupe = SmallKeyHashSet::default();
        let cache = warm_cache();
        let tasks = vb.fill_tasks(&cache, &mut dedupe);
        assert!(tasks.iter().all(|t| t.key().level >= 1));
    }

    #[test]
    fn volume_outside_frustum_requires_nothing() {
        let mut vb = blocks_for_cube_16();
        vb.init(&looking_away_pvm(), 8);

        assert!(!vb.is_visible());
        assert_eq!(vb.required_blocks().blocks.len(), 0);

        let mut dedupe = SmallKeyHashSet::default();
        let mut cache = warm_cache();
        assert!(vb.fill_tasks(&cache, &mut dedupe).is_empty());
        assert!(vb.make_lut(&mut cache, 1));
    }

    #[test]
    fn required_set_is_idempotent() {
        let mut vb = blocks_for_cube_16();
        vb.init(&head_on_pvm(), 8);
        let first = vb.required_blocks().clone();

        vb.init(&head_on_pvm(), 8);
        assert_eq!(*vb.required_blocks(), first);
    }

    #[test]
    fn fill_tasks_have_unique_keys_across_volumes() {
        let mut a = blocks_for_cube_16();
        let mut b = blocks_for_cube_16();
        a.init(&head_on_pvm(), 8);
        b.init(&head_on_pvm(), 8);

        let cache = warm_cache();
        let mut dedupe = SmallKeyHashSet::default();
        let mut tasks = a.fill_tasks(&cache, &mut dedupe);
        tasks.extend(b.fill_tasks(&cache, &mut dedupe));

        let mut keys: Vec<_> = tasks.iter().map(|t| t.key()).collect();
        let before = keys.len();
        keys.sort_by_key(|k| (k.level, k.grid.z, k.grid.y, k.grid.x));
        keys.dedup();
        assert_eq!(keys.len(), before);

        // The second volume produced no new tasks at all: same source, same keys.
        assert_eq!(before, a.required_blocks().blocks.len());
    }

    #[test]
    fn coarsening_reduces_task_count_monotonically() {
        let mut vb = blocks_for_cube_16();
        vb.init(&head_on_pvm(), 8);

        let cache = warm_cache();
        let mut last = usize::MAX;
        for level in vb.base_level()..=vb.max_level() {
            vb.set_base_level(level);
            let mut dedupe = SmallKeyHashSet::default();
            let n = vb.fill_tasks(&cache, &mut dedupe).len();
            assert!(n <= last, "tasks grew from {} to {} at level {}", last, n, level);
            last = n;
        }
    }

    #[test]
    fn lut_reports_incomplete_until_tiles_land() {
        let mut vb = blocks_for_cube_16();
        vb.init(&head_on_pvm(), 8);
        let mut cache = warm_cache();

        // Nothing resident yet.
        let t = cache.next_timestamp();
        assert!(!vb.make_lut(&mut cache, t));
        assert!(vb.lut().as_bytes().iter().all(|&b| b == 0));

        // Make every requested key resident and complete.
        let mut dedupe = SmallKeyHashSet::default();
        let tasks = vb.fill_tasks(&cache, &mut dedupe);
        for task in &tasks {
            cache.assign(task.key());
            cache.set_state(&task.key(), TileState::Complete);
        }

        let t = cache.next_timestamp();
        assert!(vb.make_lut(&mut cache, t));
        let first = vb.lut().clone();

        // Unchanged camera and cache: identical LUT.
        let t = cache.next_timestamp();
        assert!(vb.make_lut(&mut cache, t));
        assert_eq!(*vb.lut(), first);
    }

    #[test]
    fn used_tiles_are_stamped() {
        let mut vb = blocks_for_cube_16();
        vb.init(&head_on_pvm(), 8);
        let mut cache = warm_cache();

        let mut dedupe = SmallKeyHashSet::default();
        let tasks = vb.fill_tasks(&cache, &mut dedupe);
        for task in &tasks {
            cache.assign(task.key());
            cache.set_state(&task.key(), TileState::Complete);
        }

        let t = cache.next_timestamp();
        vb.make_lut(&mut cache, t);
        for task in &tasks {
            assert_eq!(cache.get(&task.key()).unwrap().last_used(), t);
        }
    }

    #[test]
    fn div_floor_rounds_toward_negative_infinity() {
        assert_eq!(div_floor(5, 2), 2);
        assert_eq!(div_floor(-5, 2), -3);
        assert_eq!(div_floor(-4, 2), -2);
    }
}
