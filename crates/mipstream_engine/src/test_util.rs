//! In-memory sources, a recording GPU context, and camera matrices shared by the unit tests.

use crate::blocks::LutImage;
use crate::cache::TileLocation;
use crate::context::{GpuContext, TextureDesc, TextureId};
use crate::error::EngineError;
use crate::shader::{ProgramFactory, ProgramHandle, ShaderSegment, ShaderSignature};
use crate::SmallKeyHashSet;

use mipstream_core::{
    BlockData, BlockKey, GridExtent, MultiresSource, PixelType, ReadError, ResolutionLevel,
    SimpleSource,
};

use nalgebra::{Matrix4, Point3, Vector3};
use std::sync::atomic::{AtomicU64, Ordering};

/// A matrix mapping the box `[min, max]` onto the NDC cube, axis-aligned.
pub fn ortho_source_to_ndc(min: Point3<f64>, max: Point3<f64>) -> Matrix4<f64> {
    let s = max - min;

    Matrix4::new(
        2.0 / s.x, 0.0, 0.0, -(max.x + min.x) / s.x,
        0.0, 2.0 / s.y, 0.0, -(max.y + min.y) / s.y,
        0.0, 0.0, 2.0 / s.z, -(max.z + min.z) / s.z,
        0.0, 0.0, 0.0, 1.0,
    )
}

/// A 90 degree perspective projection, camera at the origin looking down -Z, near 0.5, far 200.
pub fn perspective_pvm() -> Matrix4<f64> {
    let (near, far) = (0.5, 200.0);

    Matrix4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, (far + near) / (near - far), 2.0 * far * near / (near - far),
        0.0, 0.0, -1.0, 0.0,
    )
}

/// A camera looking straight at the `[0, 16]^3` test volume, one NDC unit per 8 voxels.
pub fn head_on_pvm() -> Matrix4<f64> {
    ortho_source_to_ndc(Point3::new(0.0, 0.0, 0.0), Point3::new(16.0, 16.0, 16.0))
}

/// A camera whose frustum misses the `[0, 16]^3` test volume entirely.
pub fn looking_away_pvm() -> Matrix4<f64> {
    ortho_source_to_ndc(
        Point3::new(100.0, 100.0, 100.0),
        Point3::new(116.0, 116.0, 116.0),
    )
}

pub fn head_on_pyramid_levels() -> Vec<ResolutionLevel> {
    vec![
        ResolutionLevel::new(1, 1, 1),
        ResolutionLevel::new(2, 2, 2),
        ResolutionLevel::new(4, 4, 4),
    ]
}

/// An in-memory resolution pyramid over a synthetic volume. Every block is instantly
/// suppliable unless listed in `failing`.
pub struct TestPyramid {
    dimensions: Vector3<i32>,
    levels: Vec<ResolutionLevel>,
    transform: Matrix4<f64>,
    failing: SmallKeyHashSet<BlockKey>,
}

impl TestPyramid {
    /// A 16^3 volume with levels 1, 2 and 4.
    pub fn cube_16() -> Self {
        Self {
            dimensions: Vector3::new(16, 16, 16),
            levels: head_on_pyramid_levels(),
            transform: Matrix4::identity(),
            failing: SmallKeyHashSet::default(),
        }
    }

    /// Makes reads of `key` fail.
    pub fn failing_at(mut self, key: BlockKey) -> Self {
        self.failing.insert(key);

        self
    }

    pub fn pixel_type_for_test(&self) -> PixelType {
        self.pixel_type()
    }
}

impl MultiresSource for TestPyramid {
    fn resolutions(&self) -> &[ResolutionLevel] {
        &self.levels
    }

    fn level_bounds(&self, level: usize) -> GridExtent {
        let f = self.levels[level].factors;

        GridExtent::from_min_and_max(
            Point3::origin(),
            Point3::new(
                self.dimensions.x / f.x - 1,
                self.dimensions.y / f.y - 1,
                self.dimensions.z / f.z - 1,
            ),
        )
    }

    fn transform(&self) -> Matrix4<f64> {
        self.transform
    }

    fn pixel_type(&self) -> PixelType {
        PixelType::U16
    }

    fn can_supply(&self, key: BlockKey, block_shape: Vector3<i32>) -> bool {
        if key.level as usize >= self.levels.len() {
            return false;
        }
        let block = GridExtent::from_min_and_shape(
            Point3::new(
                key.grid.x * block_shape.x,
                key.grid.y * block_shape.y,
                key.grid.z * block_shape.z,
            ),
            block_shape,
        );

        !block
            .intersection(&self.level_bounds(key.level as usize))
            .is_empty()
    }

    fn read_block(
        &self,
        key: BlockKey,
        block_shape: Vector3<i32>,
    ) -> Result<BlockData, ReadError> {
        if self.failing.contains(&key) {
            return Err(ReadError::new("synthetic failure"));
        }

        let voxels =
            block_shape.x as usize * block_shape.y as usize * block_shape.z as usize;
        let fill = key.level.wrapping_add(key.grid.x as u8);

        Ok(BlockData {
            bytes: vec![fill; voxels * self.pixel_type().bytes_per_voxel()],
            complete: true,
        })
    }
}

/// A whole in-memory volume with a bumpable content version.
pub struct TestSimpleStack {
    id: u64,
    dimensions: Vector3<i32>,
    version: AtomicU64,
    fail_reads: bool,
}

impl TestSimpleStack {
    pub fn new(id: u64, dimensions: Vector3<i32>) -> Self {
        Self {
            id,
            dimensions,
            version: AtomicU64::new(1),
            fail_reads: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_reads = true;

        self
    }

    pub fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }
}

impl SimpleSource for TestSimpleStack {
    fn id(&self) -> u64 {
        self.id
    }

    fn dimensions(&self) -> Vector3<i32> {
        self.dimensions
    }

    fn transform(&self) -> Matrix4<f64> {
        Matrix4::identity()
    }

    fn pixel_type(&self) -> PixelType {
        PixelType::U8
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<Vec<u8>, ReadError> {
        if self.fail_reads {
            return Err(ReadError::new("synthetic failure"));
        }
        let d = self.dimensions;

        Ok(vec![0; d.x as usize * d.y as usize * d.z as usize])
    }
}

/// A [`GpuContext`] that records every call for assertions.
pub struct RecordingContext {
    pub ready: bool,
    pub created: Vec<TextureDesc>,
    pub destroyed: Vec<TextureId>,
    pub texture_uploads: Vec<(TextureId, usize)>,
    pub tile_uploads: Vec<(TileLocation, usize)>,
    pub lut_uploads: Vec<(TextureId, usize)>,
    next_id: u64,
}

impl Default for RecordingContext {
    fn default() -> Self {
        Self {
            ready: true,
            created: Vec::new(),
            destroyed: Vec::new(),
            texture_uploads: Vec::new(),
            tile_uploads: Vec::new(),
            lut_uploads: Vec::new(),
            next_id: 1,
        }
    }
}

impl GpuContext for RecordingContext {
    fn ready_for_upload(&self) -> bool {
        self.ready
    }

    fn create_texture(&mut self, desc: TextureDesc) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.created.push(desc);

        id
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.destroyed.push(texture);
    }

    fn upload_texture(&mut self, texture: TextureId, bytes: &[u8]) {
        self.texture_uploads.push((texture, bytes.len()));
    }

    fn upload_tile(&mut self, location: TileLocation, bytes: &[u8]) {
        self.tile_uploads.push((location, bytes.len()));
    }

    fn upload_lut(&mut self, texture: TextureId, lut: &LutImage) {
        self.lut_uploads.push((texture, lut.as_bytes().len()));
    }
}

/// A [`ProgramFactory`] that hands out sequential handles and remembers what it compiled.
/// Signatures listed in `rejecting` fail with a [`EngineError::ShaderAssembly`].
#[derive(Default)]
pub struct RecordingFactory {
    pub compiled: Vec<ShaderSignature>,
    pub rejecting: Vec<ShaderSignature>,
}

impl ProgramFactory for RecordingFactory {
    fn compile(
        &mut self,
        signature: &ShaderSignature,
        _segments: &[ShaderSegment],
    ) -> Result<ProgramHandle, EngineError> {
        if self.rejecting.contains(signature) {
            return Err(EngineError::ShaderAssembly {
                signature: signature.clone(),
                reason: "rejected by test factory".into(),
            });
        }
        self.compiled.push(signature.clone());

        Ok(ProgramHandle(self.compiled.len() as u64))
    }
}
