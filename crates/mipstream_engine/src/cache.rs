use crate::SmallKeyHashMap;

use mipstream_core::{BlockKey, PixelType};

use nalgebra::{Point3, Vector3};

/// Geometry of the shared block cache: the uniform shape of every tile and the voxel format
/// tiles are stored in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheSpec {
    pub format: PixelType,
    pub block_shape: Vector3<i32>,
}

impl CacheSpec {
    #[inline]
    pub fn new(format: PixelType, block_shape: Vector3<i32>) -> Self {
        assert!(block_shape.x > 0 && block_shape.y > 0 && block_shape.z > 0);

        Self {
            format,
            block_shape,
        }
    }

    /// The storage size of one tile in bytes.
    #[inline]
    pub fn tile_bytes(&self) -> usize {
        let s = self.block_shape;

        s.x as usize * s.y as usize * s.z as usize * self.format.bytes_per_voxel()
    }
}

impl Default for CacheSpec {
    fn default() -> Self {
        Self::new(PixelType::U16, Vector3::new(32, 32, 32))
    }
}

/// Content state of one physical tile.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TileState {
    /// No usable data; the tile must not be sampled.
    Empty,
    /// Partially filled; usable, but the owning block should be re-requested.
    Incomplete,
    /// Fully filled.
    Complete,
}

/// Position of a physical tile on the cache texture's tile grid.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TileLocation(pub Point3<i32>);

/// One physical block-sized slot of the cache texture.
#[derive(Clone, Debug)]
pub struct Tile {
    location: TileLocation,
    key: Option<BlockKey>,
    state: TileState,
    last_used: u64,
}

impl Tile {
    #[inline]
    pub fn location(&self) -> TileLocation {
        self.location
    }

    #[inline]
    pub fn key(&self) -> Option<BlockKey> {
        self.key
    }

    #[inline]
    pub fn state(&self) -> TileState {
        self.state
    }

    #[inline]
    pub fn last_used(&self) -> u64 {
        self.last_used
    }
}

/// Fixed-capacity pool of block-sized tiles, keyed by [`BlockKey`] and recycled
/// least-recently-used first.
///
/// This is pure bookkeeping over an externally owned cache texture: assigning a key to a tile
/// says nothing about the pixels until the fill pipeline uploads them and flips the tile's
/// [`TileState`]. There is exactly one instance per [`crate::VolumeManager`], shared by all
/// volumes; a key requested by several volumes resolves to the same physical tile.
///
/// All mutation happens on the single update thread.
#[derive(Clone, Debug)]
pub struct TileCache {
    spec: CacheSpec,
    grid_size: Vector3<i32>,
    tiles: Vec<Tile>,
    by_key: SmallKeyHashMap<BlockKey, usize>,
    timestamp: u64,
}

impl TileCache {
    pub fn new(grid_size: Vector3<i32>, spec: CacheSpec) -> Self {
        assert!(grid_size.x > 0 && grid_size.y > 0 && grid_size.z > 0);

        let num_tiles = grid_size.x as usize * grid_size.y as usize * grid_size.z as usize;
        let tiles = (0..num_tiles)
            .map(|i| Tile {
                location: Self::index_to_location(grid_size, i),
                key: None,
                state: TileState::Empty,
                last_used: 0,
            })
            .collect();

        // Tiles start at stamp 0, so the clock starts ahead of them; stolen tiles are always
        // stamped strictly later than never-used ones.
        Self {
            spec,
            grid_size,
            tiles,
            by_key: SmallKeyHashMap::default(),
            timestamp: 1,
        }
    }

    /// A cache sized to fit within `max_size_mb` megabytes, with a near-cubic tile grid.
    pub fn with_size_budget(spec: CacheSpec, max_size_mb: usize) -> Self {
        Self::new(Self::suitable_grid_size(&spec, max_size_mb), spec)
    }

    /// The largest near-cubic tile grid whose total storage fits in `max_size_mb` megabytes.
    /// Always at least one tile per axis.
    pub fn suitable_grid_size(spec: &CacheSpec, max_size_mb: usize) -> Vector3<i32> {
        let budget = max_size_mb * (1 << 20);
        let num_tiles = (budget / spec.tile_bytes()).max(1);

        let x = (num_tiles as f64).cbrt().floor() as usize;
        let y = ((num_tiles / x) as f64).sqrt().floor() as usize;
        let z = num_tiles / (x * y);

        Vector3::new(x as i32, y as i32, z as i32)
    }

    #[inline]
    pub fn spec(&self) -> &CacheSpec {
        &self.spec
    }

    #[inline]
    pub fn grid_size(&self) -> Vector3<i32> {
        self.grid_size
    }

    /// The size of the backing cache texture in voxels.
    #[inline]
    pub fn texture_size(&self) -> Vector3<i32> {
        self.grid_size.component_mul(&self.spec.block_shape)
    }

    /// Total number of physical tiles; the per-frame fill-task budget.
    #[inline]
    pub fn max_tiles(&self) -> usize {
        self.tiles.len()
    }

    #[inline]
    pub fn get(&self, key: &BlockKey) -> Option<&Tile> {
        let tiles = &self.tiles;

        self.by_key.get(key).map(move |&i| &tiles[i])
    }

    #[inline]
    pub fn contains(&self, key: &BlockKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// The next value of the monotone use counter. Tiles stamped with larger timestamps are
    /// evicted later.
    #[inline]
    pub fn next_timestamp(&mut self) -> u64 {
        self.timestamp += 1;

        self.timestamp
    }

    /// Stamps the tile holding `key` as used at `timestamp`. Returns `false` if the key is not
    /// resident.
    #[inline]
    pub fn mark_used(&mut self, key: &BlockKey, timestamp: u64) -> bool {
        if let Some(&i) = self.by_key.get(key) {
            self.tiles[i].last_used = self.tiles[i].last_used.max(timestamp);

            true
        } else {
            false
        }
    }

    /// Sets the content state of the tile holding `key`.
    #[inline]
    pub fn set_state(&mut self, key: &BlockKey, state: TileState) -> bool {
        if let Some(&i) = self.by_key.get(key) {
            self.tiles[i].state = state;

            true
        } else {
            false
        }
    }

    /// Returns the tile holding `key`, stealing the least-recently-used tile if the key is not
    /// yet resident. A stolen tile starts [`TileState::Empty`] and is stamped with the current
    /// timestamp so that two assignments in one frame never steal the same tile.
    pub fn assign(&mut self, key: BlockKey) -> TileLocation {
        if let Some(&i) = self.by_key.get(&key) {
            self.tiles[i].last_used = self.timestamp;

            return self.tiles[i].location;
        }

        let victim = self
            .tiles
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| t.last_used)
            .map(|(i, _)| i)
            .unwrap();

        if let Some(old_key) = self.tiles[victim].key.take() {
            self.by_key.remove(&old_key);
        }
        self.tiles[victim].key = Some(key);
        self.tiles[victim].state = TileState::Empty;
        self.tiles[victim].last_used = self.timestamp;
        self.by_key.insert(key, victim);

        self.tiles[victim].location
    }

    fn index_to_location(grid_size: Vector3<i32>, i: usize) -> TileLocation {
        let i = i as i32;
        let x = i % grid_size.x;
        let y = (i / grid_size.x) % grid_size.y;
        let z = i / (grid_size.x * grid_size.y);

        TileLocation(Point3::new(x, y, z))
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
