use crate::cache::{TileCache, TileState};
use crate::context::GpuContext;

use mipstream_core::{BlockData, BlockKey, MultiresSource, ReadError};

use futures::channel::oneshot;
use futures::executor::{block_on, ThreadPool};
use futures::future::join_all;
use nalgebra::Vector3;
use std::sync::Arc;
use tracing::warn;

/// One unit of asynchronous load work: produce the voxels of one block and upload them into
/// the shared cache.
///
/// Tasks carry no state beyond their key and source; they are regenerated (not resumed) every
/// frame, so an unfinished or failed task costs nothing but a retry.
pub struct FillTask {
    key: BlockKey,
    source: Arc<dyn MultiresSource>,
    block_shape: Vector3<i32>,
}

impl FillTask {
    pub fn new(key: BlockKey, source: Arc<dyn MultiresSource>, block_shape: Vector3<i32>) -> Self {
        Self {
            key,
            source,
            block_shape,
        }
    }

    #[inline]
    pub fn key(&self) -> BlockKey {
        self.key
    }

    /// Runs the data-production half of the task. Safe to call from a worker thread.
    pub fn produce(&self) -> Result<BlockData, ReadError> {
        self.source.read_block(self.key, self.block_shape)
    }
}

/// A worker pool sized to roughly half the available hardware threads.
pub fn default_worker_pool() -> std::io::Result<ThreadPool> {
    let threads = std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1);

    ThreadPool::builder()
        .pool_size(threads)
        .name_prefix("mipstream-fill-")
        .create()
}

/// Executes `tasks`, producing voxel data on `pool` (or inline when `None`) and applying the
/// results to `cache` and `ctx` on the calling thread.
///
/// Synchronous from the caller's perspective. Cache and timestamp mutation stays on the update
/// thread; only `FillTask::produce` runs on workers, and the per-frame dedupe rule guarantees
/// no two tasks target the same tile. A failed task is logged and dropped; the remaining tasks
/// and the frame continue.
pub fn process_fill_tasks(
    tasks: Vec<FillTask>,
    pool: Option<&ThreadPool>,
    cache: &mut TileCache,
    ctx: &mut dyn GpuContext,
) {
    // Tasks whose tile is already complete only reaffirm residency; don't re-read their data.
    let tasks: Vec<FillTask> = tasks
        .into_iter()
        .filter(|task| {
            cache
                .get(&task.key())
                .map_or(true, |tile| tile.state() != TileState::Complete)
        })
        .collect();

    match pool {
        None => {
            for task in tasks {
                let result = task.produce();
                apply_fill_result(task.key(), result, cache, ctx);
            }
        }
        Some(pool) => {
            let mut pending = Vec::with_capacity(tasks.len());
            for task in tasks {
                let (tx, rx) = oneshot::channel();
                let key = task.key();
                pool.spawn_ok(async move {
                    // The receiver only disappears if the frame is abandoned entirely.
                    let _ = tx.send(task.produce());
                });
                pending.push((key, rx));
            }

            let (keys, receivers): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
            let results = block_on(join_all(receivers));

            for (key, received) in keys.into_iter().zip(results) {
                match received {
                    Ok(result) => apply_fill_result(key, result, cache, ctx),
                    Err(oneshot::Canceled) => {
                        warn!(?key, "fill worker dropped its result; will retry next frame")
                    }
                }
            }
        }
    }
}

fn apply_fill_result(
    key: BlockKey,
    result: Result<BlockData, ReadError>,
    cache: &mut TileCache,
    ctx: &mut dyn GpuContext,
) {
    if let Some(tile) = cache.get(&key) {
        if tile.state() == TileState::Complete {
            return;
        }
    }

    match result {
        Ok(data) => {
            let location = cache.assign(key);
            ctx.upload_tile(location, &data.bytes);
            let state = if data.complete {
                TileState::Complete
            } else {
                TileState::Incomplete
            };
            cache.set_state(&key, state);
        }
        Err(e) => {
            warn!(?key, error = %e, "dropping failed fill task");
        }
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
