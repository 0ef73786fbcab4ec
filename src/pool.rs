//! One-dimensional tiled parallel execution.
//!
//! The engine never creates threads. It hands the aligned middle of the
//! output buffer to a [`TileExecutor`], which splits it into disjoint
//! `&mut` chunks and runs the tile function on each, returning only once
//! every tile has finished.

use rayon::prelude::*;

/// A contiguous sub-range `[start, start + len)` of the middle region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Offset of the first element, relative to the middle region.
    pub start: usize,
    /// Number of elements.
    pub len: usize,
}

impl Tile {
    /// One past the last element.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Function invoked once per tile with that tile's output chunk.
pub type TileFn<'a> = dyn Fn(Tile, &mut [f32]) + Sync + 'a;

/// Number of tiles needed to cover `total` elements.
#[must_use]
pub const fn tile_count(total: usize, tile_size: usize) -> usize {
    total.div_ceil(tile_size)
}

/// Fork-join execution of a tiled 1-D range.
pub trait TileExecutor: Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Partitions `output` into tiles of `tile_size` elements (the last may be
    /// shorter) and runs `tile_fn` on each. Blocks until all tiles complete.
    ///
    /// `tile_size` must be non-zero.
    fn run_tiled_1d(&self, output: &mut [f32], tile_size: usize, tile_fn: &TileFn<'_>);
}

fn run_tile(index: usize, tile_size: usize, chunk: &mut [f32], tile_fn: &TileFn<'_>) {
    let tile = Tile {
        start: index * tile_size,
        len: chunk.len(),
    };
    tile_fn(tile, chunk);
}

/// Runs every tile on the calling thread, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerThread;

impl TileExecutor for CallerThread {
    fn name(&self) -> &'static str {
        "caller"
    }

    fn run_tiled_1d(&self, output: &mut [f32], tile_size: usize, tile_fn: &TileFn<'_>) {
        output
            .chunks_mut(tile_size)
            .enumerate()
            .for_each(|(index, chunk)| run_tile(index, tile_size, chunk, tile_fn));
    }
}

/// Runs tiles on rayon's global thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalPool;

impl TileExecutor for GlobalPool {
    fn name(&self) -> &'static str {
        "rayon-global"
    }

    fn run_tiled_1d(&self, output: &mut [f32], tile_size: usize, tile_fn: &TileFn<'_>) {
        output
            .par_chunks_mut(tile_size)
            .enumerate()
            .for_each(|(index, chunk)| run_tile(index, tile_size, chunk, tile_fn));
    }
}

impl TileExecutor for rayon::ThreadPool {
    fn name(&self) -> &'static str {
        "rayon-pool"
    }

    fn run_tiled_1d(&self, output: &mut [f32], tile_size: usize, tile_fn: &TileFn<'_>) {
        self.install(|| GlobalPool.run_tiled_1d(output, tile_size, tile_fn));
    }
}
