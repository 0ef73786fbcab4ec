//! Cache-blocked tile dispatch of the aligned middle region.

use crate::kernel::GradientKernel;
use crate::pool::{tile_count, Tile, TileExecutor};

/// Largest multiple of `simd_width` elements that fits in the blocking budget.
///
/// Never below one vector, so a non-empty region always makes progress.
#[must_use]
pub const fn tile_size(l1_blocking_bytes: usize, elem_size: usize, simd_width: usize) -> usize {
    let elements = l1_blocking_bytes / elem_size;
    let rounded = elements - elements % simd_width;
    if rounded < simd_width {
        simd_width
    } else {
        rounded
    }
}

/// Read-only state shared by every tile of one call.
///
/// `grad_output` and `input` are already advanced past the prologue, so tile
/// offsets index them directly.
#[derive(Debug, Clone, Copy)]
pub struct TileContext<'a> {
    /// Vectorized kernel.
    pub kernel: &'a dyn GradientKernel,
    /// Output gradient of the middle region.
    pub grad_output: &'a [f32],
    /// Forward input of the middle region.
    pub input: &'a [f32],
    /// Slope applied where the input sign bit is set.
    pub negative_slope: f32,
}

impl TileContext<'_> {
    /// Runs the kernel over one tile.
    pub fn compute(&self, tile: Tile, grad_input: &mut [f32]) {
        debug_assert_eq!(tile.len, grad_input.len());
        let range = tile.start..tile.end();
        self.kernel.apply(
            &self.grad_output[range.clone()],
            &self.input[range],
            grad_input,
            self.negative_slope,
        );
    }
}

/// Dispatches the middle region across `executor` and waits for completion.
///
/// Returns the number of tiles submitted.
pub fn dispatch(
    context: &TileContext<'_>,
    grad_input: &mut [f32],
    tile_size: usize,
    executor: &dyn TileExecutor,
) -> usize {
    let total = grad_input.len();
    if total == 0 {
        return 0;
    }

    executor.run_tiled_1d(grad_input, tile_size, &|tile, chunk| context.compute(tile, chunk));
    tile_count(total, tile_size)
}
