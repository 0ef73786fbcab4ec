//! Alignment splitting into prologue, middle and epilogue.
//!
//! The prologue brings the output cursor to a SIMD-width boundary, the
//! epilogue holds the tail that does not fill a whole vector. Both are
//! processed with the scalar formula on the calling thread; the middle is
//! handed to the tile dispatcher.

use crate::formula::grad_relu_slice;

/// Element counts of the three regions of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Split {
    /// Leading elements processed scalarly to reach alignment.
    pub prologue: usize,
    /// Aligned elements, always a multiple of the SIMD width.
    pub middle: usize,
    /// Trailing elements that do not fill a whole vector.
    pub epilogue: usize,
}

impl Split {
    /// Computes the split for a buffer starting at byte `address`.
    ///
    /// `prologue = min(total, (-(address / elem_size)) mod simd_width)`, using
    /// wrapping unsigned arithmetic, and `epilogue = (total - prologue) mod
    /// simd_width`.
    ///
    /// `elem_size` and `simd_width` must be non-zero.
    #[must_use]
    pub fn compute(address: usize, elem_size: usize, simd_width: usize, total: usize) -> Self {
        debug_assert!(elem_size > 0 && simd_width > 0);
        debug_assert_eq!(address % elem_size, 0, "address not element-aligned");

        let prologue = ((address / elem_size).wrapping_neg() % simd_width).min(total);
        let remaining = total - prologue;
        let epilogue = remaining % simd_width;

        Self {
            prologue,
            middle: remaining - epilogue,
            epilogue,
        }
    }

    /// Computes the split for an `f32` output slice.
    #[must_use]
    pub fn for_slice(grad_input: &[f32], simd_width: usize) -> Self {
        Self::compute(
            grad_input.as_ptr() as usize,
            std::mem::size_of::<f32>(),
            simd_width,
            grad_input.len(),
        )
    }

    /// Total number of elements covered.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.prologue + self.middle + self.epilogue
    }

    /// Index of the first middle element.
    #[must_use]
    pub const fn middle_start(&self) -> usize {
        self.prologue
    }

    /// Index of the first epilogue element.
    #[must_use]
    pub const fn epilogue_start(&self) -> usize {
        self.prologue + self.middle
    }
}

/// Processes the prologue region `[0, split.prologue)` scalarly.
pub fn process_prologue(
    split: &Split,
    grad_output: &[f32],
    input: &[f32],
    grad_input: &mut [f32],
    negative_slope: f32,
) {
    let end = split.prologue;
    grad_relu_slice(&grad_output[..end], &input[..end], &mut grad_input[..end], negative_slope);
}

/// Processes the epilogue region `[total - split.epilogue, total)` scalarly.
pub fn process_epilogue(
    split: &Split,
    grad_output: &[f32],
    input: &[f32],
    grad_input: &mut [f32],
    negative_slope: f32,
) {
    let range = split.epilogue_start()..split.total();
    grad_relu_slice(
        &grad_output[range.clone()],
        &input[range.clone()],
        &mut grad_input[range],
        negative_slope,
    );
}
