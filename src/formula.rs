//! Scalar leaky-ReLU input gradient.
//!
//! The slope is selected by the IEEE-754 sign bit of the forward input, not by
//! `x < 0.0`. Negative zero and NaNs with the sign bit set take the slope.

/// Computes one element of the input gradient.
///
/// Returns `negative_slope * grad_output` when the sign bit of `input` is set,
/// otherwise `grad_output`. Written as a bit-mask select so it compiles without
/// a conditional jump, matching what the vector kernels do per lane.
#[inline(always)]
#[must_use]
pub fn grad_relu(grad_output: f32, input: f32, negative_slope: f32) -> f32 {
    // All ones when the sign bit is set, all zeros otherwise.
    let mask = ((input.to_bits() as i32) >> 31) as u32;
    let scaled = (grad_output * negative_slope).to_bits();
    f32::from_bits((scaled & mask) | (grad_output.to_bits() & !mask))
}

/// Applies [`grad_relu`] element-wise over equally long slices.
///
/// Used for the unaligned prologue and epilogue, and as the portable kernel.
#[inline]
pub fn grad_relu_slice(
    grad_output: &[f32],
    input: &[f32],
    grad_input: &mut [f32],
    negative_slope: f32,
) {
    debug_assert_eq!(grad_output.len(), grad_input.len());
    debug_assert_eq!(input.len(), grad_input.len());

    for ((out, &g), &x) in grad_input.iter_mut().zip(grad_output).zip(input) {
        *out = grad_relu(g, x, negative_slope);
    }
}
