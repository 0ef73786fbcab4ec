//! Platform intrinsic kernels.
//!
//! # Safety
//!
//! This module uses `unsafe` for SIMD intrinsics which are safe when:
//! - Target CPU features are detected at runtime before use
//! - Every pointer offset stays below the length of the re-sliced ranges
//!
//! Loads are unaligned: alignment is only established for `grad_input`, the
//! other two buffers may sit at any element-aligned address.
#![allow(unsafe_code)]

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
use super::GradientKernel;

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
use crate::formula::grad_relu_slice;

// ============================================================================
// x86_64: SSE2
// ============================================================================

/// SSE2 kernel, 4 lanes.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Sse2Kernel;

#[cfg(target_arch = "x86_64")]
impl GradientKernel for Sse2Kernel {
    fn name(&self) -> &'static str {
        "sse2"
    }

    fn apply(
        &self,
        grad_output: &[f32],
        input: &[f32],
        grad_input: &mut [f32],
        negative_slope: f32,
    ) {
        let n = grad_input.len();
        let (grad_output, input) = (&grad_output[..n], &input[..n]);

        if is_x86_feature_detected!("sse2") {
            // SAFETY: We've checked for SSE2 support
            unsafe { grad_relu_sse2(grad_output, input, grad_input, negative_slope) };
            return;
        }

        grad_relu_slice(grad_output, input, grad_input, negative_slope);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn grad_relu_sse2(
    grad_output: &[f32],
    input: &[f32],
    grad_input: &mut [f32],
    negative_slope: f32,
) {
    let len = grad_input.len();
    let mut i = 0;

    // SAFETY: all three slices hold `len` elements and `i + 4 <= len`.
    unsafe {
        let slope = _mm_set1_ps(negative_slope);

        while i + 4 <= len {
            let g = _mm_loadu_ps(grad_output.as_ptr().add(i));
            let x = _mm_loadu_ps(input.as_ptr().add(i));
            let scaled = _mm_mul_ps(g, slope);

            // Arithmetic shift smears the sign bit across the lane.
            let mask = _mm_castsi128_ps(_mm_srai_epi32(_mm_castps_si128(x), 31));
            let out = _mm_or_ps(_mm_and_ps(mask, scaled), _mm_andnot_ps(mask, g));

            _mm_storeu_ps(grad_input.as_mut_ptr().add(i), out);
            i += 4;
        }
    }

    // Handle remainder
    grad_relu_slice(&grad_output[i..], &input[i..], &mut grad_input[i..], negative_slope);
}

// ============================================================================
// x86_64: AVX2
// ============================================================================

/// AVX2 kernel, 8 lanes.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Avx2Kernel;

#[cfg(target_arch = "x86_64")]
impl GradientKernel for Avx2Kernel {
    fn name(&self) -> &'static str {
        "avx2"
    }

    fn apply(
        &self,
        grad_output: &[f32],
        input: &[f32],
        grad_input: &mut [f32],
        negative_slope: f32,
    ) {
        let n = grad_input.len();
        let (grad_output, input) = (&grad_output[..n], &input[..n]);

        if is_x86_feature_detected!("avx2") {
            // SAFETY: We've checked for AVX2 support
            unsafe { grad_relu_avx2(grad_output, input, grad_input, negative_slope) };
            return;
        }

        grad_relu_slice(grad_output, input, grad_input, negative_slope);
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn grad_relu_avx2(
    grad_output: &[f32],
    input: &[f32],
    grad_input: &mut [f32],
    negative_slope: f32,
) {
    let len = grad_input.len();
    let mut i = 0;

    // SAFETY: all three slices hold `len` elements and `i + 8 <= len`.
    unsafe {
        let slope = _mm256_set1_ps(negative_slope);

        while i + 8 <= len {
            let g = _mm256_loadu_ps(grad_output.as_ptr().add(i));
            let x = _mm256_loadu_ps(input.as_ptr().add(i));
            let scaled = _mm256_mul_ps(g, slope);

            // blendv picks `scaled` wherever the sign bit of `x` is set.
            let out = _mm256_blendv_ps(g, scaled, x);

            _mm256_storeu_ps(grad_input.as_mut_ptr().add(i), out);
            i += 8;
        }
    }

    grad_relu_slice(&grad_output[i..], &input[i..], &mut grad_input[i..], negative_slope);
}

// ============================================================================
// aarch64: NEON
// ============================================================================

/// NEON kernel, 4 lanes.
#[cfg(target_arch = "aarch64")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NeonKernel;

#[cfg(target_arch = "aarch64")]
impl GradientKernel for NeonKernel {
    fn name(&self) -> &'static str {
        "neon"
    }

    fn apply(
        &self,
        grad_output: &[f32],
        input: &[f32],
        grad_input: &mut [f32],
        negative_slope: f32,
    ) {
        let n = grad_input.len();
        let (grad_output, input) = (&grad_output[..n], &input[..n]);

        // SAFETY: NEON is mandatory on aarch64
        unsafe { grad_relu_neon(grad_output, input, grad_input, negative_slope) };
    }
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn grad_relu_neon(
    grad_output: &[f32],
    input: &[f32],
    grad_input: &mut [f32],
    negative_slope: f32,
) {
    let len = grad_input.len();
    let mut i = 0;

    // SAFETY: all three slices hold `len` elements and `i + 4 <= len`.
    unsafe {
        let slope = vdupq_n_f32(negative_slope);

        while i + 4 <= len {
            let g = vld1q_f32(grad_output.as_ptr().add(i));
            let x = vld1q_f32(input.as_ptr().add(i));
            let scaled = vmulq_f32(g, slope);

            let mask = vreinterpretq_u32_s32(vshrq_n_s32::<31>(vreinterpretq_s32_f32(x)));
            let out = vbslq_f32(mask, scaled, g);

            vst1q_f32(grad_input.as_mut_ptr().add(i), out);
            i += 4;
        }
    }

    grad_relu_slice(&grad_output[i..], &input[i..], &mut grad_input[i..], negative_slope);
}

#[cfg(all(test, any(target_arch = "x86_64", target_arch = "aarch64")))]
mod tests {
    use super::*;
    use crate::formula::grad_relu;

    fn check(kernel: &dyn GradientKernel) {
        let grad_output = [1.0, -2.0, 3.0, 4.0, 0.5, -0.5, 8.0, 16.0, 32.0, 7.0, 1.0];
        let input = [
            -1.0,
            0.0,
            1.0,
            -0.0,
            2.0,
            -3.0,
            f32::NEG_INFINITY,
            f32::INFINITY,
            -1e-40,
            1e-40,
            -7.0,
        ];
        let mut grad_input = [0.0f32; 11];

        kernel.apply(&grad_output, &input, &mut grad_input, 0.1);

        for i in 0..11 {
            let expected = grad_relu(grad_output[i], input[i], 0.1);
            assert_eq!(grad_input[i].to_bits(), expected.to_bits(), "{} lane {}", kernel.name(), i);
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_sse2_matches_formula() {
        check(&Sse2Kernel);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_avx2_matches_formula() {
        // Falls back to scalar without AVX2, still must match.
        check(&Avx2Kernel);
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn test_neon_matches_formula() {
        check(&NeonKernel);
    }

    #[test]
    fn test_unaligned_sources() {
        let backing: Vec<f32> = (0..40).map(|i| i as f32 - 20.0).collect();
        let grads: Vec<f32> = (0..40).map(|i| i as f32 * 0.25).collect();

        for offset in 0..4 {
            let input = &backing[offset..offset + 32];
            let grad_output = &grads[3 - offset..35 - offset];
            let mut grad_input = vec![0.0f32; 32];

            #[cfg(target_arch = "x86_64")]
            Avx2Kernel.apply(grad_output, input, &mut grad_input, 0.3);
            #[cfg(target_arch = "aarch64")]
            NeonKernel.apply(grad_output, input, &mut grad_input, 0.3);

            for i in 0..32 {
                let expected = grad_relu(grad_output[i], input[i], 0.3);
                assert_eq!(grad_input[i].to_bits(), expected.to_bits());
            }
        }
    }
}
