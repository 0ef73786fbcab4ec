//! Vectorized gradient kernels.
//!
//! A kernel applies the leaky-ReLU input gradient over one contiguous range.
//! Every kernel must agree bit-for-bit with [`crate::formula::grad_relu`] on
//! every element it is given; the dispatcher relies on that to mix the scalar
//! prologue/epilogue with vectorized tiles.
//!
//! ## Backends
//!
//! - [`ScalarKernel`]: portable fallback, always available
//! - `Sse2Kernel`: 128-bit, x86_64 baseline
//! - `Avx2Kernel`: 256-bit, Haswell 2013+
//! - `NeonKernel`: 128-bit, mandatory on aarch64

use std::fmt;

use crate::error::{Error, Result};
use crate::formula::grad_relu_slice;

mod simd;

#[cfg(target_arch = "x86_64")]
pub use simd::{Avx2Kernel, Sse2Kernel};

#[cfg(target_arch = "aarch64")]
pub use simd::NeonKernel;

/// Applies the gradient formula over a contiguous range.
///
/// `grad_input.len()` is the element count. `grad_output` and `input` must hold
/// at least that many elements; implementations panic otherwise.
pub trait GradientKernel: Send + Sync + fmt::Debug {
    /// Short backend name used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Writes `grad_input[i] = grad(grad_output[i], input[i], negative_slope)`
    /// for every `i` in `0..grad_input.len()`.
    fn apply(
        &self,
        grad_output: &[f32],
        input: &[f32],
        grad_input: &mut [f32],
        negative_slope: f32,
    );
}

/// Portable scalar kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarKernel;

impl GradientKernel for ScalarKernel {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn apply(
        &self,
        grad_output: &[f32],
        input: &[f32],
        grad_input: &mut [f32],
        negative_slope: f32,
    ) {
        let n = grad_input.len();
        grad_relu_slice(&grad_output[..n], &input[..n], grad_input, negative_slope);
    }
}

static SCALAR: ScalarKernel = ScalarKernel;

#[cfg(target_arch = "x86_64")]
static SSE2: Sse2Kernel = Sse2Kernel;

#[cfg(target_arch = "x86_64")]
static AVX2: Avx2Kernel = Avx2Kernel;

#[cfg(target_arch = "aarch64")]
static NEON: NeonKernel = NeonKernel;

/// Backend selection for the vectorized kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelBackend {
    /// Scalar fallback (no SIMD).
    Scalar,
    /// SSE2 (128-bit, x86_64 baseline).
    Sse2,
    /// AVX2 (256-bit, Haswell 2013+).
    Avx2,
    /// ARM NEON (128-bit).
    Neon,
}

impl KernelBackend {
    /// All backends, in ascending preference order.
    pub const ALL: [Self; 4] = [Self::Scalar, Self::Sse2, Self::Neon, Self::Avx2];

    /// Detects the best available backend for the current CPU.
    #[must_use]
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") {
                return Self::Avx2;
            }
            if is_x86_feature_detected!("sse2") {
                return Self::Sse2;
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            // NEON is mandatory on AArch64
            return Self::Neon;
        }

        Self::Scalar
    }

    /// Returns true if this backend can run on the current CPU.
    #[must_use]
    pub fn is_available(self) -> bool {
        match self {
            Self::Scalar => true,
            #[cfg(target_arch = "x86_64")]
            Self::Sse2 => is_x86_feature_detected!("sse2"),
            #[cfg(target_arch = "x86_64")]
            Self::Avx2 => is_x86_feature_detected!("avx2"),
            #[cfg(target_arch = "aarch64")]
            Self::Neon => true,
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }

    /// Parses a backend name as used in configuration files.
    ///
    /// Returns `None` for unknown names; `"auto"` is handled by the caller.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "scalar" => Some(Self::Scalar),
            "sse2" => Some(Self::Sse2),
            "avx2" => Some(Self::Avx2),
            "neon" => Some(Self::Neon),
            _ => None,
        }
    }

    /// Backend name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Sse2 => "sse2",
            Self::Avx2 => "avx2",
            Self::Neon => "neon",
        }
    }

    /// Returns the register width in bits.
    #[must_use]
    pub const fn register_width_bits(self) -> usize {
        match self {
            Self::Scalar => 32,
            Self::Sse2 | Self::Neon => 128,
            Self::Avx2 => 256,
        }
    }

    /// Returns the number of f32 values processed per SIMD operation.
    #[must_use]
    pub const fn f32_lanes(self) -> usize {
        self.register_width_bits() / 32
    }

    /// Returns the kernel implementing this backend.
    pub fn kernel(self) -> Result<&'static dyn GradientKernel> {
        if !self.is_available() {
            return Err(Error::BackendUnavailable(self.name()));
        }

        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Sse2 => Ok(&SSE2),
            #[cfg(target_arch = "x86_64")]
            Self::Avx2 => Ok(&AVX2),
            #[cfg(target_arch = "aarch64")]
            Self::Neon => Ok(&NEON),
            _ => Ok(&SCALAR),
        }
    }
}

impl fmt::Display for KernelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
