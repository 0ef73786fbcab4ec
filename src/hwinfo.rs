//! Hardware capability set consumed by the engine.
//!
//! Built once (by [`HardwareInfo::detect`] or from configuration) and passed
//! by reference into every call. Nothing in here changes during a call.

use std::fmt;

use crate::error::{Error, Result};
use crate::kernel::{GradientKernel, KernelBackend};

/// Default L1 cache-blocking budget in bytes.
pub const DEFAULT_L1_BLOCKING_BYTES: usize = 16 * 1024;

/// SIMD width, L1 blocking budget and the vectorized kernel.
#[derive(Clone, Copy)]
pub struct HardwareInfo {
    simd_width: usize,
    l1_blocking_bytes: usize,
    kernel: &'static dyn GradientKernel,
}

impl HardwareInfo {
    /// Detects the best kernel backend and derives the SIMD width from it.
    #[must_use]
    pub fn detect() -> Self {
        let backend = KernelBackend::detect();
        let info = Self::for_backend(backend).unwrap_or_else(|_| Self::scalar());
        log::info!(
            "detected kernel backend {} (simd_width={}, l1_blocking_bytes={})",
            info.kernel.name(),
            info.simd_width,
            info.l1_blocking_bytes
        );
        info
    }

    /// Capability set for a specific backend with default blocking.
    pub fn for_backend(backend: KernelBackend) -> Result<Self> {
        Ok(Self {
            simd_width: backend.f32_lanes(),
            l1_blocking_bytes: DEFAULT_L1_BLOCKING_BYTES,
            kernel: backend.kernel()?,
        })
    }

    /// Portable scalar capability set (width 1).
    #[must_use]
    pub fn scalar() -> Self {
        Self {
            simd_width: 1,
            l1_blocking_bytes: DEFAULT_L1_BLOCKING_BYTES,
            kernel: &crate::kernel::ScalarKernel,
        }
    }

    /// Fully explicit capability set.
    ///
    /// Any kernel is valid with any width: the width only drives splitting
    /// and tile rounding, kernels handle arbitrary lengths.
    pub fn new(
        simd_width: usize,
        l1_blocking_bytes: usize,
        kernel: &'static dyn GradientKernel,
    ) -> Result<Self> {
        if simd_width == 0 {
            return Err(Error::ConfigInvalid {
                key: "simd_width".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if l1_blocking_bytes < std::mem::size_of::<f32>() {
            return Err(Error::ConfigInvalid {
                key: "l1_blocking_bytes".to_string(),
                message: format!("must be at least {} bytes", std::mem::size_of::<f32>()),
            });
        }

        Ok(Self {
            simd_width,
            l1_blocking_bytes,
            kernel,
        })
    }

    /// Returns a copy with a different SIMD width.
    pub fn with_simd_width(self, simd_width: usize) -> Result<Self> {
        Self::new(simd_width, self.l1_blocking_bytes, self.kernel)
    }

    /// Returns a copy with a different L1 blocking budget.
    pub fn with_l1_blocking_bytes(self, l1_blocking_bytes: usize) -> Result<Self> {
        Self::new(self.simd_width, l1_blocking_bytes, self.kernel)
    }

    /// Number of f32 lanes per vector.
    #[must_use]
    pub const fn simd_width(&self) -> usize {
        self.simd_width
    }

    /// L1 cache-blocking budget in bytes.
    #[must_use]
    pub const fn l1_blocking_bytes(&self) -> usize {
        self.l1_blocking_bytes
    }

    /// The vectorized kernel.
    #[must_use]
    pub fn kernel(&self) -> &'static dyn GradientKernel {
        self.kernel
    }
}

impl Default for HardwareInfo {
    fn default() -> Self {
        Self::detect()
    }
}

impl fmt::Debug for HardwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareInfo")
            .field("simd_width", &self.simd_width)
            .field("l1_blocking_bytes", &self.l1_blocking_bytes)
            .field("kernel", &self.kernel.name())
            .finish()
    }
}
