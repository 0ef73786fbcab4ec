//! # relu-grad
//!
//! SIMD-accelerated, cache-blocked, multi-threaded leaky-ReLU input gradient
//! for CPU.
//!
//! Given the output gradient of a leaky-ReLU activation and the forward input,
//! computes the gradient with respect to the input: `negative_slope * g` where
//! the forward input's sign bit is set, `g` otherwise.
//!
//! ## Features
//!
//! - **Bit-exact**: sign-bit test, so `-0.0` takes the slope and `+0.0` does not
//! - **Hardware Acceleration**: runtime dispatch to SSE2/AVX2/NEON with a scalar fallback
//! - **Alignment-aware**: scalar prologue/epilogue around an aligned vector body
//! - **Parallel**: L1-blocked tiles over a rayon thread pool, fork-join
//!
//! ## Quick Start
//!
//! ```rust
//! use relu_grad::prelude::*;
//!
//! let hwinfo = HardwareInfo::detect();
//! let grad_output = [1.0f32; 5];
//! let input = [-1.0, 0.0, 1.0, -0.0, 2.0];
//! let mut grad_input = [0.0f32; 5];
//!
//! relu_input_gradient(1, 5, &grad_output, &input, &mut grad_input, 0.1, &hwinfo, None)?;
//! assert_eq!(grad_input, [0.1, 1.0, 1.0, 0.1, 1.0]);
//! # Ok::<(), relu_grad::Error>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
// Allow unwrap() in tests only - banned in production code
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Core Modules
// ============================================================================

/// Scalar gradient formula.
pub mod formula;

/// Vectorized gradient kernels and backend selection.
pub mod kernel;

/// Hardware capability set.
pub mod hwinfo;

// ============================================================================
// Dispatch Modules
// ============================================================================

/// Alignment splitting (prologue/epilogue).
pub mod split;

/// Tiled parallel execution.
pub mod pool;

/// Cache-blocked tile dispatch.
pub mod dispatch;

/// Shape validation.
pub mod validation;

/// Engine entry point.
pub mod engine;

// ============================================================================
// Configuration & Errors
// ============================================================================

/// YAML/environment configuration.
pub mod config;

/// Error types for relu-grad operations.
pub mod error;

pub use engine::{relu_input_gradient, DispatchReport, GradientEngine};
pub use error::{Error, Result};

// ============================================================================
// Prelude
// ============================================================================

/// Commonly used types and traits for convenient imports.
///
/// ```rust
/// use relu_grad::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{relu_input_gradient, DispatchReport, GradientEngine};
    pub use crate::error::{Error, Result};
    pub use crate::hwinfo::HardwareInfo;
    pub use crate::kernel::{GradientKernel, KernelBackend};
    pub use crate::pool::{CallerThread, GlobalPool, TileExecutor};
    pub use crate::validation::{ShapeValidator, Validate};
}
