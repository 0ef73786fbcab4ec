//! Gradient dispatch engine.
//!
//! One call walks `Validating → SplittingPrologue → SplittingEpilogue →
//! DispatchingMiddle → Done`. `Failed` is reachable only from `Validating`,
//! before any buffer has been written. Only the middle dispatch may run on
//! threads other than the caller's.

use std::fmt;

use crate::dispatch::{dispatch, tile_size, TileContext};
use crate::error::Result;
use crate::hwinfo::HardwareInfo;
use crate::pool::{CallerThread, TileExecutor};
use crate::split::{process_epilogue, process_prologue, Split};
use crate::validation::{check_buffer, element_count, ShapeValidator, Validate};

const ELEM_SIZE: usize = std::mem::size_of::<f32>();

/// Stage of a single engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Checking shape parameters and buffer lengths.
    Validating,
    /// Scalar processing of the leading unaligned elements.
    SplittingPrologue,
    /// Scalar processing of the trailing partial vector.
    SplittingEpilogue,
    /// Tiled parallel processing of the aligned middle.
    DispatchingMiddle,
    /// All elements written.
    Done,
    /// Validation rejected the call.
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::SplittingPrologue => "splitting-prologue",
            Self::SplittingEpilogue => "splitting-epilogue",
            Self::DispatchingMiddle => "dispatching-middle",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Region sizes.
    pub split: Split,
    /// Tile size used for the middle region, in elements.
    pub tile_size: usize,
    /// Number of tiles submitted to the executor (0 when the middle is empty).
    pub tiles: usize,
}

impl DispatchReport {
    /// Total elements written.
    #[must_use]
    pub const fn elements(&self) -> usize {
        self.split.total()
    }
}

/// Leaky-ReLU input gradient engine.
///
/// Holds the capability set and the shape validator; both are read-only
/// during a call, so one engine can serve many threads.
pub struct GradientEngine {
    hwinfo: HardwareInfo,
    validator: Box<dyn Validate>,
}

impl GradientEngine {
    /// Engine with the strict [`ShapeValidator`].
    #[must_use]
    pub fn new(hwinfo: HardwareInfo) -> Self {
        Self {
            hwinfo,
            validator: Box::new(ShapeValidator::new()),
        }
    }

    /// Replaces the shape validator.
    #[must_use]
    pub fn with_validator(mut self, validator: impl Validate + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    /// The capability set this engine dispatches with.
    #[must_use]
    pub fn hwinfo(&self) -> &HardwareInfo {
        &self.hwinfo
    }

    /// Computes `grad_input` from `grad_output` and `input`.
    ///
    /// With `pool = None` every tile runs on the calling thread.
    #[allow(clippy::too_many_arguments)]
    pub fn input_gradient(
        &self,
        batch_size: usize,
        channels: usize,
        grad_output: &[f32],
        input: &[f32],
        grad_input: &mut [f32],
        negative_slope: f32,
        pool: Option<&rayon::ThreadPool>,
    ) -> Result<DispatchReport> {
        match pool {
            Some(pool) => self.input_gradient_with(
                batch_size,
                channels,
                grad_output,
                input,
                grad_input,
                negative_slope,
                pool,
            ),
            None => self.input_gradient_with(
                batch_size,
                channels,
                grad_output,
                input,
                grad_input,
                negative_slope,
                &CallerThread,
            ),
        }
    }

    /// Computes `grad_input` using an arbitrary tile executor.
    #[allow(clippy::too_many_arguments)]
    pub fn input_gradient_with(
        &self,
        batch_size: usize,
        channels: usize,
        grad_output: &[f32],
        input: &[f32],
        grad_input: &mut [f32],
        negative_slope: f32,
        executor: &dyn TileExecutor,
    ) -> Result<DispatchReport> {
        trace_stage(Stage::Validating);
        let validated = self.validate(batch_size, channels, grad_output, input, grad_input);
        let elements = match validated {
            Ok(elements) => elements,
            Err(e) => {
                trace_stage(Stage::Failed);
                log::debug!("rejected {}x{}: {}", batch_size, channels, e);
                return Err(e);
            }
        };

        let grad_output = &grad_output[..elements];
        let input = &input[..elements];
        let grad_input = &mut grad_input[..elements];

        let simd_width = self.hwinfo.simd_width();
        let split = Split::for_slice(grad_input, simd_width);

        trace_stage(Stage::SplittingPrologue);
        process_prologue(&split, grad_output, input, grad_input, negative_slope);

        trace_stage(Stage::SplittingEpilogue);
        process_epilogue(&split, grad_output, input, grad_input, negative_slope);

        trace_stage(Stage::DispatchingMiddle);
        let tile_size = tile_size(self.hwinfo.l1_blocking_bytes(), ELEM_SIZE, simd_width);
        let middle = split.middle_start()..split.epilogue_start();
        let context = TileContext {
            kernel: self.hwinfo.kernel(),
            grad_output: &grad_output[middle.clone()],
            input: &input[middle.clone()],
            negative_slope,
        };
        let tiles = dispatch(&context, &mut grad_input[middle], tile_size, executor);

        trace_stage(Stage::Done);
        log::debug!(
            "relu input gradient: {} elements (prologue={}, middle={}, epilogue={}), \
             {} tiles of {} on {} with {}",
            elements,
            split.prologue,
            split.middle,
            split.epilogue,
            tiles,
            tile_size,
            executor.name(),
            self.hwinfo.kernel().name()
        );

        Ok(DispatchReport {
            split,
            tile_size,
            tiles,
        })
    }

    fn validate(
        &self,
        batch_size: usize,
        channels: usize,
        grad_output: &[f32],
        input: &[f32],
        grad_input: &[f32],
    ) -> Result<usize> {
        self.validator.validate(batch_size, channels)?;
        let elements = element_count(batch_size, channels)?;
        check_buffer("grad_output", grad_output.len(), elements)?;
        check_buffer("input", input.len(), elements)?;
        check_buffer("grad_input", grad_input.len(), elements)?;
        Ok(elements)
    }
}

impl fmt::Debug for GradientEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradientEngine")
            .field("hwinfo", &self.hwinfo)
            .finish_non_exhaustive()
    }
}

fn trace_stage(stage: Stage) {
    log::trace!("stage: {}", stage);
}

/// Computes the leaky-ReLU input gradient with the strict shape validator.
///
/// `grad_input[i] = negative_slope * grad_output[i]` where the sign bit of
/// `input[i]` is set, `grad_output[i]` otherwise, for
/// `i < batch_size * channels`.
#[allow(clippy::too_many_arguments)]
pub fn relu_input_gradient(
    batch_size: usize,
    channels: usize,
    grad_output: &[f32],
    input: &[f32],
    grad_input: &mut [f32],
    negative_slope: f32,
    hwinfo: &HardwareInfo,
    pool: Option<&rayon::ThreadPool>,
) -> Result<DispatchReport> {
    GradientEngine::new(*hwinfo).input_gradient(
        batch_size,
        channels,
        grad_output,
        input,
        grad_input,
        negative_slope,
        pool,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::formula::grad_relu;
    use crate::kernel::KernelBackend;
    use crate::pool::GlobalPool;

    fn reference(grad_output: &[f32], input: &[f32], slope: f32) -> Vec<u32> {
        grad_output
            .iter()
            .zip(input)
            .map(|(&g, &x)| grad_relu(g, x, slope).to_bits())
            .collect()
    }

    fn bits(values: &[f32]) -> Vec<u32> {
        values.iter().map(|v| v.to_bits()).collect()
    }

    fn sample(len: usize) -> (Vec<f32>, Vec<f32>) {
        let grad_output = (0..len).map(|i| ((i * 7919) % 1000) as f32 / 100.0 - 5.0).collect();
        let input = (0..len)
            .map(|i| match i % 5 {
                0 => -0.0,
                1 => ((i * 31) % 17) as f32 - 8.0,
                2 => 0.0,
                3 => -((i % 11) as f32),
                _ => i as f32,
            })
            .collect();
        (grad_output, input)
    }

    #[test]
    fn test_concrete_scenario() {
        let grad_output = [1.0; 5];
        let input = [-1.0, 0.0, 1.0, -0.0, 2.0];
        let mut grad_input = [0.0; 5];

        let hwinfo = HardwareInfo::detect();
        let report =
            relu_input_gradient(1, 5, &grad_output, &input, &mut grad_input, 0.1, &hwinfo, None)
                .unwrap();

        assert_eq!(grad_input, [0.1, 1.0, 1.0, 0.1, 1.0]);
        assert_eq!(report.elements(), 5);
    }

    #[test]
    fn test_rejected_shape_leaves_output_untouched() {
        let mut grad_input = [7.0f32; 4];
        let hwinfo = HardwareInfo::scalar();
        let ones = [1.0f32; 4];
        let err = relu_input_gradient(4, 0, &ones, &ones, &mut grad_input, 0.1, &hwinfo, None)
            .unwrap_err();

        assert_eq!(err, Error::InvalidChannels(0));
        assert_eq!(grad_input, [7.0; 4]);
    }

    #[test]
    fn test_short_buffer_rejected_before_writes() {
        let mut grad_input = [7.0f32; 8];
        let hwinfo = HardwareInfo::scalar();
        let (g, x) = ([1.0f32; 8], [1.0f32; 7]);
        let err =
            relu_input_gradient(2, 4, &g, &x, &mut grad_input, 0.1, &hwinfo, None).unwrap_err();

        assert!(matches!(
            err,
            Error::BufferTooSmall {
                buffer: "input",
                required: 8,
                actual: 7
            }
        ));
        assert_eq!(grad_input, [7.0; 8]);
    }

    #[test]
    fn test_empty_tensor_with_permissive_validator() {
        let engine = GradientEngine::new(HardwareInfo::detect())
            .with_validator(ShapeValidator::allowing_empty());
        let mut grad_input: [f32; 0] = [];

        let report = engine
            .input_gradient(0, 16, &[], &[], &mut grad_input, 0.1, None)
            .unwrap();

        assert_eq!(report.split, Split::default());
        assert_eq!(report.tiles, 0);
    }

    #[test]
    fn test_single_element_skips_dispatch() {
        let hwinfo = HardwareInfo::scalar().with_simd_width(8).unwrap();
        let mut grad_input = [0.0f32];

        let report =
            relu_input_gradient(1, 1, &[2.0], &[-0.0], &mut grad_input, 0.25, &hwinfo, None)
                .unwrap();

        assert_eq!(grad_input, [0.5]);
        assert_eq!(report.split.middle, 0);
        assert_eq!(report.tiles, 0);
    }

    #[test]
    fn test_longer_buffers_only_prefix_written() {
        let mut grad_input = [9.0f32; 10];
        let hwinfo = HardwareInfo::detect();
        relu_input_gradient(2, 3, &[1.0; 10], &[-1.0; 10], &mut grad_input, 0.5, &hwinfo, None)
            .unwrap();

        assert_eq!(&grad_input[..6], &[0.5; 6]);
        assert_eq!(&grad_input[6..], &[9.0; 4]);
    }

    #[test]
    fn test_every_backend_and_offset_matches_reference() {
        let (grad_output, input) = sample(600);
        let expected = reference(&grad_output, &input, 0.01);

        for backend in KernelBackend::ALL.into_iter().filter(|b| b.is_available()) {
            let hwinfo = HardwareInfo::for_backend(backend)
                .unwrap()
                .with_l1_blocking_bytes(256)
                .unwrap();
            let engine = GradientEngine::new(hwinfo);

            // Shift the output start so the prologue takes every possible size.
            for offset in 0..8 {
                let n = 500;
                let mut backing = vec![f32::NAN; n + 8];
                let grad_input = &mut backing[offset..offset + n];

                let report = engine
                    .input_gradient_with(1, n, &grad_output, &input, grad_input, 0.01, &GlobalPool)
                    .unwrap();

                assert_eq!(
                    bits(grad_input),
                    expected[..n],
                    "backend {} offset {}",
                    backend,
                    offset
                );
                assert_eq!(report.split.total(), n);
                assert_eq!(report.split.middle % hwinfo.simd_width(), 0);
            }
        }
    }

    #[test]
    fn test_result_invariant_to_tile_budget() {
        let (grad_output, input) = sample(4099);
        let base = HardwareInfo::detect();
        let mut results = Vec::new();

        for budget in [4, 32, 100, 4096, 16 * 1024, 1 << 20] {
            let hwinfo = base.with_l1_blocking_bytes(budget).unwrap();
            let mut grad_input = vec![0.0f32; 4099];
            let report = relu_input_gradient(
                4099,
                1,
                &grad_output,
                &input,
                &mut grad_input,
                0.2,
                &hwinfo,
                None,
            )
            .unwrap();
            assert!(report.tile_size >= hwinfo.simd_width());
            results.push(bits(&grad_input));
        }

        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(results[0], reference(&grad_output, &input, 0.2));
    }

    #[test]
    fn test_dedicated_pool_matches_caller_thread() {
        let (grad_output, input) = sample(10_000);
        let hwinfo = HardwareInfo::detect().with_l1_blocking_bytes(512).unwrap();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();

        let mut serial = vec![0.0f32; 10_000];
        let mut parallel = vec![0.0f32; 10_000];
        relu_input_gradient(100, 100, &grad_output, &input, &mut serial, 0.3, &hwinfo, None)
            .unwrap();
        let report = relu_input_gradient(
            100,
            100,
            &grad_output,
            &input,
            &mut parallel,
            0.3,
            &hwinfo,
            Some(&pool),
        )
        .unwrap();

        assert_eq!(bits(&serial), bits(&parallel));
        assert!(report.tiles > 1);
    }

    #[test]
    fn test_idempotent() {
        let (grad_output, input) = sample(1000);
        let hwinfo = HardwareInfo::detect();
        let mut first = vec![0.0f32; 1000];
        relu_input_gradient(10, 100, &grad_output, &input, &mut first, 0.05, &hwinfo, None)
            .unwrap();
        let mut second = first.clone();
        relu_input_gradient(10, 100, &grad_output, &input, &mut second, 0.05, &hwinfo, None)
            .unwrap();
        assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn test_custom_validator_cannot_shrink_element_count() {
        let accept_all = |_batch_size: usize, _channels: usize| -> Result<()> { Ok(()) };
        let engine = GradientEngine::new(HardwareInfo::scalar()).with_validator(accept_all);
        let input = [-1.0, 0.0, 1.0, -0.0, 2.0];
        let mut grad_input = [7.0f32; 5];

        let report = engine
            .input_gradient(1, 5, &[1.0; 5], &input, &mut grad_input, 0.1, None)
            .unwrap();

        assert_eq!(grad_input, [0.1, 1.0, 1.0, 0.1, 1.0]);
        assert_eq!(report.elements(), 5);
    }

    #[test]
    fn test_custom_validator_overflow_rejected() {
        let accept_all = |_batch_size: usize, _channels: usize| -> Result<()> { Ok(()) };
        let engine = GradientEngine::new(HardwareInfo::scalar()).with_validator(accept_all);

        let err = engine
            .input_gradient(usize::MAX, 2, &[], &[], &mut [], 0.1, None)
            .unwrap_err();

        assert!(matches!(err, Error::SizeOverflow { channels: 2, .. }));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::DispatchingMiddle.to_string(), "dispatching-middle");
        assert_eq!(Stage::Failed.to_string(), "failed");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::formula::grad_relu;
    use proptest::prelude::*;

    fn any_f32_bits() -> impl Strategy<Value = f32> {
        any::<u32>().prop_map(f32::from_bits)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Every element equals the scalar formula, bit for bit, for any
        /// inputs including NaNs, infinities and signed zeros.
        #[test]
        fn prop_matches_formula(
            data in prop::collection::vec((any_f32_bits(), any_f32_bits()), 0..300),
            slope in -2.0f32..2.0,
            offset in 0usize..8,
            budget in 4usize..2048,
        ) {
            let n = data.len();
            let grad_output: Vec<f32> = data.iter().map(|p| p.0).collect();
            let input: Vec<f32> = data.iter().map(|p| p.1).collect();
            let mut backing = vec![0.0f32; n + 8];
            let grad_input = &mut backing[offset..offset + n];

            let hwinfo = HardwareInfo::detect().with_l1_blocking_bytes(budget).unwrap();
            let engine =
                GradientEngine::new(hwinfo).with_validator(ShapeValidator::allowing_empty());
            let report = engine
                .input_gradient(1, n, &grad_output, &input, grad_input, slope, None)
                .unwrap();

            prop_assert_eq!(report.elements(), n);
            let scalar = report.split.prologue + report.split.epilogue;
            prop_assert!(scalar < 2 * hwinfo.simd_width());
            for i in 0..n {
                let expected = grad_relu(grad_output[i], input[i], slope);
                // NaN payloads from the multiply may differ in sign/quiet bits
                // across backends; compare NaN-ness there.
                if expected.is_nan() {
                    prop_assert!(grad_input[i].is_nan());
                } else {
                    prop_assert_eq!(grad_input[i].to_bits(), expected.to_bits());
                }
            }
        }
    }
}
