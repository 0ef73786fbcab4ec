//! Configuration for the gradient engine.
//!
//! Supports YAML configuration with precedence: ENV > file > defaults.
//!
//! ```yaml
//! version: 1
//! backend: auto        # auto | scalar | sse2 | avx2 | neon
//! simd_width: 8        # optional override of the backend's lane count
//! l1_blocking_bytes: 16384
//! threads: 4           # optional, rayon default when absent
//! allow_empty: false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::GradientEngine;
use crate::error::{Error, Result};
use crate::hwinfo::{HardwareInfo, DEFAULT_L1_BLOCKING_BYTES};
use crate::kernel::KernelBackend;
use crate::validation::ShapeValidator;

/// Prefix of the environment variables read by [`Config::apply_env`].
pub const ENV_PREFIX: &str = "RELU_GRAD_";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Configuration version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Kernel backend name, or `auto` for runtime detection.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Override of the SIMD width used for splitting and tile rounding.
    #[serde(default)]
    pub simd_width: Option<usize>,

    /// L1 cache-blocking budget in bytes.
    #[serde(default = "default_l1_blocking_bytes")]
    pub l1_blocking_bytes: usize,

    /// Worker threads for [`Config::build_pool`]; rayon's default when unset.
    #[serde(default)]
    pub threads: Option<usize>,

    /// Admit zero batch size or channels as an empty tensor.
    #[serde(default)]
    pub allow_empty: bool,
}

fn default_version() -> u32 {
    1
}
fn default_backend() -> String {
    "auto".to_string()
}
fn default_l1_blocking_bytes() -> usize {
    DEFAULT_L1_BLOCKING_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            backend: default_backend(),
            simd_width: None,
            l1_blocking_bytes: default_l1_blocking_bytes(),
            threads: None,
            allow_empty: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .map_err(|_| Error::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parses configuration from a YAML string.
    ///
    /// Parse errors carry the offending line number.
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml_ng::from_str(yaml).map_err(|e| {
            let line = e.location().map(|l| l.line()).unwrap_or(0);
            Error::ConfigParse {
                line,
                message: e.to_string(),
            }
        })
    }

    /// Loads configuration with fallback to defaults.
    #[must_use]
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Applies `RELU_GRAD_*` overrides from the process environment.
    pub fn with_env(self) -> Result<Self> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps full variable names
    /// (`RELU_GRAD_BACKEND`, `RELU_GRAD_SIMD_WIDTH`, `RELU_GRAD_L1_BLOCKING_BYTES`,
    /// `RELU_GRAD_THREADS`, `RELU_GRAD_ALLOW_EMPTY`) to values.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(backend) = var("BACKEND") {
            self.backend = backend;
        }
        if let Some(width) = var("SIMD_WIDTH") {
            self.simd_width = Some(parse_env("SIMD_WIDTH", &width)?);
        }
        if let Some(bytes) = var("L1_BLOCKING_BYTES") {
            self.l1_blocking_bytes = parse_env("L1_BLOCKING_BYTES", &bytes)?;
        }
        if let Some(threads) = var("THREADS") {
            self.threads = Some(parse_env("THREADS", &threads)?);
        }
        if let Some(allow) = var("ALLOW_EMPTY") {
            self.allow_empty = parse_env("ALLOW_EMPTY", &allow)?;
        }

        Ok(self)
    }

    /// Resolves the configured backend.
    pub fn kernel_backend(&self) -> Result<KernelBackend> {
        if self.backend.trim().eq_ignore_ascii_case("auto") {
            return Ok(KernelBackend::detect());
        }

        KernelBackend::from_name(&self.backend).ok_or_else(|| Error::ConfigInvalid {
            key: "backend".to_string(),
            message: format!("unknown backend '{}'", self.backend),
        })
    }

    /// Builds the capability set described by this configuration.
    pub fn hardware_info(&self) -> Result<HardwareInfo> {
        let backend = self.kernel_backend()?;
        let mut info =
            HardwareInfo::for_backend(backend)?.with_l1_blocking_bytes(self.l1_blocking_bytes)?;
        if let Some(width) = self.simd_width {
            info = info.with_simd_width(width)?;
        }

        log::info!("configured {:?}", info);
        Ok(info)
    }

    /// The shape validator described by this configuration.
    #[must_use]
    pub fn validator(&self) -> ShapeValidator {
        ShapeValidator {
            allow_empty: self.allow_empty,
        }
    }

    /// Builds an engine from this configuration.
    pub fn engine(&self) -> Result<GradientEngine> {
        Ok(GradientEngine::new(self.hardware_info()?).with_validator(self.validator()))
    }

    /// Builds a dedicated worker pool.
    pub fn build_pool(&self) -> Result<rayon::ThreadPool> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("relu-grad-{i}"));
        if let Some(threads) = self.threads {
            if threads == 0 {
                return Err(Error::ConfigInvalid {
                    key: "threads".to_string(),
                    message: "must be positive".to_string(),
                });
            }
            builder = builder.num_threads(threads);
        }

        let pool = builder.build().map_err(|e| Error::ThreadPool(e.to_string()))?;
        log::info!("thread pool initialized with {} threads", pool.current_num_threads());
        Ok(pool)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| Error::ConfigInvalid {
        key: format!("{ENV_PREFIX}{name}"),
        message: e.to_string(),
    })
}
