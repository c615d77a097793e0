use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::InferenceBackend;
use crate::error::ErrorKind;
use crate::infer::NanPolicy;

pub const DEFAULT_BOUND: f32 = 20.0;

/// Extraction settings. Loaded from an optional TOML file; CLI flags
/// override individual fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractConfig {
    /// Truncation bound for flow quantization, in network-native units.
    pub bound: f32,
    /// GPU device index.
    pub gpu: i32,
    /// "cuda" or "tensorrt".
    pub backend: String,
    /// "use-anyway" or "abort".
    pub nan_policy: String,
    pub trt_cache_dir: PathBuf,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            bound: DEFAULT_BOUND,
            gpu: 0,
            backend: "cuda".to_string(),
            nan_policy: "use-anyway".to_string(),
            trt_cache_dir: PathBuf::from("trt_cache"),
        }
    }
}

impl ExtractConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .context(ErrorKind::Configuration)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw)
            .context(ErrorKind::Configuration)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))
    }

    pub fn backend(&self) -> InferenceBackend {
        InferenceBackend::from_str_lossy(&self.backend)
    }

    pub fn nan_policy(&self) -> NanPolicy {
        NanPolicy::from_str_lossy(&self.nan_policy)
    }

    /// The quantization range implied by `bound`. A non-positive bound is a
    /// configuration error, fatal at startup.
    pub fn quantization_range(&self) -> Result<(f32, f32)> {
        if !(self.bound > 0.0) {
            return Err(anyhow::Error::new(ErrorKind::Configuration))
                .with_context(|| format!("bound must be positive, got {}", self.bound));
        }
        Ok((-self.bound, self.bound))
    }
}
