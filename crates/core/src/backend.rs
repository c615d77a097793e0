//! Inference backend configuration: CUDA EP and TensorRT EP.
//!
//! Provides [`InferenceBackend`] and [`build_session`] to create an
//! `ort::Session` bound to a specific GPU. This tool requires a GPU: if the
//! requested execution provider cannot be registered, session construction
//! fails instead of falling back to CPU.

use std::path::Path;

use anyhow::{Context, Result};
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info};

use crate::error::ErrorKind;

/// Inference backend selection. `Tensorrt` requires the TensorRT runtime
/// libraries and caches built engines under `trt_cache_dir`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum InferenceBackend {
    #[default]
    Cuda,
    Tensorrt,
}

impl InferenceBackend {
    /// Parse from string (case-insensitive). Returns `Cuda` for unknown values.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "tensorrt" | "trt" => Self::Tensorrt,
            _ => Self::Cuda,
        }
    }
}

impl std::fmt::Display for InferenceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Tensorrt => write!(f, "tensorrt"),
        }
    }
}

pub struct SessionConfig<'a> {
    pub weights_path: &'a Path,
    pub backend: &'a InferenceBackend,
    pub device_id: i32,
    pub trt_cache_dir: Option<&'a Path>,
}

/// Build an `ort::Session` for the configured backend and GPU.
///
/// Device unavailability is a fatal device error; unreadable or malformed
/// weights are a configuration error.
pub fn build_session(config: &SessionConfig<'_>) -> Result<Session> {
    let cuda = CUDAExecutionProvider::default();
    if !cuda.is_available().unwrap_or(false) {
        return Err(anyhow::Error::new(ErrorKind::Device))
            .with_context(|| format!("CUDA device {} is not available", config.device_id));
    }

    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    let builder = match config.backend {
        InferenceBackend::Tensorrt => {
            let cache_dir = config
                .trt_cache_dir
                .unwrap_or_else(|| Path::new("trt_cache"));
            std::fs::create_dir_all(cache_dir).with_context(|| {
                format!("failed to create TRT cache directory: {}", cache_dir.display())
            })?;

            info!(
                backend = "tensorrt",
                device_id = config.device_id,
                cache_dir = %cache_dir.display(),
                "building session with TensorRT EP (first run may take several minutes)"
            );

            let cache_path = cache_dir.to_string_lossy().to_string();
            builder.with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_engine_cache(true)
                    .with_engine_cache_path(&cache_path)
                    .with_device_id(config.device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(config.device_id)
                    .build(),
            ])?
        }
        InferenceBackend::Cuda => {
            debug!(
                backend = "cuda",
                device_id = config.device_id,
                "building session with CUDA EP"
            );

            builder.with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(config.device_id)
                .build()
                .error_on_failure()])?
        }
    };

    builder
        .commit_from_file(config.weights_path)
        .context(ErrorKind::Configuration)
        .with_context(|| {
            format!(
                "failed to load model weights: {}",
                config.weights_path.display()
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str_lossy() {
        assert_eq!(
            InferenceBackend::from_str_lossy("cuda"),
            InferenceBackend::Cuda
        );
        assert_eq!(
            InferenceBackend::from_str_lossy("tensorrt"),
            InferenceBackend::Tensorrt
        );
        assert_eq!(
            InferenceBackend::from_str_lossy("TRT"),
            InferenceBackend::Tensorrt
        );
        assert_eq!(
            InferenceBackend::from_str_lossy("unknown"),
            InferenceBackend::Cuda
        );
    }

    #[test]
    fn test_backend_default_and_display() {
        assert_eq!(InferenceBackend::default(), InferenceBackend::Cuda);
        assert_eq!(InferenceBackend::Cuda.to_string(), "cuda");
        assert_eq!(InferenceBackend::Tensorrt.to_string(), "tensorrt");
    }

    #[test]
    fn test_session_config_holds_device_id() {
        let config = SessionConfig {
            weights_path: Path::new("flownet.onnx"),
            backend: &InferenceBackend::Cuda,
            device_id: 1,
            trt_cache_dir: None,
        };
        assert_eq!(config.device_id, 1);
        assert_eq!(config.backend, &InferenceBackend::Cuda);
    }
}
