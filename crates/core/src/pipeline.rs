//! The per-video extraction driver.
//!
//! One video at a time: decode the full frame sequence, run inference over
//! every adjacent pair in order, quantize, write the output triple. A video
//! whose output directory already exists is skipped wholesale — resumability
//! is per-video, keyed on directory existence, so an interrupted run leaves
//! a partial directory that later runs will not revisit.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::backend::{InferenceBackend, SessionConfig};
use crate::error::{self, ErrorKind};
use crate::infer::{self, NanPolicy};
use crate::network::NetworkInstance;
use crate::quantize;
use crate::shape::ResolutionParams;
use crate::types::{FlowField, Frame};
use crate::video;
use crate::writer;

/// Per-pair inference seam; implemented by [`PipelineState`], mocked in
/// tests.
pub trait FlowEstimator {
    fn flow_for_pair(&mut self, prev: &Frame, cur: &Frame) -> Result<FlowField>;
}

/// Explicit replacement for the cached module-level state of older flow
/// extractors: the current resolution and the one live network instance,
/// rebuilt whenever an incoming pair's dimensions change.
pub struct PipelineState {
    template_path: PathBuf,
    weights_path: PathBuf,
    backend: InferenceBackend,
    device_id: i32,
    trt_cache_dir: PathBuf,
    nan_policy: NanPolicy,
    current: Option<(ResolutionParams, NetworkInstance)>,
}

impl PipelineState {
    pub fn new(
        template_path: PathBuf,
        weights_path: PathBuf,
        backend: InferenceBackend,
        device_id: i32,
        trt_cache_dir: PathBuf,
        nan_policy: NanPolicy,
    ) -> Self {
        Self {
            template_path,
            weights_path,
            backend,
            device_id,
            trt_cache_dir,
            nan_policy,
            current: None,
        }
    }

    /// Instantiate (or re-instantiate) the network for `width` × `height`.
    /// The previous instance is released before the replacement is built.
    fn ensure_network(&mut self, width: u32, height: u32) -> Result<&mut NetworkInstance> {
        let needs_rebuild = match &self.current {
            Some((params, _)) => params.differs_from(width, height),
            None => true,
        };

        if needs_rebuild {
            self.current = None;

            let params = ResolutionParams::adapt(width, height);
            info!(
                width,
                height,
                adapted_width = params.adapted_width,
                adapted_height = params.adapted_height,
                "resolution changed, instantiating network"
            );

            let session_config = SessionConfig {
                weights_path: &self.weights_path,
                backend: &self.backend,
                device_id: self.device_id,
                trt_cache_dir: Some(&self.trt_cache_dir),
            };
            let instance =
                NetworkInstance::instantiate(&self.template_path, &params, &session_config)?;
            self.current = Some((params, instance));
        }

        Ok(&mut self.current.as_mut().expect("instance present").1)
    }
}

impl FlowEstimator for PipelineState {
    fn flow_for_pair(&mut self, prev: &Frame, cur: &Frame) -> Result<FlowField> {
        let policy = self.nan_policy;
        let network = self.ensure_network(prev.width(), prev.height())?;
        infer::run_pair(prev, cur, network, policy)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Run inference across every adjacent pair of `frames`, writing the output
/// triples into `out_dir`. Returns the number of pairs written.
pub fn process_video<E: FlowEstimator>(
    frames: &[Frame],
    out_dir: &Path,
    estimator: &mut E,
    lower: f32,
    upper: f32,
) -> Result<usize> {
    let mut pairs_written = 0;
    for (index, pair) in frames.windows(2).enumerate() {
        let flow = estimator.flow_for_pair(&pair[0], &pair[1])?;
        let (channel_x, channel_y) = quantize::quantize(&flow, lower, upper)?;
        writer::write_pair_outputs(out_dir, index + 1, &pair[1], &channel_x, &channel_y)?;
        pairs_written += 1;
    }
    Ok(pairs_written)
}

fn video_output_dir(output_dir: &Path, video_path: &Path) -> Option<PathBuf> {
    let stem = video_path.file_stem()?;
    Some(output_dir.join(stem))
}

/// Process every video file in `input_dir`, in directory-listing order.
///
/// Per-video failures are logged and skipped; configuration and device
/// errors abort the whole run.
pub fn extract_directory<E: FlowEstimator>(
    input_dir: &Path,
    output_dir: &Path,
    estimator: &mut E,
    lower: f32,
    upper: f32,
) -> Result<RunSummary> {
    let entries = std::fs::read_dir(input_dir)
        .context(ErrorKind::Configuration)
        .with_context(|| format!("cannot read input directory: {}", input_dir.display()))?;

    let mut summary = RunSummary::default();
    for (index, entry) in entries.enumerate() {
        let entry = entry.context("failed to read directory entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let out_dir = match video_output_dir(output_dir, &path) {
            Some(dir) => dir,
            None => continue,
        };
        if out_dir.exists() {
            info!(index, video = %name, "output directory exists, skipping");
            summary.skipped += 1;
            continue;
        }

        info!(index, video = %name, "processing");
        match extract_one_video(&path, &out_dir, estimator, lower, upper) {
            Ok(pairs) => {
                info!(index, video = %name, pairs, "done");
                summary.processed += 1;
            }
            Err(err) if error::is_fatal(&err) => {
                return Err(err).with_context(|| format!("fatal error on video '{name}'"));
            }
            Err(err) => {
                warn!(index, video = %name, error = %format!("{err:#}"), "video failed, continuing");
                summary.failed += 1;
            }
        }
    }

    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        "batch complete"
    );
    Ok(summary)
}

fn extract_one_video<E: FlowEstimator>(
    video_path: &Path,
    out_dir: &Path,
    estimator: &mut E,
    lower: f32,
    upper: f32,
) -> Result<usize> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("cannot create output directory: {}", out_dir.display()))?;

    let frames = video::decode_all_frames(video_path)?;
    process_video(&frames, out_dir, estimator, lower, upper)
}
