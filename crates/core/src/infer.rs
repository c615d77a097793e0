//! Frame-pair inference: tensor layout, forward pass, NaN retry loop.
//!
//! The underlying inference engine exhibits non-deterministic numerical
//! instability: a forward pass occasionally produces NaN activations, and an
//! immediate retry with identical inputs usually succeeds. The retry loop is
//! bounded at [`MAX_ATTEMPTS`]; what happens when every attempt is anomalous
//! is an explicit policy, never an unbounded loop.

use anyhow::{Context, Result};
use ndarray::{s, Array3, ArrayD, Ix4};
use serde::Deserialize;
use tracing::warn;

use crate::error::ErrorKind;
use crate::types::{FlowField, Frame};

/// Total forward-pass attempts per frame pair.
pub const MAX_ATTEMPTS: u32 = 5;

/// Terminal policy when all attempts still contain NaNs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NanPolicy {
    /// Keep the last (anomalous) result. Matches the historical behavior of
    /// the extraction pipeline; bad data propagates into the outputs.
    #[default]
    UseAnyway,
    /// Fail the frame pair with an inference error.
    Abort,
}

impl NanPolicy {
    /// Parse from string (case-insensitive). Returns `UseAnyway` for unknown
    /// values.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Self::Abort,
            _ => Self::UseAnyway,
        }
    }
}

impl std::fmt::Display for NanPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UseAnyway => write!(f, "use-anyway"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// A named output tensor from one forward pass.
pub struct Activation {
    pub name: String,
    pub values: ArrayD<f32>,
}

/// The seam between the retry loop and the loaded network. Implemented by
/// `NetworkInstance`; mocked in tests.
pub trait ForwardPass {
    /// Name of the designated flow-prediction output.
    fn flow_output(&self) -> &str;

    /// Run one forward pass over a `[1,C,H,W]` tensor pair, returning every
    /// named output activation. The flow output comes back at the input's
    /// resolution in network-native units.
    fn forward(&mut self, prev: &ArrayD<f32>, cur: &ArrayD<f32>) -> Result<Vec<Activation>>;
}

/// Convert a decoded frame into the network's `[1,C,H,W]` layout.
///
/// Grayscale becomes a 1-channel batch-of-one tensor; color is reordered
/// from interleaved H×W×C. Pixel values are kept in their native 0–255
/// range; no resampling happens here.
pub fn frame_to_tensor(frame: &Frame) -> ArrayD<f32> {
    let h = frame.height() as usize;
    let w = frame.width() as usize;

    match frame {
        Frame::Gray { data, .. } => {
            let mut tensor = ArrayD::zeros(vec![1, 1, h, w]);
            let slice = tensor.as_slice_mut().expect("fresh tensor is contiguous");
            for (dst, &src) in slice.iter_mut().zip(data.iter()) {
                *dst = src as f32;
            }
            tensor
        }
        Frame::Rgb { data, .. } => {
            let hw = h * w;
            let mut tensor = ArrayD::zeros(vec![1, 3, h, w]);
            let slice = tensor.as_slice_mut().expect("fresh tensor is contiguous");
            for i in 0..hw {
                slice[i] = data[i * 3] as f32;
                slice[hw + i] = data[i * 3 + 1] as f32;
                slice[2 * hw + i] = data[i * 3 + 2] as f32;
            }
            tensor
        }
    }
}

fn scan_for_nans(activations: &[Activation]) -> bool {
    let mut contains_nan = false;
    for activation in activations {
        if activation.values.iter().any(|v| v.is_nan()) {
            warn!(activation = %activation.name, "activation contains NaN");
            contains_nan = true;
        }
    }
    contains_nan
}

enum AttemptOutcome {
    Success(Vec<Activation>),
    Anomaly(Vec<Activation>),
}

/// Run inference for one adjacent frame pair.
///
/// Retries the forward pass up to [`MAX_ATTEMPTS`] times while any returned
/// activation contains NaNs, then applies `policy`. Returns the designated
/// flow output squeezed to H×W×2.
pub fn run_pair<F: ForwardPass>(
    prev: &Frame,
    cur: &Frame,
    network: &mut F,
    policy: NanPolicy,
) -> Result<FlowField> {
    let prev_tensor = frame_to_tensor(prev);
    let cur_tensor = frame_to_tensor(cur);

    let mut outcome = None;
    for attempt in 1..=MAX_ATTEMPTS {
        let activations = network.forward(&prev_tensor, &cur_tensor)?;

        if !scan_for_nans(&activations) {
            outcome = Some(AttemptOutcome::Success(activations));
            break;
        }

        warn!(attempt, max_attempts = MAX_ATTEMPTS, "found NaNs, retrying");
        outcome = Some(AttemptOutcome::Anomaly(activations));
    }

    let activations = match outcome.expect("at least one attempt runs") {
        AttemptOutcome::Success(activations) => activations,
        AttemptOutcome::Anomaly(activations) => match policy {
            NanPolicy::UseAnyway => {
                warn!(
                    max_attempts = MAX_ATTEMPTS,
                    "all attempts contained NaNs; using anomalous result"
                );
                activations
            }
            NanPolicy::Abort => {
                return Err(anyhow::Error::new(ErrorKind::Inference)).with_context(|| {
                    format!("forward pass still contained NaNs after {MAX_ATTEMPTS} attempts")
                });
            }
        },
    };

    extract_flow(activations, network.flow_output())
}

/// Pull the designated flow output, squeeze the batch dimension, and reorder
/// CHW → HWC.
fn extract_flow(activations: Vec<Activation>, flow_output: &str) -> Result<FlowField> {
    let flow = activations
        .into_iter()
        .find(|activation| activation.name == flow_output)
        .with_context(|| format!("forward pass did not produce flow output '{flow_output}'"))?;

    let values = flow
        .values
        .into_dimensionality::<Ix4>()
        .context("flow output must be [1,2,H,W]")?;
    if values.shape()[0] != 1 || values.shape()[1] != 2 {
        anyhow::bail!(
            "unexpected flow output shape {:?}, expected [1,2,H,W]",
            values.shape()
        );
    }

    let (h, w) = (values.shape()[2], values.shape()[3]);
    let mut field = Array3::zeros((h, w, 2));
    for component in 0..2 {
        field
            .slice_mut(s![.., .., component])
            .assign(&values.slice(s![0, component, .., ..]));
    }
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Forward pass that produces NaN activations for the first
    /// `nan_attempts` calls, then clean output.
    struct FlakyNetwork {
        calls: u32,
        nan_attempts: u32,
        height: usize,
        width: usize,
    }

    impl FlakyNetwork {
        fn new(nan_attempts: u32, height: usize, width: usize) -> Self {
            Self {
                calls: 0,
                nan_attempts,
                height,
                width,
            }
        }
    }

    impl ForwardPass for FlakyNetwork {
        fn flow_output(&self) -> &str {
            "predict_flow_final"
        }

        fn forward(&mut self, _prev: &ArrayD<f32>, _cur: &ArrayD<f32>) -> Result<Vec<Activation>> {
            self.calls += 1;
            let fill = if self.calls <= self.nan_attempts {
                f32::NAN
            } else {
                1.5
            };
            Ok(vec![
                Activation {
                    name: "conv1".to_string(),
                    values: ArrayD::from_elem(vec![1, 8, 4, 4], fill),
                },
                Activation {
                    name: "predict_flow_final".to_string(),
                    values: ArrayD::from_elem(vec![1, 2, self.height, self.width], fill),
                },
            ])
        }
    }

    fn gray_frame(w: u32, h: u32) -> Frame {
        Frame::Gray {
            data: vec![128u8; (w * h) as usize],
            width: w,
            height: h,
        }
    }

    #[test]
    fn test_gray_frame_becomes_single_channel_tensor() {
        let frame = Frame::Gray {
            data: vec![0, 64, 128, 255],
            width: 2,
            height: 2,
        };
        let tensor = frame_to_tensor(&frame);
        assert_eq!(tensor.shape(), &[1, 1, 2, 2]);
        assert_eq!(tensor[[0, 0, 1, 1]], 255.0);
    }

    #[test]
    fn test_rgb_frame_is_reordered_to_chw() {
        // 1x2 image: pixel0 = (10, 20, 30), pixel1 = (40, 50, 60)
        let frame = Frame::Rgb {
            data: vec![10, 20, 30, 40, 50, 60],
            width: 2,
            height: 1,
        };
        let tensor = frame_to_tensor(&frame);
        assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
        assert_eq!(tensor[[0, 0, 0, 0]], 10.0);
        assert_eq!(tensor[[0, 0, 0, 1]], 40.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 20.0);
        assert_eq!(tensor[[0, 2, 0, 1]], 60.0);
    }

    #[test]
    fn test_clean_pass_runs_once() {
        let mut network = FlakyNetwork::new(0, 4, 6);
        let flow = run_pair(
            &gray_frame(6, 4),
            &gray_frame(6, 4),
            &mut network,
            NanPolicy::UseAnyway,
        )
        .unwrap();
        assert_eq!(network.calls, 1);
        assert_eq!(flow.dim(), (4, 6, 2));
        assert_eq!(flow[[0, 0, 0]], 1.5);
    }

    #[test]
    fn test_transient_nans_retry_until_clean() {
        let mut network = FlakyNetwork::new(2, 4, 4);
        let flow = run_pair(
            &gray_frame(4, 4),
            &gray_frame(4, 4),
            &mut network,
            NanPolicy::Abort,
        )
        .unwrap();
        assert_eq!(network.calls, 3);
        assert!(flow.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_persistent_nans_stop_at_attempt_bound() {
        let mut network = FlakyNetwork::new(u32::MAX, 4, 4);
        let flow = run_pair(
            &gray_frame(4, 4),
            &gray_frame(4, 4),
            &mut network,
            NanPolicy::UseAnyway,
        )
        .unwrap();
        assert_eq!(network.calls, MAX_ATTEMPTS);
        // use-anyway keeps the anomalous result
        assert!(flow.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_abort_policy_fails_the_pair() {
        let mut network = FlakyNetwork::new(u32::MAX, 4, 4);
        let err = run_pair(
            &gray_frame(4, 4),
            &gray_frame(4, 4),
            &mut network,
            NanPolicy::Abort,
        )
        .unwrap_err();
        assert_eq!(network.calls, MAX_ATTEMPTS);
        assert_eq!(crate::error::kind_of(&err), Some(ErrorKind::Inference));
    }

    #[test]
    fn test_extract_flow_reorders_components() {
        let mut values = ArrayD::zeros(vec![1, 2, 2, 2]);
        values[[0, 0, 0, 1]] = 3.0; // dx at (y=0, x=1)
        values[[0, 1, 1, 0]] = -4.0; // dy at (y=1, x=0)
        let activations = vec![Activation {
            name: "flow".to_string(),
            values,
        }];

        let field = extract_flow(activations, "flow").unwrap();
        assert_eq!(field[[0, 1, 0]], 3.0);
        assert_eq!(field[[1, 0, 1]], -4.0);
    }

    #[test]
    fn test_extract_flow_rejects_wrong_channel_count() {
        let activations = vec![Activation {
            name: "flow".to_string(),
            values: ArrayD::zeros(vec![1, 3, 2, 2]),
        }];
        assert!(extract_flow(activations, "flow").is_err());
    }
}
