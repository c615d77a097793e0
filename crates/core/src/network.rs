//! Network instantiation: template → transient description → loaded session.
//!
//! A [`NetworkInstance`] is resolution-specific. The fixed-architecture flow
//! network cannot run at arbitrary sizes, so the instance realizes the
//! adapted resolution itself: input tensors are bilinearly resampled
//! target→adapted before the forward pass, and the flow output is resampled
//! back with its displacement components rescaled by the per-axis scale
//! factors. The inference engine on top of this never touches pixels.
//!
//! Exactly one instance is alive at a time; replacing it drops the previous
//! session and its device resources first.

use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{Array4, ArrayD, ArrayView2, ArrayViewMut2, Ix4};
use ort::{session::Session, value::Tensor};
use tracing::{debug, info};

use crate::backend::{build_session, SessionConfig};
use crate::descriptor::{self, NetworkManifest};
use crate::error::ErrorKind;
use crate::infer::{Activation, ForwardPass};
use crate::shape::ResolutionParams;

pub struct NetworkInstance {
    session: Session,
    manifest: NetworkManifest,
    /// The two frame input slots, in the order the session declares them.
    input_names: [String; 2],
    /// All declared output names, collected once for activation extraction.
    output_names: Vec<String>,
}

impl NetworkInstance {
    /// Materialize the description template for `params` and load the
    /// inference engine with the model weights.
    pub fn instantiate(
        template_path: &Path,
        params: &ResolutionParams,
        session_config: &SessionConfig<'_>,
    ) -> Result<Self> {
        // The artifact handle keeps the rendered description on disk for the
        // duration of this call only.
        let (_artifact, manifest) = descriptor::materialize(template_path, params)?;

        let session = build_session(session_config)?;

        let session_inputs: Vec<String> = session
            .inputs()
            .iter()
            .map(|input| input.name().to_string())
            .collect();
        if session_inputs.len() != 2 {
            return Err(anyhow::Error::new(ErrorKind::Configuration)).with_context(|| {
                format!(
                    "flow network must declare exactly 2 inputs, model declares {}",
                    session_inputs.len()
                )
            });
        }
        if session_inputs != manifest.inputs {
            debug!(
                model = ?session_inputs,
                description = ?manifest.inputs,
                "input slot names differ from description; binding in model order"
            );
        }

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|output| output.name().to_string())
            .collect();
        if !output_names.iter().any(|name| *name == manifest.flow_output) {
            return Err(anyhow::Error::new(ErrorKind::Configuration)).with_context(|| {
                format!(
                    "model does not declare flow output '{}' (has: {})",
                    manifest.flow_output,
                    output_names.join(", ")
                )
            });
        }

        info!(
            target_width = manifest.target_width,
            target_height = manifest.target_height,
            adapted_width = manifest.adapted_width,
            adapted_height = manifest.adapted_height,
            "network instantiated"
        );

        let input_names = [session_inputs[0].clone(), session_inputs[1].clone()];
        Ok(Self {
            session,
            manifest,
            input_names,
            output_names,
        })
    }

    pub fn manifest(&self) -> &NetworkManifest {
        &self.manifest
    }

    /// Resample a [1,C,H,W] tensor to the adapted resolution, if needed.
    fn to_adapted(&self, tensor: &ArrayD<f32>) -> Result<Array4<f32>> {
        let tensor = tensor
            .view()
            .into_dimensionality::<Ix4>()
            .context("input tensor must be [1,C,H,W]")?;
        let (h, w) = (tensor.shape()[2], tensor.shape()[3]);
        let (ah, aw) = (
            self.manifest.adapted_height as usize,
            self.manifest.adapted_width as usize,
        );

        if (h, w) == (ah, aw) {
            return Ok(tensor.to_owned());
        }
        Ok(resample_nchw(&tensor.to_owned(), ah, aw))
    }

    /// Bring the raw flow activation back to target resolution, rescaling
    /// displacement magnitudes by the per-axis scale factors.
    fn flow_to_target(&self, flow: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let flow = flow
            .view()
            .into_dimensionality::<Ix4>()
            .context("flow output must be [1,2,H,W]")?;
        let (th, tw) = (
            self.manifest.target_height as usize,
            self.manifest.target_width as usize,
        );

        let mut resampled = if (flow.shape()[2], flow.shape()[3]) == (th, tw) {
            flow.to_owned()
        } else {
            resample_nchw(&flow.to_owned(), th, tw)
        };

        let scale_x = self.manifest.scale_width as f32;
        let scale_y = self.manifest.scale_height as f32;
        resampled
            .index_axis_mut(ndarray::Axis(1), 0)
            .mapv_inplace(|v| v * scale_x);
        resampled
            .index_axis_mut(ndarray::Axis(1), 1)
            .mapv_inplace(|v| v * scale_y);

        Ok(resampled.into_dyn())
    }
}

impl ForwardPass for NetworkInstance {
    fn flow_output(&self) -> &str {
        &self.manifest.flow_output
    }

    fn forward(&mut self, prev: &ArrayD<f32>, cur: &ArrayD<f32>) -> Result<Vec<Activation>> {
        let prev_adapted = self.to_adapted(prev)?;
        let cur_adapted = self.to_adapted(cur)?;

        let prev_tensor = Tensor::from_array(prev_adapted)?;
        let cur_tensor = Tensor::from_array(cur_adapted)?;

        let name0 = self.input_names[0].as_str();
        let name1 = self.input_names[1].as_str();
        let outputs = self
            .session
            .run(ort::inputs![name0 => &prev_tensor, name1 => &cur_tensor])?;

        let mut activations = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let values = match outputs[name.as_str()].try_extract_array::<f32>() {
                Ok(view) => view.to_owned(),
                Err(error) => {
                    if *name == self.manifest.flow_output {
                        return Err(error).with_context(|| {
                            format!("flow output '{name}' is not an f32 tensor")
                        });
                    }
                    debug!(output = %name, %error, "skipping non-f32 activation");
                    continue;
                }
            };
            activations.push(Activation {
                name: name.clone(),
                values,
            });
        }
        drop(outputs);

        for activation in &mut activations {
            if activation.name == self.manifest.flow_output {
                activation.values = self.flow_to_target(&activation.values)?;
            }
        }

        Ok(activations)
    }
}

/// Bilinear resample of a [1,C,H,W] tensor to `dst_h` × `dst_w`.
fn resample_nchw(src: &Array4<f32>, dst_h: usize, dst_w: usize) -> Array4<f32> {
    let channels = src.shape()[1];
    let mut dst = Array4::<f32>::zeros((1, channels, dst_h, dst_w));
    for c in 0..channels {
        resample_plane(
            src.index_axis(ndarray::Axis(0), 0).index_axis(ndarray::Axis(0), c),
            dst.index_axis_mut(ndarray::Axis(0), 0)
                .index_axis_mut(ndarray::Axis(0), c),
        );
    }
    dst
}

fn resample_plane(src: ArrayView2<'_, f32>, mut dst: ArrayViewMut2<'_, f32>) {
    let (src_h, src_w) = src.dim();
    let (dst_h, dst_w) = dst.dim();

    for dst_y in 0..dst_h {
        // Map destination pixel center to source coordinates
        let src_yf = (dst_y as f64 + 0.5) * src_h as f64 / dst_h as f64 - 0.5;
        let src_y0 = src_yf.floor().max(0.0) as usize;
        let src_y1 = (src_y0 + 1).min(src_h - 1);
        let fy = (src_yf - src_y0 as f64).clamp(0.0, 1.0);

        for dst_x in 0..dst_w {
            let src_xf = (dst_x as f64 + 0.5) * src_w as f64 / dst_w as f64 - 0.5;
            let src_x0 = src_xf.floor().max(0.0) as usize;
            let src_x1 = (src_x0 + 1).min(src_w - 1);
            let fx = (src_xf - src_x0 as f64).clamp(0.0, 1.0);

            let p00 = src[[src_y0, src_x0]] as f64;
            let p10 = src[[src_y0, src_x1]] as f64;
            let p01 = src[[src_y1, src_x0]] as f64;
            let p11 = src[[src_y1, src_x1]] as f64;

            let top = p00 * (1.0 - fx) + p10 * fx;
            let bot = p01 * (1.0 - fx) + p11 * fx;
            dst[[dst_y, dst_x]] = (top * (1.0 - fy) + bot * fy) as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_resample_plane_constant_field() {
        let src = Array2::from_elem((4, 4), 7.5f32);
        let mut dst = Array2::zeros((64, 96));
        resample_plane(src.view(), dst.view_mut());
        assert!(dst.iter().all(|&v| (v - 7.5).abs() < 1e-6));
    }

    #[test]
    fn test_resample_plane_identity() {
        let src = Array2::from_shape_fn((3, 5), |(y, x)| (y * 5 + x) as f32);
        let mut dst = Array2::zeros((3, 5));
        resample_plane(src.view(), dst.view_mut());
        assert_eq!(src, dst);
    }

    #[test]
    fn test_resample_nchw_preserves_channel_count() {
        let src = Array4::from_elem((1, 2, 8, 8), 1.0f32);
        let dst = resample_nchw(&src, 16, 12);
        assert_eq!(dst.shape(), &[1, 2, 16, 12]);
    }

    #[test]
    fn test_resample_plane_is_interpolating() {
        // Values stay within the source min/max under bilinear weights.
        let src = Array2::from_shape_fn((8, 8), |(y, x)| (y as f32) * 10.0 + x as f32);
        let mut dst = Array2::zeros((13, 17));
        resample_plane(src.view(), dst.view_mut());
        let (min, max) = src.iter().fold((f32::MAX, f32::MIN), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
        assert!(dst.iter().all(|&v| v >= min && v <= max));
    }
}
