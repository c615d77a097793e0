//! Flow quantization: float displacement vectors → two 8-bit channel images.
//!
//! Each component is clipped to `[-bound, +bound]` and linearly rescaled to
//! `[0, 255]` with half-away-from-zero rounding, so a zero displacement lands
//! on 128. The channel assignment is swapped on purpose: the "x" image holds
//! the field's second component (dy) and the "y" image holds the first (dx).
//! Downstream consumers depend on that layout.

use anyhow::{Context, Result};
use ndarray::Array2;

use crate::error::ErrorKind;
use crate::types::FlowField;

/// One quantized flow axis, ready to encode as a grayscale image.
#[derive(Debug)]
pub struct QuantizedChannel {
    pub pixels: Array2<u8>,
}

fn quantize_value(v: f32, lower: f32, upper: f32) -> u8 {
    let q = (255.0 * (v - lower) / (upper - lower)).round();
    q.clamp(0.0, 255.0) as u8
}

fn quantize_component(flow: &FlowField, component: usize, lower: f32, upper: f32) -> Array2<u8> {
    let (h, w, _) = flow.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        quantize_value(flow[[y, x, component]], lower, upper)
    })
}

/// Quantize a flow field into the swapped (x, y) channel pair.
pub fn quantize(flow: &FlowField, lower: f32, upper: f32) -> Result<(QuantizedChannel, QuantizedChannel)> {
    if upper <= lower {
        return Err(anyhow::Error::new(ErrorKind::Configuration))
            .with_context(|| format!("invalid quantization bounds: [{lower}, {upper}]"));
    }

    let channel_x = quantize_component(flow, 1, lower, upper);
    let channel_y = quantize_component(flow, 0, lower, upper);

    Ok((
        QuantizedChannel { pixels: channel_x },
        QuantizedChannel { pixels: channel_y },
    ))
}
