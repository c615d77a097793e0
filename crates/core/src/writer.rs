//! Output image persistence.
//!
//! Each adjacent frame pair produces three JPEGs in the video's output
//! directory: the pair's second frame as a reference image (`flow_i_*`), the
//! quantized horizontal channel (`flow_x_*`), and the quantized vertical
//! channel (`flow_y_*`), sharing a 6-digit 1-based sequence index.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{GrayImage, RgbImage};

use crate::error::ErrorKind;
use crate::quantize::QuantizedChannel;
use crate::types::Frame;

pub fn reference_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("flow_i_{index:06}.jpg"))
}

pub fn channel_x_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("flow_x_{index:06}.jpg"))
}

pub fn channel_y_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("flow_y_{index:06}.jpg"))
}

fn save_frame(frame: &Frame, path: &Path) -> Result<()> {
    match frame {
        Frame::Gray {
            data,
            width,
            height,
        } => {
            let img = GrayImage::from_raw(*width, *height, data.clone())
                .context("frame buffer does not match its dimensions")?;
            img.save(path)?;
        }
        Frame::Rgb {
            data,
            width,
            height,
        } => {
            let img = RgbImage::from_raw(*width, *height, data.clone())
                .context("frame buffer does not match its dimensions")?;
            img.save(path)?;
        }
    }
    Ok(())
}

fn save_channel(channel: &QuantizedChannel, path: &Path) -> Result<()> {
    let (h, w) = channel.pixels.dim();
    let data: Vec<u8> = channel.pixels.iter().copied().collect();
    let img = GrayImage::from_raw(w as u32, h as u32, data)
        .context("channel buffer does not match its dimensions")?;
    img.save(path)?;
    Ok(())
}

/// Write the triple for pair `index` (1-based). A failure aborts the video's
/// remaining writes at the call site.
pub fn write_pair_outputs(
    dir: &Path,
    index: usize,
    reference: &Frame,
    channel_x: &QuantizedChannel,
    channel_y: &QuantizedChannel,
) -> Result<()> {
    save_frame(reference, &reference_path(dir, index))
        .context(ErrorKind::Encode)
        .with_context(|| format!("failed to write reference image for pair {index}"))?;
    save_channel(channel_x, &channel_x_path(dir, index))
        .context(ErrorKind::Encode)
        .with_context(|| format!("failed to write x channel for pair {index}"))?;
    save_channel(channel_y, &channel_y_path(dir, index))
        .context(ErrorKind::Encode)
        .with_context(|| format!("failed to write y channel for pair {index}"))?;
    Ok(())
}
