use ndarray::Array3;

/// A single decoded frame. Raw CPU bytes from FFmpeg, immutable once decoded.
#[derive(Clone, Debug)]
pub enum Frame {
    /// Single-channel luma (`gray` pixel format), row-major H×W.
    Gray {
        data: Vec<u8>,
        width: u32,
        height: u32,
    },
    /// Interleaved RGB24, row-major H×W×3.
    Rgb {
        data: Vec<u8>,
        width: u32,
        height: u32,
    },
}

impl Frame {
    pub fn width(&self) -> u32 {
        match self {
            Frame::Gray { width, .. } | Frame::Rgb { width, .. } => *width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Frame::Gray { height, .. } | Frame::Rgb { height, .. } => *height,
        }
    }

    pub fn channels(&self) -> u32 {
        match self {
            Frame::Gray { .. } => 1,
            Frame::Rgb { .. } => 3,
        }
    }
}

/// Per-pixel 2-component displacement field in network-native units,
/// H×W×2 with component 0 = dx, component 1 = dy.
pub type FlowField = Array3<f32>;
