//! Captured frames and raw-buffer conversion to 8-bit grayscale.

use image::GrayImage;

/// Pixels below this value count as dark.
const DARK_PIXEL: u8 = 32;

/// Fraction of dark pixels above which a whole frame is considered dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;

/// One grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Row-major luminance, `width * height` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_RATIO);
        Self {
            data,
            width,
            height,
            sequence,
            is_dark,
        }
    }

    pub fn into_image(self) -> Result<GrayImage, FrameError> {
        let expected = (self.width * self.height) as usize;
        let actual = self.data.len();
        GrayImage::from_raw(self.width, self.height, self.data)
            .ok_or(FrameError::InvalidLength { expected, actual })
    }
}

/// Keep the Y channel of packed YUYV 4:2:2 (`[Y0, U, Y1, V]`).
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Keep the high byte of 16-bit little-endian grayscale.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

pub fn grey_to_grayscale(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(grey[..expected].to_vec())
}

/// True when more than `threshold_pct` of pixels are below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < DARK_PIXEL).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
