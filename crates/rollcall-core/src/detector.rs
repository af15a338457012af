//! Face detection boundary.
//!
//! Detection itself is an external capability; the core only needs boxes.
//! [`FullFrameDetector`] covers inputs that are already face crops.

use crate::types::BoundingBox;
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("detector rejected frame: {0}")]
    InvalidFrame(String),
    #[error("detection failed: {0}")]
    Failed(String),
}

/// Produces zero or more face boxes for a frame.
pub trait FaceDetector {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectionError>;
}

/// Reports the whole frame as a single face.
///
/// Used for enrollment photos (one subject per image) and for kiosk cameras
/// framed on a single face when no detector model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullFrameDetector;

impl FaceDetector for FullFrameDetector {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectionError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectionError::InvalidFrame(format!("empty frame {width}x{height}")));
        }
        Ok(vec![BoundingBox {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            confidence: 1.0,
        }])
    }
}

/// Copy the region under `face` out of `frame`, clamped to the frame.
///
/// `None` when the box lies entirely outside the frame.
pub fn crop_face(frame: &GrayImage, face: &BoundingBox) -> Option<GrayImage> {
    let (x, y, width, height) = face.clamp_to(frame.width(), frame.height())?;
    Some(image::imageops::crop_imm(frame, x, y, width, height).to_image())
}
