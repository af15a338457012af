//! Camera-backed frame source and a log-only display sink.

use image::GrayImage;
use rollcall_core::source::{Annotation, FrameSink, FrameSource, SourceError};
use rollcall_hw::Camera;

/// Consecutive dark frames skipped before one is handed over anyway, so the
/// loop still gets to check its stop flag in a dark room.
const MAX_DARK_SKIP: usize = 30;

pub struct CameraSource {
    camera: Camera,
    skip_dark: bool,
}

impl CameraSource {
    pub fn open(index: u32, warmup_frames: usize, skip_dark: bool) -> Result<Self, SourceError> {
        let mut camera = Camera::open_index(index).map_err(|e| SourceError::Open(e.to_string()))?;
        camera
            .warm_up(warmup_frames)
            .map_err(|e| SourceError::Open(format!("warm-up: {e}")))?;
        Ok(Self { camera, skip_dark })
    }
}

impl FrameSource for CameraSource {
    fn read(&mut self) -> Result<GrayImage, SourceError> {
        let frame = if self.skip_dark {
            self.camera.next_lit_frame(MAX_DARK_SKIP)
        } else {
            self.camera.next_frame()
        }
        .map_err(|e| SourceError::Device(e.to_string()))?;

        frame
            .into_image()
            .map_err(|e| SourceError::Device(e.to_string()))
    }
}

/// Logs who is in view whenever that changes.
#[derive(Debug, Default)]
pub struct LogSink {
    in_view: Vec<String>,
}

impl FrameSink for LogSink {
    fn present(&mut self, _frame: &GrayImage, annotations: &[Annotation]) {
        let mut captions: Vec<String> = annotations.iter().map(Annotation::caption).collect();
        captions.sort();
        if captions != self.in_view {
            tracing::info!(faces = ?captions, "in view");
            self.in_view = captions;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::source::Label;
    use rollcall_core::BoundingBox;

    #[test]
    fn test_log_sink_tracks_changes() {
        let frame = GrayImage::new(2, 2);
        let face = BoundingBox { x: 0.0, y: 0.0, width: 2.0, height: 2.0, confidence: 1.0 };
        let unknown = Annotation { face, label: Label::Unknown };

        let mut sink = LogSink::default();
        sink.present(&frame, &[unknown]);
        assert_eq!(sink.in_view, vec!["Unknown".to_string()]);

        sink.present(&frame, &[]);
        assert!(sink.in_view.is_empty());
    }
}
