//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("not a video capture device: {0}")]
    NotCaptureDevice(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// A discovered V4L2 capture device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: u32,
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel formats the camera can be negotiated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, two bytes per pixel.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    /// Convert one raw driver buffer to `width * height` luminance bytes.
    pub fn to_grayscale(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, frame::FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_grayscale(buf, width, height),
            Self::Grey => frame::grey_to_grayscale(buf, width, height),
            Self::Y16 => frame::y16_to_grayscale(buf, width, height),
        }
    }
}

/// Device node for a camera index, e.g. `0` → `/dev/video0`.
pub fn device_path(index: u32) -> String {
    format!("/dev/video{index}")
}

/// An open camera with a running capture stream.
pub struct Camera {
    // Declared before `device` so buffers are released first.
    stream: MmapStream<'static>,
    #[allow(dead_code)]
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub pixel_format: PixelFormat,
}

impl Camera {
    pub fn open_index(index: u32) -> Result<Self, CameraError> {
        Self::open(&device_path(index))
    }

    /// Open a device node, negotiate a grayscale-convertible format and start
    /// streaming.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
                CameraError::DeviceBusy(device_path.to_string())
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCaptureDevice(device_path.to_string()));
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "camera opened"
        );

        Ok(Self {
            stream,
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Block until the driver hands over the next frame.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let gray = self
            .pixel_format
            .to_grayscale(buf, self.width, self.height)
            .map_err(|e| CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format)))?;

        Ok(Frame::new(gray, self.width, self.height, meta.sequence))
    }

    /// Next frame that is not dark, giving up after `max_attempts` and
    /// returning the last dark frame instead.
    pub fn next_lit_frame(&mut self, max_attempts: usize) -> Result<Frame, CameraError> {
        let mut frame = self.next_frame()?;
        let mut attempts = 1;
        while frame.is_dark && attempts < max_attempts {
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            frame = self.next_frame()?;
            attempts += 1;
        }
        Ok(frame)
    }

    /// Read and drop `count` frames so auto-exposure can settle.
    pub fn warm_up(&mut self, count: usize) -> Result<(), CameraError> {
        for _ in 0..count {
            self.next_frame()?;
        }
        tracing::debug!(frames = count, device = %self.device_path, "camera warm-up done");
        Ok(())
    }

    /// List V4L2 video capture devices among `/dev/video0`..`/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for index in 0..16 {
            let path = device_path(index);
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                index,
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path() {
        assert_eq!(device_path(0), "/dev/video0");
        assert_eq!(device_path(12), "/dev/video12");
    }

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_pixel_format_dispatch() {
        let buf = [10u8, 20, 30, 40];
        assert_eq!(PixelFormat::Yuyv.to_grayscale(&buf, 2, 1).unwrap(), vec![10, 30]);
        assert_eq!(PixelFormat::Y16.to_grayscale(&buf, 2, 1).unwrap(), vec![20, 40]);
        assert_eq!(PixelFormat::Grey.to_grayscale(&buf, 2, 2).unwrap(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            Camera::open("/dev/rollcall-no-such-camera"),
            Err(CameraError::DeviceNotFound(_))
        ));
    }
}
