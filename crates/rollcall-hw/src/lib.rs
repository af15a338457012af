//! rollcall-hw: Camera capture for the attendance recognizer.
//!
//! Opens V4L2 capture devices, keeps a memory-mapped stream running, and
//! converts whatever the driver negotiates into 8-bit grayscale frames.

pub mod camera;
pub mod frame;

pub use camera::{device_path, Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
