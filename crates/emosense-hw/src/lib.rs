//! emosense-hw — Hardware abstraction for camera capture.
//!
//! Provides scoped V4L2 single-frame capture and pixel-format conversion.

pub mod camera;
pub mod frame;

pub use camera::{capture_once, Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError, FrameFormat};
