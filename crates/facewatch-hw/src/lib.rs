//! facewatch-hw: frame capture from V4L2 cameras and HTTP MJPEG streams.
//!
//! Both sources deliver RGB frames through the [`FrameSource`] trait.

pub mod camera;
pub mod frame;
pub mod source;
pub mod stream;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::Frame;
pub use source::{FrameSource, SourceError, SourceLocator, SourceProperties};
pub use stream::{HttpStream, StreamError};
