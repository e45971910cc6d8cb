//! Frame sources: a common trait over camera devices and network streams.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use crate::stream::{HttpStream, StreamError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("stream: {0}")]
    Stream(#[from] StreamError),
    #[error("end of stream")]
    EndOfStream,
    #[error("invalid source: {0}")]
    InvalidSource(String),
}

/// Properties a source reports after opening. `None` means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceProperties {
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// A supplier of sequential video frames.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn read(&mut self) -> Result<Frame, SourceError>;

    fn properties(&self) -> SourceProperties;

    /// Release the underlying device or connection. Safe to call more than once.
    fn release(&mut self);
}

/// Where frames come from, parsed from a user-supplied string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// V4L2 device path, e.g. `/dev/video0`.
    Device(String),
    /// HTTP MJPEG endpoint.
    Url(String),
}

impl SourceLocator {
    /// Accepts a camera index (`0`), a device path, or an `http(s)://` URL.
    pub fn parse(s: &str) -> Result<Self, SourceError> {
        let s = s.trim();
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(Self::Url(s.to_string()));
        }
        if let Ok(index) = s.parse::<u32>() {
            return Ok(Self::Device(format!("/dev/video{index}")));
        }
        if s.starts_with('/') {
            return Ok(Self::Device(s.to_string()));
        }
        Err(SourceError::InvalidSource(s.to_string()))
    }

    /// Open the source. Fails if the device or stream cannot be opened.
    pub fn open(&self, width: u32, height: u32) -> Result<Box<dyn FrameSource>, SourceError> {
        match self {
            Self::Device(path) => Ok(Box::new(Camera::open(path, width, height)?)),
            Self::Url(url) => Ok(Box::new(HttpStream::connect(url)?)),
        }
    }
}

impl std::fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device(path) => f.write_str(path),
            Self::Url(url) => f.write_str(url),
        }
    }
}
