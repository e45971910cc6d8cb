//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::{FrameSource, SourceError, SourceProperties};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion JPEG, one JPEG image per buffer.
    Mjpg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpg),
            _ => None,
        }
    }
}

/// V4L2 camera device handle with a live capture stream.
pub struct Camera {
    stream: Option<MmapStream<'static>>,
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and start streaming.
    ///
    /// Requests YUYV at `width`×`height`; the driver may negotiate MJPG or a
    /// different resolution, in which case the negotiated values win.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc} (need YUYV or MJPG)"
            ))
        })?;

        // Drivers that cannot report an interval leave the frame rate unknown.
        let fps = device.params().ok().and_then(|p| {
            let interval = p.interval;
            (interval.numerator > 0 && interval.denominator > 0)
                .then(|| interval.denominator as f64 / interval.numerator as f64)
        });

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = %fourcc,
            fps = ?fps,
            "negotiated format"
        );

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, 4).map_err(|e| {
            CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
        })?;

        Ok(Self {
            stream: Some(stream),
            width: negotiated.width,
            height: negotiated.height,
            fps,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Capture a single frame, converting to RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::CaptureFailed("stream released".into()))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let buf = if used > 0 { &buf[..used] } else { buf };
        let sequence = meta.sequence;

        let image = buf_to_rgb(self.pixel_format, buf, self.width, self.height)?;
        Ok(Frame::new(image, sequence))
    }
}

/// Convert a raw buffer to RGB based on the negotiated format.
fn buf_to_rgb(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<RgbImage, CameraError> {
    match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        PixelFormat::Mjpg => frame::decode_jpeg(buf)
            .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode failed: {e}"))),
    }
}

impl FrameSource for Camera {
    fn read(&mut self) -> Result<Frame, SourceError> {
        Ok(self.capture_frame()?)
    }

    fn properties(&self) -> SourceProperties {
        SourceProperties {
            fps: self.fps,
            width: Some(self.width),
            height: Some(self.height),
        }
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!(device = %self.device_path, "camera released");
        }
    }
}
