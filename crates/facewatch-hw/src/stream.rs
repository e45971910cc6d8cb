//! Network camera client for servers offering HTTP MJPEG streams
//! (`multipart/x-mixed-replace`), e.g. ESP32-CAM or mjpg-streamer.

use crate::frame::{self, Frame, FrameError};
use crate::source::{FrameSource, SourceError, SourceProperties};
use std::io::{self, BufRead, BufReader, Read};
use std::time::Duration;
use thiserror::Error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest part payload accepted from a server.
pub const MAX_PART_BYTES: usize = 32 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("malformed stream: {0}")]
    Malformed(String),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("stream closed by server")]
    Closed,
}

/// Extract the multipart boundary from a `Content-Type` header value.
///
/// Returns the boundary with its leading `--`. Some servers already include
/// the dashes in the parameter, which the MIME spec does not allow.
pub fn parse_boundary(content_type: &str) -> Result<String, StreamError> {
    let Some((mime, params)) = content_type.split_once(';') else {
        return Err(StreamError::Malformed(format!(
            "Content-Type without boundary: {content_type}"
        )));
    };
    if !mime.trim().eq_ignore_ascii_case("multipart/x-mixed-replace") {
        return Err(StreamError::Malformed(format!(
            "unexpected mime type {}",
            mime.trim()
        )));
    }
    let boundary = params
        .split(';')
        .filter_map(|p| p.trim().strip_prefix("boundary="))
        .next()
        .map(|b| b.trim_matches('"'))
        .ok_or_else(|| StreamError::Malformed("missing boundary parameter".into()))?;

    if boundary.starts_with("--") {
        Ok(boundary.to_string())
    } else {
        Ok(format!("--{boundary}"))
    }
}

/// Reads JPEG parts out of a multipart body.
///
/// Servers send the boundary before each part, so a part is returned as soon
/// as its payload is read. EOF while looking for the next boundary is the end
/// of the stream.
pub struct MjpegReader<R> {
    reader: R,
    boundary: String,
    at_boundary: bool,
}

impl<R: BufRead> MjpegReader<R> {
    /// Wrap a body reader and skip everything up to the first boundary.
    pub fn new(reader: R, boundary: String) -> Result<Self, StreamError> {
        let mut this = Self {
            reader,
            boundary,
            at_boundary: false,
        };
        this.read_until_boundary()?;
        this.at_boundary = true;
        Ok(this)
    }

    /// Read the next part and return its JPEG payload.
    pub fn next_part(&mut self) -> Result<Vec<u8>, StreamError> {
        if !self.at_boundary {
            self.read_until_boundary()?;
        }
        self.at_boundary = false;

        let mut length = None;
        let mut saw_header = false;
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(StreamError::Closed);
            }
            if line.trim().is_empty() {
                if saw_header {
                    break;
                }
                // Blank lines may precede the part headers.
                continue;
            }
            saw_header = true;
            let Some((key, value)) = line.split_once(':') else {
                return Err(StreamError::Malformed(format!(
                    "malformed part header: {}",
                    line.trim()
                )));
            };
            tracing::trace!(header = line.trim(), "multipart header");
            if key.eq_ignore_ascii_case("Content-Type") && value.trim() != "image/jpeg" {
                return Err(StreamError::Malformed(format!(
                    "unexpected Content-Type: expected image/jpeg, got {}",
                    value.trim()
                )));
            }
            if key.eq_ignore_ascii_case("Content-Length") {
                let parsed = value.trim().parse::<usize>().map_err(|_| {
                    StreamError::Malformed(format!("bad Content-Length: {}", value.trim()))
                })?;
                if parsed > MAX_PART_BYTES {
                    return Err(StreamError::Malformed(format!(
                        "part of {parsed} bytes exceeds the {MAX_PART_BYTES} byte limit"
                    )));
                }
                length = Some(parsed);
            }
        }

        let Some(length) = length else {
            return Err(StreamError::Malformed("missing Content-Length header".into()));
        };
        let mut buf = vec![0; length];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_until_boundary(&mut self) -> Result<(), StreamError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(StreamError::Closed);
            }
            if line.trim_end() == self.boundary {
                return Ok(());
            }
        }
    }
}

/// HTTP MJPEG stream as a frame source.
pub struct HttpStream {
    reader: Option<MjpegReader<BufReader<Box<dyn Read + Send>>>>,
    url: String,
    /// First frame, decoded at connect time to learn the resolution.
    pending: Option<Frame>,
    width: u32,
    height: u32,
    sequence: u32,
}

impl HttpStream {
    /// Connect to `url` and read the first frame.
    pub fn connect(url: &str) -> Result<Self, StreamError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .build()?;

        let response = client.get(url).send()?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StreamError::Malformed("missing Content-Type header".into()))?
            .to_string();
        let boundary = parse_boundary(&content_type)?;

        tracing::info!(url, boundary = %boundary, "connected to MJPEG stream");

        let body: Box<dyn Read + Send> = Box::new(response);
        let mut reader = MjpegReader::new(BufReader::new(body), boundary)?;

        let first = frame::decode_jpeg(&reader.next_part()?)?;
        let (width, height) = first.dimensions();
        tracing::info!(width, height, "stream resolution");

        Ok(Self {
            reader: Some(reader),
            url: url.to_string(),
            pending: Some(Frame::new(first, 0)),
            width,
            height,
            sequence: 1,
        })
    }

    pub fn capture_frame(&mut self) -> Result<Frame, StreamError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        let reader = self.reader.as_mut().ok_or(StreamError::Closed)?;
        let jpeg = reader.next_part()?;
        let image = frame::decode_jpeg(&jpeg)?;
        let frame = Frame::new(image, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }
}

impl FrameSource for HttpStream {
    fn read(&mut self) -> Result<Frame, SourceError> {
        match self.capture_frame() {
            Err(StreamError::Closed) => Err(SourceError::EndOfStream),
            other => Ok(other?),
        }
    }

    /// MJPEG over HTTP carries no frame rate.
    fn properties(&self) -> SourceProperties {
        SourceProperties {
            fps: None,
            width: Some(self.width),
            height: Some(self.height),
        }
    }

    fn release(&mut self) {
        if self.reader.take().is_some() {
            self.pending = None;
            tracing::info!(url = %self.url, "stream released");
        }
    }
}
