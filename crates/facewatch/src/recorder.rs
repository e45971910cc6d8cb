//! Annotated-stream recording to AVI via ffmpeg-next.

use crate::config::{FALLBACK_FPS, FALLBACK_HEIGHT, FALLBACK_WIDTH};
use chrono::NaiveDateTime;
use facewatch_hw::{Frame, SourceProperties};
use image::imageops::{self, FilterType};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `XVID` fourcc as stored in the AVI stream header.
const XVID_TAG: u32 = u32::from_le_bytes(*b"XVID");

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("ffmpeg: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
    #[error("encoder not found: {0}")]
    EncoderNotFound(&'static str),
    #[error("writer not opened")]
    NotOpened,
}

/// Output video geometry and rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl VideoParams {
    /// Use what the source reports, falling back to 640×480 at 5 fps.
    ///
    /// Dimensions are rounded down to even values for 4:2:0 chroma.
    pub fn from_properties(props: SourceProperties) -> Self {
        let fps = props
            .fps
            .filter(|f| f.is_finite() && *f >= 1.0)
            .unwrap_or(FALLBACK_FPS);
        let width = props.width.filter(|&w| w >= 2).unwrap_or(FALLBACK_WIDTH);
        let height = props.height.filter(|&h| h >= 2).unwrap_or(FALLBACK_HEIGHT);
        Self {
            width: width & !1,
            height: height & !1,
            fps,
        }
    }

    /// Whole frames per second, as used for the stream time base.
    pub fn fps_int(&self) -> i32 {
        (self.fps as i32).max(1)
    }
}

/// `video_<YYYYMMDD_HHMMSS>.avi`
pub fn output_file_name(now: &NaiveDateTime) -> String {
    format!("video_{}.avi", now.format("%Y%m%d_%H%M%S"))
}

/// Timestamped output path inside `dir`.
pub fn output_path(dir: &Path, now: &NaiveDateTime) -> PathBuf {
    dir.join(output_file_name(now))
}

/// Abstracts video encoding so the record loop does not depend on a codec library.
pub trait VideoWriter {
    fn open(&mut self, path: &Path, params: &VideoParams) -> Result<(), WriterError>;

    fn write(&mut self, frame: &Frame) -> Result<(), WriterError>;

    /// Flush and finalize the file. Safe to call more than once.
    fn close(&mut self) -> Result<(), WriterError>;
}

struct Encoding {
    octx: ffmpeg_next::format::context::Output,
    encoder: ffmpeg_next::codec::encoder::video::Encoder,
    scaler: ffmpeg_next::software::scaling::Context,
    frame_time_base: ffmpeg_next::Rational,
    params: VideoParams,
    frame_count: i64,
}

impl Encoding {
    fn drain(&mut self) -> Result<(), WriterError> {
        let ost_time_base = self
            .octx
            .stream(0)
            .ok_or(WriterError::NotOpened)?
            .time_base();

        let mut packet = ffmpeg_next::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(0);
            packet.rescale_ts(self.frame_time_base, ost_time_base);
            packet.write_interleaved(&mut self.octx)?;
        }
        Ok(())
    }
}

/// MPEG-4 Part 2 encoder tagged `XVID`, muxed by file extension (AVI).
#[derive(Default)]
pub struct FfmpegWriter {
    encoding: Option<Encoding>,
    path: Option<PathBuf>,
}

impl FfmpegWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VideoWriter for FfmpegWriter {
    fn open(&mut self, path: &Path, params: &VideoParams) -> Result<(), WriterError> {
        ffmpeg_next::init()?;

        let fps = params.fps_int();
        let frame_time_base = ffmpeg_next::Rational(1, fps);

        let mut octx = ffmpeg_next::format::output(path)?;
        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::MPEG4)
            .ok_or(WriterError::EncoderNotFound("mpeg4"))?;

        let mut encoder_ctx = ffmpeg_next::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        encoder_ctx.set_width(params.width);
        encoder_ctx.set_height(params.height);
        encoder_ctx.set_format(ffmpeg_next::format::Pixel::YUV420P);
        encoder_ctx.set_time_base(frame_time_base);
        encoder_ctx.set_frame_rate(Some(ffmpeg_next::Rational(fps, 1)));
        if global_header {
            encoder_ctx.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder_ctx.open_with(ffmpeg_next::Dictionary::new())?;

        {
            let mut ost = octx.add_stream(Some(codec))?;
            ost.set_parameters(&encoder);
            ost.set_time_base(frame_time_base);
            unsafe {
                (*ost.parameters().as_mut_ptr()).codec_tag = XVID_TAG;
            }
        }

        octx.write_header()?;

        let scaler = ffmpeg_next::software::scaling::Context::get(
            ffmpeg_next::format::Pixel::RGB24,
            params.width,
            params.height,
            ffmpeg_next::format::Pixel::YUV420P,
            params.width,
            params.height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        tracing::info!(
            path = %path.display(),
            width = params.width,
            height = params.height,
            fps,
            "video writer opened"
        );

        self.encoding = Some(Encoding {
            octx,
            encoder,
            scaler,
            frame_time_base,
            params: *params,
            frame_count: 0,
        });
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<(), WriterError> {
        let enc = self.encoding.as_mut().ok_or(WriterError::NotOpened)?;
        let (width, height) = (enc.params.width, enc.params.height);

        let resized;
        let image = if frame.image.dimensions() == (width, height) {
            &frame.image
        } else {
            resized = imageops::resize(&frame.image, width, height, FilterType::Triangle);
            &resized
        };

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::new(
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
        );
        let stride = rgb_frame.stride(0);
        let row_bytes = width as usize * 3;
        let data = rgb_frame.data_mut(0);
        for (row, src) in image.as_raw().chunks_exact(row_bytes).enumerate() {
            let dst = row * stride;
            data[dst..dst + row_bytes].copy_from_slice(src);
        }

        let mut yuv_frame = ffmpeg_next::util::frame::video::Video::empty();
        enc.scaler.run(&rgb_frame, &mut yuv_frame)?;
        yuv_frame.set_pts(Some(enc.frame_count));

        enc.encoder.send_frame(&yuv_frame)?;
        enc.drain()?;

        enc.frame_count += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), WriterError> {
        let Some(mut enc) = self.encoding.take() else {
            return Ok(());
        };

        enc.encoder.send_eof()?;
        enc.drain()?;
        enc.octx.write_trailer()?;

        if let Some(path) = self.path.take() {
            tracing::debug!(
                path = %path.display(),
                frames = enc.frame_count,
                "video writer finalized"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::{Rgb, RgbImage};

    fn solid_frame(w: u32, h: u32, value: u8) -> Frame {
        Frame::new(RgbImage::from_pixel(w, h, Rgb([value, value, value])), 0)
    }

    #[test]
    fn test_output_file_name() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(7, 5, 42)
            .unwrap();
        assert_eq!(output_file_name(&ts), "video_20240309_070542.avi");
        assert_eq!(
            output_path(Path::new("/tmp/rec"), &ts),
            PathBuf::from("/tmp/rec/video_20240309_070542.avi")
        );
    }

    #[test]
    fn test_params_use_reported_properties() {
        let params = VideoParams::from_properties(SourceProperties {
            fps: Some(25.0),
            width: Some(1280),
            height: Some(720),
        });
        assert_eq!(
            params,
            VideoParams {
                width: 1280,
                height: 720,
                fps: 25.0,
            }
        );
    }

    #[test]
    fn test_params_fall_back_when_unreported() {
        let params = VideoParams::from_properties(SourceProperties::default());
        assert_eq!(
            params,
            VideoParams {
                width: 640,
                height: 480,
                fps: 5.0,
            }
        );
    }

    #[test]
    fn test_params_zero_fps_falls_back() {
        let params = VideoParams::from_properties(SourceProperties {
            fps: Some(0.0),
            width: Some(321),
            height: Some(241),
        });
        assert_eq!(params.fps, 5.0);
        assert_eq!((params.width, params.height), (320, 240));
    }

    #[test]
    fn test_write_without_open_returns_error() {
        let mut writer = FfmpegWriter::new();
        assert!(matches!(
            writer.write(&solid_frame(16, 16, 0)),
            Err(WriterError::NotOpened)
        ));
    }

    #[test]
    fn test_write_creates_avi() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.avi");
        let params = VideoParams {
            width: 160,
            height: 120,
            fps: 5.0,
        };

        let mut writer = FfmpegWriter::new();
        writer.open(&path, &params).unwrap();
        for value in [40, 120, 200] {
            writer.write(&solid_frame(160, 120, value)).unwrap();
        }
        // Mismatched frame size gets resized rather than rejected
        writer.write(&solid_frame(64, 48, 90)).unwrap();
        writer.close().unwrap();

        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_close_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.avi");
        let params = VideoParams {
            width: 64,
            height: 48,
            fps: 5.0,
        };

        let mut writer = FfmpegWriter::new();
        writer.open(&path, &params).unwrap();
        writer.write(&solid_frame(64, 48, 128)).unwrap();
        writer.close().unwrap();
        assert!(writer.close().is_ok());
    }
}
