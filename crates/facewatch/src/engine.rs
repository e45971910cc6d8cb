//! Capture loops: read a frame, annotate it, show it, optionally record it.
//!
//! Both loops are single-threaded and blocking. Every resource handed in is
//! released exactly once when the loop ends, whatever the exit path.

use crate::display::Display;
use crate::recorder::{VideoParams, VideoWriter, WriterError};
use facewatch_core::{Annotation, Annotator, FaceDetect, FaceMatch, Verdict};
use facewatch_hw::{Frame, FrameSource, SourceError};
use std::path::Path;
use std::time::{Duration, Instant};

/// Why a capture loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// The user pressed `q` or closed the window.
    Quit,
    EndOfStream,
    ReadFailed(String),
    DisplayFailed(String),
    WriteFailed(String),
    /// The recording duration was reached.
    DurationElapsed,
}

impl StopReason {
    fn describe(&self) -> &'static str {
        match self {
            Self::Quit => "quit requested",
            Self::EndOfStream => "end of stream",
            Self::ReadFailed(_) => "frame read failed",
            Self::DisplayFailed(_) => "display failed",
            Self::WriteFailed(_) => "video write failed",
            Self::DurationElapsed => "duration elapsed",
        }
    }

    fn error(&self) -> Option<&str> {
        match self {
            Self::ReadFailed(e) | Self::DisplayFailed(e) | Self::WriteFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Running totals over the frames a loop processed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameCounts {
    pub frames: u64,
    pub known: u64,
    pub intruders: u64,
}

impl FrameCounts {
    fn tally(&mut self, annotations: &[Annotation]) {
        self.frames += 1;
        for annotation in annotations {
            match annotation.verdict {
                Verdict::Known { .. } => self.known += 1,
                Verdict::Intruder => self.intruders += 1,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopReport {
    pub counts: FrameCounts,
    pub stop: StopReason,
}

impl LoopReport {
    fn log(&self, mode: &str) {
        let c = &self.counts;
        match self.stop.error() {
            Some(error) => tracing::warn!(
                mode,
                frames = c.frames,
                known = c.known,
                intruders = c.intruders,
                error,
                "capture loop stopped: {}",
                self.stop.describe()
            ),
            None => tracing::info!(
                mode,
                frames = c.frames,
                known = c.known,
                intruders = c.intruders,
                "capture loop stopped: {}",
                self.stop.describe()
            ),
        }
    }
}

/// Read and annotate the next frame.
fn next_annotated<D: FaceDetect, M: FaceMatch>(
    source: &mut dyn FrameSource,
    annotator: &mut Annotator<D, M>,
    counts: &mut FrameCounts,
) -> Result<Frame, StopReason> {
    let mut frame = match source.read() {
        Ok(frame) => frame,
        Err(SourceError::EndOfStream) => return Err(StopReason::EndOfStream),
        Err(e) => return Err(StopReason::ReadFailed(e.to_string())),
    };
    let annotations = annotator.annotate(&mut frame);
    counts.tally(&annotations);
    Ok(frame)
}

/// Show the frame, then poll for quit.
fn present(display: &mut dyn Display, frame: &Frame) -> Option<StopReason> {
    if let Err(e) = display.show(frame) {
        return Some(StopReason::DisplayFailed(e.to_string()));
    }
    display.quit_requested().then_some(StopReason::Quit)
}

fn watch_loop<D: FaceDetect, M: FaceMatch>(
    source: &mut dyn FrameSource,
    annotator: &mut Annotator<D, M>,
    display: &mut dyn Display,
    counts: &mut FrameCounts,
) -> StopReason {
    loop {
        let frame = match next_annotated(source, annotator, counts) {
            Ok(frame) => frame,
            Err(stop) => return stop,
        };
        if let Some(stop) = present(display, &frame) {
            return stop;
        }
    }
}

/// Annotate and display frames until quit or the source stops delivering.
pub fn run_watch<D: FaceDetect, M: FaceMatch>(
    source: &mut dyn FrameSource,
    annotator: &mut Annotator<D, M>,
    display: &mut dyn Display,
) -> LoopReport {
    let mut counts = FrameCounts::default();
    let stop = watch_loop(source, annotator, display, &mut counts);

    source.release();
    display.release();

    let report = LoopReport { counts, stop };
    report.log("watch");
    report
}

fn record_loop<D: FaceDetect, M: FaceMatch>(
    source: &mut dyn FrameSource,
    annotator: &mut Annotator<D, M>,
    display: &mut dyn Display,
    writer: &mut dyn VideoWriter,
    duration: Duration,
    counts: &mut FrameCounts,
) -> StopReason {
    let started = Instant::now();
    loop {
        if started.elapsed() >= duration {
            return StopReason::DurationElapsed;
        }
        let frame = match next_annotated(source, annotator, counts) {
            Ok(frame) => frame,
            Err(stop) => return stop,
        };
        if let Err(e) = writer.write(&frame) {
            return StopReason::WriteFailed(e.to_string());
        }
        if let Some(stop) = present(display, &frame) {
            return stop;
        }
    }
}

/// Like [`run_watch`], but also writes every annotated frame to `path` and
/// stops once `duration` has elapsed.
///
/// Fails only if the writer cannot be opened or finalized. The source and
/// display are released in either case.
pub fn run_record<D: FaceDetect, M: FaceMatch>(
    source: &mut dyn FrameSource,
    annotator: &mut Annotator<D, M>,
    display: &mut dyn Display,
    writer: &mut dyn VideoWriter,
    path: &Path,
    params: &VideoParams,
    duration: Duration,
) -> Result<LoopReport, WriterError> {
    if let Err(e) = writer.open(path, params) {
        source.release();
        display.release();
        return Err(e);
    }
    tracing::info!(
        path = %path.display(),
        duration_secs = duration.as_secs_f64(),
        "recording to {}",
        path.display()
    );

    let mut counts = FrameCounts::default();
    let stop = record_loop(source, annotator, display, writer, duration, &mut counts);

    source.release();
    let closed = writer.close();
    display.release();

    let report = LoopReport { counts, stop };
    report.log("record");
    closed?;

    tracing::info!(path = %path.display(), frames = report.counts.frames, "video saved");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayError;
    use facewatch_core::{
        DetectorError, FaceCrop, FaceRegion, MatchOutcome, Painter, RecognizerError,
    };
    use facewatch_hw::{SourceProperties, StreamError};
    use image::RgbImage;

    /// Yields `limit` frames (or forever), then ends or fails.
    struct FakeSource {
        limit: Option<u32>,
        fail_at_end: bool,
        delay: Duration,
        reads: u32,
        releases: u32,
    }

    impl FakeSource {
        fn finite(limit: u32) -> Self {
            Self {
                limit: Some(limit),
                fail_at_end: false,
                delay: Duration::ZERO,
                reads: 0,
                releases: 0,
            }
        }

        fn failing_after(limit: u32) -> Self {
            Self {
                fail_at_end: true,
                ..Self::finite(limit)
            }
        }

        fn endless(delay: Duration) -> Self {
            Self {
                limit: None,
                delay,
                ..Self::finite(0)
            }
        }
    }

    impl FrameSource for FakeSource {
        fn read(&mut self) -> Result<Frame, SourceError> {
            if self.limit.is_some_and(|limit| self.reads >= limit) {
                return Err(if self.fail_at_end {
                    SourceError::Stream(StreamError::Malformed("truncated part".into()))
                } else {
                    SourceError::EndOfStream
                });
            }
            std::thread::sleep(self.delay);
            self.reads += 1;
            Ok(Frame::new(RgbImage::new(32, 24), self.reads))
        }

        fn properties(&self) -> SourceProperties {
            SourceProperties::default()
        }

        fn release(&mut self) {
            self.releases += 1;
        }
    }

    #[derive(Default)]
    struct FakeDisplay {
        quit_after: Option<u32>,
        fail: bool,
        shown: u32,
        releases: u32,
    }

    impl Display for FakeDisplay {
        fn show(&mut self, _: &Frame) -> Result<(), DisplayError> {
            if self.fail {
                return Err(DisplayError::Window(minifb::Error::WindowCreate(
                    "no display".into(),
                )));
            }
            self.shown += 1;
            Ok(())
        }

        fn quit_requested(&self) -> bool {
            self.quit_after.is_some_and(|n| self.shown >= n)
        }

        fn release(&mut self) {
            self.releases += 1;
        }
    }

    #[derive(Default)]
    struct FakeWriter {
        fail_open: bool,
        opens: u32,
        written: u32,
        closes: u32,
    }

    impl VideoWriter for FakeWriter {
        fn open(&mut self, _: &Path, _: &VideoParams) -> Result<(), WriterError> {
            if self.fail_open {
                return Err(WriterError::EncoderNotFound("mpeg4"));
            }
            self.opens += 1;
            Ok(())
        }

        fn write(&mut self, _: &Frame) -> Result<(), WriterError> {
            self.written += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<(), WriterError> {
            self.closes += 1;
            Ok(())
        }
    }

    struct OneFace;

    impl FaceDetect for OneFace {
        fn detect_faces(&mut self, _: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
            Ok(vec![FaceRegion::new(2, 2, 8, 8)])
        }
    }

    struct NobodyKnown;

    impl FaceMatch for NobodyKnown {
        fn find(&mut self, _: &FaceCrop) -> Result<MatchOutcome, RecognizerError> {
            Ok(MatchOutcome::NoMatch)
        }
    }

    fn annotator() -> Annotator<OneFace, NobodyKnown> {
        Annotator::new(OneFace, NobodyKnown, Painter::boxes_only())
    }

    fn params() -> VideoParams {
        VideoParams {
            width: 32,
            height: 24,
            fps: 5.0,
        }
    }

    #[test]
    fn test_watch_stops_on_quit() {
        let mut source = FakeSource::endless(Duration::ZERO);
        let mut display = FakeDisplay {
            quit_after: Some(3),
            ..Default::default()
        };

        let report = run_watch(&mut source, &mut annotator(), &mut display);

        assert_eq!(report.stop, StopReason::Quit);
        assert_eq!(report.counts.frames, 3);
        assert_eq!(report.counts.intruders, 3);
        assert_eq!(report.counts.known, 0);
        assert_eq!(source.releases, 1);
        assert_eq!(display.releases, 1);
    }

    #[test]
    fn test_watch_stops_on_read_failure() {
        let mut source = FakeSource::failing_after(2);
        let mut display = FakeDisplay::default();

        let report = run_watch(&mut source, &mut annotator(), &mut display);

        assert!(matches!(report.stop, StopReason::ReadFailed(_)));
        assert_eq!(report.counts.frames, 2);
        assert_eq!(display.shown, 2);
        assert_eq!(source.releases, 1);
        assert_eq!(display.releases, 1);
    }

    #[test]
    fn test_watch_stops_at_end_of_stream() {
        let mut source = FakeSource::finite(4);
        let mut display = FakeDisplay::default();

        let report = run_watch(&mut source, &mut annotator(), &mut display);

        assert_eq!(report.stop, StopReason::EndOfStream);
        assert_eq!(report.counts.frames, 4);
        assert_eq!(source.releases, 1);
    }

    #[test]
    fn test_watch_display_failure_releases_resources() {
        let mut source = FakeSource::endless(Duration::ZERO);
        let mut display = FakeDisplay {
            fail: true,
            ..Default::default()
        };

        let report = run_watch(&mut source, &mut annotator(), &mut display);

        assert!(matches!(report.stop, StopReason::DisplayFailed(_)));
        assert_eq!(source.reads, 1);
        assert_eq!(source.releases, 1);
        assert_eq!(display.releases, 1);
    }

    #[test]
    fn test_record_stops_after_duration_without_quit() {
        let duration = Duration::from_millis(60);
        let mut source = FakeSource::endless(Duration::from_millis(5));
        let mut display = FakeDisplay::default();
        let mut writer = FakeWriter::default();

        let started = Instant::now();
        let report = run_record(
            &mut source,
            &mut annotator(),
            &mut display,
            &mut writer,
            Path::new("video_test.avi"),
            &params(),
            duration,
        )
        .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.stop, StopReason::DurationElapsed);
        // One in-flight frame may finish after the deadline
        assert!(elapsed < duration + Duration::from_millis(500));
        assert!(report.counts.frames > 0);
        assert_eq!(writer.written as u64, report.counts.frames);
        assert_eq!(source.releases, 1);
        assert_eq!(writer.opens, 1);
        assert_eq!(writer.closes, 1);
        assert_eq!(display.releases, 1);
    }

    #[test]
    fn test_record_zero_duration_reads_nothing() {
        let mut source = FakeSource::endless(Duration::ZERO);
        let mut display = FakeDisplay::default();
        let mut writer = FakeWriter::default();

        let report = run_record(
            &mut source,
            &mut annotator(),
            &mut display,
            &mut writer,
            Path::new("video_test.avi"),
            &params(),
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(report.stop, StopReason::DurationElapsed);
        assert_eq!(source.reads, 0);
        assert_eq!(writer.written, 0);
        assert_eq!(writer.closes, 1);
    }

    #[test]
    fn test_record_quit_before_duration() {
        let mut source = FakeSource::endless(Duration::ZERO);
        let mut display = FakeDisplay {
            quit_after: Some(2),
            ..Default::default()
        };
        let mut writer = FakeWriter::default();

        let report = run_record(
            &mut source,
            &mut annotator(),
            &mut display,
            &mut writer,
            Path::new("video_test.avi"),
            &params(),
            Duration::from_secs(30),
        )
        .unwrap();

        assert_eq!(report.stop, StopReason::Quit);
        assert_eq!(writer.written, 2);
        assert_eq!(source.releases, 1);
        assert_eq!(writer.closes, 1);
        assert_eq!(display.releases, 1);
    }

    #[test]
    fn test_record_writer_open_failure_releases_source_and_display() {
        let mut source = FakeSource::endless(Duration::ZERO);
        let mut display = FakeDisplay::default();
        let mut writer = FakeWriter {
            fail_open: true,
            ..Default::default()
        };

        let result = run_record(
            &mut source,
            &mut annotator(),
            &mut display,
            &mut writer,
            Path::new("video_test.avi"),
            &params(),
            Duration::from_secs(30),
        );

        assert!(result.is_err());
        assert_eq!(source.reads, 0);
        assert_eq!(source.releases, 1);
        assert_eq!(display.releases, 1);
        assert_eq!(writer.closes, 0);
    }
}
