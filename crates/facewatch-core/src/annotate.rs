//! Per-frame face annotation: detect, match each face, draw the verdict.

use crate::detector::{DetectorError, FaceDetector};
use crate::draw::{Painter, INTRUDER_COLOR, KNOWN_COLOR};
use crate::label::{display_label, INTRUDER_LABEL};
use crate::recognizer::RecognizerError;
use crate::types::{FaceRegion, MatchOutcome};
use facewatch_hw::Frame;
use image::{imageops, Rgb, RgbImage};
use std::path::PathBuf;

/// Locates faces in a frame.
pub trait FaceDetect {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Identifies one face crop against the reference database.
pub trait FaceMatch {
    fn find(&mut self, crop: &FaceCrop) -> Result<MatchOutcome, RecognizerError>;
}

impl FaceDetect for FaceDetector {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        let (w, h) = image.dimensions();
        Ok(self
            .detect(image)?
            .iter()
            .filter_map(|bbox| FaceRegion::from_bbox(bbox, w, h))
            .collect())
    }
}

/// The pixels under a face region, with landmarks relative to the crop.
#[derive(Clone)]
pub struct FaceCrop {
    pub region: FaceRegion,
    pub image: RgbImage,
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceCrop {
    /// Copy out `region` from `image`. The region must lie inside the image.
    pub fn extract(image: &RgbImage, region: &FaceRegion) -> Self {
        let crop = imageops::crop_imm(image, region.x, region.y, region.width, region.height);
        Self {
            region: region.clone(),
            image: crop.to_image(),
            landmarks: region.landmarks_in_crop(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Known { identity: PathBuf, score: f32 },
    Intruder,
}

/// One box and label drawn onto a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub region: FaceRegion,
    pub label: String,
    pub verdict: Verdict,
}

impl Annotation {
    fn from_outcome(region: FaceRegion, outcome: MatchOutcome) -> Self {
        match outcome {
            MatchOutcome::NoMatch => Self {
                region,
                label: INTRUDER_LABEL.to_string(),
                verdict: Verdict::Intruder,
            },
            MatchOutcome::Match { identity, score } => Self {
                region,
                label: display_label(&identity),
                verdict: Verdict::Known { identity, score },
            },
        }
    }

    pub fn color(&self) -> Rgb<u8> {
        match self.verdict {
            Verdict::Known { .. } => KNOWN_COLOR,
            Verdict::Intruder => INTRUDER_COLOR,
        }
    }
}

/// Detects, matches and draws on frames. Holds no state between frames.
pub struct Annotator<D, M> {
    detector: D,
    matcher: M,
    painter: Painter,
}

impl<D: FaceDetect, M: FaceMatch> Annotator<D, M> {
    pub fn new(detector: D, matcher: M, painter: Painter) -> Self {
        Self {
            detector,
            matcher,
            painter,
        }
    }

    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    /// Annotate `frame` in place and return what was drawn.
    ///
    /// Detection failure leaves the frame untouched. A matching failure skips
    /// that face only.
    pub fn annotate(&mut self, frame: &mut Frame) -> Vec<Annotation> {
        let regions = match self.detector.detect_faces(&frame.image) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "face detection error");
                return Vec::new();
            }
        };

        // Crop before drawing so no box bleeds into a neighbouring face.
        let crops: Vec<FaceCrop> = regions
            .iter()
            .filter(|r| r.width > 0 && r.height > 0)
            .filter(|r| r.x + r.width <= frame.width() && r.y + r.height <= frame.height())
            .map(|r| FaceCrop::extract(&frame.image, r))
            .collect();

        let mut annotations = Vec::with_capacity(crops.len());
        for crop in crops {
            let outcome = match self.matcher.find(&crop) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(
                        seq = frame.sequence,
                        x = crop.region.x,
                        y = crop.region.y,
                        error = %e,
                        "face matching error"
                    );
                    continue;
                }
            };

            let annotation = Annotation::from_outcome(crop.region, outcome);
            tracing::debug!(
                seq = frame.sequence,
                label = %annotation.label,
                x = annotation.region.x,
                y = annotation.region.y,
                "face annotated"
            );

            let color = annotation.color();
            self.painter.draw_box(&mut frame.image, &annotation.region, color);
            self.painter
                .draw_label(&mut frame.image, &annotation.region, &annotation.label, color);
            annotations.push(annotation);
        }

        annotations
    }
}
