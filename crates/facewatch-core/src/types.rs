use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// A face region in pixel coordinates, clipped to the frame it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
    /// Landmarks in frame coordinates, if the detector produced them.
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceRegion {
    /// Region covering exactly the given rectangle, without landmarks.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
            landmarks: None,
        }
    }

    /// Snap a float box to whole pixels inside a `frame_width`×`frame_height` frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn from_bbox(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> Option<Self> {
        let x0 = bbox.x.floor().max(0.0);
        let y0 = bbox.y.floor().max(0.0);
        let x1 = (bbox.x + bbox.width).ceil().min(frame_width as f32);
        let y1 = (bbox.y + bbox.height).ceil().min(frame_height as f32);

        if !(x1 > x0 && y1 > y0) {
            return None;
        }

        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
            confidence: bbox.confidence,
            landmarks: bbox.landmarks,
        })
    }

    /// Landmarks shifted into the coordinate space of a crop taken at this region.
    pub fn landmarks_in_crop(&self) -> Option<[(f32, f32); 5]> {
        let (ox, oy) = (self.x as f32, self.y as f32);
        self.landmarks.map(|lms| lms.map(|(lx, ly)| (lx - ox, ly - oy)))
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity between two embeddings, in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// One enrolled reference image from the reference database.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceFace {
    /// Path of the source image; the identity of this entry.
    pub source: PathBuf,
    /// Whether a face was detected and aligned, or the whole image was embedded.
    pub aligned: bool,
    #[serde(skip)]
    pub embedding: Embedding,
}

/// Outcome of matching one face against the reference database.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// No reference face reached the similarity threshold.
    NoMatch,
    /// Best-ranked reference face.
    Match {
        /// Source path of the matched reference image.
        identity: PathBuf,
        /// Cosine similarity of the match.
        score: f32,
    },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding {
            values: values.to_vec(),
            model_version: None,
        }
    }

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        assert!((emb(&[1.0, 0.0, 0.0]).similarity(&emb(&[1.0, 0.0, 0.0])) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(emb(&[1.0, 0.0]).similarity(&emb(&[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        assert!((emb(&[1.0, 0.0]).similarity(&emb(&[-1.0, 0.0])) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(emb(&[0.0, 0.0]).similarity(&emb(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_region_inside_frame() {
        let r = FaceRegion::from_bbox(&bbox(10.2, 20.7, 30.0, 40.0), 640, 480).unwrap();
        assert_eq!((r.x, r.y), (10, 20));
        // ceil(40.2) - 10 = 31, ceil(60.7) - 20 = 41
        assert_eq!((r.width, r.height), (31, 41));
    }

    #[test]
    fn test_region_clipped_to_frame() {
        let r = FaceRegion::from_bbox(&bbox(-5.0, -5.0, 20.0, 20.0), 10, 8).unwrap();
        assert_eq!((r.x, r.y, r.width, r.height), (0, 0, 10, 8));
    }

    #[test]
    fn test_region_outside_frame() {
        assert!(FaceRegion::from_bbox(&bbox(100.0, 100.0, 10.0, 10.0), 50, 50).is_none());
        assert!(FaceRegion::from_bbox(&bbox(5.0, 5.0, 0.0, 10.0), 50, 50).is_none());
    }

    #[test]
    fn test_landmarks_in_crop() {
        let mut r = FaceRegion::new(10, 20, 50, 50);
        r.landmarks = Some([(15.0, 25.0); 5]);
        assert_eq!(r.landmarks_in_crop(), Some([(5.0, 5.0); 5]));
    }
}
