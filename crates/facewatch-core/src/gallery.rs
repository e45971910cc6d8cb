//! Reference database: a folder of labeled face images, embedded once at startup.

use crate::annotate::{FaceCrop, FaceMatch};
use crate::detector::FaceDetector;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, MatchOutcome, ReferenceFace};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default cosine-similarity threshold for a positive match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.40;

/// File extensions accepted as reference images (lowercase).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("reference directory not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A reference face that passed the threshold, ranked by score.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub identity: PathBuf,
    pub score: f32,
}

/// In-memory gallery of embedded reference faces.
#[derive(Debug, Default)]
pub struct Gallery {
    entries: Vec<ReferenceFace>,
}

impl Gallery {
    pub fn new(entries: Vec<ReferenceFace>) -> Self {
        Self { entries }
    }

    /// Embed every reference image in `dir`.
    ///
    /// Each image contributes its highest-confidence face, aligned. Images in
    /// which no face is detected are embedded whole. Images that cannot be
    /// decoded or embedded are skipped with a warning.
    pub fn load(
        dir: &Path,
        detector: &mut FaceDetector,
        recognizer: &mut FaceRecognizer,
    ) -> Result<Self, GalleryError> {
        let mut entries = Vec::new();

        for path in reference_images(dir)? {
            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable reference image"
                    );
                    continue;
                }
            };

            let best = match detector.detect(&image) {
                Ok(faces) => faces.into_iter().next(),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "detection failed on reference image"
                    );
                    None
                }
            };
            let landmarks = best.as_ref().and_then(|f| f.landmarks);

            match recognizer.extract(&image, landmarks.as_ref()) {
                Ok(embedding) => {
                    tracing::debug!(
                        path = %path.display(),
                        aligned = landmarks.is_some(),
                        "enrolled reference face"
                    );
                    entries.push(ReferenceFace {
                        source: path,
                        aligned: landmarks.is_some(),
                        embedding,
                    });
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping reference image");
                }
            }
        }

        if entries.is_empty() {
            tracing::warn!(
                dir = %dir.display(),
                "reference database is empty; every face will be an intruder"
            );
        } else {
            tracing::info!(
                dir = %dir.display(),
                count = entries.len(),
                "reference database loaded"
            );
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ReferenceFace] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry scoring at least `threshold`, best first.
    ///
    /// All entries are compared; ties keep gallery (file name) order.
    pub fn rank(&self, probe: &Embedding, threshold: f32) -> Vec<Candidate> {
        let mut ranked: Vec<Candidate> = self
            .entries
            .iter()
            .map(|entry| Candidate {
                identity: entry.source.clone(),
                score: probe.similarity(&entry.embedding),
            })
            .filter(|c| c.score >= threshold)
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }

    /// Top-ranked candidate as a [`MatchOutcome`].
    pub fn best_match(&self, probe: &Embedding, threshold: f32) -> MatchOutcome {
        match self.rank(probe, threshold).into_iter().next() {
            Some(c) => MatchOutcome::Match {
                identity: c.identity,
                score: c.score,
            },
            None => MatchOutcome::NoMatch,
        }
    }
}

/// List reference images in `dir` (non-recursive), sorted by path.
pub fn reference_images(dir: &Path) -> Result<Vec<PathBuf>, GalleryError> {
    if !dir.is_dir() {
        return Err(GalleryError::NotFound(dir.to_path_buf()));
    }

    let read_dir = std::fs::read_dir(dir).map_err(|source| GalleryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| GalleryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_image && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Matches face crops against a [`Gallery`] with ArcFace embeddings.
pub struct GalleryMatcher {
    recognizer: FaceRecognizer,
    gallery: Gallery,
    threshold: f32,
}

impl GalleryMatcher {
    pub fn new(recognizer: FaceRecognizer, gallery: Gallery, threshold: f32) -> Self {
        Self {
            recognizer,
            gallery,
            threshold,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }
}

impl FaceMatch for GalleryMatcher {
    fn find(&mut self, crop: &FaceCrop) -> Result<MatchOutcome, RecognizerError> {
        let probe = self.recognizer.extract(&crop.image, crop.landmarks.as_ref())?;
        Ok(self.gallery.best_match(&probe, self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(path: &str, values: &[f32]) -> ReferenceFace {
        ReferenceFace {
            source: PathBuf::from(path),
            aligned: true,
            embedding: Embedding {
                values: values.to_vec(),
                model_version: None,
            },
        }
    }

    fn probe(values: &[f32]) -> Embedding {
        Embedding {
            values: values.to_vec(),
            model_version: None,
        }
    }

    fn sample_gallery() -> Gallery {
        Gallery::new(vec![
            reference("db/decoy.jpg", &[0.0, 1.0, 0.0]),
            reference("db/bob.jpg", &[0.8, 0.6, 0.0]),
            reference("db/alice.jpg", &[1.0, 0.0, 0.0]),
        ])
    }

    #[test]
    fn test_rank_orders_by_score_and_filters() {
        let ranked = sample_gallery().rank(&probe(&[1.0, 0.0, 0.0]), 0.5);
        let ids: Vec<_> = ranked.iter().map(|c| c.identity.to_str().unwrap()).collect();
        assert_eq!(ids, vec!["db/alice.jpg", "db/bob.jpg"]);
        assert!((ranked[0].score - 1.0).abs() < 1e-6);
        assert!((ranked[1].score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_returns_top_candidate() {
        let outcome = sample_gallery().best_match(&probe(&[1.0, 0.0, 0.0]), 0.5);
        match outcome {
            MatchOutcome::Match { identity, score } => {
                assert_eq!(identity, PathBuf::from("db/alice.jpg"));
                assert!((score - 1.0).abs() < 1e-6);
            }
            MatchOutcome::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn test_best_match_below_threshold() {
        let outcome = sample_gallery().best_match(&probe(&[0.0, 0.0, 1.0]), 0.4);
        assert_eq!(outcome, MatchOutcome::NoMatch);
    }

    #[test]
    fn test_empty_gallery_is_no_match() {
        let outcome = Gallery::default().best_match(&probe(&[1.0, 0.0]), 0.0);
        assert_eq!(outcome, MatchOutcome::NoMatch);
    }

    #[test]
    fn test_reference_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zoe.jpg", "alice.PNG", "notes.txt", "bob.jpeg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        let names: Vec<String> = reference_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alice.PNG", "bob.jpeg", "zoe.jpg"]);
    }

    #[test]
    fn test_reference_images_missing_dir() {
        let result = reference_images(Path::new("/nonexistent/facewatch-db"));
        assert!(matches!(result, Err(GalleryError::NotFound(_))));
    }
}
