//! facewatch-core: face detection, identification and frame annotation.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime. Detected faces are matched against a folder of
//! reference images and labeled on the frame as a known identity or an
//! intruder.

pub mod alignment;
pub mod annotate;
pub mod detector;
pub mod draw;
pub mod gallery;
pub mod label;
pub mod recognizer;
pub mod types;

pub use annotate::{Annotation, Annotator, FaceCrop, FaceDetect, FaceMatch, Verdict};
pub use detector::{DetectorError, FaceDetector};
pub use draw::Painter;
pub use gallery::{Gallery, GalleryError, GalleryMatcher, DEFAULT_SIMILARITY_THRESHOLD};
pub use label::{display_label, INTRUDER_LABEL};
pub use recognizer::{FaceRecognizer, RecognizerError};
pub use types::{BoundingBox, Embedding, FaceRegion, MatchOutcome, ReferenceFace};
