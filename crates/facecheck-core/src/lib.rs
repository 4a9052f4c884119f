//! facecheck-core — Face detection, recognition and comparison.
//!
//! Uses SCRFD for face detection and ArcFace for face recognition,
//! both running via ONNX Runtime for CPU inference. Images are handled
//! as BGR pixel arrays, the layout the InsightFace model packs expect.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod pixels;
pub mod recognizer;
pub mod selector;
pub mod similarity;
pub mod types;

pub use analyzer::{AnalyzeError, FaceAnalyzer, InsightPack, ModelInitError, PackConfig};
pub use detector::FaceDetector;
pub use pixels::{BgrImage, DecodeError};
pub use recognizer::FaceRecognizer;
pub use selector::select_best;
pub use similarity::{decide, score, SimilarityError};
pub use types::{BoundingBox, Embedding, FaceDetection};
