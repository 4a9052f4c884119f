//! Combined detection + recognition over a whole image.
//!
//! [`InsightPack`] runs the `buffalo_l` SCRFD detector and swaps in the
//! `antelopev2` glintr100 recognizer. Anything implementing [`FaceAnalyzer`]
//! can stand in for it, which is how the service is tested without models.

use crate::detector::{DetectorConfig, DetectorError, FaceDetector};
use crate::pixels::BgrImage;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, FaceDetection};
use std::path::PathBuf;
use thiserror::Error;

/// Human-readable detector of the pack.
pub const PACK_DETECTOR: &str = "buffalo_l (SCRFD-10GF)";
/// Human-readable recognizer of the pack.
pub const PACK_RECOGNIZER: &str = "antelopev2 (glintr100)";
pub const PACK_NOTE: &str = "InsightFace/ONNX hybrid";
/// Tag stamped on every embedding this pack produces.
pub const PACK_ID: &str = "buffalo_l/det_10g+antelopev2/glintr100";

/// Model construction failure. Fatal for the process: a failed pack is
/// never rebuilt, so this is cloned out to every caller that asks for it.
#[derive(Error, Debug, Clone)]
pub enum ModelInitError {
    #[error("detector init failed: {0}")]
    Detector(String),
    #[error("recognizer init failed: {0}")]
    Recognizer(String),
    #[error("model engine unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognition failed: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detect every face in an image and embed each one.
pub trait FaceAnalyzer: Send {
    /// Returns an empty vector when no face is found.
    fn analyze(&mut self, image: &BgrImage) -> Result<Vec<FaceDetection>, AnalyzeError>;
}

/// Where the pack lives on disk and how to run it.
#[derive(Debug, Clone)]
pub struct PackConfig {
    /// InsightFace home; checkpoints are under `<root>/models/<pack>/`.
    pub root: PathBuf,
    pub intra_threads: usize,
    pub detector: DetectorConfig,
}

impl PackConfig {
    pub fn new(root: impl Into<PathBuf>, intra_threads: usize) -> Self {
        Self {
            root: root.into(),
            intra_threads,
            detector: DetectorConfig {
                intra_threads,
                ..DetectorConfig::default()
            },
        }
    }

    /// SCRFD-10GF checkpoint of the `buffalo_l` pack.
    pub fn detector_path(&self) -> PathBuf {
        self.root.join("models").join("buffalo_l").join("det_10g.onnx")
    }

    /// glintr100 checkpoint of the `antelopev2` pack.
    pub fn recognizer_path(&self) -> PathBuf {
        self.root.join("models").join("antelopev2").join("glintr100.onnx")
    }
}

pub struct InsightPack {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl InsightPack {
    /// Load the detector, then override the recognizer with glintr100.
    pub fn load(config: &PackConfig) -> Result<Self, ModelInitError> {
        tracing::info!(
            root = %config.root.display(),
            threads = config.intra_threads,
            "initializing face pack (det=buffalo_l SCRFD-10GF, rec=antelopev2 glintr100, CPU)"
        );

        let detector = FaceDetector::load(&config.detector_path(), config.detector.clone())
            .map_err(|e| ModelInitError::Detector(e.to_string()))?;
        let recognizer = FaceRecognizer::load(&config.recognizer_path(), config.intra_threads)
            .map_err(|e| ModelInitError::Recognizer(e.to_string()))?;

        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceAnalyzer for InsightPack {
    fn analyze(&mut self, image: &BgrImage) -> Result<Vec<FaceDetection>, AnalyzeError> {
        let boxes = self.detector.detect(image)?;
        tracing::debug!(faces = boxes.len(), "detector finished");

        boxes
            .into_iter()
            .map(|bbox| {
                let raw = self.recognizer.extract(image, &bbox)?;
                Ok(FaceDetection {
                    embedding: Embedding::normalized(raw, PACK_ID),
                    bbox,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_paths() {
        let cfg = PackConfig::new("/opt/.insightface", 2);
        assert_eq!(
            cfg.detector_path(),
            PathBuf::from("/opt/.insightface/models/buffalo_l/det_10g.onnx")
        );
        assert_eq!(
            cfg.recognizer_path(),
            PathBuf::from("/opt/.insightface/models/antelopev2/glintr100.onnx")
        );
        assert_eq!(cfg.detector.intra_threads, 2);
        assert_eq!(cfg.detector.input_size, 800);
    }

    #[test]
    fn test_load_missing_models_is_detector_error() {
        let cfg = PackConfig::new("/nonexistent/insightface", 1);
        let err = InsightPack::load(&cfg).err().unwrap();
        assert!(matches!(err, ModelInitError::Detector(_)));
        assert!(err.to_string().contains("det_10g.onnx"));
    }
}
