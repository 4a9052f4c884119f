//! Verification of one image pair, start to finish.

use crate::config;
use crate::engine::{EngineError, ModelProvider};
use crate::loader::{self, LoadError, ObjectStore};
use facecheck_core::analyzer::{PACK_DETECTOR, PACK_NOTE, PACK_RECOGNIZER};
use facecheck_core::{select_best, similarity, ModelInitError, SimilarityError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Why a verification could not produce a score.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("{source}")]
    Load { image: usize, source: LoadError },
    #[error(transparent)]
    ModelInit(#[from] ModelInitError),
    #[error("{source}")]
    Engine { image: usize, source: EngineError },
    #[error(transparent)]
    Similarity(#[from] SimilarityError),
}

impl VerifyError {
    /// Pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            VerifyError::Load { .. } => "load",
            VerifyError::ModelInit(_) => "model_init",
            VerifyError::Engine { .. } => "embed",
            VerifyError::Similarity(_) => "compare",
        }
    }

    /// Failures outside the expected error set, reported as server errors.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            VerifyError::Engine {
                source: EngineError::Panicked(_),
                ..
            }
        )
    }

    /// 1-based index of the image involved, if the failure is tied to one.
    pub fn image(&self) -> Option<usize> {
        match self {
            VerifyError::Load { image, .. } | VerifyError::Engine { image, .. } => Some(*image),
            _ => None,
        }
    }
}

/// Scored comparison of two images.
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub verified: bool,
    pub similarity: f32,
    pub cosine_min_accept: f32,
    pub pack_detector: String,
    pub pack_recognizer: String,
    pub note: String,
    pub img1_url: String,
    pub img2_url: String,
}

#[derive(Debug)]
pub enum VerificationResult {
    Compared(Comparison),
    /// At least one image had no detectable face.
    NoFace,
    Failed(VerifyError),
}

/// Runs the load → embed → select → compare pipeline for image pairs.
pub struct Verifier {
    store: Arc<dyn ObjectStore>,
    models: Arc<ModelProvider>,
    threshold: Arc<dyn Fn() -> f32 + Send + Sync>,
}

impl Verifier {
    /// Reads the acceptance threshold from the environment on every call.
    pub fn new(store: Arc<dyn ObjectStore>, models: Arc<ModelProvider>) -> Self {
        Self {
            store,
            models,
            threshold: Arc::new(config::acceptance_threshold),
        }
    }

    pub fn with_threshold(mut self, threshold: impl Fn() -> f32 + Send + Sync + 'static) -> Self {
        self.threshold = Arc::new(threshold);
        self
    }

    /// Compare the faces in two images. Never fails: every error is
    /// logged and returned as [`VerificationResult::Failed`].
    pub async fn verify(&self, img1_url: &str, img2_url: &str) -> VerificationResult {
        match self.compare(img1_url, img2_url).await {
            Ok(Some(comparison)) => VerificationResult::Compared(comparison),
            Ok(None) => VerificationResult::NoFace,
            Err(e) => {
                tracing::error!(
                    stage = e.stage(),
                    image = ?e.image(),
                    error = %e,
                    "error processing images"
                );
                VerificationResult::Failed(e)
            }
        }
    }

    async fn compare(
        &self,
        img1_url: &str,
        img2_url: &str,
    ) -> Result<Option<Comparison>, VerifyError> {
        let img1 = loader::load(self.store.as_ref(), img1_url)
            .await
            .map_err(|source| VerifyError::Load { image: 1, source })?;
        let img2 = loader::load(self.store.as_ref(), img2_url)
            .await
            .map_err(|source| VerifyError::Load { image: 2, source })?;

        let engine = self.models.get().await?;

        let faces1 = engine
            .embed(img1)
            .await
            .map_err(|source| VerifyError::Engine { image: 1, source })?;
        let faces2 = engine
            .embed(img2)
            .await
            .map_err(|source| VerifyError::Engine { image: 2, source })?;

        let (best1, faces1) = select_best(faces1);
        let (best2, faces2) = select_best(faces2);
        tracing::info!(img1 = faces1.len(), img2 = faces2.len(), "detections");

        let (Some(e1), Some(e2)) = (best1, best2) else {
            return Ok(None);
        };

        let score = similarity::score(&e1, &e2)?;
        let threshold = (self.threshold)();

        Ok(Some(Comparison {
            verified: similarity::decide(score, threshold),
            similarity: score,
            cosine_min_accept: threshold,
            pack_detector: PACK_DETECTOR.to_string(),
            pack_recognizer: PACK_RECOGNIZER.to_string(),
            note: PACK_NOTE.to_string(),
            img1_url: img1_url.to_string(),
            img2_url: img2_url.to_string(),
        }))
    }
}
