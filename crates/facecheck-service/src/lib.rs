//! facecheck-service — Face verification for pairs of S3 images.
//!
//! The handler validates the event, the verifier loads both images,
//! embeds their faces on the shared engine thread and compares the
//! largest face of each.

pub mod config;
pub mod engine;
pub mod handler;
pub mod loader;
pub mod orchestrator;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use engine::{EngineHandle, ModelProvider};
pub use handler::{handle, Response};
pub use loader::{parse_locator, ObjectLocation, ObjectStore, S3ObjectStore};
pub use orchestrator::{VerificationResult, Verifier};
