//! Lambda event → verification → `{statusCode, body}` envelope.

use crate::engine::panic_message;
use crate::orchestrator::{Comparison, VerificationResult, Verifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const MISSING_LOCATORS: &str = "both image locators are required";
pub const NO_FACE: &str = "no face detected in at least one image";

/// Inbound event. Both fields are required; they are optional here so a
/// missing one becomes a 400 instead of a deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub img1_url: Option<String>,
    #[serde(default)]
    pub img2_url: Option<String>,
}

impl VerifyRequest {
    /// Both locators, if present and non-empty.
    fn locators(self) -> Option<(String, String)> {
        let img1 = self.img1_url.filter(|s| !s.is_empty())?;
        let img2 = self.img2_url.filter(|s| !s.is_empty())?;
        Some((img1, img2))
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Body {
    Compared(Comparison),
    NoFace { ok: bool, msg: String },
    Error { ok: bool, error: String },
}

#[derive(Debug, Serialize)]
pub struct Response {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: Body,
}

impl Response {
    fn error(status_code: u16, error: impl Into<String>) -> Self {
        Self {
            status_code,
            body: Body::Error {
                ok: false,
                error: error.into(),
            },
        }
    }

    fn internal(description: impl std::fmt::Display) -> Self {
        Self::error(500, format!("internal error: {description}"))
    }
}

impl From<VerificationResult> for Response {
    /// Verification outcomes are 200: the call succeeded even when the
    /// comparison could not be made. A panic during inference is a 500.
    fn from(result: VerificationResult) -> Self {
        let body = match result {
            VerificationResult::Compared(c) => Body::Compared(c),
            VerificationResult::NoFace => Body::NoFace {
                ok: false,
                msg: NO_FACE.to_string(),
            },
            VerificationResult::Failed(e) if e.is_internal() => {
                return Self::internal(e);
            }
            VerificationResult::Failed(e) => Body::Error {
                ok: false,
                error: e.to_string(),
            },
        };
        Self {
            status_code: 200,
            body,
        }
    }
}

/// Handle one invocation.
///
/// The verification runs on its own task so that a panic inside it is
/// reported as a 500 instead of tearing down the invocation.
pub async fn handle(verifier: Arc<Verifier>, event: Value) -> Response {
    let request: VerifyRequest = serde_json::from_value(event).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "malformed event");
        VerifyRequest::default()
    });

    let Some((img1_url, img2_url)) = request.locators() else {
        tracing::warn!("rejecting event without both image locators");
        return Response::error(400, MISSING_LOCATORS);
    };

    tracing::info!(img1 = %img1_url, img2 = %img2_url, "verify requested");
    let task = tokio::spawn(async move { verifier.verify(&img1_url, &img2_url).await });

    match task.await {
        Ok(result) => Response::from(result),
        Err(e) => {
            let description = if e.is_panic() {
                panic_message(&*e.into_panic())
            } else {
                e.to_string()
            };
            tracing::error!(error = %description, "unhandled failure in handler");
            Response::internal(description)
        }
    }
}
