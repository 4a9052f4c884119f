use facecheck_core::PackConfig;
use std::path::PathBuf;

/// Acceptance threshold variable, re-read on every request.
pub const THRESHOLD_VAR: &str = "COSINE_MIN_ACCEPT";
pub const DEFAULT_THRESHOLD: f32 = 0.70;

const DEFAULT_MODEL_ROOT: &str = "/opt/.insightface";
const DEFAULT_THREADS: usize = 2;

/// Process configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// InsightFace home holding `models/buffalo_l` and `models/antelopev2`.
    pub model_root: PathBuf,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Config {
    /// Load from `INSIGHTFACE_HOME` and `OMP_NUM_THREADS` with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            model_root: lookup("INSIGHTFACE_HOME")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_ROOT)),
            intra_threads: parse_or(&lookup, "OMP_NUM_THREADS", DEFAULT_THREADS).max(1),
        }
    }

    pub fn pack_config(&self) -> PackConfig {
        PackConfig::new(&self.model_root, self.intra_threads)
    }
}

/// Current acceptance threshold from `COSINE_MIN_ACCEPT`.
pub fn acceptance_threshold() -> f32 {
    threshold_from_lookup(|key| std::env::var(key).ok())
}

pub fn threshold_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> f32 {
    parse_or(&lookup, THRESHOLD_VAR, DEFAULT_THRESHOLD)
}

fn parse_or<T: std::str::FromStr + Copy + std::fmt::Debug>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, ?default, "unparsable setting, using default");
            default
        }),
    }
}
