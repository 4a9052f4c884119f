//! Image acquisition: S3 locator parsing, object fetch, and BGR decode.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use facecheck_core::{BgrImage, DecodeError};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("invalid S3 URL format: {0}")]
    InvalidLocator(String),
    #[error("failed to fetch s3://{bucket}/{key}: {message}")]
    Retrieval {
        bucket: String,
        key: String,
        message: String,
    },
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Bucket and key of one S3 object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
    /// Region named by a hosted URL (`<bucket>.s3.<region>.amazonaws.com`).
    pub region: Option<String>,
}

/// Parse `s3://bucket/key` or `https://bucket.s3[.region].amazonaws.com/key`.
pub fn parse_locator(locator: &str) -> Result<ObjectLocation, LoadError> {
    let invalid = || LoadError::InvalidLocator(locator.to_string());

    if let Some(rest) = locator.strip_prefix("s3://") {
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(invalid());
        }
        return Ok(ObjectLocation {
            bucket: bucket.to_string(),
            key: key.to_string(),
            region: None,
        });
    }

    let url = Url::parse(locator).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(invalid());
    }
    let host = url.host_str().ok_or_else(invalid)?;
    if !host.ends_with(".amazonaws.com") {
        return Err(invalid());
    }

    let labels: Vec<&str> = host.split('.').collect();
    let bucket = labels[0];
    if bucket.is_empty() {
        return Err(invalid());
    }

    // `Url` normalizes dot segments; the key is the path as written
    let path = raw_path(locator);
    let key = percent_decode_str(path.strip_prefix('/').unwrap_or(path))
        .decode_utf8()
        .map_err(|_| invalid())?;

    Ok(ObjectLocation {
        bucket: bucket.to_string(),
        key: key.into_owned(),
        region: region_from_labels(&labels[1..]),
    })
}

/// Path of a `scheme://authority/path?query#fragment` string, unnormalized.
fn raw_path(locator: &str) -> &str {
    let rest = locator.split_once("://").map_or(locator, |(_, rest)| rest);
    let Some(start) = rest.find(&['/', '?', '#'][..]) else {
        return "";
    };
    let path = &rest[start..];
    if !path.starts_with('/') {
        return "";
    }
    path.split(&['?', '#'][..]).next().unwrap_or_default()
}

fn region_from_labels(labels: &[&str]) -> Option<String> {
    match labels {
        ["s3", region, "amazonaws", "com"] => Some(region.to_string()),
        [dashed, "amazonaws", "com"] => dashed
            .strip_prefix("s3-")
            .filter(|r| !r.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

/// Fetches raw object bytes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, LoadError>;
}

/// [`ObjectStore`] backed by the AWS SDK with the default credential chain.
pub struct S3ObjectStore {
    shared: aws_config::SdkConfig,
    client: aws_sdk_s3::Client,
    /// Clients for regions other than the default, built on first use.
    regional: Mutex<HashMap<String, aws_sdk_s3::Client>>,
}

impl S3ObjectStore {
    pub async fn from_env() -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
        tracing::debug!(region = ?shared.region(), "S3 client configured");
        Self::with_config(shared)
    }

    pub fn with_config(shared: aws_config::SdkConfig) -> Self {
        let client = aws_sdk_s3::Client::new(&shared);
        Self {
            shared,
            client,
            regional: Mutex::new(HashMap::new()),
        }
    }

    /// Client for `region`, reusing the default one when it already matches.
    fn client_for(&self, region: Option<&str>) -> aws_sdk_s3::Client {
        let region = match region {
            Some(r) if self.shared.region().map(|d| d.as_ref()) != Some(r) => r,
            _ => return self.client.clone(),
        };

        let mut regional = self.regional.lock().unwrap_or_else(|e| e.into_inner());
        regional
            .entry(region.to_string())
            .or_insert_with(|| {
                tracing::debug!(region, "building regional S3 client");
                let conf = aws_sdk_s3::config::Builder::from(&self.shared)
                    .region(Region::new(region.to_string()))
                    .build();
                aws_sdk_s3::Client::from_conf(conf)
            })
            .clone()
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, LoadError> {
        let retrieval = |message: String| LoadError::Retrieval {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            message,
        };

        let output = self
            .client_for(location.region.as_deref())
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| retrieval(DisplayErrorContext(&e).to_string()))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| retrieval(e.to_string()))?;

        Ok(body.into_bytes().to_vec())
    }
}

/// Resolve a locator to a BGR pixel array. No retries.
pub async fn load(store: &dyn ObjectStore, locator: &str) -> Result<BgrImage, LoadError> {
    let location = parse_locator(locator)?;
    let bytes = store.get(&location).await?;
    tracing::debug!(
        bucket = %location.bucket,
        key = %location.key,
        bytes = bytes.len(),
        "object fetched"
    );
    Ok(BgrImage::decode(&bytes)?)
}
