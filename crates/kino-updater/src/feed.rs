use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;

use crate::manifest::UpdateManifest;

/// Deadline applied to a single feed fetch unless the host overrides it.
pub const DEFAULT_FEED_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("update feed unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("update feed request failed with HTTP {status}")]
    HttpStatus { status: reqwest::StatusCode },
    #[error("malformed update feed document: {details}")]
    Malformed { details: String },
}

/// Result of a feed fetch that completed without error.
#[derive(Debug, Clone)]
pub enum FeedFetch {
    Manifest(UpdateManifest),
    /// The feed serves a different release channel. Not an error: callers
    /// treat it as "no manifest for us" rather than alarming the user.
    NoMatchingChannel,
}

/// Source of update manifests. The production implementation is
/// [`FeedClient`]; hosts and tests may substitute their own transport.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_manifest(&self) -> Result<FeedFetch, FeedError>;
}

/// Fetches and parses the update manifest from the configured feed URL.
///
/// Issues exactly one non-cached GET per call and never retries; the check
/// throttle owns retry cadence. Does not touch persisted state.
pub struct FeedClient {
    client: reqwest::Client,
    feed_url: String,
    channel: Option<String>,
    timeout: Duration,
}

impl FeedClient {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        feed_url: String,
        channel: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            feed_url,
            channel,
            timeout,
        }
    }
}

#[async_trait]
impl FeedSource for FeedClient {
    async fn fetch_manifest(&self) -> Result<FeedFetch, FeedError> {
        debug!("Fetching update manifest from {}", self.feed_url);

        let response = self
            .client
            .get(&self.feed_url)
            .header("Cache-Control", "no-cache")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(FeedError::Unreachable)?;

        if !response.status().is_success() {
            return Err(FeedError::HttpStatus {
                status: response.status(),
            });
        }

        let body = response.text().await.map_err(FeedError::Unreachable)?;
        let manifest = parse_manifest(&body)?;

        if channel_mismatch(manifest.channel.as_deref(), self.channel.as_deref()) {
            info!(
                "Update feed declares channel {:?}, expected {:?}; ignoring manifest",
                manifest.channel, self.channel
            );
            return Ok(FeedFetch::NoMatchingChannel);
        }

        Ok(FeedFetch::Manifest(manifest))
    }
}

fn parse_manifest(body: &str) -> Result<UpdateManifest, FeedError> {
    let manifest: UpdateManifest =
        serde_json::from_str(body).map_err(|error| FeedError::Malformed {
            details: error.to_string(),
        })?;
    manifest.validate().map_err(|error| FeedError::Malformed {
        details: error.to_string(),
    })?;
    Ok(manifest)
}

/// A mismatch exists only when the manifest declares a channel and the client
/// is configured with a non-blank expected one, and the two differ
/// case-insensitively.
fn channel_mismatch(declared: Option<&str>, expected: Option<&str>) -> bool {
    match (declared, expected) {
        (Some(declared), Some(expected)) if !expected.trim().is_empty() => {
            !declared.trim().eq_ignore_ascii_case(expected.trim())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{FeedError, channel_mismatch, parse_manifest};

    #[test]
    fn channel_mismatch_is_case_insensitive() {
        assert!(!channel_mismatch(Some("Stable"), Some("stable")));
        assert!(!channel_mismatch(Some("beta"), Some(" BETA ")));
        assert!(channel_mismatch(Some("beta"), Some("stable")));
    }

    #[test]
    fn blank_or_absent_expectations_accept_any_channel() {
        assert!(!channel_mismatch(Some("beta"), None));
        assert!(!channel_mismatch(Some("beta"), Some("")));
        assert!(!channel_mismatch(Some("beta"), Some("   ")));
        assert!(!channel_mismatch(None, Some("stable")));
    }

    #[test]
    fn parse_manifest_maps_bad_json_to_malformed() {
        let result = parse_manifest("{not json");
        assert!(matches!(result, Err(FeedError::Malformed { .. })));
    }

    #[test]
    fn parse_manifest_maps_invariant_violations_to_malformed() {
        let result = parse_manifest(
            r#"{
                "versionCode": 0,
                "versionName": "1.8.2",
                "mandatory": false,
                "artifactFileName": "kino.apk",
                "artifactSha256": "aa"
            }"#,
        );

        assert!(
            matches!(result, Err(FeedError::Malformed { ref details }) if details.contains("versionCode"))
        );
    }

    #[test]
    fn parse_manifest_accepts_valid_document() {
        let manifest = parse_manifest(
            r#"{
                "versionCode": 412,
                "versionName": "1.8.2",
                "mandatory": false,
                "artifactFileName": "kino-1.8.2.apk",
                "artifactSha256": "50639d63848d275a7efcd04478de62ca0df8f35dfd75be490e4fcae667ecd436"
            }"#,
        )
        .expect("valid manifest should parse");

        assert_eq!(manifest.version_code, 412);
    }
}
