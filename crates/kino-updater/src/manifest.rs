use serde::Deserialize;
use thiserror::Error;

/// Update manifest published on the self-hosted feed.
///
/// Parsed fresh on every feed fetch and never persisted as a whole; only
/// derived scalars (version codes, artifact path) reach the state store.
/// Unknown fields are ignored and missing optional fields stay absent.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
    /// Release channel this manifest belongs to, when the feed declares one.
    #[serde(default)]
    pub channel: Option<String>,
    /// Monotonic build number; the only value used for ordering.
    pub version_code: u32,
    /// Human-readable version label.
    pub version_name: String,
    /// The feed flags this build as non-deferrable.
    pub mandatory: bool,
    /// Oldest build number still allowed to defer this update.
    #[serde(default)]
    pub min_supported_version_code: Option<u32>,
    /// Artifact file name, or an absolute download URL.
    pub artifact_file_name: String,
    /// Expected SHA-256 of the artifact, hex encoded.
    pub artifact_sha256: String,
    /// Expected artifact size, used to catch truncated downloads.
    #[serde(default)]
    pub artifact_size_bytes: Option<u64>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub changelog_summary: Option<String>,
    #[serde(default)]
    pub changelog_items: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ManifestInvalid {
    #[error("versionCode must be positive")]
    VersionCode,
    #[error("versionName must not be blank")]
    VersionName,
    #[error("artifactFileName must not be blank")]
    ArtifactFileName,
    #[error("artifactSha256 must not be blank")]
    ArtifactSha256,
}

impl UpdateManifest {
    /// Check the invariants a well-formed manifest must satisfy beyond what
    /// deserialization already enforces.
    ///
    /// # Errors
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ManifestInvalid> {
        if self.version_code == 0 {
            return Err(ManifestInvalid::VersionCode);
        }
        if self.version_name.trim().is_empty() {
            return Err(ManifestInvalid::VersionName);
        }
        if self.artifact_file_name.trim().is_empty() {
            return Err(ManifestInvalid::ArtifactFileName);
        }
        if self.artifact_sha256.trim().is_empty() {
            return Err(ManifestInvalid::ArtifactSha256);
        }
        Ok(())
    }

    /// The declared SHA-256 as lowercase hex, or `None` when it is not a
    /// 64-character hex digest.
    #[must_use]
    pub fn normalized_sha256(&self) -> Option<String> {
        let hash = self.artifact_sha256.trim();
        if hash.len() != 64 || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return None;
        }
        Some(hash.to_ascii_lowercase())
    }
}
