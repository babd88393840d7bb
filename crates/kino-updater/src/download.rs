use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use log::{info, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::manifest::UpdateManifest;

const FALLBACK_STAGED_NAME: &str = "kino-update.bin";

/// Verified artifact staged on disk, ready for the install orchestrator.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub actual_sha256: String,
    pub actual_size_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadProgress {
    pub downloaded: u64,
    /// Declared or reported total size; zero when unknown.
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("declared SHA-256 is not a 64-character hex digest")]
    MalformedExpectedHash,
    #[error("SHA-256 mismatch")]
    HashMismatch,
    #[error("size mismatch: declared {declared} bytes, got {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("staged artifact is empty")]
    EmptyArtifact,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("another artifact download is already in flight")]
    AlreadyDownloading,
    #[error("invalid artifact URL: {details}")]
    InvalidArtifactUrl { details: String },
    #[error("no staging directory is writable with enough free space")]
    NoStorageAvailable,
    #[error("artifact download failed ({context}): {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("artifact download failed with HTTP {status}")]
    HttpStatus { status: reqwest::StatusCode },
    #[error("artifact download failed ({context}): {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact download cancelled")]
    Cancelled,
    #[error("artifact verification failed: {0}")]
    Verification(#[source] VerificationFailure),
}

impl DownloadError {
    fn invalid_url(details: impl Into<String>) -> Self {
        Self::InvalidArtifactUrl {
            details: details.into(),
        }
    }

    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// Streams the published artifact to a staging directory and verifies it.
///
/// Callable only once the host has a user-confirmed "install now" action
/// pending. Downloads are linearized by their own single-flight guard,
/// independent of the update gate's.
pub struct ArtifactFetcher {
    client: reqwest::Client,
    artifact_base_url: Option<String>,
    staging_candidates: Vec<PathBuf>,
    download_in_flight: AtomicBool,
}

impl ArtifactFetcher {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        artifact_base_url: Option<String>,
        staging_candidates: Vec<PathBuf>,
    ) -> Self {
        Self {
            client,
            artifact_base_url,
            staging_candidates,
            download_in_flight: AtomicBool::new(false),
        }
    }

    /// Download the manifest's artifact, hashing it incrementally while it
    /// streams to disk, then verify hash and size.
    ///
    /// On any failure no partial or unverified file is left in staging.
    /// Cancelling via `cancel` deletes the partial file and reports
    /// [`DownloadError::Cancelled`].
    ///
    /// # Errors
    /// See [`DownloadError`]; a second concurrent call reports
    /// [`DownloadError::AlreadyDownloading`] without touching the network.
    pub async fn fetch(
        &self,
        manifest: &UpdateManifest,
        progress: Option<mpsc::Sender<DownloadProgress>>,
        cancel: &CancellationToken,
    ) -> Result<DownloadResult, DownloadError> {
        if self
            .download_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DownloadError::AlreadyDownloading);
        }

        let result = self.fetch_inner(manifest, progress, cancel).await;
        self.download_in_flight.store(false, Ordering::Release);
        result
    }

    async fn fetch_inner(
        &self,
        manifest: &UpdateManifest,
        progress: Option<mpsc::Sender<DownloadProgress>>,
        cancel: &CancellationToken,
    ) -> Result<DownloadResult, DownloadError> {
        let url = resolve_artifact_url(
            &manifest.artifact_file_name,
            self.artifact_base_url.as_deref(),
        )?;
        let expected_sha256 = manifest
            .normalized_sha256()
            .ok_or(DownloadError::Verification(
                VerificationFailure::MalformedExpectedHash,
            ))?;

        let staging_dir =
            kino_platform::select_staging_dir(&self.staging_candidates, manifest.artifact_size_bytes)
                .ok_or(DownloadError::NoStorageAvailable)?;

        let staged_name = staged_file_name(&manifest.artifact_file_name);
        let part_path = staging_dir.join(format!("{staged_name}.part"));
        let final_path = staging_dir.join(staged_name);

        info!("Downloading update artifact from {url}");
        let streamed = self
            .stream_to_file(url, &part_path, manifest.artifact_size_bytes, progress, cancel)
            .await;
        let (actual_sha256, actual_size_bytes) = match streamed {
            Ok(streamed) => streamed,
            Err(error) => {
                discard(&part_path).await;
                return Err(error);
            }
        };

        finalize_staged(
            &part_path,
            &final_path,
            &expected_sha256,
            manifest.artifact_size_bytes,
            &actual_sha256,
            actual_size_bytes,
        )
        .await?;

        info!(
            "Staged verified update artifact at {} ({actual_size_bytes} bytes)",
            final_path.display()
        );
        Ok(DownloadResult {
            path: final_path,
            actual_sha256,
            actual_size_bytes,
        })
    }

    async fn stream_to_file(
        &self,
        url: reqwest::Url,
        dest: &Path,
        declared_size: Option<u64>,
        progress: Option<mpsc::Sender<DownloadProgress>>,
        cancel: &CancellationToken,
    ) -> Result<(String, u64), DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| DownloadError::Http {
                context: "request",
                source,
            })?;

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                status: response.status(),
            });
        }

        let total = declared_size
            .or_else(|| response.content_length())
            .unwrap_or(0);

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| DownloadError::io("create staging file", source))?;
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => return Err(DownloadError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|source| DownloadError::Http {
                context: "stream",
                source,
            })?;

            file.write_all(&chunk)
                .await
                .map_err(|source| DownloadError::io("write staging file", source))?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            if let Some(progress) = &progress {
                let _ = progress
                    .send(DownloadProgress { downloaded, total })
                    .await;
            }
        }

        file.flush()
            .await
            .map_err(|source| DownloadError::io("flush staging file", source))?;
        file.sync_all()
            .await
            .map_err(|source| DownloadError::io("sync staging file", source))?;

        Ok((format!("{:x}", hasher.finalize()), downloaded))
    }
}

/// Resolve the feed-declared artifact file name against the configured base
/// URL. An absolute `http(s)` file name is used verbatim; otherwise each
/// path segment is percent-encoded independently and joined onto the base.
fn resolve_artifact_url(
    file_name: &str,
    base_url: Option<&str>,
) -> Result<reqwest::Url, DownloadError> {
    if file_name.starts_with("http://") || file_name.starts_with("https://") {
        return reqwest::Url::parse(file_name)
            .map_err(|error| DownloadError::invalid_url(format!("{file_name}: {error}")));
    }

    let base = base_url
        .map(str::trim)
        .filter(|base| !base.is_empty())
        .ok_or_else(|| DownloadError::invalid_url("no artifact base URL configured"))?;

    let mut url = reqwest::Url::parse(base)
        .map_err(|error| DownloadError::invalid_url(format!("{base}: {error}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DownloadError::invalid_url(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| DownloadError::invalid_url("artifact base URL cannot be a base"))?;
        segments.pop_if_empty();
        for segment in file_name.split('/').filter(|segment| !segment.is_empty()) {
            segments.push(segment);
        }
    }

    Ok(url)
}

/// File name the artifact is staged under: the last path component of the
/// feed-declared name, with traversal-looking or empty names replaced by a
/// fallback.
fn staged_file_name(file_name: &str) -> String {
    let raw = file_name.rsplit('/').next().unwrap_or(file_name);
    Path::new(raw)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && !name.contains(".."))
        .unwrap_or(FALLBACK_STAGED_NAME)
        .to_string()
}

fn verify_artifact(
    expected_sha256: &str,
    declared_size: Option<u64>,
    actual_sha256: &str,
    actual_size_bytes: u64,
) -> Result<(), VerificationFailure> {
    if actual_size_bytes == 0 {
        return Err(VerificationFailure::EmptyArtifact);
    }
    if let Some(declared) = declared_size
        && declared > 0
        && declared != actual_size_bytes
    {
        return Err(VerificationFailure::SizeMismatch {
            declared,
            actual: actual_size_bytes,
        });
    }
    if !actual_sha256.eq_ignore_ascii_case(expected_sha256) {
        return Err(VerificationFailure::HashMismatch);
    }
    Ok(())
}

/// Verify the streamed artifact and promote it from its `.part` name. Any
/// verification failure deletes the staged file so a corrupt download can
/// never be picked up by a later pending-install record.
async fn finalize_staged(
    part_path: &Path,
    final_path: &Path,
    expected_sha256: &str,
    declared_size: Option<u64>,
    actual_sha256: &str,
    actual_size_bytes: u64,
) -> Result<(), DownloadError> {
    if let Err(reason) = verify_artifact(
        expected_sha256,
        declared_size,
        actual_sha256,
        actual_size_bytes,
    ) {
        warn!(
            "Deleting staged artifact {}: {reason}",
            part_path.display()
        );
        discard(part_path).await;
        return Err(DownloadError::Verification(reason));
    }

    if let Err(source) = tokio::fs::rename(part_path, final_path).await {
        discard(part_path).await;
        return Err(DownloadError::io("finalize staged artifact", source));
    }
    Ok(())
}

async fn discard(path: &Path) {
    let _ = tokio::fs::remove_file(path).await;
}

#[cfg(test)]
mod tests {
    use super::{
        DownloadError, VerificationFailure, finalize_staged, resolve_artifact_url,
        staged_file_name, verify_artifact,
    };

    const GOOD_SHA: &str = "50639d63848d275a7efcd04478de62ca0df8f35dfd75be490e4fcae667ecd436";

    #[test]
    fn absolute_artifact_urls_are_used_verbatim() {
        let url = resolve_artifact_url("https://cdn.example.com/builds/kino-1.8.2.apk", None)
            .expect("absolute URL should resolve");
        assert_eq!(url.as_str(), "https://cdn.example.com/builds/kino-1.8.2.apk");
    }

    #[test]
    fn relative_names_join_the_base_with_percent_encoded_segments() {
        let url = resolve_artifact_url(
            "builds/kino tv-1.8.2.apk",
            Some("https://updates.example.com/kino"),
        )
        .expect("relative name should resolve");
        assert_eq!(
            url.as_str(),
            "https://updates.example.com/kino/builds/kino%20tv-1.8.2.apk"
        );
    }

    #[test]
    fn trailing_slash_on_the_base_does_not_double_up() {
        let url = resolve_artifact_url("kino.apk", Some("https://updates.example.com/kino/"))
            .expect("relative name should resolve");
        assert_eq!(url.as_str(), "https://updates.example.com/kino/kino.apk");
    }

    #[test]
    fn missing_base_url_is_rejected_for_relative_names() {
        for base in [None, Some(""), Some("   ")] {
            let result = resolve_artifact_url("kino.apk", base);
            assert!(
                matches!(result, Err(DownloadError::InvalidArtifactUrl { .. })),
                "base {base:?} must be rejected"
            );
        }
    }

    #[test]
    fn non_http_base_urls_are_rejected() {
        let result = resolve_artifact_url("kino.apk", Some("ftp://updates.example.com"));
        assert!(matches!(
            result,
            Err(DownloadError::InvalidArtifactUrl { .. })
        ));
    }

    #[test]
    fn unparseable_absolute_urls_are_rejected() {
        let result = resolve_artifact_url("https://", None);
        assert!(matches!(
            result,
            Err(DownloadError::InvalidArtifactUrl { .. })
        ));
    }

    #[test]
    fn staged_file_name_keeps_only_the_last_safe_component() {
        assert_eq!(staged_file_name("builds/kino-1.8.2.apk"), "kino-1.8.2.apk");
        assert_eq!(staged_file_name("kino.apk"), "kino.apk");
        assert_eq!(staged_file_name("../../etc/passwd"), "passwd");
        assert_eq!(staged_file_name("weird/.."), "kino-update.bin");
        assert_eq!(staged_file_name(""), "kino-update.bin");
    }

    #[test]
    fn verify_artifact_accepts_matching_hash_and_size() {
        assert!(verify_artifact(GOOD_SHA, Some(5), GOOD_SHA, 5).is_ok());
        assert!(verify_artifact(GOOD_SHA, None, &GOOD_SHA.to_ascii_uppercase(), 5).is_ok());
    }

    #[test]
    fn verify_artifact_rejects_each_failure_mode() {
        assert_eq!(
            verify_artifact(GOOD_SHA, Some(5), GOOD_SHA, 0),
            Err(VerificationFailure::EmptyArtifact)
        );
        assert_eq!(
            verify_artifact(GOOD_SHA, Some(5), GOOD_SHA, 6),
            Err(VerificationFailure::SizeMismatch {
                declared: 5,
                actual: 6
            })
        );
        let wrong = "0000000000000000000000000000000000000000000000000000000000000000";
        assert_eq!(
            verify_artifact(GOOD_SHA, Some(5), wrong, 5),
            Err(VerificationFailure::HashMismatch)
        );
    }

    #[tokio::test]
    async fn hash_mismatch_with_correct_size_deletes_the_staged_file() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let part = temp.path().join("kino.apk.part");
        let dest = temp.path().join("kino.apk");
        tokio::fs::write(&part, b"kino!")
            .await
            .expect("part file should be written");

        let wrong = "0000000000000000000000000000000000000000000000000000000000000000";
        let result = finalize_staged(&part, &dest, wrong, Some(5), GOOD_SHA, 5).await;

        assert!(matches!(
            result,
            Err(DownloadError::Verification(VerificationFailure::HashMismatch))
        ));
        assert!(!part.exists(), "staged file must be deleted");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn size_mismatch_with_correct_hash_deletes_the_staged_file() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let part = temp.path().join("kino.apk.part");
        let dest = temp.path().join("kino.apk");
        tokio::fs::write(&part, b"kino!")
            .await
            .expect("part file should be written");

        let result = finalize_staged(&part, &dest, GOOD_SHA, Some(9999), GOOD_SHA, 5).await;

        assert!(matches!(
            result,
            Err(DownloadError::Verification(VerificationFailure::SizeMismatch { .. }))
        ));
        assert!(!part.exists(), "staged file must be deleted");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn successful_verification_promotes_the_part_file() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let part = temp.path().join("kino.apk.part");
        let dest = temp.path().join("kino.apk");
        tokio::fs::write(&part, b"kino!")
            .await
            .expect("part file should be written");

        finalize_staged(&part, &dest, GOOD_SHA, Some(5), GOOD_SHA, 5)
            .await
            .expect("verification should pass");

        assert!(!part.exists());
        assert!(dest.exists(), "verified artifact must be promoted");
    }
}
