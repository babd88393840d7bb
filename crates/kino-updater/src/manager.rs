use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::download::{ArtifactFetcher, DownloadError, DownloadProgress, DownloadResult};
use crate::feed::{DEFAULT_FEED_TIMEOUT, FeedClient, FeedSource};
use crate::gate::{CheckOutcome, Clock, DEFAULT_CHECK_INTERVAL, UpdateGate};
use crate::install::{
    InstallError, InstallOrchestrator, InstallOutcome, PackageInstaller, ResumeOutcome,
};
use crate::manifest::UpdateManifest;
use crate::state::StateStore;

/// Static configuration for one [`UpdateManager`].
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// URL of the self-hosted update manifest.
    pub feed_url: String,
    /// Base URL relative artifact file names are joined onto.
    pub artifact_base_url: Option<String>,
    /// Expected release channel; blank or absent accepts any channel.
    pub channel: Option<String>,
    /// Build number of the running client.
    pub installed_version_code: u32,
    /// Minimum interval between unforced feed fetches.
    pub check_interval: Duration,
    /// Deadline for a single feed fetch.
    pub feed_timeout: Duration,
    /// Ordered staging-directory candidates, most ephemeral first.
    pub staging_candidates: Vec<PathBuf>,
}

impl UpdateConfig {
    #[must_use]
    pub fn new(feed_url: impl Into<String>, installed_version_code: u32) -> Self {
        Self {
            feed_url: feed_url.into(),
            artifact_base_url: None,
            channel: None,
            installed_version_code,
            check_interval: DEFAULT_CHECK_INTERVAL,
            feed_timeout: DEFAULT_FEED_TIMEOUT,
            staging_candidates: Vec::new(),
        }
    }
}

/// The update manager: one explicit instance per application lifetime,
/// holding its injected collaborators (HTTP client, state store, platform
/// installer, clock) instead of process-wide statics.
///
/// The manager owns no scheduler. The host invokes [`check_for_update`] on
/// its own cadence (typically each cold start) and the check throttle bounds
/// feed traffic; [`resume_pending_install`] belongs in process startup.
///
/// [`check_for_update`]: UpdateManager::check_for_update
/// [`resume_pending_install`]: UpdateManager::resume_pending_install
pub struct UpdateManager {
    gate: UpdateGate,
    fetcher: ArtifactFetcher,
    orchestrator: InstallOrchestrator,
    store: Arc<dyn StateStore>,
}

impl UpdateManager {
    #[must_use]
    pub fn new(
        config: UpdateConfig,
        client: reqwest::Client,
        store: Arc<dyn StateStore>,
        installer: Arc<dyn PackageInstaller>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let feed = Arc::new(FeedClient::new(
            client.clone(),
            config.feed_url.clone(),
            config.channel.clone(),
            config.feed_timeout,
        ));
        Self::with_feed_source(config, client, feed, store, installer, clock)
    }

    /// Build a manager around a custom [`FeedSource`] transport.
    #[must_use]
    pub fn with_feed_source(
        config: UpdateConfig,
        client: reqwest::Client,
        feed: Arc<dyn FeedSource>,
        store: Arc<dyn StateStore>,
        installer: Arc<dyn PackageInstaller>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let gate = UpdateGate::new(
            feed,
            store.clone(),
            clock,
            config.installed_version_code,
            config.check_interval,
        );
        let fetcher = ArtifactFetcher::new(
            client,
            config.artifact_base_url,
            config.staging_candidates,
        );
        let orchestrator = InstallOrchestrator::new(store.clone(), installer);
        Self {
            gate,
            fetcher,
            orchestrator,
            store,
        }
    }

    /// Check the feed and decide whether an update prompt should surface.
    pub async fn check_for_update(&self, force: bool) -> CheckOutcome {
        self.gate.check_for_update(force).await
    }

    /// Download and verify the offered artifact. Call only after the user
    /// confirmed "install now".
    ///
    /// # Errors
    /// See [`DownloadError`].
    pub async fn download(
        &self,
        manifest: &UpdateManifest,
        progress: Option<mpsc::Sender<DownloadProgress>>,
        cancel: &CancellationToken,
    ) -> Result<DownloadResult, DownloadError> {
        self.fetcher.fetch(manifest, progress, cancel).await
    }

    /// Hand a verified, staged artifact to the platform installer, or
    /// persist it as pending when install permission is missing.
    ///
    /// # Errors
    /// See [`InstallError`].
    pub fn install(
        &self,
        artifact_path: &Path,
        version_code: u32,
    ) -> Result<InstallOutcome, InstallError> {
        self.orchestrator.install(artifact_path, version_code)
    }

    /// Resume a persisted pending install; call once at process start.
    ///
    /// # Errors
    /// See [`InstallError`].
    pub fn resume_pending_install(&self) -> Result<ResumeOutcome, InstallError> {
        self.orchestrator.resume_pending_install()
    }

    /// Record that the user deferred exactly this version; it will not be
    /// re-offered until the feed publishes a different version code or the
    /// update becomes mandatory. Deferring with "remind me later" is the
    /// absence of this call — it changes no state.
    pub fn skip_version(&self, version_code: u32) {
        self.store.set_skipped_version_code(version_code);
        self.store.clear_available_version_code();
    }

    /// Last version code confirmed newer than the installed build, for
    /// lightweight "update available" badges.
    #[must_use]
    pub fn available_version_code(&self) -> Option<u32> {
        self.store.available_version_code()
    }
}
