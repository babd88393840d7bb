use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;

use crate::state::{PendingInstall, StateStore};

/// Platform facility that installs a verified package from a readable path.
///
/// The handoff is fire-and-forget: the running process is typically replaced
/// by the install, so no completion signal ever comes back.
pub trait PackageInstaller: Send + Sync {
    /// Whether the platform currently allows this app to trigger installs.
    fn install_allowed(&self) -> bool;

    /// Hand a verified artifact to the platform installer.
    ///
    /// # Errors
    /// Returns an error when the installer cannot be launched at all.
    fn begin_install(&self, artifact_path: &Path) -> Result<(), InstallError>;
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to open platform installer for {path}: {details}")]
    InstallerLaunch { path: PathBuf, details: String },
}

/// Outcome of an install request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The artifact was handed to the platform installer.
    InstallerOpened,
    /// Install permission is missing. A pending record was persisted and the
    /// staged artifact kept, so the install resumes once the user grants it.
    PermissionRequired,
}

/// Outcome of resuming a persisted pending install at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    NoPending,
    /// The recorded artifact no longer exists; the record was discarded.
    ArtifactMissing,
    /// Permission is still missing; the record was kept for a later start.
    AwaitingPermission,
    InstallerOpened,
}

/// Sequences permission acquisition, pending-install persistence, and the
/// handoff to the platform installer.
pub struct InstallOrchestrator {
    store: Arc<dyn StateStore>,
    installer: Arc<dyn PackageInstaller>,
}

impl InstallOrchestrator {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, installer: Arc<dyn PackageInstaller>) -> Self {
        Self { store, installer }
    }

    /// Install a verified, staged artifact.
    ///
    /// # Errors
    /// Returns an error only when the installer itself cannot be launched;
    /// a missing permission is a recoverable [`InstallOutcome`], not an
    /// error.
    pub fn install(
        &self,
        artifact_path: &Path,
        version_code: u32,
    ) -> Result<InstallOutcome, InstallError> {
        if !self.installer.install_allowed() {
            info!(
                "Install permission missing; recording pending install for version code {version_code}"
            );
            self.store.set_pending_install(PendingInstall {
                artifact_path: artifact_path.to_path_buf(),
                version_code,
            });
            return Ok(InstallOutcome::PermissionRequired);
        }

        self.store.clear_pending_install();
        self.installer.begin_install(artifact_path)?;
        info!("Opened platform installer for version code {version_code}");
        Ok(InstallOutcome::InstallerOpened)
    }

    /// Resume a persisted pending install, called once at process start.
    ///
    /// The recorded artifact was verified before it was persisted; resume
    /// only re-checks that the file still exists. A missing file discards
    /// the record without error, since retrying it forever cannot succeed.
    ///
    /// # Errors
    /// Returns an error only when the installer cannot be launched.
    pub fn resume_pending_install(&self) -> Result<ResumeOutcome, InstallError> {
        let Some(pending) = self.store.pending_install() else {
            return Ok(ResumeOutcome::NoPending);
        };

        if !pending.artifact_path.exists() {
            warn!(
                "Pending install artifact {} is gone; discarding record",
                pending.artifact_path.display()
            );
            self.store.clear_pending_install();
            return Ok(ResumeOutcome::ArtifactMissing);
        }

        if !self.installer.install_allowed() {
            return Ok(ResumeOutcome::AwaitingPermission);
        }

        self.store.clear_pending_install();
        self.installer.begin_install(&pending.artifact_path)?;
        info!(
            "Resumed pending install of version code {}",
            pending.version_code
        );
        Ok(ResumeOutcome::InstallerOpened)
    }
}
