//! Self-hosted update manager for the Kino client.
//!
//! Kino distributes its own builds from a self-hosted feed instead of an
//! app store. This crate owns the whole update flow and nothing else:
//! - Fetching and validating the update manifest.
//! - Deciding whether a prompt should surface at all (version policy,
//!   per-version skip suppression, check throttling).
//! - Streaming the artifact to a staging directory with incremental
//!   SHA-256 verification.
//! - Sequencing install permission, resumable pending-install records, and
//!   the handoff to the platform installer.
//!
//! The UI that renders prompts and the facility that performs the actual
//! install are collaborators injected by the host.

mod download;
mod feed;
mod gate;
mod install;
mod manager;
mod manifest;
mod policy;
mod state;

/// Artifact download, staging, and verification.
pub use download::{
    ArtifactFetcher, DownloadError, DownloadProgress, DownloadResult, VerificationFailure,
};
/// Manifest feed client and its transport seam.
pub use feed::{DEFAULT_FEED_TIMEOUT, FeedClient, FeedError, FeedFetch, FeedSource};
/// Update-check gate, outcome type, and injectable clock.
pub use gate::{CheckOutcome, Clock, DEFAULT_CHECK_INTERVAL, SystemClock, UpdateGate};
/// Install orchestration and the platform-installer seam.
pub use install::{
    InstallError, InstallOrchestrator, InstallOutcome, PackageInstaller, ResumeOutcome,
};
/// Top-level façade wiring the injected collaborators together.
pub use manager::{UpdateConfig, UpdateManager};
/// Feed document model.
pub use manifest::{ManifestInvalid, UpdateManifest};
/// Pure version-ordering and mandatory-update policy.
pub use policy::{is_mandatory, is_newer};
/// Persisted update state and its store implementations.
pub use state::{
    JsonStateStore, MemoryStateStore, PendingInstall, StateStore, UpdateState,
};
