use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};

use crate::feed::{FeedError, FeedFetch, FeedSource};
use crate::manifest::UpdateManifest;
use crate::policy;
use crate::state::StateStore;

/// Minimum interval between feed fetches unless a check is forced.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Wall-clock source, injected so the check throttle is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Resolution of one `check_for_update` invocation. Every path resolves to
/// an outcome; no check error escapes the gate.
#[derive(Debug)]
pub enum CheckOutcome {
    /// Another check was already in flight; nothing was done.
    AlreadyChecking,
    /// The installed build is current (or the published one is suppressed by
    /// an explicit user skip).
    UpToDate,
    /// A newer build is published. `mandatory` tells the host whether the
    /// prompt may be dismissed.
    Available {
        manifest: UpdateManifest,
        mandatory: bool,
    },
    /// No fresh verdict from the feed — throttled, wrong channel, or the
    /// fetch failed. Reports the last persisted availability instead; the
    /// error is present only when a fetch was attempted and failed.
    Cached {
        available_version_code: Option<u32>,
        error: Option<FeedError>,
    },
}

/// Decides whether an update prompt should be surfaced at all.
///
/// Checks are linearized by a compare-and-swap guard: at most one runs per
/// gate at any time, and concurrent callers observe
/// [`CheckOutcome::AlreadyChecking`]. The gate owns no timer; the host
/// invokes it (typically on cold start) and the throttle bounds feed
/// traffic.
pub struct UpdateGate {
    feed: Arc<dyn FeedSource>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    installed_version_code: u32,
    check_interval: Duration,
    check_in_flight: AtomicBool,
}

impl UpdateGate {
    #[must_use]
    pub fn new(
        feed: Arc<dyn FeedSource>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        installed_version_code: u32,
        check_interval: Duration,
    ) -> Self {
        Self {
            feed,
            store,
            clock,
            installed_version_code,
            check_interval,
            check_in_flight: AtomicBool::new(false),
        }
    }

    pub async fn check_for_update(&self, force: bool) -> CheckOutcome {
        if self
            .check_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Update check already in flight; ignoring request");
            return CheckOutcome::AlreadyChecking;
        }

        let outcome = self.run_check(force).await;
        self.check_in_flight.store(false, Ordering::Release);
        outcome
    }

    async fn run_check(&self, force: bool) -> CheckOutcome {
        self.clear_stale_markers();

        if !force && self.within_throttle_window() {
            debug!("Update check throttled; reporting cached availability");
            return CheckOutcome::Cached {
                available_version_code: self.store.available_version_code(),
                error: None,
            };
        }

        let fetched = self.feed.fetch_manifest().await;
        // Record the attempt whenever a fetch was actually issued, success
        // or not, so the throttle stays meaningful.
        self.store.set_last_check_at(self.clock.now());

        let manifest = match fetched {
            Ok(FeedFetch::Manifest(manifest)) => manifest,
            Ok(FeedFetch::NoMatchingChannel) => {
                return CheckOutcome::Cached {
                    available_version_code: self.store.available_version_code(),
                    error: None,
                };
            }
            Err(error) => {
                warn!("Update check failed: {error}");
                return CheckOutcome::Cached {
                    available_version_code: self.store.available_version_code(),
                    error: Some(error),
                };
            }
        };

        if !policy::is_newer(&manifest, self.installed_version_code) {
            self.store.clear_available_version_code();
            return CheckOutcome::UpToDate;
        }

        let mandatory = policy::is_mandatory(&manifest, self.installed_version_code);

        if !mandatory && self.store.skipped_version_code() == Some(manifest.version_code) {
            debug!(
                "Version {} was skipped by the user; suppressing prompt",
                manifest.version_code
            );
            self.store.clear_available_version_code();
            return CheckOutcome::UpToDate;
        }

        self.store.set_available_version_code(manifest.version_code);
        info!(
            "Update {} (code {}) is available{}",
            manifest.version_name,
            manifest.version_code,
            if mandatory { ", mandatory" } else { "" }
        );
        CheckOutcome::Available { manifest, mandatory }
    }

    /// A skip or availability marker at or below the installed version is
    /// stale and must never suppress or announce anything again.
    fn clear_stale_markers(&self) {
        if let Some(skipped) = self.store.skipped_version_code()
            && skipped <= self.installed_version_code
        {
            self.store.clear_skipped_version_code();
        }
        if let Some(available) = self.store.available_version_code()
            && available <= self.installed_version_code
        {
            self.store.clear_available_version_code();
        }
    }

    fn within_throttle_window(&self) -> bool {
        let Some(last) = self.store.last_check_at() else {
            return false;
        };
        let window = TimeDelta::from_std(self.check_interval).unwrap_or(TimeDelta::MAX);
        self.clock.now().signed_duration_since(last) < window
    }
}
