use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

/// Persisted record of a verified, staged artifact awaiting install
/// permission. While the file at `artifact_path` exists it is assumed to be
/// hash-verified already; resume only re-checks existence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInstall {
    pub artifact_path: PathBuf,
    pub version_code: u32,
}

/// Scalar update-manager state that survives restarts. Absent fields mean
/// "no value", never zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateState {
    #[serde(default)]
    pub last_check_at_millis: Option<i64>,
    #[serde(default)]
    pub skipped_version_code: Option<u32>,
    #[serde(default)]
    pub available_version_code: Option<u32>,
    #[serde(default)]
    pub pending_install: Option<PendingInstall>,
}

/// Persistence façade for the update manager's scalar state.
///
/// Every field is independently settable and clearable, and each write is
/// atomic with respect to concurrent readers (for example a UI polling for
/// an update badge). No multi-field transaction is ever required. Setters
/// are infallible from the caller's perspective; implementations log and
/// swallow persistence failures, since every field is idempotent to
/// re-write on the next operation.
pub trait StateStore: Send + Sync {
    fn last_check_at(&self) -> Option<DateTime<Utc>>;
    fn set_last_check_at(&self, at: DateTime<Utc>);

    fn skipped_version_code(&self) -> Option<u32>;
    fn set_skipped_version_code(&self, version_code: u32);
    fn clear_skipped_version_code(&self);

    fn available_version_code(&self) -> Option<u32>;
    fn set_available_version_code(&self, version_code: u32);
    fn clear_available_version_code(&self);

    fn pending_install(&self) -> Option<PendingInstall>;
    fn set_pending_install(&self, pending: PendingInstall);
    fn clear_pending_install(&self);
}

/// JSON-file-backed state store.
///
/// The whole document is held behind a mutex and rewritten atomically
/// (unique temp file + rename) on every field write, which serializes
/// individual writes without blocking readers on I/O completion.
pub struct JsonStateStore {
    path: PathBuf,
    state: Mutex<UpdateState>,
}

impl JsonStateStore {
    /// Open the store at `path`, starting from an empty state when the file
    /// is missing or unreadable.
    #[must_use]
    pub fn open(path: PathBuf) -> Self {
        let state = load_from_path(&path).unwrap_or_default();
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    fn read<T>(&self, get: impl FnOnce(&UpdateState) -> T) -> T {
        let guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        get(&guard)
    }

    fn mutate(&self, apply: impl FnOnce(&mut UpdateState)) {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        apply(&mut guard);
        if let Err(error) = persist(&self.path, &guard) {
            warn!(
                "Failed to persist updater state to {}: {error}",
                self.path.display()
            );
        }
    }
}

impl StateStore for JsonStateStore {
    fn last_check_at(&self) -> Option<DateTime<Utc>> {
        self.read(|state| state.last_check_at_millis)
            .and_then(DateTime::from_timestamp_millis)
    }

    fn set_last_check_at(&self, at: DateTime<Utc>) {
        self.mutate(|state| state.last_check_at_millis = Some(at.timestamp_millis()));
    }

    fn skipped_version_code(&self) -> Option<u32> {
        self.read(|state| state.skipped_version_code)
    }

    fn set_skipped_version_code(&self, version_code: u32) {
        self.mutate(|state| state.skipped_version_code = Some(version_code));
    }

    fn clear_skipped_version_code(&self) {
        self.mutate(|state| state.skipped_version_code = None);
    }

    fn available_version_code(&self) -> Option<u32> {
        self.read(|state| state.available_version_code)
    }

    fn set_available_version_code(&self, version_code: u32) {
        self.mutate(|state| state.available_version_code = Some(version_code));
    }

    fn clear_available_version_code(&self) {
        self.mutate(|state| state.available_version_code = None);
    }

    fn pending_install(&self) -> Option<PendingInstall> {
        self.read(|state| state.pending_install.clone())
    }

    fn set_pending_install(&self, pending: PendingInstall) {
        self.mutate(|state| state.pending_install = Some(pending));
    }

    fn clear_pending_install(&self) {
        self.mutate(|state| state.pending_install = None);
    }
}

/// In-memory state store for tests and ephemeral hosts.
#[derive(Default)]
pub struct MemoryStateStore {
    state: Mutex<UpdateState>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, get: impl FnOnce(&UpdateState) -> T) -> T {
        let guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        get(&guard)
    }

    fn mutate(&self, apply: impl FnOnce(&mut UpdateState)) {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        apply(&mut guard);
    }
}

impl StateStore for MemoryStateStore {
    fn last_check_at(&self) -> Option<DateTime<Utc>> {
        self.read(|state| state.last_check_at_millis)
            .and_then(DateTime::from_timestamp_millis)
    }

    fn set_last_check_at(&self, at: DateTime<Utc>) {
        self.mutate(|state| state.last_check_at_millis = Some(at.timestamp_millis()));
    }

    fn skipped_version_code(&self) -> Option<u32> {
        self.read(|state| state.skipped_version_code)
    }

    fn set_skipped_version_code(&self, version_code: u32) {
        self.mutate(|state| state.skipped_version_code = Some(version_code));
    }

    fn clear_skipped_version_code(&self) {
        self.mutate(|state| state.skipped_version_code = None);
    }

    fn available_version_code(&self) -> Option<u32> {
        self.read(|state| state.available_version_code)
    }

    fn set_available_version_code(&self, version_code: u32) {
        self.mutate(|state| state.available_version_code = Some(version_code));
    }

    fn clear_available_version_code(&self) {
        self.mutate(|state| state.available_version_code = None);
    }

    fn pending_install(&self) -> Option<PendingInstall> {
        self.read(|state| state.pending_install.clone())
    }

    fn set_pending_install(&self, pending: PendingInstall) {
        self.mutate(|state| state.pending_install = Some(pending));
    }

    fn clear_pending_install(&self) {
        self.mutate(|state| state.pending_install = None);
    }
}

fn load_from_path(path: &Path) -> Option<UpdateState> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

fn persist(path: &Path, state: &UpdateState) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(state)?;
    write_atomic(path, &data)
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "state path has no parent")
    })?;

    let file_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("state");
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let pid = std::process::id();

    let mut tmp_path = None;
    for attempt in 0..16_u8 {
        let candidate = parent.join(format!(".{file_name}.{pid}.{timestamp}.{attempt}.tmp"));
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut file) => {
                file.write_all(data)?;
                file.sync_all()?;
                tmp_path = Some(candidate);
                break;
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(error) => return Err(error),
        }
    }

    let Some(tmp_path) = tmp_path else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "failed to create unique state temp file",
        ));
    };

    if let Err(error) = replace_file(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(error);
    }

    Ok(())
}

fn replace_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{
            MOVEFILE_REPLACE_EXISTING, MOVEFILE_WRITE_THROUGH, MoveFileExW,
        };

        let src_utf16: Vec<u16> = src
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        let dst_utf16: Vec<u16> = dst
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: both paths are NUL-terminated UTF-16 buffers that live for
        // the duration of the FFI call.
        let moved = unsafe {
            MoveFileExW(
                src_utf16.as_ptr(),
                dst_utf16.as_ptr(),
                MOVEFILE_REPLACE_EXISTING | MOVEFILE_WRITE_THROUGH,
            )
        };
        if moved != 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::fs::rename(src, dst)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};

    use super::{JsonStateStore, PendingInstall, StateStore};

    #[test]
    fn pending_install_round_trips_through_disk() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("updater-state.json");

        let store = JsonStateStore::open(path.clone());
        store.set_pending_install(PendingInstall {
            artifact_path: PathBuf::from("/tmp/staging/kino-1.8.2.apk"),
            version_code: 412,
        });

        let reloaded = JsonStateStore::open(path);
        let pending = reloaded
            .pending_install()
            .expect("pending install should survive a reload");
        assert_eq!(pending.artifact_path, PathBuf::from("/tmp/staging/kino-1.8.2.apk"));
        assert_eq!(pending.version_code, 412);

        reloaded.clear_pending_install();
        assert!(reloaded.pending_install().is_none());
    }

    #[test]
    fn cleared_fields_read_back_as_absent_after_reload() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("updater-state.json");

        let store = JsonStateStore::open(path.clone());
        store.set_skipped_version_code(101);
        store.set_available_version_code(101);
        store.clear_skipped_version_code();

        let reloaded = JsonStateStore::open(path);
        assert_eq!(reloaded.skipped_version_code(), None);
        assert_eq!(reloaded.available_version_code(), Some(101));
    }

    #[test]
    fn last_check_timestamp_preserves_millisecond_precision() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("updater-state.json");
        let at = Utc
            .with_ymd_and_hms(2025, 11, 3, 10, 15, 0)
            .single()
            .expect("valid timestamp");

        let store = JsonStateStore::open(path.clone());
        store.set_last_check_at(at);

        let reloaded = JsonStateStore::open(path);
        assert_eq!(reloaded.last_check_at(), Some(at));
    }

    #[test]
    fn unreadable_state_file_starts_empty() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("updater-state.json");
        std::fs::write(&path, "{not-valid-json").expect("corrupt file should be written");

        let store = JsonStateStore::open(path);

        assert!(store.last_check_at().is_none());
        assert!(store.pending_install().is_none());
    }

    #[test]
    fn writes_leave_no_temp_files_behind() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("updater-state.json");

        let store = JsonStateStore::open(path);
        store.set_available_version_code(412);
        store.set_skipped_version_code(400);

        let leftovers = std::fs::read_dir(temp.path())
            .expect("read temp dir entries")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
