use std::path::{Path, PathBuf};

use log::debug;

/// Extra bytes required on top of the declared artifact size before a
/// directory is accepted for staging.
pub const STAGING_SPACE_MARGIN_BYTES: u64 = 16 * 1024 * 1024;

/// Pick the first candidate directory that can hold a staged artifact.
///
/// A candidate is rejected when it cannot be created, fails a write probe,
/// or (when the artifact size is known) reports less free space than
/// `size + STAGING_SPACE_MARGIN_BYTES`. Returns `None` when every candidate
/// is rejected.
#[must_use]
pub fn select_staging_dir(candidates: &[PathBuf], artifact_size: Option<u64>) -> Option<PathBuf> {
    for dir in candidates {
        match probe_staging_dir(dir, artifact_size) {
            Ok(()) => return Some(dir.clone()),
            Err(reason) => debug!("Skipping staging candidate {}: {reason}", dir.display()),
        }
    }
    None
}

fn probe_staging_dir(dir: &Path, artifact_size: Option<u64>) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|error| format!("cannot create: {error}"))?;

    let probe = tempfile::Builder::new()
        .prefix(".kino-staging-probe")
        .tempfile_in(dir)
        .map_err(|error| format!("not writable: {error}"))?;
    drop(probe);

    if let Some(size) = artifact_size {
        let free = fs2::available_space(dir)
            .map_err(|error| format!("free-space query failed: {error}"))?;
        let needed = size.saturating_add(STAGING_SPACE_MARGIN_BYTES);
        if free < needed {
            return Err(format!(
                "insufficient free space: {free} bytes free, {needed} needed"
            ));
        }
    }

    Ok(())
}
