use crate::manifest::UpdateManifest;

/// Whether the published build is strictly newer than the installed one.
/// Ties are never newer.
#[must_use]
pub fn is_newer(manifest: &UpdateManifest, installed_version_code: u32) -> bool {
    manifest.version_code > installed_version_code
}

/// Whether the update may not be deferred: either the feed flags it
/// directly, or the installed build has fallen below the feed's
/// minimum-supported version.
#[must_use]
pub fn is_mandatory(manifest: &UpdateManifest, installed_version_code: u32) -> bool {
    manifest.mandatory
        || manifest
            .min_supported_version_code
            .is_some_and(|min| installed_version_code < min)
}

#[cfg(test)]
mod tests {
    use super::{is_mandatory, is_newer};
    use crate::manifest::UpdateManifest;

    fn manifest(version_code: u32, mandatory: bool, min_supported: Option<u32>) -> UpdateManifest {
        UpdateManifest {
            channel: None,
            version_code,
            version_name: format!("1.0.{version_code}"),
            mandatory,
            min_supported_version_code: min_supported,
            artifact_file_name: "kino.apk".to_string(),
            artifact_sha256: "aa".to_string(),
            artifact_size_bytes: None,
            published_at: None,
            changelog_summary: None,
            changelog_items: Vec::new(),
        }
    }

    #[test]
    fn is_newer_is_strict() {
        assert!(is_newer(&manifest(101, false, None), 100));
        assert!(!is_newer(&manifest(100, false, None), 100));
        assert!(!is_newer(&manifest(99, false, None), 100));
    }

    #[test]
    fn is_newer_flips_exactly_once_at_the_boundary() {
        let installed = 500;
        let mut previous = false;
        let mut flips = 0;
        for code in 490..=510 {
            let newer = is_newer(&manifest(code, false, None), installed);
            if newer != previous {
                flips += 1;
                assert_eq!(code, installed + 1, "flip must happen right past the tie");
            }
            previous = newer;
        }
        assert_eq!(flips, 1);
    }

    #[test]
    fn mandatory_flag_always_wins() {
        assert!(is_mandatory(&manifest(101, true, None), 100));
        assert!(is_mandatory(&manifest(101, true, Some(50)), 100));
    }

    #[test]
    fn min_supported_floor_forces_mandatory_regardless_of_flag() {
        assert!(is_mandatory(&manifest(101, false, Some(101)), 100));
        assert!(!is_mandatory(&manifest(101, false, Some(100)), 100));
        assert!(!is_mandatory(&manifest(101, false, None), 100));
    }

    #[test]
    fn optional_update_scenario_from_feed() {
        let published = manifest(101, false, None);
        assert!(is_newer(&published, 100));
        assert!(!is_mandatory(&published, 100));
    }

    #[test]
    fn floor_tightening_scenario_from_feed() {
        let published = manifest(101, false, Some(101));
        assert!(is_newer(&published, 100));
        assert!(is_mandatory(&published, 100));
    }
}
