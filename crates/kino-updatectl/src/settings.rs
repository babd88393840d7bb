use kino_platform::AppPaths;
use serde::{Deserialize, Serialize};

/// Host-side configuration for the update manager, stored as JSON next to
/// the persisted updater state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterSettings {
    #[serde(default)]
    pub feed_url: String,

    #[serde(default)]
    pub artifact_base_url: Option<String>,

    #[serde(default)]
    pub channel: Option<String>,

    /// Build number of the installed Kino client this tool acts for.
    #[serde(default)]
    pub installed_version_code: u32,

    #[serde(default = "default_check_interval_hours")]
    pub check_interval_hours: u64,

    #[serde(default = "default_feed_timeout_secs")]
    pub feed_timeout_secs: u64,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

fn default_check_interval_hours() -> u64 {
    24
}

fn default_feed_timeout_secs() -> u64 {
    20
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            feed_url: String::new(),
            artifact_base_url: None,
            channel: None,
            installed_version_code: 0,
            check_interval_hours: default_check_interval_hours(),
            feed_timeout_secs: default_feed_timeout_secs(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl UpdaterSettings {
    pub fn load(paths: &AppPaths) -> Self {
        let settings_path = paths.settings_file();
        if !settings_path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(&settings_path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// Persist the settings document.
    ///
    /// # Errors
    /// Returns an error when the config directory cannot be created or the
    /// file cannot be written.
    pub fn save(&self, paths: &AppPaths) -> Result<(), std::io::Error> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.settings_file(), content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::UpdaterSettings;

    #[test]
    fn defaults_match_expected_policy_values() {
        let settings = UpdaterSettings::default();

        assert!(settings.feed_url.is_empty());
        assert_eq!(settings.check_interval_hours, 24);
        assert_eq!(settings.feed_timeout_secs, 20);
        assert_eq!(settings.max_log_size_bytes, 5 * 1024 * 1024);
        assert!(!settings.debug_logging);
    }

    #[test]
    fn partial_settings_document_fills_in_defaults() {
        let settings: UpdaterSettings = serde_json::from_str(
            r#"{
                "feed_url": "https://updates.example.com/kino/manifest.json",
                "channel": "stable"
            }"#,
        )
        .expect("partial settings should deserialize");

        assert_eq!(
            settings.feed_url,
            "https://updates.example.com/kino/manifest.json"
        );
        assert_eq!(settings.channel.as_deref(), Some("stable"));
        assert_eq!(settings.check_interval_hours, 24);
        assert_eq!(settings.installed_version_code, 0);
    }
}
