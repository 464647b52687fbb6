//! Configuration loading from TOML files and environment variables.
//!
//! Config is loaded in this order of precedence (highest wins):
//! 1. Environment variables (`MAPMYLEARN_BASE_URL`,
//!    `MAPMYLEARN_API_TIMEOUT_SECS`, `MAPMYLEARN_STORAGE_PATH`)
//! 2. TOML file specified via --config CLI flag
//! 3. ./mapmylearn.toml in the current directory
//! 4. $XDG_CONFIG_HOME/mapmylearn/mapmylearn.toml
//!    (or ~/.config/mapmylearn/mapmylearn.toml)
//! 5. Built-in defaults

use std::path::PathBuf;

mod defaults;
mod env;
mod loader;
mod sources;
mod types;

pub use loader::load_config;
pub use types::{ApiConfig, Config, LoadedConfig, SessionConfig, StorageConfig};

/// Resolve the base config directory from env/home conventions.
pub fn config_root_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".config"))
        .or_else(dirs::config_dir)
}

#[cfg(test)]
mod tests {
    use super::loader::load_config_from_sources;
    use super::*;
    use crate::error::ConfigError;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn load_with(
        path_override: Option<&str>,
        files: &[(&str, &str)],
        env: &[(&str, &str)],
    ) -> Result<LoadedConfig, ConfigError> {
        let files: BTreeMap<String, String> = files
            .iter()
            .map(|(path, text)| (path.to_string(), text.to_string()))
            .collect();
        let env: BTreeMap<String, String> = env
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        load_config_from_sources(
            path_override,
            move |path| {
                let key = path.to_string_lossy().into_owned();
                files
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, key))
            },
            move |name| env.get(name).cloned(),
            || Some(PathBuf::from("/cfg")),
        )
    }

    #[test]
    fn defaults_are_sensible() {
        let loaded = load_with(None, &[], &[]).unwrap();
        let c = loaded.config;
        assert_eq!(loaded.source, None);
        assert_eq!(c.api.base_url, "http://localhost:8000/api");
        assert_eq!(c.session.refresh_buffer_secs, 60);
        assert_eq!(c.session.min_refresh_delay_secs, 10);
        assert_eq!(c.session.max_refresh_attempts, 3);
        assert!(c.storage.encrypt);

        let settings = c.session.settings();
        assert_eq!(settings.min_refresh_delay, Duration::from_secs(10));
        assert_eq!(settings.backoff.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn parse_partial_toml() {
        let loaded = load_with(
            None,
            &[(
                "mapmylearn.toml",
                r#"
                [session]
                refresh_buffer_secs = 120

                [storage]
                encrypt = false
                "#,
            )],
            &[],
        )
        .unwrap();
        assert_eq!(loaded.source, Some(PathBuf::from("mapmylearn.toml")));
        assert_eq!(loaded.config.session.refresh_buffer_secs, 120);
        assert_eq!(loaded.config.session.max_refresh_attempts, 3);
        assert!(!loaded.config.storage.encrypt);
        assert_eq!(loaded.config.api.base_url, "http://localhost:8000/api");
    }

    #[test]
    fn explicit_path_beats_local_and_global() {
        let files = [
            ("custom.toml", "[api]\nbase_url = \"https://explicit.test/api\""),
            ("mapmylearn.toml", "[api]\nbase_url = \"https://local.test/api\""),
            (
                "/cfg/mapmylearn/mapmylearn.toml",
                "[api]\nbase_url = \"https://global.test/api\"",
            ),
        ];
        let loaded = load_with(Some("custom.toml"), &files, &[]).unwrap();
        assert_eq!(loaded.config.api.base_url, "https://explicit.test/api");

        let loaded = load_with(None, &files, &[]).unwrap();
        assert_eq!(loaded.config.api.base_url, "https://local.test/api");

        let loaded = load_with(None, &files[2..], &[]).unwrap();
        assert_eq!(loaded.config.api.base_url, "https://global.test/api");
        assert_eq!(
            loaded.source,
            Some(PathBuf::from("/cfg/mapmylearn/mapmylearn.toml"))
        );
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = load_with(Some("nope.toml"), &[], &[]).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn env_overrides_file_values() {
        let loaded = load_with(
            None,
            &[("mapmylearn.toml", "[api]\nbase_url = \"https://file.test/api\"")],
            &[
                ("MAPMYLEARN_BASE_URL", "https://env.test/api/"),
                ("MAPMYLEARN_API_TIMEOUT_SECS", "0"),
                ("MAPMYLEARN_STORAGE_PATH", "/tmp/session.json"),
            ],
        )
        .unwrap();
        assert_eq!(loaded.config.api.base_url, "https://env.test/api");
        assert_eq!(loaded.config.api.timeout_secs, 1);
        assert_eq!(
            loaded.config.storage.resolved_path(),
            Some(PathBuf::from("/tmp/session.json"))
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = load_with(None, &[], &[("MAPMYLEARN_API_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("MAPMYLEARN_API_TIMEOUT_SECS"));

        let err = load_with(
            None,
            &[("mapmylearn.toml", "[session]\nmax_refresh_attempts = 0")],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = load_with(
            None,
            &[("mapmylearn.toml", "[api]\nbase_url = \"localhost:8000\"")],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_reported() {
        let err = load_with(None, &[("mapmylearn.toml", "[api\n")], &[]).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
