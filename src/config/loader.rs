//! Top-level config loading pipeline.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::env::apply_env_overrides;
use super::sources::read_config_text_with_sources;
use super::{config_root_dir, Config, LoadedConfig};

/// Load configuration from disk and environment.
///
/// `path_override` is an explicit config file path (from --config flag).
pub fn load_config(path_override: Option<&str>) -> Result<LoadedConfig, ConfigError> {
    load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
    )
}

pub(super) fn load_config_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&str>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<LoadedConfig, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let (config_text, source) =
        read_config_text_with_sources(path_override, &read_file, &config_root)?;
    let mut config: Config = toml::from_str(&config_text)?;
    apply_env_overrides(&mut config, &env_lookup)?;
    validate(&mut config)?;
    Ok(LoadedConfig {
        config,
        source: source.path(),
    })
}

fn validate(config: &mut Config) -> Result<(), ConfigError> {
    let base_url = config.api.base_url.trim().trim_end_matches('/');
    if base_url.is_empty() {
        return Err(ConfigError::Invalid("api.base_url must not be empty".into()));
    }
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Invalid(format!(
            "api.base_url `{base_url}` must start with http:// or https://"
        )));
    }
    config.api.base_url = base_url.to_string();
    config.api.timeout_secs = config.api.timeout_secs.max(1);
    if config.session.refresh_buffer_secs < 0 {
        return Err(ConfigError::Invalid(
            "session.refresh_buffer_secs must not be negative".into(),
        ));
    }
    if config.session.max_refresh_attempts == 0 {
        return Err(ConfigError::Invalid(
            "session.max_refresh_attempts must be at least 1".into(),
        ));
    }
    Ok(())
}
