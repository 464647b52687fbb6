//! Environment overrides applied on top of the file config.

use std::path::PathBuf;

use crate::error::ConfigError;

use super::Config;

pub(super) const ENV_BASE_URL: &str = "MAPMYLEARN_BASE_URL";
pub(super) const ENV_API_TIMEOUT_SECS: &str = "MAPMYLEARN_API_TIMEOUT_SECS";
pub(super) const ENV_STORAGE_PATH: &str = "MAPMYLEARN_STORAGE_PATH";

pub(super) fn apply_env_overrides<FEnv>(
    config: &mut Config,
    env_lookup: &FEnv,
) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(url) = non_empty(env_lookup, ENV_BASE_URL) {
        config.api.base_url = url;
    }
    if let Some(timeout) = non_empty(env_lookup, ENV_API_TIMEOUT_SECS) {
        let parsed = timeout.parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid {ENV_API_TIMEOUT_SECS} value `{timeout}`: expected positive integer seconds"
            ))
        })?;
        // Zero would mean "no timeout"; clamp instead.
        config.api.timeout_secs = parsed.max(1);
    }
    if let Some(path) = non_empty(env_lookup, ENV_STORAGE_PATH) {
        config.storage.path = Some(PathBuf::from(path));
    }
    Ok(())
}

fn non_empty<FEnv>(env_lookup: &FEnv, name: &str) -> Option<String>
where
    FEnv: Fn(&str) -> Option<String>,
{
    env_lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
