pub mod error;

pub use error::*;

use fleetstack_cloud::CloudConfig;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file directly
pub const CONFIG_PATH_ENV: &str = "FLEETSTACK_CONFIG_PATH";

/// File names searched in the current directory, in priority order
const CANDIDATES: [&str; 2] = ["fleetstack.local.yaml", "fleetstack.yaml"];

/// File name inside `./.fleetstack/` and `~/.config/fleetstack/`
const CLOUD_FILE: &str = "cloud.yaml";

const ENDPOINT_OVERRIDE: &str = "openstack.endpoint";

/// `~/.config/fleetstack`, created when missing
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("fleetstack");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the cloud configuration file
///
/// Lookup order:
/// 1. `FLEETSTACK_CONFIG_PATH`
/// 2. current directory: `fleetstack.local.yaml`, `fleetstack.yaml`
/// 3. `./.fleetstack/cloud.yaml`
/// 4. `~/.config/fleetstack/cloud.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points to missing file {}", CONFIG_PATH_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let local = current_dir.join(".fleetstack").join(CLOUD_FILE);
    if local.exists() {
        return Ok(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("fleetstack").join(CLOUD_FILE);
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Parse a configuration file, apply environment overrides and validate
pub fn load_config(path: &Path) -> Result<CloudConfig> {
    tracing::debug!("Loading cloud configuration from {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let mut config: CloudConfig =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Find and load the configuration file
pub fn load() -> Result<(PathBuf, CloudConfig)> {
    let path = find_config_file()?;
    let config = load_config(&path)?;
    Ok((path, config))
}

/// Let the usual `OS_*` variables override the credentials of the file
///
/// `OS_AUTH_URL` becomes the identity endpoint of every compute template.
pub fn apply_env_overrides(config: &mut CloudConfig) {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

    let username = var("OS_USERNAME");
    let tenant = var("OS_TENANT_NAME");
    if username.is_some() || tenant.is_some() {
        let (file_tenant, file_username) = config
            .user
            .user
            .split_once(':')
            .map(|(t, u)| (t.to_string(), u.to_string()))
            .unwrap_or_default();
        config.user.user = format!(
            "{}:{}",
            tenant.unwrap_or(file_tenant),
            username.unwrap_or(file_username)
        );
        tracing::debug!("Using account {} from the environment", config.user.user);
    }

    if let Some(password) = var("OS_PASSWORD") {
        config.user.api_key = password;
    }

    if let Some(auth_url) = var("OS_AUTH_URL") {
        for template in config.templates.values_mut() {
            template.overrides.insert(
                ENDPOINT_OVERRIDE.to_string(),
                serde_json::Value::String(auth_url.clone()),
            );
        }
    }
}
