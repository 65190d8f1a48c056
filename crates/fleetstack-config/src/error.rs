use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error(
        "Cloud configuration file not found. Looked in:\n\
        - the current directory: fleetstack.local.yaml, fleetstack.yaml\n\
        - ./.fleetstack/cloud.yaml\n\
        - ~/.config/fleetstack/cloud.yaml\n\
        A path can also be given with the FLEETSTACK_CONFIG_PATH environment variable"
    )]
    ConfigFileNotFound,

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Invalid(#[from] fleetstack_cloud::CloudError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
