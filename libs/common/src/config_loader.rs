//! Configuration loading helpers
//!
//! Priority: ENV > YAML file > compiled defaults

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Configuration extraction failed: {0}")]
    Extract(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigLoadError {
    fn from(err: figment::Error) -> Self {
        ConfigLoadError::Extract(Box::new(err))
    }
}

/// Load `T` from defaults, a YAML file and prefixed environment variables.
///
/// `explicit` must exist when given. Otherwise `fallback` is merged only if
/// present on disk. Environment keys use `__` for nesting, e.g.
/// `IRRIGD_SCHEDULE__ACQUISITION_INTERVAL_SECS=30`.
pub fn load_layered<T>(
    explicit: Option<&Path>,
    fallback: &Path,
    env_prefix: &str,
) -> Result<T, ConfigLoadError>
where
    T: DeserializeOwned + Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigLoadError::NotFound(path.to_path_buf()));
            }
            info!("Using configuration file {}", path.display());
            figment = figment.merge(Yaml::file(path));
        },
        None if fallback.exists() => {
            info!("Using configuration file {}", fallback.display());
            figment = figment.merge(Yaml::file(fallback));
        },
        None => {
            debug!(
                "No configuration file at {}, using defaults",
                fallback.display()
            );
        },
    }

    let config = figment
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()?;
    Ok(config)
}
