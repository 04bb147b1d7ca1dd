use std::path::{Path, PathBuf};

use eyre::OptionExt;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use sems::SemsConfig;
use sems_apdu_transport_pcsc::{PcscConfig, ReaderSelection};
use serde::Deserialize;

/// Settings read from `sems.toml` and `SEMS_*` variables
///
/// Nested keys are separated by `__` in variable names, e.g.
/// `SEMS_ENGINE__DIGEST=sha1`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    /// Script engine settings
    pub(crate) engine: SemsConfig,
    /// PC/SC connection settings
    pub(crate) pcsc: PcscConfig,
    /// How the card reader is picked
    pub(crate) reader: ReaderSelection,
    /// Reader holding the external element, if any
    pub(crate) relay_reader: Option<String>,
    /// Root of the script storage, defaults to the config directory
    pub(crate) storage: Option<PathBuf>,
}

impl Config {
    /// Resolved storage root
    pub(crate) fn storage_dir(&self) -> eyre::Result<PathBuf> {
        match &self.storage {
            Some(dir) => Ok(dir.clone()),
            None => config_dir(),
        }
    }
}

/// Returns the base config directory for sems. It also creates the directory
/// if it doesn't exist yet.
pub(crate) fn config_dir() -> eyre::Result<PathBuf> {
    let dir = std::env::home_dir()
        .ok_or_eyre("home directory not found")?
        .join(".sems");
    if !dir.exists() {
        std::fs::create_dir(&dir)?
    }
    Ok(dir)
}

pub(crate) fn load_config(path: Option<&Path>) -> eyre::Result<Config> {
    let file = match path {
        Some(path) => path.to_path_buf(),
        None => config_dir()?.join("sems.toml"),
    };

    Ok(Figment::new()
        .merge(Toml::file(file))
        .merge(Env::prefixed("SEMS_").split("__"))
        .extract()?)
}
