use std::path::PathBuf;

use xdg::{BaseDirectories, BaseDirectoriesError};

const CONFIG_FILE: &str = "config.toml";
const SNAPSHOT_DIR: &str = "screenshots";
const LOG_FILE: &str = "eye.log";

pub struct Fs {
    xdg: BaseDirectories,
}

impl Fs {
    pub fn new() -> Result<Self, BaseDirectoriesError> {
        let xdg = BaseDirectories::with_prefix("eye")?;
        Ok(Fs { xdg })
    }

    /// Existing configuration file, if the user has written one.
    pub fn config_file(&self) -> Option<PathBuf> {
        self.xdg.find_config_file(CONFIG_FILE)
    }

    pub fn snapshot_dir(&self) -> std::io::Result<PathBuf> {
        self.xdg.create_data_directory(SNAPSHOT_DIR)
    }

    pub fn log_file(&self) -> std::io::Result<PathBuf> {
        self.xdg.place_cache_file(LOG_FILE)
    }
}
