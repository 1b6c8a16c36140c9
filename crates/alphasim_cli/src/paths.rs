//! Cross-platform application paths

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CliError;

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, CliError> {
        let base = dirs::data_dir()
            .ok_or_else(|| CliError::Config("could not determine data directory".into()))?;
        Self::at(base.join("alphasim"))
    }

    /// Use `data_dir` instead of the OS default, creating it if needed.
    pub fn at(data_dir: PathBuf) -> Result<Self, CliError> {
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Config read when `--config` is not given, if it exists.
    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Default JSON-lines log for a command.
    pub fn log_file(&self, command: &str) -> PathBuf {
        self.data_dir.join(format!("{command}.jsonl"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_the_data_dir() {
        let dir = std::env::temp_dir().join(format!("alphasim-paths-{}", std::process::id()));
        let paths = AppPaths::at(dir.clone()).unwrap();
        assert!(dir.is_dir());
        assert_eq!(paths.config_file(), dir.join("config.json"));
        assert_eq!(paths.log_file("train"), dir.join("train.jsonl"));
        let _ = fs::remove_dir_all(&dir);
    }
}
