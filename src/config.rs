use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::PagerOptions;

/// Settings for the shell. Read from a json file, every field optional, then overridden from the
/// command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the database files
    pub data_dir: PathBuf,
    /// Btree order `t`
    pub order: usize,
    /// `env_logger` filter used when `RUST_LOG` is not set
    pub log_level: String,
    /// Permission bits for newly created files
    pub file_mode: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            order: 8,
            log_level: "info".to_string(),
            file_mode: 0o644,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.order < 2 {
            return Err(Error::InvalidOrder(self.order));
        }
        Ok(())
    }

    pub fn pager_options(&self) -> PagerOptions {
        PagerOptions {
            mode: self.file_mode,
            ..PagerOptions::default()
        }
    }

    pub fn tree_path(&self) -> PathBuf {
        self.data_dir.join("tree.db")
    }

    pub fn pages_path(&self) -> PathBuf {
        self.data_dir.join("pages.db")
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::Config;
    use crate::error::Error;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "order": 4, "data_dir": "/tmp/db" }}"#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(4, config.order);
        assert_eq!("/tmp/db", config.data_dir.to_str().unwrap());
        assert_eq!("info", config.log_level);
        assert_eq!(0o644, config.pager_options().mode);
    }

    #[test]
    fn rejects_bad_files() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "order": 1 }}"#).unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(Error::InvalidOrder(1))
        ));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "colour": "blue" }}"#).unwrap();
        assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));
    }
}
