//! Configuration Module
//!
//! Default values for jobs and engine limits. Values come from a JSON file
//! (`--config`, or `<config dir>/tapeimgr/config.json`) and are overridden by
//! command line flags.

use crate::error::{Result, TapeImgrError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Smallest block size any tape drive will accept
pub const MIN_BLOCK_SIZE: usize = 512;

/// Default growth step for block size detection (same as the interactive nudge)
pub const DEFAULT_BLOCK_SIZE_STEP: usize = 512;

/// Default ceiling for block size detection (1 MiB)
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 1_048_576;

/// Largest read buffer ever allocated for one record (16 MiB)
pub const BLOCK_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// Name of the checksum manifest written to the output directory
pub const CHECKSUM_FILE_NAME: &str = "checksums.sha512";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapeImgrConfig {
    pub tape_device: String,
    pub init_block_size: usize,
    pub block_size_step: usize,
    pub max_block_size: usize,
    pub session_limit: u32,
    pub max_consecutive_read_errors: u32,
    pub prefix: String,
    pub extension: String,
    pub log_file_name: String,
    pub fill_blocks: bool,
}

impl Default for TapeImgrConfig {
    fn default() -> Self {
        Self {
            tape_device: "/dev/nst0".to_string(),
            init_block_size: MIN_BLOCK_SIZE,
            block_size_step: DEFAULT_BLOCK_SIZE_STEP,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            session_limit: 10_000,
            max_consecutive_read_errors: 1000,
            prefix: "session".to_string(),
            extension: "dat".to_string(),
            log_file_name: "tapeimgr.log".to_string(),
            fill_blocks: false,
        }
    }
}

impl TapeImgrConfig {
    /// Load configuration from an explicit path, or from the default location.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file silently yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default_path) if default_path.is_file() => Self::from_file(&default_path)?,
                _ => {
                    debug!("No configuration file found, using defaults");
                    Self::default()
                }
            },
        };

        config.check()?;
        Ok(config)
    }

    /// `<config dir>/tapeimgr/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tapeimgr").join("config.json"))
    }

    fn from_file(path: &Path) -> Result<Self> {
        info!("Loading configuration: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| {
            TapeImgrError::config(format!("Cannot read config file {:?}: {}", path, e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            TapeImgrError::config(format!("Invalid config file {:?}: {}", path, e))
        })
    }

    fn check(&self) -> Result<()> {
        if self.block_size_step == 0 {
            return Err(TapeImgrError::config("block_size_step must be positive"));
        }
        if self.max_block_size < MIN_BLOCK_SIZE {
            return Err(TapeImgrError::config(format!(
                "max_block_size must be at least {} bytes",
                MIN_BLOCK_SIZE
            )));
        }
        if self.max_block_size > BLOCK_SIZE_LIMIT {
            return Err(TapeImgrError::config(format!(
                "max_block_size must not exceed {} bytes",
                BLOCK_SIZE_LIMIT
            )));
        }
        if self.init_block_size == 0 || self.init_block_size > BLOCK_SIZE_LIMIT {
            return Err(TapeImgrError::config(format!(
                "init_block_size must be between 1 and {} bytes",
                BLOCK_SIZE_LIMIT
            )));
        }
        if self.session_limit == 0 {
            return Err(TapeImgrError::config("session_limit must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tape_device": "/dev/nst1", "fill_blocks": true}}"#).unwrap();

        let config = TapeImgrConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.tape_device, "/dev/nst1");
        assert!(config.fill_blocks);
        assert_eq!(config.block_size_step, DEFAULT_BLOCK_SIZE_STEP);
        assert_eq!(config.prefix, "session");
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = TapeImgrConfig::load(Some(&dir.path().join("nope.json")));
        assert!(matches!(result, Err(TapeImgrError::Config(_))));
    }

    #[test]
    fn test_zero_step_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"block_size_step": 0}}"#).unwrap();

        let result = TapeImgrConfig::load(Some(file.path()));
        assert!(matches!(result, Err(TapeImgrError::Config(_))));
    }

    #[test]
    fn test_oversized_block_size_ceiling_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_block_size": {}}}"#, BLOCK_SIZE_LIMIT + 1).unwrap();
        let result = TapeImgrConfig::load(Some(file.path()));
        assert!(matches!(result, Err(TapeImgrError::Config(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_block_size": {}}}"#, BLOCK_SIZE_LIMIT).unwrap();
        let config = TapeImgrConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.max_block_size, BLOCK_SIZE_LIMIT);
    }
}
