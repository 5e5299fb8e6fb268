use std::path::PathBuf;

use crate::error::{Error, Result};

/// Default segment size bound: 10 MiB.
pub const DEFAULT_SEGMENT_SIZE: u64 = 10 * 1024 * 1024;

/// Configuration for opening a store.
///
/// Exactly one of a data directory or temporary mode must be chosen. The
/// segment size bound must stay constant for the lifetime of a directory;
/// reopening with a different bound invalidates every recorded offset.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory to recover from or create (conflicts with `temporary`)
    pub dir: Option<PathBuf>,

    /// Run against a throwaway directory, removed when the store is dropped
    pub temporary: bool,

    /// Maximum segment file size in bytes (default: 10 MiB)
    pub segment_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: None,
            temporary: false,
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

impl StoreConfig {
    /// Create a new config with the given data directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Default::default()
        }
    }

    /// Create a config for a temporary database
    pub fn temporary() -> Self {
        Self {
            temporary: true,
            ..Default::default()
        }
    }

    /// Set the data directory
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Set the segment size bound
    pub fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Check the option combination before any file is touched.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.dir.is_some() && self.temporary {
            return Err(Error::Config(
                "cannot use a data directory and a temporary database together".to_string(),
            ));
        }
        if self.dir.is_none() && !self.temporary {
            return Err(Error::Config(
                "either a data directory or a temporary database is required".to_string(),
            ));
        }
        if self.segment_size == 0 {
            return Err(Error::Config("segment size must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.dir, None);
        assert!(!config.temporary);
        assert_eq!(config.segment_size, DEFAULT_SEGMENT_SIZE);
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::new("/tmp/test").segment_size(100);
        assert_eq!(config.dir, Some(PathBuf::from("/tmp/test")));
        assert_eq!(config.segment_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_conflicting_options_rejected() {
        let config = StoreConfig::new("/tmp/test");
        let config = StoreConfig {
            temporary: true,
            ..config
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_directory_rejected() {
        let config = StoreConfig::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_segment_size_rejected() {
        let config = StoreConfig::new("/tmp/test").segment_size(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
