//! Scan configuration: serde defaults, optional TOML file, CLI overrides.

use crate::error::{Result, ScanError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings for extraction, probing and persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Directories walked for source files, in order.
    pub roots: Vec<PathBuf>,
    /// File extensions (without the dot) treated as PHP source.
    pub extensions: Vec<String>,
    /// Files larger than this are skipped.
    pub max_file_bytes: u64,
    pub batch_size: usize,
    pub timeout: Duration,
    /// Never re-probe hosts already recorded as passing (until reset).
    pub sticky_passing: bool,
    /// Require an HTTP GET < 400 before attempting the TLS probe.
    pub reachability_precheck: bool,
    /// PEM certificate trusted in addition to the system roots.
    pub ca_file: Option<PathBuf>,
    /// JSON file backing the result store.
    pub store_path: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("modules"), PathBuf::from("themes")],
            extensions: ["php", "module", "inc", "install", "theme"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_bytes: 4 * 1024 * 1024,
            batch_size: 10,
            timeout: crate::probe::DEFAULT_TIMEOUT,
            sticky_passing: true,
            reachability_precheck: false,
            ca_file: None,
            store_path: PathBuf::from("tls_checker_results.json"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    scan: Option<ScanSection>,
    store: Option<StoreSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScanSection {
    directories: Option<Vec<PathBuf>>,
    extensions: Option<Vec<String>>,
    max_file_bytes: Option<u64>,
    batch_size: Option<usize>,
    timeout_secs: Option<u64>,
    sticky_passing: Option<bool>,
    reachability_precheck: Option<bool>,
    ca_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoreSection {
    path: Option<PathBuf>,
}

/// Parse TOML configuration text and merge it over the defaults.
pub fn parse_config_str(s: &str) -> Result<ScanConfig> {
    let file: FileConfig = toml::from_str(s).map_err(|e| ScanError::Config(e.to_string()))?;
    let mut config = ScanConfig::default();

    if let Some(scan) = file.scan {
        if let Some(dirs) = scan.directories {
            config.roots = dirs;
        }
        if let Some(exts) = scan.extensions {
            config.extensions = exts
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect();
        }
        if let Some(max) = scan.max_file_bytes {
            config.max_file_bytes = max;
        }
        if let Some(size) = scan.batch_size {
            config.batch_size = size;
        }
        if let Some(secs) = scan.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(sticky) = scan.sticky_passing {
            config.sticky_passing = sticky;
        }
        if let Some(precheck) = scan.reachability_precheck {
            config.reachability_precheck = precheck;
        }
        if scan.ca_file.is_some() {
            config.ca_file = scan.ca_file;
        }
    }

    if let Some(path) = file.store.and_then(|s| s.path) {
        config.store_path = path;
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a TOML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ScanConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| ScanError::Config(format!("failed to read {}: {e}", path.display())))?;
    parse_config_str(&content)
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ScanError::Config("batch_size must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(ScanError::Config("timeout must be non-zero".into()));
        }
        if self.roots.is_empty() {
            return Err(ScanError::Config("at least one directory is required".into()));
        }
        Ok(())
    }

    /// Split a comma-separated `--directory` value into roots.
    pub fn set_roots_from_list(&mut self, list: &str) {
        let roots: Vec<PathBuf> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        if !roots.is_empty() {
            self.roots = roots;
        }
    }
}
