//! Scan configuration types.

use std::path::PathBuf;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for scanning operations.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScanConfig {
    /// Root paths to scan. More than one root puts them under a synthetic
    /// computer node.
    pub roots: Vec<PathBuf>,

    /// Try the bulk metadata index before falling back to enumeration.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub use_bulk_index: bool,

    /// Allow the bulk index for roots that are not a whole volume.
    #[builder(default = "false")]
    #[serde(default)]
    pub bulk_for_subtrees: bool,

    /// Interval between basic validation passes while scanning.
    #[builder(default = "default_validate_interval()")]
    #[serde(default = "default_validate_interval")]
    pub validate_interval: Duration,

    /// Add a free space node to whole-volume roots.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub show_free_space: bool,

    /// Add an unknown (unaccounted used space) node to whole-volume roots.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub show_unknown: bool,

    /// Names starting with this prefix are skipped outside the recycle bin.
    #[builder(default = "default_skip_prefix()")]
    #[serde(default = "default_skip_prefix")]
    pub skip_prefix: String,

    /// File name that is always skipped.
    #[builder(default = "default_skip_file_name()")]
    #[serde(default = "default_skip_file_name")]
    pub skip_file_name: String,

    /// Name of the recycle bin folder below a volume root.
    #[builder(default = "default_recycle_bin_name()")]
    #[serde(default = "default_recycle_bin_name")]
    pub recycle_bin_name: String,

    /// Additional glob patterns to skip.
    #[builder(default)]
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Number of threads for the index reader walk (0 = auto-detect).
    #[builder(default = "0")]
    #[serde(default)]
    pub threads: usize,

    /// Cross filesystem boundaries. When off, a directory mounted from
    /// another filesystem is listed but not entered.
    #[builder(default = "false")]
    #[serde(default)]
    pub cross_filesystems: bool,
}

fn default_true() -> bool {
    true
}

fn default_validate_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_skip_prefix() -> String {
    "$".to_string()
}

fn default_skip_file_name() -> String {
    "desktop.ini".to_string()
}

fn default_recycle_bin_name() -> String {
    "$Recycle.Bin".to_string()
}

impl ScanConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.roots {
            Some(ref roots) if roots.is_empty() => {
                return Err("At least one root path is required".to_string());
            }
            Some(ref roots) => {
                if roots.iter().any(|r| r.as_os_str().is_empty()) {
                    return Err("Root path cannot be empty".to_string());
                }
            }
            None => return Err("Root path is required".to_string()),
        }
        if let Some(interval) = self.validate_interval {
            if interval.is_zero() {
                return Err("Validate interval must be non-zero".to_string());
            }
        }
        Ok(())
    }
}

impl ScanConfig {
    /// Create a new scan config builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Create a simple config for scanning a single path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_roots(vec![root.into()])
    }

    /// Create a simple config for scanning several roots.
    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            use_bulk_index: true,
            bulk_for_subtrees: false,
            validate_interval: default_validate_interval(),
            show_free_space: true,
            show_unknown: true,
            skip_prefix: default_skip_prefix(),
            skip_file_name: default_skip_file_name(),
            recycle_bin_name: default_recycle_bin_name(),
            ignore_patterns: Vec::new(),
            threads: 0,
            cross_filesystems: false,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(".")
    }
}
