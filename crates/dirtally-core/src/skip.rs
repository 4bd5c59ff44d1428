//! Name-based skip filter shared by every traversal strategy.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::path::is_within;

/// Decide whether an entry is skipped.
///
/// Names starting with `prefix` are skipped unless `full_path` lies inside
/// `recycle_bin`; a name equal to `file_name` is always skipped. Both name
/// comparisons ignore ASCII case.
pub fn is_skipped(
    name: &str,
    full_path: &Path,
    recycle_bin: Option<&Path>,
    prefix: &str,
    file_name: &str,
) -> bool {
    if !file_name.is_empty() && name.eq_ignore_ascii_case(file_name) {
        return true;
    }
    if prefix.is_empty() || !starts_with_ignore_case(name, prefix) {
        return false;
    }
    !recycle_bin.is_some_and(|bin| is_within(full_path, bin))
}

fn starts_with_ignore_case(name: &str, prefix: &str) -> bool {
    name.len() >= prefix.len()
        && name.is_char_boundary(prefix.len())
        && name[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Skip filter configured from a [`ScanConfig`], with optional extra globs.
#[derive(Debug, Clone)]
pub struct SkipFilter {
    prefix: String,
    file_name: String,
    recycle_bin_name: String,
    ignore: Option<GlobSet>,
}

impl SkipFilter {
    /// Build the filter, compiling the configured ignore patterns.
    pub fn from_config(config: &ScanConfig) -> Result<Self, ScanError> {
        let ignore = if config.ignore_patterns.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &config.ignore_patterns {
                let glob = Glob::new(pattern).map_err(|e| ScanError::InvalidConfig {
                    message: format!("bad ignore pattern '{pattern}': {e}"),
                })?;
                builder.add(glob);
            }
            Some(builder.build().map_err(|e| ScanError::InvalidConfig {
                message: e.to_string(),
            })?)
        };

        Ok(Self {
            prefix: config.skip_prefix.clone(),
            file_name: config.skip_file_name.clone(),
            recycle_bin_name: config.recycle_bin_name.clone(),
            ignore,
        })
    }

    /// Recycle bin location for a volume root.
    pub fn recycle_bin_for(&self, volume_root: &Path) -> Option<PathBuf> {
        (!self.recycle_bin_name.is_empty()).then(|| volume_root.join(&self.recycle_bin_name))
    }

    /// Whether the entry `name` at `full_path` should be left out of the tree.
    pub fn should_skip(&self, name: &str, full_path: &Path, recycle_bin: Option<&Path>) -> bool {
        if is_skipped(name, full_path, recycle_bin, &self.prefix, &self.file_name) {
            return true;
        }
        self.ignore
            .as_ref()
            .is_some_and(|set| set.is_match(name) || set.is_match(full_path))
    }
}

impl Default for SkipFilter {
    fn default() -> Self {
        Self {
            prefix: "$".to_string(),
            file_name: "desktop.ini".to_string(),
            recycle_bin_name: "$Recycle.Bin".to_string(),
            ignore: None,
        }
    }
}
