use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::CleanupWarning;

/// What to remove once a run is over, successful or not.
#[derive(Debug, Clone)]
pub struct CleanupPlan {
    pub work_dir: PathBuf,
    pub product_prefix: String,
    pub keep: Vec<String>,
    pub cache_globs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupSummary {
    pub removed: Vec<PathBuf>,
    pub warnings: Vec<CleanupWarning>,
}

impl CleanupSummary {
    fn warn(&mut self, path: &Path, message: impl Into<String>) {
        let warning = CleanupWarning {
            path: path.to_path_buf(),
            message: message.into(),
        };
        warn!(path = %warning.path.display(), "{warning}");
        self.warnings.push(warning);
    }
}

impl CleanupPlan {
    /// Best effort: every problem becomes a warning in the summary.
    pub fn run(&self) -> CleanupSummary {
        let mut summary = CleanupSummary::default();
        for pattern in &self.cache_globs {
            self.clear_glob(pattern, &mut summary);
        }
        self.clear_work_dir(&mut summary);
        summary
    }

    fn clear_glob(&self, pattern: &str, summary: &mut CleanupSummary) {
        let matches = match glob::glob(pattern) {
            Ok(matches) => matches,
            Err(err) => {
                summary.warn(Path::new(pattern), format!("invalid glob: {err}"));
                return;
            }
        };
        for entry in matches {
            match entry {
                Ok(path) => remove_entry(&path, summary),
                Err(err) => {
                    let path = err.path().to_path_buf();
                    summary.warn(&path, err.error().to_string());
                }
            }
        }
    }

    fn clear_work_dir(&self, summary: &mut CleanupSummary) {
        if self.product_prefix.is_empty() {
            return;
        }
        let entries = match fs::read_dir(&self.work_dir) {
            Ok(entries) => entries,
            Err(err) => {
                summary.warn(&self.work_dir, err.to_string());
                return;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    summary.warn(&self.work_dir, err.to_string());
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&self.product_prefix) || self.keep.contains(&name) {
                continue;
            }
            remove_entry(&entry.path(), summary);
        }
    }
}

fn remove_entry(path: &Path, summary: &mut CleanupSummary) {
    info!(path = %path.display(), "Deleting");
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return,
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => summary.removed.push(path.to_path_buf()),
        Err(err) => summary.warn(path, err.to_string()),
    }
}
