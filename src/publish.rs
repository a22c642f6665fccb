use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::StageError;
use crate::storage::ObjectStore;

/// Five-line KPI record consumed by the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiRecord {
    pub timestamp: String,
    pub duration_secs: f64,
    pub product_path: String,
    pub artifact_url: String,
}

impl fmt::Display for KpiRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.timestamp)?;
        writeln!(f, "{:.2}", self.duration_secs)?;
        writeln!(f, "0")?;
        writeln!(f, "{}", self.product_path)?;
        writeln!(f, "{}", self.artifact_url)
    }
}

#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub key_prefix: String,
    pub results_file: PathBuf,
    pub results_key: String,
}

pub struct Publisher<'a> {
    store: &'a dyn ObjectStore,
    settings: &'a PublishSettings,
}

impl<'a> Publisher<'a> {
    pub fn new(store: &'a dyn ObjectStore, settings: &'a PublishSettings) -> Self {
        Self { store, settings }
    }

    pub fn artifact_key(&self, path: &Path) -> String {
        let basename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}{}", self.settings.key_prefix, basename)
    }

    /// Uploads the artifact and returns its public URL.
    pub fn upload_artifact(&self, path: &Path) -> Result<String, StageError> {
        let key = self.artifact_key(path);
        info!(artifact = %path.display(), key = key.as_str(), "Uploading artifact");
        self.store
            .put_file(&key, path)
            .map_err(|err| StageError::Upload {
                key: key.clone(),
                reason: format!("{err:#}"),
            })?;
        Ok(self.store.public_url(&key))
    }

    pub fn publish_kpi(&self, record: &KpiRecord) -> Result<(), StageError> {
        let results = &self.settings.results_file;
        info!(results = %results.display(), "Writing KPI record");
        if let Some(parent) = results.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                StageError::KpiPublish(format!(
                    "failed to create {}: {err}",
                    parent.display()
                ))
            })?;
        }
        fs::write(results, record.to_string()).map_err(|err| {
            StageError::KpiPublish(format!("failed to write {}: {err}", results.display()))
        })?;
        self.store
            .put_file(&self.settings.results_key, results)
            .map_err(|err| {
                StageError::KpiPublish(format!(
                    "upload of '{}' failed: {err:#}",
                    self.settings.results_key
                ))
            })
    }
}
