use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, CatalogQuery, FileCatalog, HttpCatalog, SortOrder};
use crate::cleanup::CleanupPlan;
use crate::cms::CmsSettings;
use crate::convert::{ConverterSettings, ProcessConverter};
use crate::pipeline::PipelineConfig;
use crate::product::SelectionWindow;
use crate::publish::PublishSettings;
use crate::storage::{Credentials, LocalObjectStore, ObjectStore, S3ObjectStore, S3Settings};

pub const CREDENTIALS_FILE: &str = ".bench-front.cfg";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BenchConfig {
    pub version: u32,
    pub work_dir: PathBuf,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cms: Option<CmsConfig>,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub max_records: u32,
    pub max_cloud_cover: f64,
    pub published_within_days: i64,
    pub processing_level: String,
    pub dataset: String,
    pub sort_param: String,
    pub sort_order: SortOrder,
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: "https://finder.eocloud.eu/resto/api/collections/Sentinel2/search.json".into(),
            file: None,
            max_records: 2000,
            max_cloud_cover: 20.0,
            published_within_days: 30,
            processing_level: "LEVELL1C".into(),
            dataset: "ESA-DATASET".into(),
            sort_param: "startDate".into(),
            sort_order: SortOrder::Descending,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub min_size: u64,
    pub max_size: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_size: 729_145_600,
            max_size: 1_029_145_600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub program: PathBuf,
    pub format: String,
    pub width: u32,
    pub style_file: PathBuf,
    pub timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/usr/local/snap/bin/pconvert"),
            format: "png".into(),
            width: 800,
            style_file: PathBuf::from("rgb_def.txt"),
            timeout_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StorageBackend {
    S3 {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials_file: Option<PathBuf>,
    },
    Local {
        root: PathBuf,
    },
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::S3 {
            endpoint: None,
            credentials_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    pub region: String,
    pub key_prefix: String,
    pub results_file: PathBuf,
    pub results_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: "front-office-sample".into(),
            region: "us-east-1".into(),
            key_prefix: "png/".into(),
            results_file: PathBuf::from("/var/www/html/results.out"),
            results_key: "png/results.out".into(),
            public_base_url: None,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CmsConfig {
    pub content_root: PathBuf,
    pub pages_dir: String,
    pub template: PathBuf,
    pub default_template: PathBuf,
    pub default_page: PathBuf,
}

impl Default for CmsConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("/var/www/html/grav/user/pages"),
            pages_dir: "02.eo_images".into(),
            template: PathBuf::from("template.md"),
            default_template: PathBuf::from("template_default.md"),
            default_page: PathBuf::from("01.home/default.md"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub product_prefix: String,
    pub keep: Vec<String>,
    pub cache_globs: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            product_prefix: "S2".into(),
            keep: Vec::new(),
            cache_globs: Vec::new(),
        }
    }
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: BenchConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config YAML: {}", path.display()))?;
        Ok(config)
    }

    /// Deployment defaults rooted at `work_dir`.
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| "~".into());
        Self {
            version: 1,
            work_dir: work_dir.into(),
            catalog: CatalogConfig::default(),
            selection: SelectionConfig::default(),
            converter: ConverterConfig::default(),
            storage: StorageConfig::default(),
            cms: Some(CmsConfig::default()),
            cleanup: CleanupConfig {
                cache_globs: vec![format!("{home}/.snap/var/cache/s2tbx/l1c-reader/6.0.0/*")],
                ..CleanupConfig::default()
            },
        }
    }

    /// Relative paths in the config are relative to `work_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    pub fn catalog_query(&self, now: DateTime<Utc>) -> CatalogQuery {
        let catalog = &self.catalog;
        CatalogQuery {
            endpoint: catalog.url.clone(),
            max_records: catalog.max_records,
            published_after: now - chrono::Duration::days(catalog.published_within_days),
            max_cloud_cover: catalog.max_cloud_cover,
            processing_level: catalog.processing_level.clone(),
            dataset: catalog.dataset.clone(),
            sort_param: catalog.sort_param.clone(),
            sort_order: catalog.sort_order,
        }
    }

    pub fn selection_window(&self) -> Result<SelectionWindow> {
        SelectionWindow::new(self.selection.min_size, self.selection.max_size)
    }

    pub fn converter_settings(&self) -> ConverterSettings {
        ConverterSettings {
            program: self.converter.program.clone(),
            format: self.converter.format.clone(),
            width: self.converter.width,
            style_file: self.resolve(&self.converter.style_file),
            timeout: Duration::from_secs(self.converter.timeout_secs),
        }
    }

    pub fn publish_settings(&self) -> PublishSettings {
        PublishSettings {
            key_prefix: self.storage.key_prefix.clone(),
            results_file: self.resolve(&self.storage.results_file),
            results_key: self.storage.results_key.clone(),
        }
    }

    pub fn cms_settings(&self) -> Option<CmsSettings> {
        self.cms.as_ref().map(|cms| CmsSettings {
            content_root: cms.content_root.clone(),
            pages_dir: cms.pages_dir.clone(),
            template: self.resolve(&cms.template),
            default_template: self.resolve(&cms.default_template),
            default_page: cms.default_page.clone(),
        })
    }

    pub fn cleanup_plan(&self) -> CleanupPlan {
        CleanupPlan {
            work_dir: self.work_dir.clone(),
            product_prefix: self.cleanup.product_prefix.clone(),
            keep: self.cleanup.keep.clone(),
            cache_globs: self.cleanup.cache_globs.clone(),
        }
    }

    pub fn credentials_path(&self) -> Option<PathBuf> {
        match &self.storage.backend {
            StorageBackend::S3 {
                credentials_file, ..
            } => Some(self.resolve(
                credentials_file
                    .as_deref()
                    .unwrap_or_else(|| Path::new(CREDENTIALS_FILE)),
            )),
            StorageBackend::Local { .. } => None,
        }
    }

    /// Reads the S3 credentials file. Local backends have none.
    pub fn load_credentials(&self) -> Result<Credentials> {
        let path = self
            .credentials_path()
            .unwrap_or_else(|| self.resolve(Path::new(CREDENTIALS_FILE)));
        Credentials::load(&path)
    }

    /// Endpoint from the config, falling back to the credentials file.
    pub fn storage_endpoint(&self, credentials: &Credentials) -> Option<String> {
        match &self.storage.backend {
            StorageBackend::S3 { endpoint, .. } => {
                endpoint.clone().or_else(|| credentials.endpoint.clone())
            }
            StorageBackend::Local { .. } => None,
        }
    }

    pub fn pipeline_config(&self, now: DateTime<Utc>) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            work_dir: self.work_dir.clone(),
            query: self.catalog_query(now),
            window: self.selection_window()?,
            publish: self.publish_settings(),
            cleanup: self.cleanup_plan(),
        })
    }

    pub fn build_catalog(&self) -> Box<dyn Catalog> {
        match &self.catalog.file {
            Some(file) => Box::new(FileCatalog::new(self.resolve(file))),
            None => Box::new(HttpCatalog::new(Duration::from_secs(
                self.catalog.timeout_secs,
            ))),
        }
    }

    pub fn build_converter(&self) -> ProcessConverter {
        ProcessConverter::new(self.converter_settings())
    }

    pub fn build_store(&self) -> Result<Box<dyn ObjectStore>> {
        let public_base = self.storage.public_base_url.clone();
        match &self.storage.backend {
            StorageBackend::S3 { endpoint, .. } => {
                let credentials = self.load_credentials()?;
                let settings = S3Settings {
                    endpoint: endpoint.clone(),
                    bucket: self.storage.bucket.clone(),
                    region: self.storage.region.clone(),
                    public_base,
                    timeout: Duration::from_secs(self.storage.timeout_secs),
                };
                Ok(Box::new(S3ObjectStore::new(settings, credentials)?))
            }
            StorageBackend::Local { root } => Ok(Box::new(LocalObjectStore::new(
                self.resolve(root),
                public_base,
            )?)),
        }
    }
}

/// Writes a default config to `destination`.
pub fn generate_default_config(work_dir: &Path, destination: &Path) -> Result<PathBuf> {
    let config = BenchConfig::with_work_dir(work_dir);
    let rendered = serde_yaml::to_string(&config)?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(destination, rendered)
        .with_context(|| format!("Failed to write config: {}", destination.display()))?;
    Ok(destination.to_path_buf())
}
