use serde::Serialize;

use crate::config::{BenchConfig, StorageBackend};

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

pub fn validate_config(config: &BenchConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.version != 1 {
        report
            .errors
            .push(format!("Unsupported config version: {}", config.version));
    }

    if !config.work_dir.is_dir() {
        report.errors.push(format!(
            "Working directory does not exist: {}",
            config.work_dir.display()
        ));
    }

    report.merge(validate_catalog(config));
    report.merge(validate_selection(config));
    report.merge(validate_converter(config));
    report.merge(validate_storage(config));
    report.merge(validate_cms(config));
    report.merge(validate_cleanup(config));

    report
}

fn validate_catalog(config: &BenchConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let catalog = &config.catalog;

    if let Some(file) = &catalog.file {
        let path = config.resolve(file);
        if !path.is_file() {
            report.errors.push(format!(
                "Catalog response file not found: {}",
                path.display()
            ));
        }
        report
            .warnings
            .push("Catalog file is set; the catalog URL will not be queried".into());
    } else if !catalog.url.starts_with("http://") && !catalog.url.starts_with("https://") {
        report
            .errors
            .push(format!("Catalog URL must be http(s): '{}'", catalog.url));
    }

    if catalog.max_records == 0 {
        report
            .errors
            .push("catalog.max_records must be greater than zero".into());
    }
    if !(0.0..=100.0).contains(&catalog.max_cloud_cover) {
        report.errors.push(format!(
            "catalog.max_cloud_cover must be within 0-100, got {}",
            catalog.max_cloud_cover
        ));
    }
    if catalog.published_within_days < 0 {
        report
            .errors
            .push("catalog.published_within_days cannot be negative".into());
    }
    if catalog.timeout_secs == 0 {
        report
            .errors
            .push("catalog.timeout_secs must be greater than zero".into());
    }
    report
}

fn validate_selection(config: &BenchConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    if let Err(err) = config.selection_window() {
        report.errors.push(err.to_string());
    }
    report
}

fn validate_converter(config: &BenchConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let converter = &config.converter;

    if !converter.program.is_file() {
        report.warnings.push(format!(
            "Converter program not found: {}",
            converter.program.display()
        ));
    }
    let style = config.resolve(&converter.style_file);
    if !style.is_file() {
        report
            .warnings
            .push(format!("Converter style file not found: {}", style.display()));
    }
    if converter.width == 0 {
        report
            .errors
            .push("converter.width must be greater than zero".into());
    }
    if converter.format.trim().is_empty() {
        report
            .errors
            .push("converter.format cannot be empty".into());
    }
    if converter.timeout_secs == 0 {
        report
            .errors
            .push("converter.timeout_secs must be greater than zero".into());
    }
    report
}

fn validate_storage(config: &BenchConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let storage = &config.storage;

    match &storage.backend {
        StorageBackend::S3 { .. } => {
            if let Some(path) = config.credentials_path()
                && !path.is_file()
            {
                report.errors.push(format!(
                    "Storage credentials file not found: {}",
                    path.display()
                ));
            } else {
                match config.load_credentials() {
                    Ok(credentials) if config.storage_endpoint(&credentials).is_none() => {
                        report.errors.push(
                            "No storage endpoint: set storage.backend.endpoint or add it as line 3 of the credentials file"
                                .into(),
                        );
                    }
                    Ok(_) => {}
                    Err(err) => report.errors.push(format!("{err:#}")),
                }
            }
            if storage.bucket.trim().is_empty() {
                report
                    .errors
                    .push("storage.bucket cannot be empty".into());
            }
        }
        StorageBackend::Local { root } => {
            report.warnings.push(format!(
                "Local storage backend in use; objects are written under {}",
                config.resolve(root).display()
            ));
        }
    }

    if storage.key_prefix.is_empty() {
        report
            .warnings
            .push("storage.key_prefix is empty; artifacts land at the bucket root".into());
    }
    if storage.results_key.trim().is_empty() {
        report
            .errors
            .push("storage.results_key cannot be empty".into());
    }
    if storage.timeout_secs == 0 {
        report
            .errors
            .push("storage.timeout_secs must be greater than zero".into());
    }
    report
}

fn validate_cms(config: &BenchConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let Some(settings) = config.cms_settings() else {
        return report;
    };

    for template in [&settings.template, &settings.default_template] {
        if !template.is_file() {
            report
                .errors
                .push(format!("CMS template not found: {}", template.display()));
        }
    }
    let pages_root = settings.pages_root();
    if !pages_root.is_dir() {
        report.errors.push(format!(
            "CMS pages directory does not exist: {}",
            pages_root.display()
        ));
    }
    report
}

fn validate_cleanup(config: &BenchConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let cleanup = &config.cleanup;

    if cleanup.product_prefix.is_empty() {
        report
            .warnings
            .push("cleanup.product_prefix is empty; working directory is never cleaned".into());
    }
    for (idx, pattern) in cleanup.cache_globs.iter().enumerate() {
        if let Err(err) = glob::Pattern::new(pattern) {
            report.errors.push(format!(
                "Cache pattern {} ('{}') is not a valid glob: {}",
                idx + 1,
                pattern,
                err
            ));
        }
    }
    report
}
