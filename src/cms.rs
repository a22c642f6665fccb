//! Page generation for the content-management site.
//!
//! Each successful run gets a numbered page directory under the pages root
//! (`<N>.EO_<N>/item.md`) and refreshes the site's landing page. Both files
//! are rendered from line-oriented templates containing placeholder tokens.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Timelike;
use tracing::info;

use crate::error::StageError;
use crate::product::Product;

const PAGE_FILE: &str = "item.md";
/// Trailing keywords the catalog appends to every product; never shown.
const TRAILING_KEYWORDS: usize = 6;

#[derive(Debug, Clone)]
pub struct CmsSettings {
    pub content_root: PathBuf,
    pub pages_dir: String,
    pub template: PathBuf,
    pub default_template: PathBuf,
    pub default_page: PathBuf,
}

impl CmsSettings {
    pub fn pages_root(&self) -> PathBuf {
        self.content_root.join(&self.pages_dir)
    }

    pub fn default_page_path(&self) -> PathBuf {
        self.content_root.join(&self.default_page)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateValues {
    pub now: String,
    pub tags: String,
    pub number: String,
    pub product_name: String,
    pub product_url: String,
    pub start_time: String,
    pub proc_time: String,
    pub product_size: String,
    pub product_path: String,
    pub cloud_cover: String,
}

impl TemplateValues {
    pub fn new(
        now: &str,
        number: u32,
        product: &Product,
        artifact_url: &str,
        proc_time_secs: f64,
    ) -> Self {
        let start_time = if product.start_date.nanosecond() == 0 {
            product.start_date.format("%Y-%m-%d %H:%M:%S").to_string()
        } else {
            product.start_date.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
        };
        Self {
            now: now.to_string(),
            tags: render_tags(&product.keywords),
            number: number.to_string(),
            product_name: product.title.clone(),
            product_url: artifact_url.to_string(),
            start_time,
            proc_time: format!("{proc_time_secs:.2}"),
            product_size: format!("{:.2}", product.size_bytes as f64 / (1024.0 * 1024.0)),
            product_path: product.identifier.clone(),
            cloud_cover: format!("{:.2}", product.cloud_cover),
        }
    }
}

/// Public keyword names, quotes stripped, without the catalog's trailing
/// boilerplate entries.
pub fn render_tags(keywords: &[String]) -> String {
    let visible: Vec<String> = keywords
        .iter()
        .filter(|name| !name.starts_with('_'))
        .map(|name| name.replace('\'', ""))
        .collect();
    let keep = visible.len().saturating_sub(TRAILING_KEYWORDS);
    visible[..keep].join(", ")
}

pub fn render_line(line: &str, values: &TemplateValues) -> String {
    let substitutions: [(&str, &str); 10] = [
        ("_NOW", &values.now),
        ("_TAGS", &values.tags),
        ("_MAXNUM", &values.number),
        ("_PRODNAME", &values.product_name),
        ("_PRODURL", &values.product_url),
        ("_STARTTIME", &values.start_time),
        ("_PROCTIME", &values.proc_time),
        ("_PRODSIZE", &values.product_size),
        ("_PRODPATH", &values.product_path),
        ("_CCOVERAGE", &values.cloud_cover),
    ];
    let mut rendered = line.to_string();
    for (token, value) in substitutions {
        if rendered.contains(token) {
            rendered = rendered.replace(token, value);
        }
    }
    rendered
}

pub fn render_template(template: &str, values: &TemplateValues) -> String {
    template
        .split_inclusive('\n')
        .map(|line| render_line(line, values))
        .collect()
}

/// One more than the highest integer-prefixed directory under `pages_root`,
/// or 1 when there is none.
pub fn next_content_number(pages_root: &Path) -> io::Result<u32> {
    let mut highest = 0u32;
    for entry in fs::read_dir(pages_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(number) = name
            .split('.')
            .next()
            .and_then(|prefix| prefix.parse::<u32>().ok())
        {
            highest = highest.max(number);
        }
    }
    Ok(highest + 1)
}

pub struct CmsPublisher {
    settings: CmsSettings,
}

impl CmsPublisher {
    pub fn new(settings: CmsSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CmsSettings {
        &self.settings
    }

    /// Writes the numbered item page and refreshes the landing page.
    /// Returns the item page path.
    pub fn publish(
        &self,
        now: &str,
        product: &Product,
        artifact_url: &str,
        proc_time_secs: f64,
    ) -> Result<PathBuf, StageError> {
        let pages_root = self.settings.pages_root();
        let number = next_content_number(&pages_root).map_err(|err| {
            StageError::CmsPublish(format!("failed to scan {}: {err}", pages_root.display()))
        })?;
        info!(number, "Next content directory");
        let values = TemplateValues::new(now, number, product, artifact_url, proc_time_secs);

        let page_dir = pages_root.join(format!("{number}.EO_{number}"));
        fs::create_dir(&page_dir).map_err(|err| {
            StageError::CmsPublish(format!("failed to create {}: {err}", page_dir.display()))
        })?;
        let item_page = page_dir.join(PAGE_FILE);
        render_to(&self.settings.template, &item_page, &values)?;
        render_to(
            &self.settings.default_template,
            &self.settings.default_page_path(),
            &values,
        )?;
        Ok(item_page)
    }
}

fn render_to(template: &Path, destination: &Path, values: &TemplateValues) -> Result<(), StageError> {
    info!(template = %template.display(), page = %destination.display(), "Rendering page");
    let source = fs::read_to_string(template).map_err(|err| {
        StageError::CmsPublish(format!("failed to read {}: {err}", template.display()))
    })?;
    fs::write(destination, render_template(&source, values)).map_err(|err| {
        StageError::CmsPublish(format!("failed to write {}: {err}", destination.display()))
    })
}
