use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StageError;
use crate::product::{CandidateSet, Product};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
        }
    }
}

/// A fully-formed catalog search.
#[derive(Debug, Clone)]
pub struct CatalogQuery {
    pub endpoint: String,
    pub max_records: u32,
    pub published_after: DateTime<Utc>,
    pub max_cloud_cover: f64,
    pub processing_level: String,
    pub dataset: String,
    pub sort_param: String,
    pub sort_order: SortOrder,
}

impl CatalogQuery {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("maxRecords", self.max_records.to_string()),
            ("processingLevel", self.processing_level.clone()),
            (
                "publishedAfter",
                self.published_after
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("cloudCover", format!("[0,{}]", self.max_cloud_cover)),
            ("sortParam", self.sort_param.clone()),
            ("sortOrder", self.sort_order.as_str().to_string()),
            ("dataset", self.dataset.clone()),
        ]
    }
}

/// Source of candidate products.
pub trait Catalog {
    fn search(&self, query: &CatalogQuery) -> Result<CandidateSet, StageError>;
}

pub struct HttpCatalog {
    agent: ureq::Agent,
}

impl HttpCatalog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Catalog for HttpCatalog {
    fn search(&self, query: &CatalogQuery) -> Result<CandidateSet, StageError> {
        let mut request = self.agent.get(&query.endpoint);
        for (key, value) in query.query_pairs() {
            request = request.query(key, &value);
        }
        info!(url = request.url(), "Querying catalog");

        let response = request
            .call()
            .map_err(|err| StageError::CatalogUnavailable(err.to_string()))?;
        debug!(status = response.status(), "Catalog responded");
        parse_candidates_from_reader(response.into_reader())
    }
}

/// Replays a saved search response from disk instead of calling the network.
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Catalog for FileCatalog {
    fn search(&self, _query: &CatalogQuery) -> Result<CandidateSet, StageError> {
        info!(file = %self.path.display(), "Reading catalog response from file");
        let file = File::open(&self.path).map_err(|err| {
            StageError::CatalogUnavailable(format!(
                "failed to open {}: {err}",
                self.path.display()
            ))
        })?;
        parse_candidates_from_reader(BufReader::new(file))
    }
}

pub fn parse_candidates(body: &str) -> Result<CandidateSet, StageError> {
    parse_candidates_from_reader(body.as_bytes())
}

pub fn parse_candidates_from_reader<R: Read>(reader: R) -> Result<CandidateSet, StageError> {
    let collection: FeatureCollection = serde_json::from_reader(reader).map_err(|err| {
        StageError::CatalogUnavailable(format!("unparseable catalog response: {err}"))
    })?;
    Ok(collection
        .features
        .into_iter()
        .map(|feature| feature.properties.into())
        .collect())
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    properties: FeatureProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeatureProperties {
    title: String,
    product_identifier: String,
    start_date: DateTime<Utc>,
    cloud_cover: f64,
    #[serde(default)]
    keywords: Vec<Keyword>,
    services: Services,
}

#[derive(Debug, Deserialize)]
struct Keyword {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Services {
    download: Download,
}

#[derive(Debug, Deserialize)]
struct Download {
    size: u64,
}

impl From<FeatureProperties> for Product {
    fn from(props: FeatureProperties) -> Self {
        Product {
            title: props.title,
            identifier: props.product_identifier,
            size_bytes: props.services.download.size,
            start_date: props.start_date,
            cloud_cover: props.cloud_cover,
            keywords: props.keywords.into_iter().map(|k| k.name).collect(),
        }
    }
}
