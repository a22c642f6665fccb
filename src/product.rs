use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One catalog entry. Read-only once the catalog has returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub title: String,
    pub identifier: String,
    pub size_bytes: u64,
    pub start_date: DateTime<Utc>,
    pub cloud_cover: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
}

pub type CandidateSet = Vec<Product>;

/// Inclusive byte-size window used to narrow candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SelectionWindow {
    min_size: u64,
    max_size: u64,
}

impl SelectionWindow {
    pub fn new(min_size: u64, max_size: u64) -> Result<Self> {
        if min_size > max_size {
            bail!("Selection window is inverted: min_size {min_size} > max_size {max_size}");
        }
        Ok(Self { min_size, max_size })
    }

    pub fn min_size(&self) -> u64 {
        self.min_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn contains(&self, size: u64) -> bool {
        (self.min_size..=self.max_size).contains(&size)
    }
}
