//! The search-index contract consumed by the ingestion engine: upsert,
//! delete, and faceted search over the primary index, plus a distinct
//! "lost" index used for forensic records of exhausted jobs.

mod http;

pub use http::HttpIndexClient;

use serde::{Deserialize, Serialize};

/// A formatted, indexable record. `object_id` is the index's primary key
/// (the package id); `fields` is whatever the formatter produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub object_id: String,
    #[serde(flatten)]
    pub fields: serde_json::Value,
}

/// Sort order requested when reading facet statistics (§9: the scanner
/// needs ascending-by-value so the smallest expiry bucket sorts first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetSort {
    Alphabetical,
}

/// One bucket of a faceted count, e.g. `{ value: "1700000000", count: 42 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetValue {
    pub value: String,
    pub count: u64,
}

/// A candidate record surfaced by the refresh scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleRecord {
    pub id: String,
    #[serde(default)]
    pub rev: Option<String>,
    /// Unix timestamp (seconds) of the record's last modification, used to
    /// discard candidates the live feed has already produced a fresher
    /// update for.
    pub modified: i64,
}

/// A forensic record of a job that exhausted its retries, written
/// best-effort to the side "lost" index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LostEntry {
    pub id: String,
    pub seq: i64,
    pub retry: u32,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index request failed: {0}")]
    Request(#[source] anyhow::Error),
}

/// Parameters for a faceted search over `_searchInternal.expiresAt`-style
/// fields (§4.H).
#[derive(Debug, Clone)]
pub struct FacetQuery {
    pub field: String,
    pub sort: FacetSort,
}

pub trait IndexClient: Send + Sync {
    async fn upsert(&self, record: Record) -> Result<(), IndexError>;

    async fn delete(&self, id: &str) -> Result<(), IndexError>;

    /// Facet statistics for `query.field`, sorted per `query.sort`.
    async fn facet_values(&self, query: FacetQuery) -> Result<Vec<FacetValue>, IndexError>;

    /// Up to `hits_per_page` records whose `query.field` equals `value`.
    async fn search_by_facet(
        &self,
        field: &str,
        value: &str,
        hits_per_page: usize,
    ) -> Result<Vec<StaleRecord>, IndexError>;

    /// Best-effort write to the side "lost" index. Callers must not retry
    /// on failure (§9).
    async fn upsert_lost(&self, entry: LostEntry) -> Result<(), IndexError>;
}
