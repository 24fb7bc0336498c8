use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::{FacetQuery, FacetSort, FacetValue, IndexClient, IndexError, LostEntry, Record, StaleRecord};

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    facets: Vec<&'a str>,
    #[serde(rename = "facetFilters", skip_serializing_if = "Vec::is_empty")]
    facet_filters: Vec<String>,
    #[serde(rename = "hitsPerPage")]
    hits_per_page: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<StaleRecord>,
    #[serde(default, rename = "facets")]
    facets: serde_json::Map<String, serde_json::Value>,
}

/// HTTP implementation of [`IndexClient`] against an Algolia-shaped search
/// index API (the family of API the upstream registry mirror indexes into):
/// `POST /indexes/{name}/objects`, `DELETE /indexes/{name}/objects/{id}`,
/// `POST /indexes/{name}/query`.
pub struct HttpIndexClient {
    http: reqwest::Client,
    base: Url,
    index_name: String,
    lost_index_name: String,
}

impl HttpIndexClient {
    pub fn new(http: reqwest::Client, base: Url, index_name: String, lost_index_name: String) -> Self {
        Self {
            http,
            base,
            index_name,
            lost_index_name,
        }
    }

    fn objects_url(&self, index: &str) -> Result<Url, IndexError> {
        self.base
            .join(&format!("indexes/{index}/objects"))
            .map_err(|err| IndexError::Request(err.into()))
    }
}

impl IndexClient for HttpIndexClient {
    async fn upsert(&self, record: Record) -> Result<(), IndexError> {
        let url = self.objects_url(&self.index_name)?;
        let res = self
            .http
            .post(url)
            .json(&record)
            .send()
            .await
            .map_err(|err| IndexError::Request(err.into()))?;
        if !res.status().is_success() {
            return Err(IndexError::Request(anyhow::anyhow!(
                "http {} upserting {}",
                res.status(),
                record.object_id
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), IndexError> {
        let url = self
            .base
            .join(&format!("indexes/{}/objects/{id}", self.index_name))
            .map_err(|err| IndexError::Request(err.into()))?;
        let res = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|err| IndexError::Request(err.into()))?;
        if !res.status().is_success() && res.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(IndexError::Request(anyhow::anyhow!(
                "http {} deleting {id}",
                res.status()
            )));
        }
        Ok(())
    }

    async fn facet_values(&self, query: FacetQuery) -> Result<Vec<FacetValue>, IndexError> {
        let url = self
            .base
            .join(&format!("indexes/{}/query", self.index_name))
            .map_err(|err| IndexError::Request(err.into()))?;
        let res = self
            .http
            .post(url)
            .json(&SearchRequest {
                query: "",
                facets: vec![query.field.as_str()],
                facet_filters: vec![],
                hits_per_page: 0,
            })
            .send()
            .await
            .map_err(|err| IndexError::Request(err.into()))?;
        let body: SearchResponse = res
            .json()
            .await
            .map_err(|err| IndexError::Request(err.into()))?;

        let mut values: Vec<FacetValue> = body
            .facets
            .get(query.field.as_str())
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(value, count)| {
                        Some(FacetValue {
                            value: value.clone(),
                            count: count.as_u64()?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        match query.sort {
            FacetSort::Alphabetical => values.sort_by(|a, b| a.value.cmp(&b.value)),
        }
        Ok(values)
    }

    async fn search_by_facet(
        &self,
        field: &str,
        value: &str,
        hits_per_page: usize,
    ) -> Result<Vec<StaleRecord>, IndexError> {
        let url = self
            .base
            .join(&format!("indexes/{}/query", self.index_name))
            .map_err(|err| IndexError::Request(err.into()))?;
        let res = self
            .http
            .post(url)
            .json(&SearchRequest {
                query: "",
                facets: vec![],
                facet_filters: vec![format!("{field}:{value}")],
                hits_per_page,
            })
            .send()
            .await
            .map_err(|err| IndexError::Request(err.into()))?;
        let body: SearchResponse = res
            .json()
            .await
            .map_err(|err| IndexError::Request(err.into()))?;
        Ok(body.hits)
    }

    async fn upsert_lost(&self, entry: LostEntry) -> Result<(), IndexError> {
        let url = self.objects_url(&self.lost_index_name)?;
        let res = self
            .http
            .post(url)
            .json(&entry)
            .send()
            .await
            .map_err(|err| IndexError::Request(err.into()))?;
        if !res.status().is_success() {
            return Err(IndexError::Request(anyhow::anyhow!(
                "http {} writing lost entry {}",
                res.status(),
                entry.id
            )));
        }
        Ok(())
    }
}
