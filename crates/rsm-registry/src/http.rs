use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    ChangeDescriptor, ChangeFeed, ChangeFeedControl, ChangeFeedSubscription, Document,
    RegistryClient, RegistryError, RegistryInfo,
};

#[derive(Debug, Deserialize)]
struct DocResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    rev: Option<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    raw: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    update_seq: i64,
}

#[derive(Debug, Deserialize)]
struct ChangesResponse {
    #[serde(default)]
    results: Vec<ChangeDescriptor>,
    last_seq: i64,
}

/// HTTP implementation of [`RegistryClient`] and [`ChangeFeed`] against a
/// CouchDB-shaped registry mirror (the same family of API `_changes` and
/// per-revision document lookups that upstream registries expose).
pub struct HttpRegistryClient {
    http: reqwest::Client,
    base: Url,
}

impl HttpRegistryClient {
    pub fn new(http: reqwest::Client, base: Url) -> Self {
        Self { http, base }
    }
}

impl RegistryClient for HttpRegistryClient {
    /// An empty `rev` fetches the current revision — used by the refresh
    /// scanner (§4.H), which has no specific revision to pin to.
    async fn get_doc(&self, id: &str, rev: &str) -> Result<Document, RegistryError> {
        let url = self
            .base
            .join(&format!("registry/{id}"))
            .map_err(|err| RegistryError::Transport(err.into()))?;

        let mut request = self.http.get(url);
        if !rev.is_empty() {
            request = request.query(&[("rev", rev)]);
        }

        let res = request
            .send()
            .await
            .map_err(|err| RegistryError::Transport(err.into()))?;

        let status = res.status();
        let body: DocResponse = res
            .json()
            .await
            .map_err(|err| RegistryError::Transport(err.into()))?;

        if let Some(err) = body.error {
            if body.id.is_none() {
                return Err(RegistryError::LookupFailure(err));
            }
        }
        if !status.is_success() {
            return Err(RegistryError::Transport(anyhow::anyhow!(
                "http {status} fetching {id}@{rev}"
            )));
        }

        let id = body
            .id
            .ok_or_else(|| RegistryError::LookupFailure("missing id in response".to_string()))?;
        let rev = body.rev.unwrap_or_else(|| rev.to_string());

        Ok(Document {
            id,
            rev,
            deleted: body.deleted,
            raw: body.raw,
        })
    }

    async fn info(&self) -> Result<RegistryInfo, RegistryError> {
        let url = self
            .base
            .join("registry/_info")
            .map_err(|err| RegistryError::Transport(err.into()))?;
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| RegistryError::Transport(err.into()))?;
        let body: InfoResponse = res
            .json()
            .await
            .map_err(|err| RegistryError::Transport(err.into()))?;
        Ok(RegistryInfo {
            update_seq: body.update_seq,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChangesQuery {
    since: i64,
    include_docs: bool,
    batch_size: u32,
    feed: &'static str,
}

impl ChangeFeed for HttpRegistryClient {
    fn subscribe(&self, since: i64) -> ChangeFeedSubscription {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let control = ChangeFeedControl::new();

        let http = self.http.clone();
        let base = self.base.clone();
        let task_control = control.clone();

        tokio::spawn(async move {
            let mut since = since;
            loop {
                if task_control.is_stopped() {
                    return;
                }
                if task_control.is_paused() {
                    task_control.notified().notified().await;
                    continue;
                }

                let url = match base.join("registry/_changes") {
                    Ok(url) => url,
                    Err(err) => {
                        let _ = errors_tx.send(format!("bad registry base url: {err:#}"));
                        return;
                    }
                };

                let res = http
                    .get(url)
                    .query(&ChangesQuery {
                        since,
                        include_docs: false,
                        batch_size: 1,
                        feed: "longpoll",
                    })
                    .send()
                    .await;

                let body = match res {
                    Ok(res) => res.json::<ChangesResponse>().await,
                    Err(err) => Err(err),
                };

                match body {
                    Ok(body) => {
                        since = body.last_seq;
                        for change in body.results {
                            if events_tx.send(change).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = errors_tx.send(format!("change feed request failed: {err:#}"));
                        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    }
                }
            }
        });

        ChangeFeedSubscription {
            events: events_rx,
            errors: errors_rx,
            control,
        }
    }
}
