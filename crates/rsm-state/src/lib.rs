//! The state-store contract consumed by the ingestion engine: a small
//! JSON-shaped blob of `{stage, seq}`, read once at startup and written on
//! every checkpoint advance.

mod file;

pub use file::JsonFileStateStore;

use serde::{Deserialize, Serialize};

/// Persisted pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Pipeline stage name (always `"watch"` once the watcher has started).
    #[serde(default = "default_stage")]
    pub stage: String,
    /// Exclusive low-water mark: all changes with `seq <= seq` are durably applied.
    #[serde(default)]
    pub seq: i64,
}

fn default_stage() -> String {
    "watch".to_string()
}

impl Default for State {
    fn default() -> Self {
        Self {
            stage: default_stage(),
            seq: 0,
        }
    }
}

/// A partial update to [`State`]. Fields left `None` are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatePatch {
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub seq: Option<i64>,
}

impl StatePatch {
    pub fn stage(stage: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            seq: None,
        }
    }

    pub fn seq(seq: i64) -> Self {
        Self {
            stage: None,
            seq: Some(seq),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("read state: {0}")]
    Read(#[source] anyhow::Error),
    #[error("write state: {0}")]
    Write(#[source] anyhow::Error),
}

/// The external state store: read/write a small JSON-shaped state blob.
///
/// Implementations are not required to serialize concurrent calls or enforce
/// monotonicity themselves — the engine's checkpointer wrapper does both on
/// top of whatever implementation is plugged in here.
pub trait StateStore: Send + Sync {
    /// Read the current persisted state. Implementations should return
    /// `State::default()` when nothing has been persisted yet.
    async fn get(&self) -> Result<State, StateError>;

    /// Apply a partial update and make it durable before returning.
    async fn save(&self, patch: StatePatch) -> Result<(), StateError>;
}
