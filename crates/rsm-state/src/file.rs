use std::path::{Path, PathBuf};

use crate::{State, StateError, StatePatch, StateStore};

/// A [`StateStore`] backed by a single JSON file, written atomically via a
/// temp-file-then-rename, the same pattern the upstream client uses for its
/// inflight lease file.
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default path under `$XDG_STATE_HOME` (falling back to `~/.local/state`).
    pub fn default_path() -> anyhow::Result<PathBuf> {
        Ok(xdg_state_home()?.join("rsm").join("watch-state.json"))
    }
}

fn xdg_state_home() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_STATE_HOME") {
        let dir = PathBuf::from(dir);
        if dir.as_os_str().is_empty() {
            anyhow::bail!("XDG_STATE_HOME is set but empty");
        }
        return Ok(dir);
    }

    let home = std::env::var_os("HOME").ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    let home = PathBuf::from(home);
    if home.as_os_str().is_empty() {
        anyhow::bail!("HOME is set but empty");
    }
    Ok(home.join(".local").join("state"))
}

fn read_file(path: &Path) -> anyhow::Result<State> {
    if !path.exists() {
        return Ok(State::default());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_file(path: &Path, state: &State) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid state path: {}", path.display()))?;
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

impl StateStore for JsonFileStateStore {
    async fn get(&self) -> Result<State, StateError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_file(&path))
            .await
            .map_err(|err| StateError::Read(anyhow::anyhow!("join error: {err}")))?
            .map_err(StateError::Read)
    }

    async fn save(&self, patch: StatePatch) -> Result<(), StateError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut state = read_file(&path)?;
            if let Some(stage) = patch.stage {
                state.stage = stage;
            }
            if let Some(seq) = patch.seq {
                state.seq = seq;
            }
            write_file(&path, &state)
        })
        .await
        .map_err(|err| StateError::Write(anyhow::anyhow!("join error: {err}")))?
        .map_err(StateError::Write)
    }
}
