use rsm_state::{State, StateError, StatePatch, StateStore};
use tokio::sync::Mutex;

/// Wraps an external [`StateStore`] with the two guarantees §4.C requires
/// that the store itself isn't trusted to provide: writes are serialized
/// (submission order == durable order), and `seq` is monotonic — a
/// `save({seq: s})` with `s < current.seq` (or `s < 0`) is a no-op.
pub(crate) struct Checkpointer<S> {
    store: S,
    current: Mutex<State>,
}

impl<S: StateStore> Checkpointer<S> {
    /// Load the current state from `store` and wrap it.
    pub(crate) async fn load(store: S) -> Result<Self, StateError> {
        let current = store.get().await?;
        Ok(Self {
            store,
            current: Mutex::new(current),
        })
    }

    pub(crate) async fn get(&self) -> State {
        self.current.lock().await.clone()
    }

    /// Apply `patch`, serialized against any other in-flight `save` call.
    /// A `seq` that would regress the checkpoint is dropped silently
    /// (callers may log it themselves; see [`Checkpointer::save_seq`]).
    pub(crate) async fn save(&self, patch: StatePatch) -> Result<(), StateError> {
        let mut guard = self.current.lock().await;

        let mut effective = patch.clone();
        if let Some(seq) = patch.seq {
            if seq < 0 || seq < guard.seq {
                effective.seq = None;
            }
        }
        if effective.stage.is_none() && effective.seq.is_none() {
            return Ok(());
        }

        self.store.save(effective.clone()).await?;

        if let Some(stage) = effective.stage {
            guard.stage = stage;
        }
        if let Some(seq) = effective.seq {
            guard.seq = seq;
        }
        Ok(())
    }

    /// Convenience wrapper for the common case of advancing just `seq`.
    /// Returns `true` if the checkpoint was actually advanced (`false` if
    /// the write was dropped as a regression).
    pub(crate) async fn save_seq(&self, seq: i64) -> Result<bool, StateError> {
        let before = self.get().await.seq;
        self.save(StatePatch::seq(seq)).await?;
        Ok(self.get().await.seq != before)
    }
}
