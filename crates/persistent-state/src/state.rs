//! Typed persistent state bound to a single key.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::StateBackend;
use crate::error::Result;

/// A typed document persisted under one key.
///
/// Reads never fail: an absent or unparsable document yields the default
/// value (the parse failure is logged). Writes propagate backend errors.
pub struct PersistentState<T> {
    key: String,
    default_value: T,
    backend: Arc<dyn StateBackend>,
    _marker: PhantomData<fn() -> T>,
}

/// Create a persistent state handle for `key` with a default value.
pub fn create_persistent_state<T>(
    backend: Arc<dyn StateBackend>,
    key: impl Into<String>,
    default_value: T,
) -> PersistentState<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    PersistentState {
        key: key.into(),
        default_value,
        backend,
        _marker: PhantomData,
    }
}

impl<T> PersistentState<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// The key this state is stored under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the current value, falling back to the default
    pub async fn get_state(&self) -> T {
        match self.backend.load(&self.key).await {
            Ok(Some(value)) => match serde_json::from_value::<T>(value) {
                Ok(state) => state,
                Err(e) => {
                    log::warn!("Failed to parse persisted state '{}': {}", self.key, e);
                    self.default_value.clone()
                }
            },
            Ok(None) => self.default_value.clone(),
            Err(e) => {
                log::warn!("Failed to load persisted state '{}': {}", self.key, e);
                self.default_value.clone()
            }
        }
    }

    /// Replace the stored value
    pub async fn set_state(&self, value: &T) -> Result<()> {
        let document = serde_json::to_value(value)?;
        self.backend.save(&self.key, &document).await
    }

    /// Remove the stored value so the next read yields the default
    pub async fn clear(&self) -> Result<()> {
        self.backend.remove(&self.key).await
    }
}

impl<T> std::fmt::Debug for PersistentState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentState")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
