//! Persistent State - key-value persistence for engine state
//!
//! A small substrate used by the workflow manager and the device
//! resolution layer to load and save whole documents under a single
//! namespaced key.
//!
//! - `StateBackend`: where the bytes live (memory, JSON files)
//! - `PersistentState<T>`: a typed view over one key with a default
//!
//! # Example
//!
//! ```ignore
//! use persistent_state::{create_persistent_state, JsonFileBackend};
//!
//! let backend = Arc::new(JsonFileBackend::new(".macro-host/state"));
//! let state = create_persistent_state(backend, "macro_workflows", HashMap::new());
//! let workflows = state.get_state().await;
//! ```

mod backend;
mod error;
mod state;

pub use backend::{JsonFileBackend, MemoryBackend, StateBackend};
pub use error::{Result, StateError};
pub use state::{create_persistent_state, PersistentState};
