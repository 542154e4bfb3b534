//! TaskStore - JSON-file backed task store with locking, a fallback
//! primary/secondary wrapper, and namespaced loop state.
//!
//! # Modules
//!
//! - [`domain`] - `Task`, `Event`, `Priority`, and the other data types
//! - [`store`] - the `Store` trait and the state machine it enforces
//! - [`json_store`] - the canonical JSON file adapter
//! - [`fallback`] - primary/secondary composition with an offline queue
//! - [`state`] - namespaced loop resume state + lock
//! - [`lock`] - the advisory file lock shared by `json_store` and `state`
//! - [`error`] - the store/state error taxonomy

pub mod domain;
pub mod error;
pub mod fallback;
pub mod json_store;
pub mod lock;
pub mod state;
pub mod store;

pub use domain::{Actor, Event, EventLevel, EventType, Filter, NewTask, Priority, Task, TaskStatus, Timestamps};
pub use error::{StateError, StoreError};
pub use fallback::FallbackStore;
pub use json_store::JsonTaskAdapter;
pub use lock::LockGuard;
pub use state::{LoopState, StateStore};
pub use store::{PingResult, Store, is_valid_transition};
