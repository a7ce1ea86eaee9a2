//! SQLite-backed persistence for the agent execution runtime.
//!
//! Implements `runtime_core::RunRepository` on top of a single
//! `rusqlite::Connection` guarded by a mutex, following the teacher's
//! sync-bridging idiom (`tokio::task::block_in_place` around blocking
//! queries) rather than a separate blocking pool.

mod store;

pub use store::{SqliteRunRepository, StoreError};
