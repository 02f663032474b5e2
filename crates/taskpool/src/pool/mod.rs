//! Worker pool: workers, the dispatcher that feeds them, and the [`TaskPool`]
//! handle that owns both.
//!
//! ## Structure
//!
//! - [`manager`] - public [`TaskPool`] handle and its lifecycle.
//! - `dispatcher` - single task matching submitted jobs to idle workers.
//! - `worker` - per-worker execution loop.

mod dispatcher;
pub mod manager;
mod worker;


pub use manager::TaskPool;
