//! Read-model projection infrastructure: cursor/watermark persistence and
//! replay tooling. Concrete projections live alongside the aggregates they
//! observe, not in this crate.

pub mod cursor_store;
pub mod replay;

pub use cursor_store::{InMemoryProjectionCursorStore, ProjectionCursorStore};
pub use replay::{replay_projection, ApplyEnvelopeFn, ClearTenantFn, ReplayError, ReplayHandle, ReplayPhase, ReplayProgress};
