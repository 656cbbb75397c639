//! Infrastructure layer: the C4-C11 runtime components wired onto
//! concrete (in-memory, reference) adapters behind the traits `ledgerflow-core`
//! and `ledgerflow-events` define.

/// Append-only event store boundary (C4).
pub mod event_store;

/// Command Orchestrator (C5).
pub mod command_orchestrator;

/// Dynamic Consistency Boundary executor (C6).
pub mod dcb;

/// Event bus subscription/delivery infrastructure (C7).
pub mod event_bus;

/// Process Manager executor (C8).
pub mod process_manager;

/// Durable Executor: crash-safe intent/completion bracketing (C9).
pub mod durable;

/// Integration Publisher: domain-to-integration event translation (C10).
pub mod integration;

/// Definition registries (C11).
pub mod registries;

/// Read-model projections, cursors, and replay tooling.
pub mod projections;

/// Background job system backing retries, dead-lettering, and the DCB
/// and Durable Executor retry helpers.
pub mod jobs;

/// Background worker loops over event bus subscriptions.
pub mod workers;

/// Configuration loading and representation.
pub mod config {}
