//! Core domain primitives for the event-sourced runtime: identifiers, the
//! entity/value-object traits, optimistic-concurrency markers, the finite
//! state machine primitive, the decider contract, and a small generic
//! immutable-registry builder shared by the concrete registries in
//! `ledgerflow-infra`.
//!
//! This crate performs no I/O. Everything here is deterministic and
//! side-effect free; infrastructure concerns live in `ledgerflow-infra`.

/// Strongly-typed identifiers used across the domain.
pub mod id;

/// Domain error model.
pub mod error;

/// Entity trait: identity + continuity across state changes.
pub mod entity;

/// Value object trait: equality by value, not identity.
pub mod value_object;

/// Optimistic concurrency markers used by the event store boundary.
pub mod version;

/// Finite state machine primitive (C1).
pub mod fsm;

/// Pure decider contract (C2).
pub mod decider;

/// Generic immutable registry builder (shared scaffolding for C11).
pub mod registry;

pub use decider::{Decider, DeciderContext, Decision};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use fsm::{Fsm, FsmBuilder, FsmError};
pub use id::{AggregateId, CommandId, CorrelationId, EventId, StreamType, TenantId, UserId};
pub use registry::{RegistryBuilder, RegistryError};
pub use value_object::ValueObject;
pub use version::ExpectedVersion;
