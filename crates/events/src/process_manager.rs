//! Process manager mechanics (framework only, no business rules).
//!
//! - Explicit state machine per process manager
//! - Event-driven transitions
//! - Compensating actions expressed as commands
//! - Persistence via the existing event store (append-only, tenant-scoped)
//!
//! The executor (C8, in `ledgerflow-infra`) is responsible for instance
//! resolution, checkpointing, dead-lettering, and dispatching the commands
//! a process manager emits; this module only defines the per-PM-type
//! contract it drives.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;

use ledgerflow_core::{AggregateId, TenantId};

use crate::EventEnvelope;

/// Actions a process manager can emit in response to an incoming domain event.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PmAction {
    /// Append a process-manager event (JSON payload) to this instance's stream.
    Emit {
        event_type: String,
        payload: JsonValue,
    },
    /// Dispatch a command to a target aggregate.
    Command {
        aggregate_type: String,
        command_type: String,
        payload: JsonValue,
    },
    /// Dispatch a compensating command to undo prior side-effects.
    Compensate {
        aggregate_type: String,
        command_type: String,
        payload: JsonValue,
    },
    /// Mark the instance completed (executor may emit a terminal event).
    Complete,
}

/// Process manager contract (mechanics only).
///
/// Implementors define a typed state machine, how to correlate incoming
/// events to an instance, how to react given the current state, and how
/// to fold the manager's own events back into state.
pub trait ProcessManager: Send + Sync + 'static {
    /// Typed state machine (must be serde for persistence).
    type State: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// JSON-wrapped process-manager events (persisted in the event store).
    type PmEvent: Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Correlation id used to route an incoming event to an instance.
    type CorrelationId: Clone + Send + Sync + 'static;

    /// Stable process manager name (spec `pmName`, e.g. `"sales.ar_collection"`).
    fn pm_name() -> &'static str;

    /// Extract a correlation id from an incoming event (`None` if irrelevant).
    fn correlate(envelope: &EventEnvelope<JsonValue>) -> Option<Self::CorrelationId>;

    /// Compute the deterministic instance id from the correlation id.
    /// Default behavior when no `instanceIdResolver` is supplied: fall back
    /// to the triggering event's own stream id (spec §4.8 step 1 fallback).
    fn instance_id(tenant_id: TenantId, correlation: &Self::CorrelationId) -> AggregateId;

    fn initial_state(_tenant_id: TenantId, _correlation: &Self::CorrelationId) -> Self::State {
        Self::State::default()
    }

    /// Fold a process-manager event into state.
    fn apply(state: &mut Self::State, event: &Self::PmEvent);

    /// React to an incoming domain event, producing zero or more actions.
    ///
    /// `Err` signals a business-logic failure distinct from an infra fault
    /// (e.g. a cross-context projection this PM depends on hasn't caught up
    /// yet) — spec §4.8 step 5 and §8 scenario 5: the executor dead-letters
    /// the attempt and returns it for redelivery rather than skipping it.
    fn react(
        state: &Self::State,
        tenant_id: TenantId,
        correlation: &Self::CorrelationId,
        incoming: &EventEnvelope<JsonValue>,
    ) -> Result<Vec<PmAction>, String>;
}
