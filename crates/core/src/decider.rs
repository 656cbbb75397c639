//! Pure decider contract (C2): `decide(state, command, ctx) -> Decision`.
//!
//! A decider never performs I/O and is deterministic given its inputs. It is
//! the shape the Command Orchestrator (C5) dispatches against: a plain
//! single-stream `handle`-and-`apply` pair can't distinguish a recorded
//! business failure (`Decision::Failed`) from an outright command rejection
//! (`Decision::Rejected`) from an OCC conflict (`Decision::Conflict`, used
//! only by the DCB executor) — `Decider` exists to make that three-way split
//! explicit.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::id::{CommandId, CorrelationId};

/// Ambient context passed to every `decide` call.
#[derive(Debug, Clone)]
pub struct DeciderContext {
    pub now: DateTime<Utc>,
    pub command_id: CommandId,
    pub correlation_id: CorrelationId,
}

/// Outcome of a single decider invocation.
#[derive(Debug, Clone)]
pub enum Decision<Ev, St> {
    /// Append `event`; the caller folds it into `state_update` for CMS.
    Success { event: Ev, state_update: St },
    /// A business failure, recorded as an event rather than rejected.
    Failed {
        event: Ev,
        reason: String,
        context: Value,
    },
    /// No event emitted; the command is refused outright.
    Rejected {
        code: String,
        message: String,
        context: Value,
    },
    /// OCC conflict observed against the expected version. Only ever
    /// produced inside the DCB executor (C6); single-stream deciders rely
    /// on the event store's own append-time conflict detection instead.
    Conflict { current_version: u64 },
}

/// A pure, ctx-aware decision function over `(state, command) -> Decision`.
pub trait Decider {
    type State;
    type Command;
    type Event;

    /// `state` is `None` for entity-creating commands (the
    /// `createEntityDeciderHandler` factory case in the spec vocabulary).
    fn decide(
        &self,
        state: Option<&Self::State>,
        command: &Self::Command,
        ctx: &DeciderContext,
    ) -> Decision<Self::Event, Self::State>;

    /// Consult external state (e.g. a uniqueness check) before `decide`
    /// runs. Returning `Some(Decision::Rejected { .. })` short-circuits the
    /// decider; this is the only legitimate place for a decider-adjacent
    /// hook to read outside state. Default: always proceeds to `decide`.
    fn pre_validate(
        &self,
        _ctx: &DeciderContext,
        _command: &Self::Command,
    ) -> Option<Decision<Self::Event, Self::State>> {
        None
    }
}
