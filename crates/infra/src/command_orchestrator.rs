//! Command Orchestrator (C5): executes an aggregate command end-to-end.
//!
//! Flow: idempotency probe → correlation derivation → decider invocation →
//! event persistence → inline projection dispatch → async bus publish.
//!
//! This module contains no IO itself beyond the injected `EventStore` and
//! `EventBus`; it composes infrastructure traits the way the teacher's
//! `CommandDispatcher` did, generalized to the decider-shaped handler
//! contract and the richer event attribute set spec §3 requires.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;

use ledgerflow_core::{
    AggregateId, CommandId, CorrelationId, Decider, DeciderContext, Decision, EventId, ExpectedVersion, StreamType,
    TenantId, UserId,
};
use ledgerflow_events::{Event, EventBus, EventEnvelope};

use crate::event_store::{CmsRow, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Pairs a pure [`Decider`] with the fold needed to rehydrate `State` from
/// stream history — the "handler" the spec describes as loading CMS and
/// calling the decider. `Decider` alone has no notion of history replay.
pub trait DecidingHandler: Decider {
    /// Fold one historical or newly-decided event into `state`.
    fn evolve(state: Option<Self::State>, event: &Self::Event) -> Self::State;

    /// Recover the original `Decision::Failed` reason from a persisted
    /// event, for idempotent-replay reconstruction (spec §8: "replaying the
    /// same command returns the recorded result byte-for-byte"). `None`
    /// means `event` was not a recorded failure. Deciders that never emit
    /// `Decision::Failed` can rely on the default.
    fn failure_reason(_event: &Self::Event) -> Option<String> {
        None
    }
}

/// Inline read-model consumer dispatched synchronously from C5 step 5.
/// Implementations are responsible for their own idempotency on
/// `global_position` (spec §4.5 step 5: "each projection is idempotent on
/// globalPosition").
pub trait InlineProjection: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), String>;
}

/// Wiring for one command type: which handler decides it and which
/// projections observe its outcome.
pub struct CommandConfig<D> {
    pub decider: D,
    pub stream_type: StreamType,
    /// Invoked inline for `Decision::Success` and `Decision::Failed`.
    pub primary_projection: Option<Arc<dyn InlineProjection>>,
    pub secondary_projections: Vec<Arc<dyn InlineProjection>>,
    /// Invoked inline only for `Decision::Failed`.
    pub failed_projection: Option<Arc<dyn InlineProjection>>,
}

impl<D> CommandConfig<D> {
    pub fn new(decider: D, stream_type: StreamType) -> Self {
        Self {
            decider,
            stream_type,
            primary_projection: None,
            secondary_projections: Vec::new(),
            failed_projection: None,
        }
    }

    pub fn with_primary_projection(mut self, projection: Arc<dyn InlineProjection>) -> Self {
        self.primary_projection = Some(projection);
        self
    }

    pub fn with_secondary_projection(mut self, projection: Arc<dyn InlineProjection>) -> Self {
        self.secondary_projections.push(projection);
        self
    }

    pub fn with_failed_projection(mut self, projection: Arc<dyn InlineProjection>) -> Self {
        self.failed_projection = Some(projection);
        self
    }
}

/// The four outcomes the spec's public contract distinguishes
/// (`success`/`rejected`/`failed`/`conflict`).
#[derive(Debug, Clone)]
pub enum CommandOutcome<St> {
    Success {
        state: St,
        version: u64,
        event_id: EventId,
        global_position: u64,
    },
    Rejected {
        code: String,
        reason: String,
        context: JsonValue,
    },
    Failed {
        reason: String,
        event_id: EventId,
        context: JsonValue,
    },
    Conflict {
        current_version: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("event store error: {0}")]
    Store(#[from] EventStoreError),
    #[error("payload (de)serialization failed: {0}")]
    Serde(String),
}

/// Arguments a caller supplies to [`CommandOrchestrator::execute`].
pub struct ExecuteArgs<C> {
    pub tenant_id: TenantId,
    pub stream_id: AggregateId,
    pub command: C,
    /// Caller-supplied idempotency key; used verbatim if present (spec
    /// §4.5 tie-break: enables cross-process retries). Minted otherwise.
    pub command_id: Option<CommandId>,
    /// Caller-supplied correlation id; defaults to `command_id` (spec:
    /// "correlationId never changes across retries of the same command").
    pub correlation_id: Option<CorrelationId>,
    pub user_id: Option<UserId>,
}

/// C5: executes an aggregate command end-to-end against a single stream.
pub struct CommandOrchestrator<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandOrchestrator<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandOrchestrator<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn execute<D>(
        &self,
        config: &CommandConfig<D>,
        args: ExecuteArgs<D::Command>,
    ) -> Result<CommandOutcome<D::State>, OrchestratorError>
    where
        D: DecidingHandler,
        D::Event: Event + Serialize + serde::de::DeserializeOwned,
        D::State: Clone + Serialize + serde::de::DeserializeOwned,
    {
        let command_id = args.command_id.unwrap_or_else(CommandId::new);
        let correlation_id = args.correlation_id.unwrap_or_else(|| CorrelationId::from(command_id));

        // 1) Idempotency probe.
        if let Some(prior) = self.store.lookup_by_command_id(args.tenant_id, command_id)? {
            return self.reconstruct_outcome::<D>(&prior);
        }

        // Load CMS (spec §4.4 `loadCMS`): the materialized state row, not a
        // full stream replay.
        let cms = self.store.load_cms(args.tenant_id, &config.stream_type, args.stream_id)?;
        let current_version = cms.as_ref().map(|row| row.version).unwrap_or(0);
        let state: Option<D::State> = cms
            .map(|row| serde_json::from_value(row.state))
            .transpose()
            .map_err(|e| OrchestratorError::Serde(e.to_string()))?;

        let ctx = DeciderContext {
            now: Utc::now(),
            command_id,
            correlation_id,
        };

        // 3) Handler invocation: pre-validate hook, then the pure decider.
        let decision = config
            .decider
            .pre_validate(&ctx, &args.command)
            .unwrap_or_else(|| config.decider.decide(state.as_ref(), &args.command, &ctx));

        match decision {
            Decision::Rejected { code, message, context } => {
                Ok(CommandOutcome::Rejected { code, reason: message, context })
            }
            Decision::Conflict { current_version } => Ok(CommandOutcome::Conflict { current_version }),
            Decision::Success { event, state_update } => {
                let cms_state = serde_json::to_value(&state_update).map_err(|e| OrchestratorError::Serde(e.to_string()))?;
                let stored = self.persist_success::<D>(
                    args.tenant_id,
                    &config.stream_type,
                    args.stream_id,
                    current_version,
                    command_id,
                    correlation_id,
                    args.user_id,
                    &event,
                    cms_state,
                )?;
                self.dispatch_projections(config.primary_projection.as_deref(), &config.secondary_projections, &stored);
                self.publish(&stored);
                Ok(CommandOutcome::Success {
                    state: state_update,
                    version: stored.stream_version,
                    event_id: stored.event_id,
                    global_position: stored.global_position,
                })
            }
            Decision::Failed { event, reason, context } => {
                let stored = self.persist_one::<D>(
                    args.tenant_id,
                    &config.stream_type,
                    args.stream_id,
                    current_version,
                    command_id,
                    correlation_id,
                    args.user_id,
                    &event,
                )?;
                if let Some(failed) = &config.failed_projection {
                    if let Err(err) = failed.apply(&stored.to_envelope()) {
                        tracing::error!(projection = failed.name(), error = %err, "failed-projection dispatch error (dead-lettered)");
                    }
                }
                self.publish(&stored);
                Ok(CommandOutcome::Failed {
                    reason,
                    event_id: stored.event_id,
                    context,
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn persist_one<D: DecidingHandler>(
        &self,
        tenant_id: TenantId,
        stream_type: &StreamType,
        stream_id: AggregateId,
        current_version: u64,
        command_id: CommandId,
        correlation_id: CorrelationId,
        user_id: Option<UserId>,
        event: &D::Event,
    ) -> Result<StoredEvent, OrchestratorError>
    where
        D::Event: Event + Serialize,
    {
        let uncommitted = UncommittedEvent::from_typed(
            tenant_id,
            stream_type.clone(),
            stream_id,
            EventId::new(),
            correlation_id,
            Some(command_id),
            user_id,
            event,
        )
        .map_err(OrchestratorError::Store)?;

        let expected = ExpectedVersion::Exact(current_version);
        let mut committed = self.store.append(vec![uncommitted], expected)?;
        Ok(committed.remove(0))
    }

    /// Like [`Self::persist_one`], but also patches the stream's CMS row
    /// (spec §4.4 `loadCMS`/§3 CMS invariant). Only `Decision::Success`
    /// updates CMS; a `Decision::Failed` event leaves it untouched.
    #[allow(clippy::too_many_arguments)]
    fn persist_success<D: DecidingHandler>(
        &self,
        tenant_id: TenantId,
        stream_type: &StreamType,
        stream_id: AggregateId,
        current_version: u64,
        command_id: CommandId,
        correlation_id: CorrelationId,
        user_id: Option<UserId>,
        event: &D::Event,
        cms_state: JsonValue,
    ) -> Result<StoredEvent, OrchestratorError>
    where
        D::Event: Event + Serialize,
    {
        let uncommitted = UncommittedEvent::from_typed(
            tenant_id,
            stream_type.clone(),
            stream_id,
            EventId::new(),
            correlation_id,
            Some(command_id),
            user_id,
            event,
        )
        .map_err(OrchestratorError::Store)?;

        let expected = ExpectedVersion::Exact(current_version);
        let mut committed = self.store.append_and_patch_cms(vec![uncommitted], expected, cms_state)?;
        Ok(committed.remove(0))
    }

    fn dispatch_projections(
        &self,
        primary: Option<&dyn InlineProjection>,
        secondary: &[Arc<dyn InlineProjection>],
        stored: &StoredEvent,
    ) {
        let envelope = stored.to_envelope();
        if let Some(primary) = primary {
            if let Err(err) = primary.apply(&envelope) {
                tracing::error!(projection = primary.name(), error = %err, "primary projection dispatch error (dead-lettered)");
            }
        }
        for projection in secondary {
            if let Err(err) = projection.apply(&envelope) {
                tracing::error!(projection = projection.name(), error = %err, "secondary projection dispatch error (dead-lettered)");
            }
        }
    }

    fn publish(&self, stored: &StoredEvent) {
        if let Err(err) = self.bus.publish(stored.to_envelope()) {
            tracing::error!(event_id = ?stored.event_id, error = ?err, "event bus publish failed (at-least-once, retry may duplicate)");
        }
    }

    /// Step 1 continuation: a `commandId` already seen. Replays the full
    /// stream to reconstruct `state`; recovers the terminal event's failure
    /// reason via [`DecidingHandler::failure_reason`] so a replayed failed
    /// command returns byte-for-byte the same reason the original call did.
    fn reconstruct_outcome<D>(&self, prior: &[StoredEvent]) -> Result<CommandOutcome<D::State>, OrchestratorError>
    where
        D: DecidingHandler,
        D::Event: Event + serde::de::DeserializeOwned,
        D::State: Clone,
    {
        let last = prior.last().ok_or_else(|| {
            OrchestratorError::Serde("idempotency index held an empty event list".to_string())
        })?;

        let mut state: Option<D::State> = None;
        let mut last_event: Option<D::Event> = None;
        for stored in prior {
            let event: D::Event = serde_json::from_value(stored.payload.clone())
                .map_err(|e| OrchestratorError::Serde(e.to_string()))?;
            state = Some(D::evolve(state, &event));
            last_event = Some(event);
        }

        if let Some(event) = &last_event {
            if let Some(reason) = D::failure_reason(event) {
                return Ok(CommandOutcome::Failed {
                    reason,
                    event_id: last.event_id,
                    context: last.payload.clone(),
                });
            }
        }

        let state = state.ok_or_else(|| OrchestratorError::Serde("no state reconstructed".to_string()))?;
        Ok(CommandOutcome::Success {
            state,
            version: last.stream_version,
            event_id: last.event_id,
            global_position: last.global_position,
        })
    }
}

/// Exercises spec §8 end-to-end scenarios 1 and 2 against a real
/// `CommandOrchestrator` wired to `InMemoryEventStore`/`InMemoryEventBus`,
/// mirroring `infra::integration_tests` for the other C-numbered subsystems.
#[cfg(test)]
mod integration_tests {
    use super::*;
    use ledgerflow_events::{EventCategory, InMemoryEventBus};

    use crate::event_store::InMemoryEventStore;

    #[derive(Debug, Clone, Serialize, serde::Deserialize)]
    struct StockReserved {
        order_id: String,
        reserved: u64,
    }

    impl Event for StockReserved {
        fn event_type(&self) -> &'static str {
            "inventory.reservation.reserved"
        }
        fn version(&self) -> u32 {
            1
        }
        fn occurred_at(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }
    }

    #[derive(Debug, Clone, Serialize, serde::Deserialize)]
    struct ReservationFailed {
        order_id: String,
        failed_items: Vec<FailedItem>,
    }

    #[derive(Debug, Clone, Serialize, serde::Deserialize)]
    struct FailedItem {
        product_id: String,
        requested: u64,
        available: u64,
    }

    impl Event for ReservationFailed {
        fn event_type(&self) -> &'static str {
            "inventory.reservation.failed"
        }
        fn version(&self) -> u32 {
            1
        }
        fn occurred_at(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }
    }

    #[derive(Debug, Clone, Serialize, serde::Deserialize)]
    #[serde(tag = "kind")]
    enum StockEvent {
        Reserved(StockReserved),
        Failed(ReservationFailed),
    }

    impl Event for StockEvent {
        fn event_type(&self) -> &'static str {
            match self {
                StockEvent::Reserved(e) => e.event_type(),
                StockEvent::Failed(e) => e.event_type(),
            }
        }
        fn version(&self) -> u32 {
            1
        }
        fn occurred_at(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }
        fn category(&self) -> EventCategory {
            EventCategory::Domain
        }
    }

    #[derive(Debug, Clone, Serialize, serde::Deserialize)]
    struct StockState {
        available: u64,
    }

    struct ReserveStock {
        product_id: String,
    }

    struct ReserveStockCommand {
        order_id: String,
        requested: u64,
    }

    impl Decider for ReserveStock {
        type State = StockState;
        type Command = ReserveStockCommand;
        type Event = StockEvent;

        fn decide(
            &self,
            state: Option<&Self::State>,
            command: &Self::Command,
            _ctx: &DeciderContext,
        ) -> Decision<Self::Event, Self::State> {
            let available = state.map(|s| s.available).unwrap_or(0);
            if command.requested > available {
                return Decision::Failed {
                    event: StockEvent::Failed(ReservationFailed {
                        order_id: command.order_id.clone(),
                        failed_items: vec![FailedItem {
                            product_id: self.product_id.clone(),
                            requested: command.requested,
                            available,
                        }],
                    }),
                    reason: "INSUFFICIENT_STOCK".to_string(),
                    context: serde_json::json!({ "productId": self.product_id }),
                };
            }
            Decision::Success {
                event: StockEvent::Reserved(StockReserved {
                    order_id: command.order_id.clone(),
                    reserved: command.requested,
                }),
                state_update: StockState {
                    available: available - command.requested,
                },
            }
        }
    }

    impl DecidingHandler for ReserveStock {
        fn evolve(state: Option<Self::State>, event: &Self::Event) -> Self::State {
            let available = state.map(|s| s.available).unwrap_or(0);
            match event {
                StockEvent::Reserved(e) => StockState {
                    available: available.saturating_sub(e.reserved),
                },
                StockEvent::Failed(_) => StockState { available },
            }
        }

        fn failure_reason(event: &Self::Event) -> Option<String> {
            match event {
                StockEvent::Failed(_) => Some("INSUFFICIENT_STOCK".to_string()),
                StockEvent::Reserved(_) => None,
            }
        }
    }

    fn orchestrator() -> CommandOrchestrator<InMemoryEventStore, InMemoryEventBus<EventEnvelope<JsonValue>>> {
        CommandOrchestrator::new(InMemoryEventStore::new(), InMemoryEventBus::new())
    }

    fn config(product_id: &str) -> CommandConfig<ReserveStock> {
        CommandConfig::new(
            ReserveStock {
                product_id: product_id.to_string(),
            },
            StreamType::new("inventory.reservation").unwrap(),
        )
    }

    /// Scenario 1: submit-then-retry idempotency. Executing the same
    /// `command_id` twice must return the same outcome and append exactly
    /// one event.
    #[test]
    fn scenario_1_submit_then_retry_is_idempotent() {
        let orchestrator = orchestrator();
        let config = config("p1");
        let tenant_id = TenantId::new();
        let stream_id = AggregateId::new();
        let command_id = CommandId::new();

        let args = ExecuteArgs {
            tenant_id,
            stream_id,
            command: ReserveStockCommand {
                order_id: "o1".to_string(),
                requested: 0,
            },
            command_id: Some(command_id),
            correlation_id: None,
            user_id: None,
        };
        let first = orchestrator.execute(&config, args).unwrap();

        let retry_args = ExecuteArgs {
            tenant_id,
            stream_id,
            command: ReserveStockCommand {
                order_id: "o1".to_string(),
                requested: 0,
            },
            command_id: Some(command_id),
            correlation_id: None,
            user_id: None,
        };
        let second = orchestrator.execute(&config, retry_args).unwrap();

        match (first, second) {
            (
                CommandOutcome::Success { event_id: e1, global_position: g1, .. },
                CommandOutcome::Success { event_id: e2, global_position: g2, .. },
            ) => {
                assert_eq!(e1, e2);
                assert_eq!(g1, g2);
            }
            other => panic!("expected two matching Success outcomes, got {other:?}"),
        }

        let history = orchestrator
            .store
            .load_stream(tenant_id, &config.stream_type, stream_id)
            .unwrap();
        assert_eq!(history.len(), 1, "retry must not append a second event");
    }

    /// Scenario 2: insufficient stock fails with an event and leaves the
    /// recorded reason recoverable byte-for-byte on replay.
    #[test]
    fn scenario_2_insufficient_stock_fails_with_event() {
        let orchestrator = orchestrator();
        let config = config("p1");
        let tenant_id = TenantId::new();
        let stream_id = AggregateId::new();

        let args = ExecuteArgs {
            tenant_id,
            stream_id,
            command: ReserveStockCommand {
                order_id: "o2".to_string(),
                requested: 10,
            },
            command_id: None,
            correlation_id: None,
            user_id: None,
        };
        let outcome = orchestrator.execute(&config, args).unwrap();

        match outcome {
            CommandOutcome::Failed { reason, .. } => assert_eq!(reason, "INSUFFICIENT_STOCK"),
            other => panic!("expected Failed outcome, got {other:?}"),
        }

        let history = orchestrator
            .store
            .load_stream(tenant_id, &config.stream_type, stream_id)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, "inventory.reservation.failed");

        // CMS must be untouched by a failed decision: no state was ever
        // committed to the stream's CMS row.
        let cms = orchestrator.store.load_cms(tenant_id, &config.stream_type, stream_id).unwrap();
        assert!(cms.is_none(), "a failed decision must not patch CMS");
    }

    /// Idempotent replay of a failed command must recover the original
    /// `reason`, not a generic replay placeholder (spec §8: "replaying the
    /// same command returns the recorded result byte-for-byte").
    #[test]
    fn replaying_a_failed_command_recovers_the_original_reason() {
        let orchestrator = orchestrator();
        let config = config("p1");
        let tenant_id = TenantId::new();
        let stream_id = AggregateId::new();
        let command_id = CommandId::new();

        let make_args = || ExecuteArgs {
            tenant_id,
            stream_id,
            command: ReserveStockCommand {
                order_id: "o2".to_string(),
                requested: 10,
            },
            command_id: Some(command_id),
            correlation_id: None,
            user_id: None,
        };

        let first = orchestrator.execute(&config, make_args()).unwrap();
        let second = orchestrator.execute(&config, make_args()).unwrap();

        match (first, second) {
            (CommandOutcome::Failed { reason: r1, .. }, CommandOutcome::Failed { reason: r2, .. }) => {
                assert_eq!(r1, "INSUFFICIENT_STOCK");
                assert_eq!(r1, r2);
            }
            other => panic!("expected two matching Failed outcomes, got {other:?}"),
        }
    }

    /// A successful decision patches CMS so a later command on the same
    /// stream loads the reduced state instead of replaying history.
    #[test]
    fn successful_decision_patches_cms_for_the_next_command() {
        let orchestrator = orchestrator();
        let config = config("p1");
        let tenant_id = TenantId::new();
        let stream_id = AggregateId::new();

        let args = ExecuteArgs {
            tenant_id,
            stream_id,
            command: ReserveStockCommand {
                order_id: "o3".to_string(),
                requested: 0,
            },
            command_id: None,
            correlation_id: None,
            user_id: None,
        };
        let outcome = orchestrator.execute(&config, args).unwrap();
        assert!(matches!(outcome, CommandOutcome::Success { .. }));

        let cms = orchestrator
            .store
            .load_cms(tenant_id, &config.stream_type, stream_id)
            .unwrap()
            .expect("CMS row must exist after a successful append");
        assert_eq!(cms.version, 1);
        let state: StockState = serde_json::from_value(cms.state).unwrap();
        assert_eq!(state.available, 0);
    }
}
