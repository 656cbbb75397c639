//! Process Manager executor (C8): event-to-command coordination with
//! checkpointing, dead-lettering, and exactly-once-ish delivery.
//!
//! Drives the per-PM-type contract `ledgerflow_events::process_manager`
//! defines (correlation, instance id, fold, react) the way
//! `crate::command_orchestrator` drives `DecidingHandler`: this module owns
//! the replay-free bookkeeping (instance state, watermark, dead letters)
//! around a pure business reaction.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use ledgerflow_core::{AggregateId, EventId, ExpectedVersion, StreamType, TenantId};
use ledgerflow_events::process_manager::{PmAction, ProcessManager};
use ledgerflow_events::EventEnvelope;

use crate::event_store::{EventStore, EventStoreError, UncommittedEvent};

/// Lifecycle of one process manager instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PmStatus {
    Idle,
    Processing,
    Completed,
    Failed,
}

/// Persisted state for one `(pmName, instanceId)` pair (spec §4.8 step 2).
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct PmInstanceState<S> {
    pub status: PmStatus,
    pub last_global_position: u64,
    pub commands_emitted: u64,
    pub commands_failed: u64,
    pub state: S,
}

/// Persistence for process manager instance state/checkpoints.
pub trait PmStateStore<S>: Send + Sync {
    fn get(&self, pm_name: &str, instance_id: AggregateId) -> Option<PmInstanceState<S>>;

    fn put(&self, pm_name: &str, instance_id: AggregateId, state: PmInstanceState<S>);
}

/// In-memory reference [`PmStateStore`].
pub struct InMemoryPmStateStore<S> {
    states: RwLock<HashMap<(String, AggregateId), PmInstanceState<S>>>,
}

impl<S> Default for InMemoryPmStateStore<S> {
    fn default() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }
}

impl<S> InMemoryPmStateStore<S> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: Clone + Send + Sync> PmStateStore<S> for InMemoryPmStateStore<S> {
    fn get(&self, pm_name: &str, instance_id: AggregateId) -> Option<PmInstanceState<S>> {
        self.states.read().unwrap().get(&(pm_name.to_string(), instance_id)).cloned()
    }

    fn put(&self, pm_name: &str, instance_id: AggregateId, state: PmInstanceState<S>) {
        self.states.write().unwrap().insert((pm_name.to_string(), instance_id), state);
    }
}

/// One record in the process manager dead-letter queue (spec §4.8: "capture
/// the failing event, error, attempt count, and — if applicable — the
/// failed command payload").
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct PmDeadLetter {
    pub pm_name: String,
    pub instance_id: AggregateId,
    pub event: EventEnvelope<JsonValue>,
    pub error: String,
    pub attempt: u32,
    pub failed_action: Option<PmAction>,
}

pub trait PmDeadLetterStore: Send + Sync {
    fn record(&self, entry: PmDeadLetter);

    fn list(&self, pm_name: &str, instance_id: AggregateId) -> Vec<PmDeadLetter>;
}

/// In-memory reference [`PmDeadLetterStore`].
#[derive(Default)]
pub struct InMemoryPmDeadLetterStore {
    entries: RwLock<HashMap<(String, AggregateId), Vec<PmDeadLetter>>>,
}

impl InMemoryPmDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PmDeadLetterStore for InMemoryPmDeadLetterStore {
    fn record(&self, entry: PmDeadLetter) {
        self.entries
            .write()
            .unwrap()
            .entry((entry.pm_name.clone(), entry.instance_id))
            .or_default()
            .push(entry);
    }

    fn list(&self, pm_name: &str, instance_id: AggregateId) -> Vec<PmDeadLetter> {
        self.entries.read().unwrap().get(&(pm_name.to_string(), instance_id)).cloned().unwrap_or_default()
    }
}

/// Dispatches the commands/compensations a process manager emits. Fire-and-
/// forget: emission is not transactional with the PM state write (spec
/// §4.8 step 6).
pub trait CommandEmitter: Send + Sync {
    fn emit(&self, tenant_id: TenantId, action: &PmAction) -> Result<(), String>;
}

/// Outcome of one [`ProcessManagerExecutor::handle`] call.
#[derive(Debug, Clone)]
pub enum PmOutcome {
    /// The event doesn't correlate to any instance of this PM.
    Ignored,
    Skipped {
        reason: SkipReason,
    },
    Processed {
        instance_id: AggregateId,
        commands_emitted: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyProcessed,
    TerminalState,
}

#[derive(Debug, thiserror::Error)]
pub enum PmExecutorError {
    #[error("event store error: {0}")]
    Store(#[from] EventStoreError),
    #[error("process manager '{pm_name}' instance {instance_id} handler failed: {reason}")]
    HandlerFailed {
        pm_name: String,
        instance_id: AggregateId,
        reason: String,
    },
}

/// C8: drives one [`ProcessManager`] type against delivered domain events.
pub struct ProcessManagerExecutor<S, PS, DL, CE> {
    store: S,
    pm_store: PS,
    dead_letters: DL,
    emitter: CE,
}

impl<S, PS, DL, CE> ProcessManagerExecutor<S, PS, DL, CE>
where
    S: EventStore,
    CE: CommandEmitter,
{
    pub fn new(store: S, pm_store: PS, dead_letters: DL, emitter: CE) -> Self {
        Self {
            store,
            pm_store,
            dead_letters,
            emitter,
        }
    }

    pub fn handle<P>(&self, envelope: &EventEnvelope<JsonValue>) -> Result<PmOutcome, PmExecutorError>
    where
        P: ProcessManager,
        PS: PmStateStore<P::State>,
        DL: PmDeadLetterStore,
    {
        // 1) Instance resolution (and implicitly the subscription filter:
        // a PM with no correlation for this event ignores it).
        let Some(correlation) = P::correlate(envelope) else {
            return Ok(PmOutcome::Ignored);
        };
        let instance_id = P::instance_id(envelope.tenant_id(), &correlation);

        // 2) State load/create.
        let mut instance = self
            .pm_store
            .get(P::pm_name(), instance_id)
            .unwrap_or_else(|| PmInstanceState {
                status: PmStatus::Idle,
                last_global_position: 0,
                commands_emitted: 0,
                commands_failed: 0,
                state: P::initial_state(envelope.tenant_id(), &correlation),
            });

        // 3) Idempotency guard.
        if envelope.global_position() <= instance.last_global_position {
            return Ok(PmOutcome::Skipped {
                reason: SkipReason::AlreadyProcessed,
            });
        }
        if instance.status == PmStatus::Completed {
            return Ok(PmOutcome::Skipped {
                reason: SkipReason::TerminalState,
            });
        }

        // 4) Status transition.
        instance.status = PmStatus::Processing;
        self.pm_store.put(P::pm_name(), instance_id, instance.clone());

        // 5) Handler. A business-logic failure (e.g. a cross-context
        // projection hasn't caught up yet) is dead-lettered and returned
        // for redelivery rather than silently skipped.
        let actions = match P::react(&instance.state, envelope.tenant_id(), &correlation, envelope) {
            Ok(actions) => actions,
            Err(err) => {
                self.dead_letter::<P>(instance_id, envelope, &err, None);
                instance.status = PmStatus::Failed;
                self.pm_store.put(P::pm_name(), instance_id, instance.clone());
                return Err(PmExecutorError::HandlerFailed {
                    pm_name: P::pm_name().to_string(),
                    instance_id,
                    reason: err,
                });
            }
        };

        // 6) Command emission, folding `Emit` actions back into state.
        let mut saw_complete = false;
        for action in &actions {
            match action {
                PmAction::Emit { event_type, payload } => {
                    if let Err(err) = self.persist_pm_event::<P>(envelope.tenant_id(), instance_id, event_type, payload) {
                        self.dead_letter::<P>(instance_id, envelope, &err.to_string(), Some(action.clone()));
                        instance.status = PmStatus::Failed;
                        instance.commands_failed += 1;
                        self.pm_store.put(P::pm_name(), instance_id, instance.clone());
                        return Err(PmExecutorError::HandlerFailed {
                            pm_name: P::pm_name().to_string(),
                            instance_id,
                            reason: err.to_string(),
                        });
                    }
                    match serde_json::from_value::<P::PmEvent>(payload.clone()) {
                        Ok(pm_event) => P::apply(&mut instance.state, &pm_event),
                        Err(err) => warn!(pm = P::pm_name(), instance = %instance_id, error = %err, "emitted event payload did not match PmEvent shape, state not folded"),
                    }
                }
                PmAction::Command { .. } | PmAction::Compensate { .. } => {
                    if let Err(err) = self.emitter.emit(envelope.tenant_id(), action) {
                        self.dead_letter::<P>(instance_id, envelope, &err, Some(action.clone()));
                        instance.status = PmStatus::Failed;
                        instance.commands_failed += 1;
                        self.pm_store.put(P::pm_name(), instance_id, instance.clone());
                        return Err(PmExecutorError::HandlerFailed {
                            pm_name: P::pm_name().to_string(),
                            instance_id,
                            reason: err,
                        });
                    }
                    instance.commands_emitted += 1;
                }
                PmAction::Complete => saw_complete = true,
            }
        }

        // 7) Bookkeeping.
        instance.last_global_position = envelope.global_position();
        instance.status = if saw_complete { PmStatus::Completed } else { PmStatus::Idle };
        self.pm_store.put(P::pm_name(), instance_id, instance.clone());

        Ok(PmOutcome::Processed {
            instance_id,
            commands_emitted: instance.commands_emitted,
        })
    }

    fn persist_pm_event<P: ProcessManager>(
        &self,
        tenant_id: TenantId,
        instance_id: AggregateId,
        event_type: &str,
        payload: &JsonValue,
    ) -> Result<(), EventStoreError> {
        let stream_type = StreamType::new(P::pm_name())
            .map_err(|e| EventStoreError::InvalidAppend(format!("invalid process manager name: {e}")))?;
        let uncommitted = UncommittedEvent {
            event_id: EventId::new(),
            tenant_id,
            stream_type,
            stream_id: instance_id,
            event_type: event_type.to_string(),
            schema_version: 1,
            category: ledgerflow_events::EventCategory::Domain,
            timestamp: chrono::Utc::now(),
            correlation_id: ledgerflow_core::CorrelationId::new(),
            causation_id: None,
            user_id: None,
            payload: payload.clone(),
        };
        // The PM's own event stream isn't OCC-guarded against concurrent
        // writers the way an aggregate stream is — only this executor ever
        // appends to it, serialized by the instance state write.
        self.store.append(vec![uncommitted], ExpectedVersion::Any)?;
        Ok(())
    }

    fn dead_letter<P: ProcessManager>(&self, instance_id: AggregateId, event: &EventEnvelope<JsonValue>, error: &str, failed_action: Option<PmAction>)
    where
        DL: PmDeadLetterStore,
    {
        let attempt = self.dead_letters.list(P::pm_name(), instance_id).len() as u32 + 1;
        warn!(pm = P::pm_name(), instance = %instance_id, error, attempt, "process manager handler failed, dead-lettering");
        self.dead_letters.record(PmDeadLetter {
            pm_name: P::pm_name().to_string(),
            instance_id,
            event: event.clone(),
            error: error.to_string(),
            attempt,
            failed_action,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerflow_core::CommandId;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct CollectionState {
        reminders_sent: u32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CollectionPmEvent;

    struct ArCollectionPm;

    impl ProcessManager for ArCollectionPm {
        type State = CollectionState;
        type PmEvent = CollectionPmEvent;
        type CorrelationId = AggregateId;

        fn pm_name() -> &'static str {
            "sales.ar_collection"
        }

        fn correlate(envelope: &EventEnvelope<JsonValue>) -> Option<Self::CorrelationId> {
            Some(envelope.aggregate_id())
        }

        fn instance_id(_tenant_id: TenantId, correlation: &Self::CorrelationId) -> AggregateId {
            *correlation
        }

        fn apply(state: &mut Self::State, _event: &Self::PmEvent) {
            state.reminders_sent += 1;
        }

        fn react(
            _state: &Self::State,
            _tenant_id: TenantId,
            _correlation: &Self::CorrelationId,
            _incoming: &EventEnvelope<JsonValue>,
        ) -> Result<Vec<PmAction>, String> {
            Ok(vec![PmAction::Command {
                aggregate_type: "sales.invoice".to_string(),
                command_type: "SendReminder".to_string(),
                payload: serde_json::json!({}),
            }])
        }
    }

    /// A PM whose `react` fails until a shared projection "catches up",
    /// modeling spec §8 scenario 5 (cross-context projection lag).
    struct LaggingProjectionPm;

    impl ProcessManager for LaggingProjectionPm {
        type State = CollectionState;
        type PmEvent = CollectionPmEvent;
        type CorrelationId = AggregateId;

        fn pm_name() -> &'static str {
            "sales.lagging_pm"
        }

        fn correlate(envelope: &EventEnvelope<JsonValue>) -> Option<Self::CorrelationId> {
            Some(envelope.aggregate_id())
        }

        fn instance_id(_tenant_id: TenantId, correlation: &Self::CorrelationId) -> AggregateId {
            *correlation
        }

        fn apply(state: &mut Self::State, _event: &Self::PmEvent) {
            state.reminders_sent += 1;
        }

        fn react(
            _state: &Self::State,
            _tenant_id: TenantId,
            _correlation: &Self::CorrelationId,
            incoming: &EventEnvelope<JsonValue>,
        ) -> Result<Vec<PmAction>, String> {
            if incoming.payload().get("projection_ready").and_then(|v| v.as_bool()) != Some(true) {
                return Err("dependent projection has not caught up yet".to_string());
            }
            Ok(vec![PmAction::Complete])
        }
    }

    struct AlwaysOkEmitter;

    impl CommandEmitter for AlwaysOkEmitter {
        fn emit(&self, _tenant_id: TenantId, _action: &PmAction) -> Result<(), String> {
            Ok(())
        }
    }

    struct AlwaysFailEmitter;

    impl CommandEmitter for AlwaysFailEmitter {
        fn emit(&self, _tenant_id: TenantId, _action: &PmAction) -> Result<(), String> {
            Err("downstream unavailable".to_string())
        }
    }

    fn envelope(tenant_id: TenantId, aggregate_id: AggregateId, global_position: u64) -> EventEnvelope<JsonValue> {
        envelope_with_payload(tenant_id, aggregate_id, global_position, serde_json::json!({}))
    }

    fn envelope_with_payload(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        global_position: u64,
        payload: JsonValue,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            EventId::new(),
            tenant_id,
            StreamType::new("sales.invoice").unwrap(),
            aggregate_id,
            "sales.invoice.overdue".to_string(),
            1,
            global_position,
            chrono::Utc::now(),
            ledgerflow_events::EventCategory::Domain,
            1,
            ledgerflow_core::CorrelationId::from(CommandId::new()),
            None,
            None,
            payload,
        )
    }

    #[test]
    fn processes_and_advances_watermark() {
        let executor = ProcessManagerExecutor::new(
            crate::event_store::InMemoryEventStore::new(),
            InMemoryPmStateStore::<CollectionState>::new(),
            InMemoryPmDeadLetterStore::new(),
            AlwaysOkEmitter,
        );
        let tenant = TenantId::new();
        let invoice = AggregateId::new();
        let env = envelope(tenant, invoice, 10);

        let outcome = executor.handle::<ArCollectionPm>(&env).unwrap();
        assert!(matches!(outcome, PmOutcome::Processed { commands_emitted: 1, .. }));
    }

    #[test]
    fn redelivery_after_watermark_is_skipped() {
        let executor = ProcessManagerExecutor::new(
            crate::event_store::InMemoryEventStore::new(),
            InMemoryPmStateStore::<CollectionState>::new(),
            InMemoryPmDeadLetterStore::new(),
            AlwaysOkEmitter,
        );
        let tenant = TenantId::new();
        let invoice = AggregateId::new();

        executor.handle::<ArCollectionPm>(&envelope(tenant, invoice, 10)).unwrap();
        let outcome = executor.handle::<ArCollectionPm>(&envelope(tenant, invoice, 5)).unwrap();
        assert!(matches!(outcome, PmOutcome::Skipped { reason: SkipReason::AlreadyProcessed }));
    }

    #[test]
    fn emitter_failure_dead_letters_and_marks_failed() {
        let executor = ProcessManagerExecutor::new(
            crate::event_store::InMemoryEventStore::new(),
            InMemoryPmStateStore::<CollectionState>::new(),
            InMemoryPmDeadLetterStore::new(),
            AlwaysFailEmitter,
        );
        let tenant = TenantId::new();
        let invoice = AggregateId::new();
        let env = envelope(tenant, invoice, 10);

        let result = executor.handle::<ArCollectionPm>(&env);
        assert!(result.is_err());

        let stored = executor.pm_store.get(ArCollectionPm::pm_name(), invoice).unwrap();
        assert_eq!(stored.status, PmStatus::Failed);
        assert_eq!(stored.commands_failed, 1);

        let letters = executor.dead_letters.list(ArCollectionPm::pm_name(), invoice);
        assert_eq!(letters.len(), 1);
    }

    #[test]
    fn react_business_failure_dead_letters_and_is_redelivered() {
        let executor = ProcessManagerExecutor::new(
            crate::event_store::InMemoryEventStore::new(),
            InMemoryPmStateStore::<CollectionState>::new(),
            InMemoryPmDeadLetterStore::new(),
            AlwaysOkEmitter,
        );
        let tenant = TenantId::new();
        let invoice = AggregateId::new();

        // First delivery: the projection this PM depends on hasn't caught
        // up yet, so `react` fails instead of the PM silently skipping.
        let not_ready = envelope_with_payload(tenant, invoice, 10, serde_json::json!({"projection_ready": false}));
        let result = executor.handle::<LaggingProjectionPm>(&not_ready);
        assert!(result.is_err());

        let stored = executor.pm_store.get(LaggingProjectionPm::pm_name(), invoice).unwrap();
        assert_eq!(stored.status, PmStatus::Failed);
        assert_eq!(stored.last_global_position, 0, "watermark must not advance on a react failure");
        assert_eq!(executor.dead_letters.list(LaggingProjectionPm::pm_name(), invoice).len(), 1);

        // Redelivery of the *same* event, once the projection has caught up.
        let ready = envelope_with_payload(tenant, invoice, 10, serde_json::json!({"projection_ready": true}));
        let outcome = executor.handle::<LaggingProjectionPm>(&ready).unwrap();
        assert!(matches!(outcome, PmOutcome::Processed { .. }));
    }
}
