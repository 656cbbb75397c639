//! Durable Executor (C9): wraps C5 with crash-safe intent bracketing.
//!
//! Generalizes the same "record intent, schedule a watchdog, do the work,
//! resolve the intent" shape `crate::jobs` already uses for job leases —
//! here the watchdog guards against a process crashing between deciding a
//! command and persisting its outcome, not against a stuck worker.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::Value as JsonValue;

use ledgerflow_core::{AggregateId, EventId, StreamType, TenantId};
use ledgerflow_events::{Event, EventBus, EventEnvelope};

use crate::command_orchestrator::{CommandConfig, CommandOrchestrator, CommandOutcome, DecidingHandler, ExecuteArgs, OrchestratorError};
use crate::event_store::EventStore;
use crate::jobs::{Job, JobKind, JobStore, JobStoreError};

/// Default intent timeout (spec §4.9: 5 minutes).
pub const DEFAULT_INTENT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Completed,
    Failed,
    Abandoned,
}

/// A crash-safety record for one in-flight command. Intents are a separate
/// key-value table from events; they never affect event ordering.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Intent {
    pub intent_key: String,
    pub tenant_id: TenantId,
    pub command_type: String,
    pub stream_type: StreamType,
    pub stream_id: AggregateId,
    pub status: IntentStatus,
    pub recorded_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    pub completion_event_id: Option<EventId>,
    pub error: Option<String>,
}

pub trait IntentStore: Send + Sync {
    fn record(&self, intent: Intent);

    fn get(&self, intent_key: &str) -> Option<Intent>;

    fn update_status(&self, intent_key: &str, status: IntentStatus, completion_event_id: Option<EventId>, error: Option<String>);

    /// Flip `intent_key` from `pending` to `abandoned` if it's still
    /// pending. Returns whether the transition happened. This is what the
    /// scheduled timeout job (spec §4.9 step 3) calls; orphan detection
    /// *is* this timeout firing while nothing else has resolved the intent.
    fn abandon_if_pending(&self, intent_key: &str) -> bool;
}

/// In-memory reference [`IntentStore`].
#[derive(Default)]
pub struct InMemoryIntentStore {
    intents: std::sync::RwLock<std::collections::HashMap<String, Intent>>,
}

impl InMemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IntentStore for InMemoryIntentStore {
    fn record(&self, intent: Intent) {
        self.intents.write().unwrap().insert(intent.intent_key.clone(), intent);
    }

    fn get(&self, intent_key: &str) -> Option<Intent> {
        self.intents.read().unwrap().get(intent_key).cloned()
    }

    fn update_status(&self, intent_key: &str, status: IntentStatus, completion_event_id: Option<EventId>, error: Option<String>) {
        if let Some(intent) = self.intents.write().unwrap().get_mut(intent_key) {
            intent.status = status;
            intent.completion_event_id = completion_event_id;
            intent.error = error;
        }
    }

    fn abandon_if_pending(&self, intent_key: &str) -> bool {
        let mut guard = self.intents.write().unwrap();
        match guard.get_mut(intent_key) {
            Some(intent) if intent.status == IntentStatus::Pending => {
                intent.status = IntentStatus::Abandoned;
                true
            }
            _ => false,
        }
    }
}

/// Payload of the scheduled timeout job that abandons an orphaned intent.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct IntentTimeoutWork {
    pub intent_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DurableError {
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),
    #[error("job store error: {0}")]
    Job(#[from] JobStoreError),
}

/// C9: wraps [`CommandOrchestrator`] with intent bracketing.
pub struct DurableExecutor<S, B, IS, J> {
    orchestrator: CommandOrchestrator<S, B>,
    intents: IS,
    job_store: J,
    timeout: Duration,
}

impl<S, B, IS, J> DurableExecutor<S, B, IS, J>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    IS: IntentStore,
    J: JobStore,
{
    pub fn new(orchestrator: CommandOrchestrator<S, B>, intents: IS, job_store: J) -> Self {
        Self {
            orchestrator,
            intents,
            job_store,
            timeout: DEFAULT_INTENT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn execute<D>(&self, command_type: &str, config: &CommandConfig<D>, args: ExecuteArgs<D::Command>) -> Result<CommandOutcome<D::State>, DurableError>
    where
        D: DecidingHandler,
        D::Event: Event + Serialize + serde::de::DeserializeOwned,
        D::State: Clone,
    {
        let now = Utc::now();
        let suffix: u32 = rand::thread_rng().gen_range(0..u32::MAX);
        let intent_key = format!(
            "{}:{}:{}:{}_{}",
            command_type, config.stream_type, args.stream_id, now.timestamp_millis(), suffix
        );

        // 2) Record intent pending.
        self.intents.record(Intent {
            intent_key: intent_key.clone(),
            tenant_id: args.tenant_id,
            command_type: command_type.to_string(),
            stream_type: config.stream_type.clone(),
            stream_id: args.stream_id,
            status: IntentStatus::Pending,
            recorded_at: now,
            timeout_at: now + chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::seconds(300)),
            completion_event_id: None,
            error: None,
        });

        // 3) Schedule the timeout mutation. The actual abandon happens in a
        // handler registered on `JobExecutor` for `JobKind::Custom{kind:
        // "durable-intent-timeout"}` that calls `IntentStore::abandon_if_pending`.
        let timeout_job = Job::new(
            args.tenant_id,
            JobKind::custom("durable-intent-timeout"),
            serde_json::to_value(IntentTimeoutWork {
                intent_key: intent_key.clone(),
            })
            .expect("IntentTimeoutWork always serializes"),
        )
        .delayed(self.timeout);
        self.job_store.enqueue(timeout_job)?;

        // 4) Invoke C5. A panic here leaves the intent pending for the
        // timeout job to eventually abandon; we don't catch_unwind, the
        // same way the teacher never wraps its handlers in one.
        let result = self.orchestrator.execute(config, args);

        // 5/6) Resolve the intent from the outcome.
        match &result {
            Ok(CommandOutcome::Success { event_id, .. }) => {
                self.intents.update_status(&intent_key, IntentStatus::Completed, Some(*event_id), None);
            }
            Ok(CommandOutcome::Failed { event_id, reason, .. }) => {
                self.intents.update_status(&intent_key, IntentStatus::Failed, Some(*event_id), Some(reason.clone()));
            }
            Ok(CommandOutcome::Rejected { code, reason, .. }) => {
                self.intents.update_status(&intent_key, IntentStatus::Failed, None, Some(format!("{code}: {reason}")));
            }
            Ok(CommandOutcome::Conflict { current_version }) => {
                self.intents.update_status(&intent_key, IntentStatus::Failed, None, Some(format!("conflict at version {current_version}")));
            }
            Err(err) => {
                self.intents.update_status(&intent_key, IntentStatus::Failed, None, Some(err.to_string()));
            }
        }

        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use crate::jobs::InMemoryJobStore;
    use ledgerflow_core::{Decider, DeciderContext, Decision};
    use ledgerflow_events::{EventCategory, InMemoryEventBus};

    #[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq)]
    struct Opened;

    impl Event for Opened {
        fn event_type(&self) -> &'static str {
            "account.opened"
        }
        fn version(&self) -> u32 {
            1
        }
        fn occurred_at(&self) -> DateTime<Utc> {
            Utc::now()
        }
        fn category(&self) -> EventCategory {
            EventCategory::Domain
        }
    }

    #[derive(Debug, Clone, Default)]
    struct AccountState {
        opened: bool,
    }

    struct OpenAccount;

    impl Decider for OpenAccount {
        type State = AccountState;
        type Command = ();
        type Event = Opened;

        fn decide(&self, state: Option<&Self::State>, _command: &Self::Command, _ctx: &DeciderContext) -> Decision<Self::Event, Self::State> {
            if state.is_some_and(|s| s.opened) {
                return Decision::Rejected {
                    code: "ALREADY_OPENED".to_string(),
                    message: "account already opened".to_string(),
                    context: serde_json::json!({}),
                };
            }
            Decision::Success {
                event: Opened,
                state_update: AccountState { opened: true },
            }
        }
    }

    impl crate::command_orchestrator::DecidingHandler for OpenAccount {
        fn evolve(_state: Option<Self::State>, _event: &Self::Event) -> Self::State {
            AccountState { opened: true }
        }
    }

    #[test]
    fn successful_command_marks_intent_completed() {
        let orchestrator = CommandOrchestrator::new(InMemoryEventStore::new(), InMemoryEventBus::new());
        let intents = InMemoryIntentStore::new();
        let job_store = InMemoryJobStore::new();
        let executor = DurableExecutor::new(orchestrator, intents, job_store);

        let config = CommandConfig::new(OpenAccount, StreamType::new("account").unwrap());
        let tenant = TenantId::new();
        let args = ExecuteArgs {
            tenant_id: tenant,
            stream_id: AggregateId::new(),
            command: (),
            command_id: None,
            correlation_id: None,
            user_id: None,
        };

        let outcome = executor.execute("OpenAccount", &config, args).unwrap();
        assert!(matches!(outcome, CommandOutcome::Success { .. }));

        let stats = executor.job_store.stats(tenant).unwrap();
        assert_eq!(stats.pending, 1);
    }
}
