//! Dynamic Consistency Boundary executor (C6): atomic multi-entity
//! operations with scope-level OCC.
//!
//! Generalizes the single-stream [`crate::command_orchestrator`] shape to a
//! decider that reads several entities at once and emits one scope-level
//! event, the way `other_examples` `disintegrate-es` lets a `Decision` read
//! a wider query than the state it mutates. The scope itself is tracked as
//! its own append-only stream (`streamId = scopeId`); the entities it
//! spans are materialized state the decider reads and `applyUpdate` writes.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::Value as JsonValue;

use ledgerflow_core::{
    AggregateId, CommandId, CorrelationId, DeciderContext, EventId, ExpectedVersion, StreamType, TenantId, UserId,
};
use ledgerflow_events::Event;

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::jobs::{Job, JobKind, JobStore, JobStoreError};

/// A pure multi-entity decision function (spec §4.6 step 5). `State` is the
/// type every entity in the scope shares; callers spanning heterogeneous
/// entity kinds use an enum.
pub trait DcbDecider {
    type State;
    type Command;
    type Event;

    fn decide(
        &self,
        entities: &HashMap<AggregateId, Self::State>,
        command: &Self::Command,
        ctx: &DeciderContext,
    ) -> DcbDecision<Self::Event, Self::State>;
}

/// Outcome of one [`DcbDecider::decide`] call.
#[derive(Debug, Clone)]
pub enum DcbDecision<Ev, St> {
    Success {
        event: Ev,
        updates: HashMap<AggregateId, St>,
    },
    Failed {
        event: Ev,
        reason: String,
        context: JsonValue,
    },
    Rejected {
        code: String,
        message: String,
        context: JsonValue,
    },
}

/// Loads and persists the materialized entities a DCB scope spans. `loadEntity`
/// and `applyUpdate` from spec §4.6 steps 3 and 6.
pub trait EntityRepository<St>: Send + Sync {
    fn load(&self, stream_id: AggregateId) -> Option<St>;

    /// Persist `update` for `stream_id` at `new_version`. An update
    /// referencing a `stream_id` outside the loaded set never reaches this
    /// call; see [`DcbError::UnknownStreamId`].
    fn apply_update(&self, stream_id: AggregateId, update: St, new_version: u64, now: DateTime<Utc>) -> Result<(), DcbError>;
}

/// Tracks scope-level OCC versions. A scope version mirrors the scope's own
/// event stream length.
pub trait ScopeStore: Send + Sync {
    fn current_version(&self, scope_key: &str) -> Option<u64>;

    /// Commits the scope at `expected_version`. Returns the new version on
    /// success, or the conflicting current version on mismatch.
    fn commit(&self, scope_key: &str, expected_version: u64) -> Result<u64, u64>;
}

/// In-memory reference [`ScopeStore`].
#[derive(Debug, Default)]
pub struct InMemoryScopeStore {
    versions: std::sync::RwLock<HashMap<String, u64>>,
}

impl InMemoryScopeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScopeStore for InMemoryScopeStore {
    fn current_version(&self, scope_key: &str) -> Option<u64> {
        self.versions.read().unwrap().get(scope_key).copied()
    }

    fn commit(&self, scope_key: &str, expected_version: u64) -> Result<u64, u64> {
        let mut versions = self.versions.write().unwrap();
        let current = versions.get(scope_key).copied().unwrap_or(0);
        if current != expected_version {
            return Err(current);
        }
        let next = expected_version + 1;
        versions.insert(scope_key.to_string(), next);
        Ok(next)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DcbError {
    #[error("event store error: {0}")]
    Store(#[from] EventStoreError),
    #[error("job store error: {0}")]
    Job(#[from] JobStoreError),
    #[error("payload (de)serialization failed: {0}")]
    Serde(String),
    #[error("decider produced an update for unknown stream id {0}")]
    UnknownStreamId(AggregateId),
}

/// The four outcomes spec §4.6 distinguishes, plus the retry-deferred
/// outcome [`with_dcb_retry`] adds on top.
#[derive(Debug, Clone)]
pub enum DcbOutcome<St> {
    Success {
        updates: HashMap<AggregateId, St>,
        event_id: EventId,
        global_position: u64,
    },
    Failed {
        reason: String,
        event_id: EventId,
        context: JsonValue,
    },
    Rejected {
        code: String,
        reason: String,
        context: JsonValue,
    },
    Conflict {
        current_version: u64,
    },
}

struct ScopeKeyParts {
    scope_id: AggregateId,
}

/// Validates `tenant:{tenantId}:{scopeType}:{scopeId}` (spec §4.6 step 1).
fn validate_scope_key(key: &str, tenant_id: TenantId) -> Result<ScopeKeyParts, (String, String)> {
    if key.is_empty() {
        return Err(("SCOPE_KEY_EMPTY".to_string(), "scope key must not be empty".to_string()));
    }
    let parts: Vec<&str> = key.split(':').collect();
    if parts.len() != 4 || parts[0] != "tenant" {
        return Err((
            "INVALID_SCOPE_KEY_FORMAT".to_string(),
            format!("scope key '{key}' must match tenant:{{tenantId}}:{{scopeType}}:{{scopeId}}"),
        ));
    }
    if parts[1].is_empty() {
        return Err(("TENANT_ID_REQUIRED".to_string(), "scope key is missing a tenant id".to_string()));
    }
    if parts[2].is_empty() || parts[3].is_empty() {
        return Err((
            "INVALID_SCOPE_KEY_FORMAT".to_string(),
            "scope type and scope id must not be empty".to_string(),
        ));
    }
    let key_tenant = TenantId::from_str(parts[1])
        .map_err(|_| ("TENANT_ID_REQUIRED".to_string(), "scope key tenant id is not a valid identifier".to_string()))?;
    if key_tenant != tenant_id {
        return Err((
            "TENANT_ID_REQUIRED".to_string(),
            "scope key tenant id does not match the caller's tenant".to_string(),
        ));
    }
    let scope_id = AggregateId::from_str(parts[3])
        .map_err(|_| ("INVALID_SCOPE_KEY_FORMAT".to_string(), "scope id is not a valid identifier".to_string()))?;
    Ok(ScopeKeyParts { scope_id })
}

/// Arguments for one [`DcbExecutor::execute`] call.
#[derive(Clone)]
pub struct DcbArgs<C> {
    pub tenant_id: TenantId,
    pub scope_key: String,
    pub expected_version: u64,
    pub scope_stream_type: StreamType,
    pub stream_ids: Vec<AggregateId>,
    pub command: C,
    pub command_id: Option<CommandId>,
    pub correlation_id: Option<CorrelationId>,
    pub user_id: Option<UserId>,
}

/// C6: executes a multi-entity decider against a scope with scope-level OCC.
pub struct DcbExecutor<S, SC> {
    store: S,
    scope_store: SC,
}

impl<S, SC> DcbExecutor<S, SC> {
    pub fn new(store: S, scope_store: SC) -> Self {
        Self { store, scope_store }
    }
}

impl<S, SC> DcbExecutor<S, SC>
where
    S: EventStore,
    SC: ScopeStore,
{
    pub fn execute<D, R>(
        &self,
        decider: &D,
        repo: &R,
        args: DcbArgs<D::Command>,
    ) -> Result<DcbOutcome<D::State>, DcbError>
    where
        D: DcbDecider,
        D::Event: Event + Serialize,
        D::State: Clone,
        R: EntityRepository<D::State>,
    {
        // 1) Validate scope key.
        let parts = match validate_scope_key(&args.scope_key, args.tenant_id) {
            Ok(parts) => parts,
            Err((code, message)) => {
                return Ok(DcbOutcome::Rejected {
                    code,
                    reason: message,
                    context: JsonValue::Null,
                })
            }
        };

        // 2) Scope pre-check.
        match self.scope_store.current_version(&args.scope_key) {
            None if args.expected_version != 0 => return Ok(DcbOutcome::Conflict { current_version: 0 }),
            Some(current) if current != args.expected_version => {
                return Ok(DcbOutcome::Conflict { current_version: current })
            }
            _ => {}
        }

        // 3) Load entities.
        let mut entities = HashMap::with_capacity(args.stream_ids.len());
        let mut missing = Vec::new();
        for stream_id in &args.stream_ids {
            match repo.load(*stream_id) {
                Some(state) => {
                    entities.insert(*stream_id, state);
                }
                None => missing.push(*stream_id),
            }
        }
        if !missing.is_empty() {
            return Ok(DcbOutcome::Rejected {
                code: "ENTITIES_NOT_FOUND".to_string(),
                reason: "one or more scope entities do not exist".to_string(),
                context: serde_json::json!({ "missing": missing }),
            });
        }

        let command_id = args.command_id.unwrap_or_else(CommandId::new);
        let correlation_id = args.correlation_id.unwrap_or_else(|| CorrelationId::from(command_id));
        let ctx = DeciderContext {
            now: Utc::now(),
            command_id,
            correlation_id,
        };

        // 5) Run decider.
        match decider.decide(&entities, &args.command, &ctx) {
            DcbDecision::Rejected { code, message, context } => Ok(DcbOutcome::Rejected { code, reason: message, context }),
            DcbDecision::Failed { event, reason, context } => {
                let stored = self.persist_scope_event(&args, &parts, command_id, correlation_id, &event)?;
                Ok(DcbOutcome::Failed {
                    reason,
                    event_id: stored.event_id,
                    context,
                })
            }
            DcbDecision::Success { event, updates } => {
                let new_version = args.expected_version + 1;
                let now = Utc::now();

                // 6) Apply updates. An unknown stream id is a programmer
                // error: abort before touching the scope or the log.
                for stream_id in updates.keys() {
                    if !entities.contains_key(stream_id) {
                        return Err(DcbError::UnknownStreamId(*stream_id));
                    }
                }
                for (stream_id, update) in updates.clone() {
                    repo.apply_update(stream_id, update, new_version, now)?;
                }

                // 7) Commit scope. Entity updates above are NOT rolled back
                // on conflict; the caller relies on retry to converge.
                if let Err(current) = self.scope_store.commit(&args.scope_key, args.expected_version) {
                    return Ok(DcbOutcome::Conflict { current_version: current });
                }

                // 8) Produce the scope-level event.
                let stored = self.persist_scope_event(&args, &parts, command_id, correlation_id, &event)?;
                Ok(DcbOutcome::Success {
                    updates,
                    event_id: stored.event_id,
                    global_position: stored.global_position,
                })
            }
        }
    }

    fn persist_scope_event<C, Ev>(
        &self,
        args: &DcbArgs<C>,
        parts: &ScopeKeyParts,
        command_id: CommandId,
        correlation_id: CorrelationId,
        event: &Ev,
    ) -> Result<StoredEvent, DcbError>
    where
        Ev: Event + Serialize,
    {
        let uncommitted = UncommittedEvent::from_typed(
            args.tenant_id,
            args.scope_stream_type.clone(),
            parts.scope_id,
            EventId::new(),
            correlation_id,
            Some(command_id),
            args.user_id,
            event,
        )?;
        let mut committed = self.store.append(vec![uncommitted], ExpectedVersion::Exact(args.expected_version))?;
        Ok(committed.remove(0))
    }
}

/// A jitter sampler returning a multiplier applied to the capped backoff
/// delay. Injectable so callers (and tests) can pin it to a deterministic
/// value instead of the default uniform `[0.5, 1.5)` sampler (spec §4.6
/// config: `{maxAttempts, initialBackoffMs, base, maxMs, jitter?}`).
pub type JitterFn = std::sync::Arc<dyn Fn() -> f64 + Send + Sync>;

/// Backoff configuration for [`with_dcb_retry`] (spec §4.6 "withDCBRetry").
#[derive(Clone)]
pub struct DcbRetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub base: f64,
    pub max_delay: Duration,
    pub jitter: JitterFn,
}

impl std::fmt::Debug for DcbRetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcbRetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("base", &self.base)
            .field("max_delay", &self.max_delay)
            .field("jitter", &"<fn>")
            .finish()
    }
}

impl Default for DcbRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            base: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: std::sync::Arc::new(|| rand::thread_rng().gen_range(0.5..1.5)),
        }
    }
}

fn retry_delay(config: &DcbRetryConfig, attempt: u32) -> Duration {
    let raw_ms = (config.initial_delay.as_millis() as f64) * config.base.powi(attempt as i32);
    let capped_ms = raw_ms.min(config.max_delay.as_millis() as f64);
    let jitter = (config.jitter)();
    Duration::from_millis((capped_ms * jitter).max(0.0) as u64)
}

/// Payload enqueued onto the durable work pool when a DCB call conflicts.
/// A domain-specific handler registered on [`crate::jobs::JobExecutor`]
/// deserializes `command` and re-invokes the same [`DcbExecutor::execute`]
/// call; this module only owns the backoff/partitioning contract.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct DcbRetryWork {
    pub scope_key: String,
    pub partition_key: String,
    pub expected_version: u64,
    pub stream_ids: Vec<AggregateId>,
    pub retry_attempt: u32,
    pub command: JsonValue,
}

/// Result of one [`with_dcb_retry`] call: either the executor's own outcome,
/// or a retry deferred onto the work pool, or the retry budget exhausted.
#[derive(Debug, Clone)]
pub enum DcbRetryResult<St> {
    Outcome(DcbOutcome<St>),
    Deferred {
        work_id: crate::jobs::JobId,
        retry_attempt: u32,
        scheduled_after_ms: u64,
    },
    Rejected {
        code: String,
    },
}

/// Wraps [`DcbExecutor::execute`]: on `Conflict`, schedules a retry through
/// the work pool with jittered exponential backoff instead of returning the
/// conflict to the caller. Partition key `dcb:{scopeKey}` serializes all
/// retries of one scope through a single worker.
#[allow(clippy::too_many_arguments)]
pub fn with_dcb_retry<S, SC, D, R, J>(
    executor: &DcbExecutor<S, SC>,
    decider: &D,
    repo: &R,
    args: DcbArgs<D::Command>,
    attempt: u32,
    config: &DcbRetryConfig,
    job_store: &J,
) -> Result<DcbRetryResult<D::State>, DcbError>
where
    S: EventStore,
    SC: ScopeStore,
    D: DcbDecider,
    D::Event: Event + Serialize,
    D::Command: Clone + Serialize,
    D::State: Clone,
    R: EntityRepository<D::State>,
    J: JobStore,
{
    let tenant_id = args.tenant_id;
    let scope_key = args.scope_key.clone();
    let outcome = executor.execute(decider, repo, args.clone())?;

    let DcbOutcome::Conflict { .. } = outcome else {
        return Ok(DcbRetryResult::Outcome(outcome));
    };

    if attempt >= config.max_attempts {
        return Ok(DcbRetryResult::Rejected {
            code: "DCB_MAX_RETRIES_EXCEEDED".to_string(),
        });
    }

    let delay = retry_delay(config, attempt);
    let partition_key = format!("dcb:{scope_key}");
    let work = DcbRetryWork {
        scope_key: scope_key.clone(),
        partition_key: partition_key.clone(),
        expected_version: args.expected_version,
        stream_ids: args.stream_ids.clone(),
        retry_attempt: attempt + 1,
        command: serde_json::to_value(&args.command).map_err(|e| DcbError::Serde(e.to_string()))?,
    };
    let payload = serde_json::to_value(&work).map_err(|e| DcbError::Serde(e.to_string()))?;
    let job = Job::new(tenant_id, JobKind::custom("dcb-retry"), payload).delayed(delay);
    let work_id = job_store.enqueue(job)?;

    Ok(DcbRetryResult::Deferred {
        work_id,
        retry_attempt: attempt + 1,
        scheduled_after_ms: delay.as_millis() as u64,
    })
}
