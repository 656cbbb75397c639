use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;

use ledgerflow_core::{AggregateId, CommandId, CorrelationId, EventId, ExpectedVersion, StreamType, TenantId, UserId};
use ledgerflow_events::{Event, EventCategory, EventEnvelope};

/// An event ready to be appended to a stream (not yet assigned a stream
/// version or global position).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: EventId,
    pub tenant_id: TenantId,
    pub stream_type: StreamType,
    pub stream_id: AggregateId,

    pub event_type: String,
    pub schema_version: u32,
    pub category: EventCategory,
    pub timestamp: DateTime<Utc>,

    pub correlation_id: CorrelationId,
    pub causation_id: Option<CommandId>,
    pub user_id: Option<UserId>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a stream version and a
/// store-wide global position).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub tenant_id: TenantId,
    pub stream_type: StreamType,
    pub stream_id: AggregateId,

    /// Monotonically increasing position within this stream. Starts at 1.
    pub stream_version: u64,
    /// Monotonically increasing position across the whole store.
    pub global_position: u64,

    pub event_type: String,
    pub schema_version: u32,
    pub category: EventCategory,
    pub timestamp: DateTime<Utc>,

    pub correlation_id: CorrelationId,
    pub causation_id: Option<CommandId>,
    pub user_id: Option<UserId>,

    pub payload: JsonValue,
}

impl StoredEvent {
    /// Convert a stored event into a publishable envelope.
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.tenant_id,
            self.stream_type.clone(),
            self.stream_id,
            self.event_type.clone(),
            self.stream_version,
            self.global_position,
            self.timestamp,
            self.category,
            self.schema_version,
            self.correlation_id,
            self.causation_id,
            self.user_id,
            self.payload.clone(),
        )
    }
}

/// Materialized Command-Model State row (spec §3 CMS, §4.4 `loadCMS`): the
/// reduced per-stream view a handler loads instead of replaying the full
/// stream on every command. Invariant: a row exists iff >= 1 event has been
/// appended to its stream, and `version` equals the stream's version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmsRow {
    pub state: JsonValue,
    pub version: u64,
}

#[derive(Debug, Error, Clone)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("stream type mismatch: {0}")]
    StreamTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event publication failed: {0}")]
    Publish(String),
}

/// Append-only, tenant-scoped event store (C4).
pub trait EventStore: Send + Sync {
    /// Append events to a stream. Implementations must enforce tenant
    /// isolation, check `expected_version` against the stream's current
    /// version, and assign monotonically increasing `stream_version`s and
    /// store-wide `global_position`s.
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream identified by `(stream_type, stream_id)`.
    fn load_stream(
        &self,
        tenant_id: TenantId,
        stream_type: &StreamType,
        stream_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Resolve the events previously committed under `command_id`, if any.
    /// Backs command idempotency (spec §4.5 step 1): a retry that supplies
    /// a `command_id` already seen returns the original outcome instead of
    /// re-deciding the command.
    fn lookup_by_command_id(
        &self,
        tenant_id: TenantId,
        command_id: CommandId,
    ) -> Result<Option<Vec<StoredEvent>>, EventStoreError>;

    /// Load the materialized CMS row for `(stream_type, stream_id)` (spec
    /// §4.4 `loadCMS`). `None` iff no event has ever been appended to the
    /// stream.
    fn load_cms(
        &self,
        tenant_id: TenantId,
        stream_type: &StreamType,
        stream_id: AggregateId,
    ) -> Result<Option<CmsRow>, EventStoreError>;

    /// Append `events` and patch the stream's CMS row to `cms_state` in one
    /// step (spec §3: "a CMS row exists iff >= 1 event has been appended...
    /// `version` equals the stream version"). Only `Decision::Success`
    /// patches CMS; `Decision::Failed` leaves it unchanged and should call
    /// [`EventStore::append`] directly instead.
    fn append_and_patch_cms(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
        cms_state: JsonValue,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        stream_type: &StreamType,
        stream_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(tenant_id, stream_type, stream_id)
    }

    fn lookup_by_command_id(
        &self,
        tenant_id: TenantId,
        command_id: CommandId,
    ) -> Result<Option<Vec<StoredEvent>>, EventStoreError> {
        (**self).lookup_by_command_id(tenant_id, command_id)
    }

    fn load_cms(
        &self,
        tenant_id: TenantId,
        stream_type: &StreamType,
        stream_id: AggregateId,
    ) -> Result<Option<CmsRow>, EventStoreError> {
        (**self).load_cms(tenant_id, stream_type, stream_id)
    }

    fn append_and_patch_cms(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
        cms_state: JsonValue,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append_and_patch_cms(events, expected_version, cms_state)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    #[allow(clippy::too_many_arguments)]
    pub fn from_typed<E>(
        tenant_id: TenantId,
        stream_type: StreamType,
        stream_id: AggregateId,
        event_id: EventId,
        correlation_id: CorrelationId,
        causation_id: Option<CommandId>,
        user_id: Option<UserId>,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::InvalidAppend(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id,
            tenant_id,
            stream_type,
            stream_id,
            event_type: event.event_type().to_string(),
            schema_version: event.version(),
            category: event.category(),
            timestamp: event.occurred_at(),
            correlation_id,
            causation_id,
            user_id,
            payload,
        })
    }
}
