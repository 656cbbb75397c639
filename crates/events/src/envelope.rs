use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ledgerflow_core::{AggregateId, CommandId, CorrelationId, EventId, StreamType, TenantId, UserId};

use crate::event::EventCategory;

/// Envelope for an event, containing stream/ordering/tenant metadata on top
/// of a domain payload. This is the unit of persistence and of bus
/// delivery — what the event store actually stores and what C7 publishes.
///
/// `E` is typically `serde_json::Value` at the storage/transport boundary
/// (schema evolution, C3 upcasting) and a typed event enum inside deciders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: EventId,
    tenant_id: TenantId,

    stream_type: StreamType,
    aggregate_id: AggregateId,
    event_type: String,

    /// Monotonically increasing position within `(stream_type, aggregate_id)`. Starts at 1.
    stream_version: u64,

    /// Monotonically increasing position across the whole store.
    global_position: u64,

    timestamp: DateTime<Utc>,
    category: EventCategory,

    /// Schema version of `payload` (C3 upcasting target/source marker).
    schema_version: u32,

    correlation_id: CorrelationId,
    causation_id: Option<CommandId>,
    user_id: Option<UserId>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: EventId,
        tenant_id: TenantId,
        stream_type: StreamType,
        aggregate_id: AggregateId,
        event_type: impl Into<String>,
        stream_version: u64,
        global_position: u64,
        timestamp: DateTime<Utc>,
        category: EventCategory,
        schema_version: u32,
        correlation_id: CorrelationId,
        causation_id: Option<CommandId>,
        user_id: Option<UserId>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            stream_type,
            aggregate_id,
            event_type: event_type.into(),
            stream_version,
            global_position,
            timestamp,
            category,
            schema_version,
            correlation_id,
            causation_id,
            user_id,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn stream_type(&self) -> &StreamType {
        &self.stream_type
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn stream_version(&self) -> u64 {
        self.stream_version
    }

    pub fn global_position(&self) -> u64 {
        self.global_position
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn causation_id(&self) -> Option<CommandId> {
        self.causation_id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Re-wrap `self` with a different payload, keeping every other field —
    /// used by the upcaster (C3) to produce the migrated envelope and by
    /// typed/untyped conversions at the store boundary.
    pub fn with_payload<E2>(self, payload: E2) -> EventEnvelope<E2> {
        EventEnvelope {
            event_id: self.event_id,
            tenant_id: self.tenant_id,
            stream_type: self.stream_type,
            aggregate_id: self.aggregate_id,
            event_type: self.event_type,
            stream_version: self.stream_version,
            global_position: self.global_position,
            timestamp: self.timestamp,
            category: self.category,
            schema_version: self.schema_version,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            user_id: self.user_id,
            payload,
        }
    }
}
