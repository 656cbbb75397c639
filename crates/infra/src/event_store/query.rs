//! Event query interface for inspection, replay, and debugging.
//!
//! All queries are tenant-scoped and paginated by default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ledgerflow_core::{AggregateId, EventId, StreamType, TenantId};

use crate::event_store::{EventStoreError, StoredEvent};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000),
            offset: offset.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub stream_id: Option<AggregateId>,
    pub stream_type: Option<StreamType>,
    pub event_type: Option<String>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventQueryResult {
    pub events: Vec<StoredEvent>,
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// Async query interface for event inspection and replay, ordered by
/// `global_position`.
#[async_trait::async_trait]
pub trait EventQuery: Send + Sync {
    async fn query_events(
        &self,
        tenant_id: TenantId,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, EventStoreError>;

    async fn get_stream_events(
        &self,
        tenant_id: TenantId,
        stream_type: &StreamType,
        stream_id: AggregateId,
        pagination: Option<Pagination>,
    ) -> Result<EventQueryResult, EventStoreError> {
        let filter = EventFilter {
            stream_id: Some(stream_id),
            stream_type: Some(stream_type.clone()),
            ..Default::default()
        };
        self.query_events(tenant_id, filter, pagination.unwrap_or_default()).await
    }

    async fn get_event_by_id(
        &self,
        tenant_id: TenantId,
        event_id: EventId,
    ) -> Result<Option<StoredEvent>, EventStoreError>;
}
