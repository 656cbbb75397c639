use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use ledgerflow_core::{AggregateId, CommandId, ExpectedVersion, StreamType, TenantId};

use super::query::{EventFilter, EventQuery, EventQueryResult, Pagination};
use super::r#trait::{CmsRow, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    stream_type: StreamType,
    stream_id: AggregateId,
}

/// In-memory append-only event store. Reference adapter for tests/dev; a
/// production host supplies a transactional backend behind the same trait.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
    next_global_position: RwLock<u64>,
    /// Secondary index backing `lookup_by_command_id` (spec §4.4).
    by_command_id: RwLock<HashMap<(TenantId, CommandId), Vec<StoredEvent>>>,
    /// Materialized CMS rows (spec §3, §4.4 `loadCMS`), keyed the same way
    /// as `streams`; populated only by `append_and_patch_cms`.
    cms: RwLock<HashMap<StreamKey, CmsRow>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.stream_version).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let tenant_id = events[0].tenant_id;
        let stream_id = events[0].stream_id;
        let stream_type = events[0].stream_type.clone();
        let command_id = events[0].causation_id;

        for (idx, e) in events.iter().enumerate() {
            if e.tenant_id != tenant_id {
                return Err(EventStoreError::TenantIsolation(format!(
                    "batch contains multiple tenant_ids (index {idx})"
                )));
            }
            if e.stream_id != stream_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple stream_ids (index {idx})"
                )));
            }
            if e.stream_type != stream_type {
                return Err(EventStoreError::StreamTypeMismatch(format!(
                    "batch contains multiple stream_types (index {idx})"
                )));
            }
            if e.causation_id != command_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch events must share one causation_id (index {idx})"
                )));
            }
        }

        let key = StreamKey {
            tenant_id,
            stream_type: stream_type.clone(),
            stream_id,
        };

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let stream = streams.entry(key).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(existing) = stream.first() {
            if existing.stream_type != stream_type {
                return Err(EventStoreError::StreamTypeMismatch(format!(
                    "stream type is '{}', attempted append with '{}'",
                    existing.stream_type, stream_type
                )));
            }
        }

        let mut next_stream_version = current + 1;
        let mut next_global_position = self
            .next_global_position
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            *next_global_position += 1;
            let stored = StoredEvent {
                event_id: e.event_id,
                tenant_id: e.tenant_id,
                stream_type: e.stream_type,
                stream_id: e.stream_id,
                stream_version: next_stream_version,
                global_position: *next_global_position,
                event_type: e.event_type,
                schema_version: e.schema_version,
                category: e.category,
                timestamp: e.timestamp,
                correlation_id: e.correlation_id,
                causation_id: e.causation_id,
                user_id: e.user_id,
                payload: e.payload,
            };
            next_stream_version += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }
        drop(streams);
        drop(next_global_position);

        if let Some(command_id) = command_id {
            self.by_command_id
                .write()
                .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?
                .insert((tenant_id, command_id), committed.clone());
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        stream_type: &StreamType,
        stream_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            stream_type: stream_type.clone(),
            stream_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }

    fn lookup_by_command_id(
        &self,
        tenant_id: TenantId,
        command_id: CommandId,
    ) -> Result<Option<Vec<StoredEvent>>, EventStoreError> {
        let index = self
            .by_command_id
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;
        Ok(index.get(&(tenant_id, command_id)).cloned())
    }

    fn load_cms(
        &self,
        tenant_id: TenantId,
        stream_type: &StreamType,
        stream_id: AggregateId,
    ) -> Result<Option<CmsRow>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            stream_type: stream_type.clone(),
            stream_id,
        };
        let cms = self
            .cms
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;
        Ok(cms.get(&key).cloned())
    }

    fn append_and_patch_cms(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
        cms_state: JsonValue,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let tenant_id = events.first().map(|e| e.tenant_id);
        let stream_type = events.first().map(|e| e.stream_type.clone());
        let stream_id = events.first().map(|e| e.stream_id);

        let committed = self.append(events, expected_version)?;

        if let (Some(tenant_id), Some(stream_type), Some(stream_id), Some(last)) =
            (tenant_id, stream_type, stream_id, committed.last())
        {
            let key = StreamKey {
                tenant_id,
                stream_type,
                stream_id,
            };
            self.cms
                .write()
                .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?
                .insert(
                    key,
                    CmsRow {
                        state: cms_state,
                        version: last.stream_version,
                    },
                );
        }

        Ok(committed)
    }
}

#[async_trait::async_trait]
impl EventQuery for InMemoryEventStore {
    async fn query_events(
        &self,
        tenant_id: TenantId,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, EventStoreError> {
        let streams = {
            let guard = self
                .streams
                .read()
                .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;
            guard.clone()
        };

        let mut all_events: Vec<StoredEvent> = Vec::new();
        for (key, stream) in streams.iter() {
            if key.tenant_id == tenant_id {
                all_events.extend(stream.iter().cloned());
            }
        }

        let mut filtered: Vec<StoredEvent> = all_events
            .into_iter()
            .filter(|e| {
                if let Some(stream_id) = filter.stream_id {
                    if e.stream_id != stream_id {
                        return false;
                    }
                }
                if let Some(ref stream_type) = filter.stream_type {
                    if e.stream_type != *stream_type {
                        return false;
                    }
                }
                if let Some(ref evt_type) = filter.event_type {
                    if e.event_type != *evt_type {
                        return false;
                    }
                }
                if let Some(after) = filter.occurred_after {
                    if e.timestamp < after {
                        return false;
                    }
                }
                if let Some(before) = filter.occurred_before {
                    if e.timestamp > before {
                        return false;
                    }
                }
                true
            })
            .collect();

        // Global position order is the store's natural read order.
        filtered.sort_by_key(|e| e.global_position);

        let total = filtered.len() as u64;
        let start = pagination.offset as usize;
        let paginated = filtered.into_iter().skip(start).take(pagination.limit as usize).collect();
        let has_more = total > (pagination.offset + pagination.limit) as u64;

        Ok(EventQueryResult {
            events: paginated,
            total,
            pagination,
            has_more,
        })
    }

    async fn get_stream_events(
        &self,
        tenant_id: TenantId,
        stream_type: &StreamType,
        stream_id: AggregateId,
        pagination: Option<Pagination>,
    ) -> Result<EventQueryResult, EventStoreError> {
        let all_events = self.load_stream(tenant_id, stream_type, stream_id)?;

        let total = all_events.len() as u64;
        let pagination = pagination.unwrap_or_default();

        let start = pagination.offset as usize;
        let paginated: Vec<StoredEvent> = all_events
            .into_iter()
            .skip(start)
            .take(pagination.limit as usize)
            .collect();

        let has_more = total > (pagination.offset + pagination.limit) as u64;

        Ok(EventQueryResult {
            events: paginated,
            total,
            pagination,
            has_more,
        })
    }

    async fn get_event_by_id(
        &self,
        tenant_id: TenantId,
        event_id: ledgerflow_core::EventId,
    ) -> Result<Option<StoredEvent>, EventStoreError> {
        let streams = {
            let guard = self
                .streams
                .read()
                .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;
            guard.clone()
        };

        for (key, stream) in streams.iter() {
            if key.tenant_id == tenant_id {
                if let Some(event) = stream.iter().find(|e| e.event_id == event_id) {
                    return Ok(Some(event.clone()));
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledgerflow_core::CorrelationId;
    use ledgerflow_core::EventId;
    use ledgerflow_events::EventCategory;
    use serde_json::json;

    fn event(tenant: TenantId, stream_type: &StreamType, stream_id: AggregateId, command: CommandId) -> UncommittedEvent {
        UncommittedEvent {
            event_id: EventId::new(),
            tenant_id: tenant,
            stream_type: stream_type.clone(),
            stream_id,
            event_type: "inventory.item.created".into(),
            schema_version: 1,
            category: EventCategory::Domain,
            timestamp: Utc::now(),
            correlation_id: CorrelationId::from(command),
            causation_id: Some(command),
            user_id: None,
            payload: json!({}),
        }
    }

    #[test]
    fn assigns_increasing_stream_version_and_global_position() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let stream_type = StreamType::new("inventory.item").unwrap();
        let stream_id = AggregateId::new();

        let first = store
            .append(vec![event(tenant, &stream_type, stream_id, CommandId::new())], ExpectedVersion::NoStream)
            .unwrap();
        assert_eq!(first[0].stream_version, 1);
        assert_eq!(first[0].global_position, 1);

        let second = store
            .append(
                vec![event(tenant, &stream_type, stream_id, CommandId::new())],
                ExpectedVersion::Exact(1),
            )
            .unwrap();
        assert_eq!(second[0].stream_version, 2);
        assert_eq!(second[0].global_position, 2);
    }

    #[test]
    fn rejects_stale_expected_version() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let stream_type = StreamType::new("inventory.item").unwrap();
        let stream_id = AggregateId::new();

        store
            .append(vec![event(tenant, &stream_type, stream_id, CommandId::new())], ExpectedVersion::NoStream)
            .unwrap();

        let err = store
            .append(vec![event(tenant, &stream_type, stream_id, CommandId::new())], ExpectedVersion::NoStream)
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn lookup_by_command_id_returns_prior_outcome() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let stream_type = StreamType::new("inventory.item").unwrap();
        let stream_id = AggregateId::new();
        let command_id = CommandId::new();

        assert!(store.lookup_by_command_id(tenant, command_id).unwrap().is_none());

        let committed = store
            .append(vec![event(tenant, &stream_type, stream_id, command_id)], ExpectedVersion::NoStream)
            .unwrap();

        let found = store.lookup_by_command_id(tenant, command_id).unwrap().unwrap();
        assert_eq!(found, committed);
    }

    #[test]
    fn cms_row_absent_until_first_event_appended() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let stream_type = StreamType::new("inventory.item").unwrap();
        let stream_id = AggregateId::new();

        assert!(store.load_cms(tenant, &stream_type, stream_id).unwrap().is_none());

        store
            .append_and_patch_cms(
                vec![event(tenant, &stream_type, stream_id, CommandId::new())],
                ExpectedVersion::NoStream,
                json!({"onHand": 10}),
            )
            .unwrap();

        let cms = store.load_cms(tenant, &stream_type, stream_id).unwrap().unwrap();
        assert_eq!(cms.version, 1);
        assert_eq!(cms.state, json!({"onHand": 10}));
    }

    #[test]
    fn cms_version_tracks_stream_version_across_appends() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let stream_type = StreamType::new("inventory.item").unwrap();
        let stream_id = AggregateId::new();

        store
            .append_and_patch_cms(
                vec![event(tenant, &stream_type, stream_id, CommandId::new())],
                ExpectedVersion::NoStream,
                json!({"onHand": 10}),
            )
            .unwrap();
        store
            .append_and_patch_cms(
                vec![event(tenant, &stream_type, stream_id, CommandId::new())],
                ExpectedVersion::Exact(1),
                json!({"onHand": 8}),
            )
            .unwrap();

        let cms = store.load_cms(tenant, &stream_type, stream_id).unwrap().unwrap();
        let stream = store.load_stream(tenant, &stream_type, stream_id).unwrap();
        assert_eq!(cms.version, stream.last().unwrap().stream_version);
        assert_eq!(cms.state, json!({"onHand": 8}));
    }

    #[test]
    fn plain_append_does_not_patch_cms() {
        let store = InMemoryEventStore::new();
        let tenant = TenantId::new();
        let stream_type = StreamType::new("inventory.item").unwrap();
        let stream_id = AggregateId::new();

        store
            .append(vec![event(tenant, &stream_type, stream_id, CommandId::new())], ExpectedVersion::NoStream)
            .unwrap();

        assert!(store.load_cms(tenant, &stream_type, stream_id).unwrap().is_none());
    }
}
