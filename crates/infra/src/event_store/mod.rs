//! Append-only event store boundary (C4).
//!
//! This module defines an infrastructure-facing abstraction for storing and
//! loading tenant-scoped event streams without making any storage assumptions.

pub mod in_memory;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use query::{EventFilter, EventQuery, EventQueryResult, Pagination};
pub use r#trait::{CmsRow, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

use ledgerflow_core::{AggregateId, ExpectedVersion, StreamType, TenantId};
use ledgerflow_events::{EventBus, EventEnvelope};

/// Adapter that publishes committed events to an `EventBus` after a
/// successful append, composing storage and publication into one step.
/// Publish happens only after append succeeds: if publication fails the
/// events are already durable and can be republished (at-least-once).
pub struct PublishingEventStore<S, B> {
    store: S,
    bus: B,
}

impl<S, B> PublishingEventStore<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> EventStore for PublishingEventStore<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<serde_json::Value>>,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let committed = self.store.append(events, expected_version)?;

        for e in &committed {
            self.bus
                .publish(e.to_envelope())
                .map_err(|err| EventStoreError::Publish(format!("{err:?}")))?;
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        stream_type: &StreamType,
        stream_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.load_stream(tenant_id, stream_type, stream_id)
    }

    fn lookup_by_command_id(
        &self,
        tenant_id: TenantId,
        command_id: ledgerflow_core::CommandId,
    ) -> Result<Option<Vec<StoredEvent>>, EventStoreError> {
        self.store.lookup_by_command_id(tenant_id, command_id)
    }

    fn load_cms(
        &self,
        tenant_id: TenantId,
        stream_type: &StreamType,
        stream_id: AggregateId,
    ) -> Result<Option<CmsRow>, EventStoreError> {
        self.store.load_cms(tenant_id, stream_type, stream_id)
    }

    fn append_and_patch_cms(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
        cms_state: serde_json::Value,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let committed = self.store.append_and_patch_cms(events, expected_version, cms_state)?;

        for e in &committed {
            self.bus
                .publish(e.to_envelope())
                .map_err(|err| EventStoreError::Publish(format!("{err:?}")))?;
        }

        Ok(committed)
    }
}
