//! Event Bus (C7): priority-ordered pub/sub whose delivery is backed by a
//! durable work pool.
//!
//! Generalizes the plain fan-out `InMemoryEventBus` in `ledgerflow-events`
//! (still used directly by tests and by `ProjectionWorker`) with the
//! subscription index, filter, and priority-ordering semantics a real
//! bounded context needs: projections, process managers, and integration
//! publishers all subscribe through the same registry instead of each
//! opening a raw channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use ledgerflow_events::{EventBus as RawEventBus, EventCategory, EventEnvelope, InMemoryBusError, InMemoryEventBus};

use crate::jobs::{Job, JobKind, JobStore, JobStoreError};

/// Whether a subscription mutates state directly or performs a side
/// effect that must report back through `onComplete` (spec §4.7: "action
/// subscriptions must provide onComplete because actions cannot persist
/// state themselves").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Mutation,
    Action,
}

/// AND-over-dimensions, OR-within-a-dimension filter. `None` on a
/// dimension means "match any".
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub event_types: Option<Vec<String>>,
    pub categories: Option<Vec<EventCategory>>,
    pub bounded_contexts: Option<Vec<String>>,
    pub stream_types: Option<Vec<String>>,
}

impl SubscriptionFilter {
    fn matches(&self, event_type: &str, category: EventCategory, bounded_context: &str, stream_type: &str) -> bool {
        if let Some(types) = &self.event_types {
            if !types.iter().any(|t| t == event_type) {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            if !categories.contains(&category) {
                return false;
            }
        }
        if let Some(contexts) = &self.bounded_contexts {
            if !contexts.iter().any(|c| c == bounded_context) {
                return false;
            }
        }
        if let Some(types) = &self.stream_types {
            if !types.iter().any(|t| t == stream_type) {
                return false;
            }
        }
        true
    }

    fn is_wildcard(&self) -> bool {
        self.event_types.is_none()
            && self.categories.is_none()
            && self.bounded_contexts.is_none()
            && self.stream_types.is_none()
    }
}

type PartitionKeyFn = Arc<dyn Fn(&EventEnvelope<JsonValue>) -> String + Send + Sync>;

/// One registered handler: a named, filtered, prioritized consumer of the
/// bus (spec §3 "Subscription").
pub struct Subscription {
    pub name: String,
    pub filter: SubscriptionFilter,
    pub handler_kind: HandlerKind,
    /// Ascending sort key: projections ~100, process managers ~200,
    /// agents ~250, integration publishers ~300 (spec §4.7 convention).
    pub priority: u32,
    pub partition_key: PartitionKeyFn,
}

impl Subscription {
    pub fn new(name: impl Into<String>, filter: SubscriptionFilter, handler_kind: HandlerKind, priority: u32) -> Self {
        Self {
            name: name.into(),
            filter,
            handler_kind,
            priority,
            partition_key: Arc::new(|e: &EventEnvelope<JsonValue>| e.aggregate_id().to_string()),
        }
    }

    pub fn with_partition_key(mut self, f: PartitionKeyFn) -> Self {
        self.partition_key = f;
        self
    }
}

/// Work handed to the durable work pool for one `(subscription, event)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionWork {
    pub subscription_name: String,
    pub handler_kind: HandlerKind,
    pub partition_key: String,
    pub event: EventEnvelope<JsonValue>,
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("enqueue failed for subscription '{subscription}': {source}")]
    Enqueue {
        subscription: String,
        source: JobStoreError,
    },
    #[error("raw fan-out failed: {0:?}")]
    RawFanOut(InMemoryBusError),
}

/// Derive the bounded context from a dotted stream type (`"inventory.item"`
/// → `"inventory"`). A stream type with no separator is its own context.
fn bounded_context_of(stream_type: &str) -> &str {
    stream_type.split('.').next().unwrap_or(stream_type)
}

/// C7: builds the subscription index once at construction, then on every
/// publish computes the priority-sorted candidate set and enqueues one
/// work item per matching subscription onto the durable work pool.
///
/// Also retains the teacher's plain channel fan-out (via an embedded
/// `InMemoryEventBus`) for raw, unfiltered consumers such as
/// `workers::ProjectionWorker` that predate the subscription model.
pub struct SubscriptionRegistry<S> {
    subscriptions: Vec<Subscription>,
    job_store: S,
    raw: InMemoryEventBus<EventEnvelope<JsonValue>>,
}

impl<S: JobStore> SubscriptionRegistry<S> {
    pub fn new(job_store: S, subscriptions: Vec<Subscription>) -> Self {
        let mut subscriptions = subscriptions;
        subscriptions.sort_by_key(|s| s.priority);
        Self {
            subscriptions,
            job_store,
            raw: InMemoryEventBus::new(),
        }
    }

    /// Raw, unfiltered subscription for legacy/plain consumers.
    pub fn subscribe_raw(&self) -> ledgerflow_events::Subscription<EventEnvelope<JsonValue>> {
        self.raw.subscribe()
    }

    /// Publish algorithm (spec §4.7 steps 1-4): union candidate subscriptions
    /// by event type/category/wildcard, filter on every declared dimension,
    /// sort by priority, enqueue one job per match. Enqueue errors are
    /// fatal: the caller (C5/C6) must not treat the command as committed
    /// if publish fails, per "enqueue errors are fatal for the publish".
    pub fn publish(&self, envelope: EventEnvelope<JsonValue>) -> Result<(), EventBusError> {
        self.raw.publish(envelope.clone()).map_err(EventBusError::RawFanOut)?;

        let event_type = envelope.event_type().to_string();
        let bounded_context = bounded_context_of(envelope.stream_type().as_str()).to_string();
        let stream_type = envelope.stream_type().as_str().to_string();
        let category = envelope.category();

        let mut candidates: Vec<&Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| s.filter.is_wildcard() || s.filter.matches(&event_type, category, &bounded_context, &stream_type))
            .collect();
        candidates.sort_by_key(|s| s.priority);

        for sub in candidates {
            let partition_key = (sub.partition_key)(&envelope);
            let work = SubscriptionWork {
                subscription_name: sub.name.clone(),
                handler_kind: sub.handler_kind,
                partition_key: partition_key.clone(),
                event: envelope.clone(),
            };
            let payload = serde_json::to_value(&work).unwrap_or(JsonValue::Null);
            let job = Job::new(envelope.tenant_id(), JobKind::custom(sub.name.clone()), payload);
            self.job_store.enqueue(job).map_err(|source| EventBusError::Enqueue {
                subscription: sub.name.clone(),
                source,
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerflow_core::{AggregateId, CommandId, CorrelationId, EventId, StreamType, TenantId};

    use crate::jobs::{InMemoryJobStore, JobStatus};

    fn envelope(tenant_id: TenantId, event_type: &str, stream_type: &str) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            EventId::new(),
            tenant_id,
            StreamType::new(stream_type).unwrap(),
            AggregateId::new(),
            event_type.to_string(),
            1,
            1,
            chrono::Utc::now(),
            EventCategory::Domain,
            1,
            CorrelationId::from(CommandId::new()),
            None,
            None,
            serde_json::json!({}),
        )
    }

    #[test]
    fn wildcard_subscription_matches_every_event() {
        let jobs = InMemoryJobStore::new();
        let sub = Subscription::new("audit-log", SubscriptionFilter::default(), HandlerKind::Action, 300);
        let registry = SubscriptionRegistry::new(jobs, vec![sub]);

        let tenant = TenantId::new();
        registry.publish(envelope(tenant, "sales.invoice.paid", "sales.invoice")).unwrap();

        let enqueued = registry.job_store.list_by_status(tenant, Some(JobStatus::Pending), 10).unwrap();
        assert_eq!(enqueued.len(), 1);
    }

    #[test]
    fn filtered_subscription_only_matches_declared_event_types() {
        let jobs = InMemoryJobStore::new();
        let filter = SubscriptionFilter {
            event_types: Some(vec!["sales.invoice.paid".to_string()]),
            ..Default::default()
        };
        let sub = Subscription::new("paid-projection", filter, HandlerKind::Mutation, 100);
        let registry = SubscriptionRegistry::new(jobs, vec![sub]);

        let tenant = TenantId::new();
        registry.publish(envelope(tenant, "sales.invoice.overdue", "sales.invoice")).unwrap();

        let enqueued = registry.job_store.list_by_status(tenant, Some(JobStatus::Pending), 10).unwrap();
        assert!(enqueued.is_empty(), "filtered subscription must not receive a non-matching event type");
    }

    #[test]
    fn candidates_are_enqueued_in_priority_order() {
        let jobs = InMemoryJobStore::new();
        let pm = Subscription::new("overdue-reminder-pm", SubscriptionFilter::default(), HandlerKind::Action, 200);
        let projection = Subscription::new("overdue-projection", SubscriptionFilter::default(), HandlerKind::Mutation, 100);
        // Registered out of priority order; publish must still enqueue lowest-priority first.
        let registry = SubscriptionRegistry::new(jobs, vec![pm, projection]);

        let tenant = TenantId::new();
        registry.publish(envelope(tenant, "sales.invoice.overdue", "sales.invoice")).unwrap();

        let enqueued = registry.job_store.list_by_status(tenant, Some(JobStatus::Pending), 10).unwrap();
        assert_eq!(enqueued.len(), 2);
        let names: Vec<String> = enqueued
            .iter()
            .map(|job| match &job.kind {
                JobKind::Custom { kind } => kind.clone(),
                other => panic!("unexpected job kind: {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["overdue-projection".to_string(), "overdue-reminder-pm".to_string()]);
    }

    #[test]
    fn partition_key_defaults_to_aggregate_id() {
        let jobs = InMemoryJobStore::new();
        let sub = Subscription::new("projection", SubscriptionFilter::default(), HandlerKind::Mutation, 100);
        let registry = SubscriptionRegistry::new(jobs, vec![sub]);

        let tenant = TenantId::new();
        let event = envelope(tenant, "sales.invoice.paid", "sales.invoice");
        let expected_key = event.aggregate_id().to_string();
        registry.publish(event).unwrap();

        let enqueued = registry.job_store.list_by_status(tenant, Some(JobStatus::Pending), 10).unwrap();
        let work: SubscriptionWork = serde_json::from_value(enqueued[0].payload.clone()).unwrap();
        assert_eq!(work.partition_key, expected_key);
    }
}
