//! Integration Publisher (C10): translates domain events into integration
//! events (Published Language) and routes them to subscribers, with an
//! anti-corruption layer on the inbound side.
//!
//! Grounded on `crate::event_bus`'s route-table shape (a map keyed by
//! event type, resolved once per publish) generalized from "subscriptions
//! to deliver" to "translators to run then destinations to notify".

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use ledgerflow_core::{EventId, TenantId};
use ledgerflow_events::EventEnvelope;

/// A minimal cross-context fact — by design, only IDs and the facts a
/// foreign context actually needs, not the full domain event.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IntegrationEvent {
    pub integration_event_type: String,
    /// Versioned independently from the source domain event's
    /// `schemaVersion` (spec §9 open question, resolved: yes).
    pub schema_version: u32,
    pub tenant_id: TenantId,
    pub source_event_id: EventId,
    pub payload: JsonValue,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TranslationError {
    #[error("translation failed: {0}")]
    Failed(String),
}

/// Translates one bounded context's domain event into the Published
/// Language. One translator per `sourceEventType`.
pub trait IntegrationTranslator: Send + Sync {
    fn translate(&self, envelope: &EventEnvelope<JsonValue>) -> Result<IntegrationEvent, TranslationError>;
}

/// Anti-corruption layer: adapts a foreign integration event's shape into
/// this context's domain vocabulary before it's handed to a command or
/// process manager.
pub trait AclTranslator: Send + Sync {
    fn translate_inbound(&self, incoming: &IntegrationEvent) -> Result<JsonValue, TranslationError>;
}

/// `{sourceEventType, translator, destinations}` (spec §4.10).
pub struct IntegrationRoute {
    pub source_event_type: String,
    pub translator: Arc<dyn IntegrationTranslator>,
    pub destinations: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum IntegrationError {
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    #[error("translation failed for event type '{event_type}': {reason}")]
    TranslationFailed { event_type: String, reason: String },
    #[error("unknown integration event type '{0}'")]
    UnknownIntegrationEventType(String),
}

/// Outcome of publishing one domain event through the integration layer.
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    /// No route registered for this event type; not an error.
    NoRoute,
    Published {
        integration_event_type: String,
        destinations: Vec<String>,
    },
}

/// Delivers a translated [`IntegrationEvent`] to one destination context.
/// Analogous to `EventBus`, but over the narrower integration-event shape.
pub trait IntegrationSink: Send + Sync {
    fn deliver(&self, destination: &str, event: &IntegrationEvent) -> Result<(), String>;
}

/// C10: translates and routes domain events to integration destinations.
pub struct IntegrationPublisher<S> {
    routes: HashMap<String, IntegrationRoute>,
    acl: HashMap<String, Arc<dyn AclTranslator>>,
    sink: S,
}

impl<S: IntegrationSink> IntegrationPublisher<S> {
    /// Registers routes, validating at registration time (spec: "schema
    /// validation is performed at registration") that every route names a
    /// non-empty source event type and at least one destination.
    pub fn new(routes: Vec<IntegrationRoute>, acl: Vec<(String, Arc<dyn AclTranslator>)>, sink: S) -> Result<Self, IntegrationError> {
        let mut route_map = HashMap::new();
        for route in routes {
            if route.source_event_type.is_empty() {
                return Err(IntegrationError::InvalidRoute("source_event_type must not be empty".to_string()));
            }
            if route.destinations.is_empty() {
                return Err(IntegrationError::InvalidRoute(format!(
                    "route for '{}' has no destinations",
                    route.source_event_type
                )));
            }
            if route_map.insert(route.source_event_type.clone(), route).is_some() {
                return Err(IntegrationError::InvalidRoute("duplicate route for the same source event type".to_string()));
            }
        }
        Ok(Self {
            routes: route_map,
            acl: acl.into_iter().collect(),
            sink,
        })
    }

    /// Outbound: translate `envelope` per its route, if any, and deliver to
    /// every registered destination.
    pub fn publish(&self, envelope: &EventEnvelope<JsonValue>) -> Result<PublishOutcome, IntegrationError> {
        let Some(route) = self.routes.get(envelope.event_type()) else {
            return Ok(PublishOutcome::NoRoute);
        };

        let integration_event = route
            .translator
            .translate(envelope)
            .map_err(|err| IntegrationError::TranslationFailed {
                event_type: envelope.event_type().to_string(),
                reason: err.to_string(),
            })?;

        for destination in &route.destinations {
            if let Err(err) = self.sink.deliver(destination, &integration_event) {
                tracing::warn!(destination, error = %err, "integration delivery failed");
            }
        }

        Ok(PublishOutcome::Published {
            integration_event_type: integration_event.integration_event_type,
            destinations: route.destinations.clone(),
        })
    }

    /// Inbound: run the ACL translator registered for
    /// `incoming.integration_event_type`, rejecting unknown integration
    /// event types with a taxonomy-specific code (spec §4.10).
    pub fn receive(&self, incoming: &IntegrationEvent) -> Result<JsonValue, IntegrationError> {
        let translator = self
            .acl
            .get(&incoming.integration_event_type)
            .ok_or_else(|| IntegrationError::UnknownIntegrationEventType(incoming.integration_event_type.clone()))?;

        translator.translate_inbound(incoming).map_err(|err| IntegrationError::TranslationFailed {
            event_type: incoming.integration_event_type.clone(),
            reason: err.to_string(),
        })
    }
}
