//! Concrete Definition Registries (C11): typed, immutable metadata for
//! commands, events, projections, and process managers, each built on
//! [`ledgerflow_core::registry::RegistryBuilder`] with the cross-entry
//! validation spec §4.11 names.

use ledgerflow_core::registry::{Registry, RegistryBuilder, RegistryError};
use ledgerflow_events::EventCategory;

/// Metadata for one registered command type (spec §4.11, §6 "Configuration
/// recognized — per command").
#[derive(Debug, Clone)]
pub struct CommandDefinition {
    pub command_type: String,
    pub bounded_context: String,
    /// Event types this command may emit; validated against [`EventRegistry`].
    pub declared_events: Vec<String>,
}

pub type CommandRegistry = Registry<String, CommandDefinition>;

/// Builds the command registry, enforcing: unique `commandType` (via
/// [`RegistryBuilder::insert`]) and each declared event is a member of
/// `event_registry` (spec: "declared events subset of registered events").
pub fn build_command_registry(
    definitions: Vec<CommandDefinition>,
    event_registry: &EventRegistry,
) -> Result<CommandRegistry, RegistryError> {
    let mut builder = RegistryBuilder::new();
    for def in definitions {
        builder.insert(def.command_type.clone(), def)?;
    }
    builder.build_with(|entries| {
        for def in entries.values() {
            for event_type in &def.declared_events {
                if !event_registry.contains_key(event_type) {
                    return Err(RegistryError::Invalid(format!(
                        "command '{}' declares unregistered event '{}'",
                        def.command_type, event_type
                    )));
                }
            }
        }
        Ok(())
    })
}

/// Metadata for one registered event type.
#[derive(Debug, Clone)]
pub struct EventDefinition {
    pub event_type: String,
    pub schema_version: u32,
    pub category: EventCategory,
}

pub type EventRegistry = Registry<String, EventDefinition>;

/// Builds the event registry, enforcing `schemaVersion >= 0` (trivially
/// true for `u32`, kept as an explicit check against future signed
/// reshuffles) and logging (not rejecting — the spec marks the noun-past
/// convention advisory) when `eventType` doesn't read as noun-past.
pub fn build_event_registry(definitions: Vec<EventDefinition>) -> Result<EventRegistry, RegistryError> {
    let mut builder = RegistryBuilder::new();
    for def in definitions {
        if !looks_like_noun_past(&def.event_type) {
            tracing::warn!(event_type = %def.event_type, "event type does not follow the noun-past naming convention");
        }
        builder.insert(def.event_type.clone(), def)?;
    }
    Ok(builder.build())
}

/// Advisory heuristic only: an event type like `order.submitted` or
/// `reservation.failed` reads as noun-past if its last dot-segment ends in
/// a common past-tense suffix.
fn looks_like_noun_past(event_type: &str) -> bool {
    let last = event_type.rsplit('.').next().unwrap_or(event_type);
    last.ends_with("ed") || last.ends_with("en")
}

/// Client exposure tier for a projection (spec: "only `view` is
/// client-exposed").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionCategory {
    Logic,
    View,
    Reporting,
    Integration,
}

impl ProjectionCategory {
    pub fn is_client_exposed(&self) -> bool {
        matches!(self, ProjectionCategory::View)
    }
}

/// Metadata for one registered projection.
#[derive(Debug, Clone)]
pub struct ProjectionDefinition {
    pub projection_name: String,
    pub event_subscriptions: Vec<String>,
    pub category: ProjectionCategory,
}

pub type ProjectionRegistry = Registry<String, ProjectionDefinition>;

/// Builds the projection registry, enforcing unique `projectionName` and
/// non-empty `eventSubscriptions`.
pub fn build_projection_registry(definitions: Vec<ProjectionDefinition>) -> Result<ProjectionRegistry, RegistryError> {
    let mut builder = RegistryBuilder::new();
    for def in definitions {
        if def.event_subscriptions.is_empty() {
            return Err(RegistryError::Invalid(format!(
                "projection '{}' has no event subscriptions",
                def.projection_name
            )));
        }
        builder.insert(def.projection_name.clone(), def)?;
    }
    Ok(builder.build())
}

/// How a process manager instance is triggered.
#[derive(Debug, Clone)]
pub enum PmTrigger {
    Event { subscriptions: Vec<String> },
    Time { cron: String },
    Hybrid { subscriptions: Vec<String>, cron: String },
}

/// Metadata for one registered process manager.
#[derive(Debug, Clone)]
pub struct ProcessManagerDefinition {
    pub pm_name: String,
    pub trigger: PmTrigger,
    pub emits_commands: Vec<String>,
}

pub type ProcessManagerRegistry = Registry<String, ProcessManagerDefinition>;

/// Builds the process manager registry, enforcing: event-triggered PMs
/// require `>= 1` subscription; time/hybrid PMs require a `cronConfig`.
pub fn build_process_manager_registry(definitions: Vec<ProcessManagerDefinition>) -> Result<ProcessManagerRegistry, RegistryError> {
    let mut builder = RegistryBuilder::new();
    for def in definitions {
        match &def.trigger {
            PmTrigger::Event { subscriptions } if subscriptions.is_empty() => {
                return Err(RegistryError::Invalid(format!(
                    "process manager '{}' is event-triggered but has no subscriptions",
                    def.pm_name
                )));
            }
            PmTrigger::Hybrid { subscriptions, .. } if subscriptions.is_empty() => {
                return Err(RegistryError::Invalid(format!(
                    "process manager '{}' is hybrid-triggered but has no subscriptions",
                    def.pm_name
                )));
            }
            _ => {}
        }
        builder.insert(def.pm_name.clone(), def)?;
    }
    Ok(builder.build())
}

/// Bundles all four registries, built in dependency order (events before
/// commands, since commands validate against events).
pub struct DefinitionRegistries {
    pub events: EventRegistry,
    pub commands: CommandRegistry,
    pub projections: ProjectionRegistry,
    pub process_managers: ProcessManagerRegistry,
}

impl DefinitionRegistries {
    pub fn build(
        event_defs: Vec<EventDefinition>,
        command_defs: Vec<CommandDefinition>,
        projection_defs: Vec<ProjectionDefinition>,
        pm_defs: Vec<ProcessManagerDefinition>,
    ) -> Result<Self, RegistryError> {
        let events = build_event_registry(event_defs)?;
        let commands = build_command_registry(command_defs, &events)?;
        let projections = build_projection_registry(projection_defs)?;
        let process_managers = build_process_manager_registry(pm_defs)?;
        Ok(Self {
            events,
            commands,
            projections,
            process_managers,
        })
    }
}
