use ledgerflow_core::{AggregateId, CommandId, CorrelationId};

/// The category a command belongs to (spec §3 Command.category). Only
/// `Aggregate` commands go through the single-stream decider path (C5);
/// `Batch` commands are the ones the DCB executor (C6) accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCategory {
    Aggregate,
    Process,
    System,
    Batch,
}

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent** - a request to perform an action on an aggregate.
/// They are **transient** (not persisted) and are transformed into events (which are persisted).
///
/// ## Command vs Event
///
/// - **Command**: Intent to do something (e.g., "Adjust stock by +10")
/// - **Event**: Fact that something happened (e.g., "StockAdjusted { delta: 10 }")
///
/// Commands are rejected if invalid (validation errors). Events represent accepted changes.
///
/// ## Aggregate Targeting
///
/// Commands must specify which aggregate they target via `target_aggregate_id()`. This enables:
/// - **Routing**: Infrastructure can route commands to the correct aggregate instance
/// - **Isolation**: Each command operates on one aggregate (transaction boundary)
/// - **Concurrency**: Different aggregates can process commands concurrently
///
/// ## Multi-Tenancy
///
/// Multi-tenancy is enforced at the **event level** (envelopes), not at the command level.
/// This keeps commands domain-focused (business logic) while infrastructure handles tenant
/// isolation (enforcement). The tenant context is provided by the infrastructure layer
/// (e.g., from JWT token in HTTP middleware) and attached to events during persistence.
///
/// ## Design Constraints
///
/// Commands must be:
/// - **Cloneable**: Commands may be copied for retries, logging, etc.
/// - **Send + Sync**: Commands cross thread boundaries (workers, async handlers)
/// - **'static**: Commands don't contain borrowed data (must own all data)
///
/// These constraints ensure commands can be safely stored, transmitted, and processed in
/// concurrent, distributed systems.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Unique idempotency key. Retrying the same `CommandId` must observe
    /// the same recorded result rather than re-applying the command.
    fn command_id(&self) -> CommandId;

    /// Stable command name (e.g. `"inventory.adjust_stock"`).
    fn command_type(&self) -> &'static str;

    fn target_aggregate_id(&self) -> AggregateId;

    /// Correlates this command with the request/event chain it belongs to.
    fn correlation_id(&self) -> CorrelationId;

    /// The command (if any) whose handling produced this one.
    fn causation_id(&self) -> Option<CommandId> {
        None
    }

    fn category(&self) -> CommandCategory {
        CommandCategory::Aggregate
    }
}


