//! Event-sourcing mechanics shared across the runtime: the `Event`/
//! `Command` traits, the storage/transport envelope, the event bus
//! mechanics, projection running, process-manager mechanics, and the
//! event upcaster (C3). Infrastructure adapters (event store, bus
//! transport, work pool, registries) live in `ledgerflow-infra`.

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod process_manager;
pub mod projection;
pub mod runner;
pub mod tenant;
pub mod upcaster;

pub use bus::{EventBus, Subscription};
pub use command::{Command, CommandCategory};
pub use envelope::EventEnvelope;
pub use event::{Event, EventCategory};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use process_manager::{PmAction, ProcessManager};
pub use projection::Projection;
pub use runner::{ProjectionCursor, ProjectionError, ProjectionRunner};
pub use tenant::TenantScoped;
pub use upcaster::{
    add_field_migration, rename_field_migration, EventUpcaster, EventUpcasterBuilder, FieldValue,
    Migration, UpcastError, UpcasterRegistry,
};
