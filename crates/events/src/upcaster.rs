//! Event upcasting (C3): migrate a stored payload from its recorded
//! `schemaVersion` forward to an event type's current version before it
//! reaches a handler.
//!
//! Grounded on [`crate::Event::version`] (the schema-version concept the
//! teacher's `Event` trait already carries) and generalized with an actual
//! migration pipeline, which the teacher does not have.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpcastError {
    #[error("FUTURE_VERSION: payload schema version {found} is newer than current version {current}")]
    FutureVersion { found: u32, current: u32 },
    #[error("MISSING_MIGRATION: no migration registered for version {from}")]
    MissingMigration { from: u32 },
    #[error("INVALID_EVENT: {0}")]
    InvalidEvent(String),
}

/// A migration from one schema version to the next.
pub type Migration = Arc<dyn Fn(JsonValue) -> Result<JsonValue, UpcastError> + Send + Sync>;

/// A field value to splice in via [`add_field_migration`]: either a
/// constant, or computed from the payload being migrated.
#[derive(Clone)]
pub enum FieldValue {
    Static(JsonValue),
    Computed(Arc<dyn Fn(&JsonValue) -> JsonValue + Send + Sync>),
}

/// Build a migration that adds `field` to an object payload.
pub fn add_field_migration(field: impl Into<String>, value: FieldValue) -> Migration {
    let field = field.into();
    Arc::new(move |mut payload: JsonValue| {
        let computed = match &value {
            FieldValue::Static(v) => v.clone(),
            FieldValue::Computed(f) => f(&payload),
        };
        payload
            .as_object_mut()
            .ok_or_else(|| UpcastError::InvalidEvent("payload is not a JSON object".into()))?
            .insert(field.clone(), computed);
        Ok(payload)
    })
}

/// Build a migration that renames a field on an object payload.
pub fn rename_field_migration(old: impl Into<String>, new: impl Into<String>) -> Migration {
    let old = old.into();
    let new = new.into();
    Arc::new(move |mut payload: JsonValue| {
        let obj = payload
            .as_object_mut()
            .ok_or_else(|| UpcastError::InvalidEvent("payload is not a JSON object".into()))?;
        if let Some(value) = obj.remove(&old) {
            obj.insert(new.clone(), value);
        }
        Ok(payload)
    })
}

/// Per-event-type upcaster: a chain of migrations from whatever version a
/// stored payload was written at up to `current_version`.
pub struct EventUpcaster {
    current_version: u32,
    migrations: BTreeMap<u32, Migration>,
    validator: Option<Arc<dyn Fn(&JsonValue) -> Result<(), UpcastError> + Send + Sync>>,
}

impl EventUpcaster {
    pub fn builder(current_version: u32) -> EventUpcasterBuilder {
        EventUpcasterBuilder {
            current_version,
            migrations: BTreeMap::new(),
            validator: None,
        }
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Migrate `payload` from `schema_version` to `current_version`.
    /// Payloads already at the current version pass through unchanged.
    pub fn upcast(&self, schema_version: u32, payload: JsonValue) -> Result<JsonValue, UpcastError> {
        if schema_version == self.current_version {
            return Ok(payload);
        }
        if schema_version > self.current_version {
            return Err(UpcastError::FutureVersion {
                found: schema_version,
                current: self.current_version,
            });
        }

        let mut version = schema_version;
        let mut value = payload;
        while version < self.current_version {
            let migration = self
                .migrations
                .get(&version)
                .ok_or(UpcastError::MissingMigration { from: version })?;
            value = migration(value)?;
            version += 1;
        }

        if let Some(validator) = &self.validator {
            validator(&value)?;
        }
        Ok(value)
    }
}

pub struct EventUpcasterBuilder {
    current_version: u32,
    migrations: BTreeMap<u32, Migration>,
    validator: Option<Arc<dyn Fn(&JsonValue) -> Result<(), UpcastError> + Send + Sync>>,
}

impl EventUpcasterBuilder {
    /// Register the migration that moves a payload from `from_version` to
    /// `from_version + 1`.
    pub fn migration(mut self, from_version: u32, migration: Migration) -> Self {
        self.migrations.insert(from_version, migration);
        self
    }

    /// Reject a fully-migrated payload with `INVALID_EVENT` if it fails
    /// this final check.
    pub fn validator(
        mut self,
        validator: impl Fn(&JsonValue) -> Result<(), UpcastError> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Freeze the upcaster, failing if the migration chain has a gap
    /// between its lowest registered version and `current_version`.
    pub fn build(self) -> Result<EventUpcaster, UpcastError> {
        if let Some(&min_version) = self.migrations.keys().next() {
            for from in min_version..self.current_version {
                if !self.migrations.contains_key(&from) {
                    return Err(UpcastError::MissingMigration { from });
                }
            }
        }
        Ok(EventUpcaster {
            current_version: self.current_version,
            migrations: self.migrations,
            validator: self.validator,
        })
    }
}

/// Maps `eventType -> EventUpcaster`. Event types with no registered
/// upcaster pass their payload through unmodified.
#[derive(Default)]
pub struct UpcasterRegistry {
    by_event_type: std::collections::HashMap<String, EventUpcaster>,
}

impl UpcasterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event_type: impl Into<String>, upcaster: EventUpcaster) {
        self.by_event_type.insert(event_type.into(), upcaster);
    }

    pub fn upcast(
        &self,
        event_type: &str,
        schema_version: u32,
        payload: JsonValue,
    ) -> Result<JsonValue, UpcastError> {
        match self.by_event_type.get(event_type) {
            Some(upcaster) => upcaster.upcast(schema_version, payload),
            None => Ok(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn passthrough_at_current_version() {
        let upcaster = EventUpcaster::builder(1).build().unwrap();
        let payload = json!({ "sku": "A1" });
        assert_eq!(upcaster.upcast(1, payload.clone()).unwrap(), payload);
    }

    #[test]
    fn future_version_fails() {
        let upcaster = EventUpcaster::builder(1).build().unwrap();
        let err = upcaster.upcast(2, json!({})).unwrap_err();
        assert!(matches!(err, UpcastError::FutureVersion { found: 2, current: 1 }));
    }

    #[test]
    fn chain_applies_sequentially() {
        let upcaster = EventUpcaster::builder(3)
            .migration(1, add_field_migration("currency", FieldValue::Static(json!("USD"))))
            .migration(2, rename_field_migration("sku", "productSku"))
            .build()
            .unwrap();
        let migrated = upcaster.upcast(1, json!({ "sku": "A1" })).unwrap();
        assert_eq!(migrated, json!({ "productSku": "A1", "currency": "USD" }));
    }

    #[test]
    fn incomplete_chain_rejected_at_build() {
        let err = EventUpcaster::builder(3)
            .migration(1, add_field_migration("currency", FieldValue::Static(json!("USD"))))
            .build()
            .unwrap_err();
        assert!(matches!(err, UpcastError::MissingMigration { from: 2 }));
    }

    #[test]
    fn validator_rejects_migrated_payload() {
        let upcaster = EventUpcaster::builder(2)
            .migration(1, add_field_migration("currency", FieldValue::Static(json!("USD"))))
            .validator(|payload| {
                if payload.get("currency").is_some() {
                    Ok(())
                } else {
                    Err(UpcastError::InvalidEvent("missing currency".into()))
                }
            })
            .build()
            .unwrap();
        assert!(upcaster.upcast(1, json!({})).is_ok());
    }

    #[test]
    fn unknown_event_type_passes_through() {
        let registry = UpcasterRegistry::new();
        let payload = json!({ "sku": "A1" });
        assert_eq!(registry.upcast("unknown.event", 5, payload.clone()).unwrap(), payload);
    }

    proptest::proptest! {
        /// Property: add-field-with-fixed-value and rename-field migrations
        /// are each invertible, so migrating then undoing then migrating
        /// again reproduces the same upcast result, for any starting sku.
        #[test]
        fn add_then_rename_round_trips_for_any_sku(sku in "[a-zA-Z0-9]{1,12}") {
            let upcaster = EventUpcaster::builder(3)
                .migration(1, add_field_migration("currency", FieldValue::Static(json!("USD"))))
                .migration(2, rename_field_migration("sku", "productSku"))
                .build()
                .unwrap();

            let original = json!({ "sku": sku.clone() });
            let migrated = upcaster.upcast(1, original.clone()).unwrap();

            // Undo: rename back, drop the added field.
            let mut undone = migrated.clone();
            let obj = undone.as_object_mut().unwrap();
            let value = obj.remove("productSku").unwrap();
            obj.insert("sku".to_string(), value);
            obj.remove("currency");

            let remigrated = upcaster.upcast(1, undone).unwrap();
            prop_assert_eq!(migrated, remigrated);
        }
    }
}
