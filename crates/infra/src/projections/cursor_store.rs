//! Projection cursor/offset persistence.
//!
//! Tracks the last `globalPosition` a projection has processed per tenant,
//! the watermark spec §3's "Projection record" carries so duplicate
//! deliveries become no-ops. A production host is expected to persist this
//! durably (e.g. alongside the projection's own read-model table); the
//! in-memory store here is the reference adapter.

use std::collections::HashMap;
use std::sync::RwLock;

use ledgerflow_core::TenantId;

pub trait ProjectionCursorStore: Send + Sync {
    /// Last `globalPosition` successfully applied for `(tenant_id, projection_name)`.
    fn get_cursor(&self, tenant_id: TenantId, projection_name: &str) -> Option<u64>;

    fn update_cursor(&self, tenant_id: TenantId, projection_name: &str, global_position: u64);

    /// Drop the cursor, e.g. ahead of a full rebuild.
    fn clear_cursor(&self, tenant_id: TenantId, projection_name: &str);
}

#[derive(Debug, Default)]
pub struct InMemoryProjectionCursorStore {
    cursors: RwLock<HashMap<(TenantId, String), u64>>,
}

impl InMemoryProjectionCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionCursorStore for InMemoryProjectionCursorStore {
    fn get_cursor(&self, tenant_id: TenantId, projection_name: &str) -> Option<u64> {
        self.cursors
            .read()
            .expect("cursor store lock poisoned")
            .get(&(tenant_id, projection_name.to_string()))
            .copied()
    }

    fn update_cursor(&self, tenant_id: TenantId, projection_name: &str, global_position: u64) {
        self.cursors
            .write()
            .expect("cursor store lock poisoned")
            .insert((tenant_id, projection_name.to_string()), global_position);
    }

    fn clear_cursor(&self, tenant_id: TenantId, projection_name: &str) {
        self.cursors
            .write()
            .expect("cursor store lock poisoned")
            .remove(&(tenant_id, projection_name.to_string()));
    }
}
