//! Projection replay tooling for rebuilding read models from event streams.
//!
//! Supports rebuilds, dry-runs, and progress reporting, driven off the
//! store-wide `global_position` ordering rather than any single stream.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use ledgerflow_core::{StreamType, TenantId};
use ledgerflow_events::EventEnvelope;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::event_store::{EventFilter, EventQuery, EventStoreError, Pagination, StoredEvent};

/// Error type for projection replay operations.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("projection error: {0}")]
    Projection(String),

    #[error("replay cancelled")]
    Cancelled,
}

/// Progress information for a running replay operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReplayProgress {
    pub total_events: u64,
    pub processed_events: u64,
    pub processed_streams: u64,
    pub phase: ReplayPhase,
    pub is_complete: bool,
    pub error: Option<String>,
}

/// Phase of a replay operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPhase {
    Loading,
    Clearing,
    Replaying,
    Complete,
    Failed,
}

/// Handle for monitoring and controlling a replay operation.
#[derive(Clone)]
pub struct ReplayHandle {
    progress: Arc<RwLock<ReplayProgress>>,
    cancellation: Arc<AtomicBool>,
}

impl ReplayHandle {
    pub async fn progress(&self) -> ReplayProgress {
        self.progress.read().await.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.load(Ordering::Relaxed)
    }

    pub async fn wait_for_completion(&self) -> Result<ReplayProgress, ReplayError> {
        loop {
            let progress = self.progress.read().await.clone();
            if progress.is_complete || progress.phase == ReplayPhase::Failed {
                if let Some(ref error) = progress.error {
                    return Err(ReplayError::Projection(error.clone()));
                }
                if progress.phase == ReplayPhase::Failed && progress.error.is_none() {
                    return Err(ReplayError::Cancelled);
                }
                return Ok(progress);
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    }
}

/// Callback function for applying an event envelope to a projection.
pub type ApplyEnvelopeFn = Arc<dyn Fn(&EventEnvelope<JsonValue>) -> Result<(), String> + Send + Sync>;

/// Callback function for clearing a projection's tenant state.
pub type ClearTenantFn = Arc<dyn Fn(TenantId) + Send + Sync>;

/// Replay one or more stream types for a tenant through a projection.
///
/// 1. Loads all relevant events from the event store (paginated).
/// 2. Optionally clears the projection state.
/// 3. Replays events, ordered by `global_position`, through the projection.
/// 4. Reports progress via the returned handle.
///
/// If `dry_run` is true, events are loaded but not applied.
pub async fn replay_projection<Q>(
    event_query: Arc<Q>,
    tenant_id: TenantId,
    stream_types: Vec<StreamType>,
    apply_envelope: ApplyEnvelopeFn,
    clear_tenant: ClearTenantFn,
    dry_run: bool,
) -> Result<ReplayHandle, ReplayError>
where
    Q: EventQuery + Send + Sync + 'static,
{
    let progress = Arc::new(RwLock::new(ReplayProgress {
        total_events: 0,
        processed_events: 0,
        processed_streams: 0,
        phase: ReplayPhase::Loading,
        is_complete: false,
        error: None,
    }));
    let cancellation = Arc::new(AtomicBool::new(false));
    let processed_events = Arc::new(AtomicU64::new(0));
    let processed_streams = Arc::new(AtomicU64::new(0));

    let handle = ReplayHandle {
        progress: progress.clone(),
        cancellation: cancellation.clone(),
    };

    tokio::spawn(async move {
        let result = run_replay(
            event_query,
            tenant_id,
            stream_types,
            apply_envelope,
            clear_tenant,
            dry_run,
            progress.clone(),
            cancellation,
            processed_events,
            processed_streams,
        )
        .await;

        let mut prog = progress.write().await;
        match result {
            Ok(_) => {
                prog.phase = ReplayPhase::Complete;
                prog.is_complete = true;
            }
            Err(ReplayError::Cancelled) => {
                prog.phase = ReplayPhase::Failed;
                prog.error = Some("replay cancelled".to_string());
                prog.is_complete = true;
            }
            Err(e) => {
                prog.phase = ReplayPhase::Failed;
                prog.error = Some(e.to_string());
                prog.is_complete = true;
            }
        }
    });

    Ok(handle)
}

#[allow(clippy::too_many_arguments)]
async fn run_replay<Q>(
    event_query: Arc<Q>,
    tenant_id: TenantId,
    stream_types: Vec<StreamType>,
    apply_envelope: ApplyEnvelopeFn,
    clear_tenant: ClearTenantFn,
    dry_run: bool,
    progress: Arc<RwLock<ReplayProgress>>,
    cancellation: Arc<AtomicBool>,
    processed_events: Arc<AtomicU64>,
    processed_streams: Arc<AtomicU64>,
) -> Result<(), ReplayError>
where
    Q: EventQuery + Send + Sync,
{
    {
        let mut prog = progress.write().await;
        prog.phase = ReplayPhase::Loading;
    }

    let mut all_events: Vec<StoredEvent> = Vec::new();
    let mut offset = 0u32;
    const PAGE_SIZE: u32 = 1000;

    loop {
        if cancellation.load(Ordering::Relaxed) {
            return Err(ReplayError::Cancelled);
        }

        let filter = EventFilter {
            stream_type: None, // filtered in-memory below to support multiple types
            ..Default::default()
        };
        let pagination = Pagination::new(Some(PAGE_SIZE), Some(offset));

        let result = event_query.query_events(tenant_id, filter, pagination).await?;

        let relevant: Vec<StoredEvent> = result
            .events
            .into_iter()
            .filter(|e| stream_types.is_empty() || stream_types.contains(&e.stream_type))
            .collect();

        all_events.extend(relevant);

        if !result.has_more {
            break;
        }
        offset += PAGE_SIZE;
    }

    {
        let mut prog = progress.write().await;
        prog.total_events = all_events.len() as u64;
    }

    if cancellation.load(Ordering::Relaxed) {
        return Err(ReplayError::Cancelled);
    }

    {
        let mut prog = progress.write().await;
        prog.phase = ReplayPhase::Clearing;
    }

    if !dry_run {
        clear_tenant(tenant_id);
    }

    if cancellation.load(Ordering::Relaxed) {
        return Err(ReplayError::Cancelled);
    }

    {
        let mut prog = progress.write().await;
        prog.phase = ReplayPhase::Replaying;
    }

    // Global position order is the store's natural replay order.
    all_events.sort_by_key(|e| e.global_position);

    let mut last_stream: Option<(StreamType, ledgerflow_core::AggregateId)> = None;

    for event in &all_events {
        if cancellation.load(Ordering::Relaxed) {
            return Err(ReplayError::Cancelled);
        }

        let key = (event.stream_type.clone(), event.stream_id);
        if last_stream.as_ref() != Some(&key) {
            processed_streams.fetch_add(1, Ordering::Relaxed);
            last_stream = Some(key);
        }

        let envelope = event.to_envelope();

        if !dry_run {
            apply_envelope(&envelope).map_err(ReplayError::Projection)?;
        }

        let count = processed_events.fetch_add(1, Ordering::Relaxed) + 1;
        let mut prog = progress.write().await;
        prog.processed_events = count;
        prog.processed_streams = processed_streams.load(Ordering::Relaxed);
    }

    Ok(())
}
