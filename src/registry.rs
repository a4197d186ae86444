//! Tenant registry: the shared map from tenant id to its isolated lane.
//!
//! Lookups vastly outnumber inserts, so the map sits behind a reader/writer
//! lock with a double-checked create path. The registry owns the mapping;
//! consumption of a lane's event queue belongs exclusively to the dispatch
//! task the receiver was handed to.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::{Event, TenantId};

/// Queue capacities for a tenant lane.
#[derive(Debug, Clone, Copy)]
pub struct LaneConfig {
    pub events_capacity: usize,
    pub relay_capacity: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            events_capacity: 1000,
            relay_capacity: 500,
        }
    }
}

/// Shared half of a tenant's execution context: cancellation handle plus the
/// send sides of its event and relay queues.
pub struct TenantContext {
    cancel: CancellationToken,
    events_tx: mpsc::Sender<Event>,
    relay_tx: mpsc::Sender<String>,
}

impl TenantContext {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn relay_sender(&self) -> mpsc::Sender<String> {
        self.relay_tx.clone()
    }

    /// Current fill of the event queue, observed without consuming anything.
    pub fn lane_stats(&self) -> LaneStats {
        let capacity = self.events_tx.max_capacity();
        LaneStats {
            len: capacity - self.events_tx.capacity(),
            capacity,
        }
    }
}

/// Read-only occupancy of an event queue.
#[derive(Debug, Clone, Copy)]
pub struct LaneStats {
    pub len: usize,
    pub capacity: usize,
}

impl LaneStats {
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.len as f64 / self.capacity as f64
    }
}

/// A freshly created lane: the shared context plus the receive sides, handed
/// to whoever spawns the dispatch task. Exactly one consumer per queue.
pub struct NewLane {
    pub context: Arc<TenantContext>,
    pub events: mpsc::Receiver<Event>,
    pub relay: mpsc::Receiver<String>,
}

/// Outcome of a non-blocking route attempt. None of these is an error to the
/// event source: the gateway has no backpressure channel of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    UnknownTenant,
    LaneCancelled,
    LaneFull,
}

pub struct TenantRegistry {
    lanes: RwLock<HashMap<TenantId, Arc<TenantContext>>>,
    config: LaneConfig,
    /// Parent of every lane token, so engine shutdown cancels all tenants.
    root: CancellationToken,
}

impl TenantRegistry {
    pub fn new(config: LaneConfig, root: CancellationToken) -> Self {
        Self {
            lanes: RwLock::new(HashMap::new()),
            config,
            root,
        }
    }

    fn make_lane(&self) -> (Arc<TenantContext>, NewLane) {
        let (events_tx, events_rx) = mpsc::channel(self.config.events_capacity);
        let (relay_tx, relay_rx) = mpsc::channel(self.config.relay_capacity);

        let context = Arc::new(TenantContext {
            cancel: self.root.child_token(),
            events_tx,
            relay_tx,
        });

        let lane = NewLane {
            context: context.clone(),
            events: events_rx,
            relay: relay_rx,
        };

        (context, lane)
    }

    /// Idempotent get-or-create. Returns the lane's receivers only when this
    /// call created the context, so at most one dispatch task is ever spawned
    /// per tenant.
    pub fn ensure(&self, tenant_id: &TenantId) -> (Arc<TenantContext>, Option<NewLane>) {
        {
            let lanes = self.lanes.read().unwrap();
            if let Some(ctx) = lanes.get(tenant_id) {
                return (ctx.clone(), None);
            }
        }

        let mut lanes = self.lanes.write().unwrap();
        // Re-check under the exclusive lock: someone may have created the
        // lane between our read and write acquisitions.
        if let Some(ctx) = lanes.get(tenant_id) {
            return (ctx.clone(), None);
        }

        let (context, lane) = self.make_lane();
        lanes.insert(tenant_id.clone(), context.clone());
        (context, Some(lane))
    }

    /// Unconditionally replace the tenant's lane, cancelling any existing one.
    /// Used when the tenant's snapshot is refreshed by the gateway.
    pub fn register(&self, tenant_id: &TenantId) -> NewLane {
        let mut lanes = self.lanes.write().unwrap();

        if let Some(existing) = lanes.get(tenant_id) {
            existing.cancel.cancel();
        }

        let (context, lane) = self.make_lane();
        lanes.insert(tenant_id.clone(), context);
        info!(tenant = %tenant_id, "registered tenant lane");
        lane
    }

    /// Cancel and forget the tenant's lane. Idempotent.
    pub fn remove(&self, tenant_id: &TenantId) {
        let mut lanes = self.lanes.write().unwrap();
        if let Some(ctx) = lanes.remove(tenant_id) {
            ctx.cancel.cancel();
        }
        info!(tenant = %tenant_id, "removed tenant lane");
    }

    pub fn get(&self, tenant_id: &TenantId) -> Option<Arc<TenantContext>> {
        self.lanes.read().unwrap().get(tenant_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lanes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking delivery of an event to its tenant's lane.
    pub fn route(&self, event: Event) -> RouteOutcome {
        let tenant_id = event.tenant_id().clone();

        let Some(ctx) = self.get(&tenant_id) else {
            warn!(tenant = %tenant_id, tag = event.tag(), "dropping event for unknown tenant");
            return RouteOutcome::UnknownTenant;
        };

        if ctx.is_cancelled() {
            debug!(tenant = %tenant_id, tag = event.tag(), "dropped event for cancelled lane");
            return RouteOutcome::LaneCancelled;
        }

        match ctx.events_tx.try_send(event) {
            Ok(()) => RouteOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(e)) => {
                warn!(tenant = %tenant_id, tag = e.tag(), "event lane full, dropping event");
                RouteOutcome::LaneFull
            }
            Err(mpsc::error::TrySendError::Closed(e)) => {
                debug!(tenant = %tenant_id, tag = e.tag(), "dropped event for closed lane");
                RouteOutcome::LaneCancelled
            }
        }
    }

    /// Snapshot of every lane's queue occupancy, for the monitor.
    pub fn lanes(&self) -> Vec<(TenantId, LaneStats)> {
        self.lanes
            .read()
            .unwrap()
            .iter()
            .map(|(id, ctx)| (id.clone(), ctx.lane_stats()))
            .collect()
    }
}
