//! Engine wiring and lifecycle.
//!
//! [`Engine`] owns the shared collaborators (registry, dispatcher, resilient
//! cache, persistence, responder) and the background tasks: the ingress
//! router, the backpressure monitor, the fallback sweeper, and a periodic
//! status report. It is cheap to clone; all clones share one shutdown root.
//!
//! Event flow: the gateway adapter calls [`Engine::ingest`], the router task
//! drains the ingress queue and either re-registers a tenant lane (snapshot
//! refresh) or routes the event into the tenant's lane, where its dispatch
//! task consumes it.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::breaker::CircuitBreaker;
use crate::cache::{RedisCache, RemoteCache, ResilientCache};
use crate::config::{ConfigError, EngineConfig};
use crate::dispatch::Dispatcher;
use crate::event::{Event, TenantId, TenantSnapshot};
use crate::fallback::FallbackStore;
use crate::handler::CommandRegistry;
use crate::monitor::BackpressureMonitor;
use crate::registry::{TenantContext, TenantRegistry};
use crate::respond::Responder;
use crate::shutdown::Shutdown;
use crate::store::{Fields, Persistence, Record, StoreError, Table, TenantRecord};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to create cache pool: {0}")]
    CachePool(String),
}

/// The event engine. Clones share all state.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<TenantRegistry>,
    dispatcher: Arc<Dispatcher>,
    cache: Arc<ResilientCache>,
    store: Arc<dyn Persistence>,
    ingress: mpsc::Sender<Event>,
    shutdown: Shutdown,
}

impl Engine {
    /// Build the engine and start its background tasks.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn Persistence>,
        responder: Arc<dyn Responder>,
        remote: Arc<dyn RemoteCache>,
        commands: CommandRegistry,
    ) -> Self {
        let shutdown = Shutdown::new();

        let registry = Arc::new(TenantRegistry::new(config.lane_config(), shutdown.token()));

        let fallback = Arc::new(FallbackStore::new(config.fallback.capacity));
        let cache = Arc::new(ResilientCache::new(
            remote,
            CircuitBreaker::new(
                config.breaker.failure_threshold,
                config.reset_timeout(),
                config.breaker.half_open_max,
            ),
            fallback.clone(),
        ));

        let dispatcher = Arc::new(Dispatcher {
            store: store.clone(),
            cache: cache.clone(),
            responder,
            commands: Arc::new(commands),
        });

        let (ingress_tx, ingress_rx) = mpsc::channel(config.queues.ingress_capacity);

        let engine = Self {
            registry: registry.clone(),
            dispatcher,
            cache,
            store,
            ingress: ingress_tx,
            shutdown: shutdown.clone(),
        };

        tokio::spawn(run_router(engine.clone(), ingress_rx, shutdown.child()));
        BackpressureMonitor::new(registry, config.monitor_config()).spawn(shutdown.child());
        fallback.spawn_sweeper(config.sweep_interval(), shutdown.child());
        tokio::spawn(run_status(
            engine.clone(),
            config.status_interval(),
            shutdown.child(),
        ));

        engine
    }

    /// Build the engine against a Redis-backed remote cache, with the pool
    /// taken from `[redis]` in the configuration.
    pub fn with_redis(
        config: EngineConfig,
        store: Arc<dyn Persistence>,
        responder: Arc<dyn Responder>,
        commands: CommandRegistry,
    ) -> Result<Self, EngineError> {
        let pool = deadpool_redis::Config::from_url(&config.redis.url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| EngineError::CachePool(e.to_string()))?;
        let remote = Arc::new(RedisCache::new(pool));

        Ok(Self::new(config, store, responder, remote, commands))
    }

    /// Non-blocking handoff of a gateway event into the engine. Returns
    /// whether the event was accepted; a full ingress queue drops the event.
    pub fn ingest(&self, event: Event) -> bool {
        match self.ingress.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(e)) => {
                warn!(tenant = %e.tenant_id(), tag = e.tag(), "ingress queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(e)) => {
                warn!(tenant = %e.tenant_id(), tag = e.tag(), "ingress closed, dropping event");
                false
            }
        }
    }

    /// Register (or re-register) a tenant from a gateway snapshot: upsert the
    /// stored record, replace the lane, and spawn its dispatch task.
    ///
    /// A persistence failure is logged and the lane still comes up; the
    /// tenant's events must not go dark because the database hiccuped.
    pub async fn tenant_joined(&self, snapshot: TenantSnapshot) {
        info!(tenant = %snapshot.id, name = %snapshot.name, "tenant joined");

        self.upsert_tenant(&snapshot).await;

        let lane = self.registry.register(&snapshot.id);
        self.dispatcher.spawn(snapshot.id, lane);
    }

    /// Cancel and forget a tenant's lane. Idempotent.
    pub fn tenant_left(&self, tenant_id: &TenantId) {
        info!(tenant = %tenant_id, "tenant left");
        self.registry.remove(tenant_id);
    }

    /// Get-or-create a lane for a tenant, spawning the dispatch task exactly
    /// once per lane.
    pub fn ensure_tenant(&self, tenant_id: &TenantId) -> Arc<TenantContext> {
        let (context, lane) = self.registry.ensure(tenant_id);
        if let Some(lane) = lane {
            self.dispatcher.spawn(tenant_id.clone(), lane);
        }
        context
    }

    pub fn tenant_count(&self) -> usize {
        self.registry.len()
    }

    pub fn cache(&self) -> Arc<ResilientCache> {
        self.cache.clone()
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Trigger shutdown: cancels every lane and background task.
    pub fn close(&self) {
        info!("engine closing");
        self.shutdown.trigger();
    }

    async fn upsert_tenant(&self, snapshot: &TenantSnapshot) {
        match self.store.get_tenant(&snapshot.id).await {
            Ok(existing) => {
                if existing.name == snapshot.name {
                    return;
                }
                let mut filter = Fields::new();
                filter.insert(
                    "id".to_string(),
                    Value::String(snapshot.id.as_str().to_string()),
                );
                let mut fields = Fields::new();
                fields.insert("name".to_string(), Value::String(snapshot.name.clone()));
                fields.insert(
                    "updated".to_string(),
                    Value::String(Utc::now().to_rfc3339()),
                );
                if let Err(e) = self.store.update(Table::Tenants, filter, fields).await {
                    warn!(tenant = %snapshot.id, error = %e, "error updating tenant record");
                }
            }
            Err(StoreError::NotFound) => {
                let record = TenantRecord::new(snapshot.id.clone(), snapshot.name.clone());
                if let Err(e) = self.store.create(Record::Tenant(record)).await {
                    warn!(tenant = %snapshot.id, error = %e, "error creating tenant record");
                }
            }
            Err(e) => {
                warn!(tenant = %snapshot.id, error = %e, "error looking up tenant record");
            }
        }
    }

    async fn report_status(&self) {
        let tenants = match self.store.count(Table::Tenants, None).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "error counting tenants for status report");
                return;
            }
        };
        let interactions = match self.store.count(Table::Interactions, None).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "error counting interactions for status report");
                return;
            }
        };

        let stats = self.cache.stats();
        info!(
            tenants = tenants,
            interactions = interactions,
            lanes = self.registry.len(),
            breaker = ?stats.breaker.state,
            fallback_len = stats.fallback.len,
            "status report"
        );
    }
}

/// Drain the ingress queue: snapshot refreshes re-register the lane, all
/// other events go straight to their tenant's queue.
async fn run_router(engine: Engine, mut ingress: mpsc::Receiver<Event>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            maybe = ingress.recv() => {
                let Some(event) = maybe else { return };
                match event {
                    Event::TenantUpdate(snapshot) => engine.tenant_joined(snapshot).await,
                    other => {
                        engine.registry.route(other);
                    }
                }
            }
        }
    }
}

async fn run_status(engine: Engine, interval: std::time::Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => engine.report_status().await,
        }
    }
}
