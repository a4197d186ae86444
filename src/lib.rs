//! # Switchyard
//!
//! A per-tenant event dispatch engine with a resilient caching façade.
//!
//! Gateway events are handed to the [`Engine`], which routes each one into an
//! isolated, bounded queue per tenant. One dispatch task per tenant drains
//! its queue in order, under a supervisor that survives handler panics. A
//! read-only backpressure monitor watches every lane and escalates sustained
//! saturation.
//!
//! Cache reads and writes go through [`ResilientCache`], which wraps the
//! remote cache behind a circuit breaker and a bounded TTL fallback store, so
//! a flaky backend degrades into local reads instead of request failures.
//!
//! ## Architecture
//!
//! ```text
//! Gateway -> Engine::ingest -> Router -> Tenant lane -> Dispatch -> Handlers
//!                                             |
//!                                      BackpressureMonitor
//! ```
//!
//! ## Modules
//!
//! - [`event`]: Core event and tenant types
//! - [`engine`]: Engine wiring, ingress routing, lifecycle
//! - [`registry`]: Tenant registry and lane management, feeding the
//!   per-tenant dispatch loop (panic-recovering, internal)
//! - [`monitor`]: Read-only lane backpressure monitor
//! - [`cache`]: Resilient cache façade over breaker + fallback
//! - [`breaker`]: Circuit breaker
//! - [`fallback`]: Bounded TTL fallback store
//! - [`handler`]: Command handler seam and registry
//! - [`respond`]: Failure taxonomy and response collaborator
//! - [`store`]: Persistence collaborator seam
//! - [`config`]: TOML configuration with env substitution
//! - [`shutdown`]: Graceful shutdown coordination

pub mod breaker;
pub mod cache;
pub mod config;
mod dispatch;
pub mod engine;
pub mod event;
pub mod fallback;
pub mod handler;
pub mod monitor;
pub mod registry;
pub mod respond;
pub mod shutdown;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types at crate root
pub use breaker::{CircuitBreaker, CircuitState};
pub use cache::{CacheError, RemoteCache, ResilientCache};
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineError};
pub use event::{Event, Interaction, TenantId, TenantSnapshot};
pub use fallback::FallbackStore;
pub use handler::{CommandRegistry, CommandSpec, Dependencies, Handler};
pub use respond::{Failure, FailureKind, Responder};
pub use shutdown::Shutdown;
pub use store::{Persistence, TenantRecord};
