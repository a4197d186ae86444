//! Command handler seam and the immutable command registry.
//!
//! Business commands implement [`Handler`] and are registered once at
//! startup; the registry is then shared by reference and never mutated. The
//! dispatch loop resolves handlers by command name and runs each invocation
//! on its own task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::ResilientCache;
use crate::event::{Interaction, TenantId};
use crate::respond::{Failure, Responder};
use crate::store::{Persistence, TenantRecord};

/// Static command metadata, consumed by the (external) command-sync routine.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Everything a handler invocation gets to work with.
pub struct Dependencies {
    pub tenant: TenantRecord,
    pub interaction: Interaction,
    /// Command options keyed by name.
    pub options: HashMap<String, Value>,
    pub cache: Arc<ResilientCache>,
    pub store: Arc<dyn Persistence>,
    pub responder: Arc<dyn Responder>,
    /// Outbound text lane for the tenant; dropped lines are logged, not fatal.
    pub relay: mpsc::Sender<String>,
    /// Cancelled when the tenant's lane is torn down. Cooperative only:
    /// in-flight handlers are never forcibly aborted.
    pub cancel: CancellationToken,
}

impl Dependencies {
    /// Queue a line of text for the tenant's log channel without blocking.
    pub fn relay_line(&self, line: impl Into<String>) -> bool {
        self.relay.try_send(line.into()).is_ok()
    }
}

/// A command handler.
#[async_trait]
pub trait Handler: Send + Sync {
    fn spec(&self) -> CommandSpec;

    async fn handle(&self, deps: Dependencies) -> Result<(), Failure>;
}

/// Immutable name -> handler table, built once at startup.
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl CommandRegistry {
    pub fn builder() -> CommandRegistryBuilder {
        CommandRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    /// Metadata of every registered command.
    pub fn specs(&self) -> Vec<CommandSpec> {
        self.handlers.values().map(|h| h.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

pub struct CommandRegistryBuilder {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl CommandRegistryBuilder {
    /// Register a handler under its spec name. Later registrations for the
    /// same name replace earlier ones.
    pub fn register(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(handler.spec().name, handler);
        self
    }

    pub fn build(self) -> CommandRegistry {
        CommandRegistry {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl Handler for Noop {
        fn spec(&self) -> CommandSpec {
            CommandSpec::new(self.0, "does nothing")
        }

        async fn handle(&self, _deps: Dependencies) -> Result<(), Failure> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = CommandRegistry::builder()
            .register(Arc::new(Noop("ping")))
            .register(Arc::new(Noop("stats")))
            .build();

        assert_eq!(registry.len(), 2);
        assert!(registry.by_name("ping").is_some());
        assert!(registry.by_name("nonexistent").is_none());
    }

    #[test]
    fn test_registry_specs() {
        let registry = CommandRegistry::builder()
            .register(Arc::new(Noop("ping")))
            .build();

        let specs = registry.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "ping");
    }

    #[test]
    fn test_duplicate_name_replaces() {
        let registry = CommandRegistry::builder()
            .register(Arc::new(Noop("ping")))
            .register(Arc::new(Noop("ping")))
            .build();

        assert_eq!(registry.len(), 1);
    }
}
