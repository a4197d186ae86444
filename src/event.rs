//! Core event types for Switchyard.
//!
//! Events arrive from the gateway adapter already decoded and flow through
//! the engine's ingress channel into a per-tenant lane. [`Event`] is a closed
//! sum type: exactly one payload per tag, enforced structurally.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a tenant (one chat server / community).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Tenant metadata as delivered by the gateway on join or snapshot refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSnapshot {
    pub id: TenantId,
    pub name: String,
}

/// What kind of interaction the gateway decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InteractionKind {
    /// A slash-command invocation with its name and options.
    ApplicationCommand {
        name: String,
        options: Vec<CommandOption>,
    },
    /// A component interaction (button, select). Currently ignored by dispatch.
    MessageComponent { custom_id: String },
}

/// A named option supplied with a command invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOption {
    pub name: String,
    pub value: Value,
}

/// A decoded interaction from the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    /// Provider-assigned interaction id.
    pub id: String,
    pub tenant_id: TenantId,
    pub channel_id: String,
    /// Display name of the invoking user.
    pub user: String,
    pub kind: InteractionKind,
}

impl Interaction {
    /// Command name if this is a command invocation.
    pub fn command_name(&self) -> Option<&str> {
        match &self.kind {
            InteractionKind::ApplicationCommand { name, .. } => Some(name),
            InteractionKind::MessageComponent { .. } => None,
        }
    }

    /// Build a name -> value map of the command options.
    pub fn map_options(&self) -> HashMap<String, Value> {
        match &self.kind {
            InteractionKind::ApplicationCommand { options, .. } => options
                .iter()
                .map(|o| (o.name.clone(), o.value.clone()))
                .collect(),
            InteractionKind::MessageComponent { .. } => HashMap::new(),
        }
    }
}

/// An event flowing through the engine.
///
/// Produced by the gateway adapter via [`crate::Engine::ingest`], consumed
/// once by exactly one tenant's dispatch loop. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Tenant metadata changed; triggers re-registration of the lane.
    TenantUpdate(TenantSnapshot),
    /// A command or component interaction.
    Command(Interaction),
    /// A message was deleted in one of the tenant's channels.
    MessageDeleted {
        tenant_id: TenantId,
        channel_id: String,
        message_id: String,
    },
    /// A user's voice state changed.
    VoiceUpdate {
        tenant_id: TenantId,
        channel_id: Option<String>,
        user_id: String,
    },
}

impl Event {
    /// The tenant this event belongs to.
    pub fn tenant_id(&self) -> &TenantId {
        match self {
            Event::TenantUpdate(s) => &s.id,
            Event::Command(i) => &i.tenant_id,
            Event::MessageDeleted { tenant_id, .. } => tenant_id,
            Event::VoiceUpdate { tenant_id, .. } => tenant_id,
        }
    }

    /// Short tag name used in logs and audit records.
    pub fn tag(&self) -> &'static str {
        match self {
            Event::TenantUpdate(_) => "tenant_update",
            Event::Command(_) => "command",
            Event::MessageDeleted { .. } => "message_deleted",
            Event::VoiceUpdate { .. } => "voice_update",
        }
    }
}
