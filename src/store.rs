//! Persistence collaborator seam.
//!
//! The engine consumes a narrow interface over the relational store: record
//! creation, partial updates, counts, and tenant lookup. CRUD plumbing and
//! migrations live behind the trait, outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::event::TenantId;

/// Tables the engine writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Tenants,
    Interactions,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Tenants => "tenants",
            Table::Interactions => "interactions",
        }
    }
}

/// Column -> value map used for update filters and field sets.
pub type Fields = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("store error: {0}")]
    Backend(String),
}

/// Per-tenant settings blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantSettings {
    #[serde(default)]
    pub log_channel_id: String,
    #[serde(default)]
    pub command_set_hash: String,
}

/// Stored tenant row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: TenantId,
    pub name: String,
    #[serde(default)]
    pub settings: TenantSettings,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl TenantRecord {
    pub fn new(id: TenantId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            settings: TenantSettings::default(),
            created: now,
            updated: now,
        }
    }
}

/// Audit copy of a dispatched event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub tenant_id: TenantId,
    /// Event tag, e.g. "command" or "message_deleted".
    pub tag: String,
    /// Full event payload as JSON.
    pub payload: Value,
    pub created: DateTime<Utc>,
}

impl AuditRecord {
    pub fn for_event(event: &crate::event::Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: event.tenant_id().clone(),
            tag: event.tag().to_string(),
            payload: serde_json::to_value(event).unwrap_or(Value::Null),
            created: Utc::now(),
        }
    }
}

/// A record the engine can persist.
#[derive(Debug, Clone)]
pub enum Record {
    Tenant(TenantRecord),
    Audit(AuditRecord),
}

impl Record {
    pub fn table(&self) -> Table {
        match self {
            Record::Tenant(_) => Table::Tenants,
            Record::Audit(_) => Table::Interactions,
        }
    }
}

/// The persistence collaborator.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn create(&self, record: Record) -> Result<(), StoreError>;

    async fn update(&self, table: Table, filter: Fields, fields: Fields) -> Result<(), StoreError>;

    async fn count(&self, table: Table, filter: Option<Fields>) -> Result<u64, StoreError>;

    async fn get_tenant(&self, id: &TenantId) -> Result<TenantRecord, StoreError>;
}
