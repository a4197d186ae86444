//! Response collaborator seam and the user-facing failure taxonomy.
//!
//! Handlers and the dispatch loop report outcomes through [`Responder`]; the
//! concrete implementation (gateway webhooks, test recorder) decides the
//! presentation per [`FailureKind`].

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::event::{Interaction, TenantId};

/// Category of a user-facing failure, so the response layer can pick
/// presentation (color, title, guidance) per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Internal,
    BadInput,
    NotAllowed,
    NotFound,
    TooLarge,
}

/// A structured, user-facing failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    /// Supporting detail for the response layer (e.g. the underlying error).
    pub data: Option<Value>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::BadInput, message)
    }
}

/// Options for a message sent in reply to an interaction.
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    pub content: String,
    /// Only visible to the invoking user.
    pub ephemeral: bool,
    /// Edit an earlier follow-up instead of creating a new one.
    pub update: bool,
    pub message_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum RespondError {
    #[error("response delivery failed: {0}")]
    Delivery(String),
}

/// The response-sending collaborator.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Acknowledge an interaction before the real reply is ready.
    async fn defer(&self, interaction: &Interaction, ephemeral: bool) -> Result<(), RespondError>;

    async fn send(
        &self,
        interaction: &Interaction,
        opts: MessageOptions,
    ) -> Result<(), RespondError>;

    /// Report a structured failure for an interaction.
    async fn fail(&self, interaction: &Interaction, failure: Failure) -> Result<(), RespondError>;

    /// Post free-standing text to the tenant's log channel (relay lane).
    async fn post(&self, tenant: &TenantId, content: &str) -> Result<(), RespondError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_display_is_message() {
        let f = Failure::not_found("No registered command");
        assert_eq!(f.to_string(), "No registered command");
        assert_eq!(f.kind, FailureKind::NotFound);
    }

    #[test]
    fn test_failure_with_data() {
        let f = Failure::internal("Failed to fetch tenant")
            .with_data(json!({"error": "connection refused"}));
        assert_eq!(f.kind, FailureKind::Internal);
        assert_eq!(f.data.unwrap()["error"], "connection refused");
    }
}
