pub mod chat;
pub mod crm;

pub use chat::ChatClient;
pub use crm::CrmClient;

use crate::error::CollaboratorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) const CLIENT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub external_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub contact_external_id: String,
    pub kind: String,
    pub body: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub contact: ContactRecord,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender: String,
    pub body: String,
}

/// CRM side of the bridge: contact records and their activity timeline.
#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn upsert_contact(&self, contact: &ContactRecord) -> Result<(), CollaboratorError>;
    async fn append_activity(&self, activity: &ActivityRecord) -> Result<(), CollaboratorError>;
}

/// Chat-platform side of the bridge: read-only conversation lookups.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Conversation, CollaboratorError>;
    async fn fetch_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<ChatMessage, CollaboratorError>;
}

/// Classify an HTTP status: 4xx is permanent (the call will not start
/// working on its own), except 408 and 429 which are transient.
pub(crate) fn classify_status(
    service: &'static str,
    status: u16,
    message: String,
) -> CollaboratorError {
    let permanent = (400..500).contains(&status) && status != 408 && status != 429;
    if permanent {
        CollaboratorError::Permanent {
            service,
            status: Some(status),
            message,
        }
    } else {
        CollaboratorError::Transient {
            service,
            status: Some(status),
            message,
        }
    }
}

/// Classify a transport-level failure (timeout, connect, TLS): transient.
pub(crate) fn classify_transport(
    service: &'static str,
    error: &reqwest::Error,
) -> CollaboratorError {
    match error.status() {
        Some(status) => classify_status(service, status.as_u16(), error.to_string()),
        None => CollaboratorError::Transient {
            service,
            status: None,
            message: error.to_string(),
        },
    }
}

/// Trim a response body for logs and error messages.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let cut = body
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}…", &body[..cut])
    }
}
