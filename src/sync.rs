//! Business transformation: accepted webhook events become CRM records.
//!
//! Delivery is asynchronous and partially ordered, so every handler must be
//! no-op-safe when its parent record has not arrived (or no longer exists):
//! a missing conversation is skipped, not retried and not dead-lettered.

use crate::collaborators::{ActivityRecord, ChatApi, ContactRecord, CrmApi};
use crate::error::CollaboratorError;
use crate::gateway::events::EventType;
use crate::queue::QueuedJob;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Seam between the queue executor and the business transformation.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, job: &QueuedJob) -> Result<(), CollaboratorError>;
}

/// Production processor bridging the chat platform into the CRM.
pub struct BridgeProcessor {
    crm: Arc<dyn CrmApi>,
    chat: Arc<dyn ChatApi>,
}

impl BridgeProcessor {
    pub fn new(crm: Arc<dyn CrmApi>, chat: Arc<dyn ChatApi>) -> Self {
        Self { crm, chat }
    }

    async fn conversation_created(
        &self,
        payload: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        let conversation_id = required_str(payload, "conversation_id")?;
        let conversation = match self.chat.fetch_conversation(conversation_id).await {
            Ok(conversation) => conversation,
            Err(error) if is_missing_parent(&error) => {
                tracing::warn!(conversation_id, "conversation no longer exists, skipping");
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        self.crm.upsert_contact(&conversation.contact).await?;
        self.crm
            .append_activity(&ActivityRecord {
                contact_external_id: conversation.contact.external_id.clone(),
                kind: "conversation_opened".into(),
                body: format!("Conversation {conversation_id} opened"),
                occurred_at: Utc::now(),
            })
            .await
    }

    async fn message_created(&self, payload: &serde_json::Value) -> Result<(), CollaboratorError> {
        let conversation_id = required_str(payload, "conversation_id")?;
        let message_id = required_str(payload, "message_id")?;

        let message = match self.chat.fetch_message(conversation_id, message_id).await {
            Ok(message) => message,
            Err(error) if is_missing_parent(&error) => {
                tracing::warn!(conversation_id, message_id, "message no longer exists, skipping");
                return Ok(());
            }
            Err(error) => return Err(error),
        };
        let conversation = match self.chat.fetch_conversation(conversation_id).await {
            Ok(conversation) => conversation,
            Err(error) if is_missing_parent(&error) => {
                tracing::warn!(conversation_id, "parent conversation missing, skipping message");
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        self.crm
            .append_activity(&ActivityRecord {
                contact_external_id: conversation.contact.external_id.clone(),
                kind: "message".into(),
                body: format!("{}: {}", message.sender, message.body),
                occurred_at: Utc::now(),
            })
            .await
    }

    async fn status_changed(&self, payload: &serde_json::Value) -> Result<(), CollaboratorError> {
        let conversation_id = required_str(payload, "conversation_id")?;
        let status = required_str(payload, "status")?;

        let conversation = match self.chat.fetch_conversation(conversation_id).await {
            Ok(conversation) => conversation,
            Err(error) if is_missing_parent(&error) => {
                tracing::warn!(conversation_id, "conversation missing, skipping status change");
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        self.crm
            .append_activity(&ActivityRecord {
                contact_external_id: conversation.contact.external_id.clone(),
                kind: "status_changed".into(),
                body: format!("Conversation {conversation_id} moved to {status}"),
                occurred_at: Utc::now(),
            })
            .await
    }
}

#[async_trait]
impl EventProcessor for BridgeProcessor {
    async fn process(&self, job: &QueuedJob) -> Result<(), CollaboratorError> {
        match job.event {
            EventType::ConversationCreated => self.conversation_created(&job.payload).await,
            EventType::MessageCreated => self.message_created(&job.payload).await,
            EventType::ConversationStatusChanged => self.status_changed(&job.payload).await,
        }
    }
}

fn required_str<'a>(
    payload: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, CollaboratorError> {
    payload
        .get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CollaboratorError::Permanent {
            service: "bridge",
            status: None,
            message: format!("payload missing required field \"{key}\""),
        })
}

fn is_missing_parent(error: &CollaboratorError) -> bool {
    matches!(
        error,
        CollaboratorError::Permanent {
            status: Some(404),
            ..
        }
    )
}
