use super::{
    CLIENT_TIMEOUT_SECS, ChatApi, ChatMessage, Conversation, classify_status, classify_transport,
    truncate_body,
};
use crate::error::CollaboratorError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

const SERVICE: &str = "chat";

/// REST client for the live-chat platform.
pub struct ChatClient {
    base_url: Url,
    api_token: String,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(base_url: &str, api_token: String) -> Result<Self> {
        let base_url = Url::parse(base_url).context("parse chat base url")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .context("build chat http client")?;
        Ok(Self {
            base_url,
            api_token,
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, CollaboratorError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| CollaboratorError::Permanent {
                service: SERVICE,
                status: None,
                message: format!("invalid endpoint path {path}: {e}"),
            })?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| classify_transport(SERVICE, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(
                SERVICE,
                status.as_u16(),
                truncate_body(&body),
            ));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| CollaboratorError::Permanent {
                service: SERVICE,
                status: None,
                message: format!("malformed response body: {e}"),
            })
    }
}

#[async_trait]
impl ChatApi for ChatClient {
    async fn fetch_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Conversation, CollaboratorError> {
        self.get_json(&format!("conversations/{conversation_id}"))
            .await
    }

    async fn fetch_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<ChatMessage, CollaboratorError> {
        self.get_json(&format!(
            "conversations/{conversation_id}/messages/{message_id}"
        ))
        .await
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
