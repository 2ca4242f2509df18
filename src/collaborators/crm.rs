use super::{
    ActivityRecord, CLIENT_TIMEOUT_SECS, ContactRecord, CrmApi, classify_status,
    classify_transport, truncate_body,
};
use crate::error::CollaboratorError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

const SERVICE: &str = "crm";

/// REST client for the CRM collaborator.
pub struct CrmClient {
    base_url: Url,
    api_token: String,
    client: reqwest::Client,
}

impl CrmClient {
    pub fn new(base_url: &str, api_token: String) -> Result<Self> {
        let base_url = Url::parse(base_url).context("parse CRM base url")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .context("build CRM http client")?;
        Ok(Self {
            base_url,
            api_token,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CollaboratorError> {
        self.base_url
            .join(path)
            .map_err(|e| CollaboratorError::Permanent {
                service: SERVICE,
                status: None,
                message: format!("invalid endpoint path {path}: {e}"),
            })
    }

    async fn check(response: reqwest::Response) -> Result<(), CollaboratorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(
            SERVICE,
            status.as_u16(),
            truncate_body(&body),
        ))
    }
}

#[async_trait]
impl CrmApi for CrmClient {
    async fn upsert_contact(&self, contact: &ContactRecord) -> Result<(), CollaboratorError> {
        let url = self.endpoint("contacts/upsert")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_token)
            .json(contact)
            .send()
            .await
            .map_err(|e| classify_transport(SERVICE, &e))?;
        Self::check(response).await
    }

    async fn append_activity(&self, activity: &ActivityRecord) -> Result<(), CollaboratorError> {
        let url = self.endpoint(&format!(
            "contacts/{}/activities",
            activity.contact_external_id
        ))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_token)
            .json(activity)
            .send()
            .await
            .map_err(|e| classify_transport(SERVICE, &e))?;
        Self::check(response).await
    }
}

impl std::fmt::Debug for CrmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrmClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
