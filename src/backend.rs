//! Remote Q&A collaborator.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ChatError;
use crate::types::{QaEntry, TenantQaResponse, UnansweredReport};

/// The tenant Q&A API as seen from the chat core.
#[async_trait]
pub trait QaBackend: Send + Sync {
    /// Fetches the full Q&A set of one tenant.
    async fn fetch_tenant_qas(&self, tenant_id: &str) -> Result<Vec<QaEntry>, ChatError>;

    /// Reports a question nothing matched. Callers ignore the outcome beyond logging it.
    async fn log_unanswered(&self, tenant_id: &str, question: &str) -> Result<(), ChatError>;
}

pub struct HttpQaBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQaBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ChatError::config(format!("http client build failed: {err}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl QaBackend for HttpQaBackend {
    async fn fetch_tenant_qas(&self, tenant_id: &str) -> Result<Vec<QaEntry>, ChatError> {
        let response = self
            .client
            .get(self.url(&format!("/qa/user/{tenant_id}")))
            .send()
            .await
            .map_err(|err| ChatError::remote(format!("request failed: {err}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::remote(format!("server returned {status}: {body}")));
        }
        let payload = response
            .json::<TenantQaResponse>()
            .await
            .map_err(|err| ChatError::remote(format!("parse failed: {err}")))?;
        Ok(payload.qas)
    }

    async fn log_unanswered(&self, tenant_id: &str, question: &str) -> Result<(), ChatError> {
        let report = UnansweredReport {
            user_id: tenant_id.to_string(),
            question: question.to_string(),
        };
        let response = self
            .client
            .post(self.url("/qa/unanswered"))
            .json(&report)
            .send()
            .await
            .map_err(|err| ChatError::logging(format!("request failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ChatError::logging(format!(
                "server returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
