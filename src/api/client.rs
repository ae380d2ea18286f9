//! HTTP client for the conversation service

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{ConversationService, ConversationSummary, OnboardingOutcome};
use crate::{Error, Result};

/// Bearer-authenticated client for the conversation endpoints
#[derive(Clone)]
pub struct ConversationClient {
    api_url: String,
    user_id: String,
    token: SecretString,
    client: reqwest::Client,
}

impl std::fmt::Debug for ConversationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationClient")
            .field("api_url", &self.api_url)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl ConversationClient {
    /// Create a client for `user_id` against `api_url`
    #[must_use]
    pub fn new(api_url: &str, user_id: impl Into<String>, token: SecretString) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured HTTP client
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn conversations_url(&self) -> String {
        format!("{}/users/{}/conversations", self.api_url, self.user_id)
    }

    fn complete_onboarding_url(&self, conversation_id: i64) -> String {
        format!(
            "{}/conversations/{conversation_id}/complete-onboarding",
            self.api_url
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.bearer_auth(self.token.expose_secret()).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Service(format!("{status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl ConversationService for ConversationClient {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let response = self.send(self.client.get(self.conversations_url())).await?;
        let conversations: Vec<ConversationSummary> = response.json().await?;

        tracing::debug!(count = conversations.len(), "listed conversations");
        Ok(conversations)
    }

    async fn complete_onboarding(&self, conversation_id: i64) -> Result<OnboardingOutcome> {
        let response = self
            .send(self.client.post(self.complete_onboarding_url(conversation_id)))
            .await?;
        let outcome: OnboardingOutcome = response.json().await?;

        tracing::info!(conversation_id, "onboarding completed");
        Ok(outcome)
    }
}
