//! Conversation REST boundary
//!
//! The engine only lists conversations once a session's grace window has
//! elapsed and forwards the explicit onboarding completion step.

mod client;

pub use client::ConversationClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// One conversation as listed by the service
///
/// Only `id` is relied on; the rest is display data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation identifier
    pub id: i64,
    /// Generated title
    #[serde(default)]
    pub title: Option<String>,
    /// Length in seconds
    #[serde(default)]
    pub duration: Option<f64>,
    /// Creation time as sent by the service
    #[serde(default)]
    pub created_at: Option<String>,
    /// Number of stored messages
    #[serde(default)]
    pub message_count: Option<u64>,
}

/// Response to completing onboarding
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OnboardingOutcome {
    /// Status message
    #[serde(default)]
    pub message: Option<String>,
    /// Profile summary generated from the onboarding interview
    #[serde(default)]
    pub profile_summary: Option<String>,
}

/// Conversation data owned by the remote service
#[async_trait]
pub trait ConversationService: Send + Sync {
    /// List the user's conversations, newest first
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or is rejected
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;

    /// Mark an onboarding conversation as complete
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or is rejected
    async fn complete_onboarding(&self, conversation_id: i64) -> Result<OnboardingOutcome>;
}
