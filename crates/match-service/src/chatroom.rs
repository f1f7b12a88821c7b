//! Chatroom service client.
//!
//! When two members match, the chatroom service is asked to open a private
//! room for them. The call is a bearer-authenticated JSON POST; the response
//! must carry a `roomId`.
//!
//! # Security
//!
//! - The bearer token is held as a `SecretString` and never logged
//! - Timeouts prevent a slow collaborator from stalling the choice lane

use crate::errors::MatchError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::MemberId;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Request timeout for the chatroom service.
const CHATROOM_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Connect timeout for the chatroom service.
const CHATROOM_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatroomRequest {
    pub source_user_id: MemberId,
    pub target_user_id: MemberId,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatroomResponse {
    #[serde(default)]
    pub room_id: Option<String>,
}

/// Opens a private chatroom for a matched pair.
#[async_trait]
pub trait ChatroomCreator: Send + Sync {
    /// Returns the created chatroom id.
    async fn create_chatroom(
        &self,
        source: MemberId,
        target: MemberId,
    ) -> Result<String, MatchError>;
}

/// HTTP client for the chatroom service.
#[derive(Clone)]
pub struct HttpChatroomClient {
    client: Client,
    endpoint: String,
    token: SecretString,
    title: String,
}

impl HttpChatroomClient {
    /// # Errors
    ///
    /// Returns `MatchError::Internal` if the HTTP client cannot be built.
    pub fn new(endpoint: String, token: SecretString, title: String) -> Result<Self, MatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(CHATROOM_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CHATROOM_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "mm.chatroom", error = %e, "Failed to build HTTP client");
                MatchError::Internal(format!("chatroom client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint,
            token,
            title,
        })
    }
}

#[async_trait]
impl ChatroomCreator for HttpChatroomClient {
    #[instrument(skip_all, fields(source = %source, target = %target))]
    async fn create_chatroom(
        &self,
        source: MemberId,
        target: MemberId,
    ) -> Result<String, MatchError> {
        let request = CreateChatroomRequest {
            source_user_id: source,
            target_user_id: target,
            title: self.title.clone(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header(
                "Authorization",
                format!("Bearer {}", self.token.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "mm.chatroom", error = %e, "Chatroom request failed");
                MatchError::ChatroomCreationFailed("chatroom service unreachable".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "mm.chatroom", status = %status, "Chatroom service returned an error");
            return Err(MatchError::ChatroomCreationFailed(format!(
                "chatroom service returned {status}"
            )));
        }

        let body: CreateChatroomResponse = response.json().await.map_err(|e| {
            warn!(target: "mm.chatroom", error = %e, "Failed to parse chatroom response");
            MatchError::ChatroomCreationFailed("unreadable chatroom response".to_string())
        })?;

        let room_id = body
            .room_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                warn!(target: "mm.chatroom", "Chatroom response carried no roomId");
                MatchError::ChatroomCreationFailed("response carried no roomId".to_string())
            })?;

        info!(target: "mm.chatroom", source = %source, target = %target, "Chatroom created");
        Ok(room_id)
    }
}

/// Mock chatroom creator for tests.
pub mod mock {
    use super::ChatroomCreator;
    use crate::errors::MatchError;
    use async_trait::async_trait;
    use common::types::MemberId;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns `chat-{n}` for the n-th call, or fails when told to.
    #[derive(Debug, Default)]
    pub struct MockChatroomCreator {
        calls: AtomicUsize,
        fail: AtomicBool,
        pairs: Mutex<Vec<(MemberId, MemberId)>>,
    }

    impl MockChatroomCreator {
        pub fn new() -> Self {
            Self::default()
        }

        /// A creator whose every call fails.
        pub fn failing() -> Self {
            let mock = Self::default();
            mock.fail.store(true, Ordering::SeqCst);
            mock
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Pairs the creator was called with, in order.
        pub fn pairs(&self) -> Vec<(MemberId, MemberId)> {
            self.pairs.lock().map(|p| p.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ChatroomCreator for MockChatroomCreator {
        async fn create_chatroom(
            &self,
            source: MemberId,
            target: MemberId,
        ) -> Result<String, MatchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Ok(mut pairs) = self.pairs.lock() {
                pairs.push((source, target));
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(MatchError::ChatroomCreationFailed(
                    "mock set to fail".to_string(),
                ));
            }
            Ok(format!("chat-{n}"))
        }
    }
}
