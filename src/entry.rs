//! Call entry
//!
//! Turns what the user typed (a channel to join, or someone to call) into a
//! [`CallTicket`]: the channel, the token for it and the role to join with.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::EntryError;

/// How a call is entered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallRequest {
    /// Join a channel someone else started
    JoinChannel { channel_name: String },
    /// Start a new call to `receiver_id`
    StartCall { receiver_id: String },
}

impl CallRequest {
    pub fn join(channel_name: impl Into<String>) -> Self {
        CallRequest::JoinChannel {
            channel_name: channel_name.into(),
        }
    }

    pub fn call(receiver_id: impl Into<String>) -> Self {
        CallRequest::StartCall {
            receiver_id: receiver_id.into(),
        }
    }

    pub fn role(&self) -> CallRole {
        match self {
            CallRequest::JoinChannel { .. } => CallRole::Audience,
            CallRequest::StartCall { .. } => CallRole::Host,
        }
    }

    /// Trimmed copy of the request, or the message to show for bad input
    pub fn validate(&self) -> Result<CallRequest, EntryError> {
        match self {
            CallRequest::JoinChannel { channel_name } => {
                let channel_name = channel_name.trim();
                if channel_name.is_empty() {
                    return Err(EntryError::InvalidInput(
                        "Please enter a valid channel name".to_string(),
                    ));
                }
                Ok(CallRequest::join(channel_name))
            }
            CallRequest::StartCall { receiver_id } => {
                let receiver_id = receiver_id.trim();
                if receiver_id.is_empty() {
                    return Err(EntryError::InvalidInput(
                        "Please enter a valid receiver ID".to_string(),
                    ));
                }
                Ok(CallRequest::call(receiver_id))
            }
        }
    }
}

/// Role requested from the engine for the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRole {
    Host,
    Audience,
}

impl fmt::Display for CallRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallRole::Host => f.write_str("host"),
            CallRole::Audience => f.write_str("audience"),
        }
    }
}

/// Everything needed to join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTicket {
    pub channel: String,
    pub token: String,
    pub role: CallRole,
}

/// Issues tokens for channels
#[async_trait]
pub trait TokenService: Send + Sync {
    async fn issue(&self, request: &CallRequest) -> Result<CallTicket, EntryError>;
}

/// Validate `request` and ask `service` for a ticket.
///
/// Invalid input never reaches the service.
pub async fn request_ticket(
    service: &dyn TokenService,
    request: &CallRequest,
) -> Result<CallTicket, EntryError> {
    let request = request.validate()?;
    let ticket = service.issue(&request).await?;
    if ticket.token.trim().is_empty() {
        return Err(EntryError::Rejected("empty token issued".to_string()));
    }

    tracing::info!(channel = %ticket.channel, role = %ticket.role, "Ticket issued");
    Ok(ticket)
}

/// Hands out one preconfigured token
#[derive(Debug, Clone)]
pub struct StaticTokenService {
    token: String,
}

impl StaticTokenService {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenService for StaticTokenService {
    async fn issue(&self, request: &CallRequest) -> Result<CallTicket, EntryError> {
        if self.token.is_empty() {
            return Err(EntryError::Unavailable("no token configured".to_string()));
        }

        let channel = match request {
            CallRequest::JoinChannel { channel_name } => channel_name.clone(),
            CallRequest::StartCall { receiver_id } => {
                let suffix = Uuid::new_v4().simple().to_string();
                format!("call-{}-{}", receiver_id, &suffix[..8])
            }
        };

        Ok(CallTicket {
            channel,
            token: self.token.clone(),
            role: request.role(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingService {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenService for CountingService {
        async fn issue(&self, request: &CallRequest) -> Result<CallTicket, EntryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            StaticTokenService::new("tok").issue(request).await
        }
    }

    #[tokio::test]
    async fn test_blank_input_never_reaches_service() {
        let service = CountingService {
            calls: AtomicUsize::new(0),
        };

        let err = request_ticket(&service, &CallRequest::join("   "))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Please enter a valid channel name");

        let err = request_ticket(&service, &CallRequest::call(""))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Please enter a valid receiver ID");

        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_join_keeps_trimmed_channel() {
        let service = StaticTokenService::new("tok-a");
        let ticket = request_ticket(&service, &CallRequest::join("  lobby "))
            .await
            .unwrap();

        assert_eq!(ticket.channel, "lobby");
        assert_eq!(ticket.token, "tok-a");
        assert_eq!(ticket.role, CallRole::Audience);
    }

    #[tokio::test]
    async fn test_start_call_derives_fresh_channel() {
        let service = StaticTokenService::new("tok-a");
        let first = request_ticket(&service, &CallRequest::call("bob"))
            .await
            .unwrap();
        let second = request_ticket(&service, &CallRequest::call("bob"))
            .await
            .unwrap();

        assert_eq!(first.role, CallRole::Host);
        assert!(first.channel.starts_with("call-bob-"));
        assert_eq!(first.channel.len(), "call-bob-".len() + 8);
        assert_ne!(first.channel, second.channel);
    }

    #[tokio::test]
    async fn test_missing_token_is_unavailable() {
        let service = StaticTokenService::new("");
        let err = request_ticket(&service, &CallRequest::join("lobby"))
            .await
            .unwrap_err();
        assert!(matches!(err, EntryError::Unavailable(_)));
    }

    #[test]
    fn test_request_serde_shape() {
        let json = serde_json::to_string(&CallRequest::call("bob")).unwrap();
        assert_eq!(json, r#"{"kind":"start_call","receiver_id":"bob"}"#);
    }
}
