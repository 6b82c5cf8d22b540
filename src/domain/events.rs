//! Wire-level messages between the control surface and the harvesting agent.
//!
//! Control messages flow downward over an MPSC mailbox; status events flow
//! back as an independent stream. Synchronous answers (liveness probe,
//! credential queries) travel on a per-command oneshot reply channel carried
//! alongside the wire message.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Commands accepted by the harvesting agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
    /// Begin a harvesting run with a resolved credential.
    #[serde(rename_all = "camelCase")]
    StartSync {
        credential: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_url: Option<String>,
        /// Count of records already known to the backend, so progress and
        /// eventual-total estimation account for prior runs.
        #[serde(default)]
        existing_count: u64,
    },

    /// Request cooperative cancellation of the active run.
    StopFetching,

    /// Liveness probe, answered synchronously with [`AgentReply::Pong`].
    Ping,

    /// Report the cached credential, if any.
    GetCredential,

    /// Report whether a credential is currently cached.
    CheckAuthStatus,
}

/// Synchronous answers to control messages that expect one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentReply {
    Pong,
    #[serde(rename_all = "camelCase")]
    Credential { credential: Option<String> },
    #[serde(rename_all = "camelCase")]
    AuthStatus { authenticated: bool },
}

/// A control message paired with its optional in-process reply channel.
#[derive(Debug)]
pub struct CommandEnvelope {
    pub message: ControlMessage,
    pub reply: Option<oneshot::Sender<AgentReply>>,
}

impl CommandEnvelope {
    pub fn fire_and_forget(message: ControlMessage) -> Self {
        Self { message, reply: None }
    }

    pub fn with_reply(message: ControlMessage) -> (Self, oneshot::Receiver<AgentReply>) {
        let (tx, rx) = oneshot::channel();
        (Self { message, reply: Some(tx) }, rx)
    }
}

/// Connection state rendered by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Syncing,
    Connected,
    Disconnected,
}

/// Status and progress events emitted by the agent toward the control
/// surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentEvent {
    /// Coarse state transition with a display message.
    Status {
        message: String,
        state: ConnectionState,
    },

    /// Free-text progress update, usable for display as-is.
    Progress { message: String },

    /// Emitted exactly once at clean run end.
    Complete { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_sync_round_trips_through_wire_format() {
        let json = r#"{"action":"startSync","credential":"tok-1","existingCount":25}"#;
        let message: ControlMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            message,
            ControlMessage::StartSync {
                credential: "tok-1".to_string(),
                api_url: None,
                existing_count: 25,
            }
        );
    }

    #[test]
    fn unit_commands_serialize_as_bare_actions() {
        let json = serde_json::to_string(&ControlMessage::Ping).unwrap();
        assert_eq!(json, r#"{"action":"ping"}"#);

        let json = serde_json::to_string(&ControlMessage::StopFetching).unwrap();
        assert_eq!(json, r#"{"action":"stopFetching"}"#);
    }

    #[test]
    fn status_event_carries_connection_state() {
        let event = AgentEvent::Status {
            message: "Syncing connections".to_string(),
            state: ConnectionState::Syncing,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["state"], "syncing");
    }

    #[test]
    fn reply_channel_delivers_pong() {
        let (envelope, mut rx) = CommandEnvelope::with_reply(ControlMessage::Ping);
        envelope.reply.unwrap().send(AgentReply::Pong).unwrap();
        assert_eq!(rx.try_recv().unwrap(), AgentReply::Pong);
    }
}
