//! User-facing control surface.
//!
//! Resolves a credential, pre-fetches the backend's existing-record count,
//! verifies the agent is attached to the active tab (reattaching it when the
//! liveness probe fails), starts and stops runs, and renders the agent's
//! progress stream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::harvester::AgentHandle;
use crate::domain::error::{AuthError, RelayError};
use crate::domain::events::{AgentEvent, AgentReply, CommandEnvelope, ControlMessage};
use crate::infrastructure::auth::AuthResolver;
use crate::infrastructure::config::HarvesterConfig;
use crate::infrastructure::relay::{build_client, fetch_existing_count};
use crate::infrastructure::store::{
    KEY_API_BASE, KEY_CONNECTION_STATUS, KEY_LAST_SYNC, KEY_USER_INFO, SessionStore,
};

const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// What the control surface reports back to its caller after a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// The agent's completion message, absent when the run did not end
    /// cleanly (cancelled, or the agent went away).
    pub completion_message: Option<String>,
}

type RespawnFn = dyn Fn() -> Result<AgentHandle> + Send + Sync;

pub struct ControlSurface {
    store: Arc<SessionStore>,
    config: HarvesterConfig,
    http: reqwest::Client,
    handle: AgentHandle,
    /// Reattaches an agent to the tab, the moral equivalent of forcing a
    /// reload when the liveness probe fails.
    respawn: Box<RespawnFn>,
}

impl ControlSurface {
    pub fn new(
        store: Arc<SessionStore>,
        config: HarvesterConfig,
        handle: AgentHandle,
        respawn: Box<RespawnFn>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            config,
            http: build_client().context("control surface http client")?,
            handle,
            respawn,
        })
    }

    /// Lightweight liveness probe of the agent.
    pub async fn ping_agent(&self) -> bool {
        let (envelope, reply) = CommandEnvelope::with_reply(ControlMessage::Ping);
        if self.handle.commands.send(envelope).await.is_err() {
            return false;
        }
        matches!(timeout(PING_TIMEOUT, reply).await, Ok(Ok(AgentReply::Pong)))
    }

    /// Resolves a credential, probes the backend for the existing-record
    /// count, and starts a run. Renders progress until the run ends.
    pub async fn start(&mut self, explicit_credential: Option<&str>) -> Result<RunReport> {
        let (credential, endpoint) = self.resolve_session(explicit_credential)?;

        let existing_count = match fetch_existing_count(&self.http, &endpoint, &credential).await {
            Ok(count) => count,
            Err(RelayError::Unauthorized) => {
                self.store.clear_credential()?;
                bail!("authentication expired: sign in again to continue syncing");
            }
            Err(err) => {
                warn!(error = %err, "existing-count probe failed; assuming 0");
                0
            }
        };

        self.start_with_known_count(Some(&credential), existing_count)
            .await
    }

    /// Variant for callers that already know the existing-record count (and
    /// for environments without a reachable read endpoint).
    pub async fn start_with_known_count(
        &mut self,
        explicit_credential: Option<&str>,
        existing_count: u64,
    ) -> Result<RunReport> {
        let (credential, endpoint) = self.resolve_session(explicit_credential)?;

        self.ensure_attached().await?;

        self.handle
            .commands
            .send(CommandEnvelope::fire_and_forget(ControlMessage::StartSync {
                credential,
                api_url: Some(endpoint),
                existing_count,
            }))
            .await
            .map_err(|_| anyhow!("agent mailbox closed"))?;

        Ok(self.await_completion().await)
    }

    /// Relays a stop request to the running agent.
    pub async fn stop(&self) -> bool {
        self.handle
            .commands
            .send(CommandEnvelope::fire_and_forget(ControlMessage::StopFetching))
            .await
            .is_ok()
    }

    /// Renders the agent's event stream until the run completes or the agent
    /// goes away.
    pub async fn await_completion(&mut self) -> RunReport {
        while let Some(event) = self.handle.events.recv().await {
            match event {
                AgentEvent::Status { message, state } => {
                    info!(state = ?state, "{message}");
                    if let Err(err) = self.store.set(KEY_CONNECTION_STATUS, &state) {
                        warn!(error = %err, "could not record connection status");
                    }
                }
                AgentEvent::Progress { message } => info!("{message}"),
                AgentEvent::Complete { message } => {
                    info!("{message}");
                    if let Err(err) = self.store.set(KEY_LAST_SYNC, &Utc::now()) {
                        warn!(error = %err, "could not record sync timestamp");
                    }
                    return RunReport {
                        completion_message: Some(message),
                    };
                }
            }
        }
        RunReport::default()
    }

    fn resolve_session(&self, explicit_credential: Option<&str>) -> Result<(String, String)> {
        let resolver = AuthResolver::new(Arc::clone(&self.store));
        let auth = match resolver.resolve(explicit_credential, None) {
            Ok(auth) => auth,
            Err(AuthError::NotFound) => {
                warn!("no credential found; user must authenticate with the origin application");
                bail!("not signed in: open SyncVault and sign in, then start the sync again");
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(user) = self.store.get::<serde_json::Value>(KEY_USER_INFO) {
            debug!(user = %user, "syncing for signed-in user");
        }

        let endpoint = self
            .store
            .get_string(KEY_API_BASE)
            .unwrap_or_else(|| self.config.default_api_url.clone());
        Ok((auth.credential, endpoint))
    }

    async fn ensure_attached(&mut self) -> Result<()> {
        if self.ping_agent().await {
            return Ok(());
        }
        info!("agent not attached to the active tab; reloading");
        self.handle = (self.respawn)()?;
        Ok(())
    }
}
