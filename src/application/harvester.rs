//! The harvesting agent: incremental loader state machine plus the command
//! mailbox that makes it controllable from the control surface.
//!
//! One long-lived asynchronous task per run, never concurrent with another
//! instance of itself. Cancellation is cooperative and polled between items
//! and between cycles; the longest un-cancellable span is one full
//! scroll-settle-extract cycle. Growth of the host page's scrollable height
//! is the only completion signal.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use scraper::Html;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::application::dispatcher::BatchDispatcher;
use crate::domain::events::{
    AgentEvent, AgentReply, CommandEnvelope, ConnectionState, ControlMessage,
};
use crate::domain::run_state::{LoaderPhase, RunState};
use crate::infrastructure::auth::{AuthResolver, ResolvedAuth};
use crate::infrastructure::config::{HOST_ORIGIN, HarvesterConfig};
use crate::infrastructure::extractor::ConnectionExtractor;
use crate::infrastructure::page::HostPage;
use crate::infrastructure::relay::SyncRelay;
use crate::infrastructure::selectors::SelectorStrategy;
use crate::infrastructure::store::{
    KEY_API_BASE, KEY_PENDING_RESUME, PendingResumeToken, SessionStore,
};

/// Poll interval while waiting for the list container to appear.
const CONTAINER_POLL_MS: u64 = 250;

/// Per-run set of item identities that have already yielded a record (or
/// been skipped after error). A fresh set per run is the "markers cleared at
/// run start" rule.
#[derive(Debug, Default)]
pub struct ProcessedSet(HashSet<String>);

impl ProcessedSet {
    pub fn is_marked(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    /// Returns whether the key was newly marked.
    pub fn mark(&mut self, key: String) -> bool {
        self.0.insert(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Channel ends owned by the embedder of an agent.
pub struct AgentHandle {
    pub commands: mpsc::Sender<CommandEnvelope>,
    pub events: mpsc::Receiver<AgentEvent>,
    pub task: JoinHandle<()>,
}

/// The foreground harvesting agent.
pub struct HarvestAgent {
    page: Arc<dyn HostPage>,
    relay: Arc<dyn SyncRelay>,
    store: Arc<SessionStore>,
    config: HarvesterConfig,
    events: mpsc::Sender<AgentEvent>,
    strategy: SelectorStrategy,
    extractor: ConnectionExtractor,
    /// A second start command while this is set is a no-op.
    running: AtomicBool,
    active_cancel: StdMutex<Option<crate::domain::run_state::CancelHandle>>,
}

/// Attaches an agent to a page: spawns the command mailbox and, when a
/// matching resume token is pending, continues the interrupted run.
pub fn spawn_agent(
    page: Arc<dyn HostPage>,
    relay: Arc<dyn SyncRelay>,
    store: Arc<SessionStore>,
    config: HarvesterConfig,
) -> Result<AgentHandle> {
    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(256);

    let agent = Arc::new(HarvestAgent::new(page, relay, store, config, event_tx)?);
    let task = tokio::spawn(async move {
        agent.try_resume().await;
        agent.mailbox(command_rx).await;
    });

    Ok(AgentHandle {
        commands: command_tx,
        events: event_rx,
        task,
    })
}

impl HarvestAgent {
    pub fn new(
        page: Arc<dyn HostPage>,
        relay: Arc<dyn SyncRelay>,
        store: Arc<SessionStore>,
        config: HarvesterConfig,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<Self> {
        Ok(Self {
            page,
            relay,
            store,
            config,
            events,
            strategy: SelectorStrategy::new(),
            extractor: ConnectionExtractor::new(HOST_ORIGIN)?,
            running: AtomicBool::new(false),
            active_cancel: StdMutex::new(None),
        })
    }

    /// Command loop. Stays responsive while a run is in flight so stop and
    /// liveness commands are honored mid-run.
    pub async fn mailbox(self: Arc<Self>, mut commands: mpsc::Receiver<CommandEnvelope>) {
        while let Some(envelope) = commands.recv().await {
            match envelope.message {
                ControlMessage::StartSync {
                    credential,
                    api_url,
                    existing_count,
                } => {
                    Arc::clone(&self)
                        .start_sync(Some(credential), api_url, existing_count)
                        .await;
                }
                ControlMessage::StopFetching => self.stop(),
                ControlMessage::Ping => reply(envelope.reply, AgentReply::Pong),
                ControlMessage::GetCredential => reply(
                    envelope.reply,
                    AgentReply::Credential {
                        credential: self.store.credential(),
                    },
                ),
                ControlMessage::CheckAuthStatus => reply(
                    envelope.reply,
                    AgentReply::AuthStatus {
                        authenticated: self.store.credential().is_some(),
                    },
                ),
            }
        }
        debug!("command mailbox closed");
    }

    /// Consumes a pending resume token when the page loaded at the expected
    /// destination. Checked once per attach; deleted immediately on use.
    pub async fn try_resume(self: &Arc<Self>) {
        let location = self.page.location().await;
        if !location.contains(&self.config.connections_path) {
            return;
        }

        let token: Option<PendingResumeToken> = match self.store.take(KEY_PENDING_RESUME) {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "could not read resume token");
                None
            }
        };

        if let Some(token) = token {
            info!("resume token consumed; continuing interrupted run");
            Arc::clone(self)
                .start_sync(
                    Some(token.credential),
                    Some(token.api_url),
                    token.existing_count,
                )
                .await;
        }
    }

    /// Begins a run. A no-op while another run is active. Navigates to the
    /// connections page first when needed, persisting a resume token so the
    /// run survives the reload.
    pub async fn start_sync(
        self: Arc<Self>,
        explicit_credential: Option<String>,
        api_url: Option<String>,
        existing_count: u64,
    ) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("harvest already running; start command ignored");
            return;
        }

        let page_local = self.page.local_state("accessToken").await;
        let resolver = AuthResolver::new(Arc::clone(&self.store));
        let auth = match resolver.resolve(explicit_credential.as_deref(), page_local) {
            Ok(auth) => auth,
            Err(err) => {
                warn!(error = %err, "run never started: no credential resolvable");
                self.emit(AgentEvent::Status {
                    message: "Not signed in. Open SyncVault and sign in to start syncing."
                        .to_string(),
                    state: ConnectionState::Disconnected,
                })
                .await;
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        let endpoint = api_url
            .or_else(|| self.store.get_string(KEY_API_BASE))
            .unwrap_or_else(|| self.config.default_api_url.clone());

        let location = self.page.location().await;
        if !location.contains(&self.config.connections_path) {
            self.navigate_with_resume(auth, endpoint, existing_count).await;
            return;
        }

        // The cancel handle must be registered before the run task is
        // spawned: a stop command right behind the start would otherwise
        // race the task's scheduling and be discarded.
        let state = RunState::new();
        {
            let mut guard = self.active_cancel.lock().unwrap_or_else(|e| e.into_inner());
            *guard = Some(state.cancel_handle());
        }

        // Spawned so the mailbox keeps answering pings and stop commands.
        let agent = Arc::clone(&self);
        tokio::spawn(async move {
            agent.run_harvest(state, auth, endpoint, existing_count).await;
        });
    }

    /// Requests cooperative cancellation of the active run, if any.
    pub fn stop(&self) {
        let guard = self.active_cancel.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = guard.as_ref() {
            info!("stop requested; run will halt at its next poll point");
            handle.cancel();
        } else {
            debug!("stop requested with no active run");
        }
    }

    async fn navigate_with_resume(&self, auth: ResolvedAuth, endpoint: String, existing_count: u64) {
        let token = PendingResumeToken {
            credential: auth.credential,
            api_url: endpoint,
            existing_count,
        };
        if let Err(err) = self.store.set(KEY_PENDING_RESUME, &token) {
            warn!(error = %err, "could not persist resume token");
        }

        self.emit(AgentEvent::Progress {
            message: "Opening the connections page...".to_string(),
        })
        .await;

        let target = format!("{HOST_ORIGIN}{}", self.config.connections_path);
        if let Err(err) = self.page.navigate(&target).await {
            warn!(error = %err, "navigation failed; clearing resume token");
            if let Err(err) = self.store.remove(KEY_PENDING_RESUME) {
                warn!(error = %err, "could not clear resume token");
            }
        }
        // The reload destroys this agent's in-memory state; the resume token
        // carries the run across.
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run_harvest(
        self: Arc<Self>,
        mut state: RunState,
        auth: ResolvedAuth,
        endpoint: String,
        existing_count: u64,
    ) {
        info!(run_id = %state.run_id, endpoint = %endpoint, existing_count, "harvest run starting");

        self.emit(AgentEvent::Status {
            message: "Syncing connections...".to_string(),
            state: ConnectionState::Syncing,
        })
        .await;

        self.await_container(&state).await;

        let claim_sub = auth.claim.map(|claim| claim.sub);
        let mut dispatcher = BatchDispatcher::new(
            Arc::clone(&self.relay),
            self.config.fast_batch_size,
            auth.credential,
            claim_sub,
            endpoint,
        );
        let mut markers = ProcessedSet::default();

        // Immediate pass: whatever is already rendered is extracted and
        // dispatched, so an instantly-cancelled run still yields data.
        state.phase = LoaderPhase::Extracting;
        let mut found: u64 = 0;
        found += self.extract_pass(&mut state, &mut markers, &mut dispatcher).await;
        dispatcher.flush();
        dispatcher.set_batch_size(self.config.batch_size);

        loop {
            if state.cancel_requested() {
                state.phase = LoaderPhase::Cancelled;
                break;
            }

            state.phase = LoaderPhase::Scrolling;
            let height_before = self.page.scroll_height().await;
            let saved_offset = self.page.scroll_offset().await;
            if let Err(err) = self.page.reveal_more().await {
                warn!(error = %err, "scroll trigger failed");
            }
            sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
            // The user's viewport must not visibly jump during the run.
            self.page.scroll_to(saved_offset).await;

            if state.cancel_requested() {
                state.phase = LoaderPhase::Cancelled;
                break;
            }

            state.phase = LoaderPhase::Extracting;
            found += self.extract_pass(&mut state, &mut markers, &mut dispatcher).await;

            let estimated_total = existing_count + markers.len() as u64;
            self.emit(AgentEvent::Progress {
                message: format!(
                    "Synced {found} connections so far ({estimated_total} known in total)"
                ),
            })
            .await;

            let height_after = self.page.scroll_height().await;
            let drained = state.observe_growth(
                height_after > height_before,
                self.config.max_attempts_without_growth,
            );
            debug!(
                phase = ?state.phase,
                attempts = state.attempts_without_growth,
                height_before,
                height_after,
                delivered = dispatcher.delivered(),
                "cycle finished"
            );
            if drained {
                state.phase = LoaderPhase::Drained;
                break;
            }
        }

        let stats = dispatcher.finish().await;
        state.total_processed = existing_count + found;

        match state.phase {
            LoaderPhase::Drained => {
                self.emit(AgentEvent::Complete {
                    message: format!(
                        "Sync complete: {}/{} connections delivered ({} total known)",
                        stats.delivered, found, state.total_processed
                    ),
                })
                .await;
            }
            LoaderPhase::Cancelled => {
                self.emit(AgentEvent::Status {
                    message: format!("Sync stopped after {found} connections"),
                    state: ConnectionState::Connected,
                })
                .await;
            }
            _ => {}
        }

        info!(
            run_id = %state.run_id,
            phase = ?state.phase,
            processed = found,
            skipped = state.skipped,
            delivered = stats.delivered,
            dropped_batches = stats.dropped_batches,
            "harvest run finished"
        );

        {
            let mut guard = self.active_cancel.lock().unwrap_or_else(|e| e.into_inner());
            *guard = None;
        }
        // Every exit path leaves the agent restartable.
        self.running.store(false, Ordering::SeqCst);
    }

    /// Bounded wait for the list container. Timing out is not fatal: the run
    /// proceeds best-effort on the broadened fallback selectors.
    async fn await_container(&self, state: &RunState) {
        let deadline = Instant::now() + Duration::from_millis(self.config.container_wait_ms);
        loop {
            if state.cancel_requested() {
                return;
            }
            if let Ok(html) = self.page.snapshot().await {
                let present = {
                    let doc = Html::parse_document(&html);
                    self.strategy.locate_container(&doc).is_some()
                };
                if present {
                    return;
                }
            }
            if Instant::now() >= deadline {
                warn!("list container did not appear within bounded wait; proceeding best-effort");
                return;
            }
            sleep(Duration::from_millis(CONTAINER_POLL_MS)).await;
        }
    }

    /// One extraction pass over all currently-present unmarked items.
    /// Returns the number of records produced.
    async fn extract_pass(
        &self,
        state: &mut RunState,
        markers: &mut ProcessedSet,
        dispatcher: &mut BatchDispatcher,
    ) -> u64 {
        let html = match self.page.snapshot().await {
            Ok(html) => html,
            Err(err) => {
                warn!(error = %err, "snapshot failed; skipping pass");
                return 0;
            }
        };

        let records = self.collect_new(&html, state, markers);
        let count = records.len() as u64;
        for record in records {
            dispatcher.push(record);
        }
        count
    }

    /// Synchronous over one parsed snapshot; the document never crosses a
    /// suspension point.
    fn collect_new(
        &self,
        html: &str,
        state: &mut RunState,
        markers: &mut ProcessedSet,
    ) -> Vec<crate::domain::record::HarvestRecord> {
        let doc = Html::parse_document(html);
        let mut records = Vec::new();

        for item in self.strategy.locate_items(&doc) {
            // Polled between items.
            if state.cancel_requested() {
                break;
            }

            let key = self
                .extractor
                .profile_url(&item)
                .unwrap_or_else(|| fallback_key(&item));
            if markers.is_marked(&key) {
                continue;
            }
            // Marked even when extraction fails, so a malformed card is
            // skipped once rather than retried every cycle.
            markers.mark(key);

            match self.extractor.extract(&item) {
                Some(record) if record.is_valid() => records.push(record),
                _ => state.skipped += 1,
            }
        }

        records
    }

    async fn emit(&self, event: AgentEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}

fn reply(channel: Option<oneshot::Sender<AgentReply>>, value: AgentReply) {
    if let Some(tx) = channel {
        let _ = tx.send(value);
    }
}

/// Marker identity for the rare card without a resolvable profile link.
fn fallback_key(item: &scraper::ElementRef<'_>) -> String {
    let text: String = item.text().collect::<String>();
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .nth(80)
        .map_or(trimmed.len(), |(i, _)| i);
    format!("text:{}", &trimmed[..end])
}
