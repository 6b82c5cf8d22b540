//! Sanity driver: runs the full harvesting pipeline against a scripted
//! three-stage fixture page and a logging relay, printing the event stream.
//!
//! Usage: `RUST_LOG=info cargo run --bin fixture_run`

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::info;
use tracing_subscriber::EnvFilter;

use conn_harvester::application::control::ControlSurface;
use conn_harvester::application::harvester::spawn_agent;
use conn_harvester::infrastructure::config::HarvesterConfig;
use conn_harvester::infrastructure::page::{HostPage, ScriptedPage};
use conn_harvester::infrastructure::relay::{RelayRequest, RelayResponse, SyncRelay};
use conn_harvester::infrastructure::store::{KEY_CREDENTIAL, SessionStore};

const LIST_URL: &str = "https://www.linkedin.com/mynetwork/invite-connect/connections/";

struct LoggingRelay;

#[async_trait]
impl SyncRelay for LoggingRelay {
    async fn forward(&self, request: RelayRequest) -> RelayResponse {
        info!(
            records = request.records.len(),
            endpoint = %request.endpoint_url,
            owner = request.records.first().and_then(|r| r.owner_id.as_deref()),
            "relay received batch"
        );
        RelayResponse::ok(None)
    }
}

fn card(i: usize) -> String {
    format!(
        r#"<li class="mn-connection-card">
            <a href="/in/person-{i}"><span class="mn-connection-card__name">Person {i}</span></a>
            <span class="mn-connection-card__occupation">Engineer at Initech</span>
            <time class="time-badge">Connected on January {}, 2024</time>
        </li>"#,
        (i % 28) + 1
    )
}

fn stage(count: usize) -> String {
    let cards: String = (0..count).map(card).collect();
    format!(
        r#"<main><div class="scaffold-finite-scroll__content"><ul>{cards}</ul></div></main>"#
    )
}

fn fixture_credential() -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"member:fixture"}"#);
    format!("{header}.{payload}.fixture-signature")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store_path = std::env::temp_dir()
        .join("conn-harvester-fixture")
        .join("session.json");
    let store = Arc::new(SessionStore::open(store_path)?);
    store.set(KEY_CREDENTIAL, &fixture_credential())?;

    let page = Arc::new(ScriptedPage::new(
        LIST_URL,
        vec![stage(40), stage(90), stage(110)],
    ));

    let config = HarvesterConfig {
        batch_size: 50,
        fast_batch_size: 25,
        settle_delay_ms: 100,
        max_attempts_without_growth: 3,
        container_wait_ms: 500,
        ..Default::default()
    };

    let handle = spawn_agent(
        Arc::clone(&page) as Arc<dyn HostPage>,
        Arc::new(LoggingRelay) as Arc<dyn SyncRelay>,
        Arc::clone(&store),
        config.clone(),
    )?;

    let respawn_page = Arc::clone(&page);
    let respawn_store = Arc::clone(&store);
    let respawn_config = config.clone();
    let mut surface = ControlSurface::new(
        Arc::clone(&store),
        config,
        handle,
        Box::new(move || {
            spawn_agent(
                Arc::clone(&respawn_page) as Arc<dyn HostPage>,
                Arc::new(LoggingRelay) as Arc<dyn SyncRelay>,
                Arc::clone(&respawn_store),
                respawn_config.clone(),
            )
        }),
    )?;

    let report = surface.start_with_known_count(None, 0).await?;
    info!(
        completion = report.completion_message.as_deref().unwrap_or("<none>"),
        "fixture run finished"
    );
    Ok(())
}
