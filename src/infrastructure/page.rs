//! Host-page capability seam.
//!
//! The loader state machine never touches a real rendering engine directly;
//! it drives a [`HostPage`] implementation. Markup crosses the seam as a
//! snapshot string so parsed documents never live across suspension points.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::domain::error::PageError;

/// Capabilities the harvesting agent needs from the page it runs inside.
#[async_trait]
pub trait HostPage: Send + Sync {
    /// Current rendered markup of the page.
    async fn snapshot(&self) -> Result<String, PageError>;

    /// Total scrollable height of the best-available scroll container. The
    /// only completion signal for incremental loading.
    async fn scroll_height(&self) -> u64;

    async fn scroll_offset(&self) -> u64;

    async fn scroll_to(&self, offset: u64);

    /// Drives the page to reveal more content: scrolls the best-available
    /// scroll container to its bottom and clicks any visible load-more
    /// affordance. Returns whether an affordance was clicked.
    async fn reveal_more(&self) -> Result<bool, PageError>;

    /// Current location (URL) of the page.
    async fn location(&self) -> String;

    /// Agent-triggered full navigation. Destroys in-memory agent state on a
    /// real page; callers persist a resume token first.
    async fn navigate(&self, url: &str) -> Result<(), PageError>;

    /// Host-page local state (the page origin's own storage), used as the
    /// last-resort credential source.
    async fn local_state(&self, key: &str) -> Option<String>;
}

/// Deterministic in-memory page for tests and the fixture driver.
///
/// Holds a sequence of cumulative markup stages; each `reveal_more` advances
/// one stage, so scrollable height grows monotonically until the script is
/// exhausted.
#[derive(Debug)]
pub struct ScriptedPage {
    location: Mutex<String>,
    stages: Vec<String>,
    revealed: AtomicUsize,
    offset: AtomicU64,
    navigations: Mutex<Vec<String>>,
    local_state: Mutex<HashMap<String, String>>,
}

impl ScriptedPage {
    pub fn new(location: impl Into<String>, stages: Vec<String>) -> Self {
        Self {
            location: Mutex::new(location.into()),
            stages,
            revealed: AtomicUsize::new(0),
            offset: AtomicU64::new(0),
            navigations: Mutex::new(Vec::new()),
            local_state: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_local_state(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.local_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value.into());
        self
    }

    /// Navigations requested by the agent, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.navigations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn revealed_stage(&self) -> usize {
        self.revealed.load(Ordering::SeqCst)
    }

    fn current_stage(&self) -> Option<&String> {
        self.stages.get(self.revealed.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl HostPage for ScriptedPage {
    async fn snapshot(&self) -> Result<String, PageError> {
        self.current_stage()
            .cloned()
            .ok_or_else(|| PageError::Snapshot("scripted page has no stages".to_string()))
    }

    async fn scroll_height(&self) -> u64 {
        self.current_stage().map_or(0, |s| s.len() as u64)
    }

    async fn scroll_offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    async fn scroll_to(&self, offset: u64) {
        self.offset.store(offset, Ordering::SeqCst);
    }

    async fn reveal_more(&self) -> Result<bool, PageError> {
        let current = self.revealed.load(Ordering::SeqCst);
        if current + 1 < self.stages.len() {
            self.revealed.store(current + 1, Ordering::SeqCst);
        }
        // Scrolled to the bottom of whatever is now rendered.
        self.offset.store(self.scroll_height().await, Ordering::SeqCst);
        Ok(false)
    }

    async fn location(&self) -> String {
        self.location.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        self.navigations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        *self.location.lock().unwrap_or_else(|e| e.into_inner()) = url.to_string();
        Ok(())
    }

    async fn local_state(&self, key: &str) -> Option<String> {
        self.local_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_page_reveals_stages_monotonically() {
        let page = ScriptedPage::new(
            "https://host.test/list",
            vec!["<ul></ul>".to_string(), "<ul><li>x</li></ul>".to_string()],
        );

        let before = page.scroll_height().await;
        page.reveal_more().await.unwrap();
        let after = page.scroll_height().await;
        assert!(after > before);
        assert_eq!(page.revealed_stage(), 1);

        // Exhausted script stops growing.
        page.reveal_more().await.unwrap();
        assert_eq!(page.scroll_height().await, after);
        assert_eq!(page.revealed_stage(), 1);
    }

    #[tokio::test]
    async fn scroll_offset_round_trips() {
        let page = ScriptedPage::new("https://host.test/list", vec!["<ul></ul>".to_string()]);
        page.scroll_to(120).await;
        assert_eq!(page.scroll_offset().await, 120);
    }

    #[tokio::test]
    async fn navigation_is_recorded() {
        let page = ScriptedPage::new("https://host.test/feed", vec![String::new()]);
        page.navigate("https://host.test/list").await.unwrap();
        assert_eq!(page.location().await, "https://host.test/list");
        assert_eq!(page.navigations(), vec!["https://host.test/list".to_string()]);
    }
}
