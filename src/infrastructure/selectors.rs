//! Ordered-fallback selector strategy for the host page's connection list.
//!
//! The host page's generated class names are unstable, so every selector
//! list pairs current class names with structural fallbacks (ending in
//! "anchor whose target path contains the profile segment"). No selector
//! miss is a hard error at this layer: absence is an empty result, and the
//! caller decides whether that means "not loaded yet" or "done".

use scraper::{ElementRef, Html, Selector};
use tracing::trace;

/// Path segment identifying a profile link on the host page.
pub const PROFILE_PATH_SEGMENT: &str = "/in/";

/// Candidate selectors for the scrollable list container, most specific
/// first. Hand-maintained.
const CONTAINER_SELECTORS: &[&str] = &[
    "div.scaffold-finite-scroll__content",
    "section.mn-connections",
    "main section.artdeco-card ul",
    "main ul",
    "body",
];

/// Candidate selectors for individual connection cards, most specific first.
const ITEM_SELECTORS: &[&str] = &[
    "li.mn-connection-card",
    "div.mn-connection-card",
    "li.scaffold-finite-scroll__content-item",
    "main li",
    "li",
];

const PROFILE_LINK_SELECTOR: &str = "a[href*='/in/']";

pub struct SelectorStrategy {
    containers: Vec<Selector>,
    items: Vec<Selector>,
    profile_link: Selector,
}

impl SelectorStrategy {
    pub fn new() -> Self {
        Self {
            containers: compile(CONTAINER_SELECTORS),
            items: compile(ITEM_SELECTORS),
            // Known-valid at compile time; compile() would drop it silently,
            // and this one is load-bearing.
            profile_link: Selector::parse(PROFILE_LINK_SELECTOR)
                .unwrap_or_else(|_| Selector::parse("a").unwrap()),
        }
    }

    /// Best available match for the list container.
    pub fn locate_container<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        for selector in &self.containers {
            if let Some(element) = doc.select(selector).next() {
                return Some(element);
            }
        }
        None
    }

    /// All currently-present connection cards. Candidates are filtered to
    /// those containing a resolvable profile link, because the host page's
    /// list items are heterogeneous (ads and separators share tag names with
    /// real entries).
    pub fn locate_items<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        for selector in &self.items {
            let items: Vec<ElementRef<'a>> = doc
                .select(selector)
                .filter(|item| self.profile_href(item).is_some())
                .collect();
            if !items.is_empty() {
                trace!(count = items.len(), "items located");
                return items;
            }
        }
        Vec::new()
    }

    /// Raw href of the first profile link inside an item, if any.
    pub fn profile_href(&self, item: &ElementRef<'_>) -> Option<String> {
        item.select(&self.profile_link)
            .filter_map(|anchor| anchor.value().attr("href"))
            .find(|href| href.contains(PROFILE_PATH_SEGMENT))
            .map(str::to_string)
    }
}

impl Default for SelectorStrategy {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_falls_back_through_candidates() {
        let strategy = SelectorStrategy::new();

        let current = Html::parse_document(
            r#"<div class="scaffold-finite-scroll__content"><ul></ul></div>"#,
        );
        assert!(strategy.locate_container(&current).is_some());

        // No known class names; structural fallback still matches.
        let bare = Html::parse_document("<main><ul><li></li></ul></main>");
        assert!(strategy.locate_container(&bare).is_some());
    }

    #[test]
    fn items_without_profile_links_are_filtered_out() {
        let strategy = SelectorStrategy::new();
        let doc = Html::parse_document(
            r#"
            <main><ul>
                <li class="mn-connection-card"><a href="/in/ada">Ada</a></li>
                <li class="mn-connection-card"><span>Sponsored</span></li>
                <li class="mn-connection-card"><a href="/in/grace">Grace</a></li>
            </ul></main>
            "#,
        );

        let items = strategy.locate_items(&doc);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn items_located_via_structural_fallback() {
        let strategy = SelectorStrategy::new();
        let doc = Html::parse_document(
            r#"<main><ul><li><a href="https://host.test/in/ada">Ada</a></li></ul></main>"#,
        );

        let items = strategy.locate_items(&doc);
        assert_eq!(items.len(), 1);
        assert_eq!(
            strategy.profile_href(&items[0]).as_deref(),
            Some("https://host.test/in/ada")
        );
    }

    #[test]
    fn empty_page_yields_empty_results_not_errors() {
        let strategy = SelectorStrategy::new();
        let doc = Html::parse_document("<p>nothing here</p>");
        assert!(strategy.locate_items(&doc).is_empty());
    }
}
