//! Converts one rendered connection card into a [`HarvestRecord`].
//!
//! Tolerant of missing fields by construction: every optional lookup is
//! individually guarded, so a failure in one field never prevents the
//! others from being captured. Only a missing name aborts extraction, and
//! that is a skip for the caller, not an error.

use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Selector};
use url::Url;

use crate::domain::record::HarvestRecord;
use crate::infrastructure::selectors::PROFILE_PATH_SEGMENT;

/// Prioritized name selectors; the first non-empty trimmed text wins.
const NAME_SELECTORS: &[&str] = &[
    "span.mn-connection-card__name",
    ".mn-connection-card__name",
    ".entity-result__title-text span[aria-hidden='true']",
    "a[href*='/in/'] span",
    "a[href*='/in/']",
];

const OCCUPATION_SELECTORS: &[&str] = &[
    "span.mn-connection-card__occupation",
    ".mn-connection-card__occupation",
    ".entity-result__primary-subtitle",
];

const CONNECTED_ON_SELECTORS: &[&str] = &[
    "time.time-badge",
    ".mn-connection-card__date",
    "time",
];

const EMAIL_SELECTOR: &str = "a[href^='mailto:']";

/// Literal delimiter between position and company in the headline.
const POSITION_COMPANY_DELIMITER: &str = " at ";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

pub struct ConnectionExtractor {
    base_url: Url,
    name_selectors: Vec<Selector>,
    occupation_selectors: Vec<Selector>,
    connected_on_selectors: Vec<Selector>,
    email_selector: Option<Selector>,
    profile_link: Option<Selector>,
}

impl ConnectionExtractor {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| anyhow!("invalid base url {base_url}: {e}"))?;
        Ok(Self {
            base_url,
            name_selectors: compile(NAME_SELECTORS),
            occupation_selectors: compile(OCCUPATION_SELECTORS),
            connected_on_selectors: compile(CONNECTED_ON_SELECTORS),
            email_selector: Selector::parse(EMAIL_SELECTOR).ok(),
            profile_link: Selector::parse("a[href*='/in/']").ok(),
        })
    }

    /// Extracts one record from a card. `None` means no name was resolvable;
    /// the caller counts that as a skip.
    pub fn extract(&self, item: &ElementRef<'_>) -> Option<HarvestRecord> {
        let full_name = self.first_text(item, &self.name_selectors)?;
        let (first_name, last_name) = split_name(&full_name);

        let url = self.profile_url(item).unwrap_or_default();

        let (position, company) = self
            .first_text(item, &self.occupation_selectors)
            .map(split_occupation)
            .unwrap_or_default();

        // Known precision loss: under automated invisible scrolling the true
        // connection date is frequently not rendered, so absent dates are
        // stamped with the current day.
        let connected_on = self
            .first_text(item, &self.connected_on_selectors)
            .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string());

        let email_address = self.email(item).unwrap_or_default();

        Some(HarvestRecord {
            first_name,
            last_name,
            url,
            email_address,
            company,
            position,
            connected_on,
        })
    }

    /// Absolute profile URL for a card, normalizing relative hrefs against
    /// the host origin. Also used as the card's processed-marker identity.
    pub fn profile_url(&self, item: &ElementRef<'_>) -> Option<String> {
        let selector = self.profile_link.as_ref()?;
        let href = item
            .select(selector)
            .filter_map(|anchor| anchor.value().attr("href"))
            .find(|href| href.contains(PROFILE_PATH_SEGMENT))?;

        if href.starts_with("http") {
            Some(href.to_string())
        } else {
            self.base_url.join(href).ok().map(|u| u.to_string())
        }
    }

    fn email(&self, item: &ElementRef<'_>) -> Option<String> {
        let selector = self.email_selector.as_ref()?;
        item.select(selector)
            .filter_map(|anchor| anchor.value().attr("href"))
            .next()
            .map(|href| href.trim_start_matches("mailto:").to_string())
    }

    fn first_text(&self, item: &ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
        for selector in selectors {
            if let Some(text) = item
                .select(selector)
                .map(|el| normalize(&el.text().collect::<String>()))
                .find(|text| !text.is_empty())
            {
                return Some(text);
            }
        }
        None
    }
}

fn compile(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
}

fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Splits a full name on the first space into first/last.
fn split_name(full_name: &str) -> (String, String) {
    match full_name.split_once(' ') {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (full_name.to_string(), String::new()),
    }
}

/// Splits a "position at company" headline. Without the delimiter the whole
/// string is the position.
fn split_occupation(headline: String) -> (String, String) {
    match headline.split_once(POSITION_COMPANY_DELIMITER) {
        Some((position, company)) => (position.trim().to_string(), company.trim().to_string()),
        None => (headline.trim().to_string(), String::new()),
    }
}
