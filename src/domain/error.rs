//! Error taxonomies for the harvesting engine.
//!
//! Each infrastructure seam carries its own error enum; the application layer
//! folds them into `anyhow` contexts. Item-level extraction failures are not
//! errors at all: they are counted as skips and the run continues.

use thiserror::Error;

/// Credential resolution failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential could be obtained from any candidate source.
    #[error("no credential available from any source")]
    NotFound,

    /// The persistent store could not be read or written.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Persistent-store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Host-page interaction failures.
#[derive(Debug, Error)]
pub enum PageError {
    /// The page could not produce a markup snapshot.
    #[error("snapshot unavailable: {0}")]
    Snapshot(String),

    /// An agent-triggered navigation failed.
    #[error("navigation failed: {0}")]
    Navigation(String),
}

/// Relay transport failures surfaced by the control surface.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote endpoint rejected the credential. Treated as credential
    /// invalidation by the control surface.
    #[error("credential rejected by remote endpoint")]
    Unauthorized,

    #[error("remote endpoint rejected request: {0}")]
    Rejected(String),
}
