//! Connection-harvesting and synchronization engine.
//!
//! A foreground agent that enumerates a virtualized, continuously-mutating
//! list of profile cards rendered by a host page, extracts structured records
//! from inconsistent markup, and delivers them in bounded batches to a remote
//! endpoint through a privileged relay. Runs are resumable across page
//! navigations, cancellable mid-flight, and tolerant of partial network
//! failure.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-export the primary entry points for easier access
pub use application::control::ControlSurface;
pub use application::harvester::{AgentHandle, HarvestAgent, spawn_agent};
pub use domain::events::{AgentEvent, ConnectionState, ControlMessage};
pub use domain::record::HarvestRecord;
pub use infrastructure::config::HarvesterConfig;
