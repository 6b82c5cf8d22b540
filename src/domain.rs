//! Core domain types for the harvesting engine.

pub mod error;
pub mod events;
pub mod record;
pub mod run_state;
