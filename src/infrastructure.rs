//! Infrastructure: persistent store, credential resolution, host-page
//! access, selector/extraction machinery, and the sync relay.

pub mod auth;
pub mod config;
pub mod extractor;
pub mod page;
pub mod relay;
pub mod selectors;
pub mod store;
