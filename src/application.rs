//! Application layer: the harvesting run loop, batch dispatch, and the
//! user-facing control surface.

pub mod control;
pub mod dispatcher;
pub mod harvester;
