//! In-process fan-out of pipeline outcomes.

pub mod hub;
pub mod listener;
