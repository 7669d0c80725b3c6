//! Domain layer - Pure business logic.

pub mod jobs;
pub mod ledger;
pub mod naming;
pub mod pacing;
pub mod retention;
pub mod session;
pub mod settings;
