//! Ports - Capabilities the pipeline depends on, as traits.

pub mod camera;
pub mod encoder;
pub mod ledger;
pub mod power;
pub mod queue;
pub mod repository;
pub mod settings;
pub mod storage;
