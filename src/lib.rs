//! Timelapse - Capture, segment, encode and offload pipeline for a single camera
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (naming, settings, ledger, retention, pacing, jobs)
//! - ports/: Trait definitions
//! - adapters/: Concrete implementations
//! - application/: Services driving the ports
//! - config: Environment configuration
//!
//! # Features
//! - `redis`: Redis-backed settings and state store shared with the admin surface

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

pub use config::{BackupServerConfig, CaptureConfig};
