//! Application layer - Services that drive the ports.

pub mod backup;
pub mod capture;
pub mod encoder;
pub mod ledger;
pub mod power;
#[cfg(test)]
pub(crate) mod testing;
pub mod worker;
