//! Shipment saga coordinator: orchestrates the reserve-inventory /
//! assign-courier / deliver workflow across independently owned services,
//! compensating on failure, and anchors terminal shipment events on a
//! blockchain ledger for tamper-evident audit.

pub mod admin;
pub mod blockchain;
pub mod bootstrap;
pub mod config;
pub mod domain;
pub mod error;
pub mod messaging;
pub mod saga;
pub mod store;

pub use config::Config;
pub use error::{CoreError, Result};
