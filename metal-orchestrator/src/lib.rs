//! Lifecycle reconciliation for ephemeral bare-metal runners.
//!
//! [`MetalController`] creates, inspects, powers and deletes devices on the
//! compute API, scoped to the devices tagged with its controller ID.

pub mod command;
pub mod config;
pub mod controller;
mod deleter;
pub mod error;
pub mod poller;
pub mod runner_spec;
pub mod tags;

pub use config::Config;
pub use controller::MetalController;
pub use error::ReconcileError;
pub use poller::PollPolicy;
