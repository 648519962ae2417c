//! Client core for a parcel-delivery portal.
//!
//! Pricing and the booking flow live in [`domain`]; backend access and the
//! query cache live in [`infra`]; [`Portal`] wires them together.

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod notify;
pub mod util;

pub use app::{Portal, StartupError};
pub use config::{ConfigError, PortalConfig};
pub use error::PortalError;
