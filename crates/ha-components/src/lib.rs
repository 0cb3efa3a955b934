//! Integrations shipped with the host
//!
//! Each integration lives in its own module and exposes one type
//! implementing [`ha_config_entries::Integration`] for the host to
//! register.

pub mod demo;

pub use demo::DemoIntegration;
