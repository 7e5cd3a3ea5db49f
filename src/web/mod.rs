//! HTTP surface: manual triggers, health and status.

pub mod error;
pub mod flywheel;
pub mod routes;
pub mod status;

pub use routes::*;
