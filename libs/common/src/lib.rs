//! Common library for the credential platform services
//!
//! This crate provides shared functionality used across the services,
//! including the clock abstraction used for every expiry decision, database
//! connectivity for principal storage, and error handling.

pub mod clock;
pub mod database;
pub mod error;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
