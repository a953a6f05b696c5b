//! Shared types for the Courier notification platform.
//!
//! This crate holds the domain vocabulary used by the delivery engine and its
//! HTTP surface: the notification record, channel/priority/status enums, retry
//! policy, and the request/response DTOs.

pub mod types;

pub use types::*;
