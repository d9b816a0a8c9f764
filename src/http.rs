//! HTTP transport and retry policy for the dashboard backend.

pub mod client;
pub mod retry;
