//! API module
//!
//! This module provides the HTTP surface of taskchat: the axum server with its
//! JSON API and HTML checklist, and the client the CLI uses to reach it.

pub mod client;
pub mod server;

// Re-export commonly used types
pub use client::{Client, ClientConfig, ClientError};
pub use server::{router, serve, ServerConfig};
