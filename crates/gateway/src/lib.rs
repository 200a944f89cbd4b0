#![deny(unused)]
//! HTTP entry point for Launchpad.
//!
//! Accepts provisioning jobs, streams pipeline events to observers over SSE
//! and exposes the tracked sandboxes.

pub mod server;

pub use server::{AppState, GatewayConfig, GatewayServer};
