#![deny(unused)]
//! Core types, traits, and error definitions for launchpad.
//!
//! This crate provides the building blocks shared by every stage of the
//! provisioning pipeline: the job model, the error taxonomy, configuration,
//! pipeline events with their broadcast hub, and the contracts for the
//! queue and container runtime the pipeline talks to.

pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod mocks;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use events::*;
pub use hub::{EventHub, ObserverId, Subscription, OBSERVER_BUFFER};
pub use traits::*;
pub use types::*;
