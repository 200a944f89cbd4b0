#![deny(unused)]
//! Job intake for Launchpad.
//!
//! This crate pulls provisioning jobs off the queue one at a time and hands
//! them to a [`JobProcessor`] (normally the sandbox lifecycle manager).

pub mod gate;
pub mod intake;

pub use gate::{InFlight, IntakeGate};
pub use intake::{IntakeLoop, JobOutcome, JobProcessor};
