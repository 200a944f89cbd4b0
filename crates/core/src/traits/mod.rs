//! Contracts for the pipeline's external collaborators.
//!
//! - `events`: sink that receives pipeline events (EventSink)
//! - `queue`: broker consumed by the intake loop (JobQueue)
//! - `runtime`: container runtime hosting sandboxes (SandboxRuntime)

pub mod events;
pub mod queue;
pub mod runtime;

pub use events::*;
pub use queue::*;
pub use runtime::*;
