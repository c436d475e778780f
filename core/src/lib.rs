//! Orchestration core for the diffraction data-reduction platform.
//!
//! The modules mirror the legacy reduction pipeline while providing safe
//! abstractions: filename templating, sweep classification over frame
//! headers, a process-wide imageset resolution cache, and a uniform driver
//! protocol for the wrapped external analysis programs.

pub mod driver;
pub mod imageset;
pub mod naming;
pub mod prelude;
pub mod sweep;
pub mod telemetry;
pub mod wrappers;

pub use prelude::{FrameSummary, ReduceError, ReduceResult};
