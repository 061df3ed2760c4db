//! Liveness supervision
//!
//! A single background task per process closes connections that stopped
//! heartbeating and drives the periodic membership resync.

mod supervisor;

pub use supervisor::{run_supervisor, SupervisorReport};
