#![forbid(unsafe_code)]

//! Weft Runtime
//!
//! This crate turns the `weft-core` fiber data model into a working
//! reconciler: a single-threaded cooperative scheduler that drains
//! pending tree work in priority order, in slices bounded by host-supplied
//! deadlines, and commits finished trees atomically.
//!
//! # Key Components
//!
//! - [`Scheduler`] - Work loop, dispatch entry points, commit engine, and
//!   error pipeline, generic over a host and a reconciler
//! - [`HostConfig`] - Host-side callback registration seam
//! - [`Reconciler`] - Begin/complete/commit collaborator seam
//! - [`Deadline`] - Remaining idle budget reported by the host
//! - [`SchedTrace`] - Bounded event ring for golden-trace style assertions
//! - [`simulator`] - Headless host + scripted reconciler for tests and
//!   embedder experiments

pub mod host;
pub mod reconciler;
pub mod registry;
pub mod scheduler;
pub mod simulator;
pub mod trace;

pub use host::{Deadline, FixedDeadline, FrameDeadline, HostConfig};
pub use reconciler::{Reconciler, TrappedError};
pub use scheduler::{InvariantViolation, Scheduler, SchedulerConfig, SchedulerError};
pub use trace::{CallbackKind, SchedEvent, SchedTrace, TraceEntry};
