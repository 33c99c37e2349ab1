#![forbid(unsafe_code)]

//! Host configuration seam.
//!
//! The scheduler never talks to an event loop directly. It asks the host
//! to arrange a callback of one of two kinds and is later re-entered
//! through the matching public entry point:
//!
//! - animation: request via [`HostConfig::request_animation_callback`],
//!   fire via [`crate::Scheduler::perform_animation_work`]
//! - deferred: request via [`HostConfig::request_deferred_callback`],
//!   fire via [`crate::Scheduler::perform_deferred_work`] with a
//!   [`Deadline`] describing the remaining idle budget
//!
//! The scheduler guarantees at most one outstanding request of each kind;
//! the backing mechanism (frame hook, timer wheel, reactor handle) is the
//! embedder's business.

use std::time::{Duration, Instant};

/// Host-side scheduling primitives consumed by the scheduler.
pub trait HostConfig {
    /// Opaque host container handle stored per root.
    type Container;

    /// Arrange for `perform_animation_work` to be called on the next
    /// animation frame.
    fn request_animation_callback(&mut self);

    /// Arrange for `perform_deferred_work` to be called when the host has
    /// idle budget.
    fn request_deferred_callback(&mut self);

    /// Whether updates scheduled outside any explicit priority scope
    /// should flush synchronously.
    fn use_sync_scheduling(&self) -> bool {
        false
    }
}

/// Remaining idle budget, reported by the host to the deferred entry
/// point.
pub trait Deadline {
    /// Milliseconds left before the host wants control back.
    fn time_remaining(&self) -> f64;
}

/// A deadline anchored to a wall-clock instant.
///
/// This is the shape real idle callbacks take: the host picks an end
/// instant and the budget shrinks as time passes.
#[derive(Debug, Clone, Copy)]
pub struct FrameDeadline {
    end: Instant,
}

impl FrameDeadline {
    /// A deadline expiring at `end`.
    pub fn until(end: Instant) -> Self {
        Self { end }
    }

    /// A deadline expiring `budget` from now.
    pub fn from_budget(budget: Duration) -> Self {
        Self {
            end: Instant::now() + budget,
        }
    }
}

impl Deadline for FrameDeadline {
    fn time_remaining(&self) -> f64 {
        self.end.saturating_duration_since(Instant::now()).as_secs_f64() * 1_000.0
    }
}

/// A deadline frozen at a fixed remaining budget. Handy in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedDeadline {
    remaining_ms: f64,
}

impl FixedDeadline {
    /// A deadline that always reports `remaining_ms`.
    pub fn new(remaining_ms: f64) -> Self {
        Self { remaining_ms }
    }
}

impl Deadline for FixedDeadline {
    fn time_remaining(&self) -> f64 {
        self.remaining_ms
    }
}
