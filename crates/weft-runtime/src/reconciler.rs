#![forbid(unsafe_code)]

//! Reconciliation collaborator seam.
//!
//! The scheduler decides *when* fibers are worked on; the [`Reconciler`]
//! decides *what* working on a fiber means. Begin/complete drive child
//! diffing, the commit ops apply host mutations and lifecycles, and the
//! error hooks locate and notify error boundaries. The scheduler treats
//! every one of these as a black box.
//!
//! User code failures travel as `Err(R::Error)` out of the begin and
//! complete hooks, and as [`TrappedError`] values out of the commit
//! hooks, which must not abort mid-commit.

use weft_core::{FiberArena, FiberId, Priority};

/// A user-code error pinned to the boundary that should absorb it.
///
/// `boundary: None` means no ancestor error boundary exists and the error
/// will surface to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrappedError<E> {
    /// Nearest ancestor error boundary of the failed fiber, if any.
    pub boundary: Option<FiberId>,
    /// The original user error.
    pub error: E,
}

impl<E> TrappedError<E> {
    /// Trap `error` at `boundary`.
    pub fn caught(boundary: FiberId, error: E) -> Self {
        Self {
            boundary: Some(boundary),
            error,
        }
    }

    /// An error with no boundary to absorb it.
    pub fn uncaught(error: E) -> Self {
        Self {
            boundary: None,
            error,
        }
    }
}

/// Tree-diffing and host-mutation callbacks invoked by the scheduler.
///
/// Implementations own the element/props model (`Props`), the host-side
/// instances their commit ops mutate, and the error taxonomy (`Error`).
pub trait Reconciler {
    /// Props payload carried on fibers.
    type Props: Clone;
    /// Opaque user-code error.
    type Error;

    /// Reconcile `work_in_progress` against its current counterpart,
    /// producing the first child to work on, or `None` when the subtree
    /// is done or bailed out.
    fn begin_work(
        &mut self,
        arena: &mut FiberArena<Self::Props>,
        current: Option<FiberId>,
        work_in_progress: FiberId,
        priority: Priority,
    ) -> Result<Option<FiberId>, Self::Error>;

    /// Finalize a node whose children are all complete. May spawn a new
    /// fiber (rare, host-effect bookkeeping).
    fn complete_work(
        &mut self,
        arena: &mut FiberArena<Self::Props>,
        current: Option<FiberId>,
        work_in_progress: FiberId,
    ) -> Result<Option<FiberId>, Self::Error>;

    /// Allocate or reuse the alternate of `fiber` as the next
    /// work-in-progress node.
    fn clone_fiber(
        &mut self,
        arena: &mut FiberArena<Self::Props>,
        fiber: FiberId,
        priority: Priority,
    ) -> FiberId {
        arena.clone_fiber(fiber, priority)
    }

    /// Attach `fiber`'s host node to its parent.
    fn commit_insertion(&mut self, arena: &mut FiberArena<Self::Props>, fiber: FiberId);

    /// Apply `fiber`'s pending host mutation in place.
    fn commit_work(
        &mut self,
        arena: &mut FiberArena<Self::Props>,
        current: Option<FiberId>,
        fiber: FiberId,
    );

    /// Detach and tear down `fiber`'s host subtree. Unmount failures are
    /// reported, not raised, so the commit can keep going.
    fn commit_deletion(
        &mut self,
        arena: &mut FiberArena<Self::Props>,
        fiber: FiberId,
    ) -> Vec<TrappedError<Self::Error>>;

    /// Run `fiber`'s post-mutation lifecycle. A failure is reported, not
    /// raised.
    fn commit_lifecycles(
        &mut self,
        arena: &mut FiberArena<Self::Props>,
        current: Option<FiberId>,
        fiber: FiberId,
    ) -> Option<TrappedError<Self::Error>>;

    /// Pin a user error to the nearest ancestor error boundary of
    /// `failed`.
    fn trap_error(
        &mut self,
        arena: &FiberArena<Self::Props>,
        failed: FiberId,
        error: Self::Error,
    ) -> TrappedError<Self::Error>;

    /// Tell a boundary it must absorb `error` on its next render.
    fn acknowledge_error_in_boundary(
        &mut self,
        arena: &mut FiberArena<Self::Props>,
        boundary: FiberId,
        error: &Self::Error,
    ) -> Result<(), Self::Error>;

    /// Drop any per-unit bookkeeping (e.g. a current-owner slot). Called
    /// after every unit of work.
    fn reset_current_owner(&mut self) {}
}
