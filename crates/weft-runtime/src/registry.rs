#![forbid(unsafe_code)]

//! Scheduled-root chain.
//!
//! Roots with pending work form a singly-linked chain threaded through
//! their `next_scheduled_root` fields, in enqueue order. The chain is
//! scanned to pick the most urgent root; leading roots whose trees have
//! drained are detached lazily during that scan.
//!
//! Membership is tracked by the root's `is_scheduled` flag, so enqueueing
//! is idempotent and costs no allocation.

use weft_core::{FiberArena, Priority, RootId, RootStore};

/// Head/tail anchors of the scheduled-root chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScheduledRoots {
    first: Option<RootId>,
    last: Option<RootId>,
}

impl ScheduledRoots {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// The root at the head of the chain, if any.
    #[inline]
    pub fn head(&self) -> Option<RootId> {
        self.first
    }

    /// Whether the chain holds no roots at all.
    #[inline]
    pub fn is_chain_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Add `root` to the chain (idempotent) and raise the pending
    /// priority recorded on its current fiber.
    ///
    /// The priority only ever becomes more urgent here; it relaxes again
    /// when the tree completes and its remaining work is re-summarized.
    pub fn enqueue<C, P>(
        &mut self,
        roots: &mut RootStore<C>,
        arena: &mut FiberArena<P>,
        root: RootId,
        priority: Priority,
    ) {
        if !roots[root].is_scheduled {
            roots[root].is_scheduled = true;
            roots[root].next_scheduled_root = None;
            match self.last {
                Some(last) => roots[last].next_scheduled_root = Some(root),
                None => self.first = Some(root),
            }
            self.last = Some(root);
        }
        let current = roots[root].current;
        let raised = arena[current].pending_work_priority.raise(priority);
        arena[current].pending_work_priority = raised;
    }

    /// Detach drained leading roots, then return the most urgent
    /// remaining root and its priority. Ties go to the earliest-enqueued
    /// root. Returns `None` when no chained root has work.
    pub fn find_highest<C, P>(
        &mut self,
        roots: &mut RootStore<C>,
        arena: &FiberArena<P>,
    ) -> Option<(RootId, Priority)> {
        while let Some(head) = self.first {
            if arena[roots[head].current].pending_work_priority.is_work() {
                break;
            }
            roots[head].is_scheduled = false;
            self.first = roots[head].next_scheduled_root.take();
            if self.first.is_none() {
                self.last = None;
            }
        }

        let mut best: Option<(RootId, Priority)> = None;
        let mut cursor = self.first;
        while let Some(root) = cursor {
            let priority = arena[roots[root].current].pending_work_priority;
            if priority.is_work() && best.map_or(true, |(_, b)| priority < b) {
                best = Some((root, priority));
            }
            cursor = roots[root].next_scheduled_root;
        }
        best
    }

    /// Whether any chained root still has pending work.
    pub fn has_work<C, P>(&self, roots: &RootStore<C>, arena: &FiberArena<P>) -> bool {
        let mut cursor = self.first;
        while let Some(root) = cursor {
            if arena[roots[root].current].pending_work_priority.is_work() {
                return true;
            }
            cursor = roots[root].next_scheduled_root;
        }
        false
    }

    /// Drop every root from the chain, clearing membership flags so the
    /// roots can be scheduled again from scratch.
    pub fn quiesce<C>(&mut self, roots: &mut RootStore<C>) {
        let mut cursor = self.first.take();
        while let Some(root) = cursor {
            roots[root].is_scheduled = false;
            cursor = roots[root].next_scheduled_root.take();
        }
        self.last = None;
    }
}
