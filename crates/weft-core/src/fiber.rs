#![forbid(unsafe_code)]

//! Arena-backed fiber tree.
//!
//! A fiber is one unit of reconciliation work. Fibers form two trees per
//! root: the *current* tree (last committed) and the *work-in-progress*
//! tree (being built), paired node-for-node through `alternate` links.
//!
//! # Storage
//!
//! Parent/child/alternate/effect links are cyclic, so fibers never own
//! each other. All fibers live in a [`FiberArena`] (a growable vector of
//! slots) and every link is a [`FiberId`] index. Ids are handed out by
//! [`FiberArena::alloc`] and stay valid for the life of the arena; slots
//! are never freed or recycled, so an id can go unreachable but never
//! dangle.
//!
//! # Link invariants
//!
//! - `alternate` is an involution: if `a.alternate == Some(b)` then
//!   `b.alternate == Some(a)`.
//! - `parent` is `None` exactly on `HostContainer` fibers.
//! - `first_effect`/`last_effect` anchor a singly-linked list (through
//!   `next_effect`) of this subtree's fibers with a non-empty
//!   [`EffectTag`], children before parents.

use std::fmt;
use std::ops::{Index, IndexMut};

use crate::effect::EffectTag;
use crate::priority::Priority;
use crate::root::RootId;

/// Index of a fiber inside its [`FiberArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u32);

impl FiberId {
    /// Position in the arena's slot vector.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber#{}", self.0)
    }
}

/// Opaque handle to a host-side instance, assigned by the host layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u64);

/// Variant discriminator for a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberTag {
    /// The root of a tree, backed by a [`crate::root::FiberRoot`].
    HostContainer,
    /// A host element with a host-side instance.
    HostComponent,
    /// A host text node.
    HostText,
    /// A composite (user-defined) component.
    Component,
    /// A grouping node with no host presence.
    Fragment,
}

/// What `state_node` points at for a given fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateNode {
    /// Nothing attached yet (fragments, unmounted composites).
    None,
    /// The root descriptor; only valid on `HostContainer` fibers.
    Root(RootId),
    /// A host or component instance owned by the host layer.
    Instance(InstanceId),
}

/// One reconciliation work unit.
///
/// `P` is the reconciler's props payload. The scheduler never inspects
/// it; it only clears `pending_props`/`update_queue` when a fiber
/// completes.
#[derive(Debug)]
pub struct Fiber<P> {
    /// Variant discriminator.
    pub tag: FiberTag,
    /// Host instance or root descriptor backing this fiber.
    pub state_node: StateNode,
    /// Parent in the work-in-progress tree. `None` iff `HostContainer`.
    pub parent: Option<FiberId>,
    /// First child.
    pub child: Option<FiberId>,
    /// Next sibling under the same parent.
    pub sibling: Option<FiberId>,
    /// Paired fiber in the other buffer.
    pub alternate: Option<FiberId>,
    /// Props for the next begin pass; cleared on completion.
    pub pending_props: Option<P>,
    /// Queued state updates for the next begin pass; cleared on completion.
    pub update_queue: Vec<P>,
    /// Props as of the last completed render.
    pub memoized_props: Option<P>,
    /// First child of the most recently progressed child set.
    pub progressed_child: Option<FiberId>,
    /// Most urgent pending work in this subtree.
    pub pending_work_priority: Priority,
    /// Side effects this fiber's commit will perform.
    pub effect_tag: EffectTag,
    /// Head of this subtree's effect list.
    pub first_effect: Option<FiberId>,
    /// Tail of this subtree's effect list.
    pub last_effect: Option<FiberId>,
    /// Next fiber in the enclosing effect list.
    pub next_effect: Option<FiberId>,
}

impl<P> Fiber<P> {
    /// A fresh, unlinked fiber with no pending work.
    pub fn new(tag: FiberTag) -> Self {
        Self {
            tag,
            state_node: StateNode::None,
            parent: None,
            child: None,
            sibling: None,
            alternate: None,
            pending_props: None,
            update_queue: Vec::new(),
            memoized_props: None,
            progressed_child: None,
            pending_work_priority: Priority::NoWork,
            effect_tag: EffectTag::empty(),
            first_effect: None,
            last_effect: None,
            next_effect: None,
        }
    }
}

/// Slot storage for every fiber of a scheduler instance, both buffers.
///
/// The arena owns the storage; fibers reference each other by [`FiberId`].
/// Indexing with an id from a different arena is a logic error and will
/// panic or alias another fiber.
#[derive(Debug, Default)]
pub struct FiberArena<P> {
    fibers: Vec<Fiber<P>>,
}

impl<P> FiberArena<P> {
    /// An empty arena.
    pub fn new() -> Self {
        Self { fibers: Vec::new() }
    }

    /// An empty arena with room for `capacity` fibers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fibers: Vec::with_capacity(capacity),
        }
    }

    /// Number of fibers ever allocated.
    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    /// Whether no fiber has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    /// Store a fiber and return its id.
    pub fn alloc(&mut self, fiber: Fiber<P>) -> FiberId {
        let id = FiberId(self.fibers.len() as u32);
        self.fibers.push(fiber);
        #[cfg(feature = "tracing")]
        tracing::trace!(fiber = id.index(), tag = ?self[id].tag, "fiber allocated");
        id
    }

    /// Fallible lookup; prefer indexing when the id is known-valid.
    pub fn get(&self, id: FiberId) -> Option<&Fiber<P>> {
        self.fibers.get(id.index())
    }

    /// Iterate every fiber ever allocated, in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (FiberId, &Fiber<P>)> {
        self.fibers
            .iter()
            .enumerate()
            .map(|(i, f)| (FiberId(i as u32), f))
    }

    /// Iterate the child chain of `fiber` (first child, then siblings).
    pub fn children(&self, fiber: FiberId) -> impl Iterator<Item = FiberId> + '_ {
        std::iter::successors(self[fiber].child, move |&c| self[c].sibling)
    }

    /// Iterate the effect list anchored at `owner`, in list order.
    pub fn effects(&self, owner: FiberId) -> impl Iterator<Item = FiberId> + '_ {
        std::iter::successors(self[owner].first_effect, move |&f| self[f].next_effect)
    }

    /// Raise the pending priority of `fiber` and its alternate.
    ///
    /// Raising only ever makes work more urgent; relaxation happens
    /// exclusively through [`FiberArena::reset_work_priority`].
    pub fn raise_pending_priority(&mut self, fiber: FiberId, priority: Priority) {
        let raised = self[fiber].pending_work_priority.raise(priority);
        self[fiber].pending_work_priority = raised;
        if let Some(alt) = self[fiber].alternate {
            let raised = self[alt].pending_work_priority.raise(priority);
            self[alt].pending_work_priority = raised;
        }
    }

    /// Recompute `fiber`'s pending priority from its progressed children.
    ///
    /// Runs at complete time, once the fiber's own inputs are consumed:
    /// whatever urgency remains in the subtree is the most urgent pending
    /// level among the progressed child set, or `NoWork` if none.
    pub fn reset_work_priority(&mut self, fiber: FiberId) {
        let mut priority = Priority::NoWork;
        let mut child = self[fiber].progressed_child;
        while let Some(c) = child {
            priority = priority.raise(self[c].pending_work_priority);
            child = self[c].sibling;
        }
        self[fiber].pending_work_priority = priority;
    }

    /// Consume a completed fiber's inputs.
    pub fn clear_completed_inputs(&mut self, fiber: FiberId) {
        let f = &mut self[fiber];
        f.pending_props = None;
        f.update_queue.clear();
    }

    /// Append `fiber` to the effect list anchored at `owner`.
    pub fn push_effect(&mut self, owner: FiberId, fiber: FiberId) {
        self[fiber].next_effect = None;
        match self[owner].last_effect {
            Some(last) => self[last].next_effect = Some(fiber),
            None => self[owner].first_effect = Some(fiber),
        }
        self[owner].last_effect = Some(fiber);
    }

    /// Merge a completed child's effect list into its parent.
    ///
    /// The child's effects keep their order and land after anything the
    /// parent already accumulated (earlier siblings, deletions). If the
    /// child itself has effects, it is appended after its own children,
    /// preserving the children-before-parents commit order.
    pub fn splice_child_effects(&mut self, parent: FiberId, completed: FiberId) {
        let child_first = self[completed].first_effect;
        let child_last = self[completed].last_effect;
        if self[parent].first_effect.is_none() {
            self[parent].first_effect = child_first;
        }
        if let Some(last) = child_last {
            if let Some(parent_last) = self[parent].last_effect {
                self[parent_last].next_effect = child_first;
            }
            self[parent].last_effect = Some(last);
        }
        if !self[completed].effect_tag.is_empty() {
            self.push_effect(parent, completed);
        }
    }
}

impl<P: Clone> FiberArena<P> {
    /// Allocate or reuse the alternate of `fiber` as a fresh
    /// work-in-progress node at the given priority.
    ///
    /// On reuse, effect bookkeeping from the previous frame is wiped.
    /// Structural links and props are copied from the source buffer; the
    /// begin phase overwrites children as it reconciles.
    pub fn clone_fiber(&mut self, fiber: FiberId, priority: Priority) -> FiberId {
        let wip = match self[fiber].alternate {
            Some(existing) => {
                let alt = &mut self[existing];
                alt.effect_tag = EffectTag::empty();
                alt.first_effect = None;
                alt.last_effect = None;
                alt.next_effect = None;
                existing
            }
            None => {
                let mut fresh = Fiber::new(self[fiber].tag);
                fresh.alternate = Some(fiber);
                let wip = self.alloc(fresh);
                self[fiber].alternate = Some(wip);
                wip
            }
        };

        let src = &self[fiber];
        let tag = src.tag;
        let state_node = src.state_node;
        let parent = src.parent;
        let child = src.child;
        let sibling = src.sibling;
        let progressed_child = src.progressed_child;
        let pending_props = src.pending_props.clone();
        let memoized_props = src.memoized_props.clone();
        let update_queue = src.update_queue.clone();

        let dst = &mut self[wip];
        dst.tag = tag;
        dst.state_node = state_node;
        dst.parent = parent;
        dst.child = child;
        dst.sibling = sibling;
        dst.progressed_child = progressed_child;
        dst.pending_props = pending_props;
        dst.memoized_props = memoized_props;
        dst.update_queue = update_queue;
        dst.pending_work_priority = priority;
        wip
    }
}

impl<P> Index<FiberId> for FiberArena<P> {
    type Output = Fiber<P>;

    #[inline]
    fn index(&self, id: FiberId) -> &Fiber<P> {
        &self.fibers[id.index()]
    }
}

impl<P> IndexMut<FiberId> for FiberArena<P> {
    #[inline]
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber<P> {
        &mut self.fibers[id.index()]
    }
}
