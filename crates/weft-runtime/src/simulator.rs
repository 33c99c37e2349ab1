#![forbid(unsafe_code)]

//! Headless host and scripted reconciler.
//!
//! Drives a [`crate::Scheduler`] without any real host: [`SimHost`]
//! records callback requests instead of arming timers, and
//! [`SimReconciler`] renders declarative [`SimElement`] trees with naive
//! positional child diffing. Every host mutation lands in an op log, so
//! tests (and embedders experimenting with scheduling behavior) can
//! assert exactly what a commit did and in what order.
//!
//! Failure injection is part of the element model: an element can be an
//! error boundary, or be scripted to fail during begin, lifecycle, or
//! unmount.
//!
//! # Usage
//!
//! ```
//! use weft_runtime::Scheduler;
//! use weft_runtime::simulator::{SimElement, SimHost, SimReconciler, stage_tree};
//!
//! let mut sched = Scheduler::new(SimHost::new(), SimReconciler::new());
//! let root = sched.create_root("demo");
//!
//! let tree = SimElement::node("app").child(SimElement::node("label").payload("hi"));
//! stage_tree(&mut sched, root, tree);
//! sched.sync_updates(|s| s.schedule_work(root)).unwrap();
//!
//! assert!(sched.reconciler().is_attached("label"));
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use weft_core::{
    EffectTag, Fiber, FiberArena, FiberId, FiberTag, InstanceId, Priority, RootId, StateNode,
};

use crate::host::HostConfig;
use crate::reconciler::{Reconciler, TrappedError};
use crate::scheduler::Scheduler;

// ============================================================================
// Host
// ============================================================================

/// A host config that records callback requests instead of arming them.
#[derive(Debug, Default)]
pub struct SimHost {
    /// How many animation callbacks were requested.
    pub animation_requests: usize,
    /// How many deferred callbacks were requested.
    pub deferred_requests: usize,
    sync_scheduling: bool,
}

impl SimHost {
    /// A host with deferred default scheduling.
    pub fn new() -> Self {
        Self::default()
    }

    /// A host whose default priority context is synchronous.
    pub fn with_sync_scheduling() -> Self {
        Self {
            sync_scheduling: true,
            ..Self::default()
        }
    }
}

impl HostConfig for SimHost {
    type Container = &'static str;

    fn request_animation_callback(&mut self) {
        self.animation_requests += 1;
    }

    fn request_deferred_callback(&mut self) {
        self.deferred_requests += 1;
    }

    fn use_sync_scheduling(&self) -> bool {
        self.sync_scheduling
    }
}

// ============================================================================
// Element model
// ============================================================================

/// A declarative node in a scripted tree.
///
/// `name` is the node's identity for diffing (positional, by name);
/// `payload` is the mutable content an update rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimElement {
    /// Identity used by child diffing.
    pub name: String,
    /// Content applied to the host node on insert/update.
    pub payload: String,
    /// Whether this node absorbs errors from its subtree.
    pub boundary: bool,
    /// Run a lifecycle callback after this node's commit.
    pub with_callback: bool,
    /// Fail while beginning this node.
    pub fail_on_begin: bool,
    /// Fail in the commit lifecycle pass.
    pub fail_on_lifecycle: bool,
    /// Fail while being torn down.
    pub fail_on_unmount: bool,
    /// Child elements, in order.
    pub children: Vec<SimElement>,
}

impl SimElement {
    /// A plain node with an empty payload and no children.
    pub fn node(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: String::new(),
            boundary: false,
            with_callback: false,
            fail_on_begin: false,
            fail_on_lifecycle: false,
            fail_on_unmount: false,
            children: Vec::new(),
        }
    }

    /// Set the payload.
    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Mark this node as an error boundary.
    pub fn boundary(mut self) -> Self {
        self.boundary = true;
        self
    }

    /// Request a lifecycle callback after commit.
    pub fn with_callback(mut self) -> Self {
        self.with_callback = true;
        self
    }

    /// Script a begin-phase failure.
    pub fn fail_on_begin(mut self) -> Self {
        self.fail_on_begin = true;
        self
    }

    /// Script a lifecycle-phase failure.
    pub fn fail_on_lifecycle(mut self) -> Self {
        self.fail_on_lifecycle = true;
        self
    }

    /// Script an unmount failure.
    pub fn fail_on_unmount(mut self) -> Self {
        self.fail_on_unmount = true;
        self
    }

    /// Append one child.
    pub fn child(mut self, child: SimElement) -> Self {
        self.children.push(child);
        self
    }

    /// Replace the child list.
    pub fn children(mut self, children: Vec<SimElement>) -> Self {
        self.children = children;
        self
    }

    /// Equality ignoring children; decides whether a reused node needs an
    /// in-place update.
    fn shallow_eq(&self, other: &SimElement) -> bool {
        self.name == other.name
            && self.payload == other.payload
            && self.boundary == other.boundary
            && self.with_callback == other.with_callback
            && self.fail_on_begin == other.fail_on_begin
            && self.fail_on_lifecycle == other.fail_on_lifecycle
            && self.fail_on_unmount == other.fail_on_unmount
    }
}

// ============================================================================
// Errors and host ops
// ============================================================================

/// Which phase a scripted failure fired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimPhase {
    /// During `begin_work`.
    Begin,
    /// During the commit lifecycle pass.
    Lifecycle,
    /// During teardown in the commit mutation pass.
    Unmount,
}

impl fmt::Display for SimPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::Lifecycle => write!(f, "lifecycle"),
            Self::Unmount => write!(f, "unmount"),
        }
    }
}

/// A scripted user-code failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimError {
    /// Name of the node that failed.
    pub node: String,
    /// Phase the failure fired in.
    pub phase: SimPhase,
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node '{}' failed during {}", self.node, self.phase)
    }
}

impl std::error::Error for SimError {}

/// One host mutation or lifecycle call, in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    /// A node was attached.
    Insert { name: String },
    /// A node's payload was rewritten in place.
    Update { name: String },
    /// A node was torn down.
    Delete { name: String },
    /// A node's post-commit lifecycle ran.
    Lifecycle { name: String },
}

// ============================================================================
// Reconciler
// ============================================================================

/// A host-side node the simulator committed.
#[derive(Debug, Clone)]
struct SimNode {
    name: String,
    payload: String,
}

/// Scripted reconciler over [`SimElement`] trees.
///
/// Child diffing is positional by name: a child at the same index with
/// the same name is reused (and updated in place if anything but its
/// children changed); everything else is a placement plus a deletion.
/// There is no bailout: every flush re-renders from the staged or
/// memoized elements, which keeps the walk deterministic.
#[derive(Debug, Default)]
pub struct SimReconciler {
    next_instance: u64,
    /// Instance ids by tree path, stable across rebuilds of uncommitted
    /// trees so boundary state survives a failed mount.
    instances: HashMap<String, u64>,
    /// Committed host nodes by instance id.
    nodes: BTreeMap<u64, SimNode>,
    /// Boundaries that have absorbed an error.
    failed_boundaries: HashSet<u64>,
    /// `(boundary name, error)` pairs, in acknowledgement order.
    acknowledged: Vec<(String, SimError)>,
    /// Every host op, in commit order.
    ops: Vec<HostOp>,
    owner_resets: usize,
}

impl SimReconciler {
    /// A fresh reconciler with no committed nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// The op log so far.
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    /// Drain the op log.
    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Whether a node with `name` is currently attached.
    pub fn is_attached(&self, name: &str) -> bool {
        self.nodes.values().any(|n| n.name == name)
    }

    /// Payload of the attached node `name`, if any.
    pub fn payload_of(&self, name: &str) -> Option<&str> {
        self.nodes
            .values()
            .find(|n| n.name == name)
            .map(|n| n.payload.as_str())
    }

    /// Names of attached nodes, in instance-creation order.
    pub fn attached_names(&self) -> Vec<String> {
        self.nodes.values().map(|n| n.name.clone()).collect()
    }

    /// Boundary acknowledgements, in order.
    pub fn acknowledged(&self) -> &[(String, SimError)] {
        &self.acknowledged
    }

    /// How many units of work cleared the owner slot.
    pub fn owner_resets(&self) -> usize {
        self.owner_resets
    }

    fn element_of<'a>(
        arena: &'a FiberArena<SimElement>,
        fiber: FiberId,
    ) -> Option<&'a SimElement> {
        arena[fiber]
            .memoized_props
            .as_ref()
            .or(arena[fiber].pending_props.as_ref())
    }

    fn name_of(arena: &FiberArena<SimElement>, fiber: FiberId) -> String {
        if arena[fiber].tag == FiberTag::HostContainer {
            return "<root>".to_string();
        }
        Self::element_of(arena, fiber)
            .map(|el| el.name.clone())
            .unwrap_or_else(|| "<anon>".to_string())
    }

    /// Index-qualified path of `fiber` from its root, skipping the
    /// container. Paths key instance identity, so they must stay unique
    /// even between same-named siblings.
    fn path_of(arena: &FiberArena<SimElement>, fiber: FiberId) -> String {
        let mut parts = Vec::new();
        let mut node = fiber;
        while let Some(parent) = arena[node].parent {
            let index = arena
                .children(parent)
                .position(|c| c == node)
                .unwrap_or(0);
            let name = Self::element_of(arena, node)
                .map(|el| el.name.as_str())
                .unwrap_or("<anon>");
            parts.push(format!("{index}:{name}"));
            node = parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Nearest boundary strictly above `fiber` that has not itself
    /// failed.
    fn find_boundary_above(
        &self,
        arena: &FiberArena<SimElement>,
        fiber: FiberId,
    ) -> Option<FiberId> {
        let mut node = arena[fiber].parent;
        while let Some(n) = node {
            let is_boundary = Self::element_of(arena, n).is_some_and(|el| el.boundary);
            if is_boundary {
                if let StateNode::Instance(InstanceId(id)) = arena[n].state_node {
                    if !self.failed_boundaries.contains(&id) {
                        return Some(n);
                    }
                }
            }
            node = arena[n].parent;
        }
        None
    }

    fn trap(&self, arena: &FiberArena<SimElement>, at: FiberId, error: SimError) -> TrappedError<SimError> {
        match self.find_boundary_above(arena, at) {
            Some(boundary) => TrappedError::caught(boundary, error),
            None => TrappedError::uncaught(error),
        }
    }

    /// Positional-by-name child diff. Builds the work-in-progress child
    /// chain, marks placements/updates, and records deletions straight
    /// onto the parent's effect list.
    fn reconcile_children(
        &mut self,
        arena: &mut FiberArena<SimElement>,
        wip: FiberId,
        elements: &[SimElement],
        priority: Priority,
    ) -> Option<FiberId> {
        let old: Vec<FiberId> = match arena[wip].alternate {
            Some(current) => arena.children(current).collect(),
            None => Vec::new(),
        };
        let base_path = Self::path_of(arena, wip);

        let mut first: Option<FiberId> = None;
        let mut prev: Option<FiberId> = None;
        for (index, element) in elements.iter().enumerate() {
            let reusable = old.get(index).copied().filter(|&o| {
                Self::element_of(arena, o).is_some_and(|el| el.name == element.name)
            });
            let child = match reusable {
                Some(o) => arena.clone_fiber(o, priority),
                None => {
                    let path = format!("{base_path}/{index}:{}", element.name);
                    let next_instance = &mut self.next_instance;
                    let id = *self.instances.entry(path).or_insert_with(|| {
                        *next_instance += 1;
                        *next_instance
                    });
                    let tag = if element.boundary {
                        FiberTag::Component
                    } else {
                        FiberTag::HostComponent
                    };
                    let mut fiber = Fiber::new(tag);
                    fiber.state_node = StateNode::Instance(InstanceId(id));
                    fiber.pending_work_priority = priority;
                    fiber.effect_tag = EffectTag::PLACEMENT;
                    arena.alloc(fiber)
                }
            };
            if element.with_callback {
                arena[child].effect_tag.insert(EffectTag::CALLBACK);
            }
            arena[child].pending_props = Some(element.clone());
            arena[child].parent = Some(wip);
            arena[child].sibling = None;
            match prev {
                Some(p) => arena[p].sibling = Some(child),
                None => first = Some(child),
            }
            prev = Some(child);
        }

        // Old children with no counterpart in the new set die here; their
        // deletion effects go first on the parent's list so teardown
        // precedes sibling mutations.
        for (index, &o) in old.iter().enumerate() {
            let reused = index < elements.len()
                && Self::element_of(arena, o)
                    .is_some_and(|el| el.name == elements[index].name);
            if !reused {
                arena[o].effect_tag = EffectTag::DELETION;
                arena.push_effect(wip, o);
            }
        }

        arena[wip].child = first;
        arena[wip].progressed_child = first;
        first
    }

    /// Tear down a deleted subtree, collecting scripted unmount failures.
    fn delete_subtree(
        &mut self,
        arena: &FiberArena<SimElement>,
        fiber: FiberId,
        errors: &mut Vec<TrappedError<SimError>>,
    ) {
        let element = Self::element_of(arena, fiber).cloned();
        if let Some(el) = &element {
            if el.fail_on_unmount {
                let error = SimError {
                    node: el.name.clone(),
                    phase: SimPhase::Unmount,
                };
                errors.push(self.trap(arena, fiber, error));
            }
        }
        if let StateNode::Instance(InstanceId(id)) = arena[fiber].state_node {
            if self.nodes.remove(&id).is_some() {
                if let Some(el) = &element {
                    self.ops.push(HostOp::Delete {
                        name: el.name.clone(),
                    });
                }
            }
        }
        let mut child = arena[fiber].child;
        while let Some(c) = child {
            self.delete_subtree(arena, c, errors);
            child = arena[c].sibling;
        }
    }
}

impl Reconciler for SimReconciler {
    type Props = SimElement;
    type Error = SimError;

    fn begin_work(
        &mut self,
        arena: &mut FiberArena<SimElement>,
        _current: Option<FiberId>,
        work_in_progress: FiberId,
        priority: Priority,
    ) -> Result<Option<FiberId>, SimError> {
        // Queued updates override whatever props the parent passed down;
        // both beat re-rendering from memoized state.
        let element = arena[work_in_progress]
            .update_queue
            .last()
            .cloned()
            .or_else(|| arena[work_in_progress].pending_props.clone())
            .or_else(|| arena[work_in_progress].memoized_props.clone());
        let Some(element) = element else {
            return Ok(None);
        };

        if element.fail_on_begin && arena[work_in_progress].tag != FiberTag::HostContainer {
            return Err(SimError {
                node: element.name.clone(),
                phase: SimPhase::Begin,
            });
        }

        // A reused node diffs itself against its committed counterpart.
        if let Some(current) = arena[work_in_progress].alternate {
            let changed = arena[current]
                .memoized_props
                .as_ref()
                .map_or(true, |m| !m.shallow_eq(&element));
            if changed && arena[work_in_progress].tag != FiberTag::HostContainer {
                arena[work_in_progress]
                    .effect_tag
                    .insert(EffectTag::UPDATE);
            }
        }

        arena[work_in_progress].memoized_props = Some(element.clone());

        if arena[work_in_progress].tag == FiberTag::HostContainer {
            // The container renders the staged element as its only child.
            return Ok(self.reconcile_children(
                arena,
                work_in_progress,
                std::slice::from_ref(&element),
                priority,
            ));
        }

        let failed = match arena[work_in_progress].state_node {
            StateNode::Instance(InstanceId(id)) => self.failed_boundaries.contains(&id),
            _ => false,
        };
        let children: &[SimElement] = if element.boundary && failed {
            // A failed boundary renders its fallback: nothing.
            &[]
        } else {
            &element.children
        };
        let children = children.to_vec();
        Ok(self.reconcile_children(arena, work_in_progress, &children, priority))
    }

    fn complete_work(
        &mut self,
        _arena: &mut FiberArena<SimElement>,
        _current: Option<FiberId>,
        _work_in_progress: FiberId,
    ) -> Result<Option<FiberId>, SimError> {
        // Instances were assigned during reconcile; nothing to finalize.
        Ok(None)
    }

    fn commit_insertion(&mut self, arena: &mut FiberArena<SimElement>, fiber: FiberId) {
        if let StateNode::Instance(InstanceId(id)) = arena[fiber].state_node {
            if let Some(el) = Self::element_of(arena, fiber) {
                self.nodes.insert(
                    id,
                    SimNode {
                        name: el.name.clone(),
                        payload: el.payload.clone(),
                    },
                );
                self.ops.push(HostOp::Insert {
                    name: el.name.clone(),
                });
            }
        }
    }

    fn commit_work(
        &mut self,
        arena: &mut FiberArena<SimElement>,
        _current: Option<FiberId>,
        fiber: FiberId,
    ) {
        let name = Self::name_of(arena, fiber);
        if let StateNode::Instance(InstanceId(id)) = arena[fiber].state_node {
            if let Some(el) = Self::element_of(arena, fiber) {
                let payload = el.payload.clone();
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.payload = payload;
                }
            }
        }
        self.ops.push(HostOp::Update { name });
    }

    fn commit_deletion(
        &mut self,
        arena: &mut FiberArena<SimElement>,
        fiber: FiberId,
    ) -> Vec<TrappedError<SimError>> {
        let mut errors = Vec::new();
        self.delete_subtree(arena, fiber, &mut errors);
        errors
    }

    fn commit_lifecycles(
        &mut self,
        arena: &mut FiberArena<SimElement>,
        _current: Option<FiberId>,
        fiber: FiberId,
    ) -> Option<TrappedError<SimError>> {
        let name = Self::name_of(arena, fiber);
        if let Some(el) = Self::element_of(arena, fiber) {
            if el.fail_on_lifecycle {
                let error = SimError {
                    node: el.name.clone(),
                    phase: SimPhase::Lifecycle,
                };
                return Some(self.trap(arena, fiber, error));
            }
        }
        self.ops.push(HostOp::Lifecycle { name });
        None
    }

    fn trap_error(
        &mut self,
        arena: &FiberArena<SimElement>,
        failed: FiberId,
        error: SimError,
    ) -> TrappedError<SimError> {
        self.trap(arena, failed, error)
    }

    fn acknowledge_error_in_boundary(
        &mut self,
        arena: &mut FiberArena<SimElement>,
        boundary: FiberId,
        error: &SimError,
    ) -> Result<(), SimError> {
        if let StateNode::Instance(InstanceId(id)) = arena[boundary].state_node {
            self.failed_boundaries.insert(id);
        }
        let name = Self::name_of(arena, boundary);
        self.acknowledged.push((name, error.clone()));
        Ok(())
    }

    fn reset_current_owner(&mut self) {
        self.owner_resets += 1;
    }
}

// ============================================================================
// Driving helpers
// ============================================================================

/// Stage `element` as the next tree for `root`. Takes effect on the next
/// scheduled flush.
pub fn stage_tree<H: HostConfig>(
    scheduler: &mut Scheduler<H, SimReconciler>,
    root: RootId,
    element: SimElement,
) {
    let current = scheduler.root_current(root);
    scheduler.arena_mut()[current].pending_props = Some(element);
}

/// Queue `element` as an update on `fiber`, to be picked up when that
/// fiber next begins.
pub fn stage_update<H: HostConfig>(
    scheduler: &mut Scheduler<H, SimReconciler>,
    fiber: FiberId,
    element: SimElement,
) {
    scheduler.arena_mut()[fiber].update_queue.push(element);
}

/// Find the committed fiber named `name` under `root`, if any.
pub fn find_committed<H: HostConfig>(
    scheduler: &Scheduler<H, SimReconciler>,
    root: RootId,
    name: &str,
) -> Option<FiberId> {
    let arena = scheduler.arena();
    let mut stack = vec![scheduler.root_current(root)];
    while let Some(fiber) = stack.pop() {
        if arena[fiber].tag != FiberTag::HostContainer
            && arena[fiber]
                .memoized_props
                .as_ref()
                .is_some_and(|el| el.name == name)
        {
            return Some(fiber);
        }
        let mut child = arena[fiber].child;
        while let Some(c) = child {
            stack.push(c);
            child = arena[c].sibling;
        }
    }
    None
}
