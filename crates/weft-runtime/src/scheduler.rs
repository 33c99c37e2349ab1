#![forbid(unsafe_code)]

//! The cooperative scheduler.
//!
//! One [`Scheduler`] owns the fiber arena, the root stores, and every
//! cursor the work loop needs. Work arrives through the scheduling
//! surface (`schedule_work`, `schedule_update`, `schedule_deferred_work`)
//! and drains through three entry points with different termination
//! rules:
//!
//! | Entry point | Keeps going while |
//! |---|---|
//! | `perform_synchronous_work` | next level is `Sync` |
//! | `perform_animation_work` | next level is at most `Animation` |
//! | `perform_deferred_work` | the deadline has budget left |
//!
//! A unit of work is atomic: begin, and if no child is spawned, complete
//! upward. Completion splices effect lists toward the root; finishing the
//! root flips `root.current` and runs the commit engine. Commit is the
//! one uninterruptible section: both passes run back-to-back with no
//! work-loop iteration in between, and errors raised inside are collected
//! rather than thrown so a half-applied tree can never be observed.
//!
//! # Preemption
//!
//! Scheduling work at priority `p` invalidates the work-in-progress
//! cursor whenever `p` is at least as urgent as the level being worked,
//! forcing the next iteration to rescan roots. The abandoned
//! work-in-progress tree costs nothing: the next clone starts from
//! `root.current` again.
//!
//! # Error routing
//!
//! User errors from begin/complete are trapped at the in-flight unit and
//! routed to the nearest boundary; commit errors are collected during the
//! passes and routed after the commit finishes. The pipeline itself is an
//! iterative worklist: re-renders it drives hand new failures back to
//! the worklist instead of recursing.

use std::fmt;
use std::mem;

use tracing::{debug, debug_span, warn};

use weft_core::{
    EffectTag, Fiber, FiberArena, FiberId, FiberRoot, FiberTag, Priority, RootId, RootStore,
    StateNode,
};

use crate::host::{Deadline, HostConfig};
use crate::reconciler::{Reconciler, TrappedError};
use crate::registry::ScheduledRoots;
use crate::trace::{CallbackKind, SchedEvent, SchedTrace};

/// Default idle budget below which the deferred loop yields, in ms.
const DEFAULT_DEFERRED_TIME_HEURISTIC_MS: f64 = 1.0;

/// Default trace ring capacity.
const DEFAULT_TRACE_CAPACITY: usize = 1024;

/// Tunables for a scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minimum remaining idle budget (ms) required to start another unit
    /// of work in the deferred path. Default: 1.0.
    pub deferred_time_heuristic_ms: f64,

    /// Record a [`SchedTrace`] of scheduler events. Default: false.
    pub trace_enabled: bool,

    /// Trace ring capacity (0 = unbounded). Default: 1024.
    pub trace_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            deferred_time_heuristic_ms: DEFAULT_DEFERRED_TIME_HEURISTIC_MS,
            trace_enabled: false,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}

/// A structural invariant the scheduler itself violated or observed
/// violated. These are not user errors; they indicate a corrupted tree
/// and abort the operation that hit them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A finished tree was handed to commit while already current.
    DoubleCommit,
    /// A parentless fiber that is not a host container was reached while
    /// walking to a root.
    NotAContainer,
    /// A host-container fiber carries no root descriptor.
    MissingRootDescriptor,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoubleCommit => write!(f, "cannot commit the same tree twice"),
            Self::NotAContainer => {
                write!(f, "reached a parentless fiber that is not a host container")
            }
            Self::MissingRootDescriptor => {
                write!(f, "host container fiber has no root descriptor")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// Terminal failure of a scheduling or flush operation.
#[derive(Debug, PartialEq, Eq)]
pub enum SchedulerError<E> {
    /// A user error reached the top with no boundary to absorb it. The
    /// scheduled-root chain has been dropped; roots must be re-scheduled.
    Uncaught(E),
    /// A structural invariant was violated.
    Invariant(InvariantViolation),
}

impl<E: fmt::Display> fmt::Display for SchedulerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncaught(error) => write!(f, "uncaught error left the tree: {error}"),
            Self::Invariant(violation) => write!(f, "scheduler invariant violated: {violation}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for SchedulerError<E> {}

/// Why the inner work loop stopped early. Internal to the driver.
enum Fault<E> {
    /// Begin or complete returned a user error; trap at the cursor.
    User(E),
    /// A commit collected trapped errors that now need the pipeline.
    Trapped(Vec<TrappedError<E>>),
    /// Structural violation; abort.
    Fatal(InvariantViolation),
}

/// Which entry point is driving the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkMode {
    Sync,
    Animation,
    Deferred,
}

/// The reconciliation scheduler.
///
/// Single-threaded and cooperative: all host callbacks must re-enter on
/// the same logical agent that owns this value.
pub struct Scheduler<H: HostConfig, R: Reconciler> {
    host: H,
    reconciler: R,
    config: SchedulerConfig,

    arena: FiberArena<R::Props>,
    roots: RootStore<H::Container>,
    scheduled: ScheduledRoots,

    next_unit_of_work: Option<FiberId>,
    next_priority_level: Priority,
    priority_context: Priority,
    should_batch_updates: bool,
    is_animation_callback_scheduled: bool,
    is_deferred_callback_scheduled: bool,

    pending_commit_errors: Vec<TrappedError<R::Error>>,
    trace: Option<SchedTrace>,
}

// ============================================================================
// Construction and introspection
// ============================================================================

impl<H: HostConfig, R: Reconciler> Scheduler<H, R> {
    /// A scheduler with default configuration.
    pub fn new(host: H, reconciler: R) -> Self {
        Self::with_config(host, reconciler, SchedulerConfig::default())
    }

    /// A scheduler with explicit configuration.
    pub fn with_config(host: H, reconciler: R, config: SchedulerConfig) -> Self {
        let priority_context = if host.use_sync_scheduling() {
            Priority::Sync
        } else {
            Priority::Low
        };
        let trace = config
            .trace_enabled
            .then(|| SchedTrace::new(config.trace_capacity));
        Self {
            host,
            reconciler,
            config,
            arena: FiberArena::new(),
            roots: RootStore::new(),
            scheduled: ScheduledRoots::new(),
            next_unit_of_work: None,
            next_priority_level: Priority::NoWork,
            priority_context,
            should_batch_updates: false,
            is_animation_callback_scheduled: false,
            is_deferred_callback_scheduled: false,
            pending_commit_errors: Vec::new(),
            trace,
        }
    }

    /// Create a root for `container` and return its id.
    pub fn create_root(&mut self, container: H::Container) -> RootId {
        let fiber = self.arena.alloc(Fiber::new(FiberTag::HostContainer));
        let root = self.roots.alloc(FiberRoot::new(fiber, container));
        self.arena[fiber].state_node = StateNode::Root(root);
        debug!(root = root.index(), "root created");
        root
    }

    /// The host config.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable host config access.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// The reconciler.
    pub fn reconciler(&self) -> &R {
        &self.reconciler
    }

    /// Mutable reconciler access.
    pub fn reconciler_mut(&mut self) -> &mut R {
        &mut self.reconciler
    }

    /// The fiber arena.
    pub fn arena(&self) -> &FiberArena<R::Props> {
        &self.arena
    }

    /// Mutable arena access, for staging props and updates onto fibers.
    pub fn arena_mut(&mut self) -> &mut FiberArena<R::Props> {
        &mut self.arena
    }

    /// The committed root fiber for `root`.
    pub fn root_current(&self, root: RootId) -> FiberId {
        self.roots[root].current
    }

    /// The host container handle for `root`.
    pub fn container(&self, root: RootId) -> &H::Container {
        &self.roots[root].container_info
    }

    /// Priority of the tree currently being worked, `NoWork` if idle.
    pub fn next_priority_level(&self) -> Priority {
        self.next_priority_level
    }

    /// The in-flight work-in-progress cursor.
    pub fn next_unit_of_work(&self) -> Option<FiberId> {
        self.next_unit_of_work
    }

    /// The priority new updates are scheduled at.
    pub fn priority_context(&self) -> Priority {
        self.priority_context
    }

    /// Whether an animation callback is outstanding with the host.
    pub fn is_animation_callback_scheduled(&self) -> bool {
        self.is_animation_callback_scheduled
    }

    /// Whether a deferred callback is outstanding with the host.
    pub fn is_deferred_callback_scheduled(&self) -> bool {
        self.is_deferred_callback_scheduled
    }

    /// Head of the scheduled-root chain, if any.
    pub fn scheduled_head(&self) -> Option<RootId> {
        self.scheduled.head()
    }

    /// Whether the scheduled-root chain holds no roots.
    pub fn registry_is_empty(&self) -> bool {
        self.scheduled.is_chain_empty()
    }

    /// Whether any work remains anywhere (cursor or scheduled roots).
    pub fn has_pending_work(&self) -> bool {
        self.next_unit_of_work.is_some() || self.scheduled.has_work(&self.roots, &self.arena)
    }

    /// The event trace, when enabled.
    pub fn trace(&self) -> Option<&SchedTrace> {
        self.trace.as_ref()
    }

    /// Mutable trace access (e.g. to clear between test phases).
    pub fn trace_mut(&mut self) -> Option<&mut SchedTrace> {
        self.trace.as_mut()
    }

    #[inline]
    fn record(&mut self, event: SchedEvent) {
        if let Some(trace) = self.trace.as_mut() {
            trace.record(event);
        }
    }
}

// ============================================================================
// Scheduling surface
// ============================================================================

impl<H: HostConfig, R: Reconciler> Scheduler<H, R> {
    /// Schedule `root` at the current priority context.
    pub fn schedule_work(&mut self, root: RootId) -> Result<(), SchedulerError<R::Error>> {
        self.schedule_work_at_priority(root, self.priority_context)
    }

    /// Schedule `root` at an explicit priority, ensuring a deferred
    /// callback rather than dispatching by level.
    pub fn schedule_deferred_work(&mut self, root: RootId, priority: Priority) {
        if !priority.is_work() {
            return;
        }
        self.record(SchedEvent::RootScheduled {
            root: root.index() as u32,
            priority: priority.as_str(),
        });
        self.invalidate_cursor_for(priority);
        self.scheduled
            .enqueue(&mut self.roots, &mut self.arena, root, priority);
        self.ensure_deferred_callback();
    }

    /// Schedule the root above `fiber` at the current priority context,
    /// raising the pending priority of every fiber on the path (and its
    /// alternate).
    pub fn schedule_update(&mut self, fiber: FiberId) -> Result<(), SchedulerError<R::Error>> {
        let priority = self.priority_context;
        let mut node = fiber;
        loop {
            self.arena.raise_pending_priority(node, priority);
            match self.arena[node].parent {
                Some(parent) => node = parent,
                None => break,
            }
        }
        if self.arena[node].tag != FiberTag::HostContainer {
            return Err(SchedulerError::Invariant(InvariantViolation::NotAContainer));
        }
        let StateNode::Root(root) = self.arena[node].state_node else {
            return Err(SchedulerError::Invariant(
                InvariantViolation::MissingRootDescriptor,
            ));
        };
        self.schedule_work_at_priority(root, priority)
    }

    /// Run `f` with the priority context replaced by `priority`,
    /// restoring the previous context on every exit path.
    pub fn perform_with_priority<T>(
        &mut self,
        priority: Priority,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        let previous = mem::replace(&mut self.priority_context, priority);
        let result = f(self);
        self.priority_context = previous;
        result
    }

    /// Run `f` with a synchronous priority context.
    pub fn sync_updates<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.perform_with_priority(Priority::Sync, f)
    }

    /// Run `f` with synchronous flushes suppressed; the outermost batch
    /// flushes once on exit.
    pub fn batched_updates<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> T,
    ) -> Result<T, SchedulerError<R::Error>> {
        let previous = mem::replace(&mut self.should_batch_updates, true);
        let result = f(self);
        self.should_batch_updates = previous;
        if !previous {
            self.perform_synchronous_work()?;
        }
        Ok(result)
    }

    fn schedule_work_at_priority(
        &mut self,
        root: RootId,
        priority: Priority,
    ) -> Result<(), SchedulerError<R::Error>> {
        if !priority.is_work() {
            return Ok(());
        }
        self.record(SchedEvent::RootScheduled {
            root: root.index() as u32,
            priority: priority.as_str(),
        });
        debug!(root = root.index(), %priority, "work scheduled");
        self.invalidate_cursor_for(priority);
        self.scheduled
            .enqueue(&mut self.roots, &mut self.arena, root, priority);
        match priority {
            Priority::Sync => {
                // Flush right away only if this root is next in line and
                // nothing is batching; otherwise an outstanding callback
                // or the batch exit picks it up.
                if !self.should_batch_updates && self.scheduled.head() == Some(root) {
                    self.perform_synchronous_work()?;
                }
            }
            Priority::Animation => self.ensure_animation_callback(),
            _ => self.ensure_deferred_callback(),
        }
        Ok(())
    }

    /// Incoming work at `priority` preempts a less urgent tree at the
    /// next unit boundary: drop the cursor so the loop rescans roots.
    fn invalidate_cursor_for(&mut self, priority: Priority) {
        if priority <= self.next_priority_level {
            self.next_unit_of_work = None;
        }
    }

    fn ensure_animation_callback(&mut self) {
        if !self.is_animation_callback_scheduled {
            self.is_animation_callback_scheduled = true;
            self.record(SchedEvent::CallbackRequested {
                kind: CallbackKind::Animation,
            });
            self.host.request_animation_callback();
        }
    }

    fn ensure_deferred_callback(&mut self) {
        if !self.is_deferred_callback_scheduled {
            self.is_deferred_callback_scheduled = true;
            self.record(SchedEvent::CallbackRequested {
                kind: CallbackKind::Deferred,
            });
            self.host.request_deferred_callback();
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

impl<H: HostConfig, R: Reconciler> Scheduler<H, R> {
    /// Drain synchronous work, then hand any leftover levels to the
    /// matching host callback.
    pub fn perform_synchronous_work(&mut self) -> Result<(), SchedulerError<R::Error>> {
        self.perform_work(WorkMode::Sync, None)
    }

    /// Animation-frame callback entry point: drain work at animation
    /// urgency or better, then hand leftovers to a deferred callback.
    pub fn perform_animation_work(&mut self) -> Result<(), SchedulerError<R::Error>> {
        self.is_animation_callback_scheduled = false;
        self.record(SchedEvent::CallbackFired {
            kind: CallbackKind::Animation,
        });
        self.perform_work(WorkMode::Animation, None)
    }

    /// Idle callback entry point: work units while `deadline` has budget
    /// beyond the configured heuristic, then re-register if work remains.
    pub fn perform_deferred_work(
        &mut self,
        deadline: &impl Deadline,
    ) -> Result<(), SchedulerError<R::Error>> {
        self.is_deferred_callback_scheduled = false;
        self.record(SchedEvent::CallbackFired {
            kind: CallbackKind::Deferred,
        });
        self.perform_work(WorkMode::Deferred, Some(deadline as &dyn Deadline))
    }

    fn perform_work(
        &mut self,
        mode: WorkMode,
        deadline: Option<&dyn Deadline>,
    ) -> Result<(), SchedulerError<R::Error>> {
        loop {
            match self.work_loop(mode, deadline) {
                Ok(()) => break,
                Err(Fault::User(error)) => {
                    // The in-flight unit failed. Its half-built tree is
                    // abandoned; the error goes through the boundary
                    // pipeline, then the loop resumes remaining work.
                    match self.next_unit_of_work.take() {
                        Some(failed) => {
                            let trapped = self.reconciler.trap_error(&self.arena, failed, error);
                            self.record(SchedEvent::ErrorTrapped {
                                boundary: trapped.boundary.map(|b| b.index() as u32),
                            });
                            self.handle_errors(vec![trapped])?;
                        }
                        None => return Err(SchedulerError::Uncaught(error)),
                    }
                }
                Err(Fault::Trapped(batch)) => self.handle_errors(batch)?,
                Err(Fault::Fatal(violation)) => {
                    return Err(SchedulerError::Invariant(violation))
                }
            }
        }
        self.reschedule_leftover(mode);
        Ok(())
    }

    fn work_loop(
        &mut self,
        mode: WorkMode,
        deadline: Option<&dyn Deadline>,
    ) -> Result<(), Fault<R::Error>> {
        loop {
            if let Some(deadline) = deadline {
                if deadline.time_remaining() <= self.config.deferred_time_heuristic_ms {
                    return Ok(());
                }
            }
            if self.next_unit_of_work.is_none() {
                self.find_next_unit_of_work();
            }
            let Some(unit) = self.next_unit_of_work else {
                return Ok(());
            };
            let keep_going = match mode {
                WorkMode::Sync => self.next_priority_level == Priority::Sync,
                WorkMode::Animation => self.next_priority_level <= Priority::Animation,
                WorkMode::Deferred => true,
            };
            if !keep_going {
                return Ok(());
            }
            self.next_unit_of_work = self.perform_unit_of_work(unit, false)?;
            if !self.pending_commit_errors.is_empty() {
                return Err(Fault::Trapped(mem::take(&mut self.pending_commit_errors)));
            }
        }
    }

    /// After a loop drains or breaks, ask the host to continue whatever
    /// urgency is left.
    fn reschedule_leftover(&mut self, mode: WorkMode) {
        match mode {
            WorkMode::Sync => match self.next_priority_level {
                Priority::Sync | Priority::NoWork => {}
                Priority::Animation => self.ensure_animation_callback(),
                _ => self.ensure_deferred_callback(),
            },
            WorkMode::Animation => {
                if self.next_priority_level.is_work()
                    && self.next_priority_level > Priority::Animation
                {
                    self.ensure_deferred_callback();
                }
            }
            WorkMode::Deferred => {
                if self.has_pending_work() {
                    self.ensure_deferred_callback();
                }
            }
        }
    }
}

// ============================================================================
// Work loop internals
// ============================================================================

impl<H: HostConfig, R: Reconciler> Scheduler<H, R> {
    /// Pick the most urgent scheduled root and clone its committed tree
    /// into a fresh work-in-progress cursor.
    fn find_next_unit_of_work(&mut self) {
        match self.scheduled.find_highest(&mut self.roots, &self.arena) {
            Some((root, priority)) => {
                self.next_priority_level = priority;
                let current = self.roots[root].current;
                let wip = self
                    .reconciler
                    .clone_fiber(&mut self.arena, current, priority);
                self.next_unit_of_work = Some(wip);
            }
            None => {
                self.next_priority_level = Priority::NoWork;
                self.next_unit_of_work = None;
            }
        }
    }

    /// Begin one fiber; if it yields no child, complete upward. Returns
    /// the next unit, or `None` when everything is drained.
    fn perform_unit_of_work(
        &mut self,
        unit: FiberId,
        ignore_unmounting_errors: bool,
    ) -> Result<Option<FiberId>, Fault<R::Error>> {
        self.record(SchedEvent::UnitBegan {
            fiber: unit.index() as u32,
        });
        let current = self.arena[unit].alternate;
        let spawned = self
            .reconciler
            .begin_work(&mut self.arena, current, unit, self.next_priority_level)
            .map_err(Fault::User)?;
        let next = match spawned {
            Some(child) => Some(child),
            None => self.complete_unit_of_work(unit, ignore_unmounting_errors)?,
        };
        self.reconciler.reset_current_owner();
        Ok(next)
    }

    /// Finalize `start` and ascend: bubble remaining priority, consume
    /// inputs, splice effects into the parent, then move to the sibling
    /// or keep completing upward. Completing the root commits.
    fn complete_unit_of_work(
        &mut self,
        start: FiberId,
        ignore_unmounting_errors: bool,
    ) -> Result<Option<FiberId>, Fault<R::Error>> {
        let mut work_in_progress = start;
        loop {
            let current = self.arena[work_in_progress].alternate;
            let spawned = self
                .reconciler
                .complete_work(&mut self.arena, current, work_in_progress)
                .map_err(Fault::User)?;
            if let Some(next) = spawned {
                return Ok(Some(next));
            }

            self.arena.reset_work_priority(work_in_progress);
            self.arena.clear_completed_inputs(work_in_progress);
            self.record(SchedEvent::UnitCompleted {
                fiber: work_in_progress.index() as u32,
            });

            let parent = self.arena[work_in_progress].parent;
            if let Some(parent) = parent {
                self.arena.splice_child_effects(parent, work_in_progress);
            }

            if let Some(sibling) = self.arena[work_in_progress].sibling {
                return Ok(Some(sibling));
            }
            match parent {
                Some(parent) => work_in_progress = parent,
                None => return self.complete_root(work_in_progress, ignore_unmounting_errors),
            }
        }
    }

    /// Flip the buffers and commit the finished tree, then look for the
    /// next most urgent work.
    fn complete_root(
        &mut self,
        finished: FiberId,
        ignore_unmounting_errors: bool,
    ) -> Result<Option<FiberId>, Fault<R::Error>> {
        if self.arena[finished].tag != FiberTag::HostContainer {
            return Err(Fault::Fatal(InvariantViolation::NotAContainer));
        }
        let StateNode::Root(root) = self.arena[finished].state_node else {
            return Err(Fault::Fatal(InvariantViolation::MissingRootDescriptor));
        };
        if self.roots[root].current == finished {
            return Err(Fault::Fatal(InvariantViolation::DoubleCommit));
        }
        self.roots[root].current = finished;
        self.commit_all_work(finished, ignore_unmounting_errors);
        self.find_next_unit_of_work();
        Ok(self.next_unit_of_work)
    }
}

// ============================================================================
// Commit engine
// ============================================================================

impl<H: HostConfig, R: Reconciler> Scheduler<H, R> {
    /// Apply the finished tree's effect list to the host: one mutation
    /// pass, then one lifecycle pass.
    ///
    /// This section is uninterruptible: there is no yield point between
    /// entering the mutation pass and finishing the lifecycle pass, so
    /// every sibling's mutation is visible before any sibling's lifecycle
    /// fires. Errors are collected into `pending_commit_errors` instead of
    /// raised; deletion errors are discarded entirely when
    /// `ignore_unmounting_errors` is set (boundary re-renders must not
    /// loop on their own teardown failures).
    fn commit_all_work(&mut self, finished: FiberId, ignore_unmounting_errors: bool) {
        let effects = self.arena.effects(finished).count() as u32;
        let span = debug_span!("commit", finished = finished.index(), effects);
        let _guard = span.enter();
        self.record(SchedEvent::CommitStarted {
            finished: finished.index() as u32,
            effects,
        });

        // Mutation pass: placements, in-place updates, deletions, in
        // children-before-parents order.
        let mut effect = self.arena[finished].first_effect;
        while let Some(fiber) = effect {
            let masked = self.arena[fiber].effect_tag & EffectTag::MUTATION_MASK;
            if masked == EffectTag::PLACEMENT {
                self.reconciler.commit_insertion(&mut self.arena, fiber);
                self.arena[fiber].effect_tag.remove(EffectTag::PLACEMENT);
                self.record(SchedEvent::CommitMutation {
                    fiber: fiber.index() as u32,
                });
            } else if masked == EffectTag::PLACEMENT | EffectTag::UPDATE {
                self.reconciler.commit_insertion(&mut self.arena, fiber);
                self.arena[fiber].effect_tag.remove(EffectTag::PLACEMENT);
                let current = self.arena[fiber].alternate;
                self.reconciler.commit_work(&mut self.arena, current, fiber);
                self.record(SchedEvent::CommitMutation {
                    fiber: fiber.index() as u32,
                });
            } else if masked == EffectTag::UPDATE {
                let current = self.arena[fiber].alternate;
                self.reconciler.commit_work(&mut self.arena, current, fiber);
                self.record(SchedEvent::CommitMutation {
                    fiber: fiber.index() as u32,
                });
            } else if masked == EffectTag::DELETION {
                let errors = self.reconciler.commit_deletion(&mut self.arena, fiber);
                self.record(SchedEvent::CommitMutation {
                    fiber: fiber.index() as u32,
                });
                if !ignore_unmounting_errors {
                    for trapped in &errors {
                        self.record(SchedEvent::ErrorTrapped {
                            boundary: trapped.boundary.map(|b| b.index() as u32),
                        });
                    }
                    self.pending_commit_errors.extend(errors);
                }
            }
            effect = self.arena[fiber].next_effect;
        }

        // Lifecycle pass: runs only after every mutation has landed.
        // Unlink the list as we go so no stale next_effect edges survive.
        let mut effect = self.arena[finished].first_effect;
        while let Some(fiber) = effect {
            if self.arena[fiber].effect_tag.needs_lifecycle() {
                let current = self.arena[fiber].alternate;
                if let Some(trapped) =
                    self.reconciler.commit_lifecycles(&mut self.arena, current, fiber)
                {
                    self.record(SchedEvent::ErrorTrapped {
                        boundary: trapped.boundary.map(|b| b.index() as u32),
                    });
                    self.pending_commit_errors.push(trapped);
                }
                self.record(SchedEvent::CommitLifecycle {
                    fiber: fiber.index() as u32,
                });
            }
            effect = self.arena[fiber].next_effect.take();
        }

        // The root never appears on its own effect list; apply its own
        // effects last.
        if !self.arena[finished].effect_tag.is_empty() {
            let current = self.arena[finished].alternate;
            self.reconciler.commit_work(&mut self.arena, current, finished);
            if let Some(trapped) =
                self.reconciler.commit_lifecycles(&mut self.arena, current, finished)
            {
                self.pending_commit_errors.push(trapped);
            }
        }
        self.record(SchedEvent::CommitFinished {
            finished: finished.index() as u32,
        });
    }
}

// ============================================================================
// Error pipeline
// ============================================================================

impl<H: HostConfig, R: Reconciler> Scheduler<H, R> {
    /// Fixed-point worklist over trapped errors: acknowledge each
    /// boundary once per round, re-render the affected subtrees
    /// synchronously, and feed any failures of that recovery back into
    /// the worklist. Errors with no boundary surface to the caller after
    /// the worklist drains, taking the scheduled-root chain with them.
    fn handle_errors(
        &mut self,
        initial: Vec<TrappedError<R::Error>>,
    ) -> Result<(), SchedulerError<R::Error>> {
        let mut queue = initial;
        let mut first_uncaught: Option<R::Error> = None;

        while !queue.is_empty() {
            let batch = mem::take(&mut queue);
            let mut affected: Vec<FiberId> = Vec::new();

            for trapped in batch {
                match trapped.boundary {
                    None => {
                        if first_uncaught.is_none() {
                            first_uncaught = Some(trapped.error);
                        }
                    }
                    Some(boundary) => {
                        if affected.contains(&boundary) {
                            continue;
                        }
                        match self.reconciler.acknowledge_error_in_boundary(
                            &mut self.arena,
                            boundary,
                            &trapped.error,
                        ) {
                            Ok(()) => {
                                self.record(SchedEvent::BoundaryAcknowledged {
                                    boundary: boundary.index() as u32,
                                });
                                affected.push(boundary);
                            }
                            Err(error) => {
                                // Acknowledgement itself failed; requeue
                                // against whatever boundary sits above.
                                queue.push(self.reconciler.trap_error(
                                    &self.arena,
                                    boundary,
                                    error,
                                ));
                            }
                        }
                    }
                }
            }

            for boundary in affected {
                self.rerender_boundary(boundary, &mut queue)?;
            }
        }

        if let Some(error) = first_uncaught {
            warn!("uncaught error: dropping the scheduled-root chain");
            self.scheduled.quiesce(&mut self.roots);
            self.next_unit_of_work = None;
            self.next_priority_level = Priority::NoWork;
            self.record(SchedEvent::RegistryQuiesced);
            return Err(SchedulerError::Uncaught(error));
        }
        Ok(())
    }

    /// Re-render the tree above an acknowledged boundary synchronously at
    /// the current priority context, with unmount failures swallowed.
    /// New failures are handed back through `queue`, never recursed on.
    fn rerender_boundary(
        &mut self,
        boundary: FiberId,
        queue: &mut Vec<TrappedError<R::Error>>,
    ) -> Result<(), SchedulerError<R::Error>> {
        let priority = self.priority_context;

        // Raise the path so the re-render is discoverable, and find the
        // root above the boundary.
        let mut node = boundary;
        let root_fiber = loop {
            self.arena.raise_pending_priority(node, priority);
            match self.arena[node].parent {
                Some(parent) => node = parent,
                None => break node,
            }
        };
        if self.arena[root_fiber].tag != FiberTag::HostContainer {
            return Err(SchedulerError::Invariant(InvariantViolation::NotAContainer));
        }
        let StateNode::Root(root) = self.arena[root_fiber].state_node else {
            return Err(SchedulerError::Invariant(
                InvariantViolation::MissingRootDescriptor,
            ));
        };

        // Drive a fresh work-in-progress to exhaustion. This is a tight
        // synchronous loop: the commit it reaches runs with unmount
        // errors ignored.
        self.next_priority_level = priority;
        let current = self.roots[root].current;
        let wip = self
            .reconciler
            .clone_fiber(&mut self.arena, current, priority);
        let mut unit = Some(wip);
        while let Some(fiber) = unit {
            match self.perform_unit_of_work(fiber, true) {
                Ok(next) => unit = next,
                Err(Fault::User(error)) => {
                    queue.push(TrappedError::caught(boundary, error));
                    unit = None;
                }
                Err(Fault::Trapped(batch)) => {
                    queue.extend(batch);
                    unit = None;
                }
                Err(Fault::Fatal(violation)) => {
                    return Err(SchedulerError::Invariant(violation))
                }
            }
            queue.append(&mut self.pending_commit_errors);
        }
        // Whatever cursor state the drive left behind is stale.
        self.next_unit_of_work = None;
        Ok(())
    }
}
