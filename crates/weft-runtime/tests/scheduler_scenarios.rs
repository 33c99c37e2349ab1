//! End-to-end scheduler scenarios driven through the simulator:
//! synchronous flushes, deadline-bounded deferred work, preemption,
//! effect-list bubbling, and boundary recovery.

use std::cell::Cell;

use weft_core::Priority;
use weft_runtime::simulator::{
    find_committed, stage_tree, stage_update, HostOp, SimElement, SimHost, SimReconciler,
};
use weft_runtime::{
    Deadline, FixedDeadline, SchedEvent, Scheduler, SchedulerConfig, SchedulerError,
};

fn traced_scheduler() -> Scheduler<SimHost, SimReconciler> {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
    let config = SchedulerConfig {
        trace_enabled: true,
        ..SchedulerConfig::default()
    };
    Scheduler::with_config(SimHost::new(), SimReconciler::new(), config)
}

/// A deadline that stays generous for a fixed number of polls, then
/// reports exhaustion. Lets a test freeze the loop mid-tree.
struct SteppingDeadline {
    polls_left: Cell<u32>,
}

impl SteppingDeadline {
    fn new(polls: u32) -> Self {
        Self {
            polls_left: Cell::new(polls),
        }
    }
}

impl Deadline for SteppingDeadline {
    fn time_remaining(&self) -> f64 {
        let left = self.polls_left.get();
        if left == 0 {
            0.0
        } else {
            self.polls_left.set(left - 1);
            10.0
        }
    }
}

// ============================================================================
// Scenario: synchronous update on a single root
// ============================================================================

#[test]
fn sync_update_commits_before_returning() {
    let mut sched = traced_scheduler();
    let root = sched.create_root("main");
    let before = sched.root_current(root);

    stage_tree(
        &mut sched,
        root,
        SimElement::node("app").child(SimElement::node("leaf").payload("v1")),
    );
    sched
        .sync_updates(|s| s.schedule_work(root))
        .expect("sync flush succeeds");

    // Committed before sync_updates returned, onto the other buffer.
    assert!(sched.reconciler().is_attached("app"));
    assert!(sched.reconciler().is_attached("leaf"));
    assert_ne!(sched.root_current(root), before);

    // Nothing left over, so no host callbacks were arranged.
    assert!(!sched.has_pending_work());
    assert_eq!(sched.host().animation_requests, 0);
    assert_eq!(sched.host().deferred_requests, 0);
    assert!(!sched.is_animation_callback_scheduled());
    assert!(!sched.is_deferred_callback_scheduled());
}

#[test]
fn sync_update_on_a_fiber_flushes_its_queue() {
    let mut sched = traced_scheduler();
    let root = sched.create_root("main");
    stage_tree(
        &mut sched,
        root,
        SimElement::node("app").child(SimElement::node("leaf").payload("v1")),
    );
    sched
        .sync_updates(|s| s.schedule_work(root))
        .expect("mount succeeds");
    sched.reconciler_mut().take_ops();

    let leaf = find_committed(&sched, root, "leaf").expect("leaf committed");
    stage_update(&mut sched, leaf, SimElement::node("leaf").payload("v2"));
    sched
        .sync_updates(|s| s.schedule_update(leaf))
        .expect("update flush succeeds");

    assert_eq!(sched.reconciler().payload_of("leaf"), Some("v2"));
    assert_eq!(
        sched.reconciler().ops(),
        &[HostOp::Update {
            name: "leaf".into()
        }]
    );
    assert_eq!(sched.host().animation_requests, 0);
    assert_eq!(sched.host().deferred_requests, 0);
}

// ============================================================================
// Scenario: deferred update against an exhausted deadline
// ============================================================================

#[test]
fn exhausted_deadline_reregisters_without_working() {
    let mut sched = Scheduler::new(SimHost::new(), SimReconciler::new());
    let root = sched.create_root("main");
    stage_tree(&mut sched, root, SimElement::node("app"));

    // Default context is low priority: work waits for an idle callback.
    sched.schedule_work(root).expect("scheduling succeeds");
    assert_eq!(sched.host().deferred_requests, 1);

    let fibers_before = sched.arena().len();
    sched
        .perform_deferred_work(&FixedDeadline::new(0.5))
        .expect("deferred tick succeeds");

    // Budget (0.5ms) is under the 1ms heuristic: no unit was processed,
    // not even the work-in-progress clone, and the callback re-armed.
    assert_eq!(sched.arena().len(), fibers_before);
    assert!(sched.reconciler().ops().is_empty());
    assert!(sched.is_deferred_callback_scheduled());
    assert_eq!(sched.host().deferred_requests, 2);

    // A real budget then drains the tree.
    sched
        .perform_deferred_work(&FixedDeadline::new(20.0))
        .expect("deferred tick succeeds");
    assert!(sched.reconciler().is_attached("app"));
    assert!(!sched.is_deferred_callback_scheduled());
}

// ============================================================================
// Scenario: animation work preempts a low-priority tree mid-flight
// ============================================================================

#[test]
fn higher_priority_work_invalidates_the_cursor() {
    let mut sched = Scheduler::new(SimHost::new(), SimReconciler::new());
    let slow = sched.create_root("slow");
    stage_tree(
        &mut sched,
        slow,
        SimElement::node("slow-app").children(vec![
            SimElement::node("a"),
            SimElement::node("b"),
            SimElement::node("c"),
        ]),
    );
    sched.schedule_work(slow).expect("low scheduling succeeds");

    // Freeze the deferred loop after three units: mid-tree.
    sched
        .perform_deferred_work(&SteppingDeadline::new(3))
        .expect("partial tick succeeds");
    assert!(sched.next_unit_of_work().is_some());
    assert_eq!(sched.next_priority_level(), Priority::Low);
    assert!(!sched.reconciler().is_attached("slow-app"));

    // Animation-priority work arrives on another root.
    let fast = sched.create_root("fast");
    stage_tree(&mut sched, fast, SimElement::node("fast-app"));
    sched
        .perform_with_priority(Priority::Animation, |s| s.schedule_work(fast))
        .expect("animation scheduling succeeds");

    // The cursor was dropped so the next scan starts from the roots.
    assert!(sched.next_unit_of_work().is_none());
    assert!(sched.is_animation_callback_scheduled());

    // The animation tick picks the more urgent root first.
    sched
        .perform_animation_work()
        .expect("animation tick succeeds");
    assert!(sched.reconciler().is_attached("fast-app"));
    assert!(!sched.reconciler().is_attached("slow-app"));
    assert!(sched.has_pending_work());

    // The abandoned low-priority tree is rebuilt on the next idle tick.
    sched
        .perform_deferred_work(&FixedDeadline::new(50.0))
        .expect("idle tick succeeds");
    assert!(sched.reconciler().is_attached("slow-app"));
    assert!(!sched.has_pending_work());
}

// ============================================================================
// Scenario: effect lists bubble children before parents
// ============================================================================

#[test]
fn updated_children_bubble_without_their_parent() {
    let mut sched = traced_scheduler();
    let root = sched.create_root("main");
    stage_tree(
        &mut sched,
        root,
        SimElement::node("app")
            .child(SimElement::node("b").payload("1"))
            .child(SimElement::node("c").payload("1")),
    );
    sched
        .sync_updates(|s| s.schedule_work(root))
        .expect("mount succeeds");
    sched.reconciler_mut().take_ops();
    if let Some(trace) = sched.trace_mut() {
        trace.clear();
    }

    // Same shape; only the leaves change.
    stage_tree(
        &mut sched,
        root,
        SimElement::node("app")
            .child(SimElement::node("b").payload("2"))
            .child(SimElement::node("c").payload("2")),
    );
    sched
        .sync_updates(|s| s.schedule_work(root))
        .expect("update succeeds");

    let b = find_committed(&sched, root, "b").expect("b committed");
    let c = find_committed(&sched, root, "c").expect("c committed");
    let app = find_committed(&sched, root, "app").expect("app committed");

    let trace = sched.trace().expect("trace enabled");
    let mutations: Vec<u32> = trace
        .events()
        .filter_map(|e| match e {
            SchedEvent::CommitMutation { fiber } => Some(*fiber),
            _ => None,
        })
        .collect();
    // Exactly the two updated leaves, in completion order; the unchanged
    // parent stays off its own effect list.
    assert_eq!(mutations, vec![b.index() as u32, c.index() as u32]);
    assert!(!mutations.contains(&(app.index() as u32)));

    let started = trace
        .events()
        .find_map(|e| match e {
            SchedEvent::CommitStarted { effects, .. } => Some(*effects),
            _ => None,
        })
        .expect("commit ran");
    assert_eq!(started, 2);

    assert_eq!(
        sched.reconciler().ops(),
        &[
            HostOp::Update { name: "b".into() },
            HostOp::Update { name: "c".into() },
        ]
    );
}

// ============================================================================
// Scenario: an error boundary absorbs a begin failure
// ============================================================================

#[test]
fn boundary_absorbs_failure_and_sheds_the_failed_subtree() {
    let mut sched = traced_scheduler();
    let root = sched.create_root("main");
    stage_tree(
        &mut sched,
        root,
        SimElement::node("app").child(
            SimElement::node("guard")
                .boundary()
                .child(SimElement::node("x").payload("fine")),
        ),
    );
    sched
        .sync_updates(|s| s.schedule_work(root))
        .expect("mount succeeds");
    assert!(sched.reconciler().is_attached("x"));
    sched.reconciler_mut().take_ops();

    // The next render makes x blow up during begin.
    stage_tree(
        &mut sched,
        root,
        SimElement::node("app").child(
            SimElement::node("guard")
                .boundary()
                .child(SimElement::node("x").payload("boom").fail_on_begin()),
        ),
    );
    let result = sched.sync_updates(|s| s.schedule_work(root));

    // No error escapes: the boundary caught it and re-rendered.
    result.expect("boundary absorbs the failure");
    let acknowledged = sched.reconciler().acknowledged();
    assert_eq!(acknowledged.len(), 1);
    assert_eq!(acknowledged[0].0, "guard");
    assert_eq!(acknowledged[0].1.node, "x");

    // The thrower is gone from both the committed tree and the host.
    assert!(find_committed(&sched, root, "x").is_none());
    assert!(!sched.reconciler().is_attached("x"));
    assert!(sched.reconciler().is_attached("guard"));
    assert!(!sched.has_pending_work());
}

#[test]
fn boundary_absorbs_a_mount_failure() {
    let mut sched = traced_scheduler();
    let root = sched.create_root("main");
    stage_tree(
        &mut sched,
        root,
        SimElement::node("app").child(
            SimElement::node("guard")
                .boundary()
                .child(SimElement::node("x").fail_on_begin()),
        ),
    );

    sched
        .sync_updates(|s| s.schedule_work(root))
        .expect("boundary absorbs the mount failure");

    assert_eq!(sched.reconciler().acknowledged().len(), 1);
    assert!(sched.reconciler().is_attached("guard"));
    assert!(find_committed(&sched, root, "x").is_none());
}

// ============================================================================
// Scenario: an uncaught error surfaces and quiesces the registry
// ============================================================================

#[test]
fn uncaught_error_surfaces_and_quiesces_the_registry() {
    let mut sched = traced_scheduler();
    let root = sched.create_root("main");
    stage_tree(
        &mut sched,
        root,
        SimElement::node("app").child(SimElement::node("x").fail_on_begin()),
    );

    let result = sched.sync_updates(|s| s.schedule_work(root));
    match result {
        Err(SchedulerError::Uncaught(error)) => {
            assert_eq!(error.node, "x");
        }
        other => panic!("expected an uncaught error, got {other:?}"),
    }

    // The scheduled-root chain was dropped wholesale.
    assert_eq!(sched.scheduled_head(), None);
    assert!(sched.registry_is_empty());
    assert!(sched
        .trace()
        .expect("trace enabled")
        .events()
        .any(|e| matches!(e, SchedEvent::RegistryQuiesced)));

    // The broken state does not persist: scheduling works again.
    stage_tree(
        &mut sched,
        root,
        SimElement::node("app").child(SimElement::node("ok")),
    );
    sched
        .sync_updates(|s| s.schedule_work(root))
        .expect("scheduling works after the quiesce");
    assert!(sched.reconciler().is_attached("ok"));
}

// ============================================================================
// Commit-phase failures route through the same pipeline
// ============================================================================

#[test]
fn lifecycle_failure_reaches_its_boundary_after_commit() {
    let mut sched = traced_scheduler();
    let root = sched.create_root("main");
    stage_tree(
        &mut sched,
        root,
        SimElement::node("app").child(
            SimElement::node("guard").boundary().child(
                SimElement::node("w")
                    .with_callback()
                    .fail_on_lifecycle(),
            ),
        ),
    );

    sched
        .sync_updates(|s| s.schedule_work(root))
        .expect("boundary absorbs the lifecycle failure");

    // The node mounted (mutations are atomic), then its lifecycle failed
    // and the boundary shed it.
    let acknowledged = sched.reconciler().acknowledged();
    assert_eq!(acknowledged.len(), 1);
    assert_eq!(acknowledged[0].1.node, "w");
    assert!(!sched.reconciler().is_attached("w"));
    assert!(sched.reconciler().is_attached("guard"));
}

#[test]
fn unmount_failure_inside_recovery_is_swallowed() {
    let mut sched = traced_scheduler();
    let root = sched.create_root("main");
    stage_tree(
        &mut sched,
        root,
        SimElement::node("app").child(
            SimElement::node("guard").boundary().child(
                SimElement::node("x")
                    .fail_on_unmount()
                    .child(SimElement::node("inner")),
            ),
        ),
    );
    sched
        .sync_updates(|s| s.schedule_work(root))
        .expect("mount succeeds");

    // Make x fail during begin; recovery must then unmount it, and the
    // scripted unmount failure must not wedge the recovery commit.
    stage_tree(
        &mut sched,
        root,
        SimElement::node("app").child(
            SimElement::node("guard").boundary().child(
                SimElement::node("x")
                    .fail_on_begin()
                    .fail_on_unmount()
                    .child(SimElement::node("inner")),
            ),
        ),
    );
    sched
        .sync_updates(|s| s.schedule_work(root))
        .expect("recovery swallows the unmount failure");

    assert!(!sched.reconciler().is_attached("x"));
    assert!(!sched.reconciler().is_attached("inner"));
    assert!(sched.reconciler().is_attached("guard"));
    // Only the begin failure was acknowledged; the unmount failure was
    // discarded by the recovery commit.
    assert_eq!(sched.reconciler().acknowledged().len(), 1);
}
