//! Property-based invariant tests for the reconciliation pipeline.
//!
//! Over randomly generated element trees these verify:
//!
//! 1. Alternate links stay involutive across arbitrary re-renders.
//! 2. A mount's effect list is exactly the post-order of the committed
//!    tree (children before parents, siblings in order).
//! 3. Flushing drains all pending priority back to no-work.
//! 4. Re-rendering an identical tree produces zero effects.
//! 5. A full repaint updates every node, again in post-order.

use proptest::prelude::*;
use weft_core::{FiberArena, FiberId, Priority};
use weft_runtime::simulator::{stage_tree, SimElement, SimHost, SimReconciler};
use weft_runtime::{SchedEvent, Scheduler, SchedulerConfig};

// ── Helpers ─────────────────────────────────────────────────────────────

fn element_strategy() -> impl Strategy<Value = SimElement> {
    let names = || prop::sample::select(vec!["a", "b", "c", "d", "e"]);
    let payloads = || prop::sample::select(vec!["", "x", "y"]);
    let leaf =
        (names(), payloads()).prop_map(|(n, p)| SimElement::node(n).payload(p));
    leaf.prop_recursive(3, 24, 4, move |inner| {
        (names(), payloads(), prop::collection::vec(inner, 0..4))
            .prop_map(|(n, p, children)| SimElement::node(n).payload(p).children(children))
    })
}

/// Rewrite every payload so each node differs shallowly from before.
fn repaint(mut element: SimElement) -> SimElement {
    element.payload.push('!');
    element.children = element.children.into_iter().map(repaint).collect();
    element
}

fn traced_scheduler() -> Scheduler<SimHost, SimReconciler> {
    let config = SchedulerConfig {
        trace_enabled: true,
        trace_capacity: 0,
        ..SchedulerConfig::default()
    };
    Scheduler::with_config(SimHost::new(), SimReconciler::new(), config)
}

fn post_order_children(arena: &FiberArena<SimElement>, parent: FiberId, out: &mut Vec<FiberId>) {
    let mut child = arena[parent].child;
    while let Some(c) = child {
        post_order_children(arena, c, out);
        out.push(c);
        child = arena[c].sibling;
    }
}

fn commit_mutations(sched: &Scheduler<SimHost, SimReconciler>) -> Vec<u32> {
    sched
        .trace()
        .expect("trace enabled")
        .events()
        .filter_map(|e| match e {
            SchedEvent::CommitMutation { fiber } => Some(*fiber),
            _ => None,
        })
        .collect()
}

// ── Properties ──────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn mount_commits_effects_in_post_order(tree in element_strategy()) {
        let mut sched = traced_scheduler();
        let root = sched.create_root("prop");
        stage_tree(&mut sched, root, tree);
        sched
            .sync_updates(|s| s.schedule_work(root))
            .expect("mount succeeds");

        let mut expected = Vec::new();
        post_order_children(sched.arena(), sched.root_current(root), &mut expected);
        let expected: Vec<u32> = expected.iter().map(|f| f.index() as u32).collect();

        prop_assert_eq!(commit_mutations(&sched), expected);
    }

    #[test]
    fn alternate_links_stay_involutive(
        first in element_strategy(),
        second in element_strategy(),
    ) {
        let mut sched = traced_scheduler();
        let root = sched.create_root("prop");
        stage_tree(&mut sched, root, first);
        sched
            .sync_updates(|s| s.schedule_work(root))
            .expect("mount succeeds");
        stage_tree(&mut sched, root, second);
        sched
            .sync_updates(|s| s.schedule_work(root))
            .expect("re-render succeeds");

        let arena = sched.arena();
        for (id, fiber) in arena.iter() {
            if let Some(alt) = fiber.alternate {
                prop_assert_eq!(
                    arena[alt].alternate,
                    Some(id),
                    "fiber {} has a one-way alternate link",
                    id
                );
            }
        }
    }

    #[test]
    fn flushing_drains_pending_priority(tree in element_strategy()) {
        let mut sched = traced_scheduler();
        let root = sched.create_root("prop");
        stage_tree(&mut sched, root, tree);
        sched
            .sync_updates(|s| s.schedule_work(root))
            .expect("mount succeeds");

        prop_assert!(!sched.has_pending_work());
        let committed = sched.root_current(root);
        prop_assert_eq!(
            sched.arena()[committed].pending_work_priority,
            Priority::NoWork
        );
        prop_assert_eq!(sched.next_priority_level(), Priority::NoWork);
    }

    #[test]
    fn identical_rerender_is_effect_free(tree in element_strategy()) {
        let mut sched = traced_scheduler();
        let root = sched.create_root("prop");
        stage_tree(&mut sched, root, tree.clone());
        sched
            .sync_updates(|s| s.schedule_work(root))
            .expect("mount succeeds");
        sched.reconciler_mut().take_ops();
        if let Some(trace) = sched.trace_mut() {
            trace.clear();
        }

        stage_tree(&mut sched, root, tree);
        sched
            .sync_updates(|s| s.schedule_work(root))
            .expect("re-render succeeds");

        prop_assert!(sched.reconciler().ops().is_empty());
        prop_assert_eq!(commit_mutations(&sched), Vec::<u32>::new());
    }

    #[test]
    fn full_repaint_updates_every_node_in_post_order(tree in element_strategy()) {
        let mut sched = traced_scheduler();
        let root = sched.create_root("prop");
        stage_tree(&mut sched, root, tree.clone());
        sched
            .sync_updates(|s| s.schedule_work(root))
            .expect("mount succeeds");
        if let Some(trace) = sched.trace_mut() {
            trace.clear();
        }

        stage_tree(&mut sched, root, repaint(tree));
        sched
            .sync_updates(|s| s.schedule_work(root))
            .expect("repaint succeeds");

        let mut expected = Vec::new();
        post_order_children(sched.arena(), sched.root_current(root), &mut expected);
        let expected: Vec<u32> = expected.iter().map(|f| f.index() as u32).collect();

        prop_assert_eq!(commit_mutations(&sched), expected);
    }
}
