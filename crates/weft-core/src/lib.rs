#![forbid(unsafe_code)]

//! Core data model for the weft reconciler: the priority lattice, the
//! arena-backed fiber tree, effect bookkeeping, and root descriptors.

pub mod effect;
pub mod fiber;
pub mod priority;
pub mod root;

pub use effect::EffectTag;
pub use fiber::{Fiber, FiberArena, FiberId, FiberTag, InstanceId, StateNode};
pub use priority::Priority;
pub use root::{FiberRoot, RootId, RootStore};
