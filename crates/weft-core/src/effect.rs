#![forbid(unsafe_code)]

//! Side-effect bookkeeping flags.
//!
//! Every fiber carries an [`EffectTag`] bitset describing the host-visible
//! work its commit will perform. Tags are raised during the begin phase,
//! merged bottom-up into the parent's effect list at complete time, and
//! consumed by the two commit passes: the mutation pass handles
//! `PLACEMENT`/`UPDATE`/`DELETION`, the lifecycle pass handles
//! `UPDATE`/`CALLBACK`.

use bitflags::bitflags;

bitflags! {
    /// Pending side effects for one fiber.
    ///
    /// An empty set means the fiber has no host-visible work and never
    /// enters an effect list.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EffectTag: u8 {
        /// Host node must be attached to its parent.
        const PLACEMENT = 1 << 0;
        /// Host node must be updated in place.
        const UPDATE = 1 << 1;
        /// Host node and its subtree must be detached and torn down.
        const DELETION = 1 << 2;
        /// A lifecycle callback must run once mutations have landed.
        const CALLBACK = 1 << 3;
    }
}

impl EffectTag {
    /// Tags dispatched by the commit mutation pass.
    pub const MUTATION_MASK: EffectTag = EffectTag::PLACEMENT
        .union(EffectTag::UPDATE)
        .union(EffectTag::DELETION);

    /// Tags that earn a visit from the commit lifecycle pass.
    pub const LIFECYCLE_MASK: EffectTag = EffectTag::UPDATE.union(EffectTag::CALLBACK);

    /// Whether the lifecycle pass must visit this fiber.
    #[inline]
    pub fn needs_lifecycle(self) -> bool {
        self.intersects(Self::LIFECYCLE_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tag_means_no_effect() {
        let tag = EffectTag::empty();
        assert!(!tag.needs_lifecycle());
        assert!(!tag.intersects(EffectTag::MUTATION_MASK));
    }

    #[test]
    fn callback_alone_skips_mutation_but_not_lifecycle() {
        let tag = EffectTag::CALLBACK;
        assert!(!tag.intersects(EffectTag::MUTATION_MASK));
        assert!(tag.needs_lifecycle());
    }

    #[test]
    fn placement_and_update_compose() {
        let tag = EffectTag::PLACEMENT | EffectTag::UPDATE;
        assert!(tag.contains(EffectTag::PLACEMENT));
        assert!(tag.contains(EffectTag::UPDATE));
        assert!(tag.needs_lifecycle());
    }

    #[test]
    fn clearing_placement_retains_update() {
        let mut tag = EffectTag::PLACEMENT | EffectTag::UPDATE;
        tag.remove(EffectTag::PLACEMENT);
        assert_eq!(tag, EffectTag::UPDATE);
    }
}
