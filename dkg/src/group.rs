//! Registry of who is in the group and who has been disqualified.
//!
//! Both sets only grow. A disqualified member stays in [Group::member_ids] (its participation is
//! retained) and is excluded from everything downstream through [Group::qualified_member_ids].
//!
//! Every listing is in ascending identifier order, whatever order members joined or were disqualified
//! in, so two members that saw the same events hold identical lists.

use crate::{Error, MemberId};
use std::collections::BTreeSet;

/// Composition of the group for one run.
#[derive(Clone, Debug)]
pub struct Group {
    group_size: u16,
    dishonest_threshold: u16,

    member_ids: BTreeSet<MemberId>,
    disqualified_member_ids: BTreeSet<MemberId>,
}

impl Group {
    /// Create an empty group.
    ///
    /// Members are added with [Group::register_member_id] as they announce their presence.
    pub fn new(group_size: u16, dishonest_threshold: u16) -> Self {
        Self {
            group_size,
            dishonest_threshold,
            member_ids: BTreeSet::new(),
            disqualified_member_ids: BTreeSet::new(),
        }
    }

    pub fn group_size(&self) -> u16 {
        self.group_size
    }

    pub fn dishonest_threshold(&self) -> u16 {
        self.dishonest_threshold
    }

    /// Add a member to the group (no-op if already present).
    ///
    /// Identifiers outside `1..=group_size` are rejected, so the group never holds more than
    /// `group_size` members.
    pub fn register_member_id(&mut self, id: MemberId) -> Result<(), Error> {
        if id.get() == 0 || id.get() > self.group_size {
            return Err(Error::InvalidMember(id));
        }
        self.member_ids.insert(id);
        Ok(())
    }

    /// Disqualify a registered member (no-op if already disqualified).
    pub fn disqualify_member_id(&mut self, id: MemberId) -> Result<(), Error> {
        if !self.member_ids.contains(&id) {
            return Err(Error::UnknownMember(id));
        }
        self.disqualified_member_ids.insert(id);
        Ok(())
    }

    /// Returns every registered member, in ascending order.
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.member_ids.iter().copied().collect()
    }

    /// Returns every disqualified member, in ascending order.
    pub fn disqualified_member_ids(&self) -> Vec<MemberId> {
        self.disqualified_member_ids.iter().copied().collect()
    }

    /// Returns registered members that are not disqualified, in ascending order.
    pub fn qualified_member_ids(&self) -> Vec<MemberId> {
        self.member_ids
            .difference(&self.disqualified_member_ids)
            .copied()
            .collect()
    }

    pub fn is_member(&self, id: MemberId) -> bool {
        self.member_ids.contains(&id)
    }

    pub fn is_disqualified(&self, id: MemberId) -> bool {
        self.disqualified_member_ids.contains(&id)
    }

    pub fn is_qualified(&self, id: MemberId) -> bool {
        self.is_member(id) && !self.is_disqualified(id)
    }

    pub fn qualified_count(&self) -> usize {
        self.member_ids.len() - self.disqualified_member_ids.len()
    }

    /// Returns the minimum number of qualified members required to produce a key.
    pub fn quorum(&self) -> usize {
        usize::from(self.dishonest_threshold) + 1
    }

    /// Returns whether enough members remain qualified to produce a key.
    pub fn has_quorum(&self) -> bool {
        self.qualified_count() >= self.quorum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u16]) -> Vec<MemberId> {
        raw.iter().copied().map(MemberId::new).collect()
    }

    fn full(group_size: u16, dishonest_threshold: u16) -> Group {
        let mut group = Group::new(group_size, dishonest_threshold);
        for id in 1..=group_size {
            group.register_member_id(MemberId::new(id)).unwrap();
        }
        group
    }

    #[test]
    fn test_register_idempotent() {
        let mut group = Group::new(5, 2);
        group.register_member_id(MemberId::new(3)).unwrap();
        group.register_member_id(MemberId::new(1)).unwrap();
        group.register_member_id(MemberId::new(3)).unwrap();
        assert_eq!(group.member_ids(), ids(&[1, 3]));
    }

    #[test]
    fn test_order_independent_of_arrival() {
        // Two views of the same events, observed in different orders
        let mut first = Group::new(5, 2);
        for id in [4, 1, 5, 2, 3] {
            first.register_member_id(MemberId::new(id)).unwrap();
        }
        first.disqualify_member_id(MemberId::new(5)).unwrap();
        first.disqualify_member_id(MemberId::new(2)).unwrap();

        let mut second = Group::new(5, 2);
        for id in [2, 3, 5, 1, 4] {
            second.register_member_id(MemberId::new(id)).unwrap();
        }
        second.disqualify_member_id(MemberId::new(2)).unwrap();
        second.disqualify_member_id(MemberId::new(5)).unwrap();

        assert_eq!(first.member_ids(), ids(&[1, 2, 3, 4, 5]));
        assert_eq!(first.member_ids(), second.member_ids());
        assert_eq!(first.disqualified_member_ids(), ids(&[2, 5]));
        assert_eq!(first.disqualified_member_ids(), second.disqualified_member_ids());
        assert_eq!(first.qualified_member_ids(), ids(&[1, 3, 4]));
        assert_eq!(first.qualified_member_ids(), second.qualified_member_ids());
    }

    #[test]
    fn test_register_out_of_range() {
        let mut group = Group::new(3, 1);
        assert!(matches!(
            group.register_member_id(MemberId::new(0)),
            Err(Error::InvalidMember(id)) if id == MemberId::new(0)
        ));
        assert!(matches!(
            group.register_member_id(MemberId::new(4)),
            Err(Error::InvalidMember(id)) if id == MemberId::new(4)
        ));
        assert!(group.member_ids().is_empty());

        // Registering every valid identifier (twice) never exceeds the group size
        for _ in 0..2 {
            for id in 1..=3 {
                group.register_member_id(MemberId::new(id)).unwrap();
            }
        }
        assert_eq!(group.member_ids().len(), 3);
        assert_eq!(group.qualified_count(), 3);
    }

    #[test]
    fn test_disqualify_idempotent() {
        let mut group = full(5, 2);
        group.disqualify_member_id(MemberId::new(2)).unwrap();
        let once = (group.member_ids(), group.disqualified_member_ids());
        group.disqualify_member_id(MemberId::new(2)).unwrap();
        let twice = (group.member_ids(), group.disqualified_member_ids());
        assert_eq!(once, twice);
        assert_eq!(group.disqualified_member_ids(), ids(&[2]));
    }

    #[test]
    fn test_disqualify_unknown() {
        let mut group = Group::new(5, 2);
        group.register_member_id(MemberId::new(1)).unwrap();
        assert!(matches!(
            group.disqualify_member_id(MemberId::new(4)),
            Err(Error::UnknownMember(id)) if id == MemberId::new(4)
        ));
        assert!(group.disqualified_member_ids().is_empty());
    }

    #[test]
    fn test_disqualification_is_overlay() {
        let mut group = full(5, 2);
        group.disqualify_member_id(MemberId::new(3)).unwrap();
        assert_eq!(group.member_ids(), ids(&[1, 2, 3, 4, 5]));
        assert_eq!(group.qualified_member_ids(), ids(&[1, 2, 4, 5]));
        assert!(group.is_member(MemberId::new(3)));
        assert!(!group.is_qualified(MemberId::new(3)));
        assert!(group.is_disqualified(MemberId::new(3)));
    }

    #[test]
    fn test_snapshots_are_copies() {
        let mut group = full(3, 1);
        let mut snapshot = group.member_ids();
        snapshot.clear();
        assert_eq!(group.member_ids().len(), 3);

        let mut disqualified = group.disqualified_member_ids();
        disqualified.push(MemberId::new(1));
        assert!(group.disqualified_member_ids().is_empty());
        group.disqualify_member_id(MemberId::new(1)).unwrap();
        assert_eq!(group.qualified_count(), 2);
    }

    #[test]
    fn test_quorum_floor() {
        let mut group = full(4, 2);
        assert!(group.has_quorum());
        group.disqualify_member_id(MemberId::new(1)).unwrap();
        assert!(group.has_quorum());
        group.disqualify_member_id(MemberId::new(2)).unwrap();
        assert_eq!(group.qualified_count(), 2);
        assert!(!group.has_quorum());
    }

    #[test]
    fn test_monotonic() {
        let mut group = full(7, 3);
        let mut previous = Vec::new();
        for id in [4, 2, 4, 7, 2] {
            group.disqualify_member_id(MemberId::new(id)).unwrap();
            let current = group.disqualified_member_ids();
            assert!(previous.iter().all(|id| current.contains(id)));
            previous = current;
        }
        assert_eq!(previous, ids(&[2, 4, 7]));
    }
}
