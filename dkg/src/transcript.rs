//! Append-only record of everything members broadcast during a run.
//!
//! Only the first valid submission of each member in each phase is recorded. Accusations are resolved
//! from this record alone so that every honest member reaches the same verdicts.

use crate::{
    complaint::Accusation,
    primitives::{poly, Point},
    sharing::{EncryptedShare, Evidence},
    MemberId, Phase,
};
use std::collections::BTreeMap;

/// Submissions of one phase, keyed by sender.
#[derive(Debug)]
struct Table<V>(BTreeMap<MemberId, V>);

impl<V> Default for Table<V> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<V> Table<V> {
    fn insert(&mut self, sender: MemberId, value: V) -> bool {
        if self.0.contains_key(&sender) {
            return false;
        }
        self.0.insert(sender, value);
        true
    }
}

/// Public record of a run.
#[derive(Debug, Default)]
pub struct Transcript {
    ephemeral_keys: Table<BTreeMap<MemberId, Point>>,
    commitments: Table<poly::Public>,
    encrypted_shares: Table<BTreeMap<MemberId, EncryptedShare>>,
    shares_accusations: Table<BTreeMap<MemberId, Evidence>>,
    public_points: Table<poly::Public>,
    points_accusations: Table<BTreeMap<MemberId, Evidence>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the ephemeral public keys `owner` generated for each peer.
    ///
    /// Returns `false` if `owner` already has a record.
    pub fn record_ephemeral_keys(
        &mut self,
        owner: MemberId,
        keys: BTreeMap<MemberId, Point>,
    ) -> bool {
        self.ephemeral_keys.insert(owner, keys)
    }

    pub fn record_commitments(&mut self, dealer: MemberId, commitments: poly::Public) -> bool {
        self.commitments.insert(dealer, commitments)
    }

    pub fn record_encrypted_shares(
        &mut self,
        dealer: MemberId,
        shares: BTreeMap<MemberId, EncryptedShare>,
    ) -> bool {
        self.encrypted_shares.insert(dealer, shares)
    }

    /// Record the accusations `accuser` raised in `phase`.
    ///
    /// Only [Phase::Accusation] and [Phase::KeyReconstruction] carry accusations.
    pub fn record_accusations(
        &mut self,
        phase: Phase,
        accuser: MemberId,
        accusations: BTreeMap<MemberId, Evidence>,
    ) -> bool {
        match phase {
            Phase::Accusation => self.shares_accusations.insert(accuser, accusations),
            Phase::KeyReconstruction => self.points_accusations.insert(accuser, accusations),
            _ => false,
        }
    }

    pub fn record_public_points(&mut self, dealer: MemberId, points: poly::Public) -> bool {
        self.public_points.insert(dealer, points)
    }

    /// Returns the ephemeral public key `owner` published for the pair with `peer`.
    pub fn ephemeral_key(&self, owner: MemberId, peer: MemberId) -> Option<&Point> {
        self.ephemeral_keys.0.get(&owner)?.get(&peer)
    }

    pub fn commitments(&self, dealer: MemberId) -> Option<&poly::Public> {
        self.commitments.0.get(&dealer)
    }

    /// Returns the share `dealer` sealed for `recipient`.
    pub fn encrypted_share(&self, dealer: MemberId, recipient: MemberId) -> Option<&EncryptedShare> {
        self.encrypted_shares.0.get(&dealer)?.get(&recipient)
    }

    pub fn public_points(&self, dealer: MemberId) -> Option<&poly::Public> {
        self.public_points.0.get(&dealer)
    }

    /// Returns whether `member` has a record for `phase`.
    ///
    /// Every member is considered recorded for phases without a payload to record.
    pub fn has_record(&self, phase: Phase, member: MemberId) -> bool {
        match phase {
            Phase::EphemeralKeyExchange => self.ephemeral_keys.0.contains_key(&member),
            Phase::CommitmentDistribution => self.commitments.0.contains_key(&member),
            Phase::ShareDistribution => self.encrypted_shares.0.contains_key(&member),
            Phase::Accusation => self.shares_accusations.0.contains_key(&member),
            Phase::Qualification => self.public_points.0.contains_key(&member),
            Phase::KeyReconstruction => self.points_accusations.0.contains_key(&member),
            Phase::Initializing | Phase::Completed | Phase::Aborted => true,
        }
    }

    /// Returns every accusation raised in `phase`, ordered by accuser then accused.
    pub fn accusations(&self, phase: Phase) -> Vec<Accusation> {
        let table = match phase {
            Phase::Accusation => &self.shares_accusations,
            Phase::KeyReconstruction => &self.points_accusations,
            _ => return Vec::new(),
        };
        table
            .0
            .iter()
            .flat_map(|(accuser, accused)| {
                accused.iter().map(move |(accused, evidence)| Accusation {
                    accuser: *accuser,
                    accused: *accused,
                    phase,
                    evidence: evidence.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::poly::new_from;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_first_record_wins() {
        let mut rng = StdRng::seed_from_u64(0);
        let dealer = MemberId::new(1);
        let first = new_from(1, &mut rng).commit();
        let second = new_from(1, &mut rng).commit();
        let mut transcript = Transcript::new();
        assert!(!transcript.has_record(Phase::CommitmentDistribution, dealer));
        assert!(transcript.record_commitments(dealer, first.clone()));
        assert!(!transcript.record_commitments(dealer, second));
        assert_eq!(transcript.commitments(dealer), Some(&first));
        assert!(transcript.has_record(Phase::CommitmentDistribution, dealer));
    }

    #[test]
    fn test_accusations_by_phase() {
        let mut transcript = Transcript::new();
        let evidence = Evidence::from([1u8; 32]);
        let accusations = [
            (MemberId::new(3), evidence.clone()),
            (MemberId::new(2), evidence.clone()),
        ]
        .into_iter()
        .collect();
        assert!(transcript.record_accusations(Phase::Accusation, MemberId::new(1), accusations));
        assert!(transcript.record_accusations(
            Phase::KeyReconstruction,
            MemberId::new(4),
            BTreeMap::new()
        ));
        assert!(!transcript.record_accusations(
            Phase::Qualification,
            MemberId::new(4),
            BTreeMap::new()
        ));

        let shares = transcript.accusations(Phase::Accusation);
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0].accused, MemberId::new(2));
        assert_eq!(shares[1].accused, MemberId::new(3));
        assert!(shares.iter().all(|a| a.accuser == MemberId::new(1)));
        assert!(transcript.accusations(Phase::KeyReconstruction).is_empty());
        assert!(transcript.has_record(Phase::KeyReconstruction, MemberId::new(4)));
    }
}
