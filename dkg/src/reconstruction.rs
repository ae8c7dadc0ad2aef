//! Combination of the qualified dealings into the group key.
//!
//! With `Q` the qualified set once all accusations are resolved:
//!
//! * group public key `Y = Σ_{i∈Q} A_i0`
//! * share of member `j`: `x_j = Σ_{i∈Q} f_i(j)`
//! * public key share of member `j`: `Y_j = Σ_{i∈Q} Σ_k A_ik·j^k = x_j·G`
//!
//! Dealers disqualified while resolving points accusations are excluded from every sum: their
//! contribution is dropped rather than reconstructed from the shares they dealt.

use crate::{
    group::Group,
    primitives::{Point, Scalar},
    sharing::Share,
    transcript::Transcript,
    Error, MemberId,
};
use std::{collections::BTreeMap, fmt};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A member's share of the group private key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    #[zeroize(skip)]
    pub index: MemberId,
    pub private: Scalar,
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShare")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// The output of a completed run.
#[derive(Clone, Debug)]
pub struct GroupKeyMaterial {
    threshold: u16,
    group_public_key: Point,
    share: KeyShare,
    public_shares: BTreeMap<MemberId, Point>,
    qualified: Vec<MemberId>,
    disqualified: Vec<MemberId>,
}

impl GroupKeyMaterial {
    /// Returns the number of shares required to use the group key (`dishonest_threshold + 1`).
    pub fn required(&self) -> usize {
        usize::from(self.threshold) + 1
    }

    pub fn group_public_key(&self) -> &Point {
        &self.group_public_key
    }

    /// Returns the local member's share of the group private key.
    pub fn share(&self) -> &KeyShare {
        &self.share
    }

    /// Returns the public key share `x_j·G` of a qualified member.
    pub fn public_share(&self, member: MemberId) -> Option<&Point> {
        self.public_shares.get(&member)
    }

    pub fn public_shares(&self) -> &BTreeMap<MemberId, Point> {
        &self.public_shares
    }

    pub fn qualified(&self) -> &[MemberId] {
        &self.qualified
    }

    pub fn disqualified(&self) -> &[MemberId] {
        &self.disqualified
    }
}

/// Combine the dealings of all qualified members.
///
/// `received` holds the (already verified) shares dealt to `me`, including `me`'s own.
pub fn combine(
    me: MemberId,
    group: &Group,
    transcript: &Transcript,
    received: &BTreeMap<MemberId, Share>,
) -> Result<GroupKeyMaterial, Error> {
    let qualified = group.qualified_member_ids();
    if !group.is_qualified(me) {
        return Err(Error::Disqualified(me));
    }

    let mut group_public_key = Point::IDENTITY;
    let mut private = Scalar::ZERO;
    let mut public_shares: BTreeMap<MemberId, Point> =
        qualified.iter().map(|id| (*id, Point::IDENTITY)).collect();
    for dealer in &qualified {
        let points = transcript
            .public_points(*dealer)
            .ok_or(Error::VerificationFailure(*dealer))?;
        let share = received
            .get(dealer)
            .ok_or(Error::VerificationFailure(*dealer))?;
        group_public_key += points.constant();
        private += share.value;
        for (member, public) in public_shares.iter_mut() {
            *public += points.evaluate_at(member.get());
        }
    }

    // Our share must match what everybody else computes for us
    if public_shares.get(&me) != Some(&(Point::GENERATOR * private)) {
        private.zeroize();
        return Err(Error::VerificationFailure(me));
    }

    Ok(GroupKeyMaterial {
        threshold: group.dishonest_threshold(),
        group_public_key,
        share: KeyShare { index: me, private },
        public_shares,
        qualified,
        disqualified: group.disqualified_member_ids(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{primitives::poly::Poly, sharing::generate_shares};
    use rand::{rngs::StdRng, SeedableRng};

    const N: u16 = 5;
    const T: u16 = 2;

    fn members() -> Vec<MemberId> {
        (1..=N).map(MemberId::new).collect()
    }

    /// Deal for every member and return each member's combined key material.
    fn run(seed: u64, disqualified: &[u16]) -> Vec<GroupKeyMaterial> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut group = Group::new(N, T);
        let mut transcript = Transcript::new();
        let mut dealings = BTreeMap::new();
        for id in members() {
            group.register_member_id(id).unwrap();
            let dealing = generate_shares(T, members(), &mut rng);
            transcript.record_public_points(id, dealing.public_points());
            dealings.insert(id, dealing);
        }
        for id in disqualified {
            group.disqualify_member_id(MemberId::new(*id)).unwrap();
        }
        group
            .qualified_member_ids()
            .into_iter()
            .map(|me| {
                let received = dealings
                    .iter()
                    .map(|(dealer, dealing)| (*dealer, *dealing.share(me).unwrap()))
                    .collect();
                combine(me, &group, &transcript, &received).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_all_agree() {
        let outputs = run(0, &[]);
        assert_eq!(outputs.len(), 5);
        let first = &outputs[0];
        for output in &outputs {
            assert_eq!(output.group_public_key(), first.group_public_key());
            assert_eq!(output.public_shares(), first.public_shares());
            assert_eq!(
                output.public_share(output.share().index),
                Some(&(Point::GENERATOR * output.share().private))
            );
        }
    }

    #[test]
    fn test_shares_interpolate_to_group_key() {
        let outputs = run(1, &[4]);
        assert_eq!(outputs.len(), 4);
        let evals = outputs
            .iter()
            .map(|output| crate::primitives::poly::Eval {
                index: output.share().index.get(),
                value: Point::GENERATOR * output.share().private,
            })
            .collect::<Vec<_>>();
        let recovered = Poly::<Point>::recover(3, &evals).unwrap();
        assert_eq!(&recovered, outputs[0].group_public_key());
        assert_eq!(outputs[0].disqualified(), &[MemberId::new(4)]);
        assert!(outputs[0].public_share(MemberId::new(4)).is_none());
    }

    #[test]
    fn test_missing_share() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut group = Group::new(3, 1);
        let mut transcript = Transcript::new();
        let mut received = BTreeMap::new();
        for id in 1..=3u16 {
            let id = MemberId::new(id);
            group.register_member_id(id).unwrap();
            let dealing = generate_shares(1, [MemberId::new(1)], &mut rng);
            transcript.record_public_points(id, dealing.public_points());
            if id != MemberId::new(2) {
                received.insert(id, *dealing.share(MemberId::new(1)).unwrap());
            }
        }
        assert!(matches!(
            combine(MemberId::new(1), &group, &transcript, &received),
            Err(Error::VerificationFailure(id)) if id == MemberId::new(2)
        ));
    }

    #[test]
    fn test_disqualified_member_cannot_combine() {
        let mut group = Group::new(3, 1);
        for id in 1..=3u16 {
            group.register_member_id(MemberId::new(id)).unwrap();
        }
        group.disqualify_member_id(MemberId::new(3)).unwrap();
        assert!(matches!(
            combine(
                MemberId::new(3),
                &group,
                &Transcript::new(),
                &BTreeMap::new()
            ),
            Err(Error::Disqualified(_))
        ));
    }

    #[test]
    fn test_debug_redacts_share() {
        let outputs = run(3, &[]);
        let debug = format!("{:?}", outputs[0]);
        assert!(debug.contains("KeyShare"));
        assert!(!debug.contains("private"));
    }
}
