//! Use of the group key by `dishonest_threshold + 1` qualified members.
//!
//! Signing is a two-round threshold Schnorr scheme over P-256 in the style of FROST:
//!
//! 1. Each signer `i` samples a hiding nonce `d_i` and a binding nonce `e_i` and publishes
//!    `(D_i, E_i) = (d_i·G, e_i·G)`.
//! 2. With `B` the list of every signer's commitments, each signer derives the binding factor
//!    `ρ_i = H(i, Y, B, m)`, the group commitment `R = Σ (D_i + ρ_i·E_i)` and the challenge
//!    `c = H(R, Y, m)`, then publishes `z_i = d_i + ρ_i·e_i + c·λ_i·x_i`, where `λ_i` is its Lagrange
//!    coefficient over the signing set.
//!
//! The signature is `(R, z = Σ z_i)` and verifies as `z·G == R + c·Y`.
//!
//! Binding factors tie every signer's nonce to the message and to the full commitment list, so a signer
//! may take part in several sessions at once without exposing the group key to the ROS attack.
//!
//! # Warning
//!
//! Nonces must never be reused. [SigningNonce] is consumed by [partial_sign] to enforce this.

use crate::{
    primitives::{
        point_to_bytes,
        poly::{self, lagrange_coefficient, Eval, Poly},
        Point, Scalar,
    },
    reconstruction::{GroupKeyMaterial, KeyShare},
    MemberId,
};
use p256::{
    elliptic_curve::{bigint::U256, ops::Reduce},
    FieldBytes, NonZeroScalar,
};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;
use zeroize::ZeroizeOnDrop;

/// Domain separation for the signature challenge.
const CHALLENGE_NAMESPACE: &[u8] = b"_BEACON_DKG_SCHNORR";

/// Domain separation for binding factors.
const BINDING_NAMESPACE: &[u8] = b"_BEACON_DKG_BINDING";

/// Errors that can occur when using the group key.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("not enough signers: required {0}, have {1}")]
    NotEnoughSigners(usize, usize),
    #[error("signer not in signing set: {0}")]
    UnknownSigner(MemberId),
    #[error("invalid partial signature from {0}")]
    InvalidPartialSignature(MemberId),
    #[error("interpolation failed: {0}")]
    Interpolation(#[from] poly::Error),
}

/// Lagrange coefficients `λ_i(0)` for every member of `signers`.
pub fn lagrange_coefficients(signers: &[MemberId]) -> Result<BTreeMap<MemberId, Scalar>, Error> {
    let indices = signers.iter().map(|id| id.get()).collect::<Vec<_>>();
    signers
        .iter()
        .map(|id| Ok((*id, lagrange_coefficient(id.get(), &indices)?)))
        .collect()
}

/// Recover the group private key from at least `required` key shares.
///
/// Only used to check the key generation: in normal operation nobody ever holds the group private key.
pub fn recover_secret(required: usize, shares: &[KeyShare]) -> Result<Scalar, Error> {
    let evals = shares
        .iter()
        .map(|share| Eval {
            index: share.index.get(),
            value: share.private,
        })
        .collect::<Vec<_>>();
    Ok(Poly::<Scalar>::recover(required, &evals)?)
}

/// Recover the group public key from at least `required` public key shares.
pub fn recover_public_key(
    required: usize,
    public_shares: &BTreeMap<MemberId, Point>,
) -> Result<Point, Error> {
    let evals = public_shares
        .iter()
        .map(|(id, public)| Eval {
            index: id.get(),
            value: *public,
        })
        .collect::<Vec<_>>();
    Ok(Poly::<Point>::recover(required, &evals)?)
}

/// A single-use pair of signing nonces.
#[derive(ZeroizeOnDrop)]
pub struct SigningNonce {
    hiding: Scalar,
    binding: Scalar,
}

/// Public commitments `(D_i, E_i)` to a signer's nonces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NonceCommitment {
    pub hiding: Point,
    pub binding: Point,
}

/// Sample a nonce pair and return it along with its public commitment.
pub fn commit_nonce<R: RngCore + CryptoRng>(rng: &mut R) -> (SigningNonce, NonceCommitment) {
    let hiding = *NonZeroScalar::random(&mut *rng);
    let binding = *NonZeroScalar::random(&mut *rng);
    let commitment = NonceCommitment {
        hiding: Point::GENERATOR * hiding,
        binding: Point::GENERATOR * binding,
    };
    (SigningNonce { hiding, binding }, commitment)
}

/// A signer's contribution to a signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartialSignature {
    pub index: MemberId,
    pub value: Scalar,
}

/// A Schnorr signature under the group public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    pub commitment: Point,
    pub value: Scalar,
}

/// Compute the challenge `c = H(R, Y, m)`.
pub fn challenge(commitment: &Point, group_public_key: &Point, message: &[u8]) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update(CHALLENGE_NAMESPACE);
    hasher.update(point_to_bytes(commitment));
    hasher.update(point_to_bytes(group_public_key));
    hasher.update(message);
    let digest: FieldBytes = hasher.finalize();
    <Scalar as Reduce<U256>>::reduce_bytes(&digest)
}

/// Compute the binding factor `ρ_i = H(i, Y, B, m)` of `signer`.
///
/// The message is hashed last and every other input has a fixed width.
pub fn binding_factor(
    signer: MemberId,
    group_public_key: &Point,
    commitments: &BTreeMap<MemberId, NonceCommitment>,
    message: &[u8],
) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update(BINDING_NAMESPACE);
    hasher.update(signer.get().to_be_bytes());
    hasher.update(point_to_bytes(group_public_key));
    for (id, commitment) in commitments {
        hasher.update(id.get().to_be_bytes());
        hasher.update(point_to_bytes(&commitment.hiding));
        hasher.update(point_to_bytes(&commitment.binding));
    }
    hasher.update(message);
    let digest: FieldBytes = hasher.finalize();
    <Scalar as Reduce<U256>>::reduce_bytes(&digest)
}

/// Compute the group commitment `R = Σ (D_i + ρ_i·E_i)` over every signer in `commitments`.
pub fn group_commitment(
    group_public_key: &Point,
    commitments: &BTreeMap<MemberId, NonceCommitment>,
    message: &[u8],
) -> Point {
    commitments
        .iter()
        .fold(Point::IDENTITY, |sum, (signer, commitment)| {
            let rho = binding_factor(*signer, group_public_key, commitments, message);
            sum + commitment.hiding + commitment.binding * rho
        })
}

/// Returns the Lagrange coefficient of `signer` over the signers of `commitments`.
fn signer_coefficient(
    signer: MemberId,
    commitments: &BTreeMap<MemberId, NonceCommitment>,
) -> Result<Scalar, Error> {
    if !commitments.contains_key(&signer) {
        return Err(Error::UnknownSigner(signer));
    }
    let indices = commitments.keys().map(|id| id.get()).collect::<Vec<_>>();
    Ok(lagrange_coefficient(signer.get(), &indices)?)
}

/// Produce a partial signature over `message` for the signing set given by `commitments`.
pub fn partial_sign(
    material: &GroupKeyMaterial,
    nonce: SigningNonce,
    commitments: &BTreeMap<MemberId, NonceCommitment>,
    message: &[u8],
) -> Result<PartialSignature, Error> {
    let me = material.share().index;
    if commitments.len() < material.required() {
        return Err(Error::NotEnoughSigners(material.required(), commitments.len()));
    }
    let lambda = signer_coefficient(me, commitments)?;
    let group_public_key = material.group_public_key();
    let rho = binding_factor(me, group_public_key, commitments, message);
    let commitment = group_commitment(group_public_key, commitments, message);
    let c = challenge(&commitment, group_public_key, message);
    Ok(PartialSignature {
        index: me,
        value: nonce.hiding + nonce.binding * rho + c * lambda * material.share().private,
    })
}

/// Verify a partial signature against the signer's public key share and nonce commitment.
pub fn verify_partial(
    material: &GroupKeyMaterial,
    partial: &PartialSignature,
    commitments: &BTreeMap<MemberId, NonceCommitment>,
    message: &[u8],
) -> Result<(), Error> {
    let public = material
        .public_share(partial.index)
        .ok_or(Error::UnknownSigner(partial.index))?;
    let nonce_commitment = commitments
        .get(&partial.index)
        .ok_or(Error::UnknownSigner(partial.index))?;
    let lambda = signer_coefficient(partial.index, commitments)?;
    let group_public_key = material.group_public_key();
    let rho = binding_factor(partial.index, group_public_key, commitments, message);
    let commitment = group_commitment(group_public_key, commitments, message);
    let c = challenge(&commitment, group_public_key, message);
    let expected =
        nonce_commitment.hiding + nonce_commitment.binding * rho + *public * (c * lambda);
    if Point::GENERATOR * partial.value != expected {
        return Err(Error::InvalidPartialSignature(partial.index));
    }
    Ok(())
}

/// Combine partial signatures from every member of the signing set.
pub fn aggregate(
    required: usize,
    commitment: Point,
    partials: &[PartialSignature],
) -> Result<Signature, Error> {
    if partials.len() < required {
        return Err(Error::NotEnoughSigners(required, partials.len()));
    }
    let value = partials
        .iter()
        .fold(Scalar::ZERO, |sum, partial| sum + partial.value);
    Ok(Signature { commitment, value })
}

/// Verify a signature under the group public key.
pub fn verify(group_public_key: &Point, message: &[u8], signature: &Signature) -> bool {
    let c = challenge(&signature.commitment, group_public_key, message);
    Point::GENERATOR * signature.value == signature.commitment + *group_public_key * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        group::Group, reconstruction::combine, sharing::generate_shares, transcript::Transcript,
    };
    use rand::{rngs::StdRng, SeedableRng};

    const N: u16 = 5;
    const T: u16 = 2;

    /// Key material for every member of an honest group, along with the dealt secrets.
    fn setup(seed: u64) -> (Vec<GroupKeyMaterial>, Scalar) {
        let mut rng = StdRng::seed_from_u64(seed);
        let members = (1..=N).map(MemberId::new).collect::<Vec<_>>();
        let mut group = Group::new(N, T);
        let mut transcript = Transcript::new();
        let mut dealings = Vec::new();
        for id in &members {
            group.register_member_id(*id).unwrap();
        }
        for id in &members {
            let dealing = generate_shares(T, members.clone(), &mut rng);
            transcript.record_public_points(*id, dealing.public_points());
            dealings.push((*id, dealing));
        }

        // The group secret is the sum of the dealt secrets (recovered from each dealing)
        let secret = dealings.iter().fold(Scalar::ZERO, |sum, (_, dealing)| {
            let evals = members
                .iter()
                .map(|id| Eval {
                    index: id.get(),
                    value: dealing.share(*id).unwrap().value,
                })
                .collect::<Vec<_>>();
            sum + Poly::<Scalar>::recover(usize::from(T) + 1, &evals).unwrap()
        });
        let materials = members
            .iter()
            .map(|me| {
                let received = dealings
                    .iter()
                    .map(|(dealer, dealing)| (*dealer, *dealing.share(*me).unwrap()))
                    .collect();
                combine(*me, &group, &transcript, &received).unwrap()
            })
            .collect();
        (materials, secret)
    }

    /// Every subset of `1..=n` with `k` members.
    fn subsets(n: u16, k: usize) -> Vec<Vec<MemberId>> {
        let mut out = Vec::new();
        for mask in 0u32..(1 << n) {
            if mask.count_ones() as usize == k {
                out.push(
                    (1..=n)
                        .filter(|i| mask & (1 << (i - 1)) != 0)
                        .map(MemberId::new)
                        .collect(),
                );
            }
        }
        out
    }

    #[test]
    fn test_recover_secret_any_quorum() {
        let (materials, secret) = setup(0);
        let group_public_key = *materials[0].group_public_key();
        assert_eq!(Point::GENERATOR * secret, group_public_key);
        for signers in subsets(N, 3) {
            let shares = signers
                .iter()
                .map(|id| materials[usize::from(id.get()) - 1].share().clone())
                .collect::<Vec<_>>();
            assert_eq!(recover_secret(3, &shares).unwrap(), secret);
        }
    }

    #[test]
    fn test_recover_secret_insufficient() {
        let (materials, secret) = setup(1);
        let shares = materials[..2]
            .iter()
            .map(|m| m.share().clone())
            .collect::<Vec<_>>();
        assert!(matches!(
            recover_secret(3, &shares),
            Err(Error::Interpolation(poly::Error::NotEnoughEvaluations(3, 2)))
        ));

        // Interpolating two shares as if they were enough yields an unrelated value
        assert_ne!(recover_secret(2, &shares).unwrap(), secret);
    }

    #[test]
    fn test_recover_public_key() {
        let (materials, _) = setup(2);
        let public_shares = materials[0].public_shares();
        assert_eq!(
            &recover_public_key(3, public_shares).unwrap(),
            materials[0].group_public_key()
        );
    }

    /// Sample a nonce pair for every signer.
    fn commit_all(
        signers: &[MemberId],
        rng: &mut StdRng,
    ) -> (Vec<SigningNonce>, BTreeMap<MemberId, NonceCommitment>) {
        let mut nonces = Vec::new();
        let mut commitments = BTreeMap::new();
        for signer in signers {
            let (nonce, commitment) = commit_nonce(rng);
            nonces.push(nonce);
            commitments.insert(*signer, commitment);
        }
        (nonces, commitments)
    }

    /// Run round 2 for every signer, checking each partial signature on the way.
    fn sign_all(
        materials: &[GroupKeyMaterial],
        signers: &[MemberId],
        nonces: Vec<SigningNonce>,
        commitments: &BTreeMap<MemberId, NonceCommitment>,
        message: &[u8],
    ) -> Signature {
        let mut partials = Vec::new();
        for (signer, nonce) in signers.iter().zip(nonces) {
            let material = &materials[usize::from(signer.get()) - 1];
            let partial = partial_sign(material, nonce, commitments, message).unwrap();
            verify_partial(&materials[0], &partial, commitments, message).unwrap();
            partials.push(partial);
        }
        let commitment = group_commitment(materials[0].group_public_key(), commitments, message);
        aggregate(signers.len(), commitment, &partials).unwrap()
    }

    #[test]
    fn test_threshold_signature_any_quorum() {
        let (materials, _) = setup(3);
        let mut rng = StdRng::seed_from_u64(4);
        let group_public_key = *materials[0].group_public_key();
        let message = b"beacon entry";
        for signers in subsets(N, 3) {
            let (nonces, commitments) = commit_all(&signers, &mut rng);
            let signature = sign_all(&materials, &signers, nonces, &commitments, message);
            assert!(verify(&group_public_key, message, &signature));
            assert!(!verify(&group_public_key, b"other", &signature));
        }
    }

    #[test]
    fn test_interleaved_sessions() {
        let (materials, _) = setup(9);
        let mut rng = StdRng::seed_from_u64(10);
        let group_public_key = *materials[0].group_public_key();
        let signers = vec![MemberId::new(1), MemberId::new(3), MemberId::new(5)];

        // Open both sessions before either is signed
        let (first_nonces, first) = commit_all(&signers, &mut rng);
        let (second_nonces, second) = commit_all(&signers, &mut rng);
        let b = sign_all(&materials, &signers, second_nonces, &second, b"b");
        let a = sign_all(&materials, &signers, first_nonces, &first, b"a");
        assert!(verify(&group_public_key, b"a", &a));
        assert!(verify(&group_public_key, b"b", &b));
        assert_ne!(a.commitment, b.commitment);
    }

    #[test]
    fn test_nonces_bound_to_message_and_signers() {
        let (materials, _) = setup(11);
        let mut rng = StdRng::seed_from_u64(12);
        let y = *materials[0].group_public_key();
        let signers = vec![MemberId::new(1), MemberId::new(2), MemberId::new(4)];
        let (_, commitments) = commit_all(&signers, &mut rng);
        let me = MemberId::new(1);

        // The same commitments yield a different group commitment for another message
        let rho = binding_factor(me, &y, &commitments, b"a");
        assert_ne!(rho, binding_factor(me, &y, &commitments, b"b"));
        assert_ne!(
            group_commitment(&y, &commitments, b"a"),
            group_commitment(&y, &commitments, b"b")
        );

        // Changing another signer's commitment changes our binding factor
        let mut replaced = commitments.clone();
        let (_, other) = commit_nonce(&mut rng);
        replaced.insert(MemberId::new(4), other);
        assert_ne!(rho, binding_factor(me, &y, &replaced, b"a"));

        // A partial signature does not carry over to another message
        let (nonces, commitments) = commit_all(&signers, &mut rng);
        let nonce = nonces.into_iter().next().unwrap();
        let partial = partial_sign(&materials[0], nonce, &commitments, b"a").unwrap();
        verify_partial(&materials[1], &partial, &commitments, b"a").unwrap();
        assert_eq!(
            verify_partial(&materials[1], &partial, &commitments, b"b"),
            Err(Error::InvalidPartialSignature(me))
        );
    }

    #[test]
    fn test_partial_signature_tampered() {
        let (materials, _) = setup(5);
        let mut rng = StdRng::seed_from_u64(6);
        let signers = vec![MemberId::new(1), MemberId::new(2), MemberId::new(4)];
        let (nonces, commitments) = commit_all(&signers, &mut rng);
        let nonce = nonces.into_iter().next().unwrap();
        let mut partial = partial_sign(&materials[0], nonce, &commitments, b"msg").unwrap();
        partial.value += Scalar::ONE;
        assert_eq!(
            verify_partial(&materials[1], &partial, &commitments, b"msg"),
            Err(Error::InvalidPartialSignature(MemberId::new(1)))
        );
    }

    #[test]
    fn test_signer_outside_set() {
        let (materials, _) = setup(7);
        let mut rng = StdRng::seed_from_u64(8);
        let signers = vec![MemberId::new(2), MemberId::new(3), MemberId::new(4)];
        let (_, commitments) = commit_all(&signers, &mut rng);
        let (nonce, _) = commit_nonce(&mut rng);
        assert_eq!(
            partial_sign(&materials[0], nonce, &commitments, b"msg"),
            Err(Error::UnknownSigner(MemberId::new(1)))
        );
    }

    #[test]
    fn test_lagrange_coefficients_sum_to_one() {
        let signers = vec![MemberId::new(1), MemberId::new(3), MemberId::new(5)];
        let sum = lagrange_coefficients(&signers)
            .unwrap()
            .values()
            .fold(Scalar::ZERO, |sum, lambda| sum + lambda);
        assert_eq!(sum, Scalar::ONE);
    }
}
