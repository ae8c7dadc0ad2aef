//! Resolution of accusations.
//!
//! An accuser reveals its ephemeral private key for the pair with the accused. Any member can then
//! rebuild the pairwise symmetric key, open the share the accused broadcast to the accuser, and check it
//! against the accused's public commitments. [resolve] only reads the [Group] and the [Transcript], so
//! every honest member computes the same [Resolution].
//!
//! # Verdicts
//!
//! * The accused is not qualified, or accuses itself: ignored.
//! * The evidence is not a valid private key: ignored (and logged).
//! * The evidence does not match the accuser's published ephemeral key: the accuser is at fault.
//! * The share does not decrypt, or does not parse: the accused is at fault.
//! * The share fails the check of the phase: the accused is at fault.
//! * The share passes the check of the phase: the accuser is at fault (false accusation).

use crate::{
    group::Group,
    sharing::{
        decrypt_share, derive_key, ephemeral_public, verify_public_share, verify_share, Evidence,
    },
    transcript::Transcript,
    MemberId, Phase,
};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

/// A claim by `accuser` that the share `accused` dealt to it is invalid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Accusation {
    pub accuser: MemberId,
    pub accused: MemberId,
    pub phase: Phase,
    pub evidence: Evidence,
}

/// Why an accusation was dismissed without disqualifying anyone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dismissal {
    /// The accused is not (or no longer) a qualified member.
    AccusedNotQualified,
    /// The accuser is not (or no longer) a qualified member.
    AccuserNotQualified,
    /// The accuser accused itself.
    SelfAccusation,
    /// The evidence is not a valid private key.
    MalformedEvidence,
    /// The pair was already resolved in this phase.
    Duplicate,
    /// Accusations are not raised in this phase.
    WrongPhase,
}

/// Why a member was found at fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// The revealed key does not match the accuser's published ephemeral key.
    EvidenceMismatch,
    /// The accused did not publish what is needed to check the share.
    MissingRecord,
    /// The share does not decrypt to a well-formed share.
    Undecryptable,
    /// The share fails the check of the phase.
    InvalidShare,
    /// The share passes the check of the phase.
    FalseAccusation,
}

/// Outcome of a single accusation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Dismissed(Dismissal),
    AccuserAtFault(Fault),
    AccusedAtFault(Fault),
}

/// Outcome of every accusation raised in a phase.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Verdict for each accusation, in input order.
    pub verdicts: Vec<(Accusation, Verdict)>,
    /// Members to disqualify.
    pub disqualified: BTreeSet<MemberId>,
}

/// Resolve the accusations raised in `phase` against the public record.
///
/// Verdicts are computed against the qualified set at the start of the call: a member found at fault
/// by one accusation is still judged normally in the others. The caller applies
/// [Resolution::disqualified] atomically.
pub fn resolve(
    group: &Group,
    phase: Phase,
    accusations: &[Accusation],
    transcript: &Transcript,
) -> Resolution {
    let threshold = group.dishonest_threshold();
    let mut seen = HashSet::new();
    let mut resolution = Resolution::default();
    for accusation in accusations {
        let verdict = if !seen.insert((accusation.accuser, accusation.accused)) {
            Verdict::Dismissed(Dismissal::Duplicate)
        } else {
            judge(group, phase, threshold, accusation, transcript)
        };
        match verdict {
            Verdict::Dismissed(Dismissal::MalformedEvidence) => {
                warn!(
                    accuser = %accusation.accuser,
                    accused = %accusation.accused,
                    %phase,
                    "ignoring accusation with malformed evidence"
                );
            }
            Verdict::Dismissed(reason) => {
                debug!(
                    accuser = %accusation.accuser,
                    accused = %accusation.accused,
                    %phase,
                    ?reason,
                    "dismissed accusation"
                );
            }
            Verdict::AccuserAtFault(fault) => {
                debug!(
                    accuser = %accusation.accuser,
                    accused = %accusation.accused,
                    %phase,
                    ?fault,
                    "accuser at fault"
                );
                resolution.disqualified.insert(accusation.accuser);
            }
            Verdict::AccusedAtFault(fault) => {
                debug!(
                    accuser = %accusation.accuser,
                    accused = %accusation.accused,
                    %phase,
                    ?fault,
                    "accused at fault"
                );
                resolution.disqualified.insert(accusation.accused);
            }
        }
        resolution.verdicts.push((accusation.clone(), verdict));
    }
    resolution
}

fn judge(
    group: &Group,
    phase: Phase,
    threshold: u16,
    accusation: &Accusation,
    transcript: &Transcript,
) -> Verdict {
    let Accusation {
        accuser, accused, ..
    } = *accusation;
    if !matches!(phase, Phase::Accusation | Phase::KeyReconstruction) || accusation.phase != phase
    {
        return Verdict::Dismissed(Dismissal::WrongPhase);
    }
    if accuser == accused {
        return Verdict::Dismissed(Dismissal::SelfAccusation);
    }
    if !group.is_qualified(accused) {
        return Verdict::Dismissed(Dismissal::AccusedNotQualified);
    }
    if !group.is_qualified(accuser) {
        return Verdict::Dismissed(Dismissal::AccuserNotQualified);
    }

    // The revealed key must be the one the accuser committed to for this pair
    let Some(private) = accusation.evidence.private_key() else {
        return Verdict::Dismissed(Dismissal::MalformedEvidence);
    };
    match transcript.ephemeral_key(accuser, accused) {
        Some(published) if *published == ephemeral_public(&private) => {}
        _ => return Verdict::AccuserAtFault(Fault::EvidenceMismatch),
    }

    // Open the share the accused sealed for the accuser
    let (Some(peer), Some(encrypted)) = (
        transcript.ephemeral_key(accused, accuser),
        transcript.encrypted_share(accused, accuser),
    ) else {
        return Verdict::AccusedAtFault(Fault::MissingRecord);
    };
    let key = derive_key(&private, peer, accuser, accused);
    let Some(share) = decrypt_share(&key, accused, accuser, encrypted) else {
        return Verdict::AccusedAtFault(Fault::Undecryptable);
    };

    // Re-run the check of the phase
    let valid = match phase {
        Phase::Accusation => match transcript.commitments(accused) {
            Some(commitments) => verify_share(accused, accuser, &share, commitments, threshold),
            None => return Verdict::AccusedAtFault(Fault::MissingRecord),
        },
        _ => match transcript.public_points(accused) {
            Some(points) => verify_public_share(accuser, &share.value, points, threshold),
            None => return Verdict::AccusedAtFault(Fault::MissingRecord),
        },
    };
    if valid {
        Verdict::AccuserAtFault(Fault::FalseAccusation)
    } else {
        Verdict::AccusedAtFault(Fault::InvalidShare)
    }
}
