//! Generate a threshold group key among mutually distrusting members.
//!
//! This crate implements an interactive Distributed Key Generation (DKG) protocol over the NIST P-256
//! curve based on the "Pedersen-VSS" construction from "Secure Distributed Key Generation for Discrete-Log
//! Based Cryptosystems" (GJKR99). Every member deals a secret to every other member, all members
//! publicly verify the dealings (raising accusations when a dealing is inconsistent), and the dealings of
//! all members that survive the accusations are summed into a single group key. Any `dishonest_threshold + 1`
//! qualified members can jointly use the group key, fewer cannot.
//!
//! Unlike the Joint-Feldman construction, dealers first commit to their polynomials with perfectly
//! hiding Pedersen commitments and only publish the Feldman commitments (`a_k·G`) once the qualified set
//! is fixed, so nothing about the group key is revealed while that set is still being decided.
//!
//! # Warning
//!
//! A dealer disqualified while resolving points accusations is dropped from the group key rather than
//! having its secret reconstructed from the shares it dealt. Such a dealer sees every other `a_0·G`
//! before choosing whether to publish valid points, so it can pick between two group keys (with or
//! without its own contribution). The group key is therefore not guaranteed to be uniformly
//! distributed.
//!
//! # Overview
//!
//! All messages are broadcast. Shares are addressed to a single recipient by encrypting them with a
//! symmetric key derived from a pairwise Diffie-Hellman exchange over ephemeral keys. When a recipient
//! accuses a dealer, it reveals its ephemeral private key for that pair: anyone can then rebuild the
//! symmetric key, decrypt the broadcast ciphertext, and check the share against the dealer's commitment.
//! Every honest member reaches the same verdict from public data alone.
//!
//! Members that are silent when a phase ends, that send malformed data, or that lose an accusation are
//! disqualified. Disqualification is never reverted. If fewer than `dishonest_threshold + 1` members
//! remain qualified at any phase boundary, the run is aborted.
//!
//! # Specification
//!
//! ## Phase 0: Initializing
//!
//! Broadcast [wire::Payload::Join]. Every member that joins is registered in the [group::Group].
//!
//! ## Phase 1: Ephemeral Key Exchange
//!
//! Generate one ephemeral key pair per qualified peer and broadcast the public keys.
//!
//! ## Phase 2: Commitment Distribution
//!
//! Generate two random polynomials `f` and `f'` of degree `dishonest_threshold` and broadcast the Pedersen
//! commitments `C_k = a_k·G + b_k·H` to their coefficients.
//!
//! ## Phase 3: Share Distribution
//!
//! For each qualified peer `j`, encrypt `(f(j), f'(j))` under the pairwise symmetric key and broadcast all
//! ciphertexts.
//!
//! ## Phase 4: Accusation
//!
//! Decrypt the shares addressed to us and check them against the dealer's Pedersen commitments. Broadcast
//! an accusation (with evidence) against every dealer whose share fails. At the end of the phase,
//! accusations are resolved with [complaint::resolve].
//!
//! ## Phase 5: Qualification
//!
//! Broadcast the public key share points `A_k = a_k·G`.
//!
//! ## Phase 6: Key Reconstruction
//!
//! Check each dealer's share against its public key share points and accuse dealers that fail. At the end
//! of the phase, accusations are resolved and the group key is combined with [reconstruction::combine].
//!
//! # Example
//!
//! A full run over the in-memory transport lives in `demos/simulate`.

use std::{fmt, time::Duration};
use thiserror::Error;

pub mod complaint;
pub mod dispatch;
pub mod group;
pub mod local;
pub mod member;
pub mod primitives;
pub mod reconstruction;
pub mod runner;
pub mod sharing;
pub mod threshold;
pub mod transcript;
pub mod wire;

pub use member::Member;
pub use reconstruction::GroupKeyMaterial;
pub use runner::{cancellation, Cancellation, Canceller, Runner};

/// Identifier of a member within one run.
///
/// Valid identifiers are `1..=group_size`. The identifier is also the point at which every
/// polynomial is evaluated for this member, so it is never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberId(u16);

impl MemberId {
    /// Creates a new member identifier.
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl From<u16> for MemberId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Phase of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Initializing,
    EphemeralKeyExchange,
    CommitmentDistribution,
    ShareDistribution,
    Accusation,
    Qualification,
    KeyReconstruction,
    Completed,
    Aborted,
}

impl Phase {
    /// Returns the phase that follows this one on the forward path.
    ///
    /// Terminal phases return themselves.
    pub fn next(self) -> Self {
        match self {
            Phase::Initializing => Phase::EphemeralKeyExchange,
            Phase::EphemeralKeyExchange => Phase::CommitmentDistribution,
            Phase::CommitmentDistribution => Phase::ShareDistribution,
            Phase::ShareDistribution => Phase::Accusation,
            Phase::Accusation => Phase::Qualification,
            Phase::Qualification => Phase::KeyReconstruction,
            Phase::KeyReconstruction => Phase::Completed,
            Phase::Completed => Phase::Completed,
            Phase::Aborted => Phase::Aborted,
        }
    }

    /// Returns whether the phase is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Initializing => "initializing",
            Phase::EphemeralKeyExchange => "ephemeral_key_exchange",
            Phase::CommitmentDistribution => "commitment_distribution",
            Phase::ShareDistribution => "share_distribution",
            Phase::Accusation => "accusation",
            Phase::Qualification => "qualification",
            Phase::KeyReconstruction => "key_reconstruction",
            Phase::Completed => "completed",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Configuration for a run.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of members expected to participate.
    pub group_size: u16,

    /// Maximum number of dishonest members the group key tolerates.
    ///
    /// Any `dishonest_threshold + 1` qualified members can use the group key.
    pub dishonest_threshold: u16,

    /// Time a phase waits for silent members before ending without them.
    pub phase_timeout: Duration,
}

impl Config {
    /// Ensures the configuration describes a usable group.
    pub fn validate(&self) -> Result<(), Error> {
        if self.dishonest_threshold == 0 {
            return Err(Error::InvalidConfig("dishonest threshold must be positive"));
        }
        if self.dishonest_threshold >= self.group_size {
            return Err(Error::InvalidConfig(
                "dishonest threshold must be smaller than the group size",
            ));
        }
        if self.phase_timeout.is_zero() {
            return Err(Error::InvalidConfig("phase timeout must be positive"));
        }
        Ok(())
    }

    /// Returns the minimum number of qualified members a run needs.
    pub fn quorum(&self) -> usize {
        usize::from(self.dishonest_threshold) + 1
    }

    /// Returns whether `id` is a valid member identifier for this group.
    pub fn contains(&self, id: MemberId) -> bool {
        (1..=self.group_size).contains(&id.get())
    }
}

/// Errors that can occur while interacting with a run.
///
/// Per-member faults are never fatal: they are reported to the caller of [Member::receive] (and
/// logged by the [Runner]) while the run carries on without the offending message.
#[derive(Error, Debug)]
pub enum Error {
    #[error("verification failed for dealer {0}")]
    VerificationFailure(MemberId),
    #[error("unknown member: {0}")]
    UnknownMember(MemberId),
    #[error("quorum lost in {phase}: {qualified} qualified, {required} required")]
    QuorumLost {
        phase: Phase,
        qualified: usize,
        required: usize,
    },
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("invalid member: {0}")]
    InvalidMember(MemberId),
    #[error("unexpected phase: expected {expected}, got {got}")]
    UnexpectedPhase { expected: Phase, got: Phase },
    #[error("duplicate message from {0}")]
    Duplicate(MemberId),
    #[error("member disqualified: {0}")]
    Disqualified(MemberId),
    #[error("codec error: {0}")]
    Codec(#[from] commonware_codec::Error),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Reason a run ended without a group key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// The qualified set fell below `dishonest_threshold + 1`.
    QuorumLost { required: usize },
    /// The local member was disqualified.
    Disqualified,
    /// The owning application cancelled the run.
    Cancelled,
    /// The local share does not match the public record.
    Reconstruction,
    /// The transport failed.
    Transport(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::QuorumLost { required } => write!(f, "quorum lost ({required} required)"),
            AbortReason::Disqualified => f.write_str("disqualified"),
            AbortReason::Cancelled => f.write_str("cancelled"),
            AbortReason::Reconstruction => f.write_str("share does not match the public record"),
            AbortReason::Transport(err) => write!(f, "transport failed: {err}"),
        }
    }
}

/// Outcome of a run that did not complete.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("aborted in {phase} with {qualified} qualified members: {reason}")]
pub struct Abort {
    /// Phase the run was in when it aborted.
    pub phase: Phase,
    /// Size of the qualified set when the run aborted.
    pub qualified: usize,
    pub reason: AbortReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(5, 2, true; "five of two")]
    #[test_case(4, 3, true; "four of three")]
    #[test_case(3, 3, false; "threshold equals size")]
    #[test_case(3, 0, false; "zero threshold")]
    #[test_case(1, 1, false; "single member")]
    fn test_validate(group_size: u16, dishonest_threshold: u16, valid: bool) {
        let config = Config {
            group_size,
            dishonest_threshold,
            phase_timeout: Duration::from_secs(1),
        };
        assert_eq!(config.validate().is_ok(), valid);
    }

    #[test]
    fn test_zero_timeout_invalid() {
        let config = Config {
            group_size: 5,
            dishonest_threshold: 2,
            phase_timeout: Duration::ZERO,
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_phase_order() {
        let mut phase = Phase::Initializing;
        let mut visited = vec![phase];
        while !phase.is_terminal() {
            phase = phase.next();
            visited.push(phase);
        }
        assert_eq!(visited.len(), 8);
        assert_eq!(phase, Phase::Completed);
        assert_eq!(Phase::Aborted.next(), Phase::Aborted);
        assert!(visited.windows(2).all(|w| w[0] < w[1]));
    }
}
