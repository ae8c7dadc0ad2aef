//! Per-member state machine of a run.
//!
//! A [Member] is driven by three calls:
//!
//! * [Member::outbound] returns the message to broadcast in the current phase (at most once per phase).
//! * [Member::receive] records a message from a peer (buffering it if it belongs to a later phase).
//! * [Member::advance] ends the current phase, either because [Member::is_complete] holds or because
//!   the phase timed out.
//!
//! Ending a phase disqualifies every qualified member without a valid submission, resolves the
//! accusations of the phase, and checks that enough members remain qualified. The machine moves forward
//! only and stops in [Phase::Completed] or [Phase::Aborted].
//!
//! The [Member] performs no I/O and keeps no clock: [crate::Runner] owns both.

use crate::{
    complaint,
    group::Group,
    primitives::{poly, Point},
    reconstruction::{self, GroupKeyMaterial},
    sharing::{
        decrypt_share, derive_key, encrypt_share, generate_shares, verify_public_share,
        verify_share, Dealing, EncryptedShare, EphemeralKeyPair, Evidence, Share,
    },
    transcript::Transcript,
    wire::Payload,
    Abort, AbortReason, Config, Error, MemberId, Phase,
};
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

/// A participant in a run.
pub struct Member<R: RngCore + CryptoRng> {
    config: Config,
    me: MemberId,
    rng: R,

    phase: Phase,
    group: Group,
    transcript: Transcript,

    sent: bool,
    seen: BTreeSet<MemberId>,
    pending: BTreeMap<Phase, Vec<(MemberId, Payload)>>,

    ephemeral: BTreeMap<MemberId, EphemeralKeyPair>,
    dealing: Option<Dealing>,
    received: BTreeMap<MemberId, Share>,

    outcome: Option<Result<GroupKeyMaterial, Abort>>,

    #[cfg(test)]
    tampered: BTreeSet<MemberId>,
    #[cfg(test)]
    false_points: bool,
}

impl<R: RngCore + CryptoRng> Member<R> {
    /// Create a new member with identifier `me`.
    pub fn new(config: Config, me: MemberId, rng: R) -> Result<Self, Error> {
        config.validate()?;
        if !config.contains(me) {
            return Err(Error::InvalidMember(me));
        }
        let group = Group::new(config.group_size, config.dishonest_threshold);
        Ok(Self {
            config,
            me,
            rng,

            phase: Phase::Initializing,
            group,
            transcript: Transcript::new(),

            sent: false,
            seen: BTreeSet::new(),
            pending: BTreeMap::new(),

            ephemeral: BTreeMap::new(),
            dealing: None,
            received: BTreeMap::new(),

            outcome: None,

            #[cfg(test)]
            tampered: BTreeSet::new(),
            #[cfg(test)]
            false_points: false,
        })
    }

    pub fn me(&self) -> MemberId {
        self.me
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    /// Seal a share for `recipient` that does not match our commitments.
    #[cfg(test)]
    pub(crate) fn tamper(&mut self, recipient: MemberId) {
        self.tampered.insert(recipient);
    }

    /// Publish public key share points for a polynomial that was never dealt.
    #[cfg(test)]
    pub(crate) fn publish_false_points(&mut self) {
        self.false_points = true;
    }

    /// Returns the message to broadcast in the current phase.
    ///
    /// The message is also recorded locally, so it counts towards the completion of the phase. Returns
    /// `None` once the message of the phase has been produced (or if the run is over).
    pub fn outbound(&mut self) -> Option<Payload> {
        if self.phase.is_terminal() || self.sent {
            return None;
        }
        self.sent = true;
        let payload = match self.phase {
            Phase::Initializing => Payload::Join,
            Phase::EphemeralKeyExchange => Payload::EphemeralPublicKeys(self.ephemeral_keys()),
            Phase::CommitmentDistribution => {
                let dealing = generate_shares(
                    self.config.dishonest_threshold,
                    self.group.qualified_member_ids(),
                    &mut self.rng,
                );
                let commitments = dealing.commitments().clone();
                self.dealing = Some(dealing);
                Payload::Commitments(commitments)
            }
            Phase::ShareDistribution => Payload::EncryptedShares(self.seal_shares()?),
            Phase::Accusation => Payload::SharesAccusations(self.check_shares()),
            Phase::Qualification => Payload::PublicKeySharePoints(self.public_points()?),
            Phase::KeyReconstruction => Payload::PointsAccusations(self.check_points()),
            Phase::Completed | Phase::Aborted => return None,
        };
        if let Err(err) = self.record(self.me, payload.clone()) {
            warn!(me = %self.me, phase = %self.phase, ?err, "failed to record own message");
        }
        Some(payload)
    }

    /// Handle a message from `sender`.
    ///
    /// Messages for a later phase are buffered until that phase starts. Messages for an earlier phase,
    /// duplicates, and messages from disqualified members are rejected. A rejected message is treated as
    /// if it was never sent.
    pub fn receive(&mut self, sender: MemberId, payload: Payload) -> Result<(), Error> {
        if !self.config.contains(sender) {
            return Err(Error::InvalidMember(sender));
        }
        if sender == self.me {
            return Err(Error::Duplicate(sender));
        }
        let phase = payload.phase();
        if self.phase.is_terminal() || phase < self.phase {
            return Err(Error::UnexpectedPhase {
                expected: self.phase,
                got: phase,
            });
        }
        if phase > self.phase {
            let pending = self.pending.entry(phase).or_default();
            if pending.iter().any(|(existing, _)| *existing == sender) {
                return Err(Error::Duplicate(sender));
            }
            debug!(me = %self.me, %sender, %phase, "buffered message for later phase");
            pending.push((sender, payload));
            return Ok(());
        }
        self.record(sender, payload)
    }

    /// Returns whether every qualified member has submitted in the current phase.
    ///
    /// In [Phase::Initializing], returns whether every member of the group has joined.
    pub fn is_complete(&self) -> bool {
        match self.phase {
            Phase::Completed | Phase::Aborted => false,
            Phase::Initializing => {
                self.group.member_ids().len() == usize::from(self.config.group_size)
            }
            _ => self
                .group
                .qualified_member_ids()
                .iter()
                .all(|id| self.seen.contains(id)),
        }
    }

    /// End the current phase and enter the next one.
    ///
    /// Returns the phase the member is in afterwards. Calling this on a terminal member does nothing.
    pub fn advance(&mut self) -> Phase {
        if self.phase.is_terminal() {
            return self.phase;
        }
        let phase = self.phase;

        // Members without a valid submission are at fault
        for id in self.group.qualified_member_ids() {
            if !self.transcript.has_record(phase, id) {
                info!(me = %self.me, %phase, member = %id, "disqualifying silent member");
                self.disqualify(id);
            }
        }

        // Resolve accusations raised in this phase
        if matches!(phase, Phase::Accusation | Phase::KeyReconstruction) {
            let accusations = self.transcript.accusations(phase);
            let resolution =
                complaint::resolve(&self.group, phase, &accusations, &self.transcript);
            for id in resolution.disqualified {
                info!(me = %self.me, %phase, member = %id, "disqualifying accused member");
                self.disqualify(id);
            }
        }

        // Ensure enough members remain
        if !self.group.has_quorum() {
            let required = self.group.quorum();
            self.abort_in(phase, AbortReason::QuorumLost { required });
            return self.phase;
        }
        if !self.group.is_qualified(self.me) {
            self.abort_in(phase, AbortReason::Disqualified);
            return self.phase;
        }

        // Combine the key once all accusations are resolved
        if phase == Phase::KeyReconstruction {
            match reconstruction::combine(self.me, &self.group, &self.transcript, &self.received) {
                Ok(material) => {
                    info!(
                        me = %self.me,
                        qualified = material.qualified().len(),
                        disqualified = material.disqualified().len(),
                        "generated group key"
                    );
                    self.phase = Phase::Completed;
                    self.outcome = Some(Ok(material));
                }
                Err(err) => {
                    warn!(me = %self.me, ?err, "failed to combine group key");
                    self.abort_in(phase, AbortReason::Reconstruction);
                }
            }
            return self.phase;
        }

        // Enter the next phase and replay anything buffered for it
        self.phase = phase.next();
        self.sent = false;
        self.seen.clear();
        info!(
            me = %self.me,
            phase = %self.phase,
            qualified = self.group.qualified_count(),
            "entered phase"
        );
        if let Some(pending) = self.pending.remove(&self.phase) {
            for (sender, payload) in pending {
                if let Err(err) = self.record(sender, payload) {
                    debug!(me = %self.me, %sender, ?err, "dropped buffered message");
                }
            }
        }
        self.phase
    }

    /// Abort the run (no-op if it is already over).
    pub fn abort(&mut self, reason: AbortReason) {
        if self.phase.is_terminal() {
            return;
        }
        self.abort_in(self.phase, reason);
    }

    /// Returns the outcome of the run once it is over.
    ///
    /// The outcome is handed out only once.
    pub fn take_outcome(&mut self) -> Option<Result<GroupKeyMaterial, Abort>> {
        self.outcome.take()
    }

    fn abort_in(&mut self, phase: Phase, reason: AbortReason) {
        let qualified = self.group.qualified_count();
        warn!(me = %self.me, %phase, qualified, %reason, "aborted");
        self.phase = Phase::Aborted;
        self.pending.clear();
        self.outcome = Some(Err(Abort {
            phase,
            qualified,
            reason,
        }));
    }

    fn disqualify(&mut self, id: MemberId) {
        if let Err(err) = self.group.disqualify_member_id(id) {
            debug!(me = %self.me, member = %id, ?err, "failed to disqualify");
        }
    }

    /// Returns every qualified member other than `member`.
    fn peers_of(&self, member: MemberId) -> BTreeSet<MemberId> {
        self.group
            .qualified_member_ids()
            .into_iter()
            .filter(|id| *id != member)
            .collect()
    }

    /// Validate and record a message for the current phase.
    fn record(&mut self, sender: MemberId, payload: Payload) -> Result<(), Error> {
        let phase = self.phase;
        if payload.phase() != phase {
            return Err(Error::UnexpectedPhase {
                expected: phase,
                got: payload.phase(),
            });
        }
        if phase != Phase::Initializing && !self.group.is_qualified(sender) {
            if self.group.is_disqualified(sender) {
                return Err(Error::Disqualified(sender));
            }
            return Err(Error::UnknownMember(sender));
        }

        // The first message of a sender in a phase is its submission, valid or not
        if !self.seen.insert(sender) {
            return Err(Error::Duplicate(sender));
        }
        let recorded = match payload {
            Payload::Join => {
                self.group.register_member_id(sender)?;
                true
            }
            Payload::EphemeralPublicKeys(keys) => {
                if !keys.keys().copied().eq(self.peers_of(sender)) {
                    return Err(Error::MalformedMessage(
                        "ephemeral keys do not cover the qualified peers".into(),
                    ));
                }
                self.transcript.record_ephemeral_keys(sender, keys)
            }
            Payload::Commitments(commitments) => {
                if commitments.required() != self.config.quorum() {
                    return Err(Error::VerificationFailure(sender));
                }
                self.transcript.record_commitments(sender, commitments)
            }
            Payload::EncryptedShares(shares) => {
                if !shares.keys().copied().eq(self.peers_of(sender)) {
                    return Err(Error::MalformedMessage(
                        "shares do not cover the qualified peers".into(),
                    ));
                }
                self.transcript.record_encrypted_shares(sender, shares)
            }
            Payload::SharesAccusations(accusations) | Payload::PointsAccusations(accusations) => {
                if let Some(accused) = accusations.keys().find(|id| !self.config.contains(**id)) {
                    return Err(Error::InvalidMember(*accused));
                }
                self.transcript
                    .record_accusations(phase, sender, accusations)
            }
            Payload::PublicKeySharePoints(points) => {
                if points.required() != self.config.quorum() {
                    return Err(Error::VerificationFailure(sender));
                }
                self.transcript.record_public_points(sender, points)
            }
        };
        if !recorded {
            return Err(Error::Duplicate(sender));
        }
        debug!(me = %self.me, %sender, %phase, "recorded message");
        Ok(())
    }

    /// Generate one ephemeral key pair per qualified peer.
    fn ephemeral_keys(&mut self) -> BTreeMap<MemberId, Point> {
        let mut keys = BTreeMap::new();
        for peer in self.peers_of(self.me) {
            let pair = EphemeralKeyPair::generate(&mut self.rng);
            keys.insert(peer, pair.public());
            self.ephemeral.insert(peer, pair);
        }
        keys
    }

    /// Seal our share for each qualified peer.
    fn seal_shares(&mut self) -> Option<BTreeMap<MemberId, EncryptedShare>> {
        let peers = self.peers_of(self.me);
        let dealing = self.dealing.as_mut()?;
        #[cfg(test)]
        for recipient in &self.tampered {
            dealing.tamper(*recipient);
        }
        let mut shares = BTreeMap::new();
        for peer in peers {
            let (Some(pair), Some(public), Some(share)) = (
                self.ephemeral.get(&peer),
                self.transcript.ephemeral_key(peer, self.me),
                dealing.share(peer),
            ) else {
                warn!(me = %self.me, %peer, "missing key material for peer");
                continue;
            };
            let key = derive_key(pair.private(), public, self.me, peer);
            shares.insert(peer, encrypt_share(&key, self.me, peer, share));
        }
        Some(shares)
    }

    /// Returns the Feldman commitments to our secret polynomial.
    fn public_points(&mut self) -> Option<poly::Public> {
        #[cfg(test)]
        if self.false_points {
            return Some(poly::new_from(self.config.dishonest_threshold, &mut self.rng).commit());
        }
        Some(self.dealing.as_ref()?.public_points())
    }

    /// Open and check the share of every qualified dealer, accusing those that fail.
    fn check_shares(&mut self) -> BTreeMap<MemberId, Evidence> {
        let threshold = self.config.dishonest_threshold;
        let mut accusations = BTreeMap::new();
        for dealer in self.group.qualified_member_ids() {
            if dealer == self.me {
                if let Some(share) = self.dealing.as_ref().and_then(|d| d.share(self.me)) {
                    self.received.insert(self.me, *share);
                }
                continue;
            }
            let Some(pair) = self.ephemeral.get(&dealer) else {
                continue;
            };
            let share = match (
                self.transcript.ephemeral_key(dealer, self.me),
                self.transcript.encrypted_share(dealer, self.me),
                self.transcript.commitments(dealer),
            ) {
                (Some(public), Some(encrypted), Some(commitments)) => {
                    let key = derive_key(pair.private(), public, self.me, dealer);
                    decrypt_share(&key, dealer, self.me, encrypted).filter(|share| {
                        verify_share(dealer, self.me, share, commitments, threshold)
                    })
                }
                _ => None,
            };
            match share {
                Some(share) => {
                    self.received.insert(dealer, share);
                }
                None => {
                    warn!(me = %self.me, %dealer, "share failed verification");
                    accusations.insert(dealer, pair.evidence());
                }
            }
        }
        accusations
    }

    /// Check every held share against its dealer's public key share points, accusing those that fail.
    fn check_points(&mut self) -> BTreeMap<MemberId, Evidence> {
        let threshold = self.config.dishonest_threshold;
        let mut accusations = BTreeMap::new();
        for dealer in self.peers_of(self.me) {
            let (Some(points), Some(share), Some(pair)) = (
                self.transcript.public_points(dealer),
                self.received.get(&dealer),
                self.ephemeral.get(&dealer),
            ) else {
                continue;
            };
            if !verify_public_share(self.me, &share.value, points, threshold) {
                warn!(me = %self.me, %dealer, "share does not match public key share points");
                accusations.insert(dealer, pair.evidence());
            }
        }
        accusations
    }
}

impl<R: RngCore + CryptoRng> Drop for Member<R> {
    fn drop(&mut self) {
        for share in self.received.values_mut() {
            share.zeroize();
        }
    }
}
