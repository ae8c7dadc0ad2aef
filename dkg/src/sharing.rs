//! Verifiable secret sharing and pairwise share encryption.
//!
//! A dealer samples two polynomials `f` and `f'` of degree `dishonest_threshold`, publishes Pedersen
//! commitments `C_k = a_k·G + b_k·H` to their coefficients, and hands each recipient `j` the share
//! `(f(j), f'(j))`. Anyone holding a share can check it against the commitments without learning anything
//! about the secret `f(0)`.
//!
//! Shares are broadcast, so each one is sealed with ChaCha20-Poly1305 under a key derived from a
//! Diffie-Hellman exchange between the dealer's and the recipient's ephemeral keys for that pair.
//! Revealing the recipient's ephemeral private key ([Evidence]) lets anyone recompute the key and
//! re-check the share.

use crate::{
    primitives::{
        pedersen_generator, point_to_bytes,
        poly::{self, Poly},
        read_scalar, scalar_from_bytes, scalar_to_bytes, Point, Scalar, SCALAR_LENGTH,
    },
    MemberId,
};
use bytes::{Buf, BufMut};
use commonware_codec::{util::at_least, DecodeExt, Error as CodecError, FixedSize, Read, Write};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use p256::{elliptic_curve::Field, NonZeroScalar};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, fmt};
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of an encoded [Share].
pub const SHARE_LENGTH: usize = 2 * SCALAR_LENGTH;

/// Length of the authentication tag appended to a sealed share.
const TAG_LENGTH: usize = 16;

/// Length of an [EncryptedShare].
pub const ENCRYPTED_SHARE_LENGTH: usize = SHARE_LENGTH + TAG_LENGTH;

/// Length of [Evidence].
pub const EVIDENCE_LENGTH: usize = SCALAR_LENGTH;

/// Domain separation for the pairwise symmetric key.
const KEY_NAMESPACE: &[u8] = b"_BEACON_DKG_SHARE_KEY";

/// A share of a dealer's secret: the evaluation of the secret polynomial and of the blinding
/// polynomial at the recipient's identifier.
#[derive(Clone, Copy, PartialEq, Eq, Zeroize)]
pub struct Share {
    pub value: Scalar,
    pub blinding: Scalar,
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Share(..)")
    }
}

impl Write for Share {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&scalar_to_bytes(&self.value));
        buf.put_slice(&scalar_to_bytes(&self.blinding));
    }
}

impl Read for Share {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let value = read_scalar(buf)?;
        let blinding = read_scalar(buf)?;
        Ok(Self { value, blinding })
    }
}

impl FixedSize for Share {
    const SIZE: usize = SHARE_LENGTH;
}

/// A [Share] sealed to a single recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedShare([u8; ENCRYPTED_SHARE_LENGTH]);

impl EncryptedShare {
    pub fn as_bytes(&self) -> &[u8; ENCRYPTED_SHARE_LENGTH] {
        &self.0
    }
}

impl From<[u8; ENCRYPTED_SHARE_LENGTH]> for EncryptedShare {
    fn from(bytes: [u8; ENCRYPTED_SHARE_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl Write for EncryptedShare {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }
}

impl Read for EncryptedShare {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        at_least(buf, ENCRYPTED_SHARE_LENGTH)?;
        let mut bytes = [0u8; ENCRYPTED_SHARE_LENGTH];
        buf.copy_to_slice(&mut bytes);
        Ok(Self(bytes))
    }
}

impl FixedSize for EncryptedShare {
    const SIZE: usize = ENCRYPTED_SHARE_LENGTH;
}

/// An accuser's ephemeral private key for the accused pair, revealed so that anyone can decrypt
/// the disputed share.
///
/// Evidence is carried as raw bytes: it is only interpreted (and possibly found malformed) when the
/// accusation is resolved.
#[derive(Clone, PartialEq, Eq)]
pub struct Evidence([u8; EVIDENCE_LENGTH]);

impl Evidence {
    /// Interprets the evidence as an ephemeral private key.
    ///
    /// Returns `None` if it is not a canonical, non-zero scalar.
    pub fn private_key(&self) -> Option<Scalar> {
        let scalar = scalar_from_bytes(&self.0)?;
        if bool::from(scalar.is_zero()) {
            return None;
        }
        Some(scalar)
    }

    pub fn as_bytes(&self) -> &[u8; EVIDENCE_LENGTH] {
        &self.0
    }
}

impl From<[u8; EVIDENCE_LENGTH]> for Evidence {
    fn from(bytes: [u8; EVIDENCE_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Evidence({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl Write for Evidence {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }
}

impl Read for Evidence {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        at_least(buf, EVIDENCE_LENGTH)?;
        let mut bytes = [0u8; EVIDENCE_LENGTH];
        buf.copy_to_slice(&mut bytes);
        Ok(Self(bytes))
    }
}

impl FixedSize for Evidence {
    const SIZE: usize = EVIDENCE_LENGTH;
}

/// The output of a dealer: its secret polynomials, Pedersen commitments, and one share per recipient.
pub struct Dealing {
    secret: poly::Private,
    blinding: poly::Private,
    commitments: poly::Public,
    shares: BTreeMap<MemberId, Share>,
}

impl Dealing {
    /// Returns the Pedersen commitments `C_k = a_k·G + b_k·H`.
    pub fn commitments(&self) -> &poly::Public {
        &self.commitments
    }

    /// Returns the public key share points `A_k = a_k·G`.
    pub fn public_points(&self) -> poly::Public {
        self.secret.commit()
    }

    /// Returns the share addressed to `recipient`.
    pub fn share(&self, recipient: MemberId) -> Option<&Share> {
        self.shares.get(&recipient)
    }

    /// Returns every recipient the dealing has a share for.
    pub fn recipients(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.shares.keys().copied()
    }

    /// Replaces the share for `recipient` with one that does not match the commitments.
    #[cfg(test)]
    pub(crate) fn tamper(&mut self, recipient: MemberId) {
        if let Some(share) = self.shares.get_mut(&recipient) {
            share.value += Scalar::ONE;
        }
    }
}

impl Drop for Dealing {
    fn drop(&mut self) {
        self.secret.zeroize();
        self.blinding.zeroize();
        for share in self.shares.values_mut() {
            share.zeroize();
        }
    }
}

/// Generate a dealing of degree `threshold` with a share for every recipient.
pub fn generate_shares<R: RngCore + CryptoRng>(
    threshold: u16,
    recipients: impl IntoIterator<Item = MemberId>,
    rng: &mut R,
) -> Dealing {
    // Sample secret and blinding polynomials
    let secret = poly::new_from(threshold, rng);
    let blinding = poly::new_from(threshold, rng);

    // Commit to both at once
    let h = pedersen_generator();
    let commitments = Poly::from(
        secret
            .coefficients()
            .iter()
            .zip(blinding.coefficients())
            .map(|(a, b)| Point::GENERATOR * a + h * b)
            .collect(),
    );

    // Evaluate at each recipient
    let shares = recipients
        .into_iter()
        .map(|recipient| {
            let share = Share {
                value: secret.evaluate(recipient.get()).value,
                blinding: blinding.evaluate(recipient.get()).value,
            };
            (recipient, share)
        })
        .collect();
    Dealing {
        secret,
        blinding,
        commitments,
        shares,
    }
}

/// Verify a share against the Pedersen commitments of its dealer.
///
/// Returns `false` if the commitments do not have `threshold + 1` coefficients.
pub fn verify_share(
    dealer: MemberId,
    recipient: MemberId,
    share: &Share,
    commitments: &poly::Public,
    threshold: u16,
) -> bool {
    if commitments.required() != usize::from(threshold) + 1 {
        trace!(%dealer, %recipient, "commitment has wrong degree");
        return false;
    }
    let expected = commitments.evaluate_at(recipient.get());
    let actual = Point::GENERATOR * share.value + pedersen_generator() * share.blinding;
    actual == expected
}

/// Verify an encoded share against the Pedersen commitments of its dealer.
///
/// An encoding that is truncated, carries trailing bytes, or holds non-canonical scalars fails
/// verification.
pub fn verify_encoded_share(
    dealer: MemberId,
    recipient: MemberId,
    share: &[u8],
    commitments: &poly::Public,
    threshold: u16,
) -> bool {
    match Share::decode(share) {
        Ok(share) => verify_share(dealer, recipient, &share, commitments, threshold),
        Err(err) => {
            trace!(%dealer, %recipient, ?err, "share is malformed");
            false
        }
    }
}

/// Verify the secret part of a share against the public key share points of its dealer.
pub fn verify_public_share(
    recipient: MemberId,
    value: &Scalar,
    points: &poly::Public,
    threshold: u16,
) -> bool {
    if points.required() != usize::from(threshold) + 1 {
        return false;
    }
    points.evaluate_at(recipient.get()) == Point::GENERATOR * value
}

/// An ephemeral key pair used to agree on a symmetric key with a single peer.
#[derive(ZeroizeOnDrop)]
pub struct EphemeralKeyPair {
    private: Scalar,
    #[zeroize(skip)]
    public: Point,
}

impl EphemeralKeyPair {
    /// Generate a new key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let private = *NonZeroScalar::random(rng);
        let public = Point::GENERATOR * private;
        Self { private, public }
    }

    pub fn public(&self) -> Point {
        self.public
    }

    pub fn private(&self) -> &Scalar {
        &self.private
    }

    /// Reveal the private key as accusation evidence.
    pub fn evidence(&self) -> Evidence {
        Evidence(scalar_to_bytes(&self.private))
    }
}

/// Returns the public key that corresponds to an ephemeral private key.
pub fn ephemeral_public(private: &Scalar) -> Point {
    Point::GENERATOR * private
}

/// A symmetric key shared by exactly two members.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

/// Derive the symmetric key for the pair `(a, b)` from one side's ephemeral private key and the
/// other side's ephemeral public key.
///
/// The result does not depend on which side computes it.
pub fn derive_key(private: &Scalar, peer: &Point, a: MemberId, b: MemberId) -> SymmetricKey {
    let shared = *peer * private;
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(KEY_NAMESPACE);
    hasher.update(point_to_bytes(&shared));
    hasher.update(low.get().to_be_bytes());
    hasher.update(high.get().to_be_bytes());
    SymmetricKey(hasher.finalize().into())
}

/// Each key is used once per direction, so `(sender, recipient)` is a unique nonce.
fn nonce(sender: MemberId, recipient: MemberId) -> Nonce {
    let mut nonce = [0u8; 12];
    nonce[..2].copy_from_slice(&sender.get().to_be_bytes());
    nonce[2..4].copy_from_slice(&recipient.get().to_be_bytes());
    Nonce::from(nonce)
}

/// Seal a share from `sender` to `recipient`.
pub fn encrypt_share(
    key: &SymmetricKey,
    sender: MemberId,
    recipient: MemberId,
    share: &Share,
) -> EncryptedShare {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));
    let mut sealed = [0u8; ENCRYPTED_SHARE_LENGTH];
    {
        let (plaintext, _) = sealed.split_at_mut(SHARE_LENGTH);
        let mut writer = &mut plaintext[..];
        share.write(&mut writer);
    }
    let tag = cipher
        .encrypt_in_place_detached(&nonce(sender, recipient), &[], &mut sealed[..SHARE_LENGTH])
        .expect("share fits in a single block stream");
    sealed[SHARE_LENGTH..].copy_from_slice(&tag);
    EncryptedShare(sealed)
}

/// Open a share sealed from `sender` to `recipient`.
///
/// Returns `None` if authentication fails or the plaintext is not a well-formed share.
pub fn decrypt_share(
    key: &SymmetricKey,
    sender: MemberId,
    recipient: MemberId,
    encrypted: &EncryptedShare,
) -> Option<Share> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));
    let mut plaintext = [0u8; SHARE_LENGTH];
    plaintext.copy_from_slice(&encrypted.0[..SHARE_LENGTH]);
    let tag = Tag::clone_from_slice(&encrypted.0[SHARE_LENGTH..]);
    cipher
        .decrypt_in_place_detached(&nonce(sender, recipient), &[], &mut plaintext, &tag)
        .ok()?;
    let share = Share::decode(&plaintext[..]).ok();
    plaintext.zeroize();
    share
}
