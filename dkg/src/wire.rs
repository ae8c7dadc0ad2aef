//! Typed payloads exchanged between members.
//!
//! Each payload is broadcast with a type tag (see [Payload::tag]) that selects its decoder on the
//! receiving side. The body of a payload never carries the tag itself.

use crate::{
    primitives::{point_to_bytes, poly, read_point, Point, POINT_LENGTH},
    sharing::{EncryptedShare, Evidence},
    Config, Error, MemberId, Phase,
};
use bytes::{Buf, BufMut, Bytes};
use commonware_codec::{
    util::at_least, Decode, EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write,
};
use std::collections::BTreeMap;

/// Tag of [Payload::Join].
pub const JOIN: &str = "dkg/join";

/// Tag of [Payload::EphemeralPublicKeys].
pub const EPHEMERAL_PUBLIC_KEYS: &str = "dkg/ephemeral_public_keys";

/// Tag of [Payload::Commitments].
pub const COMMITMENTS: &str = "dkg/commitments";

/// Tag of [Payload::EncryptedShares].
pub const ENCRYPTED_SHARES: &str = "dkg/encrypted_shares";

/// Tag of [Payload::SharesAccusations].
pub const SHARES_ACCUSATIONS: &str = "dkg/shares_accusations";

/// Tag of [Payload::PublicKeySharePoints].
pub const PUBLIC_KEY_SHARE_POINTS: &str = "dkg/public_key_share_points";

/// Tag of [Payload::PointsAccusations].
pub const POINTS_ACCUSATIONS: &str = "dkg/points_accusations";

/// Every tag a member understands.
pub const TAGS: [&str; 7] = [
    JOIN,
    EPHEMERAL_PUBLIC_KEYS,
    COMMITMENTS,
    ENCRYPTED_SHARES,
    SHARES_ACCUSATIONS,
    PUBLIC_KEY_SHARE_POINTS,
    POINTS_ACCUSATIONS,
];

impl Write for MemberId {
    fn write(&self, buf: &mut impl BufMut) {
        self.get().write(buf);
    }
}

impl Read for MemberId {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let id = u16::read(buf)?;
        if id == 0 {
            return Err(CodecError::Invalid("MemberId", "zero"));
        }
        Ok(MemberId::new(id))
    }
}

impl FixedSize for MemberId {
    const SIZE: usize = u16::SIZE;
}

/// A message of the protocol, one variant per phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Announce presence in the group.
    Join,
    /// One ephemeral public key per peer, keyed by that peer.
    EphemeralPublicKeys(BTreeMap<MemberId, Point>),
    /// Pedersen commitments to the dealer's polynomials.
    Commitments(poly::Public),
    /// One sealed share per peer, keyed by the recipient.
    EncryptedShares(BTreeMap<MemberId, EncryptedShare>),
    /// Evidence against dealers whose share failed the Pedersen check, keyed by the accused.
    SharesAccusations(BTreeMap<MemberId, Evidence>),
    /// Feldman commitments `a_k·G` to the dealer's secret polynomial.
    PublicKeySharePoints(poly::Public),
    /// Evidence against dealers whose share failed the Feldman check, keyed by the accused.
    PointsAccusations(BTreeMap<MemberId, Evidence>),
}

impl Payload {
    /// Returns the type tag of the payload.
    pub fn tag(&self) -> &'static str {
        match self {
            Payload::Join => JOIN,
            Payload::EphemeralPublicKeys(_) => EPHEMERAL_PUBLIC_KEYS,
            Payload::Commitments(_) => COMMITMENTS,
            Payload::EncryptedShares(_) => ENCRYPTED_SHARES,
            Payload::SharesAccusations(_) => SHARES_ACCUSATIONS,
            Payload::PublicKeySharePoints(_) => PUBLIC_KEY_SHARE_POINTS,
            Payload::PointsAccusations(_) => POINTS_ACCUSATIONS,
        }
    }

    /// Returns the phase in which the payload is expected.
    pub fn phase(&self) -> Phase {
        match self {
            Payload::Join => Phase::Initializing,
            Payload::EphemeralPublicKeys(_) => Phase::EphemeralKeyExchange,
            Payload::Commitments(_) => Phase::CommitmentDistribution,
            Payload::EncryptedShares(_) => Phase::ShareDistribution,
            Payload::SharesAccusations(_) => Phase::Accusation,
            Payload::PublicKeySharePoints(_) => Phase::Qualification,
            Payload::PointsAccusations(_) => Phase::KeyReconstruction,
        }
    }

    /// Decode the body of a payload broadcast with `tag`.
    ///
    /// Unknown tags and bodies that do not decode exactly are both malformed.
    pub fn decode(tag: &str, body: Bytes, cfg: &Config) -> Result<Self, Error> {
        let peers = usize::from(cfg.group_size.saturating_sub(1));
        let coefficients = cfg.quorum();
        let payload = match tag {
            JOIN => {
                if !body.is_empty() {
                    return Err(CodecError::ExtraData(body.len()).into());
                }
                Payload::Join
            }
            EPHEMERAL_PUBLIC_KEYS => Payload::EphemeralPublicKeys(Map::decode_cfg(body, &peers)?.0),
            COMMITMENTS => Payload::Commitments(poly::Public::decode_cfg(body, &coefficients)?),
            ENCRYPTED_SHARES => Payload::EncryptedShares(Map::decode_cfg(body, &peers)?.0),
            SHARES_ACCUSATIONS => Payload::SharesAccusations(Map::decode_cfg(body, &peers)?.0),
            PUBLIC_KEY_SHARE_POINTS => {
                Payload::PublicKeySharePoints(poly::Public::decode_cfg(body, &coefficients)?)
            }
            POINTS_ACCUSATIONS => Payload::PointsAccusations(Map::decode_cfg(body, &peers)?.0),
            _ => return Err(Error::MalformedMessage(format!("unknown tag: {tag}"))),
        };
        Ok(payload)
    }
}

impl Write for Payload {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Payload::Join => {}
            Payload::EphemeralPublicKeys(keys) => write_map(keys, buf),
            Payload::Commitments(commitments) => commitments.write(buf),
            Payload::EncryptedShares(shares) => write_map(shares, buf),
            Payload::SharesAccusations(accusations) => write_map(accusations, buf),
            Payload::PublicKeySharePoints(points) => points.write(buf),
            Payload::PointsAccusations(accusations) => write_map(accusations, buf),
        }
    }
}

impl EncodeSize for Payload {
    fn encode_size(&self) -> usize {
        match self {
            Payload::Join => 0,
            Payload::EphemeralPublicKeys(keys) => map_size(keys),
            Payload::Commitments(commitments) => commitments.encode_size(),
            Payload::EncryptedShares(shares) => map_size(shares),
            Payload::SharesAccusations(accusations) => map_size(accusations),
            Payload::PublicKeySharePoints(points) => points.encode_size(),
            Payload::PointsAccusations(accusations) => map_size(accusations),
        }
    }
}

/// A value stored in a [Map].
trait Entry: Sized {
    const SIZE: usize;

    fn write_entry(&self, buf: &mut impl BufMut);

    fn read_entry(buf: &mut impl Buf) -> Result<Self, CodecError>;
}

impl Entry for Point {
    const SIZE: usize = POINT_LENGTH;

    fn write_entry(&self, buf: &mut impl BufMut) {
        buf.put_slice(&point_to_bytes(self));
    }

    fn read_entry(buf: &mut impl Buf) -> Result<Self, CodecError> {
        read_point(buf)
    }
}

impl Entry for EncryptedShare {
    const SIZE: usize = <EncryptedShare as FixedSize>::SIZE;

    fn write_entry(&self, buf: &mut impl BufMut) {
        self.write(buf);
    }

    fn read_entry(buf: &mut impl Buf) -> Result<Self, CodecError> {
        Self::read(buf)
    }
}

impl Entry for Evidence {
    const SIZE: usize = <Evidence as FixedSize>::SIZE;

    fn write_entry(&self, buf: &mut impl BufMut) {
        self.write(buf);
    }

    fn read_entry(buf: &mut impl Buf) -> Result<Self, CodecError> {
        Self::read(buf)
    }
}

fn write_map<V: Entry>(map: &BTreeMap<MemberId, V>, buf: &mut impl BufMut) {
    let len = u16::try_from(map.len()).expect("map is bounded by the group size");
    len.write(buf);
    for (id, value) in map {
        id.write(buf);
        value.write_entry(buf);
    }
}

fn map_size<V: Entry>(map: &BTreeMap<MemberId, V>) -> usize {
    u16::SIZE + map.len() * (MemberId::SIZE + V::SIZE)
}

/// A map keyed by member, encoded as a count followed by entries in ascending key order.
struct Map<V>(BTreeMap<MemberId, V>);

impl<V: Entry> Read for Map<V> {
    /// Maximum number of entries.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max: &usize) -> Result<Self, CodecError> {
        let len = usize::from(u16::read(buf)?);
        if len > *max {
            return Err(CodecError::InvalidLength(len));
        }
        at_least(buf, len * (MemberId::SIZE + V::SIZE))?;
        let mut map = BTreeMap::new();
        let mut last = None;
        for _ in 0..len {
            let id = MemberId::read(buf)?;
            if last.is_some_and(|last| id <= last) {
                return Err(CodecError::Invalid("Map", "keys not strictly ascending"));
            }
            last = Some(id);
            map.insert(id, V::read_entry(buf)?);
        }
        Ok(Self(map))
    }
}
