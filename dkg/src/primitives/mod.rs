//! Operations over the NIST P-256 group.
//!
//! All arithmetic of the key generation (share generation, commitments, and the final
//! group key) happens over the P-256 scalar field and curve group. This module pins the
//! canonical fixed-width encodings used on the wire:
//!
//! * [Scalar]: 32 bytes, big-endian, rejected if not reduced modulo the group order.
//! * [Point]: 33 bytes, SEC 1 compressed, rejected if not on the curve or the identity.
//!
//! # Warning
//!
//! The second Pedersen generator ([pedersen_generator]) is derived with hash-to-curve so that
//! nobody knows its discrete logarithm with respect to [Point::GENERATOR]. Replacing it with a
//! multiple of the generator breaks the hiding property of the commitments.

use bytes::Buf;
use commonware_codec::{util::at_least, Error as CodecError};
use p256::{
    elliptic_curve::{
        group::GroupEncoding,
        hash2curve::{ExpandMsgXmd, GroupDigest},
        PrimeField,
    },
    CompressedPoint, FieldBytes, NistP256,
};
use sha2::Sha256;
use std::sync::OnceLock;

pub mod poly;

pub use p256::{ProjectivePoint as Point, Scalar};

/// Length of an encoded [Scalar].
pub const SCALAR_LENGTH: usize = 32;

/// Length of an encoded [Point].
pub const POINT_LENGTH: usize = 33;

/// Domain separation tag used to derive the second Pedersen generator.
const PEDERSEN_DST: &[u8] = b"BEACON_DKG_P256_XMD:SHA-256_SSWU_RO_PEDERSEN_H_";

/// Returns the second generator `H` used by Pedersen commitments.
pub fn pedersen_generator() -> Point {
    static H: OnceLock<Point> = OnceLock::new();
    *H.get_or_init(|| {
        let msg: &[u8] = b"pedersen";
        NistP256::hash_from_bytes::<ExpandMsgXmd<Sha256>>(&[msg], &[PEDERSEN_DST])
            .expect("domain separation tag is valid")
    })
}

/// Converts a small integer into a scalar.
pub fn scalar_from_u64(value: u64) -> Scalar {
    Scalar::from(value)
}

/// Canonically serializes a scalar.
pub fn scalar_to_bytes(scalar: &Scalar) -> [u8; SCALAR_LENGTH] {
    scalar.to_bytes().into()
}

/// Deserializes a canonically encoded scalar.
///
/// Returns `None` if the input has the wrong width or is not reduced.
pub fn scalar_from_bytes(bytes: &[u8]) -> Option<Scalar> {
    let bytes: [u8; SCALAR_LENGTH] = bytes.try_into().ok()?;
    Option::from(Scalar::from_repr(FieldBytes::from(bytes)))
}

/// Canonically serializes a point.
pub fn point_to_bytes(point: &Point) -> [u8; POINT_LENGTH] {
    let mut out = [0u8; POINT_LENGTH];
    out.copy_from_slice(point.to_bytes().as_slice());
    out
}

/// Deserializes a canonically encoded point.
///
/// Returns `None` if the input has the wrong width, does not start with a compressed tag
/// (`0x02` or `0x03`), is not on the curve, or is the identity.
pub fn point_from_bytes(bytes: &[u8]) -> Option<Point> {
    if bytes.len() != POINT_LENGTH || !matches!(bytes[0], 0x02 | 0x03) {
        return None;
    }
    let repr = CompressedPoint::clone_from_slice(bytes);
    let point: Point = Option::from(Point::from_bytes(&repr))?;
    if point == Point::IDENTITY {
        return None;
    }
    Some(point)
}

/// Reads a canonically encoded [Scalar].
pub fn read_scalar(buf: &mut impl Buf) -> Result<Scalar, CodecError> {
    at_least(buf, SCALAR_LENGTH)?;
    let mut bytes = [0u8; SCALAR_LENGTH];
    buf.copy_to_slice(&mut bytes);
    scalar_from_bytes(&bytes).ok_or(CodecError::Invalid("Scalar", "not canonical"))
}

/// Reads a canonically encoded [Point].
pub fn read_point(buf: &mut impl Buf) -> Result<Point, CodecError> {
    at_least(buf, POINT_LENGTH)?;
    let mut bytes = [0u8; POINT_LENGTH];
    buf.copy_to_slice(&mut bytes);
    point_from_bytes(&bytes).ok_or(CodecError::Invalid("Point", "not a valid point"))
}
