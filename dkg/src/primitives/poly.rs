//! Polynomial operations over the P-256 scalar field.
//!
//! A [Poly] is a list of coefficients, lowest degree first. Scalar polynomials hold the
//! secrets a dealer shares and point polynomials hold commitments to them. Evaluation points
//! are member identifiers and are never zero (the constant term is the secret).

use super::{point_to_bytes, read_point, read_scalar, scalar_to_bytes, Point, Scalar};
use super::{POINT_LENGTH, SCALAR_LENGTH};
use bytes::{Buf, BufMut};
use commonware_codec::{util::at_least, EncodeSize, Error as CodecError, Read, Write};
use p256::elliptic_curve::Field;
use rand::{CryptoRng, RngCore};
use std::ops::{Add, Mul};
use thiserror::Error;
use zeroize::Zeroize;

/// Errors that can occur when interpolating a polynomial.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("not enough evaluations: required {0}, have {1}")]
    NotEnoughEvaluations(usize, usize),
    #[error("duplicate evaluation index: {0}")]
    DuplicateIndex(u16),
    #[error("evaluation at zero")]
    ZeroIndex,
}

/// An element that polynomial coefficients can be drawn from.
pub trait Element: Copy + Eq + Add<Output = Self> + Mul<Scalar, Output = Self> {
    /// Length of the canonical encoding.
    const SIZE: usize;

    /// Returns the additive identity.
    fn zero() -> Self;

    /// Writes the canonical encoding.
    fn write_element(&self, buf: &mut impl BufMut);

    /// Reads a canonical encoding, rejecting anything else.
    fn read_element(buf: &mut impl Buf) -> Result<Self, CodecError>;
}

impl Element for Scalar {
    const SIZE: usize = SCALAR_LENGTH;

    fn zero() -> Self {
        Scalar::ZERO
    }

    fn write_element(&self, buf: &mut impl BufMut) {
        buf.put_slice(&scalar_to_bytes(self));
    }

    fn read_element(buf: &mut impl Buf) -> Result<Self, CodecError> {
        read_scalar(buf)
    }
}

impl Element for Point {
    const SIZE: usize = POINT_LENGTH;

    fn zero() -> Self {
        Point::IDENTITY
    }

    fn write_element(&self, buf: &mut impl BufMut) {
        buf.put_slice(&point_to_bytes(self));
    }

    fn read_element(buf: &mut impl Buf) -> Result<Self, CodecError> {
        read_point(buf)
    }
}

/// A polynomial evaluation at a specific (non-zero) index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eval<C> {
    pub index: u16,
    pub value: C,
}

/// Coefficients of a polynomial, lowest degree first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poly<C>(Vec<C>);

/// Secret polynomials are used to generate shares.
pub type Private = Poly<Scalar>;

/// Public polynomials commit to the coefficients of a secret polynomial.
pub type Public = Poly<Point>;

/// Returns a scalar polynomial of the given degree with random coefficients.
///
/// In the context of secret sharing, the reconstruction threshold is `degree + 1`.
pub fn new_from<R: RngCore + CryptoRng>(degree: u16, rng: &mut R) -> Private {
    let coeffs = (0..=degree).map(|_| Scalar::random(&mut *rng)).collect();
    Poly(coeffs)
}

impl<C> Poly<C> {
    /// Creates a polynomial from its coefficients.
    pub fn from(coeffs: Vec<C>) -> Self {
        Self(coeffs)
    }

    /// Returns the constant term.
    pub fn constant(&self) -> &C {
        &self.0[0]
    }

    /// Returns the number of coefficients (`degree + 1`).
    pub fn required(&self) -> usize {
        self.0.len()
    }

    /// Returns the coefficients, lowest degree first.
    pub fn coefficients(&self) -> &[C] {
        &self.0
    }
}

impl<C: Element> Poly<C> {
    /// Evaluates the polynomial at `x` with Horner's method.
    pub fn evaluate(&self, x: u16) -> Eval<C> {
        let xi = Scalar::from(u64::from(x));
        let value = self
            .0
            .iter()
            .rev()
            .fold(C::zero(), |sum, coeff| sum * xi + *coeff);
        Eval { index: x, value }
    }

    /// Recovers the constant term from at least `t` evaluations with Lagrange interpolation.
    ///
    /// Evaluations are sorted by index and the first `t` are used, so two invocations over the
    /// same set always select the same evaluations.
    pub fn recover<'a, I>(t: usize, evals: I) -> Result<C, Error>
    where
        C: 'a,
        I: IntoIterator<Item = &'a Eval<C>>,
    {
        let mut evals = evals.into_iter().collect::<Vec<_>>();
        if evals.len() < t {
            return Err(Error::NotEnoughEvaluations(t, evals.len()));
        }
        evals.sort_by_key(|e| e.index);
        evals.truncate(t);

        let indices = evals.iter().map(|e| e.index).collect::<Vec<_>>();
        evals.iter().try_fold(C::zero(), |acc, eval| {
            let weight = lagrange_coefficient(eval.index, &indices)?;
            Ok(acc + eval.value * weight)
        })
    }
}

impl<C: Zeroize> Zeroize for Poly<C> {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Private {
    /// Commits to every coefficient with the generator, producing `a_k·G`.
    pub fn commit(&self) -> Public {
        Poly(self.0.iter().map(|c| Point::GENERATOR * c).collect())
    }
}

impl Public {
    /// Evaluates the commitment at `x`, i.e. computes `Σ_k C_k·x^k`.
    pub fn evaluate_at(&self, x: u16) -> Point {
        self.evaluate(x).value
    }
}

/// Computes the Lagrange basis coefficient `λ_i(0)` for `index` over `indices`.
///
/// `indices` must contain `index`, be free of duplicates, and never contain zero.
pub fn lagrange_coefficient(index: u16, indices: &[u16]) -> Result<Scalar, Error> {
    if index == 0 {
        return Err(Error::ZeroIndex);
    }
    let xi = Scalar::from(u64::from(index));
    let mut num = Scalar::ONE;
    let mut den = Scalar::ONE;
    let mut seen = false;
    for &j in indices {
        if j == 0 {
            return Err(Error::ZeroIndex);
        }
        if j == index {
            if seen {
                return Err(Error::DuplicateIndex(j));
            }
            seen = true;
            continue;
        }
        let xj = Scalar::from(u64::from(j));
        num *= xj;
        den *= xj - xi;
    }
    let inv = Option::<Scalar>::from(den.invert()).ok_or(Error::DuplicateIndex(index))?;
    Ok(num * inv)
}

impl<C: Element> Write for Poly<C> {
    fn write(&self, buf: &mut impl BufMut) {
        for c in &self.0 {
            c.write_element(buf);
        }
    }
}

impl<C: Element> EncodeSize for Poly<C> {
    fn encode_size(&self) -> usize {
        C::SIZE * self.0.len()
    }
}

impl<C: Element> Read for Poly<C> {
    /// Exact number of coefficients expected.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, expected: &usize) -> Result<Self, CodecError> {
        if *expected == 0 {
            return Err(CodecError::Invalid("Poly", "no coefficients"));
        }
        at_least(buf, C::SIZE * expected)?;
        let mut coeffs = Vec::with_capacity(*expected);
        for _ in 0..*expected {
            coeffs.push(C::read_element(buf)?);
        }
        Ok(Self(coeffs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{Decode, Encode};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_degree() {
        let mut rng = StdRng::seed_from_u64(0);
        let p = new_from(4, &mut rng);
        assert_eq!(p.required(), 5);
    }

    #[test]
    fn test_evaluate_matches_naive() {
        // f(x) = 3 + 2x + x^2
        let p = Poly::from(vec![
            Scalar::from(3u64),
            Scalar::from(2u64),
            Scalar::from(1u64),
        ]);
        assert_eq!(p.evaluate(1).value, Scalar::from(6u64));
        assert_eq!(p.evaluate(4).value, Scalar::from(27u64));
    }

    #[test]
    fn test_commitment_is_homomorphic() {
        let mut rng = StdRng::seed_from_u64(1);
        let p = new_from(3, &mut rng);
        let commitment = p.commit();
        for x in 1..=7u16 {
            assert_eq!(
                commitment.evaluate_at(x),
                Point::GENERATOR * p.evaluate(x).value
            );
        }
    }

    #[test]
    fn test_recover() {
        let mut rng = StdRng::seed_from_u64(2);
        let p = new_from(2, &mut rng);
        let evals = [2u16, 5, 7, 9]
            .iter()
            .map(|&x| p.evaluate(x))
            .collect::<Vec<_>>();
        let recovered = Poly::<Scalar>::recover(3, &evals).unwrap();
        assert_eq!(recovered, *p.constant());

        // Recovery works in the exponent as well
        let commitment = p.commit();
        let points = [1u16, 3, 4]
            .iter()
            .map(|&x| commitment.evaluate(x))
            .collect::<Vec<_>>();
        let recovered = Poly::<Point>::recover(3, &points).unwrap();
        assert_eq!(recovered, *commitment.constant());
    }

    #[test]
    fn test_recover_insufficient() {
        let mut rng = StdRng::seed_from_u64(3);
        let p = new_from(2, &mut rng);
        let evals = vec![p.evaluate(1), p.evaluate(2)];
        assert_eq!(
            Poly::<Scalar>::recover(3, &evals),
            Err(Error::NotEnoughEvaluations(3, 2))
        );
    }

    #[test]
    fn test_lagrange_rejects_bad_indices() {
        assert_eq!(lagrange_coefficient(0, &[0, 1]), Err(Error::ZeroIndex));
        assert_eq!(
            lagrange_coefficient(1, &[1, 1, 2]),
            Err(Error::DuplicateIndex(1))
        );
    }

    #[test]
    fn test_codec() {
        let mut rng = StdRng::seed_from_u64(4);
        let commitment = new_from(2, &mut rng).commit();
        let encoded = commitment.encode();
        assert_eq!(encoded.len(), 3 * POINT_LENGTH);
        let decoded = Public::decode_cfg(encoded.clone(), &3).unwrap();
        assert_eq!(decoded, commitment);

        // A different coefficient count is rejected
        assert!(Public::decode_cfg(encoded.clone(), &2).is_err());
        assert!(Public::decode_cfg(encoded, &4).is_err());
    }
}
