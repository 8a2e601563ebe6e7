use std::collections::BTreeMap;
use std::fmt;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::fields::PrimeField;

/// A point on a sharing polynomial: the share held by party `x`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretShare {
    pub x: usize,
    pub y: BigUint,
}

/// Re-share of a locally computed product, tagged with the issuing party.
/// The issuer index selects the Lagrange coefficient during degree reduction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductShare {
    pub issuer: usize,
    pub share: SecretShare,
}

/// Shamir scheme error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShamirError {
    InsufficientShares { required: usize, got: usize },
    NonInvertible,
}

impl fmt::Display for ShamirError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::InsufficientShares { required, got } => {
                write!(f, "reconstruction requires {} shares, got {}", required, got)
            }
            Self::NonInvertible => {
                write!(f, "Lagrange denominator is not invertible (duplicate share points?)")
            }
        }
    }
}

/// Shamir secret sharing over a prime field with parameters (P, t, n).
///
/// Shares are evaluations of a random degree-t polynomial at x = 1..n with
/// the secret as the constant term. Any t+1 points reconstruct the secret;
/// products of shares live on degree-2t polynomials and need 2t+1 points.
#[derive(Clone, Debug)]
pub struct SecretSharingScheme {
    field: PrimeField,
    threshold: usize,
    parties: usize,
}

impl SecretSharingScheme {
    pub fn new(field: PrimeField, threshold: usize, parties: usize) -> Self {
        assert!(
            threshold + 1 <= parties,
            "at least t+1 parties are needed to reconstruct"
        );
        Self {
            field,
            threshold,
            parties,
        }
    }

    pub fn field(&self) -> &PrimeField {
        &self.field
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Split a secret into one share per party.
    pub fn share(&self, secret: &BigUint, rng: &mut (impl Rng + ?Sized)) -> Vec<SecretShare> {
        let mut coefficients = Vec::with_capacity(self.threshold + 1);
        coefficients.push(self.field.reduce(secret));
        for _ in 0..self.threshold {
            coefficients.push(self.field.random(rng));
        }

        (1..=self.parties)
            .map(|x| SecretShare {
                x,
                y: evaluate_at(&coefficients, x, &self.field),
            })
            .collect()
    }

    /// Reconstruct a degree-t sharing from at least t+1 points.
    pub fn reconstruct(&self, points: &[SecretShare]) -> Result<BigUint, ShamirError> {
        self.reconstruct_degree(points, self.threshold)
    }

    /// Reconstruct a sharing of the given polynomial degree.
    ///
    /// The degree hint exists for the degree-2t intermediates inside the
    /// random-bit sub-protocol; regular callers use [`Self::reconstruct`].
    pub fn reconstruct_degree(
        &self,
        points: &[SecretShare],
        degree: usize,
    ) -> Result<BigUint, ShamirError> {
        let required = degree + 1;
        if points.len() < required {
            return Err(ShamirError::InsufficientShares {
                required,
                got: points.len(),
            });
        }

        let xs: Vec<usize> = points.iter().map(|p| p.x).collect();
        let vector = self.recombination_vector(&xs)?;

        let mut secret = BigUint::zero();
        for point in points {
            secret = self.field.add(&secret, &self.field.mul(&vector[&point.x], &point.y));
        }
        Ok(secret)
    }

    /// Lagrange coefficients at zero for the given evaluation points:
    /// r_i = prod_{j != i} j * (j - i)^-1 mod P.
    pub fn recombination_vector(
        &self,
        xs: &[usize],
    ) -> Result<BTreeMap<usize, BigUint>, ShamirError> {
        let mut terms = BTreeMap::new();
        for (position, &i) in xs.iter().enumerate() {
            let mut numerator = BigUint::one();
            let mut denominator = BigUint::one();
            for (other, &j) in xs.iter().enumerate() {
                if position == other {
                    continue;
                }
                numerator = self.field.mul(&numerator, &BigUint::from(j));
                let difference = if j > i {
                    self.field.reduce(&BigUint::from(j - i))
                } else {
                    self.field.neg(&BigUint::from(i - j))
                };
                denominator = self.field.mul(&denominator, &difference);
            }
            let inverse = self
                .field
                .inverse(&denominator)
                .ok_or(ShamirError::NonInvertible)?;
            terms.insert(i, self.field.mul(&numerator, &inverse));
        }
        Ok(terms)
    }

    /// Degree reduction after multiplication: combine re-shares of local
    /// products into this party's share of a fresh degree-t sharing of the
    /// product. Requires re-shares from at least 2t+1 distinct issuers.
    pub fn recombine_product_shares(
        &self,
        shares: &[ProductShare],
    ) -> Result<BigUint, ShamirError> {
        let required = 2 * self.threshold + 1;
        if shares.len() < required {
            return Err(ShamirError::InsufficientShares {
                required,
                got: shares.len(),
            });
        }

        let xs: Vec<usize> = shares.iter().map(|s| s.issuer).collect();
        let vector = self.recombination_vector(&xs)?;

        let mut combined = BigUint::zero();
        for share in shares {
            combined = self.field.add(
                &combined,
                &self.field.mul(&vector[&share.issuer], &share.share.y),
            );
        }
        Ok(combined)
    }

    /// Pointwise sum of two sharings. Shares must be aligned by party.
    pub fn add(&self, a: &[SecretShare], b: &[SecretShare]) -> Vec<SecretShare> {
        assert_eq!(a.len(), b.len(), "mismatched sharings");
        a.iter()
            .zip(b)
            .map(|(a, b)| {
                assert_eq!(a.x, b.x, "mismatched share points");
                SecretShare {
                    x: a.x,
                    y: self.field.add(&a.y, &b.y),
                }
            })
            .collect()
    }

    /// Pointwise scaling of a sharing by a public constant.
    pub fn scale(&self, scalar: &BigUint, shares: &[SecretShare]) -> Vec<SecretShare> {
        shares
            .iter()
            .map(|share| SecretShare {
                x: share.x,
                y: self.field.mul(scalar, &share.y),
            })
            .collect()
    }
}

/// Horner evaluation of the polynomial at x, modulo the field prime.
fn evaluate_at(coefficients: &[BigUint], x: usize, field: &PrimeField) -> BigUint {
    let x = BigUint::from(x);
    let mut result = BigUint::zero();
    for coefficient in coefficients.iter().rev() {
        result = field.add(&field.mul(&result, &x), coefficient);
    }
    result
}
