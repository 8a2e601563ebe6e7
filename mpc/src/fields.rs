use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;

/// Prime field with the modulus chosen at runtime.
///
/// Elements are arbitrary-precision nonnegative integers reduced modulo the
/// prime. The modulus is expected to be an odd prime; primality is the
/// caller's responsibility.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrimeField {
    modulus: BigUint,
}

impl PrimeField {
    /// Create a field with the given prime modulus.
    pub fn new(modulus: BigUint) -> Self {
        assert!(modulus > BigUint::one(), "modulus must be at least 2");
        Self { modulus }
    }

    /// The prime modulus.
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    /// Number of bits needed to represent the modulus.
    pub fn bit_length(&self) -> usize {
        self.modulus.bits() as usize
    }

    /// Reduce an arbitrary integer into the field.
    pub fn reduce(&self, value: &BigUint) -> BigUint {
        value % &self.modulus
    }

    pub fn add(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a + b) % &self.modulus
    }

    pub fn sub(&self, a: &BigUint, b: &BigUint) -> BigUint {
        let b = b % &self.modulus;
        ((a % &self.modulus) + (&self.modulus - b)) % &self.modulus
    }

    pub fn mul(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % &self.modulus
    }

    pub fn neg(&self, a: &BigUint) -> BigUint {
        let a = a % &self.modulus;
        if a.is_zero() {
            a
        } else {
            &self.modulus - a
        }
    }

    pub fn pow(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        base.modpow(exponent, &self.modulus)
    }

    /// Multiplicative inverse via Fermat's little theorem.
    /// Returns `None` for zero, which has no inverse.
    pub fn inverse(&self, a: &BigUint) -> Option<BigUint> {
        let a = a % &self.modulus;
        if a.is_zero() {
            return None;
        }
        let exponent = &self.modulus - BigUint::from(2u32);
        Some(a.modpow(&exponent, &self.modulus))
    }

    /// Square root modulo the prime via Tonelli-Shanks.
    /// Returns `None` when the input is a quadratic non-residue.
    pub fn sqrt(&self, a: &BigUint) -> Option<BigUint> {
        let p = &self.modulus;
        let a = a % p;
        if a.is_zero() {
            return Some(a);
        }
        let one = BigUint::one();
        let two = BigUint::from(2u32);
        if *p == two {
            return Some(a);
        }

        let legendre_exp = (p - &one) >> 1u32;
        if a.modpow(&legendre_exp, p) != one {
            return None;
        }

        // Shortcut for p = 3 (mod 4).
        if (p % BigUint::from(4u32)) == BigUint::from(3u32) {
            return Some(a.modpow(&((p + &one) >> 2u32), p));
        }

        // Write p - 1 = q * 2^s with q odd.
        let mut q = p - &one;
        let mut s = 0u64;
        while (&q & &one).is_zero() {
            q >>= 1u32;
            s += 1;
        }

        // Any quadratic non-residue works as the twiddle base.
        let mut z = two;
        while z.modpow(&legendre_exp, p) == one {
            z += &one;
        }

        let mut m = s;
        let mut c = z.modpow(&q, p);
        let mut t = a.modpow(&q, p);
        let mut r = a.modpow(&((&q + &one) >> 1u32), p);

        while !t.is_one() {
            let mut i = 0u64;
            let mut probe = t.clone();
            while !probe.is_one() {
                probe = &probe * &probe % p;
                i += 1;
                if i == m {
                    return None;
                }
            }
            let b = c.modpow(&(BigUint::one() << (m - i - 1)), p);
            m = i;
            c = &b * &b % p;
            t = t * &c % p;
            r = r * &b % p;
        }
        Some(r)
    }

    /// Sample a uniform field element.
    pub fn random(&self, rng: &mut (impl Rng + ?Sized)) -> BigUint {
        rng.gen_biguint_below(&self.modulus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn field(p: u64) -> PrimeField {
        PrimeField::new(BigUint::from(p))
    }

    #[test]
    fn test_bit_length() {
        assert_eq!(field(11).bit_length(), 4);
        assert_eq!(field(47).bit_length(), 6);
        assert_eq!(field(4001).bit_length(), 12);
    }

    #[test]
    fn test_sub_wraps() {
        let f = field(11);
        assert_eq!(
            f.sub(&BigUint::from(3u32), &BigUint::from(9u32)),
            BigUint::from(5u32)
        );
    }

    #[test]
    fn test_inverse() {
        for p in [5u64, 11, 47, 4001] {
            let f = field(p);
            for a in 1..p.min(100) {
                let a = BigUint::from(a);
                let inv = f.inverse(&a).unwrap();
                assert_eq!(f.mul(&a, &inv), BigUint::one());
            }
            assert_eq!(f.inverse(&BigUint::zero()), None);
        }
    }

    #[test]
    fn test_sqrt_of_squares() {
        // Covers both the p = 3 (mod 4) shortcut and the general loop.
        for p in [7u64, 11, 13, 17, 47, 4001] {
            let f = field(p);
            for a in 0..p.min(60) {
                let a = BigUint::from(a);
                let square = f.mul(&a, &a);
                let root = f.sqrt(&square).expect("square must have a root");
                assert_eq!(f.mul(&root, &root), square);
            }
        }
    }

    #[test]
    fn test_sqrt_non_residue() {
        // 2 is a non-residue mod 5; 5 is a non-residue mod 13.
        assert_eq!(field(5).sqrt(&BigUint::from(2u32)), None);
        assert_eq!(field(13).sqrt(&BigUint::from(5u32)), None);
    }

    #[test]
    fn test_random_below_modulus() {
        let f = field(11);
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..200 {
            assert!(f.random(&mut rng) < BigUint::from(11u32));
        }
    }
}
