//! Bitwise circuits over shared bits.
//!
//! Bit vectors are identifier slices indexed LSB first, every element a
//! sharing of a value in {0, 1}. Widths are `bit_length(P) + 1` so that sums
//! of two field elements still fit. Intermediate identifiers are derived
//! deterministically from the result identifier, so all parties agree on
//! them without coordination.

use futures::future::try_join_all;
use num_bigint::BigUint;
use num_traits::{One, Zero};

use super::{EngineError, PartyEngine};

impl PartyEngine {
    /// Width of the bit vectors used by decomposition and comparison.
    pub fn bit_width(&self) -> usize {
        self.field().bit_length() + 1
    }

    /// c := a XOR b, as a + b - 2ab. One multiplication.
    pub async fn bit_xor(&self, a: &str, b: &str, c: &str) -> Result<(), EngineError> {
        let product_id = format!("{c}/and");
        self.multiply(a, b, &product_id).await?;

        let (a, b, ab) = futures::join!(
            self.value_of(a),
            self.value_of(b),
            self.value_of(&product_id)
        );
        let field = self.field();
        let twice = field.add(&ab.value, &ab.value);
        let value = field.sub(&field.add(&a.value, &b.value), &twice);
        self.bind(c, value, a.is_secret || b.is_secret)
    }

    /// Full adder over shared bits.
    ///
    /// cout = 1 - (1 - ab)(1 - a cin)(1 - b cin), sum = a + b + cin - 2 cout.
    pub async fn full_adder(
        &self,
        a: &str,
        b: &str,
        cin: &str,
        sum: &str,
        cout: &str,
    ) -> Result<(), EngineError> {
        let one = BigUint::one();

        let ab = format!("{sum}/ab");
        let ac = format!("{sum}/ac");
        let bc = format!("{sum}/bc");
        futures::try_join!(
            self.multiply(a, b, &ab),
            self.multiply(a, cin, &ac),
            self.multiply(b, cin, &bc),
        )?;

        let not_ab = format!("{sum}/nab");
        let not_ac = format!("{sum}/nac");
        let not_bc = format!("{sum}/nbc");
        futures::try_join!(
            self.sub_from_constant(&one, &ab, &not_ab),
            self.sub_from_constant(&one, &ac, &not_ac),
            self.sub_from_constant(&one, &bc, &not_bc),
        )?;

        let pair = format!("{sum}/pair");
        self.multiply(&not_ab, &not_ac, &pair).await?;
        let triple = format!("{sum}/triple");
        self.multiply(&pair, &not_bc, &triple).await?;
        self.sub_from_constant(&one, &triple, cout).await?;

        let (a, b, cin, carry) = futures::join!(
            self.value_of(a),
            self.value_of(b),
            self.value_of(cin),
            self.value_of(cout)
        );
        let field = self.field();
        let mut total = field.add(&a.value, &b.value);
        total = field.add(&total, &cin.value);
        total = field.sub(&total, &field.add(&carry.value, &carry.value));
        self.bind(
            sum,
            total,
            a.is_secret || b.is_secret || cin.is_secret || carry.is_secret,
        )
    }

    /// Ripple-carry addition, LSB first. The final carry is dropped.
    pub async fn bit_add(
        &self,
        a: &[String],
        b: &[String],
        out: &[String],
    ) -> Result<(), EngineError> {
        self.check_widths(a, b, out)?;

        let carries: Vec<String> = (0..=out.len())
            .map(|i| format!("{}/carry{}", out[0], i))
            .collect();
        self.bind(&carries[0], BigUint::zero(), false)?;

        for i in 0..out.len() {
            self.full_adder(&a[i], &b[i], &carries[i], &out[i], &carries[i + 1])
                .await?;
        }
        Ok(())
    }

    /// Ripple-carry subtraction: a + NOT(b) with carry-in one.
    pub async fn bit_sub(
        &self,
        a: &[String],
        b: &[String],
        out: &[String],
    ) -> Result<(), EngineError> {
        self.check_widths(a, b, out)?;
        let one = BigUint::one();

        let flipped: Vec<String> = out.iter().map(|id| format!("{id}/notb")).collect();
        try_join_all(
            (0..out.len()).map(|i| self.sub_from_constant(&one, &b[i], &flipped[i])),
        )
        .await?;

        let carries: Vec<String> = (0..=out.len())
            .map(|i| format!("{}/borrow{}", out[0], i))
            .collect();
        self.bind(&carries[0], BigUint::one(), false)?;

        for i in 0..out.len() {
            self.full_adder(&a[i], &flipped[i], &carries[i], &out[i], &carries[i + 1])
                .await?;
        }
        Ok(())
    }

    /// Mask isolating the highest set bit of `c`: d_i = 1 exactly at the most
    /// significant index with c_i = 1. Returns the mask identifiers.
    ///
    /// Chains f_top = 1 - c_top, f_i = f_{i+1} (1 - c_i), d_i = f_{i+1} - f_i.
    pub async fn most_significant_one(
        &self,
        c: &[String],
        namespace: &str,
    ) -> Result<Vec<String>, EngineError> {
        let width = c.len();
        let one = BigUint::one();
        let flags: Vec<String> = (0..width).map(|i| format!("{namespace}/f{i}")).collect();
        let mask: Vec<String> = (0..width).map(|i| format!("{namespace}/d{i}")).collect();

        let top = width - 1;
        self.sub_from_constant(&one, &c[top], &flags[top]).await?;
        self.sub_from_constant(&one, &flags[top], &mask[top]).await?;

        for i in (0..top).rev() {
            let not_bit = format!("{namespace}/g{i}");
            self.sub_from_constant(&one, &c[i], &not_bit).await?;
            self.multiply(&flags[i + 1], &not_bit, &flags[i]).await?;
            self.sub(&flags[i + 1], &flags[i], &mask[i]).await?;
        }
        Ok(mask)
    }

    /// c := [a > b] over bit sharings (LSB first): XOR the vectors, isolate
    /// the most significant differing position, read a's bit there.
    pub async fn bit_compare(
        &self,
        a: &[String],
        b: &[String],
        c: &str,
    ) -> Result<(), EngineError> {
        if a.len() != b.len() {
            return Err(EngineError::BitWidthMismatch {
                expected: a.len(),
                got: b.len(),
            });
        }

        let differs: Vec<String> = (0..a.len()).map(|i| format!("{c}/x{i}")).collect();
        try_join_all((0..a.len()).map(|i| self.bit_xor(&a[i], &b[i], &differs[i]))).await?;

        let mask = self.most_significant_one(&differs, c).await?;

        let picked: Vec<String> = (0..a.len()).map(|i| format!("{c}/e{i}")).collect();
        try_join_all((0..a.len()).map(|i| self.multiply(&a[i], &mask[i], &picked[i]))).await?;

        let field = self.field();
        let mut total = BigUint::zero();
        let mut is_secret = false;
        for id in &picked {
            let stored = self.value_of(id).await;
            total = field.add(&total, &stored.value);
            is_secret |= stored.is_secret;
        }
        self.bind(c, total, is_secret)
    }

    /// Decompose the sharing at `id` into sharings of its bits (LSB first).
    ///
    /// Uses a random solved-bits mask r: opens c = id - r, adds the public
    /// bits of c onto the shared bits of r, and subtracts P again whenever
    /// the sum wrapped past the modulus.
    pub async fn bits(&self, id: &str, out: &[String]) -> Result<(), EngineError> {
        let width = self.bit_width();
        if out.len() != width {
            return Err(EngineError::BitWidthMismatch {
                expected: width,
                got: out.len(),
            });
        }
        let namespace = &out[0];
        let one = BigUint::one();

        let (r_id, r_bits) = self.random_solved_bits(&format!("{namespace}/mask")).await?;

        let delta_id = format!("{namespace}/delta");
        self.sub(id, &r_id, &delta_id).await?;
        self.open(&delta_id).await;
        let delta = self.reconstruct(&delta_id).await?;

        let delta_bits: Vec<String> = (0..width).map(|i| format!("{namespace}/pub{i}")).collect();
        self.bind_public_bits(&delta, &delta_bits)?;
        let modulus = self.field().modulus().clone();
        let modulus_bits: Vec<String> = (0..width).map(|i| format!("{namespace}/mod{i}")).collect();
        self.bind_public_bits(&modulus, &modulus_bits)?;

        let sum_bits: Vec<String> = (0..width).map(|i| format!("{namespace}/sum{i}")).collect();
        self.bit_add(&r_bits, &delta_bits, &sum_bits).await?;

        // e = 1 iff r + c reached the modulus and must be reduced once.
        let below = format!("{namespace}/below");
        self.bit_compare(&modulus_bits, &sum_bits, &below).await?;
        let wrapped = format!("{namespace}/wrap");
        self.sub_from_constant(&one, &below, &wrapped).await?;

        let correction: Vec<String> = (0..width).map(|i| format!("{namespace}/corr{i}")).collect();
        try_join_all((0..width).map(|i| self.multiply(&wrapped, &modulus_bits[i], &correction[i])))
            .await?;

        self.bit_sub(&sum_bits, &correction, out).await
    }

    /// c := [a > b] over field-element sharings.
    pub async fn greater_than(&self, a: &str, b: &str, c: &str) -> Result<(), EngineError> {
        let width = self.bit_width();
        let a_bits: Vec<String> = (0..width).map(|i| format!("{c}/a{i}")).collect();
        let b_bits: Vec<String> = (0..width).map(|i| format!("{c}/b{i}")).collect();
        futures::try_join!(self.bits(a, &a_bits), self.bits(b, &b_bits))?;
        self.bit_compare(&a_bits, &b_bits, c).await
    }

    /// c := [a < b]
    pub async fn less_than(&self, a: &str, b: &str, c: &str) -> Result<(), EngineError> {
        self.greater_than(b, a, c).await
    }

    /// c := [a >= b]
    pub async fn greater_equal(&self, a: &str, b: &str, c: &str) -> Result<(), EngineError> {
        let below = format!("{c}/lt");
        self.greater_than(b, a, &below).await?;
        self.sub_from_constant(&BigUint::one(), &below, c).await
    }

    /// c := [a <= b]
    pub async fn less_equal(&self, a: &str, b: &str, c: &str) -> Result<(), EngineError> {
        let above = format!("{c}/gt");
        self.greater_than(a, b, &above).await?;
        self.sub_from_constant(&BigUint::one(), &above, c).await
    }

    /// c := [a != b], as [a > b] + [b > a].
    pub async fn not_equal(&self, a: &str, b: &str, c: &str) -> Result<(), EngineError> {
        let above = format!("{c}/gt");
        let below = format!("{c}/lt");
        futures::try_join!(
            self.greater_than(a, b, &above),
            self.greater_than(b, a, &below),
        )?;
        self.add(&above, &below, c).await
    }

    /// c := [a == b]
    pub async fn equal(&self, a: &str, b: &str, c: &str) -> Result<(), EngineError> {
        let differs = format!("{c}/ne");
        self.not_equal(a, b, &differs).await?;
        self.sub_from_constant(&BigUint::one(), &differs, c).await
    }

    /// Bind the public binary expansion of `value` under the given ids.
    pub(super) fn bind_public_bits(
        &self,
        value: &BigUint,
        ids: &[String],
    ) -> Result<(), EngineError> {
        for (i, id) in ids.iter().enumerate() {
            let bit = if value.bit(i as u64) {
                BigUint::one()
            } else {
                BigUint::zero()
            };
            self.bind(id, bit, false)?;
        }
        Ok(())
    }

    fn check_widths(&self, a: &[String], b: &[String], out: &[String]) -> Result<(), EngineError> {
        for other in [b, out] {
            if a.len() != other.len() {
                return Err(EngineError::BitWidthMismatch {
                    expected: a.len(),
                    got: other.len(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::future::{join_all, try_join_all};
    use num_bigint::BigUint;

    use crate::cluster::LocalCluster;
    use crate::fields::PrimeField;
    use crate::shamir::SecretSharingScheme;

    fn cluster(p: u64) -> LocalCluster {
        LocalCluster::connect(SecretSharingScheme::new(
            PrimeField::new(BigUint::from(p)),
            1,
            3,
        ))
    }

    /// Deal sharings of the two bit constants so tests can assemble public
    /// bit vectors out of the identifiers "0" and "1".
    fn deal_bit_constants(cluster: &LocalCluster) {
        cluster.party(1).input(&BigUint::from(0u32), "0");
        cluster.party(2).input(&BigUint::from(1u32), "1");
    }

    fn constant_bits(value: u64, width: usize) -> Vec<String> {
        (0..width)
            .map(|i| if (value >> i) & 1 == 1 { "1" } else { "0" }.to_string())
            .collect()
    }

    async fn reconstruct_everywhere(cluster: &LocalCluster, id: &str) -> BigUint {
        let values = join_all(cluster.parties().iter().map(|party| {
            let party = party.clone();
            let id = id.to_string();
            async move {
                party.open(&id).await;
                party.reconstruct(&id).await.unwrap()
            }
        }))
        .await;
        for value in &values {
            assert_eq!(value, &values[0], "parties disagree on {}", id);
        }
        values.into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn test_full_adder_truth_table() {
        let cluster = cluster(13);
        deal_bit_constants(&cluster);

        join_all(cluster.parties().iter().map(|party| {
            let party = party.clone();
            async move {
                try_join_all((0u32..8).map(|case| {
                    let party = party.clone();
                    async move {
                        let a = if case & 4 != 0 { "1" } else { "0" };
                        let b = if case & 2 != 0 { "1" } else { "0" };
                        let cin = if case & 1 != 0 { "1" } else { "0" };
                        party
                            .full_adder(a, b, cin, &format!("sum{case}"), &format!("cout{case}"))
                            .await
                    }
                }))
                .await
                .unwrap()
            }
        }))
        .await;

        for case in 0u32..8 {
            let ones = (case & 4 != 0) as u32 + (case & 2 != 0) as u32 + (case & 1 != 0) as u32;
            let sum = reconstruct_everywhere(&cluster, &format!("sum{case}")).await;
            let cout = reconstruct_everywhere(&cluster, &format!("cout{case}")).await;
            assert_eq!(sum, BigUint::from(ones % 2), "sum for case {case}");
            assert_eq!(cout, BigUint::from(ones / 2), "carry for case {case}");
        }
    }

    #[tokio::test]
    async fn test_bit_compare_grid() {
        let cluster = cluster(4001);
        deal_bit_constants(&cluster);
        let width = cluster.party(1).bit_width();

        join_all(cluster.parties().iter().map(|party| {
            let party = party.clone();
            async move {
                try_join_all((0u64..13).flat_map(|i| (0u64..13).map(move |j| (i, j))).map(
                    |(i, j)| {
                        let party = party.clone();
                        async move {
                            let lhs = constant_bits(i, width);
                            let rhs = constant_bits(j, width);
                            party.bit_compare(&lhs, &rhs, &format!("{i}gt{j}")).await
                        }
                    },
                ))
                .await
                .unwrap()
            }
        }))
        .await;

        for i in 0u64..13 {
            for j in 0u64..13 {
                let result = reconstruct_everywhere(&cluster, &format!("{i}gt{j}")).await;
                assert_eq!(result, BigUint::from((i > j) as u32), "{} > {}", i, j);
            }
        }
    }

    #[tokio::test]
    async fn test_bit_add_and_sub() {
        let cluster = cluster(47);
        deal_bit_constants(&cluster);
        let width = cluster.party(1).bit_width();

        join_all(cluster.parties().iter().map(|party| {
            let party = party.clone();
            async move {
                let a = constant_bits(19, width);
                let b = constant_bits(5, width);
                let sum: Vec<String> = (0..width).map(|i| format!("sum/{i}")).collect();
                let diff: Vec<String> = (0..width).map(|i| format!("diff/{i}")).collect();
                party.bit_add(&a, &b, &sum).await.unwrap();
                party.bit_sub(&a, &b, &diff).await.unwrap();
            }
        }))
        .await;

        for i in 0..width {
            let sum_bit = reconstruct_everywhere(&cluster, &format!("sum/{i}")).await;
            assert_eq!(sum_bit, BigUint::from((24u64 >> i) & 1), "sum bit {i}");
            let diff_bit = reconstruct_everywhere(&cluster, &format!("diff/{i}")).await;
            assert_eq!(diff_bit, BigUint::from((14u64 >> i) & 1), "diff bit {i}");
        }
    }

    #[tokio::test]
    async fn test_bit_width_mismatch_is_fatal() {
        let cluster = cluster(47);
        deal_bit_constants(&cluster);
        let party = cluster.party(1);

        let a = constant_bits(3, party.bit_width());
        let b = constant_bits(3, party.bit_width() - 1);
        let out: Vec<String> = (0..party.bit_width()).map(|i| format!("bad/{i}")).collect();
        assert!(matches!(
            party.bit_add(&a, &b, &out).await,
            Err(crate::engine::EngineError::BitWidthMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_bit_decomposition() {
        let cluster = cluster(47);
        let width = cluster.party(1).bit_width();

        for value in [0u64, 1, 19, 46] {
            let id = format!("v{value}");
            cluster.party(1).input(&BigUint::from(value), &id);

            join_all(cluster.parties().iter().map(|party| {
                let party = party.clone();
                let id = id.clone();
                async move {
                    let out: Vec<String> = (0..width).map(|i| format!("{id}.bit{i}")).collect();
                    party.bits(&id, &out).await.unwrap()
                }
            }))
            .await;

            for i in 0..width {
                let bit = reconstruct_everywhere(&cluster, &format!("{id}.bit{i}")).await;
                assert_eq!(bit, BigUint::from((value >> i) & 1), "bit {i} of {value}");
            }
        }
    }

    #[tokio::test]
    async fn test_comparison_operators() {
        let cluster = cluster(31);
        cluster.party(1).input(&BigUint::from(3u32), "three");
        cluster.party(2).input(&BigUint::from(5u32), "five");
        cluster.party(3).input(&BigUint::from(5u32), "five2");

        join_all(cluster.parties().iter().map(|party| {
            let party = party.clone();
            async move {
                party.greater_than("three", "five", "gt").await.unwrap();
                party.less_than("three", "five", "lt").await.unwrap();
                party.greater_equal("five", "three", "ge").await.unwrap();
                party.less_equal("five", "three", "le").await.unwrap();
                party.equal("five", "five2", "eq").await.unwrap();
                party.not_equal("three", "five", "ne").await.unwrap();
            }
        }))
        .await;

        let expectations = [
            ("gt", 0u32),
            ("lt", 1),
            ("ge", 1),
            ("le", 0),
            ("eq", 1),
            ("ne", 1),
        ];
        for (id, expected) in expectations {
            assert_eq!(
                reconstruct_everywhere(&cluster, id).await,
                BigUint::from(expected),
                "{id}"
            );
        }
    }
}
