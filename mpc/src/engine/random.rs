//! Joint randomness sub-protocols: uniformly random shared bits and
//! random solved bits (a random field element together with its bits).

use futures::future::try_join_all;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::thread_rng;

use super::{EngineError, PartyEngine};
use crate::shamir::SecretShare;
use crate::transport::ProtocolMessage;

impl PartyEngine {
    /// Bind `id` to a sharing of a uniformly random bit.
    ///
    /// Every party deals a random field element; the sum `a` is uniform as
    /// long as one party sampled honestly. Its square is opened (revealing
    /// only +-a), the canonical root beta is taken, and beta^-1 * a, which is
    /// +-1, is mapped onto {0, 1} via (x + 1) / 2. A zero square discards the
    /// iteration and retries under a fresh tag.
    pub async fn random_bit(&self, id: &str) -> Result<(), EngineError> {
        let parties = self.scheme().parties();
        let field = self.field().clone();
        let mut iteration = 0u32;

        let (a_share, square) = loop {
            let key = (id.to_string(), iteration);

            let contribution = field.random(&mut thread_rng());
            for point in self.scheme().share(&contribution, &mut thread_rng()) {
                let receiver = point.x;
                self.transport.send(
                    receiver,
                    ProtocolMessage::RandomElement {
                        id: id.to_string(),
                        iteration,
                        point,
                    },
                );
            }

            // All n contributions are summed; waiting for everyone avoids
            // having to agree on which subset went in.
            let contributions = self.random_elements.wait(key.clone(), parties).await;
            let mut a_share = BigUint::zero();
            for point in &contributions {
                a_share = field.add(&a_share, &point.y);
            }

            // Local squaring yields this party's degree-2t share of a^2.
            let squared = field.mul(&a_share, &a_share);
            for receiver in 1..=parties {
                self.transport.send(
                    receiver,
                    ProtocolMessage::SquaredElement {
                        id: id.to_string(),
                        iteration,
                        point: SecretShare {
                            x: self.index,
                            y: squared.clone(),
                        },
                    },
                );
            }

            let points = self.squared_elements.wait(key.clone(), parties).await;
            let square = self
                .scheme()
                .reconstruct_degree(&points, 2 * self.scheme().threshold())?;

            if square.is_zero() {
                self.random_elements.remove(&key);
                self.squared_elements.remove(&key);
                iteration += 1;
                continue;
            }
            break (a_share, square);
        };

        let root = field.sqrt(&square).ok_or(EngineError::RandomBitFailed)?;
        let root_inverse = field.inverse(&root).ok_or(EngineError::RandomBitFailed)?;
        let half = field
            .inverse(&BigUint::from(2u32))
            .ok_or(EngineError::RandomBitFailed)?;

        let signed = field.mul(&root_inverse, &a_share);
        let bit = field.mul(&field.add(&signed, &BigUint::one()), &half);
        self.bind(id, bit, true)
    }

    /// Produce a sharing of a uniform field element r < P together with
    /// sharings of its bits (LSB first). Returns the identifier bound to r
    /// and the identifiers of its bits.
    ///
    /// Candidates are L+1 random bits; a candidate at or above the modulus is
    /// rejected by opening the comparison bit and retrying.
    pub async fn random_solved_bits(
        &self,
        id: &str,
    ) -> Result<(String, Vec<String>), EngineError> {
        let width = self.bit_width();
        let field = self.field().clone();
        let mut iteration = 0u32;

        loop {
            let bit_ids: Vec<String> = (0..width)
                .map(|i| format!("{id}/try{iteration}/bit{i}"))
                .collect();
            try_join_all(bit_ids.iter().map(|bit| self.random_bit(bit))).await?;

            let modulus = field.modulus().clone();
            let modulus_bits: Vec<String> = (0..width)
                .map(|i| format!("{id}/try{iteration}/mod{i}"))
                .collect();
            self.bind_public_bits(&modulus, &modulus_bits)?;

            let below = format!("{id}/try{iteration}/below");
            self.bit_compare(&modulus_bits, &bit_ids, &below).await?;
            self.open(&below).await;
            let accepted = self.reconstruct(&below).await?;
            if accepted.is_zero() {
                iteration += 1;
                continue;
            }

            let mut r_share = BigUint::zero();
            let mut power = BigUint::one();
            for bit in &bit_ids {
                let stored = self.value_of(bit).await;
                r_share = field.add(&r_share, &field.mul(&power, &stored.value));
                power = field.add(&power, &power);
            }

            let r_id = format!("{id}/value");
            self.bind(&r_id, r_share, true)?;
            return Ok((r_id, bit_ids));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use futures::future::join_all;
    use num_bigint::BigUint;
    use num_traits::Zero;

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
    async fn test_random_bit_is_uniform_bit() {
        // p = 5 exercises the retry path: the joint element is zero with
        // probability 1/5 per attempt.
        let cluster = cluster(5);
        let mut seen = HashSet::new();

        for round in 0..100 {
            let id = format!("b{round}");
            join_all(cluster.parties().iter().map(|party| {
                let party = party.clone();
                let id = id.clone();
                async move { party.random_bit(&id).await.unwrap() }
            }))
            .await;

            let bit = reconstruct_everywhere(&cluster, &id).await;
            assert!(
                bit.is_zero() || bit == BigUint::from(1u32),
                "not a bit: {}",
                bit
            );
            seen.insert(bit);
        }

        assert_eq!(seen.len(), 2, "both bit values should appear in 100 draws");
    }

    #[tokio::test]
    async fn test_random_solved_bits() {
        let cluster = cluster(47);

        for round in 0..20 {
            let id = format!("r{round}");
            let mut results = join_all(cluster.parties().iter().map(|party| {
                let party = party.clone();
                let id = id.clone();
                async move { party.random_solved_bits(&id).await.unwrap() }
            }))
            .await;
            let (r_id, bit_ids) = results.pop().unwrap();

            let r = reconstruct_everywhere(&cluster, &r_id).await;
            assert!(r < BigUint::from(47u32), "candidate not reduced: {}", r);

            let mut assembled = BigUint::zero();
            for (i, bit_id) in bit_ids.iter().enumerate() {
                let bit = reconstruct_everywhere(&cluster, bit_id).await;
                assert!(bit.is_zero() || bit == BigUint::from(1u32));
                assembled += bit << i;
            }
            assert_eq!(assembled % BigUint::from(47u32), r);
        }
    }
}
