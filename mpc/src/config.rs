use num_bigint::BigUint;
use tracing::warn;

use crate::fields::PrimeField;
use crate::shamir::SecretSharingScheme;

/// Cluster parameters: field prime, number of parties, corruption threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
    pub prime: BigUint,
    pub parties: usize,
    pub threshold: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            prime: BigUint::from(4001u32),
            parties: 3,
            threshold: 1,
        }
    }
}

impl ClusterConfig {
    /// Parse `p`/`n`/`t` configuration lines. Unknown keys are ignored;
    /// malformed values keep their defaults.
    pub fn parse(source: &str) -> Self {
        let mut config = Self::default();
        for line in source.lines() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match *tokens {
                ["p", value] => match value.parse() {
                    Ok(prime) => config.prime = prime,
                    Err(_) => warn!("invalid prime in config: {}", value),
                },
                ["n", value] => match value.parse() {
                    Ok(parties) => config.parties = parties,
                    Err(_) => warn!("invalid party count in config: {}", value),
                },
                ["t", value] => match value.parse() {
                    Ok(threshold) => config.threshold = threshold,
                    Err(_) => warn!("invalid threshold in config: {}", value),
                },
                _ => {}
            }
        }
        config
    }

    /// Build the secret sharing scheme described by this configuration.
    pub fn scheme(&self) -> SecretSharingScheme {
        SecretSharingScheme::new(
            PrimeField::new(self.prime.clone()),
            self.threshold,
            self.parties,
        )
    }
}
