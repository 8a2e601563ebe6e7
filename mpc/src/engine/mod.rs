mod bits;
mod random;
mod store;

pub use store::StoredShare;

use std::fmt;
use std::sync::Arc;

use num_bigint::BigUint;
use rand::thread_rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::fields::PrimeField;
use crate::shamir::{ProductShare, SecretShare, SecretSharingScheme, ShamirError};
use crate::transport::{Envelope, ProtocolMessage, Transport};

use store::{IdStore, Rendezvous};

/// Rendezvous key for the per-iteration stores of the random-bit
/// sub-protocol.
type IterationKey = (String, u32);

/// Protocol engine error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// An identifier was written twice; every result needs a fresh id.
    IdAlreadyBound(String),
    /// An INPUT instruction referenced an undeclared input value.
    InputMissing(String),
    /// The joint random element had no computable square root.
    RandomBitFailed,
    /// Bit vectors of different widths were combined.
    BitWidthMismatch { expected: usize, got: usize },
    Shamir(ShamirError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::IdAlreadyBound(ref id) => write!(f, "identifier {:?} is already bound", id),
            Self::InputMissing(ref id) => write!(f, "no input value named {:?}", id),
            Self::RandomBitFailed => write!(f, "random bit generation failed: no square root"),
            Self::BitWidthMismatch { expected, got } => {
                write!(f, "expected bit vector of width {}, got {}", expected, got)
            }
            Self::Shamir(ref err) => err.fmt(f),
        }
    }
}

impl From<ShamirError> for EngineError {
    fn from(err: ShamirError) -> Self {
        Self::Shamir(err)
    }
}

/// Per-party protocol engine.
///
/// Owns the identifier namespace and the rendezvous stores of one party,
/// sends through the transport and receives via [`PartyEngine::handle`].
/// Primitives may run concurrently as separate tasks; any read of an unbound
/// identifier suspends until a local write or a peer message binds it.
pub struct PartyEngine {
    scheme: SecretSharingScheme,
    index: usize,
    transport: Box<dyn Transport>,
    shares: IdStore,
    openings: Rendezvous<String>,
    products: Rendezvous<String>,
    random_elements: Rendezvous<IterationKey>,
    squared_elements: Rendezvous<IterationKey>,
}

impl PartyEngine {
    pub fn new(scheme: SecretSharingScheme, index: usize, transport: Box<dyn Transport>) -> Self {
        assert!(
            index >= 1 && index <= scheme.parties(),
            "party index out of range"
        );
        assert!(
            2 * scheme.threshold() + 1 <= scheme.parties(),
            "multiplication requires 2t+1 <= n"
        );
        Self {
            scheme,
            index,
            transport,
            shares: IdStore::new(),
            openings: Rendezvous::new(),
            products: Rendezvous::new(),
            random_elements: Rendezvous::new(),
            squared_elements: Rendezvous::new(),
        }
    }

    /// Index of this party, in 1..=n.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn scheme(&self) -> &SecretSharingScheme {
        &self.scheme
    }

    pub fn field(&self) -> &PrimeField {
        self.scheme.field()
    }

    /// Spawn the task that drains the transport inbox into [`Self::handle`].
    pub fn spawn_pump(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Envelope>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some((sender, message)) = inbox.recv().await {
                self.handle(message, sender);
            }
        })
    }

    /// Message demultiplexer; invoked exactly once per inbound message.
    pub fn handle(&self, message: ProtocolMessage, sender: usize) {
        match message {
            ProtocolMessage::Share { id, point } => {
                if point.x == self.index {
                    // Our own share of a freshly dealt value.
                    if !self.shares.set(&id, point.y, true) {
                        trace!(id = %id, "dropping duplicate share for bound identifier");
                    }
                } else {
                    // A peer opened its share towards reconstruction.
                    self.openings.insert(id, point.x, point.y);
                }
            }
            ProtocolMessage::Product { id, issuer, point } => {
                if point.x != self.index {
                    warn!(id = %id, issuer, "dropping product share addressed to party {}", point.x);
                    return;
                }
                self.products.insert(id, issuer, point.y);
            }
            ProtocolMessage::RandomElement { id, iteration, point } => {
                if point.x != self.index {
                    warn!(id = %id, sender, "dropping random contribution addressed to party {}", point.x);
                    return;
                }
                self.random_elements.insert((id, iteration), sender, point.y);
            }
            ProtocolMessage::SquaredElement { id, iteration, point } => {
                self.squared_elements.insert((id, iteration), point.x, point.y);
            }
        }
    }

    /// Provide this party's input: deal one share of `value` to every party
    /// under `id`. Only the input owner calls this; everyone stores the share
    /// addressed to them on receipt.
    pub fn input(&self, value: &BigUint, id: &str) {
        for point in self.scheme.share(value, &mut thread_rng()) {
            let receiver = point.x;
            self.transport.send(
                receiver,
                ProtocolMessage::Share {
                    id: id.to_string(),
                    point,
                },
            );
        }
    }

    /// Broadcast this party's share of `id` so peers can reconstruct it.
    pub async fn open(&self, id: &str) {
        let stored = self.shares.get(id).await;
        for receiver in 1..=self.scheme.parties() {
            if receiver == self.index {
                continue;
            }
            self.transport.send(
                receiver,
                ProtocolMessage::Share {
                    id: id.to_string(),
                    point: SecretShare {
                        x: self.index,
                        y: stored.value.clone(),
                    },
                },
            );
        }
    }

    /// Reconstruct an opened degree-t sharing from t+1 peer shares.
    pub async fn reconstruct(&self, id: &str) -> Result<BigUint, EngineError> {
        let required = self.scheme.threshold() + 1;
        let points = self.openings.wait(id.to_string(), required).await;
        Ok(self.scheme.reconstruct(&points)?)
    }

    /// c := a + b
    pub async fn add(&self, a: &str, b: &str, c: &str) -> Result<(), EngineError> {
        let (a, b) = futures::join!(self.shares.get(a), self.shares.get(b));
        self.bind(
            c,
            self.field().add(&a.value, &b.value),
            a.is_secret || b.is_secret,
        )
    }

    /// c := a - b
    pub async fn sub(&self, a: &str, b: &str, c: &str) -> Result<(), EngineError> {
        let (a, b) = futures::join!(self.shares.get(a), self.shares.get(b));
        self.bind(
            c,
            self.field().sub(&a.value, &b.value),
            a.is_secret || b.is_secret,
        )
    }

    /// c := k + a
    pub async fn add_constant(&self, k: &BigUint, a: &str, c: &str) -> Result<(), EngineError> {
        let a = self.shares.get(a).await;
        self.bind(c, self.field().add(k, &a.value), a.is_secret)
    }

    /// c := k - a
    pub async fn sub_from_constant(&self, k: &BigUint, a: &str, c: &str) -> Result<(), EngineError> {
        let a = self.shares.get(a).await;
        self.bind(c, self.field().sub(k, &a.value), a.is_secret)
    }

    /// c := a - k
    pub async fn sub_constant(&self, a: &str, k: &BigUint, c: &str) -> Result<(), EngineError> {
        let a = self.shares.get(a).await;
        self.bind(c, self.field().sub(&a.value, k), a.is_secret)
    }

    /// c := k * a
    pub async fn scale(&self, k: &BigUint, a: &str, c: &str) -> Result<(), EngineError> {
        let a = self.shares.get(a).await;
        self.bind(c, self.field().mul(k, &a.value), a.is_secret)
    }

    /// c := a * b
    ///
    /// Unless both operands are secret the product is local. Otherwise each
    /// party re-shares its local product, and the degree-2t product
    /// polynomial is reduced back to degree t once re-shares from 2t+1
    /// parties have arrived. Late re-shares beyond the threshold are ignored.
    pub async fn multiply(&self, a: &str, b: &str, c: &str) -> Result<(), EngineError> {
        let (a, b) = futures::join!(self.shares.get(a), self.shares.get(b));
        let local = self.field().mul(&a.value, &b.value);

        if !(a.is_secret && b.is_secret) {
            return self.bind(c, local, a.is_secret || b.is_secret);
        }

        for point in self.scheme.share(&local, &mut thread_rng()) {
            let receiver = point.x;
            self.transport.send(
                receiver,
                ProtocolMessage::Product {
                    id: c.to_string(),
                    issuer: self.index,
                    point,
                },
            );
        }

        let required = 2 * self.scheme.threshold() + 1;
        let arrived = self.products.wait(c.to_string(), required).await;
        let incoming: Vec<ProductShare> = arrived
            .into_iter()
            .map(|share| ProductShare {
                issuer: share.x,
                share: SecretShare {
                    x: self.index,
                    y: share.y,
                },
            })
            .collect();

        let reduced = self.scheme.recombine_product_shares(&incoming)?;
        self.bind(c, reduced, true)
    }

    /// Bind an identifier computed locally.
    fn bind(&self, id: &str, value: BigUint, is_secret: bool) -> Result<(), EngineError> {
        if self.shares.set(id, value, is_secret) {
            Ok(())
        } else {
            Err(EngineError::IdAlreadyBound(id.to_string()))
        }
    }

    /// Stored record of an identifier, suspending until it is bound.
    async fn value_of(&self, id: &str) -> StoredShare {
        self.shares.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;
    use crate::cluster::LocalCluster;

    fn cluster(p: u64, threshold: usize, parties: usize) -> LocalCluster {
        LocalCluster::connect(SecretSharingScheme::new(
            PrimeField::new(BigUint::from(p)),
            threshold,
            parties,
        ))
    }

    fn value(v: u32) -> BigUint {
        BigUint::from(v)
    }

    async fn open_everywhere(cluster: &LocalCluster, id: &str) -> Vec<BigUint> {
        join_all(cluster.parties().iter().map(|party| {
            let party = party.clone();
            let id = id.to_string();
            async move {
                party.open(&id).await;
                party.reconstruct(&id).await.unwrap()
            }
        }))
        .await
    }

    fn assert_all(values: &[BigUint], expected: u32) {
        for v in values {
            assert_eq!(*v, value(expected));
        }
    }

    #[tokio::test]
    async fn test_share_and_reconstruct() {
        let cluster = cluster(11, 1, 3);
        cluster.party(1).input(&value(7), "x");
        assert_all(&open_everywhere(&cluster, "x").await, 7);
    }

    #[tokio::test]
    async fn test_addition() {
        let cluster = cluster(11, 1, 3);
        cluster.party(1).input(&value(7), "a");
        cluster.party(2).input(&value(9), "b");

        join_all(cluster.parties().iter().map(|party| {
            let party = party.clone();
            async move { party.add("a", "b", "sum").await.unwrap() }
        }))
        .await;

        // (7 + 9) mod 11 = 5
        assert_all(&open_everywhere(&cluster, "sum").await, 5);
    }

    #[tokio::test]
    async fn test_subtraction_and_constants() {
        let cluster = cluster(11, 1, 3);
        cluster.party(1).input(&value(3), "a");
        cluster.party(2).input(&value(9), "b");

        join_all(cluster.parties().iter().map(|party| {
            let party = party.clone();
            async move {
                party.sub("a", "b", "diff").await.unwrap();
                party.add_constant(&value(4), "a", "plus4").await.unwrap();
                party.sub_from_constant(&value(1), "a", "flip").await.unwrap();
                party.sub_constant("b", &value(2), "minus2").await.unwrap();
            }
        }))
        .await;

        assert_all(&open_everywhere(&cluster, "diff").await, 5); // 3 - 9 mod 11
        assert_all(&open_everywhere(&cluster, "plus4").await, 7);
        assert_all(&open_everywhere(&cluster, "flip").await, 9); // 1 - 3 mod 11
        assert_all(&open_everywhere(&cluster, "minus2").await, 7);
    }

    #[tokio::test]
    async fn test_scaling() {
        let cluster = cluster(11, 1, 3);
        cluster.party(1).input(&value(7), "x");

        join_all(cluster.parties().iter().map(|party| {
            let party = party.clone();
            async move { party.scale(&value(2), "x", "doubled").await.unwrap() }
        }))
        .await;

        // 2 * 7 mod 11 = 3
        assert_all(&open_everywhere(&cluster, "doubled").await, 3);
    }

    #[tokio::test]
    async fn test_multiplication_and_chaining() {
        let cluster = cluster(11, 1, 3);
        cluster.party(1).input(&value(7), "a");
        cluster.party(2).input(&value(9), "b");

        join_all(cluster.parties().iter().map(|party| {
            let party = party.clone();
            async move {
                party.multiply("a", "b", "ab").await.unwrap();
                // Chained product must stay at degree t.
                party.multiply("ab", "ab", "abab").await.unwrap();
            }
        }))
        .await;

        // 7 * 9 mod 11 = 8; 8 * 8 mod 11 = 9
        assert_all(&open_everywhere(&cluster, "ab").await, 8);
        assert_all(&open_everywhere(&cluster, "abab").await, 9);
    }

    #[tokio::test]
    async fn test_multiplication_by_public_value_is_local() {
        let cluster = cluster(11, 1, 3);
        cluster.party(1).input(&value(7), "x");

        join_all(cluster.parties().iter().map(|party| {
            let party = party.clone();
            async move {
                party.bind("k", value(4), false).unwrap();
                // One secret operand: no degree reduction round happens.
                party.multiply("x", "k", "xk").await.unwrap();
                assert!(party.value_of("xk").await.is_secret);
            }
        }))
        .await;

        // 7 * 4 mod 11 = 6
        assert_all(&open_everywhere(&cluster, "xk").await, 6);
    }

    #[tokio::test]
    async fn test_double_bind_is_rejected() {
        let cluster = cluster(11, 1, 3);
        let party = cluster.party(1);
        party.bind("x", value(1), false).unwrap();
        assert_eq!(
            party.bind("x", value(2), false),
            Err(EngineError::IdAlreadyBound("x".to_string()))
        );
    }
}
