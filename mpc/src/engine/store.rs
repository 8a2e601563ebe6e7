use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Mutex;

use num_bigint::BigUint;
use tokio::sync::oneshot;

use crate::shamir::SecretShare;

/// Value bound to an identifier, together with its secrecy flavor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredShare {
    pub value: BigUint,
    pub is_secret: bool,
}

/// Write-once identifier store with suspending readers.
///
/// Readers that arrive before the write register a oneshot waiter under the
/// store mutex and suspend; the writer collects the waiters while holding the
/// lock and fires them after releasing it.
#[derive(Default)]
pub struct IdStore {
    inner: Mutex<IdStoreInner>,
}

#[derive(Default)]
struct IdStoreInner {
    values: HashMap<String, StoredShare>,
    waiters: HashMap<String, Vec<oneshot::Sender<StoredShare>>>,
}

impl IdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value bound to `id`, suspending until it is written.
    pub async fn get(&self, id: &str) -> StoredShare {
        let receiver = {
            let mut inner = self.inner.lock().expect("identifier store poisoned");
            if let Some(stored) = inner.values.get(id) {
                return stored.clone();
            }
            let (sender, receiver) = oneshot::channel();
            inner.waiters.entry(id.to_string()).or_default().push(sender);
            receiver
        };
        receiver
            .await
            .expect("identifier store dropped while a reader was waiting")
    }

    /// Bind `id` and release its waiters. Returns false when the id is
    /// already bound; the first value is kept.
    pub fn set(&self, id: &str, value: BigUint, is_secret: bool) -> bool {
        let (stored, waiters) = {
            let mut inner = self.inner.lock().expect("identifier store poisoned");
            if inner.values.contains_key(id) {
                return false;
            }
            let stored = StoredShare { value, is_secret };
            inner.values.insert(id.to_string(), stored.clone());
            let waiters = inner.waiters.remove(id).unwrap_or_default();
            (stored, waiters)
        };

        for waiter in waiters {
            let _ = waiter.send(stored.clone());
        }
        true
    }
}

/// Threshold rendezvous store: contributions keyed by sender per rendezvous
/// key, with waiters released once enough distinct senders have contributed.
///
/// Keying by sender makes duplicate deliveries idempotent: a repeated sender
/// overwrites its previous value without advancing the count.
pub struct Rendezvous<K> {
    inner: Mutex<RendezvousInner<K>>,
}

struct RendezvousInner<K> {
    contributions: HashMap<K, BTreeMap<usize, BigUint>>,
    waiters: HashMap<K, Vec<ThresholdWaiter>>,
}

struct ThresholdWaiter {
    required: usize,
    notify: oneshot::Sender<Vec<SecretShare>>,
}

impl<K: Eq + Hash + Clone> Rendezvous<K> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RendezvousInner {
                contributions: HashMap::new(),
                waiters: HashMap::new(),
            }),
        }
    }

    /// Record a contribution from `sender` under `key`.
    pub fn insert(&self, key: K, sender: usize, y: BigUint) {
        let (fired, points) = {
            let mut inner = self.inner.lock().expect("rendezvous store poisoned");

            let entry = inner.contributions.entry(key.clone()).or_default();
            entry.insert(sender, y);
            let count = entry.len();

            let mut fired = Vec::new();
            if let Some(waiters) = inner.waiters.get_mut(&key) {
                let mut i = 0;
                while i < waiters.len() {
                    if waiters[i].required <= count {
                        fired.push(waiters.swap_remove(i));
                    } else {
                        i += 1;
                    }
                }
                if waiters.is_empty() {
                    inner.waiters.remove(&key);
                }
            }

            if fired.is_empty() {
                return;
            }
            let points = points_of(&inner.contributions[&key]);
            (fired, points)
        };

        for waiter in fired {
            let _ = waiter.notify.send(points.clone());
        }
    }

    /// Suspend until at least `required` distinct senders have contributed
    /// under `key`, then return the contributions as share points.
    pub async fn wait(&self, key: K, required: usize) -> Vec<SecretShare> {
        let receiver = {
            let mut inner = self.inner.lock().expect("rendezvous store poisoned");
            if let Some(entry) = inner.contributions.get(&key) {
                if entry.len() >= required {
                    return points_of(entry);
                }
            }
            let (notify, receiver) = oneshot::channel();
            inner
                .waiters
                .entry(key)
                .or_default()
                .push(ThresholdWaiter { required, notify });
            receiver
        };
        receiver
            .await
            .expect("rendezvous store dropped while a reader was waiting")
    }

    /// Drop all state recorded under `key`. Used when a sub-protocol
    /// iteration is abandoned and retried under a fresh tag.
    pub fn remove(&self, key: &K) {
        let mut inner = self.inner.lock().expect("rendezvous store poisoned");
        inner.contributions.remove(key);
        inner.waiters.remove(key);
    }
}

fn points_of(contributions: &BTreeMap<usize, BigUint>) -> Vec<SecretShare> {
    contributions
        .iter()
        .map(|(&x, y)| SecretShare { x, y: y.clone() })
        .collect()
}
