//! Per-key single-flight gates.
//!
//! A [`SingleFlight`] keeps a registry of keys that currently have an
//! operation running. The first caller for a key becomes the *leader* and runs
//! the operation; anyone arriving while it runs becomes a *follower* and waits
//! on that key's gate instead of starting a duplicate. Once the leader settles,
//! every follower adopts the leader's value and the key is removed from the
//! registry, so a later caller starts a fresh flight.
//!
//! The registry map is guarded by its own [`Mutex`], which is never held across
//! an `.await`. Waiting happens on the per-key gate (a [`watch`] channel), so
//! lookups and removals for other keys are never blocked by a slow operation.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum State<V> {
    Pending,
    Ready(V),
    Failed,
    Abandoned,
}
impl<V> State<V> {
    fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

type Gate<V> = Arc<watch::Sender<State<V>>>;
type Gates<K, V> = Mutex<HashMap<K, Gate<V>>>;

/// How a caller came by its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flight<V> {
    /// This caller ran the operation itself.
    Led(V),
    /// Another caller was already running the operation; this one waited for
    /// it and shares its result.
    Joined(V),
}
impl<V> Flight<V> {
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Led(_))
    }

    pub fn into_inner(self) -> V {
        match self {
            Self::Led(value) | Self::Joined(value) => value,
        }
    }
}

/// Why a flight produced no value.
#[derive(Debug)]
pub enum FlightError<E> {
    /// The cancellation token fired, or the leader was dropped before it
    /// settled.
    Cancelled,
    /// This caller was a follower and the leader's operation failed. The
    /// leader's error itself is only returned to the leader.
    LeaderFailed,
    /// This caller led the operation and it failed.
    Failed(E),
}

enum Role<V> {
    Leader(Gate<V>),
    Follower(watch::Receiver<State<V>>),
}

/// Collapses concurrent operations on the same key into one.
///
/// ```
/// use skiff_asyncutils::{Flight, SingleFlight};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flights: SingleFlight<&str, u64> = SingleFlight::new();
/// let cancel = CancellationToken::new();
/// let result = flights.run("sha256:abc", &cancel, || async { Ok::<_, ()>(42) }).await;
/// assert!(matches!(result, Ok(Flight::Led(42))));
/// assert_eq!(flights.in_flight(), 0);
/// # }
/// ```
pub struct SingleFlight<K, V> {
    gates: Gates<K, V>,
}
impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self { gates: Mutex::new(HashMap::new()) }
    }
}
impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with an operation currently running.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Gate<V>>> {
        // Nothing panics while holding the lock; a poisoned map is still consistent.
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&self, key: &K) -> Role<V> {
        let mut gates = self.lock();
        match gates.entry(key.clone()) {
            Entry::Occupied(entry) => Role::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (gate, _) = watch::channel(State::Pending);
                let gate = Arc::new(gate);
                entry.insert(Arc::clone(&gate));
                Role::Leader(gate)
            },
        }
    }

    /// Run `operation` for `key`, unless an operation for `key` is already
    /// running, in which case wait for it and share its value.
    ///
    /// Waiting (as either leader or follower) is abandoned as soon as `cancel`
    /// fires. A leader that is cancelled or dropped mid-operation releases its
    /// followers with [`FlightError::Cancelled`] rather than leaving them hung.
    pub async fn run<F, Fut, E>(
        &self,
        key: K,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<Flight<V>, FlightError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let gate = match self.join(&key) {
            Role::Leader(gate) => gate,
            Role::Follower(mut rx) => {
                let settled = tokio::select! {
                    _ = cancel.cancelled() => return Err(FlightError::Cancelled),
                    state = rx.wait_for(State::is_settled) => state.map(|state| (*state).clone()),
                };
                return match settled {
                    Ok(State::Ready(value)) => Ok(Flight::Joined(value)),
                    Ok(State::Failed) => Err(FlightError::LeaderFailed),
                    Ok(State::Pending | State::Abandoned) | Err(_) => Err(FlightError::Cancelled),
                };
            },
        };
        let mut landing = Landing { gates: &self.gates, key, gate, settled: false };
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(FlightError::Cancelled),
            result = operation() => result,
        };
        match result {
            Ok(value) => {
                landing.settle(State::Ready(value.clone()));
                Ok(Flight::Led(value))
            },
            Err(e) => {
                landing.settle(State::Failed);
                Err(FlightError::Failed(e))
            },
        }
    }
}

/// Publishes the leader's outcome and removes the key from the registry, even
/// when the leader's future is dropped halfway through.
struct Landing<'a, K: Eq + Hash, V> {
    gates: &'a Gates<K, V>,
    key: K,
    gate: Gate<V>,
    settled: bool,
}
impl<K: Eq + Hash, V> Landing<'_, K, V> {
    fn settle(&mut self, state: State<V>) {
        self.gate.send_replace(state);
        self.settled = true;
    }
}
impl<K: Eq + Hash, V> Drop for Landing<'_, K, V> {
    fn drop(&mut self) {
        if !self.settled {
            self.gate.send_replace(State::Abandoned);
        }
        // Settle first, then unregister: a caller arriving in between sees an
        // already-settled gate and returns immediately.
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if gates.get(&self.key).is_some_and(|gate| Arc::ptr_eq(gate, &self.gate)) {
            gates.remove(&self.key);
        }
    }
}
