//! Keyed request coalescing
//!
//! A `BatchCoalescer` turns many concurrent single-key lookups made while
//! answering one query into as few multi-key upstream calls as possible.
//!
//! - `request(key)` registers the key immediately and returns a future.
//! - The collection window closes on an explicit `dispatch()`, or one
//!   scheduler tick after the first pending future is awaited. Every key
//!   queued by then goes out in one batch (split by `max_batch_size`).
//! - Each key is fetched at most once per coalescer; outcomes, including
//!   failures, are memoised for the coalescer's lifetime.

use crate::error::{ResolveError, ResolveResult};
use crate::metrics;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Multi-key fetch backing a coalescer.
///
/// An `Err` fails the whole batch. A key missing from the returned map is
/// reported to its requesters as `NotFound`.
#[async_trait]
pub trait BatchFetch<K, V>: Send + Sync {
    async fn fetch(&self, keys: &[K]) -> ResolveResult<HashMap<K, ResolveResult<V>>>;
}

type BatchOutcome<K, V> = Arc<HashMap<K, ResolveResult<V>>>;
type SharedBatch<K, V> = Shared<BoxFuture<'static, BatchOutcome<K, V>>>;

struct State<K, V> {
    queued: Vec<K>,
    queued_set: HashSet<K>,
    in_flight: HashMap<K, SharedBatch<K, V>>,
}

struct Inner<K, V> {
    name: &'static str,
    fetcher: Arc<dyn BatchFetch<K, V>>,
    max_batch_size: usize,
    state: Mutex<State<K, V>>,
    resolved: DashMap<K, ResolveResult<V>>,
    dispatches: AtomicUsize,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Record a finished batch. Outcomes are write-once per key.
    fn complete(&self, outcomes: &HashMap<K, ResolveResult<V>>) {
        let mut state = self.state.lock();
        for (key, outcome) in outcomes {
            self.resolved
                .entry(key.clone())
                .or_insert_with(|| outcome.clone());
            state.in_flight.remove(key);
        }
    }
}

/// Per-operation request coalescer; see the module docs
pub struct BatchCoalescer<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> BatchCoalescer<K, V>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// `name` labels metrics and is the entity reported for omitted keys
    pub fn new(name: &'static str, fetcher: Arc<dyn BatchFetch<K, V>>, max_batch_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                fetcher,
                max_batch_size: max_batch_size.max(1),
                state: Mutex::new(State {
                    queued: Vec::new(),
                    queued_set: HashSet::new(),
                    in_flight: HashMap::new(),
                }),
                resolved: DashMap::new(),
                dispatches: AtomicUsize::new(0),
            }),
        }
    }

    /// Register interest in `key` and return a future for its outcome.
    ///
    /// Registration is synchronous, so every request created before the
    /// first await joins the same batch.
    pub fn request(&self, key: K) -> impl Future<Output = ResolveResult<V>> + Send + '_ {
        self.register(&key);
        self.wait_for(key)
    }

    /// Close the collection window now and send every queued key
    pub fn dispatch(&self) {
        let mut state = self.inner.state.lock();
        self.dispatch_locked(&mut state);
    }

    /// Number of batch calls issued so far
    pub fn dispatch_count(&self) -> usize {
        self.inner.dispatches.load(Ordering::Relaxed)
    }

    /// Keys registered but not yet dispatched
    pub fn pending(&self) -> usize {
        self.inner.state.lock().queued.len()
    }

    fn register(&self, key: &K) {
        let mut state = self.inner.state.lock();
        if self.inner.resolved.contains_key(key)
            || state.in_flight.contains_key(key)
            || state.queued_set.contains(key)
        {
            return;
        }
        state.queued_set.insert(key.clone());
        state.queued.push(key.clone());
    }

    fn memoised(&self, key: &K) -> Option<ResolveResult<V>> {
        self.inner.resolved.get(key).map(|entry| entry.value().clone())
    }

    async fn wait_for(&self, key: K) -> ResolveResult<V> {
        if let Some(outcome) = self.memoised(&key) {
            return outcome;
        }

        // Give sibling futures polled in the same pass a tick to register
        let already_sent = self.inner.state.lock().in_flight.contains_key(&key);
        if !already_sent {
            tokio::task::yield_now().await;
        }

        let batch = {
            let mut state = self.inner.state.lock();
            if let Some(outcome) = self.memoised(&key) {
                return outcome;
            }
            if !state.in_flight.contains_key(&key) {
                if !state.queued_set.contains(&key) {
                    state.queued_set.insert(key.clone());
                    state.queued.push(key.clone());
                }
                self.dispatch_locked(&mut state);
            }
            match state.in_flight.get(&key) {
                Some(batch) => batch.clone(),
                None => {
                    return Err(ResolveError::Internal(format!(
                        "{} key {} was not dispatched",
                        self.inner.name, key
                    )))
                }
            }
        };

        let outcomes = batch.await;
        outcomes.get(&key).cloned().unwrap_or_else(|| {
            Err(ResolveError::Internal(format!(
                "{} key {} missing from its batch",
                self.inner.name, key
            )))
        })
    }

    fn dispatch_locked(&self, state: &mut State<K, V>) {
        if state.queued.is_empty() {
            return;
        }
        let keys = std::mem::take(&mut state.queued);
        state.queued_set.clear();

        for chunk in keys.chunks(self.inner.max_batch_size) {
            let chunk: Vec<K> = chunk.to_vec();
            self.inner.dispatches.fetch_add(1, Ordering::Relaxed);
            metrics::record_batch_dispatch(self.inner.name, chunk.len());
            debug!("Dispatching {} batch of {} keys", self.inner.name, chunk.len());

            // The fetch runs on its own task so it completes even if every
            // awaiter is dropped
            let inner = Arc::clone(&self.inner);
            let task_keys = chunk.clone();
            let task = tokio::spawn(async move {
                let result = inner.fetcher.fetch(&task_keys).await;
                let outcomes = settle(inner.name, &task_keys, result);
                inner.complete(&outcomes);
                Arc::new(outcomes)
            });

            let name = self.inner.name;
            let fallback_keys = chunk.clone();
            let shared = async move {
                match task.await {
                    Ok(outcomes) => outcomes,
                    Err(e) => {
                        let err = ResolveError::Internal(format!("{} batch task failed: {}", name, e));
                        Arc::new(fallback_keys.into_iter().map(|k| (k, Err(err.clone()))).collect())
                    }
                }
            }
            .boxed()
            .shared();

            for key in chunk {
                state.in_flight.insert(key, shared.clone());
            }
        }
    }
}

/// Expand a batch result into one outcome per requested key
fn settle<K, V>(
    entity: &str,
    keys: &[K],
    result: ResolveResult<HashMap<K, ResolveResult<V>>>,
) -> HashMap<K, ResolveResult<V>>
where
    K: Eq + Hash + Clone + Display,
{
    match result {
        Ok(mut found) => keys
            .iter()
            .map(|key| {
                let outcome = found
                    .remove(key)
                    .unwrap_or_else(|| Err(ResolveError::not_found(entity, key.to_string())));
                (key.clone(), outcome)
            })
            .collect(),
        Err(err) => keys.iter().map(|key| (key.clone(), Err(err.clone()))).collect(),
    }
}
