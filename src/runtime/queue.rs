//! # Work Queue
//!
//! Deduplicating queue of reconcile keys with per-key serialization and retry backoff.
//!
//! - A key is queued at most once; adding a queued key is a no-op.
//! - A key handed out by [`WorkQueue::next`] is in flight until [`WorkQueue::done`].
//!   Adding it meanwhile marks it dirty, and it is queued again as soon as the current
//!   pass ends, so at most one pass per key runs at a time and no event is lost.
//! - Failures are retried after an exponential, jittered delay kept per key. A key that
//!   keeps failing is dropped after the configured number of attempts; the next event
//!   or resync brings it back.

use crate::controller::backoff::ExponentialBackoff;
use crate::observability::metrics;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Lifecycle of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPhase {
    Pending,
    Evaluating,
    Converged,
    Failed,
}

/// How a pass over a key ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Converged,
    /// Converged for now, look again after the delay
    RequeueAfter(Duration),
    /// Transient failure, retry with backoff
    Failed,
    /// Permanent failure, do not retry
    Abandoned,
}

/// What the queue did with a key after [`WorkQueue::done`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Converged,
    Requeued(Duration),
    Retrying { attempt: u32, delay: Duration },
    Dropped { attempts: u32 },
}

/// Retry parameters
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff_start: Duration,
    pub backoff_max: Duration,
    pub max_retries: u32,
}

struct QueueState<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    in_flight: HashSet<K>,
    dirty: HashSet<K>,
    phases: HashMap<K, KeyPhase>,
    backoffs: HashMap<K, ExponentialBackoff>,
    shutdown: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            dirty: HashSet::new(),
            phases: HashMap::new(),
            backoffs: HashMap::new(),
            shutdown: false,
        }
    }
}

impl<K: Clone + Eq + Hash> QueueState<K> {
    fn push(&mut self, key: K) -> bool {
        if self.queued.insert(key.clone()) {
            self.phases.insert(key.clone(), KeyPhase::Pending);
            self.queue.push_back(key);
            true
        } else {
            false
        }
    }
}

pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    policy: RetryPolicy,
}

impl<K> std::fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            policy,
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        // Critical sections never panic midway, so a poisoned lock still holds consistent state
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a key now
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutdown {
            return;
        }
        if state.in_flight.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.push(key) {
            metrics::set_queue_depth(state.queue.len());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueue a key once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Wait for the next key; `None` once the queue is shut down
    pub async fn next(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    state.phases.insert(key.clone(), KeyPhase::Evaluating);
                    metrics::set_queue_depth(state.queue.len());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Finish a pass over a key handed out by [`WorkQueue::next`]
    pub fn done(self: &Arc<Self>, key: &K, outcome: KeyOutcome) -> Disposition {
        let mut state = self.lock();
        state.in_flight.remove(key);

        let (phase, disposition) = match outcome {
            KeyOutcome::Converged => {
                state.backoffs.remove(key);
                (KeyPhase::Converged, Disposition::Converged)
            }
            KeyOutcome::RequeueAfter(delay) => {
                state.backoffs.remove(key);
                (KeyPhase::Converged, Disposition::Requeued(delay))
            }
            KeyOutcome::Abandoned => {
                state.backoffs.remove(key);
                (KeyPhase::Failed, Disposition::Dropped { attempts: 1 })
            }
            KeyOutcome::Failed => {
                let policy = self.policy;
                let backoff = state.backoffs.entry(key.clone()).or_insert_with(|| {
                    ExponentialBackoff::new(policy.backoff_start, policy.backoff_max)
                });
                if backoff.attempts() >= policy.max_retries {
                    let attempts = backoff.attempts();
                    state.backoffs.remove(key);
                    (KeyPhase::Failed, Disposition::Dropped { attempts })
                } else {
                    let delay = backoff.next_backoff();
                    let attempt = backoff.attempts();
                    (KeyPhase::Failed, Disposition::Retrying { attempt, delay })
                }
            }
        };
        // An event arrived during the pass: run again right away
        let rerun = state.dirty.remove(key) && !state.shutdown && state.push(key.clone());
        if rerun {
            metrics::set_queue_depth(state.queue.len());
        } else if matches!(disposition, Disposition::Converged | Disposition::Dropped { .. }) {
            // Idle keys are forgotten so deleted objects do not accumulate
            state.phases.remove(key);
        } else {
            state.phases.insert(key.clone(), phase);
        }
        drop(state);
        if rerun {
            self.notify.notify_one();
        }

        match disposition {
            Disposition::Requeued(delay) | Disposition::Retrying { delay, .. } => {
                self.add_after(key.clone(), delay);
            }
            Disposition::Converged | Disposition::Dropped { .. } => {}
        }
        disposition
    }

    /// Stop handing out keys; waiting and future `next` calls return `None`
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Phase of a key that is queued, in flight, or waiting for a delayed retry;
    /// `None` once it settled
    #[must_use]
    pub fn phase(&self, key: &K) -> Option<KeyPhase> {
        self.lock().phases.get(key).copied()
    }

    /// Keys waiting to be handed out
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing queued and nothing in flight (delayed re-adds are not counted)
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            backoff_start: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
            max_retries,
        }
    }

    #[tokio::test]
    async fn test_add_deduplicates() {
        let queue = WorkQueue::new(policy(3));
        queue.add("a");
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.phase(&"a"), Some(KeyPhase::Pending));

        assert_eq!(queue.next().await, Some("a"));
        assert_eq!(queue.phase(&"a"), Some(KeyPhase::Evaluating));
        assert_eq!(queue.next().await, Some("b"));
    }

    #[tokio::test]
    async fn test_add_while_in_flight_reruns_after_done() {
        let queue = WorkQueue::new(policy(3));
        queue.add("a");
        let key = queue.next().await.unwrap();

        // Not handed out twice concurrently
        queue.add("a");
        assert!(queue.is_empty());

        assert_eq!(queue.done(&key, KeyOutcome::Converged), Disposition::Converged);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.phase(&"a"), Some(KeyPhase::Pending));
        assert_eq!(queue.next().await, Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retries_with_backoff() {
        let queue = WorkQueue::new(policy(3));
        queue.add("a");
        let key = queue.next().await.unwrap();

        let Disposition::Retrying { attempt, delay } = queue.done(&key, KeyOutcome::Failed) else {
            panic!("expected a retry");
        };
        assert_eq!(attempt, 1);
        assert!(delay <= Duration::from_millis(100));
        assert_eq!(queue.phase(&"a"), Some(KeyPhase::Failed));
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(queue.next().await, Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_dropped_after_max_retries() {
        let queue = WorkQueue::new(policy(2));
        queue.add("a");

        for expected_attempt in 1..=2 {
            let key = queue.next().await.unwrap();
            match queue.done(&key, KeyOutcome::Failed) {
                Disposition::Retrying { attempt, .. } => assert_eq!(attempt, expected_attempt),
                other => panic!("unexpected {other:?}"),
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        let key = queue.next().await.unwrap();
        assert_eq!(
            queue.done(&key, KeyOutcome::Failed),
            Disposition::Dropped { attempts: 2 }
        );
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(queue.is_idle());

        // A new event brings it back with a fresh backoff
        queue.add("a");
        let key = queue.next().await.unwrap();
        assert!(matches!(
            queue.done(&key, KeyOutcome::Failed),
            Disposition::Retrying { attempt: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_backoff() {
        let queue = WorkQueue::new(policy(5));
        queue.add("a");
        let key = queue.next().await.unwrap();
        queue.done(&key, KeyOutcome::Failed);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let key = queue.next().await.unwrap();
        assert_eq!(queue.done(&key, KeyOutcome::Converged), Disposition::Converged);

        queue.add("a");
        let key = queue.next().await.unwrap();
        assert!(matches!(
            queue.done(&key, KeyOutcome::Failed),
            Disposition::Retrying { attempt: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_after_delay() {
        let queue = WorkQueue::new(policy(3));
        queue.add("a");
        let key = queue.next().await.unwrap();
        queue.done(&key, KeyOutcome::RequeueAfter(Duration::from_secs(30)));
        assert_eq!(queue.phase(&"a"), Some(KeyPhase::Converged));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(queue.is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_is_not_retried() {
        let queue = WorkQueue::new(policy(3));
        queue.add("a");
        let key = queue.next().await.unwrap();
        assert!(matches!(
            queue.done(&key, KeyOutcome::Abandoned),
            Disposition::Dropped { .. }
        ));
        assert!(queue.is_idle());
        assert_eq!(queue.phase(&"a"), None);
    }

    #[tokio::test]
    async fn test_settled_keys_are_forgotten() {
        let queue = WorkQueue::new(policy(3));
        for i in 0..1000 {
            queue.add(i);
            let key = queue.next().await.unwrap();
            assert_eq!(queue.done(&key, KeyOutcome::Converged), Disposition::Converged);
        }
        assert!(queue.is_idle());
        assert_eq!(queue.lock().phases.len(), 0);
        assert_eq!(queue.lock().backoffs.len(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let queue: Arc<WorkQueue<&'static str>> = WorkQueue::new(policy(3));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add("late");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_waiting_worker_receives_added_key() {
        let queue: Arc<WorkQueue<&'static str>> = WorkQueue::new(policy(3));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.add("a");
        assert_eq!(waiter.await.unwrap(), Some("a"));
    }
}
