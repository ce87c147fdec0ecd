//! Per-key deduplication of concurrent producer calls.
//!
//! A [`SingleFlightGroup`] guarantees that at most one producer runs for a
//! given key at any instant. The first caller for a key (the *leader*) starts
//! the call; every caller arriving while it runs (a *follower*) awaits the same
//! outcome instead of starting its own.
//!
//! # Lifecycle of a call
//!
//! ```text
//! leader:    entry(key) vacant ─► register Shared future ─► spawn driver ─► await
//! follower:  entry(key) occupied ─► clone Shared future ─────────────────► await
//! driver:    call producer ─► await it ─► remove key ─► resolve Shared for every waiter
//! ```
//!
//! The call is driven by a spawned task, so it completes (and the key is
//! released) even when every waiting caller has been cancelled. The map lock is
//! held only while registering or removing the call, never while the producer
//! runs.

use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type Call<V> = Shared<BoxFuture<'static, Result<V>>>;

/// Deduplicates concurrent calls that share a key.
///
/// Clones share the same in-flight map.
///
/// # Example
///
/// ```
/// use ledger_cache::SingleFlightGroup;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let group: SingleFlightGroup<i64> = SingleFlightGroup::new();
///
/// let (result, shared) = group
///     .work("cache::block:executed_count", || async { Ok(17) })
///     .await;
///
/// assert_eq!(result, Ok(17));
/// assert!(!shared);
/// # }
/// ```
pub struct SingleFlightGroup<V> {
    calls: Arc<DashMap<String, Call<V>>>,
}

impl<V> Clone for SingleFlightGroup<V> {
    fn clone(&self) -> Self {
        SingleFlightGroup {
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<V> Default for SingleFlightGroup<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SingleFlightGroup<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        SingleFlightGroup {
            calls: Arc::new(DashMap::new()),
        }
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }

    /// Whether a call for `key` is currently in flight.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.calls.contains_key(key)
    }

    /// Run `producer` for `key` unless a call for `key` is already running.
    ///
    /// Returns the call's outcome and whether it was shared: `false` for the
    /// caller that started the call, `true` for callers that joined it.
    /// A failed call is not remembered; the next `work` for the key runs the
    /// producer again.
    pub async fn work<F, Fut>(&self, key: &str, producer: F) -> (Result<V>, bool)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.work_until(key, producer, None, None).await
    }

    /// Like [`work`](Self::work), but this caller stops waiting when `cancel`
    /// fires or `timeout` elapses.
    ///
    /// Giving up only affects this caller: the call keeps running, its other
    /// waiters still receive the outcome, and the key is released normally.
    ///
    /// # Errors
    ///
    /// - `Error::Cancelled`: `cancel` fired before the call finished
    /// - `Error::Timeout`: `timeout` elapsed before the call finished
    /// - `Error::ProducerPanic`: the producer panicked
    /// - any error returned by the producer
    pub async fn work_until<F, Fut>(
        &self,
        key: &str,
        producer: F,
        cancel: Option<&CancellationToken>,
        timeout: Option<Duration>,
    ) -> (Result<V>, bool)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (call, shared) = self.join_or_start(key, producer);

        if shared {
            debug!("» Joined in-flight call for {}", key);
        } else {
            // Driver task: completes the call even if this caller is dropped.
            tokio::spawn(call.clone());
        }

        let waited = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or_else(|_| {
                        Err(Error::Timeout(format!(
                            "waited {:?} for in-flight call {}",
                            limit, key
                        )))
                    }),
                None => call.await,
            }
        };

        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("✗ Caller cancelled while waiting for {}", key);
                    Err(Error::Cancelled(format!("stopped waiting for {}", key)))
                }
                result = waited => result,
            },
            None => waited.await,
        };

        (result, shared)
    }

    fn join_or_start<F, Fut>(&self, key: &str, producer: F) -> (Call<V>, bool)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        match self.calls.entry(key.to_string()) {
            Entry::Occupied(existing) => (existing.get().clone(), true),
            Entry::Vacant(slot) => {
                let calls = Arc::clone(&self.calls);
                let owned_key = key.to_string();

                // The producer is invoked by the driver task, after the shard
                // lock is released.
                let call = async move {
                    let result = AssertUnwindSafe(async move { producer().await })
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            let msg = panic_message(panic.as_ref());
                            error!("Producer for {} panicked: {}", owned_key, msg);
                            Err(Error::ProducerPanic(msg))
                        });
                    // Release the key before waiters observe the result, so a
                    // caller that sees this outcome and retries starts a fresh call.
                    calls.remove(&owned_key);
                    result
                }
                .boxed()
                .shared();

                slot.insert(call.clone());
                (call, false)
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_single_caller_is_leader() {
        let group: SingleFlightGroup<String> = SingleFlightGroup::new();

        let (result, shared) = group.work("BTC", || async { Ok("42000.5".to_string()) }).await;

        assert_eq!(result, Ok("42000.5".to_string()));
        assert!(!shared);
        settle().await;
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_call() {
        let group: SingleFlightGroup<i64> = SingleFlightGroup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let group = group.clone();
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                group
                    .work("count", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _permit = gate.acquire().await.expect("gate closed");
                        Ok(17)
                    })
                    .await
            }));
        }

        settle().await;
        assert!(group.is_in_flight("count"));
        gate.add_permits(1);

        let mut leaders = 0;
        for handle in handles {
            let (result, shared) = handle.await.expect("task failed");
            assert_eq!(result, Ok(17));
            if !shared {
                leaders += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert!(!group.is_in_flight("count"));
    }

    #[tokio::test]
    async fn test_error_is_shared_and_not_remembered() {
        let group: SingleFlightGroup<i64> = SingleFlightGroup::new();

        let (first, _) = group
            .work("count", || async {
                Err(Error::RepositoryError("connection reset".to_string()))
            })
            .await;
        assert!(matches!(first, Err(Error::RepositoryError(_))));

        let (second, shared) = group.work("count", || async { Ok(18) }).await;
        assert_eq!(second, Ok(18));
        assert!(!shared);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let group: SingleFlightGroup<i64> = SingleFlightGroup::new();
        let gate = Arc::new(Semaphore::new(0));

        let blocked = {
            let group = group.clone();
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                group
                    .work("slow", move || async move {
                        let _permit = gate.acquire().await.expect("gate closed");
                        Ok(1)
                    })
                    .await
            })
        };

        settle().await;
        let (fast, shared) = group.work("fast", || async { Ok(2) }).await;
        assert_eq!(fast, Ok(2));
        assert!(!shared);

        gate.add_permits(1);
        assert_eq!(blocked.await.unwrap().0, Ok(1));
    }

    #[tokio::test]
    async fn test_panicking_producer_releases_key() {
        let group: SingleFlightGroup<i64> = SingleFlightGroup::new();

        let (result, _) = group
            .work("boom", || async {
                if true {
                    panic!("upstream exploded");
                }
                Ok(0)
            })
            .await;

        match result {
            Err(Error::ProducerPanic(msg)) => assert!(msg.contains("upstream exploded")),
            other => panic!("Expected ProducerPanic, got {:?}", other),
        }

        let (retry, _) = group.work("boom", || async { Ok(5) }).await;
        assert_eq!(retry, Ok(5));
    }

    #[tokio::test]
    async fn test_producer_can_inspect_group() {
        let group: SingleFlightGroup<i64> = SingleFlightGroup::new();
        let observer = group.clone();

        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            group.work("count", move || {
                let running = observer.in_flight() as i64;
                let own_key = observer.is_in_flight("count");
                async move {
                    assert!(own_key);
                    Ok(running)
                }
            }),
        )
        .await
        .expect("producer blocked on the call map");

        assert_eq!(outcome, (Ok(1), false));
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_producer_can_start_nested_call() {
        let group: SingleFlightGroup<i64> = SingleFlightGroup::new();
        let inner = group.clone();

        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            group.work("outer", move || async move {
                let (nested, _) = inner.work("inner", || async { Ok(20) }).await;
                Ok(nested? + 1)
            }),
        )
        .await
        .expect("nested call blocked on the call map");

        assert_eq!(outcome, (Ok(21), false));
    }

    #[tokio::test]
    async fn test_producer_panicking_before_first_poll_releases_key() {
        let group: SingleFlightGroup<i64> = SingleFlightGroup::new();

        let (result, shared) = group
            .work("boom", || -> futures::future::Ready<Result<i64>> {
                panic!("bad arguments")
            })
            .await;

        assert!(!shared);
        match result {
            Err(Error::ProducerPanic(msg)) => assert!(msg.contains("bad arguments")),
            other => panic!("Expected ProducerPanic, got {:?}", other),
        }
        assert!(!group.is_in_flight("boom"));
    }

    #[tokio::test]
    async fn test_cancelled_follower_leaves_call_running() {
        let group: SingleFlightGroup<i64> = SingleFlightGroup::new();
        let gate = Arc::new(Semaphore::new(0));

        let leader = {
            let group = group.clone();
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                group
                    .work("count", move || async move {
                        let _permit = gate.acquire().await.expect("gate closed");
                        Ok(17)
                    })
                    .await
            })
        };
        settle().await;

        let token = CancellationToken::new();
        let follower = {
            let group = group.clone();
            let token = token.clone();
            tokio::spawn(async move {
                group
                    .work_until("count", || async { Ok(-1) }, Some(&token), None)
                    .await
            })
        };
        settle().await;

        token.cancel();
        let (follower_result, shared) = follower.await.unwrap();
        assert!(matches!(follower_result, Err(Error::Cancelled(_))));
        assert!(shared);
        assert!(group.is_in_flight("count"));

        gate.add_permits(1);
        assert_eq!(leader.await.unwrap(), (Ok(17), false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_timeout() {
        let group: SingleFlightGroup<i64> = SingleFlightGroup::new();
        let gate = Arc::new(Semaphore::new(0));

        let leader = {
            let group = group.clone();
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                group
                    .work("count", move || async move {
                        let _permit = gate.acquire().await.expect("gate closed");
                        Ok(3)
                    })
                    .await
            })
        };
        settle().await;

        let (result, shared) = group
            .work_until(
                "count",
                || async { Ok(-1) },
                None,
                Some(Duration::from_millis(50)),
            )
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(shared);

        gate.add_permits(1);
        assert_eq!(leader.await.unwrap().0, Ok(3));
    }

    #[tokio::test]
    async fn test_call_completes_after_leader_dropped() {
        let group: SingleFlightGroup<i64> = SingleFlightGroup::new();
        let gate = Arc::new(Semaphore::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let leader = {
            let group = group.clone();
            let gate = Arc::clone(&gate);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                group
                    .work("count", move || async move {
                        let _permit = gate.acquire().await.expect("gate closed");
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(9)
                    })
                    .await
            })
        };
        settle().await;

        leader.abort();
        let _ = leader.await;

        gate.add_permits(1);
        settle().await;

        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(!group.is_in_flight("count"));
    }
}
