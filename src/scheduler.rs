use std::{
    collections::{HashMap, HashSet},
    future::Future,
    hash::Hash,
    sync::Arc,
};

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::error;

/// Runs keyed units of work with at most `limit` in flight.
#[derive(Debug, Clone, Copy)]
pub struct BoundedScheduler {
    limit: usize,
}

impl BoundedScheduler {
    pub fn new(limit: usize) -> Self {
        Self { limit: limit.max(1) }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Duplicate keys are collapsed before scheduling, so each distinct key runs
    /// exactly once. Returns once every unit has finished. A unit that panics is
    /// logged and missing from the result.
    pub async fn run<K, V, F, Fut>(
        &self,
        keys: impl IntoIterator<Item = K>,
        work: F,
    ) -> HashMap<K, V>
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Send + 'static,
        F: Fn(K) -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let unique: HashSet<K> = keys.into_iter().collect();
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut tasks = JoinSet::new();
        let mut results = HashMap::with_capacity(unique.len());

        for key in unique {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let fut = work(key.clone());
            tasks.spawn(async move {
                let value = fut.await;
                drop(permit);
                (key, value)
            });
            // Reap whatever already finished so results don't pile up in the set.
            while let Some(done) = tasks.try_join_next() {
                collect(done, &mut results);
            }
        }

        while let Some(done) = tasks.join_next().await {
            collect(done, &mut results);
        }
        results
    }
}

fn collect<K: Eq + Hash, V>(
    done: Result<(K, V), tokio::task::JoinError>,
    results: &mut HashMap<K, V>,
) {
    match done {
        Ok((key, value)) => {
            results.insert(key, value);
        }
        Err(e) => error!(error = %e, "scheduled unit failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_the_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let scheduler = BoundedScheduler::new(3);

        let results = scheduler
            .run(0u64..20, |key| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    key * 2
                }
            })
            .await;

        assert_eq!(results.len(), 20);
        assert_eq!(results[&7], 14);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn duplicate_keys_run_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let keys = std::iter::repeat(42u64).take(500).chain([1, 2]);

        let results = BoundedScheduler::new(5)
            .run(keys, |key| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    key
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn zero_limit_is_treated_as_one() {
        let scheduler = BoundedScheduler::new(0);
        assert_eq!(scheduler.limit(), 1);
        let results = scheduler.run([1u8, 2], |k| async move { k }).await;
        assert_eq!(results.len(), 2);
    }
}
