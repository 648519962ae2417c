//! Keyed query cache with stale-while-revalidate reads and invalidating writes.
//!
//! Each key owns one [`Entry`]: the last good value, the last error, when it was
//! fetched and a generation. Invalidation assigns a new generation; a fetch
//! that finishes under an older generation is thrown away so a slow response can
//! never overwrite a newer one. Generations come from one client-wide sequence,
//! so an entry removed by `clear` or GC and then recreated starts fresh. Only one fetch per key runs at a time and every
//! subscriber of that key observes it through a `watch` channel.

use std::{
    any::Any,
    collections::HashMap,
    future::Future,
    marker::PhantomData,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};

use tokio::{sync::watch, time::Instant};

use crate::error::PortalError;
use crate::infra::keys::QueryKey;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

type CachedValue = Arc<dyn Any + Send + Sync>;
type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Fetcher = Arc<dyn Fn() -> BoxFuture<Result<CachedValue, PortalError>> + Send + Sync>;

/// Where an entry is in its fetch cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryStatus {
    /// Never fetched, or disabled.
    Idle,
    Fetching,
    Resolved,
    /// Retries exhausted. Earlier data, if any, is still served.
    Errored,
}

/// Client-wide defaults; individual queries may override through [`QueryOptions`].
#[derive(Clone, Debug)]
pub struct QueryConfig {
    /// Age after which a new subscriber triggers a refetch.
    pub stale_time: Duration,
    /// How long an unwatched entry survives.
    pub gc_time: Duration,
    /// Extra attempts after the first failure.
    pub retry: u32,
    /// Doubled after each failed attempt.
    pub retry_base_delay: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            gc_time: Duration::from_secs(5 * 60),
            retry: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Per-query overrides of [`QueryConfig`].
#[derive(Clone, Debug)]
pub struct QueryOptions {
    /// A disabled query stays idle and never fetches.
    pub enabled: bool,
    pub stale_time: Option<Duration>,
    pub retry: Option<u32>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_time: None,
            retry: None,
        }
    }
}

impl QueryOptions {
    /// Options that only decide whether the query may run.
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }
}

#[derive(Clone, Copy, Debug)]
struct ResolvedOptions {
    enabled: bool,
    stale_time: Duration,
    retry: u32,
}

/// A write plus the cache prefixes it makes obsolete.
#[derive(Clone, Debug)]
pub struct Mutation {
    pub label: String,
    pub invalidates: Vec<QueryKey>,
}

impl Mutation {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            invalidates: Vec::new(),
        }
    }

    /// Add a prefix to invalidate once the write succeeds.
    pub fn invalidating(mut self, key: QueryKey) -> Self {
        self.invalidates.push(key);
        self
    }
}

#[derive(Clone)]
struct Snapshot {
    status: QueryStatus,
    data: Option<CachedValue>,
    error: Option<PortalError>,
    fetched_at: Option<Instant>,
}

impl Snapshot {
    fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            fetched_at: None,
        }
    }

    /// Status to fall back to once no fetch is running.
    fn settled_status(&self) -> QueryStatus {
        if self.error.is_some() {
            QueryStatus::Errored
        } else if self.data.is_some() {
            QueryStatus::Resolved
        } else {
            QueryStatus::Idle
        }
    }
}

struct Entry {
    snapshot: Snapshot,
    invalidated: bool,
    generation: u64,
    /// Token of the running fetch. Tokens are client-wide, so a fetch started
    /// for a removed entry never matches its replacement.
    fetch: Option<u64>,
    fetcher: Fetcher,
    options: ResolvedOptions,
    subscribers: usize,
    release_epoch: u64,
    tx: watch::Sender<Snapshot>,
}

impl Entry {
    fn is_stale(&self, now: Instant) -> bool {
        self.invalidated
            || self
                .snapshot
                .fetched_at
                .map(|at| now.saturating_duration_since(at) >= self.options.stale_time)
                .unwrap_or(true)
    }

    fn needs_fetch(&self, now: Instant) -> bool {
        self.options.enabled
            && self.fetch.is_none()
            && (self.snapshot.data.is_none()
                || self.snapshot.error.is_some()
                || self.is_stale(now))
    }

    fn publish(&self) {
        self.tx.send_replace(self.snapshot.clone());
    }
}

struct Inner {
    config: QueryConfig,
    entries: Mutex<HashMap<QueryKey, Entry>>,
    next_id: AtomicU64,
}

impl Inner {
    /// Generations and fetch tokens share one sequence and are never reused.
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, options: &QueryOptions) -> ResolvedOptions {
        ResolvedOptions {
            enabled: options.enabled,
            stale_time: options.stale_time.unwrap_or(self.config.stale_time),
            retry: options.retry.unwrap_or(self.config.retry),
        }
    }
}

/// Process-wide query cache. Cloning shares the same entries.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(QueryConfig::default())
    }
}

impl QueryClient {
    pub fn new(config: QueryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    /// Subscribe to `key`, fetching through `fetcher` when the entry is missing,
    /// errored or stale. Cached data stays visible while a refetch runs.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<T, F, Fut>(
        &self,
        key: QueryKey,
        fetcher: F,
        options: QueryOptions,
    ) -> QueryHandle<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PortalError>> + Send + 'static,
    {
        let fetcher: Fetcher = Arc::new(move || {
            let fut = fetcher();
            Box::pin(async move { fut.await.map(|value| Arc::new(value) as CachedValue) })
        });
        let options = self.inner.resolve(&options);

        let rx = {
            let mut entries = self.inner.entries();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                snapshot: Snapshot::idle(),
                invalidated: false,
                generation: self.inner.next_id(),
                fetch: None,
                fetcher: fetcher.clone(),
                options,
                subscribers: 0,
                release_epoch: 0,
                tx: watch::channel(Snapshot::idle()).0,
            });
            entry.fetcher = fetcher;
            entry.options = options;
            entry.subscribers += 1;
            entry.release_epoch += 1;

            if entry.needs_fetch(Instant::now()) {
                start_fetch(&self.inner, &key, entry);
            } else {
                tracing::trace!(key = %key, "serving cached query");
            }
            entry.tx.subscribe()
        };

        QueryHandle {
            client: self.clone(),
            key,
            rx,
            _marker: PhantomData,
        }
    }

    /// Subscribe, wait for the result, and unsubscribe.
    pub async fn fetch<T, F, Fut>(
        &self,
        key: QueryKey,
        fetcher: F,
        options: QueryOptions,
    ) -> Result<Arc<T>, PortalError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PortalError>> + Send + 'static,
    {
        let mut handle = self.subscribe(key, fetcher, options);
        handle.settled().await
    }

    /// Mark every entry under `prefix` stale and refetch the ones somebody is
    /// watching. Returns how many entries matched.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.inner.entries();
        let mut matched = 0;
        for (key, entry) in entries.iter_mut().filter(|(key, _)| key.starts_with(prefix)) {
            matched += 1;
            entry.invalidated = true;
            entry.generation = self.inner.next_id();
            if entry.subscribers > 0 && entry.options.enabled && entry.fetch.is_none() {
                start_fetch(&self.inner, key, entry);
            }
        }
        tracing::debug!(prefix = %prefix, matched, "invalidated queries");
        matched
    }

    /// Run a write exactly once. On success the mutation's prefixes are
    /// invalidated; on failure the cache is left as it was.
    pub async fn mutate<T, Fut>(&self, mutation: &Mutation, op: Fut) -> Result<T, PortalError>
    where
        Fut: Future<Output = Result<T, PortalError>>,
    {
        match op.await {
            Ok(value) => {
                tracing::info!(mutation = %mutation.label, "mutation succeeded");
                for key in &mutation.invalidates {
                    self.invalidate(key);
                }
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(mutation = %mutation.label, error = %err, "mutation failed");
                Err(err)
            }
        }
    }

    /// Drop all cached data. Watched entries are reset to idle rather than removed.
    pub fn clear(&self) {
        let mut entries = self.inner.entries();
        entries.retain(|_, entry| entry.subscribers > 0);
        for entry in entries.values_mut() {
            entry.generation = self.inner.next_id();
            entry.invalidated = true;
            entry.snapshot = Snapshot::idle();
            entry.publish();
        }
        tracing::debug!(kept = entries.len(), "query cache cleared");
    }

    /// Whether an entry exists for exactly `key`.
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.entries().contains_key(key)
    }

    fn release(&self, key: &QueryKey) {
        let mut entries = self.inner.entries();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.subscribers > 0 {
            return;
        }

        entry.release_epoch += 1;
        let epoch = entry.release_epoch;
        let gc_time = self.inner.config.gc_time;
        let inner = Arc::downgrade(&self.inner);
        let key = key.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                tokio::time::sleep(gc_time).await;
                collect(inner, &key, epoch);
            });
        }
    }
}

fn start_fetch(inner: &Arc<Inner>, key: &QueryKey, entry: &mut Entry) {
    let token = inner.next_id();
    entry.fetch = Some(token);
    entry.snapshot.status = QueryStatus::Fetching;
    entry.publish();

    let generation = entry.generation;
    let fetcher = entry.fetcher.clone();
    let retries = entry.options.retry;
    let base_delay = inner.config.retry_base_delay;
    let inner = Arc::clone(inner);
    let key = key.clone();

    tracing::debug!(key = %key, generation, "fetching query");
    tokio::spawn(async move {
        let result = run_with_retry(&key, fetcher, retries, base_delay).await;
        finish_fetch(&inner, &key, token, generation, result);
    });
}

async fn run_with_retry(
    key: &QueryKey,
    fetcher: Fetcher,
    retries: u32,
    base_delay: Duration,
) -> Result<CachedValue, PortalError> {
    let mut attempt = 0;
    loop {
        match fetcher().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < retries => {
                let delay = backoff(base_delay, attempt);
                attempt += 1;
                tracing::debug!(key = %key, attempt, ?delay, error = %err, "retrying query");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_RETRY_DELAY)
}

fn finish_fetch(
    inner: &Arc<Inner>,
    key: &QueryKey,
    token: u64,
    generation: u64,
    result: Result<CachedValue, PortalError>,
) {
    let mut entries = inner.entries();
    let Some(entry) = entries.get_mut(key) else {
        return;
    };
    if entry.fetch != Some(token) {
        // The entry was removed and recreated while this fetch ran.
        tracing::debug!(key = %key, token, "discarding fetch for a replaced entry");
        return;
    }
    entry.fetch = None;

    if entry.generation != generation {
        tracing::debug!(key = %key, generation, current = entry.generation, "discarding superseded fetch");
        if entry.subscribers > 0 && entry.options.enabled {
            start_fetch(inner, key, entry);
        } else {
            entry.snapshot.status = entry.snapshot.settled_status();
            entry.publish();
        }
        return;
    }

    match result {
        Ok(value) => {
            entry.snapshot.data = Some(value);
            entry.snapshot.error = None;
            entry.snapshot.fetched_at = Some(Instant::now());
            entry.snapshot.status = QueryStatus::Resolved;
            entry.invalidated = false;
        }
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "query failed");
            entry.snapshot.error = Some(err);
            entry.snapshot.status = QueryStatus::Errored;
        }
    }
    entry.publish();
}

fn collect(inner: Weak<Inner>, key: &QueryKey, epoch: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut entries = inner.entries();
    let unused = entries
        .get(key)
        .map(|entry| entry.subscribers == 0 && entry.release_epoch == epoch)
        .unwrap_or(false);
    if unused {
        entries.remove(key);
        tracing::trace!(key = %key, "collected unused query");
    }
}

/// Read-only view of one entry, typed for the subscriber.
#[derive(Debug)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<PortalError>,
    pub fetched_at: Option<Instant>,
}

impl<T> QueryState<T> {
    /// First load with nothing to show yet.
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Fetching && self.data.is_none()
    }

    pub fn is_fetching(&self) -> bool {
        self.status == QueryStatus::Fetching
    }
}

/// A live subscription. Dropping it unsubscribes; the entry is collected after
/// `gc_time` with no subscribers.
pub struct QueryHandle<T> {
    client: QueryClient,
    key: QueryKey,
    rx: watch::Receiver<Snapshot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> QueryHandle<T> {
    /// The key this handle is subscribed to.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Latest snapshot, without waiting.
    pub fn state(&self) -> QueryState<T> {
        let snapshot = self.rx.borrow().clone();
        QueryState {
            status: snapshot.status,
            data: snapshot.data.and_then(|data| data.downcast::<T>().ok()),
            error: snapshot.error,
            fetched_at: snapshot.fetched_at,
        }
    }

    /// Wait for the next update and return it.
    pub async fn changed(&mut self) -> QueryState<T> {
        // A closed channel means the entry is gone; the last state is still valid.
        let _ = self.rx.changed().await;
        self.state()
    }

    /// Wait until no fetch is running, then return the data or the error.
    pub async fn settled(&mut self) -> Result<Arc<T>, PortalError> {
        loop {
            let snapshot = self.rx.borrow_and_update().clone();
            match snapshot.status {
                QueryStatus::Fetching => {}
                QueryStatus::Idle => {
                    return Err(PortalError::InvalidInput(format!(
                        "query {} is disabled",
                        self.key
                    )))
                }
                QueryStatus::Errored => {
                    return Err(snapshot.error.unwrap_or_else(|| {
                        PortalError::Internal(format!("query {} failed", self.key))
                    }))
                }
                QueryStatus::Resolved => {
                    return snapshot
                        .data
                        .and_then(|data| data.downcast::<T>().ok())
                        .ok_or_else(|| {
                            PortalError::Internal(format!(
                                "query {} holds a different type",
                                self.key
                            ))
                        })
                }
            }
            if self.rx.changed().await.is_err() {
                return Err(PortalError::Internal(format!("query {} was removed", self.key)));
            }
        }
    }
}

impl<T> Drop for QueryHandle<T> {
    fn drop(&mut self) {
        self.client.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::infra::keys;

    fn counting_fetcher(
        calls: Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl Fn() -> BoxFuture<Result<usize, PortalError>> + Send + Sync + 'static {
        move || -> BoxFuture<Result<usize, PortalError>> {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;
                Ok(n)
            })
        }
    }

    fn labelled_fetcher(
        label: &'static str,
        calls: Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl Fn() -> BoxFuture<Result<String, PortalError>> + Send + Sync + 'static {
        move || -> BoxFuture<Result<String, PortalError>> {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok(label.to_string())
            })
        }
    }

    fn long_lived() -> QueryOptions {
        QueryOptions::default().with_stale_time(Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_subscribers_share_one_request() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = keys::parcels::user("a@b.c");

        let mut first = client.subscribe(
            key.clone(),
            counting_fetcher(calls.clone(), Duration::from_millis(50)),
            long_lived(),
        );
        let mut second = client.subscribe(
            key.clone(),
            counting_fetcher(calls.clone(), Duration::from_millis(50)),
            long_lived(),
        );
        assert!(second.state().is_loading());

        assert_eq!(*first.settled().await.expect("first"), 1);
        assert_eq!(*second.settled().await.expect("second"), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_is_served_without_a_request() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = keys::payments::user("a@b.c");

        let _held = client
            .fetch(key.clone(), counting_fetcher(calls.clone(), Duration::ZERO), long_lived())
            .await
            .expect("fetch");
        let handle = client.subscribe(
            key,
            counting_fetcher(calls.clone(), Duration::ZERO),
            long_lived(),
        );
        let state = handle.state();
        assert_eq!(state.status, QueryStatus::Resolved);
        assert_eq!(state.data.as_deref(), Some(&1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_shows_cached_data_while_refetching() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = keys::parcels::unpaid("a@b.c");

        client
            .fetch(key.clone(), counting_fetcher(calls.clone(), Duration::from_millis(10)), QueryOptions::default())
            .await
            .expect("first fetch");

        let mut handle = client.subscribe(
            key,
            counting_fetcher(calls.clone(), Duration::from_millis(10)),
            QueryOptions::default(),
        );
        let state = handle.state();
        assert!(state.is_fetching());
        assert!(!state.is_loading());
        assert_eq!(state.data.as_deref(), Some(&1));

        assert_eq!(*handle.settled().await.expect("refetch"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_during_fetch_discards_the_older_result() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = keys::parcels::user("a@b.c");

        let mut handle = client.subscribe(
            key.clone(),
            counting_fetcher(calls.clone(), Duration::from_millis(100)),
            long_lived(),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.invalidate(&keys::parcels::all()), 1);

        assert_eq!(*handle.settled().await.expect("settled"), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_exposed_and_last_good_data_kept() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = keys::users::by_email("a@b.c");

        let fetcher = {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 => Ok("profile".to_string()),
                        _ => Err(PortalError::Validation {
                            status: 404,
                            message: "User not found".into(),
                        }),
                    }
                }
            }
        };

        let mut handle = client.subscribe(key.clone(), fetcher, long_lived());
        handle.settled().await.expect("first load");

        client.invalidate(&key);
        let err = handle.settled().await.expect_err("second load fails");
        assert_eq!(err.to_string(), "User not found");

        let state = handle.state();
        assert_eq!(state.status, QueryStatus::Errored);
        assert_eq!(state.data.as_deref().map(String::as_str), Some("profile"));
        // Validation errors are not retried.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_retry_with_backoff() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(PortalError::Network("connection reset".into()))
                    } else {
                        Ok(42u32)
                    }
                }
            }
        };

        let started = Instant::now();
        let value = client
            .fetch(keys::parcels::admin_list(), fetcher, QueryOptions::default())
            .await
            .expect("eventually succeeds");
        assert_eq!(*value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s then 2s of backoff.
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff(base, 0), Duration::from_secs(1));
        assert_eq!(backoff(base, 3), Duration::from_secs(8));
        assert_eq!(backoff(base, 10), MAX_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_query_never_fetches() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handle = client.subscribe(
            keys::parcels::user(""),
            counting_fetcher(calls.clone(), Duration::ZERO),
            QueryOptions::enabled(false),
        );
        assert_eq!(handle.state().status, QueryStatus::Idle);
        assert!(matches!(handle.settled().await, Err(PortalError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_invalidates_only_on_success() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = keys::parcels::user("a@b.c");
        let mut handle = client.subscribe(
            key.clone(),
            counting_fetcher(calls.clone(), Duration::ZERO),
            long_lived(),
        );
        handle.settled().await.expect("initial");

        let mutation = Mutation::new("create parcel").invalidating(key.clone());
        let writes = AtomicUsize::new(0);

        let failed: Result<(), _> = client
            .mutate(&mutation, async {
                writes.fetch_add(1, Ordering::SeqCst);
                Err(PortalError::Server {
                    status: 500,
                    message: "boom".into(),
                })
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state().status, QueryStatus::Resolved);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        client
            .mutate(&mutation, async { Ok::<_, PortalError>(()) })
            .await
            .expect("write");
        assert!(handle.state().is_fetching());
        assert_eq!(*handle.settled().await.expect("refetched"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unused_entries_are_collected_after_gc_time() {
        let client = QueryClient::new(QueryConfig {
            gc_time: Duration::from_secs(10),
            ..QueryConfig::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let key = keys::parcels::track("PRC-1");

        client
            .fetch(key.clone(), counting_fetcher(calls.clone(), Duration::ZERO), long_lived())
            .await
            .expect("fetch");
        assert!(client.contains(&key));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(client.contains(&key));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!client.contains(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_resets_watched_entries() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = keys::payments::user("a@b.c");
        let mut handle = client.subscribe(
            key.clone(),
            counting_fetcher(calls.clone(), Duration::ZERO),
            long_lived(),
        );
        handle.settled().await.expect("loaded");

        client.clear();
        let state = handle.state();
        assert_eq!(state.status, QueryStatus::Idle);
        assert!(state.data.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_subscriber_still_fills_the_cache() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = keys::parcels::detail("p-1");

        let handle = client.subscribe(
            key.clone(),
            counting_fetcher(calls.clone(), Duration::from_millis(100)),
            long_lived(),
        );
        drop(handle);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(client.contains(&key));

        let next = client.subscribe(
            key,
            counting_fetcher(calls.clone(), Duration::from_millis(100)),
            long_lived(),
        );
        let state = next.state();
        assert_eq!(state.status, QueryStatus::Resolved);
        assert_eq!(state.data.as_deref(), Some(&1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_started_before_clear_cannot_fill_the_new_entry() {
        let client = QueryClient::default();
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let key = keys::parcels::user("a@b.c");

        drop(client.subscribe(
            key.clone(),
            labelled_fetcher("previous-user", before.clone(), Duration::from_millis(100)),
            long_lived(),
        ));
        client.clear();
        assert!(!client.contains(&key));

        let mut handle = client.subscribe(
            key.clone(),
            labelled_fetcher("current-user", after.clone(), Duration::from_millis(200)),
            long_lived(),
        );

        // The earlier fetch has finished; the new one is still running alone.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(handle.state().is_loading());

        assert_eq!(*handle.settled().await.expect("settled"), "current-user");
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }
}
