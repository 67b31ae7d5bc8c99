//! Keyed, subscribable cache of server collections.
//!
//! Every entry holds at most one in-flight request. The request runs on its
//! own task and publishes its outcome through a `watch` channel, so any
//! number of callers can wait on it and dropping a waiter never cancels it.
//! The state lock is only held for bookkeeping: never across an await and
//! never while listeners run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::query::{CacheKey, CacheStatus, Query, QueryData};

/// Produces a fresh value for one cache key. Kept on the entry so the cache
/// can revalidate in the background.
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<QueryData>> + Send + Sync>;

pub fn fetcher<F, Fut>(f: F) -> Fetcher
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<QueryData>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

type Listener = Arc<dyn Fn(&CacheKey, &Snapshot) + Send + Sync>;
type Outcome = Option<Result<(QueryData, CacheStatus)>>;
type Notifications = Vec<(Listener, CacheKey, Snapshot)>;

/// What a subscriber sees of one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub data: Option<QueryData>,
    pub status: CacheStatus,
    pub error: Option<ClientError>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

struct InFlight {
    id: u64,
    done: watch::Receiver<Outcome>,
}

struct Entry {
    data: Option<QueryData>,
    status: CacheStatus,
    error: Option<ClientError>,
    fetched_at: Option<Instant>,
    last_fetched_at: Option<DateTime<Utc>>,
    fetcher: Option<Fetcher>,
    in_flight: Option<InFlight>,
    /// Invalidated while a request was in flight: that request's response
    /// predates the change and cannot count as fresh.
    invalidated_in_flight: bool,
}

impl Entry {
    fn new() -> Self {
        Self {
            data: None,
            status: CacheStatus::Pending,
            error: None,
            fetched_at: None,
            last_fetched_at: None,
            fetcher: None,
            in_flight: None,
            invalidated_in_flight: false,
        }
    }

    fn is_fresh(&self, stale_after: Duration) -> bool {
        self.status == CacheStatus::Fresh
            && self.data.is_some()
            && self.fetched_at.is_some_and(|at| at.elapsed() < stale_after)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            data: self.data.clone(),
            status: self.status,
            error: self.error.clone(),
            last_fetched_at: self.last_fetched_at,
        }
    }
}

struct CacheState {
    entries: HashMap<CacheKey, Entry>,
    listeners: HashMap<u64, (CacheKey, Listener)>,
    /// Token of the live session. Keys and responses under any other token
    /// are refused.
    session_token: Option<String>,
    /// Bumped on every eviction; a response from an older generation is inert.
    generation: u64,
    cancel: CancellationToken,
    next_id: u64,
}

impl CacheState {
    fn is_current(&self, key: &CacheKey) -> bool {
        self.session_token.as_deref() == Some(key.token.as_str())
    }

    fn has_listeners(&self, key: &CacheKey) -> bool {
        self.listeners.values().any(|(k, _)| k == key)
    }

    fn notifications(&self, key: &CacheKey, snapshot: &Snapshot) -> Notifications {
        self.listeners
            .values()
            .filter(|(k, _)| k == key)
            .map(|(k, listener)| (listener.clone(), k.clone(), snapshot.clone()))
            .collect()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct CacheInner {
    state: Mutex<CacheState>,
    stale_after: Duration,
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Listeners never run under the lock, so poisoning only means a
        // panic mid-bookkeeping; the maps are still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove_listener(&self, id: u64) {
        self.lock().listeners.remove(&id);
    }
}

#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    listeners: HashMap::new(),
                    session_token: None,
                    generation: 0,
                    cancel: CancellationToken::new(),
                    next_id: 0,
                }),
                stale_after,
            }),
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.inner.stale_after
    }

    pub fn session_token(&self) -> Option<String> {
        self.inner.lock().session_token.clone()
    }

    /// Get-or-fetch.
    ///
    /// * fresh: cached data, `fetcher` untouched;
    /// * stale: cached data right away plus a background refetch;
    /// * absent or failed: waits on the (shared) request for this key.
    pub async fn read(&self, key: CacheKey, fetcher: Fetcher) -> Result<(QueryData, CacheStatus)> {
        let mut notes = Notifications::new();

        let done = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;

            if !state.is_current(&key) {
                debug!(?key, "read under a token that is no longer current");
                return Err(ClientError::SessionChanged);
            }

            let stale_after = self.inner.stale_after;
            let entry = state.entries.entry(key.clone()).or_insert_with(Entry::new);
            entry.fetcher = Some(fetcher);

            if entry.is_fresh(stale_after) {
                if let Some(data) = &entry.data {
                    return Ok((data.clone(), CacheStatus::Fresh));
                }
            }

            if let Some(data) = entry.data.clone() {
                if entry.status != CacheStatus::Stale {
                    entry.status = CacheStatus::Stale;
                    let snapshot = entry.snapshot();
                    notes = state.notifications(&key, &snapshot);
                }
                self.start_fetch(state, &key);
                drop(guard);
                dispatch(notes);
                return Ok((data, CacheStatus::Stale));
            }

            if entry.in_flight.is_none() {
                entry.status = CacheStatus::Pending;
                entry.error = None;
                let snapshot = entry.snapshot();
                notes = state.notifications(&key, &snapshot);
                self.start_fetch(state, &key);
            }

            state
                .entries
                .get(&key)
                .and_then(|e| e.in_flight.as_ref())
                .map(|f| f.done.clone())
        };

        dispatch(notes);

        match done {
            Some(done) => wait(done).await,
            // No fetcher could be started; only happens if the entry vanished.
            None => Err(ClientError::SessionChanged),
        }
    }

    /// Mark every entry whose query matches `predicate` stale. Entries
    /// somebody is subscribed to refetch now; the rest wait for their next
    /// read. An entry with a request already in flight gets no second one;
    /// its response lands as stale and, if watched, is followed by exactly
    /// one more fetch. Returns how many entries matched.
    pub fn invalidate(&self, predicate: impl Fn(&Query) -> bool) -> usize {
        let mut notes = Notifications::new();
        let matched = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;

            let keys: Vec<CacheKey> = state
                .entries
                .keys()
                .filter(|k| predicate(&k.query))
                .cloned()
                .collect();

            for key in &keys {
                let watched = state.has_listeners(key);
                let Some(entry) = state.entries.get_mut(key) else {
                    continue;
                };
                if entry.in_flight.is_some() {
                    debug!(?key, "invalidation coalesced with in-flight request");
                    entry.invalidated_in_flight = true;
                    continue;
                }
                entry.status = CacheStatus::Stale;
                let snapshot = entry.snapshot();
                notes.extend(state.notifications(key, &snapshot));

                if watched {
                    self.start_fetch(state, key);
                }
            }
            keys.len()
        };

        dispatch(notes);
        matched
    }

    /// Drop every entry and listener and disarm every in-flight request.
    /// The session token is unchanged.
    pub fn evict_all(&self) {
        let token = self.session_token();
        self.rotate_session(token.as_deref());
    }

    /// Evict everything and switch to `token`. Used on login and logout.
    pub fn rotate_session(&self, token: Option<&str>) {
        let mut state = self.inner.lock();
        let evicted = state.entries.len();
        let in_flight = state
            .entries
            .values()
            .filter(|e| e.in_flight.is_some())
            .count();

        state.entries.clear();
        state.listeners.clear();
        state.generation += 1;
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        state.session_token = token.map(str::to_string);

        debug!(
            evicted,
            in_flight,
            generation = state.generation,
            "cache evicted"
        );
    }

    /// Attach a listener to `key`. It runs on every status or data change of
    /// that entry until the returned handle is dropped or cancelled.
    pub fn subscribe<F>(&self, key: CacheKey, listener: F) -> Subscription
    where
        F: Fn(&CacheKey, &Snapshot) + Send + Sync + 'static,
    {
        let mut state = self.inner.lock();
        let id = state.next_id();
        state.listeners.insert(id, (key, Arc::new(listener)));
        Subscription {
            id,
            cache: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.inner
            .lock()
            .listeners
            .values()
            .filter(|(k, _)| k == key)
            .count()
    }

    pub fn peek(&self, key: &CacheKey) -> Option<Snapshot> {
        self.inner.lock().entries.get(key).map(Entry::snapshot)
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| e.in_flight.is_some())
    }

    /// Apply a local edit to cached data and notify subscribers. Returns
    /// false when there is nothing cached under `key`.
    pub fn update(&self, key: &CacheKey, f: impl FnOnce(&mut QueryData)) -> bool {
        let notes = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            if !state.is_current(key) {
                return false;
            }
            let Some(entry) = state.entries.get_mut(key) else {
                return false;
            };
            let Some(data) = entry.data.as_mut() else {
                return false;
            };
            f(data);
            let snapshot = entry.snapshot();
            state.notifications(key, &snapshot)
        };
        dispatch(notes);
        true
    }

    /// Wait for the request currently in flight for `key`, if any, and
    /// return the entry as it stands afterwards.
    pub async fn settled(&self, key: &CacheKey) -> Option<Snapshot> {
        let done = {
            let state = self.inner.lock();
            state
                .entries
                .get(key)?
                .in_flight
                .as_ref()
                .map(|f| f.done.clone())
        };
        if let Some(done) = done {
            let _ = wait(done).await;
        }
        self.peek(key)
    }

    /// Start the entry's fetcher unless a request is already in flight.
    /// The caller holds the state lock.
    fn start_fetch(&self, state: &mut CacheState, key: &CacheKey) {
        let generation = state.generation;
        let cancel = state.cancel.clone();
        let id = state.next_id();

        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        if entry.in_flight.is_some() {
            return;
        }
        let Some(fetch) = entry.fetcher.clone() else {
            return;
        };

        let (tx, rx) = watch::channel(None);
        entry.in_flight = Some(InFlight { id, done: rx });
        debug!(?key, request = id, "fetch started");

        let cache = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = fetch() => Some(result),
            };
            cache.complete(key, id, generation, outcome, tx);
        });
    }

    fn complete(
        &self,
        key: CacheKey,
        id: u64,
        generation: u64,
        outcome: Option<Result<QueryData>>,
        done: watch::Sender<Outcome>,
    ) {
        let notes = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;

            let owns_entry = state.generation == generation
                && state.is_current(&key)
                && state
                    .entries
                    .get(&key)
                    .and_then(|e| e.in_flight.as_ref())
                    .is_some_and(|f| f.id == id);

            let result = match outcome {
                Some(result) if owns_entry => result,
                Some(Err(e)) => {
                    debug!(?key, request = id, "discarding failed response from a previous session");
                    done.send_replace(Some(Err(e)));
                    return;
                }
                _ => {
                    debug!(?key, request = id, "discarding response from a previous session");
                    done.send_replace(Some(Err(ClientError::SessionChanged)));
                    return;
                }
            };

            let watched = state.has_listeners(&key);
            let Some(entry) = state.entries.get_mut(&key) else {
                return;
            };
            entry.in_flight = None;
            let outdated = std::mem::take(&mut entry.invalidated_in_flight);

            let reply = match result {
                Ok(data) => {
                    let merged = data.merged_over(entry.data.as_ref(), outdated);
                    let status = if outdated {
                        CacheStatus::Stale
                    } else {
                        CacheStatus::Fresh
                    };
                    entry.data = Some(merged.clone());
                    entry.status = status;
                    entry.error = None;
                    entry.fetched_at = Some(Instant::now());
                    entry.last_fetched_at = Some(Utc::now());
                    debug!(?key, request = id, outdated, "fetch resolved");
                    Ok((merged, status))
                }
                Err(e) => {
                    debug!(?key, request = id, error = %e, "fetch failed");
                    entry.status = CacheStatus::Error;
                    entry.error = Some(e.clone());
                    Err(e)
                }
            };

            let refetch = outdated && watched && reply.is_ok();
            let snapshot = entry.snapshot();
            done.send_replace(Some(reply));
            if refetch {
                self.start_fetch(state, &key);
            }
            state.notifications(&key, &snapshot)
        };

        dispatch(notes);
    }
}

/// Handle for one listener. Dropping it unsubscribes; so does `cancel`,
/// any number of times.
pub struct Subscription {
    id: u64,
    cache: Weak<CacheInner>,
}

impl Subscription {
    pub fn cancel(&self) {
        if let Some(inner) = self.cache.upgrade() {
            inner.remove_listener(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn dispatch(notes: Notifications) {
    for (listener, key, snapshot) in notes {
        listener(&key, &snapshot);
    }
}

async fn wait(mut done: watch::Receiver<Outcome>) -> Result<(QueryData, CacheStatus)> {
    match done.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().unwrap_or(Err(ClientError::SessionChanged)),
        Err(_) => Err(ClientError::SessionChanged),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use pony_types::Chat;
    use tokio::sync::{Notify, mpsc};

    use super::*;

    fn chat(id: &str, name: &str) -> Chat {
        Chat {
            id: id.into(),
            name: name.into(),
            user_ids: Default::default(),
            owner_id: None,
            created_at: Utc::now(),
        }
    }

    fn session_cache(token: &str) -> QueryCache {
        let cache = QueryCache::new(Duration::from_secs(30));
        cache.rotate_session(Some(token));
        cache
    }

    /// Fetcher counting its calls; each call returns the chat list seen at
    /// that call number.
    fn counting(calls: Arc<AtomicUsize>) -> Fetcher {
        fetcher(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(QueryData::Chats(vec![chat(&n.to_string(), "general")])) }
        })
    }

    /// Fetcher that blocks until `gate` is notified.
    fn gated(calls: Arc<AtomicUsize>, gate: Arc<Notify>) -> Fetcher {
        fetcher(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok(QueryData::Chats(vec![chat("1", "general")]))
            }
        })
    }

    #[tokio::test]
    async fn fresh_entry_skips_fetcher() {
        let cache = session_cache("t");
        let key = CacheKey::new(Query::Chats, "t");
        let calls = Arc::new(AtomicUsize::new(0));

        let (_, status) = cache.read(key.clone(), counting(calls.clone())).await.unwrap();
        assert_eq!(status, CacheStatus::Fresh);
        let (_, status) = cache.read(key.clone(), counting(calls.clone())).await.unwrap();
        assert_eq!(status, CacheStatus::Fresh);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_reads_share_one_request() {
        let cache = session_cache("t");
        let key = CacheKey::new(Query::Chats, "t");
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let reads: Vec<_> = (0..5)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                let f = gated(calls.clone(), gate.clone());
                tokio::spawn(async move { cache.read(key, f).await })
            })
            .collect();

        // Let every reader register before the response arrives.
        while !cache.is_in_flight(&key) {
            tokio::task::yield_now().await;
        }
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for read in reads {
            let (data, _) = read.await.unwrap().unwrap();
            assert!(matches!(data, QueryData::Chats(ref c) if c.len() == 1));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_is_served_while_revalidating() {
        let cache = session_cache("t");
        let key = CacheKey::new(Query::Chats, "t");
        let calls = Arc::new(AtomicUsize::new(0));

        cache.read(key.clone(), counting(calls.clone())).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        let (data, status) = cache.read(key.clone(), counting(calls.clone())).await.unwrap();
        assert_eq!(status, CacheStatus::Stale);
        match data {
            QueryData::Chats(chats) => assert_eq!(chats[0].id, "1"),
            other => panic!("unexpected {:?}", other),
        }

        let after = cache.settled(&key).await.unwrap();
        assert_eq!(after.status, CacheStatus::Fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match after.data {
            Some(QueryData::Chats(chats)) => assert_eq!(chats[0].id, "2"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalidate_refetches_only_watched_entries() {
        let cache = session_cache("t");
        let watched = CacheKey::new(Query::messages("7"), "t");
        let idle = CacheKey::new(Query::messages("8"), "t");
        let calls_7 = Arc::new(AtomicUsize::new(0));
        let calls_8 = Arc::new(AtomicUsize::new(0));

        cache.read(watched.clone(), counting(calls_7.clone())).await.unwrap();
        cache.read(idle.clone(), counting(calls_8.clone())).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = cache.subscribe(watched.clone(), move |_, snap| {
            let _ = tx.send(snap.status);
        });

        assert_eq!(cache.invalidate(|q| q.collection() == "messages"), 2);

        assert_eq!(rx.recv().await, Some(CacheStatus::Stale));
        assert_eq!(rx.recv().await, Some(CacheStatus::Fresh));
        assert_eq!(calls_7.load(Ordering::SeqCst), 2);

        // Unwatched entry is stale but untouched until read.
        assert_eq!(calls_8.load(Ordering::SeqCst), 1);
        assert_eq!(cache.peek(&idle).unwrap().status, CacheStatus::Stale);
    }

    #[tokio::test]
    async fn invalidation_coalesces_with_in_flight_request() {
        let cache = session_cache("t");
        let key = CacheKey::new(Query::Chats, "t");
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let _sub = cache.subscribe(key.clone(), |_, _| {});

        let reader = {
            let cache = cache.clone();
            let key = key.clone();
            let f = gated(calls.clone(), gate.clone());
            tokio::spawn(async move { cache.read(key, f).await })
        };
        while !cache.is_in_flight(&key) {
            tokio::task::yield_now().await;
        }

        cache.invalidate(|q| *q == Query::Chats);
        cache.invalidate(|q| *q == Query::Chats);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        gate.notify_one();

        // The response predates the invalidation.
        let (_, status) = reader.await.unwrap().unwrap();
        assert_eq!(status, CacheStatus::Stale);

        // Both invalidations fold into one follow-up request.
        gate.notify_one();
        let after = cache.settled(&key).await.unwrap();
        assert_eq!(after.status, CacheStatus::Fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unwatched_entry_invalidated_in_flight_lands_stale() {
        let cache = session_cache("t");
        let key = CacheKey::new(Query::Chats, "t");
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let reader = {
            let cache = cache.clone();
            let key = key.clone();
            let f = gated(calls.clone(), gate.clone());
            tokio::spawn(async move { cache.read(key, f).await })
        };
        while !cache.is_in_flight(&key) {
            tokio::task::yield_now().await;
        }

        cache.invalidate(|q| *q == Query::Chats);
        gate.notify_one();
        reader.await.unwrap().unwrap();

        assert_eq!(cache.peek(&key).unwrap().status, CacheStatus::Stale);
        assert!(!cache.is_in_flight(&key));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn eviction_disarms_in_flight_request() {
        let cache = session_cache("old");
        let key = CacheKey::new(Query::Chats, "old");
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let reader = {
            let cache = cache.clone();
            let key = key.clone();
            let f = gated(calls.clone(), gate.clone());
            tokio::spawn(async move { cache.read(key, f).await })
        };
        while !cache.is_in_flight(&key) {
            tokio::task::yield_now().await;
        }

        cache.rotate_session(None);
        gate.notify_one();

        assert_eq!(reader.await.unwrap(), Err(ClientError::SessionChanged));
        assert!(cache.peek(&key).is_none());
    }

    #[tokio::test]
    async fn read_with_old_token_is_refused() {
        let cache = session_cache("new");
        let calls = Arc::new(AtomicUsize::new(0));
        let result = cache
            .read(CacheKey::new(Query::Chats, "old"), counting(calls.clone()))
            .await;

        assert_eq!(result, Err(ClientError::SessionChanged));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_fetch_is_shared_and_retried_on_next_read() {
        let cache = session_cache("t");
        let key = CacheKey::new(Query::Chats, "t");
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = {
            let calls = calls.clone();
            fetcher(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::Network("connection refused".into())) }
            })
        };

        let err = cache.read(key.clone(), failing.clone()).await.unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
        assert_eq!(cache.peek(&key).unwrap().status, CacheStatus::Error);

        cache.read(key.clone(), failing).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_keeps_request_alive() {
        let cache = session_cache("t");
        let key = CacheKey::new(Query::Chats, "t");
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let first = cache.subscribe(key.clone(), |_, _| {});
        let _second = cache.subscribe(key.clone(), |_, _| {});

        let reader = {
            let cache = cache.clone();
            let key = key.clone();
            let f = gated(calls.clone(), gate.clone());
            tokio::spawn(async move { cache.read(key, f).await })
        };
        while !cache.is_in_flight(&key) {
            tokio::task::yield_now().await;
        }

        first.cancel();
        first.cancel();
        drop(first);
        assert_eq!(cache.subscriber_count(&key), 1);
        assert!(cache.is_in_flight(&key));

        gate.notify_one();
        assert!(reader.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn update_edits_cached_data_and_notifies() {
        let cache = session_cache("t");
        let key = CacheKey::new(Query::Chats, "t");
        let calls = Arc::new(AtomicUsize::new(0));

        assert!(!cache.update(&key, |_| {}));
        cache.read(key.clone(), counting(calls)).await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let seen = seen.clone();
            cache.subscribe(key.clone(), move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert!(cache.update(&key, |data| {
            if let QueryData::Chats(chats) = data {
                chats.push(chat("2", "random"));
            }
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        match cache.peek(&key).unwrap().data {
            Some(QueryData::Chats(chats)) => assert_eq!(chats.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
