//! Provides the bounded, request coalescing place cache.
//!
//! The [PlaceCache] maps a [CacheKey] (place id plus language) to a previously resolved
//! [Place]. It keeps at most **size** places and evicts the least recently used one once it
//! is about to grow beyond this limit.
//!
//! Resolving a place is slow, therefore the cache also keeps track of all lookups which are
//! currently in flight. If a place is requested while another caller already waits for it, the
//! new caller attaches to the running lookup instead of starting another one. Thus the
//! [Resolver] is invoked at most once per key at any time and all waiters observe the same
//! outcome. Failures aren't cached: once a lookup failed, the next request for the same key
//! starts a new one.
//!
//! A started lookup runs as its own task. It therefore completes (and fills the cache) even if
//! all callers waiting for it have been dropped in the meantime.
//!
//! # Configuration
//! The cache is installed via [install] which reads its size from the system config and also
//! applies changes once the config is reloaded:
//!
//! ```yaml
//! places:
//!     cache:
//!         # Specifies the maximal number of places to keep.
//!         size: 100
//! ```
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::config::Config;
use crate::lru::LRUCache;
use crate::places::{CacheKey, Place, ResolveError, Resolver};
use crate::platform::Platform;
use crate::spawn;

/// Contains the number of places kept if no size is configured.
pub const DEFAULT_CAPACITY: usize = 100;

/// Represents a lookup which is currently in flight and can be awaited by many callers.
type PendingLookup = Shared<BoxFuture<'static, Result<Arc<Place>, ResolveError>>>;

struct State {
    entries: LRUCache<CacheKey, Arc<Place>>,
    pending: HashMap<CacheKey, PendingLookup>,
    resolutions: usize,
    coalesced: usize,
    failures: usize,
}

/// Provides a snapshot of the metrics of a [PlaceCache].
#[derive(Clone, Debug, PartialEq)]
pub struct CacheStats {
    /// Contains the number of cached places.
    pub entries: usize,
    /// Contains the max number of cached places.
    pub capacity: usize,
    /// Contains the number of lookups which hit or missed the cache.
    pub reads: usize,
    /// Contains the number of lookups which were served from the cache.
    pub hits: usize,
    /// Contains the hit rate in percent.
    pub hit_rate: f32,
    /// Contains the number of places which were evicted to enforce the capacity.
    pub evictions: usize,
    /// Contains the number of lookups which have been handed to the resolver.
    pub resolutions: usize,
    /// Contains the number of lookups which attached to an already running resolution.
    pub coalesced: usize,
    /// Contains the number of failed resolutions.
    pub failures: usize,
    /// Contains the number of resolutions which are currently in flight.
    pub pending: usize,
}

/// Provides a bounded LRU cache for places which coalesces concurrent lookups.
///
/// Note that the cache is internally synchronized and therefore usually shared via an **Arc**.
/// As lookups are forked as tasks, it has to be used within a tokio runtime. Use [install] to
/// register a single instance in the [Platform] so that all providers of a process share the
/// same cache.
///
/// # Examples
/// ```
/// # use placecache::places::cache::PlaceCache;
/// # use placecache::places::{CacheKey, Place, Resolver};
/// # use std::sync::Arc;
/// struct EchoResolver;
///
/// #[async_trait::async_trait]
/// impl Resolver for EchoResolver {
///     async fn resolve(&self, key: &CacheKey) -> anyhow::Result<Place> {
///         Ok(Place::from_key(key))
///     }
///
///     async fn fetch_fields(&self, place: &Place, _fields: &[String]) -> anyhow::Result<Place> {
///         Ok(place.clone())
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let cache = PlaceCache::new(2, Arc::new(EchoResolver));
///
///     // The first lookup is handed to the resolver...
///     let place = cache.get_place("A", Some("en")).await.unwrap();
///     assert_eq!(place.id(), "A");
///
///     // ...the second one is served from the cache.
///     let _ = cache.get_place("A", Some("en")).await.unwrap();
///     assert_eq!(cache.stats().resolutions, 1);
///     assert_eq!(cache.stats().hits, 1);
/// }
/// ```
pub struct PlaceCache {
    state: Arc<Mutex<State>>,
    resolver: Arc<dyn Resolver>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PlaceCache {
    /// Creates a new cache which keeps up to **capacity** places and uses the given resolver
    /// to look up unknown ones.
    pub fn new(capacity: usize, resolver: Arc<dyn Resolver>) -> Self {
        PlaceCache {
            state: Arc::new(Mutex::new(State {
                entries: LRUCache::new(capacity),
                pending: HashMap::new(),
                resolutions: 0,
                coalesced: 0,
                failures: 0,
            })),
            resolver,
        }
    }

    /// Returns the resolver used by this cache.
    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    /// Returns the place with the given id in the given language.
    ///
    /// A cached place is returned immediately and marked as most recently used. Otherwise the
    /// place is resolved. If a resolution for the same key is already running, this call simply
    /// awaits its outcome instead of starting another one.
    ///
    /// # Errors
    /// Fails with the error reported by the resolver, wrapped in a [ResolveError]. All callers
    /// waiting for the same key receive the same error.
    pub async fn get_place(&self, id: &str, language: Option<&str>) -> anyhow::Result<Arc<Place>> {
        let key = CacheKey::new(id, language);

        let lookup = {
            let mut state = lock(&self.state);
            if let Some(place) = state.entries.get(&key).cloned() {
                return Ok(place);
            }

            let pending_lookup = state.pending.get(&key).cloned();
            match pending_lookup {
                Some(lookup) => {
                    log::debug!("Attaching to the pending lookup of place {}...", key);
                    state.coalesced += 1;
                    lookup
                }
                None => self.start_lookup(&mut state, key),
            }
        };

        lookup.await.map_err(anyhow::Error::new)
    }

    /// Forks a task which resolves the given key and registers it as pending lookup.
    ///
    /// The task itself clears the pending marker and stores the result, even if the resolver
    /// panics. This happens while holding the lock, so there is no window in which a caller sees
    /// neither the entry nor the pending lookup.
    fn start_lookup(&self, state: &mut State, key: CacheKey) -> PendingLookup {
        log::debug!("Resolving place {}...", key);
        state.resolutions += 1;

        let resolver = self.resolver.clone();
        let shared_state = self.state.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let result = AssertUnwindSafe(resolver.resolve(&task_key))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(resolver_panicked(panic)));
            complete_lookup(&shared_state, task_key, result)
        });

        let shared_state = Arc::downgrade(&self.state);
        let lookup_key = key.clone();
        let lookup = async move {
            match task.await {
                Ok(result) => result,
                Err(error) => abort_lookup(&shared_state, lookup_key, error),
            }
        }
        .boxed()
        .shared();

        let _ = state.pending.insert(key, lookup.clone());
        lookup
    }

    /// Inserts or replaces the given place without invoking the resolver.
    ///
    /// This is used if a caller already has a fresh or modified place at hand (e.g. after
    /// fetching additional fields). The place is stored under its own id and requested language
    /// and becomes the most recently used entry.
    pub fn update_place(&self, place: Place) -> Arc<Place> {
        let key = place.cache_key();
        let place = Arc::new(place);
        log::debug!("Updating place {}...", key);
        lock(&self.state).entries.put(key, place.clone());

        place
    }

    /// Determines if the given place is cached without marking it as used.
    pub fn contains(&self, id: &str, language: Option<&str>) -> bool {
        lock(&self.state)
            .entries
            .contains(&CacheKey::new(id, language))
    }

    /// Removes the given place from the cache and returns it if it was present.
    ///
    /// Note that a pending lookup for the same key isn't affected and will still store its
    /// result once it completes.
    pub fn remove(&self, id: &str, language: Option<&str>) -> Option<Arc<Place>> {
        lock(&self.state)
            .entries
            .remove(&CacheKey::new(id, language))
    }

    /// Removes all places from the cache and resets its metrics.
    pub fn flush(&self) {
        let mut state = lock(&self.state);
        state.entries.flush();
        state.resolutions = 0;
        state.coalesced = 0;
        state.failures = 0;
    }

    /// Returns the number of cached places.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    /// Determines if no place is cached.
    pub fn is_empty(&self) -> bool {
        lock(&self.state).entries.is_empty()
    }

    /// Returns the max number of places to keep.
    pub fn capacity(&self) -> usize {
        lock(&self.state).entries.capacity()
    }

    /// Changes the max number of places to keep. Shrinking the cache evicts the least recently
    /// used places immediately.
    pub fn set_capacity(&self, capacity: usize) {
        lock(&self.state).entries.set_capacity(capacity);
    }

    /// Returns the number of resolutions which are currently in flight.
    pub fn pending_lookups(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Returns a snapshot of the metrics of this cache.
    pub fn stats(&self) -> CacheStats {
        let state = lock(&self.state);
        CacheStats {
            entries: state.entries.len(),
            capacity: state.entries.capacity(),
            reads: state.entries.reads(),
            hits: state.entries.hits(),
            hit_rate: state.entries.hit_rate(),
            evictions: state.entries.evictions(),
            resolutions: state.resolutions,
            coalesced: state.coalesced,
            failures: state.failures,
            pending: state.pending.len(),
        }
    }
}

/// Stores the outcome of a resolution and clears its pending marker.
///
/// A resolved place always carries the language it was requested in, no matter what the resolver
/// reported. Therefore writing it back via **update_place** hits the same entry.
///
/// If the place has been stored via **update_place** while the resolution was running, the
/// stored place is kept, as it is at least as fresh as the resolved one.
fn complete_lookup(
    state: &Mutex<State>,
    key: CacheKey,
    result: anyhow::Result<Place>,
) -> Result<Arc<Place>, ResolveError> {
    let mut state = lock(state);
    let _ = state.pending.remove(&key);

    match result {
        Ok(mut place) => {
            // The place is cached under the requested language, so it has to report it as well...
            place.requested_language = key.language.clone();
            let place = Arc::new(place);
            if !state.entries.contains(&key) {
                state.entries.put(key, place.clone());
            }
            Ok(place)
        }
        Err(error) => {
            log::warn!("Failed to resolve place {}: {:#}", key, error);
            state.failures += 1;
            Err(ResolveError::new(key, error))
        }
    }
}

/// Turns the payload of a panicking resolver into an error.
fn resolver_panicked(panic: Box<dyn Any + Send>) -> anyhow::Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_owned());

    anyhow::anyhow!("The resolver panicked: {}", message)
}

/// Handles a resolution task which never completed as it was cancelled (e.g. as the runtime
/// shut down).
fn abort_lookup(
    state: &Weak<Mutex<State>>,
    key: CacheKey,
    error: tokio::task::JoinError,
) -> Result<Arc<Place>, ResolveError> {
    log::error!("The resolution of place {} was aborted: {}", key, error);

    if let Some(state) = state.upgrade() {
        let mut state = lock(&state);
        let _ = state.pending.remove(&key);
        state.failures += 1;
    }

    Err(ResolveError::new(
        key,
        anyhow::anyhow!("The resolution of the place was aborted: {}", error),
    ))
}

/// Creates a [PlaceCache] and registers it in the given platform.
///
/// The size of the cache is read from `places.cache.size` in the system config (if a
/// [Config] is present) and defaults to [DEFAULT_CAPACITY]. Also a background task is
/// installed which applies a changed size once the config is reloaded.
pub fn install(platform: Arc<Platform>, resolver: Arc<dyn Resolver>) -> Arc<PlaceCache> {
    let config = platform.find::<Config>();
    let capacity = config
        .as_ref()
        .and_then(|config| configured_capacity(config))
        .unwrap_or(DEFAULT_CAPACITY);

    log::info!("Creating place cache with a size of {}...", capacity);
    let cache = Arc::new(PlaceCache::new(capacity, resolver));
    platform.register::<PlaceCache>(cache.clone());

    if let Some(config) = config {
        run_config_change_monitor(platform, config, Arc::downgrade(&cache));
    }

    cache
}

/// Reads the configured cache size.
///
/// Yields **None** if no or an invalid size is given. Note that a size of 0 is valid and
/// effectively disables caching (but not coalescing).
fn configured_capacity(config: &Config) -> Option<usize> {
    let handle = config.current();
    let size = handle.query("places.cache.size");
    if size.is_badvalue() {
        return None;
    }

    match size.as_i64().filter(|size| *size >= 0) {
        Some(size) => Some(size as usize),
        None => {
            log::error!(
                "Ignoring 'places.cache.size' as it isn't a non-negative number: {:?}",
                size
            );
            None
        }
    }
}

/// Applies size changes once the config is reloaded.
///
/// Note that the notifier is obtained before the task is forked so that no change can be missed.
fn run_config_change_monitor(platform: Arc<Platform>, config: Arc<Config>, cache: Weak<PlaceCache>) {
    let mut config_changed = config.notifier();

    spawn!(async move {
        while platform.is_running() {
            tokio::select! {
                change = config_changed.recv() => {
                    if let Err(tokio::sync::broadcast::error::RecvError::Closed) = change {
                        return;
                    }

                    let cache = match cache.upgrade() {
                        Some(cache) => cache,
                        None => return,
                    };

                    let capacity = configured_capacity(&config).unwrap_or(DEFAULT_CAPACITY);
                    if cache.capacity() != capacity {
                        log::info!(
                            "Updating the size of the place cache from {} to {}.",
                            cache.capacity(),
                            capacity
                        );
                        cache.set_capacity(capacity);
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    if cache.strong_count() == 0 {
                        return;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use crate::places::cache::{install, PlaceCache, DEFAULT_CAPACITY};
    use crate::places::{CacheKey, Place, ResolveError, Resolver};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    /// Resolves every place to an empty place and counts the calls per key.
    ///
    /// If a gate is present, each resolution has to acquire a permit first. This permits to
    /// keep lookups in flight until a test explicitly releases them.
    struct CountingResolver {
        calls: AtomicUsize,
        keys: Mutex<Vec<CacheKey>>,
        failing: Mutex<HashSet<String>>,
        panicking: Mutex<HashSet<String>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl CountingResolver {
        fn new() -> Arc<Self> {
            Arc::new(CountingResolver {
                calls: AtomicUsize::new(0),
                keys: Mutex::new(Vec::new()),
                failing: Mutex::new(HashSet::new()),
                panicking: Mutex::new(HashSet::new()),
                gate: None,
            })
        }

        fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
            Arc::new(CountingResolver {
                calls: AtomicUsize::new(0),
                keys: Mutex::new(Vec::new()),
                failing: Mutex::new(HashSet::new()),
                panicking: Mutex::new(HashSet::new()),
                gate: Some(gate),
            })
        }

        fn fail_for(&self, id: &str) {
            let _ = self.failing.lock().unwrap().insert(id.to_owned());
        }

        fn succeed_for(&self, id: &str) {
            let _ = self.failing.lock().unwrap().remove(id);
        }

        fn panic_for(&self, id: &str) {
            let _ = self.panicking.lock().unwrap().insert(id.to_owned());
        }

        fn stop_panicking_for(&self, id: &str) {
            let _ = self.panicking.lock().unwrap().remove(id);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn calls_for(&self, key: &CacheKey) -> usize {
            self.keys
                .lock()
                .unwrap()
                .iter()
                .filter(|resolved| *resolved == key)
                .count()
        }
    }

    #[async_trait::async_trait]
    impl Resolver for CountingResolver {
        async fn resolve(&self, key: &CacheKey) -> anyhow::Result<Place> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            self.keys.lock().unwrap().push(key.clone());

            if let Some(gate) = &self.gate {
                gate.acquire().await?.forget();
            }

            let panicking = self.panicking.lock().unwrap().contains(key.id());
            if panicking {
                panic!("Resolver crashed for {}", key.id());
            }

            if self.failing.lock().unwrap().contains(key.id()) {
                Err(anyhow::anyhow!("Unknown place: {}", key.id()))
            } else {
                Ok(Place::from_key(key).with_field("displayName", json!(key.id())))
            }
        }

        async fn fetch_fields(&self, place: &Place, _fields: &[String]) -> anyhow::Result<Place> {
            Ok(place.clone())
        }
    }

    #[test]
    fn hits_are_served_without_resolving() {
        crate::testing::test_async(async {
            let resolver = CountingResolver::new();
            let cache = PlaceCache::new(10, resolver.clone());

            let first = cache.get_place("A", None).await.unwrap();
            let second = cache.get_place("A", None).await.unwrap();

            assert_eq!(resolver.calls(), 1);
            assert_eq!(Arc::ptr_eq(&first, &second), true);
            assert_eq!(first.field("displayName"), Some(&json!("A")));

            // A different language is a different key...
            let _ = cache.get_place("A", Some("de")).await.unwrap();
            assert_eq!(resolver.calls(), 2);
            assert_eq!(cache.len(), 2);
        });
    }

    #[test]
    fn concurrent_lookups_are_coalesced() {
        crate::testing::test_async(async {
            let gate = Arc::new(Semaphore::new(0));
            let resolver = CountingResolver::gated(gate.clone());
            let cache = PlaceCache::new(10, resolver.clone());

            let (first, second, third, _) = tokio::join!(
                cache.get_place("A", None),
                cache.get_place("A", None),
                cache.get_place("A", None),
                async {
                    tokio::task::yield_now().await;
                    gate.add_permits(1);
                }
            );

            let first = first.unwrap();
            assert_eq!(Arc::ptr_eq(&first, &second.unwrap()), true);
            assert_eq!(Arc::ptr_eq(&first, &third.unwrap()), true);
            assert_eq!(resolver.calls(), 1);
            assert_eq!(cache.stats().coalesced, 2);
            assert_eq!(cache.pending_lookups(), 0);
        });
    }

    #[test]
    fn overlapping_lookups_resolve_each_key_once() {
        crate::testing::test_async(async {
            let gate = Arc::new(Semaphore::new(0));
            let resolver = CountingResolver::gated(gate.clone());
            let cache = Arc::new(PlaceCache::new(10, resolver.clone()));

            let mut tasks = Vec::new();
            for id in ["A", "B", "A", "C", "B", "A"] {
                let cache = cache.clone();
                tasks.push(tokio::spawn(async move {
                    cache.get_place(id, Some("en")).await.map(|place| place.id().to_owned())
                }));
            }

            // Let all tasks register their lookups before any resolution may complete...
            while cache.stats().resolutions + cache.stats().coalesced < 6 {
                tokio::task::yield_now().await;
            }
            assert_eq!(cache.pending_lookups(), 3);
            gate.add_permits(3);

            for task in tasks {
                let _ = task.await.unwrap().unwrap();
            }

            assert_eq!(resolver.calls(), 3);
            for id in ["A", "B", "C"] {
                assert_eq!(resolver.calls_for(&CacheKey::new(id, Some("en"))), 1);
            }
        });
    }

    #[test]
    fn failures_reach_all_waiters_and_are_not_cached() {
        crate::testing::test_async(async {
            let gate = Arc::new(Semaphore::new(0));
            let resolver = CountingResolver::gated(gate.clone());
            resolver.fail_for("K");
            let cache = PlaceCache::new(10, resolver.clone());

            let (first, second, _) = tokio::join!(
                cache.get_place("K", None),
                cache.get_place("K", None),
                async {
                    tokio::task::yield_now().await;
                    gate.add_permits(1);
                }
            );

            let first = first.unwrap_err();
            let second = second.unwrap_err();
            assert_eq!(first.to_string(), "Unknown place: K");
            assert_eq!(second.to_string(), "Unknown place: K");
            assert_eq!(
                first.downcast_ref::<ResolveError>().unwrap().key(),
                &CacheKey::new("K", None)
            );
            assert_eq!(resolver.calls(), 1);
            assert_eq!(cache.stats().failures, 1);

            // No stale marker is left behind, therefore the next lookup resolves again...
            assert_eq!(cache.pending_lookups(), 0);
            assert_eq!(cache.contains("K", None), false);
            resolver.succeed_for("K");
            gate.add_permits(1);
            let place = cache.get_place("K", None).await.unwrap();
            assert_eq!(place.id(), "K");
            assert_eq!(resolver.calls(), 2);
        });
    }

    #[test]
    fn least_recently_used_places_are_evicted() {
        crate::testing::test_async(async {
            let resolver = CountingResolver::new();
            let cache = PlaceCache::new(2, resolver.clone());

            let _ = cache.get_place("A", None).await.unwrap();
            let _ = cache.get_place("B", None).await.unwrap();
            let _ = cache.get_place("C", None).await.unwrap();
            assert_eq!(resolver.calls(), 3);
            assert_eq!(cache.contains("A", None), false);

            // "B" is still present and served without resolving...
            let _ = cache.get_place("B", None).await.unwrap();
            assert_eq!(resolver.calls(), 3);

            // ...whereas "A" has been evicted and is therefore resolved again.
            let _ = cache.get_place("A", None).await.unwrap();
            assert_eq!(resolver.calls(), 4);
            assert_eq!(resolver.calls_for(&CacheKey::new("A", None)), 2);

            // As "B" was used more recently than "C", the latter made room for "A"...
            assert_eq!(cache.contains("B", None), true);
            assert_eq!(cache.contains("C", None), false);
            let _ = cache.get_place("B", None).await.unwrap();
            assert_eq!(resolver.calls(), 4);
            assert_eq!(cache.len(), 2);
        });
    }

    #[test]
    fn evicting_keeps_the_recently_used_place() {
        crate::testing::test_async(async {
            let resolver = CountingResolver::new();
            let cache = PlaceCache::new(2, resolver.clone());

            let _ = cache.get_place("A", None).await.unwrap();
            let _ = cache.get_place("B", None).await.unwrap();
            let _ = cache.get_place("A", None).await.unwrap();
            let _ = cache.get_place("C", None).await.unwrap();

            assert_eq!(cache.contains("A", None), true);
            assert_eq!(cache.contains("B", None), false);

            // "B" is a miss and resolved again, "A" was evicted by it...
            let _ = cache.get_place("B", None).await.unwrap();
            assert_eq!(resolver.calls(), 4);
            assert_eq!(cache.contains("A", None), false);
            assert_eq!(cache.stats().evictions, 2);
        });
    }

    #[test]
    fn updating_a_place_never_resolves() {
        crate::testing::test_async(async {
            let resolver = CountingResolver::new();
            let cache = PlaceCache::new(2, resolver.clone());

            let _ = cache.get_place("A", Some("en")).await.unwrap();
            let _ = cache.update_place(
                Place::new("A")
                    .with_language("en")
                    .with_field("displayName", json!("Updated")),
            );

            let place = cache.get_place("A", Some("en")).await.unwrap();
            assert_eq!(place.field("displayName"), Some(&json!("Updated")));

            // Also a place which was never resolved can be put into the cache...
            let _ = cache.update_place(Place::new("B"));
            assert_eq!(cache.get_place("B", None).await.unwrap().id(), "B");
            assert_eq!(resolver.calls(), 1);

            // Updating refreshes the recency, so "A" survives the next insertion...
            let _ = cache.update_place(Place::new("A").with_language("en"));
            let _ = cache.update_place(Place::new("C"));
            assert_eq!(cache.contains("A", Some("en")), true);
            assert_eq!(cache.contains("B", None), false);
        });
    }

    #[test]
    fn an_update_during_a_lookup_is_kept() {
        crate::testing::test_async(async {
            let gate = Arc::new(Semaphore::new(0));
            let resolver = CountingResolver::gated(gate.clone());
            let cache = PlaceCache::new(2, resolver.clone());

            let (resolved, _) = tokio::join!(cache.get_place("A", None), async {
                tokio::task::yield_now().await;
                let _ = cache.update_place(Place::new("A").with_field("rating", json!(5)));
                gate.add_permits(1);
            });

            // The waiter receives the resolved place, but the cache keeps the updated one...
            assert_eq!(resolved.unwrap().has_field("rating"), false);
            let cached = cache.get_place("A", None).await.unwrap();
            assert_eq!(cached.field("rating"), Some(&json!(5)));
            assert_eq!(resolver.calls(), 1);
        });
    }

    #[test]
    fn lookups_complete_even_if_all_waiters_are_gone() {
        crate::testing::test_async(async {
            let gate = Arc::new(Semaphore::new(0));
            let resolver = CountingResolver::gated(gate.clone());
            let cache = PlaceCache::new(2, resolver.clone());

            // Start a lookup and drop it right away...
            let lookup = cache.get_place("A", None);
            let _ = tokio::time::timeout(std::time::Duration::from_millis(1), lookup).await;
            assert_eq!(cache.pending_lookups(), 1);

            gate.add_permits(1);
            while cache.pending_lookups() > 0 {
                tokio::task::yield_now().await;
            }

            assert_eq!(cache.contains("A", None), true);
            assert_eq!(resolver.calls(), 1);
        });
    }

    #[test]
    fn a_panicking_resolver_is_reported_as_failure() {
        crate::testing::test_async(async {
            let resolver = CountingResolver::new();
            let cache = PlaceCache::new(2, resolver.clone());
            resolver.panic_for("A");

            let error = cache.get_place("A", None).await.unwrap_err();
            assert_eq!(
                error.to_string(),
                "The resolver panicked: Resolver crashed for A"
            );
            assert_eq!(cache.pending_lookups(), 0);
            assert_eq!(cache.contains("A", None), false);
            assert_eq!(cache.stats().failures, 1);

            // The next lookup retries...
            resolver.stop_panicking_for("A");
            let place = cache.get_place("A", None).await.unwrap();
            assert_eq!(place.id(), "A");
            assert_eq!(resolver.calls(), 2);
        });
    }

    #[test]
    fn a_panic_without_waiters_clears_the_pending_lookup() {
        crate::testing::test_async(async {
            let gate = Arc::new(Semaphore::new(0));
            let resolver = CountingResolver::gated(gate.clone());
            let cache = PlaceCache::new(2, resolver.clone());
            resolver.panic_for("A");

            // Start a lookup and drop it before the resolver panics...
            let lookup = cache.get_place("A", None);
            let _ = tokio::time::timeout(std::time::Duration::from_millis(1), lookup).await;
            assert_eq!(cache.pending_lookups(), 1);

            gate.add_permits(1);
            while cache.pending_lookups() > 0 {
                tokio::task::yield_now().await;
            }
            assert_eq!(cache.stats().failures, 1);

            // No one attaches to the crashed lookup, the resolver is asked again...
            resolver.stop_panicking_for("A");
            gate.add_permits(1);
            let place = cache.get_place("A", None).await.unwrap();
            assert_eq!(place.id(), "A");
            assert_eq!(resolver.calls(), 2);
        });
    }

    #[test]
    fn stats_and_maintenance_work() {
        crate::testing::test_async(async {
            let resolver = CountingResolver::new();
            let cache = PlaceCache::new(4, resolver.clone());

            let _ = cache.get_place("A", None).await.unwrap();
            let _ = cache.get_place("A", None).await.unwrap();
            let _ = cache.get_place("B", None).await.unwrap();

            let stats = cache.stats();
            assert_eq!(stats.entries, 2);
            assert_eq!(stats.capacity, 4);
            assert_eq!(stats.reads, 3);
            assert_eq!(stats.hits, 1);
            assert_eq!(stats.resolutions, 2);
            assert_eq!(stats.pending, 0);

            assert_eq!(cache.remove("A", None).unwrap().id(), "A");
            assert_eq!(cache.remove("A", None), None);
            assert_eq!(cache.len(), 1);

            cache.set_capacity(0);
            assert_eq!(cache.is_empty(), true);

            cache.flush();
            assert_eq!(cache.stats().resolutions, 0);
            assert_eq!(cache.stats().reads, 0);
        });
    }

    #[test]
    fn install_registers_a_configured_cache() {
        crate::testing::test_async(async {
            let platform = Builder::new().enable_config().build().await;
            let config = platform.require::<Config>();
            config
                .load_from_string(
                    "places:
                        cache:
                            size: 16
                    ",
                    None,
                )
                .unwrap();

            let cache = install(platform.clone(), CountingResolver::new());
            assert_eq!(cache.capacity(), 16);
            assert_eq!(
                Arc::ptr_eq(&cache, &platform.require::<PlaceCache>()),
                true
            );

            // Changing the config resizes the cache...
            config
                .load_from_string(
                    "places:
                        cache:
                            size: 4
                    ",
                    None,
                )
                .unwrap();
            while cache.capacity() != 4 {
                tokio::task::yield_now().await;
            }

            // ...and removing the setting restores the default.
            config.load_from_string("other: 1", None).unwrap();
            while cache.capacity() != DEFAULT_CAPACITY {
                tokio::task::yield_now().await;
            }

            platform.terminate();
        });
    }

    #[test]
    fn install_uses_the_default_size_without_config() {
        crate::testing::test_async(async {
            let platform = Builder::new().build().await;
            let cache = install(platform, CountingResolver::new());
            assert_eq!(cache.capacity(), DEFAULT_CAPACITY);
        });
    }
}
