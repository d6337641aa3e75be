//! Provides the place data provider which publishes the selected place to its consumers.
//!
//! A [PlaceDataProvider] owns the currently selected place. Consumers (e.g. widgets rendering
//! the name or the address of a place) [subscribe](PlaceDataProvider::subscribe) to a provider
//! and declare which fields they need. Whenever the selection changes, the provider:
//!
//! 1. obtains the place from the shared [PlaceCache],
//! 2. fetches all fields required by its consumers which aren't present yet,
//! 3. writes the enriched place back into the cache (so that other providers benefit from it),
//! 4. and finally notifies all consumers.
//!
//! Notifying consumers is an explicit step which is performed by the provider after the shared
//! state has been updated. Consumers are never notified while any internal lock is held, so they
//! may freely call back into the provider.
//!
//! Note that selecting a place is asynchronous. If the selection changes again before a lookup
//! completes, the result of the outdated lookup is dropped and never published.
//!
//! # Examples
//! ```
//! # use placecache::places::cache::PlaceCache;
//! # use placecache::places::provider::{PlaceConsumer, PlaceDataProvider};
//! # use placecache::places::{CacheKey, Place, Resolver};
//! # use serde_json::json;
//! # use std::sync::{Arc, Mutex};
//! struct Resolve;
//!
//! #[async_trait::async_trait]
//! impl Resolver for Resolve {
//!     async fn resolve(&self, key: &CacheKey) -> anyhow::Result<Place> {
//!         Ok(Place::from_key(key))
//!     }
//!
//!     async fn fetch_fields(&self, place: &Place, fields: &[String]) -> anyhow::Result<Place> {
//!         Ok(fields.iter().fold(place.clone(), |place, field| {
//!             place.with_field(field.as_str(), json!("Opera House"))
//!         }))
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Label(Mutex<Option<String>>);
//!
//! impl PlaceConsumer for Label {
//!     fn required_fields(&self) -> Vec<String> {
//!         vec!["displayName".to_owned()]
//!     }
//!
//!     fn place_changed(&self, place: Option<&Arc<Place>>) {
//!         *self.0.lock().unwrap() = place
//!             .and_then(|place| place.field("displayName"))
//!             .and_then(|name| name.as_str())
//!             .map(str::to_owned);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = Arc::new(PlaceCache::new(100, Arc::new(Resolve)));
//!     let provider = PlaceDataProvider::new(cache).with_language("en");
//!
//!     let label = Arc::new(Label::default());
//!     let _ = provider.subscribe(label.clone());
//!
//!     provider.set_place_id("ChIJ3S-JXmauEmsRUcIaWtf4MzE").await.unwrap();
//!     assert_eq!(label.0.lock().unwrap().as_deref(), Some("Opera House"));
//! }
//! ```
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::places::cache::PlaceCache;
use crate::places::Place;

/// Describes a component which renders or otherwise uses the place of a [PlaceDataProvider].
pub trait PlaceConsumer: Send + Sync {
    /// Returns the names of the fields this consumer needs.
    ///
    /// The provider makes sure that these fields are fetched before a place is published.
    fn required_fields(&self) -> Vec<String> {
        Vec::new()
    }

    /// Invoked once a new place was selected or **None** if the selection was cleared.
    fn place_changed(&self, place: Option<&Arc<Place>>);

    /// Invoked if selecting or enriching a place failed.
    ///
    /// Note that the previously selected place remains selected in this case.
    fn request_failed(&self, _error: &anyhow::Error) {}
}

/// Identifies a subscription so that it can be cancelled via
/// [unsubscribe](PlaceDataProvider::unsubscribe).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(usize);

/// Keeps the selected place along with the generation of the request which selected it.
///
/// Each new selection bumps the generation. A lookup only publishes its result if the
/// generation is still the one it started with.
struct Selection {
    generation: u64,
    place: Option<Arc<Place>>,
}

/// Owns the currently selected place and publishes it to all subscribed consumers.
pub struct PlaceDataProvider {
    cache: Arc<PlaceCache>,
    language: Option<String>,
    auto_fetch: AtomicBool,
    next_subscription: AtomicUsize,
    consumers: Mutex<Vec<(SubscriptionId, Arc<dyn PlaceConsumer>)>>,
    selection: Mutex<Selection>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PlaceDataProvider {
    /// Creates a new provider which obtains its places from the given cache.
    pub fn new(cache: Arc<PlaceCache>) -> Self {
        PlaceDataProvider {
            cache,
            language: None,
            auto_fetch: AtomicBool::new(true),
            next_subscription: AtomicUsize::new(1),
            consumers: Mutex::new(Vec::new()),
            selection: Mutex::new(Selection {
                generation: 0,
                place: None,
            }),
        }
    }

    /// Specifies the language in which places are requested.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Returns the language in which places are requested.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Enables or disables fetching the fields required by the consumers.
    ///
    /// If disabled, places are published as they are found in the cache or as they are passed
    /// into [set_place](PlaceDataProvider::set_place).
    pub fn set_auto_fetch(&self, enabled: bool) {
        self.auto_fetch.store(enabled, Ordering::Release);
    }

    /// Determines if missing fields are fetched automatically.
    pub fn is_auto_fetch_enabled(&self) -> bool {
        self.auto_fetch.load(Ordering::Acquire)
    }

    /// Registers the given consumer and immediately hands it the currently selected place.
    ///
    /// Note that the fields required by a new consumer are not fetched for an already selected
    /// place until [refresh](PlaceDataProvider::refresh) is invoked.
    pub fn subscribe(&self, consumer: Arc<dyn PlaceConsumer>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::AcqRel));
        lock(&self.consumers).push((id, consumer.clone()));

        consumer.place_changed(self.place().as_ref());

        id
    }

    /// Removes the consumer with the given subscription.
    ///
    /// Returns **true** if the subscription was present.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut consumers = lock(&self.consumers);
        let count = consumers.len();
        consumers.retain(|(subscription, _)| *subscription != id);

        consumers.len() != count
    }

    /// Returns the number of subscribed consumers.
    pub fn consumer_count(&self) -> usize {
        lock(&self.consumers).len()
    }

    /// Returns the names of all fields required by any consumer (sorted, without duplicates).
    pub fn required_fields(&self) -> Vec<String> {
        self.consumers()
            .iter()
            .flat_map(|consumer| consumer.required_fields())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Returns the currently selected place.
    pub fn place(&self) -> Option<Arc<Place>> {
        lock(&self.selection).place.clone()
    }

    /// Selects the place with the given id.
    ///
    /// The place is obtained from the cache (in the language of this provider), enriched by all
    /// fields required by the consumers and then published.
    ///
    /// # Errors
    /// Fails if either the place cannot be resolved or if its fields cannot be fetched. In this
    /// case, all consumers are notified via **request_failed** and the previous place remains
    /// selected.
    pub async fn set_place_id(&self, id: &str) -> anyhow::Result<()> {
        let generation = self.next_generation();

        let result = match self.cache.get_place(id, self.language()).await {
            Ok(place) => self.enrich(place).await,
            Err(error) => Err(error),
        };

        self.complete(generation, result)
    }

    /// Selects the given place.
    ///
    /// The place is stored in the cache, enriched by all fields required by the consumers and
    /// then published.
    ///
    /// # Errors
    /// Fails if the missing fields cannot be fetched.
    pub async fn set_place(&self, place: Place) -> anyhow::Result<()> {
        let generation = self.next_generation();

        let place = self.cache.update_place(place);
        let result = self.enrich(place).await;

        self.complete(generation, result)
    }

    /// Fetches the fields which are required by the consumers but missing in the currently
    /// selected place and publishes the enriched place.
    ///
    /// This is most probably invoked after a new consumer subscribed. If the selection changes
    /// while the fields are fetched, the result is dropped.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let (generation, place) = {
            let selection = lock(&self.selection);
            (selection.generation, selection.place.clone())
        };

        match place {
            Some(place) => {
                let result = self.enrich(place).await;
                self.complete(generation, result)
            }
            None => Ok(()),
        }
    }

    /// Clears the selection and notifies all consumers.
    ///
    /// This also drops the results of all lookups which are still in flight.
    pub fn clear(&self) {
        let generation = self.next_generation();
        if self.select(generation, None) {
            self.publish(None);
        }
    }

    fn next_generation(&self) -> u64 {
        let mut selection = lock(&self.selection);
        selection.generation += 1;
        selection.generation
    }

    fn consumers(&self) -> Vec<Arc<dyn PlaceConsumer>> {
        lock(&self.consumers)
            .iter()
            .map(|(_, consumer)| consumer.clone())
            .collect()
    }

    /// Fetches all required but missing fields and writes the enriched place into the cache.
    async fn enrich(&self, place: Arc<Place>) -> anyhow::Result<Arc<Place>> {
        if !self.is_auto_fetch_enabled() {
            return Ok(place);
        }

        let missing = place.missing_fields(&self.required_fields());
        if missing.is_empty() {
            return Ok(place);
        }

        log::debug!(
            "Fetching {} for place {}...",
            missing.join(", "),
            place.cache_key()
        );
        let fetched = self
            .cache
            .resolver()
            .fetch_fields(&place, &missing)
            .await?;

        let mut enriched = Place::clone(&place);
        enriched.merge_fields(&fetched);

        Ok(self.cache.update_place(enriched))
    }

    /// Publishes the outcome of a lookup unless it has been superseded by a newer selection.
    fn complete(&self, generation: u64, result: anyhow::Result<Arc<Place>>) -> anyhow::Result<()> {
        match result {
            Ok(place) => {
                if self.select(generation, Some(place.clone())) {
                    self.publish(Some(&place));
                } else {
                    log::debug!(
                        "Dropping place {} as the selection changed meanwhile.",
                        place.cache_key()
                    );
                }
                Ok(())
            }
            Err(error) => {
                log::warn!("Failed to provide a place: {:#}", error);
                if self.is_current(generation) {
                    for consumer in self.consumers() {
                        consumer.request_failed(&error);
                    }
                }
                Err(error)
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.selection).generation == generation
    }

    fn select(&self, generation: u64, place: Option<Arc<Place>>) -> bool {
        let mut selection = lock(&self.selection);
        if selection.generation != generation {
            return false;
        }

        selection.place = place;
        true
    }

    fn publish(&self, place: Option<&Arc<Place>>) {
        for consumer in self.consumers() {
            consumer.place_changed(place);
        }
    }
}
