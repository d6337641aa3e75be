//! Provides places along with a cache and a data provider for them.
//!
//! A [Place] is a record describing a geographic point of interest. It is identified by a stable
//! id and carries a set of optionally populated fields (e.g. `displayName` or `location`). As
//! places are resolved in a given language, the [CacheKey] is always made up of the id **and**
//! the requested language.
//!
//! Places are obtained from an external data source which is represented by the [Resolver] trait.
//! The [cache] module provides a bounded LRU cache which ensures that a resolver is only invoked
//! once per key, even if many callers ask for the same place at the same time. The [provider]
//! module builds upon this and publishes the currently selected place to all subscribed
//! consumers.
use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

use serde_json::{Map, Value};

pub mod cache;
pub mod provider;

/// Identifies a cached place by its id and the language it was requested in.
///
/// Two lookups are considered equal if and only if both, the id and the language match. Note
/// that **no language** is a separate key and not equal to any explicitly given language.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    id: String,
    language: Option<String>,
}

impl CacheKey {
    /// Creates a new key for the given id and optional language.
    ///
    /// # Examples
    /// ```
    /// # use placecache::places::CacheKey;
    /// assert_eq!(CacheKey::new("A", Some("de")), CacheKey::new("A", Some("de")));
    /// assert_ne!(CacheKey::new("A", Some("de")), CacheKey::new("A", None));
    /// assert_eq!(CacheKey::new("A", Some("de")).to_string(), "A@de");
    /// ```
    pub fn new(id: impl Into<String>, language: Option<&str>) -> Self {
        CacheKey {
            id: id.into(),
            language: language.map(str::to_owned),
        }
    }

    /// Returns the place id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the requested language if present.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.language {
            Some(language) => write!(f, "{}@{}", self.id, language),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Represents a place as delivered by a [Resolver].
///
/// The contents of a place are opaque to the cache. Fields are stored as JSON values by their
/// name. A field which is absent hasn't been fetched yet, whereas a field containing **null**
/// has been fetched but isn't known for this place.
///
/// # Examples
/// ```
/// # use placecache::places::Place;
/// # use serde_json::json;
/// let place = Place::new("ChIJ3S-JXmauEmsRUcIaWtf4MzE")
///     .with_language("en")
///     .with_field("displayName", json!("Sydney Opera House"));
///
/// assert_eq!(place.field("displayName"), Some(&json!("Sydney Opera House")));
/// assert_eq!(place.has_field("location"), false);
/// assert_eq!(place.cache_key().to_string(), "ChIJ3S-JXmauEmsRUcIaWtf4MzE@en");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Place {
    id: String,
    requested_language: Option<String>,
    fields: Map<String, Value>,
}

impl Place {
    /// Creates a new place with the given id and no fields.
    pub fn new(id: impl Into<String>) -> Self {
        Place {
            id: id.into(),
            requested_language: None,
            fields: Map::new(),
        }
    }

    /// Creates an empty place which belongs to the given key.
    pub fn from_key(key: &CacheKey) -> Self {
        Place {
            id: key.id.clone(),
            requested_language: key.language.clone(),
            fields: Map::new(),
        }
    }

    /// Specifies the language in which the place was requested.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.requested_language = Some(language.into());
        self
    }

    /// Adds or replaces the given field.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set_field(name, value);
        self
    }

    /// Returns the id of this place.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the language in which this place was requested.
    pub fn requested_language(&self) -> Option<&str> {
        self.requested_language.as_deref()
    }

    /// Returns the key under which this place is cached.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.id.as_str(), self.requested_language())
    }

    /// Returns the value of the given field if it has been fetched.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Determines if the given field has been fetched.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Adds or replaces the given field.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        let _ = self.fields.insert(name.into(), value);
    }

    /// Iterates over all fetched fields.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Copies all fields of the given place into this one, replacing existing values.
    pub fn merge_fields(&mut self, other: &Place) {
        for (name, value) in other.fields() {
            let _ = self.fields.insert(name.clone(), value.clone());
        }
    }

    /// Determines which of the given fields haven't been fetched yet.
    ///
    /// # Examples
    /// ```
    /// # use placecache::places::Place;
    /// # use serde_json::Value;
    /// let place = Place::new("A").with_field("displayName", Value::Null);
    /// let required = vec!["displayName".to_owned(), "location".to_owned()];
    ///
    /// assert_eq!(place.missing_fields(&required), vec!["location".to_owned()]);
    /// ```
    pub fn missing_fields(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|name| !self.has_field(name))
            .cloned()
            .collect()
    }
}

/// Describes the external data source which actually resolves places.
///
/// This is supplied by the host, which most probably delegates to a maps SDK. Implementations
/// must not cache on their own, this is done by the [PlaceCache](cache::PlaceCache).
///
/// A resolved place has to carry the requested id. Its requested language is set by the cache.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    /// Resolves the place with the given id in the given language.
    async fn resolve(&self, key: &CacheKey) -> anyhow::Result<Place>;

    /// Fetches the given fields for a place and returns the place with these fields populated.
    async fn fetch_fields(&self, place: &Place, fields: &[String]) -> anyhow::Result<Place>;
}

/// Reports a failed resolution to every caller waiting for the same key.
///
/// As all waiters share a single lookup, the error of the resolver is kept once and handed out
/// to each of them. Formatting and the **source** chain are forwarded to the original error, so
/// that a caller observes exactly what the resolver reported.
///
/// The public API of the cache returns **anyhow** errors. The original error can be obtained via
/// `error.downcast_ref::<ResolveError>()` and [ResolveError::cause].
#[derive(Clone, Debug)]
pub struct ResolveError {
    key: CacheKey,
    cause: Arc<anyhow::Error>,
}

impl ResolveError {
    fn new(key: CacheKey, cause: anyhow::Error) -> Self {
        ResolveError {
            key,
            cause: Arc::new(cause),
        }
    }

    /// Returns the key which failed to resolve.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns the error reported by the resolver.
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.source()
    }
}
