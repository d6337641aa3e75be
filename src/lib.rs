//! Placecache provides a bounded, request coalescing cache for place lookups along with a place
//! data provider which publishes the selected place to its consumers.
//!
//! # Introduction
//! Embedding address or place search widgets usually means talking to an external place data
//! source (like a maps SDK) which is slow and billed per request. Several widgets on the same
//! page tend to ask for the very same place at the very same time. **Placecache** sits between
//! these widgets and the data source:
//!
//! * The [PlaceCache](places::cache::PlaceCache) keeps the most recently used places around.
//!   If a place is requested again while the first lookup is still running, the caller simply
//!   attaches to the running lookup. Therefore the data source is asked exactly once per place
//!   and language, no matter how many callers wait for it.
//! * The [PlaceDataProvider](places::provider::PlaceDataProvider) owns the currently selected
//!   place. Consumers subscribe to it and declare which fields they need. The provider fetches
//!   missing fields, writes the enriched place back into the cache and then explicitly notifies
//!   all consumers.
//!
//! # Setup
//! A cache is shared by all providers of a process. It is registered in the
//! [Platform](platform::Platform) by [places::cache::install]. Its capacity is read from the
//! system config (see [config]) and follows config changes during operation:
//!
//! ```yaml
//! places:
//!     cache:
//!         # Specifies the maximal number of places to keep.
//!         size: 100
//! ```
//!
//! A short example on how to initialize the library can be found here [Builder](builder::Builder).
#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod config;
pub mod lru;
pub mod places;
pub mod platform;

/// Contains the version of the Placecache library.
pub const PLACECACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the Placecache build being used.
pub const PLACECACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests might build several platforms, but the logger can only be installed once...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned handle to make clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate placecache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}
