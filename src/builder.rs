//! Provides a builder which can be used to setup and initialize the framework.
//!
//! # Example
//! Setting up the framework and installing a place cache:
//! ```no_run
//! # use placecache::builder::Builder;
//! # use placecache::places::{CacheKey, Place, Resolver};
//! # use std::sync::Arc;
//! struct MapsResolver;
//!
//! #[async_trait::async_trait]
//! impl Resolver for MapsResolver {
//!     async fn resolve(&self, key: &CacheKey) -> anyhow::Result<Place> {
//!         // Ask the maps SDK here...
//!         Ok(Place::from_key(key))
//!     }
//!
//!     async fn fetch_fields(&self, place: &Place, _fields: &[String]) -> anyhow::Result<Place> {
//!         Ok(place.clone())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let platform = Builder::new().enable_all().build().await;
//!     let cache = placecache::places::cache::install(platform.clone(), Arc::new(MapsResolver));
//!
//!     let place = cache.get_place("ChIJN1t_tDeuEmsRUsoyG83frY4", Some("en")).await;
//! }
//! ```
use std::sync::Arc;

use crate::platform::Platform;
use crate::{init_logging, PLACECACHE_REVISION, PLACECACHE_VERSION};

/// Initializes the framework by creating and initializing all core components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    setup_config: bool,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Builder {
            setup_logging: false,
            setup_config: false,
        }
    }

    /// Enables all features.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.setup_config = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs [config::Config](crate::config::Config) and loads the **settings.yml**.
    ///
    /// For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables setting up a **Config** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Builds the [Platform](crate::platform::Platform) registry with all the enabled components
    /// being registered.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. PLACECACHE (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            PLACECACHE_VERSION,
            PLACECACHE_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.setup_config {
            crate::config::install(platform.clone()).await;
        }

        platform
    }
}
