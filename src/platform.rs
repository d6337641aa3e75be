//! Provides a tiny DI like container to expose all components of the system.
//!
//! The platform is more or less a simple map which keeps all central components as
//! **Arc<T>** around. This is how a single [PlaceCache](crate::places::cache::PlaceCache) is
//! shared by all providers of a process: it is registered once and then fetched via
//! [Platform::require](Platform::require) wherever it is needed.
//!
//! The platform also keeps the central **is_running** flag which is toggled to *false* once
//! [Platform::terminate](Platform::terminate) is invoked. Background tasks (like the config
//! monitor) stop once this flag is cleared.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use placecache::platform::Platform;
//! struct Service {
//!     value : i32
//! }
//!
//! struct UnknownService;
//!
//! let platform = Platform::new();
//! platform.register::<Service>(Arc::new(Service { value: 42 }));
//!
//! assert_eq!(platform.require::<Service>().value, 42);
//! assert_eq!(platform.find::<UnknownService>().is_none(), true);
//!
//! // Once terminated, all services are released...
//! platform.terminate();
//! assert_eq!(platform.find::<Service>().is_none(), true);
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Services = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Provides a container to keep all central services in a single place.
pub struct Platform {
    services: Mutex<Services>,
    is_running: AtomicBool,
}

impl Platform {
    /// Creates a new platform instance..
    pub fn new() -> Arc<Self> {
        Arc::new(Platform {
            services: Mutex::new(HashMap::new()),
            is_running: AtomicBool::new(true),
        })
    }

    fn services(&self) -> MutexGuard<'_, Services> {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new component.
    ///
    /// A previously registered component of the same type is replaced.
    pub fn register<T>(&self, service: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self.services().insert(TypeId::of::<T>(), service);
    }

    /// Tries to resolve a previously registered service.
    ///
    /// Note, if one knows for certain, that a service will be present,
    /// [Platform::require](Platform::require) can be used.
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.services()
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.clone().downcast::<T>().ok())
    }

    /// Resolve a previously registered service.
    ///
    /// # Panics
    /// Panics if the requested service isn't available or if the platform is already shutting
    /// down.
    ///
    /// ```should_panic
    /// # use placecache::platform::Platform;
    /// struct UnknownService;
    ///
    /// let platform = Platform::new();
    ///
    /// // This will panic...
    /// platform.require::<UnknownService>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if !self.is_running() {
            panic!(
                "A required component ({}) has been requested but the system is already shutting down!",
                std::any::type_name::<T>()
            );
        }

        match self.find::<T>() {
            Some(service) => service,
            None => panic!(
                "A required component ({}) was not available in the platform registry!",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Determines if the platform is still running or if [Platform::terminate](Platform::terminate)
    /// has already been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the platform.
    ///
    /// This will immediately release all services and toggle the
    /// [is_running()](Platform::is_running) flag to **false**.
    pub fn terminate(&self) {
        self.services().clear();
        self.is_running.store(false, Ordering::Release);
    }
}
