//! Service registration and scoped resolution.
//!
//! Services are registered on a [`ServiceCollection`] at startup, each with a
//! [`Lifetime`]. The collection is then frozen into a root [`ServiceProvider`],
//! and every logical call chain resolves from its own scope created with
//! [`ServiceProvider::create_scope`].
//!
//! # Example
//!
//! ```rust
//! use conqueror_core::di::{Lifetime, ServiceCollection};
//! use std::sync::Arc;
//!
//! struct Database {
//!     connection_string: String,
//! }
//!
//! struct UnitOfWork {
//!     db: Arc<Database>,
//! }
//!
//! let mut services = ServiceCollection::new();
//! services.add_singleton(Arc::new(Database {
//!     connection_string: "postgres://localhost/db".to_string(),
//! }));
//! services.add_factory(Lifetime::Scoped, |provider| {
//!     Ok(UnitOfWork {
//!         db: provider.resolve_required::<Database>()?,
//!     })
//! });
//!
//! let root = services.build_provider();
//! let scope = root.create_scope();
//!
//! let a: Arc<UnitOfWork> = scope.resolve().unwrap();
//! let b: Arc<UnitOfWork> = scope.resolve().unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! ```

use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type AnyService = Arc<dyn Any + Send + Sync>;
type ServiceFactory =
    Arc<dyn Fn(&ServiceProvider) -> Result<AnyService, InjectionError> + Send + Sync>;

/// Error when a dependency cannot be resolved.
#[derive(Debug, Clone)]
pub struct InjectionError {
    /// The type name that could not be resolved.
    pub type_name: &'static str,
    /// The reason for the failure.
    pub reason: String,
}

impl fmt::Display for InjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to inject {}: {}", self.type_name, self.reason)
    }
}

impl std::error::Error for InjectionError {}

impl InjectionError {
    /// Creates a new injection error for a missing service.
    pub fn not_registered<T>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            reason: "service not registered".to_string(),
        }
    }

    /// Creates a new injection error with a custom reason.
    pub fn custom<T>(reason: impl Into<String>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }
}

/// How long a resolved service instance lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// One instance per root provider.
    Singleton,
    /// One instance per scope.
    #[default]
    Scoped,
    /// A new instance on every resolution.
    Transient,
}

#[derive(Clone)]
enum ServiceSource {
    Instance(AnyService),
    Factory(ServiceFactory),
}

#[derive(Clone)]
struct ServiceDescriptor {
    type_name: &'static str,
    lifetime: Lifetime,
    source: ServiceSource,
}

/// Types that can construct themselves from a [`ServiceProvider`].
///
/// Implemented by handlers and other services registered by type.
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Builds an instance, resolving dependencies from `provider`.
    fn inject(provider: &ServiceProvider) -> Result<Self, InjectionError>;
}

/// Mutable set of service registrations.
///
/// Registering a type a second time replaces the earlier registration.
#[derive(Clone, Default)]
pub struct ServiceCollection {
    services: HashMap<TypeId, ServiceDescriptor>,
}

impl ServiceCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an existing instance as a singleton.
    pub fn add_singleton<T: Send + Sync + 'static>(&mut self, service: Arc<T>) -> &mut Self {
        self.services.insert(
            TypeId::of::<T>(),
            ServiceDescriptor {
                type_name: std::any::type_name::<T>(),
                lifetime: Lifetime::Singleton,
                source: ServiceSource::Instance(service),
            },
        );
        self
    }

    /// Registers a factory with the given lifetime.
    pub fn add_factory<T, F>(&mut self, lifetime: Lifetime, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<T, InjectionError> + Send + Sync + 'static,
    {
        let factory: ServiceFactory = Arc::new(move |provider: &ServiceProvider| {
            factory(provider).map(|s| Arc::new(s) as AnyService)
        });
        self.services.insert(
            TypeId::of::<T>(),
            ServiceDescriptor {
                type_name: std::any::type_name::<T>(),
                lifetime,
                source: ServiceSource::Factory(factory),
            },
        );
        self
    }

    /// Registers an [`Injectable`] type with the given lifetime.
    pub fn add_injectable<T: Injectable>(&mut self, lifetime: Lifetime) -> &mut Self {
        self.add_factory(lifetime, T::inject)
    }

    /// Returns the singleton instance registered for `T`, if it was added as one.
    #[must_use]
    pub fn get_instance<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match &self.services.get(&TypeId::of::<T>())?.source {
            ServiceSource::Instance(service) => service.clone().downcast::<T>().ok(),
            ServiceSource::Factory(_) => None,
        }
    }

    /// Removes the registration for `T`, returning whether one existed.
    pub fn remove<T: 'static>(&mut self) -> bool {
        self.remove_by_id(TypeId::of::<T>())
    }

    /// Removes the registration with the given type id.
    pub fn remove_by_id(&mut self, type_id: TypeId) -> bool {
        self.services.remove(&type_id).is_some()
    }

    /// Checks if a service is registered.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    /// Returns the lifetime `T` is registered with.
    #[must_use]
    pub fn lifetime_of<T: 'static>(&self) -> Option<Lifetime> {
        self.services.get(&TypeId::of::<T>()).map(|d| d.lifetime)
    }

    /// Returns the number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` if no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Freezes the registrations into a root provider.
    #[must_use]
    pub fn build_provider(self) -> ServiceProvider {
        ServiceProvider {
            registrations: Arc::new(self.services),
            singletons: Arc::new(Mutex::new(HashMap::new())),
            scoped: Arc::new(Mutex::new(HashMap::new())),
            is_root: true,
        }
    }
}

impl fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCollection")
            .field("service_count", &self.services.len())
            .finish()
    }
}

/// Resolves services registered on a [`ServiceCollection`].
///
/// A provider is either the root or a scope created from it. Cloning a
/// provider shares its scope.
///
/// # Thread Safety
///
/// Providers are `Send + Sync`. Instances are cached behind a lock that is
/// never held while a factory runs, so factories may resolve further services.
#[derive(Clone)]
pub struct ServiceProvider {
    registrations: Arc<HashMap<TypeId, ServiceDescriptor>>,
    singletons: Arc<Mutex<HashMap<TypeId, AnyService>>>,
    scoped: Arc<Mutex<HashMap<TypeId, AnyService>>>,
    is_root: bool,
}

impl ServiceProvider {
    /// Creates a provider with no registrations.
    #[must_use]
    pub fn empty() -> Self {
        ServiceCollection::new().build_provider()
    }

    /// Creates a new scope sharing this provider's singletons.
    #[must_use]
    pub fn create_scope(&self) -> ServiceProvider {
        ServiceProvider {
            registrations: Arc::clone(&self.registrations),
            singletons: Arc::clone(&self.singletons),
            scoped: Arc::new(Mutex::new(HashMap::new())),
            is_root: false,
        }
    }

    /// Returns `true` for the root provider.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.is_root
    }

    /// Resolves a service.
    ///
    /// Returns `None` if the service is not registered or its factory fails.
    #[must_use]
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.resolve_required().ok()
    }

    /// Resolves a service or returns an error.
    ///
    /// # Errors
    ///
    /// Returns `InjectionError` if the service is not registered or its
    /// factory fails.
    pub fn resolve_required<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, InjectionError> {
        let descriptor = self
            .registrations
            .get(&TypeId::of::<T>())
            .ok_or_else(InjectionError::not_registered::<T>)?;

        self.resolve_descriptor(TypeId::of::<T>(), descriptor)?
            .downcast::<T>()
            .map_err(|_| InjectionError::custom::<T>("registered service has a different type"))
    }

    fn resolve_descriptor(
        &self,
        type_id: TypeId,
        descriptor: &ServiceDescriptor,
    ) -> Result<AnyService, InjectionError> {
        let factory = match &descriptor.source {
            ServiceSource::Instance(service) => return Ok(Arc::clone(service)),
            ServiceSource::Factory(factory) => factory,
        };

        let cache = match descriptor.lifetime {
            Lifetime::Transient => return factory(self),
            Lifetime::Singleton => &self.singletons,
            Lifetime::Scoped => &self.scoped,
        };

        if let Some(existing) = cache.lock().get(&type_id) {
            return Ok(Arc::clone(existing));
        }

        tracing::trace!(service = descriptor.type_name, "constructing service");
        let created = factory(self)?;
        Ok(Arc::clone(cache.lock().entry(type_id).or_insert(created)))
    }

    /// Checks if a service is registered.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.registrations.contains_key(&TypeId::of::<T>())
    }
}

impl Default for ServiceProvider {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("service_count", &self.registrations.len())
            .field("is_root", &self.is_root)
            .finish()
    }
}

/// A wrapper for injected dependencies.
///
/// `Inject<T>` resolves a dependency from the current scope when a handler or
/// middleware is constructed.
///
/// # Example
///
/// ```rust
/// use conqueror_core::di::{Inject, ServiceCollection};
/// use std::sync::Arc;
///
/// struct Clock;
///
/// let mut services = ServiceCollection::new();
/// services.add_singleton(Arc::new(Clock));
/// let provider = services.build_provider();
///
/// let clock: Inject<Clock> = Inject::from_provider(&provider).unwrap();
/// ```
#[derive(Clone)]
pub struct Inject<T>(pub Arc<T>);

impl<T> Inject<T> {
    /// Creates a new `Inject` wrapper.
    pub fn new(inner: Arc<T>) -> Self {
        Self(inner)
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &T {
        &self.0
    }

    /// Converts into the inner `Arc`.
    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

impl<T> std::ops::Deref for Inject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for Inject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Inject").field(&self.0).finish()
    }
}

impl<T: Send + Sync + 'static> Inject<T> {
    /// Resolves the service from a provider.
    ///
    /// # Errors
    ///
    /// Returns `InjectionError` if the service is not registered.
    pub fn from_provider(provider: &ServiceProvider) -> Result<Self, InjectionError> {
        provider.resolve_required::<T>().map(Inject)
    }
}
