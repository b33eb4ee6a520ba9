// Service registry - dependency lookup by type
//
// Returns zero or more instances registered for a type, in registration order.
// Trait objects are registered through their `Arc<dyn Trait>` type.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId, type_name};

type Entry = Box<dyn Any + Send + Sync>;

/// Registry of capability instances keyed by type.
///
/// # Example
/// ```ignore
/// let registry = ServiceRegistry::new();
/// registry.register::<Arc<dyn ShellFactory>>(Arc::new(MainShellFactory));
/// let factories = registry.resolve_all::<Arc<dyn ShellFactory>>();
/// ```
#[derive(Default)]
pub struct ServiceRegistry {
    entries: RwLock<IndexMap<TypeId, Vec<Entry>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance of `T`. Later registrations come after earlier ones.
    pub fn register<T>(&self, value: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        tracing::debug!(capability = type_name::<T>(), "Registering capability");
        self.entries
            .write()
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Box::new(value));
    }

    /// Every instance registered for `T`, in registration order.
    pub fn resolve_all<T>(&self) -> Vec<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.entries
            .read()
            .get(&TypeId::of::<T>())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|value| value.downcast_ref::<T>().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The first instance registered for `T`.
    pub fn resolve<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.entries
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|values| values.first())
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    /// Number of instances registered for `T`.
    pub fn count<T>(&self) -> usize
    where
        T: Send + Sync + 'static,
    {
        self.entries
            .read()
            .get(&TypeId::of::<T>())
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Fixed(&'static str);

    impl Named for Fixed {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_resolve_all_preserves_order() {
        let registry = ServiceRegistry::new();
        registry.register::<Arc<dyn Named>>(Arc::new(Fixed("first")));
        registry.register::<Arc<dyn Named>>(Arc::new(Fixed("second")));
        registry.register::<Arc<dyn Named>>(Arc::new(Fixed("third")));

        let names: Vec<String> = registry
            .resolve_all::<Arc<dyn Named>>()
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(registry.count::<Arc<dyn Named>>(), 3);
    }

    #[test]
    fn test_unregistered_type_is_empty() {
        let registry = ServiceRegistry::new();
        assert!(registry.resolve_all::<Arc<dyn Named>>().is_empty());
        assert!(registry.resolve::<String>().is_none());
        assert_eq!(registry.count::<String>(), 0);
    }

    #[test]
    fn test_types_are_kept_apart() {
        let registry = ServiceRegistry::new();
        registry.register(42u32);
        registry.register("value".to_string());

        assert_eq!(registry.resolve::<u32>(), Some(42));
        assert_eq!(registry.resolve::<String>().as_deref(), Some("value"));
        assert!(registry.resolve::<u64>().is_none());
    }
}
