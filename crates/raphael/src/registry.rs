//! Per-type manager cache.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// One cached value per Rust type, created on first request.
#[derive(Debug, Default)]
pub struct ManagerRegistry {
    entries: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached `T`, building it with `init` if this is the first request.
    ///
    /// Concurrent first requests may both run `init`; only one result is kept
    /// and every caller receives that one.
    pub fn get_or_insert_with<T, F>(&self, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get::<T>() {
            return existing;
        }
        let fresh = Arc::new(init());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| Arc::clone(entry).downcast::<T>().ok())
        {
            return existing;
        }
        let erased: Arc<dyn Any + Send + Sync> = Arc::clone(&fresh) as _;
        entries.insert(TypeId::of::<T>(), erased);
        fresh
    }

    /// The cached `T`, if one was created.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| Arc::clone(entry).downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Counter(usize);

    #[test]
    fn test_same_instance_per_type() {
        let registry = ManagerRegistry::new();
        let built = AtomicUsize::new(0);
        let first = registry.get_or_insert_with(|| Counter(built.fetch_add(1, Ordering::SeqCst)));
        let second = registry.get_or_insert_with(|| Counter(built.fetch_add(1, Ordering::SeqCst)));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_types_are_separate() {
        let registry = ManagerRegistry::new();
        registry.get_or_insert_with(|| Counter(1));
        registry.get_or_insert_with(|| String::from("other"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get::<Counter>().map(|c| c.0), Some(1));
        assert!(registry.get::<u8>().is_none());
    }
}
