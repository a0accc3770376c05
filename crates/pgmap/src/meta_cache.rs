//! Process-wide registry of column collections keyed by type identity.

use crate::column::generate_columns;
use crate::column_collection::ColumnCollection;
use crate::mapped::DatabaseMapped;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, OnceLock, PoisonError, RwLock};

type Slot = Arc<OnceLock<Arc<ColumnCollection>>>;

/// Maps a type identity key to its column collection.
///
/// Hits are served under the read lock. A miss takes the write lock only long
/// enough to insert the key's slot; the collection itself is built through the
/// slot's `OnceLock`, so concurrent first use of one key constructs exactly one
/// collection and every caller observes the same `Arc`.
#[derive(Default)]
pub struct MetadataCache {
    slots: RwLock<HashMap<String, Slot>>,
}

static METADATA_CACHE: LazyLock<MetadataCache> = LazyLock::new(MetadataCache::new);

/// The process-wide metadata cache.
pub fn metadata_cache() -> &'static MetadataCache {
    &METADATA_CACHE
}

/// Column collection of `T` from the process-wide cache.
pub fn columns<T: DatabaseMapped>() -> Arc<ColumnCollection> {
    metadata_cache().resolve::<T>()
}

/// Identity key of `T`: its type name, qualified by its cache key or table name.
pub fn cache_key<T: DatabaseMapped>() -> String {
    let type_name = std::any::type_name::<T>();
    match T::column_meta_cache_key() {
        Some(key) => format!("{type_name}_{key}"),
        None => format!("{type_name}_{}", T::table_name()),
    }
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve<T: DatabaseMapped>(&self) -> Arc<ColumnCollection> {
        self.resolve_with(&cache_key::<T>(), || {
            ColumnCollection::from_columns(generate_columns(T::table_name(), None, &T::field_specs()))
        })
    }

    /// Look up `key`, building its collection with `build` on first use.
    pub fn resolve_with(
        &self,
        key: &str,
        build: impl FnOnce() -> ColumnCollection,
    ) -> Arc<ColumnCollection> {
        let slot = self.slot(key);
        Arc::clone(slot.get_or_init(|| Arc::new(build())))
    }

    fn slot(&self, key: &str) -> Slot {
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = slots.get(key) {
                return Arc::clone(slot);
            }
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|slot| slot.get().is_some())
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{User, Widget};
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cache_key_is_qualified_by_table_name() {
        let key = cache_key::<User>();
        assert!(key.ends_with("::User_users"), "{key}");
    }

    #[test]
    fn resolve_returns_the_same_instance() {
        let cache = MetadataCache::new();
        let a = cache.resolve::<Widget>();
        let b = cache.resolve::<Widget>();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&cache_key::<Widget>()));
    }

    #[test]
    fn concurrent_first_use_builds_once() {
        const THREADS: usize = 16;

        let cache = MetadataCache::new();
        let builds = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        let resolved: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache.resolve_with("race", || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            ColumnCollection::from_columns(generate_columns(
                                User::table_name(),
                                None,
                                &User::field_specs(),
                            ))
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(resolved.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(resolved[0].len(), 2);
    }

    #[test]
    fn inline_columns_inherit_the_root_table() {
        let cols = MetadataCache::new().resolve::<Widget>();
        assert!(cols.iter().all(|c| c.table_name == "widgets"));
    }
}
