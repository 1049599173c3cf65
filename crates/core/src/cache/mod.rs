//! Time-bounded cache of the per-category data the estimate pipeline reads on
//! every submission: match candidates, the alias index and the active list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::domain::alias::AliasIndex;
use crate::domain::device::CategoryId;
use crate::domain::price_list::PriceList;
use crate::matcher::MatchCandidate;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Clone, Debug)]
pub struct CatalogSnapshot {
    pub candidates: Vec<MatchCandidate>,
    pub aliases: AliasIndex,
    pub price_list: PriceList,
}

struct CachedSnapshot {
    snapshot: Arc<CatalogSnapshot>,
    loaded_at: Instant,
}

/// Explicit replacement for a process-wide catalog cache. Writers that change
/// devices, aliases or prices call [`CatalogCache::invalidate`].
///
/// Every invalidation bumps a generation counter. A reader captures
/// [`CatalogCache::generation`] before it loads from storage and hands it back
/// to [`CatalogCache::insert`]; a snapshot loaded across an invalidation is
/// returned to its caller but never stored.
pub struct CatalogCache<C = SystemClock> {
    ttl: Duration,
    clock: C,
    generation: AtomicU64,
    entries: RwLock<HashMap<CategoryId, CachedSnapshot>>,
}

impl CatalogCache<SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<C: Clock> CatalogCache<C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self { ttl, clock, generation: AtomicU64::new(0), entries: RwLock::new(HashMap::new()) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, category: &CategoryId) -> Option<Arc<CatalogSnapshot>> {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cached = entries.get(category)?;
        let age = self.clock.now().saturating_duration_since(cached.loaded_at);
        (age < self.ttl).then(|| Arc::clone(&cached.snapshot))
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Stores `snapshot` only when no invalidation happened since `loaded_at_generation`
    /// was read. The snapshot is returned either way.
    pub fn insert(
        &self,
        category: CategoryId,
        snapshot: CatalogSnapshot,
        loaded_at_generation: u64,
    ) -> Arc<CatalogSnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut entries = self.write_entries();
        if self.generation.load(Ordering::Acquire) == loaded_at_generation {
            entries.insert(
                category,
                CachedSnapshot { snapshot: Arc::clone(&snapshot), loaded_at: self.clock.now() },
            );
        }
        snapshot
    }

    pub fn invalidate(&self) {
        let mut entries = self.write_entries();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    pub fn invalidate_category(&self, category: &CategoryId) {
        let mut entries = self.write_entries();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.remove(category);
    }

    // Bumps and the generation check both happen under the write lock.
    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<CategoryId, CachedSnapshot>> {
        match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use chrono::{NaiveDate, Utc};

    use super::{CatalogCache, CatalogSnapshot, Clock};
    use crate::domain::alias::AliasIndex;
    use crate::domain::device::CategoryId;
    use crate::domain::price_list::{PriceList, PriceListId};

    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<Instant>>);

    impl ManualClock {
        fn advance(&self, by: Duration) {
            if let Ok(mut now) = self.0.lock() {
                *now += by;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.0.lock().map(|now| *now).unwrap_or_else(|_| Instant::now())
        }
    }

    fn snapshot() -> CatalogSnapshot {
        let now = Utc::now();
        CatalogSnapshot {
            candidates: Vec::new(),
            aliases: AliasIndex::default(),
            price_list: PriceList {
                id: PriceListId("phones".to_string()),
                name: "Phones".to_string(),
                category: CategoryId("phones".to_string()),
                effective_date: NaiveDate::from_ymd_opt(2026, 10, 1).expect("valid date"),
                currency: "USD".to_string(),
                prices: Default::default(),
                created_at: now,
                updated_at: now,
            },
        }
    }

    #[test]
    fn entries_expire_after_ttl() {
        let clock = ManualClock(Arc::new(Mutex::new(Instant::now())));
        let cache = CatalogCache::with_clock(Duration::from_secs(60), clock.clone());
        let phones = CategoryId("phones".to_string());

        cache.insert(phones.clone(), snapshot(), cache.generation());
        clock.advance(Duration::from_secs(59));
        assert!(cache.get(&phones).is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get(&phones).is_none());
    }

    #[test]
    fn invalidate_drops_every_category() {
        let cache = CatalogCache::new(Duration::from_secs(300));
        let phones = CategoryId("phones".to_string());
        let tablets = CategoryId("tablets".to_string());
        cache.insert(phones.clone(), snapshot(), cache.generation());
        cache.insert(tablets.clone(), snapshot(), cache.generation());

        cache.invalidate_category(&tablets);
        assert!(cache.get(&tablets).is_none());
        assert!(cache.get(&phones).is_some());

        cache.invalidate();
        assert!(cache.get(&phones).is_none());
    }

    #[test]
    fn snapshot_loaded_across_an_invalidation_is_not_stored() {
        let cache = CatalogCache::new(Duration::from_secs(300));
        let phones = CategoryId("phones".to_string());

        let before_load = cache.generation();
        cache.invalidate_category(&phones);
        let returned = cache.insert(phones.clone(), snapshot(), before_load);
        assert_eq!(returned.price_list.id, PriceListId("phones".to_string()));
        assert!(cache.get(&phones).is_none());

        let reloaded_at = cache.generation();
        assert!(reloaded_at > before_load);
        cache.insert(phones.clone(), snapshot(), reloaded_at);
        assert!(cache.get(&phones).is_some());
    }
}
