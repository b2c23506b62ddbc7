//! Effective-permission cache
//!
//! A derived index over calculation results, never a source of truth. Each
//! result remembers the resource chain it was computed over, so a mutation at
//! resource R evicts R and every descendant. Membership changes evict the
//! user's results. Capacity is bounded with least-recently-used eviction.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use tracing::trace;

use crate::calc::EffectiveResult;
use crate::config::CacheConfig;
use crate::model::{PrincipalRef, ResourceRef};

type CacheKey = (PrincipalRef, ResourceRef);

struct Slot {
    result: EffectiveResult,
    chain: Vec<ResourceRef>,
}

struct Inner {
    slots: LruCache<CacheKey, Slot>,
    // Bumped on every invalidation; puts computed under an older generation are dropped
    generation: u64,
}

pub struct PermissionCache {
    enabled: bool,
    inner: Mutex<Inner>,
}

impl PermissionCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(cfg.capacity);
        PermissionCache {
            enabled: cfg.enabled && capacity.is_some(),
            inner: Mutex::new(Inner {
                slots: LruCache::new(capacity.unwrap_or(NonZeroUsize::MIN)),
                generation: 0,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, principal: &PrincipalRef, resource: &ResourceRef) -> Option<EffectiveResult> {
        if !self.enabled {
            return None;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.slots.get(&(*principal, *resource)).map(|s| s.result.clone())
    }

    /// Current generation; read it before calculating and hand it to [`put`](Self::put)
    pub fn generation(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).generation
    }

    pub fn put(
        &self,
        generation: u64,
        principal: PrincipalRef,
        resource: ResourceRef,
        result: EffectiveResult,
        chain: Vec<ResourceRef>,
    ) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.generation != generation {
            return;
        }
        inner.slots.put((principal, resource), Slot { result, chain });
    }

    /// Evict every result whose chain passes through `resource`
    pub fn invalidate_resource(&self, resource: &ResourceRef) {
        self.evict(|k, s| k.1 == *resource || s.chain.contains(resource));
    }

    /// Evict every result computed for `principal`
    pub fn invalidate_principal(&self, principal: &PrincipalRef) {
        self.evict(|k, _| k.0 == *principal);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.slots.clear();
        inner.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict<F: Fn(&CacheKey, &Slot) -> bool>(&self, doomed: F) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.generation += 1;
        let keys: Vec<CacheKey> = inner.slots.iter().filter(|&(k, s)| doomed(k, s)).map(|(k, _)| *k).collect();
        for k in &keys {
            inner.slots.pop(k);
        }
        trace!(evicted = keys.len(), "permission cache invalidated");
    }
}
