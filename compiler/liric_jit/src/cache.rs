//! Process-wide materialization cache (spec §4.7): compiled code keyed
//! by `(target, backend, content_hash)` survives across sessions in the
//! same process, so recompiling an already-seen function (e.g. a shared
//! runtime helper fed by two independent `Compiler` handles) is a cache
//! hit instead of a re-lowering.
//!
//! Grounded on `liric_ir::hash::content_hash` for the key. The payload
//! is kept in [`crate::ResolvedPatch`] form (symbol *names*, not
//! `SymbolId`s) rather than the backend's raw `PatchEntry<SymbolId>`:
//! a `SymbolId` is only meaningful against the `Module` that minted
//! it, and this cache is process-wide, so a second session materializing
//! the same function from a different `Module` must not be handed
//! patch targets indexed into the first session's symbol arena. The
//! refcount and epoch fields exist so a session tearing down can drop
//! its share without evicting an entry a sibling session still depends
//! on.

use crate::ResolvedPatch;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CacheKey {
    pub target: String,
    pub backend: &'static str,
    pub content_hash: [u8; 32],
}

impl CacheKey {
    pub fn new(target: impl Into<String>, backend: &'static str, content_hash: [u8; 32]) -> Self {
        CacheKey {
            target: target.into(),
            backend,
            content_hash,
        }
    }
}

#[derive(Clone)]
pub struct CacheEntry {
    pub code: Vec<u8>,
    pub patches: Vec<ResolvedPatch>,
    pub frame_size: u32,
    /// Epoch the entry was inserted at; compared against [`bump_epoch`]'s
    /// counter so a global invalidation (e.g. a symbol redefinition that
    /// would otherwise make a cached call target stale) can be detected
    /// lazily on the next lookup rather than requiring a sweep.
    epoch: u64,
    refcount: usize,
}

#[derive(Default)]
struct Cache {
    entries: HashMap<CacheKey, CacheEntry>,
}

static CACHE: OnceLock<RwLock<Cache>> = OnceLock::new();
static EPOCH: AtomicU64 = AtomicU64::new(0);

fn cache() -> &'static RwLock<Cache> {
    CACHE.get_or_init(|| RwLock::new(Cache::default()))
}

/// Invalidates every entry inserted before this call. Existing JIT
/// sessions keep calling through their already-resolved addresses
/// (this cache only gates future compiles, it never rewrites live
/// code); a bumped epoch just means the next lookup for a given key
/// will miss and recompile.
pub fn bump_epoch() -> u64 {
    EPOCH.fetch_add(1, Ordering::SeqCst) + 1
}

pub fn current_epoch() -> u64 {
    EPOCH.load(Ordering::SeqCst)
}

/// Looks up `key`, bumping its refcount on hit (the caller now holds a
/// share and must call [`release`] on teardown).
pub fn lookup(key: &CacheKey) -> Option<CacheEntry> {
    let mut guard = cache().write().unwrap();
    let current = current_epoch();
    let entry = guard.entries.get_mut(key)?;
    if entry.epoch < current {
        return None;
    }
    entry.refcount += 1;
    Some(entry.clone())
}

/// Inserts a freshly compiled function at the current epoch with an
/// initial refcount of one (held by the caller).
pub fn insert(key: CacheKey, code: Vec<u8>, patches: Vec<ResolvedPatch>, frame_size: u32) {
    let mut guard = cache().write().unwrap();
    guard.entries.insert(
        key,
        CacheEntry {
            code,
            patches,
            frame_size,
            epoch: current_epoch(),
            refcount: 1,
        },
    );
}

/// Drops one share of `key`'s entry. Per spec §4.7 the cache never
/// evicts on refcount reaching zero — code already materialized stays
/// live for the rest of the process, since some other thread may still
/// be mid-call through it. The refcount is bookkeeping for diagnostics,
/// not a free-list trigger.
pub fn release(key: &CacheKey) {
    let mut guard = cache().write().unwrap();
    if let Some(entry) = guard.entries.get_mut(key) {
        entry.refcount = entry.refcount.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_round_trips_and_bumps_refcount() {
        let key = CacheKey::new("x86_64-unknown-linux-gnu", "isel", [7u8; 32]);
        insert(key.clone(), vec![0x90, 0xC3], Vec::new(), 16);
        let hit = lookup(&key).expect("should be cached");
        assert_eq!(hit.code, vec![0x90, 0xC3]);
        release(&key);
    }

    #[test]
    fn bumping_epoch_invalidates_prior_entries() {
        let key = CacheKey::new("aarch64-unknown-linux-gnu", "isel", [9u8; 32]);
        insert(key.clone(), vec![0x90, 0xC3], Vec::new(), 16);
        bump_epoch();
        assert!(lookup(&key).is_none());
    }
}
