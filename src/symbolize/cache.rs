use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::PoisonError;
use std::sync::RwLock;

use crate::frame::CachedFrames;
use crate::log::trace;
use crate::Addr;


#[derive(Debug)]
struct Entry {
    frames: CachedFrames,
    /// The tick at which the entry was last used.
    last_use: AtomicU64,
}


/// A capacity bounded cache of symbolization results, keyed by raw
/// address.
///
/// Lookups only require shared access and can proceed concurrently.
/// Insertions require exclusive access and evict the least recently
/// used entry once the cache is full.
#[derive(Debug)]
pub struct SymbolCache {
    capacity: usize,
    entries: RwLock<HashMap<Addr, Entry>>,
    /// The source of usage ticks.
    tick: AtomicU64,
}

impl SymbolCache {
    /// Create a new cache holding up to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(HashMap::with_capacity(capacity)),
            tick: AtomicU64::new(0),
        }
    }

    #[inline]
    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Retrieve the frames cached for `addr`, marking them as recently
    /// used.
    pub fn lookup(&self, addr: Addr) -> Option<CachedFrames> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(&addr)?;
        let () = entry.last_use.store(self.next_tick(), Ordering::Relaxed);
        Some(entry.frames.clone())
    }

    /// Cache `frames` for `addr`, replacing any previous entry.
    pub fn insert(&self, addr: Addr, frames: CachedFrames) {
        if self.capacity == 0 || frames.is_empty() {
            return
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(&addr) && entries.len() >= self.capacity {
            let victim = entries
                .iter()
                .min_by_key(|(_addr, entry)| entry.last_use.load(Ordering::Relaxed))
                .map(|(addr, _entry)| *addr);
            if let Some(victim) = victim {
                trace!("evicting symbolization result for {victim:#x}");
                let _entry = entries.remove(&victim);
            }
        }

        let entry = Entry {
            frames,
            last_use: AtomicU64::new(self.next_tick()),
        };
        let _previous = entries.insert(addr, entry);
    }

    /// Retrieve the maximum number of cached entries.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retrieve the number of currently cached entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use crate::frame::SourceLocation;
    use crate::SymbolizedFrame;


    fn chain(addr: Addr, name: &'static str) -> CachedFrames {
        let location = SourceLocation {
            file: Some("lib.rs"),
            line: 7,
            main_file: None,
        };
        CachedFrames::new(&[SymbolizedFrame::from_static(addr, Some(name), location)])
    }


    /// Check that repeated lookups yield the same content.
    #[test]
    fn lookup_idempotent() {
        let cache = SymbolCache::new(4);
        assert!(cache.lookup(1).is_none());
        let () = cache.insert(1, chain(1, "one"));

        let first = cache.lookup(1).unwrap();
        let second = cache.lookup(1).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.as_slice()[0].name(), Some("one"));
        assert_eq!(first.as_slice()[0].name(), second.as_slice()[0].name());
        assert_eq!(
            first.as_slice()[0].location(),
            second.as_slice()[0].location()
        );
    }

    /// Check that the least recently used entry is evicted first.
    #[test]
    fn lru_eviction() {
        let cache = SymbolCache::new(2);
        let () = cache.insert(1, chain(1, "one"));
        let () = cache.insert(2, chain(2, "two"));
        // Use the first entry, making the second one the least
        // recently used.
        let _frames = cache.lookup(1).unwrap();

        let () = cache.insert(3, chain(3, "three"));
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(1).is_some());
        assert!(cache.lookup(2).is_none());
        assert!(cache.lookup(3).is_some());
    }

    /// Check that insertion order determines eviction in the absence
    /// of lookups.
    #[test]
    fn insertion_order_eviction() {
        let cache = SymbolCache::new(3);
        for addr in 1..=5 {
            let () = cache.insert(addr, chain(addr, "sym"));
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.lookup(1).is_none());
        assert!(cache.lookup(2).is_none());
        assert!(cache.lookup(5).is_some());
    }

    /// Check that replacing an entry does not evict any other.
    #[test]
    fn replace_entry() {
        let cache = SymbolCache::new(2);
        let () = cache.insert(1, chain(1, "one"));
        let () = cache.insert(2, chain(2, "two"));
        let () = cache.insert(2, chain(2, "deux"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(2).unwrap().as_slice()[0].name(), Some("deux"));
        assert!(cache.lookup(1).is_some());
    }

    /// Check that a zero capacity cache stores nothing.
    #[test]
    fn zero_capacity() {
        let cache = SymbolCache::new(0);
        let () = cache.insert(1, chain(1, "one"));
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 0);
        assert!(cache.lookup(1).is_none());
    }
}
