use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs::File;
use std::os::unix::io::AsRawFd as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::RwLock;

use crate::log::debug;
use crate::log::trace;
use crate::modules::ModuleSource;
use crate::util::fstat;

use super::ElfImage;
use super::Image as _;
use super::ImageHandle;


/// The capacity of the process wide default [`ElfCache`].
pub const DEFAULT_ELF_CACHE_CAPACITY: usize = 500;

/// The capacity of a [`SignalSafeElfCache`] created with
/// [`SignalSafeElfCache::new`].
pub const DEFAULT_SIGNAL_SAFE_CAPACITY: usize = 500;


/// A cache of program images, keyed by path.
pub trait ImageCache: Debug {
    /// Retrieve the image for the file at `path`, opening it if it is
    /// not cached yet.
    ///
    /// Returns `None` if the file cannot be opened or parsed.
    fn get_image(&self, path: &Path) -> Option<ImageHandle>;

    /// Check whether the cache is meant to be used from within signal
    /// handlers.
    ///
    /// Users of such a cache emit no diagnostics.
    fn is_signal_safe(&self) -> bool {
        false
    }
}

impl<T> ImageCache for &T
where
    T: ImageCache + ?Sized,
{
    #[inline]
    fn get_image(&self, path: &Path) -> Option<ImageHandle> {
        (**self).get_image(path)
    }

    #[inline]
    fn is_signal_safe(&self) -> bool {
        (**self).is_signal_safe()
    }
}

impl<T> ImageCache for Arc<T>
where
    T: ImageCache + ?Sized,
{
    #[inline]
    fn get_image(&self, path: &Path) -> Option<ImageHandle> {
        (**self).get_image(path)
    }

    #[inline]
    fn is_signal_safe(&self) -> bool {
        (**self).is_signal_safe()
    }
}


/// The identity of a file on disk, used to detect replaced files.
#[derive(Debug, Eq, PartialEq)]
struct FileStat {
    dev: libc::dev_t,
    inode: libc::ino_t,
    size: libc::off_t,
    mtime_sec: libc::time_t,
    mtime_nsec: i64,
}

impl FileStat {
    fn new(stat: &libc::stat) -> Self {
        Self {
            dev: stat.st_dev,
            inode: stat.st_ino,
            size: stat.st_size,
            mtime_sec: stat.st_mtime,
            mtime_nsec: stat.st_mtime_nsec,
        }
    }
}


#[derive(Debug)]
struct ElfCacheEntry {
    stat: FileStat,
    image: ImageHandle,
    /// The tick at which the entry was last used.
    last_use: AtomicU64,
}


/// A thread-safe, capacity bounded cache of ELF images.
///
/// Entries are validated against the identity of the file on disk
/// on every lookup. Once the cache is full, the least recently used
/// entry that is not referenced outside of the cache is evicted. If
/// all entries are still referenced, newly opened images are handed
/// out without being cached.
#[derive(Debug)]
pub struct ElfCache {
    capacity: usize,
    entries: RwLock<HashMap<PathBuf, ElfCacheEntry>>,
    /// The source of usage ticks.
    tick: AtomicU64,
}

impl ElfCache {
    /// Create a new cache holding up to `capacity` images.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(HashMap::with_capacity(capacity.min(1024))),
            tick: AtomicU64::new(0),
        }
    }

    /// Retrieve the maximum number of cached images.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retrieve the number of currently cached images.
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

    #[inline]
    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up a valid entry for `path` and mark it as used.
    fn lookup(
        &self,
        entries: &HashMap<PathBuf, ElfCacheEntry>,
        path: &Path,
        stat: &FileStat,
    ) -> Option<ImageHandle> {
        let entry = entries.get(path)?;
        if entry.stat != *stat {
            return None
        }
        let () = entry.last_use.store(self.next_tick(), Ordering::Relaxed);
        Some(Arc::clone(&entry.image))
    }

    /// Evict the least recently used entry that is not referenced from
    /// elsewhere.
    ///
    /// Returns `false` if no entry could be evicted.
    fn evict(entries: &mut HashMap<PathBuf, ElfCacheEntry>) -> bool {
        let victim = entries
            .iter()
            .filter(|(_path, entry)| Arc::strong_count(&entry.image) == 1)
            .min_by_key(|(_path, entry)| entry.last_use.load(Ordering::Relaxed))
            .map(|(path, _entry)| path.clone());

        if let Some(path) = victim {
            trace!("evicting ELF image {}", path.display());
            let _entry = entries.remove(&path);
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    fn contains(&self, path: &Path) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }
}

impl ImageCache for ElfCache {
    fn get_image(&self, path: &Path) -> Option<ImageHandle> {
        let file = File::open(path)
            .map_err(|_err| debug!("failed to open {}: {_err}", path.display()))
            .ok()?;
        let stat = fstat(file.as_raw_fd())
            .map_err(|_err| debug!("failed to stat {}: {_err}", path.display()))
            .ok()?;
        let stat = FileStat::new(&stat);

        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(image) = self.lookup(&entries, path, &stat) {
                return Some(image)
            }
        }

        let image = ElfImage::from_file(path, &file)
            .map_err(|_err| debug!("failed to open ELF image: {_err:#}"))
            .ok()?;
        let image = Arc::new(image) as ImageHandle;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have opened the same file in the meantime.
        if let Some(image) = self.lookup(&entries, path, &stat) {
            return Some(image)
        }
        // Any entry still present for the path is stale.
        let _stale = entries.remove(path);

        if entries.len() >= self.capacity && !Self::evict(&mut entries) {
            return Some(image)
        }

        let entry = ElfCacheEntry {
            stat,
            image: Arc::clone(&image),
            last_use: AtomicU64::new(self.next_tick()),
        };
        let _previous = entries.insert(path.to_path_buf(), entry);
        Some(image)
    }
}


/// Retrieve the process wide default [`ElfCache`].
///
/// The cache holds up to [`DEFAULT_ELF_CACHE_CAPACITY`] images and is
/// never torn down.
pub fn default_elf_cache() -> Arc<ElfCache> {
    static CACHE: OnceLock<Arc<ElfCache>> = OnceLock::new();

    let cache = CACHE.get_or_init(|| Arc::new(ElfCache::new(DEFAULT_ELF_CACHE_CAPACITY)));
    Arc::clone(cache)
}


#[derive(Debug)]
struct Slot {
    image: ImageHandle,
    last_use: u64,
}


/// An ELF image cache for use from within signal handlers.
///
/// The cache performs no locking whatsoever and cannot be shared
/// between threads. Its slot storage is allocated up front, so that
/// caching an image never grows it. Cached images are not validated
/// against the file system.
///
/// Opening an image allocates memory. To keep lookups from within a
/// signal handler free of allocations, images of all loaded modules
/// have to be opened ahead of time using [`preload`][Self::preload].
#[derive(Debug)]
pub struct SignalSafeElfCache {
    slots: RefCell<Vec<Slot>>,
    capacity: usize,
    tick: Cell<u64>,
    /// Set once the cached images were fixed by `preload`.
    sealed: Cell<bool>,
}

impl SignalSafeElfCache {
    /// Create a new cache holding up to
    /// [`DEFAULT_SIGNAL_SAFE_CAPACITY`] images.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SIGNAL_SAFE_CAPACITY)
    }

    /// Create a new cache holding up to `capacity` images.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: RefCell::new(Vec::with_capacity(capacity)),
            capacity,
            tick: Cell::new(0),
            sealed: Cell::new(false),
        }
    }

    /// Open the images of all modules reported by `modules` and load
    /// their debug information.
    ///
    /// Afterwards the set of cached images is fixed: lookups of any
    /// other file, e.g., of a module loaded later on, report no image.
    /// Lookups hence neither allocate memory nor access the file
    /// system. Modules beyond the capacity of the cache are skipped.
    pub fn preload<M>(&self, modules: M)
    where
        M: ModuleSource,
    {
        let mut slots = self.slots.borrow_mut();
        let _available = modules.visit(&mut |module| {
            if slots.iter().any(|slot| slot.image.path() == module.path) {
                return true
            }
            if slots.len() >= self.capacity {
                return false
            }

            match ElfImage::open(module.path) {
                Ok(image) => {
                    let () = image.load_debug_info();
                    let slot = Slot {
                        image: Arc::new(image) as ImageHandle,
                        last_use: self.next_tick(),
                    };
                    let () = slots.push(slot);
                }
                Err(_err) => debug!("failed to preload {}: {_err:#}", module.path.display()),
            }
            true
        });
        let () = self.sealed.set(true);
    }

    /// Retrieve the number of currently cached images.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Check whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_tick(&self) -> u64 {
        let tick = self.tick.get() + 1;
        let () = self.tick.set(tick);
        tick
    }
}

impl Default for SignalSafeElfCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCache for SignalSafeElfCache {
    fn get_image(&self, path: &Path) -> Option<ImageHandle> {
        let mut slots = self.slots.borrow_mut();
        if let Some(slot) = slots.iter_mut().find(|slot| slot.image.path() == path) {
            slot.last_use = self.next_tick();
            return Some(Arc::clone(&slot.image))
        }

        if self.sealed.get() {
            return None
        }

        let image = Arc::new(ElfImage::open(path).ok()?) as ImageHandle;
        let slot = Slot {
            image: Arc::clone(&image),
            last_use: self.next_tick(),
        };

        if slots.len() < self.capacity {
            let () = slots.push(slot);
        } else if let Some(victim) = slots
            .iter_mut()
            .filter(|slot| Arc::strong_count(&slot.image) == 1)
            .min_by_key(|slot| slot.last_use)
        {
            *victim = slot;
        }
        Some(image)
    }

    #[inline]
    fn is_signal_safe(&self) -> bool {
        true
    }
}
