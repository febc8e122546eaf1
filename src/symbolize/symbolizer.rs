use std::sync::Arc;

use crate::frame::CachedFrames;
use crate::frame::FrameArray;
use crate::frame::LocationInfoMode;
use crate::frame::SymbolizedFrame;
use crate::frame::MAX_INLINE_FRAMES;
use crate::image::cache::default_elf_cache;
use crate::image::cache::ElfCache;
use crate::image::cache::ImageCache;
use crate::image::ImageHandle;
use crate::image::InlineFrame;
use crate::log::debug;
use crate::log::trace;
use crate::modules::LinkMap;
use crate::modules::Module;
use crate::modules::ModuleSource;
use crate::Addr;

use super::cache::SymbolCache;


/// The bookkeeping of a single symbolization request.
struct Request<'frames> {
    frames: &'frames mut [SymbolizedFrame],
    /// The number of meaningful leading entries in `frames`.
    addr_count: usize,
    /// The number of frames still to be resolved.
    remaining: usize,
}


/// Symbolizer provides an interface for resolving addresses of the
/// running process into symbol names and source code locations.
///
/// Program images are retrieved through an [`ImageCache`] and the set
/// of loaded modules is determined by a [`ModuleSource`]. Optionally,
/// resolution results are memoized per address in a bounded cache.
#[derive(Debug)]
pub struct Symbolizer<C = Arc<ElfCache>, M = LinkMap> {
    cache: C,
    modules: M,
    mode: LocationInfoMode,
    symbol_cache: Option<SymbolCache>,
}

impl<C> Symbolizer<C, LinkMap>
where
    C: ImageCache,
{
    /// Create a new `Symbolizer` for the modules of the running
    /// process.
    ///
    /// A `symbol_cache_size` of zero disables result caching.
    pub fn new(cache: C, mode: LocationInfoMode, symbol_cache_size: usize) -> Self {
        Self::with_modules(cache, LinkMap, mode, symbol_cache_size)
    }
}

impl<C, M> Symbolizer<C, M>
where
    C: ImageCache,
    M: ModuleSource,
{
    /// Create a new `Symbolizer` using the provided source of module
    /// information.
    pub fn with_modules(
        cache: C,
        modules: M,
        mode: LocationInfoMode,
        symbol_cache_size: usize,
    ) -> Self {
        let symbol_cache = (symbol_cache_size > 0).then(|| SymbolCache::new(symbol_cache_size));
        Self {
            cache,
            modules,
            mode,
            symbol_cache,
        }
    }

    /// Retrieve the location information mode in use.
    #[inline]
    pub fn mode(&self) -> LocationInfoMode {
        self.mode
    }

    /// Retrieve the result cache, if caching is enabled.
    #[inline]
    pub fn symbol_cache(&self) -> Option<&SymbolCache> {
        self.symbol_cache.as_ref()
    }

    /// Resolve `addrs` into `frames`.
    ///
    /// `frames` has to provide space for at least one frame per
    /// address; excess addresses are ignored. Frames that are already
    /// marked as found are left untouched. Any capacity of `frames`
    /// beyond the number of addresses is used for reporting inlined
    /// calls: when [`LocationInfoMode::FullWithInline`] is in use, the
    /// frames of inlined calls precede the frame of the function they
    /// got inlined into, shifting all subsequent frames back.
    ///
    /// Returns the number of meaningful leading entries in `frames`.
    /// If module information is unavailable, no address is resolved.
    pub fn symbolize(&self, addrs: &[Addr], frames: &mut [SymbolizedFrame]) -> usize {
        let addr_count = addrs.len().min(frames.len());
        let mut remaining = 0;
        for (frame, addr) in frames.iter_mut().zip(addrs) {
            if !frame.found() {
                remaining += 1;
                let () = frame.clear();
                let () = frame.set_addr(*addr);
            }
        }

        if remaining == 0 {
            return addr_count
        }

        let mut request = Request {
            frames,
            addr_count,
            remaining,
        };
        let available = self.modules.visit(&mut |module| {
            let () = self.symbolize_module(module, &mut request);
            request.remaining > 0
        });
        if !available && !self.cache.is_signal_safe() {
            debug!("module information unavailable; not symbolizing");
        }

        request.addr_count
    }

    /// Resolve the captured addresses of `array` into its frames.
    pub fn symbolize_array<const N: usize>(&self, array: &mut FrameArray<N>) {
        let count = array.frame_count.min(N);
        let _count = self.symbolize(&array.addresses[..count], &mut array.frames[..count]);
    }

    fn symbolize_module(&self, module: &Module<'_>, request: &mut Request<'_>) {
        let image = match self.cache.get_image(module.path) {
            Some(image) => image,
            None => {
                if !self.cache.is_signal_safe() {
                    trace!("no image available for {}", module.path.display());
                }
                return
            }
        };

        let mut i = 0;
        while i < request.addr_count && request.remaining > 0 {
            let frame = &request.frames[i];
            if frame.found() {
                i += 1;
                continue
            }

            let addr = frame.addr();
            let cached = self
                .symbol_cache
                .as_ref()
                .and_then(|cache| cache.lookup(addr));
            if let Some(cached) = &cached {
                if let Some(len) = Self::splice_cached(cached, i, request) {
                    request.remaining -= 1;
                    i += len;
                    continue
                }
            }

            let adjusted = addr.wrapping_sub(module.load_bias);
            if !image.contains(adjusted) {
                i += 1;
                continue
            }

            let inlined = self.resolve(&image, adjusted, i, request);
            request.remaining -= 1;

            // Keep any cached chain that did not fit.
            if let (Some(cache), None) = (&self.symbol_cache, &cached) {
                let chain = &request.frames[i..=i + inlined];
                let () = cache.insert(addr, CachedFrames::new(chain));
            }
            i += inlined + 1;
        }
    }

    /// Copy the cached resolution `cached` into the frames at `idx`,
    /// provided there is enough spare capacity.
    ///
    /// Returns the number of frames written.
    fn splice_cached(
        cached: &CachedFrames,
        idx: usize,
        request: &mut Request<'_>,
    ) -> Option<usize> {
        let len = cached.len();
        let inlined = len.checked_sub(1)?;
        if inlined > request.frames.len() - request.addr_count {
            return None
        }

        let end = request.addr_count + inlined;
        let () = request.frames[idx + 1..end].rotate_right(inlined);
        let () = request.frames[idx..idx + len].clone_from_slice(cached.as_slice());
        request.addr_count = end;
        Some(len)
    }

    /// Resolve the image relative address `addr` into the frame at
    /// `idx`, inserting any inlined calls in front of it.
    ///
    /// Returns the number of inline frames inserted.
    fn resolve(
        &self,
        image: &ImageHandle,
        addr: Addr,
        idx: usize,
        request: &mut Request<'_>,
    ) -> usize {
        let frames = &mut *request.frames;
        let name = match image.find_symbol(addr) {
            Some(name) => name,
            None => {
                // The address is covered by the image, but no symbol
                // is known for it.
                let () = frames[idx].set(image, None, &Default::default());
                return 0
            }
        };

        let spare = frames.len() - request.addr_count;
        let max_inline = if self.mode == LocationInfoMode::FullWithInline {
            MAX_INLINE_FRAMES.min(spare)
        } else {
            0
        };

        let mut inline_frames = [InlineFrame::default(); MAX_INLINE_FRAMES];
        let (location, inlined) =
            image.find_location(addr, self.mode, &mut inline_frames[..max_inline]);
        let inlined = inlined.min(max_inline);
        let () = frames[idx].set(image, Some(name), &location);

        if inlined > 0 {
            let input_addr = frames[idx].addr();
            let start = request.addr_count;
            for (frame, inline) in frames[start..start + inlined]
                .iter_mut()
                .zip(&inline_frames[..inlined])
            {
                let () = frame.set_addr(input_addr);
                let () = frame.set(image, inline.name, &inline.location);
            }
            let () = frames[idx..start + inlined].rotate_right(inlined);
            request.addr_count += inlined;
        }
        inlined
    }
}

impl Default for Symbolizer {
    /// Create a `Symbolizer` using the process wide ELF cache and
    /// [`LocationInfoMode::Full`], without result caching.
    fn default() -> Self {
        Self::new(default_elf_cache(), LocationInfoMode::Full, 0)
    }
}
