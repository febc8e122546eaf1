use std::array;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::image::ImageHandle;
use crate::Addr;


/// The maximum number of inlined calls reported for a single address.
pub const MAX_INLINE_FRAMES: usize = 20;

/// The maximum number of frames captured by the stack trace reporters.
pub const MAX_STACK_TRACE_DEPTH: usize = 100;


/// The amount of source code location information to retrieve.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LocationInfoMode {
    /// Only retrieve symbol names.
    Disabled,
    /// Retrieve file and line of the non-inlined frame.
    ///
    /// Kept for compatibility; behaves like [`Full`][Self::Full].
    Fast,
    /// Retrieve file and line of the non-inlined frame.
    #[default]
    Full,
    /// Retrieve file and line as well as the chain of inlined calls.
    FullWithInline,
}


/// The location in source code that an address maps to.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SourceLocation<'src> {
    /// The source file, if known.
    pub file: Option<&'src str>,
    /// The line in `file`. Only meaningful if `file` is set.
    pub line: u32,
    /// For a location inside of inlined code, the file of the
    /// enclosing non-inlined function, if it differs from `file`.
    pub main_file: Option<&'src str>,
}

impl SourceLocation<'_> {
    /// Check whether file and line information are present.
    #[inline]
    pub fn has_file_and_line(&self) -> bool {
        self.file.is_some()
    }

    /// Check whether an enclosing file is present.
    #[inline]
    pub fn has_main_file(&self) -> bool {
        self.main_file.is_some()
    }
}


#[derive(Clone, Copy, Default)]
struct RawLocation {
    file: Option<NonNull<str>>,
    line: u32,
    main_file: Option<NonNull<str>>,
}

impl RawLocation {
    fn new(location: &SourceLocation<'_>) -> Self {
        Self {
            file: location.file.map(NonNull::from),
            line: location.line,
            main_file: location.main_file.map(NonNull::from),
        }
    }
}


/// The result of symbolizing a single address.
///
/// Names and paths are borrowed from the program image that the
/// address was resolved in. The frame keeps this image alive for as
/// long as it exists itself, but the data are only ever exposed with
/// lifetimes bound to the frame.
#[derive(Clone, Default)]
pub struct SymbolizedFrame {
    /// The address that the frame was resolved for.
    addr: Addr,
    /// Whether the address could be resolved.
    found: bool,
    /// The symbol name, if any.
    name: Option<NonNull<str>>,
    location: RawLocation,
    /// The image owning the data referenced by `name` and `location`.
    image: Option<ImageHandle>,
}

// SAFETY: The string references are immutable and the data they
//         reference is owned by `image` (which is `Send` and `Sync`)
//         or `'static`.
unsafe impl Send for SymbolizedFrame {}
// SAFETY: See above.
unsafe impl Sync for SymbolizedFrame {}

impl SymbolizedFrame {
    /// Create an unresolved frame for `addr`.
    #[inline]
    pub fn new(addr: Addr) -> Self {
        Self {
            addr,
            ..Default::default()
        }
    }

    /// Create a resolved frame whose name and location refer to static
    /// data.
    pub fn from_static(
        addr: Addr,
        name: Option<&'static str>,
        location: SourceLocation<'static>,
    ) -> Self {
        Self {
            addr,
            found: true,
            name: name.map(NonNull::from),
            location: RawLocation::new(&location),
            image: None,
        }
    }

    /// Mark the frame as resolved, with data borrowed from `image`.
    ///
    /// `name` and `location` have to reference data owned by `image`.
    pub(crate) fn set(
        &mut self,
        image: &ImageHandle,
        name: Option<&str>,
        location: &SourceLocation<'_>,
    ) {
        self.found = true;
        self.name = name.map(NonNull::from);
        self.location = RawLocation::new(location);
        self.image = Some(Arc::clone(image));
    }

    /// Reset the frame into its unresolved state, keeping the address.
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::new(self.addr)
    }

    #[inline]
    pub(crate) fn set_addr(&mut self, addr: Addr) {
        self.addr = addr
    }

    /// Retrieve the address that this frame was resolved for.
    #[inline]
    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// Check whether the address could be resolved.
    #[inline]
    pub fn found(&self) -> bool {
        self.found
    }

    /// Retrieve the symbol name, if the frame was resolved and a name
    /// is known.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        if !self.found {
            return None
        }
        // SAFETY: The name references data owned by `self.image` or
        //         static data.
        self.name.map(|name| unsafe { name.as_ref() })
    }

    /// Retrieve the source code location.
    ///
    /// The location is empty for unresolved frames.
    #[inline]
    pub fn location(&self) -> SourceLocation<'_> {
        if !self.found {
            return SourceLocation::default()
        }
        // SAFETY: The strings reference data owned by `self.image` or
        //         static data.
        unsafe {
            SourceLocation {
                file: self.location.file.map(|file| file.as_ref()),
                line: self.location.line,
                main_file: self.location.main_file.map(|file| file.as_ref()),
            }
        }
    }

    /// Retrieve the image the frame was resolved in, if any.
    #[inline]
    pub fn image(&self) -> Option<&ImageHandle> {
        self.image.as_ref()
    }
}

impl Debug for SymbolizedFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut s = f.debug_struct("SymbolizedFrame");
        let _s = s.field("addr", &format_args!("{:#x}", self.addr));
        if self.found {
            let _s = s
                .field("name", &self.name())
                .field("location", &self.location());
        } else {
            let _s = s.field("found", &false);
        }
        s.finish()
    }
}


/// A fixed capacity array of frames, holding a full resolution of a
/// single address: the non-inlined frame preceded by up to
/// [`MAX_INLINE_FRAMES`] inlined ones.
#[derive(Clone, Debug)]
pub struct CachedFrames {
    frames: [SymbolizedFrame; MAX_INLINE_FRAMES + 1],
    len: usize,
}

impl CachedFrames {
    /// Copy up to `MAX_INLINE_FRAMES + 1` frames from `frames`.
    pub fn new(frames: &[SymbolizedFrame]) -> Self {
        let mut slf = Self::default();
        let len = frames.len().min(slf.frames.len());
        let () = slf.frames[..len].clone_from_slice(&frames[..len]);
        slf.len = len;
        slf
    }

    /// Retrieve the cached frames.
    #[inline]
    pub fn as_slice(&self) -> &[SymbolizedFrame] {
        &self.frames[..self.len]
    }

    /// Retrieve the number of cached frames.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the chain is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for CachedFrames {
    fn default() -> Self {
        Self {
            frames: array::from_fn(|_| SymbolizedFrame::default()),
            len: 0,
        }
    }
}


/// A fixed capacity array of addresses and the frames they resolve
/// to.
#[derive(Debug)]
pub struct FrameArray<const N: usize> {
    /// The number of valid entries in `addresses` and `frames`.
    pub frame_count: usize,
    /// The captured addresses.
    pub addresses: [Addr; N],
    /// The symbolized frames.
    pub frames: [SymbolizedFrame; N],
}

impl<const N: usize> FrameArray<N> {
    /// Create a new, empty `FrameArray`.
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            addresses: [0; N],
            frames: array::from_fn(|_| SymbolizedFrame::default()),
        }
    }

    /// Retrieve the captured addresses.
    #[inline]
    pub fn addresses(&self) -> &[Addr] {
        &self.addresses[..self.frame_count]
    }

    /// Retrieve the symbolized frames.
    #[inline]
    pub fn frames(&self) -> &[SymbolizedFrame] {
        &self.frames[..self.frame_count]
    }
}

impl<const N: usize> Default for FrameArray<N> {
    fn default() -> Self {
        Self::new()
    }
}
