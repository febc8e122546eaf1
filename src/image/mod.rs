//! Program images and the caches used to share them.

pub(crate) mod cache;

use std::fmt::Debug;
use std::fs::File;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
#[cfg(feature = "dwarf")]
use std::sync::OnceLock;

#[cfg(feature = "dwarf")]
use crate::dwarf::DwarfInfo;
use crate::elf::ElfParser;
use crate::frame::LocationInfoMode;
use crate::frame::SourceLocation;
#[cfg(feature = "dwarf")]
use crate::log::debug;
use crate::mmap::Mmap;
use crate::Addr;
use crate::ErrorExt as _;
use crate::Result;


/// A shared handle to a program image.
pub type ImageHandle = Arc<dyn Image>;


/// A single inlined call, as reported by [`Image::find_location`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InlineFrame<'src> {
    /// The name of the inlined function.
    pub name: Option<&'src str>,
    /// The location inside the inlined function.
    pub location: SourceLocation<'src>,
}


/// Debug information access for a single program image.
///
/// All addresses are relative to the image, i.e., the load bias of
/// the module the image backs has already been subtracted.
pub trait Image: Debug + Send + Sync {
    /// The path of the file backing the image.
    fn path(&self) -> &Path;

    /// Check whether any section of the image covers `addr`.
    fn contains(&self, addr: Addr) -> bool;

    /// Find the name of the symbol covering `addr`.
    fn find_symbol(&self, addr: Addr) -> Option<&str>;

    /// Find the source location of `addr`.
    ///
    /// If `inline_frames` is non-empty and `mode` is
    /// [`LocationInfoMode::FullWithInline`], the chain of inlined calls
    /// at `addr` is reported in it (innermost first) and the location
    /// refers to the call site inside the non-inlined function.
    ///
    /// Returns the location and the number of inline frames reported.
    fn find_location<'slf>(
        &'slf self,
        addr: Addr,
        mode: LocationInfoMode,
        inline_frames: &mut [InlineFrame<'slf>],
    ) -> (SourceLocation<'slf>, usize);

    /// Load all debug information eagerly.
    ///
    /// Lookups of function addresses performed afterwards do not
    /// allocate memory.
    fn load_debug_info(&self) {}
}


/// An [`Image`] backed by an ELF file, with optional DWARF debug
/// information.
#[derive(Debug)]
pub struct ElfImage {
    path: PathBuf,
    /// The lazily loaded DWARF information.
    // SAFETY: This member references data owned by `parser` and has to
    //         be listed before it.
    #[cfg(feature = "dwarf")]
    dwarf: OnceLock<Option<DwarfInfo>>,
    parser: ElfParser,
}

impl ElfImage {
    /// Open the ELF file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Self::from_file(path, &file)
    }

    /// Create an `ElfImage` from an already opened file.
    pub(crate) fn from_file(path: &Path, file: &File) -> Result<Self> {
        let mmap = Mmap::map(file)
            .with_context(|| format!("failed to memory map {}", path.display()))?;
        let parser = ElfParser::from_mmap(mmap)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        let slf = Self {
            path: path.to_path_buf(),
            #[cfg(feature = "dwarf")]
            dwarf: OnceLock::new(),
            parser,
        };
        Ok(slf)
    }

    #[cfg(feature = "dwarf")]
    fn dwarf(&self) -> Option<&DwarfInfo> {
        self.dwarf
            .get_or_init(|| {
                // SAFETY: `self.dwarf` is dropped before `self.parser`.
                unsafe { DwarfInfo::from_parser(&self.parser) }.unwrap_or_else(|_err| {
                    debug!(
                        "failed to load DWARF information for {}: {_err:#}",
                        self.path.display()
                    );
                    None
                })
            })
            .as_ref()
    }
}

impl Image for ElfImage {
    fn path(&self) -> &Path {
        &self.path
    }

    fn contains(&self, addr: Addr) -> bool {
        self.parser.contains_addr(addr as u64)
    }

    fn find_symbol(&self, addr: Addr) -> Option<&str> {
        self.parser.find_sym(addr as u64).map(|(name, _addr)| name)
    }

    fn find_location<'slf>(
        &'slf self,
        addr: Addr,
        mode: LocationInfoMode,
        inline_frames: &mut [InlineFrame<'slf>],
    ) -> (SourceLocation<'slf>, usize) {
        if mode == LocationInfoMode::Disabled {
            return (SourceLocation::default(), 0)
        }

        #[cfg(feature = "dwarf")]
        {
            let inline_frames: &mut [InlineFrame<'slf>] =
                if mode == LocationInfoMode::FullWithInline {
                    inline_frames
                } else {
                    &mut []
                };

            match self.dwarf() {
                Some(dwarf) => dwarf.find_location(addr as u64, inline_frames),
                None => (SourceLocation::default(), 0),
            }
        }

        #[cfg(not(feature = "dwarf"))]
        {
            let _unused = (addr, inline_frames);
            (SourceLocation::default(), 0)
        }
    }

    fn load_debug_info(&self) {
        #[cfg(feature = "dwarf")]
        if let Some(dwarf) = self.dwarf() {
            let () = dwarf.preload(self.parser.function_addrs());
        }
    }
}
