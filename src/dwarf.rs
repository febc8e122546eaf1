use std::borrow::Cow;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::mem;
use std::str;
use std::sync::Mutex;
use std::sync::PoisonError;

use addr2line::Context;
use gimli::Dwarf;
use gimli::EndianSlice;
use gimli::SectionId;

use crate::elf::ElfParser;
use crate::frame::SourceLocation;
use crate::image::InlineFrame;
use crate::ErrorExt as _;
use crate::Result;


#[cfg(target_endian = "little")]
type Endianess = gimli::LittleEndian;
#[cfg(target_endian = "big")]
type Endianess = gimli::BigEndian;

/// The gimli reader type we currently use.
type R<'dat> = EndianSlice<'dat, Endianess>;


/// Extend the lifetime of a string owned by the DWARF context.
///
/// # Safety
/// The string must be owned by an object that lives for at least `'slf`
/// and is never moved or mutated.
unsafe fn extend<'slf>(s: &str) -> &'slf str {
    unsafe { &*(s as *const str) }
}


/// One frame of a chain of (possibly inlined) calls, as reported by
/// the DWARF context.
#[derive(Clone, Copy, Debug, Default)]
struct RawFrame<'slf> {
    name: Option<&'slf str>,
    file: Option<&'slf str>,
    line: u32,
}


/// Source code location information for a single ELF object, backed
/// by its DWARF debug information.
pub(crate) struct DwarfInfo {
    /// The lazily parsed DWARF context.
    // SAFETY: We must not hand out references with a 'static lifetime to
    //         this member. Rather, they should never outlive `self`.
    //         Furthermore, this member has to be listed before
    //         `_sections` to make sure we never end up with a dangling
    //         reference.
    context: Mutex<Context<R<'static>>>,
    /// Buffers of decompressed sections referenced by `context`.
    _sections: Vec<Box<[u8]>>,
}

impl DwarfInfo {
    /// Load DWARF information from the provided ELF file.
    ///
    /// Returns `None` if the file does not contain any debug
    /// information.
    ///
    /// # Safety
    /// The referenced `parser` has to outlive the returned object.
    pub unsafe fn from_parser(parser: &ElfParser) -> Result<Option<Self>> {
        if parser.find_section(".debug_info").is_none() {
            return Ok(None)
        }

        let mut sections = Vec::new();
        let mut load_section = |id: SectionId| -> Result<R<'static>> {
            let data = match parser.section_data_by_name(id.name())? {
                Some(data) => data,
                // Make sure to return empty data if a section does not exist.
                None => Cow::Borrowed(&[][..]),
            };

            let data = match data {
                Cow::Borrowed(data) => {
                    // SAFETY: The caller guarantees that `parser` outlives
                    //         `Self` and its mapping hence the context.
                    unsafe { mem::transmute::<&[u8], &'static [u8]>(data) }
                }
                Cow::Owned(data) => {
                    let data = data.into_boxed_slice();
                    // SAFETY: The heap allocation of `data` does not move
                    //         when the box is moved into `sections`,
                    //         which in turn is owned by `Self`.
                    let slice = unsafe { mem::transmute::<&[u8], &'static [u8]>(&*data) };
                    let () = sections.push(data);
                    slice
                }
            };
            Ok(EndianSlice::new(data, Endianess::default()))
        };

        let dwarf = Dwarf::load(&mut load_section)?;
        let context = Context::from_dwarf(dwarf).context("failed to create DWARF context")?;
        let slf = Self {
            context: Mutex::new(context),
            _sections: sections,
        };
        Ok(Some(slf))
    }

    /// Walk the chain of frames for `addr`, innermost first, invoking
    /// `f` for each of them.
    ///
    /// Returns the number of frames visited.
    fn walk_frames<'slf, F>(&'slf self, addr: u64, mut f: F) -> usize
    where
        F: FnMut(usize, RawFrame<'slf>),
    {
        let context = self.context.lock().unwrap_or_else(PoisonError::into_inner);
        let mut frames = match context.find_frames(addr).skip_all_loads() {
            Ok(frames) => frames,
            Err(_err) => return 0,
        };

        let mut count = 0;
        while let Ok(Some(frame)) = frames.next() {
            let name = frame
                .function
                .as_ref()
                .and_then(|function| str::from_utf8(function.name.slice()).ok());
            let location = frame.location.as_ref();
            let file = location.and_then(|location| location.file);
            let line = location.and_then(|location| location.line).unwrap_or(0);

            // SAFETY: Function names reference section data owned by
            //         `self`. File names are owned by the context, which
            //         populates them once and never frees them before
            //         being dropped itself.
            let raw = RawFrame {
                name: name.map(|name| unsafe { extend(name) }),
                file: file.map(|file| unsafe { extend(file) }),
                line,
            };
            let () = f(count, raw);
            count += 1;
        }
        count
    }

    /// Parse the debug information covering each of `addrs` ahead of
    /// time.
    ///
    /// Units, functions and line programs are parsed lazily on first
    /// lookup, which allocates memory. Once preloaded, lookups of
    /// addresses inside the functions starting at `addrs` no longer
    /// allocate.
    pub fn preload<I>(&self, addrs: I)
    where
        I: IntoIterator<Item = u64>,
    {
        for addr in addrs {
            let _count = self.walk_frames(addr, |_idx, _frame| ());
        }
    }

    /// Find the source location of `addr`.
    ///
    /// The returned location is that of the innermost (possibly
    /// inlined) code covering `addr`. If `inline_frames` is non-empty,
    /// the location instead refers to the call site within the
    /// non-inlined function and the chain of inlined calls is reported
    /// in `inline_frames`, innermost first. If the chain is longer than
    /// `inline_frames`, the outermost inlined calls are kept.
    ///
    /// Returns the location and the number of inline frames reported.
    pub fn find_location<'slf>(
        &'slf self,
        addr: u64,
        inline_frames: &mut [InlineFrame<'slf>],
    ) -> (SourceLocation<'slf>, usize) {
        let mut innermost = RawFrame::default();
        let mut physical = RawFrame::default();
        let count = self.walk_frames(addr, |idx, frame| {
            if idx == 0 {
                innermost = frame;
            }
            physical = frame;
        });

        if count == 0 {
            return (SourceLocation::default(), 0)
        }

        let main_file = |file: Option<&'slf str>| match (file, physical.file) {
            (Some(file), Some(main)) if file != main => Some(main),
            _ => None,
        };

        if inline_frames.is_empty() {
            let location = SourceLocation {
                file: innermost.file,
                line: innermost.line,
                main_file: main_file(innermost.file),
            };
            return (location, 0)
        }

        let inlined = count - 1;
        let reported = inlined.min(inline_frames.len());
        let skip = inlined - reported;
        let _count = self.walk_frames(addr, |idx, frame| {
            if idx >= skip && idx < inlined {
                inline_frames[idx - skip] = InlineFrame {
                    name: frame.name,
                    location: SourceLocation {
                        file: frame.file,
                        line: frame.line,
                        main_file: main_file(frame.file),
                    },
                };
            }
        });

        let location = SourceLocation {
            file: physical.file,
            line: physical.line,
            main_file: None,
        };
        (location, reported)
    }
}

impl Debug for DwarfInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "DwarfInfo")
    }
}
