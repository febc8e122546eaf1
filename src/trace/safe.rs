use std::os::unix::io::RawFd;

use crate::frame::FrameArray;
use crate::frame::LocationInfoMode;
use crate::frame::MAX_STACK_TRACE_DEPTH;
use crate::image::cache::SignalSafeElfCache;
use crate::modules::LinkMap;
use crate::print::AddressFormatter;
use crate::print::FdPrinter;
use crate::print::PrintOptions;
use crate::print::SymbolizePrinter as _;
use crate::symbolize::Symbolizer;
use crate::util::fsync_no_int;

use super::get_stack_trace;


/// The size of the output buffer of [`SafeStackTracePrinter`].
const BUFFER_SIZE: usize = 64 << 10;

/// The number of innermost frames belonging to the reporting machinery
/// itself: the capturing function and the printing entry point.
pub(crate) const SKIP_FRAMES: usize = 2;


/// A stack trace reporter usable from signal handlers.
///
/// All memory used for capturing and printing is allocated when the
/// reporter is created. Symbolization additionally requires the images
/// of all loaded modules to be opened ahead of time using
/// [`prepare`][Self::prepare]; without it, images are opened while
/// reporting, which allocates. Output goes to a raw file descriptor,
/// which is flushed and `fsync`ed after every report.
#[derive(Debug)]
pub struct SafeStackTracePrinter {
    fd: RawFd,
    printer: FdPrinter,
    addresses: Box<FrameArray<MAX_STACK_TRACE_DEPTH>>,
    elf_cache: SignalSafeElfCache,
}

impl SafeStackTracePrinter {
    /// Create a new `SafeStackTracePrinter` reporting to `fd`.
    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            printer: FdPrinter::new(fd, PrintOptions::COLOR_IF_TTY, BUFFER_SIZE),
            addresses: Box::default(),
            elf_cache: SignalSafeElfCache::new(),
        }
    }

    /// Open the images of all currently loaded modules and load their
    /// debug information.
    ///
    /// Afterwards, symbolized reports neither allocate memory nor access
    /// the file system. Modules loaded later on are not symbolized.
    pub fn prepare(&self) {
        self.elf_cache.preload(LinkMap)
    }

    /// Capture and print the calling thread's stack trace.
    ///
    /// If `symbolize` is `false`, only raw addresses are printed.
    #[inline(never)]
    pub fn print_stack_trace(&mut self, symbolize: bool) {
        self.print_stack_trace_with(symbolize, Self::print_symbolized_stack_trace)
    }

    /// Capture the stack trace and print it, using `symbolized` for
    /// printing it in symbolized form.
    ///
    /// This function is always inlined, so that it does not show up in
    /// the captured trace.
    #[inline(always)]
    pub(crate) fn print_stack_trace_with<F>(&mut self, symbolize: bool, symbolized: F)
    where
        F: FnOnce(&mut Self),
    {
        if !get_stack_trace(&mut self.addresses) {
            self.print("(error retrieving stack trace)\n");
        } else if symbolize {
            let () = symbolized(self);
        } else {
            self.print("(safe mode, symbolizer not available)\n");
            let mut formatter = AddressFormatter::new();
            for addr in self.addresses.addresses() {
                let () = self.printer.print_str(formatter.format(*addr));
                let () = self.printer.print_str("\n");
            }
        }
        self.flush()
    }

    /// Symbolize and print the most recently captured stack trace.
    ///
    /// This function does not capture a stack trace itself, as it may
    /// run on a different stack.
    pub(crate) fn print_symbolized_stack_trace(&mut self) {
        let symbolizer = Symbolizer::new(&self.elf_cache, LocationInfoMode::Full, 0);
        let () = symbolizer.symbolize_array(&mut self.addresses);
        let () = self
            .printer
            .println_frames(self.addresses.frames(), SKIP_FRAMES);
    }

    /// Print a plain message.
    pub fn print(&mut self, s: &str) {
        self.printer.print_str(s)
    }

    /// Retrieve the file descriptor reported to.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Flush buffered output and synchronize the file descriptor.
    pub fn flush(&mut self) {
        let () = self.printer.flush();
        fsync_no_int(self.fd)
    }
}
