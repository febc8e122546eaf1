use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::sync::Arc;

use crate::frame::FrameArray;
use crate::frame::LocationInfoMode;
use crate::frame::MAX_STACK_TRACE_DEPTH;
use crate::image::cache::default_elf_cache;
use crate::image::cache::ElfCache;
use crate::modules::count_loaded_modules;
use crate::print::AddressFormatter;
use crate::print::SymbolizePrinter;
use crate::symbolize::Symbolizer;

use super::get_stack_trace;
use super::safe::SKIP_FRAMES;


/// A stack trace reporter optimized for repeated use.
///
/// Program images and, optionally, symbolization results are cached
/// across reports. Reporting allocates memory and takes locks, so this
/// reporter must not be used from signal handlers.
pub struct FastStackTracePrinter {
    printer: Box<dyn SymbolizePrinter + Send>,
    symbolizer: Symbolizer,
}

impl FastStackTracePrinter {
    /// Create a new `FastStackTracePrinter` printing to `printer`.
    ///
    /// If `elf_cache_size` is zero, the process wide image cache is
    /// used. Otherwise a private cache large enough for at least all
    /// currently loaded modules is created. A `symbol_cache_size` of
    /// zero disables caching of symbolization results.
    pub fn new(
        printer: Box<dyn SymbolizePrinter + Send>,
        elf_cache_size: usize,
        symbol_cache_size: usize,
    ) -> Self {
        let elf_cache = if elf_cache_size == 0 {
            default_elf_cache()
        } else {
            Arc::new(ElfCache::new(count_loaded_modules().max(elf_cache_size)))
        };

        Self {
            printer,
            symbolizer: Symbolizer::new(elf_cache, LocationInfoMode::Full, symbol_cache_size),
        }
    }

    /// Capture and print the calling thread's stack trace.
    ///
    /// If `symbolize` is `false`, only raw addresses are printed.
    #[inline(never)]
    pub fn print_stack_trace(&mut self, symbolize: bool) {
        let mut addresses = FrameArray::<MAX_STACK_TRACE_DEPTH>::new();

        if !get_stack_trace(&mut addresses) {
            let () = self.printer.print_str("(error retrieving stack trace)\n");
        } else if symbolize {
            let () = self.symbolizer.symbolize_array(&mut addresses);
            let () = self
                .printer
                .println_frames(addresses.frames(), SKIP_FRAMES);
        } else {
            let () = self
                .printer
                .print_str("(safe mode, symbolizer not available)\n");
            let mut formatter = AddressFormatter::new();
            for addr in addresses.addresses() {
                let () = self.printer.print_str(formatter.format(*addr));
                let () = self.printer.print_str("\n");
            }
        }
        self.printer.flush()
    }

    /// Flush the underlying printer.
    pub fn flush(&mut self) {
        self.printer.flush()
    }

    /// Retrieve the symbolizer in use.
    #[inline]
    pub fn symbolizer(&self) -> &Symbolizer {
        &self.symbolizer
    }
}

impl Debug for FastStackTracePrinter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FastStackTracePrinter")
            .field("printer", &format_args!("{:?}", self.printer.options()))
            .field("symbolizer", &self.symbolizer)
            .finish()
    }
}
