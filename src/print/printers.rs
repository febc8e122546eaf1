use std::fs::File;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;

use crate::util::write_full;

use super::is_colorful_tty;
use super::PrintOptions;
use super::SymbolizePrinter;


/// A printer writing to an arbitrary [`Write`] implementation.
///
/// Write errors are ignored.
#[derive(Debug)]
pub struct StreamPrinter<W> {
    writer: W,
    options: PrintOptions,
    is_tty: bool,
}

impl<W> StreamPrinter<W>
where
    W: Write,
{
    /// Create a new `StreamPrinter`.
    ///
    /// The writer is never considered a terminal.
    pub fn new(writer: W, options: PrintOptions) -> Self {
        Self {
            writer,
            options,
            is_tty: false,
        }
    }

    /// Retrieve the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> StreamPrinter<W>
where
    W: Write + AsRawFd,
{
    /// Create a new `StreamPrinter` for a writer that may refer to a
    /// terminal, honoring [`PrintOptions::COLOR_IF_TTY`].
    pub fn for_terminal(writer: W, options: PrintOptions) -> Self {
        let is_tty = is_colorful_tty(options, writer.as_raw_fd());
        Self {
            writer,
            options,
            is_tty,
        }
    }
}

impl<W> SymbolizePrinter for StreamPrinter<W>
where
    W: Write,
{
    fn do_print(&mut self, s: &str) {
        let _result = self.writer.write_all(s.as_bytes());
    }

    fn options(&self) -> PrintOptions {
        self.options
    }

    fn is_tty(&self) -> bool {
        self.is_tty
    }

    fn flush(&mut self) {
        let _result = self.writer.flush();
    }
}


/// A printer writing to a raw file descriptor.
///
/// Output is collected in a buffer allocated at construction time and
/// written out when it would overflow, on [`flush`][SymbolizePrinter::flush],
/// and when the printer is dropped. Printing performs no memory
/// allocation and only invokes `write(2)`, making this printer usable
/// from signal handlers. C++ symbol names are hence not demangled.
///
/// The file descriptor is not closed.
#[derive(Debug)]
pub struct FdPrinter {
    fd: RawFd,
    options: PrintOptions,
    is_tty: bool,
    buffer: Vec<u8>,
}

impl FdPrinter {
    /// Create a new `FdPrinter` using a buffer of `buffer_size` bytes.
    ///
    /// A `buffer_size` of zero disables buffering.
    pub fn new(fd: RawFd, options: PrintOptions, buffer_size: usize) -> Self {
        Self {
            fd,
            options,
            is_tty: is_colorful_tty(options, fd),
            buffer: Vec::with_capacity(buffer_size),
        }
    }

    /// Retrieve the file descriptor written to.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl SymbolizePrinter for FdPrinter {
    fn do_print(&mut self, s: &str) {
        let data = s.as_bytes();
        if data.len() > self.buffer.capacity() - self.buffer.len() {
            let () = SymbolizePrinter::flush(self);
            let () = write_full(self.fd, data);
        } else {
            // Never exceeds the capacity and so never reallocates.
            let () = self.buffer.extend_from_slice(data);
        }
    }

    fn options(&self) -> PrintOptions {
        self.options
    }

    fn is_tty(&self) -> bool {
        self.is_tty
    }

    fn is_allocation_free(&self) -> bool {
        true
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let () = write_full(self.fd, &self.buffer);
            let () = self.buffer.clear();
        }
    }
}

impl Drop for FdPrinter {
    fn drop(&mut self) {
        SymbolizePrinter::flush(self)
    }
}


/// A printer writing to a [`File`], without buffering.
#[derive(Debug)]
pub struct FilePrinter {
    file: File,
    options: PrintOptions,
    is_tty: bool,
}

impl FilePrinter {
    /// Create a new `FilePrinter`.
    pub fn new(file: File, options: PrintOptions) -> Self {
        let is_tty = is_colorful_tty(options, file.as_raw_fd());
        Self {
            file,
            options,
            is_tty,
        }
    }
}

impl SymbolizePrinter for FilePrinter {
    fn do_print(&mut self, s: &str) {
        let _result = self.file.write_all(s.as_bytes());
    }

    fn options(&self) -> PrintOptions {
        self.options
    }

    fn is_tty(&self) -> bool {
        self.is_tty
    }
}


/// A printer accumulating output in memory.
#[derive(Debug, Default)]
pub struct StringPrinter {
    buf: String,
    options: PrintOptions,
}

impl StringPrinter {
    /// Create a new, empty `StringPrinter`.
    pub fn new(options: PrintOptions) -> Self {
        Self {
            buf: String::new(),
            options,
        }
    }

    /// Retrieve the output accumulated so far.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Discard the output accumulated so far.
    pub fn clear(&mut self) {
        self.buf.clear()
    }

    /// Retrieve the accumulated output.
    pub fn into_string(self) -> String {
        self.buf
    }
}

impl SymbolizePrinter for StringPrinter {
    fn do_print(&mut self, s: &str) {
        self.buf.push_str(s)
    }

    fn options(&self) -> PrintOptions {
        self.options
    }
}
