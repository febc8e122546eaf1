//! Rendering of symbolized frames into text.
//!
//! The [`SymbolizePrinter`] trait implements the formatting logic on top
//! of a single sink method, [`SymbolizePrinter::do_print`]. A set of
//! sinks is provided:
//! - [`StreamPrinter`] writes to an arbitrary [`Write`][std::io::Write]
//!   implementation
//! - [`FdPrinter`] writes to a raw file descriptor through a buffer
//!   allocated up front, and is usable from signal handlers
//! - [`FilePrinter`] writes to a [`File`][std::fs::File], unbuffered
//! - [`StringPrinter`] accumulates output in memory
//!
//! For example:
//! ```
//! use stacksym::print::PrintOptions;
//! use stacksym::print::StringPrinter;
//! use stacksym::print::SymbolizePrinter as _;
//! use stacksym::SourceLocation;
//! use stacksym::SymbolizedFrame;
//!
//! let location = SourceLocation {
//!     file: Some("main.rs"),
//!     line: 7,
//!     main_file: None,
//! };
//! let frame = SymbolizedFrame::from_static(0x1337, Some("main"), location);
//!
//! let mut printer = StringPrinter::new(PrintOptions::NO_FRAME_ADDRESS);
//! let () = printer.print(&frame);
//! assert!(printer.as_str().starts_with(" main\n"));
//! assert!(printer.as_str().ends_with("main.rs:7"));
//! ```

mod demangle;
mod printers;

use std::mem::size_of;
use std::ops::BitOr;
use std::ops::BitOrAssign;
use std::os::unix::io::RawFd;
use std::str;

pub use printers::FdPrinter;
pub use printers::FilePrinter;
pub use printers::StreamPrinter;
pub use printers::StringPrinter;

use crate::util;
use crate::Addr;
use crate::SymbolizedFrame;

use self::demangle::demangle;
use self::demangle::DEMANGLE_BUF_SIZE;


/// Options controlling how frames are rendered.
///
/// Options can be combined using `|`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PrintOptions(u32);

impl PrintOptions {
    /// Render the default format.
    pub const DEFAULT: Self = Self(0);
    /// Do not print the frame address.
    pub const NO_FRAME_ADDRESS: Self = Self(1 << 0);
    /// Do not print file and line information.
    pub const NO_FILE_AND_LINE: Self = Self(1 << 1);
    /// Only print the (demangled) symbol name, or the address if the
    /// frame could not be resolved.
    pub const TERSE: Self = Self(1 << 2);
    /// Always emit color escape sequences.
    pub const COLOR: Self = Self(1 << 3);
    /// Emit color escape sequences if printing to a terminal.
    pub const COLOR_IF_TTY: Self = Self(1 << 4);
    /// Only print `file:line`, on a single line.
    pub const TERSE_FILE_AND_LINE: Self = Self(1 << 5);

    /// Check whether all options in `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Retrieve the raw bit representation.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for PrintOptions {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PrintOptions {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}


/// Terminal colors used when rendering frames.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Color {
    /// The terminal's default color.
    Default,
    /// Red.
    Red,
    /// Green.
    Green,
    /// Yellow.
    Yellow,
    /// Blue.
    Blue,
    /// Cyan.
    Cyan,
    /// White.
    White,
    /// Purple.
    Purple,
}

impl Color {
    /// Retrieve the ANSI escape sequence selecting the color.
    pub const fn escape_code(self) -> &'static str {
        match self {
            Self::Default => "\x1B[0m",
            Self::Red => "\x1B[31m",
            Self::Green => "\x1B[32m",
            Self::Yellow => "\x1B[33m",
            Self::Blue => "\x1B[34m",
            Self::Cyan => "\x1B[36m",
            Self::White => "\x1B[37m",
            Self::Purple => "\x1B[35m",
        }
    }
}

const ADDRESS_COLOR: Color = Color::Blue;
const FUNCTION_COLOR: Color = Color::Purple;
const FILE_COLOR: Color = Color::Default;

/// The number of hexadecimal digits in a formatted address.
const ADDR_DIGITS: usize = 2 * size_of::<Addr>();

/// The indentation of file and line information, aligning it past the
/// frame address.
fn pad() -> &'static str {
    const SPACES: &str = "                       ";
    &SPACES[..SPACES.len() - (16 - ADDR_DIGITS)]
}


/// Check whether colors should be emitted for output to `fd`, given
/// `options`.
pub(crate) fn is_colorful_tty(options: PrintOptions, fd: RawFd) -> bool {
    if options.contains(PrintOptions::TERSE) || !options.contains(PrintOptions::COLOR_IF_TTY) {
        return false
    }
    util::is_colorful_tty(fd)
}


/// Formatting of addresses without any memory allocation.
///
/// Addresses are rendered as `0x` followed by zero padded lower case
/// hexadecimal digits.
#[derive(Clone, Debug)]
pub struct AddressFormatter {
    buf: [u8; 2 + ADDR_DIGITS],
}

impl AddressFormatter {
    /// Create a new `AddressFormatter`.
    pub fn new() -> Self {
        Self {
            buf: [b'0'; 2 + ADDR_DIGITS],
        }
    }

    /// Format `addr`, returning a reference to the internal buffer.
    pub fn format(&mut self, addr: Addr) -> &str {
        const HEX: &[u8; 16] = b"0123456789abcdef";

        self.buf[1] = b'x';
        let mut addr = addr;
        for digit in self.buf[2..].iter_mut().rev() {
            *digit = HEX[addr & 0xf];
            addr >>= 4;
        }
        // The buffer only ever contains ASCII characters.
        str::from_utf8(&self.buf).unwrap_or_default()
    }
}

impl Default for AddressFormatter {
    fn default() -> Self {
        Self::new()
    }
}


/// Format `value` in decimal into `buf`.
pub(crate) fn format_decimal(value: u32, buf: &mut [u8; 10]) -> &str {
    let mut value = value;
    let mut start = buf.len();
    loop {
        start -= 1;
        buf[start] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break
        }
    }
    str::from_utf8(&buf[start..]).unwrap_or_default()
}


/// A sink for rendered frames.
///
/// Implementors only need to provide [`do_print`][Self::do_print] and
/// [`options`][Self::options]. None of the provided methods allocate
/// memory, except for demangling of C++ symbol names on printers that
/// are not [allocation free][Self::is_allocation_free].
pub trait SymbolizePrinter {
    /// Emit `s` verbatim.
    fn do_print(&mut self, s: &str);

    /// Retrieve the options to render frames with.
    fn options(&self) -> PrintOptions;

    /// Check whether output goes to a terminal capable of displaying
    /// colors.
    fn is_tty(&self) -> bool {
        false
    }

    /// Check whether rendering must not allocate memory.
    ///
    /// If so, C++ symbol names are printed in their mangled form.
    fn is_allocation_free(&self) -> bool {
        false
    }

    /// Flush any buffered output.
    fn flush(&mut self) {}

    /// Emit the escape sequence for `color`, if colors are enabled.
    fn color(&mut self, color: Color) {
        let options = self.options();
        if !options.contains(PrintOptions::COLOR)
            && !(options.contains(PrintOptions::COLOR_IF_TTY) && self.is_tty())
        {
            return
        }
        self.do_print(color.escape_code())
    }

    /// Render `frame`.
    fn print(&mut self, frame: &SymbolizedFrame) {
        if self.options().contains(PrintOptions::TERSE) {
            return print_terse(self, frame)
        }

        let () = print_frame(self, frame);
        self.color(Color::Default)
    }

    /// Render `frame`, followed by a newline.
    fn println(&mut self, frame: &SymbolizedFrame) {
        let () = self.print(frame);
        self.do_print("\n")
    }

    /// Render all of `frames` but the first `skip`, each on its own
    /// line.
    fn println_frames(&mut self, frames: &[SymbolizedFrame], skip: usize) {
        for frame in frames.iter().skip(skip) {
            let () = self.println(frame);
        }
    }

    /// Emit a plain string.
    fn print_str(&mut self, s: &str) {
        self.do_print(s)
    }
}

impl<P> SymbolizePrinter for Box<P>
where
    P: SymbolizePrinter + ?Sized,
{
    fn do_print(&mut self, s: &str) {
        (**self).do_print(s)
    }

    fn options(&self) -> PrintOptions {
        (**self).options()
    }

    fn is_tty(&self) -> bool {
        (**self).is_tty()
    }

    fn is_allocation_free(&self) -> bool {
        (**self).is_allocation_free()
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}


/// Print `name`, demangled if possible.
fn print_name<P>(printer: &mut P, name: &str)
where
    P: SymbolizePrinter + ?Sized,
{
    let mut buf = [0u8; DEMANGLE_BUF_SIZE];
    let name = demangle(name, &mut buf, printer.is_allocation_free()).unwrap_or(name);
    printer.do_print(name)
}

fn print_terse<P>(printer: &mut P, frame: &SymbolizedFrame)
where
    P: SymbolizePrinter + ?Sized,
{
    match frame.name() {
        Some(name) if !name.is_empty() => print_name(printer, name),
        _ => {
            let mut formatter = AddressFormatter::new();
            printer.do_print(formatter.format(frame.addr()))
        }
    }
}

fn print_frame<P>(printer: &mut P, frame: &SymbolizedFrame)
where
    P: SymbolizePrinter + ?Sized,
{
    let options = printer.options();
    let terse_location = options.contains(PrintOptions::TERSE_FILE_AND_LINE);

    if !options.contains(PrintOptions::NO_FRAME_ADDRESS) && !terse_location {
        let () = printer.color(ADDRESS_COLOR);
        let mut formatter = AddressFormatter::new();
        printer.do_print(formatter.format(frame.addr()));
    }

    let () = printer.color(FUNCTION_COLOR);
    if !frame.found() {
        return printer.do_print(" (not found)")
    }

    if !terse_location {
        match frame.name() {
            Some(name) if !name.is_empty() => {
                printer.do_print(" ");
                let () = print_name(printer, name);
            }
            _ => printer.do_print(" (unknown)"),
        }
    }

    if options.contains(PrintOptions::NO_FILE_AND_LINE) {
        return
    }

    let () = printer.color(FILE_COLOR);
    let location = frame.location();
    if let Some(file) = location.file {
        if !terse_location {
            printer.do_print("\n");
            printer.do_print(pad());
        }
        printer.do_print(file);

        let mut buf = [0u8; 10];
        printer.do_print(":");
        printer.do_print(format_decimal(location.line, &mut buf));
    } else if terse_location {
        printer.do_print("(unknown)");
    }

    if let Some(main_file) = location.main_file {
        if !terse_location && location.file != Some(main_file) {
            printer.do_print("\n");
            printer.do_print(pad());
            printer.do_print("-> ");
            printer.do_print(main_file);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use crate::SourceLocation;


    fn location(
        file: &'static str,
        line: u32,
        main_file: Option<&'static str>,
    ) -> SourceLocation<'static> {
        SourceLocation {
            file: Some(file),
            line,
            main_file,
        }
    }

    fn render(options: PrintOptions, frame: &SymbolizedFrame) -> String {
        let mut printer = StringPrinter::new(options);
        let () = printer.print(frame);
        printer.into_string()
    }


    /// Check that addresses are formatted as expected.
    #[test]
    fn address_formatting() {
        let mut formatter = AddressFormatter::new();
        assert_eq!(formatter.format(0), "0x0000000000000000");
        assert_eq!(formatter.format(0x2a), "0x000000000000002a");
        assert_eq!(formatter.format(0xdeadbeef), "0x00000000deadbeef");
        assert_eq!(formatter.format(usize::MAX), "0xffffffffffffffff");
        // The buffer is fully rewritten on every invocation.
        assert_eq!(formatter.format(1), "0x0000000000000001");
    }

    /// Check that decimal numbers are formatted correctly.
    #[test]
    fn decimal_formatting() {
        let mut buf = [0; 10];
        assert_eq!(format_decimal(0, &mut buf), "0");
        assert_eq!(format_decimal(42, &mut buf), "42");
        assert_eq!(format_decimal(u32::MAX, &mut buf), "4294967295");
    }

    /// Check that options can be combined and queried.
    #[test]
    fn option_combination() {
        let mut options = PrintOptions::TERSE | PrintOptions::COLOR;
        assert!(options.contains(PrintOptions::TERSE));
        assert!(options.contains(PrintOptions::COLOR));
        assert!(!options.contains(PrintOptions::COLOR_IF_TTY));
        options |= PrintOptions::COLOR_IF_TTY;
        assert!(options.contains(PrintOptions::COLOR_IF_TTY));
        assert!(PrintOptions::DEFAULT.contains(PrintOptions::DEFAULT));
        assert_eq!(PrintOptions::default().bits(), 0);
    }

    /// Check the terse rendering of an unresolved frame.
    #[test]
    fn terse_unresolved() {
        let frame = SymbolizedFrame::new(0x2a);
        assert_eq!(render(PrintOptions::TERSE, &frame), "0x000000000000002a");
    }

    /// Check the terse rendering of a resolved frame.
    #[test]
    fn terse_resolved() {
        let frame = SymbolizedFrame::from_static(0x2a, Some("compute"), SourceLocation::default());
        assert_eq!(render(PrintOptions::TERSE, &frame), "compute");

        // Nameless frames are rendered by address.
        let frame = SymbolizedFrame::from_static(0x2a, Some(""), SourceLocation::default());
        assert_eq!(render(PrintOptions::TERSE, &frame), "0x000000000000002a");
    }

    /// Check that terse rendering never emits colors.
    #[test]
    fn terse_without_color() {
        let frame = SymbolizedFrame::new(0x2a);
        assert_eq!(
            render(PrintOptions::TERSE | PrintOptions::COLOR, &frame),
            "0x000000000000002a"
        );
    }

    /// Check the rendering of a frame without location information.
    #[test]
    fn name_only() {
        let frame =
            SymbolizedFrame::from_static(0x1337, Some("compute"), SourceLocation::default());
        assert_eq!(render(PrintOptions::NO_FRAME_ADDRESS, &frame), " compute");
        assert_eq!(
            render(PrintOptions::DEFAULT, &frame),
            "0x0000000000001337 compute"
        );
    }

    /// Check the rendering of unresolved and nameless frames.
    #[test]
    fn not_found_and_unknown() {
        let frame = SymbolizedFrame::new(0x1337);
        assert_eq!(
            render(PrintOptions::DEFAULT, &frame),
            "0x0000000000001337 (not found)"
        );

        let frame = SymbolizedFrame::from_static(0x1337, None, SourceLocation::default());
        assert_eq!(render(PrintOptions::NO_FRAME_ADDRESS, &frame), " (unknown)");
    }

    /// Check the rendering of file, line, and enclosing file.
    #[test]
    fn file_and_line() {
        let pad = " ".repeat(23);
        let frame =
            SymbolizedFrame::from_static(0x1337, Some("compute"), location("a.cc", 42, Some("b.cc")));
        assert_eq!(
            render(PrintOptions::DEFAULT, &frame),
            format!("0x0000000000001337 compute\n{pad}a.cc:42\n{pad}-> b.cc")
        );

        // An enclosing file matching the file itself is omitted.
        let frame =
            SymbolizedFrame::from_static(0x1337, Some("compute"), location("a.cc", 42, Some("a.cc")));
        assert_eq!(
            render(PrintOptions::NO_FRAME_ADDRESS, &frame),
            format!(" compute\n{pad}a.cc:42")
        );

        assert_eq!(
            render(PrintOptions::NO_FILE_AND_LINE, &frame),
            "0x0000000000001337 compute"
        );
    }

    /// Check the single line `file:line` rendering.
    #[test]
    fn terse_file_and_line() {
        let frame =
            SymbolizedFrame::from_static(0x1337, Some("compute"), location("a.cc", 42, Some("b.cc")));
        assert_eq!(render(PrintOptions::TERSE_FILE_AND_LINE, &frame), "a.cc:42");

        let frame =
            SymbolizedFrame::from_static(0x1337, Some("compute"), SourceLocation::default());
        assert_eq!(
            render(PrintOptions::TERSE_FILE_AND_LINE, &frame),
            "(unknown)"
        );
    }

    /// Check that colors are emitted as requested.
    #[test]
    fn colors() {
        let frame =
            SymbolizedFrame::from_static(0x1337, Some("compute"), SourceLocation::default());
        assert_eq!(
            render(PrintOptions::COLOR, &frame),
            "\x1B[34m0x0000000000001337\x1B[35m compute\x1B[0m\x1B[0m"
        );

        let frame = SymbolizedFrame::new(0x1337);
        assert_eq!(
            render(PrintOptions::COLOR | PrintOptions::NO_FRAME_ADDRESS, &frame),
            "\x1B[35m (not found)\x1B[0m"
        );

        // A string sink is never a terminal.
        assert_eq!(
            render(PrintOptions::COLOR_IF_TTY, &frame),
            "0x0000000000001337 (not found)"
        );
    }

    /// Check that Rust symbol names are demangled.
    #[cfg(feature = "demangle")]
    #[test]
    fn demangled_name() {
        let frame = SymbolizedFrame::from_static(
            0x1337,
            Some("_ZN4core3fmt5write17h0123456789abcdefE"),
            SourceLocation::default(),
        );
        assert_eq!(render(PrintOptions::TERSE, &frame), "core::fmt::write");
        assert_eq!(
            render(PrintOptions::NO_FRAME_ADDRESS, &frame),
            " core::fmt::write"
        );
    }

    /// Check that a sequence of frames is rendered line by line.
    #[test]
    fn frame_sequence() {
        let frames = [
            SymbolizedFrame::from_static(1, Some("skipped"), SourceLocation::default()),
            SymbolizedFrame::from_static(2, Some("first"), SourceLocation::default()),
            SymbolizedFrame::new(3),
        ];
        let mut printer = StringPrinter::new(PrintOptions::TERSE);
        let () = printer.println_frames(&frames, 1);
        let () = printer.print_str("done");
        assert_eq!(printer.as_str(), "first\n0x0000000000000003\ndone");

        let mut printer = StringPrinter::new(PrintOptions::TERSE);
        let () = printer.println_frames(&frames, 5);
        assert_eq!(printer.as_str(), "");
    }

    /// Check that boxed printers forward to the inner printer.
    #[test]
    fn boxed_printer() {
        let mut printer: Box<dyn SymbolizePrinter> =
            Box::new(StringPrinter::new(PrintOptions::TERSE));
        assert_eq!(printer.options(), PrintOptions::TERSE);
        assert!(!printer.is_tty());
        let () = printer.println(&SymbolizedFrame::new(0x10));
        let () = printer.flush();
    }
}
