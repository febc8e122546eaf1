#[cfg(feature = "demangle")]
use std::fmt;
#[cfg(feature = "demangle")]
use std::fmt::Write as _;
#[cfg(feature = "demangle")]
use std::str;


/// The size of the buffer that symbol names are demangled into.
pub(crate) const DEMANGLE_BUF_SIZE: usize = 2048;


/// A `fmt::Write` implementation over a fixed size buffer, failing
/// once the buffer is exhausted.
#[cfg(feature = "demangle")]
struct SliceWriter<'buf> {
    buf: &'buf mut [u8],
    len: usize,
}

#[cfg(feature = "demangle")]
impl<'buf> SliceWriter<'buf> {
    fn new(buf: &'buf mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    fn into_str(self) -> Option<&'buf str> {
        let Self { buf, len } = self;
        str::from_utf8(&buf[..len]).ok()
    }
}

#[cfg(feature = "demangle")]
impl fmt::Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len.checked_add(s.len()).ok_or(fmt::Error)?;
        let dst = self.buf.get_mut(self.len..end).ok_or(fmt::Error)?;
        let () = dst.copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}


/// Demangle `name` into `buf`.
///
/// Rust symbols (legacy and v0 mangling) are demangled without memory
/// allocation. Unless `allocation_free` is set, names carrying the `_Z`
/// prefix are otherwise attempted as Itanium C++ symbols, which
/// allocates.
/// Returns `None` if `name` is not a mangled name or if the demangled
/// name does not fit into `buf`.
#[cfg(feature = "demangle")]
pub(crate) fn demangle<'buf>(
    name: &str,
    buf: &'buf mut [u8],
    allocation_free: bool,
) -> Option<&'buf str> {
    let mut writer = SliceWriter::new(buf);
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        let () = write!(writer, "{demangled:#}").ok()?;
    } else if name.starts_with("_Z") && !allocation_free {
        let symbol = cpp_demangle::Symbol::new(name).ok()?;
        let () = write!(writer, "{symbol}").ok()?;
    } else {
        return None
    }

    writer.into_str().filter(|demangled| !demangled.is_empty())
}

#[cfg(not(feature = "demangle"))]
pub(crate) fn demangle<'buf>(
    _name: &str,
    _buf: &'buf mut [u8],
    _allocation_free: bool,
) -> Option<&'buf str> {
    None
}


#[cfg(all(test, feature = "demangle"))]
mod tests {
    use super::*;


    /// Check that Rust and C++ names are demangled.
    #[test]
    fn demangling() {
        let mut buf = [0; DEMANGLE_BUF_SIZE];
        assert_eq!(
            demangle("_ZN4core3fmt5write17h0123456789abcdefE", &mut buf, false),
            Some("core::fmt::write")
        );
        assert_eq!(demangle("_Z3fooi", &mut buf, false), Some("foo(int)"));
        assert_eq!(demangle("main", &mut buf, false), None);
        assert_eq!(demangle("", &mut buf, false), None);
    }

    /// Check that only Rust names are demangled when memory must not be
    /// allocated.
    #[test]
    fn demangling_allocation_free() {
        let mut buf = [0; DEMANGLE_BUF_SIZE];
        assert_eq!(
            demangle("_ZN4core3fmt5write17h0123456789abcdefE", &mut buf, true),
            Some("core::fmt::write")
        );
        assert_eq!(demangle("_Z3fooi", &mut buf, true), None);
    }

    /// Check that names not fitting into the buffer are rejected.
    #[test]
    fn demangling_truncation() {
        let mut buf = [0; 8];
        assert_eq!(
            demangle("_ZN4core3fmt5write17h0123456789abcdefE", &mut buf, false),
            None
        );
    }

    /// Check that the slice writer refuses to overflow its buffer.
    #[test]
    fn slice_writer() {
        let mut buf = [0; 4];
        let mut writer = SliceWriter::new(&mut buf);
        assert!(writer.write_str("abc").is_ok());
        assert!(writer.write_str("de").is_err());
        assert!(writer.write_str("d").is_ok());
        assert_eq!(writer.into_str(), Some("abcd"));
    }
}
