use std::borrow::Cow;
use std::error;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::io;


mod private {
    pub trait Sealed {}

    impl<T> Sealed for Option<T> {}
    impl<T, E> Sealed for Result<T, E> {}
}

/// An enum providing a rough classification of errors.
///
/// The variants of this type partly resemble those of
/// [`std::io::Error`], because these are the most common sources of
/// error that the crate concerns itself with.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An entity was not found, often a file.
    NotFound,
    /// The operation lacked the necessary privileges to complete.
    PermissionDenied,
    /// A parameter was incorrect.
    InvalidInput,
    /// Data not valid for the operation were encountered.
    InvalidData,
    /// This operation is unsupported on this platform.
    Unsupported,
    /// An operation could not be completed, because it failed
    /// to allocate enough memory.
    OutOfMemory,
    /// A custom error that does not fall under any other I/O error
    /// kind.
    Other,
}

impl From<io::ErrorKind> for ErrorKind {
    fn from(other: io::ErrorKind) -> Self {
        match other {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::InvalidInput => Self::InvalidInput,
            io::ErrorKind::InvalidData => Self::InvalidData,
            io::ErrorKind::Unsupported => Self::Unsupported,
            io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            _ => Self::Other,
        }
    }
}


#[derive(Debug)]
enum ErrorImpl {
    Io(io::Error),
    #[cfg(feature = "dwarf")]
    Dwarf(gimli::Error),
    Context {
        context: Cow<'static, str>,
        source: Box<ErrorImpl>,
    },
}

impl ErrorImpl {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(error) => ErrorKind::from(error.kind()),
            #[cfg(feature = "dwarf")]
            Self::Dwarf(_) => ErrorKind::InvalidData,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Retrieve the next layer below the current one.
    fn source(&self) -> Option<&ErrorImpl> {
        match self {
            Self::Context { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl Display for ErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Io(error) => Display::fmt(error, f),
            #[cfg(feature = "dwarf")]
            Self::Dwarf(error) => Display::fmt(error, f),
            Self::Context { context, .. } => Display::fmt(context, f),
        }
    }
}


/// The error type used by the library.
///
/// Errors generally form a chain, with higher-level errors typically
/// providing additional context for lower level ones. E.g., an IO error
/// such as file-not-found could be reported by a system level API (such
/// as [`std::fs::File::open`]) and may be contextualized with the path
/// to the file attempted to be opened.
///
/// ```
/// use std::fs::File;
/// use std::error::Error as _;
/// # use stacksym::ErrorExt as _;
///
/// let path = "/does-not-exist";
/// let result = File::open(path).with_context(|| format!("failed to open {path}"));
///
/// let err = result.unwrap_err();
/// assert_eq!(err.to_string(), "failed to open /does-not-exist");
///
/// // Retrieve the underlying error.
/// let inner_err = err.source().unwrap();
/// assert!(inner_err.to_string().starts_with("No such file or directory"));
/// ```
///
/// For convenient reporting, the [`Display`] representation takes care
/// of reporting the complete error chain when the alternate flag is
/// set:
/// ```
/// # use std::fs::File;
/// # use std::error::Error as _;
/// # use stacksym::ErrorExt as _;
/// # let path = "/does-not-exist";
/// # let result = File::open(path).with_context(|| format!("failed to open {path}"));
/// # let err = result.unwrap_err();
/// // > failed to open /does-not-exist: No such file or directory (os error 2)
/// println!("{err:#}");
/// ```
// Representation is optimized for fast copying (a single machine word),
// not so much for fast creation (as it is heap allocated). We
// generally expect errors to be exceptional, though a lot of
// functionality is fallible (i.e., returns a `Result<T, Error>` which
// would be penalized by a large error type).
#[repr(transparent)]
pub struct Error {
    error: Box<ErrorImpl>,
}

impl Error {
    fn with_io_error<E>(kind: io::ErrorKind, error: E) -> Self
    where
        E: ToString,
    {
        Self::from(io::Error::new(kind, error.to_string()))
    }

    pub(crate) fn with_invalid_data<E>(error: E) -> Self
    where
        E: ToString,
    {
        Self::with_io_error(io::ErrorKind::InvalidData, error)
    }

    pub(crate) fn with_invalid_input<E>(error: E) -> Self
    where
        E: ToString,
    {
        Self::with_io_error(io::ErrorKind::InvalidInput, error)
    }

    pub(crate) fn with_unsupported<E>(error: E) -> Self
    where
        E: ToString,
    {
        Self::with_io_error(io::ErrorKind::Unsupported, error)
    }

    /// Retrieve a rough error classification in the form of an
    /// [`ErrorKind`].
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Layer the provided context on top of this `Error`, creating a
    /// new one in the process.
    fn layer_context(self, context: Cow<'static, str>) -> Self {
        Self {
            error: Box::new(ErrorImpl::Context {
                context,
                source: self.error,
            }),
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if f.alternate() {
            Debug::fmt(&self.error, f)
        } else {
            let mut error = &*self.error;
            write!(f, "Error: {error}")?;

            let mut first = true;
            while let Some(source) = error.source() {
                if first {
                    writeln!(f)?;
                    writeln!(f)?;
                    writeln!(f, "Caused by:")?;
                    first = false;
                }
                writeln!(f, "    {source}")?;
                error = source;
            }
            Ok(())
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut error = &*self.error;
        Display::fmt(error, f)?;

        if f.alternate() {
            while let Some(source) = error.source() {
                write!(f, ": ")?;
                Display::fmt(source, f)?;
                error = source;
            }
        }
        Ok(())
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        let source = match &*self.error {
            ErrorImpl::Context { source, .. } => source,
            _ => return None,
        };
        // SAFETY: `Error` is `repr(transparent)` over a
        //         `Box<ErrorImpl>`, so the two can be used
        //         interchangeably.
        let source = unsafe { &*(source as *const Box<ErrorImpl>).cast::<Error>() };
        Some(source)
    }
}

impl From<io::Error> for Error {
    fn from(other: io::Error) -> Self {
        Self {
            error: Box::new(ErrorImpl::Io(other)),
        }
    }
}

#[cfg(feature = "dwarf")]
impl From<gimli::Error> for Error {
    fn from(other: gimli::Error) -> Self {
        Self {
            error: Box::new(ErrorImpl::Dwarf(other)),
        }
    }
}

// `Error::source` hands out `&Error` for each boxed `ErrorImpl`
// layer. That only works if the two are interchangeable in memory.
const _: () = assert!(std::mem::size_of::<Error>() == std::mem::size_of::<Box<ErrorImpl>>());


/// A trait providing ergonomic chaining capabilities to [`Error`].
pub trait ErrorExt: private::Sealed {
    /// The output type produced by [`context`](Self::context) and
    /// [`with_context`](Self::with_context).
    type Output;

    /// Add context to this error.
    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>;

    /// Add context to this error, using a closure for lazy evaluation.
    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C;
}

impl<T, E> ErrorExt for Result<T, E>
where
    Error: From<E>,
{
    type Output = Result<T, Error>;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
    {
        self.map_err(|err| Error::from(err).layer_context(context.into()))
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C,
    {
        self.map_err(|err| Error::from(err).layer_context(f().into()))
    }
}


/// A trait providing conversion shortcuts for creating `Error`
/// instances.
pub trait IntoError<T>: private::Sealed
where
    Self: Sized,
{
    /// Convert into an [`Error`] of kind [`ErrorKind::InvalidData`].
    fn ok_or_invalid_data<C, F>(self, f: F) -> Result<T, Error>
    where
        C: ToString,
        F: FnOnce() -> C;

    /// Convert into an [`Error`] of kind [`ErrorKind::InvalidInput`].
    fn ok_or_invalid_input<C, F>(self, f: F) -> Result<T, Error>
    where
        C: ToString,
        F: FnOnce() -> C;

}

impl<T> IntoError<T> for Option<T> {
    #[inline]
    fn ok_or_invalid_data<C, F>(self, f: F) -> Result<T, Error>
    where
        C: ToString,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::with_invalid_data(f()))
    }

    #[inline]
    fn ok_or_invalid_input<C, F>(self, f: F) -> Result<T, Error>
    where
        C: ToString,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::with_invalid_input(f()))
    }

}


#[cfg(test)]
mod tests {
    use super::*;

    use std::error::Error as _;
    use std::fs::File;


    /// Check that we can retrieve the context layers of an error.
    #[test]
    fn context_layering() {
        let err = io::Error::new(io::ErrorKind::InvalidData, "some invalid data");
        let err = Err::<(), _>(err)
            .context("inner context")
            .with_context(|| format!("outer {}", "context"))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(format!("{err}"), "outer context");
        assert_eq!(
            format!("{err:#}"),
            "outer context: inner context: some invalid data"
        );

        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "inner context");
        let source = source.source().unwrap();
        assert_eq!(source.to_string(), "some invalid data");
        assert!(source.source().is_none());
    }

    /// Check that the `Debug` representation lists the causes.
    #[test]
    fn debug_repr() {
        let err = File::open("/does-not-exist")
            .context("failed to open file")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let debug = format!("{err:?}");
        assert!(debug.starts_with("Error: failed to open file"), "{debug}");
        assert!(debug.contains("Caused by:"), "{debug}");
        assert_ne!(format!("{err:#?}"), "");
    }

    /// Check that `Option` conversions produce the expected kinds.
    #[test]
    fn option_conversion() {
        let err = None::<()>.ok_or_invalid_data(|| "bad").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        let err = None::<()>.ok_or_invalid_input(|| "bad").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(Some(5).ok_or_invalid_data(|| "bad").unwrap(), 5);

        let err = Error::with_unsupported("compression type 42");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.to_string(), "compression type 42");
    }
}
