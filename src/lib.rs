//! **stacksym** is a library for symbolizing stack traces of the
//! running process.
//!
//! It maps raw return addresses to symbol names, source locations,
//! and chains of inlined calls, using bounded caches over all loaded
//! program images. Reporting can be performed from inside a fatal
//! signal handler: once prepared, the signal-safe code paths perform
//! no dynamic memory allocation and only async-signal-safe system
//! calls, and can optionally run on a freshly mapped and guarded stack
//! when the interrupted thread's stack cannot be trusted.
//!
//! The main entry points are:
//! - [`Symbolizer`][symbolize::Symbolizer], which resolves addresses
//!   into [`SymbolizedFrame`] objects
//! - the [`print`] module, which renders frames to various sinks
//! - the [`trace`] module, which bundles capturing, symbolization,
//!   and printing into reporters for different safety requirements
//! - [`signal::install_fatal_signal_handler`], which reports a stack
//!   trace when the process crashes
#![allow(
    clippy::collapsible_else_if,
    clippy::collapsible_if,
    clippy::let_and_return,
    clippy::let_unit_value,
    clippy::module_inception
)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::absolute_paths,
    rustdoc::broken_intra_doc_links
)]
#![cfg_attr(docsrs, feature(doc_cfg))]


#[cfg(not(target_os = "linux"))]
compile_error!("stacksym only supports Linux");


#[cfg(feature = "dwarf")]
mod dwarf;
mod elf;
mod error;
mod frame;
mod image;
mod mmap;
pub mod modules;
pub mod print;
pub mod signal;
pub mod symbolize;
pub mod trace;
mod util;

pub use crate::error::Error;
pub use crate::error::ErrorExt;
pub use crate::error::ErrorKind;
pub use crate::error::IntoError;
pub use crate::frame::CachedFrames;
pub use crate::frame::FrameArray;
pub use crate::frame::LocationInfoMode;
pub use crate::frame::SourceLocation;
pub use crate::frame::SymbolizedFrame;
pub use crate::frame::MAX_INLINE_FRAMES;
pub use crate::frame::MAX_STACK_TRACE_DEPTH;
pub use crate::image::cache::default_elf_cache;
pub use crate::image::cache::DEFAULT_ELF_CACHE_CAPACITY;
pub use crate::image::cache::DEFAULT_SIGNAL_SAFE_CAPACITY;
pub use crate::image::cache::ElfCache;
pub use crate::image::cache::ImageCache;
pub use crate::image::cache::SignalSafeElfCache;
pub use crate::image::ElfImage;
pub use crate::image::Image;
pub use crate::image::ImageHandle;
pub use crate::image::InlineFrame;


/// A type representing addresses.
pub type Addr = usize;

/// A result type using our [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;


#[cfg(feature = "tracing")]
#[macro_use]
#[allow(unused_imports)]
mod log {
    pub(crate) use tracing::debug;
    pub(crate) use tracing::instrument;
    pub(crate) use tracing::trace;
    pub(crate) use tracing::warn;
}

#[cfg(not(feature = "tracing"))]
#[macro_use]
#[allow(unused_imports)]
mod log {
    macro_rules! debug {
        ($($args:tt)*) => {{
            if false {
                // Make sure to use `args` to prevent any warnings about
                // unused variables.
                let _args = format_args!($($args)*);
            }
        }};
    }
    pub(crate) use debug;
    pub(crate) use debug as trace;
    pub(crate) use debug as warn;
}
