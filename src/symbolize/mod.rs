//! Functionality for symbolizing addresses of the running process.
//!
//! Symbolization maps "raw" addresses, for example return addresses
//! captured from the stack, to the names of the functions containing
//! them and to their source code locations.
//!
//! For example, here we symbolize the address of a function:
//! ```no_run
//! use stacksym::symbolize::Symbolizer;
//! use stacksym::SymbolizedFrame;
//!
//! fn function() {}
//!
//! let symbolizer: Symbolizer = Symbolizer::default();
//! let addrs = [function as usize];
//! let mut frames = [SymbolizedFrame::default()];
//! let count = symbolizer.symbolize(&addrs, &mut frames);
//!
//! for frame in &frames[..count] {
//!     println!("{:#x}: {:?}", frame.addr(), frame.name());
//! }
//! ```

mod cache;
mod symbolizer;

pub use cache::SymbolCache;
pub use symbolizer::Symbolizer;
