//! Capturing and reporting stack traces of the calling thread.
//!
//! Three reporters with different trade-offs are provided:
//! - [`SafeStackTracePrinter`] performs all allocations up front, when
//!   created and prepared, and can be used from signal handlers
//! - [`AltStackTracePrinter`] additionally symbolizes on a freshly
//!   mapped stack, for when the current stack cannot be trusted
//! - [`FastStackTracePrinter`] caches program images and symbolization
//!   results across reports, but must not be used from signal handlers
//!
//! All reporters omit their own frames from the reported trace.

mod alt_stack;
mod capture;
mod fast;
mod safe;

pub use alt_stack::AltStack;
pub use alt_stack::AltStackTracePrinter;
pub use alt_stack::DEFAULT_ALT_STACK_SIZE;
pub use capture::get_stack_trace;
pub use capture::warm_up;
pub use fast::FastStackTracePrinter;
pub use safe::SafeStackTracePrinter;
