#[cfg(target_env = "gnu")]
use std::mem::transmute;
#[cfg(target_env = "gnu")]
use std::mem::MaybeUninit;
#[cfg(target_env = "gnu")]
use std::os::raw::c_int;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::process::abort;
use std::ptr;

use crate::util::page_size;

use super::SafeStackTracePrinter;


/// The default size of the mapping backing an alternate stack.
pub const DEFAULT_ALT_STACK_SIZE: usize = 1 << 20;


#[cfg(target_env = "gnu")]
extern "C" {
    fn getcontext(ucp: *mut libc::ucontext_t) -> c_int;
    fn makecontext(ucp: *mut libc::ucontext_t, func: extern "C" fn(), argc: c_int, ...);
    fn swapcontext(oucp: *mut libc::ucontext_t, ucp: *const libc::ucontext_t) -> c_int;
}


/// An anonymous memory mapping with inaccessible guard pages at both
/// ends.
struct GuardedStack {
    addr: *mut c_void,
    len: usize,
    page_size: usize,
}

impl GuardedStack {
    fn map(len: usize, page_size: usize) -> Option<Self> {
        // SAFETY: Creating a new anonymous mapping has no effect on
        //         existing memory.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return None
        }

        let slf = Self {
            addr,
            len,
            page_size,
        };
        let upper = slf.upper_bound();
        // SAFETY: Both ranges are page aligned and lie within our
        //         mapping.
        let rc = unsafe { libc::mprotect(slf.addr, page_size, libc::PROT_NONE) };
        if rc != 0 {
            return None
        }
        let rc = unsafe {
            libc::mprotect(
                slf.addr.cast::<u8>().add(upper).cast(),
                len - upper,
                libc::PROT_NONE,
            )
        };
        if rc != 0 {
            return None
        }
        Some(slf)
    }

    /// The offset of the upper guard region.
    #[inline]
    fn upper_bound(&self) -> usize {
        ((self.len - 1) / self.page_size) * self.page_size
    }

    /// The usable stack region, between the guards.
    fn usable(&self) -> (*mut c_void, usize) {
        // SAFETY: The first page is part of the mapping.
        let base = unsafe { self.addr.cast::<u8>().add(self.page_size) };
        (base.cast(), self.upper_bound() - self.page_size)
    }
}

impl Drop for GuardedStack {
    fn drop(&mut self) {
        // SAFETY: The mapping was created by us and is no longer in use.
        let _rc = unsafe { libc::munmap(self.addr, self.len) };
    }
}


/// The function run on the alternate stack.
type Payload<'f> = &'f mut dyn FnMut();

extern "C" fn trampoline(payload: *mut c_void) {
    // SAFETY: `AltStack::run` passes a pointer to a `Payload` that
    //         outlives the context switch.
    let payload = unsafe { &mut *payload.cast::<Payload<'_>>() };
    // Unwinding cannot cross the context boundary.
    if catch_unwind(AssertUnwindSafe(|| payload())).is_err() {
        abort()
    }
}


/// A runner executing functions on a freshly mapped stack.
///
/// The stack is mapped for each invocation and protected by guard
/// pages at both ends. Running on it is useful when the current stack
/// cannot be trusted, for example because it overflowed.
#[derive(Clone, Copy, Debug)]
pub struct AltStack {
    size: usize,
}

impl AltStack {
    /// Create a new `AltStack` using [`DEFAULT_ALT_STACK_SIZE`].
    pub fn new() -> Self {
        Self::with_size(DEFAULT_ALT_STACK_SIZE)
    }

    /// Create a new `AltStack` mapping `size` bytes, including guard
    /// pages.
    pub fn with_size(size: usize) -> Self {
        Self { size }
    }

    /// Retrieve the size of the stack mapping.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` to completion on an alternate stack.
    ///
    /// Returns `false` if the stack could not be set up, in which case
    /// `f` is not run. A panic inside `f` aborts the process.
    pub fn run<F>(&self, f: F) -> bool
    where
        F: FnOnce(),
    {
        let mut f = Some(f);
        let mut call = || {
            if let Some(f) = f.take() {
                f()
            }
        };
        let mut payload: Payload<'_> = &mut call;
        // SAFETY: `payload` outlives the execution on the alternate
        //         stack.
        let ran = unsafe { self.switch(ptr::addr_of_mut!(payload).cast()) };
        ran && f.is_none()
    }

    #[cfg(target_env = "gnu")]
    unsafe fn switch(&self, payload: *mut c_void) -> bool {
        let page_size = match page_size() {
            Some(page_size) => page_size,
            None => return false,
        };
        if page_size * 2 >= self.size {
            return false
        }

        let mut current = MaybeUninit::<libc::ucontext_t>::zeroed();
        let mut alt = MaybeUninit::<libc::ucontext_t>::zeroed();
        if unsafe { getcontext(alt.as_mut_ptr()) } != 0 {
            return false
        }

        let stack = match GuardedStack::map(self.size, page_size) {
            Some(stack) => stack,
            None => return false,
        };
        let (base, len) = stack.usable();

        // SAFETY: `alt` got initialized by `getcontext`.
        let alt_ref = unsafe { alt.assume_init_mut() };
        alt_ref.uc_link = current.as_mut_ptr();
        alt_ref.uc_stack.ss_sp = base;
        alt_ref.uc_stack.ss_size = len;

        let entry = trampoline as extern "C" fn(*mut c_void);
        // SAFETY: `makecontext` passes the single pointer argument on to
        //         `trampoline` as declared.
        let entry = unsafe { transmute::<extern "C" fn(*mut c_void), extern "C" fn()>(entry) };
        let () = unsafe { makecontext(alt.as_mut_ptr(), entry, 1, payload) };

        // Control returns here once `trampoline` finished, by means of
        // `uc_link`.
        let rc = unsafe { swapcontext(current.as_mut_ptr(), alt.as_ptr()) };
        let () = drop(stack);
        rc == 0
    }

    #[cfg(not(target_env = "gnu"))]
    unsafe fn switch(&self, _payload: *mut c_void) -> bool {
        let _page_size = page_size();
        false
    }
}

impl Default for AltStack {
    fn default() -> Self {
        Self::new()
    }
}


/// A [`SafeStackTracePrinter`] that symbolizes on an alternate stack.
///
/// Only symbolization and printing happen on the alternate stack; the
/// stack trace is captured on the current stack. If the alternate
/// stack cannot be set up, the symbolized trace is omitted.
#[derive(Debug)]
pub struct AltStackTracePrinter {
    inner: SafeStackTracePrinter,
    stack: AltStack,
}

impl AltStackTracePrinter {
    /// Create a new `AltStackTracePrinter` reporting to `fd`.
    pub fn new(fd: RawFd) -> Self {
        Self::with_stack(fd, AltStack::new())
    }

    /// Create a new `AltStackTracePrinter` reporting to `fd`, using
    /// the provided alternate stack.
    pub fn with_stack(fd: RawFd, stack: AltStack) -> Self {
        Self {
            inner: SafeStackTracePrinter::new(fd),
            stack,
        }
    }

    /// Open the images of all currently loaded modules and load their
    /// debug information.
    ///
    /// See [`SafeStackTracePrinter::prepare`].
    pub fn prepare(&self) {
        self.inner.prepare()
    }

    /// Capture and print the calling thread's stack trace.
    ///
    /// If `symbolize` is `false`, only raw addresses are printed.
    #[inline(never)]
    pub fn print_stack_trace(&mut self, symbolize: bool) {
        let stack = self.stack;
        self.inner.print_stack_trace_with(symbolize, |inner| {
            let _ran = stack.run(|| inner.print_symbolized_stack_trace());
        })
    }

    /// Print a plain message.
    pub fn print(&mut self, s: &str) {
        self.inner.print(s)
    }

    /// Retrieve the file descriptor reported to.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.inner.fd()
    }

    /// Flush buffered output and synchronize the file descriptor.
    pub fn flush(&mut self) {
        self.inner.flush()
    }
}
