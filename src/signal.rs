//! Reporting of stack traces on fatal signals.
//!
//! [`install_fatal_signal_handler`] installs handlers for the signals
//! that usually indicate a crash. When one of them is received, the
//! handler reports the signal and the symbolized stack trace of the
//! crashing thread, and then lets the default disposition of the
//! signal take effect.

use std::io;
use std::mem::MaybeUninit;
use std::os::raw::c_int;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::log::debug;
use crate::print::format_decimal;
use crate::print::AddressFormatter;
use crate::trace::warm_up;
use crate::trace::AltStackTracePrinter;
use crate::util::write_full;
use crate::Addr;
use crate::ErrorExt as _;
use crate::Result;


/// The signals that handlers get installed for.
pub const FATAL_SIGNALS: [c_int; 6] = [
    libc::SIGSEGV,
    libc::SIGILL,
    libc::SIGFPE,
    libc::SIGABRT,
    libc::SIGBUS,
    libc::SIGTERM,
];

/// The size of the signal stack set up for the installing thread.
const SIGNAL_STACK_SIZE: usize = 64 << 10;

/// The number of seconds a thread crashing while another one is
/// already reporting waits before terminating.
const CONCURRENT_CRASH_WAIT_SECS: u32 = 10;


/// Set once handlers got installed.
static INSTALLED: AtomicBool = AtomicBool::new(false);
/// The reporter used by the signal handler. Never freed once set.
static PRINTER: AtomicPtr<AltStackTracePrinter> = AtomicPtr::new(ptr::null_mut());
/// The thread currently reporting, if any, as returned by
/// `pthread_self`.
static REPORTING_THREAD: AtomicUsize = AtomicUsize::new(0);


/// Retrieve the name of `signo`, if it is one of the fatal signals.
fn signal_name(signo: c_int) -> &'static str {
    match signo {
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGILL => "SIGILL",
        libc::SIGFPE => "SIGFPE",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGTERM => "SIGTERM",
        _ => "UNKNOWN",
    }
}

/// Check whether `signo` carries a meaningful fault address.
fn has_fault_address(signo: c_int) -> bool {
    matches!(
        signo,
        libc::SIGSEGV | libc::SIGBUS | libc::SIGILL | libc::SIGFPE
    )
}


/// Write the report for `signo` using `printer`.
fn write_report(printer: &mut AltStackTracePrinter, signo: c_int, addr: Option<Addr>) {
    let mut buf = [0; 10];
    printer.print("*** Signal ");
    printer.print(format_decimal(signo.unsigned_abs(), &mut buf));
    printer.print(" (");
    printer.print(signal_name(signo));
    printer.print(") received ***\n");

    if let Some(addr) = addr {
        let mut formatter = AddressFormatter::new();
        printer.print("*** Fault address: ");
        printer.print(formatter.format(addr));
        printer.print(" ***\n");
    }

    let () = printer.print_stack_trace(true);
    printer.flush()
}

/// Write the report the fatal signal handler produces for `signo` to
/// `fd`.
///
/// `addr` is the faulting address, if any. Unlike the signal handler
/// itself, this function creates a new reporter and is not
/// async-signal-safe.
pub fn fatal_signal_report(fd: RawFd, signo: c_int, addr: Option<Addr>) {
    let mut printer = AltStackTracePrinter::new(fd);
    write_report(&mut printer, signo, addr)
}


extern "C" fn fatal_signal_handler(signo: c_int, info: *mut libc::siginfo_t, _ctx: *mut c_void) {
    let printer = PRINTER.load(Ordering::Acquire);
    if printer.is_null() {
        return
    }

    // SAFETY: `pthread_self` is always safe to call.
    let this = unsafe { libc::pthread_self() } as usize;
    if let Err(other) =
        REPORTING_THREAD.compare_exchange(0, this, Ordering::AcqRel, Ordering::Acquire)
    {
        if other == this {
            // SAFETY: `printer` is valid for the remainder of the
            //         process' life time.
            let fd = unsafe { (*printer).fd() };
            let () = write_full(fd, b"Entered fatal signal handler recursively.\n");
        } else {
            // SAFETY: `sleep` is async-signal-safe.
            let _remaining = unsafe { libc::sleep(CONCURRENT_CRASH_WAIT_SECS) };
        }
        return
    }

    let addr = if has_fault_address(signo) && !info.is_null() {
        // SAFETY: The kernel provides a valid `siginfo_t`.
        Some(unsafe { (*info).si_addr() } as Addr)
    } else {
        None
    };

    // SAFETY: Only the reporting thread ever accesses the printer.
    let printer = unsafe { &mut *printer };
    let () = write_report(printer, signo, addr);

    // The disposition got reset to the default on entry. Raising the
    // signal again makes it take effect once we return.
    // SAFETY: `raise` is async-signal-safe.
    let _rc = unsafe { libc::raise(signo) };
}


/// Set up a signal stack for the calling thread, so that the handler
/// can run even after a stack overflow.
fn install_signal_stack() -> Result<()> {
    let stack = vec![0u8; SIGNAL_STACK_SIZE].leak();
    let stack = libc::stack_t {
        ss_sp: stack.as_mut_ptr().cast(),
        ss_flags: 0,
        ss_size: stack.len(),
    };
    // SAFETY: `stack` describes valid memory that is never freed.
    let rc = unsafe { libc::sigaltstack(&stack, ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::last_os_error()).context("failed to set up signal stack")
    }
    Ok(())
}

/// Install handlers reporting the stack trace to `fd` for all of
/// [`FATAL_SIGNALS`].
///
/// The images of all currently loaded modules are opened and their
/// debug information is loaded up front, so that the handler performs
/// no memory allocation. Crashes inside modules loaded later on are
/// reported without symbols. The calling thread additionally gets a
/// signal stack, so that crashes caused by a stack overflow on it can
/// be reported. Calling this function more than once has no effect.
pub fn install_fatal_signal_handler(fd: RawFd) -> Result<()> {
    if INSTALLED.swap(true, Ordering::AcqRel) {
        return Ok(())
    }

    let () = warm_up();
    let printer = Box::new(AltStackTracePrinter::new(fd));
    let () = printer.prepare();
    let printer = Box::into_raw(printer);
    let () = PRINTER.store(printer, Ordering::Release);
    let () = install_signal_stack()?;

    let handler: extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void) = fatal_signal_handler;
    for signo in FATAL_SIGNALS {
        let mut action = MaybeUninit::<libc::sigaction>::zeroed();
        // SAFETY: An all-zero `sigaction` is valid.
        let action = unsafe { action.assume_init_mut() };
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK | libc::SA_RESETHAND;
        // SAFETY: `sa_mask` is a valid signal set.
        let _rc = unsafe { libc::sigemptyset(&mut action.sa_mask) };

        // SAFETY: `action` is fully initialized.
        let rc = unsafe { libc::sigaction(signo, action, ptr::null_mut()) };
        if rc != 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("failed to install handler for {}", signal_name(signo)))
        }
        debug!("installed fatal signal handler for {}", signal_name(signo));
    }
    Ok(())
}
