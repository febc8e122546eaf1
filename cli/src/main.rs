#![allow(clippy::let_and_return, clippy::let_unit_value)]

mod args;

use std::hint::black_box;
use std::io::stderr;
use std::io::stdout;
use std::os::unix::io::AsRawFd as _;
use std::ptr;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;

use stacksym::print::PrintOptions;
use stacksym::print::StreamPrinter;
use stacksym::default_elf_cache;
use stacksym::modules::ModuleSource;
use stacksym::print::SymbolizePrinter;
use stacksym::signal::install_fatal_signal_handler;
use stacksym::symbolize::Symbolizer;
use stacksym::trace::get_stack_trace;
use stacksym::trace::SafeStackTracePrinter;
use stacksym::Addr;
use stacksym::FrameArray;
use stacksym::ImageCache;
use stacksym::LocationInfoMode;
use stacksym::SymbolizedFrame;
use stacksym::MAX_INLINE_FRAMES;
use stacksym::MAX_STACK_TRACE_DEPTH;

use clap::Parser as _;

use tracing::debug;
use tracing::subscriber::set_global_default as set_global_subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::FmtSubscriber;


fn print_options(trace: &args::Trace) -> PrintOptions {
    let mut options = PrintOptions::DEFAULT;
    if trace.terse {
        options |= PrintOptions::TERSE;
    }
    if trace.no_address {
        options |= PrintOptions::NO_FRAME_ADDRESS;
    }
    if trace.no_location {
        options |= PrintOptions::NO_FILE_AND_LINE;
    }
    if trace.color {
        options |= PrintOptions::COLOR;
    } else {
        options |= PrintOptions::COLOR_IF_TTY;
    }
    options
}

/// Symbolize a captured stack trace into `frames`.
///
/// The first address belongs to the capturing function and is left
/// out.
fn symbolize_trace<C, M>(
    symbolizer: &Symbolizer<C, M>,
    addrs: &[Addr],
    frames: &mut [SymbolizedFrame],
) -> usize
where
    C: ImageCache,
    M: ModuleSource,
{
    // Frames still carry the results of any previous trace.
    let () = frames.fill_with(SymbolizedFrame::default);
    let addrs = addrs.get(1..).unwrap_or_default();
    symbolizer.symbolize(addrs, frames)
}

/// Capture, symbolize, and print the current stack trace.
#[inline(never)]
fn print_trace<P>(symbolizer: &Symbolizer, printer: &mut P, frames: &mut [SymbolizedFrame])
where
    P: SymbolizePrinter,
{
    let mut addrs = FrameArray::<MAX_STACK_TRACE_DEPTH>::new();
    if !get_stack_trace(&mut addrs) {
        return printer.print_str("(error retrieving stack trace)\n")
    }
    debug!("captured {} frames", addrs.frame_count);

    let count = symbolize_trace(symbolizer, addrs.addresses(), frames);
    let () = printer.println_frames(&frames[..count], 0);
    printer.flush()
}

/// The handler for the 'trace' command.
fn trace(trace: args::Trace) -> Result<()> {
    if trace.unsymbolized {
        let mut printer = SafeStackTracePrinter::new(stdout().as_raw_fd());
        for _ in 0..trace.repeat {
            let () = printer.print_stack_trace(false);
        }
        return Ok(())
    }

    let mode = if trace.inline {
        LocationInfoMode::FullWithInline
    } else {
        LocationInfoMode::Full
    };
    let symbolizer = Symbolizer::new(default_elf_cache(), mode, MAX_STACK_TRACE_DEPTH);
    let mut printer = StreamPrinter::for_terminal(stdout(), print_options(&trace));
    // Leave room for inlined frames.
    let mut frames =
        vec![SymbolizedFrame::default(); MAX_STACK_TRACE_DEPTH * (MAX_INLINE_FRAMES + 1)];

    for i in 0..trace.repeat {
        if i > 0 {
            let () = printer.print_str("\n");
        }
        let () = print_trace(&symbolizer, &mut printer, &mut frames);
    }
    Ok(())
}


#[inline(never)]
fn crash_with(signal: args::Signal, depth: usize) {
    if black_box(depth) > 0 {
        let () = crash_with(signal, depth - 1);
        // Prevent tail call optimization from collapsing the chain.
        let () = black_box(());
        return
    }

    match signal {
        args::Signal::Segv => {
            let ptr = black_box(ptr::null_mut::<u64>());
            // SAFETY: Not safe at all; we want to crash.
            let () = unsafe { ptr::write_volatile(ptr, 42) };
        }
        // SAFETY: `raise` is always safe to call.
        args::Signal::Abrt => unsafe {
            let _rc = libc::raise(libc::SIGABRT);
        },
        // SAFETY: `raise` is always safe to call.
        args::Signal::Bus => unsafe {
            let _rc = libc::raise(libc::SIGBUS);
        },
        // SAFETY: `raise` is always safe to call.
        args::Signal::Term => unsafe {
            let _rc = libc::raise(libc::SIGTERM);
        },
    }
}

/// The handler for the 'crash' command.
fn crash(crash: args::Crash) -> Result<()> {
    let fd = stderr().as_raw_fd();
    let () = install_fatal_signal_handler(fd).context("failed to install fatal signal handler")?;
    let () = crash_with(crash.signal, crash.depth);
    bail!("program survived {:?}", crash.signal)
}


fn main() -> Result<()> {
    let args = args::Args::parse();
    let level = match args.verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_span_events(FmtSpan::FULL)
        .with_timer(SystemTime)
        .with_writer(stderr)
        .finish();

    let () =
        set_global_subscriber(subscriber).with_context(|| "failed to set tracing subscriber")?;

    match args.command {
        args::Command::Trace(trace) => self::trace(trace),
        args::Command::Crash(crash) => self::crash(crash),
    }
}
