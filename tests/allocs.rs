#![allow(
    clippy::fn_to_numeric_cast,
    clippy::let_and_return,
    clippy::let_unit_value
)]

use std::alloc::System;
use std::fs;
use std::fs::File;
use std::hint::black_box;
use std::os::unix::io::AsRawFd as _;

use stacksym::print::FdPrinter;
use stacksym::print::PrintOptions;
use stacksym::print::SymbolizePrinter as _;
use stacksym::trace::warm_up;
use stacksym::trace::SafeStackTracePrinter;
use stacksym::SourceLocation;
use stacksym::SymbolizedFrame;

use stats_alloc::Region;
use stats_alloc::StatsAlloc;
use stats_alloc::INSTRUMENTED_SYSTEM;

use tempfile::NamedTempFile;

#[global_allocator]
static GLOBAL: &StatsAlloc<System> = &INSTRUMENTED_SYSTEM;


#[inline(never)]
fn report_symbolized(reporter: &mut SafeStackTracePrinter) {
    let () = reporter.print_stack_trace(true);
}


/// Check that the signal safe code paths do not allocate.
///
/// Allocation statistics are process wide, so all checks live in a
/// single test to not be disturbed by concurrently running ones.
#[test]
fn signal_safe_paths_allocation_free() {
    let devnull = File::options().write(true).open("/dev/null").unwrap();
    let fd = devnull.as_raw_fd();

    // Printing pre-resolved frames.
    let frames = [
        SymbolizedFrame::from_static(
            0x1000,
            Some("main"),
            SourceLocation {
                file: Some("src/main.rs"),
                line: 42,
                main_file: Some("src/lib.rs"),
            },
        ),
        SymbolizedFrame::from_static(0x2000, None, SourceLocation::default()),
        SymbolizedFrame::from_static(
            0x2800,
            Some("_ZN7stacksym5print17h0123456789abcdefE"),
            SourceLocation::default(),
        ),
        SymbolizedFrame::from_static(0x2c00, Some("_ZN3foo3barEv"), SourceLocation::default()),
        SymbolizedFrame::new(0x3000),
    ];
    let mut printer = FdPrinter::new(fd, PrintOptions::COLOR, 4096);

    let region = Region::new(GLOBAL);
    let () = printer.println_frames(black_box(&frames), 0);
    let () = printer.flush();
    let stats = region.change();
    assert_eq!(stats.allocations, 0, "{stats:#?}");
    assert_eq!(stats.reallocations, 0, "{stats:#?}");

    // Capturing and printing raw addresses.
    let () = warm_up();
    let mut reporter = SafeStackTracePrinter::new(fd);

    let region = Region::new(GLOBAL);
    let () = reporter.print_stack_trace(false);
    let () = reporter.print("done\n");
    let () = reporter.flush();
    let stats = region.change();
    assert_eq!(stats.allocations, 0, "{stats:#?}");
    assert_eq!(stats.reallocations, 0, "{stats:#?}");

    // Capturing, symbolizing, and printing, once all images got opened
    // up front.
    let tmp = NamedTempFile::new().unwrap();
    let mut reporter = SafeStackTracePrinter::new(tmp.as_file().as_raw_fd());
    let () = reporter.prepare();

    let region = Region::new(GLOBAL);
    let () = report_symbolized(&mut reporter);
    let () = report_symbolized(&mut reporter);
    let stats = region.change();
    assert_eq!(stats.allocations, 0, "{stats:#?}");
    assert_eq!(stats.reallocations, 0, "{stats:#?}");

    let output = fs::read_to_string(tmp.path()).unwrap();
    let first = output.lines().next().unwrap();
    assert!(first.contains("report_symbolized"), "{output}");
}
