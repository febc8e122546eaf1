use stacksym::print::PrintOptions;
use stacksym::print::StreamPrinter;
use stacksym::print::StringPrinter;
use stacksym::print::SymbolizePrinter as _;
use stacksym::default_elf_cache;
use stacksym::symbolize::Symbolizer;
use stacksym::Addr;
use stacksym::LocationInfoMode;
use stacksym::SymbolizedFrame;

use test_log::test;


#[inline(never)]
fn printed_function() -> Addr {
    printed_function as Addr
}

fn symbolize_one(addr: Addr) -> SymbolizedFrame {
    let symbolizer: Symbolizer = Symbolizer::default();
    let mut frames = [SymbolizedFrame::default()];
    let _count = symbolizer.symbolize(&[addr], &mut frames);
    let [frame] = frames;
    frame
}


/// Check that a frame of the test binary gets printed in full.
#[test]
fn print_resolved_frame() {
    let addr = printed_function();
    let frame = symbolize_one(addr);

    let mut printer = StringPrinter::new(PrintOptions::DEFAULT);
    let () = printer.println(&frame);
    let output = printer.into_string();

    let expected = format!("0x{addr:016x} ");
    assert!(output.starts_with(&expected), "{output}");
    assert!(output.contains("printed_function"), "{output}");
    assert!(output.ends_with('\n'));
    if cfg!(feature = "dwarf") {
        assert!(output.contains("print.rs:"), "{output}");
    }
}

/// Check that the terse output of a frame only contains the name.
#[test]
fn print_resolved_frame_terse() {
    let frame = symbolize_one(printed_function());

    let mut printer = StringPrinter::new(PrintOptions::TERSE);
    let () = printer.println(&frame);
    let output = printer.into_string();
    assert!(!output.starts_with("0x"), "{output}");
    assert!(output.contains("printed_function"), "{output}");
    assert_eq!(output.lines().count(), 1);
}

/// Check that only the location is printed with
/// `TERSE_FILE_AND_LINE`.
#[cfg(feature = "dwarf")]
#[test]
fn print_terse_file_and_line() {
    let frame = symbolize_one(printed_function());

    let mut printer = StringPrinter::new(PrintOptions::TERSE_FILE_AND_LINE);
    let () = printer.println(&frame);
    let output = printer.into_string();
    assert!(output.trim_end().ends_with(char::is_numeric), "{output}");
    assert!(!output.contains("printed_function"), "{output}");
}

/// Check that an unresolvable address is reported as not found.
#[test]
fn print_unresolved_frame() {
    let frame = symbolize_one(0x1);

    let mut printer = StreamPrinter::new(Vec::new(), PrintOptions::DEFAULT);
    let () = printer.println(&frame);
    let output = printer.into_inner();
    assert_eq!(output, b"0x0000000000000001 (not found)\n");
}

/// Check that frames resolved with a mode not reporting locations
/// print names only.
#[test]
fn print_without_location() {
    let symbolizer = Symbolizer::new(
        default_elf_cache(),
        LocationInfoMode::Disabled,
        0,
    );
    let mut frames = [SymbolizedFrame::default()];
    let _count = symbolizer.symbolize(&[printed_function()], &mut frames);

    let mut printer = StringPrinter::new(PrintOptions::NO_FRAME_ADDRESS);
    let () = printer.println(&frames[0]);
    let output = printer.into_string();
    assert!(output.starts_with(' '), "{output}");
    assert_eq!(output.lines().count(), 1, "{output}");
}
