use std::fs;
use std::os::unix::io::AsRawFd as _;

use stacksym::print::FilePrinter;
use stacksym::print::PrintOptions;
use stacksym::trace::AltStackTracePrinter;
use stacksym::trace::FastStackTracePrinter;
use stacksym::trace::SafeStackTracePrinter;

use tempfile::NamedTempFile;
use test_fork::fork;
use test_log::test;


#[inline(never)]
fn report_fast(printer: &mut FastStackTracePrinter) {
    let () = printer.print_stack_trace(true);
}

#[inline(never)]
fn report_safe(printer: &mut SafeStackTracePrinter) {
    let () = printer.print_stack_trace(true);
}

#[inline(never)]
fn report_alt(printer: &mut AltStackTracePrinter) {
    let () = printer.print_stack_trace(true);
}


/// Check that the fast reporter names its caller first.
#[cfg(target_env = "gnu")]
#[test]
fn fast_stack_trace() {
    let tmp = NamedTempFile::new().unwrap();
    let printer = Box::new(FilePrinter::new(tmp.reopen().unwrap(), PrintOptions::DEFAULT));
    let mut reporter = FastStackTracePrinter::new(printer, 0, 64);
    let () = report_fast(&mut reporter);

    let output = fs::read_to_string(tmp.path()).unwrap();
    let first = output.lines().next().unwrap();
    assert!(first.starts_with("0x"), "{output}");
    assert!(first.contains("report_fast"), "{output}");
    assert!(output.contains("fast_stack_trace"), "{output}");
}

/// Check that the signal safe reporter names its caller first.
#[cfg(target_env = "gnu")]
#[test]
fn safe_stack_trace() {
    let tmp = NamedTempFile::new().unwrap();
    let mut reporter = SafeStackTracePrinter::new(tmp.as_file().as_raw_fd());
    let () = report_safe(&mut reporter);
    let () = reporter.print("--\n");
    let () = reporter.flush();

    let output = fs::read_to_string(tmp.path()).unwrap();
    let first = output.lines().next().unwrap();
    assert!(first.contains("report_safe"), "{output}");
    assert!(output.contains("safe_stack_trace"), "{output}");
    assert!(output.ends_with("--\n"), "{output}");
}

/// Check that reports symbolized on an alternate stack match the ones
/// produced on the current stack.
#[cfg(target_env = "gnu")]
#[fork]
#[test]
fn alt_stack_trace() {
    let tmp = NamedTempFile::new().unwrap();
    let mut reporter = AltStackTracePrinter::new(tmp.as_file().as_raw_fd());
    let () = report_alt(&mut reporter);

    let output = fs::read_to_string(tmp.path()).unwrap();
    let first = output.lines().next().unwrap();
    assert!(first.contains("report_alt"), "{output}");
    assert!(output.contains("alt_stack_trace"), "{output}");
}
