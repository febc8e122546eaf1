use std::path::Path;
use std::sync::Arc;
use std::thread;

use stacksym::default_elf_cache;
use stacksym::symbolize::Symbolizer;
use stacksym::trace::get_stack_trace;
use stacksym::Addr;
use stacksym::ElfCache;
use stacksym::FrameArray;
use stacksym::LocationInfoMode;
use stacksym::SignalSafeElfCache;
use stacksym::SymbolizedFrame;

use test_log::test;


#[inline(never)]
fn first_function() -> Addr {
    first_function as Addr
}

#[inline(never)]
fn second_function() -> Addr {
    second_function as Addr
}

fn frames(count: usize) -> Vec<SymbolizedFrame> {
    (0..count).map(|_| SymbolizedFrame::default()).collect()
}

/// The comparable parts of a symbolized frame.
type Summary = (Addr, bool, Option<String>, Option<String>, u32);

fn summarize(frame: &SymbolizedFrame) -> Summary {
    let location = frame.location();
    (
        frame.addr(),
        frame.found(),
        frame.name().map(str::to_string),
        location.file.map(str::to_string),
        location.line,
    )
}


/// Check that we can symbolize functions of the test binary.
#[test]
fn symbolize_own_functions() {
    let symbolizer = Symbolizer::new(default_elf_cache(), LocationInfoMode::Full, 0);
    let addrs = [first_function(), second_function()];
    let mut frames = frames(2);
    let count = symbolizer.symbolize(&addrs, &mut frames);
    assert_eq!(count, 2);

    let name = frames[0].name().unwrap();
    assert!(name.contains("first_function"), "{name}");
    let name = frames[1].name().unwrap();
    assert!(name.contains("second_function"), "{name}");
    assert_eq!(frames[0].addr(), addrs[0]);

    let exe = std::env::current_exe().unwrap();
    let image = frames[0].image().unwrap();
    assert_eq!(
        image.path().canonicalize().unwrap(),
        exe.canonicalize().unwrap()
    );

    if cfg!(feature = "dwarf") {
        let location = frames[0].location();
        let file = location.file.unwrap();
        assert!(file.ends_with("symbolize.rs"), "{file}");
        assert!(location.line > 0);
    }
}

/// Check that we can symbolize functions of shared objects.
#[test]
fn symbolize_shared_object_function() {
    let symbolizer = Symbolizer::new(default_elf_cache(), LocationInfoMode::Disabled, 0);
    let mut frames = frames(1);
    let _count = symbolizer.symbolize(&[libc::malloc as Addr], &mut frames);

    assert!(frames[0].found());
    let name = frames[0].name().unwrap();
    assert!(name.contains("malloc"), "{name}");
    let path = frames[0].image().unwrap().path();
    let file_name = path.file_name().unwrap().to_string_lossy();
    assert!(file_name.starts_with("libc"), "{}", path.display());
    assert!(!frames[0].location().has_file_and_line());
}

/// Check that addresses outside of any module are reported as not
/// found.
#[test]
fn symbolize_unmapped_address() {
    let symbolizer = Symbolizer::new(default_elf_cache(), LocationInfoMode::Full, 0);
    let mut frames = frames(2);
    let count = symbolizer.symbolize(&[0x1, first_function()], &mut frames);
    assert_eq!(count, 2);
    assert!(!frames[0].found());
    assert_eq!(frames[0].addr(), 0x1);
    assert!(frames[1].found());
}

/// Check that results served from the symbol cache match freshly
/// computed ones.
#[test]
fn symbolize_cached() {
    let symbolizer = Symbolizer::new(default_elf_cache(), LocationInfoMode::Full, 16);
    let addrs = [first_function(), second_function(), first_function()];

    let mut first = frames(3);
    let _count = symbolizer.symbolize(&addrs, &mut first);
    let mut second = frames(3);
    let _count = symbolizer.symbolize(&addrs, &mut second);

    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.addr(), b.addr());
        assert_eq!(a.name(), b.name());
        assert_eq!(a.location(), b.location());
    }
    assert_eq!(symbolizer.symbol_cache().unwrap().len(), 2);
}

/// Check that a single `Symbolizer` can be shared by multiple threads
/// while both of its caches keep evicting entries.
#[test]
fn symbolize_concurrently() {
    let addrs = [
        first_function(),
        libc::malloc as Addr,
        second_function(),
        libc::free as Addr,
        0x1,
        libc::getpid as Addr,
    ];

    let symbolize = |symbolizer: &Symbolizer, addr| {
        let mut frames = frames(1);
        let _count = symbolizer.symbolize(&[addr], &mut frames);
        summarize(&frames[0])
    };

    let baseline = Symbolizer::new(Arc::new(ElfCache::new(16)), LocationInfoMode::Full, 0);
    let expected = addrs
        .iter()
        .map(|addr| symbolize(&baseline, *addr))
        .collect::<Vec<_>>();
    assert!(expected[0].1);
    assert!(expected[1].1);
    assert!(!expected[4].1);

    let cache = Arc::new(ElfCache::new(2));
    let symbolizer = Symbolizer::new(Arc::clone(&cache), LocationInfoMode::Full, 2);
    let () = thread::scope(|scope| {
        for offset in 0..4 {
            let symbolizer = &symbolizer;
            let expected = &expected;
            let _handle = scope.spawn(move || {
                for round in 0..50 {
                    let idx = (offset + round) % addrs.len();
                    assert_eq!(symbolize(symbolizer, addrs[idx]), expected[idx]);
                }
            });
        }
    });

    assert!(cache.len() <= 2);
    assert!(symbolizer.symbol_cache().unwrap().len() <= 2);
}

/// Check that the signal safe image cache can be used for
/// symbolization.
#[test]
fn symbolize_signal_safe_cache() {
    let cache = SignalSafeElfCache::with_capacity(64);
    let symbolizer = Symbolizer::new(&cache, LocationInfoMode::Full, 0);

    let mut frames = frames(1);
    let _count = symbolizer.symbolize(&[second_function()], &mut frames);
    let name = frames[0].name().unwrap();
    assert!(name.contains("second_function"), "{name}");
    assert!(!cache.is_empty());
}

#[inline(always)]
fn capture_inlined(array: &mut FrameArray<16>) {
    assert!(get_stack_trace(array));
}

#[inline(never)]
fn capture_outer(array: &mut FrameArray<16>) {
    capture_inlined(array)
}

/// Check that inlined calls are reported in front of the function
/// they got inlined into.
#[cfg(all(target_env = "gnu", feature = "dwarf"))]
#[test]
fn symbolize_inlined_call() {
    let mut array = FrameArray::<16>::new();
    let () = capture_outer(&mut array);
    // The first captured address belongs to `get_stack_trace` itself.
    let addr = array.addresses()[1];

    let symbolizer = Symbolizer::new(default_elf_cache(), LocationInfoMode::FullWithInline, 0);
    let mut frames = frames(4);
    let count = symbolizer.symbolize(&[addr], &mut frames);
    assert_eq!(count, 2, "{frames:#?}");

    let name = frames[0].name().unwrap();
    assert!(name.contains("capture_inlined"), "{name}");
    let name = frames[1].name().unwrap();
    assert!(name.contains("capture_outer"), "{name}");
    assert!(frames.iter().take(2).all(|frame| frame.addr() == addr));

    let location = frames[0].location();
    let file = Path::new(location.file.unwrap());
    assert_eq!(file.file_name().unwrap(), "symbolize.rs");
}
