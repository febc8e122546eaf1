use crate::frame::FrameArray;
use crate::SymbolizedFrame;


/// Capture the return addresses of the calling thread's stack into
/// `array`, innermost first.
///
/// Frames of `array` are reset. Returns `false` if no stack trace
/// could be captured.
///
/// Capturing is async-signal-safe once the unwinder got loaded, see
/// [`warm_up`].
#[inline(never)]
pub fn get_stack_trace<const N: usize>(array: &mut FrameArray<N>) -> bool {
    array.frame_count = 0;
    let count = capture(&mut array.addresses);
    if count == 0 {
        return false
    }

    array.frame_count = count;
    for frame in &mut array.frames[..count] {
        *frame = SymbolizedFrame::default();
    }
    true
}

#[cfg(target_env = "gnu")]
#[inline(always)]
fn capture(addrs: &mut [usize]) -> usize {
    let len = libc::c_int::try_from(addrs.len()).unwrap_or(libc::c_int::MAX);
    // SAFETY: `addrs` is a writable buffer of at least `len` pointer
    //         sized entries.
    let count = unsafe { libc::backtrace(addrs.as_mut_ptr().cast(), len) };
    usize::try_from(count).unwrap_or(0)
}

#[cfg(not(target_env = "gnu"))]
#[inline(always)]
fn capture(_addrs: &mut [usize]) -> usize {
    0
}


/// Prepare stack capturing for use from a signal handler.
///
/// The first capture may load the unwinder library and allocate memory,
/// neither of which is safe inside a signal handler. Invoke this
/// function early, before any signal may arrive.
pub fn warm_up() {
    let mut array = FrameArray::<4>::new();
    let _captured = get_stack_trace(&mut array);
}


#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;


    /// Check that we can capture the current stack.
    #[cfg(target_env = "gnu")]
    #[test]
    fn capture_stack() {
        let () = warm_up();

        let mut array = FrameArray::<64>::new();
        array.frames[0] = SymbolizedFrame::from_static(1, Some("stale"), Default::default());
        assert!(get_stack_trace(&mut array));
        assert!(array.frame_count > 2);
        assert!(array.addresses().iter().all(|addr| *addr != 0));
        assert!(array.frames().iter().all(|frame| !frame.found()));
    }

    /// Check that capturing is bounded by the array's capacity.
    #[cfg(target_env = "gnu")]
    #[test]
    fn capture_bounded() {
        let mut array = FrameArray::<2>::new();
        assert!(get_stack_trace(&mut array));
        assert_eq!(array.frame_count, 2);
    }

    /// Check that capturing into an empty array fails.
    #[test]
    fn capture_empty() {
        let mut array = FrameArray::<0>::new();
        assert!(!get_stack_trace(&mut array));
        assert_eq!(array.frame_count, 0);
    }
}
