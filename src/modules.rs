//! Enumeration of the modules loaded into the running process.

use std::ffi::CStr;
use std::ffi::OsStr;
use std::fmt::Debug;
use std::os::raw::c_char;
use std::os::raw::c_int;
use std::os::raw::c_void;
use std::os::unix::ffi::OsStrExt as _;
use std::path::Path;
#[cfg(target_env = "gnu")]
use std::ptr;

use crate::Addr;


/// A module (executable or shared object) loaded into the process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Module<'path> {
    /// The path of the file backing the module.
    pub path: &'path Path,
    /// The difference between the addresses the module got loaded at
    /// and the addresses recorded in its file.
    pub load_bias: Addr,
}


/// A source of information about loaded modules.
pub trait ModuleSource: Debug {
    /// Invoke `f` for each loaded module, in load order, for as long as
    /// it returns `true`.
    ///
    /// Returns `false` if module information is unavailable altogether.
    fn visit(&self, f: &mut dyn FnMut(&Module<'_>) -> bool) -> bool;

    /// Count the number of loaded modules.
    fn count(&self) -> usize {
        let mut count = 0;
        let _available = self.visit(&mut |_module| {
            count += 1;
            true
        });
        count
    }
}

impl<T> ModuleSource for &T
where
    T: ModuleSource + ?Sized,
{
    #[inline]
    fn visit(&self, f: &mut dyn FnMut(&Module<'_>) -> bool) -> bool {
        (**self).visit(f)
    }
}


// Mirrors `struct link_map` from <link.h>.
#[repr(C)]
struct LinkMapEntry {
    l_addr: Addr,
    l_name: *const c_char,
    _l_ld: *const c_void,
    l_next: *const LinkMapEntry,
    _l_prev: *const LinkMapEntry,
}

// Mirrors `struct r_debug` from <link.h>.
#[repr(C)]
struct RDebug {
    r_version: c_int,
    r_map: *const LinkMapEntry,
    _r_brk: Addr,
    _r_state: c_int,
    _r_ldbase: Addr,
}

#[cfg(target_env = "gnu")]
extern "C" {
    static _r_debug: RDebug;
}

/// The only link map protocol version we understand.
const R_DEBUG_VERSION: c_int = 1;

/// The maximum length of a path, including the terminating NUL byte.
const PATH_MAX: usize = libc::PATH_MAX as usize;


/// Read the path of the running executable into `buf`.
fn self_exe_path(buf: &mut [u8; PATH_MAX]) -> Option<&Path> {
    let rc = unsafe {
        libc::readlink(
            b"/proc/self/exe\0".as_ptr().cast(),
            buf.as_mut_ptr().cast(),
            buf.len(),
        )
    };
    let len = usize::try_from(rc).ok()?;
    // A full buffer indicates truncation.
    if len == 0 || len >= buf.len() {
        return None
    }
    Some(Path::new(OsStr::from_bytes(&buf[..len])))
}


/// Module enumeration based on the dynamic linker's link map.
///
/// Walking the link map takes no locks and performs no memory
/// allocation, making it usable from signal handlers. The running
/// executable, which the link map lists without a name, is reported
/// under the path `/proc/self/exe` links to.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkMap;

impl LinkMap {
    #[cfg(target_env = "gnu")]
    fn r_debug() -> Option<&'static RDebug> {
        // SAFETY: `_r_debug` is provided by the dynamic linker and lives
        //         for the entire life time of the process.
        let r_debug = unsafe { &*ptr::addr_of!(_r_debug) };
        (r_debug.r_version == R_DEBUG_VERSION).then_some(r_debug)
    }

    #[cfg(not(target_env = "gnu"))]
    fn r_debug() -> Option<&'static RDebug> {
        None
    }
}

impl ModuleSource for LinkMap {
    fn visit(&self, f: &mut dyn FnMut(&Module<'_>) -> bool) -> bool {
        let r_debug = match Self::r_debug() {
            Some(r_debug) => r_debug,
            None => return false,
        };

        let mut buf = [0u8; PATH_MAX];
        let self_path = match self_exe_path(&mut buf) {
            Some(path) => path,
            None => return false,
        };

        let mut entry = r_debug.r_map;
        while !entry.is_null() {
            // SAFETY: Link map entries are valid for as long as the
            //         corresponding module is loaded.
            let lmap = unsafe { &*entry };
            let name = if lmap.l_name.is_null() {
                &[][..]
            } else {
                // SAFETY: `l_name` is a valid NUL terminated string.
                unsafe { CStr::from_ptr(lmap.l_name) }.to_bytes()
            };
            let path = if name.is_empty() {
                self_path
            } else {
                Path::new(OsStr::from_bytes(name))
            };

            let module = Module {
                path,
                load_bias: lmap.l_addr,
            };
            if !f(&module) {
                break
            }
            entry = lmap.l_next;
        }
        true
    }
}


/// Count the number of modules currently loaded into the process.
pub fn count_loaded_modules() -> usize {
    LinkMap.count()
}
