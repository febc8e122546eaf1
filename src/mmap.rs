use std::fs::File;
use std::ops::Deref;
use std::sync::Arc;

use memmap2::Mmap as Mapping;
use memmap2::MmapOptions;

use crate::Error;
use crate::ErrorExt as _;
use crate::Result;


/// A type encapsulating a read-only mapping of an entire file.
///
/// Clones share the same underlying mapping. The mapped bytes never
/// move for as long as any clone is alive.
#[derive(Clone, Debug)]
pub(crate) struct Mmap {
    /// The actual memory mapping. `None` for empty files.
    mapping: Option<Arc<Mapping>>,
}

impl Mmap {
    /// Map the provided file into memory, in its entirety.
    pub(crate) fn map(file: &File) -> Result<Self> {
        let len = libc::size_t::try_from(file.metadata()?.len())
            .map_err(Error::with_invalid_data)
            .context("file is too large to mmap")?;

        // The kernel does not allow mmap'ing a region of size 0. We
        // want to enable this case transparently, though.
        let mmap = if len == 0 {
            Self { mapping: None }
        } else {
            let mapping = unsafe { MmapOptions::new().len(len).map(file) }?;
            Self {
                mapping: Some(Arc::new(mapping)),
            }
        };
        Ok(mmap)
    }
}

impl Deref for Mmap {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        if let Some(mapping) = &self.mapping {
            mapping.deref()
        } else {
            &[]
        }
    }
}
