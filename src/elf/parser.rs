use std::borrow::Cow;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::mem;
use std::ops::Deref as _;

use crate::mmap::Mmap;
use crate::util::ReadRaw as _;
use crate::Error;
use crate::ErrorExt as _;
use crate::IntoError as _;
use crate::Result;

use super::types::Elf64_Chdr;
use super::types::Elf64_Ehdr;
use super::types::Elf64_Shdr;
use super::types::Elf64_Sym;
use super::types::ELFCLASS64;
use super::types::ELFCOMPRESS_ZLIB;
use super::types::ELFCOMPRESS_ZSTD;
use super::types::SHF_ALLOC;
use super::types::SHF_COMPRESSED;
use super::types::SHN_UNDEF;
use super::types::SHN_XINDEX;
use super::types::SHT_NOBITS;
use super::types::STT_FUNC;
use super::types::STT_OBJECT;


fn symbol_name<'mmap>(strtab: &'mmap [u8], sym: &Elf64_Sym) -> Option<&'mmap str> {
    strtab
        .get(sym.st_name as usize..)?
        .read_cstr()?
        .to_str()
        .ok()
}


/// A symbol table along with the string table its names refer to.
#[derive(Clone, Copy, Debug, Default)]
struct SymbolTable<'mmap> {
    syms: &'mmap [Elf64_Sym],
    strs: &'mmap [u8],
}

impl<'mmap> SymbolTable<'mmap> {
    /// Find the symbol covering `addr`.
    ///
    /// The lookup scans the table linearly and performs no memory
    /// allocation. Functions are preferred over variables.
    fn find_sym(&self, addr: u64) -> Option<(&'mmap str, u64)> {
        let mut object = None;
        for sym in self.syms {
            if !sym.is_func_or_object() || sym.st_shndx == SHN_UNDEF || !sym.covers(addr) {
                continue
            }

            if sym.type_() == STT_OBJECT {
                object = object.or(Some(sym));
            } else if let Some(name) = symbol_name(self.strs, sym) {
                return Some((name, sym.st_value))
            }
        }

        let sym = object?;
        let name = symbol_name(self.strs, sym)?;
        Some((name, sym.st_value))
    }
}


/// The parsed parts of an ELF file that we care about.
struct ElfData<'mmap> {
    /// A slice of the raw ELF data.
    elf_data: &'mmap [u8],
    /// The ELF section headers.
    shdrs: &'mmap [Elf64_Shdr],
    /// The section name string table.
    shstrtab: &'mmap [u8],
    /// The `.symtab` symbol table, if present.
    symtab: SymbolTable<'mmap>,
    /// The `.dynsym` symbol table, if present.
    dynsym: SymbolTable<'mmap>,
}

impl<'mmap> ElfData<'mmap> {
    /// Read the very first section header.
    ///
    /// ELF contains a couple of clauses that special case data ranges
    /// of certain member variables to reference data from this header,
    /// which otherwise is zeroed out.
    fn read_first_shdr(elf_data: &'mmap [u8], ehdr: &Elf64_Ehdr) -> Result<&'mmap Elf64_Shdr> {
        let shdr = elf_data
            .get(ehdr.e_shoff as usize..)
            .ok_or_invalid_data(|| "Elf64_Ehdr::e_shoff is invalid")?
            .read_pod_ref::<Elf64_Shdr>()
            .ok_or_invalid_data(|| "failed to read Elf64_Shdr")?;
        Ok(shdr)
    }

    fn parse(elf_data: &'mmap [u8]) -> Result<Self> {
        let mut data = elf_data;
        let ehdr = data
            .read_pod_ref::<Elf64_Ehdr>()
            .ok_or_invalid_data(|| "failed to read Elf64_Ehdr")?;
        if !(ehdr.e_ident[0] == 0x7f
            && ehdr.e_ident[1] == b'E'
            && ehdr.e_ident[2] == b'L'
            && ehdr.e_ident[3] == b'F')
        {
            return Err(Error::with_invalid_data(format!(
                "encountered unexpected e_ident: {:x?}",
                &ehdr.e_ident[0..4]
            )))
        }
        if ehdr.e_ident[4] != ELFCLASS64 {
            return Err(Error::with_unsupported(format!(
                "unsupported ELF class: {}",
                ehdr.e_ident[4]
            )))
        }

        // "If the number of entries in the section header table is larger than
        // or equal to SHN_LORESERVE, e_shnum holds the value zero and the real
        // number of entries in the section header table is held in the sh_size
        // member of the initial entry in section header table."
        let shnum = if ehdr.e_shnum == 0 && ehdr.e_shoff != 0 {
            let shdr = Self::read_first_shdr(elf_data, ehdr)?;
            usize::try_from(shdr.sh_size).ok().ok_or_invalid_data(|| {
                format!(
                    "ELF file contains unsupported number of sections ({})",
                    shdr.sh_size
                )
            })?
        } else {
            ehdr.e_shnum.into()
        };

        let shdrs = elf_data
            .get(ehdr.e_shoff as usize..)
            .ok_or_invalid_data(|| "Elf64_Ehdr::e_shoff is invalid")?
            .read_pod_slice_ref::<Elf64_Shdr>(shnum)
            .ok_or_invalid_data(|| "failed to read Elf64_Shdr")?;

        let mut slf = Self {
            elf_data,
            shdrs,
            shstrtab: &[],
            symtab: SymbolTable::default(),
            dynsym: SymbolTable::default(),
        };

        if shnum == 0 {
            return Ok(slf)
        }

        // "If the index of section name string table section is larger
        // than or equal to SHN_LORESERVE (0xff00), this member holds
        // SHN_XINDEX (0xffff) and  the real index of the section name
        // string table section is held in the sh_link member of the
        // initial entry in section header table."
        let shstrndx = if ehdr.e_shstrndx == SHN_XINDEX {
            Self::read_first_shdr(elf_data, ehdr)?.sh_link as usize
        } else {
            usize::from(ehdr.e_shstrndx)
        };
        slf.shstrtab = slf
            .section_data(shstrndx)
            .context("failed to read section name string table")?;
        slf.symtab = slf.parse_symtab(".symtab", ".strtab")?;
        slf.dynsym = slf.parse_symtab(".dynsym", ".dynstr")?;
        Ok(slf)
    }

    /// Retrieve the raw section data for the ELF section at index
    /// `idx`.
    fn section_data(&self, idx: usize) -> Result<&'mmap [u8]> {
        let section = self
            .shdrs
            .get(idx)
            .ok_or_invalid_input(|| format!("ELF section index ({idx}) out of bounds"))?;

        if section.sh_type == SHT_NOBITS {
            return Ok(&[])
        }

        let data = self
            .elf_data
            .get(section.sh_offset as usize..)
            .ok_or_invalid_data(|| "failed to read section data: invalid offset")?
            .read_slice(section.sh_size as usize)
            .ok_or_invalid_data(|| "failed to read section data: invalid size")?;
        Ok(data)
    }

    /// Get the name of the section at a given index.
    fn section_name(&self, idx: usize) -> Option<&'mmap str> {
        let sect = self.shdrs.get(idx)?;
        self.shstrtab
            .get(sect.sh_name as usize..)?
            .read_cstr()?
            .to_str()
            .ok()
    }

    /// Find the section of a given name.
    ///
    /// This function return the index of the section if found.
    fn find_section(&self, name: &str) -> Option<usize> {
        (1..self.shdrs.len()).find(|idx| self.section_name(*idx) == Some(name))
    }

    fn parse_symtab(&self, syms: &str, strs: &str) -> Result<SymbolTable<'mmap>> {
        let idx = if let Some(idx) = self.find_section(syms) {
            idx
        } else {
            // The symbol table does not exists. Fake an empty one.
            return Ok(SymbolTable::default())
        };

        let mut data = self.section_data(idx)?;
        if data.len() % mem::size_of::<Elf64_Sym>() != 0 {
            return Err(Error::with_invalid_data(format!(
                "size of {syms} section is invalid"
            )))
        }
        let count = data.len() / mem::size_of::<Elf64_Sym>();
        let syms = data
            .read_pod_slice_ref::<Elf64_Sym>(count)
            .ok_or_invalid_data(|| "failed to read symbol table contents")?;

        let strs = if let Some(idx) = self.find_section(strs) {
            self.section_data(idx)?
        } else {
            &[]
        };
        Ok(SymbolTable { syms, strs })
    }
}

impl Debug for ElfData<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "ElfData")
    }
}


fn decompress_zlib(data: &[u8], size: usize) -> Result<Vec<u8>> {
    #[cfg(feature = "zlib")]
    {
        let decompressed = miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(data, size)
            .map_err(|err| Error::with_invalid_data(format!("{:?}", err.status)))
            .context("failed to decompress zlib compressed section")?;
        Ok(decompressed)
    }

    #[cfg(not(feature = "zlib"))]
    {
        let _unused = (data, size);
        Err(Error::with_unsupported(
            "zlib compressed sections are unsupported; enable the `zlib` feature",
        ))
    }
}

fn decompress_zstd(data: &[u8], size: usize) -> Result<Vec<u8>> {
    #[cfg(feature = "zstd")]
    {
        let decompressed = zstd::bulk::decompress(data, size)
            .context("failed to decompress zstd compressed section")?;
        Ok(decompressed)
    }

    #[cfg(not(feature = "zstd"))]
    {
        let _unused = (data, size);
        Err(Error::with_unsupported(
            "zstd compressed sections are unsupported; enable the `zstd` feature",
        ))
    }
}

/// Decompress the contents of a section flagged with `SHF_COMPRESSED`.
fn decompress_section(mut data: &[u8]) -> Result<Vec<u8>> {
    let chdr = data
        .read_pod::<Elf64_Chdr>()
        .ok_or_invalid_data(|| "failed to read Elf64_Chdr")?;
    let size = usize::try_from(chdr.ch_size)
        .ok()
        .ok_or_invalid_data(|| "compressed section is too large")?;

    let decompressed = match chdr.ch_type {
        ELFCOMPRESS_ZLIB => decompress_zlib(data, size)?,
        ELFCOMPRESS_ZSTD => decompress_zstd(data, size)?,
        ty => {
            return Err(Error::with_unsupported(format!(
                "unknown section compression type: {ty}"
            )))
        }
    };

    if decompressed.len() != size {
        return Err(Error::with_invalid_data(format!(
            "decompressed section has unexpected size: {} (expected {size})",
            decompressed.len()
        )))
    }
    Ok(decompressed)
}


/// A parser for ELF64 files.
#[derive(Debug)]
pub(crate) struct ElfParser {
    /// The parsed parts of the ELF file.
    // SAFETY: We must not hand out references with a 'static lifetime to
    //         this member. Rather, they should never outlive `self`.
    //         Furthermore, this member has to be listed before `_mmap`
    //         to make sure we never end up with a dangling reference.
    data: ElfData<'static>,
    /// The memory mapped file.
    _mmap: Mmap,
}

impl ElfParser {
    /// Create an `ElfParser` from mmap'ed data.
    pub fn from_mmap(mmap: Mmap) -> Result<Self> {
        // We transmute the mmap's lifetime to static here as that is a
        // necessity for self-referentiality.
        // SAFETY: We never hand out any 'static references to parsed
        //         data.
        let elf_data = unsafe { mem::transmute::<&[u8], &'static [u8]>(mmap.deref()) };

        let parser = Self {
            data: ElfData::parse(elf_data)?,
            _mmap: mmap,
        };
        Ok(parser)
    }

    /// Check whether any section loaded at runtime covers `addr`.
    pub fn contains_addr(&self, addr: u64) -> bool {
        self.data.shdrs.iter().any(|shdr| {
            shdr.sh_flags & SHF_ALLOC != 0
                && shdr.sh_addr <= addr
                && addr - shdr.sh_addr < shdr.sh_size
        })
    }

    /// Find the name and start address of the function or variable
    /// covering `addr`, consulting `.symtab` first and `.dynsym` second.
    pub fn find_sym(&self, addr: u64) -> Option<(&str, u64)> {
        self.data
            .symtab
            .find_sym(addr)
            .or_else(|| self.data.dynsym.find_sym(addr))
    }

    /// Iterate over the start addresses of all defined functions, as
    /// listed in `.symtab` and `.dynsym`.
    pub fn function_addrs(&self) -> impl Iterator<Item = u64> + '_ {
        [self.data.symtab, self.data.dynsym]
            .into_iter()
            .flat_map(|table| table.syms.iter())
            .filter(|sym| sym.type_() == STT_FUNC && sym.st_shndx != SHN_UNDEF && sym.st_size > 0)
            .map(|sym| sym.st_value)
    }

    /// Find the section of a given name.
    ///
    /// This function return the index of the section if found.
    pub fn find_section(&self, name: &str) -> Option<usize> {
        self.data.find_section(name)
    }

    /// Retrieve the data of the section with the given name,
    /// decompressing it if necessary.
    pub fn section_data_by_name(&self, name: &str) -> Result<Option<Cow<'_, [u8]>>> {
        let idx = match self.find_section(name) {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let data = self.data.section_data(idx)?;
        // SANITY: `find_section` only reports valid indices.
        let shdr = &self.data.shdrs[idx];
        if shdr.sh_flags & SHF_COMPRESSED != 0 {
            let data = decompress_section(data)
                .with_context(|| format!("failed to read section {name}"))?;
            Ok(Some(Cow::Owned(data)))
        } else {
            Ok(Some(Cow::Borrowed(data)))
        }
    }

    /// Retrieve the first address past all sections loaded at runtime.
    #[cfg(test)]
    pub(crate) fn alloc_end(&self) -> u64 {
        self.data
            .shdrs
            .iter()
            .filter(|shdr| shdr.sh_flags & SHF_ALLOC != 0)
            .map(|shdr| shdr.sh_addr + shdr.sh_size)
            .max()
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn pick_function(&self) -> (&str, u64) {
        let symtab = &self.data.symtab;
        let funcs = symtab
            .syms
            .iter()
            .filter(|sym| {
                sym.type_() == STT_FUNC
                    && sym.st_shndx != SHN_UNDEF
                    && sym.st_size > 0
                    && symbol_name(symtab.strs, sym).is_some()
            })
            .collect::<Vec<_>>();
        let sym = funcs[funcs.len() / 2];
        (symbol_name(symtab.strs, sym).unwrap(), sym.st_value)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::File;
    use std::io::Write as _;

    use tempfile::NamedTempFile;
    use test_log::test;


    fn open_self() -> ElfParser {
        let file = File::open("/proc/self/exe").unwrap();
        ElfParser::from_mmap(Mmap::map(&file).unwrap()).unwrap()
    }

    /// Check that we can parse the running test binary.
    #[test]
    fn parse_self() {
        let parser = open_self();
        assert_ne!(format!("{parser:?}"), "");

        let text = parser.find_section(".text").unwrap();
        let shdr = &parser.data.shdrs[text];
        assert!(parser.contains_addr(shdr.sh_addr));
        assert!(parser.contains_addr(shdr.sh_addr + shdr.sh_size - 1));
        assert_eq!(parser.find_section(".does-not-exist"), None);
    }

    /// Check that a function symbol can be found by any address it
    /// covers.
    #[test]
    fn find_function_symbol() {
        let parser = open_self();
        let (name, addr) = parser.pick_function();

        let (found, start) = parser.find_sym(addr).unwrap();
        // Multiple symbols may alias the same address.
        assert_eq!(start, addr);
        assert!(!found.is_empty(), "{name}");
        assert!(parser.function_addrs().any(|func| func == addr));
    }

    /// Check that every listed function start is covered by a section
    /// loaded at runtime.
    #[test]
    fn function_addrs_loaded() {
        let parser = open_self();
        let mut count = 0;
        for addr in parser.function_addrs() {
            assert!(parser.contains_addr(addr), "{addr:#x}");
            assert!(addr < parser.alloc_end());
            count += 1;
        }
        assert_ne!(count, 0);
        assert!(!parser.contains_addr(parser.alloc_end()));
    }

    /// Check that parsing fails gracefully for non-ELF data.
    #[test]
    fn parse_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        let () = file.write_all(&[0u8; 128]).unwrap();
        let mmap = Mmap::map(file.as_file()).unwrap();
        let err = ElfParser::from_mmap(mmap).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidData);

        let file = NamedTempFile::new().unwrap();
        let mmap = Mmap::map(&File::open(file.path()).unwrap()).unwrap();
        let err = ElfParser::from_mmap(mmap).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidData);
    }

    /// Make sure that zlib compressed section data can be decompressed.
    #[cfg(feature = "zlib")]
    #[test]
    fn zlib_section_decompression() {
        let content = b"compressed debug information".repeat(8);
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&content, 6);

        let mut data = Vec::new();
        let () = data.extend_from_slice(&ELFCOMPRESS_ZLIB.to_ne_bytes());
        let () = data.extend_from_slice(&0u32.to_ne_bytes());
        let () = data.extend_from_slice(&(content.len() as u64).to_ne_bytes());
        let () = data.extend_from_slice(&1u64.to_ne_bytes());
        let () = data.extend_from_slice(&compressed);

        let decompressed = decompress_section(&data).unwrap();
        assert_eq!(decompressed, content);

        // An unknown compression type is reported as unsupported.
        data[0] = 42;
        let err = decompress_section(&data).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Unsupported);
    }
}
