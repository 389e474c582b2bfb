use crate::{*, error::*};
use memmap2::Mmap;
use std::{collections::HashMap, fs::File, mem, ptr, str};

pub const SHT_SYMTAB: u32 = 0x2;
pub const SHT_NOBITS: u32 = 0x8;
pub const SHF_COMPRESSED: u64 = 1 << 11;
pub const STT_FUNC: u8 = 2;
pub const SHN_UNDEF: u16 = 0;

pub struct ElfSection {
    pub idx: usize,
    pub name: String,
    pub section_type: u32,
    pub flags: u64,
    pub address: u64,
    pub offset: usize,
    pub size: usize,
    pub link: u32,
    pub entry_size: usize,
    pub name_offset_in_strtab: u32,
}

impl ElfSection {
    pub fn size_in_file(&self) -> usize {
        if self.section_type == SHT_NOBITS {0} else {self.size}
    }
}

pub struct ElfFile {
    pub name: String, // just for error messages
    pub sections: Vec<ElfSection>,
    pub section_by_name: HashMap<String, usize>,
    pub entry_point: u64,

    // The mmap backs `data` for the lifetime of this struct; keep the ElfFile
    // (usually behind Arc) alive for as long as any section slice is in use.
    mmapped: Mmap,
    data: &'static [u8],
}

unsafe fn read_struct<T: Copy>(data: &[u8], what: &str) -> Result<T> {
    if data.len() < mem::size_of::<T>() {
        return err!(MalformedExecutable, "{} out of bounds", what);
    }
    Ok(ptr::read_unaligned(data.as_ptr() as *const T))
}

impl ElfFile {
    pub fn data(&self) -> &[u8] {
        self.data
    }

    pub fn str_from_strtab(&self, section_offset: usize, offset: usize) -> Result<&str> {
        let start = section_offset + offset;
        if start >= self.data.len() {
            return err!(MalformedExecutable, "strtab offset out of bounds in {}", self.name);
        }
        let tail = &self.data[start..];
        let len = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        Ok(str::from_utf8(&tail[..len])?)
    }

    pub fn section_data(&self, idx: usize) -> Result<&[u8]> {
        let s = &self.sections[idx];
        if s.flags & SHF_COMPRESSED != 0 {
            return err!(UnsupportedExecutable, "section {} is compressed", s.name);
        }
        Ok(&self.data[s.offset..s.offset + s.size_in_file()])
    }

    pub fn section_data_by_name(&self, name: &str) -> Result<&[u8]> {
        match self.section_by_name.get(name) {
            None => err!(NoSection, "no section {} in {}", name, self.name),
            Some(&idx) => self.section_data(idx),
        }
    }

    pub fn open(path: &str) -> Result<ElfFile> {
        let file = File::open(path)?;
        let mmapped = unsafe {Mmap::map(&file)?};
        let data: &'static [u8] = unsafe {mem::transmute(&mmapped[..])};

        let header: libc::Elf64_Ehdr = unsafe {read_struct(data, "Elf64_Ehdr")?};

        if &header.e_ident[..4] != &[0x7f, 0x45, 0x4c, 0x46] { return err!(MalformedExecutable, "{} is not an ELF file", path); }
        if header.e_ident[4] == 1 { return err!(UnsupportedExecutable, "32-bit executables are not supported"); }
        if header.e_ident[4] != 2 { return err!(MalformedExecutable, "invalid EI_CLASS: {}", header.e_ident[4]); }
        if header.e_ident[5] == 2 { return err!(UnsupportedExecutable, "big-endian executables are not supported"); }
        if header.e_ident[5] != 1 { return err!(MalformedExecutable, "invalid EI_DATA: {}", header.e_ident[5]); }
        // 2 is "Executable", 3 is "Shared object"; Go emits either depending on buildmode.
        if header.e_type != 2 && header.e_type != 3 { return err!(UnsupportedExecutable, "unexpected e_type: {}", header.e_type); }
        if header.e_machine != 0x3e { return err!(UnsupportedExecutable, "only x86-64 executables are supported (e_machine = {})", header.e_machine); }

        if header.e_shnum > 0 && (header.e_shentsize as usize) < mem::size_of::<libc::Elf64_Shdr>() { return err!(MalformedExecutable, "ELF e_shentsize too small in {}", path); }
        if (header.e_shnum as usize).saturating_mul(header.e_shentsize as usize).saturating_add(header.e_shoff as usize) > data.len() { return err!(MalformedExecutable, "ELF section header out of bounds in {}", path); }
        if header.e_shstrndx as usize >= header.e_shnum as usize { return err!(MalformedExecutable, "ELF e_shstrndx out of bounds in {}", path); }

        let mut sections: Vec<ElfSection> = Vec::new();
        for idx in 0..header.e_shnum as usize {
            let sh: libc::Elf64_Shdr = unsafe {read_struct(&data[header.e_shoff as usize + idx * header.e_shentsize as usize..], "Elf64_Shdr")?};
            sections.push(ElfSection {
                idx, name: String::new(), name_offset_in_strtab: sh.sh_name, section_type: sh.sh_type, flags: sh.sh_flags,
                address: sh.sh_addr, offset: sh.sh_offset as usize, size: sh.sh_size as usize, link: sh.sh_link, entry_size: sh.sh_entsize as usize});
        }

        let mut elf = ElfFile {name: path.to_string(), sections, section_by_name: HashMap::new(), entry_point: header.e_entry, mmapped, data};

        let shstrtab_offset = elf.sections[header.e_shstrndx as usize].offset;
        for idx in 0..elf.sections.len() {
            let name = elf.str_from_strtab(shstrtab_offset, elf.sections[idx].name_offset_in_strtab as usize)?.to_string();
            elf.sections[idx].name = name.clone();

            let s = &mut elf.sections[idx];
            if s.offset.saturating_add(s.size_in_file()) > elf.data.len() {
                eprintln!("warning: ELF section {} out of bounds: {} + {} > {}; clamping", name, s.offset, s.size_in_file(), elf.data.len());
                s.offset = s.offset.min(elf.data.len());
                s.size = s.size.min(elf.data.len() - s.offset);
            }

            elf.section_by_name.insert(name, idx);
        }

        Ok(elf)
    }
}

// A function from .symtab. Go binaries carry sized STT_FUNC symbols for
// every function, including the runtime's.
#[derive(Clone, Debug)]
pub struct FuncSym {
    pub name: String,
    pub addr: u64,
    pub size: u64,
}

// Returns functions sorted by address.
pub fn parse_func_symbols(elf: &ElfFile) -> Result<Vec<FuncSym>> {
    let symtab_idx = match elf.section_by_name.get(".symtab") {
        None => return err!(NoSection, "no .symtab section in {}", elf.name),
        Some(&idx) => idx,
    };
    let symtab = elf.section_data(symtab_idx)?;
    let entry_size = mem::size_of::<libc::Elf64_Sym>();
    if symtab.len() % entry_size != 0 {
        return err!(MalformedExecutable, ".symtab length is not divisible by {}: {}", entry_size, symtab.len());
    }
    let strtab_offset = match elf.sections.get(elf.sections[symtab_idx].link as usize) {
        None => return err!(MalformedExecutable, ".symtab link out of bounds in {}", elf.name),
        Some(s) => s.offset,
    };

    let mut funcs: Vec<FuncSym> = Vec::new();
    for i in 0..symtab.len() / entry_size {
        let sym: libc::Elf64_Sym = unsafe {read_struct(&symtab[i * entry_size..], "Elf64_Sym")?};
        if sym.st_info & 0xf != STT_FUNC || sym.st_shndx == SHN_UNDEF || sym.st_value == 0 {
            continue;
        }
        let name = elf.str_from_strtab(strtab_offset, sym.st_name as usize)?;
        if name.is_empty() {
            continue;
        }
        funcs.push(FuncSym {name: name.to_string(), addr: sym.st_value, size: sym.st_size});
    }
    funcs.sort_unstable_by_key(|f| f.addr);
    Ok(funcs)
}
