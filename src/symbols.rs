use crate::{*, error::*, elf::*};
use gimli::{Dwarf, EndianSlice, LittleEndian, Section, SectionId};
use std::{mem, str, sync::Arc};

type SliceType = EndianSlice<'static, LittleEndian>;

// The parsed .debug_* sections. Loaded once; the evaluator walks
// .debug_info through this, the line oracle below is built from .debug_line.
pub struct DebugInfo {
    pub dwarf: Dwarf<SliceType>,
    pub elf: Arc<ElfFile>,
}

impl DebugInfo {
    pub fn load(elf: Arc<ElfFile>) -> Result<DebugInfo> {
        let load_section = |id: SectionId| -> std::result::Result<SliceType, gimli::Error> {
            if let Some(&idx) = elf.section_by_name.get(id.name()) {
                if let Ok(data) = elf.section_data(idx) {
                    if !data.is_empty() {
                        // Slices stay valid while `elf` is alive; DebugInfo holds the Arc.
                        return Ok(EndianSlice::new(unsafe {mem::transmute(data)}, LittleEndian));
                    }
                }
            }
            Ok(EndianSlice::new(&[], LittleEndian))
        };
        let dwarf = Dwarf::load(load_section)?;
        if dwarf.debug_info.reader().is_empty() {
            return err!(NoSection, "no .debug_info section in {}", elf.name);
        }
        Ok(DebugInfo {dwarf, elf})
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LineRow {
    pub addr: u64,
    pub file_idx: u32, // into SymTable.files; u32::MAX if unknown
    pub line: u32,
    pub is_stmt: bool,
    pub end_sequence: bool,
}

// Symbol/line oracle: bidirectional map between instruction addresses and
// (file, line), plus the function list from .symtab.
pub struct SymTable {
    pub files: Vec<String>,
    pub rows: Vec<LineRow>, // sorted by addr, deduplicated
    pub funcs: Vec<FuncSym>, // sorted by addr
}

impl SymTable {
    pub fn load(info: &DebugInfo, elf: &ElfFile) -> Result<SymTable> {
        let funcs = parse_func_symbols(elf)?;
        let dwarf = &info.dwarf;

        let mut files: Vec<String> = Vec::new();
        let mut rows: Vec<LineRow> = Vec::new();

        let mut units_iter = dwarf.units();
        while let Some(unit_header) = units_iter.next()? {
            let unit = dwarf.unit(unit_header)?;
            let program = match &unit.line_program {
                None => continue,
                Some(x) => x.clone(),
            };

            let comp_dir = match &unit.comp_dir {
                Some(d) => str::from_utf8(d.slice()).unwrap_or("").to_string(),
                None => String::new(),
            };

            // File indices in line rows are interpreted per DWARF version;
            // header.file() hides that, so precompute index -> files[] here.
            let header = program.header().clone();
            let mut file_remap: Vec<u32> = Vec::new();
            for idx in 0..header.file_names().len() as u64 + 1 {
                let entry = match header.file(idx) {
                    None => {
                        file_remap.push(u32::MAX);
                        continue;
                    }
                    Some(x) => x,
                };
                let name = str::from_utf8(dwarf.attr_string(&unit, entry.path_name())?.slice())?.to_string();
                let mut path = if name.starts_with('/') {
                    name
                } else {
                    let dir = match entry.directory(&header) {
                        Some(d) => str::from_utf8(dwarf.attr_string(&unit, d)?.slice())?.to_string(),
                        None => String::new(),
                    };
                    let mut p = String::new();
                    if !dir.starts_with('/') && !comp_dir.is_empty() {
                        p.push_str(&comp_dir);
                        p.push('/');
                    }
                    if !dir.is_empty() {
                        p.push_str(&dir);
                        p.push('/');
                    }
                    p.push_str(&name);
                    p
                };
                if path.is_empty() {
                    path = "??".to_string();
                }
                file_remap.push(files.len() as u32);
                files.push(path);
            }

            let mut rows_iter = program.rows();
            while let Some((_, row)) = rows_iter.next_row()? {
                if row.end_sequence() {
                    rows.push(LineRow {addr: row.address(), file_idx: u32::MAX, line: 0, is_stmt: false, end_sequence: true});
                } else {
                    let file_idx = file_remap.get(row.file_index() as usize).copied().unwrap_or(u32::MAX);
                    let line = row.line().map_or(0, |x| u64::from(x) as u32);
                    rows.push(LineRow {addr: row.address(), file_idx, line, is_stmt: row.is_stmt() && file_idx != u32::MAX, end_sequence: false});
                }
            }
        }

        rows.sort_by_key(|r| r.addr);
        // Several rows can land on one address (empty sequences, zero-size
        // inlined calls). Keep one row per address, preferring a real row
        // over an end-of-sequence marker and otherwise the last one.
        let mut deduped: Vec<LineRow> = Vec::with_capacity(rows.len());
        for row in rows {
            match deduped.last_mut() {
                Some(prev) if prev.addr == row.addr => {
                    if !row.end_sequence || prev.end_sequence {
                        *prev = row;
                    }
                }
                _ => deduped.push(row),
            }
        }

        Ok(SymTable {files, rows: deduped, funcs})
    }

    pub fn pc_to_line(&self, pc: u64) -> Option<(&str, u32)> {
        let idx = self.rows.partition_point(|r| r.addr <= pc);
        if idx == 0 {
            return None;
        }
        let row = &self.rows[idx - 1];
        if row.end_sequence || row.file_idx == u32::MAX {
            return None;
        }
        Some((&self.files[row.file_idx as usize], row.line))
    }

    // First statement address for `file`:`line`. `file` may be a suffix of
    // the full path ("testnextprog.go" or "dir/testnextprog.go").
    pub fn line_to_pc(&self, file: &str, line: u32) -> Result<u64> {
        let mut best: Option<u64> = None;
        for r in &self.rows {
            if r.end_sequence || !r.is_stmt || r.line != line {
                continue;
            }
            if !path_suffix_matches(&self.files[r.file_idx as usize], file) {
                continue;
            }
            best = Some(match best {
                None => r.addr,
                Some(b) => b.min(r.addr),
            });
        }
        match best {
            Some(pc) => Ok(pc),
            None => err!(SymbolNotFound, "could not find {}:{}", file, line),
        }
    }

    pub fn func_for_pc(&self, pc: u64) -> Option<&FuncSym> {
        let idx = self.funcs.partition_point(|f| f.addr <= pc);
        if idx == 0 {
            return None;
        }
        let f = &self.funcs[idx - 1];
        // Zero-size symbols (handwritten assembly) cover until the next one.
        if f.size != 0 && pc >= f.addr + f.size {
            return None;
        }
        Some(f)
    }

    pub fn lookup_func(&self, name: &str) -> Option<&FuncSym> {
        self.funcs.iter().find(|f| f.name == name)
    }
}

fn path_suffix_matches(path: &str, suffix: &str) -> bool {
    if !path.ends_with(suffix) {
        return false;
    }
    let head = &path[..path.len() - suffix.len()];
    head.is_empty() || head.ends_with('/')
}

#[cfg(test)]
mod tests {
    use crate::{elf::*, symbols::*};

    fn table() -> SymTable {
        SymTable {
            files: vec!["/tmp/proj/testprog.go".to_string(), "/usr/lib/go/src/runtime/proc.go".to_string()],
            rows: vec![
                LineRow {addr: 0x1000, file_idx: 0, line: 9, is_stmt: true, end_sequence: false},
                LineRow {addr: 0x1008, file_idx: 0, line: 10, is_stmt: false, end_sequence: false},
                LineRow {addr: 0x1010, file_idx: 0, line: 10, is_stmt: true, end_sequence: false},
                LineRow {addr: 0x1020, file_idx: u32::MAX, line: 0, is_stmt: false, end_sequence: true},
                LineRow {addr: 0x2000, file_idx: 1, line: 100, is_stmt: true, end_sequence: false},
                LineRow {addr: 0x2010, file_idx: u32::MAX, line: 0, is_stmt: false, end_sequence: true},
            ],
            funcs: vec![
                FuncSym {name: "main.main".to_string(), addr: 0x1000, size: 0x20},
                FuncSym {name: "runtime.futex".to_string(), addr: 0x2000, size: 0},
            ],
        }
    }

    #[test]
    fn pc_to_line_lookup() {
        let t = table();
        assert_eq!(t.pc_to_line(0x1000), Some(("/tmp/proj/testprog.go", 9)));
        assert_eq!(t.pc_to_line(0x1007), Some(("/tmp/proj/testprog.go", 9)));
        assert_eq!(t.pc_to_line(0x1013), Some(("/tmp/proj/testprog.go", 10)));
        assert_eq!(t.pc_to_line(0xfff), None);
        // Past end of sequence.
        assert_eq!(t.pc_to_line(0x1020), None);
        assert_eq!(t.pc_to_line(0x1fff), None);
    }

    #[test]
    fn line_to_pc_lookup() {
        let t = table();
        // Suffix match, statement rows only.
        assert_eq!(t.line_to_pc("testprog.go", 10).unwrap(), 0x1010);
        assert_eq!(t.line_to_pc("proj/testprog.go", 9).unwrap(), 0x1000);
        assert!(t.line_to_pc("estprog.go", 9).is_err());
        assert!(t.line_to_pc("testprog.go", 11).is_err());
    }

    #[test]
    fn func_lookup() {
        let t = table();
        assert_eq!(t.func_for_pc(0x1005).unwrap().name, "main.main");
        assert!(t.func_for_pc(0x1020).is_none());
        assert!(t.func_for_pc(0).is_none());
        // Zero-size symbol covers forward.
        assert_eq!(t.func_for_pc(0x2008).unwrap().name, "runtime.futex");
        assert_eq!(t.lookup_func("main.main").unwrap().addr, 0x1000);
        assert!(t.lookup_func("main.missing").is_none());
    }
}
