use crate::{*, error::{*, Error, Result}, elf::*};
use gimli::{BaseAddresses, CfaRule, CieOrFde, CommonInformationEntry, DebugFrame, EndianSlice, LittleEndian, RegisterRule, UnwindContext, UnwindSection, X86_64};
use std::{mem, sync::Arc};

type SliceType = EndianSlice<'static, LittleEndian>;

// Frame oracle over .debug_frame. Answers, for a PC: which frame-description
// entry covers it, where (relative to RSP) the return address of the covering
// activation lives, and the canonical-frame-address offset used as the base
// for variable locations.
pub struct FrameTable {
    section: DebugFrame<SliceType>,
    bases: BaseAddresses,
    cies: Vec<CommonInformationEntry<SliceType>>,
    fdes: Vec<Fde>, // sorted by start address
    _elf: Arc<ElfFile>, // keeps the section data mapped
}

// Address range of one frame-description entry plus its section offset.
// Copyable so the stepping engine can hold one across resumptions.
#[derive(Clone, Copy, Debug)]
pub struct Fde {
    pub start: u64,
    pub end: u64,
    offset: usize,
}

impl Fde {
    pub fn cover(&self, pc: u64) -> bool {
        pc >= self.start && pc < self.end
    }
}

fn find_cie(cies: &Vec<CommonInformationEntry<SliceType>>, offset: usize) -> gimli::read::Result<CommonInformationEntry<SliceType>> {
    let idx = cies.partition_point(|cie| cie.offset() < offset);
    if idx < cies.len() && cies[idx].offset() == offset {
        Ok(cies[idx].clone())
    } else {
        Err(gimli::read::Error::NoEntryAtGivenOffset)
    }
}

impl FrameTable {
    pub fn load(elf: Arc<ElfFile>) -> Result<FrameTable> {
        let data = elf.section_data_by_name(".debug_frame")?;
        // The section slice lives as long as `_elf`, which we keep.
        let data: &'static [u8] = unsafe {mem::transmute(data)};
        let mut bases = BaseAddresses::default();
        if let Some(&idx) = elf.section_by_name.get(".text") {
            bases = bases.set_text(elf.sections[idx].address);
        }
        let section = DebugFrame::new(data, LittleEndian);

        let mut cies: Vec<CommonInformationEntry<SliceType>> = Vec::new();
        let mut fdes: Vec<Fde> = Vec::new();
        let mut entries_iter = section.entries(&bases);
        while let Some(entry) = entries_iter.next()? {
            match entry {
                CieOrFde::Cie(cie) => cies.push(cie),
                CieOrFde::Fde(partial) => {
                    let fde = partial.parse(|_, _, offset| find_cie(&cies, gimli::UnwindOffset::into(offset)))?;
                    fdes.push(Fde {start: fde.initial_address(), end: fde.initial_address() + fde.len(), offset: fde.offset()});
                }
            }
        }
        fdes.sort_unstable_by_key(|f| f.start);

        Ok(FrameTable {section, bases, cies, fdes, _elf: elf})
    }

    pub fn fde_for_pc(&self, pc: u64) -> Result<Fde> {
        let idx = self.fdes.partition_point(|f| f.start <= pc);
        if idx > 0 && self.fdes[idx - 1].cover(pc) {
            Ok(self.fdes[idx - 1])
        } else {
            err!(Dwarf, "no frame description entry covers 0x{:x}", pc)
        }
    }

    // (cfa_offset, return_address_offset) for `pc`, both relative to RSP.
    // The return address slot is CFA + the return-address register's rule
    // offset; on entry to a function that works out to RSP + 0.
    fn row_offsets(&self, fde: &Fde, pc: u64) -> Result<(i64, i64)> {
        let parsed = self.section.fde_from_offset(&self.bases, fde.offset.into(), |_, _, offset| find_cie(&self.cies, gimli::UnwindOffset::into(offset)))?;
        let mut ctx: UnwindContext<usize> = UnwindContext::new();
        let row = parsed.unwind_info_for_address(&self.section, &self.bases, &mut ctx, pc)?;

        let cfa_offset = match row.cfa() {
            CfaRule::RegisterAndOffset {register, offset} if *register == X86_64::RSP => *offset,
            rule => return err!(Dwarf, "unsupported CFA rule at 0x{:x}: {:?}", pc, rule),
        };
        let ra_offset = match row.register(parsed.cie().return_address_register()) {
            RegisterRule::Offset(offset) => offset,
            rule => return err!(Dwarf, "unsupported return-address rule at 0x{:x}: {:?}", pc, rule),
        };
        Ok((cfa_offset, cfa_offset + ra_offset))
    }

    // Offset from RSP at which the current activation's return address lives.
    pub fn return_address_offset(&self, fde: &Fde, pc: u64) -> Result<i64> {
        Ok(self.row_offsets(fde, pc)?.1)
    }

    // Canonical-frame-address offset from RSP at `pc`. Base for variable
    // location expressions.
    pub fn cfa_offset(&self, fde: &Fde, pc: u64) -> Result<i64> {
        Ok(self.row_offsets(fde, pc)?.0)
    }
}

#[cfg(test)]
mod tests {
    use crate::unwind::*;

    #[test]
    fn fde_cover() {
        let fde = Fde {start: 0x1000, end: 0x1040, offset: 0};
        assert!(fde.cover(0x1000));
        assert!(fde.cover(0x103f));
        assert!(!fde.cover(0x1040));
        assert!(!fde.cover(0xfff));
    }
}
