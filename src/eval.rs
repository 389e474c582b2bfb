use crate::{*, error::*, os, registers::*, symbols::*, unwind::*};
use gimli::{AttributeValue, EndianSlice, LittleEndian, Reader, Unit, UnitOffset};
use gimli::{DwAte, DW_ATE_boolean, DW_ATE_float, DW_ATE_signed, DW_ATE_signed_char, DW_ATE_unsigned, DW_ATE_unsigned_char};
use gimli::{DW_AT_byte_size, DW_AT_count, DW_AT_data_member_location, DW_AT_encoding, DW_AT_location, DW_AT_name, DW_AT_type, DW_AT_upper_bound};
use gimli::{DW_OP_addr, DW_OP_call_frame_cfa, DW_OP_consts, DW_OP_constu, DW_OP_fbreg, DW_OP_lit0, DW_OP_lit31, DW_OP_minus, DW_OP_plus, DW_OP_plus_uconst};
use gimli::{DW_TAG_array_type, DW_TAG_base_type, DW_TAG_formal_parameter, DW_TAG_member, DW_TAG_pointer_type, DW_TAG_structure_type, DW_TAG_subrange_type, DW_TAG_typedef, DW_TAG_variable};
use libc::pid_t;

type SliceType = EndianSlice<'static, LittleEndian>;

// Bounds recursion over type structure (cyclic type graphs exist: pointers
// to self-referential structs).
const MAX_TYPE_DEPTH: usize = 64;
// Strings report their own length; don't trust it past this.
const MAX_STRING_LEN: u64 = 1 << 20;

// A named value extracted from the stopped tracee. Not persisted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub typ: String,
}

// Where the evaluator reads tracee memory from.
pub enum MemReader {
    Pid(pid_t),
    #[cfg(test)]
    Buf {base: u64, data: Vec<u8>},
}

impl MemReader {
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        match self {
            MemReader::Pid(pid) => os::peek_data(*pid, addr, buf),
            #[cfg(test)]
            MemReader::Buf {base, data} => {
                let start = match addr.checked_sub(*base) {
                    Some(x) => x as usize,
                    None => return err!(Sanity, "read at 0x{:x} below buffer", addr),
                };
                if start.saturating_add(buf.len()) > data.len() {
                    return err!(Sanity, "read at 0x{:x} past buffer", addr);
                }
                buf.copy_from_slice(&data[start..start + buf.len()]);
                Ok(())
            }
        }
    }

    fn read_bytes(&self, addr: u64, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read(addr, &mut buf)?;
        Ok(buf)
    }

    fn read_u64(&self, addr: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub offset: i64,
    pub typ: TypeInfo,
}

// The subset of the debug-info type graph the renderer understands,
// materialised eagerly for one variable.
#[derive(Clone, Debug)]
pub enum TypeInfo {
    Base {name: String, byte_size: u64, encoding: DwAte},
    Typedef {name: String, inner: Box<TypeInfo>},
    Pointer {inner: Box<TypeInfo>},
    Struct {name: String, byte_size: u64, fields: Vec<Field>},
    Array {elem: Box<TypeInfo>, byte_size: u64},
    Opaque {name: String},
}

impl TypeInfo {
    // Renders the way the Go debug/dwarf package stringifies types; these
    // exact forms ("struct string", "*main.FooBar", "[2]int") are what users
    // of the original tooling expect to see.
    pub fn type_name(&self) -> String {
        match self {
            TypeInfo::Base {name, ..} => name.clone(),
            TypeInfo::Typedef {name, ..} => name.clone(),
            TypeInfo::Pointer {inner} => format!("*{}", inner.type_name()),
            TypeInfo::Struct {name, ..} if name.is_empty() => "struct {...}".to_string(),
            TypeInfo::Struct {name, ..} => format!("struct {}", name),
            TypeInfo::Array {elem, byte_size} => {
                let count = elem.byte_size().map_or(0, |s| if s == 0 {0} else {byte_size / s});
                format!("[{}]{}", count, elem.type_name())
            }
            TypeInfo::Opaque {name} => name.clone(),
        }
    }

    pub fn byte_size(&self) -> Option<u64> {
        match self {
            TypeInfo::Base {byte_size, ..} => Some(*byte_size),
            TypeInfo::Typedef {inner, ..} => inner.byte_size(),
            TypeInfo::Pointer {..} => Some(8),
            TypeInfo::Struct {byte_size, ..} => Some(*byte_size),
            TypeInfo::Array {byte_size, ..} => Some(*byte_size),
            TypeInfo::Opaque {..} => None,
        }
    }
}

fn attr_str(dwarf: &gimli::Dwarf<SliceType>, unit: &Unit<SliceType>, value: AttributeValue<SliceType>) -> Result<String> {
    Ok(std::str::from_utf8(dwarf.attr_string(unit, value)?.slice())?.to_string())
}

fn attr_udata(value: AttributeValue<SliceType>) -> Option<u64> {
    value.udata_value()
}

// DW_AT_data_member_location is either plain constant data or a one-op
// DW_OP_plus_uconst block, depending on the producer's era.
fn member_location(value: AttributeValue<SliceType>) -> Result<i64> {
    if let Some(u) = value.udata_value() {
        return Ok(u as i64);
    }
    let block = match value {
        AttributeValue::Exprloc(e) => e.0,
        AttributeValue::Block(b) => b,
        v => return err!(Dwarf, "unsupported member location form: {:?}", v),
    };
    let mut reader = block;
    if reader.read_u8()? == DW_OP_plus_uconst.0 {
        Ok(reader.read_uleb128()? as i64)
    } else {
        err!(Dwarf, "unsupported member location expression")
    }
}

fn type_ref(value: AttributeValue<SliceType>) -> Result<UnitOffset<usize>> {
    match value {
        AttributeValue::UnitRef(offset) => Ok(offset),
        v => err!(Dwarf, "unsupported type reference form: {:?}", v),
    }
}

fn parse_type(dwarf: &gimli::Dwarf<SliceType>, unit: &Unit<SliceType>, offset: UnitOffset<usize>, depth: usize) -> Result<TypeInfo> {
    if depth > MAX_TYPE_DEPTH {
        return err!(Sanity, "type graph too deep (cyclic?)");
    }
    let mut tree = unit.entries_tree(Some(offset))?;
    let root = tree.root()?;
    let entry = root.entry();
    let tag = entry.tag();

    let name = match entry.attr_value(DW_AT_name)? {
        Some(v) => attr_str(dwarf, unit, v)?,
        None => String::new(),
    };

    match tag {
        DW_TAG_typedef => {
            let inner_off = match entry.attr_value(DW_AT_type)? {
                None => return err!(Dwarf, "typedef {} has no underlying type", name),
                Some(v) => type_ref(v)?,
            };
            Ok(TypeInfo::Typedef {name, inner: Box::new(parse_type(dwarf, unit, inner_off, depth + 1)?)})
        }
        DW_TAG_pointer_type => {
            let inner = match entry.attr_value(DW_AT_type)? {
                // Pointer without pointee type (unsafe.Pointer and friends).
                None => TypeInfo::Opaque {name: "void".to_string()},
                Some(v) => parse_type(dwarf, unit, type_ref(v)?, depth + 1)?,
            };
            Ok(TypeInfo::Pointer {inner: Box::new(inner)})
        }
        DW_TAG_base_type => {
            let byte_size = entry.attr_value(DW_AT_byte_size)?.and_then(attr_udata).unwrap_or(8);
            let encoding = match entry.attr_value(DW_AT_encoding)? {
                Some(AttributeValue::Encoding(e)) => e,
                _ => DW_ATE_signed,
            };
            Ok(TypeInfo::Base {name, byte_size, encoding})
        }
        DW_TAG_structure_type => {
            let byte_size = entry.attr_value(DW_AT_byte_size)?.and_then(attr_udata).unwrap_or(0);
            let mut fields: Vec<Field> = Vec::new();
            let mut member_offsets: Vec<(String, i64, UnitOffset<usize>)> = Vec::new();
            {
                let mut children = root.children();
                while let Some(child) = children.next()? {
                    let entry = child.entry();
                    if entry.tag() != DW_TAG_member {
                        continue;
                    }
                    let fname = match entry.attr_value(DW_AT_name)? {
                        Some(v) => attr_str(dwarf, unit, v)?,
                        None => String::new(),
                    };
                    let foffset = match entry.attr_value(DW_AT_data_member_location)? {
                        Some(v) => member_location(v)?,
                        None => 0,
                    };
                    let ftype = match entry.attr_value(DW_AT_type)? {
                        None => return err!(Dwarf, "member {} has no type", fname),
                        Some(v) => type_ref(v)?,
                    };
                    member_offsets.push((fname, foffset, ftype));
                }
            }
            for (fname, foffset, ftype) in member_offsets {
                fields.push(Field {name: fname, offset: foffset, typ: parse_type(dwarf, unit, ftype, depth + 1)?});
            }
            Ok(TypeInfo::Struct {name, byte_size, fields})
        }
        DW_TAG_array_type => {
            let elem_off = match entry.attr_value(DW_AT_type)? {
                None => return err!(Dwarf, "array type has no element type"),
                Some(v) => type_ref(v)?,
            };
            let mut byte_size = entry.attr_value(DW_AT_byte_size)?.and_then(attr_udata);
            let mut count: Option<u64> = None;
            {
                let mut children = root.children();
                while let Some(child) = children.next()? {
                    let entry = child.entry();
                    if entry.tag() != DW_TAG_subrange_type {
                        continue;
                    }
                    count = entry.attr_value(DW_AT_count)?.and_then(attr_udata);
                    if count.is_none() {
                        count = entry.attr_value(DW_AT_upper_bound)?.and_then(attr_udata).map(|x| x + 1);
                    }
                }
            }
            let elem = parse_type(dwarf, unit, elem_off, depth + 1)?;
            if byte_size.is_none() {
                byte_size = match (count, elem.byte_size()) {
                    (Some(c), Some(s)) => Some(c * s),
                    _ => None,
                };
            }
            let byte_size = match byte_size {
                None => return err!(Dwarf, "array type has no size"),
                Some(x) => x,
            };
            Ok(TypeInfo::Array {elem: Box::new(elem), byte_size})
        }
        tag => Ok(TypeInfo::Opaque {name: if name.is_empty() {format!("{}", tag)} else {name}}),
    }
}

// Runs the DWARF location description as a stack program. `cfa` is the
// canonical-frame-address offset from RSP; the result is the variable's
// offset from RSP.
pub fn execute_stack_program(cfa: i64, expr: &[u8]) -> Result<i64> {
    let mut reader = EndianSlice::new(expr, LittleEndian);
    let mut stack: Vec<i64> = Vec::with_capacity(4);
    while !reader.is_empty() {
        let op = gimli::DwOp(reader.read_u8()?);
        match op {
            DW_OP_call_frame_cfa => stack.push(cfa),
            DW_OP_fbreg => {
                // Frame base is the CFA for this producer.
                let off = reader.read_sleb128()?;
                stack.push(cfa.wrapping_add(off));
            }
            DW_OP_addr => stack.push(reader.read_u64()? as i64),
            DW_OP_consts => stack.push(reader.read_sleb128()?),
            DW_OP_constu => stack.push(reader.read_uleb128()? as i64),
            DW_OP_plus => {
                let (b, a) = (pop(&mut stack)?, pop(&mut stack)?);
                stack.push(a.wrapping_add(b));
            }
            DW_OP_minus => {
                let (b, a) = (pop(&mut stack)?, pop(&mut stack)?);
                stack.push(a.wrapping_sub(b));
            }
            DW_OP_plus_uconst => {
                let c = reader.read_uleb128()? as i64;
                let a = pop(&mut stack)?;
                stack.push(a.wrapping_add(c));
            }
            op if op.0 >= DW_OP_lit0.0 && op.0 <= DW_OP_lit31.0 => stack.push((op.0 - DW_OP_lit0.0) as i64),
            op => return err!(Dwarf, "unsupported opcode 0x{:x} in location program", op.0),
        }
    }
    pop(&mut stack)
}

fn pop(stack: &mut Vec<i64>) -> Result<i64> {
    match stack.pop() {
        Some(x) => Ok(x),
        None => err!(Dwarf, "location program underflowed its stack"),
    }
}

fn scalar_from_bytes(bytes: &[u8], signed: bool) -> i64 {
    let mut v = 0u64;
    for (i, b) in bytes.iter().take(8).enumerate() {
        v |= (*b as u64) << (i * 8);
    }
    let bits = bytes.len().min(8) * 8;
    if signed && bits < 64 && v & (1 << (bits - 1)) != 0 {
        v |= !0u64 << bits;
    }
    v as i64
}

fn format_base(bytes: &[u8], encoding: DwAte) -> Result<String> {
    match encoding {
        DW_ATE_boolean => Ok(if bytes.iter().any(|&b| b != 0) {"true"} else {"false"}.to_string()),
        DW_ATE_float => match bytes.len() {
            4 => Ok(format!("{}", f32::from_le_bytes(bytes.try_into().unwrap()))),
            8 => Ok(format!("{}", f64::from_le_bytes(bytes.try_into().unwrap()))),
            n => err!(UnsupportedType, "unsupported float size {}", n),
        },
        DW_ATE_signed | DW_ATE_signed_char => Ok(format!("{}", scalar_from_bytes(bytes, true))),
        DW_ATE_unsigned | DW_ATE_unsigned_char => Ok(format!("{}", scalar_from_bytes(bytes, false) as u64)),
        e => err!(UnsupportedType, "could not find value for type with encoding {}", e),
    }
}

fn is_signed(encoding: DwAte) -> bool {
    encoding == DW_ATE_signed || encoding == DW_ATE_signed_char
}

// Renders the Go string header {data *byte, len int} at `addr`: exactly
// `len` bytes read from `data`.
fn render_string(mem: &MemReader, addr: u64) -> Result<String> {
    let data = mem.read_u64(addr)?;
    let len = mem.read_u64(addr + 8)?;
    if len > MAX_STRING_LEN {
        return err!(Sanity, "implausible string length {}", len);
    }
    let bytes = mem.read_bytes(data, len as usize)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn find_field<'a>(fields: &'a [Field], name: &str) -> Result<&'a Field> {
    match fields.iter().find(|f| f.name == name) {
        Some(f) => Ok(f),
        None => err!(Dwarf, "slice header has no {} field", name),
    }
}

// Renders a slice header {array *T, len int, cap int}: "len: L cap: C [v1 v2 ...]".
fn render_slice(mem: &MemReader, addr: u64, fields: &[Field], depth: usize) -> Result<String> {
    let array = find_field(fields, "array")?;
    let len = mem.read_u64((addr as i64 + find_field(fields, "len")?.offset) as u64)?;
    let cap = mem.read_u64((addr as i64 + find_field(fields, "cap")?.offset) as u64)?;
    let data = mem.read_u64((addr as i64 + array.offset) as u64)?;

    let elem = match &array.typ {
        TypeInfo::Pointer {inner} => inner.as_ref(),
        t => return err!(Dwarf, "slice data field has non-pointer type {}", t.type_name()),
    };
    let mut members: Vec<String> = Vec::with_capacity(len as usize);
    let elem_size = match elem.byte_size() {
        Some(s) if s > 0 => s,
        _ => return err!(UnsupportedType, "could not find value for type {}", elem.type_name()),
    };
    if len.saturating_mul(elem_size) > MAX_STRING_LEN {
        return err!(Sanity, "implausible slice length {}", len);
    }
    for i in 0..len {
        members.push(render_value(mem, data + i * elem_size, elem, depth + 1)?);
    }
    Ok(format!("len: {} cap: {} [{}]", len, cap, members.join(" ")))
}

fn render_value(mem: &MemReader, addr: u64, typ: &TypeInfo, depth: usize) -> Result<String> {
    if depth > MAX_TYPE_DEPTH {
        return err!(Sanity, "value rendering recursed too deep");
    }
    match typ {
        // User-defined named types render as their underlying type.
        TypeInfo::Typedef {inner, ..} => render_value(mem, addr, inner, depth + 1),
        TypeInfo::Pointer {inner} => {
            let target = mem.read_u64(addr)?;
            Ok(format!("*{}", render_value(mem, target, inner, depth + 1)?))
        }
        TypeInfo::Struct {name, fields, ..} => {
            if name == "string" {
                return render_string(mem, addr);
            }
            if name.starts_with("[]") {
                return render_slice(mem, addr, fields, depth);
            }
            let mut parts: Vec<String> = Vec::with_capacity(fields.len());
            for f in fields {
                let val = render_value(mem, (addr as i64 + f.offset) as u64, &f.typ, depth + 1)?;
                parts.push(format!("{}: {}", f.name, val));
            }
            Ok(format!("{} {{{}}}", name, parts.join(", ")))
        }
        TypeInfo::Array {elem, byte_size} => {
            let elem_size = match elem.byte_size() {
                Some(s) if s > 0 => s,
                _ => return err!(UnsupportedType, "could not find value for type {}", elem.type_name()),
            };
            let count = byte_size / elem_size;
            let signed = match elem.as_ref() {
                TypeInfo::Base {encoding, ..} => is_signed(*encoding),
                _ => true,
            };
            let bytes = mem.read_bytes(addr, (count * elem_size) as usize)?;
            let members: Vec<String> = bytes.chunks(elem_size as usize).map(|c| format!("{}", scalar_from_bytes(c, signed))).collect();
            Ok(format!("[{}]{} [{}]", count, elem.type_name(), members.join(" ")))
        }
        TypeInfo::Base {byte_size, encoding, ..} => {
            let bytes = mem.read_bytes(addr, (*byte_size).min(8) as usize)?;
            format_base(&bytes, *encoding)
        }
        TypeInfo::Opaque {name} => err!(UnsupportedType, "could not find value for type {}", name),
    }
}

// Finds a variable or formal parameter named `name` in the debug info and
// materialises its value from the stopped tracee's current frame.
pub fn eval_symbol(info: &DebugInfo, frames: &FrameTable, mem: &MemReader, regs: &Registers, name: &str) -> Result<Variable> {
    let dwarf = &info.dwarf;
    let mut units_iter = dwarf.units();
    while let Some(unit_header) = units_iter.next()? {
        let unit = dwarf.unit(unit_header)?;
        let mut cursor = unit.entries();
        while let Some((_, entry)) = cursor.next_dfs()? {
            if entry.tag() != DW_TAG_variable && entry.tag() != DW_TAG_formal_parameter {
                continue;
            }
            let entry_name = match entry.attr_value(DW_AT_name)? {
                None => continue,
                Some(v) => attr_str(dwarf, &unit, v)?,
            };
            if entry_name != name {
                continue;
            }
            let type_off = match entry.attr_value(DW_AT_type)? {
                None => continue,
                Some(v) => type_ref(v)?,
            };
            let location = match entry.attr_value(DW_AT_location)? {
                Some(AttributeValue::Exprloc(e)) => e.0,
                Some(AttributeValue::Block(b)) => b,
                _ => continue,
            };

            let typ = parse_type(dwarf, &unit, type_off, 0)?;

            let pc = regs.pc();
            let fde = frames.fde_for_pc(pc)?;
            let cfa_offset = frames.cfa_offset(&fde, pc)?;
            let offset = execute_stack_program(cfa_offset, location.slice())?;
            let addr = (regs.sp() as i64).wrapping_add(offset) as u64;

            let value = render_value(mem, addr, &typ, 0)?;
            return Ok(Variable {name: entry_name, value, typ: typ.type_name()});
        }
    }
    err!(SymbolNotFound, "could not find symbol value for {}", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gimli::{DW_OP_lit1, DW_OP_lit5};

    fn sleb(mut v: i64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
            out.push(if done {byte} else {byte | 0x80});
            if done {
                return out;
            }
        }
    }

    #[test]
    fn stack_program() {
        // CFA alone.
        assert_eq!(execute_stack_program(16, &[DW_OP_call_frame_cfa.0]).unwrap(), 16);
        // CFA + const.
        let mut prog = vec![DW_OP_call_frame_cfa.0, DW_OP_consts.0];
        prog.extend(sleb(-24));
        prog.push(DW_OP_plus.0);
        assert_eq!(execute_stack_program(40, &prog).unwrap(), 16);
        // fbreg folds the CFA in by itself.
        let mut prog = vec![DW_OP_fbreg.0];
        prog.extend(sleb(-8));
        assert_eq!(execute_stack_program(40, &prog).unwrap(), 32);
        // Literals and arithmetic.
        assert_eq!(execute_stack_program(0, &[DW_OP_lit31.0, DW_OP_lit1.0, DW_OP_minus.0]).unwrap(), 30);
        let prog = vec![DW_OP_lit5.0, DW_OP_plus_uconst.0, 0x02];
        assert_eq!(execute_stack_program(0, &prog).unwrap(), 7);
        // Errors.
        assert!(execute_stack_program(0, &[]).is_err());
        assert!(execute_stack_program(0, &[DW_OP_plus.0]).is_err());
        assert!(execute_stack_program(0, &[0xe0]).is_err());
    }

    fn int_type() -> TypeInfo {
        TypeInfo::Base {name: "int".to_string(), byte_size: 8, encoding: DW_ATE_signed}
    }

    fn string_type() -> TypeInfo {
        TypeInfo::Struct {name: "string".to_string(), byte_size: 16, fields: Vec::new()}
    }

    fn foobar_type() -> TypeInfo {
        TypeInfo::Typedef {
            name: "main.FooBar".to_string(),
            inner: Box::new(TypeInfo::Struct {
                name: "main.FooBar".to_string(),
                byte_size: 24,
                fields: vec![
                    Field {name: "Baz".to_string(), offset: 0, typ: int_type()},
                    Field {name: "Bur".to_string(), offset: 8, typ: string_type()},
                ],
            }),
        }
    }

    // Memory image: 0x1000.. holds the variables, 0x2000.. holds string data.
    fn memory() -> MemReader {
        let base = 0x1000u64;
        let mut data = vec![0u8; 0x1800];
        let put = |data: &mut Vec<u8>, addr: u64, bytes: &[u8]| {
            let at = (addr - base) as usize;
            data[at..at + bytes.len()].copy_from_slice(bytes);
        };
        // 0x1000: int 6
        put(&mut data, 0x1000, &6u64.to_le_bytes());
        // 0x1008: float64 7.23
        put(&mut data, 0x1008, &7.23f64.to_le_bytes());
        // 0x1010: string header -> "word" at 0x2000
        put(&mut data, 0x1010, &0x2000u64.to_le_bytes());
        put(&mut data, 0x1018, &4u64.to_le_bytes());
        put(&mut data, 0x2000, b"word");
        // 0x1020: slice header {array: 0x2100, len: 5, cap: 5}
        put(&mut data, 0x1020, &0x2100u64.to_le_bytes());
        put(&mut data, 0x1028, &5u64.to_le_bytes());
        put(&mut data, 0x1030, &5u64.to_le_bytes());
        for i in 0..5u64 {
            put(&mut data, 0x2100 + i * 8, &(i + 1).to_le_bytes());
        }
        // 0x1040: FooBar {Baz: 8, Bur: "word"}
        put(&mut data, 0x1040, &8u64.to_le_bytes());
        put(&mut data, 0x1048, &0x2000u64.to_le_bytes());
        put(&mut data, 0x1050, &4u64.to_le_bytes());
        // 0x1060: pointer to the FooBar above
        put(&mut data, 0x1060, &0x1040u64.to_le_bytes());
        // 0x1070: [2]int {1, 2}
        put(&mut data, 0x1070, &1u64.to_le_bytes());
        put(&mut data, 0x1078, &2u64.to_le_bytes());
        MemReader::Buf {base, data}
    }

    #[test]
    fn render_scalars() {
        let mem = memory();
        assert_eq!(render_value(&mem, 0x1000, &int_type(), 0).unwrap(), "6");
        let f64_type = TypeInfo::Base {name: "float64".to_string(), byte_size: 8, encoding: DW_ATE_float};
        assert_eq!(render_value(&mem, 0x1008, &f64_type, 0).unwrap(), "7.23");
    }

    #[test]
    fn render_string_value() {
        let mem = memory();
        assert_eq!(render_value(&mem, 0x1010, &string_type(), 0).unwrap(), "word");
    }

    #[test]
    fn render_slice_value() {
        let mem = memory();
        let slice_type = TypeInfo::Struct {
            name: "[]int".to_string(),
            byte_size: 24,
            fields: vec![
                Field {name: "array".to_string(), offset: 0, typ: TypeInfo::Pointer {inner: Box::new(int_type())}},
                Field {name: "len".to_string(), offset: 8, typ: int_type()},
                Field {name: "cap".to_string(), offset: 16, typ: int_type()},
            ],
        };
        assert_eq!(render_value(&mem, 0x1020, &slice_type, 0).unwrap(), "len: 5 cap: 5 [1 2 3 4 5]");
        assert_eq!(slice_type.type_name(), "struct []int");
    }

    #[test]
    fn render_struct_and_pointer() {
        let mem = memory();
        let t = foobar_type();
        assert_eq!(render_value(&mem, 0x1040, &t, 0).unwrap(), "main.FooBar {Baz: 8, Bur: word}");
        assert_eq!(t.type_name(), "main.FooBar");

        let p = TypeInfo::Pointer {inner: Box::new(foobar_type())};
        assert_eq!(render_value(&mem, 0x1060, &p, 0).unwrap(), "*main.FooBar {Baz: 8, Bur: word}");
        assert_eq!(p.type_name(), "*main.FooBar");
    }

    #[test]
    fn render_array() {
        let mem = memory();
        let t = TypeInfo::Array {elem: Box::new(int_type()), byte_size: 16};
        assert_eq!(render_value(&mem, 0x1070, &t, 0).unwrap(), "[2]int [1 2]");
        assert_eq!(t.type_name(), "[2]int");
    }

    #[test]
    fn unsupported_type_surfaces() {
        let mem = memory();
        let t = TypeInfo::Opaque {name: "chan int".to_string()};
        let err = render_value(&mem, 0x1000, &t, 0).unwrap_err();
        assert!(format!("{}", err).contains("could not find value for type chan int"));
    }

    #[test]
    fn type_name_of_string() {
        assert_eq!(string_type().type_name(), "struct string");
        assert_eq!(int_type().type_name(), "int");
    }
}
