//! Object emitter (spec §4.8)
//!
//! Serializes the assembler's sections/symbol table/string table/
//! relocations into the `E32O` blob. No teacher counterpart — CHIP-8
//! emits raw ROM bytes with no header at all — so the byte layout is
//! spec-literal; the writer style (explicit `to_le_bytes()` pushes rather
//! than a `byteorder`/`scroll` dependency) follows the teacher's own
//! `split_u16!` byte-splitting convention in `codegen_utils.rs`.

use crate::reloc::Relocation;
use crate::section::{SectionBuilder, SectionKind};
use crate::strtab::StringTable;
use crate::symtab::SymbolTable;

const MAGIC: &[u8; 4] = b"E32O";
const VERSION: u16 = 1;

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Writer {
        Writer { buf: Vec::new() }
    }
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }
    fn len(&self) -> u32 {
        self.buf.len() as u32
    }
}

/// Emit the `E32O` blob for a completed assembly. `flags` is the
/// caller-controlled header flags word (currently always 0; reserved for
/// future linker hints).
pub fn emit(
    symtab: &SymbolTable,
    strtab: &StringTable,
    sections: &SectionBuilder,
    relocations: &[Relocation],
    flags: u16,
) -> Vec<u8> {
    let strtab_bytes = strtab.to_bytes();

    let section_order = [SectionKind::Text, SectionKind::Data, SectionKind::Bss];
    let section_sizes = [
        sections.text().len() as u32,
        sections.data().len() as u32,
        sections.bss_size(),
    ];

    let symtab_count = symtab.len() as u32;
    let reltab_count = relocations.len() as u32;
    let sectab_count = section_order.len() as u32;

    const HEADER_LEN: u32 = 4 + 2 + 2 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 4;

    let strtab_off = HEADER_LEN;
    let strtab_len = strtab_bytes.len() as u32;

    let symtab_off = strtab_off + strtab_len;
    const SYMBOL_RECORD_LEN: u32 = 4 + 4 + 1 + 2 + 1;
    let symtab_len = symtab_count * SYMBOL_RECORD_LEN;

    let reltab_off = symtab_off + symtab_len;
    const RELOC_RECORD_LEN: u32 = 2 + 4 + 4 + 2;
    let reltab_len = reltab_count * RELOC_RECORD_LEN;

    let sectab_off = reltab_off + reltab_len;

    let mut w = Writer::new();
    w.bytes(MAGIC);
    w.u16(VERSION);
    w.u16(flags);
    w.u32(strtab_off);
    w.u32(strtab_len);
    w.u32(symtab_off);
    w.u32(symtab_count);
    w.u32(reltab_off);
    w.u32(reltab_count);
    w.u32(sectab_off);
    w.u32(sectab_count);
    assert_eq!(w.len(), HEADER_LEN);

    w.bytes(&strtab_bytes);

    for entry in symtab.iter() {
        w.u32(strtab.byte_offset(entry.name_index));
        w.u32(entry.value);
        w.u8(entry.binding.as_u8());
        w.i16(entry.section_index);
        w.u8(0); // reserved
    }

    for reloc in relocations {
        w.u16(reloc.section.index() as u16);
        w.u32(reloc.offset);
        w.u32(reloc.symbol);
        w.u16(reloc.kind.as_u16());
    }

    const SECTION_TYPE_TEXT: u8 = 0;
    const SECTION_TYPE_DATA: u8 = 1;
    const SECTION_TYPE_BSS: u8 = 2;

    let mut file_off = sectab_off + sectab_count * (4 + 1 + 1 + 4 + 4);
    for (kind, size) in section_order.iter().zip(section_sizes.iter()) {
        let name_idx = strtab.find(kind.name()).map(|i| strtab.byte_offset(i)).unwrap_or(0);
        let section_type = match kind {
            SectionKind::Text => SECTION_TYPE_TEXT,
            SectionKind::Data => SECTION_TYPE_DATA,
            SectionKind::Bss => SECTION_TYPE_BSS,
        };
        w.u32(name_idx);
        w.u8(section_type);
        w.u8(0); // flags
        w.u32(*size);
        if *kind == SectionKind::Bss {
            w.u32(0);
        } else {
            w.u32(file_off);
            file_off += size;
        }
    }

    w.bytes(sections.text());
    w.bytes(sections.data());

    w.buf
}
