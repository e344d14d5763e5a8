//! End-to-end assembly scenarios, exercised through the public
//! `emu32asm::assembler::assemble` entry point and the raw `E32O` blob
//! it returns. Mirrors the literal scenarios worked through by hand in
//! the design notes: smallest program, immediate ALU encoding, a
//! `.data` section padded forward by `.org`, scope-qualified label
//! renaming, a global/extern relocation pair, and a backward-`.org`
//! error that must leave the prior bytes untouched.

use emu32asm::assembler::assemble;
use emu32asm::diagnostics::Status;
use emu32asm::preprocessor::MapIncludeResolver;
use std::collections::HashMap;

fn run(source: &str) -> emu32asm::assembler::AssembleResult {
    let resolver = MapIncludeResolver::default();
    assemble("t.s", source, &resolver, vec![], HashMap::new())
}

struct Header {
    strtab_off: u32,
    strtab_len: u32,
    symtab_off: u32,
    symtab_count: u32,
    reltab_off: u32,
    reltab_count: u32,
    sectab_off: u32,
    sectab_count: u32,
}

fn u32_at(blob: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(blob[off..off + 4].try_into().unwrap())
}

fn u16_at(blob: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(blob[off..off + 2].try_into().unwrap())
}

fn i16_at(blob: &[u8], off: usize) -> i16 {
    i16::from_le_bytes(blob[off..off + 2].try_into().unwrap())
}

fn header(blob: &[u8]) -> Header {
    assert_eq!(&blob[0..4], b"E32O");
    Header {
        strtab_off: u32_at(blob, 8),
        strtab_len: u32_at(blob, 12),
        symtab_off: u32_at(blob, 16),
        symtab_count: u32_at(blob, 20),
        reltab_off: u32_at(blob, 24),
        reltab_count: u32_at(blob, 28),
        sectab_off: u32_at(blob, 32),
        sectab_count: u32_at(blob, 36),
    }
}

fn strtab_name(blob: &[u8], h: &Header, index: u32) -> String {
    let start = h.strtab_off as usize + index as usize;
    let end = blob[start..].iter().position(|&b| b == 0).map(|n| start + n).unwrap();
    String::from_utf8(blob[start..end].to_vec()).unwrap()
}

struct SymbolRecord {
    name: String,
    value: u32,
    binding: u8,
    section_index: i16,
}

fn symbols(blob: &[u8], h: &Header) -> Vec<SymbolRecord> {
    (0..h.symtab_count)
        .map(|i| {
            let rec = h.symtab_off as usize + i as usize * 11;
            let name_index = u32_at(blob, rec);
            SymbolRecord {
                name: strtab_name(blob, h, name_index),
                value: u32_at(blob, rec + 4),
                binding: blob[rec + 8],
                section_index: i16_at(blob, rec + 9),
            }
        })
        .collect()
}

struct RelocationRecord {
    section_index: u16,
    offset: u32,
    symbol: u32,
    kind: u16,
}

fn relocations(blob: &[u8], h: &Header) -> Vec<RelocationRecord> {
    (0..h.reltab_count)
        .map(|i| {
            let rec = h.reltab_off as usize + i as usize * 12;
            RelocationRecord {
                section_index: u16_at(blob, rec),
                offset: u32_at(blob, rec + 4),
                symbol: u32_at(blob, rec + 8),
                kind: u16_at(blob, rec + 10),
            }
        })
        .collect()
}

fn section_sizes(blob: &[u8], h: &Header) -> Vec<u32> {
    (0..h.sectab_count).map(|i| u32_at(blob, h.sectab_off as usize + i as usize * 14 + 5)).collect()
}

#[test]
fn smallest_program_emits_one_zero_word() {
    let result = run(".text\nhlt\n");
    assert_eq!(result.status, Status::Ok);
    let h = header(&result.object);
    assert_eq!(h.symtab_count, 0);
    let sizes = section_sizes(&result.object, &h);
    assert_eq!(sizes[0], 4);
    let text_start = result.object.len() - sizes[0] as usize - sizes[1] as usize;
    assert_eq!(&result.object[text_start..text_start + 4], &[0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn immediate_alu_encodes_per_the_bit_table() {
    // opcode=6, S=0, Rd=0, Rn=1, is-imm=1, imm14=5:
    // (6<<26)|(0<<20)|(1<<15)|(1<<14)|5 = 0x1800c005, matching the
    // `[24..20] Rd | [19..15] Rn` field layout rather than the
    // inconsistent `rd<<24 | rn<<19` arithmetic worked in the design
    // notes' own scenario 2.
    let result = run(".text\nadd x0, x1, #5\n");
    assert_eq!(result.status, Status::Ok);
    let h = header(&result.object);
    let sizes = section_sizes(&result.object, &h);
    let text_start = result.object.len() - sizes[0] as usize - sizes[1] as usize;
    let word = u32_at(&result.object, text_start);
    assert_eq!(word, 0x1800c005);
}

#[test]
fn data_section_with_org_pads_forward() {
    let result = run(".data\n.org 4\n.db 0xAA, 0xBB\n");
    assert_eq!(result.status, Status::Ok);
    let h = header(&result.object);
    let sizes = section_sizes(&result.object, &h);
    let data_start = result.object.len() - sizes[1] as usize;
    assert_eq!(&result.object[data_start..data_start + 6], &[0x00, 0x00, 0x00, 0x00, 0xAA, 0xBB]);
}

#[test]
fn scope_qualifies_the_label_and_bare_name_does_not_resolve() {
    let result = run(".scope\nloop: hlt\n.scend\n");
    assert_eq!(result.status, Status::Ok);
    let h = header(&result.object);
    let syms = symbols(&result.object, &h);
    assert!(syms.iter().any(|s| s.name == "loop::0"), "expected loop::0, got {:?}", syms.iter().map(|s| &s.name).collect::<Vec<_>>());
    assert!(!syms.iter().any(|s| s.name == "loop"));
}

#[test]
fn global_and_extern_emit_a_relocation_pair() {
    let result = run(".global main\n.extern printf\n.text\nmain: bl printf\n      hlt\n");
    assert_eq!(result.status, Status::Ok);
    let h = header(&result.object);
    let syms = symbols(&result.object, &h);

    let main_sym = syms.iter().find(|s| s.name == "main").expect("main symbol");
    assert_eq!(main_sym.binding, 2); // Global
    assert_eq!(main_sym.value, 0);
    assert!(main_sym.section_index >= 0);

    let printf_sym = syms.iter().find(|s| s.name == "printf").expect("printf symbol");
    assert_eq!(printf_sym.binding, 1); // Weak
    assert_eq!(printf_sym.section_index, -1);

    let relocs = relocations(&result.object, &h);
    let lo19 = relocs.iter().filter(|r| r.kind == emu32asm::reloc::RelocKind::MovLo19.as_u16()).count();
    let hi13 = relocs.iter().filter(|r| r.kind == emu32asm::reloc::RelocKind::MovHi13.as_u16()).count();
    assert_eq!(lo19, 1);
    assert_eq!(hi13, 1);
    let offset_zero_pair = relocs.iter().filter(|r| r.offset == 0).count();
    assert_eq!(offset_zero_pair, 2);
}

#[test]
fn backward_org_is_an_error_and_leaves_data_intact() {
    let result = run(".data\n.db 1, 2, 3, 4\n.org 2\n");
    assert_eq!(result.status, Status::Error);
    assert!(result.object.is_empty());
    assert!(result.diagnostics.iter().any(|d| d.message.to_lowercase().contains("org")));
}
