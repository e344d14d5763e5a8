//! Symbol table (spec §3, §4.5)
//!
//! Grounded on `Assembler::add_symbol` in
//! `examples/original_source/core/assembler/src/Directives.cpp`: the
//! binding-upgrade branch (`incoming == GLOBAL`, or `incoming == LOCAL` and
//! `current == WEAK`) is carried over verbatim; everything else is
//! generalized from the teacher's bare `HashMap<String, OpcodeAddress>` into
//! full entries.

use crate::diagnostics::{Diagnostic, Kind, Span};
use crate::strtab::StringTable;
use std::collections::HashMap;

/// `section_index` value meaning "undefined in this translation unit".
pub const UNDEFINED_SECTION: i16 = -1;

/// Pseudo-section for `.equ`-bound constants: not backed by section bytes,
/// but still a concrete "defined" value per the symbol invariant in spec §8
/// (a `LOCAL` symbol cannot sit at `section_index == -1`).
pub const ABSOLUTE_SECTION: i16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Local,
    Weak,
    Global,
}

impl Binding {
    pub fn as_u8(&self) -> u8 {
        match self {
            Binding::Local => 0,
            Binding::Weak => 1,
            Binding::Global => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub name_index: u32,
    pub value: u32,
    pub binding: Binding,
    pub section_index: i16,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    by_name: HashMap<u32, usize>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Look up or create an undefined reference to `name`. Mirrors
    /// `reference(name)` in spec §4.5: never errors, just returns the slot.
    pub fn reference(&mut self, strtab: &mut StringTable, name: &str) -> u32 {
        let name_index = strtab.intern(name);
        if let Some(&idx) = self.by_name.get(&name_index) {
            return idx as u32;
        }
        let idx = self.entries.len();
        self.entries.push(SymbolEntry {
            name_index,
            value: 0,
            binding: Binding::Weak,
            section_index: UNDEFINED_SECTION,
        });
        self.by_name.insert(name_index, idx);
        idx as u32
    }

    /// Define (or re-touch) a symbol, applying the lifecycle rules of spec §3.
    #[allow(clippy::too_many_arguments)]
    pub fn define(
        &mut self,
        strtab: &mut StringTable,
        name: &str,
        value: u32,
        binding: Binding,
        section_index: i16,
        file: &str,
        line_number: usize,
        line: &str,
        span: Span,
    ) -> Result<u32, Diagnostic> {
        let idx = self.reference(strtab, name) as usize;
        let entry = &mut self.entries[idx];

        if entry.section_index != UNDEFINED_SECTION && section_index != UNDEFINED_SECTION {
            return Err(Diagnostic::error(
                Kind::Semantic,
                format!("symbol \"{}\" already defined", name),
                file,
                line_number,
                line,
                vec![span],
            ));
        }
        if entry.section_index == UNDEFINED_SECTION && section_index != UNDEFINED_SECTION {
            entry.section_index = section_index;
            entry.value = value;
        }
        if binding == Binding::Global || (binding == Binding::Local && entry.binding == Binding::Weak) {
            entry.binding = binding;
        }
        Ok(idx as u32)
    }

    pub fn get(&self, index: u32) -> &SymbolEntry {
        &self.entries[index as usize]
    }

    /// Look up a symbol by name without creating an undefined entry for it.
    pub fn find(&self, strtab: &StringTable, name: &str) -> Option<(u32, &SymbolEntry)> {
        let name_index = strtab.find(name)?;
        let idx = *self.by_name.get(&name_index)?;
        Some((idx as u32, &self.entries[idx]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SymbolEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Span;

    #[test]
    fn reference_is_idempotent() {
        let mut strtab = StringTable::new();
        let mut symtab = SymbolTable::new();
        let a = symtab.reference(&mut strtab, "printf");
        let b = symtab.reference(&mut strtab, "printf");
        assert_eq!(a, b);
        assert_eq!(symtab.get(a).section_index, UNDEFINED_SECTION);
    }

    #[test]
    fn weak_upgrades_to_local_then_global() {
        let mut strtab = StringTable::new();
        let mut symtab = SymbolTable::new();
        let idx = symtab.reference(&mut strtab, "x");
        assert_eq!(symtab.get(idx).binding, Binding::Weak);
        symtab
            .define(&mut strtab, "x", 0, Binding::Local, UNDEFINED_SECTION, "f", 1, "", Span::none())
            .unwrap();
        assert_eq!(symtab.get(idx).binding, Binding::Local);
        symtab
            .define(&mut strtab, "x", 0, Binding::Global, UNDEFINED_SECTION, "f", 1, "", Span::none())
            .unwrap();
        assert_eq!(symtab.get(idx).binding, Binding::Global);
    }

    #[test]
    fn local_never_downgrades_global() {
        let mut strtab = StringTable::new();
        let mut symtab = SymbolTable::new();
        symtab
            .define(&mut strtab, "x", 0, Binding::Global, UNDEFINED_SECTION, "f", 1, "", Span::none())
            .unwrap();
        symtab
            .define(&mut strtab, "x", 0, Binding::Local, UNDEFINED_SECTION, "f", 1, "", Span::none())
            .unwrap();
        let idx = symtab.reference(&mut strtab, "x");
        assert_eq!(symtab.get(idx).binding, Binding::Global);
    }

    #[test]
    fn redefining_a_defined_symbol_in_another_section_is_an_error() {
        let mut strtab = StringTable::new();
        let mut symtab = SymbolTable::new();
        symtab
            .define(&mut strtab, "main", 0, Binding::Global, 0, "f", 1, "main:", Span::none())
            .unwrap();
        let err = symtab.define(&mut strtab, "main", 4, Binding::Global, 1, "f", 2, "main:", Span::none());
        assert!(err.is_err());
    }
}
