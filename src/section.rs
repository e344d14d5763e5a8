//! Section builder (spec §4.4)
//!
//! Grounded on `Directives.cpp::_org/_advance/_align`: section-typed match
//! arms, forward-only cursor checks, and `.text`'s word-alignment rule are
//! carried over; the stated `.align` bug (using `data_section.size()` while
//! aligning `.text`) is fixed here by reading the byte cursor off whichever
//! section is actually active (SPEC_FULL.md §14.1).

use crate::diagnostics::{Diagnostic, Kind, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Text,
    Data,
    Bss,
}

impl SectionKind {
    pub fn name(&self) -> &'static str {
        match self {
            SectionKind::Text => ".text",
            SectionKind::Data => ".data",
            SectionKind::Bss => ".bss",
        }
    }

    /// Index used everywhere a section is referenced by number (symbol
    /// table entries, relocation records, the object file's section table).
    pub fn index(&self) -> i16 {
        match self {
            SectionKind::Text => 0,
            SectionKind::Data => 1,
            SectionKind::Bss => 2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SectionBuilder {
    text: Vec<u8>,
    data: Vec<u8>,
    bss_size: u32,
    current: Option<SectionKind>,
}

impl SectionBuilder {
    pub fn new() -> SectionBuilder {
        SectionBuilder::default()
    }

    pub fn current(&self) -> Option<SectionKind> {
        self.current
    }

    pub fn switch(&mut self, kind: SectionKind) {
        self.current = Some(kind);
    }

    pub fn text(&self) -> &[u8] {
        &self.text
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bss_size(&self) -> u32 {
        self.bss_size
    }

    /// Current byte offset within `kind`. For `.text` this is
    /// `4 * instruction-count`, which falls out naturally since every
    /// instruction word is emitted as exactly 4 bytes.
    pub fn offset_in(&self, kind: SectionKind) -> u32 {
        match kind {
            SectionKind::Text => self.text.len() as u32,
            SectionKind::Data => self.data.len() as u32,
            SectionKind::Bss => self.bss_size,
        }
    }

    fn require_section(&self, file: &str, line_number: usize, line: &str, span: Span) -> Result<SectionKind, Diagnostic> {
        self.current.ok_or_else(|| {
            Diagnostic::error(
                Kind::Semantic,
                "not inside a section (.text/.data/.bss)".to_string(),
                file,
                line_number,
                line,
                vec![span],
            )
        })
    }

    /// Append bytes to the active section. `.bss` only tracks a size counter
    /// and rejects non-zero bytes, per spec §4.4.
    pub fn emit_bytes(&mut self, bytes: &[u8], file: &str, line_number: usize, line: &str, span: Span) -> Result<(), Diagnostic> {
        let kind = self.require_section(file, line_number, line, span)?;
        match kind {
            SectionKind::Text => self.text.extend_from_slice(bytes),
            SectionKind::Data => self.data.extend_from_slice(bytes),
            SectionKind::Bss => {
                if bytes.iter().any(|b| *b != 0) {
                    return Err(Diagnostic::error(
                        Kind::Semantic,
                        "cannot emit non-zero bytes in .bss".to_string(),
                        file,
                        line_number,
                        line,
                        vec![span],
                    ));
                }
                self.bss_size += bytes.len() as u32;
            }
        }
        Ok(())
    }

    fn pad(&mut self, kind: SectionKind, n: u32) {
        match kind {
            SectionKind::Text => self.text.extend(std::iter::repeat(0u8).take(n as usize)),
            SectionKind::Data => self.data.extend(std::iter::repeat(0u8).take(n as usize)),
            SectionKind::Bss => self.bss_size += n,
        }
    }

    fn check_text_alignment(&self, v: u32, file: &str, line_number: usize, line: &str, span: Span) -> Result<(), Diagnostic> {
        if v % 4 != 0 {
            return Err(Diagnostic::error(
                Kind::Semantic,
                format!("misaligned target {} in .text (must be a multiple of 4)", v),
                file,
                line_number,
                line,
                vec![span],
            ));
        }
        Ok(())
    }

    /// Forward-only move to absolute offset `v` within the active section.
    pub fn org(&mut self, v: u32, file: &str, line_number: usize, line: &str, span: Span) -> Result<(), Diagnostic> {
        let kind = self.require_section(file, line_number, line, span)?;
        if kind == SectionKind::Text {
            self.check_text_alignment(v, file, line_number, line, span)?;
        }
        let cursor = self.offset_in(kind);
        if v < cursor {
            return Err(Diagnostic::error(
                Kind::Semantic,
                format!("backward .org: cursor is at {}, target is {}", cursor, v),
                file,
                line_number,
                line,
                vec![span],
            ));
        }
        self.pad(kind, v - cursor);
        Ok(())
    }

    /// Relative forward pad by `v` bytes.
    pub fn advance(&mut self, v: u32, file: &str, line_number: usize, line: &str, span: Span) -> Result<(), Diagnostic> {
        let kind = self.require_section(file, line_number, line, span)?;
        let target = self.offset_in(kind) + v;
        if kind == SectionKind::Text {
            self.check_text_alignment(target, file, line_number, line, span)?;
        }
        self.pad(kind, v);
        Ok(())
    }

    /// Pad forward to the next multiple of `v`.
    pub fn align(&mut self, v: u32, file: &str, line_number: usize, line: &str, span: Span) -> Result<(), Diagnostic> {
        let kind = self.require_section(file, line_number, line, span)?;
        if kind == SectionKind::Text {
            self.check_text_alignment(v, file, line_number, line, span)?;
        }
        if v == 0 {
            return Err(Diagnostic::error(
                Kind::Semantic,
                ".align requires a non-zero alignment".to_string(),
                file,
                line_number,
                line,
                vec![span],
            ));
        }
        let cursor = self.offset_in(kind);
        let remainder = cursor % v;
        if remainder != 0 {
            self.pad(kind, v - remainder);
        }
        Ok(())
    }

    /// Emit `count` copies of `pattern` truncated to `size` little-endian bytes.
    pub fn fill(&mut self, count: u32, pattern: u32, size: u32, file: &str, line_number: usize, line: &str, span: Span) -> Result<(), Diagnostic> {
        let bytes = pattern.to_le_bytes();
        let size = size.min(4) as usize;
        let mut out = Vec::with_capacity(count as usize * size);
        for _ in 0..count {
            out.extend_from_slice(&bytes[..size]);
        }
        self.emit_bytes(&out, file, line_number, line, span)
    }

    pub fn checkpc(&self, expected: u32, file: &str, line_number: usize, line: &str, span: Span) -> Result<(), Diagnostic> {
        let kind = self.require_section(file, line_number, line, span)?;
        let cursor = self.offset_in(kind);
        if cursor != expected {
            return Err(Diagnostic::error(
                Kind::Semantic,
                format!("checkpc failed: expected {}, cursor is at {}", expected, cursor),
                file,
                line_number,
                line,
                vec![span],
            ));
        }
        Ok(())
    }
}
