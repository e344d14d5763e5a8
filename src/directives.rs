//! Directive handlers (spec §4.7)
//!
//! Grounded on `src/assembler/directives.rs`'s shape (one function per
//! directive, taking a parsed statement and returning either an effect or a
//! `Diagnostic`) and on `Directives.cpp`'s preconditions (`_global`,
//! `_extern`, `_scope`/`_scend` "must be outside any section" / "must have
//! a matching opener" checks), carried over onto the new data model.

use crate::diagnostics::{Diagnostic, Kind, Span};
use crate::expr::{self, ExprContext};
use crate::reloc::Relocation;
use crate::section::{SectionBuilder, SectionKind};
use crate::strtab::StringTable;
use crate::symtab::{Binding, SymbolTable, ABSOLUTE_SECTION, UNDEFINED_SECTION};
use crate::token::{Directive, Token, TokenKind};

pub struct DirectiveContext<'a> {
    pub symtab: &'a mut SymbolTable,
    pub strtab: &'a mut StringTable,
    pub sections: &'a mut SectionBuilder,
    pub scope_stack: &'a mut Vec<usize>,
    pub relocations: &'a mut Vec<Relocation>,
    pub file: &'a str,
    pub line_number: usize,
    pub line: &'a str,
    /// Set by `.stop`: the caller must discard all remaining tokens.
    pub stopped: bool,
}

impl<'a> DirectiveContext<'a> {
    fn error(&self, message: impl Into<String>, span: Span) -> Diagnostic {
        Diagnostic::error(Kind::Semantic, message, self.file, self.line_number, self.line, vec![span])
    }

    fn eval(&mut self, tokens: &[Token]) -> Result<u32, Diagnostic> {
        let ectx = ExprContext { symtab: self.symtab, strtab: self.strtab, file: self.file, line_number: self.line_number, line: self.line };
        let (value, _) = expr::eval(tokens, &ectx)?;
        Ok(value)
    }

    /// The in-scope name for a freshly declared label: `NAME::TOKEN_INDEX`
    /// when the scope stack is non-empty, `NAME` otherwise (spec §3/§4.5).
    fn scoped_name(&self, name: &str) -> String {
        match self.scope_stack.last() {
            Some(token_index) => format!("{}::{}", name, token_index),
            None => name.to_string(),
        }
    }
}

fn split_by_comma(tokens: &[Token]) -> Vec<Vec<Token>> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    for t in tokens {
        if t.is_trivia() {
            continue;
        }
        if let TokenKind::Punctuation(crate::token::Punct::Comma) = t.kind {
            groups.push(std::mem::take(&mut current));
        } else {
            current.push(t.clone());
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn identifier_name(tokens: &[Token], ctx: &DirectiveContext, span: Span) -> Result<String, Diagnostic> {
    let significant: Vec<&Token> = tokens.iter().filter(|t| !t.is_trivia()).collect();
    match significant.first() {
        Some(t) if matches!(t.kind, TokenKind::Identifier) => Ok(t.lexeme.clone()),
        _ => Err(ctx.error("expected a symbol name", span)),
    }
}

/// `.global NAME` — must appear outside any section; defines `NAME` as
/// `GLOBAL`, value 0, undefined-section (spec §4.7).
pub fn global(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    if ctx.sections.current().is_some() {
        return Err(ctx.error(".global is only valid outside any section", span));
    }
    let name = identifier_name(operands, ctx, span)?;
    let name = ctx.scoped_name(&name);
    ctx.symtab.define(ctx.strtab, &name, 0, Binding::Global, UNDEFINED_SECTION, ctx.file, ctx.line_number, ctx.line, span)?;
    Ok(())
}

/// `.extern NAME` — must appear outside any section; defines `NAME` as
/// `WEAK`, undefined-section.
pub fn extern_(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    if ctx.sections.current().is_some() {
        return Err(ctx.error(".extern is only valid outside any section", span));
    }
    let name = identifier_name(operands, ctx, span)?;
    let name = ctx.scoped_name(&name);
    ctx.symtab.define(ctx.strtab, &name, 0, Binding::Weak, UNDEFINED_SECTION, ctx.file, ctx.line_number, ctx.line, span)?;
    Ok(())
}

/// `.equ NAME, EXPR` — valid anywhere; binds `NAME = eval(EXPR)` as a
/// `LOCAL` constant living in the `ABSOLUTE_SECTION` pseudo-section.
pub fn equ(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    let groups = split_by_comma(operands);
    if groups.len() != 2 {
        return Err(ctx.error(".equ requires a name and an expression", span));
    }
    let name = identifier_name(&groups[0], ctx, span)?;
    let name = ctx.scoped_name(&name);
    let value = ctx.eval(&groups[1])?;
    ctx.symtab.define(ctx.strtab, &name, value, Binding::Local, ABSOLUTE_SECTION, ctx.file, ctx.line_number, ctx.line, span)?;
    Ok(())
}

/// `.org EXPR` — must be in a section; forward-only cursor move.
pub fn org(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    let v = ctx.eval(operands)?;
    ctx.sections.org(v, ctx.file, ctx.line_number, ctx.line, span)
}

/// `.scope` — push the current line's token index as a scope-renaming tag
/// (spec §3: `NAME::TOKEN_INDEX`). `ctx.line_number` is 1-based, so the
/// 0-based token index is `line_number - 1`.
pub fn scope(ctx: &mut DirectiveContext) {
    ctx.scope_stack.push(ctx.line_number - 1);
}

/// `.scend` — pop the scope stack; unmatched = error.
pub fn scend(span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    if ctx.scope_stack.pop().is_none() {
        return Err(ctx.error(".scend with no matching .scope", span));
    }
    Ok(())
}

fn emit_numbers(operands: &[Token], width: usize, high_endian: bool, span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    let groups = split_by_comma(operands);
    if groups.is_empty() {
        return Err(ctx.error("expected at least one value", span));
    }
    let mut bytes = Vec::with_capacity(groups.len() * width);
    for g in &groups {
        let v = ctx.eval(g)?;
        let le = v.to_le_bytes();
        let mut word = le[..width].to_vec();
        if high_endian {
            word.reverse();
        }
        bytes.extend(word);
    }
    ctx.sections.emit_bytes(&bytes, ctx.file, ctx.line_number, ctx.line, span)
}

pub fn db(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    emit_numbers(operands, 1, false, span, ctx)
}

pub fn dw(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    emit_numbers(operands, 2, false, span, ctx)
}

pub fn dw_high(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    emit_numbers(operands, 2, true, span, ctx)
}

pub fn dd(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    emit_numbers(operands, 4, false, span, ctx)
}

pub fn dd_high(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    emit_numbers(operands, 4, true, span, ctx)
}

fn literal_string(operands: &[Token], ctx: &DirectiveContext, span: Span) -> Result<String, Diagnostic> {
    let significant: Vec<&Token> = operands.iter().filter(|t| !t.is_trivia()).collect();
    match significant.first() {
        Some(Token { kind: TokenKind::LiteralString(s), .. }) => Ok(s.clone()),
        _ => Err(ctx.error("expected a string literal", span)),
    }
}

pub fn ascii(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    let s = literal_string(operands, ctx, span)?;
    ctx.sections.emit_bytes(s.as_bytes(), ctx.file, ctx.line_number, ctx.line, span)
}

pub fn asciz(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    let s = literal_string(operands, ctx, span)?;
    let mut bytes = s.into_bytes();
    bytes.push(0);
    ctx.sections.emit_bytes(&bytes, ctx.file, ctx.line_number, ctx.line, span)
}

/// `.advance EXPR` — relative forward pad.
pub fn advance(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    let v = ctx.eval(operands)?;
    ctx.sections.advance(v, ctx.file, ctx.line_number, ctx.line, span)
}

/// `.fill COUNT, PATTERN, SIZE`.
pub fn fill(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    let groups = split_by_comma(operands);
    if groups.len() != 3 {
        return Err(ctx.error(".fill requires count, pattern, size", span));
    }
    let count = ctx.eval(&groups[0])?;
    let pattern = ctx.eval(&groups[1])?;
    let size = ctx.eval(&groups[2])?;
    ctx.sections.fill(count, pattern, size, ctx.file, ctx.line_number, ctx.line, span)
}

/// `.space EXPR` — zero-fill of `EXPR` bytes.
pub fn space(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    let n = ctx.eval(operands)?;
    let bytes = vec![0u8; n as usize];
    ctx.sections.emit_bytes(&bytes, ctx.file, ctx.line_number, ctx.line, span)
}

/// `.align EXPR` — forward pad to the next multiple of `EXPR`.
pub fn align(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    let v = ctx.eval(operands)?;
    ctx.sections.align(v, ctx.file, ctx.line_number, ctx.line, span)
}

/// `.checkpc EXPR` — assertion on the active section's cursor.
pub fn checkpc(operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    let v = ctx.eval(operands)?;
    ctx.sections.checkpc(v, ctx.file, ctx.line_number, ctx.line, span)
}

pub fn switch_section(kind: SectionKind, ctx: &mut DirectiveContext) {
    ctx.sections.switch(kind);
}

/// `.section` is reserved and always an error (spec §9 Open Question).
pub fn section(span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    Err(ctx.error(".section is reserved and not implemented", span))
}

pub fn stop(ctx: &mut DirectiveContext) {
    ctx.stopped = true;
}

/// Dispatch a directive keyword to its handler — the single entry point
/// the assembler's line loop calls for every `Directive` token, including
/// the ones with caller-visible side effects (`.scope` pushes onto the
/// scope stack, `.stop` sets `ctx.stopped` for the loop to check).
pub fn dispatch(directive: Directive, operands: &[Token], span: Span, ctx: &mut DirectiveContext) -> Result<(), Diagnostic> {
    match directive {
        Directive::Global => global(operands, span, ctx),
        Directive::Extern => extern_(operands, span, ctx),
        Directive::Equ => equ(operands, span, ctx),
        Directive::Org => org(operands, span, ctx),
        Directive::Scope => Ok(scope(ctx)),
        Directive::Scend => scend(span, ctx),
        Directive::Db => db(operands, span, ctx),
        Directive::Dw => dw(operands, span, ctx),
        Directive::DwHigh => dw_high(operands, span, ctx),
        Directive::Dd => dd(operands, span, ctx),
        Directive::DdHigh => dd_high(operands, span, ctx),
        Directive::Ascii => ascii(operands, span, ctx),
        Directive::Asciz => asciz(operands, span, ctx),
        Directive::Advance => advance(operands, span, ctx),
        Directive::Fill => fill(operands, span, ctx),
        Directive::Space => space(operands, span, ctx),
        Directive::Align => align(operands, span, ctx),
        Directive::Checkpc => checkpc(operands, span, ctx),
        Directive::Section => section(span, ctx),
        Directive::Text => Ok(switch_section(SectionKind::Text, ctx)),
        Directive::Data => Ok(switch_section(SectionKind::Data, ctx)),
        Directive::Bss => Ok(switch_section(SectionKind::Bss, ctx)),
        Directive::Stop => Ok(stop(ctx)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tokenize;

    struct Fixture {
        symtab: SymbolTable,
        strtab: StringTable,
        sections: SectionBuilder,
        scope_stack: Vec<usize>,
        relocations: Vec<Relocation>,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture { symtab: SymbolTable::new(), strtab: StringTable::new(), sections: SectionBuilder::new(), scope_stack: Vec::new(), relocations: Vec::new() }
        }
        fn ctx(&mut self) -> DirectiveContext<'_> {
            DirectiveContext {
                symtab: &mut self.symtab,
                strtab: &mut self.strtab,
                sections: &mut self.sections,
                scope_stack: &mut self.scope_stack,
                relocations: &mut self.relocations,
                file: "t.s",
                line_number: 1,
                line: "",
                stopped: false,
            }
        }
    }

    #[test]
    fn global_outside_section_defines_global_undefined() {
        let mut fx = Fixture::new();
        let toks = tokenize("main");
        global(&toks, Span::none(), &mut fx.ctx()).unwrap();
        let (_, entry) = fx.symtab.find(&fx.strtab, "main").unwrap();
        assert_eq!(entry.binding, Binding::Global);
        assert_eq!(entry.section_index, UNDEFINED_SECTION);
    }

    #[test]
    fn global_inside_section_is_an_error() {
        let mut fx = Fixture::new();
        fx.sections.switch(SectionKind::Text);
        let toks = tokenize("main");
        assert!(global(&toks, Span::none(), &mut fx.ctx()).is_err());
    }

    #[test]
    fn equ_binds_absolute_constant() {
        let mut fx = Fixture::new();
        let toks = tokenize("WIDTH, 4 + 4");
        equ(&toks, Span::none(), &mut fx.ctx()).unwrap();
        let (_, entry) = fx.symtab.find(&fx.strtab, "WIDTH").unwrap();
        assert_eq!(entry.value, 8);
        assert_eq!(entry.section_index, ABSOLUTE_SECTION);
    }

    #[test]
    fn db_emits_bytes_in_active_section() {
        let mut fx = Fixture::new();
        fx.sections.switch(SectionKind::Data);
        let toks = tokenize("0xAA, 0xBB");
        db(&toks, Span::none(), &mut fx.ctx()).unwrap();
        assert_eq!(fx.sections.data(), &[0xAA, 0xBB]);
    }

    #[test]
    fn dw_high_emits_big_endian_halfwords() {
        let mut fx = Fixture::new();
        fx.sections.switch(SectionKind::Data);
        let toks = tokenize("0x1234");
        dw_high(&toks, Span::none(), &mut fx.ctx()).unwrap();
        assert_eq!(fx.sections.data(), &[0x12, 0x34]);
    }

    #[test]
    fn scend_without_scope_is_an_error() {
        let mut fx = Fixture::new();
        assert!(scend(Span::none(), &mut fx.ctx()).is_err());
    }

    #[test]
    fn asciz_appends_nul_terminator() {
        let mut fx = Fixture::new();
        fx.sections.switch(SectionKind::Text);
        let toks = tokenize("\"hi\"");
        asciz(&toks, Span::none(), &mut fx.ctx()).unwrap();
        assert_eq!(fx.sections.text(), b"hi\0");
    }
}
