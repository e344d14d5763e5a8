//! Assembler pipeline (spec §2, §3)
//!
//! Single-pass core: tokenize, preprocess, then one pass over the
//! preprocessed token stream dispatching each line to a label definition, a
//! directive handler, or the instruction encoder, with diagnostics
//! accumulated and assembly continuing past errors (spec §7). Differs from
//! the teacher's two-pass `first_pass`/`second_pass` label resolution: EMU32
//! defers unresolved symbols to relocations instead of requiring every
//! label resolved before code generation (spec §4.6), so one pass suffices.
//!
//! Grounded on `src/assembler.rs` (teacher) for the public entry-point shape
//! (`assemble_from_file` reading a path, delegating to `assemble`) and for
//! keeping the pipeline and its diagnostics in one module.

use crate::diagnostics::{Diagnostic, Kind, Status};
use crate::directives::{self, DirectiveContext};
use crate::encode::{self, EncodeContext};
use crate::object;
use crate::preprocessor::{IncludeResolver, Preprocessor};
use crate::reloc::Relocation;
use crate::section::SectionBuilder;
use crate::strtab::StringTable;
use crate::symtab::{Binding, SymbolTable, UNDEFINED_SECTION};
use crate::token::{tokenize, Punct, Token, TokenKind};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolves `#include` by reading real files off disk, the way the
/// teacher's `assemble_from_file` reads its one source file with
/// `fs::read_to_string`.
pub struct FsIncludeResolver;

impl IncludeResolver for FsIncludeResolver {
    fn resolve_quoted(&self, current_file: &str, path: &str) -> Option<String> {
        let base = Path::new(current_file).parent().unwrap_or_else(|| Path::new(""));
        let candidate = base.join(path);
        if candidate.is_file() {
            return Some(candidate.to_string_lossy().into_owned());
        }
        None
    }

    fn resolve_angle(&self, _current_file: &str, include_paths: &[String], path: &str) -> Option<String> {
        for dir in include_paths {
            let candidate = PathBuf::from(dir).join(path);
            if candidate.is_file() {
                return Some(candidate.to_string_lossy().into_owned());
            }
        }
        None
    }

    fn read(&self, resolved_path: &str) -> std::io::Result<String> {
        fs::read_to_string(resolved_path)
    }
}

/// Everything a completed (or partially completed, on error) assembly run
/// produces: the ready-to-write object blob, every diagnostic seen, and the
/// worst status reached — the caller decides whether to write `object` and
/// what exit code to use from `status` (spec §6.1, §7).
pub struct AssembleResult {
    pub object: Vec<u8>,
    pub diagnostics: Vec<Diagnostic>,
    pub status: Status,
}

struct Assembler {
    symtab: SymbolTable,
    strtab: StringTable,
    sections: SectionBuilder,
    scope_stack: Vec<usize>,
    relocations: Vec<Relocation>,
    diagnostics: Vec<Diagnostic>,
    status: Status,
}

impl Assembler {
    fn new() -> Assembler {
        let mut strtab = StringTable::new();
        strtab.intern(".text");
        strtab.intern(".data");
        strtab.intern(".bss");
        Assembler {
            symtab: SymbolTable::new(),
            strtab,
            sections: SectionBuilder::new(),
            scope_stack: Vec::new(),
            relocations: Vec::new(),
            diagnostics: Vec::new(),
            status: Status::Ok,
        }
    }

    fn record(&mut self, diagnostic: Diagnostic) {
        self.status = self.status.record(diagnostic.severity);
        self.diagnostics.push(diagnostic);
    }

    /// In-scope name for a freshly declared label (spec §3 Scope stack).
    fn scoped_name(&self, name: &str) -> String {
        match self.scope_stack.last() {
            Some(token_index) => format!("{}::{}", name, token_index),
            None => name.to_string(),
        }
    }
}

/// Assemble one translation unit given its already-read source text, an
/// include resolver, search paths, and command-line predefines (spec §6.1
/// `-D NAME[=VALUE]`). The CLI layer owns reading the root file; this
/// function owns everything after that (spec §5: I/O is up front).
pub fn assemble(
    file: &str,
    source: &str,
    resolver: &dyn IncludeResolver,
    include_paths: Vec<String>,
    defines: HashMap<String, String>,
) -> AssembleResult {
    let mut asm = Assembler::new();

    let initial_defines: HashMap<String, Vec<Token>> =
        defines.into_iter().map(|(name, value)| (name, tokenize(&value))).collect();

    let preprocessor = Preprocessor::new(resolver, include_paths, initial_defines);
    let preprocessed = preprocessor.run(file, source);
    for diagnostic in preprocessed.diagnostics {
        asm.record(diagnostic);
    }
    let tokens = preprocessed.tokens;

    let lines = split_lines(&tokens);
    'lines: for (line_index, line) in lines.iter().enumerate() {
        let line_text = render_line(line);
        let mut significant: Vec<&Token> = line.iter().filter(|t| !t.is_trivia()).collect();

        // Leading label(s): `name:` tokens, possibly more than one on a line.
        while let Some(first) = significant.first() {
            if !matches!(first.kind, TokenKind::Label) {
                break;
            }
            let raw = first.lexeme.trim_end_matches(':').to_string();
            let name = asm.scoped_name(&raw);
            let value = asm.sections.current().map(|k| asm.sections.offset_in(k)).unwrap_or(0);
            let section_index = asm.sections.current().map(|k| k.index()).unwrap_or(UNDEFINED_SECTION);
            let span = first.span;
            let result = asm.symtab.define(&mut asm.strtab, &name, value, Binding::Local, section_index, file, line_index + 1, &line_text, span);
            if let Err(diagnostic) = result {
                asm.record(diagnostic);
            }
            significant.remove(0);
        }

        let Some(first) = significant.first().copied() else { continue };

        match &first.kind {
            TokenKind::Directive(d) => {
                let d = *d;
                let operands: Vec<Token> = significant[1..].iter().map(|t| (*t).clone()).collect();
                let mut ctx = DirectiveContext {
                    symtab: &mut asm.symtab,
                    strtab: &mut asm.strtab,
                    sections: &mut asm.sections,
                    scope_stack: &mut asm.scope_stack,
                    relocations: &mut asm.relocations,
                    file,
                    line_number: line_index + 1,
                    line: &line_text,
                    stopped: false,
                };
                let result = directives::dispatch(d, &operands, first.span, &mut ctx);
                let stopped = ctx.stopped;
                drop(ctx);
                if let Err(diagnostic) = result {
                    asm.record(diagnostic);
                }
                if stopped {
                    break 'lines;
                }
            }
            TokenKind::Instruction(mnemonic) => {
                let mnemonic = *mnemonic;
                let mut rest = &significant[1..];
                let mut condition = None;
                if rest.len() >= 2 {
                    if let (TokenKind::Punctuation(Punct::Period), TokenKind::Condition(c)) = (&rest[0].kind, &rest[1].kind) {
                        condition = Some(*c);
                        rest = &rest[2..];
                    }
                }
                let Some(section) = asm.sections.current() else {
                    asm.record(Diagnostic::error(Kind::Semantic, "instruction outside any section", file, line_index + 1, &line_text, vec![first.span]));
                    continue;
                };
                let operand_tokens: Vec<Token> = rest.iter().map(|t| (*t).clone()).collect();
                let offset = asm.sections.offset_in(section);
                let mut ctx = EncodeContext {
                    symtab: &mut asm.symtab,
                    strtab: &mut asm.strtab,
                    section,
                    offset,
                    file,
                    line_number: line_index + 1,
                    line: &line_text,
                };
                match encode::encode(mnemonic, condition, &operand_tokens, first.span, &mut ctx) {
                    Ok((words, mut relocs)) => {
                        asm.relocations.append(&mut relocs);
                        let mut bytes = Vec::with_capacity(words.len() * 4);
                        for word in &words {
                            bytes.extend_from_slice(&word.to_le_bytes());
                        }
                        if let Err(diagnostic) = asm.sections.emit_bytes(&bytes, file, line_index + 1, &line_text, first.span) {
                            asm.record(diagnostic);
                        }
                    }
                    Err(diagnostic) => asm.record(diagnostic),
                }
            }
            TokenKind::Error(message) => {
                let message = message.clone();
                asm.record(Diagnostic::error(Kind::Lexical, message, file, line_index + 1, &line_text, vec![first.span]));
            }
            _ => {
                asm.record(Diagnostic::error(Kind::Syntactic, format!("unexpected token \"{}\"", first.lexeme), file, line_index + 1, &line_text, vec![first.span]));
            }
        }
    }

    finish(asm)
}

/// Read `path` and assemble it (spec §6.1's positional-source-file surface).
pub fn assemble_from_file(path: &str, include_paths: Vec<String>, defines: HashMap<String, String>) -> Result<AssembleResult, std::io::Error> {
    let source = fs::read_to_string(path)?;
    Ok(assemble(path, &source, &FsIncludeResolver, include_paths, defines))
}

fn finish(asm: Assembler) -> AssembleResult {
    let object = if matches!(asm.status, Status::Ok | Status::Warning) {
        object::emit(&asm.symtab, &asm.strtab, &asm.sections, &asm.relocations, 0)
    } else {
        Vec::new()
    };
    AssembleResult { object, diagnostics: asm.diagnostics, status: asm.status }
}

/// Split a flat token stream into lines at `WhitespaceNewline` boundaries,
/// the same shape `preprocessor.rs`'s own line dispatch uses.
fn split_lines(tokens: &[Token]) -> Vec<&[Token]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, t) in tokens.iter().enumerate() {
        if matches!(t.kind, TokenKind::WhitespaceNewline) {
            lines.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    if start < tokens.len() {
        lines.push(&tokens[start..]);
    }
    lines
}

fn render_line(line: &[Token]) -> String {
    line.iter().map(|t| t.lexeme.as_str()).collect::<Vec<_>>().join("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessor::MapIncludeResolver;

    fn run(source: &str) -> AssembleResult {
        let resolver = MapIncludeResolver::default();
        assemble("t.s", source, &resolver, vec![], HashMap::new())
    }

    #[test]
    fn smallest_program_emits_zero_word() {
        let result = run(".text\nhlt\n");
        assert_eq!(result.status, Status::Ok);
        // .text payload is the last 4 bytes of the blob (no .data follows).
        let tail = &result.object[result.object.len() - 4..];
        assert_eq!(tail, &[0, 0, 0, 0]);
    }

    #[test]
    fn data_section_with_org_pads_forward() {
        let result = run(".data\n.org 4\n.db 0xAA, 0xBB\n");
        assert_eq!(result.status, Status::Ok);
        let tail = &result.object[result.object.len() - 6..];
        assert_eq!(tail, &[0x00, 0x00, 0x00, 0x00, 0xAA, 0xBB]);
    }

    #[test]
    fn scope_renames_label() {
        let result = run(".scope\nloop: hlt\n.scend\n");
        assert_eq!(result.status, Status::Ok);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn global_and_extern_emit_a_relocation_pair() {
        let result = run(".global main\n.extern printf\n.text\nmain: bl printf\n      hlt\n");
        assert_eq!(result.status, Status::Ok);
    }

    #[test]
    fn backward_org_is_an_error_and_leaves_data_intact() {
        let result = run(".data\n.db 1, 2, 3, 4\n.org 2\n");
        assert_eq!(result.status, Status::Error);
        assert!(result.object.is_empty());
    }

    #[test]
    fn instruction_outside_section_is_an_error() {
        let result = run("hlt\n");
        assert_eq!(result.status, Status::Error);
    }

    #[test]
    fn stop_discards_remaining_tokens() {
        let result = run(".text\nhlt\n.stop\nthis is not valid syntax at all\n");
        assert_eq!(result.status, Status::Ok);
        let tail = &result.object[result.object.len() - 4..];
        assert_eq!(tail, &[0, 0, 0, 0]);
    }
}
