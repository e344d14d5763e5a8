//! Preprocessor (spec §4.2)
//!
//! Grounded on `examples/original_source/src/AssemblerV3/Preprocess/PreprocessorV3.cpp`
//! for the directive dispatch shape (a `preprocess()` loop consulting a
//! directive-name → handler table) and for which directives exist; those
//! handler bodies are empty stubs in the original (`_macro`, `_define`,
//! `_ifdef`, … do nothing), so the actual logic here — macro frames,
//! conditional frame stack, include-cycle set — is original to this crate,
//! built the way `src/assembler.rs`'s explicit two-pass state threading
//! keeps everything in named values rather than process-wide globals
//! (spec §9 "Global state" design note).
//!
//! Diagnostics are accumulated rather than returned as the first hard
//! error, mirroring `Assembler`'s own line loop (spec §7: "the pipeline
//! continues processing tokens to surface additional errors") — a bad
//! `#include` three lines above a stray `#endif` must not hide the second
//! problem.

use crate::diagnostics::{Diagnostic, Kind, Span};
use crate::token::{tokenize, Preproc, Punct, Token, TokenKind};
use std::collections::HashMap;

/// File I/O is explicitly out-of-scope plumbing (spec §1); `#include`
/// resolution is a pluggable boundary so the preprocessor core stays a pure
/// token-stream transformer.
pub trait IncludeResolver {
    /// Resolve a quoted `#include "path"`, relative to `current_file`.
    fn resolve_quoted(&self, current_file: &str, path: &str) -> Option<String>;
    /// Resolve an angle-bracket `#include <path>` against the include path
    /// list, falling back to the current file's directory.
    fn resolve_angle(&self, current_file: &str, include_paths: &[String], path: &str) -> Option<String>;
    fn read(&self, resolved_path: &str) -> std::io::Result<String>;
}

/// In-memory resolver used by tests and by callers that have already
/// loaded every source file (e.g. a single-file CLI invocation with no
/// includes touches the filesystem at all).
#[derive(Default)]
pub struct MapIncludeResolver {
    pub files: HashMap<String, String>,
}

impl IncludeResolver for MapIncludeResolver {
    fn resolve_quoted(&self, _current_file: &str, path: &str) -> Option<String> {
        self.files.contains_key(path).then(|| path.to_string())
    }

    fn resolve_angle(&self, current_file: &str, _include_paths: &[String], path: &str) -> Option<String> {
        self.resolve_quoted(current_file, path)
    }

    fn read(&self, resolved_path: &str) -> std::io::Result<String> {
        self.files
            .get(resolved_path)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, resolved_path.to_string()))
    }
}

struct MacroDef {
    params: Vec<String>,
    body: Vec<Vec<Token>>,
    ret_expr: Option<Vec<Token>>,
}

struct CondFrame {
    /// Whether any branch so far (including the current one) has matched.
    any_taken: bool,
    /// Whether the branch currently active is the one being emitted.
    taking: bool,
    open_span: Span,
}

/// Everything a preprocessing pass produces: the spliced token stream ready
/// for `assembler.rs`'s line loop, plus every diagnostic seen along the way
/// (warnings and errors both — the caller folds these into its own status,
/// the way it already folds diagnostics from the line loop itself).
pub struct PreprocessOutput {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct Preprocessor<'a> {
    resolver: &'a dyn IncludeResolver,
    include_paths: Vec<String>,
    defines: HashMap<String, Vec<Token>>,
    macros: HashMap<String, MacroDef>,
    include_stack: Vec<String>,
    output: Vec<Token>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(resolver: &'a dyn IncludeResolver, include_paths: Vec<String>, initial_defines: HashMap<String, Vec<Token>>) -> Preprocessor<'a> {
        Preprocessor {
            resolver,
            include_paths,
            defines: initial_defines,
            macros: HashMap::new(),
            include_stack: Vec::new(),
            output: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn run(mut self, file: &str, source: &str) -> PreprocessOutput {
        self.include_stack.push(file.to_string());
        self.process_file(file, source);
        self.include_stack.pop();
        PreprocessOutput { tokens: self.output, diagnostics: self.diagnostics }
    }

    fn error(&mut self, kind: Kind, message: impl Into<String>, file: &str, line_number: usize, line_text: &str, spans: Vec<Span>) {
        self.diagnostics.push(Diagnostic::error(kind, message, file, line_number, line_text, spans));
    }

    fn warning(&mut self, kind: Kind, message: impl Into<String>, file: &str, line_number: usize, line_text: &str, spans: Vec<Span>) {
        self.diagnostics.push(Diagnostic::warning(kind, message, file, line_number, line_text, spans));
    }

    fn process_file(&mut self, file: &str, source: &str) {
        let tokens = tokenize(source);
        let lines = split_lines(&tokens);
        let mut cond_stack: Vec<CondFrame> = Vec::new();
        let mut i = 0usize;
        while i < lines.len() {
            let line = lines[i];
            let line_number = i + 1;
            let line_text = render_line(line);
            let emitting = cond_stack.iter().all(|f| f.taking);

            if let Some((preproc, rest)) = leading_preproc(line) {
                match preproc {
                    Preproc::Ifdef | Preproc::Ifndef | Preproc::Ifequ | Preproc::Ifnequ | Preproc::Ifless | Preproc::Ifmore => {
                        let span = line.first().map(|t| t.span).unwrap_or_else(Span::none);
                        let taking = emitting && self.eval_condition(preproc, rest, file, line_number, &line_text);
                        cond_stack.push(CondFrame { any_taken: taking, taking, open_span: span });
                    }
                    Preproc::Else | Preproc::Elsedef | Preproc::Elsendef | Preproc::Elseequ | Preproc::Elsenequ | Preproc::Elseless | Preproc::Elsemore => {
                        if cond_stack.is_empty() {
                            self.error(Kind::Preprocessor, "#else with no matching #if*", file, line_number, &line_text, vec![]);
                        } else {
                            let parent_emitting = cond_stack[..cond_stack.len() - 1].iter().all(|f| f.taking);
                            let predicate = if preproc == Preproc::Else {
                                !cond_stack.last().unwrap().any_taken
                            } else {
                                let any_taken = cond_stack.last().unwrap().any_taken;
                                !any_taken && self.eval_condition(else_predicate_kind(preproc), rest, file, line_number, &line_text)
                            };
                            let frame = cond_stack.last_mut().unwrap();
                            frame.taking = parent_emitting && predicate;
                            if frame.taking {
                                frame.any_taken = true;
                            }
                        }
                    }
                    Preproc::Endif => {
                        if cond_stack.pop().is_none() {
                            self.error(Kind::Preprocessor, "#endif with no matching #if*", file, line_number, &line_text, vec![]);
                        }
                    }
                    Preproc::Define if emitting => self.handle_define(rest, file, line_number, &line_text),
                    Preproc::Undef if emitting => self.handle_undef(rest),
                    Preproc::Include if emitting => self.handle_include(file, rest, line_number, &line_text),
                    Preproc::Macro => {
                        if emitting {
                            if let Some((name, def, consumed)) = self.collect_macro(rest, &lines[i + 1..], file, line_number, &line_text) {
                                if self.macros.contains_key(&name) {
                                    self.error(Kind::Preprocessor, format!("macro \"{}\" redefined", name), file, line_number, &line_text, vec![]);
                                }
                                self.macros.insert(name, def);
                                i += consumed;
                            }
                        } else {
                            // Dead #ifdef branch: skip the body without collecting it.
                            let mut consumed = 0;
                            for (offset, body_line) in lines[i + 1..].iter().enumerate() {
                                consumed = offset + 1;
                                if let Some((Preproc::Macend, _)) = leading_preproc(body_line) {
                                    break;
                                }
                            }
                            i += consumed;
                        }
                    }
                    Preproc::Invoke if emitting => self.handle_invoke(rest, file, line_number, &line_text),
                    Preproc::Macend => {
                        self.error(Kind::Preprocessor, "#macend with no matching #macro", file, line_number, &line_text, vec![]);
                    }
                    Preproc::Macret => {
                        self.error(Kind::Preprocessor, "#macret outside of a #macro body", file, line_number, &line_text, vec![]);
                    }
                    _ => {}
                }
                i += 1;
                continue;
            }

            if emitting {
                self.emit_line(line);
            }
            i += 1;
        }

        if let Some(frame) = cond_stack.first() {
            self.error(Kind::Preprocessor, "unterminated #if*: missing #endif", file, 0, "", vec![frame.open_span]);
        }
    }

    fn emit_line(&mut self, line: &[Token]) {
        for t in line {
            if let TokenKind::Identifier = t.kind {
                if let Some(expansion) = self.defines.get(&t.lexeme) {
                    self.output.extend(expansion.clone());
                    continue;
                }
            }
            self.output.push(t.clone());
        }
        self.output.push(Token { kind: TokenKind::WhitespaceNewline, lexeme: "\n".to_string(), span: Span::none() });
    }

    fn handle_define(&mut self, rest: &[Token], file: &str, line_number: usize, line_text: &str) {
        let significant: Vec<&Token> = rest.iter().filter(|t| !t.is_trivia()).collect();
        let Some(name) = significant.first() else {
            self.error(Kind::Preprocessor, "#define requires a name", file, line_number, line_text, vec![]);
            return;
        };
        if self.defines.contains_key(&name.lexeme) {
            self.warning(Kind::Preprocessor, format!("redefinition of \"{}\"", name.lexeme), file, line_number, line_text, vec![name.span]);
        }
        let body: Vec<Token> = significant[1..].iter().map(|t| (*t).clone()).collect();
        self.defines.insert(name.lexeme.clone(), body);
    }

    fn handle_undef(&mut self, rest: &[Token]) {
        if let Some(name) = rest.iter().find(|t| !t.is_trivia()) {
            self.defines.remove(&name.lexeme);
        }
    }

    fn handle_include(&mut self, file: &str, rest: &[Token], line_number: usize, line_text: &str) {
        let Some(open_idx) = rest.iter().position(|t| !t.is_trivia()) else {
            self.error(Kind::Preprocessor, "#include requires a path", file, line_number, line_text, vec![]);
            return;
        };
        let (path, angle) = match &rest[open_idx].kind {
            TokenKind::LiteralString(s) => (s.clone(), false),
            TokenKind::Operator(crate::token::Op::LogLt) => {
                let close_idx = rest[open_idx + 1..].iter().position(|t| matches!(t.kind, TokenKind::Operator(crate::token::Op::LogGt)));
                let Some(close_idx) = close_idx else {
                    self.error(Kind::Preprocessor, "unterminated <include> path", file, line_number, line_text, vec![]);
                    return;
                };
                let text: String = rest[open_idx + 1..open_idx + 1 + close_idx].iter().map(|t| t.lexeme.as_str()).collect();
                (text, true)
            }
            _ => {
                self.error(Kind::Preprocessor, "expected a quoted or <angle> include path", file, line_number, line_text, vec![]);
                return;
            }
        };

        let resolved = if angle {
            self.resolver.resolve_angle(file, &self.include_paths, &path)
        } else {
            self.resolver.resolve_quoted(file, &path)
        };
        let Some(resolved) = resolved else {
            self.error(Kind::Preprocessor, format!("cannot find include file \"{}\"", path), file, line_number, line_text, vec![]);
            return;
        };

        if self.include_stack.contains(&resolved) {
            self.error(Kind::Preprocessor, format!("include cycle detected: \"{}\"", resolved), file, line_number, line_text, vec![]);
            return;
        }
        let contents = match self.resolver.read(&resolved) {
            Ok(c) => c,
            Err(e) => {
                self.error(Kind::Resource, format!("failed to read include \"{}\": {}", resolved, e), file, line_number, line_text, vec![]);
                return;
            }
        };
        self.include_stack.push(resolved.clone());
        self.process_file(&resolved, &contents);
        self.include_stack.pop();
    }

    /// Collects a `#macro`...`#macend` body. Returns `None` (after recording
    /// a diagnostic) on a structural error; the caller still advances past
    /// whatever was consumed so a later line isn't re-parsed as the macro
    /// body.
    fn collect_macro(
        &mut self,
        header: &[Token],
        remaining_lines: &[&[Token]],
        file: &str,
        line_number: usize,
        line_text: &str,
    ) -> Option<(String, MacroDef, usize)> {
        let significant: Vec<&Token> = header.iter().filter(|t| !t.is_trivia()).collect();
        let Some(name) = significant.first() else {
            self.error(Kind::Preprocessor, "#macro requires a name", file, line_number, line_text, vec![]);
            return None;
        };
        let params: Vec<String> = significant
            .iter()
            .skip(1)
            .filter(|t| matches!(t.kind, TokenKind::Identifier))
            .map(|t| t.lexeme.clone())
            .collect();

        let mut body = Vec::new();
        let mut ret_expr = None;
        let mut consumed = 0;
        let mut closed = false;
        for (offset, line) in remaining_lines.iter().enumerate() {
            consumed = offset + 1;
            if let Some((Preproc::Macro, _)) = leading_preproc(line) {
                self.error(Kind::Preprocessor, "nested #macro is forbidden", file, line_number + offset + 1, &render_line(line), vec![]);
                return Some((name.lexeme.clone(), MacroDef { params, body, ret_expr }, consumed));
            }
            if let Some((Preproc::Macend, _)) = leading_preproc(line) {
                closed = true;
                break;
            }
            if let Some((Preproc::Macret, rest)) = leading_preproc(line) {
                ret_expr = Some(rest.to_vec());
                continue;
            }
            body.push(line.to_vec());
        }
        if !closed {
            self.error(Kind::Preprocessor, "unterminated #macro: missing #macend", file, line_number, line_text, vec![]);
            return None;
        }
        Some((name.lexeme.clone(), MacroDef { params, body, ret_expr }, consumed))
    }

    fn handle_invoke(&mut self, rest: &[Token], file: &str, line_number: usize, line_text: &str) {
        let significant: Vec<&Token> = rest.iter().filter(|t| !t.is_trivia()).collect();
        let Some(name) = significant.first() else {
            self.error(Kind::Preprocessor, "#invoke requires a macro name", file, line_number, line_text, vec![]);
            return;
        };
        let close_paren = significant.iter().position(|t| matches!(t.kind, TokenKind::Punctuation(Punct::CloseParen)));
        let arg_slice = match close_paren {
            Some(close) => &significant[1..close],
            None => &significant[1..],
        };
        let args: Vec<String> = arg_slice
            .iter()
            .filter(|t| !matches!(t.kind, TokenKind::Punctuation(Punct::OpenParen | Punct::Comma)))
            .map(|t| t.lexeme.clone())
            .collect();
        let out = close_paren.and_then(|close| significant.get(close + 1)).map(|t| t.lexeme.clone());

        let Some(def) = self.macros.get(&name.lexeme) else {
            self.error(Kind::Preprocessor, format!("invoke of undefined macro \"{}\"", name.lexeme), file, line_number, line_text, vec![]);
            return;
        };
        if args.len() != def.params.len() {
            self.error(
                Kind::Preprocessor,
                format!("macro \"{}\" expects {} argument(s), got {}", name.lexeme, def.params.len(), args.len()),
                file,
                line_number,
                line_text,
                vec![],
            );
            return;
        }

        let bindings: HashMap<String, String> = def.params.iter().cloned().zip(args.iter().cloned()).collect();
        let substitute = |tokens: &[Token]| -> Vec<Token> {
            tokens
                .iter()
                .map(|t| match (&t.kind, bindings.get(&t.lexeme)) {
                    (TokenKind::Identifier, Some(value)) => Token { kind: TokenKind::Identifier, lexeme: value.clone(), span: t.span },
                    _ => t.clone(),
                })
                .collect()
        };

        for line in &def.body {
            self.output.extend(substitute(line));
            self.output.push(Token { kind: TokenKind::WhitespaceNewline, lexeme: "\n".to_string(), span: Span::none() });
        }
        if let (Some(ret), Some(out_name)) = (&def.ret_expr, out) {
            self.defines.insert(out_name, substitute(ret));
        }
    }

    /// On a malformed condition, records a diagnostic and treats the branch
    /// as not taken rather than aborting the whole file.
    fn eval_condition(&mut self, preproc: Preproc, rest: &[Token], file: &str, line_number: usize, line_text: &str) -> bool {
        let significant: Vec<&Token> = rest.iter().filter(|t| !t.is_trivia()).collect();
        let name = |i: usize| significant.get(i).map(|t| t.lexeme.as_str()).unwrap_or("");
        match preproc {
            Preproc::Ifdef | Preproc::Elsedef => self.defines.contains_key(name(0)),
            Preproc::Ifndef | Preproc::Elsendef => !self.defines.contains_key(name(0)),
            Preproc::Ifequ | Preproc::Elseequ => name(0) == name(1),
            Preproc::Ifnequ | Preproc::Elsenequ => name(0) != name(1),
            Preproc::Ifless | Preproc::Elseless => self.compare_numeric(name(0), name(1), file, line_number, line_text, |a, b| a < b),
            Preproc::Ifmore | Preproc::Elsemore => self.compare_numeric(name(0), name(1), file, line_number, line_text, |a, b| a > b),
            _ => false,
        }
    }

    fn compare_numeric(&mut self, a: &str, b: &str, file: &str, line_number: usize, line_text: &str, op: impl Fn(i64, i64) -> bool) -> bool {
        let mut parse = |s: &str| match s.parse::<i64>() {
            Ok(v) => Some(v),
            Err(_) => {
                self.diagnostics.push(Diagnostic::error(
                    Kind::Preprocessor,
                    format!("expected a numeric literal, got \"{}\"", s),
                    file,
                    line_number,
                    line_text,
                    vec![],
                ));
                None
            }
        };
        match (parse(a), parse(b)) {
            (Some(a), Some(b)) => op(a, b),
            _ => false,
        }
    }
}

fn else_predicate_kind(p: Preproc) -> Preproc {
    match p {
        Preproc::Elsedef => Preproc::Ifdef,
        Preproc::Elsendef => Preproc::Ifndef,
        Preproc::Elseequ => Preproc::Ifequ,
        Preproc::Elsenequ => Preproc::Ifnequ,
        Preproc::Elseless => Preproc::Ifless,
        Preproc::Elsemore => Preproc::Ifmore,
        other => other,
    }
}

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

fn leading_preproc(line: &[Token]) -> Option<(Preproc, &[Token])> {
    let idx = line.iter().position(|t| !t.is_trivia())?;
    if let TokenKind::Preprocessor(p) = line[idx].kind {
        Some((p, &line[idx + 1..]))
    } else {
        None
    }
}

fn render_line(line: &[Token]) -> String {
    line.iter().map(|t| t.lexeme.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;

    fn run(src: &str) -> PreprocessOutput {
        let resolver = MapIncludeResolver::default();
        let pp = Preprocessor::new(&resolver, vec![], HashMap::new());
        pp.run("t.s", src)
    }

    #[test]
    fn define_expands_identifier_references() {
        let out = run("#define WIDTH 4\nmov x0, WIDTH");
        let lexemes: Vec<_> = out.tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert!(lexemes.contains(&"4"));
        assert!(!lexemes.contains(&"WIDTH"));
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn redefinition_is_a_warning_not_silent() {
        let out = run("#define WIDTH 4\n#define WIDTH 8\n");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn ifdef_skips_undefined_branch() {
        let out = run("#ifdef FOO\nhlt\n#else\nadd x0, x0, #1\n#endif");
        let lexemes: Vec<_> = out.tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert!(!lexemes.contains(&"hlt"));
        assert!(lexemes.contains(&"add"));
    }

    #[test]
    fn unbalanced_endif_is_an_error() {
        let out = run("#endif");
        assert!(out.diagnostics.iter().any(|d| d.severity == Severity::Error));
    }

    #[test]
    fn unterminated_ifdef_is_an_error() {
        let out = run("#ifdef FOO\nhlt");
        assert!(out.diagnostics.iter().any(|d| d.severity == Severity::Error));
    }

    #[test]
    fn include_splices_tokens() {
        let mut resolver = MapIncludeResolver::default();
        resolver.files.insert("inc.s".to_string(), "hlt\n".to_string());
        let pp = Preprocessor::new(&resolver, vec![], HashMap::new());
        let out = pp.run("t.s", "#include \"inc.s\"\nadd x0, x0, #1");
        let lexemes: Vec<_> = out.tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert!(lexemes.contains(&"hlt"));
        assert!(lexemes.contains(&"add"));
    }

    #[test]
    fn include_cycle_is_an_error() {
        let mut resolver = MapIncludeResolver::default();
        resolver.files.insert("a.s".to_string(), "#include \"b.s\"\n".to_string());
        resolver.files.insert("b.s".to_string(), "#include \"a.s\"\n".to_string());
        let pp = Preprocessor::new(&resolver, vec![], HashMap::new());
        let out = pp.run("a.s", "#include \"b.s\"\n");
        assert!(out.diagnostics.iter().any(|d| d.severity == Severity::Error && d.message.contains("cycle")));
    }

    #[test]
    fn macro_invoke_substitutes_params() {
        let out = run("#macro add_one(x)\nadd x0, x, #1\n#macend\n#invoke add_one(x5)");
        let lexemes: Vec<_> = out.tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert!(lexemes.contains(&"x5"));
    }

    #[test]
    fn bad_include_does_not_block_a_later_error() {
        // The missing include is recorded, but the stray #endif three lines
        // later still surfaces its own diagnostic instead of being lost.
        let out = run("#include \"missing.s\"\nhlt\n#endif\n");
        assert_eq!(out.diagnostics.len(), 2);
        assert!(out.diagnostics.iter().any(|d| d.message.contains("cannot find include")));
        assert!(out.diagnostics.iter().any(|d| d.message.contains("#endif")));
    }
}
