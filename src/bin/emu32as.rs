//! EMU32 assembler CLI entry point (spec §6.1)
//!
//! Grounded on `src/bin/assembler.rs`'s shape: parse args, assemble, write
//! the result, map failures to distinct `process::exit` codes instead of
//! panicking.

use emu32asm::assembler;
use emu32asm::config::Config;
use emu32asm::logging;
use std::fs;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match Config::parse(&args) {
        Ok(c) => c,
        Err(e) => {
            logging::error(e.to_string());
            std::process::exit(3);
        }
    };

    if config.version {
        println!("emu32as {}", env!("CARGO_PKG_VERSION"));
        if config.sources.is_empty() {
            return;
        }
    }

    // Each source file is its own translation unit (spec §5: fresh
    // assembler state per unit); `-o` is only accepted with a single
    // source (Config::parse rejects the ambiguous combination up front).
    use emu32asm::diagnostics::Status;
    let mut saw_io_error = false;
    let mut saw_assembler_error = false;
    for source_path in &config.sources {
        let result = match assembler::assemble_from_file(source_path, config.include_paths.clone(), config.defines.clone()) {
            Ok(r) => r,
            Err(e) => {
                logging::error(format!("failed to read \"{}\": {}", source_path, e));
                saw_io_error = true;
                continue;
            }
        };

        for diagnostic in &result.diagnostics {
            logging::report(diagnostic);
        }

        match result.status {
            Status::Ok | Status::Warning => {
                let output_path = config.output.clone().unwrap_or_else(|| default_output_path(source_path));
                if let Err(e) = fs::write(&output_path, &result.object) {
                    logging::error(format!("failed to write \"{}\": {}", output_path, e));
                    saw_io_error = true;
                }
            }
            Status::Error | Status::Stopped => saw_assembler_error = true,
        }
    }

    if saw_io_error {
        std::process::exit(2);
    }
    if saw_assembler_error {
        std::process::exit(1);
    }
    std::process::exit(0);
}

fn default_output_path(source_path: &str) -> String {
    match source_path.rsplit_once('.') {
        Some((stem, _ext)) => format!("{}.o", stem),
        None => format!("{}.o", source_path),
    }
}
