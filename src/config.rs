//! CLI configuration (spec §6.1)
//!
//! Grounded on `src/bin/assembler.rs`'s own hand-rolled `env::args()`
//! parsing (no `clap`/`argh`: the teacher's CLI surface is small enough
//! that positional-arg-plus-`process::exit` is the established idiom here);
//! generalized from its fixed two-positional-argument form to the larger
//! flag surface spec §6.1 defines.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningPolicy {
    Default,
    All,
    Error,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sources: Vec<String>,
    pub output: Option<String>,
    pub include_paths: Vec<String>,
    pub defines: HashMap<String, String>,
    pub stop_after_object: bool,
    pub warnings: WarningPolicy,
    pub version: bool,
}

#[derive(Debug, Clone)]
pub struct UsageError {
    pub message: String,
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl UsageError {
    fn new(message: impl Into<String>) -> UsageError {
        UsageError { message: message.into() }
    }
}

impl Config {
    /// Parse a CLI argument vector (excluding argv[0]).
    pub fn parse(args: &[String]) -> Result<Config, UsageError> {
        let mut sources = Vec::new();
        let mut output = None;
        let mut include_paths = Vec::new();
        let mut defines = HashMap::new();
        let mut stop_after_object = true;
        let mut warnings = WarningPolicy::Default;
        let mut version = false;

        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            match arg.as_str() {
                "-o" => {
                    i += 1;
                    let path = args.get(i).ok_or_else(|| UsageError::new("-o requires a path argument"))?;
                    output = Some(path.clone());
                }
                "-I" => {
                    i += 1;
                    let dir = args.get(i).ok_or_else(|| UsageError::new("-I requires a directory argument"))?;
                    include_paths.push(dir.clone());
                }
                "-D" => {
                    i += 1;
                    let def = args.get(i).ok_or_else(|| UsageError::new("-D requires a NAME[=VALUE] argument"))?;
                    let (name, value) = match def.split_once('=') {
                        Some((n, v)) => (n.to_string(), v.to_string()),
                        None => (def.clone(), String::new()),
                    };
                    if name.is_empty() {
                        return Err(UsageError::new(format!("invalid -D argument \"{}\"", def)));
                    }
                    defines.insert(name, value);
                }
                "-c" => stop_after_object = true,
                "-v" => version = true,
                s if s.starts_with("-W") => {
                    warnings = match &s[2..] {
                        "all" => WarningPolicy::All,
                        "error" => WarningPolicy::Error,
                        "" => WarningPolicy::Default,
                        other => return Err(UsageError::new(format!("unrecognized warning control \"-W{}\"", other))),
                    };
                }
                s if s.starts_with('-') && s.len() > 1 => {
                    return Err(UsageError::new(format!("unrecognized option \"{}\"", s)));
                }
                _ => sources.push(arg.clone()),
            }
            i += 1;
        }

        if sources.is_empty() && !version {
            return Err(UsageError::new("no source files given"));
        }
        if output.is_some() && sources.len() > 1 {
            return Err(UsageError::new("-o names a single output file; pass only one source, or omit -o to let each source default to its own"));
        }

        Ok(Config { sources, output, include_paths, defines, stop_after_object, warnings, version })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, UsageError> {
        Config::parse(&args.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn positional_sources_collected() {
        let config = parse(&["a.s", "b.s"]).unwrap();
        assert_eq!(config.sources, vec!["a.s", "b.s"]);
    }

    #[test]
    fn dash_o_sets_output() {
        let config = parse(&["a.s", "-o", "out.o"]).unwrap();
        assert_eq!(config.output, Some("out.o".to_string()));
    }

    #[test]
    fn repeated_dash_i_accumulates() {
        let config = parse(&["a.s", "-I", "inc1", "-I", "inc2"]).unwrap();
        assert_eq!(config.include_paths, vec!["inc1", "inc2"]);
    }

    #[test]
    fn dash_d_with_value_splits_name_and_value() {
        let config = parse(&["a.s", "-D", "WIDTH=4"]).unwrap();
        assert_eq!(config.defines.get("WIDTH"), Some(&"4".to_string()));
    }

    #[test]
    fn dash_d_without_value_defines_empty_string() {
        let config = parse(&["a.s", "-D", "DEBUG"]).unwrap();
        assert_eq!(config.defines.get("DEBUG"), Some(&"".to_string()));
    }

    #[test]
    fn no_sources_is_a_usage_error() {
        assert!(parse(&["-o", "out.o"]).is_err());
    }

    #[test]
    fn unrecognized_warning_control_is_a_usage_error() {
        assert!(parse(&["a.s", "-Wbogus"]).is_err());
    }

    #[test]
    fn wall_sets_all_warnings_policy() {
        let config = parse(&["a.s", "-Wall"]).unwrap();
        assert_eq!(config.warnings, WarningPolicy::All);
    }

    #[test]
    fn dash_o_with_multiple_sources_is_a_usage_error() {
        assert!(parse(&["a.s", "b.s", "-o", "out.o"]).is_err());
    }

    #[test]
    fn multiple_sources_without_dash_o_is_allowed() {
        let config = parse(&["a.s", "b.s"]).unwrap();
        assert_eq!(config.sources, vec!["a.s", "b.s"]);
    }
}
