#![forbid(unsafe_code)]

pub mod fallback;
pub mod process;

use crate::symbol::SymbolKind;
use std::collections::BTreeMap;

pub use process::{ProcessError, ProcessParser};

/// A top-level symbol as reported by a parser backend, before span
/// extension. Only the start offset matters; ends are normalized in
/// [`assemble`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawSymbol {
    pub kind: SymbolKind,
    pub name: String,
    pub start: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedSymbol {
    pub kind: SymbolKind,
    pub name: String,
    pub start: usize,
    pub end: usize,
    pub body: String,
}

/// Result of parsing a module's top level. `symbols` is keyed `kind:name`;
/// `order` lists keys in source order (duplicates repeated); a parser
/// failure reports `parse_error = true` with everything else empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub symbols: BTreeMap<String, ParsedSymbol>,
    pub order: Vec<String>,
    pub duplicates: Vec<String>,
    pub parse_error: bool,
}

impl ParseOutcome {
    pub fn parse_error() -> Self {
        Self {
            parse_error: true,
            ..Self::default()
        }
    }
}

pub fn symbol_key(kind: SymbolKind, name: &str) -> String {
    format!("{}:{name}", kind.as_str())
}

/// Extends raw spans so each symbol's end equals the next symbol's start
/// (EOF for the last): inter-symbol whitespace belongs to the preceding
/// symbol. Later occurrences of a duplicated key shadow earlier ones in the
/// map; every occurrence appears in `order`.
pub fn assemble(text: &str, mut raw: Vec<RawSymbol>) -> ParseOutcome {
    raw.sort_by_key(|symbol| symbol.start);
    let mut outcome = ParseOutcome::default();
    for index in 0..raw.len() {
        let start = raw[index].start.min(text.len());
        let end = raw
            .get(index + 1)
            .map(|next| next.start.min(text.len()))
            .unwrap_or(text.len())
            .max(start);
        let key = symbol_key(raw[index].kind, &raw[index].name);
        if outcome.symbols.contains_key(&key) && !outcome.duplicates.contains(&key) {
            outcome.duplicates.push(key.clone());
        }
        outcome.order.push(key.clone());
        outcome.symbols.insert(
            key,
            ParsedSymbol {
                kind: raw[index].kind,
                name: raw[index].name.clone(),
                start,
                end,
                body: text[start..end].to_string(),
            },
        );
    }
    outcome
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParserMode {
    #[default]
    Auto,
    Libcst,
    Ast,
}

impl ParserMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Libcst => "libcst",
            Self::Ast => "ast",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "libcst" => Some(Self::Libcst),
            "ast" => Some(Self::Ast),
            _ => None,
        }
    }
}

/// Parsing capability handed to the python adapter. The external AST-backed
/// process is preferred when configured; the regex fallback covers the rest
/// unless strict mode disables it.
#[derive(Clone, Debug, Default)]
pub struct PythonParser {
    process: Option<ProcessParser>,
    mode: ParserMode,
    strict: bool,
}

impl PythonParser {
    pub fn new(process: Option<ProcessParser>, mode: ParserMode, strict: bool) -> Self {
        Self {
            process,
            mode,
            strict,
        }
    }

    /// Regex fallback only; the deterministic default for tests and for
    /// hosts without a Python toolchain.
    pub fn fallback_only() -> Self {
        Self::default()
    }

    pub fn parse_top_level(&self, text: &str) -> ParseOutcome {
        if let Some(process) = &self.process {
            match process.parse(text, self.mode) {
                Ok(raw) => return assemble(text, raw),
                Err(ProcessError::SyntaxError) => return ParseOutcome::parse_error(),
                Err(ProcessError::Unavailable(_)) => {
                    if self.strict {
                        return ParseOutcome::parse_error();
                    }
                }
            }
        } else if self.strict {
            return ParseOutcome::parse_error();
        }
        assemble(text, fallback::scan(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULE: &str = "import os\n\ndef calc(x):\n    return x\n\n\nclass Tool:\n    pass\n";

    #[test]
    fn spans_extend_to_next_symbol() {
        let outcome = PythonParser::fallback_only().parse_top_level(MODULE);
        assert!(!outcome.parse_error);
        assert_eq!(outcome.order, vec!["def:calc", "class:Tool"]);
        let calc = &outcome.symbols["def:calc"];
        assert_eq!(&MODULE[calc.start..calc.end], calc.body);
        assert!(calc.body.ends_with("\n\n\n"), "trailing gap belongs to calc");
        let tool = &outcome.symbols["class:Tool"];
        assert_eq!(tool.end, MODULE.len());
        assert_eq!(calc.end, tool.start);
    }

    #[test]
    fn duplicates_are_reported_once() {
        let text = "def calc():\n    pass\n\ndef calc():\n    pass\n";
        let outcome = PythonParser::fallback_only().parse_top_level(text);
        assert_eq!(outcome.duplicates, vec!["def:calc"]);
        assert_eq!(outcome.order, vec!["def:calc", "def:calc"]);
    }

    #[test]
    fn strict_without_process_reports_parse_error() {
        let parser = PythonParser::new(None, ParserMode::Auto, true);
        assert!(parser.parse_top_level(MODULE).parse_error);
    }

    #[test]
    fn empty_module_parses_clean() {
        let outcome = PythonParser::fallback_only().parse_top_level("");
        assert!(!outcome.parse_error);
        assert!(outcome.symbols.is_empty());
    }
}
