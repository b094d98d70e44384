#![forbid(unsafe_code)]

use super::RawSymbol;
use crate::symbol::SymbolKind;
use regex::Regex;
use std::sync::OnceLock;

static TOP_LEVEL: OnceLock<Regex> = OnceLock::new();

fn top_level_pattern() -> &'static Regex {
    TOP_LEVEL.get_or_init(|| {
        Regex::new(r"(?m)^(def|class)\s+([A-Za-z_][A-Za-z0-9_]*)").expect("top-level pattern")
    })
}

/// Line-start `def`/`class` scan. Never fails; decorated and async
/// definitions are out of reach for this backend, which is why the AST
/// process is preferred when available.
pub fn scan(text: &str) -> Vec<RawSymbol> {
    let mut out = Vec::new();
    for captures in top_level_pattern().captures_iter(text) {
        let Some(full) = captures.get(0) else {
            continue;
        };
        let Some(kind) = captures.get(1).and_then(|m| SymbolKind::parse(m.as_str())) else {
            continue;
        };
        let Some(name) = captures.get(2) else {
            continue;
        };
        out.push(RawSymbol {
            kind,
            name: name.as_str().to_string(),
            start: full.start(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_line_start_definitions_only() {
        let text = "def top():\n    def nested():\n        pass\n\nclass Thing:\n    pass\n";
        let symbols = scan(text);
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].kind, SymbolKind::Def);
        assert_eq!(symbols[0].name, "top");
        assert_eq!(symbols[0].start, 0);
        assert_eq!(symbols[1].kind, SymbolKind::Class);
        assert_eq!(symbols[1].name, "Thing");
    }

    #[test]
    fn ignores_keywords_inside_strings_on_other_columns() {
        let text = "x = \"def fake\"\n  def indented():\n    pass\n";
        assert!(scan(text).is_empty());
    }
}
