#![forbid(unsafe_code)]

use std::fmt;

pub const SYMBOL_SCHEME: &str = "sym://";
pub const DOCUMENT_FRAGMENT: &str = "document";

/// Top-level Python symbol kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SymbolKind {
    Def,
    Class,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Def => "def",
            Self::Class => "class",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "def" => Some(Self::Def),
            "class" => Some(Self::Class),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fragment {
    Document,
    JsonKey(String),
    Python { kind: SymbolKind, name: String },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId {
    pub adapter: String,
    pub path: String,
    pub fragment: Fragment,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolIdError {
    MissingScheme,
    EmptyAdapter,
    EmptyPath,
    MissingFragment,
    UnknownAdapter(String),
    UnknownFragment(String),
    BadEncoding,
}

impl fmt::Display for SymbolIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingScheme => write!(f, "symbol id must start with {SYMBOL_SCHEME}"),
            Self::EmptyAdapter => write!(f, "symbol id adapter must not be empty"),
            Self::EmptyPath => write!(f, "symbol id path must not be empty"),
            Self::MissingFragment => write!(f, "symbol id fragment is required"),
            Self::UnknownAdapter(name) => write!(f, "unknown symbol adapter: {name}"),
            Self::UnknownFragment(frag) => write!(f, "unknown symbol fragment: {frag}"),
            Self::BadEncoding => write!(f, "symbol id fragment has invalid percent-encoding"),
        }
    }
}

impl std::error::Error for SymbolIdError {}

const KNOWN_ADAPTERS: [&str; 5] = ["text", "markdown", "json", "python", "file"];

impl SymbolId {
    /// Parses `sym://<adapter>/<path>#<fragment>`. The path keeps `/`
    /// separators regardless of host platform.
    pub fn parse(raw: &str) -> Result<Self, SymbolIdError> {
        let rest = raw
            .strip_prefix(SYMBOL_SCHEME)
            .ok_or(SymbolIdError::MissingScheme)?;
        let (location, fragment_raw) = rest
            .split_once('#')
            .ok_or(SymbolIdError::MissingFragment)?;
        let (adapter, path) = location
            .split_once('/')
            .ok_or(SymbolIdError::EmptyPath)?;
        if adapter.is_empty() {
            return Err(SymbolIdError::EmptyAdapter);
        }
        if !KNOWN_ADAPTERS.contains(&adapter) {
            return Err(SymbolIdError::UnknownAdapter(adapter.to_string()));
        }
        if path.is_empty() {
            return Err(SymbolIdError::EmptyPath);
        }

        let fragment = if fragment_raw == DOCUMENT_FRAGMENT {
            Fragment::Document
        } else if let Some(encoded) = fragment_raw.strip_prefix("key:") {
            Fragment::JsonKey(decode_component(encoded)?)
        } else if let Some((kind_raw, encoded)) = fragment_raw.split_once(':') {
            let Some(kind) = SymbolKind::parse(kind_raw) else {
                return Err(SymbolIdError::UnknownFragment(fragment_raw.to_string()));
            };
            Fragment::Python {
                kind,
                name: decode_component(encoded)?,
            }
        } else {
            return Err(SymbolIdError::UnknownFragment(fragment_raw.to_string()));
        };

        Ok(Self {
            adapter: adapter.to_string(),
            path: path.to_string(),
            fragment,
        })
    }

    pub fn document(adapter: &str, path: &str) -> Self {
        Self {
            adapter: adapter.to_string(),
            path: path.to_string(),
            fragment: Fragment::Document,
        }
    }

    pub fn json_key(path: &str, key: &str) -> Self {
        Self {
            adapter: "json".to_string(),
            path: path.to_string(),
            fragment: Fragment::JsonKey(key.to_string()),
        }
    }

    pub fn python(path: &str, kind: SymbolKind, name: &str) -> Self {
        Self {
            adapter: "python".to_string(),
            path: path.to_string(),
            fragment: Fragment::Python {
                kind,
                name: name.to_string(),
            },
        }
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SYMBOL_SCHEME}{}/{}#", self.adapter, self.path)?;
        match &self.fragment {
            Fragment::Document => f.write_str(DOCUMENT_FRAGMENT),
            Fragment::JsonKey(key) => write!(f, "key:{}", encode_component(key)),
            Fragment::Python { kind, name } => {
                write!(f, "{}:{}", kind.as_str(), encode_component(name))
            }
        }
    }
}

/// RFC 3986 unreserved characters pass through; everything else is
/// percent-encoded byte-wise with uppercase hex.
pub fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(hex_digit(byte >> 4));
            out.push(hex_digit(byte & 0x0f));
        }
    }
    out
}

pub fn decode_component(encoded: &str) -> Result<String, SymbolIdError> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        if byte == b'%' {
            let hi = from_hex(*bytes.get(index + 1).ok_or(SymbolIdError::BadEncoding)?)?;
            let lo = from_hex(*bytes.get(index + 2).ok_or(SymbolIdError::BadEncoding)?)?;
            out.push((hi << 4) | lo);
            index += 3;
        } else {
            out.push(byte);
            index += 1;
        }
    }
    String::from_utf8(out).map_err(|_| SymbolIdError::BadEncoding)
}

fn hex_digit(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'A' + nibble - 10) as char,
    }
}

fn from_hex(byte: u8) -> Result<u8, SymbolIdError> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        _ => Err(SymbolIdError::BadEncoding),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_document_symbol() {
        let symbol = SymbolId::parse("sym://text/a.txt#document").unwrap();
        assert_eq!(symbol.adapter, "text");
        assert_eq!(symbol.path, "a.txt");
        assert_eq!(symbol.fragment, Fragment::Document);
        assert_eq!(symbol.to_string(), "sym://text/a.txt#document");
    }

    #[test]
    fn parse_json_key_round_trips_encoding() {
        let symbol = SymbolId::json_key("cfg/app.json", "retry count");
        let rendered = symbol.to_string();
        assert_eq!(rendered, "sym://json/cfg/app.json#key:retry%20count");
        assert_eq!(SymbolId::parse(&rendered).unwrap(), symbol);
    }

    #[test]
    fn parse_python_symbol() {
        let symbol = SymbolId::parse("sym://python/pkg/demo.py#def:calc").unwrap();
        assert_eq!(
            symbol.fragment,
            Fragment::Python {
                kind: SymbolKind::Def,
                name: "calc".to_string()
            }
        );
    }

    #[test]
    fn rejects_malformed_ids() {
        assert_eq!(
            SymbolId::parse("text/a.txt#document").unwrap_err(),
            SymbolIdError::MissingScheme
        );
        assert_eq!(
            SymbolId::parse("sym://text/a.txt").unwrap_err(),
            SymbolIdError::MissingFragment
        );
        assert_eq!(
            SymbolId::parse("sym://bogus/a.txt#document").unwrap_err(),
            SymbolIdError::UnknownAdapter("bogus".to_string())
        );
        assert_eq!(
            SymbolId::parse("sym://python/a.py#lambda:x").unwrap_err(),
            SymbolIdError::UnknownFragment("lambda:x".to_string())
        );
        assert_eq!(
            SymbolId::parse("sym://json/a.json#key:%zz").unwrap_err(),
            SymbolIdError::BadEncoding
        );
    }

    #[test]
    fn encode_component_is_conservative() {
        assert_eq!(encode_component("calc"), "calc");
        assert_eq!(encode_component("a/b c"), "a%2Fb%20c");
        assert_eq!(decode_component("a%2Fb%20c").unwrap(), "a/b c");
        assert_eq!(decode_component("a%2fb").unwrap(), "a/b");
    }
}
