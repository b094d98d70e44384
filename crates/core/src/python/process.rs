#![forbid(unsafe_code)]

use super::{ParserMode, RawSymbol};
use crate::symbol::SymbolKind;
use serde_json::{Value, json};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Wall-clock budget for one parse request.
const PARSE_TIMEOUT: Duration = Duration::from_secs(3);
/// Replies larger than this are treated as a parser failure.
const MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;
const WAIT_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessError {
    /// The module does not parse; the file must be rejected.
    SyntaxError,
    /// The parser cannot be used right now (missing binary, timeout,
    /// oversized or malformed reply); fallback policy decides what happens.
    Unavailable(String),
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SyntaxError => write!(f, "python syntax error"),
            Self::Unavailable(detail) => write!(f, "python parser unavailable: {detail}"),
        }
    }
}

impl std::error::Error for ProcessError {}

/// External AST-backed parser invoked per request over a small JSON
/// stdin/stdout protocol: `{action: "parse_top_level", content, parser}` in,
/// `{ok, parser, symbols | error}` out.
#[derive(Clone, Debug)]
pub struct ProcessParser {
    program: PathBuf,
}

impl ProcessParser {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        // A .py adapter script runs under python3; anything else is treated
        // as a standalone executable.
        if self
            .program
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("py"))
        {
            let mut command = Command::new("python3");
            command.arg(&self.program);
            command
        } else {
            Command::new(&self.program)
        }
    }

    pub fn parse(&self, text: &str, mode: ParserMode) -> Result<Vec<RawSymbol>, ProcessError> {
        let request = json!({
            "action": "parse_top_level",
            "content": text,
            "parser": mode.as_str(),
        })
        .to_string();

        let mut child = self
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| ProcessError::Unavailable(format!("spawn failed: {err}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A dead child surfaces as an empty reply below; a write error
            // here must not abort the exchange.
            let _ = stdin.write_all(request.as_bytes());
        }

        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::Unavailable("stdout not captured".to_string()));
        };
        let reader = std::thread::spawn(move || {
            let mut buffer = Vec::new();
            let mut take = (&mut stdout).take((MAX_OUTPUT_BYTES + 1) as u64);
            let result = take.read_to_end(&mut buffer);
            (result, buffer)
        });

        let deadline = Instant::now() + PARSE_TIMEOUT;
        let exited = loop {
            match child.try_wait() {
                Ok(Some(_)) => break true,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break false;
                    }
                    std::thread::sleep(WAIT_POLL);
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProcessError::Unavailable(format!("wait failed: {err}")));
                }
            }
        };
        if !exited {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::Unavailable("timeout".to_string()));
        }

        let (read_result, buffer) = match reader.join() {
            Ok(pair) => pair,
            Err(_) => return Err(ProcessError::Unavailable("reader panicked".to_string())),
        };
        if read_result.is_err() {
            return Err(ProcessError::Unavailable("read failed".to_string()));
        }
        if buffer.len() > MAX_OUTPUT_BYTES {
            return Err(ProcessError::Unavailable("reply too large".to_string()));
        }

        let reply: Value = serde_json::from_slice(&buffer)
            .map_err(|err| ProcessError::Unavailable(format!("invalid reply: {err}")))?;
        decode_reply(&reply)
    }
}

fn decode_reply(reply: &Value) -> Result<Vec<RawSymbol>, ProcessError> {
    if reply.get("ok").and_then(Value::as_bool) != Some(true) {
        let error = reply
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return match error {
            "syntax_error" => Err(ProcessError::SyntaxError),
            other => Err(ProcessError::Unavailable(other.to_string())),
        };
    }

    let Some(symbols) = reply.get("symbols").and_then(Value::as_array) else {
        return Err(ProcessError::Unavailable("reply missing symbols".to_string()));
    };
    let mut out = Vec::with_capacity(symbols.len());
    for entry in symbols {
        let Some(kind) = entry
            .get("kind")
            .and_then(Value::as_str)
            .and_then(SymbolKind::parse)
        else {
            continue;
        };
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        let start = entry
            .get("start")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;
        out.push(RawSymbol {
            kind,
            name: name.to_string(),
            start,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_successful_reply() {
        let reply = serde_json::json!({
            "ok": true,
            "parser": "ast",
            "symbols": [
                {"kind": "def", "name": "calc", "start": 10, "end": 42},
                {"kind": "class", "name": "Tool", "start": 44, "end": 80},
                {"kind": "lambda", "name": "skip_me", "start": 90}
            ]
        });
        let symbols = decode_reply(&reply).unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "calc");
        assert_eq!(symbols[1].kind, SymbolKind::Class);
    }

    #[test]
    fn maps_error_replies() {
        let syntax = serde_json::json!({"ok": false, "error": "syntax_error", "parser": "ast"});
        assert_eq!(decode_reply(&syntax).unwrap_err(), ProcessError::SyntaxError);

        let missing = serde_json::json!({"ok": false, "error": "parser_unavailable"});
        assert!(matches!(
            decode_reply(&missing).unwrap_err(),
            ProcessError::Unavailable(_)
        ));
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let parser = ProcessParser::new("/nonexistent/forge-python-parser");
        assert!(matches!(
            parser.parse("def f():\n    pass\n", ParserMode::Auto),
            Err(ProcessError::Unavailable(_))
        ));
    }
}
