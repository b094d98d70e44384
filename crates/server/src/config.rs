#![forbid(unsafe_code)]

use forge_core::python::{ParserMode, ProcessParser, PythonParser};
use forge_storage::{JsonFileStore, MemoryStore, SnapshotStore, SqliteStore, StoreError};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 7433;
const DEFAULT_DATA_DIR: &str = ".forge";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistenceBackend {
    Memory,
    Json,
    Sqlite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Silent,
}

impl LogLevel {
    /// Filter directive for the subscriber; `None` means no logging at all.
    pub fn as_filter(self) -> Option<&'static str> {
        match self {
            Self::Debug => Some("debug"),
            Self::Info => Some("info"),
            Self::Warn => Some("warn"),
            Self::Error => Some("error"),
            Self::Silent => None,
        }
    }
}

/// Environment-driven server configuration; every knob has a default so a
/// bare `forge-server` starts with a JSON snapshot under `.forge/`.
#[derive(Clone, Debug)]
pub struct Config {
    pub backend: PersistenceBackend,
    pub data_dir: PathBuf,
    pub snapshot_path: Option<PathBuf>,
    pub sqlite_path: Option<PathBuf>,
    pub python_parser: Option<PathBuf>,
    pub parser_mode: ParserMode,
    pub parser_strict: bool,
    pub log_level: LogLevel,
    pub log_state_updates: bool,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let backend = match env_lower("FORGE_PERSISTENCE").as_deref() {
            None | Some("json") => PersistenceBackend::Json,
            Some("memory") => PersistenceBackend::Memory,
            Some("sqlite") => PersistenceBackend::Sqlite,
            Some(other) => {
                return Err(format!(
                    "FORGE_PERSISTENCE must be memory|json|sqlite (got {other})"
                ));
            }
        };
        let parser_mode = match env_lower("FORGE_PARSER_MODE") {
            None => ParserMode::Auto,
            Some(raw) => ParserMode::parse(&raw)
                .ok_or_else(|| format!("FORGE_PARSER_MODE must be auto|libcst|ast (got {raw})"))?,
        };
        let log_level = match env_lower("FORGE_LOG_LEVEL").as_deref() {
            None | Some("info") => LogLevel::Info,
            Some("debug") => LogLevel::Debug,
            Some("warn") => LogLevel::Warn,
            Some("error") => LogLevel::Error,
            Some("silent") => LogLevel::Silent,
            Some(other) => {
                return Err(format!(
                    "FORGE_LOG_LEVEL must be debug|info|warn|error|silent (got {other})"
                ));
            }
        };
        let port = match std::env::var("FORGE_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| format!("FORGE_PORT must be a port number (got {raw})"))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            backend,
            data_dir: std::env::var("FORGE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR)),
            snapshot_path: std::env::var("FORGE_SNAPSHOT_PATH").ok().map(PathBuf::from),
            sqlite_path: std::env::var("FORGE_SQLITE_PATH").ok().map(PathBuf::from),
            python_parser: std::env::var("FORGE_PYTHON_PARSER").ok().map(PathBuf::from),
            parser_mode,
            parser_strict: env_flag("FORGE_PARSER_STRICT"),
            log_level,
            log_state_updates: env_flag("FORGE_LOG_STATE_UPDATES"),
            port,
        })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("forge.json"))
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("forge.db"))
    }

    pub fn open_store(&self) -> Result<Box<dyn SnapshotStore>, StoreError> {
        Ok(match self.backend {
            PersistenceBackend::Memory => Box::new(MemoryStore::new()),
            PersistenceBackend::Json => Box::new(JsonFileStore::open(self.snapshot_path())?),
            PersistenceBackend::Sqlite => Box::new(SqliteStore::open(self.sqlite_path())?),
        })
    }

    pub fn python_parser(&self) -> PythonParser {
        let process = self
            .python_parser
            .as_ref()
            .map(|program| ProcessParser::new(program.clone()));
        PythonParser::new(process, self.parser_mode, self.parser_strict)
    }
}

fn env_lower(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|raw| raw.to_ascii_lowercase())
}

fn env_flag(key: &str) -> bool {
    matches!(
        env_lower(key).as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}
