#![forbid(unsafe_code)]

mod capture;
mod client;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use client::ForgeClient;
use forge_core::adapter::Adapters;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const CONFIG_DIR: &str = ".forge";
const CONFIG_FILE: &str = "cli.json";
const STACK_DIR: &str = "stack";
const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:7433";

#[derive(Parser)]
#[command(name = "forge", about = "Semantic version control for concurrent editors")]
struct Cli {
    /// Server endpoint; overrides the attached configuration.
    #[arg(long, env = "FORGE_ENDPOINT")]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the local attachment (.forge/cli.json) in this directory
    Init {
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        author: Option<String>,
    },
    /// Point the attachment at a different server and/or state
    Attach {
        endpoint: String,
        #[arg(long)]
        state: Option<String>,
    },
    /// Server health plus the attached state's summary
    Status,
    /// Create a workspace state and attach to it
    Create {
        name: String,
        #[arg(long)]
        from: Option<String>,
    },
    /// Capture file edits into a change set and submit it
    Submit {
        /// Files to capture (repeatable)
        #[arg(long = "file", required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Target state (defaults to the attached state)
        #[arg(long)]
        to: Option<String>,
        /// Park the change set locally instead of submitting
        #[arg(long)]
        stack: bool,
    },
    /// List parked change sets; --flush submits them in order
    Stack {
        #[arg(long)]
        flush: bool,
    },
    /// List recorded change sets
    Log {
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Ignore the state filter
        #[arg(long)]
        all: bool,
    },
    /// Show a change set (cs_), op (op_) or conflict (conf_) by id
    Show { id: String },
    /// List states
    States,
    /// State management
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// List open conflicts
    Conflicts {
        #[arg(long)]
        state: Option<String>,
    },
    /// Conflict inspection and resolution
    Conflict {
        #[command(subcommand)]
        command: ConflictCommands,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// Create a state without re-attaching
    Create {
        name: String,
        #[arg(long)]
        from: Option<String>,
    },
    /// Replay a source state's ops onto a target
    Promote {
        source: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        author: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConflictCommands {
    Show { id: String },
    /// Submit a resolving op (JSON file) against a conflict
    Resolve {
        id: String,
        /// Path to a JSON file holding the resolving op
        #[arg(long)]
        op: PathBuf,
    },
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct CliConfig {
    endpoint: String,
    state: String,
    author: String,
}

impl CliConfig {
    fn fresh() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            state: "main".to_string(),
            author: std::env::var("USER").unwrap_or_else(|_| "anonymous".to_string()),
        }
    }

    fn path() -> PathBuf {
        Path::new(CONFIG_DIR).join(CONFIG_FILE)
    }

    fn load() -> Self {
        std::fs::read_to_string(Self::path())
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(Self::fresh)
    }

    fn save(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(CONFIG_DIR).context("create .forge")?;
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path(), raw + "\n").context("write cli.json")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = CliConfig::load();
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }

    match cli.command {
        Commands::Init {
            endpoint,
            state,
            author,
        } => {
            let mut fresh = CliConfig::fresh();
            if let Some(endpoint) = endpoint.or(cli.endpoint) {
                fresh.endpoint = endpoint;
            }
            if let Some(state) = state {
                fresh.state = state;
            }
            if let Some(author) = author {
                fresh.author = author;
            }
            fresh.save()?;
            println!("attached to {} (state {})", fresh.endpoint, fresh.state);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Attach { endpoint, state } => {
            config.endpoint = endpoint;
            if let Some(state) = state {
                config.state = state;
            }
            config.save()?;
            println!("attached to {} (state {})", config.endpoint, config.state);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let client = ForgeClient::new(&config.endpoint)?;
            client.health().await?;
            let snapshot = client.state(&config.state).await?;
            let state = &snapshot["state"];
            println!("server    {}", config.endpoint);
            println!("state     {}", config.state);
            println!("ops       {}", state["op_count"]);
            println!("conflicts {}", state["open_conflicts"]);
            println!(
                "heads     {}",
                state["heads"]
                    .as_array()
                    .map(|heads| heads.len())
                    .unwrap_or_default()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Create { name, from } => {
            let client = ForgeClient::new(&config.endpoint)?;
            let from = from.unwrap_or_else(|| config.state.clone());
            let body = client.create_state(&name, Some(&from)).await?;
            config.state = name.clone();
            config.save()?;
            println!("created {} from {}", body["state"]["name"], from);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Submit {
            files,
            message,
            author,
            to,
            stack,
        } => {
            let state = to.unwrap_or_else(|| config.state.clone());
            let author = author.unwrap_or_else(|| config.author.clone());
            let client = ForgeClient::new(&config.endpoint)?;
            let change_set =
                build_change_set(&client, &state, &author, message.as_deref(), &files).await?;

            if stack {
                let path = park_change_set(&change_set)?;
                println!("parked {}", path.display());
                return Ok(ExitCode::SUCCESS);
            }
            let outcome = client.submit_change_set(&change_set).await?;
            print_submit_outcome(&outcome);
            Ok(exit_for_status(outcome["status"].as_str()))
        }
        Commands::Stack { flush } => {
            let entries = parked_change_sets()?;
            if entries.is_empty() {
                println!("stack is empty");
                return Ok(ExitCode::SUCCESS);
            }
            if !flush {
                for path in &entries {
                    println!("{}", path.display());
                }
                return Ok(ExitCode::SUCCESS);
            }
            let client = ForgeClient::new(&config.endpoint)?;
            for path in entries {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("read {}", path.display()))?;
                let change_set: Value = serde_json::from_str(&raw)
                    .with_context(|| format!("parse {}", path.display()))?;
                let outcome = client.submit_change_set(&change_set).await?;
                print_submit_outcome(&outcome);
                if outcome["status"] != "accepted" {
                    println!("stopped at {}", path.display());
                    return Ok(ExitCode::FAILURE);
                }
                std::fs::remove_file(&path).ok();
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Log { state, limit, all } => {
            let client = ForgeClient::new(&config.endpoint)?;
            let filter = if all {
                None
            } else {
                Some(state.unwrap_or_else(|| config.state.clone()))
            };
            let body = client.change_sets(filter.as_deref()).await?;
            let empty = Vec::new();
            let records = body["change_sets"].as_array().unwrap_or(&empty);
            let limit = limit.unwrap_or(20);
            for record in records.iter().rev().take(limit) {
                println!(
                    "{:<6} {:<26} {:<10} {:<12} {}",
                    record["sequence"],
                    record["id"].as_str().unwrap_or("?"),
                    record["status"].as_str().unwrap_or("?"),
                    record["state"].as_str().unwrap_or("?"),
                    ts_ms_to_rfc3339(record["created_at"].as_i64().unwrap_or_default()),
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { id } => {
            let client = ForgeClient::new(&config.endpoint)?;
            let body = if id.starts_with("cs_") {
                client.change_set(&id).await?
            } else if id.starts_with("op_") {
                client.op(&id).await?
            } else if id.starts_with("conf_") {
                client.conflict(&id).await?
            } else {
                bail!("id must start with cs_, op_ or conf_");
            };
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::States => {
            let client = ForgeClient::new(&config.endpoint)?;
            let body = client.states().await?;
            let empty = Vec::new();
            for state in body["states"].as_array().unwrap_or(&empty) {
                println!(
                    "{:<24} ops={:<5} open_conflicts={:<3} base={}",
                    state["name"].as_str().unwrap_or("?"),
                    state["op_count"],
                    state["open_conflicts"],
                    state["base_state"].as_str().unwrap_or("-"),
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::State { command } => {
            let client = ForgeClient::new(&config.endpoint)?;
            match command {
                StateCommands::Create { name, from } => {
                    let body = client.create_state(&name, from.as_deref()).await?;
                    println!("created {}", body["state"]["name"]);
                    Ok(ExitCode::SUCCESS)
                }
                StateCommands::Promote { source, to, author } => {
                    let author = author.unwrap_or_else(|| config.author.clone());
                    let outcome = client.promote(&source, &to, &author).await?;
                    println!(
                        "promoted {} op(s); {} conflict(s)",
                        outcome["accepted"].as_array().map(Vec::len).unwrap_or(0),
                        outcome["conflicts"].as_array().map(Vec::len).unwrap_or(0),
                    );
                    for conflict in outcome["conflicts"].as_array().unwrap_or(&Vec::new()) {
                        println!("  conflict {conflict}");
                    }
                    if outcome["ok"] == true {
                        Ok(ExitCode::SUCCESS)
                    } else {
                        Ok(ExitCode::FAILURE)
                    }
                }
            }
        }
        Commands::Conflicts { state } => {
            let client = ForgeClient::new(&config.endpoint)?;
            let state = state.unwrap_or_else(|| config.state.clone());
            let body = client.state_conflicts(&state).await?;
            let empty = Vec::new();
            for conflict in body["conflicts"]
                .as_array()
                .unwrap_or(&empty)
                .iter()
                .filter(|conflict| conflict["status"] == "open")
            {
                println!(
                    "{:<10} {:<26} {}",
                    conflict["id"].as_str().unwrap_or("?"),
                    conflict["type"].as_str().unwrap_or("?"),
                    conflict["target"].as_str().unwrap_or("?"),
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Conflict { command } => {
            let client = ForgeClient::new(&config.endpoint)?;
            match command {
                ConflictCommands::Show { id } => {
                    let body = client.conflict(&id).await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                    Ok(ExitCode::SUCCESS)
                }
                ConflictCommands::Resolve { id, op } => {
                    let raw = std::fs::read_to_string(&op)
                        .with_context(|| format!("read {}", op.display()))?;
                    let op: Value = serde_json::from_str(&raw).context("parse resolving op")?;
                    let body = client.resolve(&id, &op).await?;
                    let status = body["submit_result"]["status"].as_str();
                    println!(
                        "conflict {} is {}",
                        id,
                        body["conflict"]["status"].as_str().unwrap_or("?")
                    );
                    Ok(exit_for_status(status))
                }
            }
        }
    }
}

/// Captures edits by diffing local files against the server-side tree.
async fn build_change_set(
    client: &ForgeClient,
    state: &str,
    author: &str,
    message: Option<&str>,
    files: &[PathBuf],
) -> anyhow::Result<Value> {
    let snapshot = client.state(state).await?;
    let tree = snapshot["tree"].as_object().cloned().unwrap_or_default();
    let heads: Vec<String> = snapshot["state"]["heads"]
        .as_array()
        .map(|heads| {
            heads
                .iter()
                .filter_map(|head| head.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let adapters = Adapters::with_fallback_parser();
    let mut ops = Vec::new();
    for file in files {
        let path = normalize_path(file);
        let after = std::fs::read_to_string(file).ok();
        let before = tree.get(&path).and_then(Value::as_str);
        if after.is_none() && before.is_none() {
            bail!("{path}: neither a local file nor tracked in {state}");
        }
        if after.as_deref() == before {
            continue;
        }
        for op in capture::ops_for_file(
            &adapters,
            state,
            author,
            &path,
            before,
            after.as_deref(),
            &heads,
        ) {
            ops.push(serde_json::to_value(op)?);
        }
    }
    if ops.is_empty() {
        bail!("nothing to submit: files match {state}");
    }

    let mut metadata = json!({"author": author});
    if let Some(message) = message {
        metadata["message"] = Value::from(message);
    }
    Ok(json!({"state": state, "metadata": metadata, "ops": ops}))
}

fn normalize_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    raw.trim_start_matches("./").to_string()
}

fn stack_dir() -> PathBuf {
    Path::new(CONFIG_DIR).join(STACK_DIR)
}

fn park_change_set(change_set: &Value) -> anyhow::Result<PathBuf> {
    let dir = stack_dir();
    std::fs::create_dir_all(&dir).context("create stack dir")?;
    let path = dir.join(format!("{}.json", forge_core::now_ms()));
    std::fs::write(&path, serde_json::to_string_pretty(change_set)? + "\n")
        .with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

fn parked_change_sets() -> anyhow::Result<Vec<PathBuf>> {
    let dir = stack_dir();
    let mut entries = Vec::new();
    match std::fs::read_dir(&dir) {
        Ok(read_dir) => {
            for entry in read_dir {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    entries.push(path);
                }
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    entries.sort();
    Ok(entries)
}

fn print_submit_outcome(outcome: &Value) {
    println!(
        "{} {}",
        outcome["status"].as_str().unwrap_or("?"),
        outcome["change_set_id"].as_str().unwrap_or("?"),
    );
    for result in outcome["results"].as_array().unwrap_or(&Vec::new()) {
        println!(
            "  {:<10} {}",
            result["status"].as_str().unwrap_or("?"),
            result["op_id"].as_str().unwrap_or("?"),
        );
    }
    for conflict in outcome["conflict_details"].as_array().unwrap_or(&Vec::new()) {
        println!(
            "  conflict {} [{}] {}",
            conflict["id"].as_str().unwrap_or("?"),
            conflict["type"].as_str().unwrap_or("?"),
            conflict["reason"].as_str().unwrap_or(""),
        );
    }
}

fn exit_for_status(status: Option<&str>) -> ExitCode {
    if status == Some("accepted") {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn ts_ms_to_rfc3339(ts_ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ts_ms) * 1_000_000)
        .ok()
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .unwrap_or_else(|| ts_ms.to_string())
}
