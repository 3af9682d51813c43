//! # penguiflow-cli
//!
//! Minimal admin utility over the state-hook protocol: renders one trace's
//! recorded history. No dynamic plugin loading — `--state-store` names one
//! of a small static registry of known in-process backends.

use clap::{Parser, Subcommand};
use penguiflow_core::StoredEvent;
use penguiflow_state::InMemoryStateHook;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "penguiflow")]
#[command(about = "penguiflow CLI - inspect recorded trace history", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a trace's recorded history from a state-store snapshot
    Replay {
        /// Backend spec, "<module>:<factory>". Only "memory:<snapshot.json>"
        /// is registered in this build.
        #[arg(long)]
        state_store: String,

        /// Trace id to replay
        #[arg(long)]
        trace_id: String,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Known in-process state-store backends, keyed by the `<module>` half of
/// `--state-store`. Extend this match arm, not a plugin directory, when a
/// new reference backend ships.
fn load_backend(spec: &str) -> Result<(InMemoryStateHook, HashMap<String, Vec<StoredEvent>>), String> {
    let (module, factory) = spec
        .split_once(':')
        .ok_or_else(|| format!("state-store spec '{spec}' is not '<module>:<factory>'"))?;
    match module {
        "memory" => {
            let path = PathBuf::from(factory);
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| format!("reading snapshot '{}': {e}", path.display()))?;
            let snapshot: HashMap<String, Vec<StoredEvent>> = serde_json::from_str(&raw)
                .map_err(|e| format!("parsing snapshot '{}': {e}", path.display()))?;
            Ok((InMemoryStateHook::new(), snapshot))
        }
        other => Err(format!("unknown state-store backend '{other}'")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Replay {
            state_store,
            trace_id,
            format,
        } => replay(&state_store, &trace_id, format).await,
    }
}

async fn replay(state_store: &str, trace_id: &str, format: OutputFormat) -> ExitCode {
    use penguiflow_core::StateHook;

    let (hook, snapshot) = match load_backend(state_store) {
        Ok(pair) => pair,
        Err(msg) => {
            eprintln!("configuration error: {msg}");
            return ExitCode::from(2);
        }
    };

    for (tid, events) in snapshot {
        for event in events {
            if tid != event.trace_id {
                continue;
            }
            if let Err(e) = hook.save_event(event).await {
                eprintln!("configuration error: loading snapshot: {e}");
                return ExitCode::from(2);
            }
        }
    }

    let history = match hook.load_history(trace_id).await {
        Ok(history) => history,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    if history.is_empty() {
        eprintln!("unknown trace: '{trace_id}'");
        return ExitCode::from(1);
    }

    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&history) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("configuration error: serializing history: {e}");
                return ExitCode::from(2);
            }
        },
        OutputFormat::Text => {
            for event in &history {
                println!(
                    "{}  {:?}  node={}  attempt={}",
                    event.ts,
                    event.kind,
                    event.node_name.as_deref().unwrap_or("-"),
                    event
                        .payload
                        .get("attempt")
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".into()),
                );
            }
        }
    }

    ExitCode::SUCCESS
}
