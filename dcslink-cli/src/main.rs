//! dcslink: Command line tools for the DCS-BIOS export stream.
//!
//! Supports:
//! - Decoding a captured raw stream file against a schema directory
//! - Watching a live session and printing field updates

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tracing_subscriber::EnvFilter;

use dcslink_client::ExportClient;
use dcslink_core::assembler::FieldAssembler;
use dcslink_core::config::LinkConfig;
use dcslink_core::protocol::StreamDecoder;
use dcslink_core::schema::{default_schema_dir, SchemaSet};
use dcslink_core::types::Value;

#[derive(Parser)]
#[command(
    name = "dcslink",
    version,
    about = "DCS-BIOS export stream decoding"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a captured raw export stream file
    Decode {
        /// Path to a raw capture of the export stream
        file: PathBuf,

        /// Schema directory (defaults to the host's Saved Games location)
        #[arg(long, env = "DCSLINK_SCHEMA_DIR")]
        schema_dir: Option<PathBuf>,

        /// Merge this aircraft's modules before decoding
        #[arg(short, long)]
        aircraft: Option<String>,

        /// Print raw (address, word) write events instead of a field table
        #[arg(short, long)]
        raw: bool,
    },

    /// Watch a live session and print field updates
    Watch {
        /// Schema directory (defaults to the host's Saved Games location)
        #[arg(long, env = "DCSLINK_SCHEMA_DIR")]
        schema_dir: Option<PathBuf>,

        /// Only print these field identifiers (default: all)
        #[arg(short, long)]
        fields: Vec<String>,

        /// Seconds to wait for aircraft identification
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode {
            file,
            schema_dir,
            aircraft,
            raw,
        } => cmd_decode(file, schema_dir, aircraft, raw),
        Commands::Watch {
            schema_dir,
            fields,
            timeout,
        } => cmd_watch(schema_dir, fields, timeout).await,
    }
}

fn resolve_schema_dir(schema_dir: Option<PathBuf>) -> PathBuf {
    match schema_dir.or_else(default_schema_dir) {
        Some(dir) => dir,
        None => {
            eprintln!("Error: no schema directory given and none found; pass --schema-dir");
            std::process::exit(1);
        }
    }
}

fn cmd_decode(file: PathBuf, schema_dir: Option<PathBuf>, aircraft: Option<String>, raw: bool) {
    let dir = resolve_schema_dir(schema_dir);
    let mut schema = match SchemaSet::load(&dir) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading schema from {}: {e}", dir.display());
            std::process::exit(1);
        }
    };
    if let Some(name) = &aircraft {
        if let Err(e) = schema.load_aircraft(name) {
            eprintln!("Error loading aircraft modules for {name}: {e}");
            std::process::exit(1);
        }
    }

    let bytes = match std::fs::read(&file) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error reading {}: {e}", file.display());
            std::process::exit(1);
        }
    };

    let mut decoder = StreamDecoder::new();
    let events = decoder.feed(&bytes);
    eprintln!(
        "Decoded {} bytes into {} write events",
        bytes.len(),
        events.len()
    );

    if raw {
        for ev in &events {
            println!("{:04X} {:04X}", ev.address, ev.word);
        }
        return;
    }

    let mut assembler = FieldAssembler::new(schema.registry());
    let mut latest: BTreeMap<String, (Value, u64)> = BTreeMap::new();
    for note in assembler.apply_all(&events) {
        let entry = latest
            .entry(note.field.to_string())
            .or_insert((note.value.clone(), 0));
        entry.0 = note.value;
        entry.1 += 1;
    }

    if latest.is_empty() {
        println!("No registered fields decoded. Try --aircraft to merge a module set.");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["Field", "Value", "Updates"]);
    for (field, (value, updates)) in &latest {
        table.add_row(vec![
            Cell::new(field),
            Cell::new(value.to_string()),
            Cell::new(updates),
        ]);
    }
    println!("{table}");
}

async fn cmd_watch(schema_dir: Option<PathBuf>, fields: Vec<String>, timeout: u64) {
    let config = LinkConfig {
        schema_dir: Some(resolve_schema_dir(schema_dir)),
        ..LinkConfig::default()
    };

    let client = match ExportClient::new(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = client.connect().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    eprintln!("Waiting for aircraft identification ({timeout}s)...");
    let name = match client
        .wait_for_aircraft(Some(Duration::from_secs(timeout)))
        .await
    {
        Ok(name) => name,
        Err(e) => {
            eprintln!("Error: {e}");
            client.close().await;
            std::process::exit(1);
        }
    };
    eprintln!("Aircraft: {name}");

    let mut events = client.events();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            note = events.recv() => match note {
                Ok(note) => {
                    if fields.is_empty() || fields.iter().any(|f| f.as_str() == &*note.field) {
                        println!("{} = {}", note.field, note.value);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    eprintln!("Warning: dropped {skipped} updates");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    client.close().await;
}
