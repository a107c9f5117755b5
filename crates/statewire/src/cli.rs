//! Argument parsing and dispatch for the `statewire` binary

use crate::commands::{self, EncodeOptions};
use crate::jsonl::{open_input, open_output, read_lines};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use statewire_state::{
    CompressionLevel, CompressionMethod, Envelope, MismatchPolicy, SyncConfig,
};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Statewire - compressed state sync for JSON snapshots")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, value_enum, default_value = "warn", global = true)]
    pub log_level: LogLevel,

    /// How a receiver treats a delta whose baseline hash does not match
    #[arg(long, value_enum, global = true)]
    pub mismatch_policy: Option<MismatchPolicy>,

    /// Leave an optional codec out of the capability probe
    #[arg(long = "disable-codec", value_enum, global = true)]
    pub disabled_codecs: Vec<CompressionMethod>,

    /// Upper bound for serialized and decompressed payloads, in bytes
    #[arg(long, global = true)]
    pub max_payload_bytes: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode JSON-lines snapshots into network envelopes
    Encode {
        /// Input file (stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Client id; enables delta encoding against the previous snapshot
        #[arg(short, long)]
        client: Option<String>,

        /// Compression method
        #[arg(short, long, value_enum)]
        method: Option<CompressionMethod>,

        /// Compression level
        #[arg(short, long, value_enum)]
        level: Option<CompressionLevel>,

        /// Drop nulls and run-length encode repetitive sequences first
        #[arg(long)]
        optimize: bool,

        /// Send all snapshots as one batch envelope
        #[arg(long)]
        batch: bool,
    },

    /// Decode envelopes back into JSON-lines snapshots
    Decode {
        /// Input file (stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Client id the envelopes were encoded for
        #[arg(short, long)]
        client: Option<String>,

        /// Undo message optimization after decoding
        #[arg(long)]
        deoptimize: bool,
    },

    /// Compare codec sizes on a JSON-lines snapshot stream
    Compare {
        /// Input file (stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Compression level
        #[arg(short, long, value_enum, default_value = "balanced")]
        level: CompressionLevel,
    },
}

impl Args {
    /// Environment defaults overlaid with command line flags
    pub fn sync_config(&self) -> SyncConfig {
        let mut config = SyncConfig::from_env();
        if let Some(policy) = self.mismatch_policy {
            config = config.with_mismatch_policy(policy);
        }
        for method in &self.disabled_codecs {
            config = config.without_codec(*method);
        }
        if let Some(limit) = self.max_payload_bytes {
            config = config.with_max_payload_bytes(limit);
        }
        config
    }
}

fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Run one subcommand
pub fn execute(args: Args) -> Result<()> {
    let config = args.sync_config();

    match args.command {
        Command::Encode {
            input,
            output,
            client,
            method,
            level,
            optimize,
            batch,
        } => {
            let snapshots: Vec<Value> = read_lines(open_input(input.as_deref())?)?;
            let mut out = open_output(output.as_deref())?;
            let options = EncodeOptions {
                client_id: client,
                method,
                level,
                optimize,
                batch,
            };
            commands::encode(&config, &snapshots, &options, &mut out)?;
        }
        Command::Decode {
            input,
            output,
            client,
            deoptimize,
        } => {
            let envelopes: Vec<Envelope> = read_lines(open_input(input.as_deref())?)
                .context("Failed to read envelopes")?;
            let mut out = open_output(output.as_deref())?;
            commands::decode(&config, &envelopes, client.as_deref(), deoptimize, &mut out)?;
        }
        Command::Compare { input, level } => {
            let snapshots: Vec<Value> = read_lines(open_input(input.as_deref())?)?;
            let (reports, suggested) = commands::compare(&config, &snapshots, level)?;
            let mut out = open_output(None)?;
            commands::write_report(&reports, suggested, &mut out)?;
        }
    }

    Ok(())
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);
    execute(args)
}
