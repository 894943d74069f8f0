//! # tether
//!
//! Command-line endpoint for the tether protocol: run a server, or connect
//! to one and issue a call, emit an event, or probe liveness.

#![deny(unsafe_code)]

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tether_core::CodecKind;
use tether_core::logging::{LogFormat, init_subscriber};
use tether_settings::TetherSettings;

/// RPC over websockets.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "RPC over websockets")]
struct Cli {
    /// Settings file (defaults to `$TETHER_CONFIG` or `~/.tether/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Wire codec (`json` or `cbor`), overriding settings.
    #[arg(long, global = true)]
    codec: Option<CodecKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a server exposing `echo` and `time`.
    Serve(ServeArgs),
    /// Call a remote function and print the result.
    Call(CallArgs),
    /// Send an event.
    Emit(EmitArgs),
    /// Probe a server with `__ping`.
    Ping(PingArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,
    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,
    /// Listen on a unix socket instead of TCP.
    #[arg(long)]
    unix: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConnectArgs {
    /// Server URL (`ws://…` or `unix:<path>`), overriding settings.
    #[arg(long)]
    url: Option<String>,
}

#[derive(Args, Debug)]
struct CallArgs {
    #[command(flatten)]
    connect: ConnectArgs,
    /// Function name.
    function: String,
    /// JSON argument (defaults to `null`).
    data: Option<String>,
    /// Call timeout in milliseconds, overriding settings.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct EmitArgs {
    #[command(flatten)]
    connect: ConnectArgs,
    /// Event name.
    event: String,
    /// JSON payload (defaults to `null`).
    data: Option<String>,
}

#[derive(Args, Debug)]
struct PingArgs {
    #[command(flatten)]
    connect: ConnectArgs,
    /// Number of probes.
    #[arg(long, default_value = "1")]
    count: u32,
}

fn load(cli: &Cli) -> Result<TetherSettings> {
    let mut settings = match &cli.config {
        Some(path) => tether_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => tether_settings::load_settings().context("failed to load settings")?,
    };
    if let Some(codec) = cli.codec {
        settings.protocol.codec = codec;
    }
    Ok(settings)
}

fn parse_json(raw: Option<&str>) -> Result<serde_json::Value> {
    raw.map_or(Ok(serde_json::Value::Null), |text| {
        serde_json::from_str(text).with_context(|| format!("invalid JSON argument: {text}"))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load(&cli)?;

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    match cli.command {
        Command::Serve(args) => {
            if let Some(host) = args.host {
                settings.server.host = host;
            }
            if let Some(port) = args.port {
                settings.server.port = port;
            }
            commands::serve(&settings, args.unix).await
        }
        Command::Call(args) => {
            apply_connect(&mut settings, args.connect);
            if let Some(ms) = args.timeout_ms {
                settings.protocol.call_timeout_ms = ms;
            }
            let data = parse_json(args.data.as_deref())?;
            commands::call(&settings, &args.function, data).await
        }
        Command::Emit(args) => {
            apply_connect(&mut settings, args.connect);
            let data = parse_json(args.data.as_deref())?;
            commands::emit(&settings, &args.event, data).await
        }
        Command::Ping(args) => {
            apply_connect(&mut settings, args.connect);
            commands::ping(&settings, args.count).await
        }
    }
}

fn apply_connect(settings: &mut TetherSettings, args: ConnectArgs) {
    if let Some(url) = args.url {
        settings.client.url = url;
    }
    // One-shot commands should fail instead of retrying.
    settings.client.reconnect.enabled = false;
}
