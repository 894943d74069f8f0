//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::info;

use tether_client::ClientBuilder;
use tether_rpc::{Connection, handler_fn};
use tether_server::{ListenTarget, ServerConfig, TetherServer, metrics};
use tether_settings::TetherSettings;

pub(crate) async fn serve(settings: &TetherSettings, unix: Option<PathBuf>) -> Result<()> {
    let config = ServerConfig::from_settings(settings);
    let mut builder = TetherServer::builder(config.clone())
        .register("echo", handler_fn(|data: Value| async move { Ok(data) }))?
        .register(
            "time",
            handler_fn(|_| async { Ok(json!(chrono::Utc::now().to_rfc3339())) }),
        )?;
    if let Some(handle) = metrics::install_recorder() {
        builder = builder.metrics(handle);
    }
    let server = Arc::new(builder.build()?);

    server.on_connection(|peer| info!(peer_id = %peer.id(), "peer connected"));
    server.on_disconnect(|peer| info!(peer_id = %peer.id(), "peer disconnected"));

    let target = match unix {
        Some(path) => unix_target(path)?,
        None => ListenTarget::HostPort(config.host.clone(), config.port),
    };
    let (addr, handle) = server.listen(target).await?;
    info!(%addr, path = %config.path, codec = %config.codec, "tether listening");

    let shutdown = server.clone();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("shutting down");
            shutdown.close().await;
        }
        result = handle => result.context("server task failed")?,
    }
    Ok(())
}

#[cfg(unix)]
fn unix_target(path: PathBuf) -> Result<ListenTarget> {
    Ok(ListenTarget::Unix(path))
}

#[cfg(not(unix))]
fn unix_target(_path: PathBuf) -> Result<ListenTarget> {
    anyhow::bail!("unix sockets are not supported on this platform")
}

async fn connect(settings: &TetherSettings) -> Result<Connection> {
    ClientBuilder::from_settings(settings)?
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", settings.client.url))
}

pub(crate) async fn call(settings: &TetherSettings, function: &str, data: Value) -> Result<()> {
    let conn = connect(settings).await?;
    let result = conn.call(function, data).await;
    conn.close();
    let value = result.with_context(|| format!("call to '{function}' failed"))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub(crate) async fn emit(settings: &TetherSettings, event: &str, data: Value) -> Result<()> {
    let conn = connect(settings).await?;
    conn.send_event(event, data).await?;
    // Frames are delivered in order, so a ping reply means the event arrived.
    let outcome = conn.ping().await;
    conn.close();
    let _ = outcome.context("event sent but delivery was not confirmed")?;
    Ok(())
}

pub(crate) async fn ping(settings: &TetherSettings, count: u32) -> Result<()> {
    let conn = connect(settings).await?;
    for seq in 1..=count.max(1) {
        match conn.ping().await {
            Ok(rtt) => println!("pong seq={seq} time={:.2}ms", rtt.as_secs_f64() * 1000.0),
            Err(e) => {
                conn.close();
                return Err(e).context("ping failed");
            }
        }
    }
    conn.close();
    Ok(())
}
