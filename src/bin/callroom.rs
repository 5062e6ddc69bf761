//! Callroom demo application
//!
//! Joins or starts a call on the simulated media engine and serves the
//! control API until Ctrl+C.
//!
//! ```text
//! callroom join <channel> [--config <path>] [--token <token>] [--peer <id>]...
//! callroom call <receiver> [--config <path>] [--token <token>] [--peer <id>]...
//! ```

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use callroom::{
    config::AppConfig,
    engine::{MediaKind, SimulatedEngine},
    entry::{request_ticket, CallRequest, StaticTokenService},
    session::{spawn_session, SessionNotice},
    ui::WebServer,
};

const DEMO_TOKEN: &str = "demo-token";

struct Args {
    request: CallRequest,
    config: Option<PathBuf>,
    token: String,
    peers: Vec<String>,
}

fn usage() -> String {
    concat!(
        "usage: callroom (join <channel> | call <receiver>) ",
        "[--config <path>] [--token <token>] [--peer <id>]..."
    )
    .to_string()
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let request = match (args.next().as_deref(), args.next()) {
        (Some("join"), Some(channel)) => CallRequest::join(channel),
        (Some("call"), Some(receiver)) => CallRequest::call(receiver),
        _ => bail!(usage()),
    };

    let mut parsed = Args {
        request,
        config: None,
        token: DEMO_TOKEN.to_string(),
        peers: Vec::new(),
    };

    while let Some(flag) = args.next() {
        let value = args
            .next()
            .ok_or_else(|| anyhow!("{} needs a value\n{}", flag, usage()))?;
        match flag.as_str() {
            "--config" => parsed.config = Some(PathBuf::from(value)),
            "--token" => parsed.token = value,
            "--peer" => parsed.peers.push(value),
            other => bail!("unknown option {}\n{}", other, usage()),
        }
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    let config = AppConfig::load_or_default(args.config.as_deref())
        .context("failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Callroom");

    let engine = SimulatedEngine::new();
    let tokens = StaticTokenService::new(args.token);
    let ticket = request_ticket(&tokens, &args.request).await?;
    tracing::info!("Channel: {} ({})", ticket.channel, ticket.role);

    let session = Arc::new(spawn_session(Arc::new(engine.clone()), &config, ticket));

    let mut notices = session.notices();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(SessionNotice::StateChanged(state)) => tracing::info!("Call is {}", state),
                Ok(SessionNotice::ParticipantJoined(id)) => tracing::info!("{} joined", id),
                Ok(SessionNotice::ParticipantLeft(id)) => tracing::info!("{} left", id),
                Ok(SessionNotice::Warning(message)) => tracing::warn!("{}", message),
                Ok(SessionNotice::Fatal(message)) => tracing::error!("{}", message),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} session notices", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let identity = session
        .join_outcome()
        .await
        .map_err(|e| anyhow!(e.user_message()))?;
    tracing::info!("Joined as {}", identity);

    for peer in &args.peers {
        engine.publish_remote(peer.as_str(), MediaKind::Audio);
        engine.publish_remote(peer.as_str(), MediaKind::Video);
    }

    let web_server = WebServer::new(config.ui.clone(), session.clone());
    let _web_handle = web_server.start_background();
    tracing::info!(
        "Control API available at http://{}:{}/api/session",
        config.ui.bind_address,
        config.ui.http_port
    );

    tracing::info!("In call - press Ctrl+C to hang up");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            tracing::info!("Hanging up");
            session.end_call().await;
        }
        _ = session.closed() => {}
    }

    let snapshot = session.snapshot();
    tracing::info!(
        "Call ended ({}), {} engine events handled",
        snapshot.state,
        snapshot.stats.events_processed
    );
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
