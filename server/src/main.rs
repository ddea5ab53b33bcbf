use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use trackgate_server::command::ReplyCorrelator;
use trackgate_server::config::Args;
use trackgate_server::gateway::TcpGateway;
use trackgate_server::http::{AppState, HttpGateway};
use trackgate_server::session::{SessionContext, SessionRegistry, TracingObserver};
use trackgate_server::telemetry::TelemetryDispatcher;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = Arc::new(args.gateway_config());

    let telemetry = if args.hook.is_empty() {
        warn!("no output hook configured, telemetry will not be forwarded");
        None
    } else {
        info!("output hook: {}", args.hook);
        Some(TelemetryDispatcher::new(&args.hook)?)
    };

    let ctx = SessionContext {
        config: config.clone(),
        registry: Arc::new(SessionRegistry::new()),
        correlator: Arc::new(ReplyCorrelator::new(config.acquire_poll_interval)),
        telemetry,
        observer: Arc::new(TracingObserver),
    };

    let tcp = Arc::new(TcpGateway::bind(&args.address, ctx.clone()).await?);
    let http = HttpGateway::bind(
        &args.http,
        AppState {
            hub: tcp.clone(),
            correlator: ctx.correlator.clone(),
            config,
        },
    )
    .await?;

    tokio::select! {
        result = tcp.run() => {
            if let Err(e) = &result {
                error!("tcp server stopped ({})", e);
            }
            result
        }
        result = http.run() => {
            if let Err(e) = &result {
                error!("http server stopped ({})", e);
            }
            result
        }
    }
}
