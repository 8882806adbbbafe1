use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reportq::cli::{self, Commands, NotificationCommands};
use reportq::config::{self, Config};
use reportq::models::notification::{empty_meta, NewNotification};
use reportq::queue::NotificationQueue;
use reportq::store::postgres::PgStore;
use reportq::{api, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // OTLP export is opt-in through OTEL_EXPORTER_OTLP_ENDPOINT; without it we
    // only log to stdout.
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "reportq"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    // LOG_FORMAT=json switches stdout to one JSON object per event.
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let (text_layer, json_layer) = if json_logs {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "reportq=debug,tower_http=debug".into()),
        ))
        .with(text_layer)
        .with(json_layer)
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(Commands::Sweep) => run_sweep(cfg).await,
        Some(Commands::Notification { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_notification_command(Arc::new(db), &cfg, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    if cfg.api_key.is_none() {
        tracing::warn!("API_KEY is not set; the API accepts unauthenticated requests");
    }

    let state = Arc::new(AppState::new(Arc::new(db), cfg));
    let app = api::router(state.clone());

    let shutdown = CancellationToken::new();
    let recovery = jobs::recovery::spawn(state.queue.clone(), shutdown.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("reportq listening on {}", addr);

    let serve_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = recovery.await {
        tracing::error!("recovery job panicked: {}", e);
    }
    tracing::info!("reportq stopped");
    Ok(())
}

async fn run_sweep(cfg: Config) -> anyhow::Result<()> {
    let db = PgStore::connect(&cfg.database_url).await?;
    let queue = NotificationQueue::new(Arc::new(db), cfg.queue_config());
    let outcome = queue.sweep().await?;
    println!(
        "Sweep complete:\n  Requeued: {}\n  Errored:  {}",
        outcome.requeued.len(),
        outcome.errored.len()
    );
    Ok(())
}

async fn handle_notification_command(
    db: Arc<PgStore>,
    cfg: &Config,
    cmd: NotificationCommands,
) -> anyhow::Result<()> {
    let queue = NotificationQueue::new(db, cfg.queue_config());
    match cmd {
        NotificationCommands::List { user_id } => {
            let rows = queue.list_for_user(user_id).await?;
            if rows.is_empty() {
                println!("No notifications found.");
                return Ok(());
            }
            println!(
                "{:<10} {:<12} {:<12} {:<6} CREATED",
                "ID", "SENDER", "STATUS", "RETRY"
            );
            for n in rows {
                println!(
                    "{:<10} {:<12} {:<12} {:<6} {}",
                    n.id,
                    n.sender_method,
                    n.status,
                    n.retry_count,
                    n.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        NotificationCommands::Enqueue {
            user_id,
            sender_method,
            text,
        } => {
            if sender_method.trim().is_empty() {
                anyhow::bail!("--sender-method must not be empty");
            }
            let row = queue
                .enqueue(NewNotification {
                    user_id,
                    sender_method: sender_method.trim().to_string(),
                    text,
                    report_id: None,
                    meta: empty_meta(),
                })
                .await?;
            println!(
                "Notification queued:\n  ID:     {}\n  Sender: {}\n  Status: {}",
                row.id, row.sender_method, row.status
            );
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
