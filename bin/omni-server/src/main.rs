//! HTTP ingress binary: loads `GatewayConfig` from the environment, builds
//! a `Gateway` backed by a persistent store, starts the background
//! scheduler worker (§4.F) alongside it, and serves the axum router.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use futures::FutureExt;
use omni_common::{init_default_logging, Channel, Message};
use omni_gateway::{http, Gateway, GatewayConfig};
use omni_scheduler::MessageScheduler;
use omni_store::MessageStore;
use tokio::net::TcpListener;

/// OmniMessage Gateway HTTP server
#[derive(Parser, Debug)]
#[command(name = "omni-server")]
#[command(about = "OmniMessage Gateway - unified outbound messaging ingress")]
struct Args {
    /// Bind host, overrides OMNI_HOST
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overrides OMNI_PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_default_logging();

    let args = Args::parse();
    let mut config = GatewayConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing::info!(host = %config.host, port = config.port, "starting omni-server");

    let store = Arc::new(MessageStore::connect(&format!("sqlite:{}?mode=rwc", config.db_path)).await?);

    let mut gateway = Gateway::new(config.clone());
    gateway.attach_store(store.clone());
    let gateway = Arc::new(gateway);

    start_scheduler(gateway.clone(), store.clone()).await?;

    let router = http::build_router(gateway);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}

/// Loads pending scheduled entries from the store into an in-memory
/// `MessageScheduler`, wires its executor to the gateway, and starts its
/// 5-second poll loop. A second reconciliation loop mirrors the scheduler's
/// in-memory state back to the store on every tick, so recurring entries'
/// advancing `scheduled_at` and completions survive a restart.
async fn start_scheduler(gateway: Arc<Gateway>, store: Arc<MessageStore>) -> Result<()> {
    let scheduler = Arc::new(MessageScheduler::with_default_interval());

    for row in store.get_scheduled(Some("pending"), 10_000).await? {
        let id = row["id"].as_str().unwrap_or_default().to_string();
        let scheduled_at = row["scheduled_at"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);
        let message_data = row["message_data"].as_object().cloned().unwrap_or_default();
        scheduler.schedule_at(id, message_data, scheduled_at);
    }

    let gw = gateway.clone();
    scheduler.on_execute(Arc::new(move |entry| {
        let gateway = gw.clone();
        async move {
            let channel: Channel = entry
                .message_data
                .get("channel")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .parse()
                .map_err(|e: omni_common::GatewayErrorKind| e.to_string())?;
            let target = entry.message_data.get("target").and_then(|v| v.as_str()).unwrap_or_default();
            let text = entry
                .message_data
                .get("text")
                .or_else(|| entry.message_data.get("content"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            let msg = Message::new(Channel::Webhook, channel, text, target);
            let result = gateway.send(msg).await;
            if result.success {
                Ok(())
            } else {
                Err(result.error.unwrap_or_else(|| "send failed".to_string()))
            }
        }
        .boxed()
    }));

    scheduler.start().await;

    let reconcile_store = store.clone();
    let reconcile_scheduler = scheduler.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            for entry in reconcile_scheduler.list(None) {
                match entry.status {
                    omni_common::ScheduleStatus::Completed => {
                        if let Err(e) = reconcile_store.mark_scheduled_done(&entry.id, entry.last_result.as_deref()).await {
                            tracing::warn!(error = %e, id = %entry.id, "failed to mark scheduled entry done");
                        }
                    }
                    omni_common::ScheduleStatus::Pending => {
                        let data = serde_json::Value::Object(entry.message_data.clone());
                        if let Err(e) = reconcile_store
                            .save_scheduled(&entry.id, &data, &entry.scheduled_at.to_rfc3339())
                            .await
                        {
                            tracing::warn!(error = %e, id = %entry.id, "failed to persist scheduled entry");
                        }
                    }
                    omni_common::ScheduleStatus::Cancelled => {}
                }
            }
        }
    });

    Ok(())
}
