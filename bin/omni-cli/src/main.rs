//! `omni` — command-line driver for the gateway. Every subcommand opens its
//! own `MessageStore` against `--db` and constructs a `Gateway` from the
//! process environment; there is no long-lived daemon state between
//! invocations, matching the source CLI's per-process `Gateway`/`MessageStore`.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use omni_common::{init_default_logging, Channel, Message, Priority};
use omni_gateway::{Gateway, GatewayConfig};
use omni_scheduler::MessageScheduler;
use omni_store::MessageStore;
use serde_json::{Map, Value};

const DEFAULT_DB: &str = "omni_messages.db";

#[derive(Parser, Debug)]
#[command(name = "omni")]
#[command(about = "OmniMessage Gateway CLI - One tool, all platforms")]
struct Cli {
    /// Config file (reserved; the gateway is configured from the environment)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, default_value = DEFAULT_DB)]
    db: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a message
    Send {
        channel: String,
        target: String,
        text: String,
        #[arg(long)]
        template: Option<String>,
        #[arg(long)]
        vars: Option<String>,
        #[arg(long, default_value = "5")]
        priority: i32,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long = "parse-mode")]
        parse_mode: Option<String>,
    },
    /// Broadcast to multiple channels
    Broadcast {
        text: String,
        /// Targets JSON: [{"channel":"telegram","target":"123"}]
        #[arg(long)]
        targets: String,
        #[arg(long)]
        template: Option<String>,
    },
    /// Batch send from a CSV or JSON file
    Batch {
        file: PathBuf,
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value = "0.1")]
        delay: f64,
    },
    /// Show message statistics
    Stats {
        #[arg(long, default_value = "24")]
        hours: i64,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Query message history
    History {
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        target: Option<String>,
        #[arg(long, default_value = "20")]
        limit: i64,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Manage templates
    Templates {
        #[command(subcommand)]
        action: Option<TemplateAction>,
    },
    /// Schedule messages
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// List available channels
    Channels,
    /// Show version
    Version,
}

#[derive(Subcommand, Debug)]
enum TemplateAction {
    List,
    Add { name: String, template_str: String },
    Remove { name: String },
    Test { name: String, #[arg(long)] vars: Option<String> },
}

#[derive(Subcommand, Debug)]
enum ScheduleAction {
    Add {
        channel: String,
        target: String,
        text: String,
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        delay: Option<i64>,
    },
    List {
        #[arg(long)]
        status: Option<String>,
    },
    Cancel {
        entry_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_default_logging();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    if let Command::Version = command {
        println!("OmniMessage Gateway v{}", omni_gateway::VERSION);
        return Ok(());
    }

    let gateway = Gateway::new(GatewayConfig::from_env());

    match command {
        Command::Channels => {
            cmd_channels(&gateway);
        }
        Command::Templates { action } => {
            cmd_templates(&gateway, action)?;
        }
        Command::Stats { hours, format } => {
            let store = MessageStore::connect(&format!("sqlite:{}", cli.db)).await?;
            cmd_stats(&store, hours, &format).await?;
        }
        Command::History { channel, status, target, limit, format } => {
            let store = MessageStore::connect(&format!("sqlite:{}", cli.db)).await?;
            cmd_history(&store, channel, status, target, limit, &format).await?;
        }
        Command::Schedule { action } => {
            let store = MessageStore::connect(&format!("sqlite:{}", cli.db)).await?;
            cmd_schedule(&store, action).await?;
        }
        Command::Send { channel, target, text, template, vars, priority, subject, parse_mode } => {
            let store = MessageStore::connect(&format!("sqlite:{}", cli.db)).await?;
            let ok = cmd_send(&gateway, &store, channel, target, text, template, vars, priority, subject, parse_mode).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Command::Broadcast { text, targets, template } => {
            let store = MessageStore::connect(&format!("sqlite:{}", cli.db)).await?;
            cmd_broadcast(&gateway, &store, text, targets, template).await?;
        }
        Command::Batch { file, dry_run, delay } => {
            let store = MessageStore::connect(&format!("sqlite:{}", cli.db)).await?;
            cmd_batch(&gateway, &store, file, dry_run, delay).await?;
        }
        Command::Version => unreachable!(),
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_send(
    gateway: &Gateway,
    store: &MessageStore,
    channel: String,
    target: String,
    text: String,
    template: Option<String>,
    vars: Option<String>,
    priority: i32,
    subject: Option<String>,
    parse_mode: Option<String>,
) -> Result<bool> {
    let to_channel: Channel = channel.parse().map_err(|e: omni_common::GatewayErrorKind| anyhow!(e.to_string()))?;

    let mut metadata = Map::new();
    if let Some(s) = &subject {
        metadata.insert("subject".into(), Value::String(s.clone()));
    }
    if let Some(p) = &parse_mode {
        metadata.insert("parse_mode".into(), Value::String(p.clone()));
    }

    let template_vars: Map<String, Value> = match &vars {
        Some(v) => serde_json::from_str(v)?,
        None => Map::new(),
    };

    let mut msg = Message::new(Channel::Webhook, to_channel, text, target.clone());
    msg.template_name = template;
    msg.template_vars = template_vars;
    msg.metadata = metadata;
    msg.priority = Priority::try_from(priority).unwrap_or_default();

    store.save_message(&msg.to_map()).await?;
    store.log_event(&msg.id, "created", Some(channel.as_str()), None).await?;

    let result = gateway.send(msg.clone()).await;

    if result.success {
        store.update_status(&msg.id, "sent", None).await?;
        store.log_event(&msg.id, "sent", Some(channel.as_str()), None).await?;
        println!("Sent via {channel} -> {target}");
        println!("  Message ID: {}", msg.id);
    } else {
        let error = result.error.clone().unwrap_or_default();
        store.update_status(&msg.id, "failed", Some(&error)).await?;
        store.log_event(&msg.id, "failed", Some(channel.as_str()), Some(&error)).await?;
        println!("Failed: {error}");
    }

    Ok(result.success)
}

async fn cmd_broadcast(gateway: &Gateway, store: &MessageStore, text: String, targets: String, template: Option<String>) -> Result<()> {
    let targets: Vec<Value> = serde_json::from_str(&targets)?;
    let mut success = 0;
    let mut failed = 0;

    for t in &targets {
        let channel_str = t.get("channel").and_then(Value::as_str).unwrap_or_default();
        let target = t.get("target").and_then(Value::as_str).unwrap_or_default();

        let Ok(channel) = channel_str.parse::<Channel>() else {
            failed += 1;
            println!("  {channel_str}:{target} - unknown channel");
            continue;
        };

        let mut msg = Message::new(Channel::Webhook, channel, text.clone(), target);
        msg.template_name = template.clone();
        store.save_message(&msg.to_map()).await?;

        let result = gateway.send(msg.clone()).await;
        if result.success {
            store.update_status(&msg.id, "sent", None).await?;
            success += 1;
        } else {
            store.update_status(&msg.id, "failed", result.error.as_deref()).await?;
            failed += 1;
        }
    }

    println!("\nBroadcast: {success} sent, {failed} failed");
    Ok(())
}

async fn cmd_batch(gateway: &Gateway, store: &MessageStore, file: PathBuf, dry_run: bool, delay: f64) -> Result<()> {
    let records = load_batch_records(&file)?;
    println!("Loaded {} messages", records.len());

    if dry_run {
        for (i, r) in records.iter().take(5).enumerate() {
            let channel = r.get("channel").and_then(Value::as_str).unwrap_or_default();
            let target = r.get("target").and_then(Value::as_str).unwrap_or_default();
            let text = r.get("text").and_then(Value::as_str).unwrap_or_default();
            let preview: String = text.chars().take(50).collect();
            println!("  [{}] {channel} -> {target}: {preview}...", i + 1);
        }
        if records.len() > 5 {
            println!("  ... and {} more", records.len() - 5);
        }
        println!("\nDry run complete. Remove --dry-run to send.");
        return Ok(());
    }

    let mut success = 0;
    let mut failed = 0;
    let total = records.len();
    for (i, r) in records.iter().enumerate() {
        let channel_str = r.get("channel").and_then(Value::as_str).unwrap_or_default();
        let target = r.get("target").and_then(Value::as_str).unwrap_or_default();
        let text = r
            .get("text")
            .or_else(|| r.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        match channel_str.parse::<Channel>() {
            Ok(channel) => {
                let msg = Message::new(Channel::Webhook, channel, text, target);
                store.save_message(&msg.to_map()).await?;
                let result = gateway.send(msg.clone()).await;
                if result.success {
                    store.update_status(&msg.id, "sent", None).await?;
                    success += 1;
                } else {
                    store.update_status(&msg.id, "failed", result.error.as_deref()).await?;
                    failed += 1;
                }
            }
            Err(_) => failed += 1,
        }

        if delay > 0.0 && i < total - 1 {
            tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
        }
        if (i + 1) % 10 == 0 {
            println!("  Progress: {}/{total}", i + 1);
        }
    }

    println!("\nBatch: {success} sent, {failed} failed (total: {total})");
    Ok(())
}

fn load_batch_records(file: &PathBuf) -> Result<Vec<Value>> {
    let ext = file.extension().and_then(|e| e.to_str()).unwrap_or_default();
    match ext {
        "json" => {
            let content = std::fs::read_to_string(file)?;
            Ok(serde_json::from_str(&content)?)
        }
        "csv" => {
            let mut reader = csv::Reader::from_path(file)?;
            let mut records = Vec::new();
            for result in reader.records() {
                let record = result?;
                let headers = reader.headers()?.clone();
                let mut map = Map::new();
                for (header, value) in headers.iter().zip(record.iter()) {
                    map.insert(header.to_string(), Value::String(value.to_string()));
                }
                records.push(Value::Object(map));
            }
            Ok(records)
        }
        other => Err(anyhow!("Unsupported file format '.{other}'. Use .csv or .json")),
    }
}

async fn cmd_stats(store: &MessageStore, hours: i64, format: &str) -> Result<()> {
    let stats = store.get_stats(hours).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
        "csv" => {
            println!("status,count");
            if let Some(by_status) = stats["by_status"].as_object() {
                for (status, count) in by_status {
                    println!("{status},{count}");
                }
            }
        }
        _ => {
            println!("\nMessage Statistics (last {hours}h)");
            println!("{}", "-".repeat(40));
            println!("  Total:        {}", stats["total"]);
            println!("  Success Rate: {}%", stats["success_rate"]);
            println!();
            println!("  By Status:");
            if let Some(by_status) = stats["by_status"].as_object() {
                for (status, count) in by_status {
                    println!("    {status}: {count}");
                }
            }
            println!();
            println!("  By Channel:");
            if let Some(by_channel) = stats["by_channel"].as_object() {
                for (channel, count) in by_channel {
                    println!("    {channel}: {count}");
                }
            }
        }
    }
    Ok(())
}

async fn cmd_history(
    store: &MessageStore,
    channel: Option<String>,
    status: Option<String>,
    target: Option<String>,
    limit: i64,
    format: &str,
) -> Result<()> {
    let messages = store
        .query_messages(channel.as_deref(), status.as_deref(), target.as_deref(), None, None, limit, 0)
        .await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    println!("\nMessage History ({} results)", messages.len());
    println!("{}", "-".repeat(60));
    for m in &messages {
        let status_icon = match m["status"].as_str().unwrap_or_default() {
            "sent" => "[sent]",
            "failed" | "dead" => "[failed]",
            _ => "[pending]",
        };
        let content_preview: String = m["content"].as_str().unwrap_or_default().chars().take(40).collect();
        println!("  {status_icon} [{}] {}: {content_preview}", m["to_channel"], m["target"]);
        println!("     ID: {} | {}", m["id"], m["created_at"]);
    }
    Ok(())
}

fn cmd_channels(gateway: &Gateway) {
    println!("\nAvailable Channels");
    println!("{}", "-".repeat(30));
    for channel in Channel::all() {
        let icon = if gateway.channel_enabled(channel) { "[on] " } else { "[off]" };
        println!("  {icon} {}", channel.as_str());
    }
}

fn cmd_templates(gateway: &Gateway, action: Option<TemplateAction>) -> Result<()> {
    match action {
        None | Some(TemplateAction::List) => {
            let (memory, files) = gateway.template_engine.list_templates();
            println!("\nTemplates");
            println!("  Memory: {memory:?}");
            println!("  Files:  {files:?}");
        }
        Some(TemplateAction::Add { name, template_str }) => {
            gateway.register_template(&name, &template_str)?;
            println!("Registered template: {name}");
        }
        Some(TemplateAction::Remove { name }) => {
            if gateway.template_engine.unregister(&name) {
                println!("Removed template: {name}");
            } else {
                println!("Template not found: {name}");
            }
        }
        Some(TemplateAction::Test { name, vars }) => {
            let variables: Value = match vars {
                Some(v) => serde_json::from_str(&v)?,
                None => Value::Object(Map::new()),
            };
            let result = gateway.template_engine.render(&name, &variables)?;
            println!("Rendered:\n{result}");
        }
    }
    Ok(())
}

async fn cmd_schedule(store: &MessageStore, action: ScheduleAction) -> Result<()> {
    match action {
        ScheduleAction::Add { channel, target, text, at, delay } => {
            let mut message_data = Map::new();
            message_data.insert("channel".into(), Value::String(channel));
            message_data.insert("target".into(), Value::String(target));
            message_data.insert("text".into(), Value::String(text));

            let scheduler = MessageScheduler::with_default_interval();
            let (entry_id, scheduled_at) = if let Some(at) = &at {
                let parsed = chrono::DateTime::parse_from_rfc3339(at)?.with_timezone(&Utc);
                let id = scheduler.schedule_at(uuid_like(), message_data.clone(), parsed);
                (id, parsed.to_rfc3339())
            } else if let Some(delay) = delay {
                let id = scheduler.schedule_delay(uuid_like(), message_data.clone(), delay);
                (id, (Utc::now() + chrono::Duration::seconds(delay)).to_rfc3339())
            } else {
                println!("Specify --at or --delay");
                return Ok(());
            };

            store.save_scheduled(&entry_id, &Value::Object(message_data), &scheduled_at).await?;
            println!("Scheduled: {entry_id}");
        }
        ScheduleAction::List { status } => {
            let entries = store.get_scheduled(status.as_deref(), 100).await?;
            println!("\nScheduled Messages ({})", entries.len());
            for e in &entries {
                let icon = match e["status"].as_str().unwrap_or_default() {
                    "pending" => "[pending]",
                    "executed" => "[done]",
                    _ => "[cancelled]",
                };
                println!("  {icon} {} -> {}", &e["id"].as_str().unwrap_or_default()[..12.min(e["id"].as_str().unwrap_or_default().len())], e["scheduled_at"]);
                println!("     {}", e["message_data"]);
            }
        }
        ScheduleAction::Cancel { entry_id } => {
            if store.delete_scheduled(&entry_id).await? {
                println!("Cancelled: {entry_id}");
            } else {
                println!("Not found: {entry_id}");
            }
        }
    }
    Ok(())
}

fn uuid_like() -> String {
    uuid::Uuid::new_v4().to_string()
}
