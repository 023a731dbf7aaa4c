use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use brolink::prelude::*;
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "brolinkd")]
#[command(about = "brolink demo: exchanges typed events over a loopback transport")]
struct Cli {
    /// JSON configuration context (`values`, `domains`, `domain`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Configuration domain to select.
    #[arg(long)]
    domain: Option<String>,
    /// Connection flags, e.g. `always_queue|reconnect`.
    #[arg(long, default_value = "none")]
    flags: String,
    /// Number of ping events to send.
    #[arg(long, default_value_t = 3)]
    count: u64,
    /// Emit logs as JSON lines.
    #[arg(long)]
    json: bool,
}

fn load_config(cli: &Cli) -> Result<ConfigContext> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed reading config {path:?}"))?;
            ConfigContext::from_json_str(&raw)
                .with_context(|| format!("failed parsing config {path:?}"))?
        }
        None => ConfigContext::new(),
    };
    if let Some(domain) = &cli.domain {
        config.set_domain(Some(domain.clone()));
    }
    Ok(config)
}

fn render(event: &Event) -> serde_json::Value {
    json!({
        "name": event.name(),
        "timestamp": event.timestamp().to_string(),
        "args": event
            .parameters()
            .iter()
            .map(|value| json!({ "type": value.tag().name(), "value": value.to_string() }))
            .collect::<Vec<_>>(),
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.json {
        tracing_subscriber::fmt()
            .with_env_filter("info")
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("info")
            .compact()
            .init();
    }

    let config = load_config(&cli)?;
    let flags = ConnectionFlags::parse(&cli.flags)
        .ok_or_else(|| anyhow!("unknown connection flags `{}`", cli.flags))?;
    let counting = Arc::new(CountingNative::new(HeapNative::new()));
    let api: SharedNative = counting.clone();

    let channel = EventChannel::builder(api.clone())
        .config_from(&config)
        .flags(flags)
        .build();
    info!(
        max_event_args = channel.dispatcher().config().max_event_args,
        flags = %channel.flags(),
        "channel configured"
    );

    channel.add_listener(|event| info!(event = %render(event), "event.received"));
    channel.register_handler(
        "ping",
        |event| {
            let seq = event
                .parameter(0)
                .and_then(TypedValue::as_record)
                .and_then(|record| record.get_named("seq").ok().flatten())
                .and_then(|seq| seq.as_unsigned());
            let peer = event.user_data_as::<String>().map(String::as_str);
            info!(?seq, ?peer, "ping handled");
        },
        Some(Arc::new("loopback".to_owned()) as UserData),
    )?;
    channel.request_events()?;

    for seq in 0..cli.count {
        let record = Record::from_fields(
            api.clone(),
            [
                Field::new("seq", TypedValue::count(seq)),
                Field::new("src_time", TypedValue::time(Time::now())),
            ],
        )?;
        let mut event = OutboundEvent::new("ping");
        event
            .add_parameter(TypedValue::record(record))
            .add_parameter(TypedValue::port(Port::tcp(47758)));
        if !channel.send(&event)? {
            warn!(seq, "ping neither sent nor queued");
        }
    }

    if channel.queue_length() > 0 {
        let remaining = channel.flush_queue();
        info!(remaining, max = channel.queue_max_length(), "queue flushed");
    }

    channel.unregister_for_event("ping");
    drop(channel);
    info!(
        allocations = counting.allocations(),
        releases = counting.releases(),
        "native collections accounted"
    );
    Ok(())
}
