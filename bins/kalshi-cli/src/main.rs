//! Kalshi data CLI
//!
//! Commands:
//! - `balance`, `market`, `event`, `series`: print a single resource
//! - `markets`, `events`, `trades`: page through a listing into JSONL
//! - `analyze`: count JSON value types per key in a JSONL dump
//! - `stream`: subscribe to WebSocket channels and print messages
//! - `notify`: send an SMS through Twilio
//!
//! # Usage
//! ```bash
//! # Credentials for every API command
//! KALSHI_ENV=demo KALSHI_KEY_ID=... KALSHI_PRIVATE_KEY_PATH=key.pem
//!
//! kalshi markets --status open --out data/markets.jsonl
//! kalshi trades --ticker FED-24DEC-T4.50 --min-ts 2024-01-01T00:00:00Z --out data/trades.jsonl
//! kalshi analyze --input data/trades.jsonl
//! kalshi stream --channel ticker --limit 100
//!
//! # Twilio (TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN, TWILIO_PHONE_NUMBER)
//! kalshi notify --to +15551234567 --message "market moved"
//! ```

mod analyze;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use kalshi_client::notify::{TwilioConfig, TwilioNotifier};
use kalshi_client::{
    ChannelHandler, GetEventsParams, GetMarketsParams, GetTradesParams, KalshiConfig, KalshiHttpClient,
    KalshiWsClient, MarketStatus, MessageStats, PageOptions, StreamEvent, WsInboundMessage,
};

/// Records buffered before each write to the output file
const BATCH_SIZE: usize = 1000;

#[derive(Parser)]
#[command(name = "kalshi")]
#[command(about = "Kalshi trade API data CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the portfolio balance
    Balance,

    /// Print one market as JSON
    Market {
        #[arg(long)]
        id: String,
    },

    /// Print one event as JSON
    Event {
        #[arg(long)]
        id: String,
    },

    /// Print one series as JSON
    Series {
        #[arg(long)]
        id: String,
    },

    /// Dump markets to JSONL
    Markets {
        /// open, closed, unopened or settled
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        event: Option<String>,

        #[arg(long)]
        series: Option<String>,

        /// Maximum records to fetch (default: all)
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, default_value = "data/markets.jsonl")]
        out: PathBuf,
    },

    /// Dump events to JSONL
    Events {
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        series: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, default_value = "data/events.jsonl")]
        out: PathBuf,
    },

    /// Dump trades for a market to JSONL
    Trades {
        #[arg(long)]
        ticker: String,

        /// Lower bound (RFC 3339 or unix seconds)
        #[arg(long)]
        min_ts: Option<String>,

        /// Upper bound (RFC 3339 or unix seconds)
        #[arg(long)]
        max_ts: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// Output file (default: data/trades/<TICKER>.jsonl)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Count JSON value types per key in a JSONL file
    Analyze {
        #[arg(long)]
        input: PathBuf,
    },

    /// Subscribe to WebSocket channels and print messages
    Stream {
        /// Channel to subscribe to. Can specify multiple times.
        #[arg(long = "channel", default_value = "ticker")]
        channels: Vec<String>,

        /// Restrict to these market tickers. Can specify multiple times.
        #[arg(long = "market-ticker")]
        market_tickers: Vec<String>,

        /// Maximum messages to collect (0 = unlimited until Ctrl+C)
        #[arg(long, default_value = "0")]
        limit: u64,
    },

    /// Send an SMS notification
    Notify {
        /// Recipient in E.164 format. Can specify multiple times.
        #[arg(long, required = true)]
        to: Vec<String>,

        #[arg(long)]
        message: String,

        /// Media URL for MMS. Can specify multiple times.
        #[arg(long)]
        media_url: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    // Setup Ctrl+C handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, shutting down...");
        shutdown_clone.store(true, Ordering::Relaxed);
    });

    match cli.command {
        Commands::Balance => run_balance().await,
        Commands::Market { id } => {
            let market = http_client()?.get_market(&id).await?;
            println!("{}", serde_json::to_string_pretty(&market)?);
            Ok(())
        }
        Commands::Event { id } => {
            let (event, markets) = http_client()?.get_event(&id).await?;
            let output = serde_json::json!({ "event": event, "markets": markets });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Commands::Series { id } => {
            let series = http_client()?.get_series(&id).await?;
            println!("{}", serde_json::to_string_pretty(&series)?);
            Ok(())
        }
        Commands::Markets { status, event, series, limit, out } => {
            let params = GetMarketsParams {
                status: parse_status(status.as_deref())?,
                event_ticker: event,
                series_ticker: series,
                ..Default::default()
            };
            let markets = http_client()?.get_markets(&params, page_options(limit))?;
            let total = write_jsonl(markets, &out, &shutdown).await?;
            info!("Wrote {} markets to {}", total, out.display());
            Ok(())
        }
        Commands::Events { status, series, limit, out } => {
            let params = GetEventsParams {
                status: parse_status(status.as_deref())?,
                series_ticker: series,
                ..Default::default()
            };
            let events = http_client()?.get_events(&params, page_options(limit))?;
            let total = write_jsonl(events, &out, &shutdown).await?;
            info!("Wrote {} events to {}", total, out.display());
            Ok(())
        }
        Commands::Trades { ticker, min_ts, max_ts, limit, out } => {
            run_trades(ticker, min_ts, max_ts, limit, out, shutdown).await
        }
        Commands::Analyze { input } => run_analyze(&input).await,
        Commands::Stream { channels, market_tickers, limit } => {
            run_stream(channels, market_tickers, limit, shutdown).await
        }
        Commands::Notify { to, message, media_url } => run_notify(to, message, media_url).await,
    }
}

fn load_config() -> Result<KalshiConfig> {
    KalshiConfig::from_env().context("Failed to load Kalshi configuration (set KALSHI_KEY_ID and KALSHI_PRIVATE_KEY_PATH)")
}

fn http_client() -> Result<KalshiHttpClient> {
    let config = load_config()?;
    info!("Environment: {:?}, base URL: {}", config.environment, config.base_url);
    Ok(KalshiHttpClient::new(&config)?)
}

fn page_options(limit: Option<usize>) -> PageOptions {
    match limit {
        Some(limit) => PageOptions::with_limit(limit),
        None => PageOptions::default(),
    }
}

fn parse_status(status: Option<&str>) -> Result<Option<MarketStatus>> {
    status
        .map(|s| MarketStatus::parse(s).ok_or_else(|| anyhow!("Unknown status '{}' (open, closed, unopened, settled)", s)))
        .transpose()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(secs) = s.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow!("Timestamp out of range: {}", s));
    }
    let parsed = DateTime::parse_from_rfc3339(s).with_context(|| format!("Invalid timestamp: {}", s))?;
    Ok(parsed.with_timezone(&Utc))
}

/// Drain a record stream into a JSONL file, writing every `BATCH_SIZE` records
async fn write_jsonl<T, S>(stream: S, out: &Path, shutdown: &AtomicBool) -> Result<usize>
where
    T: serde::Serialize,
    S: Stream<Item = kalshi_client::Result<T>>,
{
    // Ensure output directory exists
    if let Some(parent) = out.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(out).await?;

    let mut stream = std::pin::pin!(stream);
    let mut batch: Vec<String> = Vec::with_capacity(BATCH_SIZE);
    let mut total = 0usize;

    while let Some(record) = stream.next().await {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                flush_batch(&mut file, &mut batch).await?;
                return Err(e.into());
            }
        };
        batch.push(serde_json::to_string(&record)?);
        total += 1;

        if batch.len() == BATCH_SIZE {
            info!("Writing batch ({} records so far)", total);
            flush_batch(&mut file, &mut batch).await?;
        }
        if shutdown.load(Ordering::Relaxed) {
            warn!("Interrupted after {} records", total);
            break;
        }
    }

    flush_batch(&mut file, &mut batch).await?;
    file.flush().await?;
    Ok(total)
}

async fn flush_batch(file: &mut tokio::fs::File, batch: &mut Vec<String>) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let mut chunk = batch.join("\n");
    chunk.push('\n');
    file.write_all(chunk.as_bytes()).await?;
    batch.clear();
    Ok(())
}

async fn run_balance() -> Result<()> {
    let client = http_client()?;
    let balance = client.get_portfolio_balance().await?;
    println!("Balance: ${:.2} ({} cents)", balance as f64 / 100.0, balance);
    Ok(())
}

async fn run_trades(
    ticker: String,
    min_ts: Option<String>,
    max_ts: Option<String>,
    limit: Option<usize>,
    out: Option<PathBuf>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let out = out.unwrap_or_else(|| PathBuf::from("data/trades").join(format!("{}.jsonl", ticker.replace('/', "_"))));

    let mut params = GetTradesParams::for_ticker(&ticker);
    params.min_ts = min_ts.as_deref().map(parse_timestamp).transpose()?;
    params.max_ts = max_ts.as_deref().map(parse_timestamp).transpose()?;

    info!("=== Trades ===");
    info!("Ticker: {}", ticker);
    info!("Range: {:?} .. {:?}", params.min_ts, params.max_ts);
    info!("Output: {}", out.display());

    let trades = http_client()?.get_trades(&params, page_options(limit))?;
    let total = write_jsonl(trades, &out, &shutdown).await?;
    info!("Got {} trades for {}", total, ticker);
    Ok(())
}

async fn run_analyze(input: &Path) -> Result<()> {
    let file = tokio::fs::File::open(input).await.with_context(|| format!("Failed to open {}", input.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut records = Vec::new();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(Value::Object(map)) => records.push(map),
            Ok(_) => warn!("Line {}: not a JSON object, skipped", line_no),
            Err(e) => warn!("Line {}: invalid JSON, skipped: {}", line_no, e),
        }
    }

    info!("Analyzed {} records from {}", records.len(), input.display());
    for (key, types) in analyze::analyze_json_types(&records) {
        println!("{}:", key);
        for (type_name, count) in types {
            println!("\t{}: {}", type_name, count);
        }
    }
    Ok(())
}

async fn run_stream(
    channels: Vec<String>,
    market_tickers: Vec<String>,
    limit: u64,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let config = load_config()?;
    let mut client = KalshiWsClient::new(&config)?.with_channels(channels.clone());
    if !market_tickers.is_empty() {
        client = client.with_market_tickers(market_tickers);
    }

    info!("=== Stream ===");
    info!("Endpoint: {}", client.endpoint());
    info!("Channels: {:?}", channels);
    info!("Limit: {} (0 = unlimited)", limit);
    info!("Press Ctrl+C to stop");

    let (mut handler, mut rx) = ChannelHandler::new();
    let task = tokio::spawn(async move { client.connect(&mut handler).await });

    let mut stats = MessageStats::new();
    while !shutdown.load(Ordering::Relaxed) {
        let event = match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => continue,
        };

        match event {
            StreamEvent::Opened => info!("Connected"),
            StreamEvent::Message(text) => {
                println!("{}", text);
                stats.record(&WsInboundMessage::parse(&text));
                if limit > 0 && stats.total_messages >= limit {
                    info!("Reached limit of {} messages", limit);
                    break;
                }
            }
            StreamEvent::Error(e) => error!("Stream error: {}", e),
            StreamEvent::Closed(close) => {
                info!("Connection closed: {:?}", close);
                break;
            }
        }
    }

    if task.is_finished() {
        if let Ok(Err(e)) = task.await {
            error!("Stream ended with error: {}", e);
        }
    } else {
        task.abort();
    }

    // Print summary
    info!("");
    info!("=== Summary ===");
    info!("Total messages: {}", stats.total_messages);
    info!("Parsed OK: {}", stats.parsed_ok);
    info!("Unknown type count: {}", stats.unknown_type_count);
    info!("Last message type: {:?}", stats.last_message_type);
    info!("");
    info!("Message type distribution:");
    let mut types: Vec<_> = stats.type_counts.iter().collect();
    types.sort_by(|a, b| b.1.cmp(a.1));
    for (msg_type, count) in types {
        info!("  {}: {}", msg_type, count);
    }

    Ok(())
}

async fn run_notify(to: Vec<String>, message: String, media_urls: Vec<String>) -> Result<()> {
    let config = TwilioConfig::from_env()?;
    let notifier = TwilioNotifier::new(config)?;

    let mut failures = 0;
    for delivery in notifier.send_bulk(&to, &message, &media_urls).await {
        match delivery.outcome {
            Ok(result) => info!("{}: {} ({})", delivery.to, result.status, result.sid),
            Err(e) => {
                error!("{}: {}", delivery.to, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} messages failed", failures, to.len());
    }
    Ok(())
}
