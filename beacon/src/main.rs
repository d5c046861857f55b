//! beacon - record and deliver events from the command line
//!
//! Commands:
//! - `track`: queue one event (optionally delivering it right away)
//! - `flush`: deliver everything queued
//! - `status`: show configuration, queue size and the stored session
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/beacon/events.db (~/.local/share/beacon/events.db)
//! - Config: $XDG_CONFIG_HOME/beacon/config.toml (~/.config/beacon/config.toml)

use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_core::config::Method;
use beacon_core::{Config, Database, Payload, Tracker};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Record and deliver instrumentation events")]
#[command(version)]
struct Args {
    /// Write logs to the state directory
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue an event built from key=value fields
    Track {
        /// Event fields, e.g. `e=pv url=https://example.com`
        #[arg(required = true, value_parser = parse_field)]
        fields: Vec<(String, String)>,

        /// Deliver the queue before exiting
        #[arg(long)]
        send: bool,
    },

    /// Deliver every queued event, retrying until the queue is empty
    Flush,

    /// Show configuration and queue status
    Status,
}

fn parse_field(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(beacon_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Track { fields, send } => cmd_track(&config, fields, send),
        Command::Flush => cmd_flush(&config),
        Command::Status => cmd_status(&config),
    }
}

fn open_database() -> Result<Arc<Database>> {
    let db_path = Config::database_path();
    let db = Database::open_and_migrate(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    Ok(Arc::new(db))
}

fn build_tracker(config: &Config) -> Result<(Tracker, Arc<Database>)> {
    let db = open_database()?;
    let tracker = Tracker::from_config(config, Arc::clone(&db))
        .context("collector is not configured; see `beacon status`")?;
    Ok((tracker, db))
}

fn cmd_track(config: &Config, fields: Vec<(String, String)>, send: bool) -> Result<()> {
    let (tracker, db) = build_tracker(config)?;

    let payload: Payload = fields.into_iter().collect();
    let event_id = tracker.track(payload).context("failed to queue event")?;
    println!("Queued event {}", event_id);

    if send {
        deliver(&tracker, &db)?;
    }
    Ok(())
}

fn cmd_flush(config: &Config) -> Result<()> {
    let (tracker, db) = build_tracker(config)?;
    deliver(&tracker, &db)
}

/// Drain the queue and report from the queue itself once the flush returns.
fn deliver(tracker: &Tracker, db: &Database) -> Result<()> {
    let emitter = tracker.emitter();
    let queued = db.count_event_rows().context("failed to count queued events")?;
    println!("Sending {} queued event(s) to {}...", queued, emitter.url());

    emitter.start().context("failed to start emitter")?;
    emitter.flush();

    let remaining = db.count_event_rows().context("failed to count queued events")?;
    println!(
        "Queue drained: {} event(s) sent or dropped, {} remaining",
        queued.saturating_sub(remaining),
        remaining
    );
    tracing::info!(queued, remaining, "Flush complete");
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Beacon Configuration");
    println!("====================");
    println!();

    let network = &config.network;
    println!(
        "Collector:       {}",
        network.collector.as_deref().unwrap_or("<not set>")
    );
    match network.collector_url() {
        Ok(url) => println!("Endpoint:        {}", url),
        Err(e) => println!("Endpoint:        <invalid: {}>", e),
    }
    let method = match network.method {
        Method::Get => "GET",
        Method::Post => "POST",
    };
    println!("Method:          {}", method);
    println!("Timeout:         {}s", network.timeout_secs);
    println!("Batch Size:      {}", config.emitter.batch_size);
    println!(
        "Sessions:        {}",
        if config.session.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!();

    let db_path = Config::database_path();
    println!("Database:        {}", db_path.display());
    if !db_path.exists() {
        println!("Queued Events:   0");
        return Ok(());
    }

    let db = open_database()?;
    let queued = db.count_event_rows().context("failed to count queued events")?;
    println!("Queued Events:   {}", queued);

    match db.get_session_data().context("failed to read session record")? {
        Some(record) => {
            println!();
            println!("Session Record:");
            match serde_json::from_str::<serde_json::Value>(&record) {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) => println!("  <unreadable>"),
            }
        }
        None => println!("Session Record:  <none>"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field() {
        assert_eq!(
            parse_field("url=https://example.com/?a=b").unwrap(),
            ("url".to_string(), "https://example.com/?a=b".to_string())
        );
        assert_eq!(parse_field("se_la=").unwrap(), ("se_la".to_string(), String::new()));
        assert!(parse_field("novalue").is_err());
        assert!(parse_field("=x").is_err());
    }
}
