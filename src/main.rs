//! Caremind CLI
//!
//! Behavioral orchestration engine for proactive care reminders.

use caremind::config::Config;
use caremind::engine::Orchestrator;
use caremind::events::InboundEvent;
use caremind::reminders::HttpDeliveryClient;
use caremind::VERSION;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "caremind")]
#[command(version = VERSION)]
#[command(about = "Behavioral orchestration engine for proactive care reminders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSONL event file through the engine
    Replay {
        /// Path to a file with one inbound event per line
        events: PathBuf,

        /// Seconds between maintenance sweeps while replaying
        #[arg(long, default_value = "1")]
        sweep_secs: u64,
    },

    /// Run the HTTP server exposing the engine entry points
    #[cfg(feature = "server")]
    Serve {
        /// Port to bind (0 picks a free one)
        #[arg(long, default_value = "9004")]
        port: u16,
    },

    /// Show engine status and persisted counters
    Status,

    /// Show configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { events, sweep_secs } => {
            cmd_replay(events, sweep_secs);
        }
        #[cfg(feature = "server")]
        Commands::Serve { port } => {
            cmd_serve(port);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: could not load config ({e}), using defaults");
            Config::default()
        }
    }
}

fn cmd_replay(events: PathBuf, sweep_secs: u64) {
    println!("Caremind v{VERSION}");
    println!();

    let config = load_config();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: could not create directories: {e}");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error creating runtime: {e}");
            std::process::exit(1);
        }
    };

    let delivery = HttpDeliveryClient::new(config.delivery.clone());
    let engine = match Orchestrator::new(config, delivery) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("Error starting engine: {e}");
            std::process::exit(1);
        }
    };

    // Reader thread parses lines and feeds the loop over a channel, so a
    // slow disk never stalls sweep cadence.
    let (tx, rx) = crossbeam_channel::bounded::<InboundEvent>(256);
    let reader_path = events.clone();
    let reader = std::thread::spawn(move || {
        let file = match std::fs::File::open(&reader_path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Error opening {reader_path:?}: {e}");
                return;
            }
        };
        for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    eprintln!("Read error at line {}: {e}", line_no + 1);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<InboundEvent>(&line) {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => eprintln!("Skipping malformed event at line {}: {e}", line_no + 1),
            }
        }
    });

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    println!("Replaying events from {events:?}");
    println!("Press Ctrl+C to stop");
    println!();

    let mut last_sweep = Instant::now();
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                let user = event.user_id().to_string();
                match runtime.block_on(engine.ingest(event)) {
                    Ok(outcome) => {
                        let rendered = serde_json::to_string(&outcome)
                            .unwrap_or_else(|_| "{}".to_string());
                        println!("[{}] {user}: {rendered}", Utc::now().format("%H:%M:%S"));
                    }
                    Err(e) => {
                        eprintln!("[{}] {user}: rejected: {e}", Utc::now().format("%H:%M:%S"));
                    }
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                break;
            }
        }

        if last_sweep.elapsed() >= Duration::from_secs(sweep_secs.max(1)) {
            runtime.block_on(engine.sweep(Utc::now()));
            last_sweep = Instant::now();
        }
    }

    let _ = reader.join();

    // final sweep settles anything already due
    runtime.block_on(engine.sweep(Utc::now()));

    if let Err(e) = engine.stats().save() {
        eprintln!("Warning: could not save stats: {e}");
    }

    println!();
    println!("{}", engine.stats().summary());
}

#[cfg(feature = "server")]
fn cmd_serve(port: u16) {
    let config = load_config();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: could not create directories: {e}");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error creating runtime: {e}");
            std::process::exit(1);
        }
    };

    let result: anyhow::Result<()> = runtime.block_on(async {
        let delivery = HttpDeliveryClient::new(config.delivery.clone());
        let engine = Arc::new(Orchestrator::new(config, delivery)?);

        // maintenance loop runs alongside the server
        tokio::spawn(engine.clone().run());

        let (addr, shutdown_tx) = caremind::server::run(engine.clone(), port).await?;
        println!("Caremind v{VERSION} listening on http://{addr}");
        println!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c().await?;
        let _ = shutdown_tx.send(());

        if let Err(e) = engine.stats().save() {
            eprintln!("Warning: could not save stats: {e}");
        }
        println!();
        println!("{}", engine.stats().summary());
        Ok(())
    });

    if let Err(e) = result {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}

fn cmd_status() {
    let config = load_config();

    println!("Caremind Status");
    println!("===============");
    println!();
    println!("Configuration:");
    println!("  Timezone: {}", config.timezone);
    println!("  Stale timeout: {}s", config.stale_timeout.as_secs());
    println!(
        "  Delivery service: {}",
        config.delivery.url()
    );
    println!("  Data path: {:?}", config.data_path);
    println!();

    let stats_path = config.data_path.join("stats.json");
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Last session counters:");
                for key in [
                    "events_ingested",
                    "sessions_started",
                    "sessions_resolved",
                    "reminders_scheduled",
                    "reminders_fired",
                    "anomalies_flagged",
                ] {
                    if let Some(v) = stats.get(key) {
                        println!("  {key}: {v}");
                    }
                }
            }
        }
    } else {
        println!("No previous session data found.");
    }

    let queue_path = config.data_path.join("pending_reminders.json");
    if queue_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&queue_path) {
            if let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(&content) {
                println!();
                println!("Degraded reminders awaiting retry: {}", entries.len());
            }
        }
    }
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
