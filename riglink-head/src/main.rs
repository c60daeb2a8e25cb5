// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Riglink Head - Operator Side of the Remote Control Link
//!
//! The head dials the radio host, answers its challenge and replays the operator's
//! state, then forwards operator commands as they happen. This console build reads
//! records from standard input, one per line:
//!
//! ```text
//! FREQ;1500;7074000;Operator;40;None;0
//! 20;1
//! USB;5
//! key down
//! key up
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use riglink_core::{
    adapter::{MediaEngine, UiAdapter, UiStatus},
    command::{HwReadout, RadioSnapshot, Vocabulary},
    cw::CwSender,
    error::ProtocolErrorKind,
    head::{CommandSender, HeadSession},
    media::MediaPlan,
    stats::LinkStats,
    supervisor::Supervisor,
    Command, Record, RemoteConfig, TICK_INTERVAL, VERSION,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "riglink-head")]
#[command(about = "Riglink Head - Operates a remote radio host", long_about = None)]
struct Args {
    /// Path to configuration file (ignored if --env-mode is set)
    #[arg(short, long, default_value = "config/head.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Load configuration from environment variables instead of file
    #[arg(long, default_value = "false")]
    env_mode: bool,
}

/// Operator interface that reports to the log
///
/// The snapshot is shared with the console thread, which folds every command the
/// operator types into it, so a reconnect replays the operator's latest settings.
struct ConsoleUi {
    snapshot: Arc<Mutex<RadioSnapshot>>,
}

impl UiAdapter for ConsoleUi {
    fn snapshot(&self) -> RadioSnapshot {
        self.snapshot.lock().clone()
    }

    fn set_status(&mut self, status: &UiStatus) {
        if status.is_error() {
            error!("{}", status);
        } else {
            info!("{}", status);
        }
    }

    fn show_s_meter(&mut self, text: &str) {
        debug!("S-meter: {}", text);
    }

    fn show_hw_readout(&mut self, readout: &HwReadout) {
        info!("{}: {}", readout.key, readout.fields.join(" "));
    }

    fn show_error_reply(&mut self, kind: ProtocolErrorKind, echo: Option<&Record>) {
        match echo {
            Some(record) => warn!("Host rejected '{}': {}", record, kind.reply_head()),
            None => warn!("Host rejected a record: {}", kind.reply_head()),
        }
    }
}

/// Media engine stand-in that only reports where streams would go
#[derive(Debug, Default)]
struct LoggingMedia;

impl MediaEngine for LoggingMedia {
    fn start(&mut self, plan: &MediaPlan) -> riglink_core::Result<()> {
        info!(
            "Media streams from {}: graph udp/{}, sound udp/{}, mic udp/{}",
            plan.peer, plan.graph_port, plan.sound_port, plan.mic_port
        );
        Ok(())
    }

    fn stop(&mut self) {
        info!("Media streams stopped");
    }
}

/// Read operator input on its own thread until stdin closes
fn spawn_console(
    commands: CommandSender,
    cw: CwSender,
    snapshot: Arc<Mutex<RadioSnapshot>>,
    vocab: Vocabulary,
) -> Result<()> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        break;
                    }
                };
                let line = line.trim();
                let result = match line {
                    "" => continue,
                    "key down" => cw.key(true),
                    "key up" => cw.key(false),
                    "key stop" => cw.stop(),
                    _ => {
                        let record = Record::from_line(line);
                        match Command::parse(&record, &vocab) {
                            Ok(command) => snapshot.lock().apply(&command),
                            // Still sent, so the host's error reply reaches the operator
                            Err(e) => debug!("Not tracked in the snapshot: {}", e),
                        }
                        commands.submit(record);
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    warn!("CW send failed: {}", e);
                }
            }
            debug!("Console input closed");
        })
        .context("Failed to start console thread")?;
    Ok(())
}

/// Wait for shutdown signal
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use futures::stream::StreamExt;
        use signal_hook::consts::signal::*;
        use signal_hook_tokio::Signals;

        match Signals::new([SIGINT, SIGTERM]) {
            Ok(mut signals) => {
                if let Some(signal) = signals.next().await {
                    info!("Received signal: {:?}", signal);
                }
            }
            Err(e) => {
                error!("Failed to register signal handlers: {}", e);
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    #[cfg(windows)]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = args.log_level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Riglink Head v{}", VERSION);

    // Load configuration
    let config = if args.env_mode {
        info!("Loading configuration from environment variables");
        RemoteConfig::from_env().context("Failed to load configuration from environment")?
    } else {
        info!("Loading configuration from file: {:?}", args.config);
        RemoteConfig::from_file(&args.config).context("Failed to load configuration from file")?
    };

    info!("Remote radio: {}", config.remote_radio_ip);

    let snapshot = Arc::new(Mutex::new(RadioSnapshot::default()));
    let ui = ConsoleUi {
        snapshot: snapshot.clone(),
    };
    let stats = LinkStats::new();
    let mut head =
        HeadSession::new(&config, ui, LoggingMedia, stats.clone()).context("Failed to create head session")?;

    spawn_console(
        head.command_sender(),
        head.cw_sender(),
        snapshot,
        Vocabulary::from_config(&config),
    )?;

    let ticks = Supervisor::new(TICK_INTERVAL)
        .with_io_period(config.io_poll_interval())
        .run(&mut head, wait_for_shutdown())
        .await;

    info!("Final statistics after {} ticks: {}", ticks, stats.summary());
    info!("Head shut down gracefully");
    Ok(())
}
