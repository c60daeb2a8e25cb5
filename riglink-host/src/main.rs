// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Riglink Host - Radio Side of the Remote Control Link
//!
//! The host runs next to the SDR hardware. It listens for one control head, checks
//! the head's answer to a fresh challenge, then applies the head's commands to the
//! radio and replays CW keying with a fixed delay to absorb network jitter.
//!
//! # Features
//!
//! - HMAC-SHA3-256 challenge/response authentication
//! - Heartbeat supervision of the head
//! - Delayed CW replay on a dedicated sound thread
//! - Media engine start/stop tied to the session

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use riglink_core::{
    adapter::{MediaEngine, RadioAdapter},
    command::{AgcSquelch, AppCall, Button, FreqUpdate, MenuItem, Mode, Slider},
    host::HostSession,
    media::MediaPlan,
    stats::LinkStats,
    supervisor::{CwPoller, Supervisor},
    RemoteConfig, TICK_INTERVAL, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "riglink-host")]
#[command(about = "Riglink Host - Exposes a local radio to a remote control head", long_about = None)]
struct Args {
    /// Path to configuration file (ignored if --env-mode is set)
    #[arg(short, long, default_value = "config/host.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Load configuration from environment variables instead of file
    #[arg(long, default_value = "false")]
    env_mode: bool,
}

/// Radio stand-in that records the last applied state and logs every change
#[derive(Debug, Default)]
struct LoggingRadio {
    vfo: i64,
    tune: i64,
    band: String,
    mode: Option<Mode>,
    key_down: bool,
    ptt: bool,
}

impl RadioAdapter for LoggingRadio {
    fn set_tuning(&mut self, freq: &FreqUpdate) {
        self.vfo = freq.vfo;
        self.tune = freq.tune;
        info!(
            "Tuning: vfo {} Hz, offset {} Hz, band {} ({})",
            freq.vfo, freq.tune, freq.band, freq.source
        );
    }

    fn set_band(&mut self, band: &str) {
        self.band = band.to_string();
        info!("Band: {}", band);
    }

    fn set_mode(&mut self, mode: Mode, index: i32) {
        self.mode = Some(mode);
        info!("Mode: {} (index {})", mode.name(), index);
    }

    fn set_filter(&mut self, button: u8, value: i64) {
        info!("Filter button {} = {}", button, value);
    }

    fn set_filter_bandwidth(&mut self, hz: i64) {
        info!("Filter bandwidth: {} Hz", hz);
    }

    fn set_agc_squelch(&mut self, levels: &AgcSquelch) {
        debug!("AGC/squelch: {:?}", levels);
    }

    fn set_slider(&mut self, slider: Slider, value: i64) {
        debug!("Slider {} = {}", slider.name(), value);
    }

    fn set_menu(&mut self, item: &MenuItem) {
        debug!("Menu {}/{} checked={}", item.menu, item.item, item.checked);
    }

    fn set_button(&mut self, button: Button, value: i32) {
        info!("Button {} = {}", button.name(), value);
    }

    fn set_split(&mut self, on: bool) {
        info!("Split: {}", on);
    }

    fn set_cw_key(&mut self, down: bool) {
        if self.key_down != down {
            self.key_down = down;
            debug!("CW key {}", if down { "down" } else { "up" });
        }
    }

    fn set_ptt(&mut self, on: bool) {
        self.ptt = on;
        info!("PTT: {}", if on { "transmit" } else { "receive" });
    }

    fn app_call(&mut self, call: &AppCall) {
        info!("Application call: {:?}", call);
    }
}

/// Media engine stand-in that only reports where streams would go
#[derive(Debug, Default)]
struct LoggingMedia;

impl MediaEngine for LoggingMedia {
    fn start(&mut self, plan: &MediaPlan) -> riglink_core::Result<()> {
        info!(
            "Media streams to {}: graph udp/{}, sound udp/{}, mic udp/{}, width {}",
            plan.peer, plan.graph_port, plan.sound_port, plan.mic_port, plan.data_width
        );
        Ok(())
    }

    fn stop(&mut self) {
        info!("Media streams stopped");
    }
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

    info!("Riglink Host v{}", VERSION);

    // Load configuration
    let config = if args.env_mode {
        info!("Loading configuration from environment variables");
        RemoteConfig::from_env().context("Failed to load configuration from environment")?
    } else {
        info!("Loading configuration from file: {:?}", args.config);
        RemoteConfig::from_file(&args.config).context("Failed to load configuration from file")?
    };

    let ports = config.ports()?;
    info!(
        "Control port tcp/{} on {}, CW delay {:?}",
        ports.control, config.listen_address, config.cw_delay()
    );

    let radio = Arc::new(Mutex::new(LoggingRadio::default()));
    let stats = LinkStats::new();
    let mut host = HostSession::bind(&config, radio.clone(), LoggingMedia, stats.clone())
        .context("Failed to bind control port")?;
    info!("Listening on {}", host.local_addr()?);

    let key_radio = radio.clone();
    let mut poller = CwPoller::spawn(host.cw_scheduler(), config.cw_poll_interval(), move |down| {
        key_radio.lock().set_cw_key(down)
    })
    .context("Failed to start CW sound thread")?;

    let ticks = Supervisor::new(TICK_INTERVAL)
        .with_io_period(config.io_poll_interval())
        .run(&mut host, wait_for_shutdown())
        .await;

    poller.stop();

    info!("Final statistics after {} ticks: {}", ticks, stats.summary());
    info!("Host shut down gracefully");
    Ok(())
}
