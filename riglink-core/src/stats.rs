// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Link statistics

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const LATENCY_SAMPLES_MAX: usize = 10_000;

/// Shared counters for one link endpoint
#[derive(Clone)]
pub struct LinkStats {
    inner: Arc<StatsInner>,
}

struct StatsInner {
    start_time: Instant,

    records_sent: AtomicU64,
    records_received: AtomicU64,
    send_failures: AtomicU64,
    protocol_errors: AtomicU64,
    auth_failures: AtomicU64,
    sessions: AtomicU64,
    ui_events_dropped: AtomicU64,

    cw_released: AtomicU64,
    // Release lateness (microseconds)
    cw_lateness: RwLock<Vec<u64>>,
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatsInner {
                start_time: Instant::now(),
                records_sent: AtomicU64::new(0),
                records_received: AtomicU64::new(0),
                send_failures: AtomicU64::new(0),
                protocol_errors: AtomicU64::new(0),
                auth_failures: AtomicU64::new(0),
                sessions: AtomicU64::new(0),
                ui_events_dropped: AtomicU64::new(0),
                cw_released: AtomicU64::new(0),
                cw_lateness: RwLock::new(Vec::with_capacity(1024)),
            }),
        }
    }

    pub fn record_sent(&self) {
        self.inner.records_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.inner.records_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.inner.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_error(&self) {
        self.inner.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.inner.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session(&self) {
        self.inner.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ui_event_dropped(&self) {
        self.inner.ui_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cw_release(&self, lateness_micros: u64) {
        self.inner.cw_released.fetch_add(1, Ordering::Relaxed);

        let mut samples = self.inner.cw_lateness.write();
        samples.push(lateness_micros);
        if samples.len() > LATENCY_SAMPLES_MAX {
            samples.drain(0..LATENCY_SAMPLES_MAX / 2);
        }
    }

    pub fn records_sent(&self) -> u64 {
        self.inner.records_sent.load(Ordering::Relaxed)
    }

    pub fn records_received(&self) -> u64 {
        self.inner.records_received.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.inner.send_failures.load(Ordering::Relaxed)
    }

    pub fn protocol_errors(&self) -> u64 {
        self.inner.protocol_errors.load(Ordering::Relaxed)
    }

    pub fn auth_failures(&self) -> u64 {
        self.inner.auth_failures.load(Ordering::Relaxed)
    }

    pub fn sessions(&self) -> u64 {
        self.inner.sessions.load(Ordering::Relaxed)
    }

    pub fn ui_events_dropped(&self) -> u64 {
        self.inner.ui_events_dropped.load(Ordering::Relaxed)
    }

    pub fn cw_released(&self) -> u64 {
        self.inner.cw_released.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    pub fn cw_lateness_percentile(&self, percentile: f64) -> Option<u64> {
        let samples = self.inner.cw_lateness.read();
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.clone();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile).ceil() as usize).min(sorted.len() - 1);
        Some(sorted[index])
    }

    pub fn cw_lateness_p50(&self) -> Option<u64> {
        self.cw_lateness_percentile(0.50)
    }

    pub fn cw_lateness_p99(&self) -> Option<u64> {
        self.cw_lateness_percentile(0.99)
    }

    /// Snapshot for shutdown logging
    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            uptime_seconds: self.uptime_seconds(),
            sessions: self.sessions(),
            records_sent: self.records_sent(),
            records_received: self.records_received(),
            send_failures: self.send_failures(),
            protocol_errors: self.protocol_errors(),
            auth_failures: self.auth_failures(),
            ui_events_dropped: self.ui_events_dropped(),
            cw_released: self.cw_released(),
            cw_lateness_p50_us: self.cw_lateness_p50(),
            cw_lateness_p99_us: self.cw_lateness_p99(),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSummary {
    pub uptime_seconds: u64,
    pub sessions: u64,
    pub records_sent: u64,
    pub records_received: u64,
    pub send_failures: u64,
    pub protocol_errors: u64,
    pub auth_failures: u64,
    pub ui_events_dropped: u64,
    pub cw_released: u64,
    pub cw_lateness_p50_us: Option<u64>,
    pub cw_lateness_p99_us: Option<u64>,
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uptime={}s sessions={} sent={} received={} send_failures={} protocol_errors={} auth_failures={} ui_dropped={} cw_released={}",
            self.uptime_seconds,
            self.sessions,
            self.records_sent,
            self.records_received,
            self.send_failures,
            self.protocol_errors,
            self.auth_failures,
            self.ui_events_dropped,
            self.cw_released,
        )?;
        if let (Some(p50), Some(p99)) = (self.cw_lateness_p50_us, self.cw_lateness_p99_us) {
            write!(f, " cw_lateness_p50={}us cw_lateness_p99={}us", p50, p99)?;
        }
        Ok(())
    }
}
