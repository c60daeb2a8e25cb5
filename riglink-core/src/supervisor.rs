// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Periodic drivers
//!
//! Each peer is driven by a 10 Hz tick for timers and connection management, plus a
//! fast I/O pass that drains the socket and flushes queued output. CW records are
//! therefore stamped within one I/O period of their arrival. The host additionally
//! runs a CW poller on its own "sound thread", so key releases are not quantized to
//! either cadence.

use crate::cw::CwScheduler;
use crate::{Result, IO_POLL_INTERVAL};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// One end of the link as seen by the supervisor
pub trait Peer {
    /// Socket work only: accept, drain reads, flush queued writes
    fn poll_io(&mut self, now: Instant);

    /// Periodic work: connection management and timers, after an I/O pass
    fn tick(&mut self, now: Instant);

    /// Graceful close on process shutdown
    fn shutdown(&mut self);
}

/// Runs a peer's tick and I/O pass until shutdown is requested
pub struct Supervisor {
    period: Duration,
    io_period: Duration,
}

impl Supervisor {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            io_period: IO_POLL_INTERVAL,
        }
    }

    pub fn with_io_period(mut self, io_period: Duration) -> Self {
        self.io_period = io_period;
        self
    }

    /// Drive `peer` until `shutdown` resolves; returns the control tick count
    ///
    /// Overrunning ticks delay the schedule instead of bursting to catch up.
    pub async fn run<P, F>(&self, peer: &mut P, shutdown: F) -> u64
    where
        P: Peer,
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut io = tokio::time::interval(self.io_period);
        io.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested after {} ticks", ticks);
                    break;
                }
                _ = interval.tick() => {
                    peer.tick(Instant::now());
                    ticks += 1;
                }
                _ = io.tick() => peer.poll_io(Instant::now()),
            }
        }

        peer.shutdown();
        ticks
    }
}

/// Host sound thread that releases due CW events
pub struct CwPoller {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CwPoller {
    /// Start polling `cw` every `period`, driving the key line through `set_key`
    pub fn spawn<F>(cw: CwScheduler, period: Duration, mut set_key: F) -> Result<Self>
    where
        F: FnMut(bool) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::Builder::new()
            .name("cw-sound".to_string())
            .spawn(move || {
                debug!("CW poller running every {:?}", period);
                while !stop_flag.load(Ordering::Acquire) {
                    cw.poll(Instant::now(), &mut set_key);
                    thread::sleep(period);
                }
                debug!("CW poller stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CwPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cw::CwEvent;
    use crate::stats::LinkStats;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CountingPeer {
        ticks: u64,
        io_passes: u64,
        shut_down: bool,
    }

    impl Peer for CountingPeer {
        fn poll_io(&mut self, _now: Instant) {
            self.io_passes += 1;
        }

        fn tick(&mut self, _now: Instant) {
            self.ticks += 1;
        }

        fn shutdown(&mut self) {
            self.shut_down = true;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_ticks_until_shutdown() {
        let mut peer = CountingPeer::default();
        let supervisor = Supervisor::new(Duration::from_millis(100)).with_io_period(Duration::from_millis(5));
        let ticks = supervisor
            .run(&mut peer, tokio::time::sleep(Duration::from_millis(350)))
            .await;

        assert_eq!(ticks, peer.ticks);
        assert!((3..=4).contains(&ticks), "ticks = {}", ticks);
        // The I/O pass runs far more often than the control tick
        assert!(peer.io_passes >= 60, "io passes = {}", peer.io_passes);
        assert!(peer.shut_down);
    }

    #[test]
    fn test_cw_poller_releases_due_events() {
        let stats = LinkStats::new();
        let cw = CwScheduler::new(Duration::from_millis(10), Duration::from_secs(1), stats.clone());
        let keys = Arc::new(Mutex::new(Vec::new()));
        let sink = keys.clone();

        let mut poller = CwPoller::spawn(cw.clone(), Duration::from_millis(2), move |down| {
            sink.lock().push(down)
        })
        .unwrap();

        let now = Instant::now();
        cw.push(CwEvent::PHRASE_START, now, |_| {});
        cw.push(CwEvent { down: false, offset_ms: 20 }, now, |_| {});

        let deadline = Instant::now() + Duration::from_secs(2);
        while keys.lock().len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        poller.stop();

        assert_eq!(*keys.lock(), vec![true, false]);
        assert_eq!(stats.cw_released(), 2);
    }
}
