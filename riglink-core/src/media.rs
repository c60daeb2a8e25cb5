// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Media orchestration
//!
//! The graph, sound and microphone streams belong to an external engine. This module
//! only decides when the engine runs and tells it where the peer is.

use crate::adapter::MediaEngine;
use crate::config::PortTriple;
use crate::Result;
use std::net::IpAddr;
use tracing::{info, warn};

/// Everything the media engine needs to know about a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaPlan {
    pub peer: IpAddr,
    /// UDP graph/waterfall stream (`base + 1`)
    pub graph_port: u16,
    /// UDP radio sound (`base + 2`)
    pub sound_port: u16,
    /// UDP microphone, sharing the sound port in the opposite direction
    pub mic_port: u16,
    /// Head display width in pixels
    pub data_width: u32,
}

impl MediaPlan {
    pub fn new(peer: IpAddr, ports: PortTriple, data_width: u32) -> Self {
        Self {
            peer,
            graph_port: ports.graph,
            sound_port: ports.sound,
            mic_port: ports.sound,
            data_width,
        }
    }
}

/// Starts the engine once per session and stops it on close
pub struct MediaOrchestrator<E: MediaEngine> {
    engine: E,
    ports: PortTriple,
    active: Option<MediaPlan>,
}

impl<E: MediaEngine> MediaOrchestrator<E> {
    pub fn new(engine: E, ports: PortTriple) -> Self {
        Self {
            engine,
            ports,
            active: None,
        }
    }

    /// Start streaming to `peer`; a second start while running is ignored
    pub fn start(&mut self, peer: IpAddr, data_width: u32) -> Result<()> {
        if let Some(plan) = &self.active {
            warn!("Media already running for {}, ignoring start", plan.peer);
            return Ok(());
        }
        let plan = MediaPlan::new(peer, self.ports, data_width);
        self.engine.start(&plan)?;
        info!(
            "Media started for {} (graph {}, sound {}, width {})",
            peer, plan.graph_port, plan.sound_port, data_width
        );
        self.active = Some(plan);
        Ok(())
    }

    /// Stop streaming; safe to call at any time
    pub fn stop(&mut self) {
        if let Some(plan) = self.active.take() {
            self.engine.stop();
            info!("Media stopped for {}", plan.peer);
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_plan(&self) -> Option<&MediaPlan> {
        self.active.as_ref()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}
