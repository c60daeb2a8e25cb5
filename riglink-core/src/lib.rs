// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Riglink Core Library
//!
//! This crate implements the remote control link that lets a headless radio
//! *host* (which owns the SDR hardware and its sample streams) be operated by a
//! separate control *head* (which owns the operator interface) across an IP network.
//!
//! # Architecture
//!
//! The library is organized into modules representing core concerns:
//! - `codec`: Semicolon-delimited, newline-terminated record framing
//! - `auth`: HMAC-SHA3-256 challenge/response handshake
//! - `link`: TCP control channel (connect, accept, shared send path, heartbeat clock)
//! - `cw`: CW key event timestamping (head) and jitter-absorbing replay queue (host)
//! - `command`: Typed view of the record vocabulary
//! - `host` / `head`: Session state machines for both roles
//! - `media`: Start/stop orchestration of the external UDP media engine
//! - `supervisor`: Periodic drivers (10 Hz control tick, fast I/O pass, CW poller)
//! - `adapter`: Interfaces to the radio, the operator UI and the media engine
//! - `config`, `error`, `stats`: Ambient concerns
//!
//! # Ports
//!
//! Only the base port is configurable. The control channel uses `base` (TCP),
//! the graph/waterfall stream `base + 1` (UDP) and radio sound plus microphone
//! `base + 2` (UDP).

pub mod adapter;
pub mod auth;
pub mod codec;
pub mod command;
pub mod config;
pub mod cw;
pub mod error;
pub mod head;
pub mod host;
pub mod link;
pub mod media;
pub mod stats;
pub mod supervisor;

pub use codec::{Record, RecordDecoder};
pub use command::Command;
pub use config::{PortTriple, RemoteConfig};
pub use error::{Error, Result};

use std::time::Duration;

/// Library version for log banners
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default control port; graph and sound streams use the next two ports
pub const DEFAULT_BASE_PORT: u16 = 4585;

/// Maximum bytes taken from the socket per read attempt (1 KiB)
pub const READ_CHUNK_SIZE: usize = 1024;

/// Connect timeout for a single attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

/// Time the head has to answer the challenge
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause imposed on the head after a wrong challenge response
pub const AUTH_RETRY_PENALTY: Duration = Duration::from_secs(1);

/// Heartbeat emission period at the head, also the reconnect period
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Supervisor tick period (10 Hz)
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Default period of the socket read/flush pass (500 Hz)
pub const IO_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// IP type-of-service byte for DSCP Expedited Forwarding (46 << 2)
pub const TOS_EXPEDITED_FORWARDING: u32 = 0xB8;
