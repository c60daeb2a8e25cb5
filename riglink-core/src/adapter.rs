// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Interfaces to the radio, the operator UI and the media engine
//!
//! The link never owns widgets or hardware. The host commands an opaque
//! [`RadioAdapter`], the head reads operator state from and writes display state to a
//! [`UiAdapter`], and both start and stop an external [`MediaEngine`].
//!
//! UI updates may originate on any thread. They are posted through a [`UiNotifier`]
//! and applied on the UI thread by [`UiEvents::drain_into`].

use crate::codec::Record;
use crate::command::{AgcSquelch, AppCall, Button, FreqUpdate, HwReadout, MenuItem, Mode, RadioSnapshot, Slider};
use crate::error::ProtocolErrorKind;
use crate::media::MediaPlan;
use crate::stats::LinkStats;
use crate::Result;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::fmt;

/// Default capacity of the UI event channel
pub const UI_CHANNEL_CAPACITY: usize = 256;

/// Host-side radio control
///
/// Setters are fire-and-forget; the link does not verify that the radio followed.
pub trait RadioAdapter: Send {
    fn set_tuning(&mut self, freq: &FreqUpdate);
    fn set_band(&mut self, band: &str);
    fn set_mode(&mut self, mode: Mode, index: i32);
    fn set_filter(&mut self, button: u8, value: i64);
    fn set_filter_bandwidth(&mut self, hz: i64);
    fn set_agc_squelch(&mut self, levels: &AgcSquelch);
    fn set_slider(&mut self, slider: Slider, value: i64);
    fn set_menu(&mut self, item: &MenuItem);
    fn set_button(&mut self, button: Button, value: i32);
    fn set_split(&mut self, on: bool);
    fn set_cw_key(&mut self, down: bool);
    fn set_ptt(&mut self, on: bool);
    fn app_call(&mut self, call: &AppCall);

    /// True when transmitting would use a repeater offset
    fn repeater_offset_active(&self) -> bool {
        false
    }

    /// Current S-meter text, if the radio has one
    fn s_meter(&self) -> Option<String> {
        None
    }

    /// Current hardware readouts
    fn hw_readouts(&self) -> Vec<HwReadout> {
        Vec::new()
    }
}

/// Head-side operator interface
pub trait UiAdapter: Send {
    /// Current operator state, used for the initial state dump
    fn snapshot(&self) -> RadioSnapshot;

    fn set_status(&mut self, status: &UiStatus);

    fn show_s_meter(&mut self, text: &str);

    fn show_hw_readout(&mut self, readout: &HwReadout);

    /// The host rejected a record
    fn show_error_reply(&mut self, _kind: ProtocolErrorKind, _echo: Option<&Record>) {}
}

/// External owner of the UDP graph, sound and microphone streams
pub trait MediaEngine: Send {
    fn start(&mut self, plan: &MediaPlan) -> Result<()>;
    fn stop(&mut self);
}

/// Connection status shown to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiStatus {
    NotConnected(String),
    Connecting(String),
    Connected(String),
    ChallengeFailed(String),
    RemoteHasNoPassword(String),
    NoLocalPassword(String),
}

impl UiStatus {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            UiStatus::ChallengeFailed(_) | UiStatus::RemoteHasNoPassword(_) | UiStatus::NoLocalPassword(_)
        )
    }
}

impl fmt::Display for UiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiStatus::NotConnected(peer) => write!(f, "Not yet connected to {}", peer),
            UiStatus::Connecting(peer) => write!(f, "Connecting to {}", peer),
            UiStatus::Connected(peer) => write!(f, "Connected to {}", peer),
            UiStatus::ChallengeFailed(peer) => {
                write!(f, "Error: Remote radio {}: Security challenge failed", peer)
            }
            UiStatus::RemoteHasNoPassword(peer) => write!(f, "Error: Remote radio {} has no password", peer),
            UiStatus::NoLocalPassword(peer) => {
                write!(f, "Error: No password configured for remote radio {}", peer)
            }
        }
    }
}

/// Display work for the UI thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Status(UiStatus),
    SMeter(String),
    HwReadout(HwReadout),
    ErrorReply {
        kind: ProtocolErrorKind,
        echo: Option<Record>,
    },
}

/// Posts UI events from any thread without blocking
#[derive(Clone)]
pub struct UiNotifier {
    tx: Sender<UiEvent>,
    stats: LinkStats,
}

impl UiNotifier {
    /// Queue an event; dropped and counted when the UI thread is behind
    pub fn notify(&self, event: UiEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.stats.record_ui_event_dropped();
                tracing::debug!("UI channel full, dropped {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn status(&self, status: UiStatus) {
        self.notify(UiEvent::Status(status));
    }
}

/// Receiving end, owned by the UI thread
pub struct UiEvents {
    rx: Receiver<UiEvent>,
}

impl UiEvents {
    /// Apply every queued event to the adapter; returns how many were applied
    pub fn drain_into(&self, ui: &mut dyn UiAdapter) -> usize {
        let mut applied = 0;
        for event in self.rx.try_iter() {
            match &event {
                UiEvent::Status(status) => ui.set_status(status),
                UiEvent::SMeter(text) => ui.show_s_meter(text),
                UiEvent::HwReadout(readout) => ui.show_hw_readout(readout),
                UiEvent::ErrorReply { kind, echo } => ui.show_error_reply(*kind, echo.as_ref()),
            }
            applied += 1;
        }
        applied
    }
}

/// Create a bounded UI event channel
pub fn ui_channel(capacity: usize, stats: LinkStats) -> (UiNotifier, UiEvents) {
    let (tx, rx) = channel::bounded(capacity);
    (UiNotifier { tx, stats }, UiEvents { rx })
}
