// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Control head side of the link
//!
//! The head dials the configured radio host once a second until it connects, answers
//! the challenge, and on `TOKEN_OK` replays the operator's full state before anything
//! else. Operator commands issued while the handshake or the dump is in progress are
//! queued and sent right after the dump; commands issued while disconnected are
//! dropped, since the next dump carries the current state anyway.
//!
//! `TOKEN_BAD`, `TOKEN_MISSING` and a missing local password are terminal: the head
//! stops redialing until [`HeadSession::rearm`] is called.

use crate::adapter::{ui_channel, MediaEngine, UiAdapter, UiEvent, UiEvents, UiNotifier, UiStatus, UI_CHANNEL_CAPACITY};
use crate::auth::{answer_challenge, ChallengeSigner};
use crate::codec::Record;
use crate::command::{initial_state_dump, AuthOutcome, Command, TokenMsg, Vocabulary};
use crate::config::RemoteConfig;
use crate::cw::CwSender;
use crate::error::AuthFailure;
use crate::link::{open_channel, ConnectOutcome, Connector, LinkReader, LinkSender, LinkSlot, LinkState};
use crate::media::MediaOrchestrator;
use crate::stats::LinkStats;
use crate::supervisor::Peer;
use crate::{Error, Result, HEARTBEAT_INTERVAL};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Submits operator commands from any thread
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Record>,
}

impl CommandSender {
    /// Queue a record for the head; false if the queue is full or the head is gone
    pub fn submit(&self, record: Record) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                warn!("Command queue full, dropping '{}'", record);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Head session manager: dialer, current connection, UI and media
pub struct HeadSession<U: UiAdapter, E: MediaEngine> {
    peer_name: String,
    connector: Connector,
    signer: Option<ChallengeSigner>,
    data_width: u32,
    vocab: Vocabulary,
    phrase_break: Duration,
    ui: U,
    notifier: UiNotifier,
    ui_events: UiEvents,
    media: MediaOrchestrator<E>,
    stats: LinkStats,
    slot: LinkSlot,
    commands_tx: Sender<Record>,
    commands_rx: Receiver<Record>,

    state: LinkState,
    reader: Option<LinkReader>,
    outbox: VecDeque<Record>,
    suspended: bool,
    last_status: Option<UiStatus>,
    next_connect_at: Option<Instant>,
    next_heartbeat_at: Option<Instant>,
}

impl<U: UiAdapter, E: MediaEngine> HeadSession<U, E> {
    pub fn new(config: &RemoteConfig, ui: U, engine: E, stats: LinkStats) -> Result<Self> {
        let peer = config.resolve_peer()?;
        let ports = config.ports()?;
        let (notifier, ui_events) = ui_channel(UI_CHANNEL_CAPACITY, stats.clone());
        let (commands_tx, commands_rx) = channel::bounded(UI_CHANNEL_CAPACITY);

        let mut head = Self {
            peer_name: config.remote_radio_ip.trim().to_string(),
            connector: Connector::new(peer),
            signer: ChallengeSigner::from_password(&config.remote_radio_password),
            data_width: config.data_width,
            vocab: Vocabulary::from_config(config),
            phrase_break: config.cw_phrase_break(),
            ui,
            notifier,
            ui_events,
            media: MediaOrchestrator::new(engine, ports),
            stats,
            slot: LinkSlot::new(),
            commands_tx,
            commands_rx,
            state: LinkState::Disconnected,
            reader: None,
            outbox: VecDeque::new(),
            suspended: false,
            last_status: None,
            next_connect_at: None,
            next_heartbeat_at: None,
        };
        head.set_status(UiStatus::NotConnected(head.peer_name.clone()));
        Ok(head)
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn media(&self) -> &MediaOrchestrator<E> {
        &self.media
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Handle for posting display updates from other threads
    pub fn notifier(&self) -> UiNotifier {
        self.notifier.clone()
    }

    /// Handle for submitting operator commands from other threads
    pub fn command_sender(&self) -> CommandSender {
        CommandSender {
            tx: self.commands_tx.clone(),
        }
    }

    /// CW keying handle for the sound thread
    pub fn cw_sender(&self) -> CwSender {
        CwSender::new(self.phrase_break, self.slot.clone())
    }

    /// Resume dialing after a terminal authentication failure
    pub fn rearm(&mut self) {
        if self.suspended {
            info!("Reconnects to {} re-enabled", self.peer_name);
        }
        self.suspended = false;
        self.next_connect_at = None;
        if self.state == LinkState::Disconnected {
            self.set_status(UiStatus::NotConnected(self.peer_name.clone()));
        }
    }

    /// Send an operator command, queue it, or drop it, depending on the session state
    pub fn submit(&mut self, record: Record) {
        match self.state {
            LinkState::Connected => self.send(&record),
            LinkState::Authenticating => {
                debug!("Queueing '{}' until the state dump is sent", record);
                self.outbox.push_back(record);
            }
            _ => debug!("Not connected, dropping '{}'", record),
        }
    }

    fn set_status(&mut self, status: UiStatus) {
        if self.last_status.as_ref() == Some(&status) {
            return;
        }
        if status.is_error() {
            error!("{}", status);
        } else {
            info!("{}", status);
        }
        self.last_status = Some(status.clone());
        self.notifier.status(status);
    }

    fn current_sender(&self) -> Option<LinkSender> {
        self.slot.current()
    }

    fn send(&mut self, record: &Record) {
        let Some(sender) = self.current_sender() else {
            return;
        };
        match sender.send(record) {
            Ok(()) => {}
            Err(e) if e.closes_session() => self.close_session("send failed", Instant::now()),
            Err(e) => warn!("Dropping '{}': {}", record, e),
        }
    }

    /// Push output the socket did not take on the first try
    fn flush_outbound(&mut self, now: Instant) {
        let failed = self.current_sender().is_some_and(|sender| sender.flush().is_err());
        if failed {
            self.close_session("send failed", now);
        }
    }

    fn try_connect(&mut self, now: Instant) {
        if self.suspended || self.next_connect_at.is_some_and(|at| now < at) {
            return;
        }
        self.next_connect_at = Some(now + HEARTBEAT_INTERVAL);
        self.state = LinkState::Connecting;
        self.set_status(UiStatus::Connecting(self.peer_name.clone()));

        let stream = match self.connector.attempt() {
            Ok(ConnectOutcome::Connected(stream)) => stream,
            Ok(ConnectOutcome::Pending) => return,
            Err(e) => {
                warn!("{}", e);
                self.connector.reset();
                self.state = LinkState::Disconnected;
                return;
            }
        };

        match open_channel(stream, self.stats.clone()) {
            Ok((sender, reader)) => {
                info!("Connected to {}, waiting for challenge", sender.peer());
                self.stats.record_session();
                self.slot.set(Some(sender));
                self.reader = Some(reader);
                self.state = LinkState::Authenticating;
            }
            Err(e) => {
                warn!("Could not set up channel to {}: {}", self.peer_name, e);
                self.state = LinkState::Disconnected;
            }
        }
    }

    fn service_connection(&mut self, now: Instant) {
        let mut records = Vec::new();
        let read_result = match self.reader.as_mut() {
            Some(reader) => reader.poll_records(&mut records),
            None => return,
        };

        for record in &records {
            if self.reader.is_none() {
                break;
            }
            self.dispatch(record, now);
        }

        if let Err(e) = read_result {
            if self.reader.is_some() {
                info!("Link to {} ended: {}", self.peer_name, e);
                self.close_session("connection lost", now);
            }
        }
    }

    /// Apply one record received from the host
    pub fn dispatch(&mut self, record: &Record, now: Instant) {
        let command = match Command::parse(record, &self.vocab) {
            Ok(command) => command,
            Err(err) => {
                // The head never answers with errors, so two confused peers cannot loop
                self.stats.record_protocol_error();
                warn!("{}", err);
                return;
            }
        };

        match command {
            Command::Token(TokenMsg::Challenge(challenge)) => self.answer(&challenge, now),
            Command::AuthResult(AuthOutcome::Ok) => self.on_authenticated(now),
            Command::AuthResult(AuthOutcome::Bad) => {
                self.stats.record_auth_failure();
                self.fail_terminally(
                    UiStatus::ChallengeFailed(self.peer_name.clone()),
                    AuthFailure::Timeout,
                    now,
                );
            }
            Command::AuthResult(AuthOutcome::Missing) => {
                self.stats.record_auth_failure();
                self.fail_terminally(
                    UiStatus::RemoteHasNoPassword(self.peer_name.clone()),
                    AuthFailure::MissingPassword,
                    now,
                );
            }
            Command::HostQuit => {
                info!("Radio host {} closed the session", self.peer_name);
                self.close_session("host quit", now);
            }
            Command::SMeter(text) => self.notifier.notify(UiEvent::SMeter(text)),
            Command::HwReadout(readout) => self.notifier.notify(UiEvent::HwReadout(readout)),
            Command::ErrorReply { kind, echo } => {
                warn!(
                    "Host rejected {}: {}",
                    echo.as_ref().map_or_else(String::new, |r| r.to_line()),
                    kind.reply_head()
                );
                self.notifier.notify(UiEvent::ErrorReply { kind, echo });
            }
            other => debug!("Ignoring {:?} from host", other),
        }
    }

    fn answer(&mut self, challenge: &str, now: Instant) {
        if self.state != LinkState::Authenticating {
            debug!("{}", Error::State("challenge outside authentication".to_string()));
            return;
        }
        match answer_challenge(self.signer.as_ref(), challenge) {
            Ok(digest) => {
                let response = Command::Token(TokenMsg::Response {
                    digest,
                    data_width: self.data_width.to_string(),
                });
                self.send(&response.to_record());
            }
            Err(Error::Auth(failure)) => {
                self.fail_terminally(UiStatus::NoLocalPassword(self.peer_name.clone()), failure, now);
            }
            Err(e) => {
                error!("Could not answer challenge: {}", e);
                self.close_session("challenge answer failed", now);
            }
        }
    }

    fn on_authenticated(&mut self, now: Instant) {
        let Some(sender) = self.current_sender() else {
            return;
        };
        if self.state != LinkState::Authenticating {
            debug!("{}", Error::State("TOKEN_OK outside authentication".to_string()));
            return;
        }

        sender.set_authenticated(true);
        self.set_status(UiStatus::Connected(self.peer_name.clone()));
        if let Err(e) = self.media.start(sender.peer().ip(), self.data_width) {
            error!("Media engine failed to start: {}", e);
        }

        let dump = initial_state_dump(&self.ui.snapshot());
        info!("Sending {} state records", dump.len());
        for command in dump {
            self.send(&command.to_record());
        }

        // Operator commands issued during the handshake follow the dump
        while let Some(record) = self.outbox.pop_front() {
            self.send(&record);
        }

        if self.reader.is_some() {
            self.state = LinkState::Connected;
            self.next_heartbeat_at = Some(now + HEARTBEAT_INTERVAL);
        }
    }

    fn fail_terminally(&mut self, status: UiStatus, failure: AuthFailure, now: Instant) {
        debug!("Authentication ended: {}", failure);
        self.suspended = true;
        self.close_session(&failure.to_string(), now);
        self.set_status(status);
    }

    fn emit_heartbeat(&mut self, now: Instant) {
        if self.state != LinkState::Connected {
            return;
        }
        if self.next_heartbeat_at.is_some_and(|at| now < at) {
            return;
        }
        self.next_heartbeat_at = Some(now + HEARTBEAT_INTERVAL);
        self.send(&Command::Heartbeat.to_record());
    }

    fn drain_commands(&mut self) {
        while let Ok(record) = self.commands_rx.try_recv() {
            self.submit(record);
        }
    }

    /// Close the current session and schedule the next dial
    pub fn close_session(&mut self, reason: &str, now: Instant) {
        let Some(sender) = self.current_sender() else {
            self.reader = None;
            return;
        };
        self.state = LinkState::Closing;
        sender.close();
        self.slot.set(None);
        self.reader = None;
        self.outbox.clear();
        self.media.stop();
        self.next_heartbeat_at = None;
        self.next_connect_at = Some(now + HEARTBEAT_INTERVAL);
        self.state = LinkState::Disconnected;
        info!("Session with {} closed: {}", self.peer_name, reason);
        if !self.suspended {
            self.set_status(UiStatus::NotConnected(self.peer_name.clone()));
        }
    }
}

impl<U: UiAdapter, E: MediaEngine> Peer for HeadSession<U, E> {
    fn poll_io(&mut self, now: Instant) {
        self.drain_commands();
        self.service_connection(now);
        self.flush_outbound(now);
    }

    fn tick(&mut self, now: Instant) {
        self.drain_commands();
        if self.reader.is_none() {
            self.try_connect(now);
        }
        self.poll_io(now);
        self.emit_heartbeat(now);
        self.ui_events.drain_into(&mut self.ui);
    }

    fn shutdown(&mut self) {
        if let Some(sender) = self.current_sender() {
            // A failed quit goes straight to close
            let _ = sender.send(&Command::Quit.to_record());
        }
        self.suspended = true;
        self.close_session("head shutting down", Instant::now());
        self.ui_events.drain_into(&mut self.ui);
        info!("Head stats: {}", self.stats.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{HwReadout, RadioSnapshot};
    use crate::media::MediaPlan;
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    const PASSWORD: &str = "hunter2";

    #[derive(Default)]
    struct RecordingUi {
        statuses: Vec<String>,
        meters: Vec<String>,
        readouts: Vec<HwReadout>,
    }

    impl UiAdapter for RecordingUi {
        fn snapshot(&self) -> RadioSnapshot {
            RadioSnapshot::default()
        }
        fn set_status(&mut self, status: &UiStatus) {
            self.statuses.push(status.to_string());
        }
        fn show_s_meter(&mut self, text: &str) {
            self.meters.push(text.to_string());
        }
        fn show_hw_readout(&mut self, readout: &HwReadout) {
            self.readouts.push(readout.clone());
        }
    }

    #[derive(Default)]
    struct RecordingMedia {
        plans: Vec<MediaPlan>,
        stops: usize,
    }

    impl MediaEngine for RecordingMedia {
        fn start(&mut self, plan: &MediaPlan) -> Result<()> {
            self.plans.push(*plan);
            Ok(())
        }
        fn stop(&mut self) {
            self.stops += 1;
        }
    }

    type TestHead = HeadSession<RecordingUi, RecordingMedia>;

    struct FakeHost {
        listener: TcpListener,
    }

    struct HostSide {
        reader: BufReader<TcpStream>,
        writer: TcpStream,
    }

    impl FakeHost {
        fn new() -> Self {
            Self {
                listener: TcpListener::bind("127.0.0.1:0").unwrap(),
            }
        }

        fn head(&self, password: &str) -> TestHead {
            let config = RemoteConfig {
                remote_radio_ip: "127.0.0.1".to_string(),
                remote_radio_password: password.to_string(),
                remote_ctl_base_port: self.listener.local_addr().unwrap().port(),
                ..Default::default()
            };
            HeadSession::new(&config, RecordingUi::default(), RecordingMedia::default(), LinkStats::new()).unwrap()
        }

        fn accept(&self, head: &mut TestHead, now: Instant) -> HostSide {
            head.tick(now);
            let (stream, _) = self.listener.accept().unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            HostSide {
                writer: stream.try_clone().unwrap(),
                reader: BufReader::new(stream),
            }
        }
    }

    impl HostSide {
        fn send(&mut self, line: &str) {
            self.writer.write_all(format!("{}\n", line).as_bytes()).unwrap();
        }

        fn recv(&mut self) -> Option<String> {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line.trim_end().to_string()),
            }
        }
    }

    fn pump(head: &mut TestHead, now: Instant, done: impl Fn(&TestHead) -> bool) {
        for _ in 0..500 {
            head.tick(now);
            if done(head) {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("head never reached the expected state");
    }

    fn received(n: u64) -> impl Fn(&TestHead) -> bool {
        move |head| head.stats().records_received() >= n
    }

    const CHALLENGE: &str = "5f2b8c0e6a7d4e3f9a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f6071";

    /// Connect, run the handshake and return the host end after the dump
    fn connected(host: &FakeHost, head: &mut TestHead, t0: Instant) -> (HostSide, Vec<String>) {
        let mut side = host.accept(head, t0);
        side.send(&format!("TOKEN;{}", CHALLENGE));
        pump(head, t0, received(1));

        let response = side.recv().unwrap();
        let fields: Vec<&str> = response.split(';').collect();
        assert_eq!(fields[0], "TOKEN");
        assert_eq!(fields[2], "1200");
        let signer = ChallengeSigner::from_password(PASSWORD).unwrap();
        assert!(signer.verify(CHALLENGE, fields[1]).unwrap());

        side.send("TOKEN_OK");
        pump(head, t0, |h| h.state() == LinkState::Connected);
        let dump: Vec<String> = (0..20).map(|_| side.recv().unwrap()).collect();
        (side, dump)
    }

    #[test]
    fn test_handshake_and_state_dump() {
        let t0 = Instant::now();
        let host = FakeHost::new();
        let mut head = host.head(PASSWORD);
        let (_side, dump) = connected(&host, &mut head, t0);

        assert_eq!(dump[0], "FREQ;0;7000000;NewDecim;40;None;0");
        assert_eq!(dump[1], "40;1");
        assert_eq!(dump[5], "Split;0");
        assert_eq!(dump[19], "VOX;0");

        let plans = &head.media().engine().plans;
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].data_width, 1200);
        assert_eq!(
            head.ui().statuses,
            vec!["Not yet connected to 127.0.0.1", "Connecting to 127.0.0.1", "Connected to 127.0.0.1"]
        );
    }

    #[test]
    fn test_commands_queued_during_handshake() {
        let t0 = Instant::now();
        let host = FakeHost::new();
        let mut head = host.head(PASSWORD);

        head.submit(Record::new("Mute", ["1"]));
        let mut side = host.accept(&mut head, t0);
        assert_eq!(head.state(), LinkState::Authenticating);
        head.submit(Record::new("NR2", ["1"]));

        side.send(&format!("TOKEN;{}", CHALLENGE));
        pump(&mut head, t0, received(1));
        side.recv().unwrap();
        side.send("TOKEN_OK");
        pump(&mut head, t0, |h| h.state() == LinkState::Connected);

        let lines: Vec<String> = (0..21).map(|_| side.recv().unwrap()).collect();
        assert_eq!(lines[9], "Mute;0");
        assert_eq!(lines[20], "NR2;1");
    }

    #[test]
    fn test_heartbeat_every_second() {
        let t0 = Instant::now();
        let host = FakeHost::new();
        let mut head = host.head(PASSWORD);
        let (mut side, _) = connected(&host, &mut head, t0);

        head.tick(t0 + Duration::from_millis(500));
        head.tick(t0 + Duration::from_millis(1_000));
        head.tick(t0 + Duration::from_millis(1_500));
        head.tick(t0 + Duration::from_millis(2_000));
        assert_eq!(side.recv().as_deref(), Some("HEARTBEAT"));
        assert_eq!(side.recv().as_deref(), Some("HEARTBEAT"));
    }

    #[test]
    fn test_challenge_failure_suspends_reconnect() {
        let t0 = Instant::now();
        let host = FakeHost::new();
        let mut head = host.head(PASSWORD);
        let mut side = host.accept(&mut head, t0);

        side.send("TOKEN_BAD");
        pump(&mut head, t0, |h| h.is_suspended());
        assert_eq!(head.state(), LinkState::Disconnected);
        assert_eq!(
            head.ui().statuses.last().map(String::as_str),
            Some("Error: Remote radio 127.0.0.1: Security challenge failed")
        );

        host.listener.set_nonblocking(true).unwrap();
        head.tick(t0 + Duration::from_secs(5));
        assert!(host.listener.accept().is_err());

        head.rearm();
        head.tick(t0 + Duration::from_secs(6));
        assert_eq!(head.state(), LinkState::Authenticating);
    }

    #[test]
    fn test_remote_without_password() {
        let t0 = Instant::now();
        let host = FakeHost::new();
        let mut head = host.head(PASSWORD);
        let mut side = host.accept(&mut head, t0);

        side.send("TOKEN_MISSING");
        pump(&mut head, t0, |h| h.is_suspended());
        assert_eq!(
            head.ui().statuses.last().map(String::as_str),
            Some("Error: Remote radio 127.0.0.1 has no password")
        );
        assert_eq!(side.recv(), None);
    }

    #[test]
    fn test_no_local_password_sends_nothing() {
        let t0 = Instant::now();
        let host = FakeHost::new();
        let mut head = host.head("");
        let mut side = host.accept(&mut head, t0);

        side.send(&format!("TOKEN;{}", CHALLENGE));
        pump(&mut head, t0, |h| h.is_suspended());
        assert_eq!(side.recv(), None);
        assert_eq!(
            head.ui().statuses.last().map(String::as_str),
            Some("Error: No password configured for remote radio 127.0.0.1")
        );
    }

    #[test]
    fn test_commands_dropped_while_disconnected() {
        let t0 = Instant::now();
        let host = FakeHost::new();
        let mut head = host.head(PASSWORD);
        head.command_sender().submit(Record::new("Mute", ["1"]));
        let (_side, dump) = connected(&host, &mut head, t0);
        assert!(!dump.contains(&"Mute;1".to_string()));
    }

    #[test]
    fn test_display_updates_reach_ui() {
        let t0 = Instant::now();
        let host = FakeHost::new();
        let mut head = host.head(PASSWORD);
        let (mut side, _) = connected(&host, &mut head, t0);

        side.send("M;S9 +20");
        side.send("HL2_TEMP;41.5;0.8;4.9;1.2");
        pump(&mut head, t0, |h| !h.ui().readouts.is_empty());

        assert_eq!(head.ui().meters, vec!["S9 +20"]);
        assert_eq!(head.ui().readouts[0].key, "HL2_TEMP");
    }

    #[test]
    fn test_host_quit_then_reconnect() {
        let t0 = Instant::now();
        let host = FakeHost::new();
        let mut head = host.head(PASSWORD);
        let (mut side, _) = connected(&host, &mut head, t0);

        side.send("Q");
        pump(&mut head, t0, |h| h.state() == LinkState::Disconnected);
        assert_eq!(head.media().engine().stops, 1);
        assert!(!head.is_suspended());

        // Next dial waits for the heartbeat period
        head.tick(t0 + Duration::from_millis(500));
        assert_eq!(head.state(), LinkState::Disconnected);
        let _again = host.accept(&mut head, t0 + Duration::from_secs(1));
        assert_eq!(head.state(), LinkState::Authenticating);
    }

    #[test]
    fn test_cw_sender_requires_authentication() {
        let t0 = Instant::now();
        let host = FakeHost::new();
        let mut head = host.head(PASSWORD);
        let cw = head.cw_sender();
        cw.key(true).unwrap();
        cw.stop().unwrap();

        let (mut side, _) = connected(&host, &mut head, t0);
        cw.key(true).unwrap();
        cw.key(false).unwrap();
        cw.stop().unwrap();

        assert_eq!(side.recv().as_deref(), Some("CW;1;0"));
        let up = side.recv().unwrap();
        assert!(up.starts_with("CW;0;"));
        assert_ne!(up, "CW;0;0");
        assert_eq!(side.recv().as_deref(), Some("CW;0;0"));
    }

    #[test]
    fn test_shutdown_sends_quit() {
        let t0 = Instant::now();
        let host = FakeHost::new();
        let mut head = host.head(PASSWORD);
        let (mut side, _) = connected(&host, &mut head, t0);

        head.shutdown();
        assert_eq!(side.recv().as_deref(), Some("QUIT"));
        assert_eq!(side.recv(), None);
    }
}
