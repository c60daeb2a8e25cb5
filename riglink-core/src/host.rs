// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Radio host side of the link
//!
//! The host serves one control head at a time. Every accepted connection is
//! challenged immediately; until the head answers correctly only `TOKEN`, `QUIT` and
//! `HEARTBEAT` are looked at. After authentication, head records drive the radio and
//! the host pushes display readouts back on change.
//!
//! While an authenticated session is live, a newly accepted connection is held as a
//! *challenger*: it gets its own challenge, and only a correct answer lets it take
//! over the radio. A challenger that fails or times out is dropped without touching
//! the live session.

use crate::adapter::{MediaEngine, RadioAdapter};
use crate::auth::{AuthState, ChallengeSigner, HostHandshake, Verdict};
use crate::codec::Record;
use crate::command::{AuthOutcome, Button, Command, TokenMsg, Vocabulary, PRE_AUTH_HEADS};
use crate::config::{PortTriple, RemoteConfig};
use crate::cw::{CwAction, CwScheduler};
use crate::error::{ProtocolError, ProtocolErrorKind};
use crate::link::{open_channel, Acceptor, HeartbeatClock, LinkReader, LinkSender, LinkState};
use crate::media::MediaOrchestrator;
use crate::stats::LinkStats;
use crate::supervisor::Peer;
use crate::{Error, Result, HEARTBEAT_INTERVAL};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// One accepted control head
struct Connection {
    peer: SocketAddr,
    sender: LinkSender,
    reader: LinkReader,
    handshake: HostHandshake,
    heartbeat: HeartbeatClock,
    state: LinkState,
}

/// Which of the host's connections a record or timer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// The session that owns the radio
    Active,
    /// A newer connection still proving itself while a session is live
    Challenger,
}

/// Transmit request waiting for a band change to settle
#[derive(Debug, Default)]
struct PttGate {
    held: bool,
    engaged: bool,
    last_retune: Option<Instant>,
}

impl PttGate {
    fn settled(&self, now: Instant, settle: Duration) -> bool {
        self.last_retune
            .map_or(true, |at| now.saturating_duration_since(at) >= settle)
    }
}

/// Last display values sent, so only changes go on the wire
#[derive(Debug, Default)]
struct DisplayCache {
    s_meter: Option<String>,
    hw: HashMap<String, Vec<String>>,
    hw_sent_at: Option<Instant>,
}

/// Host session manager: listener, current connection, radio and media
pub struct HostSession<R: RadioAdapter + 'static, E: MediaEngine> {
    acceptor: Acceptor,
    signer: Option<ChallengeSigner>,
    vocab: Vocabulary,
    heartbeat_timeout: Duration,
    repeater_settle: Duration,
    radio: Arc<Mutex<R>>,
    media: MediaOrchestrator<E>,
    cw: CwScheduler,
    stats: LinkStats,
    active: Option<Connection>,
    challenger: Option<Connection>,
    ptt: PttGate,
    display: DisplayCache,
}

impl<R: RadioAdapter + 'static, E: MediaEngine> HostSession<R, E> {
    /// Bind the control port and prepare to accept heads
    pub fn bind(config: &RemoteConfig, radio: Arc<Mutex<R>>, engine: E, stats: LinkStats) -> Result<Self> {
        let ports = config.ports()?;
        let acceptor = Acceptor::bind(SocketAddr::new(config.listen_ip()?, ports.control))?;
        Ok(Self::with_acceptor(config, acceptor, ports, radio, engine, stats))
    }

    fn with_acceptor(
        config: &RemoteConfig,
        acceptor: Acceptor,
        ports: PortTriple,
        radio: Arc<Mutex<R>>,
        engine: E,
        stats: LinkStats,
    ) -> Self {
        let signer = ChallengeSigner::from_password(&config.remote_radio_password);
        if signer.is_none() {
            error!("No remote_radio_password configured; every head will be refused");
        }
        Self {
            acceptor,
            signer,
            vocab: Vocabulary::from_config(config),
            heartbeat_timeout: config.heartbeat_timeout(),
            repeater_settle: config.repeater_settle(),
            radio,
            media: MediaOrchestrator::new(engine, ports),
            cw: CwScheduler::new(config.cw_delay(), config.cw_phrase_break(), stats.clone()),
            stats,
            active: None,
            challenger: None,
            ptt: PttGate::default(),
            display: DisplayCache::default(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Handle for the sound thread's CW poller
    pub fn cw_scheduler(&self) -> CwScheduler {
        self.cw.clone()
    }

    pub fn radio(&self) -> Arc<Mutex<R>> {
        self.radio.clone()
    }

    pub fn media(&self) -> &MediaOrchestrator<E> {
        &self.media
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn state(&self) -> LinkState {
        self.active
            .as_ref()
            .map_or(LinkState::Disconnected, |conn| conn.state)
    }

    pub fn auth_state(&self) -> Option<AuthState> {
        self.active.as_ref().map(|conn| conn.handshake.state())
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.active.as_ref().map(|conn| conn.peer)
    }

    fn conn(&self, role: Role) -> Option<&Connection> {
        match role {
            Role::Active => self.active.as_ref(),
            Role::Challenger => self.challenger.as_ref(),
        }
    }

    fn conn_mut(&mut self, role: Role) -> Option<&mut Connection> {
        match role {
            Role::Active => self.active.as_mut(),
            Role::Challenger => self.challenger.as_mut(),
        }
    }

    fn install(&mut self, conn: Connection) {
        self.active = Some(conn);
        self.display = DisplayCache::default();
    }

    fn accept_pending(&mut self, now: Instant) {
        loop {
            let (stream, peer) = match self.acceptor.accept() {
                Ok(Some(accepted)) => accepted,
                Ok(None) => return,
                Err(e) => {
                    warn!("{}", e);
                    return;
                }
            };

            let (sender, reader) = match open_channel(stream, self.stats.clone()) {
                Ok(channel) => channel,
                Err(e) => {
                    warn!("Could not set up channel for {}: {}", peer, e);
                    continue;
                }
            };

            let handshake = HostHandshake::start(now);
            let challenge = Command::Token(TokenMsg::Challenge(handshake.challenge().as_str().to_string()));
            self.stats.record_session();
            let conn = Connection {
                peer,
                sender,
                reader,
                handshake,
                heartbeat: HeartbeatClock::new(now),
                state: LinkState::Authenticating,
            };

            let live = self
                .active
                .as_ref()
                .map(|active| (active.peer, active.state == LinkState::Connected));
            let role = match live {
                Some((current, true)) => {
                    info!("Connection from {} must authenticate before it replaces {}", peer, current);
                    self.drop_challenger("superseded by a newer connection");
                    self.challenger = Some(conn);
                    Role::Challenger
                }
                Some((current, false)) => {
                    info!("Connection from {} replaces unauthenticated {}", peer, current);
                    self.close_session("replaced by a new connection");
                    self.install(conn);
                    Role::Active
                }
                None => {
                    self.install(conn);
                    Role::Active
                }
            };
            info!("Accepted control head {}, sending challenge", peer);
            self.send_to(role, &challenge.to_record());
        }
    }

    fn service_connection(&mut self, now: Instant) {
        let mut records = Vec::new();
        let read_result = match self.active.as_mut() {
            Some(conn) => conn.reader.poll_records(&mut records),
            None => Ok(()),
        };

        for record in &records {
            if self.active.is_none() {
                break;
            }
            self.dispatch(record, now);
        }

        if let Err(e) = read_result {
            if self.active.is_some() {
                info!("Control head link ended: {}", e);
                self.close_session("connection lost");
            }
        }

        self.service_challenger(now);
    }

    fn service_challenger(&mut self, now: Instant) {
        let mut records = Vec::new();
        let (peer, read_result) = match self.challenger.as_mut() {
            Some(conn) => (conn.peer, conn.reader.poll_records(&mut records)),
            None => return,
        };

        for record in &records {
            if self.challenger.is_some() {
                self.dispatch_challenger(record, now);
            } else if self.peer() == Some(peer) {
                // Promoted mid-batch; the rest belongs to the new session
                self.dispatch(record, now);
            } else {
                break;
            }
        }

        if let Err(e) = read_result {
            if self.challenger.is_some() {
                self.drop_challenger(&e.to_string());
            } else if self.peer() == Some(peer) {
                info!("Control head link ended: {}", e);
                self.close_session("connection lost");
            }
        }
    }

    /// Records from a challenger: only the handshake and `QUIT` count
    fn dispatch_challenger(&mut self, record: &Record, now: Instant) {
        match Command::parse(record, &self.vocab) {
            Ok(Command::Token(TokenMsg::Response { digest, data_width })) => {
                self.handle_response(Role::Challenger, &digest, &data_width, now)
            }
            Ok(Command::Token(TokenMsg::Challenge(_))) => self.handle_response(Role::Challenger, "", "", now),
            Ok(Command::Quit) => self.drop_challenger("head quit"),
            _ => {
                let err = Error::State(format!("'{}' from a connection still authenticating", record.head));
                debug!("{}", err);
            }
        }
    }

    fn drop_challenger(&mut self, reason: &str) {
        if let Some(conn) = self.challenger.take() {
            conn.sender.close();
            info!("Connection from {} dropped: {}", conn.peer, reason);
        }
    }

    /// Apply one record received from the head
    pub fn dispatch(&mut self, record: &Record, now: Instant) {
        let Some(conn) = self.active.as_ref() else {
            return;
        };
        let authenticated = conn.handshake.state() == AuthState::Ok;

        if !authenticated && !PRE_AUTH_HEADS.contains(&record.head.as_str()) {
            let err = Error::State(format!("'{}' before authentication", record.head));
            debug!("{}", err);
            return;
        }

        let command = match Command::parse(record, &self.vocab) {
            Ok(command) => command,
            Err(err) => {
                self.stats.record_protocol_error();
                warn!("{}", err);
                if authenticated {
                    self.send(&err.to_record());
                }
                return;
            }
        };

        match command {
            Command::UiOnly(_) => {}
            Command::Token(TokenMsg::Response { digest, data_width }) => {
                self.handle_response(Role::Active, &digest, &data_width, now)
            }
            Command::Token(TokenMsg::Challenge(_)) => {
                // Shape of a challenge, not a response: counts as a wrong answer
                self.handle_response(Role::Active, "", "", now)
            }
            Command::Heartbeat => {
                if let Some(conn) = self.active.as_ref() {
                    conn.heartbeat.touch(now);
                }
            }
            Command::Quit => {
                info!("Control head requested close");
                self.close_session("head quit");
            }
            Command::Freq(freq) => {
                self.radio.lock().set_tuning(&freq);
                self.ptt.last_retune = Some(now);
            }
            Command::Band(band) => {
                self.radio.lock().set_band(&band);
                self.ptt.last_retune = Some(now);
            }
            Command::Cw(event) => {
                let radio = &self.radio;
                if let CwAction::Scheduled(at) = self.cw.push(event, now, |down| radio.lock().set_cw_key(down)) {
                    debug!("CW {} scheduled {:?} ahead", u8::from(event.down), at.saturating_duration_since(now));
                }
            }
            Command::Mode { mode, index } => {
                let radio = &self.radio;
                self.cw.force_stop(|down| radio.lock().set_cw_key(down));
                radio.lock().set_mode(mode, index);
            }
            Command::Filter { button, value } => self.radio.lock().set_filter(button, value),
            Command::FilterBandwidth(hz) => self.radio.lock().set_filter_bandwidth(hz),
            Command::AgcSquelch(levels) => self.radio.lock().set_agc_squelch(&levels),
            Command::Slider { slider, value } => self.radio.lock().set_slider(slider, value),
            Command::Menu(item) => self.radio.lock().set_menu(&item),
            Command::Split(on) => self.radio.lock().set_split(on),
            Command::Button {
                button: Button::Ptt,
                value,
            } => self.request_ptt(value != 0, now),
            Command::Button { button, value } => self.radio.lock().set_button(button, value),
            Command::AppCall(call) => {
                debug!("Remote call {}", call.path());
                self.radio.lock().app_call(&call);
            }
            Command::ErrorReply { kind, echo } => {
                warn!(
                    "Head reported {} for {}",
                    kind.reply_head(),
                    echo.map_or_else(String::new, |r| r.to_line())
                );
            }
            Command::HostQuit | Command::AuthResult(_) | Command::SMeter(_) | Command::HwReadout(_) => {
                let err = ProtocolError::new(ProtocolErrorKind::Unsupported, record, "not accepted by the radio host");
                self.stats.record_protocol_error();
                warn!("{}", err);
                self.send(&err.to_record());
            }
        }
    }

    fn handle_response(&mut self, role: Role, digest: &str, data_width: &str, now: Instant) {
        let conn = match role {
            Role::Active => self.active.as_mut(),
            Role::Challenger => self.challenger.as_mut(),
        };
        let Some(conn) = conn else {
            return;
        };
        if conn.handshake.state() == AuthState::Ok {
            debug!("Ignoring TOKEN on an authenticated session");
            return;
        }

        let verdict = match conn.handshake.evaluate(self.signer.as_ref(), digest, data_width, now) {
            Ok(verdict) => verdict,
            Err(e) => {
                error!("Challenge evaluation failed: {}", e);
                self.close(role, "challenge evaluation failed");
                return;
            }
        };
        let peer = conn.peer;

        match verdict {
            Verdict::Accepted { data_width } => {
                if role == Role::Challenger {
                    if let Some(challenger) = self.challenger.take() {
                        self.close_session("replaced by a newly authenticated head");
                        self.install(challenger);
                    }
                }
                let Some(conn) = self.active.as_mut() else {
                    return;
                };
                conn.state = LinkState::Connected;
                conn.sender.set_authenticated(true);
                conn.heartbeat.touch(now);
                info!("Control head {} authenticated (width {})", peer, data_width);
                self.send(&Command::AuthResult(AuthOutcome::Ok).to_record());
                if let Err(e) = self.media.start(peer.ip(), data_width) {
                    error!("Media engine failed to start: {}", e);
                }
            }
            Verdict::Retry => {
                self.stats.record_auth_failure();
                warn!("Wrong challenge response from {}", peer);
            }
            Verdict::Missing => {
                self.stats.record_auth_failure();
                error!("Refusing {}: no password configured on this radio", peer);
                self.send_to(role, &Command::AuthResult(AuthOutcome::Missing).to_record());
                self.close(role, "no password configured");
            }
        }
    }

    fn request_ptt(&mut self, on: bool, now: Instant) {
        if !on {
            self.ptt.held = false;
            self.ptt.engaged = false;
            self.radio.lock().set_ptt(false);
            return;
        }

        let mut radio = self.radio.lock();
        if radio.repeater_offset_active() && !self.ptt.settled(now, self.repeater_settle) {
            debug!("Holding PTT until the band change settles");
            self.ptt.held = true;
        } else {
            radio.set_ptt(true);
            self.ptt.engaged = true;
        }
    }

    fn release_held_ptt(&mut self, now: Instant) {
        if self.ptt.held && self.ptt.settled(now, self.repeater_settle) {
            self.ptt.held = false;
            self.ptt.engaged = true;
            self.radio.lock().set_ptt(true);
            debug!("Held PTT engaged");
        }
    }

    fn check_deadlines(&mut self, now: Instant) {
        for role in [Role::Active, Role::Challenger] {
            let expired = match self.conn_mut(role) {
                Some(conn) => {
                    if conn.handshake.check_expired(now) {
                        Some(conn.peer)
                    } else {
                        None
                    }
                }
                None => None,
            };
            if let Some(peer) = expired {
                self.stats.record_auth_failure();
                warn!("Control head {} did not answer the challenge in time", peer);
                self.send_to(role, &Command::AuthResult(AuthOutcome::Bad).to_record());
                self.close(role, "challenge timed out");
            }
        }

        let lost = self
            .active
            .as_ref()
            .filter(|conn| conn.state == LinkState::Connected)
            .filter(|conn| conn.heartbeat.is_expired(now, self.heartbeat_timeout))
            .map(|conn| conn.peer);
        if let Some(peer) = lost {
            warn!("Lost HEARTBEAT from {}", peer);
            self.close_session("Lost HEARTBEAT");
        }
    }

    fn push_display(&mut self, now: Instant) {
        if self.state() != LinkState::Connected {
            return;
        }

        let s_meter = self.radio.lock().s_meter();
        if let Some(text) = s_meter {
            if self.display.s_meter.as_deref() != Some(text.as_str()) {
                self.send(&Command::SMeter(text.clone()).to_record());
                self.display.s_meter = Some(text);
            }
        }

        let due = self
            .display
            .hw_sent_at
            .map_or(true, |at| now.saturating_duration_since(at) >= HEARTBEAT_INTERVAL);
        if !due {
            return;
        }
        self.display.hw_sent_at = Some(now);

        let readouts = self.radio.lock().hw_readouts();
        for readout in readouts {
            if !self.vocab.is_hw_readout(&readout.key) {
                debug!("Skipping unregistered readout {}", readout.key);
                continue;
            }
            if self.display.hw.get(&readout.key) == Some(&readout.fields) {
                continue;
            }
            self.send(&Command::HwReadout(readout.clone()).to_record());
            self.display.hw.insert(readout.key, readout.fields);
        }
    }

    fn send(&mut self, record: &Record) {
        self.send_to(Role::Active, record);
    }

    fn send_to(&mut self, role: Role, record: &Record) {
        let Some(conn) = self.conn(role) else {
            return;
        };
        match conn.sender.send(record) {
            Ok(()) => {}
            Err(e) if e.closes_session() => self.close(role, "send failed"),
            Err(e) => warn!("Dropping '{}': {}", record, e),
        }
    }

    /// Push output the sockets did not take on the first try
    fn flush_outbound(&mut self) {
        for role in [Role::Active, Role::Challenger] {
            let failed = self.conn(role).is_some_and(|conn| conn.sender.flush().is_err());
            if failed {
                self.close(role, "send failed");
            }
        }
    }

    fn close(&mut self, role: Role, reason: &str) {
        match role {
            Role::Active => self.close_session(reason),
            Role::Challenger => self.drop_challenger(reason),
        }
    }

    /// Close the current session, stop media, release the key and the transmitter
    pub fn close_session(&mut self, reason: &str) {
        let Some(mut conn) = self.active.take() else {
            return;
        };
        conn.state = LinkState::Closing;
        conn.sender.close();

        let radio = &self.radio;
        self.cw.force_stop(|down| radio.lock().set_cw_key(down));
        if self.ptt.engaged || self.ptt.held {
            self.radio.lock().set_ptt(false);
        }
        self.ptt = PttGate::default();
        self.media.stop();
        info!("Session with {} closed: {}", conn.peer, reason);
    }
}

impl<R: RadioAdapter + 'static, E: MediaEngine> Peer for HostSession<R, E> {
    fn poll_io(&mut self, now: Instant) {
        self.accept_pending(now);
        self.service_connection(now);
        self.flush_outbound();
    }

    fn tick(&mut self, now: Instant) {
        self.poll_io(now);
        self.check_deadlines(now);
        self.release_held_ptt(now);
        self.push_display(now);
    }

    fn shutdown(&mut self) {
        if let Some(conn) = self.active.as_ref() {
            // A failed quit goes straight to close
            let _ = conn.sender.send(&Command::HostQuit.to_record());
        }
        self.drop_challenger("host shutting down");
        self.close_session("host shutting down");
        info!("Host stats: {}", self.stats.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TOKEN_HEX_LEN;
    use crate::command::{AgcSquelch, AppCall, FreqUpdate, HwReadout, MenuItem, Mode, Slider};
    use crate::media::MediaPlan;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;
    use std::thread;

    const PASSWORD: &str = "hunter2";

    #[derive(Default)]
    struct RecordingRadio {
        calls: Vec<String>,
        repeater: bool,
        s_meter: Option<String>,
        readouts: Vec<HwReadout>,
    }

    impl RadioAdapter for RecordingRadio {
        fn set_tuning(&mut self, freq: &FreqUpdate) {
            self.calls.push(format!("tune {} {}", freq.vfo, freq.tune));
        }
        fn set_band(&mut self, band: &str) {
            self.calls.push(format!("band {}", band));
        }
        fn set_mode(&mut self, mode: Mode, _index: i32) {
            self.calls.push(format!("mode {}", mode.name()));
        }
        fn set_filter(&mut self, button: u8, value: i64) {
            self.calls.push(format!("filter {} {}", button, value));
        }
        fn set_filter_bandwidth(&mut self, hz: i64) {
            self.calls.push(format!("bandwidth {}", hz));
        }
        fn set_agc_squelch(&mut self, _levels: &AgcSquelch) {
            self.calls.push("agcsqlch".to_string());
        }
        fn set_slider(&mut self, slider: Slider, value: i64) {
            self.calls.push(format!("slider {} {}", slider.name(), value));
        }
        fn set_menu(&mut self, item: &MenuItem) {
            self.calls.push(format!("menu {} {}", item.menu, item.item));
        }
        fn set_button(&mut self, button: Button, value: i32) {
            self.calls.push(format!("button {} {}", button.name(), value));
        }
        fn set_split(&mut self, on: bool) {
            self.calls.push(format!("split {}", on));
        }
        fn set_cw_key(&mut self, down: bool) {
            self.calls.push(format!("key {}", down));
        }
        fn set_ptt(&mut self, on: bool) {
            self.calls.push(format!("ptt {}", on));
        }
        fn app_call(&mut self, call: &AppCall) {
            self.calls.push(format!("call {}", call.path()));
        }
        fn repeater_offset_active(&self) -> bool {
            self.repeater
        }
        fn s_meter(&self) -> Option<String> {
            self.s_meter.clone()
        }
        fn hw_readouts(&self) -> Vec<HwReadout> {
            self.readouts.clone()
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

    type TestHost = HostSession<RecordingRadio, RecordingMedia>;

    fn host_with_password(password: &str) -> TestHost {
        let config = RemoteConfig {
            remote_radio_password: password.to_string(),
            listen_address: "127.0.0.1".to_string(),
            ..Default::default()
        };
        let acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        HostSession::with_acceptor(
            &config,
            acceptor,
            config.ports().unwrap(),
            Arc::new(Mutex::new(RecordingRadio::default())),
            RecordingMedia::default(),
            LinkStats::new(),
        )
    }

    struct FakeHead {
        reader: BufReader<TcpStream>,
        writer: TcpStream,
    }

    impl FakeHead {
        fn connect(host: &TestHost) -> Self {
            let stream = TcpStream::connect(host.local_addr().unwrap()).unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            Self {
                writer: stream.try_clone().unwrap(),
                reader: BufReader::new(stream),
            }
        }

        fn send(&mut self, line: &str) {
            self.writer.write_all(format!("{}\n", line).as_bytes()).unwrap();
        }

        /// Next line without its terminator; `None` on EOF
        fn recv(&mut self) -> Option<String> {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line.trim_end().to_string()),
            }
        }
    }

    /// Tick until `done` holds or a second passes
    fn pump(host: &mut TestHost, now: Instant, done: impl Fn(&TestHost) -> bool) {
        for _ in 0..500 {
            host.tick(now);
            if done(host) {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("host never reached the expected state");
    }

    fn received(n: u64) -> impl Fn(&TestHost) -> bool {
        move |host| host.stats().records_received() >= n
    }

    /// Answer the challenge the host sent to `head`
    fn answer(head: &mut FakeHead) {
        let challenge = head.recv().unwrap();
        let challenge = challenge.strip_prefix("TOKEN;").unwrap().to_string();
        let digest = ChallengeSigner::from_password(PASSWORD)
            .unwrap()
            .respond(&challenge)
            .unwrap();
        head.send(&format!("TOKEN;{};1200", digest));
    }

    /// Accept, answer the challenge, and return the authenticated head
    fn authenticated(host: &mut TestHost, t0: Instant) -> FakeHead {
        let mut head = FakeHead::connect(host);
        pump(host, t0, |h| h.peer().is_some());
        answer(&mut head);
        pump(host, t0, |h| h.state() == LinkState::Connected);
        assert_eq!(head.recv().as_deref(), Some("TOKEN_OK"));
        head
    }

    fn radio_calls(host: &TestHost) -> Vec<String> {
        host.radio().lock().calls.clone()
    }

    #[test]
    fn test_challenge_is_first_record() {
        let mut host = host_with_password(PASSWORD);
        let mut head = FakeHead::connect(&host);
        pump(&mut host, Instant::now(), |h| h.peer().is_some());

        let line = head.recv().unwrap();
        let challenge = line.strip_prefix("TOKEN;").unwrap();
        assert_eq!(challenge.len(), TOKEN_HEX_LEN);
        assert!(challenge.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(host.state(), LinkState::Authenticating);
    }

    #[test]
    fn test_successful_handshake_starts_media() {
        let mut host = host_with_password(PASSWORD);
        let _head = authenticated(&mut host, Instant::now());

        assert_eq!(host.auth_state(), Some(AuthState::Ok));
        let plans = &host.media().engine().plans;
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].data_width, 1200);
        assert_eq!(plans[0].graph_port, 4586);
        assert_eq!(plans[0].peer.to_string(), "127.0.0.1");
    }

    #[test]
    fn test_wrong_response_then_timeout() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        let mut head = FakeHead::connect(&host);
        pump(&mut host, t0, |h| h.peer().is_some());
        head.recv().unwrap();

        head.send(&format!("TOKEN;{};1200", "0".repeat(TOKEN_HEX_LEN)));
        pump(&mut host, t0, received(1));
        assert_eq!(host.auth_state(), Some(AuthState::Pending));
        assert!(host.media().engine().plans.is_empty());

        host.tick(t0 + Duration::from_secs(5));
        assert_eq!(head.recv().as_deref(), Some("TOKEN_BAD"));
        assert_eq!(head.recv(), None);
        assert_eq!(host.state(), LinkState::Disconnected);
        assert!(host.stats().auth_failures() >= 2);
    }

    #[test]
    fn test_host_without_password_refuses() {
        let t0 = Instant::now();
        let mut host = host_with_password("");
        let mut head = FakeHead::connect(&host);
        pump(&mut host, t0, |h| h.peer().is_some());
        let challenge = head.recv().unwrap();
        let digest = ChallengeSigner::from_password(PASSWORD)
            .unwrap()
            .respond(challenge.strip_prefix("TOKEN;").unwrap())
            .unwrap();

        head.send(&format!("TOKEN;{};1200", digest));
        pump(&mut host, t0, |h| h.peer().is_none());
        assert_eq!(head.recv().as_deref(), Some("TOKEN_MISSING"));
        assert_eq!(head.recv(), None);
    }

    #[test]
    fn test_commands_ignored_before_auth() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        let mut head = FakeHead::connect(&host);
        pump(&mut host, t0, |h| h.peer().is_some());
        head.recv().unwrap();

        head.send("FREQ;0;7000000;NewDecim;40;None;0");
        head.send("HEARTBEAT");
        pump(&mut host, t0, received(2));
        assert!(radio_calls(&host).is_empty());
    }

    #[test]
    fn test_unknown_command_answered_and_session_continues() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        let mut head = authenticated(&mut host, t0);

        head.send("NotARealCommand;1");
        head.send("FREQ;100;14074000;tune;20;None;1");
        pump(&mut host, t0, received(3));

        assert_eq!(head.recv().as_deref(), Some("ERR_UNRECOGNIZED_CMD: NotARealCommand;1"));
        assert_eq!(host.state(), LinkState::Connected);
        assert_eq!(radio_calls(&host), vec!["tune 14074000 100"]);
    }

    #[test]
    fn test_bad_parameters_answered() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        let mut head = authenticated(&mut host, t0);

        head.send("FREQ;1;2");
        head.send(r#"JsonAppFunc;["os.system", "ls"]"#);
        pump(&mut host, t0, received(3));

        assert_eq!(head.recv().as_deref(), Some("ERR_PARAM: FREQ;1;2"));
        assert!(head.recv().unwrap().starts_with("ERR_UNSUPPORTED: JsonAppFunc;"));
        assert_eq!(host.stats().protocol_errors(), 2);
    }

    #[test]
    fn test_heartbeat_loss_closes_session() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        let mut head = authenticated(&mut host, t0);

        host.tick(t0 + Duration::from_secs(10));
        assert_eq!(host.state(), LinkState::Connected);

        host.tick(t0 + Duration::from_millis(10_100));
        assert_eq!(host.state(), LinkState::Disconnected);
        assert_eq!(host.media().engine().stops, 1);
        assert_eq!(head.recv(), None);
    }

    #[test]
    fn test_heartbeat_keeps_session_alive() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        let mut head = authenticated(&mut host, t0);

        head.send("HEARTBEAT");
        pump(&mut host, t0 + Duration::from_secs(8), received(2));
        host.tick(t0 + Duration::from_secs(17));
        assert_eq!(host.state(), LinkState::Connected);
    }

    #[test]
    fn test_mode_change_forces_key_up() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        let mut head = authenticated(&mut host, t0);

        head.send("CW;1;0");
        pump(&mut host, t0, received(2));
        assert_eq!(host.cw_scheduler().pending(), 1);

        head.send("USB;1");
        pump(&mut host, t0, received(3));
        assert!(host.cw_scheduler().is_idle());
        assert_eq!(radio_calls(&host), vec!["key false", "mode USB"]);
    }

    #[test]
    fn test_ptt_held_until_band_settles() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        host.radio().lock().repeater = true;
        let mut head = authenticated(&mut host, t0);

        head.send("2;1");
        pump(&mut host, t0, received(2));
        head.send("PTT;1");
        pump(&mut host, t0 + Duration::from_millis(50), received(3));
        assert_eq!(radio_calls(&host), vec!["band 2"]);

        host.tick(t0 + Duration::from_millis(200));
        assert_eq!(radio_calls(&host), vec!["band 2"]);

        host.tick(t0 + Duration::from_millis(260));
        assert_eq!(radio_calls(&host), vec!["band 2", "ptt true"]);
    }

    #[test]
    fn test_ptt_release_cancels_hold() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        host.radio().lock().repeater = true;
        let mut head = authenticated(&mut host, t0);

        head.send("2;1");
        head.send("PTT;1");
        head.send("PTT;0");
        pump(&mut host, t0, received(4));
        host.tick(t0 + Duration::from_secs(1));
        assert_eq!(radio_calls(&host), vec!["band 2", "ptt false"]);
    }

    #[test]
    fn test_display_sent_on_change() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        let mut head = authenticated(&mut host, t0);

        {
            let radio = host.radio();
            let mut radio = radio.lock();
            radio.s_meter = Some("S9 +10".to_string());
            radio.readouts = vec![
                HwReadout {
                    key: "HL2_TEMP".to_string(),
                    fields: vec!["41.5".into(), "0.8".into(), "4.9".into(), "1.2".into()],
                },
                HwReadout {
                    key: "UNKNOWN_HW".to_string(),
                    fields: vec!["1".into()],
                },
            ];
        }

        // Readouts are rate limited to once a second from the last emission at auth time
        host.tick(t0 + Duration::from_secs(1));
        host.tick(t0 + Duration::from_millis(1_100));
        assert_eq!(head.recv().as_deref(), Some("M;S9 +10"));
        assert_eq!(head.recv().as_deref(), Some("HL2_TEMP;41.5;0.8;4.9;1.2"));

        host.radio().lock().s_meter = Some("S7".to_string());
        host.tick(t0 + Duration::from_millis(1_200));
        assert_eq!(head.recv().as_deref(), Some("M;S7"));
        assert_eq!(host.stats().records_sent(), 5);
    }

    #[test]
    fn test_new_connection_replaces_session_once_authenticated() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        let mut first = authenticated(&mut host, t0);
        let first_peer = host.peer();

        let mut second = FakeHead::connect(&host);
        pump(&mut host, t0, |h| h.stats().sessions() == 2);
        assert_eq!(host.state(), LinkState::Connected);
        assert_eq!(host.peer(), first_peer);
        assert_eq!(host.media().engine().stops, 0);

        answer(&mut second);
        pump(&mut host, t0, |h| h.peer() != first_peer);
        assert_eq!(second.recv().as_deref(), Some("TOKEN_OK"));
        assert_eq!(first.recv(), None);
        assert_eq!(host.state(), LinkState::Connected);
        assert_eq!(host.media().engine().stops, 1);
        assert_eq!(host.media().engine().plans.len(), 2);
    }

    #[test]
    fn test_unauthenticated_connection_leaves_session_intact() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        let mut operator = authenticated(&mut host, t0);

        let mut intruder = FakeHead::connect(&host);
        pump(&mut host, t0, |h| h.stats().sessions() == 2);
        assert!(intruder.recv().unwrap().starts_with("TOKEN;"));
        intruder.send(&format!("TOKEN;{};1200", "0".repeat(TOKEN_HEX_LEN)));
        intruder.send("FREQ;0;3500000;NewDecim;80;None;0");
        pump(&mut host, t0, |h| h.stats().auth_failures() >= 1);

        // Operator traffic still reaches the radio
        operator.send("HEARTBEAT");
        operator.send("FREQ;100;14074000;tune;20;None;1");
        pump(&mut host, t0, |h| !h.radio().lock().calls.is_empty());

        host.tick(t0 + Duration::from_secs(5));
        assert_eq!(intruder.recv().as_deref(), Some("TOKEN_BAD"));
        assert_eq!(intruder.recv(), None);

        assert_eq!(host.state(), LinkState::Connected);
        assert_eq!(host.media().engine().stops, 0);
        assert_eq!(radio_calls(&host), vec!["tune 14074000 100"]);
    }

    #[test]
    fn test_cw_phrase_spacing_survives_socket_jitter() {
        let mut host = host_with_password(PASSWORD);
        let head = authenticated(&mut host, Instant::now());
        let cw = host.cw_scheduler();

        // 10 ms elements sent with 0, 8, 3 and 12 ms of extra delay
        let mut writer = head.writer.try_clone().unwrap();
        let started = Instant::now();
        let sends = thread::spawn(move || {
            for (at, line) in [(0u64, "CW;1;0"), (18, "CW;0;10"), (23, "CW;1;20"), (42, "CW;0;30")] {
                let due = started + Duration::from_millis(at);
                thread::sleep(due.saturating_duration_since(Instant::now()));
                writer.write_all(format!("{}\n", line).as_bytes()).unwrap();
            }
        });

        let mut released: Vec<(bool, Instant)> = Vec::new();
        let deadline = started + Duration::from_millis(500);
        while released.len() < 4 && Instant::now() < deadline {
            host.poll_io(Instant::now());
            cw.poll(Instant::now(), |down| released.push((down, Instant::now())));
            thread::sleep(Duration::from_millis(1));
        }
        sends.join().unwrap();

        let downs: Vec<bool> = released.iter().map(|(down, _)| *down).collect();
        assert_eq!(downs, vec![true, false, true, false]);
        let first = released[0].1;
        assert!(first.duration_since(started) < Duration::from_millis(40));
        for ((_, at), ideal) in released.iter().zip([0u64, 10, 20, 30]) {
            let offset = at.duration_since(first).as_millis() as i64;
            assert!((offset - ideal as i64).abs() <= 5, "released at +{} ms, ideal +{} ms", offset, ideal);
        }
    }

    #[test]
    fn test_quit_closes_without_reply() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        let mut head = authenticated(&mut host, t0);

        head.send("QUIT");
        pump(&mut host, t0, |h| h.state() == LinkState::Disconnected);
        assert_eq!(head.recv(), None);
    }

    #[test]
    fn test_shutdown_sends_quit() {
        let t0 = Instant::now();
        let mut host = host_with_password(PASSWORD);
        let mut head = authenticated(&mut host, t0);

        host.shutdown();
        assert_eq!(head.recv().as_deref(), Some("Q"));
        assert_eq!(head.recv(), None);
    }
}
