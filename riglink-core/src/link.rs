// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! TCP control channel
//!
//! # Design
//!
//! - Sockets are non-blocking and driven by the supervisor's fast I/O pass
//! - The head connects with a 100 ms timeout per attempt; a socket whose connect is
//!   still in flight is kept and re-driven on the next attempt
//! - The write half is shared by the UI and sound threads through [`LinkSender`];
//!   each record is appended whole to one outbound buffer under one lock and
//!   flushed without ever waiting on the peer
//! - The read half is owned by the session and drained in ≤ 1 KiB chunks

use crate::codec::{Record, RecordDecoder};
use crate::error::ErrorClass;
use crate::stats::LinkStats;
use crate::{Error, Result, CONNECT_TIMEOUT, READ_CHUNK_SIZE, TOS_EXPEDITED_FORWARDING};
use bytes::{Buf, BytesMut};
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Longest buffered output may sit without the socket taking a byte
pub const SEND_STALL_LIMIT: Duration = Duration::from_millis(500);

/// Outbound bytes a session may hold before the peer is declared dead
pub const SEND_BUFFER_LIMIT: usize = 64 * 1024;

/// Reads attempted per tick before yielding back to the supervisor
pub const MAX_READS_PER_TICK: usize = 32;

/// Lifecycle of the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Closing,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Authenticating => "authenticating",
            LinkState::Connected => "connected",
            LinkState::Closing => "closing",
        };
        f.write_str(name)
    }
}

#[cfg(target_os = "linux")]
mod os_codes {
    pub const IN_PROGRESS: &[i32] = &[114, 115]; // EALREADY, EINPROGRESS
    pub const TRANSIENT: &[i32] = &[22, 103, 111]; // EINVAL, ECONNABORTED, ECONNREFUSED
    pub const IS_CONNECTED: &[i32] = &[106];
}

#[cfg(all(unix, not(target_os = "linux")))]
mod os_codes {
    pub const IN_PROGRESS: &[i32] = &[36, 37];
    pub const TRANSIENT: &[i32] = &[22, 53, 61];
    pub const IS_CONNECTED: &[i32] = &[56];
}

#[cfg(windows)]
mod os_codes {
    pub const IN_PROGRESS: &[i32] = &[10035, 10036, 10037]; // WSAEWOULDBLOCK, WSAEINPROGRESS, WSAEALREADY
    pub const TRANSIENT: &[i32] = &[10022, 10053, 10061]; // WSAEINVAL, WSAECONNABORTED, WSAECONNREFUSED
    pub const IS_CONNECTED: &[i32] = &[10056];
}

#[cfg(not(any(unix, windows)))]
mod os_codes {
    pub const IN_PROGRESS: &[i32] = &[];
    pub const TRANSIENT: &[i32] = &[];
    pub const IS_CONNECTED: &[i32] = &[];
}

/// Classify a connect error into retry, confirm or give up
pub fn classify_connect_error(err: &io::Error) -> ErrorClass {
    if let Some(code) = err.raw_os_error() {
        if os_codes::IS_CONNECTED.contains(&code) {
            return ErrorClass::AlreadyConnected;
        }
        if os_codes::IN_PROGRESS.contains(&code) || os_codes::TRANSIENT.contains(&code) {
            return ErrorClass::Transient;
        }
    }
    match err.kind() {
        ErrorKind::TimedOut
        | ErrorKind::WouldBlock
        | ErrorKind::Interrupted
        | ErrorKind::InvalidInput
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionRefused => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

/// The connect may still complete in the background, so the socket is worth keeping
fn connect_in_flight(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
        || err
            .raw_os_error()
            .is_some_and(|code| os_codes::IN_PROGRESS.contains(&code))
}

/// Result of one connect attempt
#[derive(Debug)]
pub enum ConnectOutcome {
    Connected(TcpStream),
    /// Not connected yet; try again on the next heartbeat
    Pending,
}

/// Head-side connector that survives across attempts
#[derive(Debug)]
pub struct Connector {
    peer: SocketAddr,
    in_flight: Option<Socket>,
}

impl Connector {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            in_flight: None,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Abandon any in-flight connect
    pub fn reset(&mut self) {
        self.in_flight = None;
    }

    /// Make one connect attempt, bounded by the connect timeout
    ///
    /// Transient failures yield `Pending`; only errors that will not clear on their
    /// own are returned as `TransportFatal`.
    #[instrument(skip(self), fields(peer = %self.peer))]
    pub fn attempt(&mut self) -> Result<ConnectOutcome> {
        let socket = match self.in_flight.take() {
            Some(socket) => socket,
            None => self.new_socket()?,
        };

        let err = match socket.connect_timeout(&SockAddr::from(self.peer), CONNECT_TIMEOUT) {
            Ok(()) => return finish_connect(socket).map(ConnectOutcome::Connected),
            Err(e) => e,
        };

        match classify_connect_error(&err) {
            ErrorClass::AlreadyConnected => {
                // Some stacks report completion of an earlier attempt this way
                if socket.send(&[]).is_ok() {
                    finish_connect(socket).map(ConnectOutcome::Connected)
                } else {
                    debug!("Socket claims connected but the peer check failed, starting over");
                    Ok(ConnectOutcome::Pending)
                }
            }
            ErrorClass::Transient => {
                debug!("Connect attempt pending: {}", err);
                if connect_in_flight(&err) {
                    self.in_flight = Some(socket);
                }
                Ok(ConnectOutcome::Pending)
            }
            ErrorClass::Fatal => Err(Error::TransportFatal(format!(
                "connect to {} failed: {}",
                self.peer, err
            ))),
        }
    }

    fn new_socket(&self) -> Result<Socket> {
        let socket = Socket::new(Domain::for_address(self.peer), Type::STREAM, Some(Protocol::TCP))?;
        if self.peer.is_ipv4() {
            if let Err(e) = socket.set_tos(TOS_EXPEDITED_FORWARDING) {
                warn!("Could not set IP type of service: {}", e);
            }
        }
        Ok(socket)
    }
}

fn finish_connect(socket: Socket) -> Result<TcpStream> {
    socket.set_nodelay(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Host-side non-blocking listener
#[derive(Debug)]
pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!("Listening for control heads on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one pending connection, if any
    #[instrument(skip(self))]
    pub fn accept(&self) -> Result<Option<(TcpStream, SocketAddr)>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nodelay(true)?;
                stream.set_nonblocking(true)?;
                Ok(Some((stream, peer)))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(Error::TransportTransient(format!("accept failed: {}", e))),
        }
    }
}

/// Split a connected stream into the shared sender and the session's reader
pub fn open_channel(stream: TcpStream, stats: LinkStats) -> Result<(LinkSender, LinkReader)> {
    let peer = stream.peer_addr()?;
    let writer = stream.try_clone()?;
    let sender = LinkSender {
        inner: Arc::new(SenderInner {
            out: Mutex::new(Outbound {
                stream: writer,
                pending: BytesMut::new(),
                stalled_since: None,
            }),
            peer,
            alive: AtomicBool::new(true),
            authenticated: AtomicBool::new(false),
            stats: stats.clone(),
        }),
    };
    let reader = LinkReader {
        stream,
        decoder: RecordDecoder::new(),
        stats,
    };
    Ok((sender, reader))
}

/// Write half plus the bytes the kernel has not taken yet
struct Outbound {
    stream: TcpStream,
    pending: BytesMut,
    stalled_since: Option<Instant>,
}

impl Outbound {
    /// Hand buffered bytes to the socket without waiting for room
    fn flush(&mut self, now: Instant) -> io::Result<()> {
        while !self.pending.is_empty() {
            match self.stream.write(&self.pending) {
                Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "peer stopped reading")),
                Ok(n) => {
                    self.pending.advance(n);
                    self.stalled_since = None;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let since = *self.stalled_since.get_or_insert(now);
                    if now.saturating_duration_since(since) > SEND_STALL_LIMIT {
                        return Err(io::Error::new(ErrorKind::TimedOut, "send buffer stalled"));
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

struct SenderInner {
    out: Mutex<Outbound>,
    peer: SocketAddr,
    alive: AtomicBool,
    authenticated: AtomicBool,
    stats: LinkStats,
}

/// Shared write half of the control channel
///
/// A record is appended whole to one outbound buffer under the lock, so bytes of
/// concurrent sends never interleave. Whatever the socket does not take at once
/// stays buffered for the next send or [`LinkSender::flush`]; no caller ever waits
/// for the peer.
#[derive(Clone)]
pub struct LinkSender {
    inner: Arc<SenderInner>,
}

impl LinkSender {
    /// Queue one record and push as much as the socket takes right now
    pub fn send(&self, record: &Record) -> Result<()> {
        let bytes = record.encode()?;
        if !self.is_alive() {
            return Err(Error::TransportFatal("link closed".to_string()));
        }

        let outcome = {
            let mut out = self.inner.out.lock();
            if out.pending.len() + bytes.len() > SEND_BUFFER_LIMIT {
                Err(io::Error::other("outbound buffer full"))
            } else {
                out.pending.extend_from_slice(&bytes);
                out.flush(Instant::now())
            }
        };

        match outcome {
            Ok(()) => {
                self.inner.stats.record_sent();
                debug!("-> {}", record);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Push buffered bytes; called on every I/O pass
    pub fn flush(&self) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::TransportFatal("link closed".to_string()));
        }
        let outcome = self.inner.out.lock().flush(Instant::now());
        outcome.map_err(|e| self.fail(e))
    }

    fn fail(&self, e: io::Error) -> Error {
        self.inner.alive.store(false, Ordering::Release);
        self.inner.stats.record_send_failure();
        warn!("Send to {} failed: {}", self.inner.peer, e);
        Error::TransportFatal(format!("send failed: {}", e))
    }

    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// True once the handshake completed on this session
    pub fn is_authenticated(&self) -> bool {
        self.is_alive() && self.inner.authenticated.load(Ordering::Acquire)
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.inner.authenticated.store(authenticated, Ordering::Release);
    }

    /// Close both directions; later sends fail
    ///
    /// Buffered records (a final quit) get one last non-blocking flush first.
    pub fn close(&self) {
        self.inner.alive.store(false, Ordering::Release);
        self.inner.authenticated.store(false, Ordering::Release);
        let (flushed, shut) = {
            let mut out = self.inner.out.lock();
            let flushed = out.flush(Instant::now());
            (flushed, out.stream.shutdown(Shutdown::Both))
        };
        if let Err(e) = flushed {
            debug!("Unsent records to {} dropped: {}", self.inner.peer, e);
        }
        if let Err(e) = shut {
            debug!("Shutdown of link to {} failed: {}", self.inner.peer, e);
        }
    }
}

/// Slot holding the sender of the current session, if any
///
/// Threads that outlive individual sessions (the sound thread, the console) send
/// through the slot and simply find it empty while disconnected.
#[derive(Clone, Default)]
pub struct LinkSlot {
    current: Arc<RwLock<Option<LinkSender>>>,
}

impl LinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, sender: Option<LinkSender>) {
        *self.current.write() = sender;
    }

    pub fn current(&self) -> Option<LinkSender> {
        self.current.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(LinkSender::is_authenticated)
    }
}

/// Read half of the control channel, owned by the session
pub struct LinkReader {
    stream: TcpStream,
    decoder: RecordDecoder,
    stats: LinkStats,
}

impl LinkReader {
    /// Drain whatever the socket has into complete records
    ///
    /// Records decoded before an error are still appended to `out`, so a reply sent
    /// just before the peer closed is not lost.
    pub fn poll_records(&mut self, out: &mut Vec<Record>) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        for _ in 0..MAX_READS_PER_TICK {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(Error::TransportFatal("peer closed".to_string())),
                Ok(n) => {
                    for record in self.decoder.feed(&chunk[..n]) {
                        self.stats.record_received();
                        debug!("<- {}", record);
                        out.push(record);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::TransportFatal(format!("read failed: {}", e))),
            }
        }
        Ok(())
    }
}

/// Time of the last heartbeat, stored as milliseconds since the session epoch
#[derive(Debug)]
pub struct HeartbeatClock {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl HeartbeatClock {
    pub fn new(now: Instant) -> Self {
        Self {
            epoch: now,
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self, now: Instant) {
        let ms = now.saturating_duration_since(self.epoch).as_millis() as u64;
        self.last_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn last(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }

    /// True when the peer has been silent for longer than `timeout`
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last()) > timeout
    }
}
