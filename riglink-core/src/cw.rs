// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! CW key timing across a jittery network
//!
//! The head stamps every key transition with its offset from the start of the
//! current *phrase* (a keying sequence bounded by idle gaps). The host rebuilds a
//! local phrase clock that starts `cw_delay` after the first event arrives, and
//! releases each transition at `phrase_begin + offset`. As long as network jitter
//! stays below `cw_delay`, the released spacing matches what the operator keyed.
//!
//! # Markers
//!
//! - `(down=1, offset=0)` begins a new phrase
//! - `(down=0, offset=0)` flushes everything and forces key-up immediately
//!
//! Once the queue has drained and the key has been idle for longer than the phrase
//! break, the phrase is over; a later event without its start marker opens a new
//! phrase instead of being timed against the old one.

use crate::codec::Record;
use crate::command::Command;
use crate::link::LinkSlot;
use crate::stats::LinkStats;
use crate::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// One key transition with its head-side phrase offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CwEvent {
    pub down: bool,
    pub offset_ms: u32,
}

impl CwEvent {
    /// Flush the queue and release the key now
    pub const FORCE_UP: CwEvent = CwEvent {
        down: false,
        offset_ms: 0,
    };

    /// First key-down of a phrase
    pub const PHRASE_START: CwEvent = CwEvent {
        down: true,
        offset_ms: 0,
    };

    pub fn is_force_up(&self) -> bool {
        *self == Self::FORCE_UP
    }

    pub fn to_record(&self) -> Record {
        Command::Cw(*self).to_record()
    }
}

/// Head side: turns key transitions into phrase-relative events
#[derive(Debug)]
pub struct CwKeyer {
    phrase_break: Duration,
    phrase_begin: Option<Instant>,
    last_event: Option<Instant>,
}

impl CwKeyer {
    pub fn new(phrase_break: Duration) -> Self {
        Self {
            phrase_break,
            phrase_begin: None,
            last_event: None,
        }
    }

    /// Stamp a key transition
    ///
    /// A key-down after more than `phrase_break` of idle starts a new phrase. A key-up
    /// outside any phrase has nothing to release and yields `None`.
    pub fn key(&mut self, down: bool, now: Instant) -> Option<CwEvent> {
        let idle = self
            .last_event
            .map_or(true, |last| now.saturating_duration_since(last) > self.phrase_break);

        if down && (self.phrase_begin.is_none() || idle) {
            self.phrase_begin = Some(now);
            self.last_event = Some(now);
            return Some(CwEvent::PHRASE_START);
        }

        let begin = self.phrase_begin?;
        let elapsed = now.saturating_duration_since(begin).as_millis();
        // Offset 0 is reserved for the phrase markers
        let offset_ms = u32::try_from(elapsed).unwrap_or(u32::MAX).max(1);
        self.last_event = Some(now);
        Some(CwEvent { down, offset_ms })
    }

    /// Abandon the phrase and produce the force key-up marker
    pub fn stop(&mut self) -> CwEvent {
        self.phrase_begin = None;
        self.last_event = None;
        CwEvent::FORCE_UP
    }
}

/// Sound-thread handle that stamps key transitions and sends them to the host
#[derive(Clone)]
pub struct CwSender {
    keyer: Arc<Mutex<CwKeyer>>,
    link: LinkSlot,
}

impl CwSender {
    pub fn new(phrase_break: Duration, link: LinkSlot) -> Self {
        Self {
            keyer: Arc::new(Mutex::new(CwKeyer::new(phrase_break))),
            link,
        }
    }

    /// Report a key transition; dropped unless the session is authenticated
    pub fn key(&self, down: bool) -> Result<()> {
        let event = self.keyer.lock().key(down, Instant::now());
        match (event, self.link.current()) {
            (Some(event), Some(sender)) if sender.is_authenticated() => sender.send(&event.to_record()),
            _ => Ok(()),
        }
    }

    /// Force key-up at the host and forget the current phrase
    pub fn stop(&self) -> Result<()> {
        let event = self.keyer.lock().stop();
        match self.link.current() {
            Some(sender) if sender.is_authenticated() => sender.send(&event.to_record()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ScheduledKey {
    down: bool,
    at: Instant,
}

struct SchedulerInner {
    delay: Duration,
    phrase_break: Duration,
    phrase_begin: Option<Instant>,
    on_deck: Option<ScheduledKey>,
    queue: VecDeque<ScheduledKey>,
    last_scheduled: Option<Instant>,
}

impl SchedulerInner {
    fn flush(&mut self) {
        self.phrase_begin = None;
        self.on_deck = None;
        self.queue.clear();
        self.last_scheduled = None;
    }

    /// Everything queued has played and the key has been idle past a phrase break
    fn phrase_ended(&self, now: Instant) -> bool {
        self.on_deck.is_none()
            && self
                .last_scheduled
                .is_some_and(|last| now.saturating_duration_since(last) > self.phrase_break)
    }
}

/// What `CwScheduler::push` did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CwAction {
    /// Queued for release at the given instant
    Scheduled(Instant),
    /// Queue flushed and key released
    ForcedUp,
}

/// Host side: jitter-absorbing release queue for CW events
///
/// # Design
///
/// - One *on-deck* event plus a FIFO of later events
/// - Release instants never decrease, so the on-deck event is always the earliest
/// - `push` runs on the protocol thread, `poll` on the sound thread; both hold the
///   lock for O(1) work
/// - The key callback runs under the lock, so a force-up can never be overtaken by
///   a release that was already in flight
#[derive(Clone)]
pub struct CwScheduler {
    inner: Arc<Mutex<SchedulerInner>>,
    stats: LinkStats,
}

impl CwScheduler {
    pub fn new(delay: Duration, phrase_break: Duration, stats: LinkStats) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                delay,
                phrase_break,
                phrase_begin: None,
                on_deck: None,
                queue: VecDeque::new(),
                last_scheduled: None,
            })),
            stats,
        }
    }

    /// Accept an event from the head
    pub fn push<F: FnMut(bool)>(&self, event: CwEvent, now: Instant, mut set_key: F) -> CwAction {
        let mut inner = self.inner.lock();

        if event.is_force_up() {
            inner.flush();
            set_key(false);
            return CwAction::ForcedUp;
        }

        let offset = Duration::from_millis(u64::from(event.offset_ms));
        if event.offset_ms == 0 {
            inner.phrase_begin = Some(now + inner.delay);
        } else if inner.phrase_ended(now) {
            inner.phrase_begin = None;
        }
        let begin = match inner.phrase_begin {
            Some(begin) => begin,
            None => {
                // Phrase start was lost; anchor the phrase so this event plays after the delay
                let begin = (now + inner.delay).checked_sub(offset).unwrap_or(now);
                inner.phrase_begin = Some(begin);
                begin
            }
        };

        let mut at = begin + offset;
        if let Some(last) = inner.last_scheduled {
            at = at.max(last);
        }
        inner.last_scheduled = Some(at);

        let key = ScheduledKey {
            down: event.down,
            at,
        };
        if inner.on_deck.is_none() {
            inner.on_deck = Some(key);
        } else {
            inner.queue.push_back(key);
        }
        CwAction::Scheduled(at)
    }

    /// Release the on-deck event if it is due; at most one release per call
    ///
    /// Returns true if the key line was driven.
    pub fn poll<F: FnMut(bool)>(&self, now: Instant, mut set_key: F) -> bool {
        let mut inner = self.inner.lock();
        let Some(key) = inner.on_deck else {
            return false;
        };
        if now < key.at {
            return false;
        }
        set_key(key.down);
        inner.on_deck = inner.queue.pop_front();
        drop(inner);

        let lateness = now.saturating_duration_since(key.at);
        self.stats.record_cw_release(lateness.as_micros() as u64);
        true
    }

    /// Flush pending events and release the key (disconnect, mode change)
    pub fn force_stop<F: FnMut(bool)>(&self, mut set_key: F) {
        let mut inner = self.inner.lock();
        let dropped = usize::from(inner.on_deck.is_some()) + inner.queue.len();
        inner.flush();
        set_key(false);
        drop(inner);
        if dropped > 0 {
            debug!("CW force stop dropped {} pending events", dropped);
        }
    }

    /// Number of events waiting for release
    pub fn pending(&self) -> usize {
        let inner = self.inner.lock();
        usize::from(inner.on_deck.is_some()) + inner.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}
