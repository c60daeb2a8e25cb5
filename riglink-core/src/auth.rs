// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Challenge/response authentication
//!
//! The host sends a fresh 64-hex-character challenge on every accepted connection.
//! The head proves knowledge of the shared password by returning
//! `hex(HMAC-SHA3-256(password, challenge))`. The password itself never crosses the
//! wire and a recorded response is useless against the next challenge.

use crate::error::AuthFailure;
use crate::{Error, Result, AUTH_RETRY_PENALTY, AUTH_TIMEOUT};
use hmac::{Hmac, Mac};
use sha3::Sha3_256;
use std::time::Instant;

type HmacSha3 = Hmac<Sha3_256>;

/// Random bytes per challenge (hex-encoded to 64 characters)
pub const CHALLENGE_BYTES: usize = 32;

/// Length of a hex-encoded challenge or response digest
pub const TOKEN_HEX_LEN: usize = CHALLENGE_BYTES * 2;

/// Session authentication state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Pending,
    Ok,
    Bad,
    Missing,
}

/// A challenge issued by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeToken(String);

impl ChallengeToken {
    /// Generate a fresh random challenge
    pub fn generate() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; CHALLENGE_BYTES];
        rand::thread_rng().fill(&mut bytes[..]);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Shared-secret signer for challenges
#[derive(Clone)]
pub struct ChallengeSigner {
    key: Vec<u8>,
}

impl ChallengeSigner {
    /// Create a signer from the configured password; `None` if the password is empty
    pub fn from_password(password: &str) -> Option<Self> {
        if password.is_empty() {
            None
        } else {
            Some(Self {
                key: password.as_bytes().to_vec(),
            })
        }
    }

    fn mac(&self) -> Result<HmacSha3> {
        HmacSha3::new_from_slice(&self.key)
            .map_err(|e| Error::Config(format!("Invalid password length: {}", e)))
    }

    /// Compute the hex response for a challenge
    pub fn respond(&self, challenge: &str) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(challenge.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Verify a hex response using constant-time comparison
    ///
    /// Responses that are not valid hex of the right length simply fail.
    pub fn verify(&self, challenge: &str, response_hex: &str) -> Result<bool> {
        if response_hex.len() != TOKEN_HEX_LEN {
            return Ok(false);
        }
        let Ok(response) = hex::decode(response_hex) else {
            return Ok(false);
        };
        let mut mac = self.mac()?;
        mac.update(challenge.as_bytes());
        Ok(mac.verify_slice(&response).is_ok())
    }
}

/// What the host should do after evaluating a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Send `TOKEN_OK`, record the head's data width, start media
    Accepted { data_width: u32 },
    /// Silent: wrong response, or a response inside the retry penalty window
    Retry,
    /// Send `TOKEN_MISSING` and close
    Missing,
}

/// Host side of the handshake for one session
#[derive(Debug)]
pub struct HostHandshake {
    challenge: ChallengeToken,
    deadline: Instant,
    retry_not_before: Option<Instant>,
    state: AuthState,
}

impl HostHandshake {
    /// Start a handshake at accept time with a fresh challenge
    pub fn start(now: Instant) -> Self {
        Self {
            challenge: ChallengeToken::generate(),
            deadline: now + AUTH_TIMEOUT,
            retry_not_before: None,
            state: AuthState::Pending,
        }
    }

    pub fn challenge(&self) -> &ChallengeToken {
        &self.challenge
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Evaluate `TOKEN;<digest>;<data_width>` from the head
    pub fn evaluate(
        &mut self,
        signer: Option<&ChallengeSigner>,
        digest: &str,
        data_width: &str,
        now: Instant,
    ) -> Result<Verdict> {
        if self.state != AuthState::Pending {
            return Ok(Verdict::Retry);
        }
        let Some(signer) = signer else {
            self.state = AuthState::Missing;
            return Ok(Verdict::Missing);
        };
        if let Some(until) = self.retry_not_before {
            if now < until {
                return Ok(Verdict::Retry);
            }
        }

        let width = data_width.trim().parse::<u32>().ok();
        match (signer.verify(self.challenge.as_str(), digest)?, width) {
            (true, Some(data_width)) => {
                self.state = AuthState::Ok;
                self.retry_not_before = None;
                Ok(Verdict::Accepted { data_width })
            }
            _ => {
                self.retry_not_before = Some(now + AUTH_RETRY_PENALTY);
                Ok(Verdict::Retry)
            }
        }
    }

    /// True once the auth window has passed without success; marks the session bad
    pub fn check_expired(&mut self, now: Instant) -> bool {
        if self.state == AuthState::Pending && now >= self.deadline {
            self.state = AuthState::Bad;
            true
        } else {
            false
        }
    }
}

/// Head side: answer a challenge or explain why we cannot
pub fn answer_challenge(
    signer: Option<&ChallengeSigner>,
    challenge: &str,
) -> Result<String> {
    match signer {
        Some(signer) => signer.respond(challenge),
        None => Err(Error::Auth(AuthFailure::NoLocalPassword)),
    }
}
