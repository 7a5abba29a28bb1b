//! Per-connection session state for IPMI v1.5 and v2.0 (RMCP+).
//!
//! A `Session` is owned by exactly one client connection. Everything that
//! mutates it (sequence numbers, keys, negotiated algorithms) goes through
//! the methods here, and the client keeps it behind a single lock.

mod v15;
mod v20;

use core::fmt;

use crate::auth_code::AuthType;
use crate::crypto::SecretBytes;
use crate::commands::ActivateSession;
use crate::error::{Error, Result};
use crate::message::IpmiRequest;
use crate::types::{ActivatedSession, IpmiVersion, PrivilegeLevel, SessionChallenge};

pub(crate) use v15::SessionV15;
pub(crate) use v20::SessionV20;

/// Largest IPMI requester sequence number; allocation wraps back to 1.
const MAX_IPMI_SEQ: u8 = 0x3F;

/// Lifecycle of an RMCP+ session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Nothing exchanged yet (or Open Session done, RAKP not started).
    PreSession,
    /// RAKP Message 1 sent.
    Rakp1Sent,
    /// RAKP Message 2 validated; SIK, K1 and K2 derived.
    Rakp2Received,
    /// RAKP Message 3 sent.
    Rakp3Sent,
    /// RAKP Message 4 validated; the session carries IPMI traffic.
    Active,
    /// Close Session issued; the session is unusable.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PreSession => "pre-session",
            Self::Rakp1Sent => "rakp1-sent",
            Self::Rakp2Received => "rakp2-received",
            Self::Rakp3Sent => "rakp3-sent",
            Self::Active => "active",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Who is logging in and how.
#[derive(Debug, Clone)]
pub(crate) struct Credentials {
    pub username: Vec<u8>,
    pub password: SecretBytes,
    pub bmc_key: Option<SecretBytes>,
    pub privilege: PrivilegeLevel,
    pub name_only_lookup: bool,
}

#[derive(Debug)]
enum SessionVariant {
    V15(SessionV15),
    V20(Box<SessionV20>),
}

#[derive(Debug)]
pub(crate) struct Session {
    variant: SessionVariant,
    ipmi_seq: u8,
}

impl Session {
    pub(crate) fn v15(session: SessionV15) -> Self {
        Self::with_variant(SessionVariant::V15(session))
    }

    pub(crate) fn v20(session: SessionV20) -> Self {
        Self::with_variant(SessionVariant::V20(Box::new(session)))
    }

    fn with_variant(variant: SessionVariant) -> Self {
        Self {
            variant,
            ipmi_seq: 1,
        }
    }

    pub(crate) fn version(&self) -> IpmiVersion {
        match self.variant {
            SessionVariant::V15(_) => IpmiVersion::V15,
            SessionVariant::V20(_) => IpmiVersion::V20,
        }
    }

    /// Legacy AuthType carried in the session header.
    pub(crate) fn auth_type(&self) -> AuthType {
        match &self.variant {
            SessionVariant::V15(s) => s.auth_type(),
            SessionVariant::V20(_) => AuthType::RmcpPlus,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        match &self.variant {
            SessionVariant::V15(s) => s.state(),
            SessionVariant::V20(s) => s.state(),
        }
    }

    pub(crate) fn cipher_suite_id(&self) -> Option<u8> {
        match &self.variant {
            SessionVariant::V15(_) => None,
            SessionVariant::V20(s) => Some(s.cipher_suite_id()),
        }
    }

    /// Adopt a Get Session Challenge result; returns the Activate Session
    /// request to send next.
    pub(crate) fn on_challenge(&mut self, challenge: SessionChallenge) -> Result<ActivateSession> {
        match &mut self.variant {
            SessionVariant::V15(s) => {
                s.on_challenge(challenge)?;
                s.activate_request()
            }
            SessionVariant::V20(_) => Err(Error::InvalidState("session challenge on an RMCP+ session")),
        }
    }

    pub(crate) fn on_activate(&mut self, outcome: Result<ActivatedSession>) -> Result<()> {
        match &mut self.variant {
            SessionVariant::V15(s) => s.on_activate(outcome),
            SessionVariant::V20(_) => Err(Error::InvalidState("activate session on an RMCP+ session")),
        }
    }

    /// Next requester sequence number: 1, 2, .. 63, 1, ..
    pub(crate) fn next_ipmi_seq(&mut self) -> u8 {
        let seq = self.ipmi_seq;
        self.ipmi_seq = if seq >= MAX_IPMI_SEQ { 1 } else { seq + 1 };
        seq
    }

    /// Allocate a requester sequence number and build the request frame.
    pub(crate) fn build_request(&mut self, net_fn: u8, cmd: u8, data: Vec<u8>) -> IpmiRequest {
        let seq = self.next_ipmi_seq();
        IpmiRequest::new(net_fn, cmd, seq, data)
    }

    /// Wrap an IPMI message in the session's packet format.
    pub(crate) fn encode_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        match &mut self.variant {
            SessionVariant::V15(s) => s.encode_message(message),
            SessionVariant::V20(s) => s.encode_message(message),
        }
    }

    /// Verify, decrypt and unwrap an IPMI message from a session packet.
    pub(crate) fn decode_message(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        match &mut self.variant {
            SessionVariant::V15(s) => s.decode_message(packet),
            SessionVariant::V20(s) => s.decode_message(packet),
        }
    }

    pub(crate) fn mark_closed(&mut self) {
        match &mut self.variant {
            SessionVariant::V15(s) => s.mark_closed(),
            SessionVariant::V20(s) => s.mark_closed(),
        }
    }

    /// Session ID the BMC knows this session by (Close Session argument).
    pub(crate) fn bmc_session_id(&self) -> u32 {
        match &self.variant {
            SessionVariant::V15(s) => s.session_id(),
            SessionVariant::V20(s) => s.bmc_session_id(),
        }
    }
}
