use rand::RngCore;

use super::{Credentials, SessionState};
use crate::auth_code::{AuthCodeMultiSessionInput, AuthType};
use crate::commands::ActivateSession;
use crate::crypto::ct_eq;
use crate::error::{Error, Result};
use crate::protocol::{self, V15Packet};
use crate::types::{ActivatedSession, SessionChallenge};

/// IPMI v1.5 LAN session (Get Session Challenge + Activate Session).
#[derive(Debug)]
pub(crate) struct SessionV15 {
    credentials: Credentials,
    auth_type: AuthType,
    pre_session: bool,
    active: bool,
    closed: bool,
    session_id: u32,
    challenge: [u8; 16],
    out_seq: u32,
    /// Highest session sequence seen on an authenticated response.
    in_seq: u32,
}

impl SessionV15 {
    pub(crate) fn new(credentials: Credentials, auth_type: AuthType) -> Self {
        Self {
            credentials,
            auth_type,
            pre_session: false,
            active: false,
            closed: false,
            session_id: 0,
            challenge: [0u8; 16],
            out_seq: 0,
            in_seq: 0,
        }
    }

    pub(crate) fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    pub(crate) fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.active {
            SessionState::Active
        } else {
            SessionState::PreSession
        }
    }

    pub(crate) fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Adopt the temporary session id and challenge returned by the BMC.
    pub(crate) fn on_challenge(&mut self, challenge: SessionChallenge) -> Result<()> {
        if self.active || self.closed {
            return Err(Error::InvalidState("session challenge after activation"));
        }
        if challenge.temporary_session_id == 0 {
            return Err(Error::Protocol("session challenge carries a null session id"));
        }
        self.session_id = challenge.temporary_session_id;
        self.challenge = challenge.challenge;
        self.pre_session = true;
        Ok(())
    }

    /// Activate Session request for the stored challenge.
    pub(crate) fn activate_request(&self) -> Result<ActivateSession> {
        if !self.pre_session {
            return Err(Error::InvalidState("activate session before challenge"));
        }
        let initial_outbound_seq = loop {
            let seq = rand::rng().next_u32();
            if seq != 0 {
                break seq;
            }
        };
        Ok(ActivateSession {
            auth_type: self.auth_type,
            max_privilege: self.credentials.privilege,
            challenge: self.challenge,
            initial_outbound_seq,
        })
    }

    /// Record the Activate Session outcome.
    pub(crate) fn on_activate(&mut self, outcome: Result<ActivatedSession>) -> Result<()> {
        self.pre_session = false;
        match outcome {
            Ok(activated) => {
                if activated.session_id == 0 {
                    self.active = false;
                    return Err(Error::Protocol("activate session returned a null session id"));
                }
                tracing::debug!(
                    session_id = activated.session_id,
                    initial_inbound_seq = activated.initial_inbound_seq,
                    max_privilege = activated.max_privilege,
                    "v1.5 session activated"
                );
                self.session_id = activated.session_id;
                self.out_seq = activated.initial_inbound_seq;
                self.in_seq = 0;
                self.active = true;
                Ok(())
            }
            Err(err) => {
                self.active = false;
                Err(err)
            }
        }
    }

    pub(crate) fn mark_closed(&mut self) {
        self.active = false;
        self.pre_session = false;
        self.closed = true;
    }

    fn next_out_seq(&mut self) -> u32 {
        if !self.active {
            return 0;
        }
        if self.out_seq == 0 {
            self.out_seq = 1;
        }
        let seq = self.out_seq;
        self.out_seq = self.out_seq.wrapping_add(1);
        seq
    }

    fn auth_code(&self, auth_type: AuthType, session_id: u32, seq: u32, data: &[u8]) -> Result<[u8; 16]> {
        AuthCodeMultiSessionInput {
            password: self.credentials.password.expose(),
            session_id,
            session_seq: seq,
            ipmi_data: data,
        }
        .auth_code(auth_type)
    }

    /// Wrap an IPMI message. Outside a session (or before a challenge) the
    /// packet is sent with AuthType None and session id 0.
    pub(crate) fn encode_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::InvalidState("session is closed"));
        }
        let (auth_type, session_id) = if self.active || self.pre_session {
            (self.auth_type, self.session_id)
        } else {
            (AuthType::None, 0)
        };
        let session_seq = self.next_out_seq();
        let auth_code = if auth_type.has_auth_code() {
            Some(self.auth_code(auth_type, session_id, session_seq, message)?)
        } else {
            None
        };

        let packet = protocol::encode_v15_packet(&V15Packet {
            auth_type,
            session_seq,
            session_id,
            auth_code,
            payload: message.to_vec(),
        })?;
        crate::debug::dump_hex("v1.5 request", &packet);
        Ok(packet)
    }

    /// Unwrap an IPMI message, verifying the AuthCode on an active session.
    pub(crate) fn decode_message(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        crate::debug::dump_hex("v1.5 response", packet);
        let decoded = protocol::decode_v15_packet(packet)?;
        if self.active {
            if decoded.session_id != self.session_id {
                return Err(Error::Protocol("response for a different session"));
            }
            if let Some(code) = decoded.auth_code {
                let expected = self.auth_code(
                    decoded.auth_type,
                    decoded.session_id,
                    decoded.session_seq,
                    &decoded.payload,
                )?;
                if !ct_eq(&expected, &code) {
                    return Err(Error::AuthenticationFailed("v1.5 response AuthCode mismatch"));
                }
            }
            self.track_inbound_seq(decoded.session_seq);
        }
        Ok(decoded.payload)
    }

    fn track_inbound_seq(&mut self, seq: u32) {
        if seq != 0 && seq <= self.in_seq {
            tracing::trace!(seq, last = self.in_seq, "inbound session sequence did not advance");
            return;
        }
        self.in_seq = self.in_seq.max(seq);
    }
}
