use rand::RngCore;

use super::{Credentials, SessionState};
use crate::cipher_suite::{
    AuthAlgorithm, CipherSuite, ConfidentialityAlgorithm, IntegrityAlgorithm,
};
use crate::crypto::{SecretBytes, ct_eq};
use crate::error::{Error, Result};
use crate::protocol::{
    self, DecodedPacket, Integrity, RmcpPlusHeader, Xrc4Stream, payload_type,
};
use crate::rakp::{self, KeyExchange};

/// RAKP user and Kg keys are 20 bytes regardless of the HMAC in use.
const RAKP_KEY_LEN: usize = 20;

/// Algorithms the BMC picked in its Open Session response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NegotiatedAlgorithms {
    pub auth: AuthAlgorithm,
    pub integrity: IntegrityAlgorithm,
    pub confidentiality: ConfidentialityAlgorithm,
}

/// RMCP+ session: Open Session, RAKP 1-4 and the keys they produce.
///
/// Each handshake step is a pair of methods: one that builds the payload to
/// send and one that consumes the reply. The transitions only move forward.
#[derive(Debug)]
pub(crate) struct SessionV20 {
    state: SessionState,
    credentials: Credentials,
    requested: CipherSuite,
    negotiated: Option<NegotiatedAlgorithms>,
    role: u8,
    message_tag: u8,

    console_session_id: u32,
    bmc_session_id: u32,
    console_rand: [u8; 16],
    bmc_rand: [u8; 16],
    bmc_guid: [u8; 16],

    sik: Option<SecretBytes>,
    k1: Option<SecretBytes>,
    k2: Option<SecretBytes>,

    out_seq: u32,
    rc4_encrypt: Xrc4Stream,
    rc4_decrypt: Xrc4Stream,
}

impl SessionV20 {
    pub(crate) fn new(credentials: Credentials, requested: CipherSuite) -> Self {
        let mut rng = rand::rng();
        let mut console_rand = [0u8; 16];
        rng.fill_bytes(&mut console_rand);
        let console_session_id = loop {
            let id = rng.next_u32();
            if id != 0 {
                break id;
            }
        };
        let role = rakp::role_byte(credentials.privilege, credentials.name_only_lookup);

        Self {
            state: SessionState::PreSession,
            credentials,
            requested,
            negotiated: None,
            role,
            message_tag: 0,
            console_session_id,
            bmc_session_id: 0,
            console_rand,
            bmc_rand: [0u8; 16],
            bmc_guid: [0u8; 16],
            sik: None,
            k1: None,
            k2: None,
            out_seq: 0,
            rc4_encrypt: Xrc4Stream::default(),
            rc4_decrypt: Xrc4Stream::default(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn cipher_suite_id(&self) -> u8 {
        self.requested.id
    }

    pub(crate) fn bmc_session_id(&self) -> u32 {
        self.bmc_session_id
    }

    #[cfg(test)]
    pub(crate) fn console_session_id(&self) -> u32 {
        self.console_session_id
    }

    #[cfg(test)]
    pub(crate) fn negotiated(&self) -> Option<NegotiatedAlgorithms> {
        self.negotiated
    }

    /// Running number of payload bytes encrypted under the current xRC4 IV.
    #[cfg(test)]
    pub(crate) fn accumulated_payload_size(&self) -> u32 {
        self.rc4_encrypt.accumulated
    }

    #[cfg(test)]
    pub(crate) fn sik(&self) -> Option<&[u8]> {
        self.sik.as_ref().map(SecretBytes::expose)
    }

    #[cfg(test)]
    pub(crate) fn k1(&self) -> Option<&[u8]> {
        self.k1.as_ref().map(SecretBytes::expose)
    }

    #[cfg(test)]
    pub(crate) fn k2(&self) -> Option<&[u8]> {
        self.k2.as_ref().map(SecretBytes::expose)
    }

    fn expect_state(&self, expected: SessionState, what: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState(what));
        }
        Ok(())
    }

    fn transition(&mut self, to: SessionState) {
        debug_assert!(to > self.state);
        tracing::debug!(from = %self.state, to = %to, "rmcp+ session transition");
        self.state = to;
    }

    fn next_tag(&mut self) -> u8 {
        self.message_tag = (rand::rng().next_u32() & 0xFF) as u8;
        self.message_tag
    }

    fn algorithms(&self) -> Result<NegotiatedAlgorithms> {
        self.negotiated
            .ok_or(Error::InvalidState("open session not completed"))
    }

    fn user_key(&self) -> [u8; RAKP_KEY_LEN] {
        self.credentials.password.padded::<RAKP_KEY_LEN>()
    }

    fn kg(&self) -> [u8; RAKP_KEY_LEN] {
        match &self.credentials.bmc_key {
            Some(kg) => kg.padded::<RAKP_KEY_LEN>(),
            None => self.user_key(),
        }
    }

    fn key_exchange(&self) -> Result<KeyExchange<'_>> {
        Ok(KeyExchange {
            auth: self.algorithms()?.auth,
            console_session_id: self.console_session_id,
            bmc_session_id: self.bmc_session_id,
            console_random: &self.console_rand,
            bmc_random: &self.bmc_rand,
            bmc_guid: &self.bmc_guid,
            role: self.role,
            username: &self.credentials.username,
        })
    }

    /// Open Session Request payload proposing the requested suite.
    pub(crate) fn open_session_request(&mut self) -> Result<Vec<u8>> {
        self.expect_state(SessionState::PreSession, "open session after handshake start")?;
        let tag = self.next_tag();
        Ok(rakp::build_open_session_request(
            tag,
            self.credentials.privilege,
            self.console_session_id,
            self.requested.auth.as_u8(),
            self.requested.integrity.as_u8(),
            self.requested.confidentiality.as_u8(),
        ))
    }

    pub(crate) fn on_open_session_response(&mut self, payload: &[u8]) -> Result<()> {
        self.expect_state(SessionState::PreSession, "unexpected open session response")?;
        let resp = rakp::parse_open_session_response(payload)?;
        if resp.message_tag != self.message_tag {
            return Err(Error::Protocol("Open Session response message tag mismatch"));
        }
        resp.check_status()?;
        if resp.console_session_id != self.console_session_id {
            return Err(Error::Protocol("Open Session remote session id mismatch"));
        }
        if resp.bmc_session_id == 0 {
            return Err(Error::Protocol("Open Session returned a null session id"));
        }

        let negotiated = NegotiatedAlgorithms {
            auth: AuthAlgorithm::from_u8(resp.auth_algorithm)?,
            integrity: IntegrityAlgorithm::from_u8(resp.integrity_algorithm)?,
            confidentiality: ConfidentialityAlgorithm::from_u8(resp.confidentiality_algorithm)?,
        };
        if negotiated.auth != self.requested.auth
            || negotiated.integrity != self.requested.integrity
            || negotiated.confidentiality != self.requested.confidentiality
        {
            tracing::debug!(
                requested = self.requested.id,
                ?negotiated,
                "managed system negotiated different algorithms"
            );
        }

        tracing::debug!(
            bmc_session_id = resp.bmc_session_id,
            max_privilege = resp.max_privilege_level,
            "open session accepted"
        );
        self.bmc_session_id = resp.bmc_session_id;
        self.negotiated = Some(negotiated);
        Ok(())
    }

    /// RAKP Message 1 payload.
    pub(crate) fn rakp1(&mut self) -> Result<Vec<u8>> {
        self.expect_state(SessionState::PreSession, "RAKP 1 out of order")?;
        self.algorithms()?;
        let tag = self.next_tag();
        let payload = rakp::build_rakp1(
            tag,
            self.bmc_session_id,
            &self.console_rand,
            self.role,
            &self.credentials.username,
        )?;
        self.transition(SessionState::Rakp1Sent);
        Ok(payload)
    }

    /// Validate RAKP Message 2 and derive SIK, K1 and K2.
    pub(crate) fn on_rakp2(&mut self, payload: &[u8]) -> Result<()> {
        self.expect_state(SessionState::Rakp1Sent, "unexpected RAKP 2")?;
        let algorithms = self.algorithms()?;
        let msg = rakp::parse_rakp2(payload, algorithms.auth)?;
        if msg.message_tag != self.message_tag {
            return Err(Error::Protocol("RAKP message 2 tag mismatch"));
        }
        if msg.console_session_id != self.console_session_id {
            return Err(Error::Protocol("RAKP message 2 remote session id mismatch"));
        }

        self.bmc_rand = msg.bmc_random;
        self.bmc_guid = msg.bmc_guid;

        let expected = self.key_exchange()?.rakp2_auth_code(&self.user_key())?;
        if !ct_eq(&expected, &msg.key_exchange_auth_code) {
            return Err(Error::AuthenticationFailed(
                "RAKP message 2 authentication code mismatch",
            ));
        }

        self.transition(SessionState::Rakp2Received);
        self.generate_sik()?;
        self.generate_k1()?;
        self.generate_k2()?;
        Ok(())
    }

    pub(crate) fn generate_sik(&mut self) -> Result<()> {
        let sik = self.key_exchange()?.sik(&self.kg())?;
        self.sik = Some(SecretBytes::new(sik));
        Ok(())
    }

    pub(crate) fn generate_k1(&mut self) -> Result<()> {
        self.k1 = Some(self.derive_from_sik(0x01)?);
        Ok(())
    }

    pub(crate) fn generate_k2(&mut self) -> Result<()> {
        self.k2 = Some(self.derive_from_sik(0x02)?);
        Ok(())
    }

    fn derive_from_sik(&self, constant: u8) -> Result<SecretBytes> {
        let sik = self
            .sik
            .as_ref()
            .ok_or(Error::InvalidState("sik not exists, generate sik first"))?;
        let auth = self.algorithms()?.auth;
        Ok(SecretBytes::new(rakp::derive_key(
            auth,
            sik.expose(),
            constant,
        )?))
    }

    /// RAKP Message 3 payload.
    pub(crate) fn rakp3(&mut self) -> Result<Vec<u8>> {
        self.expect_state(SessionState::Rakp2Received, "RAKP 3 out of order")?;
        let auth_code = self.key_exchange()?.rakp3_auth_code(&self.user_key())?;
        let tag = self.next_tag();
        let payload = rakp::build_rakp3(tag, self.bmc_session_id, &auth_code);
        self.transition(SessionState::Rakp3Sent);
        Ok(payload)
    }

    /// Validate RAKP Message 4; on success the session is active.
    pub(crate) fn on_rakp4(&mut self, payload: &[u8]) -> Result<()> {
        self.expect_state(SessionState::Rakp3Sent, "unexpected RAKP 4")?;
        let integrity = self.algorithms()?.integrity;
        let msg = rakp::parse_rakp4(payload, integrity)?;
        if msg.message_tag != self.message_tag {
            return Err(Error::Protocol("RAKP message 4 tag mismatch"));
        }
        if msg.console_session_id != self.console_session_id {
            return Err(Error::Protocol("RAKP message 4 remote session id mismatch"));
        }

        let sik = self
            .sik
            .as_ref()
            .ok_or(Error::InvalidState("sik not exists, generate sik first"))?;
        let expected = self.key_exchange()?.rakp4_icv(sik.expose(), integrity)?;
        if !ct_eq(&expected, &msg.integrity_check_value) {
            return Err(Error::AuthenticationFailed(
                "RAKP message 4 integrity check value mismatch",
            ));
        }

        self.out_seq = 1;
        self.transition(SessionState::Active);
        Ok(())
    }

    pub(crate) fn mark_closed(&mut self) {
        if self.state != SessionState::Closed {
            self.transition(SessionState::Closed);
        }
    }

    /// Wrap a handshake payload (Open Session, RAKP 1/3); these travel in
    /// session 0 with sequence 0 and no integrity trailer.
    pub(crate) fn encode_handshake(kind: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let header = RmcpPlusHeader {
            payload_type: kind,
            encrypted: false,
            session_id: 0,
            session_seq: 0,
        };
        protocol::encode_rmcpplus_packet(&header, payload, None)
    }

    pub(crate) fn decode_handshake(packet: &[u8], expected_kind: u8) -> Result<Vec<u8>> {
        let decoded = protocol::decode_rmcpplus_packet(packet, None)?;
        if decoded.header.payload_type != expected_kind {
            return Err(Error::protocol_owned(format!(
                "unexpected payload type {:#04x}, expected {expected_kind:#04x}",
                decoded.header.payload_type
            )));
        }
        Ok(decoded.payload)
    }

    fn integrity(&self) -> Result<Option<Integrity<'_>>> {
        let algorithm = self.algorithms()?.integrity;
        if algorithm == IntegrityAlgorithm::None {
            return Ok(None);
        }
        let k1 = self
            .k1
            .as_ref()
            .ok_or(Error::InvalidState("k1 not derived"))?;
        Ok(Some(Integrity {
            algorithm,
            k1: k1.expose(),
            password: self.credentials.password.expose(),
        }))
    }

    fn k2_for(&self, confidentiality: ConfidentialityAlgorithm) -> Result<&[u8]> {
        let k2 = self
            .k2
            .as_ref()
            .ok_or(Error::InvalidState("k2 not derived"))?
            .expose();
        if k2.len() < confidentiality.key_len() {
            return Err(Error::Crypto("K2 shorter than the confidentiality key"));
        }
        Ok(k2)
    }

    fn next_out_seq(&mut self) -> u32 {
        let seq = self.out_seq;
        self.out_seq = self.out_seq.wrapping_add(1).max(1);
        seq
    }

    /// Encrypt (per the negotiated confidentiality algorithm) and frame an
    /// IPMI message for this active session.
    pub(crate) fn encode_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        self.expect_state(SessionState::Active, "session is not active")?;
        let confidentiality = self.algorithms()?.confidentiality;

        let payload = match confidentiality {
            ConfidentialityAlgorithm::None => message.to_vec(),
            ConfidentialityAlgorithm::AesCbc128 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(&self.k2_for(confidentiality)?[..16]);
                protocol::seal_aes_cbc(message, &key)?
            }
            ConfidentialityAlgorithm::Xrc4_128 | ConfidentialityAlgorithm::Xrc4_40 => {
                let k2 = self.k2_for(confidentiality)?.to_vec();
                protocol::seal_xrc4(message, &k2, confidentiality.key_len(), &mut self.rc4_encrypt)?
            }
        };

        let header = RmcpPlusHeader {
            payload_type: payload_type::IPMI,
            encrypted: confidentiality != ConfidentialityAlgorithm::None,
            session_id: self.bmc_session_id,
            session_seq: self.next_out_seq(),
        };
        let packet = protocol::encode_rmcpplus_packet(&header, &payload, self.integrity()?)?;
        crate::debug::dump_hex("rmcp+ request", &packet);
        Ok(packet)
    }

    /// Verify, decrypt and unwrap an IPMI message received on this session.
    pub(crate) fn decode_message(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        self.expect_state(SessionState::Active, "session is not active")?;
        crate::debug::dump_hex("rmcp+ response", packet);
        let DecodedPacket { header, payload, .. } =
            protocol::decode_rmcpplus_packet(packet, self.integrity()?)?;

        if header.payload_type != payload_type::IPMI {
            return Err(Error::Protocol("unexpected RMCP+ payload type"));
        }
        if header.session_id != self.console_session_id {
            return Err(Error::Protocol("response for a different session"));
        }

        let confidentiality = self.algorithms()?.confidentiality;
        if !header.encrypted {
            if confidentiality != ConfidentialityAlgorithm::None {
                return Err(Error::AuthenticationFailed(
                    "plaintext payload on an encrypted session",
                ));
            }
            return Ok(payload);
        }

        match confidentiality {
            ConfidentialityAlgorithm::None => {
                Err(Error::Protocol("encrypted payload on a plaintext session"))
            }
            ConfidentialityAlgorithm::AesCbc128 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(&self.k2_for(confidentiality)?[..16]);
                protocol::open_aes_cbc(&payload, &key)
            }
            ConfidentialityAlgorithm::Xrc4_128 | ConfidentialityAlgorithm::Xrc4_40 => {
                let k2 = self.k2_for(confidentiality)?.to_vec();
                protocol::open_xrc4(&payload, &k2, confidentiality.key_len(), &mut self.rc4_decrypt)
            }
        }
    }
}
