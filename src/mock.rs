//! In-process BMC used by the unit tests.
//!
//! It speaks enough of IPMI v1.5 and RMCP+ to run whole connect flows: the
//! sessionless discovery commands, Get Session Challenge / Activate Session,
//! Open Session / RAKP, and a handful of in-session commands. Faults can be
//! injected per instance.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use rand::RngCore;

use crate::auth_code::{AuthCodeMultiSessionInput, AuthType};
use crate::cipher_suite::{
    CipherSuite, CipherSuiteRecord, CipherSuiteRecordKind, ConfidentialityAlgorithm,
    IntegrityAlgorithm, cipher_suite_algorithms,
};
use crate::codec::Reader;
use crate::crypto::pad_key;
use crate::error::{Error, Result};
use crate::message::{IpmiRequest, IpmiResponse};
use crate::protocol::{self, Integrity, RmcpPlusHeader, V15Packet, Xrc4Stream, payload_type};
use crate::rakp::{self, KeyExchange};

const CC_OK: u8 = 0x00;
const CC_INVALID_COMMAND: u8 = 0xC1;
const CC_INVALID_SESSION_ID: u8 = 0x87;

const MOCK_GUID: [u8; 16] = *b"mock-bmc-guid-01";

pub(crate) struct MockBmc {
    state: Mutex<State>,
}

struct State {
    username: Vec<u8>,
    password: Vec<u8>,
    kg: Option<Vec<u8>>,
    auth_types: u8,
    v20: bool,
    catalog: Option<Vec<u8>>,
    rejected_suites: Vec<u8>,
    rakp2_status: u8,
    corrupt_rakp4: bool,
    silent: bool,
    duplicate_next: bool,

    /// Datagrams sent but not yet read by the client.
    inbox: VecDeque<Vec<u8>>,
    sends: u32,
    commands: Vec<(u8, u8)>,
    closed_sessions: u32,

    rmcpplus: Option<RmcpPlusSession>,
    lan: Option<LanSession>,
}

struct RmcpPlusSession {
    suite: CipherSuite,
    console_session_id: u32,
    bmc_session_id: u32,
    console_random: [u8; 16],
    bmc_random: [u8; 16],
    role: u8,
    username: Vec<u8>,
    sik: Vec<u8>,
    k1: Vec<u8>,
    k2: Vec<u8>,
    active: bool,
    out_seq: u32,
    rc4_encrypt: Xrc4Stream,
    rc4_decrypt: Xrc4Stream,
}

impl RmcpPlusSession {
    fn key_exchange(&self) -> KeyExchange<'_> {
        KeyExchange {
            auth: self.suite.auth,
            console_session_id: self.console_session_id,
            bmc_session_id: self.bmc_session_id,
            console_random: &self.console_random,
            bmc_random: &self.bmc_random,
            bmc_guid: &MOCK_GUID,
            role: self.role,
            username: &self.username,
        }
    }

    fn integrity<'a>(&'a self, password: &'a [u8]) -> Option<Integrity<'a>> {
        (self.active && self.suite.integrity != IntegrityAlgorithm::None).then_some(Integrity {
            algorithm: self.suite.integrity,
            k1: &self.k1,
            password,
        })
    }
}

struct LanSession {
    auth_type: AuthType,
    temporary_session_id: u32,
    challenge: [u8; 16],
    session_id: u32,
    active: bool,
    out_seq: u32,
}

impl MockBmc {
    pub(crate) fn new(username: &str, password: &str) -> Self {
        Self {
            state: Mutex::new(State {
                username: username.as_bytes().to_vec(),
                password: password.as_bytes().to_vec(),
                kg: None,
                auth_types: AuthType::None.capability_bit()
                    | AuthType::Md5.capability_bit()
                    | AuthType::Password.capability_bit(),
                v20: true,
                catalog: Some(catalog_bytes(&[0, 1, 2, 3, 17])),
                rejected_suites: Vec::new(),
                rakp2_status: 0,
                corrupt_rakp4: false,
                silent: false,
                duplicate_next: false,
                inbox: VecDeque::new(),
                sends: 0,
                commands: Vec::new(),
                closed_sessions: 0,
                rmcpplus: None,
                lan: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn with_kg(self, kg: &[u8]) -> Self {
        self.lock().kg = Some(kg.to_vec());
        self
    }

    /// Advertise IPMI v1.5 only.
    pub(crate) fn v15_only(self) -> Self {
        self.lock().v20 = false;
        self
    }

    pub(crate) fn with_auth_types(self, mask: u8) -> Self {
        self.lock().auth_types = mask;
        self
    }

    /// Advertise these standard suites; `None` makes the catalog command fail.
    pub(crate) fn with_catalog(self, suites: Option<&[u8]>) -> Self {
        self.lock().catalog = suites.map(catalog_bytes);
        self
    }

    /// Answer Open Session for these suites with "no matching cipher suite".
    pub(crate) fn rejecting(self, suites: &[u8]) -> Self {
        self.lock().rejected_suites = suites.to_vec();
        self
    }

    pub(crate) fn with_rakp2_status(self, status: u8) -> Self {
        self.lock().rakp2_status = status;
        self
    }

    pub(crate) fn with_corrupt_rakp4(self) -> Self {
        self.lock().corrupt_rakp4 = true;
        self
    }

    /// Stop (or resume) answering.
    pub(crate) fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Send the next reply twice; the copy is read in place of the reply to
    /// the request after it, as a late answer to a retried request would be.
    pub(crate) fn duplicate_next_reply(&self) {
        self.lock().duplicate_next = true;
    }

    /// Replies sent but not yet read.
    pub(crate) fn queued_replies(&self) -> usize {
        self.lock().inbox.len()
    }

    pub(crate) fn sends(&self) -> u32 {
        self.lock().sends
    }

    /// `(netfn, cmd)` of every IPMI request handled, in order.
    pub(crate) fn commands(&self) -> Vec<(u8, u8)> {
        self.lock().commands.clone()
    }

    pub(crate) fn closed_sessions(&self) -> u32 {
        self.lock().closed_sessions
    }

    pub(crate) fn open_session_payload(&self, request: &[u8]) -> Result<Vec<u8>> {
        self.lock().open_session(request)
    }

    pub(crate) fn rakp2_payload(&self, rakp1: &[u8]) -> Result<Vec<u8>> {
        self.lock().rakp2(rakp1)
    }

    pub(crate) fn rakp4_payload(&self, rakp3: &[u8]) -> Result<Vec<u8>> {
        self.lock().rakp4(rakp3)
    }

    /// Decode an in-session RMCP+ IPMI packet and send its message back.
    pub(crate) fn echo_packet(&self, packet: &[u8]) -> Result<Vec<u8>> {
        let mut st = self.lock();
        let message = st.open_rmcpplus(packet)?;
        st.seal_rmcpplus(&message)
    }

    pub(crate) fn handle(&self, request: &[u8]) -> Result<Vec<u8>> {
        let mut st = self.lock();
        st.sends += 1;
        if st.silent {
            return Err(Error::Timeout { attempts: 1 });
        }
        let reply = match protocol::session_auth_type(request)? {
            AuthType::RmcpPlus => st.handle_rmcpplus(request)?,
            _ => st.handle_lan(request)?,
        };
        if std::mem::take(&mut st.duplicate_next) {
            st.inbox.push_back(reply.clone());
        }
        st.inbox.push_back(reply);
        st.read()
    }

    pub(crate) fn recv(&self) -> Result<Vec<u8>> {
        self.lock().read()
    }
}

#[cfg(feature = "blocking")]
impl crate::transport::Transport for std::sync::Arc<MockBmc> {
    fn send_recv(&self, request: &[u8]) -> Result<Vec<u8>> {
        self.handle(request)
    }

    fn recv(&self) -> Result<Vec<u8>> {
        MockBmc::recv(self)
    }
}

#[cfg(feature = "async")]
impl crate::transport::AsyncTransport for std::sync::Arc<MockBmc> {
    fn send_recv<'a>(
        &'a self,
        request: &'a [u8],
    ) -> core::pin::Pin<Box<dyn core::future::Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move { self.handle(request) })
    }

    fn recv<'a>(
        &'a self,
    ) -> core::pin::Pin<Box<dyn core::future::Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move { MockBmc::recv(self) })
    }
}

fn catalog_bytes(ids: &[u8]) -> Vec<u8> {
    ids.iter()
        .filter_map(|&id| cipher_suite_algorithms(id).ok())
        .flat_map(|suite| {
            CipherSuiteRecord {
                kind: CipherSuiteRecordKind::Standard,
                cipher_suite_id: suite.id,
                oem_iana: None,
                auth_algorithm: suite.auth.as_u8(),
                integrity_algorithms: vec![suite.integrity.as_u8()],
                confidentiality_algorithms: vec![suite.confidentiality.as_u8()],
            }
            .pack()
        })
        .collect()
}

fn nonzero_u32() -> u32 {
    loop {
        let v = rand::rng().next_u32();
        if v != 0 {
            return v;
        }
    }
}

fn response_for(request: &IpmiRequest, completion_code: u8, data: Vec<u8>) -> IpmiResponse {
    IpmiResponse {
        rq_addr: request.rq_addr,
        net_fn: request.net_fn + 1,
        rq_lun: request.rq_lun,
        rs_addr: request.rs_addr,
        rq_seq: request.rq_seq,
        rs_lun: request.rs_lun,
        cmd: request.cmd,
        completion_code,
        data,
    }
}

impl State {
    fn read(&mut self) -> Result<Vec<u8>> {
        self.inbox.pop_front().ok_or(Error::Timeout { attempts: 1 })
    }

    fn open_session(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let mut r = Reader::new(request, "open session request too short");
        let tag = r.u8()?;
        r.skip(3)?;
        let console_session_id = r.u32_le()?;
        let auth = r.array::<8>()?[4];
        let integrity = r.array::<8>()?[4];
        let confidentiality = r.array::<8>()?[4];

        let suite = (0..=19u8)
            .filter_map(|id| cipher_suite_algorithms(id).ok())
            .find(|s| {
                s.auth.as_u8() == auth
                    && s.integrity.as_u8() == integrity
                    && s.confidentiality.as_u8() == confidentiality
            });
        let suite = match suite {
            Some(s) if !self.rejected_suites.contains(&s.id) => s,
            _ => {
                let mut p = vec![tag, 0x11, 0x00, 0x00];
                p.extend_from_slice(&console_session_id.to_le_bytes());
                return Ok(p);
            }
        };

        let bmc_session_id = nonzero_u32();
        let mut p = vec![tag, 0x00, 0x04, 0x00];
        p.extend_from_slice(&console_session_id.to_le_bytes());
        p.extend_from_slice(&bmc_session_id.to_le_bytes());
        for (kind, alg) in [(0x00, auth), (0x01, integrity), (0x02, confidentiality)] {
            p.extend_from_slice(&[kind, 0x00, 0x00, 0x08, alg, 0x00, 0x00, 0x00]);
        }

        self.rmcpplus = Some(RmcpPlusSession {
            suite,
            console_session_id,
            bmc_session_id,
            console_random: [0; 16],
            bmc_random: [0; 16],
            role: 0,
            username: Vec::new(),
            sik: Vec::new(),
            k1: Vec::new(),
            k2: Vec::new(),
            active: false,
            out_seq: 1,
            rc4_encrypt: Xrc4Stream::default(),
            rc4_decrypt: Xrc4Stream::default(),
        });
        Ok(p)
    }

    fn rakp2(&mut self, rakp1: &[u8]) -> Result<Vec<u8>> {
        let password = pad_key::<20>(&self.password);
        let kg = self.kg.as_deref().map(pad_key::<20>).unwrap_or(password);
        let known_user = self.username.clone();
        let status = self.rakp2_status;
        let s = self
            .rmcpplus
            .as_mut()
            .ok_or(Error::Protocol("RAKP 1 without open session"))?;

        let mut r = Reader::new(rakp1, "RAKP 1 too short");
        let tag = r.u8()?;
        r.skip(3)?;
        if r.u32_le()? != s.bmc_session_id {
            return Err(Error::Protocol("RAKP 1 for another session"));
        }
        s.console_random = r.array::<16>()?;
        s.role = r.u8()?;
        r.skip(2)?;
        let len = usize::from(r.u8()?);
        s.username = r.bytes(len)?.to_vec();
        rand::rng().fill_bytes(&mut s.bmc_random);

        let status = if s.username != known_user { 0x0D } else { status };
        let mut p = vec![tag, status, 0x00, 0x00];
        p.extend_from_slice(&s.console_session_id.to_le_bytes());
        if status != 0 {
            return Ok(p);
        }
        p.extend_from_slice(&s.bmc_random);
        p.extend_from_slice(&MOCK_GUID);
        p.extend_from_slice(&s.key_exchange().rakp2_auth_code(&password)?);

        s.sik = s.key_exchange().sik(&kg)?;
        s.k1 = rakp::derive_key(s.suite.auth, &s.sik, 0x01)?;
        s.k2 = rakp::derive_key(s.suite.auth, &s.sik, 0x02)?;
        Ok(p)
    }

    fn rakp4(&mut self, rakp3: &[u8]) -> Result<Vec<u8>> {
        let password = pad_key::<20>(&self.password);
        let corrupt = self.corrupt_rakp4;
        let s = self
            .rmcpplus
            .as_mut()
            .ok_or(Error::Protocol("RAKP 3 without open session"))?;

        let mut r = Reader::new(rakp3, "RAKP 3 too short");
        let tag = r.u8()?;
        r.skip(3)?;
        r.skip(4)?;
        let code = r.rest().to_vec();
        let expected = s.key_exchange().rakp3_auth_code(&password)?;

        let status = if code == expected { 0x00 } else { 0x0F };
        let mut p = vec![tag, status, 0x00, 0x00];
        p.extend_from_slice(&s.console_session_id.to_le_bytes());
        if status != 0 {
            return Ok(p);
        }
        let mut icv = s.key_exchange().rakp4_icv(&s.sik, s.suite.integrity)?;
        if corrupt {
            if let Some(b) = icv.first_mut() {
                *b ^= 0x01;
            }
        }
        p.extend_from_slice(&icv);
        s.active = true;
        Ok(p)
    }

    fn handle_rmcpplus(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let kind = request
            .get(5)
            .map(|b| b & 0x3F)
            .ok_or(Error::Protocol("short RMCP+ packet"))?;
        let (reply_kind, reply) = match kind {
            payload_type::OPEN_SESSION_REQUEST => {
                let p = protocol::decode_rmcpplus_packet(request, None)?.payload;
                (payload_type::OPEN_SESSION_RESPONSE, self.open_session(&p)?)
            }
            payload_type::RAKP_1 => {
                let p = protocol::decode_rmcpplus_packet(request, None)?.payload;
                (payload_type::RAKP_2, self.rakp2(&p)?)
            }
            payload_type::RAKP_3 => {
                let p = protocol::decode_rmcpplus_packet(request, None)?.payload;
                (payload_type::RAKP_4, self.rakp4(&p)?)
            }
            payload_type::IPMI => {
                let message = self.open_rmcpplus(request)?;
                let reply = self.answer(&message)?;
                return self.seal_rmcpplus(&reply);
            }
            _ => return Err(Error::Protocol("mock: unexpected payload type")),
        };
        protocol::encode_rmcpplus_packet(
            &RmcpPlusHeader {
                payload_type: reply_kind,
                encrypted: false,
                session_id: 0,
                session_seq: 0,
            },
            &reply,
            None,
        )
    }

    fn open_rmcpplus(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        let password = self.password.clone();
        let s = self
            .rmcpplus
            .as_mut()
            .ok_or(Error::Protocol("no RMCP+ session"))?;
        let decoded = protocol::decode_rmcpplus_packet(packet, s.integrity(&password))?;
        if decoded.header.session_id != s.bmc_session_id {
            return Err(Error::Protocol("mock: wrong session id"));
        }
        if !decoded.header.encrypted {
            return Ok(decoded.payload);
        }
        let conf = s.suite.confidentiality;
        match conf {
            ConfidentialityAlgorithm::None => Ok(decoded.payload),
            ConfidentialityAlgorithm::AesCbc128 => {
                protocol::open_aes_cbc(&decoded.payload, &pad_key::<16>(&s.k2))
            }
            ConfidentialityAlgorithm::Xrc4_128 | ConfidentialityAlgorithm::Xrc4_40 => {
                protocol::open_xrc4(&decoded.payload, &s.k2, conf.key_len(), &mut s.rc4_decrypt)
            }
        }
    }

    fn seal_rmcpplus(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        let password = self.password.clone();
        let s = self
            .rmcpplus
            .as_mut()
            .ok_or(Error::Protocol("no RMCP+ session"))?;
        let conf = s.suite.confidentiality;
        let payload = match conf {
            ConfidentialityAlgorithm::None => message.to_vec(),
            ConfidentialityAlgorithm::AesCbc128 => {
                protocol::seal_aes_cbc(message, &pad_key::<16>(&s.k2))?
            }
            ConfidentialityAlgorithm::Xrc4_128 | ConfidentialityAlgorithm::Xrc4_40 => {
                protocol::seal_xrc4(message, &s.k2, conf.key_len(), &mut s.rc4_encrypt)?
            }
        };
        let header = RmcpPlusHeader {
            payload_type: payload_type::IPMI,
            encrypted: conf != ConfidentialityAlgorithm::None,
            session_id: s.console_session_id,
            session_seq: s.out_seq,
        };
        s.out_seq += 1;
        protocol::encode_rmcpplus_packet(&header, &payload, s.integrity(&password))
    }

    fn handle_lan(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let packet = protocol::decode_v15_packet(request)?;

        if packet.session_id != 0 {
            let lan = self
                .lan
                .as_ref()
                .ok_or(Error::Protocol("mock: no v1.5 session"))?;
            let session_id = if lan.active {
                lan.session_id
            } else {
                lan.temporary_session_id
            };
            if packet.session_id != session_id {
                return Err(Error::Protocol("mock: wrong v1.5 session id"));
            }
            if packet.auth_type.has_auth_code() {
                let expected = AuthCodeMultiSessionInput {
                    password: &self.password,
                    session_id: packet.session_id,
                    session_seq: packet.session_seq,
                    ipmi_data: &packet.payload,
                }
                .auth_code(packet.auth_type)?;
                if packet.auth_code != Some(expected) {
                    // Dropped without an answer.
                    return Err(Error::Timeout { attempts: 1 });
                }
            }
        }

        let reply = self.answer(&packet.payload)?;

        let (auth_type, session_id, session_seq) = match &mut self.lan {
            Some(lan) if lan.active && packet.session_id == lan.session_id => {
                let seq = lan.out_seq;
                lan.out_seq = lan.out_seq.wrapping_add(1);
                (lan.auth_type, lan.session_id, seq)
            }
            _ => (AuthType::None, 0, 0),
        };
        let auth_code = if auth_type.has_auth_code() {
            Some(
                AuthCodeMultiSessionInput {
                    password: &self.password,
                    session_id,
                    session_seq,
                    ipmi_data: &reply,
                }
                .auth_code(auth_type)?,
            )
        } else {
            None
        };
        protocol::encode_v15_packet(&V15Packet {
            auth_type,
            session_seq,
            session_id,
            auth_code,
            payload: reply,
        })
    }

    /// Answer one IPMI request frame.
    fn answer(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        let request = IpmiRequest::unpack(message)?;
        self.commands.push((request.net_fn, request.cmd));
        let data = request.data.as_slice();

        let (cc, body) = match (request.net_fn, request.cmd) {
            (0x06, 0x01) => (
                CC_OK,
                vec![0x20, 0x81, 0x02, 0x10, 0x02, 0xBF, 0x57, 0x01, 0x00, 0x34, 0x12],
            ),
            (0x06, 0x38) => {
                let ext = if self.v20 { 0x03 } else { 0x01 };
                let v20_flag = if self.v20 { 0x80 } else { 0x00 };
                (
                    CC_OK,
                    vec![0x01, self.auth_types | v20_flag, 0x04, ext, 0, 0, 0, 0],
                )
            }
            (0x06, 0x54) => match &self.catalog {
                Some(catalog) => {
                    let index = usize::from(data.get(2).copied().unwrap_or(0) & 0x3F);
                    let start = (index * 16).min(catalog.len());
                    let end = (start + 16).min(catalog.len());
                    let mut body = vec![0x01];
                    body.extend_from_slice(&catalog[start..end]);
                    (CC_OK, body)
                }
                None => (CC_INVALID_COMMAND, Vec::new()),
            },
            (0x06, 0x39) => {
                let auth_type = AuthType::from_u8(data.first().copied().unwrap_or(0))?;
                let name = data.get(1..17).unwrap_or_default();
                if name != pad_key::<16>(&self.username) {
                    (0x81, Vec::new())
                } else {
                    let mut challenge = [0u8; 16];
                    rand::rng().fill_bytes(&mut challenge);
                    let temporary_session_id = nonzero_u32();
                    self.lan = Some(LanSession {
                        auth_type,
                        temporary_session_id,
                        challenge,
                        session_id: 0,
                        active: false,
                        out_seq: 0,
                    });
                    let mut body = temporary_session_id.to_le_bytes().to_vec();
                    body.extend_from_slice(&challenge);
                    (CC_OK, body)
                }
            }
            (0x06, 0x3A) => match self.lan.as_mut() {
                Some(lan) if data.get(2..18) == Some(&lan.challenge[..]) => {
                    let mut r = Reader::new(&data[18..], "activate session too short");
                    lan.out_seq = r.u32_le()?;
                    lan.session_id = nonzero_u32();
                    lan.active = true;
                    let initial_inbound_seq = 0x0000_1000;
                    let mut body = vec![lan.auth_type.as_u8()];
                    body.extend_from_slice(&lan.session_id.to_le_bytes());
                    body.extend_from_slice(&u32::to_le_bytes(initial_inbound_seq));
                    body.push(0x04);
                    (CC_OK, body)
                }
                _ => (0x85, Vec::new()),
            },
            (0x06, 0x3B) => (CC_OK, vec![data.first().copied().unwrap_or(0) & 0x0F]),
            (0x06, 0x3C) => {
                let mut r = Reader::new(data, "close session too short");
                let id = r.u32_le()?;
                let known_v20 = self.rmcpplus.as_ref().is_some_and(|s| s.bmc_session_id == id);
                let known_v15 = self.lan.as_ref().is_some_and(|s| s.session_id == id);
                if known_v20 || known_v15 {
                    self.closed_sessions += 1;
                    (CC_OK, Vec::new())
                } else {
                    (CC_INVALID_SESSION_ID, Vec::new())
                }
            }
            (0x06, 0x3D) => (CC_OK, vec![0x01, 0x04, 0x01, 0x02, 0x04, 0x01]),
            _ => (CC_INVALID_COMMAND, Vec::new()),
        };

        Ok(response_for(&request, cc, body).pack())
    }
}
