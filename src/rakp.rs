//! RMCP+ Open Session and RAKP message payloads, plus the key exchange
//! computations (RAKP 2/3 AuthCodes, SIK, K1/K2, RAKP 4 ICV).

use crate::cipher_suite::{AuthAlgorithm, IntegrityAlgorithm};
use crate::codec::Reader;
use crate::error::{Error, Result};
use crate::types::PrivilegeLevel;

/// Largest user name RAKP 1 can carry.
pub(crate) const MAX_USERNAME_LEN: usize = 16;

const AUTH_PAYLOAD: u8 = 0x00;
const INTEGRITY_PAYLOAD: u8 = 0x01;
const CONFIDENTIALITY_PAYLOAD: u8 = 0x02;

/// Human-readable RMCP+ / RAKP status code.
pub fn rmcpplus_status_description(status: u8) -> &'static str {
    match status {
        0x00 => "no errors",
        0x01 => "insufficient resources to create a session",
        0x02 => "invalid session id",
        0x03 => "invalid payload type",
        0x04 => "invalid authentication algorithm",
        0x05 => "invalid integrity algorithm",
        0x06 => "no matching authentication payload",
        0x07 => "no matching integrity payload",
        0x08 => "inactive session id",
        0x09 => "invalid role",
        0x0A => "unauthorized role or privilege level requested",
        0x0B => "insufficient resources to create a session at the requested role",
        0x0C => "invalid name length",
        0x0D => "unauthorized name",
        0x0E => "unauthorized GUID",
        0x0F => "invalid integrity check value",
        0x10 => "invalid confidentiality algorithm",
        0x11 => "no cipher suite match with proposed security algorithms",
        0x12 => "illegal or unrecognized parameter",
        _ => "reserved status code",
    }
}

fn check_status(message: &str, status: u8) -> Result<()> {
    if status == 0x00 {
        return Ok(());
    }
    Err(Error::protocol_owned(format!(
        "{message} status {status:#04x}: {}",
        rmcpplus_status_description(status)
    )))
}

/// Role byte used in RAKP 1 and in every HMAC input that covers it.
pub(crate) fn role_byte(privilege: PrivilegeLevel, name_only_lookup: bool) -> u8 {
    let lookup = if name_only_lookup { 0x10 } else { 0x00 };
    (privilege.as_u8() & 0x0F) | lookup
}

/// Build the Open Session Request payload.
pub(crate) fn build_open_session_request(
    message_tag: u8,
    requested_privilege: PrivilegeLevel,
    console_session_id: u32,
    auth: u8,
    integrity: u8,
    confidentiality: u8,
) -> Vec<u8> {
    let mut p = Vec::with_capacity(32);

    p.push(message_tag);
    // 0 asks for the highest level the channel/user allows.
    let requested_priv = if matches!(requested_privilege, PrivilegeLevel::Administrator) {
        0x00
    } else {
        requested_privilege.as_u8() & 0x0F
    };
    p.push(requested_priv);
    p.extend_from_slice(&[0x00, 0x00]);
    p.extend_from_slice(&console_session_id.to_le_bytes());

    p.extend_from_slice(&algorithm_payload(AUTH_PAYLOAD, auth));
    p.extend_from_slice(&algorithm_payload(INTEGRITY_PAYLOAD, integrity));
    p.extend_from_slice(&algorithm_payload(CONFIDENTIALITY_PAYLOAD, confidentiality));

    p
}

fn algorithm_payload(payload_type: u8, algorithm: u8) -> [u8; 8] {
    [
        payload_type,
        0x00,
        0x00,
        0x08,
        algorithm & 0x3F,
        0x00,
        0x00,
        0x00,
    ]
}

#[derive(Debug, Clone)]
pub(crate) struct OpenSessionResponse {
    pub message_tag: u8,
    pub status_code: u8,
    pub max_privilege_level: u8,
    pub console_session_id: u32,
    pub bmc_session_id: u32,
    pub auth_algorithm: u8,
    pub integrity_algorithm: u8,
    pub confidentiality_algorithm: u8,
}

impl OpenSessionResponse {
    pub(crate) fn check_status(&self) -> Result<()> {
        check_status("Open Session", self.status_code)
    }
}

pub(crate) fn parse_open_session_response(payload: &[u8]) -> Result<OpenSessionResponse> {
    let mut r = Reader::new(payload, "open session response payload too short");
    let message_tag = r.u8()?;
    let status_code = r.u8()?;
    let max_privilege_level = r.u8()?;
    r.skip(1)?;
    let console_session_id = r.u32_le()?;

    let mut resp = OpenSessionResponse {
        message_tag,
        status_code,
        max_privilege_level,
        console_session_id,
        bmc_session_id: 0,
        auth_algorithm: 0,
        integrity_algorithm: 0,
        confidentiality_algorithm: 0,
    };
    // Error responses stop after the console session id.
    if status_code != 0x00 {
        return Ok(resp);
    }

    resp.bmc_session_id = r.u32_le()?;
    resp.auth_algorithm = read_algorithm_payload(&mut r, AUTH_PAYLOAD)?;
    resp.integrity_algorithm = read_algorithm_payload(&mut r, INTEGRITY_PAYLOAD)?;
    resp.confidentiality_algorithm = read_algorithm_payload(&mut r, CONFIDENTIALITY_PAYLOAD)?;
    Ok(resp)
}

fn read_algorithm_payload(r: &mut Reader<'_>, expected_type: u8) -> Result<u8> {
    let block = r.array::<8>()?;
    if block[0] != expected_type {
        return Err(Error::Protocol("unexpected algorithm payload type"));
    }
    Ok(block[4] & 0x3F)
}

/// Build RAKP Message 1.
pub(crate) fn build_rakp1(
    message_tag: u8,
    bmc_session_id: u32,
    console_random: &[u8; 16],
    role: u8,
    username: &[u8],
) -> Result<Vec<u8>> {
    if username.len() > MAX_USERNAME_LEN {
        return Err(Error::InvalidArgument("username too long (max 16 bytes)"));
    }

    let mut p = Vec::with_capacity(28 + username.len());
    p.push(message_tag);
    p.extend_from_slice(&[0x00, 0x00, 0x00]);
    p.extend_from_slice(&bmc_session_id.to_le_bytes());
    p.extend_from_slice(console_random);
    p.push(role);
    p.extend_from_slice(&[0x00, 0x00]);
    p.push(username.len() as u8);
    p.extend_from_slice(username);
    Ok(p)
}

#[derive(Debug, Clone)]
pub(crate) struct RakpMessage2 {
    pub message_tag: u8,
    pub console_session_id: u32,
    pub bmc_random: [u8; 16],
    pub bmc_guid: [u8; 16],
    pub key_exchange_auth_code: Vec<u8>,
}

/// Parse RAKP Message 2. A non-zero status fails before the AuthCode is read.
pub(crate) fn parse_rakp2(payload: &[u8], auth: AuthAlgorithm) -> Result<RakpMessage2> {
    let mut r = Reader::new(payload, "RAKP message 2 payload too short");
    let message_tag = r.u8()?;
    check_status("RAKP message 2", r.u8()?)?;
    r.skip(2)?;
    let console_session_id = r.u32_le()?;
    let bmc_random = r.array::<16>()?;
    let bmc_guid = r.array::<16>()?;
    let key_exchange_auth_code = r.bytes(auth.key_exchange_code_len())?.to_vec();

    Ok(RakpMessage2 {
        message_tag,
        console_session_id,
        bmc_random,
        bmc_guid,
        key_exchange_auth_code,
    })
}

/// Build RAKP Message 3.
pub(crate) fn build_rakp3(message_tag: u8, bmc_session_id: u32, auth_code: &[u8]) -> Vec<u8> {
    let mut p = Vec::with_capacity(8 + auth_code.len());
    p.push(message_tag);
    p.push(0x00);
    p.extend_from_slice(&[0x00, 0x00]);
    p.extend_from_slice(&bmc_session_id.to_le_bytes());
    p.extend_from_slice(auth_code);
    p
}

#[derive(Debug, Clone)]
pub(crate) struct RakpMessage4 {
    pub message_tag: u8,
    pub console_session_id: u32,
    pub integrity_check_value: Vec<u8>,
}

/// Parse RAKP Message 4; the ICV length follows the negotiated integrity algorithm.
pub(crate) fn parse_rakp4(payload: &[u8], integrity: IntegrityAlgorithm) -> Result<RakpMessage4> {
    let mut r = Reader::new(payload, "RAKP message 4 payload too short");
    let message_tag = r.u8()?;
    check_status("RAKP message 4", r.u8()?)?;
    r.skip(2)?;
    let console_session_id = r.u32_le()?;
    let integrity_check_value = r.bytes(integrity.auth_code_len())?.to_vec();

    Ok(RakpMessage4 {
        message_tag,
        console_session_id,
        integrity_check_value,
    })
}

/// Everything the RAKP HMAC inputs are built from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyExchange<'a> {
    pub auth: AuthAlgorithm,
    pub console_session_id: u32,
    pub bmc_session_id: u32,
    pub console_random: &'a [u8; 16],
    pub bmc_random: &'a [u8; 16],
    pub bmc_guid: &'a [u8; 16],
    pub role: u8,
    pub username: &'a [u8],
}

impl KeyExchange<'_> {
    fn push_role_and_name(&self, data: &mut Vec<u8>) {
        data.push(self.role);
        data.push(self.username.len() as u8);
        data.extend_from_slice(self.username);
    }

    /// RAKP 2 Key Exchange AuthCode, keyed by the user password.
    ///
    /// A configured Kg does not change this key; Kg only keys the SIK.
    pub(crate) fn rakp2_auth_code(&self, user_key: &[u8]) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(58 + self.username.len());
        data.extend_from_slice(&self.console_session_id.to_le_bytes());
        data.extend_from_slice(&self.bmc_session_id.to_le_bytes());
        data.extend_from_slice(self.console_random);
        data.extend_from_slice(self.bmc_random);
        data.extend_from_slice(self.bmc_guid);
        self.push_role_and_name(&mut data);
        self.auth.compute_hmac(user_key, &data)
    }

    /// Session Integrity Key, keyed by Kg (or the password when no Kg is set).
    pub(crate) fn sik(&self, kg: &[u8]) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(34 + self.username.len());
        data.extend_from_slice(self.console_random);
        data.extend_from_slice(self.bmc_random);
        self.push_role_and_name(&mut data);
        self.auth.compute_hmac(kg, &data)
    }

    /// RAKP 3 Key Exchange AuthCode, keyed by the user password.
    pub(crate) fn rakp3_auth_code(&self, user_key: &[u8]) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(22 + self.username.len());
        data.extend_from_slice(self.bmc_random);
        data.extend_from_slice(&self.console_session_id.to_le_bytes());
        self.push_role_and_name(&mut data);
        self.auth.compute_hmac(user_key, &data)
    }

    /// RAKP 4 Integrity Check Value, keyed by SIK and truncated for `integrity`.
    pub(crate) fn rakp4_icv(&self, sik: &[u8], integrity: IntegrityAlgorithm) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(self.console_random);
        data.extend_from_slice(&self.bmc_session_id.to_le_bytes());
        data.extend_from_slice(self.bmc_guid);
        let mut icv = self.auth.compute_hmac(sik, &data)?;
        icv.truncate(integrity.auth_code_len());
        Ok(icv)
    }
}

/// `K_n = HMAC(SIK, 20 × n)`.
pub(crate) fn derive_key(auth: AuthAlgorithm, sik: &[u8], constant: u8) -> Result<Vec<u8>> {
    auth.compute_hmac(sik, &[constant; 20])
}
