//! RMCP, IPMI v1.5 and RMCP+ packet framing.
//!
//! The RMCP+ codec applies the session trailer (integrity pad, pad length,
//! next header, AuthCode) and leaves payload confidentiality to the
//! `seal_*`/`open_*` helpers so the session can own the cipher state.

use rand::RngCore;

use crate::auth_code::AuthType;
use crate::cipher_suite::IntegrityAlgorithm;
use crate::codec::Reader;
use crate::crypto::{aes128_cbc_decrypt, aes128_cbc_encrypt, ct_eq, md5_digest, rc4_apply};
use crate::error::{Error, Result};

const RMCP_VERSION: u8 = 0x06;
const RMCP_RESERVED: u8 = 0x00;
const RMCP_SEQ_NO_ACK: u8 = 0xFF;
const RMCP_CLASS_IPMI: u8 = 0x07;

const RMCP_HEADER_LEN: usize = 4;
const RMCPPLUS_SESSION_HEADER_LEN: usize = 12;
const RMCPPLUS_NEXT_HEADER: u8 = 0x07;
const INTEGRITY_PAD: u8 = 0xFF;

/// Payload type numbers.
pub(crate) mod payload_type {
    /// Standard IPMI message.
    pub const IPMI: u8 = 0x00;
    /// OEM explicit payload.
    pub const OEM_EXPLICIT: u8 = 0x02;
    /// RMCP+ Open Session Request.
    pub const OPEN_SESSION_REQUEST: u8 = 0x10;
    /// RMCP+ Open Session Response.
    pub const OPEN_SESSION_RESPONSE: u8 = 0x11;
    /// RAKP Message 1.
    pub const RAKP_1: u8 = 0x12;
    /// RAKP Message 2.
    pub const RAKP_2: u8 = 0x13;
    /// RAKP Message 3.
    pub const RAKP_3: u8 = 0x14;
    /// RAKP Message 4.
    pub const RAKP_4: u8 = 0x15;
}

fn push_rmcp_header(packet: &mut Vec<u8>) {
    packet.push(RMCP_VERSION);
    packet.push(RMCP_RESERVED);
    packet.push(RMCP_SEQ_NO_ACK);
    packet.push(RMCP_CLASS_IPMI);
}

fn check_rmcp_header(bytes: &[u8]) -> Result<()> {
    if bytes.len() < RMCP_HEADER_LEN + 1 {
        return Err(Error::Protocol("packet too short"));
    }
    if bytes[0] != RMCP_VERSION {
        return Err(Error::Protocol("unexpected RMCP version"));
    }
    if bytes[3] != RMCP_CLASS_IPMI {
        return Err(Error::Protocol("unexpected RMCP class"));
    }
    Ok(())
}

/// Session AuthType byte of a received packet, telling v1.5 and RMCP+ apart.
#[cfg(test)]
pub(crate) fn session_auth_type(bytes: &[u8]) -> Result<AuthType> {
    check_rmcp_header(bytes)?;
    AuthType::from_u8(bytes[RMCP_HEADER_LEN])
}

/// Keys protecting the RMCP+ session trailer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Integrity<'a> {
    pub algorithm: IntegrityAlgorithm,
    pub k1: &'a [u8],
    pub password: &'a [u8],
}

/// Header fields of an RMCP+ packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RmcpPlusHeader {
    pub payload_type: u8,
    pub encrypted: bool,
    pub session_id: u32,
    pub session_seq: u32,
}

/// A received RMCP+ packet whose trailer (if any) has been verified.
#[derive(Debug, Clone)]
pub(crate) struct DecodedPacket {
    pub header: RmcpPlusHeader,
    pub authenticated: bool,
    /// Payload as carried on the wire; still encrypted if `header.encrypted`.
    pub payload: Vec<u8>,
}

/// Encode an RMCP+ packet. With `integrity` the packet is marked
/// authenticated and the session trailer is appended.
pub(crate) fn encode_rmcpplus_packet(
    header: &RmcpPlusHeader,
    payload: &[u8],
    integrity: Option<Integrity<'_>>,
) -> Result<Vec<u8>> {
    let integrity = integrity.filter(|i| i.algorithm != IntegrityAlgorithm::None);
    let payload_len: u16 = payload
        .len()
        .try_into()
        .map_err(|_| Error::Protocol("payload too large"))?;

    let mut type_byte = header.payload_type & 0x3F;
    if integrity.is_some() {
        type_byte |= 0x40;
    }
    if header.encrypted {
        type_byte |= 0x80;
    }

    let mut packet =
        Vec::with_capacity(RMCP_HEADER_LEN + RMCPPLUS_SESSION_HEADER_LEN + payload.len() + 24);
    push_rmcp_header(&mut packet);
    packet.push(AuthType::RmcpPlus.as_u8());
    packet.push(type_byte);
    packet.extend_from_slice(&header.session_id.to_le_bytes());
    packet.extend_from_slice(&header.session_seq.to_le_bytes());
    packet.extend_from_slice(&payload_len.to_le_bytes());
    packet.extend_from_slice(payload);

    if let Some(integrity) = integrity {
        // Session header through next header must be a multiple of 4.
        let base_len = RMCPPLUS_SESSION_HEADER_LEN + payload.len() + 2;
        let pad_len = (4 - (base_len % 4)) % 4;

        packet.extend(std::iter::repeat_n(INTEGRITY_PAD, pad_len));
        packet.push(pad_len as u8);
        packet.push(RMCPPLUS_NEXT_HEADER);

        let auth_code = integrity.algorithm.compute_auth_code(
            integrity.k1,
            integrity.password,
            &packet[RMCP_HEADER_LEN..],
        )?;
        packet.extend_from_slice(&auth_code);
    }

    Ok(packet)
}

/// Decode an RMCP+ packet, verifying the trailer of authenticated packets.
pub(crate) fn decode_rmcpplus_packet(
    bytes: &[u8],
    integrity: Option<Integrity<'_>>,
) -> Result<DecodedPacket> {
    check_rmcp_header(bytes)?;
    let mut r = Reader::new(&bytes[RMCP_HEADER_LEN..], "RMCP+ session header too short");
    if r.u8()? != AuthType::RmcpPlus.as_u8() {
        return Err(Error::Protocol("unsupported RMCP auth type"));
    }
    let type_byte = r.u8()?;
    let payload_type = type_byte & 0x3F;
    if payload_type == payload_type::OEM_EXPLICIT {
        return Err(Error::Unsupported("OEM explicit payload is not supported"));
    }
    let session_id = r.u32_le()?;
    let session_seq = r.u32_le()?;
    let payload_len = usize::from(r.u16_le()?);
    let payload = r.bytes(payload_len).map_err(|_| Error::Protocol("truncated payload"))?;

    let authenticated = type_byte & 0x40 != 0;
    let header = RmcpPlusHeader {
        payload_type,
        encrypted: type_byte & 0x80 != 0,
        session_id,
        session_seq,
    };

    if authenticated {
        let integrity = integrity.ok_or(Error::Protocol(
            "integrity keys required for authenticated packets",
        ))?;
        let payload_end = RMCP_HEADER_LEN + RMCPPLUS_SESSION_HEADER_LEN + payload_len;
        verify_trailer(bytes, payload_end, integrity)?;
    } else if integrity.is_some_and(|i| i.algorithm != IntegrityAlgorithm::None) {
        return Err(Error::AuthenticationFailed(
            "unauthenticated packet on an integrity-protected session",
        ));
    }

    Ok(DecodedPacket {
        header,
        authenticated,
        payload: payload.to_vec(),
    })
}

fn verify_trailer(bytes: &[u8], payload_end: usize, integrity: Integrity<'_>) -> Result<()> {
    let auth_code_len = integrity.algorithm.auth_code_len();
    if bytes.len() < payload_end + 2 + auth_code_len {
        return Err(Error::Protocol("authenticated packet too short"));
    }

    let auth_code_start = bytes.len() - auth_code_len;
    let expected = integrity.algorithm.compute_auth_code(
        integrity.k1,
        integrity.password,
        &bytes[RMCP_HEADER_LEN..auth_code_start],
    )?;
    if !ct_eq(&bytes[auth_code_start..], &expected) {
        return Err(Error::AuthenticationFailed("invalid packet auth code"));
    }

    // Trailer layout: [integrity pad bytes][pad_len][next_header]
    let pad_len = usize::from(bytes[auth_code_start - 2]);
    if bytes[auth_code_start - 1] != RMCPPLUS_NEXT_HEADER {
        return Err(Error::Protocol("unexpected next header"));
    }
    let pad = &bytes[payload_end..auth_code_start - 2];
    if pad.len() != pad_len {
        return Err(Error::Protocol("pad length mismatch"));
    }
    if pad.iter().any(|&b| b != INTEGRITY_PAD) {
        return Err(Error::Protocol("invalid integrity pad bytes"));
    }
    Ok(())
}

/// Encrypt with AES-CBC-128. Returns `iv ‖ ciphertext`.
pub(crate) fn seal_aes_cbc(plaintext: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    let mut iv = [0u8; 16];
    rand::rng().fill_bytes(&mut iv);
    seal_aes_cbc_with_iv(plaintext, key, &iv)
}

fn seal_aes_cbc_with_iv(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<Vec<u8>> {
    // Confidentiality trailer: [1, 2, .. pad_len][pad_len]
    let base = plaintext.len() + 1;
    let pad_len = (16 - (base % 16)) % 16;

    let mut to_encrypt = Vec::with_capacity(base + pad_len);
    to_encrypt.extend_from_slice(plaintext);
    to_encrypt.extend((1..=pad_len).map(|i| i as u8));
    to_encrypt.push(pad_len as u8);

    let ciphertext = aes128_cbc_encrypt(key, iv, &to_encrypt)?;
    let mut out = Vec::with_capacity(16 + ciphertext.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an `iv ‖ ciphertext` AES-CBC-128 payload and strip its padding.
pub(crate) fn open_aes_cbc(payload: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    if payload.len() < 32 {
        return Err(Error::Protocol("encrypted payload too short"));
    }
    let (iv, ciphertext) = payload.split_at(16);
    if !ciphertext.len().is_multiple_of(16) {
        return Err(Error::Protocol("invalid AES-CBC ciphertext length"));
    }
    let mut iv_block = [0u8; 16];
    iv_block.copy_from_slice(iv);

    let mut plaintext = aes128_cbc_decrypt(key, &iv_block, ciphertext)?;
    let pad_len = usize::from(
        *plaintext
            .last()
            .ok_or(Error::Protocol("missing confidentiality pad length"))?,
    );
    if pad_len > plaintext.len() - 1 {
        return Err(Error::Protocol("invalid confidentiality pad length"));
    }

    let trailer_start = plaintext.len() - 1 - pad_len;
    let pad = &plaintext[trailer_start..plaintext.len() - 1];
    if pad.iter().enumerate().any(|(i, &b)| b != (i + 1) as u8) {
        return Err(Error::Protocol("invalid confidentiality pad bytes"));
    }

    plaintext.truncate(trailer_start);
    Ok(plaintext)
}

/// Restart the xRC4 stream with a fresh IV after this many bytes.
const XRC4_REKEY_AFTER: u32 = 0x0001_0000;

/// One direction of an xRC4 stream: the current IV and how many payload
/// bytes have been run through it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Xrc4Stream {
    pub iv: Option<[u8; 16]>,
    pub accumulated: u32,
}

fn xrc4_key(k2: &[u8], key_len: usize, iv: &[u8; 16]) -> Result<Vec<u8>> {
    if k2.len() < key_len {
        return Err(Error::Crypto("K2 shorter than the xRC4 key"));
    }
    let mut input = Vec::with_capacity(key_len + 16);
    input.extend_from_slice(&k2[..key_len]);
    input.extend_from_slice(iv);
    Ok(md5_digest(&input)[..key_len].to_vec())
}

/// Encrypt with xRC4. Returns `data offset ‖ [iv when offset is 0] ‖ ciphertext`.
pub(crate) fn seal_xrc4(
    plaintext: &[u8],
    k2: &[u8],
    key_len: usize,
    stream: &mut Xrc4Stream,
) -> Result<Vec<u8>> {
    let needs_iv = stream.iv.is_none()
        || stream
            .accumulated
            .checked_add(plaintext.len() as u32)
            .is_none_or(|end| end > XRC4_REKEY_AFTER);
    if needs_iv {
        let mut iv = [0u8; 16];
        rand::rng().fill_bytes(&mut iv);
        stream.iv = Some(iv);
        stream.accumulated = 0;
    }
    let iv = stream.iv.ok_or(Error::Crypto("missing xRC4 IV"))?;
    let offset = stream.accumulated;

    let mut out = Vec::with_capacity(4 + 16 + plaintext.len());
    out.extend_from_slice(&offset.to_le_bytes());
    if offset == 0 {
        out.extend_from_slice(&iv);
    }
    let mut data = plaintext.to_vec();
    rc4_apply(&xrc4_key(k2, key_len, &iv)?, u64::from(offset), &mut data)?;
    out.extend_from_slice(&data);

    stream.accumulated = offset + plaintext.len() as u32;
    Ok(out)
}

/// Decrypt an xRC4 payload, adopting a new IV whenever the data offset is 0.
pub(crate) fn open_xrc4(
    payload: &[u8],
    k2: &[u8],
    key_len: usize,
    stream: &mut Xrc4Stream,
) -> Result<Vec<u8>> {
    let mut r = Reader::new(payload, "xRC4 payload too short");
    let offset = r.u32_le()?;
    if offset == 0 {
        stream.iv = Some(r.array::<16>()?);
    }
    let iv = stream
        .iv
        .ok_or(Error::Protocol("xRC4 payload continues an unknown stream"))?;

    let mut data = r.rest().to_vec();
    rc4_apply(&xrc4_key(k2, key_len, &iv)?, u64::from(offset), &mut data)?;
    stream.accumulated = offset.saturating_add(data.len() as u32);
    Ok(data)
}

/// Header fields of an IPMI v1.5 session packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct V15Packet {
    pub auth_type: AuthType,
    pub session_seq: u32,
    pub session_id: u32,
    pub auth_code: Option<[u8; 16]>,
    pub payload: Vec<u8>,
}

/// Encode an IPMI v1.5 session packet.
pub(crate) fn encode_v15_packet(packet: &V15Packet) -> Result<Vec<u8>> {
    let payload_len: u8 = packet
        .payload
        .len()
        .try_into()
        .map_err(|_| Error::Protocol("payload too large for a v1.5 session"))?;

    let mut out = Vec::with_capacity(RMCP_HEADER_LEN + 26 + packet.payload.len());
    push_rmcp_header(&mut out);
    out.push(packet.auth_type.as_u8());
    out.extend_from_slice(&packet.session_seq.to_le_bytes());
    out.extend_from_slice(&packet.session_id.to_le_bytes());
    if packet.auth_type.has_auth_code() {
        let code = packet
            .auth_code
            .ok_or(Error::InvalidArgument("auth code required for this auth type"))?;
        out.extend_from_slice(&code);
    }
    out.push(payload_len);
    out.extend_from_slice(&packet.payload);
    Ok(out)
}

/// Decode an IPMI v1.5 session packet. Trailing legacy pad bytes are ignored.
pub(crate) fn decode_v15_packet(bytes: &[u8]) -> Result<V15Packet> {
    check_rmcp_header(bytes)?;
    let mut r = Reader::new(&bytes[RMCP_HEADER_LEN..], "v1.5 session header too short");
    let auth_type = AuthType::from_u8(r.u8()?)?;
    if auth_type == AuthType::RmcpPlus {
        return Err(Error::Protocol("RMCP+ packet on a v1.5 session"));
    }
    let session_seq = r.u32_le()?;
    let session_id = r.u32_le()?;
    let auth_code = if auth_type.has_auth_code() {
        Some(r.array::<16>()?)
    } else {
        None
    };
    let payload_len = usize::from(r.u8()?);
    let payload = r
        .bytes(payload_len)
        .map_err(|_| Error::Protocol("truncated payload"))?
        .to_vec();

    Ok(V15Packet {
        auth_type,
        session_seq,
        session_id,
        auth_code,
        payload,
    })
}
