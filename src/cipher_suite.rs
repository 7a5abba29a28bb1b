//! RMCP+ algorithm identifiers, the standard cipher suite table and the
//! `Get Channel Cipher Suites` record format.

use crate::codec::Reader;
use crate::crypto::{HmacAlgorithm, hmac, md5_digest, pad_key};
use crate::error::{Error, Result};

/// Authentication (RAKP) algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AuthAlgorithm {
    /// RAKP-none.
    None = 0x00,
    /// RAKP-HMAC-SHA1.
    HmacSha1 = 0x01,
    /// RAKP-HMAC-MD5.
    HmacMd5 = 0x02,
    /// RAKP-HMAC-SHA256.
    HmacSha256 = 0x03,
}

impl AuthAlgorithm {
    /// Parse the 6-bit algorithm number.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value & 0x3F {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::HmacSha1),
            0x02 => Ok(Self::HmacMd5),
            0x03 => Ok(Self::HmacSha256),
            _ => Err(Error::Unsupported("authentication algorithm")),
        }
    }

    /// Wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn hmac_algorithm(self) -> Option<HmacAlgorithm> {
        match self {
            Self::None => None,
            Self::HmacSha1 => Some(HmacAlgorithm::Sha1),
            Self::HmacMd5 => Some(HmacAlgorithm::Md5),
            Self::HmacSha256 => Some(HmacAlgorithm::Sha256),
        }
    }

    /// Length of the RAKP 2/3 Key Exchange AuthCode.
    pub fn key_exchange_code_len(self) -> usize {
        self.hmac_algorithm().map_or(0, HmacAlgorithm::output_len)
    }

    /// Full-length HMAC under this algorithm; empty for RAKP-none.
    pub(crate) fn compute_hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match self.hmac_algorithm() {
            Some(alg) => hmac(alg, key, data),
            None => Ok(Vec::new()),
        }
    }
}

/// Integrity algorithm protecting each session packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IntegrityAlgorithm {
    /// No integrity trailer.
    None = 0x00,
    /// HMAC-SHA1 truncated to 96 bits.
    HmacSha1_96 = 0x01,
    /// HMAC-MD5, 128 bits.
    HmacMd5_128 = 0x02,
    /// MD5(password ‖ data ‖ password).
    Md5_128 = 0x03,
    /// HMAC-SHA256 truncated to 128 bits.
    HmacSha256_128 = 0x04,
}

impl IntegrityAlgorithm {
    /// Parse the 6-bit algorithm number.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value & 0x3F {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::HmacSha1_96),
            0x02 => Ok(Self::HmacMd5_128),
            0x03 => Ok(Self::Md5_128),
            0x04 => Ok(Self::HmacSha256_128),
            _ => Err(Error::Unsupported("integrity algorithm")),
        }
    }

    /// Wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Length of the per-packet AuthCode and of the RAKP 4 integrity check value.
    pub fn auth_code_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::HmacSha1_96 => 12,
            Self::HmacMd5_128 | Self::Md5_128 | Self::HmacSha256_128 => 16,
        }
    }

    /// Per-packet AuthCode over `data` (AuthType byte through Next Header).
    pub(crate) fn compute_auth_code(
        self,
        k1: &[u8],
        password: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let mut code = match self {
            Self::None => return Ok(Vec::new()),
            Self::HmacSha1_96 => hmac(HmacAlgorithm::Sha1, k1, data)?,
            Self::HmacMd5_128 => hmac(HmacAlgorithm::Md5, k1, data)?,
            Self::HmacSha256_128 => hmac(HmacAlgorithm::Sha256, k1, data)?,
            Self::Md5_128 => {
                let password: [u8; 16] = pad_key(password);
                let mut input = Vec::with_capacity(32 + data.len());
                input.extend_from_slice(&password);
                input.extend_from_slice(data);
                input.extend_from_slice(&password);
                md5_digest(&input).to_vec()
            }
        };
        code.truncate(self.auth_code_len());
        Ok(code)
    }
}

/// Confidentiality (payload encryption) algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConfidentialityAlgorithm {
    /// Plaintext payloads.
    None = 0x00,
    /// AES-CBC-128.
    AesCbc128 = 0x01,
    /// xRC4 with a 128-bit key.
    Xrc4_128 = 0x02,
    /// xRC4 with a 40-bit key.
    Xrc4_40 = 0x03,
}

impl ConfidentialityAlgorithm {
    /// Parse the 6-bit algorithm number.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value & 0x3F {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::AesCbc128),
            0x02 => Ok(Self::Xrc4_128),
            0x03 => Ok(Self::Xrc4_40),
            _ => Err(Error::Unsupported("confidentiality algorithm")),
        }
    }

    /// Wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Number of K2 bytes keying the cipher.
    pub fn key_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::AesCbc128 | Self::Xrc4_128 => 16,
            Self::Xrc4_40 => 5,
        }
    }
}

/// The algorithm triple behind a cipher suite ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuite {
    /// Cipher suite ID.
    pub id: u8,
    /// Authentication algorithm.
    pub auth: AuthAlgorithm,
    /// Integrity algorithm.
    pub integrity: IntegrityAlgorithm,
    /// Confidentiality algorithm.
    pub confidentiality: ConfidentialityAlgorithm,
}

/// Look up the standard algorithm triple for cipher suite `id` (0..=19).
pub fn cipher_suite_algorithms(id: u8) -> Result<CipherSuite> {
    use AuthAlgorithm as A;
    use ConfidentialityAlgorithm as C;
    use IntegrityAlgorithm as I;

    let (auth, integrity, confidentiality) = match id {
        0 => (A::None, I::None, C::None),
        1 => (A::HmacSha1, I::None, C::None),
        2 => (A::HmacSha1, I::HmacSha1_96, C::None),
        3 => (A::HmacSha1, I::HmacSha1_96, C::AesCbc128),
        4 => (A::HmacSha1, I::HmacSha1_96, C::Xrc4_128),
        5 => (A::HmacSha1, I::HmacSha1_96, C::Xrc4_40),
        6 => (A::HmacMd5, I::None, C::None),
        7 => (A::HmacMd5, I::HmacMd5_128, C::None),
        8 => (A::HmacMd5, I::HmacMd5_128, C::AesCbc128),
        9 => (A::HmacMd5, I::HmacMd5_128, C::Xrc4_128),
        10 => (A::HmacMd5, I::HmacMd5_128, C::Xrc4_40),
        11 => (A::HmacMd5, I::Md5_128, C::None),
        12 => (A::HmacMd5, I::Md5_128, C::AesCbc128),
        13 => (A::HmacMd5, I::Md5_128, C::Xrc4_128),
        14 => (A::HmacMd5, I::Md5_128, C::Xrc4_40),
        15 => (A::HmacSha256, I::None, C::None),
        16 => (A::HmacSha256, I::HmacSha256_128, C::None),
        17 => (A::HmacSha256, I::HmacSha256_128, C::AesCbc128),
        18 => (A::HmacSha256, I::HmacSha256_128, C::Xrc4_128),
        19 => (A::HmacSha256, I::HmacSha256_128, C::Xrc4_40),
        _ => return Err(Error::Unsupported("non-standard cipher suite id")),
    };
    Ok(CipherSuite {
        id,
        auth,
        integrity,
        confidentiality,
    })
}

/// Suites tried when none is configured, strongest first.
pub(crate) const PREFERRED_CIPHER_SUITES: [u8; 12] = [17, 3, 8, 12, 16, 2, 7, 11, 15, 1, 6, 0];

const STANDARD_RECORD: u8 = 0xC0;
const OEM_RECORD: u8 = 0xC1;

const TAG_AUTH: u8 = 0b00;
const TAG_INTEGRITY: u8 = 0b01;
const TAG_CONFIDENTIALITY: u8 = 0b10;

/// Start-of-record marker of a cipher suite record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuiteRecordKind {
    /// `C0h`: standard cipher suite.
    Standard,
    /// `C1h`: OEM cipher suite, followed by the OEM IANA.
    Oem,
}

/// One entry from the `Get Channel Cipher Suites` catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSuiteRecord {
    /// Standard or OEM.
    pub kind: CipherSuiteRecordKind,
    /// Cipher suite ID.
    pub cipher_suite_id: u8,
    /// OEM IANA enterprise number (OEM records only).
    pub oem_iana: Option<u32>,
    /// Authentication algorithm number.
    pub auth_algorithm: u8,
    /// Acceptable integrity algorithm numbers, in record order.
    pub integrity_algorithms: Vec<u8>,
    /// Acceptable confidentiality algorithm numbers, in record order.
    pub confidentiality_algorithms: Vec<u8>,
}

impl CipherSuiteRecord {
    /// Encode this record in catalog format.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        match self.kind {
            CipherSuiteRecordKind::Standard => {
                out.push(STANDARD_RECORD);
                out.push(self.cipher_suite_id);
            }
            CipherSuiteRecordKind::Oem => {
                out.push(OEM_RECORD);
                out.push(self.cipher_suite_id);
                out.extend_from_slice(&self.oem_iana.unwrap_or(0).to_le_bytes()[..3]);
            }
        }
        out.push((TAG_AUTH << 6) | (self.auth_algorithm & 0x3F));
        out.extend(
            self.integrity_algorithms
                .iter()
                .map(|a| (TAG_INTEGRITY << 6) | (a & 0x3F)),
        );
        out.extend(
            self.confidentiality_algorithms
                .iter()
                .map(|a| (TAG_CONFIDENTIALITY << 6) | (a & 0x3F)),
        );
        out
    }
}

/// Parse a concatenated stream of cipher suite records.
pub fn parse_cipher_suites_data(data: &[u8]) -> Result<Vec<CipherSuiteRecord>> {
    let mut records = Vec::new();
    let mut r = Reader::new(data, "truncated cipher suite record");

    while r.remaining() > 0 {
        let (kind, cipher_suite_id, oem_iana) = match r.u8()? {
            STANDARD_RECORD => (CipherSuiteRecordKind::Standard, r.u8()?, None),
            OEM_RECORD => {
                let id = r.u8()?;
                (CipherSuiteRecordKind::Oem, id, Some(r.u24_le()?))
            }
            _ => return Err(Error::Protocol("invalid cipher suite start of record")),
        };

        let mut auth_algorithm = None;
        let mut integrity_algorithms = Vec::new();
        let mut confidentiality_algorithms = Vec::new();

        while let Some(&tag) = r.rest().first() {
            if tag == STANDARD_RECORD || tag == OEM_RECORD {
                break;
            }
            r.skip(1)?;
            let number = tag & 0x3F;
            match tag >> 6 {
                TAG_AUTH => {
                    if auth_algorithm.replace(number).is_some() {
                        return Err(Error::Protocol(
                            "cipher suite record has more than one authentication algorithm",
                        ));
                    }
                }
                TAG_INTEGRITY => integrity_algorithms.push(number),
                TAG_CONFIDENTIALITY => confidentiality_algorithms.push(number),
                _ => return Err(Error::Protocol("invalid cipher suite algorithm tag")),
            }
        }

        let auth_algorithm = auth_algorithm.ok_or(Error::Protocol(
            "cipher suite record without authentication algorithm",
        ))?;

        records.push(CipherSuiteRecord {
            kind,
            cipher_suite_id,
            oem_iana,
            auth_algorithm,
            integrity_algorithms,
            confidentiality_algorithms,
        });
    }

    Ok(records)
}

/// Largest list index accepted by `Get Channel Cipher Suites`.
const MAX_LIST_INDEX: u8 = 0x3F;
/// A full page carries this many record bytes; a shorter page is the last one.
const PAGE_LEN: usize = 16;

/// Accumulates the paginated `Get Channel Cipher Suites` responses.
#[derive(Debug, Default)]
pub(crate) struct CipherSuiteCatalog {
    data: Vec<u8>,
    next_index: u8,
    done: bool,
}

impl CipherSuiteCatalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// List index to request next, or `None` once the catalog is complete.
    pub(crate) fn next_list_index(&self) -> Option<u8> {
        if self.done || self.next_index > MAX_LIST_INDEX {
            None
        } else {
            Some(self.next_index)
        }
    }

    pub(crate) fn push_page(&mut self, records: &[u8]) {
        self.data.extend_from_slice(records);
        self.next_index = self.next_index.saturating_add(1);
        if records.len() < PAGE_LEN {
            self.done = true;
        }
    }

    pub(crate) fn finish(self) -> Result<Vec<CipherSuiteRecord>> {
        parse_cipher_suites_data(&self.data)
    }
}

/// Order the suites to try. `None` (catalog unavailable) or a catalog with no
/// runnable suite falls back to the full preference list.
pub(crate) fn candidate_suites(catalog: Option<&[CipherSuiteRecord]>) -> Vec<u8> {
    let advertised: Vec<u8> = catalog
        .unwrap_or_default()
        .iter()
        .filter(|r| r.kind == CipherSuiteRecordKind::Standard)
        .map(|r| r.cipher_suite_id)
        .collect();

    let picked: Vec<u8> = PREFERRED_CIPHER_SUITES
        .iter()
        .copied()
        .filter(|id| advertised.contains(id))
        .collect();

    if picked.is_empty() {
        PREFERRED_CIPHER_SUITES.to_vec()
    } else {
        picked
    }
}
