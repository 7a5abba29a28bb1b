//! IPMI v1.5 AuthCode computation (straight password, MD2, MD5).

use crate::crypto::{md2_digest, md5_digest, pad_key};
use crate::error::{Error, Result};

/// IPMI v1.5 session authentication type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AuthType {
    /// No authentication.
    None = 0x00,
    /// MD2 digest.
    Md2 = 0x01,
    /// MD5 digest.
    Md5 = 0x02,
    /// Straight (clear-text) password.
    Password = 0x04,
    /// OEM proprietary.
    Oem = 0x05,
    /// RMCP+ (IPMI v2.0) session header format.
    RmcpPlus = 0x06,
}

impl AuthType {
    /// Wire value of the authentication type.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Result<Self> {
        match value & 0x0F {
            0x00 => Ok(AuthType::None),
            0x01 => Ok(AuthType::Md2),
            0x02 => Ok(AuthType::Md5),
            0x04 => Ok(AuthType::Password),
            0x05 => Ok(AuthType::Oem),
            0x06 => Ok(AuthType::RmcpPlus),
            _ => Err(Error::Protocol("unknown session auth type")),
        }
    }

    /// Bit for this type in the `Get Channel Authentication Capabilities` mask.
    pub(crate) fn capability_bit(self) -> u8 {
        match self {
            AuthType::None => 0x01,
            AuthType::Md2 => 0x02,
            AuthType::Md5 => 0x04,
            AuthType::Password => 0x10,
            AuthType::Oem => 0x20,
            AuthType::RmcpPlus => 0x00,
        }
    }

    /// Whether v1.5 session headers of this type carry a 16-byte AuthCode.
    pub(crate) fn has_auth_code(self) -> bool {
        !matches!(self, AuthType::None | AuthType::RmcpPlus)
    }

    /// Strongest type enabled in a capability mask: MD5, MD2, password, none.
    pub(crate) fn strongest_enabled(mask: u8) -> Option<Self> {
        [AuthType::Md5, AuthType::Md2, AuthType::Password, AuthType::None]
            .into_iter()
            .find(|t| mask & t.capability_bit() != 0)
    }
}

fn digest(auth_type: AuthType, password: &[u8; 16], input: &[u8]) -> Result<[u8; 16]> {
    match auth_type {
        AuthType::Md2 => Ok(md2_digest(input)),
        AuthType::Md5 => Ok(md5_digest(input)),
        AuthType::Password => Ok(*password),
        AuthType::None => Err(Error::InvalidArgument("auth type none has no auth code")),
        AuthType::Oem | AuthType::RmcpPlus => {
            Err(Error::Unsupported("auth code for OEM/RMCP+ auth types"))
        }
    }
}

/// Input to the single-session AuthCode, used to answer the Activate Session challenge.
///
/// `MD(password ‖ session id ‖ challenge ‖ password)`.
#[derive(Debug, Clone)]
pub struct AuthCodeSingleSessionInput<'a> {
    /// User password (truncated/zero-padded to 16 bytes).
    pub password: &'a [u8],
    /// Temporary session ID from Get Session Challenge.
    pub session_id: u32,
    /// Challenge string from Get Session Challenge.
    pub challenge: [u8; 16],
}

impl AuthCodeSingleSessionInput<'_> {
    /// Compute the 16-byte AuthCode for `auth_type`.
    pub fn auth_code(&self, auth_type: AuthType) -> Result<[u8; 16]> {
        let password: [u8; 16] = pad_key(self.password);
        let mut input = Vec::with_capacity(16 + 4 + 16 + 16);
        input.extend_from_slice(&password);
        input.extend_from_slice(&self.session_id.to_le_bytes());
        input.extend_from_slice(&self.challenge);
        input.extend_from_slice(&password);
        digest(auth_type, &password, &input)
    }
}

/// Input to the multi-session AuthCode carried in every authenticated v1.5 session header.
///
/// `MD(password ‖ session id ‖ IPMI message ‖ session seq ‖ password)`.
#[derive(Debug, Clone)]
pub struct AuthCodeMultiSessionInput<'a> {
    /// User password (truncated/zero-padded to 16 bytes).
    pub password: &'a [u8],
    /// Session ID from the session header.
    pub session_id: u32,
    /// Session sequence number from the session header.
    pub session_seq: u32,
    /// The raw IPMI message bytes.
    pub ipmi_data: &'a [u8],
}

impl AuthCodeMultiSessionInput<'_> {
    /// Compute the 16-byte AuthCode for `auth_type`.
    pub fn auth_code(&self, auth_type: AuthType) -> Result<[u8; 16]> {
        let password: [u8; 16] = pad_key(self.password);
        let mut input = Vec::with_capacity(16 + 4 + self.ipmi_data.len() + 4 + 16);
        input.extend_from_slice(&password);
        input.extend_from_slice(&self.session_id.to_le_bytes());
        input.extend_from_slice(self.ipmi_data);
        input.extend_from_slice(&self.session_seq.to_le_bytes());
        input.extend_from_slice(&password);
        digest(auth_type, &password, &input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_session_md5_fixture() {
        let input = AuthCodeMultiSessionInput {
            password: b"vtA9kBPODBPBy",
            session_id: 0xa26f8e00,
            session_seq: 0xdabbb496,
            ipmi_data: &[0x20, 0x18, 0xc8, 0x81, 0x10, 0x3b, 0x04, 0x30],
        };
        let expected = [
            0x69, 0xe8, 0x3e, 0x2b, 0x99, 0xe3, 0xf6, 0xa9, 0x3d, 0x1c, 0xf0, 0x47, 0x8b, 0x0e,
            0xfe, 0xba,
        ];
        assert_eq!(input.auth_code(AuthType::Md5).expect("md5"), expected);
        // Pure function: same input, same output.
        assert_eq!(input.auth_code(AuthType::Md5).expect("md5"), expected);
    }

    #[test]
    fn multi_session_depends_on_every_field() {
        let base = AuthCodeMultiSessionInput {
            password: b"vtA9kBPODBPBy",
            session_id: 0xb215d500,
            session_seq: 0,
            ipmi_data: &[0x20, 0x18, 0xc8, 0x81, 0x04, 0x3b, 0x04, 0x3c],
        };
        let code = base.auth_code(AuthType::Md5).expect("md5");

        let mut other = base.clone();
        other.session_seq = 1;
        assert_ne!(other.auth_code(AuthType::Md5).expect("md5"), code);

        let mut other = base.clone();
        other.password = b"vtA9kBPODBPBz";
        assert_ne!(other.auth_code(AuthType::Md5).expect("md5"), code);

        assert_ne!(base.auth_code(AuthType::Md2).expect("md2"), code);
    }

    #[test]
    fn password_auth_code_is_padded_password() {
        let input = AuthCodeSingleSessionInput {
            password: b"secret",
            session_id: 0x01020304,
            challenge: [0xAA; 16],
        };
        let code = input.auth_code(AuthType::Password).expect("password");
        assert_eq!(&code[..6], b"secret");
        assert!(code[6..].iter().all(|&b| b == 0));

        let long = AuthCodeSingleSessionInput {
            password: b"0123456789abcdefXYZ",
            ..input.clone()
        };
        assert_eq!(
            &long.auth_code(AuthType::Password).expect("password"),
            b"0123456789abcdef"
        );
    }

    #[test]
    fn single_session_md5_vector() {
        let input = AuthCodeSingleSessionInput {
            password: b"admin",
            session_id: 0x11223344,
            challenge: [0x5A; 16],
        };
        let mut raw = Vec::new();
        raw.extend_from_slice(&pad_key::<16>(b"admin"));
        raw.extend_from_slice(&[0x44, 0x33, 0x22, 0x11]);
        raw.extend_from_slice(&[0x5A; 16]);
        raw.extend_from_slice(&pad_key::<16>(b"admin"));
        assert_eq!(
            input.auth_code(AuthType::Md5).expect("md5"),
            md5_digest(&raw)
        );
        assert!(input.auth_code(AuthType::None).is_err());
    }

    #[test]
    fn strongest_enabled_prefers_md5() {
        assert_eq!(AuthType::strongest_enabled(0x17), Some(AuthType::Md5));
        assert_eq!(AuthType::strongest_enabled(0x12), Some(AuthType::Md2));
        assert_eq!(AuthType::strongest_enabled(0x11), Some(AuthType::Password));
        assert_eq!(AuthType::strongest_enabled(0x01), Some(AuthType::None));
        assert_eq!(AuthType::strongest_enabled(0x20), None);
    }
}
