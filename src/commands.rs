use crate::auth_code::AuthType;
use crate::codec::Reader;
use crate::error::{Error, Result};
use crate::types::{
    ActivatedSession, ChannelAuthCapabilities, CipherSuitesPage, DeviceId, PrivilegeLevel,
    RawResponse, SessionChallenge, SessionInfo,
};

/// App network function.
pub const NETFN_APP: u8 = 0x06;

/// A typed IPMI command (single request/response).
pub trait Command {
    /// Parsed output type.
    type Output: Response;

    /// Network Function (NetFn) for the request.
    const NETFN: u8;

    /// Command number.
    const CMD: u8;

    /// Encode request payload bytes (excluding NetFn/Cmd framing).
    fn request_data(&self) -> Vec<u8>;

    /// Parse a raw response into the typed output.
    fn parse_response(&self, response: &RawResponse) -> Result<Self::Output> {
        decode_response(response)
    }
}

/// A typed command response.
pub trait Response: Sized {
    /// Decode the data following a zero completion code.
    fn unpack(data: &[u8]) -> Result<Self>;

    /// Command-specific completion codes; these win over the generic table.
    fn completion_codes() -> &'static [(u8, &'static str)] {
        &[]
    }
}

impl Response for () {
    fn unpack(_data: &[u8]) -> Result<Self> {
        Ok(())
    }
}

impl Response for RawResponse {
    fn unpack(data: &[u8]) -> Result<Self> {
        Ok(RawResponse {
            completion_code: 0x00,
            data: data.to_vec(),
        })
    }
}

const GENERIC_COMPLETION_CODES: &[(u8, &str)] = &[
    (0x00, "Command Completed Normally"),
    (0xC0, "Node Busy"),
    (0xC1, "Invalid Command"),
    (0xC2, "Command invalid for given LUN"),
    (0xC3, "Timeout while processing command"),
    (0xC4, "Out of space"),
    (0xC5, "Reservation Canceled or Invalid Reservation ID"),
    (0xC6, "Request data truncated"),
    (0xC7, "Request data length invalid"),
    (0xC8, "Request data field length limit exceeded"),
    (0xC9, "Parameter out of range"),
    (0xCA, "Cannot return number of requested data bytes"),
    (0xCB, "Requested Sensor, data, or record not present"),
    (0xCC, "Invalid data field in Request"),
    (0xCD, "Command illegal for specified sensor or record type"),
    (0xCE, "Command response could not be provided"),
    (0xCF, "Cannot execute duplicated request"),
    (0xD0, "SDR Repository in update mode"),
    (0xD1, "Device in firmware update mode"),
    (0xD2, "BMC initialization or initialization agent in progress"),
    (0xD3, "Destination unavailable"),
    (0xD4, "Insufficient privilege level"),
    (0xD5, "Command not supported in present state"),
    (0xD6, "Sub-function has been disabled or is unavailable"),
    (0xFF, "Unspecified error"),
];

/// Describe `completion_code`, preferring the command's own table.
pub fn describe_completion_code(completion_code: u8, specific: &[(u8, &'static str)]) -> String {
    let lookup = |table: &[(u8, &'static str)]| {
        table
            .iter()
            .find(|(code, _)| *code == completion_code)
            .map(|(_, text)| *text)
    };
    if let Some(text) = lookup(specific).or_else(|| lookup(GENERIC_COMPLETION_CODES)) {
        return text.to_string();
    }
    match completion_code {
        0x01..=0x7E => "Device specific (OEM) completion code".to_string(),
        0x80..=0xBE => "Command specific completion code".to_string(),
        _ => "Unknown completion code".to_string(),
    }
}

/// Turn a raw response into `R`, mapping non-zero completion codes to errors.
pub(crate) fn decode_response<R: Response>(response: &RawResponse) -> Result<R> {
    if response.completion_code != 0x00 {
        return Err(Error::CompletionCode {
            completion_code: response.completion_code,
            description: describe_completion_code(
                response.completion_code,
                R::completion_codes(),
            ),
        });
    }
    R::unpack(&response.data)
}

/// `Get Device ID` (App NetFn, cmd 0x01).
#[derive(Debug, Clone, Copy)]
pub struct GetDeviceId;

impl Command for GetDeviceId {
    type Output = DeviceId;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x01;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }
}

impl Response for DeviceId {
    fn unpack(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "Get Device ID response too short");
        let device_id = r.u8()?;
        let device_revision = r.u8()? & 0x0F;
        let firmware_major = r.u8()?;
        let firmware_minor = r.u8()?;
        let ipmi_version = r.u8()?;
        r.skip(1)?; // additional device support
        let manufacturer_id = r.u24_le()?;
        let product_id = r.u16_le()?;
        // Auxiliary firmware revision is optional.
        let aux_firmware_revision = r.array::<4>().unwrap_or_default();

        Ok(DeviceId {
            device_id,
            device_revision,
            firmware_major,
            firmware_minor,
            ipmi_version,
            manufacturer_id,
            product_id,
            aux_firmware_revision,
        })
    }
}

/// `Get Channel Authentication Capabilities` (App NetFn, cmd 0x38).
#[derive(Debug, Clone, Copy)]
pub struct GetChannelAuthCapabilities {
    /// Channel number (low nibble).
    pub channel: u8,
    /// Privilege to query.
    pub privilege: PrivilegeLevel,
    /// Request that IPMI v2.0 data be included when available.
    pub request_v2_data: bool,
}

impl GetChannelAuthCapabilities {
    /// Create a query that requests IPMI v2.0 data (when supported).
    pub fn new(channel: u8, privilege: PrivilegeLevel) -> Self {
        Self {
            channel,
            privilege,
            request_v2_data: true,
        }
    }

    /// Return a variant that does not request IPMI v2.0 data.
    pub fn without_v2_data(self) -> Self {
        Self {
            request_v2_data: false,
            ..self
        }
    }
}

impl Command for GetChannelAuthCapabilities {
    type Output = ChannelAuthCapabilities;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x38;

    fn request_data(&self) -> Vec<u8> {
        let channel = if self.request_v2_data {
            self.channel | 0x80
        } else {
            self.channel & 0x7F
        };
        vec![channel, self.privilege.as_u8() & 0x0F]
    }
}

impl Response for ChannelAuthCapabilities {
    fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::Protocol(
                "Get Channel Authentication Capabilities response too short",
            ));
        }

        let enabled_auth_types = data[1] & 0x3F;
        let has_oem = enabled_auth_types & AuthType::Oem.capability_bit() != 0;
        let (oem_id, oem_aux_data) = if has_oem {
            let id = u32::from(data[4]) | (u32::from(data[5]) << 8) | (u32::from(data[6]) << 16);
            (Some(id), Some(data[7]))
        } else {
            (None, None)
        };

        Ok(ChannelAuthCapabilities {
            channel_number: data[0] & 0x0F,
            v20_data_available: data[1] & 0x80 != 0,
            enabled_auth_types,
            per_message_auth_disabled: data[2] & 0x10 != 0,
            user_level_auth_disabled: data[2] & 0x08 != 0,
            non_null_usernames: data[2] & 0x04 != 0,
            null_usernames: data[2] & 0x02 != 0,
            anonymous_login_enabled: data[2] & 0x01 != 0,
            kg_nonzero: data[2] & 0x20 != 0,
            supports_ipmi_v1_5: data[3] & 0x01 != 0,
            supports_ipmi_v2_0: data[3] & 0x02 != 0,
            oem_id,
            oem_aux_data,
        })
    }
}

/// `Get Session Challenge` (App NetFn, cmd 0x39).
#[derive(Debug, Clone)]
pub struct GetSessionChallenge {
    /// Authentication type the session will use.
    pub auth_type: AuthType,
    /// User name (zero-padded to 16 bytes on the wire).
    pub username: Vec<u8>,
}

impl Command for GetSessionChallenge {
    type Output = SessionChallenge;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x39;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(17);
        data.push(self.auth_type.as_u8());
        data.extend_from_slice(&crate::crypto::pad_key::<16>(&self.username));
        data
    }
}

impl Response for SessionChallenge {
    fn unpack(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "Get Session Challenge response too short");
        Ok(SessionChallenge {
            temporary_session_id: r.u32_le()?,
            challenge: r.array::<16>()?,
        })
    }

    fn completion_codes() -> &'static [(u8, &'static str)] {
        &[
            (0x81, "invalid user name"),
            (0x82, "null user name (User 1) not enabled"),
        ]
    }
}

/// `Activate Session` (App NetFn, cmd 0x3A).
#[derive(Debug, Clone)]
pub struct ActivateSession {
    /// Authentication type for the session.
    pub auth_type: AuthType,
    /// Maximum privilege level requested.
    pub max_privilege: PrivilegeLevel,
    /// Challenge string from `Get Session Challenge`.
    pub challenge: [u8; 16],
    /// First sequence number the console will use.
    pub initial_outbound_seq: u32,
}

impl Command for ActivateSession {
    type Output = ActivatedSession;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x3A;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(22);
        data.push(self.auth_type.as_u8());
        data.push(self.max_privilege.as_u8());
        data.extend_from_slice(&self.challenge);
        data.extend_from_slice(&self.initial_outbound_seq.to_le_bytes());
        data
    }
}

impl Response for ActivatedSession {
    fn unpack(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "Activate Session response too short");
        Ok(ActivatedSession {
            auth_type: r.u8()? & 0x0F,
            session_id: r.u32_le()?,
            initial_inbound_seq: r.u32_le()?,
            max_privilege: r.u8()? & 0x0F,
        })
    }

    fn completion_codes() -> &'static [(u8, &'static str)] {
        &[
            (0x81, "No session slot available"),
            (0x82, "No slot available for given user"),
            (0x83, "No slot available to support user due to maximum privilege capability"),
            (0x84, "Session sequence number out-of-range"),
            (0x85, "Invalid Session ID in request"),
            (0x86, "Requested maximum privilege level exceeds user and/or channel privilege limit"),
        ]
    }
}

/// `Set Session Privilege Level` (App NetFn, cmd 0x3B).
#[derive(Debug, Clone, Copy)]
pub struct SetSessionPrivilegeLevel {
    /// Privilege level to switch to.
    pub privilege: PrivilegeLevel,
}

/// New privilege level reported by `Set Session Privilege Level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPrivilege(pub u8);

impl Command for SetSessionPrivilegeLevel {
    type Output = SessionPrivilege;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x3B;

    fn request_data(&self) -> Vec<u8> {
        vec![self.privilege.as_u8()]
    }
}

impl Response for SessionPrivilege {
    fn unpack(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "Set Session Privilege Level response too short");
        Ok(SessionPrivilege(r.u8()? & 0x0F))
    }

    fn completion_codes() -> &'static [(u8, &'static str)] {
        &[
            (0x80, "Requested level not available for this user"),
            (0x81, "Requested level exceeds Channel and/or User Privilege Limit"),
            (0x82, "Cannot disable User Level authentication"),
        ]
    }
}

/// `Close Session` (App NetFn, cmd 0x3C).
#[derive(Debug, Clone, Copy)]
pub struct CloseSession {
    /// Session to close.
    pub session_id: u32,
}

/// Empty response of `Close Session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClosed;

/// Completion code for an unknown session ID on `Close Session`.
pub(crate) const CC_INVALID_SESSION_ID: u8 = 0x87;

impl Command for CloseSession {
    type Output = SessionClosed;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x3C;

    fn request_data(&self) -> Vec<u8> {
        self.session_id.to_le_bytes().to_vec()
    }
}

impl Response for SessionClosed {
    fn unpack(_data: &[u8]) -> Result<Self> {
        Ok(SessionClosed)
    }

    fn completion_codes() -> &'static [(u8, &'static str)] {
        &[
            (CC_INVALID_SESSION_ID, "Invalid Session ID in request"),
            (0x88, "Invalid session handle in request"),
        ]
    }
}

/// `Get Session Info` (App NetFn, cmd 0x3D).
#[derive(Debug, Clone, Copy)]
pub struct GetSessionInfo {
    /// Session index; 0 queries the session carrying this request.
    pub session_index: u8,
}

impl Command for GetSessionInfo {
    type Output = SessionInfo;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x3D;

    fn request_data(&self) -> Vec<u8> {
        vec![self.session_index]
    }
}

impl Response for SessionInfo {
    fn unpack(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "Get Session Info response too short");
        let session_handle = r.u8()?;
        let possible_sessions = r.u8()? & 0x3F;
        let active_sessions = r.u8()? & 0x3F;
        let user_id = r.u8().ok().map(|b| b & 0x3F);
        let privilege = r.u8().ok().map(|b| b & 0x0F);
        let channel = r.u8().ok().map(|b| b & 0x0F);

        Ok(SessionInfo {
            session_handle,
            possible_sessions,
            active_sessions,
            user_id,
            privilege,
            channel,
        })
    }
}

/// `Get Channel Cipher Suites` (App NetFn, cmd 0x54), one page of records.
#[derive(Debug, Clone, Copy)]
pub struct GetChannelCipherSuites {
    /// Channel number; 0x0E is the channel carrying this request.
    pub channel: u8,
    /// Payload type whose suites are listed (0 = IPMI).
    pub payload_type: u8,
    /// Page index (0..=63).
    pub list_index: u8,
}

impl Command for GetChannelCipherSuites {
    type Output = CipherSuitesPage;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x54;

    fn request_data(&self) -> Vec<u8> {
        // Bit 7: list algorithms by cipher suite.
        vec![
            self.channel & 0x0F,
            self.payload_type & 0x3F,
            0x80 | (self.list_index & 0x3F),
        ]
    }
}

impl Response for CipherSuitesPage {
    fn unpack(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "Get Channel Cipher Suites response too short");
        Ok(CipherSuitesPage {
            channel_number: r.u8()? & 0x0F,
            record_data: r.rest().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_id_fields() {
        let data = [
            0x20, 0x81, 0x02, 0x15, 0x02, 0xBF, 0x57, 0x01, 0x00, 0x34, 0x12, 0x01, 0x02, 0x03,
            0x04,
        ];
        let id = DeviceId::unpack(&data).expect("parse");
        assert_eq!(id.device_id, 0x20);
        assert_eq!(id.device_revision, 0x01);
        assert_eq!(id.firmware_major, 0x02);
        assert_eq!(id.ipmi_version, 0x02);
        assert_eq!(id.manufacturer_id, 0x000157);
        assert_eq!(id.product_id, 0x1234);
        assert_eq!(id.aux_firmware_revision, [1, 2, 3, 4]);

        let short = DeviceId::unpack(&data[..11]).expect("no aux");
        assert_eq!(short.aux_firmware_revision, [0; 4]);
        assert!(DeviceId::unpack(&data[..10]).is_err());
    }

    #[test]
    fn parse_channel_auth_capabilities_with_oem() {
        let data = [0x82, 0xA1, 0x3D, 0x03, 0x33, 0x22, 0x11, 0x77];
        let caps = ChannelAuthCapabilities::unpack(&data).expect("parse");

        assert_eq!(caps.channel_number, 0x02);
        assert!(caps.v20_data_available);
        assert_eq!(caps.enabled_auth_types, 0x21);
        assert!(caps.per_message_auth_disabled);
        assert!(caps.user_level_auth_disabled);
        assert!(caps.non_null_usernames);
        assert!(!caps.null_usernames);
        assert!(caps.anonymous_login_enabled);
        assert!(caps.kg_nonzero);
        assert!(caps.supports_ipmi_v1_5);
        assert!(caps.supports_ipmi_v2_0);
        assert_eq!(caps.oem_id, Some(0x112233));
        assert_eq!(caps.oem_aux_data, Some(0x77));
    }

    #[test]
    fn parse_channel_auth_capabilities_without_oem() {
        let data = [0x01, 0x80, 0x00, 0x01, 0xAA, 0xBB, 0xCC, 0xDD];
        let caps = ChannelAuthCapabilities::unpack(&data).expect("parse");

        assert_eq!(caps.channel_number, 0x01);
        assert_eq!(caps.enabled_auth_types, 0x00);
        assert!(caps.supports_ipmi_v1_5);
        assert!(!caps.supports_ipmi_v2_0);
        assert_eq!(caps.oem_id, None);
        assert_eq!(caps.oem_aux_data, None);
    }

    #[test]
    fn completion_code_tables_merge() {
        let err = decode_response::<SessionClosed>(&RawResponse {
            completion_code: 0x87,
            data: Vec::new(),
        })
        .unwrap_err();
        assert!(matches!(
            err,
            Error::CompletionCode { completion_code: 0x87, ref description }
                if description == "Invalid Session ID in request"
        ));

        assert_eq!(
            describe_completion_code(0xC1, SessionClosed::completion_codes()),
            "Invalid Command"
        );
        assert_eq!(
            describe_completion_code(0x81, SessionChallenge::completion_codes()),
            "invalid user name"
        );
        assert_eq!(
            describe_completion_code(0x81, &[]),
            "Command specific completion code"
        );
        assert_eq!(
            describe_completion_code(0x05, &[]),
            "Device specific (OEM) completion code"
        );
        assert_eq!(describe_completion_code(0xE0, &[]), "Unknown completion code");
    }

    #[test]
    fn session_command_encodings() {
        let challenge = GetSessionChallenge {
            auth_type: AuthType::Md5,
            username: b"root".to_vec(),
        };
        let data = challenge.request_data();
        assert_eq!(data.len(), 17);
        assert_eq!(data[0], 0x02);
        assert_eq!(&data[1..5], b"root");
        assert!(data[5..].iter().all(|&b| b == 0));

        let activate = ActivateSession {
            auth_type: AuthType::Md5,
            max_privilege: PrivilegeLevel::Administrator,
            challenge: [0xCC; 16],
            initial_outbound_seq: 0x01020304,
        };
        let data = activate.request_data();
        assert_eq!(data.len(), 22);
        assert_eq!(&data[..2], &[0x02, 0x04]);
        assert_eq!(&data[18..], &[0x04, 0x03, 0x02, 0x01]);

        let suites = GetChannelCipherSuites {
            channel: 0x0E,
            payload_type: 0,
            list_index: 3,
        };
        assert_eq!(suites.request_data(), vec![0x0E, 0x00, 0x83]);

        assert_eq!(
            CloseSession { session_id: 0xAABBCCDD }.request_data(),
            vec![0xDD, 0xCC, 0xBB, 0xAA]
        );
    }

    #[test]
    fn session_responses_decode() {
        let mut data = 0x11223344u32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0x5A; 16]);
        let challenge = SessionChallenge::unpack(&data).expect("challenge");
        assert_eq!(challenge.temporary_session_id, 0x11223344);
        assert_eq!(challenge.challenge, [0x5A; 16]);
        assert!(SessionChallenge::unpack(&data[..19]).is_err());

        let activated =
            ActivatedSession::unpack(&[0x02, 1, 0, 0, 0, 0x10, 0, 0, 0, 0x04]).expect("activate");
        assert_eq!(activated.session_id, 1);
        assert_eq!(activated.initial_inbound_seq, 0x10);
        assert_eq!(activated.max_privilege, 0x04);

        let info = SessionInfo::unpack(&[0x01, 0x04, 0x01]).expect("info");
        assert_eq!(info.active_sessions, 1);
        assert_eq!(info.user_id, None);

        let page = CipherSuitesPage::unpack(&[0x01, 0xC0, 0x03, 0x01, 0x41, 0x81]).expect("page");
        assert_eq!(page.channel_number, 1);
        assert_eq!(page.record_data.len(), 5);
    }
}
