use core::fmt;

/// The privilege level requested for the IPMI session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PrivilegeLevel {
    /// Callback privilege.
    Callback = 0x01,
    /// User privilege.
    User = 0x02,
    /// Operator privilege.
    Operator = 0x03,
    /// Administrator privilege.
    Administrator = 0x04,
    /// OEM-defined privilege.
    Oem = 0x05,
}

impl PrivilegeLevel {
    /// Wire value (low nibble).
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Which LAN session protocol the client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interface {
    /// Probe the BMC and prefer IPMI v2.0 when advertised.
    #[default]
    Auto,
    /// IPMI v1.5 LAN sessions.
    Lan,
    /// IPMI v2.0 RMCP+ sessions.
    Lanplus,
}

/// Session protocol version of an established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpmiVersion {
    /// IPMI v1.5 session.
    V15,
    /// IPMI v2.0 / RMCP+ session.
    V20,
}

impl fmt::Display for IpmiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V15 => f.write_str("1.5"),
            Self::V20 => f.write_str("2.0"),
        }
    }
}

/// A raw IPMI response.
#[derive(Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// IPMI completion code.
    pub completion_code: u8,
    /// Payload bytes after the completion code.
    pub data: Vec<u8>,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field(
                "completion_code",
                &format_args!("{:#04x}", self.completion_code),
            )
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Parsed response for the `Get Device ID` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    /// Device ID (BMC-defined).
    pub device_id: u8,
    /// Device revision (lower 4 bits are the revision).
    pub device_revision: u8,
    /// Firmware major revision.
    pub firmware_major: u8,
    /// Firmware minor revision.
    pub firmware_minor: u8,
    /// IPMI version as BCD (e.g. 0x02 for 2.0).
    pub ipmi_version: u8,
    /// Manufacturer ID (24-bit, least-significant byte first).
    pub manufacturer_id: u32,
    /// Product ID.
    pub product_id: u16,
    /// Auxiliary firmware revision (4 bytes).
    pub aux_firmware_revision: [u8; 4],
}

/// Parsed response for `Get Channel Authentication Capabilities`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAuthCapabilities {
    /// Channel number.
    pub channel_number: u8,
    /// Indicates IPMI v2.0 data is available in the response.
    pub v20_data_available: bool,
    /// IPMI v1.5 enabled authentication types (bitmask).
    pub enabled_auth_types: u8,
    /// Per-message authentication is disabled when true.
    pub per_message_auth_disabled: bool,
    /// User-level authentication is disabled when true.
    pub user_level_auth_disabled: bool,
    /// One or more non-null user names exist.
    pub non_null_usernames: bool,
    /// One or more null user names with non-null passwords exist.
    pub null_usernames: bool,
    /// Anonymous login (null user/null password) is enabled.
    pub anonymous_login_enabled: bool,
    /// Non-zero Kg key is configured (two-key login).
    pub kg_nonzero: bool,
    /// Channel supports IPMI v1.5.
    pub supports_ipmi_v1_5: bool,
    /// Channel supports IPMI v2.0.
    pub supports_ipmi_v2_0: bool,
    /// OEM IANA enterprise number for OEM auth types, if present.
    pub oem_id: Option<u32>,
    /// OEM auxiliary data for OEM auth types, if present.
    pub oem_aux_data: Option<u8>,
}

/// Parsed response for `Get Session Challenge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChallenge {
    /// Temporary session ID to use for Activate Session.
    pub temporary_session_id: u32,
    /// Challenge string.
    pub challenge: [u8; 16],
}

/// Parsed response for `Activate Session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivatedSession {
    /// Authentication type for the rest of the session.
    pub auth_type: u8,
    /// Session ID assigned by the BMC.
    pub session_id: u32,
    /// First sequence number the BMC expects from the console.
    pub initial_inbound_seq: u32,
    /// Maximum privilege level allowed for the session.
    pub max_privilege: u8,
}

/// Parsed response for `Get Session Info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Handle of the session the info refers to.
    pub session_handle: u8,
    /// Number of possible active sessions.
    pub possible_sessions: u8,
    /// Number of currently active sessions.
    pub active_sessions: u8,
    /// User ID of the session, when the session is active.
    pub user_id: Option<u8>,
    /// Operating privilege level of the session, when the session is active.
    pub privilege: Option<u8>,
    /// Channel the session was activated on, when the session is active.
    pub channel: Option<u8>,
}

/// Parsed response for `Get Channel Cipher Suites`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSuitesPage {
    /// Channel the records belong to.
    pub channel_number: u8,
    /// Up to 16 bytes of concatenated cipher suite record data.
    pub record_data: Vec<u8>,
}
