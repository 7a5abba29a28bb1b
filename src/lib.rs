#![deny(unsafe_code)]
#![warn(missing_docs)]

//! An IPMI v1.5 / v2.0 (RMCP+) LAN client library.
//!
//! The crate implements:
//! - Sessionless discovery (Get Channel Authentication Capabilities, Get
//!   Channel Cipher Suites)
//! - IPMI v1.5 sessions (challenge / activate, None, MD2, MD5 and
//!   straight-password AuthCodes)
//! - RMCP+ Open Session and RAKP 1-4 key exchange (HMAC-SHA1, HMAC-MD5,
//!   HMAC-SHA256)
//! - Integrity (HMAC-SHA1-96, HMAC-MD5-128, MD5-128, HMAC-SHA256-128)
//! - Confidentiality (AES-CBC-128, xRC4-128, xRC4-40)
//! - Retry on timeout, a session keep-alive and best-effort close
//!
//! [`Client`] is the blocking entry point; with the `async` feature,
//! [`AsyncClient`] offers the same operations on tokio. Both are built from a
//! [`ClientBuilder`].
//!
//! ```no_run
//! # fn main() -> ipmi_rmcp::Result<()> {
//! let client = ipmi_rmcp::Client::builder("192.0.2.10:623".parse().expect("addr"))
//!     .username("admin")
//!     .password("password")
//!     .build()?;
//! let device = client.get_device_id()?;
//! println!("{device:?}");
//! client.close()?;
//! # Ok(())
//! # }
//! ```

mod auth_code;
mod cipher_suite;
mod client;
mod codec;
mod commands;
mod crypto;
mod debug;
mod error;
mod message;
mod observe;
mod protocol;
mod rakp;
mod session;
mod transport;
mod types;

#[cfg(test)]
mod mock;

#[cfg(feature = "async")]
pub use crate::client::AsyncClient;
#[cfg(feature = "blocking")]
pub use crate::client::Client;
pub use crate::client::ClientBuilder;

pub use crate::auth_code::{AuthCodeMultiSessionInput, AuthCodeSingleSessionInput, AuthType};
pub use crate::codec::{
    Endian, from_ones_complement, from_twos_complement, is_bit_set, pack_uint,
    to_twos_complement, unpack_uint, with_bit,
};
pub use crate::cipher_suite::{
    AuthAlgorithm, CipherSuite, CipherSuiteRecord, CipherSuiteRecordKind,
    ConfidentialityAlgorithm, IntegrityAlgorithm, cipher_suite_algorithms,
    parse_cipher_suites_data,
};
pub use crate::commands::{
    ActivateSession, CloseSession, Command, GetChannelAuthCapabilities, GetChannelCipherSuites,
    GetDeviceId, GetSessionChallenge, GetSessionInfo, NETFN_APP, Response, SessionClosed,
    SessionPrivilege, SetSessionPrivilegeLevel, describe_completion_code,
};
pub use crate::error::{Error, Result, SuiteAttemptError};
pub use crate::message::{BMC_SLAVE_ADDR, IpmiRequest, IpmiResponse, REMOTE_SWID, checksum};
pub use crate::rakp::rmcpplus_status_description;
pub use crate::session::SessionState;
#[cfg(feature = "async")]
pub use crate::transport::AsyncTransport;
pub use crate::transport::RetryPolicy;
#[cfg(feature = "blocking")]
pub use crate::transport::Transport;
pub use crate::types::{
    ActivatedSession, ChannelAuthCapabilities, CipherSuitesPage, DeviceId, Interface,
    IpmiVersion, PrivilegeLevel, RawResponse, SessionChallenge, SessionInfo,
};
