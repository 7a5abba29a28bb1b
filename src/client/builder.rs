use std::net::SocketAddr;
use std::time::Duration;

use crate::auth_code::AuthType;
use crate::cipher_suite::cipher_suite_algorithms;
use crate::client::core::ConnectOptions;
use crate::crypto::SecretBytes;
use crate::error::{Error, Result};
use crate::rakp::MAX_USERNAME_LEN;
use crate::session::Credentials;
use crate::transport::RetryPolicy;
use crate::types::{Interface, PrivilegeLevel};

/// Longest Kg accepted; RAKP keys are 20 bytes.
const MAX_BMC_KEY_LEN: usize = 20;

/// Builder for [`Client`](crate::Client) and, with the `async` feature,
/// [`AsyncClient`](crate::AsyncClient).
///
/// Only the username and password are required. Everything else has a
/// default that works against most BMCs:
///
/// | option | default |
/// |---|---|
/// | interface | [`Interface::Auto`] |
/// | privilege level | Administrator |
/// | timeout | 20 s per attempt |
/// | retries | 2 (3 attempts) |
/// | retry interval | 100 ms |
/// | keep-alive | every 30 s |
#[derive(Debug)]
pub struct ClientBuilder {
    pub(crate) target: SocketAddr,
    username: Option<Vec<u8>>,
    password: Option<SecretBytes>,
    bmc_key: Option<SecretBytes>,
    privilege_level: PrivilegeLevel,
    interface: Interface,
    auth_type: Option<AuthType>,
    cipher_suite: Option<u8>,
    name_only_lookup: bool,
    pub(crate) timeout: Duration,
    pub(crate) buffer_size: usize,
    retries: u32,
    retry_interval: Duration,
    pub(crate) keep_alive: Option<Duration>,
    #[cfg(feature = "async")]
    pub(crate) cancellation: Option<tokio_util::sync::CancellationToken>,
}

/// Everything a client needs once the builder has been validated.
#[derive(Debug)]
pub(crate) struct Validated {
    pub options: ConnectOptions,
    pub policy: RetryPolicy,
    pub keep_alive: Option<Duration>,
}

impl ClientBuilder {
    /// Create a new builder for the BMC at `target` (usually port 623).
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            username: None,
            password: None,
            bmc_key: None,
            privilege_level: PrivilegeLevel::Administrator,
            interface: Interface::Auto,
            auth_type: None,
            cipher_suite: None,
            name_only_lookup: true,
            timeout: Duration::from_secs(20),
            buffer_size: 1024,
            retries: 2,
            retry_interval: Duration::from_millis(100),
            keep_alive: Some(Duration::from_secs(30)),
            #[cfg(feature = "async")]
            cancellation: None,
        }
    }

    /// Set the username (bytes).
    ///
    /// IPMI usernames are ASCII in most deployments, but the protocol treats them as raw bytes.
    pub fn username_bytes(mut self, username: impl Into<Vec<u8>>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the username (UTF-8 string). This is a convenience wrapper around [`Self::username_bytes`].
    pub fn username(mut self, username: impl AsRef<str>) -> Self {
        self.username = Some(username.as_ref().as_bytes().to_vec());
        self
    }

    /// Set the password (bytes).
    pub fn password_bytes(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password = Some(SecretBytes::new(password.into()));
        self
    }

    /// Set the password (UTF-8 string). This is a convenience wrapper around [`Self::password_bytes`].
    pub fn password(mut self, password: impl AsRef<str>) -> Self {
        self.password = Some(SecretBytes::new(password.as_ref().as_bytes().to_vec()));
        self
    }

    /// Set the optional BMC key (`Kg`) for "two-key" logins.
    ///
    /// If not set, the password key is used ("one-key" login), which is common in many BMC default configs.
    pub fn bmc_key_bytes(mut self, kg: impl Into<Vec<u8>>) -> Self {
        self.bmc_key = Some(SecretBytes::new(kg.into()));
        self
    }

    /// Set the optional BMC key (`Kg`) for "two-key" logins (UTF-8 string).
    pub fn bmc_key(mut self, kg: impl AsRef<str>) -> Self {
        self.bmc_key = Some(SecretBytes::new(kg.as_ref().as_bytes().to_vec()));
        self
    }

    /// Set requested session privilege level.
    pub fn privilege_level(mut self, level: PrivilegeLevel) -> Self {
        self.privilege_level = level;
        self
    }

    /// Choose the session protocol; [`Interface::Auto`] asks the BMC first.
    pub fn interface(mut self, interface: Interface) -> Self {
        self.interface = interface;
        self
    }

    /// Force the IPMI v1.5 authentication type instead of picking the
    /// strongest one the channel enables.
    pub fn auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = Some(auth_type);
        self
    }

    /// Use exactly this RMCP+ cipher suite instead of negotiating one.
    pub fn cipher_suite(mut self, id: u8) -> Self {
        self.cipher_suite = Some(id);
        self
    }

    /// Look the user up by name only (default) or by name and privilege.
    pub fn name_only_lookup(mut self, enabled: bool) -> Self {
        self.name_only_lookup = enabled;
        self
    }

    /// Set the per-attempt response timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the receive buffer size in bytes.
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Set how many times a request is re-sent after a timeout.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the pause between attempts.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Send Get Session Info at this interval while the session is open;
    /// `None` disables the keep-alive.
    pub fn keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Abort in-flight and future exchanges of the async client when this
    /// token is cancelled.
    #[cfg(feature = "async")]
    pub fn cancellation_token(mut self, token: tokio_util::sync::CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub(crate) fn validate(&self) -> Result<Validated> {
        let username = self
            .username
            .clone()
            .ok_or(Error::InvalidArgument("username is required"))?;
        let password = self
            .password
            .clone()
            .ok_or(Error::InvalidArgument("password is required"))?;

        if username.len() > MAX_USERNAME_LEN {
            return Err(Error::InvalidArgument("username longer than 16 bytes"));
        }
        if password.expose().len() > MAX_BMC_KEY_LEN {
            return Err(Error::InvalidArgument("password longer than 20 bytes"));
        }
        if self
            .bmc_key
            .as_ref()
            .is_some_and(|kg| kg.expose().len() > MAX_BMC_KEY_LEN)
        {
            return Err(Error::InvalidArgument("BMC key longer than 20 bytes"));
        }
        if let Some(id) = self.cipher_suite {
            cipher_suite_algorithms(id)?;
        }
        if self.buffer_size == 0 {
            return Err(Error::InvalidArgument("buffer size must be non-zero"));
        }
        if self.keep_alive.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidArgument("keep-alive interval must be non-zero"));
        }

        Ok(Validated {
            options: ConnectOptions {
                credentials: Credentials {
                    username,
                    password,
                    bmc_key: self.bmc_key.clone(),
                    privilege: self.privilege_level,
                    name_only_lookup: self.name_only_lookup,
                },
                interface: self.interface,
                auth_type: self.auth_type,
                cipher_suite: self.cipher_suite,
            },
            policy: RetryPolicy {
                retries: self.retries,
                interval: self.retry_interval,
            },
            keep_alive: self.keep_alive,
        })
    }
}
