//! Connection logic shared by the blocking and tokio clients.
//!
//! Everything here is free of I/O: the clients own the socket and call in to
//! encode a request, then again to decode what came back.

use crate::auth_code::AuthType;
use crate::cipher_suite::{CipherSuiteRecord, candidate_suites};
use crate::commands::Command;
use crate::error::{Error, Result, SuiteAttemptError};
use crate::message::{IpmiRequest, IpmiResponse};
use crate::session::{Credentials, Session, SessionState, SessionV15};
use crate::types::{ChannelAuthCapabilities, Interface, IpmiVersion, RawResponse};

/// Channel number meaning "the channel this request arrived on".
pub(crate) const CURRENT_CHANNEL: u8 = 0x0E;

/// Connect-time settings taken from the builder.
#[derive(Debug, Clone)]
pub(crate) struct ConnectOptions {
    pub credentials: Credentials,
    pub interface: Interface,
    pub auth_type: Option<AuthType>,
    pub cipher_suite: Option<u8>,
}

/// An encoded request waiting for its response.
#[derive(Debug)]
pub(crate) struct Pending {
    request: IpmiRequest,
    pub packet: Vec<u8>,
}

/// A v1.5 carrier with no session, used for the discovery commands that
/// precede any login.
pub(crate) fn sessionless(credentials: &Credentials) -> Session {
    Session::v15(SessionV15::new(credentials.clone(), AuthType::None))
}

/// Frame an IPMI request on `session`.
pub(crate) fn prepare(session: &mut Session, net_fn: u8, cmd: u8, data: &[u8]) -> Result<Pending> {
    if session.state() == SessionState::Closed {
        return Err(Error::InvalidState("session is closed"));
    }
    let request = session.build_request(net_fn, cmd, data.to_vec());
    let packet = session.encode_message(&request.pack()?)?;
    Ok(Pending { request, packet })
}

/// Unwrap a response packet and match it to `pending`.
///
/// `Ok(None)` means the packet is a well-formed answer to some other request,
/// such as a late reply to an attempt that was already retried.
pub(crate) fn accept(
    session: &mut Session,
    pending: &Pending,
    packet: &[u8],
) -> Result<Option<RawResponse>> {
    let message = session.decode_message(packet)?;
    let response = IpmiResponse::unpack(&message)?;
    if let Err(err) = response.check_answers(&pending.request) {
        tracing::debug!(
            error = %err,
            rq_seq = response.rq_seq,
            expected_rq_seq = pending.request.rq_seq,
            "response does not answer the pending request"
        );
        return Ok(None);
    }
    Ok(Some(RawResponse {
        completion_code: response.completion_code,
        data: response.data,
    }))
}

pub(crate) fn prepare_command<C: Command>(session: &mut Session, command: &C) -> Result<Pending> {
    prepare(session, C::NETFN, C::CMD, &command.request_data())
}

/// Pick the session protocol from the interface setting and what the
/// channel advertises. `Auto` prefers v2.0.
pub(crate) fn choose_version(interface: Interface, caps: &ChannelAuthCapabilities) -> IpmiVersion {
    match interface {
        Interface::Lan => IpmiVersion::V15,
        Interface::Lanplus => IpmiVersion::V20,
        Interface::Auto if caps.v20_data_available && caps.supports_ipmi_v2_0 => IpmiVersion::V20,
        Interface::Auto => IpmiVersion::V15,
    }
}

/// The configured v1.5 auth type, or the strongest one the channel enables.
pub(crate) fn choose_auth_type(
    configured: Option<AuthType>,
    caps: &ChannelAuthCapabilities,
) -> Result<AuthType> {
    match configured {
        Some(AuthType::RmcpPlus) | Some(AuthType::Oem) => {
            Err(Error::Unsupported("auth type not usable for a v1.5 session"))
        }
        Some(auth_type) if caps.enabled_auth_types & auth_type.capability_bit() == 0 => {
            Err(Error::Unsupported("auth type not enabled on this channel"))
        }
        Some(auth_type) => Ok(auth_type),
        None => AuthType::strongest_enabled(caps.enabled_auth_types)
            .ok_or(Error::Unsupported("channel enables no usable v1.5 auth type")),
    }
}

/// Cipher suites to try, in order.
pub(crate) fn candidates(configured: Option<u8>, catalog: Option<&[CipherSuiteRecord]>) -> Vec<u8> {
    match configured {
        Some(id) => vec![id],
        None => candidate_suites(catalog),
    }
}

/// Record a failed suite attempt.
pub(crate) fn suite_failed(failures: &mut Vec<SuiteAttemptError>, cipher_suite_id: u8, error: Error) {
    tracing::info!(cipher_suite_id, error = %error, "cipher suite attempt failed");
    failures.push(SuiteAttemptError {
        cipher_suite_id,
        error: Box::new(error),
    });
}

/// Close Session outcomes that still leave the session closed without error.
pub(crate) fn close_is_clean(result: &Result<RawResponse>) -> bool {
    match result {
        Ok(resp) => {
            resp.completion_code == 0x00
                || resp.completion_code == crate::commands::CC_INVALID_SESSION_ID
        }
        Err(err) => err.is_timeout(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretBytes;
    use crate::types::PrivilegeLevel;

    fn caps(mask: u8, v20: bool) -> ChannelAuthCapabilities {
        ChannelAuthCapabilities {
            channel_number: 1,
            v20_data_available: v20,
            enabled_auth_types: mask,
            per_message_auth_disabled: false,
            user_level_auth_disabled: false,
            non_null_usernames: true,
            null_usernames: false,
            anonymous_login_enabled: false,
            kg_nonzero: false,
            supports_ipmi_v1_5: true,
            supports_ipmi_v2_0: v20,
            oem_id: None,
            oem_aux_data: None,
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            username: b"admin".to_vec(),
            password: SecretBytes::new(b"password".to_vec()),
            bmc_key: None,
            privilege: PrivilegeLevel::Administrator,
            name_only_lookup: true,
        }
    }

    #[test]
    fn auto_prefers_v20_when_advertised() {
        assert_eq!(choose_version(Interface::Auto, &caps(0x15, true)), IpmiVersion::V20);
        assert_eq!(choose_version(Interface::Auto, &caps(0x15, false)), IpmiVersion::V15);
        assert_eq!(choose_version(Interface::Lan, &caps(0x15, true)), IpmiVersion::V15);
        assert_eq!(choose_version(Interface::Lanplus, &caps(0x15, false)), IpmiVersion::V20);
    }

    #[test]
    fn auth_type_follows_capabilities() {
        assert_eq!(choose_auth_type(None, &caps(0x15, false)).expect("md5"), AuthType::Md5);
        assert_eq!(
            choose_auth_type(Some(AuthType::Password), &caps(0x15, false)).expect("password"),
            AuthType::Password
        );
        assert!(matches!(
            choose_auth_type(Some(AuthType::Md2), &caps(0x15, false)),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            choose_auth_type(None, &caps(0x00, false)),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn configured_suite_is_the_only_candidate() {
        assert_eq!(candidates(Some(8), None), vec![8]);
        assert_eq!(candidates(None, None)[0], 17);
    }

    #[test]
    fn responses_are_matched_to_the_pending_request() {
        let mut session = sessionless(&credentials());
        let pending = prepare(&mut session, 0x06, 0x01, &[]).expect("prepare");
        assert_eq!(pending.packet[4], AuthType::None.as_u8());

        let response = IpmiResponse {
            rq_addr: pending.request.rq_addr,
            net_fn: 0x07,
            rq_lun: 0,
            rs_addr: pending.request.rs_addr,
            rq_seq: pending.request.rq_seq,
            rs_lun: 0,
            cmd: 0x01,
            completion_code: 0xC1,
            data: Vec::new(),
        };
        let packet = crate::protocol::encode_v15_packet(&crate::protocol::V15Packet {
            auth_type: AuthType::None,
            session_seq: 0,
            session_id: 0,
            auth_code: None,
            payload: response.pack(),
        })
        .expect("encode");
        let raw = accept(&mut session, &pending, &packet)
            .expect("accept")
            .expect("answers the request");
        assert_eq!(raw.completion_code, 0xC1);

        let mut stale = response.clone();
        stale.rq_seq = pending.request.rq_seq.wrapping_add(1) & 0x3F;
        let packet = crate::protocol::encode_v15_packet(&crate::protocol::V15Packet {
            auth_type: AuthType::None,
            session_seq: 0,
            session_id: 0,
            auth_code: None,
            payload: stale.pack(),
        })
        .expect("encode");
        assert!(accept(&mut session, &pending, &packet).expect("stale").is_none());

        let mut other_command = response.clone();
        other_command.cmd = 0x3D;
        let packet = crate::protocol::encode_v15_packet(&crate::protocol::V15Packet {
            auth_type: AuthType::None,
            session_seq: 0,
            session_id: 0,
            auth_code: None,
            payload: other_command.pack(),
        })
        .expect("encode");
        assert!(accept(&mut session, &pending, &packet).expect("other").is_none());

        assert!(matches!(
            accept(&mut session, &pending, &[0x06, 0x00]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn closed_session_refuses_to_prepare() {
        let mut session = sessionless(&credentials());
        session.mark_closed();
        assert!(matches!(
            prepare(&mut session, 0x06, 0x01, &[]),
            Err(Error::InvalidState("session is closed"))
        ));
    }

    #[test]
    fn close_outcomes() {
        let ok = |cc| -> Result<RawResponse> {
            Ok(RawResponse {
                completion_code: cc,
                data: Vec::new(),
            })
        };
        assert!(close_is_clean(&ok(0x00)));
        assert!(close_is_clean(&ok(0x87)));
        assert!(!close_is_clean(&ok(0xD4)));
        assert!(close_is_clean(&Err(Error::Timeout { attempts: 3 })));
        assert!(!close_is_clean(&Err(Error::Protocol("x"))));
    }
}
