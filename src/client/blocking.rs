use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cipher_suite::{CipherSuiteCatalog, CipherSuiteRecord, cipher_suite_algorithms};
use crate::client::builder::ClientBuilder;
use crate::client::core::{self, CURRENT_CHANNEL, ConnectOptions};
use crate::commands::{
    CloseSession, Command, GetChannelAuthCapabilities, GetChannelCipherSuites, GetDeviceId,
    GetSessionChallenge, GetSessionInfo, SetSessionPrivilegeLevel, decode_response,
};
use crate::error::{Error, Result};
use crate::protocol::payload_type;
use crate::session::{Session, SessionState, SessionV15, SessionV20};
use crate::transport::blocking::UdpTransport;
use crate::transport::{RetryPolicy, Transport, exchange};
use crate::types::{
    ChannelAuthCapabilities, DeviceId, IpmiVersion, PrivilegeLevel, RawResponse, SessionInfo,
};

/// A blocking IPMI LAN client (v1.5 or v2.0 RMCP+).
///
/// `Client` owns one session and can issue IPMI commands over UDP port 623.
/// Clones share the session; requests are serialized.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Mutex<Inner>>,
    keep_alive: Arc<Mutex<Option<KeepAlive>>>,
}

struct Link {
    transport: Box<dyn Transport + Send>,
    policy: RetryPolicy,
}

struct Inner {
    link: Link,
    session: Session,
}

struct KeepAlive {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl ClientBuilder {
    /// Open a UDP socket, establish the session and build the [`Client`].
    pub fn build(self) -> Result<Client> {
        let transport = UdpTransport::connect(self.target, self.timeout, self.buffer_size)?;
        self.build_with_transport(transport)
    }

    /// Establish the session over a caller-supplied transport.
    pub fn build_with_transport<T>(self, transport: T) -> Result<Client>
    where
        T: Transport + Send + 'static,
    {
        let validated = self.validate()?;
        let link = Link {
            transport: Box::new(transport),
            policy: validated.policy,
        };
        let session = connect(&link, &validated.options)?;
        tracing::debug!(
            version = %session.version(),
            auth_type = ?session.auth_type(),
            cipher_suite = ?session.cipher_suite_id(),
            "session established"
        );

        let inner = Arc::new(Mutex::new(Inner { link, session }));
        let keep_alive = validated
            .keep_alive
            .map(|interval| spawn_keep_alive(Arc::downgrade(&inner), interval))
            .transpose()?;

        Ok(Client {
            inner,
            keep_alive: Arc::new(Mutex::new(keep_alive)),
        })
    }
}

impl Client {
    /// Create a [`ClientBuilder`].
    pub fn builder(target: std::net::SocketAddr) -> ClientBuilder {
        ClientBuilder::new(target)
    }

    /// Execute a typed command (single request/response).
    pub fn execute<C: Command>(&self, command: C) -> Result<C::Output> {
        let response = self.send_raw(C::NETFN, C::CMD, &command.request_data())?;
        command.parse_response(&response)
    }

    /// Send a raw IPMI request and return the raw response.
    ///
    /// The request is addressed to the BMC (`rsAddr=0x20`) from the remote
    /// console (`rqAddr=0x81`), LUN 0.
    pub fn send_raw(&self, netfn: u8, cmd: u8, data: &[u8]) -> Result<RawResponse> {
        let start = Instant::now();
        let result = {
            let mut inner = lock(&self.inner)?;
            inner.roundtrip(netfn, cmd, data)
        };
        let elapsed = start.elapsed();
        match &result {
            Ok(resp) => {
                crate::observe::record_ok("blocking", netfn, cmd, elapsed, resp.completion_code)
            }
            Err(err) => crate::observe::record_err("blocking", netfn, cmd, elapsed, err),
        }
        result
    }

    /// Convenience wrapper for `Get Device ID` (App NetFn, cmd 0x01).
    pub fn get_device_id(&self) -> Result<DeviceId> {
        self.execute(GetDeviceId)
    }

    /// Convenience wrapper for `Get Session Info` on the current session.
    pub fn get_session_info(&self) -> Result<SessionInfo> {
        self.execute(GetSessionInfo { session_index: 0 })
    }

    /// Convenience wrapper for `Get Channel Authentication Capabilities`
    /// (App NetFn, cmd 0x38).
    pub fn get_channel_auth_capabilities(
        &self,
        channel: u8,
        privilege: PrivilegeLevel,
    ) -> Result<ChannelAuthCapabilities> {
        let cmd = GetChannelAuthCapabilities::new(channel, privilege);
        match self.execute(cmd) {
            Ok(caps) => Ok(caps),
            Err(Error::CompletionCode { .. }) => self.execute(cmd.without_v2_data()),
            Err(e) => Err(e),
        }
    }

    /// Current session state.
    pub fn session_state(&self) -> Result<SessionState> {
        Ok(lock(&self.inner)?.session.state())
    }

    /// Session protocol in use.
    pub fn ipmi_version(&self) -> Result<IpmiVersion> {
        Ok(lock(&self.inner)?.session.version())
    }

    /// Cipher suite of an RMCP+ session; `None` for v1.5.
    pub fn cipher_suite_id(&self) -> Result<Option<u8>> {
        Ok(lock(&self.inner)?.session.cipher_suite_id())
    }

    /// Close the session (App NetFn, cmd 0x3C).
    ///
    /// The keep-alive is stopped first. This is best effort: if the BMC does
    /// not respond, or no longer knows the session, the client still ends up
    /// closed and rejects further requests.
    pub fn close(&self) -> Result<()> {
        if let Some(keep_alive) = lock(&self.keep_alive)?.take() {
            let _ = keep_alive.stop.send(());
            if keep_alive.handle.join().is_err() {
                tracing::warn!("keep-alive thread panicked");
            }
        }

        let mut inner = lock(&self.inner)?;
        if inner.session.state() == SessionState::Closed {
            return Ok(());
        }
        let Inner { link, session } = &mut *inner;
        close_session(link, session)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::InvalidState("client lock poisoned"))
}

impl Inner {
    fn roundtrip(&mut self, netfn: u8, cmd: u8, data: &[u8]) -> Result<RawResponse> {
        roundtrip(&self.link, &mut self.session, netfn, cmd, data)
    }
}

fn roundtrip(
    link: &Link,
    session: &mut Session,
    netfn: u8,
    cmd: u8,
    data: &[u8],
) -> Result<RawResponse> {
    let pending = core::prepare(session, netfn, cmd, data)?;
    exchange(&*link.transport, &pending.packet, link.policy, |packet| {
        core::accept(session, &pending, packet)
    })
}

fn call<C: Command>(link: &Link, session: &mut Session, command: &C) -> Result<C::Output> {
    let pending = core::prepare_command(session, command)?;
    let response = exchange(&*link.transport, &pending.packet, link.policy, |packet| {
        core::accept(session, &pending, packet)
    })?;
    decode_response(&response)
}

fn handshake(link: &Link, kind: u8, payload: &[u8], expected: u8) -> Result<Vec<u8>> {
    let packet = SessionV20::encode_handshake(kind, payload)?;
    exchange(&*link.transport, &packet, link.policy, |response| {
        SessionV20::decode_handshake(response, expected).map(Some)
    })
}

fn close_session(link: &Link, session: &mut Session) -> Result<()> {
    let command = CloseSession {
        session_id: session.bmc_session_id(),
    };
    let start = Instant::now();
    let result = roundtrip(
        link,
        session,
        CloseSession::NETFN,
        CloseSession::CMD,
        &command.request_data(),
    );
    let elapsed = start.elapsed();
    match &result {
        Ok(resp) => crate::observe::record_ok(
            "blocking",
            CloseSession::NETFN,
            CloseSession::CMD,
            elapsed,
            resp.completion_code,
        ),
        Err(err) => crate::observe::record_err(
            "blocking",
            CloseSession::NETFN,
            CloseSession::CMD,
            elapsed,
            err,
        ),
    }

    session.mark_closed();
    if core::close_is_clean(&result) {
        return Ok(());
    }
    command.parse_response(&result?).map(|_| ())
}

fn connect(link: &Link, options: &ConnectOptions) -> Result<Session> {
    let mut bootstrap = core::sessionless(&options.credentials);
    let caps = channel_auth_capabilities(link, &mut bootstrap, options.credentials.privilege)?;
    match core::choose_version(options.interface, &caps) {
        IpmiVersion::V15 => connect_v15(link, options, &caps),
        IpmiVersion::V20 => connect_v20(link, options, &mut bootstrap),
    }
}

fn channel_auth_capabilities(
    link: &Link,
    session: &mut Session,
    privilege: PrivilegeLevel,
) -> Result<ChannelAuthCapabilities> {
    let cmd = GetChannelAuthCapabilities::new(CURRENT_CHANNEL, privilege);
    match call(link, session, &cmd) {
        Err(Error::CompletionCode { .. }) => call(link, session, &cmd.without_v2_data()),
        other => other,
    }
}

fn connect_v15(
    link: &Link,
    options: &ConnectOptions,
    caps: &ChannelAuthCapabilities,
) -> Result<Session> {
    let auth_type = core::choose_auth_type(options.auth_type, caps)?;
    tracing::debug!(auth_type = ?auth_type, "starting v1.5 session");
    let mut session = Session::v15(SessionV15::new(options.credentials.clone(), auth_type));

    let challenge = call(
        link,
        &mut session,
        &GetSessionChallenge {
            auth_type,
            username: options.credentials.username.clone(),
        },
    )?;
    let activate = session.on_challenge(challenge)?;
    let activated = call(link, &mut session, &activate);
    session.on_activate(activated)?;

    finish_login(link, &mut session, options.credentials.privilege)?;
    Ok(session)
}

fn connect_v20(link: &Link, options: &ConnectOptions, bootstrap: &mut Session) -> Result<Session> {
    if let Some(id) = options.cipher_suite {
        return open_v20(link, options, id);
    }

    let catalog = match fetch_catalog(link, bootstrap) {
        Ok(records) => Some(records),
        Err(err) => {
            tracing::info!(error = %err, "cipher suite catalog unavailable; trying preferred suites");
            None
        }
    };

    let mut failures = Vec::new();
    for id in core::candidates(None, catalog.as_deref()) {
        match open_v20(link, options, id) {
            Ok(session) => return Ok(session),
            Err(err) => core::suite_failed(&mut failures, id, err),
        }
    }
    Err(Error::CipherSuitesExhausted(failures))
}

fn fetch_catalog(link: &Link, session: &mut Session) -> Result<Vec<CipherSuiteRecord>> {
    let mut catalog = CipherSuiteCatalog::new();
    while let Some(list_index) = catalog.next_list_index() {
        let page = call(
            link,
            session,
            &GetChannelCipherSuites {
                channel: CURRENT_CHANNEL,
                payload_type: payload_type::IPMI,
                list_index,
            },
        )?;
        catalog.push_page(&page.record_data);
    }
    catalog.finish()
}

fn open_v20(link: &Link, options: &ConnectOptions, id: u8) -> Result<Session> {
    let suite = cipher_suite_algorithms(id)?;
    tracing::debug!(cipher_suite = id, "opening RMCP+ session");
    let mut v20 = SessionV20::new(options.credentials.clone(), suite);

    let request = v20.open_session_request()?;
    v20.on_open_session_response(&handshake(
        link,
        payload_type::OPEN_SESSION_REQUEST,
        &request,
        payload_type::OPEN_SESSION_RESPONSE,
    )?)?;

    let rakp1 = v20.rakp1()?;
    v20.on_rakp2(&handshake(
        link,
        payload_type::RAKP_1,
        &rakp1,
        payload_type::RAKP_2,
    )?)?;

    let rakp3 = v20.rakp3()?;
    v20.on_rakp4(&handshake(
        link,
        payload_type::RAKP_3,
        &rakp3,
        payload_type::RAKP_4,
    )?)?;

    let mut session = Session::v20(v20);
    finish_login(link, &mut session, options.credentials.privilege)?;
    Ok(session)
}

/// Raise the session to the requested privilege; a refusal closes it again.
fn finish_login(link: &Link, session: &mut Session, privilege: PrivilegeLevel) -> Result<()> {
    if let Err(err) = call(link, session, &SetSessionPrivilegeLevel { privilege }) {
        if let Err(close_err) = close_session(link, session) {
            tracing::debug!(error = %close_err, "close after failed login");
        }
        return Err(err);
    }
    Ok(())
}

fn spawn_keep_alive(inner: Weak<Mutex<Inner>>, interval: Duration) -> Result<KeepAlive> {
    let (stop, stopped) = mpsc::channel::<()>();
    let handle = std::thread::Builder::new()
        .name("ipmi-keep-alive".into())
        .spawn(move || {
            loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let Some(inner) = inner.upgrade() else { break };
                let result = lock(&inner).and_then(|mut inner| {
                    let Inner { link, session } = &mut *inner;
                    call(link, session, &GetSessionInfo { session_index: 0 })
                });
                if let Err(err) = result {
                    tracing::warn!(error = %err, "keep-alive failed");
                }
            }
        })?;
    Ok(KeepAlive { stop, handle })
}
