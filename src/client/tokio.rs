use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

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
use crate::transport::tokio::UdpTransport;
use crate::transport::{AsyncTransport, RetryPolicy, exchange_async};
use crate::types::{
    ChannelAuthCapabilities, DeviceId, IpmiVersion, PrivilegeLevel, RawResponse, SessionInfo,
};

/// An async IPMI LAN client (v1.5 or v2.0 RMCP+) built on tokio.
///
/// Built with [`ClientBuilder::build_async`]. Clones share the session and
/// requests are serialized. A [`CancellationToken`] given to the builder
/// aborts in-flight waits with [`Error::Cancelled`].
#[derive(Clone)]
pub struct AsyncClient {
    inner: Arc<Mutex<Inner>>,
    keep_alive: Arc<Mutex<Option<KeepAlive>>>,
}

struct Link {
    transport: Box<dyn AsyncTransport + Send + Sync>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

struct Inner {
    link: Link,
    session: Session,
}

struct KeepAlive {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop.cancel();
        self.handle.abort();
    }
}

impl ClientBuilder {
    /// Open a tokio UDP socket, establish the session and build the
    /// [`AsyncClient`].
    pub async fn build_async(self) -> Result<AsyncClient> {
        let transport = UdpTransport::connect(self.target, self.timeout, self.buffer_size).await?;
        self.build_async_with_transport(transport).await
    }

    /// Establish the session over a caller-supplied async transport.
    pub async fn build_async_with_transport<T>(self, transport: T) -> Result<AsyncClient>
    where
        T: AsyncTransport + Send + Sync + 'static,
    {
        let validated = self.validate()?;
        let link = Link {
            transport: Box::new(transport),
            policy: validated.policy,
            cancel: self.cancellation.clone().unwrap_or_default(),
        };
        let session = connect(&link, &validated.options).await?;
        tracing::debug!(
            version = %session.version(),
            auth_type = ?session.auth_type(),
            cipher_suite = ?session.cipher_suite_id(),
            "session established"
        );

        let stop = link.cancel.child_token();
        let inner = Arc::new(Mutex::new(Inner { link, session }));
        let keep_alive = validated.keep_alive.map(|interval| KeepAlive {
            handle: tokio::spawn(run_keep_alive(Arc::downgrade(&inner), interval, stop.clone())),
            stop,
        });

        Ok(AsyncClient {
            inner,
            keep_alive: Arc::new(Mutex::new(keep_alive)),
        })
    }
}

impl AsyncClient {
    /// Create a [`ClientBuilder`]; finish it with [`ClientBuilder::build_async`].
    pub fn builder(target: std::net::SocketAddr) -> ClientBuilder {
        ClientBuilder::new(target)
    }

    /// Execute a typed command (single request/response).
    pub async fn execute<C: Command>(&self, command: C) -> Result<C::Output> {
        let response = self
            .send_raw(C::NETFN, C::CMD, &command.request_data())
            .await?;
        command.parse_response(&response)
    }

    /// Send a raw IPMI request and return the raw response.
    pub async fn send_raw(&self, netfn: u8, cmd: u8, data: &[u8]) -> Result<RawResponse> {
        let start = Instant::now();
        let result = {
            let mut inner = self.inner.lock().await;
            let Inner { link, session } = &mut *inner;
            roundtrip(link, session, netfn, cmd, data).await
        };
        let elapsed = start.elapsed();
        match &result {
            Ok(resp) => crate::observe::record_ok("async", netfn, cmd, elapsed, resp.completion_code),
            Err(err) => crate::observe::record_err("async", netfn, cmd, elapsed, err),
        }
        result
    }

    /// Convenience wrapper for `Get Device ID`.
    pub async fn get_device_id(&self) -> Result<DeviceId> {
        self.execute(GetDeviceId).await
    }

    /// Convenience wrapper for `Get Session Info` on the current session.
    pub async fn get_session_info(&self) -> Result<SessionInfo> {
        self.execute(GetSessionInfo { session_index: 0 }).await
    }

    /// Convenience wrapper for `Get Channel Authentication Capabilities`.
    pub async fn get_channel_auth_capabilities(
        &self,
        channel: u8,
        privilege: PrivilegeLevel,
    ) -> Result<ChannelAuthCapabilities> {
        let cmd = GetChannelAuthCapabilities::new(channel, privilege);
        match self.execute(cmd).await {
            Err(Error::CompletionCode { .. }) => self.execute(cmd.without_v2_data()).await,
            other => other,
        }
    }

    /// Current session state.
    pub async fn session_state(&self) -> SessionState {
        self.inner.lock().await.session.state()
    }

    /// Session protocol in use.
    pub async fn ipmi_version(&self) -> IpmiVersion {
        self.inner.lock().await.session.version()
    }

    /// Cipher suite of an RMCP+ session; `None` for v1.5.
    pub async fn cipher_suite_id(&self) -> Option<u8> {
        self.inner.lock().await.session.cipher_suite_id()
    }

    /// Close the session (App NetFn, cmd 0x3C).
    ///
    /// The keep-alive task is stopped and awaited first; dropping the last
    /// clone without closing only stops it. Close Session is sent
    /// even if the cancellation token has fired; a silent BMC or one that no
    /// longer knows the session still leaves the client closed.
    pub async fn close(&self) -> Result<()> {
        if let Some(mut keep_alive) = self.keep_alive.lock().await.take() {
            keep_alive.stop.cancel();
            if let Err(err) = (&mut keep_alive.handle).await {
                tracing::warn!(error = %err, "keep-alive task failed");
            }
        }

        let mut inner = self.inner.lock().await;
        if inner.session.state() == SessionState::Closed {
            return Ok(());
        }
        let Inner { link, session } = &mut *inner;
        close_session(link, session).await
    }
}

/// One exchange, aborted when the link's token is cancelled.
async fn exchange<R>(
    link: &Link,
    packet: &[u8],
    accept: impl FnMut(&[u8]) -> Result<Option<R>>,
) -> Result<R> {
    tokio::select! {
        biased;
        _ = link.cancel.cancelled() => Err(Error::Cancelled),
        response = exchange_async(&*link.transport, packet, link.policy, accept) => response,
    }
}

async fn roundtrip(
    link: &Link,
    session: &mut Session,
    netfn: u8,
    cmd: u8,
    data: &[u8],
) -> Result<RawResponse> {
    let pending = core::prepare(session, netfn, cmd, data)?;
    exchange(link, &pending.packet, |packet| core::accept(session, &pending, packet)).await
}

async fn call<C: Command>(link: &Link, session: &mut Session, command: &C) -> Result<C::Output> {
    let pending = core::prepare_command(session, command)?;
    let response =
        exchange(link, &pending.packet, |packet| core::accept(session, &pending, packet)).await?;
    decode_response(&response)
}

async fn handshake(link: &Link, kind: u8, payload: &[u8], expected: u8) -> Result<Vec<u8>> {
    let packet = SessionV20::encode_handshake(kind, payload)?;
    exchange(link, &packet, |response| {
        SessionV20::decode_handshake(response, expected).map(Some)
    })
    .await
}

async fn close_session(link: &Link, session: &mut Session) -> Result<()> {
    let command = CloseSession {
        session_id: session.bmc_session_id(),
    };
    let start = Instant::now();
    let result = async {
        let pending = core::prepare_command(session, &command)?;
        exchange_async(&*link.transport, &pending.packet, link.policy, |packet| {
            core::accept(session, &pending, packet)
        })
        .await
    }
    .await;
    let elapsed = start.elapsed();
    match &result {
        Ok(resp) => crate::observe::record_ok(
            "async",
            CloseSession::NETFN,
            CloseSession::CMD,
            elapsed,
            resp.completion_code,
        ),
        Err(err) => crate::observe::record_err(
            "async",
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

async fn connect(link: &Link, options: &ConnectOptions) -> Result<Session> {
    let mut bootstrap = core::sessionless(&options.credentials);
    let caps =
        channel_auth_capabilities(link, &mut bootstrap, options.credentials.privilege).await?;
    match core::choose_version(options.interface, &caps) {
        IpmiVersion::V15 => connect_v15(link, options, &caps).await,
        IpmiVersion::V20 => connect_v20(link, options, &mut bootstrap).await,
    }
}

async fn channel_auth_capabilities(
    link: &Link,
    session: &mut Session,
    privilege: PrivilegeLevel,
) -> Result<ChannelAuthCapabilities> {
    let cmd = GetChannelAuthCapabilities::new(CURRENT_CHANNEL, privilege);
    match call(link, session, &cmd).await {
        Err(Error::CompletionCode { .. }) => call(link, session, &cmd.without_v2_data()).await,
        other => other,
    }
}

async fn connect_v15(
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
    )
    .await?;
    let activate = session.on_challenge(challenge)?;
    let activated = call(link, &mut session, &activate).await;
    session.on_activate(activated)?;

    finish_login(link, &mut session, options.credentials.privilege).await?;
    Ok(session)
}

async fn connect_v20(
    link: &Link,
    options: &ConnectOptions,
    bootstrap: &mut Session,
) -> Result<Session> {
    if let Some(id) = options.cipher_suite {
        return open_v20(link, options, id).await;
    }

    let catalog = match fetch_catalog(link, bootstrap).await {
        Ok(records) => Some(records),
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(err) => {
            tracing::info!(error = %err, "cipher suite catalog unavailable; trying preferred suites");
            None
        }
    };

    let mut failures = Vec::new();
    for id in core::candidates(None, catalog.as_deref()) {
        match open_v20(link, options, id).await {
            Ok(session) => return Ok(session),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => core::suite_failed(&mut failures, id, err),
        }
    }
    Err(Error::CipherSuitesExhausted(failures))
}

async fn fetch_catalog(link: &Link, session: &mut Session) -> Result<Vec<CipherSuiteRecord>> {
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
        )
        .await?;
        catalog.push_page(&page.record_data);
    }
    catalog.finish()
}

async fn open_v20(link: &Link, options: &ConnectOptions, id: u8) -> Result<Session> {
    let suite = cipher_suite_algorithms(id)?;
    tracing::debug!(cipher_suite = id, "opening RMCP+ session");
    let mut v20 = SessionV20::new(options.credentials.clone(), suite);

    let request = v20.open_session_request()?;
    let response = handshake(
        link,
        payload_type::OPEN_SESSION_REQUEST,
        &request,
        payload_type::OPEN_SESSION_RESPONSE,
    )
    .await?;
    v20.on_open_session_response(&response)?;

    let rakp1 = v20.rakp1()?;
    let rakp2 = handshake(link, payload_type::RAKP_1, &rakp1, payload_type::RAKP_2).await?;
    v20.on_rakp2(&rakp2)?;

    let rakp3 = v20.rakp3()?;
    let rakp4 = handshake(link, payload_type::RAKP_3, &rakp3, payload_type::RAKP_4).await?;
    v20.on_rakp4(&rakp4)?;

    let mut session = Session::v20(v20);
    finish_login(link, &mut session, options.credentials.privilege).await?;
    Ok(session)
}

async fn finish_login(link: &Link, session: &mut Session, privilege: PrivilegeLevel) -> Result<()> {
    if let Err(err) = call(link, session, &SetSessionPrivilegeLevel { privilege }).await {
        if let Err(close_err) = close_session(link, session).await {
            tracing::debug!(error = %close_err, "close after failed login");
        }
        return Err(err);
    }
    Ok(())
}

async fn run_keep_alive(inner: Weak<Mutex<Inner>>, interval: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(shared) = inner.upgrade() else { break };
        let result = {
            let mut inner = shared.lock().await;
            let Inner { link, session } = &mut *inner;
            call(link, session, &GetSessionInfo { session_index: 0 }).await
        };
        match result {
            Ok(_) => {}
            Err(Error::Cancelled) => break,
            Err(err) => tracing::warn!(error = %err, "keep-alive failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::mock::MockBmc;
    use crate::types::Interface;

    fn builder() -> ClientBuilder {
        AsyncClient::builder(std::net::SocketAddr::from(([127, 0, 0, 1], 623)))
            .username("admin")
            .password("password")
            .retry_interval(Duration::from_millis(1))
            .keep_alive(None)
    }

    #[tokio::test]
    async fn auto_connects_with_rmcpplus() {
        let bmc = Arc::new(MockBmc::new("admin", "password"));
        let client = builder()
            .build_async_with_transport(Arc::clone(&bmc))
            .await
            .expect("connect");
        assert_eq!(client.ipmi_version().await, IpmiVersion::V20);
        assert_eq!(client.cipher_suite_id().await, Some(17));

        let device = client.get_device_id().await.expect("device id");
        assert_eq!(device.manufacturer_id, 0x0157);

        client.close().await.expect("close");
        assert_eq!(client.session_state().await, SessionState::Closed);
        assert_eq!(bmc.closed_sessions(), 1);
        client.close().await.expect("second close is a no-op");
    }

    #[tokio::test]
    async fn lan_interface_runs_the_v15_login() {
        let bmc = Arc::new(MockBmc::new("admin", "password"));
        let client = builder()
            .interface(Interface::Lan)
            .build_async_with_transport(Arc::clone(&bmc))
            .await
            .expect("connect");
        assert_eq!(client.ipmi_version().await, IpmiVersion::V15);
        let info = client.get_session_info().await.expect("session info");
        assert_eq!(info.privilege, Some(4));
    }

    #[tokio::test]
    async fn exhausted_suites_are_aggregated() {
        let bmc = Arc::new(
            MockBmc::new("admin", "password")
                .with_catalog(Some(&[3, 17]))
                .rejecting(&[3, 17]),
        );
        let err = builder()
            .build_async_with_transport(bmc)
            .await
            .err()
            .expect("no suite works");
        match err {
            Error::CipherSuitesExhausted(attempts) => assert_eq!(attempts.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_aborts_connect() {
        let bmc = Arc::new(MockBmc::new("admin", "password"));
        let token = CancellationToken::new();
        token.cancel();
        let err = builder()
            .cancellation_token(token)
            .build_async_with_transport(Arc::clone(&bmc))
            .await
            .err()
            .expect("cancelled");
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(bmc.sends(), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_retries() {
        let bmc = Arc::new(MockBmc::new("admin", "password"));
        let token = CancellationToken::new();
        let client = builder()
            .retries(5)
            .retry_interval(Duration::from_secs(10))
            .cancellation_token(token.clone())
            .build_async_with_transport(Arc::clone(&bmc))
            .await
            .expect("connect");

        bmc.set_silent(true);
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let started = Instant::now();
        let err = client.get_device_id().await.expect_err("cancelled");
        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        canceller.await.expect("canceller");

        bmc.set_silent(false);
        client.close().await.expect("close is best effort");
        assert_eq!(client.session_state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn keep_alive_pings_until_close() {
        let bmc = Arc::new(MockBmc::new("admin", "password"));
        let client = builder()
            .keep_alive(Some(Duration::from_millis(10)))
            .build_async_with_transport(Arc::clone(&bmc))
            .await
            .expect("connect");
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.close().await.expect("close");

        let count = |bmc: &MockBmc| bmc.commands().iter().filter(|c| **c == (0x06, 0x3D)).count();
        let pings = count(&bmc);
        assert!(pings >= 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count(&bmc), pings);
    }

    #[tokio::test]
    async fn dropping_the_client_stops_the_keep_alive() {
        let bmc = Arc::new(MockBmc::new("admin", "password"));
        let client = builder()
            .keep_alive(Some(Duration::from_millis(10)))
            .build_async_with_transport(Arc::clone(&bmc))
            .await
            .expect("connect");
        let count = |bmc: &MockBmc| bmc.commands().iter().filter(|c| **c == (0x06, 0x3D)).count();
        let spare = client.clone();
        drop(client);
        let after_first_drop = count(&bmc);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(count(&bmc) > after_first_drop, "a remaining clone keeps pinging");

        drop(spare);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let pings = count(&bmc);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count(&bmc), pings);
        assert_eq!(Arc::strong_count(&bmc), 1, "transport released");
    }

    #[tokio::test]
    async fn late_duplicate_responses_are_dropped() {
        let bmc = Arc::new(MockBmc::new("admin", "password"));
        let client = builder()
            .build_async_with_transport(Arc::clone(&bmc))
            .await
            .expect("connect");
        bmc.duplicate_next_reply();
        client.get_device_id().await.expect("device id");
        let info = client.get_session_info().await.expect("session info");
        assert_eq!(info.privilege, Some(4));
        assert_eq!(bmc.queued_replies(), 0);
        client.close().await.expect("close");
    }
}
