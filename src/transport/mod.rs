use std::time::Duration;

#[cfg(feature = "blocking")]
use crate::error::{Error, Result};

/// How many times a request is re-sent after a timeout, and how long to wait
/// in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-sends after the first attempt; `retries + 1` attempts in total.
    pub retries: u32,
    /// Pause between attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    pub(crate) fn attempts(self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            interval: Duration::from_millis(100),
        }
    }
}

/// A synchronous transport for exchanging RMCP/RMCP+ datagrams.
#[cfg(feature = "blocking")]
pub trait Transport {
    /// Send one request datagram and wait (bounded by the transport's
    /// timeout) for one response datagram. A timeout is reported as
    /// [`Error::Timeout`]; retrying is the caller's business.
    fn send_recv(&self, request: &[u8]) -> Result<Vec<u8>>;

    /// Wait for one more datagram without sending anything. Transports that
    /// cannot read on their own report [`Error::Timeout`].
    fn recv(&self) -> Result<Vec<u8>> {
        Err(Error::Timeout { attempts: 1 })
    }
}

/// Send `request`, re-sending on timeout only, until `accept` takes a response
/// or the policy is exhausted.
///
/// `accept` returns `Ok(None)` for a datagram that answers some other request
/// (typically a late reply to an earlier attempt); it is dropped and the
/// transport is read again within the same attempt.
#[cfg(feature = "blocking")]
pub(crate) fn exchange<T, R>(
    transport: &T,
    request: &[u8],
    policy: RetryPolicy,
    mut accept: impl FnMut(&[u8]) -> Result<Option<R>>,
) -> Result<R>
where
    T: Transport + ?Sized,
{
    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        let mut reply = transport.send_recv(request);
        loop {
            match reply {
                Ok(packet) => match accept(&packet)? {
                    Some(response) => return Ok(response),
                    None => {
                        tracing::debug!(attempt, len = packet.len(), "dropping stale response");
                        reply = transport.recv();
                    }
                },
                Err(err) if err.is_timeout() => break,
                Err(err) => return Err(err),
            }
        }
        tracing::debug!(attempt, attempts, "no response before timeout");
        if attempt < attempts {
            std::thread::sleep(policy.interval);
        }
    }
    Err(Error::Timeout { attempts })
}

#[cfg(feature = "async")]
mod async_support {
    use core::future::Future;
    use core::pin::Pin;

    use super::RetryPolicy;
    use crate::error::{Error, Result};

    /// An asynchronous transport for exchanging RMCP/RMCP+ datagrams.
    pub trait AsyncTransport {
        /// Send one request datagram and wait for one response datagram.
        fn send_recv<'a>(
            &'a self,
            request: &'a [u8],
        ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

        /// Wait for one more datagram without sending anything.
        fn recv<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>> {
            Box::pin(async { Err::<Vec<u8>, _>(Error::Timeout { attempts: 1 }) })
        }
    }

    pub(crate) async fn exchange_async<T, R>(
        transport: &T,
        request: &[u8],
        policy: RetryPolicy,
        mut accept: impl FnMut(&[u8]) -> Result<Option<R>>,
    ) -> Result<R>
    where
        T: AsyncTransport + ?Sized,
    {
        let attempts = policy.attempts();
        for attempt in 1..=attempts {
            let mut reply = transport.send_recv(request).await;
            loop {
                match reply {
                    Ok(packet) => match accept(&packet)? {
                        Some(response) => return Ok(response),
                        None => {
                            tracing::debug!(attempt, len = packet.len(), "dropping stale response");
                            reply = transport.recv().await;
                        }
                    },
                    Err(err) if err.is_timeout() => break,
                    Err(err) => return Err(err),
                }
            }
            tracing::debug!(attempt, attempts, "no response before timeout");
            if attempt < attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }
        Err(Error::Timeout { attempts })
    }
}

#[cfg(feature = "async")]
pub use async_support::AsyncTransport;
#[cfg(feature = "async")]
pub(crate) use async_support::exchange_async;

#[cfg(feature = "blocking")]
pub(crate) mod blocking;

#[cfg(feature = "async")]
pub(crate) mod tokio;
