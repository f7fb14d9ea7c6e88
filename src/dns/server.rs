use crate::config::Shared;
use crate::dns::handlers::Handler;
use crate::error::Error;
use crate::store::DynRecordStore;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use trust_dns_server::proto::error::ProtoError;
use trust_dns_server::ServerFuture;

/// A running DNS server: one UDP socket and one TCP listener, each served by its own task.
pub struct DnsServer {
    udp_addr: SocketAddr,
    tcp_addr: SocketAddr,
    in_flight: InFlight,
    task: JoinHandle<Result<(), ProtoError>>,
}

/// Bind the DNS listeners and start serving.
///
/// # Errors
///
/// Returns [`Error::IO`] if either the UDP or the TCP address can't be bound.
pub async fn new(config: Shared, store: DynRecordStore) -> Result<DnsServer, Error> {
    let udp_socket = UdpSocket::bind(config.dns_udp_bind_addr).await?;
    let tcp_listener = TcpListener::bind(config.dns_tcp_bind_addr).await?;
    let udp_addr = udp_socket.local_addr()?;
    let tcp_addr = tcp_listener.local_addr()?;

    let in_flight = InFlight::default();
    let dns_handler = Handler::new(&config, store, in_flight.clone());
    let mut dns_server = ServerFuture::new(dns_handler);
    dns_server.register_socket(udp_socket);
    dns_server.register_listener(tcp_listener, config.dns_tcp_timeout);

    Ok(DnsServer {
        udp_addr,
        tcp_addr,
        in_flight,
        task: tokio::spawn(dns_server.block_until_done()),
    })
}

impl DnsServer {
    #[must_use]
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    #[must_use]
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    /// Resolves only if the listeners stop on their own, which means they failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DNSError`] with the listener failure.
    pub async fn stopped(&mut self) -> Result<(), Error> {
        match (&mut self.task).await {
            Ok(res) => Ok(res?),
            Err(err) => Err(Error::IO(std::io::Error::new(
                std::io::ErrorKind::Other,
                err,
            ))),
        }
    }

    /// Stop answering new queries, give in-flight queries up to `grace` to complete, then
    /// stop the listeners. Returns whether every in-flight query completed in time.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let drained = self.in_flight.drain(grace).await;
        self.task.abort();
        if !drained {
            tracing::warn!(
                "{} DNS queries still in flight after {grace:?}",
                self.in_flight.count()
            );
        }
        drained
    }
}

/// Counts queries being handled, and refuses new ones once draining has started.
#[derive(Clone, Default)]
pub(crate) struct InFlight(Arc<InFlightState>);

#[derive(Default)]
struct InFlightState {
    count: AtomicUsize,
    closing: AtomicBool,
    idle: Notify,
}

pub(crate) struct InFlightGuard(Arc<InFlightState>);

impl InFlight {
    /// Register a new query, or `None` if the server is shutting down.
    pub(crate) fn enter(&self) -> Option<InFlightGuard> {
        if self.0.closing.load(Ordering::Acquire) {
            return None;
        }
        self.0.count.fetch_add(1, Ordering::AcqRel);
        Some(InFlightGuard(Arc::clone(&self.0)))
    }

    pub(crate) fn count(&self) -> usize {
        self.0.count.load(Ordering::Acquire)
    }

    async fn drain(&self, grace: Duration) -> bool {
        self.0.closing.store(true, Ordering::Release);
        tokio::time::timeout(grace, async {
            loop {
                let idle = self.0.idle.notified();
                if self.count() == 0 {
                    return;
                }
                idle.await;
            }
        })
        .await
        .is_ok()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_waits_for_guards() {
        let in_flight = InFlight::default();
        let guard = in_flight.enter().unwrap();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(in_flight.drain(Duration::from_secs(1)).await);
        assert_eq!(in_flight.count(), 0);
        releaser.await.unwrap();
    }

    #[tokio::test]
    async fn drain_gives_up_after_grace() {
        let in_flight = InFlight::default();
        let _guard = in_flight.enter().unwrap();
        assert!(!in_flight.drain(Duration::from_millis(20)).await);
        assert!(in_flight.enter().is_none());
    }
}
