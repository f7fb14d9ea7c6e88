//! Recursive fallback to upstream resolvers.
//!
//! A query for a name outside every managed zone is sent to each configured upstream at
//! once. The first reply with a NOERROR response code wins and the remaining exchanges are
//! aborted. Replies with any other response code are ignored.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, trace};
use trust_dns_client::op::{Message, ResponseCode};
use trust_dns_proto::error::ProtoError;

/// Large enough for any reply to an EDNS-less query.
const MAX_UDP_RESPONSE: usize = 4_096;

#[derive(thiserror::Error, Debug)]
pub enum ForwardError {
    #[error("no upstream resolvers configured")]
    NoUpstreams,

    #[error("no upstream answered within {0:?}")]
    Timeout(Duration),

    #[error("no upstream returned a successful response")]
    Exhausted,

    #[error("can't encode query")]
    Encode(#[from] ProtoError),
}

#[derive(Debug, Clone)]
pub struct Upstreams {
    addrs: Vec<SocketAddr>,
    timeout: Duration,
}

impl Upstreams {
    #[must_use]
    pub fn new(addrs: Vec<SocketAddr>, timeout: Duration) -> Self {
        Upstreams { addrs, timeout }
    }

    /// Race `query` across every upstream and return the first NOERROR reply.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::Timeout`] when nothing succeeds within the configured timeout
    /// and [`ForwardError::Exhausted`] when every upstream replied or failed without success.
    pub async fn forward(&self, query: &Message) -> Result<Message, ForwardError> {
        if self.addrs.is_empty() {
            return Err(ForwardError::NoUpstreams);
        }
        let wire = query.to_vec()?;
        let id = query.id();

        let mut exchanges = JoinSet::new();
        for &addr in &self.addrs {
            let wire = wire.clone();
            exchanges.spawn(async move { (addr, exchange(addr, &wire, id).await) });
        }

        let race = async {
            while let Some(joined) = exchanges.join_next().await {
                match joined {
                    Ok((addr, Ok(response)))
                        if response.response_code() == ResponseCode::NoError =>
                    {
                        trace!("upstream {addr} answered query {id}");
                        return Ok(response);
                    }
                    Ok((addr, Ok(response))) => {
                        debug!(
                            "upstream {addr} answered query {id} with {}",
                            response.response_code()
                        );
                    }
                    Ok((addr, Err(err))) => debug!("upstream {addr} failed query {id}: {err}"),
                    Err(err) => debug!("upstream exchange for query {id} aborted: {err}"),
                }
            }
            Err(ForwardError::Exhausted)
        };

        let result = timeout(self.timeout, race)
            .await
            .unwrap_or(Err(ForwardError::Timeout(self.timeout)));
        exchanges.abort_all();
        result
    }
}

/// One UDP exchange. Datagrams that don't parse or don't carry the query id are skipped.
async fn exchange(addr: SocketAddr, wire: &[u8], id: u16) -> std::io::Result<Message> {
    let local: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;
    socket.send(wire).await?;

    let mut buf = vec![0u8; MAX_UDP_RESPONSE];
    loop {
        let len = socket.recv(&mut buf).await?;
        match Message::from_vec(&buf[..len]) {
            Ok(response) if response.id() == id => return Ok(response),
            Ok(response) => trace!("ignoring reply {} from {addr}", response.id()),
            Err(err) => trace!("ignoring malformed reply from {addr}: {err}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Instant;
    use trust_dns_client::op::{MessageType, OpCode, Query};
    use trust_dns_client::rr::{Name, RData, Record, RecordType};

    pub(crate) fn query(name: &str, id: u16) -> Message {
        let mut message = Message::new();
        message
            .set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));
        message
    }

    /// A fake upstream answering every query with `code`, after `delay`, carrying one A
    /// record whose address identifies the upstream.
    pub(crate) async fn fake_upstream(
        code: ResponseCode,
        delay: Duration,
        marker: Ipv4Addr,
    ) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_UDP_RESPONSE];
            while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                let request = Message::from_vec(&buf[..len]).unwrap();
                let mut response = Message::new();
                response
                    .set_id(request.id())
                    .set_message_type(MessageType::Response)
                    .set_op_code(OpCode::Query)
                    .set_response_code(code)
                    .add_queries(request.queries().to_vec());
                if let Some(q) = request.queries().first() {
                    response.add_answer(Record::from_rdata(q.name().clone(), 30, RData::A(marker)));
                }
                tokio::time::sleep(delay).await;
                let _ = socket.send_to(&response.to_vec().unwrap(), peer).await;
            }
        });
        addr
    }

    /// An address nothing answers on: a bound socket that never reads.
    pub(crate) async fn silent_upstream() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    fn answer_marker(response: &Message) -> Option<Ipv4Addr> {
        response.answers().iter().find_map(|r| match r.data() {
            Some(RData::A(ip)) => Some(*ip),
            _ => None,
        })
    }

    #[tokio::test]
    async fn first_success_wins() {
        let slow = fake_upstream(
            ResponseCode::NoError,
            Duration::from_millis(300),
            Ipv4Addr::new(10, 0, 0, 1),
        )
        .await;
        let fast = fake_upstream(ResponseCode::NoError, Duration::ZERO, Ipv4Addr::new(10, 0, 0, 2))
            .await;
        let upstreams = Upstreams::new(vec![slow, fast], Duration::from_secs(2));

        let response = upstreams.forward(&query("example.net.", 7)).await.unwrap();
        assert_eq!(response.id(), 7);
        assert_eq!(answer_marker(&response), Some(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[tokio::test]
    async fn failing_upstream_does_not_win() {
        let failing = fake_upstream(
            ResponseCode::ServFail,
            Duration::ZERO,
            Ipv4Addr::new(10, 0, 0, 1),
        )
        .await;
        let working = fake_upstream(
            ResponseCode::NoError,
            Duration::from_millis(50),
            Ipv4Addr::new(10, 0, 0, 2),
        )
        .await;
        let upstreams = Upstreams::new(vec![failing, working], Duration::from_secs(2));

        let response = upstreams.forward(&query("example.net.", 8)).await.unwrap();
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(answer_marker(&response), Some(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[tokio::test]
    async fn all_failing_is_exhausted() {
        let a = fake_upstream(ResponseCode::ServFail, Duration::ZERO, Ipv4Addr::LOCALHOST).await;
        let b = fake_upstream(ResponseCode::Refused, Duration::ZERO, Ipv4Addr::LOCALHOST).await;
        let upstreams = Upstreams::new(vec![a, b], Duration::from_secs(2));

        let err = upstreams.forward(&query("example.net.", 9)).await.unwrap_err();
        assert!(matches!(err, ForwardError::Exhausted));
    }

    #[tokio::test]
    async fn unreachable_upstreams_time_out_promptly() {
        let (_a, a) = silent_upstream().await;
        let (_b, b) = silent_upstream().await;
        let upstreams = Upstreams::new(vec![a, b], Duration::from_millis(200));

        let started = Instant::now();
        let err = upstreams.forward(&query("example.net.", 10)).await.unwrap_err();
        assert!(matches!(err, ForwardError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn no_upstreams() {
        let upstreams = Upstreams::new(Vec::default(), Duration::from_millis(200));
        let err = upstreams.forward(&query("example.net.", 11)).await.unwrap_err();
        assert!(matches!(err, ForwardError::NoUpstreams));
    }
}
