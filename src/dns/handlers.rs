use crate::config::Config;
use crate::dns::resolve::{Resolution, Resolver};
use crate::dns::server::InFlight;
use crate::error::Error;
use crate::store::DynRecordStore;
use std::sync::Arc;
use tracing::{debug, error};
use trust_dns_server::authority::MessageResponseBuilder;
use trust_dns_server::client::op::{Header, Message, MessageType, OpCode, ResponseCode};
use trust_dns_server::client::rr::Record;
use trust_dns_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

#[derive(Clone)]
pub struct Handler {
    resolver: Arc<Resolver>,
    in_flight: InFlight,
}

impl Handler {
    pub(super) fn new(config: &Config, store: DynRecordStore, in_flight: InFlight) -> Self {
        Handler {
            resolver: Arc::new(Resolver::new(config, store)),
            in_flight,
        }
    }

    async fn dispatch_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response: R,
    ) -> Result<ResponseInfo, Error> {
        let Some(_guard) = self.in_flight.enter() else {
            return self
                .send_error(request, response, ResponseCode::Refused)
                .await;
        };

        // If it isn't a query, return NOTIMPL.
        if request.op_code() != OpCode::Query || request.message_type() != MessageType::Query {
            return self
                .send_error(request, response, ResponseCode::NotImp)
                .await;
        }

        let query = request.query();
        debug!(
            "{} asked {} {}",
            request.src(),
            query.query_type(),
            query.name()
        );
        match self
            .resolver
            .resolve(
                request.id(),
                query.name(),
                query.query_type(),
                query.query_class(),
            )
            .await
        {
            Resolution::Authoritative(answers) => {
                self.send_auth_resp(request, response, &answers).await
            }
            Resolution::Forwarded(upstream) => {
                self.send_forwarded(request, response, &upstream).await
            }
            Resolution::Refused => {
                self.send_error(request, response, ResponseCode::Refused)
                    .await
            }
            Resolution::Failed(_) => {
                self.send_error(request, response, ResponseCode::ServFail)
                    .await
            }
        }
    }

    async fn send_auth_resp<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        answers: &[Record],
    ) -> Result<ResponseInfo, Error> {
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(header, answers.iter(), &[], &[], &[]);
        Ok(response_handle.send_response(response).await?)
    }

    async fn send_forwarded<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        upstream: &Message,
    ) -> Result<ResponseInfo, Error> {
        let mut header = Header::response_from_request(request.header());
        header.set_recursion_available(true);
        header.set_response_code(upstream.response_code());
        // A truncated upstream answer stays truncated so the client retries over TCP.
        header.set_truncated(upstream.truncated());
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(
            header,
            upstream.answers().iter(),
            upstream.name_servers().iter(),
            &[],
            upstream.additionals().iter(),
        );
        Ok(response_handle.send_response(response).await?)
    }

    async fn send_error<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        code: ResponseCode,
    ) -> Result<ResponseInfo, Error> {
        let builder = MessageResponseBuilder::from_message_request(request);
        Ok(response_handle
            .send_response(builder.error_msg(request.header(), code))
            .await?)
    }
}

#[async_trait::async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        match self.dispatch_request(request, response_handle).await {
            Ok(info) => info,
            Err(error) => {
                error!("error in RequestHandler: {:?}", error);
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}
