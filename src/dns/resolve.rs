//! The authoritative-or-recursive decision.

use crate::config::Config;
use crate::dns::synth::Synthesizer;
use crate::dns::upstream::{ForwardError, Upstreams};
use crate::store::{DomainRecord, DynRecordStore};
use tracing::{debug, warn};
use trust_dns_client::op::{Message, MessageType, OpCode, Query};
use trust_dns_server::client::rr::{DNSClass, LowerName, Name, Record, RecordType};

/// The outcome of resolving one question.
#[derive(Debug)]
pub enum Resolution {
    /// The name belongs to a managed zone. The answers may be empty.
    Authoritative(Vec<Record>),
    /// An upstream resolver's successful reply.
    Forwarded(Message),
    /// The name is unmanaged and recursion is disabled.
    Refused,
    /// The name is unmanaged and no upstream answered successfully in time.
    Failed(ForwardError),
}

pub struct Resolver {
    store: DynRecordStore,
    synthesizer: Synthesizer,
    upstreams: Option<Upstreams>,
}

impl Resolver {
    #[must_use]
    pub fn new(config: &Config, store: DynRecordStore) -> Self {
        let upstreams = config.recursion.then(|| {
            Upstreams::new(config.raced_upstreams().to_vec(), config.upstream_timeout)
        });
        Resolver {
            store,
            synthesizer: Synthesizer::new(config.zone.clone()),
            upstreams,
        }
    }

    /// Find the managed zone `name` belongs to: an exact match first, otherwise any stored
    /// domain `name` is a subdomain of. The first such domain found is used, which need not
    /// be the closest enclosing one when zones nest.
    pub async fn zone_for(&self, name: &LowerName) -> Option<DomainRecord> {
        if let Some(record) = self.store.get(name).await {
            return Some(record);
        }
        self.store
            .list()
            .await
            .into_iter()
            .find(|record| record.domain.zone_of(name))
    }

    pub async fn resolve(
        &self,
        id: u16,
        name: &LowerName,
        query_type: RecordType,
        query_class: DNSClass,
    ) -> Resolution {
        if let Some(record) = self.zone_for(name).await {
            debug!("answering {query_type} {name} from zone {}", record.domain);
            return Resolution::Authoritative(self.synthesizer.answers(name, query_type, &record));
        }

        let Some(upstreams) = &self.upstreams else {
            return Resolution::Refused;
        };
        let mut query = Query::query(Name::from(name), query_type);
        query.set_query_class(query_class);
        let mut message = Message::new();
        message
            .set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .add_query(query);

        match upstreams.forward(&message).await {
            Ok(response) => Resolution::Forwarded(response),
            Err(err) => {
                warn!("recursive lookup of {query_type} {name} failed: {err}");
                Resolution::Failed(err)
            }
        }
    }
}
