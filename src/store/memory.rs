use crate::error::Error;
use crate::store::{DomainRecord, RecordStore};
use std::collections::HashMap;
use tokio::sync::RwLock;
use trust_dns_server::client::rr::LowerName;

#[derive(Default, Debug)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<LowerName, DomainRecord>>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn with_records(records: Vec<DomainRecord>) -> Self {
        InMemoryRecordStore {
            records: RwLock::new(
                records
                    .into_iter()
                    .map(|record| (record.domain.clone(), record))
                    .collect(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, domain: &LowerName) -> Option<DomainRecord> {
        self.records.read().await.get(domain).cloned()
    }

    async fn set(&self, record: DomainRecord) -> Result<(), Error> {
        if !record.domain.is_fqdn() {
            return Err(Error::InvalidDomain(record.domain.to_string()));
        }
        self.records
            .write()
            .await
            .insert(record.domain.clone(), record);
        Ok(())
    }

    async fn delete(&self, domain: &LowerName) -> Result<(), Error> {
        self.records.write().await.remove(domain);
        Ok(())
    }

    async fn list(&self) -> Vec<DomainRecord> {
        self.records.read().await.values().cloned().collect()
    }

    async fn load(&self, records: Vec<DomainRecord>) -> Result<(), Error> {
        if let Some(bad) = records.iter().find(|r| !r.domain.is_fqdn()) {
            return Err(Error::InvalidDomain(bad.domain.to_string()));
        }
        let mut map = self.records.write().await;
        map.clear();
        map.extend(records.into_iter().map(|r| (r.domain.clone(), r)));
        Ok(())
    }
}
