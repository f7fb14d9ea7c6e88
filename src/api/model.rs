use crate::dns::synth::{dkim_payload, split_txt_payload};
use crate::error::Error;
use crate::store::{normalize_domain, DomainRecord};
use serde::Deserialize;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct CreateRecordRequest {
    pub domain: String,
    #[serde(flatten)]
    pub fields: RecordFields,
}

/// The parts of a record clients may set. Challenge tokens and certificates are only ever
/// written by the issuance pipeline.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct RecordFields {
    #[serde(default)]
    pub ipv4_addresses: Vec<Ipv4Addr>,
    #[serde(default)]
    pub ipv6_addresses: Vec<Ipv6Addr>,
    pub dkim_public_key: Option<String>,
    pub dkim_private_key: Option<String>,
}

impl RecordFields {
    fn validate(&self) -> Result<(), Error> {
        if let Some(key) = &self.dkim_public_key {
            if split_txt_payload(&dkim_payload(key)).is_none() {
                return Err(Error::InvalidRecord(format!(
                    "DKIM public key of {} bytes does not fit in a TXT record",
                    key.len()
                )));
            }
        }
        Ok(())
    }

    /// Overwrite the client settable fields of `record`. With `derive_ipv6` set and no IPv6
    /// addresses supplied, the IPv4-mapped form of every IPv4 address is used instead. The
    /// record's DKIM keys are kept unless either key is supplied.
    pub fn apply(self, record: &mut DomainRecord, derive_ipv6: bool) -> Result<(), Error> {
        self.validate()?;
        record.ipv6_addresses = if self.ipv6_addresses.is_empty() && derive_ipv6 {
            self.ipv4_addresses
                .iter()
                .map(Ipv4Addr::to_ipv6_mapped)
                .collect()
        } else {
            self.ipv6_addresses
        };
        record.ipv4_addresses = self.ipv4_addresses;
        if self.dkim_public_key.is_some() || self.dkim_private_key.is_some() {
            record.dkim_public_key = self.dkim_public_key;
            record.dkim_private_key = self.dkim_private_key;
        }
        Ok(())
    }
}

impl CreateRecordRequest {
    pub fn into_record(self, derive_ipv6: bool) -> Result<DomainRecord, Error> {
        let mut record = DomainRecord::new(normalize_domain(&self.domain)?);
        self.fields.apply(&mut record, derive_ipv6)?;
        Ok(record)
    }
}
