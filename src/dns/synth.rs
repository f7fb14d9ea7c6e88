//! Authoritative record synthesis.
//!
//! Turns a [`DomainRecord`] into the resource records answering one question. Nothing here
//! performs I/O or touches the record store.

use crate::config::{SoaSerial, ZonePolicy};
use crate::store::DomainRecord;
use time::OffsetDateTime;
use tracing::warn;
use trust_dns_proto::rr::rdata::caa::CAA;
use trust_dns_proto::rr::rdata::{MX, SOA, TXT};
use trust_dns_server::client::rr::{LowerName, Name, RData, Record, RecordType};

/// TTL of address, TXT, CAA, MX and PTR answers.
pub const DEFAULT_TTL: u32 = 60;
pub const SOA_TTL: u32 = 3_600;
pub const NS_TTL: u32 = 86_400;

/// Longest character-string a TXT record can carry.
pub const TXT_STRING_LIMIT: usize = 255;

const DKIM_LABEL: &str = "mail";
const MAIL_EXCHANGE_LABEL: &str = "mail";
const DMARC_LABEL: &str = "_dmarc";
const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

#[derive(Debug, Clone)]
pub struct Synthesizer {
    policy: ZonePolicy,
}

impl Synthesizer {
    #[must_use]
    pub fn new(policy: ZonePolicy) -> Self {
        Synthesizer { policy }
    }

    /// Build the answers for a `query_type` question about `query_name`, which is either
    /// `record.domain` or one of its subdomains. Types without a dedicated builder are
    /// answered with the zone SOA.
    #[must_use]
    pub fn answers(
        &self,
        query_name: &LowerName,
        query_type: RecordType,
        record: &DomainRecord,
    ) -> Vec<Record> {
        let owner = Name::from(query_name);
        match query_type {
            RecordType::A => a_records(&owner, record),
            RecordType::AAAA => aaaa_records(&owner, record),
            RecordType::TXT => txt_records(&owner, record, &self.policy.hostmaster),
            RecordType::MX => self.mx_records(&owner, record),
            RecordType::NS => self.ns_records(record),
            RecordType::PTR => ptr_records(&owner, record),
            RecordType::CAA => self.caa_records(&owner),
            _ => self.soa_records(record),
        }
    }

    #[must_use]
    pub fn serial(&self) -> u32 {
        match self.policy.soa_serial {
            SoaSerial::Fixed(serial) => serial,
            SoaSerial::Date => date_serial(OffsetDateTime::now_utc()),
        }
    }

    fn soa_records(&self, record: &DomainRecord) -> Vec<Record> {
        let zone = Name::from(&record.domain);
        let (Some(mname), Ok(rname)) = (
            self.name_servers(&zone).into_iter().next(),
            prefixed(&self.policy.hostmaster, &zone),
        ) else {
            warn!("can't build SOA names for {zone}");
            return Vec::default();
        };
        // See RIPE 203[0] for recommended values.
        // [0]: https://www.ripe.net/publications/docs/ripe-203
        let soa = SOA::new(
            mname,
            rname,
            self.serial(),
            86_400,    // 24 hrs.
            7_200,     // 2 hours.
            3_600_000, // 1000 hours.
            172_800,   // 2 days.
        );
        vec![Record::from_rdata(zone, SOA_TTL, RData::SOA(soa))]
    }

    fn ns_records(&self, record: &DomainRecord) -> Vec<Record> {
        let zone = Name::from(&record.domain);
        self.name_servers(&zone)
            .into_iter()
            .map(|ns| Record::from_rdata(zone.clone(), NS_TTL, RData::NS(ns)))
            .collect()
    }

    fn mx_records(&self, owner: &Name, record: &DomainRecord) -> Vec<Record> {
        let zone = Name::from(&record.domain);
        match prefixed(MAIL_EXCHANGE_LABEL, &zone) {
            Ok(exchange) => vec![Record::from_rdata(
                owner.clone(),
                DEFAULT_TTL,
                RData::MX(MX::new(self.policy.mx_preference, exchange)),
            )],
            Err(err) => {
                warn!("can't build MX exchange for {zone}: {err}");
                Vec::default()
            }
        }
    }

    fn caa_records(&self, owner: &Name) -> Vec<Record> {
        match Name::from_ascii(&self.policy.caa_issuer) {
            Ok(issuer) => vec![Record::from_rdata(
                owner.clone(),
                DEFAULT_TTL,
                RData::CAA(CAA::new_issue(false, Some(issuer), Vec::default())),
            )],
            Err(err) => {
                warn!("invalid CAA issuer {:?}: {err}", self.policy.caa_issuer);
                Vec::default()
            }
        }
    }

    fn name_servers(&self, zone: &Name) -> Vec<Name> {
        self.policy
            .name_servers
            .iter()
            .filter_map(|label| prefixed(label, zone).ok())
            .collect()
    }
}

fn a_records(owner: &Name, record: &DomainRecord) -> Vec<Record> {
    record
        .ipv4_addresses
        .iter()
        .map(|ip| Record::from_rdata(owner.clone(), DEFAULT_TTL, RData::A(*ip)))
        .collect()
}

fn aaaa_records(owner: &Name, record: &DomainRecord) -> Vec<Record> {
    record
        .ipv6_addresses
        .iter()
        .map(|ip| Record::from_rdata(owner.clone(), DEFAULT_TTL, RData::AAAA(*ip)))
        .collect()
}

/// TXT answers are chosen by the first label of the question, not the question type alone.
fn txt_records(owner: &Name, record: &DomainRecord, hostmaster: &str) -> Vec<Record> {
    let txt = |strings: Vec<String>| {
        Record::from_rdata(owner.clone(), DEFAULT_TTL, RData::TXT(TXT::new(strings)))
    };
    let zone = record.bare_domain();

    match first_label(owner).as_deref() {
        Some(DKIM_LABEL) => {
            let Some(public_key) = record.dkim_public_key.as_deref() else {
                return Vec::default();
            };
            let payload = dkim_payload(public_key);
            match split_txt_payload(&payload) {
                Some(strings) => vec![txt(strings)],
                None => {
                    warn!(
                        "DKIM payload for {zone} is {} bytes, too long for one TXT record",
                        payload.len()
                    );
                    Vec::default()
                }
            }
        }
        Some(DMARC_LABEL) => vec![txt(vec![format!(
            "v=DMARC1; p=reject; sp=reject; adkim=s; aspf=s; rua=mailto:{hostmaster}@{zone}"
        )])],
        Some(ACME_CHALLENGE_LABEL) => record
            .acme_challenge_tokens
            .iter()
            .filter(|token| !token.is_empty())
            .map(|token| txt(vec![token.clone()]))
            .collect(),
        _ => {
            let name = owner.to_string();
            let name = name.trim_end_matches('.');
            vec![txt(vec![format!(
                "v=spf1 include:_spf.{name} a mx ptr ~all"
            )])]
        }
    }
}

fn ptr_records(owner: &Name, record: &DomainRecord) -> Vec<Record> {
    let Some(ip) = record.ipv4_addresses.first() else {
        return Vec::default();
    };
    let [a, b, c, d] = ip.octets();
    match Name::from_ascii(format!("{d}.{c}.{b}.{a}.in-addr.arpa.")) {
        Ok(reverse) => vec![Record::from_rdata(
            owner.clone(),
            DEFAULT_TTL,
            RData::PTR(reverse),
        )],
        Err(err) => {
            warn!("can't build PTR for {ip}: {err}");
            Vec::default()
        }
    }
}

/// The DKIM `TXT` payload publishing `public_key`.
#[must_use]
pub fn dkim_payload(public_key: &str) -> String {
    format!("v=DKIM1; k=rsa; t=s; p={public_key}")
}

/// Split a TXT payload into character-strings: as-is when it fits in one, or exactly two
/// continuation strings when it doesn't. Payloads needing more than two strings are
/// rejected with `None`.
#[must_use]
pub fn split_txt_payload(payload: &str) -> Option<Vec<String>> {
    if payload.len() <= TXT_STRING_LIMIT {
        return Some(vec![payload.to_string()]);
    }
    if payload.len() > 2 * TXT_STRING_LIMIT {
        return None;
    }
    let mut boundary = TXT_STRING_LIMIT;
    while !payload.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let (head, tail) = payload.split_at(boundary);
    if tail.len() > TXT_STRING_LIMIT {
        return None;
    }
    Some(vec![head.to_string(), tail.to_string()])
}

fn first_label(name: &Name) -> Option<String> {
    name.iter()
        .next()
        .map(|label| String::from_utf8_lossy(label).to_ascii_lowercase())
}

fn prefixed(label: &str, zone: &Name) -> Result<Name, trust_dns_proto::error::ProtoError> {
    Name::from_ascii(label)?.append_domain(zone)
}

fn date_serial(now: OffsetDateTime) -> u32 {
    let date = now.date();
    let year = u32::try_from(date.year()).unwrap_or_default();
    year * 10_000 + u32::from(u8::from(date.month())) * 100 + u32::from(date.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::normalize_domain;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use time::macros::datetime;

    fn zone() -> DomainRecord {
        let mut record = DomainRecord::new(normalize_domain("example.com").unwrap());
        record.ipv4_addresses = vec![Ipv4Addr::new(192, 0, 2, 10), Ipv4Addr::new(192, 0, 2, 11)];
        record.ipv6_addresses = vec![Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)];
        record.dkim_public_key = Some("MIIBIjANBgkq".to_string());
        record.acme_challenge_tokens = vec!["LPsIwTo7o8BoG0-vjCyGQGBWSVIPxI-i_X336eUOQZo".into()];
        record
    }

    fn synth() -> Synthesizer {
        Synthesizer::new(ZonePolicy {
            soa_serial: SoaSerial::Fixed(42),
            ..ZonePolicy::default()
        })
    }

    fn name(s: &str) -> LowerName {
        normalize_domain(s).unwrap()
    }

    fn txt_strings(record: &Record) -> Vec<String> {
        match record.data() {
            Some(RData::TXT(txt)) => txt
                .txt_data()
                .iter()
                .map(|s| String::from_utf8(s.to_vec()).unwrap())
                .collect(),
            other => panic!("expected TXT, got {other:?}"),
        }
    }

    #[test]
    fn every_type_answers_with_lowercase_fqdn_owners() {
        let record = zone();
        for rtype in [
            RecordType::A,
            RecordType::AAAA,
            RecordType::TXT,
            RecordType::MX,
            RecordType::NS,
            RecordType::SOA,
            RecordType::PTR,
            RecordType::CAA,
        ] {
            let answers = synth().answers(&name("Example.COM"), rtype, &record);
            assert!(!answers.is_empty(), "{rtype} produced no answers");
            for answer in answers {
                assert_eq!(answer.name().to_string(), "example.com.", "{rtype}");
                assert_eq!(answer.record_type(), rtype);
            }
        }
    }

    #[test]
    fn a_answers_keep_address_order() {
        let answers = synth().answers(&name("example.com"), RecordType::A, &zone());
        let ips: Vec<RData> = answers.iter().filter_map(|r| r.data().cloned()).collect();
        assert_eq!(
            ips,
            vec![
                RData::A(Ipv4Addr::new(192, 0, 2, 10)),
                RData::A(Ipv4Addr::new(192, 0, 2, 11))
            ]
        );
    }

    #[test]
    fn no_ipv4_means_no_a_answers() {
        let mut record = zone();
        record.ipv4_addresses.clear();
        assert!(synth()
            .answers(&name("example.com"), RecordType::A, &record)
            .is_empty());
        assert!(synth()
            .answers(&name("example.com"), RecordType::PTR, &record)
            .is_empty());
    }

    #[test]
    fn subdomain_answers_are_owned_by_the_question() {
        let answers = synth().answers(&name("www.example.com"), RecordType::A, &zone());
        assert_eq!(answers[0].name().to_string(), "www.example.com.");
    }

    #[test]
    fn txt_routes_on_first_label() {
        let s = synth();
        let record = zone();

        let acme = s.answers(&name("_acme-challenge.example.com"), RecordType::TXT, &record);
        assert_eq!(acme.len(), 1);
        assert_eq!(txt_strings(&acme[0]), record.acme_challenge_tokens);

        let dmarc = s.answers(&name("_dmarc.example.com"), RecordType::TXT, &record);
        assert!(txt_strings(&dmarc[0])[0].starts_with("v=DMARC1;"));
        assert!(txt_strings(&dmarc[0])[0].ends_with("rua=mailto:admin@example.com"));

        let dkim = s.answers(&name("mail._domainkey.example.com"), RecordType::TXT, &record);
        assert_eq!(
            txt_strings(&dkim[0]),
            vec!["v=DKIM1; k=rsa; t=s; p=MIIBIjANBgkq".to_string()]
        );

        let spf = s.answers(&name("example.com"), RecordType::TXT, &record);
        assert_eq!(
            txt_strings(&spf[0]),
            vec!["v=spf1 include:_spf.example.com a mx ptr ~all".to_string()]
        );
    }

    #[test]
    fn cleared_challenge_serves_nothing() {
        let mut record = zone();
        record.acme_challenge_tokens.clear();
        assert!(synth()
            .answers(&name("_acme-challenge.example.com"), RecordType::TXT, &record)
            .is_empty());
    }

    #[test]
    fn long_dkim_payload_split_in_two() {
        let mut record = zone();
        record.dkim_public_key = Some("A".repeat(392));
        let dkim = synth().answers(&name("mail._domainkey.example.com"), RecordType::TXT, &record);
        let strings = txt_strings(&dkim[0]);

        assert_eq!(strings.len(), 2);
        assert_eq!(strings[0].len(), TXT_STRING_LIMIT);
        assert_eq!(
            strings.concat(),
            format!("v=DKIM1; k=rsa; t=s; p={}", "A".repeat(392))
        );
    }

    #[test]
    fn oversized_payload_rejected() {
        assert!(split_txt_payload(&"x".repeat(2 * TXT_STRING_LIMIT + 1)).is_none());
        assert_eq!(split_txt_payload("short"), Some(vec!["short".to_string()]));
    }

    #[test]
    fn ptr_uses_first_ipv4_only() {
        let answers = synth().answers(&name("example.com"), RecordType::PTR, &zone());
        assert_eq!(answers.len(), 1);
        assert_eq!(
            answers[0].data(),
            Some(&RData::PTR(
                Name::from_ascii("10.2.0.192.in-addr.arpa.").unwrap()
            ))
        );
    }

    #[test]
    fn soa_and_ns_describe_the_zone_apex() {
        let s = synth();
        let soa = s.answers(&name("www.example.com"), RecordType::SOA, &zone());
        assert_eq!(soa[0].name().to_string(), "example.com.");
        match soa[0].data() {
            Some(RData::SOA(soa)) => {
                assert_eq!(soa.mname().to_string(), "ns1.example.com.");
                assert_eq!(soa.rname().to_string(), "admin.example.com.");
                assert_eq!(soa.serial(), 42);
            }
            other => panic!("expected SOA, got {other:?}"),
        }

        let ns: Vec<String> = s
            .answers(&name("example.com"), RecordType::NS, &zone())
            .iter()
            .filter_map(|r| match r.data() {
                Some(RData::NS(ns)) => Some(ns.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(ns, vec!["ns1.example.com.", "ns2.example.com."]);
    }

    #[test]
    fn unsupported_type_falls_back_to_soa() {
        let answers = synth().answers(&name("example.com"), RecordType::SRV, &zone());
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].record_type(), RecordType::SOA);
    }

    #[test]
    fn date_serial_format() {
        assert_eq!(date_serial(datetime!(2023-03-12 10:00 UTC)), 20_230_312);
    }
}
