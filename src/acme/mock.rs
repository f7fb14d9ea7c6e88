//! An in-memory certificate authority for tests.

use crate::acme::key::{dns01_value, AccountKey};
use crate::acme::{
    AcmeAccount, AcmeError, Authorization, AuthorizationStatus, CertificateAuthority, Challenge,
    ChallengeStatus, Identifier, Order, OrderStatus, Problem, DNS_01,
};
use crate::store::{normalize_domain, DynRecordStore};
use std::sync::{Arc, Mutex};

/// How the mock CA behaves.
#[derive(Debug, Clone)]
pub(crate) struct Behavior {
    /// Status of freshly created authorizations.
    pub authorization_status: AuthorizationStatus,
    /// Status authorizations move to once their challenge is accepted.
    pub validation_result: AuthorizationStatus,
    pub offer_dns01: bool,
    /// Names on the issued certificate. The order's identifiers when `None`.
    pub certificate_names: Option<Vec<String>>,
    pub fail_deactivation: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior {
            authorization_status: AuthorizationStatus::Pending,
            validation_result: AuthorizationStatus::Valid,
            offer_dns01: true,
            certificate_names: None,
            fail_deactivation: false,
        }
    }
}

/// What the mock CA observed.
#[derive(Debug, Clone, Default)]
pub(crate) struct Log {
    pub registrations: usize,
    /// Challenge tokens stored for the domain when its challenge was accepted.
    pub tokens_at_accept: Vec<String>,
    /// DNS-01 values the registered account key should have published.
    pub expected_tokens: Vec<String>,
    pub deactivated_authorizations: Vec<String>,
    pub account_deactivated: bool,
}

#[derive(Clone)]
pub(crate) struct MockCa {
    behavior: Behavior,
    store: DynRecordStore,
    log: Arc<Mutex<Log>>,
}

impl MockCa {
    pub(crate) fn new(behavior: Behavior, store: DynRecordStore) -> Self {
        MockCa {
            behavior,
            store,
            log: Arc::default(),
        }
    }

    pub(crate) fn log(&self) -> Log {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CertificateAuthority for MockCa {
    async fn register(
        &self,
        key: Arc<AccountKey>,
        _contact: &[String],
    ) -> Result<Box<dyn AcmeAccount>, AcmeError> {
        self.log.lock().unwrap().registrations += 1;
        Ok(Box::new(MockAccount {
            ca: self.clone(),
            key,
            state: Mutex::new(State {
                identifiers: Vec::default(),
                authorization: self.behavior.authorization_status,
                order: OrderStatus::Pending,
            }),
        }))
    }
}

struct MockAccount {
    ca: MockCa,
    key: Arc<AccountKey>,
    state: Mutex<State>,
}

struct State {
    identifiers: Vec<String>,
    authorization: AuthorizationStatus,
    order: OrderStatus,
}

const ORDER_URL: &str = "mock://order/0";
const AUTHORIZATION_URL: &str = "mock://authz/0";
const CHALLENGE_URL: &str = "mock://challenge/0";
const CERTIFICATE_URL: &str = "mock://cert/0";
const DNS_TOKEN: &str = "dns-token";

impl MockAccount {
    fn current_order(&self) -> Order {
        let state = self.state.lock().unwrap();
        Order {
            url: ORDER_URL.to_string(),
            status: state.order,
            identifiers: state
                .identifiers
                .iter()
                .map(|value| Identifier {
                    kind: "dns".to_string(),
                    value: value.clone(),
                })
                .collect(),
            authorizations: vec![AUTHORIZATION_URL.to_string()],
            finalize: format!("{ORDER_URL}/finalize"),
            certificate: (state.order == OrderStatus::Valid).then(|| CERTIFICATE_URL.to_string()),
        }
    }

    fn identifier(&self) -> String {
        self.state
            .lock()
            .unwrap()
            .identifiers
            .first()
            .cloned()
            .unwrap_or_default()
    }
}

fn problem(detail: &str) -> AcmeError {
    AcmeError::Problem(Problem {
        kind: "urn:ietf:params:acme:error:malformed".to_string(),
        detail: detail.to_string(),
        status: Some(400),
    })
}

#[async_trait::async_trait]
impl AcmeAccount for MockAccount {
    async fn new_order(&self, identifiers: &[String]) -> Result<Order, AcmeError> {
        self.state.lock().unwrap().identifiers = identifiers.to_vec();
        Ok(self.current_order())
    }

    async fn order(&self, url: &str) -> Result<Order, AcmeError> {
        if url != ORDER_URL {
            return Err(problem("no such order"));
        }
        Ok(self.current_order())
    }

    async fn authorization(&self, url: &str) -> Result<Authorization, AcmeError> {
        if url != AUTHORIZATION_URL {
            return Err(problem("no such authorization"));
        }
        let status = self.state.lock().unwrap().authorization;
        let mut challenges = vec![Challenge {
            kind: "http-01".to_string(),
            url: "mock://challenge/http".to_string(),
            token: "http-token".to_string(),
            status: ChallengeStatus::Pending,
            error: None,
        }];
        if self.ca.behavior.offer_dns01 {
            challenges.push(Challenge {
                kind: DNS_01.to_string(),
                url: CHALLENGE_URL.to_string(),
                token: DNS_TOKEN.to_string(),
                status: ChallengeStatus::Pending,
                error: None,
            });
        }
        Ok(Authorization {
            identifier: Identifier {
                kind: "dns".to_string(),
                value: self.identifier(),
            },
            status,
            challenges,
        })
    }

    async fn accept_challenge(&self, url: &str) -> Result<(), AcmeError> {
        if url != CHALLENGE_URL {
            return Err(problem("no such challenge"));
        }
        let domain = normalize_domain(&self.identifier()).map_err(|e| problem(&e.to_string()))?;
        let tokens = self
            .ca
            .store
            .get(&domain)
            .await
            .map(|record| record.acme_challenge_tokens)
            .unwrap_or_default();
        let expected = dns01_value(&self.key.key_authorization(DNS_TOKEN));
        let published = tokens.contains(&expected);
        {
            let mut log = self.ca.log.lock().unwrap();
            log.tokens_at_accept.extend(tokens);
            log.expected_tokens.push(expected);
        }
        if !published {
            return Err(problem("DNS-01 value for the account key is not published"));
        }

        let mut state = self.state.lock().unwrap();
        state.authorization = self.ca.behavior.validation_result;
        state.order = match state.authorization {
            AuthorizationStatus::Valid => OrderStatus::Ready,
            AuthorizationStatus::Pending => OrderStatus::Pending,
            _ => OrderStatus::Invalid,
        };
        Ok(())
    }

    async fn finalize(&self, order: &Order, csr_der: &[u8]) -> Result<Order, AcmeError> {
        if csr_der.is_empty() || order.url != ORDER_URL {
            return Err(problem("bad finalize request"));
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.order != OrderStatus::Ready {
                return Err(problem("order is not ready"));
            }
            state.order = OrderStatus::Processing;
        }
        let processing = self.current_order();
        self.state.lock().unwrap().order = OrderStatus::Valid;
        Ok(processing)
    }

    async fn certificate(&self, url: &str) -> Result<String, AcmeError> {
        if url != CERTIFICATE_URL {
            return Err(problem("no such certificate"));
        }
        let names = self
            .ca
            .behavior
            .certificate_names
            .clone()
            .unwrap_or_else(|| self.state.lock().unwrap().identifiers.clone());
        Ok(format!(
            "{}{}",
            self_signed(names),
            self_signed(vec!["intermediate.mock".to_string()])
        ))
    }

    async fn deactivate_authorization(&self, url: &str) -> Result<(), AcmeError> {
        if self.ca.behavior.fail_deactivation {
            return Err(problem("deactivation refused"));
        }
        self.ca
            .log
            .lock()
            .unwrap()
            .deactivated_authorizations
            .push(url.to_string());
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), AcmeError> {
        self.ca.log.lock().unwrap().account_deactivated = true;
        Ok(())
    }
}

fn self_signed(names: Vec<String>) -> String {
    let key = rcgen::KeyPair::generate().unwrap();
    rcgen::CertificateParams::new(names)
        .unwrap()
        .self_signed(&key)
        .unwrap()
        .pem()
}
