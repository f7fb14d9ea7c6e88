//! ACME DNS-01 certificate issuance.
//!
//! [`Issuer::issue_certificate`] obtains a domain validated certificate for one managed
//! domain. The DNS-01 validation value is published by writing it into the domain's
//! [`DomainRecord`][crate::store::DomainRecord], from where the [DNS server][crate::dns]
//! serves it as a `TXT` record under `_acme-challenge.<domain>` to the CA's validator.
//!
//! Every attempt uses a fresh account that is deactivated again once the certificate has been
//! issued. Nothing about the attempt is persisted except the token (while the attempt is
//! running) and the issued certificate.
//!
//! The certificate authority sits behind the [`CertificateAuthority`] and [`AcmeAccount`]
//! traits. [`client::HttpCertificateAuthority`] speaks [RFC-8555][RFC-8555] over HTTPS.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod client;
pub mod issue;
pub mod key;
#[cfg(test)]
pub(crate) mod mock;
pub mod verify;

pub use issue::Issuer;
pub use key::AccountKey;

/// The ACME challenge type solved by publishing a `TXT` record.
pub const DNS_01: &str = "dns-01";

#[allow(clippy::module_name_repetitions)]
pub type DynCertificateAuthority = Arc<dyn CertificateAuthority>;

/// A certificate authority accepting new account registrations.
#[async_trait::async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Register a new account for `key`, agreeing to the CA's terms of service.
    async fn register(
        &self,
        key: Arc<AccountKey>,
        contact: &[String],
    ) -> Result<Box<dyn AcmeAccount>, AcmeError>;
}

/// A registered account, used to drive one order through to an issued certificate.
#[async_trait::async_trait]
pub trait AcmeAccount: Send + Sync {
    /// Create an order for the DNS `identifiers`.
    async fn new_order(&self, identifiers: &[String]) -> Result<Order, AcmeError>;

    /// Fetch the current state of the order at `url`.
    async fn order(&self, url: &str) -> Result<Order, AcmeError>;

    async fn authorization(&self, url: &str) -> Result<Authorization, AcmeError>;

    /// Tell the CA the challenge at `url` is ready to be validated.
    async fn accept_challenge(&self, url: &str) -> Result<(), AcmeError>;

    /// Submit a DER encoded CSR to the order's finalize URL.
    async fn finalize(&self, order: &Order, csr_der: &[u8]) -> Result<Order, AcmeError>;

    /// Download the PEM certificate chain at `url`, leaf first.
    async fn certificate(&self, url: &str) -> Result<String, AcmeError>;

    async fn deactivate_authorization(&self, url: &str) -> Result<(), AcmeError>;

    /// Deactivate the account itself. It can't be used afterwards.
    async fn deactivate(&self) -> Result<(), AcmeError>;
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Order {
    /// Where the order can be fetched again. Taken from the `Location` header, not the body.
    #[serde(skip)]
    pub url: String,
    pub status: OrderStatus,
    pub identifiers: Vec<Identifier>,
    pub authorizations: Vec<String>,
    pub finalize: String,
    pub certificate: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    pub challenges: Vec<Challenge>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub token: String,
    pub status: ChallengeStatus,
    pub error: Option<Problem>,
}

/// An [RFC-7807](https://www.rfc-editor.org/rfc/rfc7807) problem document.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub detail: String,
    pub status: Option<u16>,
}

impl Problem {
    /// Whether the problem is the ACME `badNonce` error, which is worth retrying once.
    #[must_use]
    pub fn is_bad_nonce(&self) -> bool {
        self.kind == "urn:ietf:params:acme:error:badNonce"
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.detail)
        }
    }
}

/// Failures talking to a certificate authority.
#[derive(thiserror::Error, Debug)]
pub enum AcmeError {
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    #[error("CA returned an error: {0}")]
    Problem(Problem),

    #[error("CA response is missing the {0} header")]
    MissingHeader(&'static str),

    #[error("invalid JSON from CA")]
    InvalidJSON(#[from] serde_json::Error),

    #[error("account key error: {0}")]
    Key(String),
}

/// The steps of one issuance attempt, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ValidateInput,
    GenerateAccountKey,
    Register,
    CreateOrder,
    FetchAuthorizations,
    SelectChallenge,
    PublishToken,
    AcceptChallenge,
    AwaitOrder,
    GenerateCertificateKey,
    Finalize,
    VerifyChain,
    Cleanup,
    StoreCertificate,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::ValidateInput => "validate input",
            Step::GenerateAccountKey => "generate account key",
            Step::Register => "register account",
            Step::CreateOrder => "create order",
            Step::FetchAuthorizations => "fetch authorizations",
            Step::SelectChallenge => "select dns-01 challenge",
            Step::PublishToken => "publish challenge token",
            Step::AcceptChallenge => "accept challenge",
            Step::AwaitOrder => "await order",
            Step::GenerateCertificateKey => "generate certificate key",
            Step::Finalize => "finalize order",
            Step::VerifyChain => "verify certificate chain",
            Step::Cleanup => "clean up",
            Step::StoreCertificate => "store certificate",
        })
    }
}

/// Why a step failed.
#[derive(thiserror::Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error(transparent)]
    Store(#[from] crate::error::Error),

    #[error(transparent)]
    Verify(#[from] verify::VerifyError),

    #[error("authorization for {identifier} is {status:?}, expected Pending")]
    NotPending {
        identifier: String,
        status: AuthorizationStatus,
    },

    #[error("no dns-01 challenge offered for {0}")]
    NoDns01Challenge(String),

    #[error("{0}")]
    Rejected(String),
}

/// Errors returned by [`Issuer::issue_certificate`].
#[derive(thiserror::Error, Debug)]
pub enum IssueError {
    #[error("invalid certificate request: {0}")]
    InvalidInput(String),

    #[error("{step} failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: StepError,
    },

    #[error("{step} did not complete within {limit:?}")]
    Timeout { step: Step, limit: Duration },
}

impl IssueError {
    #[must_use]
    pub fn step(&self) -> Step {
        match self {
            IssueError::InvalidInput(_) => Step::ValidateInput,
            IssueError::Step { step, .. } | IssueError::Timeout { step, .. } => *step,
        }
    }
}
