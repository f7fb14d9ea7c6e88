//! An [RFC-8555][RFC-8555] client over HTTPS.
//!
//! Every request other than directory and nonce fetches is a JWS signed with the account key
//! (ES256). New accounts are identified by their JWK, and every later request by the account
//! URL (`kid`) the CA returned at registration. Reads use POST-as-GET.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555

use crate::acme::key::AccountKey;
use crate::acme::{
    AcmeAccount, AcmeError, Authorization, CertificateAuthority, Order, Problem,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};

const REPLAY_NONCE: &str = "replay-nonce";
const JOSE_JSON: &str = "application/jose+json";
const PEM_CHAIN: &str = "application/pem-certificate-chain";

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct Directory {
    new_nonce: String,
    new_account: String,
    new_order: String,
}

/// A certificate authority reached through its ACME directory URL.
#[derive(Debug, Clone)]
pub struct HttpCertificateAuthority {
    client: Client,
    directory_url: String,
}

impl HttpCertificateAuthority {
    /// # Errors
    ///
    /// Returns [`AcmeError::Http`] if the HTTP client can't be built.
    pub fn new(directory_url: impl Into<String>, timeout: Duration) -> Result<Self, AcmeError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("acmezone/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpCertificateAuthority {
            client,
            directory_url: directory_url.into(),
        })
    }

    async fn directory(&self) -> Result<Directory, AcmeError> {
        let response = self.client.get(&self.directory_url).send().await?;
        Ok(check(response).await?.json().await?)
    }
}

#[async_trait::async_trait]
impl CertificateAuthority for HttpCertificateAuthority {
    async fn register(
        &self,
        key: Arc<AccountKey>,
        contact: &[String],
    ) -> Result<Box<dyn AcmeAccount>, AcmeError> {
        let directory = self.directory().await?;
        let mut session = Session {
            client: self.client.clone(),
            directory,
            key,
            kid: None,
            nonce: Mutex::new(None),
        };

        let contact: Vec<String> = contact
            .iter()
            .map(|c| {
                if c.starts_with("mailto:") {
                    c.clone()
                } else {
                    format!("mailto:{c}")
                }
            })
            .collect();
        let payload = json!({
            "termsOfServiceAgreed": true,
            "contact": contact,
        });
        let url = session.directory.new_account.clone();
        let response = session.post(&url, Some(&payload)).await?;
        let kid = location(&response)?;
        debug!(account = %kid, "registered ACME account");
        session.kid = Some(kid);
        Ok(Box::new(HttpAccount { session }))
    }
}

/// A registered account.
pub struct HttpAccount {
    session: Session,
}

struct Session {
    client: Client,
    directory: Directory,
    key: Arc<AccountKey>,
    kid: Option<String>,
    nonce: Mutex<Option<String>>,
}

impl Session {
    /// POST a JWS to `url`. `None` as payload makes it a POST-as-GET.
    async fn post(&self, url: &str, payload: Option<&Value>) -> Result<Response, AcmeError> {
        self.post_accepting(url, payload, "application/json").await
    }

    async fn post_accepting(
        &self,
        url: &str,
        payload: Option<&Value>,
        accept: &str,
    ) -> Result<Response, AcmeError> {
        let mut retried = false;
        loop {
            let nonce = self.nonce().await?;
            let body = self.sign(url, &nonce, payload)?;
            trace!(%url, "ACME request");
            let response = self
                .client
                .post(url)
                .header(CONTENT_TYPE, JOSE_JSON)
                .header(ACCEPT, accept)
                .body(body)
                .send()
                .await?;
            self.keep_nonce(&response).await;

            if response.status().is_success() {
                return Ok(response);
            }
            let problem = problem(response).await;
            if problem.is_bad_nonce() && !retried {
                debug!(%url, "retrying with a fresh nonce");
                retried = true;
                continue;
            }
            return Err(AcmeError::Problem(problem));
        }
    }

    async fn nonce(&self) -> Result<String, AcmeError> {
        if let Some(nonce) = self.nonce.lock().await.take() {
            return Ok(nonce);
        }
        let response = self.client.head(&self.directory.new_nonce).send().await?;
        let response = check(response).await?;
        header(&response, REPLAY_NONCE)
    }

    async fn keep_nonce(&self, response: &Response) {
        if let Ok(nonce) = header(response, REPLAY_NONCE) {
            *self.nonce.lock().await = Some(nonce);
        }
    }

    fn sign(&self, url: &str, nonce: &str, payload: Option<&Value>) -> Result<String, AcmeError> {
        let mut protected = json!({
            "alg": "ES256",
            "nonce": nonce,
            "url": url,
        });
        match &self.kid {
            Some(kid) => protected["kid"] = json!(kid),
            None => protected["jwk"] = serde_json::to_value(self.key.jwk())?,
        }
        let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected)?);
        let payload = match payload {
            Some(payload) => URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?),
            None => String::new(),
        };
        let signature = self.key.sign(format!("{protected}.{payload}").as_bytes())?;
        Ok(serde_json::to_string(&json!({
            "protected": protected,
            "payload": payload,
            "signature": URL_SAFE_NO_PAD.encode(signature),
        }))?)
    }

    fn kid(&self) -> &str {
        self.kid.as_deref().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl AcmeAccount for HttpAccount {
    async fn new_order(&self, identifiers: &[String]) -> Result<Order, AcmeError> {
        let identifiers: Vec<Value> = identifiers
            .iter()
            .map(|value| json!({"type": "dns", "value": value}))
            .collect();
        let payload = json!({ "identifiers": identifiers });
        let response = self
            .session
            .post(&self.session.directory.new_order, Some(&payload))
            .await?;
        let url = location(&response)?;
        let mut order: Order = response.json().await?;
        order.url = url;
        Ok(order)
    }

    async fn order(&self, url: &str) -> Result<Order, AcmeError> {
        let mut order: Order = self.session.post(url, None).await?.json().await?;
        order.url = url.to_string();
        Ok(order)
    }

    async fn authorization(&self, url: &str) -> Result<Authorization, AcmeError> {
        Ok(self.session.post(url, None).await?.json().await?)
    }

    async fn accept_challenge(&self, url: &str) -> Result<(), AcmeError> {
        self.session.post(url, Some(&json!({}))).await?;
        Ok(())
    }

    async fn finalize(&self, order: &Order, csr_der: &[u8]) -> Result<Order, AcmeError> {
        let payload = json!({ "csr": URL_SAFE_NO_PAD.encode(csr_der) });
        let mut finalized: Order = self
            .session
            .post(&order.finalize, Some(&payload))
            .await?
            .json()
            .await?;
        finalized.url = order.url.clone();
        Ok(finalized)
    }

    async fn certificate(&self, url: &str) -> Result<String, AcmeError> {
        Ok(self
            .session
            .post_accepting(url, None, PEM_CHAIN)
            .await?
            .text()
            .await?)
    }

    async fn deactivate_authorization(&self, url: &str) -> Result<(), AcmeError> {
        self.session
            .post(url, Some(&json!({"status": "deactivated"})))
            .await?;
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), AcmeError> {
        let kid = self.session.kid().to_string();
        self.session
            .post(&kid, Some(&json!({"status": "deactivated"})))
            .await?;
        debug!(account = %kid, "deactivated ACME account");
        Ok(())
    }
}

/// Turn an unsuccessful response into an error.
async fn check(response: Response) -> Result<Response, AcmeError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(AcmeError::Problem(problem(response).await))
    }
}

async fn problem(response: Response) -> Problem {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str(&body).unwrap_or_else(|_| Problem {
        kind: "about:blank".to_string(),
        detail: format!("HTTP {status}: {body}"),
        status: Some(status.as_u16()),
    })
}

fn header(response: &Response, name: &'static str) -> Result<String, AcmeError> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .ok_or(AcmeError::MissingHeader(name))
}

fn location(response: &Response) -> Result<String, AcmeError> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .ok_or(AcmeError::MissingHeader("Location"))
}
