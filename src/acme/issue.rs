use crate::acme::key::{dns01_value, AccountKey};
use crate::acme::verify::{certificate_request, verify_chain};
use crate::acme::{
    AcmeAccount, AcmeError, AuthorizationStatus, DynCertificateAuthority, IssueError, Order,
    OrderStatus, Step, StepError, DNS_01,
};
use crate::config::Config;
use crate::store::{normalize_domain, DomainRecord, DynRecordStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};
use trust_dns_server::client::rr::LowerName;

/// Drives issuance attempts against one CA, publishing tokens through one record store.
#[derive(Clone)]
pub struct Issuer {
    ca: DynCertificateAuthority,
    store: DynRecordStore,
    contact: Vec<String>,
    timeout: Duration,
    poll_interval: Duration,
}

fn failed<E: Into<StepError>>(step: Step) -> impl FnOnce(E) -> IssueError {
    move |err| IssueError::Step {
        step,
        source: err.into(),
    }
}

impl Issuer {
    #[must_use]
    pub fn new(ca: DynCertificateAuthority, store: DynRecordStore, config: &Config) -> Self {
        Issuer {
            ca,
            store,
            contact: config.acme_contact.clone(),
            timeout: config.acme_timeout,
            poll_interval: config.acme_poll_interval,
        }
    }

    /// Obtain a certificate for `domain` and store it, with its private key, on the domain's
    /// record. Returns the updated record.
    ///
    /// The challenge token written into the record is left in place if the attempt fails
    /// after publishing it.
    ///
    /// # Errors
    ///
    /// Returns [`IssueError::InvalidInput`] if `domain` isn't a valid name,
    /// [`IssueError::Timeout`] if the CA doesn't finish within the configured deadline, and
    /// [`IssueError::Step`] naming the step that failed otherwise.
    pub async fn issue_certificate(&self, domain: &str) -> Result<DomainRecord, IssueError> {
        let fqdn =
            normalize_domain(domain).map_err(|err| IssueError::InvalidInput(err.to_string()))?;
        let identifiers = vec![fqdn.to_string().trim_end_matches('.').to_string()];
        let deadline = Instant::now() + self.timeout;
        info!(domain = %identifiers[0], "issuing certificate");

        let key = Arc::new(AccountKey::generate().map_err(failed(Step::GenerateAccountKey))?);

        let account = self
            .within(
                Step::Register,
                deadline,
                self.ca.register(Arc::clone(&key), &self.contact),
            )
            .await?;

        let order = self
            .within(Step::CreateOrder, deadline, account.new_order(&identifiers))
            .await?;
        debug!(order = %order.url, "created order");

        let mut authorizations = Vec::with_capacity(order.authorizations.len());
        for url in &order.authorizations {
            let authorization = self
                .within(
                    Step::FetchAuthorizations,
                    deadline,
                    account.authorization(url),
                )
                .await?;
            if authorization.status != AuthorizationStatus::Pending {
                return Err(failed(Step::FetchAuthorizations)(StepError::NotPending {
                    identifier: authorization.identifier.value,
                    status: authorization.status,
                }));
            }
            authorizations.push((url.clone(), authorization));
        }

        let mut challenges = Vec::with_capacity(authorizations.len());
        let mut tokens = Vec::with_capacity(authorizations.len());
        for (url, authorization) in &authorizations {
            let challenge = authorization
                .challenges
                .iter()
                .find(|c| c.kind == DNS_01)
                .ok_or_else(|| {
                    failed(Step::SelectChallenge)(StepError::NoDns01Challenge(
                        authorization.identifier.value.clone(),
                    ))
                })?;
            tokens.push(dns01_value(&key.key_authorization(&challenge.token)));
            challenges.push((url.as_str(), challenge.url.as_str()));
        }

        self.publish_tokens(&fqdn, tokens)
            .await
            .map_err(failed(Step::PublishToken))?;

        for (authorization_url, challenge_url) in challenges {
            self.within(
                Step::AcceptChallenge,
                deadline,
                account.accept_challenge(challenge_url),
            )
            .await?;
            self.await_authorization(account.as_ref(), authorization_url, deadline)
                .await?;
        }

        let order = self.await_order(account.as_ref(), &order.url, deadline).await?;

        let (csr, private_key_pem) =
            certificate_request(&identifiers).map_err(failed(Step::GenerateCertificateKey))?;

        let chain = self
            .finalize(account.as_ref(), &order, &csr, deadline)
            .await?;

        verify_chain(&chain, &identifiers).map_err(failed(Step::VerifyChain))?;

        for (url, _) in &authorizations {
            self.within(
                Step::Cleanup,
                deadline,
                account.deactivate_authorization(url),
            )
            .await?;
        }
        self.within(Step::Cleanup, deadline, account.deactivate())
            .await?;

        let record = self
            .store_certificate(&fqdn, chain, private_key_pem)
            .await
            .map_err(failed(Step::StoreCertificate))?;
        info!(domain = %identifiers[0], "certificate issued");
        Ok(record)
    }

    /// Run one CA call, failing with [`IssueError::Timeout`] if `deadline` passes first.
    async fn within<T>(
        &self,
        step: Step,
        deadline: Instant,
        call: impl Future<Output = Result<T, AcmeError>>,
    ) -> Result<T, IssueError> {
        match timeout_at(deadline, call).await {
            Ok(res) => res.map_err(failed(step)),
            Err(_) => Err(self.timed_out(step)),
        }
    }

    /// Wait one poll interval, unless that would run past `deadline`.
    async fn pause(&self, step: Step, deadline: Instant) -> Result<(), IssueError> {
        if Instant::now() + self.poll_interval >= deadline {
            return Err(self.timed_out(step));
        }
        sleep(self.poll_interval).await;
        Ok(())
    }

    fn timed_out(&self, step: Step) -> IssueError {
        warn!("{step} timed out");
        IssueError::Timeout {
            step,
            limit: self.timeout,
        }
    }

    async fn publish_tokens(
        &self,
        fqdn: &LowerName,
        tokens: Vec<String>,
    ) -> Result<(), crate::error::Error> {
        let mut record = self
            .store
            .get(fqdn)
            .await
            .unwrap_or_else(|| DomainRecord::new(fqdn.clone()));
        record.acme_challenge_tokens = tokens;
        self.store.set(record).await?;
        debug!(domain = %fqdn, "published challenge token");
        Ok(())
    }

    async fn await_authorization(
        &self,
        account: &dyn AcmeAccount,
        url: &str,
        deadline: Instant,
    ) -> Result<(), IssueError> {
        let step = Step::AcceptChallenge;
        loop {
            let authorization = self
                .within(step, deadline, account.authorization(url))
                .await?;
            match authorization.status {
                AuthorizationStatus::Valid => return Ok(()),
                AuthorizationStatus::Pending => self.pause(step, deadline).await?,
                status => {
                    let reason = authorization
                        .challenges
                        .iter()
                        .find(|c| c.kind == DNS_01)
                        .and_then(|c| c.error.as_ref())
                        .map_or_else(String::new, |problem| format!(": {problem}"));
                    return Err(failed(step)(StepError::Rejected(format!(
                        "authorization for {} became {status:?}{reason}",
                        authorization.identifier.value
                    ))));
                }
            }
        }
    }

    async fn await_order(
        &self,
        account: &dyn AcmeAccount,
        url: &str,
        deadline: Instant,
    ) -> Result<Order, IssueError> {
        let step = Step::AwaitOrder;
        loop {
            let order = self.within(step, deadline, account.order(url)).await?;
            match order.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(order),
                OrderStatus::Pending | OrderStatus::Processing => {
                    self.pause(step, deadline).await?;
                }
                OrderStatus::Invalid => {
                    return Err(failed(step)(StepError::Rejected(
                        "order became invalid".to_string(),
                    )))
                }
            }
        }
    }

    /// Submit the CSR, wait for the certificate to be issued and download it.
    async fn finalize(
        &self,
        account: &dyn AcmeAccount,
        order: &Order,
        csr: &[u8],
        deadline: Instant,
    ) -> Result<String, IssueError> {
        let step = Step::Finalize;
        let mut order = self
            .within(step, deadline, account.finalize(order, csr))
            .await?;
        loop {
            match order.status {
                OrderStatus::Valid => break,
                OrderStatus::Invalid => {
                    return Err(failed(step)(StepError::Rejected(
                        "order became invalid after finalizing".to_string(),
                    )))
                }
                _ => {
                    self.pause(step, deadline).await?;
                    order = self.within(step, deadline, account.order(&order.url)).await?;
                }
            }
        }
        let url = order.certificate.ok_or_else(|| {
            failed(step)(StepError::Rejected(
                "valid order has no certificate URL".to_string(),
            ))
        })?;
        self.within(step, deadline, account.certificate(&url)).await
    }

    async fn store_certificate(
        &self,
        fqdn: &LowerName,
        chain: String,
        private_key_pem: String,
    ) -> Result<DomainRecord, crate::error::Error> {
        let mut record = self
            .store
            .get(fqdn)
            .await
            .unwrap_or_else(|| DomainRecord::new(fqdn.clone()));
        record.acme_challenge_tokens.clear();
        record.public_certificate_pem = Some(chain);
        record.private_key_pem = Some(private_key_pem);
        self.store.set(record.clone()).await?;
        Ok(record)
    }
}
