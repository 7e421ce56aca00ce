//! 單一網域的 ACME 簽發流程。
//!
//! 流程嚴格向前推進：註冊帳戶 → 建立訂單 → 取得授權 → 布署 DNS 記錄 → 通知驗證 →
//! 輪詢授權 → finalize → 輪詢訂單 → 下載憑證 → 清理記錄 → 組裝成果。
//! 只有授權與訂單兩個有效性檢查會提前結束流程；任何錯誤都直接中止本次嘗試，不在內部重試。

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    certificate::{CertificateBundle, CertificateBundleAssembler},
    challenge::{dns_txt_value, Authorization, AuthorizationStatus, Challenge},
    config::AcmeConfig,
    csr::generate_key_and_csr,
    directory::Directory,
    dns::{ChallengeSolver, DnsProvider, TxtRecord},
    error::{AcmeError, Problem, Result},
    http::HttpClient,
    key_pair::KeyPair,
    nonce::{AcmeResponse, NonceTransport},
    payload::{
        ChallengeValidationPayload, FinalizeOrderPayload, Identifier, NewAccountPayload,
        NewOrderPayload, RequestPayload,
    },
    poll::{poll_until, PollOutcome, PollStatus, Sleeper},
};

/// 訂單狀態。
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// ACME 訂單資源。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Order {
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    pub identifiers: Vec<Identifier>,
    /// 授權 URL 列表
    pub authorizations: Vec<String>,
    pub finalize: String,
    /// 憑證 URL（僅在有效時存在）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

impl Order {
    fn failure_detail(&self) -> String {
        self.error
            .as_ref()
            .map(|problem| format!("{}: {}", problem.problem_type, problem.detail))
            .unwrap_or_else(|| format!("order status {:?}", self.status))
    }
}

/// 流程目前所在的步驟。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Started,
    AccountReady,
    OrderCreated,
    AuthorizationFetched,
    ChallengeProvisioned,
    ChallengeSubmitted,
    ChallengeValidating,
    OrderFinalizing,
    OrderValidating,
    CertificateDownloaded,
    Cleanup,
    BundleAssembled,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::AccountReady => "account_ready",
            Self::OrderCreated => "order_created",
            Self::AuthorizationFetched => "authorization_fetched",
            Self::ChallengeProvisioned => "challenge_provisioned",
            Self::ChallengeSubmitted => "challenge_submitted",
            Self::ChallengeValidating => "challenge_validating",
            Self::OrderFinalizing => "order_finalizing",
            Self::OrderValidating => "order_validating",
            Self::CertificateDownloaded => "certificate_downloaded",
            Self::Cleanup => "cleanup",
            Self::BundleAssembled => "bundle_assembled",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 單次簽發嘗試在各步驟之間傳遞的狀態。
///
/// 除了帳戶金鑰以外，沒有任何欄位會活得比一次嘗試更久。
#[derive(Debug)]
pub struct OrderContext<'a, C: HttpClient> {
    pub domain: String,
    pub zone_id: String,
    /// 持有目前的 nonce
    pub transport: NonceTransport<C>,
    pub account_key: &'a KeyPair,
    pub account_url: Option<String>,
    pub order_url: Option<String>,
    pub order: Option<Order>,
    pub authorization_url: Option<String>,
    pub authorization: Option<Authorization>,
    pub challenge: Option<Challenge>,
    pub dns_record: Option<TxtRecord>,
    pub state: WorkflowState,
}

impl<'a, C: HttpClient> OrderContext<'a, C> {
    pub fn new(domain: &str, zone_id: &str, transport: NonceTransport<C>, account_key: &'a KeyPair) -> Self {
        Self {
            domain: domain.to_string(),
            zone_id: zone_id.to_string(),
            transport,
            account_key,
            account_url: None,
            order_url: None,
            order: None,
            authorization_url: None,
            authorization: None,
            challenge: None,
            dns_record: None,
            state: WorkflowState::Started,
        }
    }

    fn advance(&mut self, state: WorkflowState) {
        self.state = state;
        info!(domain = %self.domain, %state, "ACME workflow state");
    }

    /// 以帳戶 URL（`kid`）簽名送出請求。
    fn signed(&mut self, url: &str, payload: &RequestPayload) -> Result<AcmeResponse> {
        let kid = self.account_url.as_deref().ok_or_else(|| {
            AcmeError::MalformedResponse("account URL is not known yet".to_string())
        })?;
        self.transport
            .signed_request(url, self.account_key, Some(kid), payload)
    }

    fn post_as_get(&mut self, url: &str) -> Result<AcmeResponse> {
        self.signed(url, &RequestPayload::PostAsGet)
    }
}

/// 驅動一次完整簽發的狀態機。
#[derive(Debug)]
pub struct OrderWorkflow<C, P, S> {
    client: C,
    solver: ChallengeSolver<P, S>,
    sleeper: S,
    config: AcmeConfig,
}

impl<C, P, S> OrderWorkflow<C, P, S>
where
    C: HttpClient,
    P: DnsProvider,
    S: Sleeper + Clone,
{
    pub fn new(client: C, provider: P, sleeper: S, config: AcmeConfig) -> Self {
        let solver = ChallengeSolver::new(provider, sleeper.clone(), config.solver_settings());
        Self {
            client,
            solver,
            sleeper,
            config,
        }
    }

    pub fn config(&self) -> &AcmeConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn provider(&self) -> &P {
        self.solver.provider()
    }

    /// 為 `domain` 簽發一張新憑證。
    ///
    /// # 參數
    ///
    /// - `domain`: 憑證網域。
    /// - `zone_id`: DNS 供應商中該網域所在的 zone。
    /// - `account_key`: 帳戶金鑰；首次使用時會自動註冊。
    ///
    /// # 錯誤
    ///
    /// 授權失敗為 [`AcmeError::ChallengeInvalid`]；授權輪詢逾時為
    /// [`AcmeError::ChallengeTimeout`]，此時不會送出 finalize。
    /// 訂單失敗或逾時分別為 [`AcmeError::OrderInvalid`] 與 [`AcmeError::OrderTimeout`]。
    pub fn issue(&self, domain: &str, zone_id: &str, account_key: &KeyPair) -> Result<CertificateBundle> {
        let directory = Directory::fetch(&self.client, &self.config.directory_url)?;
        let mut transport = NonceTransport::new(&self.client);
        transport.fetch_initial_nonce(&directory.new_nonce)?;
        let mut ctx = OrderContext::new(domain, zone_id, transport, account_key);

        self.register_account(&mut ctx, &directory)?;
        self.create_order(&mut ctx, &directory)?;
        self.fetch_authorization(&mut ctx)?;

        let outcome = self.solve_and_download(&mut ctx);

        if let Some(record) = ctx.dns_record.take() {
            ctx.advance(WorkflowState::Cleanup);
            self.solver.cleanup(&record);
        }
        let (pem_chain, cert_key) = outcome?;

        let bundle = CertificateBundleAssembler::assemble(
            &pem_chain,
            &cert_key.to_pem()?,
            domain,
            &account_key.to_pem()?,
        )?;
        ctx.advance(WorkflowState::BundleAssembled);
        info!(%domain, expires = %bundle.expires, "Certificate issued");
        Ok(bundle)
    }

    /// 從布署挑戰到下載憑證；記錄布署完成後的失敗由 [`Self::issue`] 負責清理 DNS 記錄。
    fn solve_and_download<H: HttpClient>(&self, ctx: &mut OrderContext<'_, H>) -> Result<(String, KeyPair)> {
        self.provision_challenge(ctx)?;
        self.submit_challenge(ctx)?;
        self.await_authorization(ctx)?;
        let cert_key = self.finalize_order(ctx)?;
        let certificate_url = self.await_order(ctx)?;
        let pem_chain = self.download_certificate(ctx, &certificate_url)?;
        Ok((pem_chain, cert_key))
    }

    fn register_account<H: HttpClient>(&self, ctx: &mut OrderContext<'_, H>, directory: &Directory) -> Result<()> {
        let payload = RequestPayload::from_payload(&NewAccountPayload::new(
            self.config.contact.as_deref(),
        ))?;
        let response =
            ctx.transport
                .signed_request(&directory.new_account, ctx.account_key, None, &payload)?;
        let account_url = response.location()?;
        debug!(%account_url, existing = response.status() == 200, "ACME account registered");
        ctx.account_url = Some(account_url);
        ctx.advance(WorkflowState::AccountReady);
        Ok(())
    }

    fn create_order<H: HttpClient>(&self, ctx: &mut OrderContext<'_, H>, directory: &Directory) -> Result<()> {
        let payload = RequestPayload::from_payload(&NewOrderPayload::new(&ctx.domain))?;
        let response = ctx.signed(&directory.new_order, &payload)?;
        let order_url = response.location()?;
        let order: Order = response.json()?;
        if order.status == OrderStatus::Invalid {
            return Err(AcmeError::OrderInvalid {
                detail: order.failure_detail(),
            });
        }
        debug!(%order_url, status = ?order.status, "Order created");
        ctx.order_url = Some(order_url);
        ctx.order = Some(order);
        ctx.advance(WorkflowState::OrderCreated);
        Ok(())
    }

    fn fetch_authorization<H: HttpClient>(&self, ctx: &mut OrderContext<'_, H>) -> Result<()> {
        let authorization_url = ctx
            .order
            .as_ref()
            .and_then(|order| order.authorizations.first().cloned())
            .ok_or_else(|| {
                AcmeError::MalformedResponse("order has no authorization URL".to_string())
            })?;
        let authorization: Authorization = ctx.post_as_get(&authorization_url)?.json()?;
        let challenge = authorization.dns_challenge().cloned().ok_or_else(|| {
            AcmeError::DnsProvision(format!(
                "server offered no dns-01 challenge for '{}'",
                ctx.domain
            ))
        })?;

        ctx.authorization_url = Some(authorization_url);
        ctx.authorization = Some(authorization);
        ctx.challenge = Some(challenge);
        ctx.advance(WorkflowState::AuthorizationFetched);
        Ok(())
    }

    /// 授權已經有效（伺服器沿用先前的驗證結果）時不需要 DNS 記錄。
    fn authorization_reused<H: HttpClient>(ctx: &OrderContext<'_, H>) -> bool {
        ctx.authorization
            .as_ref()
            .is_some_and(|authz| authz.status == AuthorizationStatus::Valid)
    }

    fn provision_challenge<H: HttpClient>(&self, ctx: &mut OrderContext<'_, H>) -> Result<()> {
        if Self::authorization_reused(ctx) {
            debug!(domain = %ctx.domain, "Authorization already valid, skipping DNS-01");
            return Ok(());
        }
        let challenge = ctx
            .challenge
            .as_ref()
            .filter(|challenge| !challenge.token.is_empty())
            .ok_or_else(|| {
                AcmeError::MalformedResponse("dns-01 challenge has no token".to_string())
            })?;
        let key_auth = challenge.key_authorization(&ctx.account_key.thumbprint()?);
        let record = self
            .solver
            .provision(&ctx.domain, &ctx.zone_id, &dns_txt_value(&key_auth))?;
        ctx.dns_record = Some(record);
        ctx.advance(WorkflowState::ChallengeProvisioned);
        Ok(())
    }

    fn submit_challenge<H: HttpClient>(&self, ctx: &mut OrderContext<'_, H>) -> Result<()> {
        if Self::authorization_reused(ctx) {
            return Ok(());
        }
        let challenge_url = ctx
            .challenge
            .as_ref()
            .map(|challenge| challenge.url.clone())
            .ok_or_else(|| AcmeError::MalformedResponse("no dns-01 challenge selected".to_string()))?;
        let payload = RequestPayload::from_payload(&ChallengeValidationPayload::default())?;
        let updated: Challenge = ctx.signed(&challenge_url, &payload)?.json()?;
        debug!(status = ?updated.status, "Challenge submitted");
        ctx.challenge = Some(updated);
        ctx.advance(WorkflowState::ChallengeSubmitted);
        Ok(())
    }

    fn await_authorization<H: HttpClient>(&self, ctx: &mut OrderContext<'_, H>) -> Result<()> {
        if Self::authorization_reused(ctx) {
            return Ok(());
        }
        ctx.advance(WorkflowState::ChallengeValidating);
        let authorization_url = ctx.authorization_url.clone().ok_or_else(|| {
            AcmeError::MalformedResponse("authorization URL is not known".to_string())
        })?;

        let outcome = poll_until(
            self.config.poll,
            &self.sleeper,
            |attempt| {
                let authorization: Authorization = ctx.post_as_get(&authorization_url)?.json()?;
                debug!(attempt, status = ?authorization.status, "Polled authorization");
                Ok::<_, AcmeError>(authorization)
            },
            |authorization| match authorization.status {
                AuthorizationStatus::Valid => PollStatus::Done,
                status if status.is_terminal() => PollStatus::Failed,
                _ => PollStatus::Pending,
            },
        )?;

        match outcome {
            PollOutcome::Done(authorization) => {
                ctx.authorization = Some(authorization);
                Ok(())
            }
            PollOutcome::Failed(authorization) => Err(AcmeError::ChallengeInvalid {
                domain: ctx.domain.clone(),
                detail: authorization.failure_detail(),
            }),
            PollOutcome::Exhausted { attempts } => Err(AcmeError::ChallengeTimeout {
                domain: ctx.domain.clone(),
                attempts,
            }),
        }
    }

    /// 產生全新的憑證金鑰與 CSR 並送出 finalize。
    fn finalize_order<H: HttpClient>(&self, ctx: &mut OrderContext<'_, H>) -> Result<KeyPair> {
        ctx.advance(WorkflowState::OrderFinalizing);
        let finalize_url = ctx
            .order
            .as_ref()
            .map(|order| order.finalize.clone())
            .ok_or_else(|| AcmeError::MalformedResponse("order is not known".to_string()))?;

        let (cert_key, csr_der) = generate_key_and_csr(&ctx.domain)?;
        let payload = RequestPayload::from_payload(&FinalizeOrderPayload::new(&csr_der))?;
        let order: Order = ctx.signed(&finalize_url, &payload)?.json()?;
        if order.status == OrderStatus::Invalid {
            return Err(AcmeError::OrderInvalid {
                detail: order.failure_detail(),
            });
        }
        ctx.order = Some(order);
        Ok(cert_key)
    }

    /// 輪詢訂單直到有效且附有憑證 URL，回傳該 URL。
    fn await_order<H: HttpClient>(&self, ctx: &mut OrderContext<'_, H>) -> Result<String> {
        ctx.advance(WorkflowState::OrderValidating);
        let order_url = ctx
            .order_url
            .clone()
            .ok_or_else(|| AcmeError::MalformedResponse("order URL is not known".to_string()))?;

        let outcome = poll_until(
            self.config.poll,
            &self.sleeper,
            |attempt| {
                let order: Order = ctx.post_as_get(&order_url)?.json()?;
                debug!(attempt, status = ?order.status, "Polled order");
                Ok::<_, AcmeError>(order)
            },
            |order| match (order.status, &order.certificate) {
                (OrderStatus::Valid, Some(_)) => PollStatus::Done,
                (OrderStatus::Invalid, _) => PollStatus::Failed,
                _ => PollStatus::Pending,
            },
        )?;

        match outcome {
            PollOutcome::Done(order) => {
                let certificate_url = order.certificate.clone().unwrap_or_default();
                ctx.order = Some(order);
                Ok(certificate_url)
            }
            PollOutcome::Failed(order) => Err(AcmeError::OrderInvalid {
                detail: order.failure_detail(),
            }),
            PollOutcome::Exhausted { attempts } => Err(AcmeError::OrderTimeout { attempts }),
        }
    }

    fn download_certificate<H: HttpClient>(&self, ctx: &mut OrderContext<'_, H>, certificate_url: &str) -> Result<String> {
        let pem_chain = ctx.post_as_get(certificate_url)?.body().to_string();
        ctx.advance(WorkflowState::CertificateDownloaded);
        Ok(pem_chain)
    }
}
