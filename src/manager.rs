//! 對外提供的操作：簽發或續期、讀取目前憑證、依剩餘天數決定是否續期。

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    certificate::{Certificate, CertificateBundle},
    config::AcmeConfig,
    dns::DnsProvider,
    error::{AcmeError, Result},
    http::HttpClient,
    key_pair::AccountKeyManager,
    order::OrderWorkflow,
    poll::Sleeper,
    storage::{SecretStore, StorageError},
};

/// 對外回傳的憑證內容，不含帳戶金鑰。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateResponse {
    pub certificate: String,
    pub chain: String,
    pub private_key: String,
    pub domain: String,
    pub expires: String,
}

impl From<CertificateBundle> for CertificateResponse {
    fn from(bundle: CertificateBundle) -> Self {
        CertificateResponse {
            certificate: bundle.certificate,
            chain: bundle.chain,
            private_key: bundle.private_key,
            domain: bundle.domain,
            expires: bundle.expires,
        }
    }
}

/// 儲存中的文件。每個欄位都可能缺少，例如先前只保存了帳戶金鑰。
#[derive(Debug, Default, Deserialize)]
struct StoredSecret {
    certificate: Option<String>,
    chain: Option<String>,
    private_key: Option<String>,
    domain: Option<String>,
    expires: Option<String>,
    account_key: Option<String>,
}

impl StoredSecret {
    /// 有憑證內容時才轉成對外的回應。
    fn into_response(self, domain: &str) -> Option<CertificateResponse> {
        let certificate = self.certificate.filter(|pem| !pem.trim().is_empty())?;
        Some(CertificateResponse {
            certificate,
            chain: self.chain.unwrap_or_default(),
            private_key: self.private_key.unwrap_or_default(),
            domain: self.domain.unwrap_or_else(|| domain.to_string()),
            expires: self.expires.unwrap_or_default(),
        })
    }
}

/// [`CertificateManager::renew_if_due`] 的結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// 目前的憑證仍在期限內，未做任何事
    Skipped { expires: String },
    Renewed(CertificateResponse),
}

/// 把簽發流程與秘密儲存串在一起。
///
/// 每個網域在儲存中對應一份 JSON 文件（id 即網域名稱），只有在完整組裝出憑證後才會寫入。
/// 同一網域的多個呼叫不會互相排除，需由呼叫端保證序列化。
#[derive(Debug)]
pub struct CertificateManager<C, P, S, St> {
    workflow: OrderWorkflow<C, P, S>,
    store: St,
}

impl<C, P, S, St> CertificateManager<C, P, S, St>
where
    C: HttpClient,
    P: DnsProvider,
    S: Sleeper + Clone,
    St: SecretStore,
{
    pub fn new(client: C, provider: P, sleeper: S, store: St, config: AcmeConfig) -> Self {
        Self {
            workflow: OrderWorkflow::new(client, provider, sleeper, config),
            store,
        }
    }

    pub fn workflow(&self) -> &OrderWorkflow<C, P, S> {
        &self.workflow
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// 簽發新憑證並覆寫儲存中的內容。
    ///
    /// 帳戶金鑰沿用上一次儲存的；沒有時建立新的。已儲存但無法解析的金鑰會回報
    /// [`AcmeError::KeyLoad`]，不會默默換成新帳戶。
    pub fn issue_or_renew(&self, domain: &str, zone_id: &str) -> Result<CertificateResponse> {
        let stored = self.load_secret(domain)?;
        let account_key = AccountKeyManager::load_or_create(stored.account_key.as_deref())?;

        let bundle = self.workflow.issue(domain, zone_id, &account_key)?;

        let document = serde_json::to_string(&bundle)
            .map_err(|e| AcmeError::Storage(StorageError::Corrupted(e.to_string())))?;
        self.store.put(domain, &document)?;
        info!(%domain, expires = %bundle.expires, "Certificate bundle stored");
        Ok(bundle.into())
    }

    /// 讀取目前儲存的憑證。
    ///
    /// # 錯誤
    ///
    /// 尚未簽發過時回傳 [`AcmeError::NotFound`]。
    pub fn fetch_current(&self, domain: &str) -> Result<CertificateResponse> {
        self.load_secret(domain)?
            .into_response(domain)
            .ok_or_else(|| AcmeError::NotFound {
                id: domain.to_string(),
            })
    }

    /// 剩餘天數不足 `renew_before_days` 時才簽發，否則略過。
    ///
    /// 沒有儲存的憑證，或憑證無法解析時一律簽發。
    pub fn renew_if_due(&self, domain: &str, zone_id: &str) -> Result<RenewalOutcome> {
        if let Some(current) = self.load_secret(domain)?.into_response(domain) {
            let threshold = self.workflow.config().renew_before_days;
            match Certificate::new(&current.certificate).and_then(|c| c.should_renew(threshold)) {
                Ok(false) => {
                    info!(%domain, expires = %current.expires, "Certificate not yet due for renewal");
                    return Ok(RenewalOutcome::Skipped {
                        expires: current.expires,
                    });
                }
                Ok(true) => {
                    info!(%domain, expires = %current.expires, threshold, "Certificate due for renewal");
                }
                Err(e) => {
                    warn!(%domain, error = %e, "Stored certificate unreadable, renewing");
                }
            }
        } else {
            info!(%domain, "No stored certificate, issuing");
        }
        self.issue_or_renew(domain, zone_id)
            .map(RenewalOutcome::Renewed)
    }

    /// 讀取儲存的文件；不存在時回傳空的文件，不是 JSON 物件時為
    /// [`StorageError::Corrupted`]。
    fn load_secret(&self, domain: &str) -> Result<StoredSecret> {
        match self.store.get(domain)? {
            Some(document) => serde_json::from_str(&document)
                .map_err(|e| AcmeError::Storage(StorageError::Corrupted(e.to_string()))),
            None => Ok(StoredSecret::default()),
        }
    }
}
