use chrono::{DateTime, TimeDelta, Utc};
use openssl::{asn1::Asn1Time, x509::X509};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// PEM 憑證區塊的結束標記。
pub const PEM_END_MARKER: &str = "-----END CERTIFICATE-----";

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("No PEM certificate block found")]
    NoCertificate,
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

/// 自定義結果型別，錯誤類型為 `CertificateError`
type Result<T> = std::result::Result<T, CertificateError>;

/// X.509 證書封裝結構，提供到期時間解析與續約檢查
pub struct Certificate {
    /// 內部使用的 X509 證書對象
    pub cert: X509,
}

impl Certificate {
    /// 從 PEM 字串解析證書；多個區塊時只取第一個。
    pub fn new(pem: &str) -> Result<Self> {
        let cert = X509::from_pem(pem.as_bytes())?;
        Ok(Certificate { cert })
    }

    /// 證書 not-after 欄位（UTC）。
    pub fn not_after_utc(&self) -> Result<DateTime<Utc>> {
        let epoch = Asn1Time::from_unix(0)?;
        let diff = epoch.diff(self.cert.not_after())?;
        let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
        DateTime::from_timestamp(seconds, 0).ok_or(CertificateError::InvalidTimestamp)
    }

    /// 剩餘有效時間是否已不足 `threshold_days` 天（已過期也算）。
    pub fn should_renew(&self, threshold_days: u32) -> Result<bool> {
        self.should_renew_at(threshold_days, Utc::now())
    }

    /// 以指定的「現在」判斷是否需要續約。
    pub fn should_renew_at(&self, threshold_days: u32, now: DateTime<Utc>) -> Result<bool> {
        let remaining = self.not_after_utc()? - now;
        Ok(remaining <= TimeDelta::days(i64::from(threshold_days)))
    }
}

/// 將 PEM 串流拆成葉憑證與中繼鏈。
///
/// 葉憑證為第一個區塊（含結束標記與換行）；其餘區塊以結束標記重新接合並以換行結尾，
/// 沒有其他區塊時鏈為空字串。
pub fn split_pem_chain(pem: &str) -> Result<(String, String)> {
    let mut parts = pem.split(PEM_END_MARKER);
    let first = parts.next().unwrap_or_default();
    if !pem.contains(PEM_END_MARKER) {
        return Err(CertificateError::NoCertificate);
    }

    let leaf = format!("{}{}\n", first.trim_start(), PEM_END_MARKER);
    let rest = parts.collect::<Vec<_>>().join(PEM_END_MARKER);
    let rest = rest.trim();
    let chain = if rest.is_empty() {
        String::new()
    } else {
        format!("{}\n", rest)
    };
    Ok((leaf, chain))
}

/// 一次成功簽發的成果。
///
/// 序列化格式即為秘密儲存中的 JSON 文件；`account_key` 僅供下次續期使用，不對外提供。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    pub certificate: String,
    pub chain: String,
    pub private_key: String,
    pub domain: String,
    /// 葉憑證 not-after，RFC 3339 UTC
    pub expires: String,
    pub account_key: String,
}

/// 組裝 [`CertificateBundle`]。
pub struct CertificateBundleAssembler;

impl CertificateBundleAssembler {
    /// # 參數
    ///
    /// - `pem_chain`: 下載到的 PEM 串流（葉憑證 + 中繼鏈）。
    /// - `private_key_pem`: 本次產生的憑證私鑰。
    /// - `domain`: 憑證網域。
    /// - `account_key_pem`: 帳戶金鑰。
    pub fn assemble(
        pem_chain: &str,
        private_key_pem: &str,
        domain: &str,
        account_key_pem: &str,
    ) -> Result<CertificateBundle> {
        let (certificate, chain) = split_pem_chain(pem_chain)?;
        let expires = Certificate::new(&certificate)?.not_after_utc()?;
        Ok(CertificateBundle {
            certificate,
            chain,
            private_key: private_key_pem.to_string(),
            domain: domain.to_string(),
            expires: expires.to_rfc3339(),
            account_key: account_key_pem.to_string(),
        })
    }
}
