use std::result;

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::{KeyPair, CERT_KEY_BITS};

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("Failed to generate certificate key: {0}")]
    KeyGeneration(String),
    #[error("No SAN entries")]
    NoSanEntries,
    #[error("Invalid domain: '{0}'")]
    InvalidDomain(String),
}

/// 為簡化錯誤處理定義 Result 類型
type Result<T> = result::Result<T, CsrError>;

/// CSR 建構器，產生含主體名稱（CN）與主體替代名稱（SAN）的證書簽名請求。
///
/// # 範例
///
/// ```
/// use acme_dns01::{csr::CSR, key_pair::KeyPair};
///
/// let key_pair = KeyPair::generate_rsa(2048).unwrap();
/// let der = CSR::new()
///     .set_common_name("example.com")
///     .set_san("example.com")
///     .build(&key_pair)
///     .unwrap()
///     .to_der()
///     .unwrap();
/// assert!(!der.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct CSR {
    common_name: Option<String>,
    san_entries: Vec<String>,
}

impl CSR {
    pub fn new() -> Self {
        Self::default()
    }

    /// 單一網域的 CSR：CN 與唯一的 SAN 皆為 `domain`。
    pub fn for_domain(domain: &str) -> Self {
        Self::new().set_common_name(domain).set_san(domain)
    }

    /// 設定主體的 common name。
    pub fn set_common_name(mut self, common_name: &str) -> Self {
        self.common_name = Some(common_name.to_string());
        self
    }

    /// 新增一個 DNS 主體替代名稱 (SAN)。
    pub fn set_san(mut self, dns_name: &str) -> Self {
        self.san_entries.push(dns_name.to_string());
        self
    }

    /// 以 SHA-256 簽署並產生 X509 證書簽名請求。
    ///
    /// # 錯誤
    ///
    /// 未設定任何 SAN 時回傳 `CsrError::NoSanEntries`；名稱為空時回傳
    /// `CsrError::InvalidDomain`。
    pub fn build(self, key_pair: &KeyPair) -> Result<X509Req> {
        if self.san_entries.is_empty() {
            return Err(CsrError::NoSanEntries);
        }
        if let Some(empty) = self
            .san_entries
            .iter()
            .chain(self.common_name.iter())
            .find(|name| name.trim().is_empty())
        {
            return Err(CsrError::InvalidDomain(empty.clone()));
        }

        let mut req_builder = X509Req::builder()?;

        if let Some(common_name) = &self.common_name {
            let mut name = X509NameBuilder::new()?;
            name.append_entry_by_text("CN", common_name)?;
            req_builder.set_subject_name(&name.build())?;
        }

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }
}

/// 為本次簽發產生全新的 RSA 憑證金鑰，以及對應 `domain` 的 DER 編碼 CSR。
///
/// 憑證金鑰每次簽發都重新產生，不會跨續期重複使用。
pub fn generate_key_and_csr(domain: &str) -> Result<(KeyPair, Vec<u8>)> {
    let cert_key = KeyPair::generate_rsa(CERT_KEY_BITS)
        .map_err(|e| CsrError::KeyGeneration(e.to_string()))?;
    let der = CSR::for_domain(domain).build(&cert_key)?.to_der()?;
    Ok((cert_key, der))
}
