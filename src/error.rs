//! 發行流程對外的錯誤分類。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    certificate::CertificateError,
    config::ConfigError,
    csr::CsrError,
    dns::DnsProviderError,
    http::HttpError,
    jwk::JwkError,
    jws::JwsError,
    key_pair::KeyError,
    signature::SignatureError,
    storage::StorageError,
};

/// 伺服器錯誤主體不是 JSON 時使用的 problem type。
pub const PROBLEM_TYPE_UNKNOWN: &str = "about:blank";

/// ACME 伺服器在錯誤時回傳的 RFC 7807 problem 文件。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Problem {
    #[serde(rename = "type", default = "unknown_problem_type")]
    pub problem_type: String,
    #[serde(default)]
    pub detail: String,
    /// 攜帶此文件之回應的 HTTP 狀態碼。
    #[serde(skip)]
    pub status: u16,
}

fn unknown_problem_type() -> String {
    PROBLEM_TYPE_UNKNOWN.to_string()
}

impl Problem {
    /// 解析 problem 文件；無法解析時以原始主體作為 detail。
    pub fn from_body(status: u16, body: &str) -> Self {
        match serde_json::from_str::<Problem>(body) {
            Ok(mut problem) => {
                problem.status = status;
                problem
            }
            Err(_) => Problem {
                problem_type: unknown_problem_type(),
                detail: body.trim().to_string(),
                status,
            },
        }
    }

    /// 是否為 `urn:ietf:params:acme:error:badNonce`。
    pub fn is_bad_nonce(&self) -> bool {
        self.problem_type.ends_with(":badNonce")
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {} {}: {}", self.status, self.problem_type, self.detail)
    }
}

/// 任何一個都會中止本次發行嘗試，內部不重試。
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("ACME protocol error: {0}")]
    Protocol(Problem),

    /// 網路層失敗
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Challenge validation failed for domain '{domain}': {detail}")]
    ChallengeInvalid { domain: String, detail: String },

    /// 輪詢次數用盡，授權仍未到達終結狀態
    #[error("Challenge validation for domain '{domain}' timed out after {attempts} polls")]
    ChallengeTimeout { domain: String, attempts: u32 },

    #[error("Order failed: {detail}")]
    OrderInvalid { detail: String },

    #[error("Order finalization timed out after {attempts} polls")]
    OrderTimeout { attempts: u32 },

    /// TXT 記錄無法建立，或伺服器未提供 DNS-01 挑戰
    #[error("DNS provisioning failed: {0}")]
    DnsProvision(String),

    #[error("Failed to load account key: {0}")]
    KeyLoad(String),

    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// 該域名尚未簽發過憑證
    #[error("Certificate not found: {id}")]
    NotFound { id: String },

    /// 回應缺少必要的標頭或欄位
    #[error("Malformed ACME response: {0}")]
    MalformedResponse(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, AcmeError>;

impl From<KeyError> for AcmeError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::KeyLoad(msg) => AcmeError::KeyLoad(msg),
            KeyError::UnsupportedKeyType(kind) => AcmeError::UnsupportedKeyType(kind),
            KeyError::Jwk(e) => e.into(),
            KeyError::OpenSSL(e) => AcmeError::Crypto(e.to_string()),
        }
    }
}

impl From<JwkError> for AcmeError {
    fn from(e: JwkError) -> Self {
        match e {
            JwkError::UnsupportedKeyType(kind) => AcmeError::UnsupportedKeyType(kind),
            other => AcmeError::Crypto(other.to_string()),
        }
    }
}

impl From<SignatureError> for AcmeError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::UnsupportedKeyType(kind) => AcmeError::UnsupportedKeyType(kind),
            other => AcmeError::Crypto(other.to_string()),
        }
    }
}

impl From<JwsError> for AcmeError {
    fn from(e: JwsError) -> Self {
        match e {
            JwsError::Jwk(e) => e.into(),
            JwsError::Signature(e) => e.into(),
            other => AcmeError::Crypto(other.to_string()),
        }
    }
}

impl From<DnsProviderError> for AcmeError {
    fn from(e: DnsProviderError) -> Self {
        AcmeError::DnsProvision(e.to_string())
    }
}

impl From<HttpError> for AcmeError {
    fn from(e: HttpError) -> Self {
        AcmeError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for AcmeError {
    fn from(e: serde_json::Error) -> Self {
        AcmeError::MalformedResponse(e.to_string())
    }
}
