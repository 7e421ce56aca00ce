use serde::Serialize;
use thiserror::Error;

use crate::{base64::url_encode, jwk::Jwk};

/// ACME 唯一支援的簽章演算法。
pub const ALG_ES256: &str = "ES256";

/// 定義保護頭產生過程中可能出現的錯誤。
#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, ProtectionError>;

/// 保護頭中用來識別簽章金鑰的方式。
///
/// 註冊帳戶時伺服器尚不知道帳戶 URL，只能內嵌公鑰（`jwk`）；之後的所有請求改用 `kid`。
#[derive(Debug, Clone)]
pub enum KeyIdentifier {
    Jwk(Jwk),
    Kid(String),
}

/// 用於產生保護頭的建構器。
pub struct Protection {
    alg: &'static str,
    identifier: KeyIdentifier,
}

/// JWS 保護頭，序列化後經 base64url 編碼放入 `protected` 欄位。
#[derive(Debug, Serialize)]
pub struct ProtectedHeader {
    alg: &'static str,
    nonce: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl ProtectedHeader {
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn jwk(&self) -> Option<&Jwk> {
        self.jwk.as_ref()
    }

    /// 將保護頭序列化為精簡 JSON 後以 base64url 編碼。
    pub fn to_base64(&self) -> Result<String> {
        Ok(url_encode(serde_json::to_string(self)?))
    }
}

impl Protection {
    pub fn new(identifier: KeyIdentifier) -> Self {
        Self {
            alg: ALG_ES256,
            identifier,
        }
    }

    /// 根據給定的 nonce 與目標 URL 產生保護頭。
    ///
    /// nonce 由呼叫端提供，本結構不持有任何可變狀態。
    pub fn create_header(&self, nonce: &str, url: &str) -> ProtectedHeader {
        let (jwk, kid) = match &self.identifier {
            KeyIdentifier::Jwk(jwk) => (Some(jwk.clone()), None),
            KeyIdentifier::Kid(kid) => (None, Some(kid.clone())),
        };

        ProtectedHeader {
            alg: self.alg,
            nonce: nonce.to_string(),
            url: url.to_string(),
            jwk,
            kid,
        }
    }
}
