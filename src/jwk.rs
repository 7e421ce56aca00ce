use openssl::{
    bn::{BigNum, BigNumContext},
    error::ErrorStack,
    sha::sha256,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    base64::url_encode,
    key_pair::{KeyError, KeyPair},
};

/// P-256 座標的固定長度（位元組）。
const P256_COORDINATE_LEN: i32 = 32;

/// JWK 產生與序列化的錯誤。
#[derive(Debug, Error)]
pub enum JwkError {
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),
    #[error("Failed to convert key: {0}")]
    KeyConversion(#[from] ErrorStack),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JwkError {
    fn from_key_error(e: KeyError) -> Self {
        match e {
            KeyError::UnsupportedKeyType(kind) => JwkError::UnsupportedKeyType(kind),
            KeyError::OpenSSL(stack) => JwkError::KeyConversion(stack),
            KeyError::Jwk(inner) => inner,
            KeyError::KeyLoad(msg) => JwkError::UnsupportedKeyType(msg),
        }
    }
}

/// EC 公鑰的 JSON Web Key 表示。
///
/// 欄位宣告順序即為序列化順序，必須保持 `crv`、`kty`、`x`、`y` 的字典序，
/// RFC 7638 thumbprint 直接依賴這個順序。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    crv: String,
    kty: String,
    x: String,
    y: String,
}

impl Jwk {
    /// 由 P-256 金鑰對產生 JWK。
    ///
    /// # 錯誤
    ///
    /// 非 EC P-256 金鑰回傳 [`JwkError::UnsupportedKeyType`]。
    pub fn new(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let ec = key_pair.ec_key().map_err(JwkError::from_key_error)?;

        let mut ctx = BigNumContext::new()?;
        let mut x = BigNum::new()?;
        let mut y = BigNum::new()?;
        ec.public_key()
            .affine_coordinates_gfp(ec.group(), &mut x, &mut y, &mut ctx)?;

        Ok(Jwk {
            crv: "P-256".to_string(),
            kty: "EC".to_string(),
            x: url_encode(x.to_vec_padded(P256_COORDINATE_LEN)?),
            y: url_encode(y.to_vec_padded(P256_COORDINATE_LEN)?),
        })
    }

    /// 以無多餘空白、鍵名字典序的形式序列化，即 thumbprint 的雜湊輸入。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        Ok(serde_json::to_string(self)?)
    }

    /// 計算 RFC 7638 thumbprint：`base64url(SHA-256(canonical JSON))`。
    pub fn thumbprint(&self) -> Result<String, JwkError> {
        let hash = sha256(self.to_acme_json()?.as_bytes());
        Ok(url_encode(hash))
    }
}
