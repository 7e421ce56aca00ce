use openssl::{ecdsa::EcdsaSig, hash::MessageDigest, sign::Signer};
use thiserror::Error;

use crate::{base64::url_encode, key_pair::KeyPair};

/// ES256 中 `r`、`s` 各自的固定寬度。
const ES256_COMPONENT_LEN: i32 = 32;

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signing error: {0}")]
    Signing(#[from] openssl::error::ErrorStack),
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),
}

/// 以 ECDSA P-256 + SHA-256 簽署資料，回傳 JWS 所需的原始 `r||s`（64 位元組）。
///
/// OpenSSL 產出的是 DER 編碼簽名；JWS 要求兩個整數各自以大端序補零到 32 位元組後串接。
pub fn sign_es256(data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
    key_pair
        .ec_key()
        .map_err(|e| SignatureError::UnsupportedKeyType(e.to_string()))?;

    let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
    signer.update(data)?;
    let der = signer.sign_to_vec()?;

    let sig = EcdsaSig::from_der(&der)?;
    let mut raw = sig.r().to_vec_padded(ES256_COMPONENT_LEN)?;
    raw.extend(sig.s().to_vec_padded(ES256_COMPONENT_LEN)?);
    Ok(raw)
}

/// 對 `"<protected_b64>.<payload_b64>"` 簽名並回傳 base64url 編碼結果。
pub fn create_signature(
    protected_b64: &str,
    payload_b64: &str,
    key_pair: &KeyPair,
) -> Result<String, SignatureError> {
    let signing_input = format!("{}.{}", protected_b64, payload_b64);
    let signature = sign_es256(signing_input.as_bytes(), key_pair)?;
    Ok(url_encode(signature))
}
