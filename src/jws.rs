//! 此模組負責組裝 ACME 請求所需的 flattened JSON Web Signature (JWS)。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    jwk::{Jwk, JwkError},
    key_pair::KeyPair,
    payload::RequestPayload,
    protection::{KeyIdentifier, Protection, ProtectionError},
    signature::{create_signature, SignatureError},
};

/// 與 JWS 組裝相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, JwsError>;

/// flattened 序列化的 JWS 物件，三個欄位皆為 base64url 字串。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

impl Jws {
    /// 以帳戶金鑰簽署一次 ACME 請求。
    ///
    /// # 參數
    ///
    /// - `key_pair`: 帳戶金鑰（P-256）。
    /// - `account_url`: 已註冊時傳入帳戶 URL（保護頭使用 `kid`）；
    ///   `None` 代表 `newAccount` 請求本身，保護頭改為內嵌 `jwk`。
    /// - `nonce`: 本次請求要消耗的 nonce。
    /// - `url`: 請求目標 URL，必須與實際 POST 的 URL 一致。
    /// - `payload`: 請求內容；POST-as-GET 時 `payload` 欄位為空字串。
    pub fn sign(
        key_pair: &KeyPair,
        account_url: Option<&str>,
        nonce: &str,
        url: &str,
        payload: &RequestPayload,
    ) -> Result<Self> {
        let identifier = match account_url {
            Some(kid) => KeyIdentifier::Kid(kid.to_string()),
            None => KeyIdentifier::Jwk(Jwk::new(key_pair)?),
        };

        let protected = Protection::new(identifier)
            .create_header(nonce, url)
            .to_base64()?;
        let payload = payload.to_base64();
        let signature = create_signature(&protected, &payload, key_pair)?;

        Ok(Jws {
            protected,
            payload,
            signature,
        })
    }

    /// 序列化為 `application/jose+json` 請求主體。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use openssl::{bn::BigNum, ecdsa::EcdsaSig, sha::sha256};
    use serde_json::Value;

    use super::*;
    use crate::{
        base64::url_decode,
        payload::{NewAccountPayload, PayloadT},
    };

    fn protected_json(jws: &Jws) -> Value {
        serde_json::from_slice(&url_decode(&jws.protected).unwrap()).unwrap()
    }

    #[test]
    fn test_registration_request_embeds_jwk() {
        let key = KeyPair::generate_p256().unwrap();
        let payload = RequestPayload::from_payload(&NewAccountPayload::new(None)).unwrap();
        let jws = Jws::sign(&key, None, "n-1", "https://acme.test/new-acct", &payload).unwrap();

        let header = protected_json(&jws);
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["nonce"], "n-1");
        assert_eq!(header["url"], "https://acme.test/new-acct");
        assert_eq!(header["jwk"]["crv"], "P-256");
        assert!(header.get("kid").is_none());
        assert_eq!(
            jws.payload,
            NewAccountPayload::new(None).to_base64().unwrap()
        );
    }

    #[test]
    fn test_post_as_get_uses_kid_and_empty_payload() {
        let key = KeyPair::generate_p256().unwrap();
        let jws = Jws::sign(
            &key,
            Some("https://acme.test/acct/7"),
            "n-2",
            "https://acme.test/authz/1",
            &RequestPayload::PostAsGet,
        )
        .unwrap();

        let header = protected_json(&jws);
        assert_eq!(header["kid"], "https://acme.test/acct/7");
        assert!(header.get("jwk").is_none());
        assert_eq!(jws.payload, "");

        let json: Value = serde_json::from_str(&jws.to_json().unwrap()).unwrap();
        assert_eq!(json["payload"], "");
        assert!(json.get("protected").is_some());
    }

    #[test]
    fn test_signature_covers_protected_and_payload() {
        let key = KeyPair::generate_p256().unwrap();
        let payload = RequestPayload::Json("{}".to_string());
        let jws = Jws::sign(&key, Some("kid"), "n-3", "https://acme.test/chall", &payload)
            .unwrap();

        let raw = url_decode(&jws.signature).unwrap();
        let sig = EcdsaSig::from_private_components(
            BigNum::from_slice(&raw[..32]).unwrap(),
            BigNum::from_slice(&raw[32..]).unwrap(),
        )
        .unwrap();
        let digest = sha256(format!("{}.{}", jws.protected, jws.payload).as_bytes());
        assert!(sig.verify(&digest, &key.ec_key().unwrap()).unwrap());
    }
}
