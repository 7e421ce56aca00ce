use serde::{Deserialize, Serialize};

use crate::base64::url_encode;

/// 所有 ACME 請求載荷必須實作的功能。
pub trait PayloadT: Serialize {
    /// 轉為精簡 JSON。
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 轉為 JWS `payload` 欄位所需的 base64url 字串。
    fn to_base64(&self) -> Result<String, serde_json::Error> {
        Ok(url_encode(self.to_json_string()?))
    }
}

/// 一次簽名請求實際攜帶的內容。
///
/// POST-as-GET 的 `payload` 是空字串，而不是 `{}` 的編碼；兩者伺服器的解讀完全不同。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    /// 已序列化的精簡 JSON。
    Json(String),
    PostAsGet,
}

impl RequestPayload {
    pub fn from_payload<P: PayloadT>(payload: &P) -> Result<Self, serde_json::Error> {
        Ok(RequestPayload::Json(payload.to_json_string()?))
    }

    /// JWS `payload` 欄位值。
    pub fn to_base64(&self) -> String {
        match self {
            RequestPayload::Json(json) => url_encode(json),
            RequestPayload::PostAsGet => String::new(),
        }
    }
}

/// `newAccount` 請求載荷。
///
/// 對已註冊的金鑰重送同樣的請求時，伺服器會回傳既有帳戶，因此可以放心地每次都送出。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAccountPayload {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed")]
    terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    /// `email` 會自動補上 `mailto:` 前綴，若已包含則不重複補充。
    pub fn new(email: Option<&str>) -> Self {
        let contact = match email {
            Some(email) if email.starts_with("mailto:") => vec![email.to_string()],
            Some(email) if !email.is_empty() => vec![format!("mailto:{}", email)],
            _ => Vec::new(),
        };

        NewAccountPayload {
            contact,
            terms_of_service_agreed: true,
        }
    }
}

impl PayloadT for NewAccountPayload {}

/// 憑證涵蓋的識別項。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(domain: &str) -> Self {
        Identifier {
            type_: "dns".to_string(),
            value: domain.to_string(),
        }
    }
}

/// `newOrder` 請求載荷，固定只含一個 DNS 識別項。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    pub fn new(domain: &str) -> Self {
        NewOrderPayload {
            identifiers: vec![Identifier::dns(domain)],
        }
    }
}

impl PayloadT for NewOrderPayload {}

/// 通知伺服器開始驗證挑戰時送出的空物件 `{}`。
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ChallengeValidationPayload {}

impl PayloadT for ChallengeValidationPayload {}

/// finalize 請求載荷，`csr` 為 DER 編碼 CSR 的 base64url。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    csr: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_der: &[u8]) -> Self {
        FinalizeOrderPayload {
            csr: url_encode(csr_der),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {}
