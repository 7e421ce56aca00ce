use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{AcmeError, Problem, Result},
    http::HttpClient,
};

/// ACME 目錄中的附加資訊。
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DirectoryMeta {
    /// 服務條款 URL。
    #[serde(rename = "termsOfService", skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
}

/// 表示 ACME 目錄，包含帳號、nonce、訂單與撤銷憑證相關的 API URL。
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Directory {
    /// 用於取得新 nonce 的 API 路徑（HEAD）。
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    /// 用於新帳號註冊的 API 路徑。
    #[serde(rename = "newAccount")]
    pub new_account: String,
    /// 用於建立訂單的 API 路徑。
    #[serde(rename = "newOrder")]
    pub new_order: String,
    #[serde(rename = "revokeCert", skip_serializing_if = "Option::is_none")]
    pub revoke_cert: Option<String>,
    #[serde(rename = "keyChange", skip_serializing_if = "Option::is_none")]
    pub key_change: Option<String>,
    #[serde(default)]
    pub meta: DirectoryMeta,
}

impl Directory {
    /// 以 GET 取得目錄資料。
    ///
    /// 目錄只在單次簽發流程內使用，不做快取。
    ///
    /// # 錯誤
    ///
    /// 非 2xx 回應為 [`AcmeError::Protocol`]；缺少必要欄位為 [`AcmeError::MalformedResponse`]。
    pub fn fetch<C: HttpClient>(client: &C, url: &str) -> Result<Self> {
        let response = client.get(url)?;
        if !response.is_success() {
            return Err(AcmeError::Protocol(Problem::from_body(
                response.status,
                &response.body,
            )));
        }
        let directory: Directory = serde_json::from_str(&response.body)?;
        debug!(%url, new_order = %directory.new_order, "Fetched ACME directory");
        Ok(directory)
    }
}
