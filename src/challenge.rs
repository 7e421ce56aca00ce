use openssl::sha::sha256;
use serde::{Deserialize, Serialize};

use crate::{
    base64::url_encode,
    error::Problem,
    payload::Identifier,
};

/// DNS-01 挑戰類型字串。
pub const DNS_01: &str = "dns-01";

/// 授權狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    /// 除了 `pending` 以外的狀態都不會再變化。
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// 挑戰狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// 授權中的一個挑戰。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub challenge_type: String,
    pub url: String,
    pub status: ChallengeStatus,
    /// 非 DNS/HTTP 類型的挑戰可能沒有 token
    #[serde(default)]
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<String>,
    /// 驗證失敗時伺服器附上的 problem 文件
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

impl Challenge {
    /// `token` + "." + 帳戶金鑰 thumbprint。
    pub fn key_authorization(&self, thumbprint: &str) -> String {
        key_authorization(&self.token, thumbprint)
    }
}

/// 某個識別項的授權資源。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    pub challenges: Vec<Challenge>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wildcard: bool,
}

impl Authorization {
    /// 選出 `dns-01` 挑戰。
    pub fn dns_challenge(&self) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.challenge_type == DNS_01)
    }

    /// 授權失敗時，整理出可供操作人員判讀的原因。
    ///
    /// 優先採用失敗挑戰所附的 problem 文件，沒有時退回授權狀態本身。
    pub fn failure_detail(&self) -> String {
        self.challenges
            .iter()
            .filter_map(|c| c.error.as_ref())
            .map(|problem| format!("{}: {}", problem.problem_type, problem.detail))
            .next()
            .unwrap_or_else(|| format!("authorization status {:?}", self.status))
    }
}

pub fn key_authorization(token: &str, thumbprint: &str) -> String {
    format!("{}.{}", token, thumbprint)
}

/// DNS-01 的 TXT 記錄值：`base64url(SHA-256(key_authorization))`。
pub fn dns_txt_value(key_authorization: &str) -> String {
    url_encode(sha256(key_authorization.as_bytes()))
}
