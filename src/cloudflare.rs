//! 以 Cloudflare v4 API 實作的 [`DnsProvider`]。

use std::time::Duration;

use reqwest::{
    blocking::{Client, RequestBuilder},
    header::ACCEPT,
    StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::dns::{ChangeStatus, ChangeToken, DnsProvider, DnsProviderError, DnsResult};

/// Cloudflare API 的預設位址。
pub const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4";

/// 用於確認記錄已對外可見的 DNS-over-HTTPS 解析器（JSON 格式）。
pub const CLOUDFLARE_DOH: &str = "https://cloudflare-dns.com/dns-query";

/// 透過 Cloudflare API 管理 TXT 記錄。
///
/// `zone_id` 為 Cloudflare 的 zone 識別碼。變更識別由 `<zone_id>/<record_id>` 組成。
/// API 在建立後立刻就能讀回記錄，無法代表同步完成；因此 `change_status` 另外向
/// DNS-over-HTTPS 解析器查詢，解析結果含有相同內容才回報 `InSync`。
#[derive(Debug, Clone)]
pub struct CloudflareDns {
    client: Client,
    token: String,
    base_url: String,
    resolver_url: String,
}

impl CloudflareDns {
    const TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(token: &str) -> DnsResult<Self> {
        Self::with_base_url(token, CLOUDFLARE_API)
    }

    /// 指定 API 位址，用於代理或測試環境。
    pub fn with_base_url(token: &str, base_url: &str) -> DnsResult<Self> {
        if token.trim().is_empty() {
            return Err(DnsProviderError::Authentication(
                "Cloudflare API token is empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .map_err(|e| DnsProviderError::ApiRequest(e.to_string()))?;
        Ok(Self {
            client,
            token: token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            resolver_url: CLOUDFLARE_DOH.to_string(),
        })
    }

    /// 改用其他支援 `application/dns-json` 的解析器確認同步。
    pub fn with_resolver_url(mut self, resolver_url: &str) -> Self {
        self.resolver_url = resolver_url.to_string();
        self
    }

    fn records_url(&self, zone_id: &str) -> String {
        format!("{}/zones/{}/dns_records", self.base_url, zone_id)
    }

    fn record_url(&self, zone_id: &str, record_id: &str) -> String {
        format!("{}/{}", self.records_url(zone_id), record_id)
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> DnsResult<(StatusCode, CloudflareResponse<T>)> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| DnsProviderError::ApiRequest(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DnsProviderError::Authentication(format!(
                "Cloudflare rejected the API token ({})",
                status
            )));
        }
        let body: CloudflareResponse<T> = response
            .json()
            .map_err(|e| DnsProviderError::ApiRequest(e.to_string()))?;
        Ok((status, body))
    }

    /// 向解析器查詢 `name` 的 TXT 記錄，回傳是否已含有 `content`。
    fn resolver_sees(&self, name: &str, content: &str) -> DnsResult<bool> {
        let answer: DohResponse = self
            .client
            .get(&self.resolver_url)
            .query(&[("name", name), ("type", "TXT")])
            .header(ACCEPT, DNS_JSON)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json())
            .map_err(|e| DnsProviderError::ApiRequest(e.to_string()))?;
        Ok(answer.contains(content))
    }

    /// 列出 `name` 的所有 TXT 記錄。
    fn list_txt_records(&self, zone_id: &str, name: &str) -> DnsResult<Vec<CloudflareDnsRecordItem>> {
        let request = self
            .client
            .get(self.records_url(zone_id))
            .query(&[("type", "TXT"), ("name", name)]);
        let (status, list) = self.send::<Vec<CloudflareDnsRecordItem>>(request)?;
        if status == StatusCode::NOT_FOUND {
            return Err(DnsProviderError::ZoneNotFound {
                zone_id: zone_id.to_string(),
            });
        }
        if !list.success {
            return Err(DnsProviderError::ApiRequest(format_cloudflare_errors(&list.errors)));
        }
        Ok(list.result.unwrap_or_default())
    }

    fn delete_record(&self, zone_id: &str, record: &CloudflareDnsRecordItem) -> DnsResult<()> {
        let request = self.client.delete(self.record_url(zone_id, &record.id));
        let (status, result) = self.send::<serde_json::Value>(request)?;
        if !result.success && status != StatusCode::NOT_FOUND {
            return Err(DnsProviderError::RecordDeletion {
                record_name: record.name.clone(),
                message: format_cloudflare_errors(&result.errors),
            });
        }
        debug!(record = %record.name, id = %record.id, "Cloudflare TXT record deleted");
        Ok(())
    }
}

impl DnsProvider for CloudflareDns {
    fn name(&self) -> &'static str {
        "cloudflare"
    }

    fn upsert_txt(&self, zone_id: &str, name: &str, value: &str, ttl: u32) -> DnsResult<ChangeToken> {
        for record in self.list_txt_records(zone_id, name)? {
            self.delete_record(zone_id, &record)?;
        }

        let record = CloudflareDnsRecord {
            record_type: "TXT".into(),
            name: name.into(),
            content: value.into(),
            ttl,
        };
        let request = self.client.post(self.records_url(zone_id)).json(&record);
        let (_, created) = self.send::<CloudflareDnsRecordItem>(request)?;
        match (created.success, created.result) {
            (true, Some(item)) => Ok(change_token(zone_id, &item.id)),
            _ => Err(DnsProviderError::RecordCreation {
                record_name: name.to_string(),
                message: format_cloudflare_errors(&created.errors),
            }),
        }
    }

    fn change_status(&self, token: &ChangeToken) -> DnsResult<ChangeStatus> {
        let (zone_id, record_id) = parse_change_token(token)?;
        let request = self.client.get(self.record_url(zone_id, record_id));
        let (status, result) = self.send::<CloudflareDnsRecordItem>(request)?;
        if status == StatusCode::NOT_FOUND {
            return Ok(ChangeStatus::Pending);
        }
        let record = match (result.success, result.result) {
            (true, Some(record)) => record,
            (true, None) => return Ok(ChangeStatus::Pending),
            (false, _) => {
                return Err(DnsProviderError::ApiRequest(format_cloudflare_errors(&result.errors)))
            }
        };
        if self.resolver_sees(&record.name, &record.content)? {
            Ok(ChangeStatus::InSync)
        } else {
            debug!(record = %record.name, "TXT record not yet visible to resolver");
            Ok(ChangeStatus::Pending)
        }
    }

    fn delete_txt(&self, zone_id: &str, name: &str, value: &str) -> DnsResult<()> {
        for record in self
            .list_txt_records(zone_id, name)?
            .iter()
            .filter(|record| same_content(&record.content, value))
        {
            self.delete_record(zone_id, record)?;
        }
        Ok(())
    }
}

fn change_token(zone_id: &str, record_id: &str) -> ChangeToken {
    ChangeToken(format!("{}/{}", zone_id, record_id))
}

fn parse_change_token(token: &ChangeToken) -> DnsResult<(&str, &str)> {
    token
        .0
        .split_once('/')
        .filter(|(zone, record)| !zone.is_empty() && !record.is_empty())
        .ok_or_else(|| DnsProviderError::UnknownChange(token.0.clone()))
}

/// Cloudflare 回傳的 TXT 內容可能有或沒有外層引號。
fn same_content(stored: &str, expected: &str) -> bool {
    stored.trim_matches('"') == expected.trim_matches('"')
}

/// 用於格式化 Cloudflare API 回傳的錯誤訊息。
fn format_cloudflare_errors(errors: &[CloudflareError]) -> String {
    if errors.is_empty() {
        return "unknown Cloudflare API error".to_string();
    }
    errors
        .iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 用於在 Cloudflare 上建立 DNS TXT 記錄的資料結構。
#[derive(Debug, Serialize)]
struct CloudflareDnsRecord {
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    content: String,
    ttl: u32,
}

/// Cloudflare API 的共同回應外殼。
#[derive(Debug, Deserialize)]
struct CloudflareResponse<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<CloudflareError>,
}

#[derive(Debug, Deserialize)]
struct CloudflareDnsRecordItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    content: String,
}

const DNS_JSON: &str = "application/dns-json";

/// DNS-over-HTTPS JSON 回應中需要的部分。
#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

impl DohResponse {
    const NOERROR: u32 = 0;
    const TXT: u16 = 16;

    fn contains(&self, content: &str) -> bool {
        self.status == Self::NOERROR
            && self
                .answer
                .iter()
                .any(|a| a.record_type == Self::TXT && same_content(&a.data, content))
    }
}

/// Cloudflare API 錯誤訊息結構。
#[derive(Debug, Deserialize)]
struct CloudflareError {
    code: u32,
    message: String,
}
