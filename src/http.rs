//! ACME 通訊使用的 HTTP 介面。
//!
//! 所有網路請求都經過 [`HttpClient`]；正式環境使用 [`ReqwestClient`]，
//! 測試使用可預先編排回應的 [`ScriptedHttpClient`]。

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use reqwest::{
    blocking::Client,
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
};
use thiserror::Error;

/// ACME 規定的 JWS 請求媒體類型。
pub const JOSE_CONTENT_TYPE: &str = "application/jose+json";

/// 防重放 nonce 所在的回應標頭。
pub const REPLAY_NONCE: &str = "replay-nonce";

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("No scripted response for {method} {url}")]
    Unscripted { method: String, url: String },
}

/// 一次 HTTP 回應的完整內容。
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// 附加一個標頭；名稱或值不合法時忽略。
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 取得標頭字串值（名稱不分大小寫）。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// 發送 ACME 所需三種請求的介面。
pub trait HttpClient {
    fn head(&self, url: &str) -> Result<HttpResponse, HttpError>;

    fn get(&self, url: &str) -> Result<HttpResponse, HttpError>;

    /// 以 `application/jose+json` POST 一個已序列化的 JWS。
    fn post_jose(&self, url: &str, body: String) -> Result<HttpResponse, HttpError>;
}

impl<C: HttpClient + ?Sized> HttpClient for &C {
    fn head(&self, url: &str) -> Result<HttpResponse, HttpError> {
        (**self).head(url)
    }

    fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        (**self).get(url)
    }

    fn post_jose(&self, url: &str, body: String) -> Result<HttpResponse, HttpError> {
        (**self).post_jose(url, body)
    }
}

/// 以 `reqwest` 阻塞式用戶端實作的 [`HttpClient`]。
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    const USER_AGENT: &'static str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
    const TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Result<Self, HttpError> {
        let client = Client::builder()
            .user_agent(Self::USER_AGENT)
            .timeout(Self::TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    fn into_response(response: reqwest::blocking::Response) -> Result<HttpResponse, HttpError> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text()?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl HttpClient for ReqwestClient {
    fn head(&self, url: &str) -> Result<HttpResponse, HttpError> {
        Self::into_response(self.client.head(url).send()?)
    }

    fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        Self::into_response(self.client.get(url).send()?)
    }

    fn post_jose(&self, url: &str, body: String) -> Result<HttpResponse, HttpError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
            .body(body)
            .send()?;
        Self::into_response(response)
    }
}

/// [`ScriptedHttpClient`] 記錄下來的一次請求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
}

#[derive(Debug, Default)]
struct Script {
    routes: HashMap<(String, String), VecDeque<HttpResponse>>,
    requests: Vec<RecordedRequest>,
    nonce_counter: u64,
}

/// 模擬 ACME 伺服器的 [`HttpClient`]，通常用於測試。
///
/// 每個 `(method, url)` 有自己的回應佇列；佇列只剩最後一筆時該回應會被重複使用，
/// 方便模擬「一直 pending」的輪詢。HEAD 與 POST 回應若未自行設定 `Replay-Nonce`，
/// 會自動附上遞增且不重複的 nonce。
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    script: Mutex<Script>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 為指定的方法與 URL 追加一筆回應。
    pub fn on(&self, method: &str, url: &str, response: HttpResponse) -> &Self {
        if let Ok(mut script) = self.script.lock() {
            script
                .routes
                .entry((method.to_uppercase(), url.to_string()))
                .or_default()
                .push_back(response);
        }
        self
    }

    /// 目前為止收到的所有請求（依序）。
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script
            .lock()
            .map(|script| script.requests.clone())
            .unwrap_or_default()
    }

    /// 指定 URL 被請求的次數。
    pub fn count(&self, method: &str, url: &str) -> usize {
        let method = method.to_uppercase();
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    fn respond(&self, method: &str, url: &str, body: Option<String>) -> Result<HttpResponse, HttpError> {
        let unscripted = || HttpError::Unscripted {
            method: method.to_string(),
            url: url.to_string(),
        };
        let mut script = self.script.lock().map_err(|_| unscripted())?;
        script.requests.push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            body,
        });

        let queue = script
            .routes
            .get_mut(&(method.to_string(), url.to_string()))
            .ok_or_else(unscripted)?;
        let mut response = if queue.len() > 1 {
            queue.pop_front().ok_or_else(unscripted)?
        } else {
            queue.front().cloned().ok_or_else(unscripted)?
        };

        if method != "GET" && response.header(REPLAY_NONCE).is_none() {
            script.nonce_counter += 1;
            let nonce = format!("nonce-{}", script.nonce_counter);
            response = response.with_header(REPLAY_NONCE, &nonce);
        }
        Ok(response)
    }
}

impl HttpClient for ScriptedHttpClient {
    fn head(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.respond("HEAD", url, None)
    }

    fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.respond("GET", url, None)
    }

    fn post_jose(&self, url: &str, body: String) -> Result<HttpResponse, HttpError> {
        self.respond("POST", url, Some(body))
    }
}
