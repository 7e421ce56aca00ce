use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    error::{AcmeError, Problem, Result},
    http::{HttpClient, HttpResponse, REPLAY_NONCE},
    jws::Jws,
    key_pair::KeyPair,
    payload::RequestPayload,
};

/// ACME 回應，附帶常用欄位的取值方法。
#[derive(Debug, Clone)]
pub struct AcmeResponse(pub HttpResponse);

impl AcmeResponse {
    pub fn status(&self) -> u16 {
        self.0.status
    }

    pub fn body(&self) -> &str {
        &self.0.body
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.0.header(name)
    }

    /// `Location` 標頭（帳戶 URL 或訂單 URL）。
    pub fn location(&self) -> Result<String> {
        self.header("location")
            .map(str::to_string)
            .ok_or_else(|| AcmeError::MalformedResponse("missing Location header".to_string()))
    }

    /// 將主體解析為 JSON 資源。
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.0.body)?)
    }
}

/// 帶 nonce 管理的簽名請求傳輸層。
///
/// `nonce` 是唯一權威的防重放狀態：送出請求前就先取走（確保同一個 nonce 不會被使用兩次），
/// 收到任何回應（包含錯誤回應）後立刻以 `Replay-Nonce` 標頭取代。
/// 若回應沒有附帶 nonce，下次請求前會再向 `newNonce` 取一個新的。
#[derive(Debug)]
pub struct NonceTransport<C: HttpClient> {
    client: C,
    nonce: Option<String>,
    new_nonce_url: Option<String>,
}

impl<C: HttpClient> NonceTransport<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            nonce: None,
            new_nonce_url: None,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// 目前持有、尚未使用的 nonce。
    pub fn current_nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// 以 HEAD 請求 `newNonce` 取得起始 nonce。
    pub fn fetch_initial_nonce(&mut self, new_nonce_url: &str) -> Result<()> {
        self.new_nonce_url = Some(new_nonce_url.to_string());
        let response = self.client.head(new_nonce_url)?;
        let nonce = replay_nonce(&response).ok_or_else(|| {
            AcmeError::MalformedResponse("newNonce response has no Replay-Nonce header".to_string())
        })?;
        self.nonce = Some(nonce);
        Ok(())
    }

    /// 送出一次簽名的 ACME 請求。
    ///
    /// # 參數
    ///
    /// - `url`: 目標 URL。
    /// - `key_pair`: 帳戶金鑰。
    /// - `account_url`: 帳戶 URL；`None` 僅用於 `newAccount`。
    /// - `payload`: 請求內容或 POST-as-GET。
    ///
    /// # 錯誤
    ///
    /// 非 2xx 回應轉為 [`AcmeError::Protocol`]，保留伺服器的 problem 文件；
    /// 網路失敗為 [`AcmeError::Transport`]。兩種情況下 nonce 都已更新。
    pub fn signed_request(
        &mut self,
        url: &str,
        key_pair: &KeyPair,
        account_url: Option<&str>,
        payload: &RequestPayload,
    ) -> Result<AcmeResponse> {
        let nonce = self.take_nonce()?;
        let jws = Jws::sign(key_pair, account_url, &nonce, url, payload)?;
        let response = self.client.post_jose(url, jws.to_json()?)?;

        self.nonce = replay_nonce(&response);
        if self.nonce.is_none() {
            warn!(%url, status = response.status, "Response carried no Replay-Nonce header");
        }
        debug!(%url, status = response.status, "Signed ACME request");

        if !response.is_success() {
            return Err(AcmeError::Protocol(Problem::from_body(
                response.status,
                &response.body,
            )));
        }
        Ok(AcmeResponse(response))
    }

    fn take_nonce(&mut self) -> Result<String> {
        if self.nonce.is_none() {
            let url = self.new_nonce_url.clone().ok_or_else(|| {
                AcmeError::MalformedResponse("no anti-replay nonce available".to_string())
            })?;
            self.fetch_initial_nonce(&url)?;
        }
        self.nonce
            .take()
            .ok_or_else(|| AcmeError::MalformedResponse("no anti-replay nonce available".to_string()))
    }
}

fn replay_nonce(response: &HttpResponse) -> Option<String> {
    response
        .header(REPLAY_NONCE)
        .filter(|nonce| !nonce.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::{
        base64::url_decode,
        http::{HttpResponse, ScriptedHttpClient},
    };

    const NEW_NONCE: &str = "https://acme.test/new-nonce";
    const ORDER: &str = "https://acme.test/new-order";

    fn sent_nonces(client: &ScriptedHttpClient) -> Vec<String> {
        client
            .requests()
            .iter()
            .filter_map(|r| r.body.as_ref())
            .map(|body| {
                let jws: Value = serde_json::from_str(body).unwrap();
                let protected = url_decode(jws["protected"].as_str().unwrap()).unwrap();
                let header: Value = serde_json::from_slice(&protected).unwrap();
                header["nonce"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[test]
    fn test_initial_nonce() {
        let client = ScriptedHttpClient::new();
        client.on(
            "HEAD",
            NEW_NONCE,
            HttpResponse::new(200, "").with_header("Replay-Nonce", "abc"),
        );
        let mut transport = NonceTransport::new(client);
        transport.fetch_initial_nonce(NEW_NONCE).unwrap();
        assert_eq!(transport.current_nonce(), Some("abc"));
    }

    #[test]
    fn test_missing_initial_nonce_header() {
        let client = ScriptedHttpClient::new();
        client.on("HEAD", NEW_NONCE, HttpResponse::new(200, "").with_header("Replay-Nonce", ""));
        let mut transport = NonceTransport::new(client);
        assert!(matches!(
            transport.fetch_initial_nonce(NEW_NONCE),
            Err(AcmeError::MalformedResponse(_))
        ));
        assert!(transport.current_nonce().is_none());
    }

    #[test]
    fn test_nonce_rotates_even_after_error_response() {
        let client = ScriptedHttpClient::new();
        client
            .on("HEAD", NEW_NONCE, HttpResponse::new(200, ""))
            .on(
                "POST",
                ORDER,
                HttpResponse::new(
                    400,
                    r#"{"type":"urn:ietf:params:acme:error:malformed","detail":"bad request"}"#,
                ),
            )
            .on("POST", ORDER, HttpResponse::new(201, "{}"));

        let key = KeyPair::generate_p256().unwrap();
        let mut transport = NonceTransport::new(client);
        transport.fetch_initial_nonce(NEW_NONCE).unwrap();

        let err = transport
            .signed_request(ORDER, &key, Some("kid"), &RequestPayload::PostAsGet)
            .unwrap_err();
        match err {
            AcmeError::Protocol(problem) => {
                assert_eq!(problem.status, 400);
                assert_eq!(problem.problem_type, "urn:ietf:params:acme:error:malformed");
                assert_eq!(problem.detail, "bad request");
            }
            other => panic!("預期 Protocol 錯誤，實際為 {other:?}"),
        }

        transport
            .signed_request(ORDER, &key, Some("kid"), &RequestPayload::PostAsGet)
            .unwrap();
        transport
            .signed_request(ORDER, &key, Some("kid"), &RequestPayload::PostAsGet)
            .unwrap();

        let nonces = sent_nonces(transport.client());
        assert_eq!(nonces.len(), 3);
        for pair in nonces.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert_eq!(nonces[0], "nonce-1");
        assert_eq!(nonces[1], "nonce-2");
    }

    #[test]
    fn test_refetches_nonce_when_response_had_none() {
        let client = ScriptedHttpClient::new();
        client
            .on("HEAD", NEW_NONCE, HttpResponse::new(200, ""))
            .on("POST", ORDER, HttpResponse::new(200, "{}").with_header("Replay-Nonce", ""));

        let key = KeyPair::generate_p256().unwrap();
        let mut transport = NonceTransport::new(client);
        transport.fetch_initial_nonce(NEW_NONCE).unwrap();
        transport
            .signed_request(ORDER, &key, Some("kid"), &RequestPayload::PostAsGet)
            .unwrap();
        assert!(transport.current_nonce().is_none());

        transport
            .signed_request(ORDER, &key, Some("kid"), &RequestPayload::PostAsGet)
            .unwrap();
        assert_eq!(transport.client().count("HEAD", NEW_NONCE), 2);

        let nonces = sent_nonces(transport.client());
        assert_ne!(nonces[0], nonces[1]);
    }

    #[test]
    fn test_signed_request_without_any_nonce_source() {
        let key = KeyPair::generate_p256().unwrap();
        let mut transport = NonceTransport::new(ScriptedHttpClient::new());
        let err = transport
            .signed_request(ORDER, &key, None, &RequestPayload::PostAsGet)
            .unwrap_err();
        assert!(matches!(err, AcmeError::MalformedResponse(_)));
        assert!(transport.client().requests().is_empty());
    }

    #[test]
    fn test_transport_failure() {
        let client = ScriptedHttpClient::new();
        client.on("HEAD", NEW_NONCE, HttpResponse::new(200, ""));
        let key = KeyPair::generate_p256().unwrap();
        let mut transport = NonceTransport::new(client);
        transport.fetch_initial_nonce(NEW_NONCE).unwrap();

        let err = transport
            .signed_request("https://acme.test/unknown", &key, Some("kid"), &RequestPayload::PostAsGet)
            .unwrap_err();
        assert!(matches!(err, AcmeError::Transport(_)));
        assert!(transport.current_nonce().is_none());
    }
}
