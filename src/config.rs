//! 簽發流程的設定值。所有時間與次數都可注入，方便切換 staging 目錄或縮短測試時間。

use std::{env, time::Duration};

use thiserror::Error;

use crate::{dns::SolverSettings, poll::PollPolicy};

/// Let's Encrypt 正式環境目錄。
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt 測試環境目錄。
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

pub const ENV_DIRECTORY_URL: &str = "ACME_DIRECTORY_URL";
pub const ENV_CONTACT: &str = "ACME_CONTACT";
pub const ENV_RENEW_BEFORE_DAYS: &str = "ACME_RENEW_BEFORE_DAYS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("Directory URL must be an http(s) URL: '{0}'")]
    InvalidDirectoryUrl(String),
    #[error("{0} must be greater than zero")]
    ZeroAttempts(&'static str),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// 簽發流程設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmeConfig {
    pub directory_url: String,
    /// 註冊帳戶時附上的聯絡信箱
    pub contact: Option<String>,
    /// 授權與訂單的輪詢設定
    pub poll: PollPolicy,
    /// DNS 供應商同步狀態的輪詢設定
    pub propagation: PollPolicy,
    pub settle_delay: Duration,
    pub record_ttl: u32,
    /// 剩餘天數低於此值才續期
    pub renew_before_days: u32,
}

impl AcmeConfig {
    const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
    const DEFAULT_POLL_ATTEMPTS: u32 = 30;
    const DEFAULT_PROPAGATION_INTERVAL: Duration = Duration::from_secs(5);
    const DEFAULT_PROPAGATION_ATTEMPTS: u32 = 60;
    const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(10);
    const DEFAULT_RECORD_TTL: u32 = 60;
    const DEFAULT_RENEW_BEFORE_DAYS: u32 = 30;

    pub fn builder() -> AcmeConfigBuilder {
        AcmeConfigBuilder::new()
    }

    /// 從環境變數讀取設定，未設定的項目使用預設值。
    ///
    /// 讀取 `ACME_DIRECTORY_URL`、`ACME_CONTACT`、`ACME_RENEW_BEFORE_DAYS`。
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 以任意查詢函式取代環境變數，空字串視為未設定。
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut builder = AcmeConfigBuilder::new();

        if let Some(url) = lookup(ENV_DIRECTORY_URL) {
            builder = builder.directory_url(url.trim());
        }
        if let Some(contact) = lookup(ENV_CONTACT) {
            builder = builder.contact(contact.trim());
        }
        if let Some(days) = lookup(ENV_RENEW_BEFORE_DAYS) {
            let parsed = days
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: ENV_RENEW_BEFORE_DAYS.to_string(),
                    value: days.clone(),
                })?;
            builder = builder.renew_before_days(parsed);
        }
        builder.build()
    }

    /// [`ChallengeSolver`](crate::dns::ChallengeSolver) 使用的設定。
    pub fn solver_settings(&self) -> SolverSettings {
        SolverSettings {
            record_ttl: self.record_ttl,
            propagation: self.propagation,
            settle_delay: self.settle_delay,
        }
    }
}

impl Default for AcmeConfig {
    fn default() -> Self {
        AcmeConfig {
            directory_url: LETS_ENCRYPT_PRODUCTION.to_string(),
            contact: None,
            poll: PollPolicy::new(Self::DEFAULT_POLL_INTERVAL, Self::DEFAULT_POLL_ATTEMPTS),
            propagation: PollPolicy::new(
                Self::DEFAULT_PROPAGATION_INTERVAL,
                Self::DEFAULT_PROPAGATION_ATTEMPTS,
            ),
            settle_delay: Self::DEFAULT_SETTLE_DELAY,
            record_ttl: Self::DEFAULT_RECORD_TTL,
            renew_before_days: Self::DEFAULT_RENEW_BEFORE_DAYS,
        }
    }
}

/// 用於構建 [`AcmeConfig`] 的構造器。
#[derive(Debug, Clone, Default)]
pub struct AcmeConfigBuilder {
    config: AcmeConfig,
}

impl AcmeConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 設置 ACME 目錄 URL，例如 [`LETS_ENCRYPT_STAGING`]。
    pub fn directory_url(mut self, url: &str) -> Self {
        self.config.directory_url = url.to_string();
        self
    }

    pub fn contact(mut self, email: &str) -> Self {
        self.config.contact = Some(email.to_string());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll.interval = interval;
        self
    }

    pub fn poll_attempts(mut self, attempts: u32) -> Self {
        self.config.poll.max_attempts = attempts;
        self
    }

    pub fn propagation_interval(mut self, interval: Duration) -> Self {
        self.config.propagation.interval = interval;
        self
    }

    pub fn propagation_attempts(mut self, attempts: u32) -> Self {
        self.config.propagation.max_attempts = attempts;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    pub fn record_ttl(mut self, ttl: u32) -> Self {
        self.config.record_ttl = ttl;
        self
    }

    pub fn renew_before_days(mut self, days: u32) -> Self {
        self.config.renew_before_days = days;
        self
    }

    /// 驗證並產生 [`AcmeConfig`]。
    ///
    /// # Errors
    ///
    /// 目錄 URL 不是 http(s)，或任何輪詢次數為零時回傳 [`ConfigError`]。
    pub fn build(self) -> Result<AcmeConfig> {
        let config = self.config;
        let url = config.directory_url.as_str();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::InvalidDirectoryUrl(url.to_string()));
        }
        if config.poll.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("poll_attempts"));
        }
        if config.propagation.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("propagation_attempts"));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AcmeConfig::default();
        assert_eq!(config.directory_url, LETS_ENCRYPT_PRODUCTION);
        assert_eq!(config.poll, PollPolicy::new(Duration::from_secs(2), 30));
        assert_eq!(config.propagation, PollPolicy::new(Duration::from_secs(5), 60));
        assert_eq!(config.settle_delay, Duration::from_secs(10));
        assert_eq!(config.record_ttl, 60);
        assert_eq!(config.renew_before_days, 30);
        assert_eq!(config.solver_settings().record_ttl, 60);
    }

    #[test]
    fn test_builder() {
        let config = AcmeConfig::builder()
            .directory_url(LETS_ENCRYPT_STAGING)
            .contact("ops@example.com")
            .poll_interval(Duration::from_millis(10))
            .poll_attempts(5)
            .settle_delay(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(config.directory_url, LETS_ENCRYPT_STAGING);
        assert_eq!(config.contact.as_deref(), Some("ops@example.com"));
        assert_eq!(config.poll, PollPolicy::new(Duration::from_millis(10), 5));
        assert_eq!(config.settle_delay, Duration::ZERO);
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        assert!(matches!(
            AcmeConfig::builder().directory_url("ftp://acme.test").build(),
            Err(ConfigError::InvalidDirectoryUrl(_))
        ));
        assert!(matches!(
            AcmeConfig::builder().poll_attempts(0).build(),
            Err(ConfigError::ZeroAttempts("poll_attempts"))
        ));
    }

    #[test]
    fn test_from_lookup() {
        let config = AcmeConfig::from_lookup(lookup(&[
            (ENV_DIRECTORY_URL, LETS_ENCRYPT_STAGING),
            (ENV_CONTACT, "ops@example.com"),
            (ENV_RENEW_BEFORE_DAYS, "14"),
        ]))
        .unwrap();
        assert_eq!(config.directory_url, LETS_ENCRYPT_STAGING);
        assert_eq!(config.contact.as_deref(), Some("ops@example.com"));
        assert_eq!(config.renew_before_days, 14);
    }

    #[test]
    fn test_from_lookup_empty_values_use_defaults() {
        let config = AcmeConfig::from_lookup(lookup(&[(ENV_CONTACT, "  ")])).unwrap();
        assert_eq!(config, AcmeConfig::default());
    }

    #[test]
    fn test_from_lookup_malformed_number() {
        match AcmeConfig::from_lookup(lookup(&[(ENV_RENEW_BEFORE_DAYS, "soon")])) {
            Err(ConfigError::InvalidValue { key, value }) => {
                assert_eq!(key, ENV_RENEW_BEFORE_DAYS);
                assert_eq!(value, "soon");
            }
            other => panic!("預期 InvalidValue 錯誤，實際為 {other:?}"),
        }
    }
}
