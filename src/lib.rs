//! # ACME DNS-01 Certificate Automation
//!
//! 透過 ACME（RFC 8555，例如 Let's Encrypt）以 DNS-01 驗證為單一網域簽發與續期憑證。
//!
//! 主要模組：
//!
//! - **jws / nonce**: 以帳戶金鑰（ECDSA P-256）簽名請求，並在請求之間傳遞防重放 nonce。
//! - **dns**: [`dns::DnsProvider`] 介面與 [`dns::ChallengeSolver`]，負責建立、等待同步與清理
//!   `_acme-challenge` TXT 記錄；[`cloudflare::CloudflareDns`] 為內建的供應商實作。
//! - **order**: [`order::OrderWorkflow`] 依序完成註冊帳戶、建立訂單、驗證挑戰、finalize 與下載憑證。
//! - **manager**: [`CertificateManager`] 把簽發流程與 [`storage::SecretStore`] 串起來，
//!   提供簽發或續期、讀取目前憑證與依剩餘天數續期三個操作。
//!
//! ## 使用方式
//!
//! ```no_run
//! use acme_dns01::{
//!     cloudflare::CloudflareDns, http::ReqwestClient, poll::ThreadSleeper,
//!     storage::FileSecretStore, AcmeConfig, CertificateManager,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AcmeConfig::from_env()?;
//!     let manager = CertificateManager::new(
//!         ReqwestClient::new()?,
//!         CloudflareDns::new("your-cloudflare-api-token")?,
//!         ThreadSleeper,
//!         FileSecretStore::open("/var/lib/acme")?,
//!         config,
//!     );
//!
//!     let certificate = manager.issue_or_renew("example.com", "your-zone-id")?;
//!     println!("expires at {}", certificate.expires);
//!     Ok(())
//! }
//! ```
//!
//! 所有網路、DNS、等待與儲存都經過 trait，測試時可換成 [`http::ScriptedHttpClient`]、
//! [`dns::MemoryDnsProvider`]、[`poll::RecordingSleeper`] 與 [`storage::MemSecretStore`]。

pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod cloudflare;
pub mod config;
pub mod csr;
pub mod directory;
pub mod dns;
pub mod error;
pub mod http;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod manager;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod poll;
pub mod protection;
pub mod signature;
pub mod storage;

pub use config::AcmeConfig;
pub use error::{AcmeError, Result};
pub use manager::{CertificateManager, CertificateResponse, RenewalOutcome};
