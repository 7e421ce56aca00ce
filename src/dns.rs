//! DNS-01 挑戰記錄的建立、同步等待與清理。
//!
//! 實際的 DNS 服務透過 [`DnsProvider`] 介面接入；[`ChallengeSolver`] 負責把
//! 「建立記錄 → 等待供應商同步 → 額外等待擴散」串成一個步驟，並在驗證結束後盡力刪除記錄。

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::Mutex,
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    error::{AcmeError, Result},
    poll::{poll_until, PollOutcome, PollPolicy, PollStatus, Sleeper},
};

/// 挑戰記錄的名稱前綴。
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// 挑戰記錄建議的 TTL（秒）。
pub const CHALLENGE_TTL: u32 = 60;

pub type DnsResult<T> = std::result::Result<T, DnsProviderError>;

/// DNS 供應商操作可能發生的錯誤。
#[derive(Debug, Error)]
pub enum DnsProviderError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Zone not found: '{zone_id}'")]
    ZoneNotFound { zone_id: String },

    #[error("Failed to write TXT record '{record_name}': {message}")]
    RecordCreation { record_name: String, message: String },

    #[error("Failed to delete TXT record '{record_name}': {message}")]
    RecordDeletion { record_name: String, message: String },

    #[error("Unknown change '{0}'")]
    UnknownChange(String),

    #[error("API request failed: {0}")]
    ApiRequest(String),
}

/// 供應商回傳的變更識別，用於查詢同步狀態。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeToken(pub String);

/// 一次記錄變更在供應商端的同步狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Pending,
    InSync,
}

/// 一筆 TXT 記錄。`value` 已含雙引號。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    pub zone_id: String,
    pub name: String,
    pub value: String,
    pub ttl: u32,
}

/// 可建立與刪除 TXT 記錄的 DNS 服務。
pub trait DnsProvider: Debug {
    /// 供應商名稱，僅用於日誌。
    fn name(&self) -> &'static str;

    /// 建立或覆寫 `name` 的 TXT 記錄。
    ///
    /// 同名的舊記錄會被取代，因此前一次殘留的挑戰記錄不影響本次驗證。
    fn upsert_txt(&self, zone_id: &str, name: &str, value: &str, ttl: u32) -> DnsResult<ChangeToken>;

    /// 查詢變更是否已在所有權威伺服器生效。
    fn change_status(&self, token: &ChangeToken) -> DnsResult<ChangeStatus>;

    /// 刪除指定名稱與值的 TXT 記錄；記錄不存在時不視為錯誤。
    fn delete_txt(&self, zone_id: &str, name: &str, value: &str) -> DnsResult<()>;
}

impl<P: DnsProvider + ?Sized> DnsProvider for &P {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn upsert_txt(&self, zone_id: &str, name: &str, value: &str, ttl: u32) -> DnsResult<ChangeToken> {
        (**self).upsert_txt(zone_id, name, value, ttl)
    }

    fn change_status(&self, token: &ChangeToken) -> DnsResult<ChangeStatus> {
        (**self).change_status(token)
    }

    fn delete_txt(&self, zone_id: &str, name: &str, value: &str) -> DnsResult<()> {
        (**self).delete_txt(zone_id, name, value)
    }
}

/// `_acme-challenge.<domain>`；萬用字元網域使用其基底網域。
pub fn challenge_record_name(domain: &str) -> String {
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{}.{}", ACME_CHALLENGE_RECORD, domain.trim_end_matches('.'))
}

/// TXT 記錄值需以雙引號包住。
pub fn quote_txt_value(value: &str) -> String {
    format!("\"{}\"", value.trim_matches('"'))
}

/// [`ChallengeSolver`] 的時間與 TTL 設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverSettings {
    pub record_ttl: u32,
    /// 查詢供應商同步狀態的間隔與上限
    pub propagation: PollPolicy,
    /// 供應商回報同步後的額外等待
    pub settle_delay: Duration,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            record_ttl: CHALLENGE_TTL,
            propagation: PollPolicy::new(Duration::from_secs(5), 60),
            settle_delay: Duration::from_secs(10),
        }
    }
}

/// 布署與清理 DNS-01 挑戰記錄。
///
/// 供應商回報「已同步」只代表權威伺服器已更新，不代表遞迴解析器看得到，
/// 所以同步後一律再等待 `settle_delay` 才回傳。
#[derive(Debug)]
pub struct ChallengeSolver<P, S> {
    provider: P,
    sleeper: S,
    settings: SolverSettings,
}

impl<P: DnsProvider, S: Sleeper> ChallengeSolver<P, S> {
    pub fn new(provider: P, sleeper: S, settings: SolverSettings) -> Self {
        Self {
            provider,
            sleeper,
            settings,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// 建立 `_acme-challenge.<domain>` TXT 記錄並等待生效。
    ///
    /// 同步失敗或逾時時會先盡力刪除剛建立的記錄再回報錯誤。
    ///
    /// # 錯誤
    ///
    /// 供應商錯誤或同步逾時皆為 [`AcmeError::DnsProvision`]。
    pub fn provision(&self, domain: &str, zone_id: &str, txt_value: &str) -> Result<TxtRecord> {
        let (record, token) = self.publish(domain, zone_id, txt_value)?;
        if let Err(e) = self.await_propagation(&token) {
            self.cleanup(&record);
            return Err(e);
        }
        self.settle(domain);
        Ok(record)
    }

    /// 只送出記錄，不等待同步。
    fn publish(&self, domain: &str, zone_id: &str, txt_value: &str) -> Result<(TxtRecord, ChangeToken)> {
        let record = TxtRecord {
            zone_id: zone_id.to_string(),
            name: challenge_record_name(domain),
            value: quote_txt_value(txt_value),
            ttl: self.settings.record_ttl,
        };

        info!(
            %domain,
            record = %record.name,
            provider = self.provider.name(),
            "Creating DNS-01 challenge record"
        );
        let token = self
            .provider
            .upsert_txt(&record.zone_id, &record.name, &record.value, record.ttl)?;
        debug!(%domain, change = %token.0, "DNS record submitted, waiting for provider sync");
        Ok((record, token))
    }

    /// 供應商同步後的額外等待。
    fn settle(&self, domain: &str) {
        info!(
            %domain,
            settle_secs = self.settings.settle_delay.as_secs(),
            "DNS change in sync, waiting for resolvers to settle"
        );
        self.sleeper.sleep(self.settings.settle_delay);
    }

    /// 輪詢供應商直到變更同步。
    fn await_propagation(&self, token: &ChangeToken) -> Result<()> {
        let outcome = poll_until(
            self.settings.propagation,
            &self.sleeper,
            |_| self.provider.change_status(token),
            |status| match status {
                ChangeStatus::InSync => PollStatus::Done,
                ChangeStatus::Pending => PollStatus::Pending,
            },
        )?;
        sync_result(token, outcome)
    }

    /// 盡力刪除挑戰記錄；失敗只記錄警告。
    ///
    /// 殘留的記錄會在下一次續期時被覆寫。回傳是否刪除成功。
    pub fn cleanup(&self, record: &TxtRecord) -> bool {
        match self
            .provider
            .delete_txt(&record.zone_id, &record.name, &record.value)
        {
            Ok(()) => {
                debug!(record = %record.name, "DNS-01 challenge record removed");
                true
            }
            Err(e) => {
                warn!(record = %record.name, error = %e, "Failed to clean up DNS-01 challenge record");
                false
            }
        }
    }
}

/// 只有 `Done` 代表同步完成，其餘一律視為布署失敗。
fn sync_result(token: &ChangeToken, outcome: PollOutcome<ChangeStatus>) -> Result<()> {
    match outcome {
        PollOutcome::Done(_) => Ok(()),
        PollOutcome::Failed(status) => Err(AcmeError::DnsProvision(format!(
            "change {} reported {:?}",
            token.0, status
        ))),
        PollOutcome::Exhausted { attempts } => Err(AcmeError::DnsProvision(format!(
            "change {} not in sync after {} checks",
            token.0, attempts
        ))),
    }
}

#[derive(Debug, Default)]
struct MemoryDnsState {
    records: Vec<TxtRecord>,
    deleted: Vec<TxtRecord>,
    changes: HashMap<ChangeToken, u32>,
    next_change: u64,
    pending_checks: u32,
    status_checks: u32,
    fail_upsert: Option<String>,
    fail_delete: Option<String>,
}

/// 以記憶體保存記錄的 [`DnsProvider`]，通常用於測試。
///
/// 每次變更在回報 `InSync` 之前會先回報 `pending_checks` 次 `Pending`。
#[derive(Debug, Default)]
pub struct MemoryDnsProvider {
    state: Mutex<MemoryDnsState>,
}

impl MemoryDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 設定每次變更回報 `InSync` 前的 `Pending` 次數。
    pub fn with_pending_checks(self, checks: u32) -> Self {
        self.update(|state| state.pending_checks = checks);
        self
    }

    /// 讓之後的 upsert 都失敗。
    pub fn failing_upsert(self, message: &str) -> Self {
        self.update(|state| state.fail_upsert = Some(message.to_string()));
        self
    }

    /// 讓之後的 delete 都失敗。
    pub fn failing_delete(self, message: &str) -> Self {
        self.update(|state| state.fail_delete = Some(message.to_string()));
        self
    }

    /// 目前存在的記錄。
    pub fn records(&self) -> Vec<TxtRecord> {
        self.read(|state| state.records.clone())
    }

    /// 已刪除的記錄（依刪除順序）。
    pub fn deleted(&self) -> Vec<TxtRecord> {
        self.read(|state| state.deleted.clone())
    }

    /// `change_status` 被呼叫的次數。
    pub fn status_checks(&self) -> u32 {
        self.read(|state| state.status_checks)
    }

    fn update(&self, f: impl FnOnce(&mut MemoryDnsState)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }

    fn read<T: Default>(&self, f: impl FnOnce(&MemoryDnsState) -> T) -> T {
        self.state.lock().map(|state| f(&state)).unwrap_or_default()
    }

    fn lock(&self) -> DnsResult<std::sync::MutexGuard<'_, MemoryDnsState>> {
        self.state
            .lock()
            .map_err(|_| DnsProviderError::ApiRequest("memory provider lock poisoned".to_string()))
    }
}

impl DnsProvider for MemoryDnsProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn upsert_txt(&self, zone_id: &str, name: &str, value: &str, ttl: u32) -> DnsResult<ChangeToken> {
        let mut state = self.lock()?;
        if let Some(message) = state.fail_upsert.clone() {
            return Err(DnsProviderError::RecordCreation {
                record_name: name.to_string(),
                message,
            });
        }
        state
            .records
            .retain(|r| !(r.zone_id == zone_id && r.name == name));
        state.records.push(TxtRecord {
            zone_id: zone_id.to_string(),
            name: name.to_string(),
            value: value.to_string(),
            ttl,
        });

        state.next_change += 1;
        let token = ChangeToken(format!("change-{}", state.next_change));
        let pending = state.pending_checks;
        state.changes.insert(token.clone(), pending);
        Ok(token)
    }

    fn change_status(&self, token: &ChangeToken) -> DnsResult<ChangeStatus> {
        let mut state = self.lock()?;
        state.status_checks += 1;
        let remaining = state
            .changes
            .get_mut(token)
            .ok_or_else(|| DnsProviderError::UnknownChange(token.0.clone()))?;
        if *remaining == 0 {
            Ok(ChangeStatus::InSync)
        } else {
            *remaining -= 1;
            Ok(ChangeStatus::Pending)
        }
    }

    fn delete_txt(&self, zone_id: &str, name: &str, value: &str) -> DnsResult<()> {
        let mut state = self.lock()?;
        if let Some(message) = state.fail_delete.clone() {
            return Err(DnsProviderError::RecordDeletion {
                record_name: name.to_string(),
                message,
            });
        }
        let (removed, kept): (Vec<_>, Vec<_>) = state
            .records
            .drain(..)
            .partition(|r| r.zone_id == zone_id && r.name == name && r.value == value);
        state.records = kept;
        state.deleted.extend(removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::RecordingSleeper;

    const ZONE: &str = "Z123";
    const VALUE: &str = "ZaJgFtIV4WA0t2MzN7kbSk0sfRd2GZjaxRqaSTAK6lI";

    #[test]
    fn test_challenge_record_name() {
        assert_eq!(challenge_record_name("example.com"), "_acme-challenge.example.com");
        assert_eq!(challenge_record_name("*.example.com"), "_acme-challenge.example.com");
        assert_eq!(challenge_record_name("sub.example.com."), "_acme-challenge.sub.example.com");
    }

    #[test]
    fn test_quote_txt_value() {
        assert_eq!(quote_txt_value("abc"), "\"abc\"");
        assert_eq!(quote_txt_value("\"abc\""), "\"abc\"");
    }

    #[test]
    fn test_provision_waits_for_sync_then_settles() {
        let provider = MemoryDnsProvider::new().with_pending_checks(2);
        let sleeper = RecordingSleeper::new();
        let solver = ChallengeSolver::new(&provider, &sleeper, SolverSettings::default());

        let record = solver.provision("example.com", ZONE, VALUE).unwrap();
        assert_eq!(record.name, "_acme-challenge.example.com");
        assert_eq!(record.value, format!("\"{VALUE}\""));
        assert_eq!(record.ttl, 60);
        assert_eq!(provider.records(), vec![record]);
        assert_eq!(provider.status_checks(), 3);
        assert_eq!(
            sleeper.sleeps(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(5),
                Duration::from_secs(10)
            ]
        );
    }

    #[test]
    fn test_provision_replaces_stale_record() {
        let provider = MemoryDnsProvider::new();
        provider
            .upsert_txt(ZONE, "_acme-challenge.example.com", "\"stale\"", 60)
            .unwrap();
        let sleeper = RecordingSleeper::new();
        let solver = ChallengeSolver::new(&provider, &sleeper, SolverSettings::default());

        solver.provision("example.com", ZONE, VALUE).unwrap();
        let records = provider.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, format!("\"{VALUE}\""));
    }

    #[test]
    fn test_provision_sync_timeout() {
        let provider = MemoryDnsProvider::new().with_pending_checks(u32::MAX);
        let sleeper = RecordingSleeper::new();
        let settings = SolverSettings {
            propagation: PollPolicy::new(Duration::from_secs(5), 4),
            ..SolverSettings::default()
        };
        let solver = ChallengeSolver::new(&provider, &sleeper, settings);

        let err = solver.provision("example.com", ZONE, VALUE).unwrap_err();
        assert!(matches!(err, AcmeError::DnsProvision(_)));
        assert_eq!(provider.status_checks(), 4);
        assert!(!sleeper.sleeps().contains(&Duration::from_secs(10)));
        // 逾時後剛建立的記錄已被移除
        assert!(provider.records().is_empty());
        assert_eq!(provider.deleted().len(), 1);
    }

    #[test]
    fn test_sync_result_only_accepts_done() {
        let token = ChangeToken("change-1".to_string());
        assert!(sync_result(&token, PollOutcome::Done(ChangeStatus::InSync)).is_ok());
        assert!(matches!(
            sync_result(&token, PollOutcome::Failed(ChangeStatus::Pending)),
            Err(AcmeError::DnsProvision(msg)) if msg.contains("change-1")
        ));
        assert!(matches!(
            sync_result(&token, PollOutcome::Exhausted { attempts: 60 }),
            Err(AcmeError::DnsProvision(msg)) if msg.contains("60 checks")
        ));
    }

    #[test]
    fn test_provision_provider_failure() {
        let provider = MemoryDnsProvider::new().failing_upsert("access denied");
        let sleeper = RecordingSleeper::new();
        let solver = ChallengeSolver::new(&provider, &sleeper, SolverSettings::default());

        match solver.provision("example.com", ZONE, VALUE) {
            Err(AcmeError::DnsProvision(message)) => assert!(message.contains("access denied")),
            other => panic!("預期 DnsProvision 錯誤，實際為 {other:?}"),
        }
        assert!(sleeper.sleeps().is_empty());
    }

    #[test]
    fn test_cleanup_is_best_effort() {
        let provider = MemoryDnsProvider::new();
        let sleeper = RecordingSleeper::new();
        let solver = ChallengeSolver::new(&provider, &sleeper, SolverSettings::default());
        let record = solver.provision("example.com", ZONE, VALUE).unwrap();
        assert!(solver.cleanup(&record));
        assert!(provider.records().is_empty());
        assert_eq!(provider.deleted(), vec![record.clone()]);

        let failing = MemoryDnsProvider::new().failing_delete("throttled");
        let solver = ChallengeSolver::new(&failing, &sleeper, SolverSettings::default());
        assert!(!solver.cleanup(&record));
    }
}
