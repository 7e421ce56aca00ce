//! 有上限的輪詢工具，以及可替換的等待實作。

use std::{sync::Mutex, thread, time::Duration};

use tracing::debug;

/// 阻塞等待的抽象，測試時以 [`RecordingSleeper`] 取代真實時間。
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// 以 `std::thread::sleep` 實作的 [`Sleeper`]。
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// 只記錄等待時間、不實際等待的 [`Sleeper`]，通常用於測試。
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依序列出每次被要求等待的時間。
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|sleeps| sleeps.clone())
            .unwrap_or_default()
    }

    /// 模擬經過的總時間。
    pub fn elapsed(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
    }
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// 輪詢間隔與次數上限。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollPolicy {
    /// 每 2 秒一次，最多 30 次。
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 30)
    }
}

/// 單次取得資源後的判定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// 已到達期望狀態
    Done,
    /// 已到達失敗的終結狀態，不再輪詢
    Failed,
    Pending,
}

/// 輪詢結束的方式，附帶最後一次取得的資源。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Done(T),
    Failed(T),
    Exhausted { attempts: u32 },
}

/// 依 `policy` 反覆呼叫 `fetch`，直到 `classify` 判定為終結狀態或次數用盡。
///
/// 先取得再等待；最後一次取得之後不再等待。`fetch` 的錯誤會立即中止輪詢。
pub fn poll_until<T, E, F, C, S>(
    policy: PollPolicy,
    sleeper: &S,
    mut fetch: F,
    classify: C,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut(u32) -> Result<T, E>,
    C: Fn(&T) -> PollStatus,
    S: Sleeper + ?Sized,
{
    for attempt in 1..=policy.max_attempts {
        let resource = fetch(attempt)?;
        match classify(&resource) {
            PollStatus::Done => return Ok(PollOutcome::Done(resource)),
            PollStatus::Failed => return Ok(PollOutcome::Failed(resource)),
            PollStatus::Pending => {
                debug!(attempt, max_attempts = policy.max_attempts, "Resource still pending");
            }
        }
        if attempt < policy.max_attempts {
            sleeper.sleep(policy.interval);
        }
    }
    Ok(PollOutcome::Exhausted {
        attempts: policy.max_attempts,
    })
}
