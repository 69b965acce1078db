use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};

use crate::error::{FeedError, Result};
use crate::models::settings::FeedSettings;

/// 退避重试策略，全部参数来自配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub drift_backoff_base: Duration,
    /// 单次请求超时
    pub attempt_timeout: Duration,
    /// 整个重试循环的总时限
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_settings(settings: &FeedSettings) -> Self {
        let r = &settings.retry;
        Self {
            max_attempts: r.max_attempts.max(1),
            backoff_base: Duration::from_millis(r.backoff_base_ms),
            drift_backoff_base: Duration::from_millis(r.schema_drift_backoff_ms),
            attempt_timeout: settings.request_timeout(),
            deadline: (r.deadline_ms > 0).then(|| Duration::from_millis(r.deadline_ms)),
        }
    }

    /// 线性退避：第 n 次失败后等待 base * n；拦截页用更长的基数
    pub fn backoff_for(&self, err: &FeedError, attempt: u32) -> Duration {
        let base = match err {
            FeedError::SchemaDrift(_) => self.drift_backoff_base,
            _ => self.backoff_base,
        };
        base * attempt.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&FeedSettings::default())
    }
}

/// 重试循环的结果
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success { value: T, attempts: u32 },
    /// 可重试错误用尽了次数（或超出总时限）
    Exhausted { last_error: FeedError, attempts: u32 },
    /// 不可重试的错误，立即返回
    Fatal(FeedError),
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => *attempts,
            RetryOutcome::Fatal(_) => 1,
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
            RetryOutcome::Fatal(e) => Err(e),
        }
    }
}

/// 有界重试循环。
///
/// `operation` 接收当前尝试序号（从 1 开始）。每次尝试都套一层超时；
/// 仅对 429 / 网络错误 / 格式异常重试，其余错误直接以 `Fatal` 返回。
/// 整个 future 被丢弃时循环随之取消。
pub async fn fetch_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match timeout(policy.attempt_timeout, operation(attempt)).await {
            Ok(r) => r,
            Err(_) => Err(FeedError::TransientNetwork(format!(
                "请求超时 ({}s)",
                policy.attempt_timeout.as_secs_f64()
            ))),
        };

        let err = match result {
            Ok(value) => return RetryOutcome::Success { value, attempts: attempt },
            Err(e) if !e.is_retryable() => return RetryOutcome::Fatal(e),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            log::warn!("{} 重试 {} 次后放弃: {}", label, attempt, err);
            return RetryOutcome::Exhausted { last_error: err, attempts: attempt };
        }

        let delay = policy.backoff_for(&err, attempt);
        if let Some(deadline) = policy.deadline {
            if started.elapsed() + delay > deadline {
                log::warn!("{} 超出总时限，第 {} 次失败后停止: {}", label, attempt, err);
                return RetryOutcome::Exhausted { last_error: err, attempts: attempt };
            }
        }

        log::warn!(
            "{} 请求失败（第 {} 次），{}ms 后重试: {}",
            label,
            attempt,
            delay.as_millis(),
            err
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            drift_backoff_base: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(5),
            deadline: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_exhausts_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = fetch_with_retry(&policy(), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FeedError::RateLimited) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_timing() {
        let start = Instant::now();
        let _: RetryOutcome<()> =
            fetch_with_retry(&policy(), "test", |_| async { Err(FeedError::RateLimited) }).await;
        // 100ms * 1 + 100ms * 2
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_drift_uses_longer_backoff() {
        let start = Instant::now();
        let outcome = fetch_with_retry(&policy(), "test", |attempt| async move {
            if attempt == 1 {
                Err(FeedError::SchemaDrift("text/html".into()))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert!(matches!(outcome, RetryOutcome::Success { value: 2, attempts: 2 }));
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configuration_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = fetch_with_retry(&policy(), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FeedError::Configuration("缺少凭证".into())) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcome, RetryOutcome::Fatal(FeedError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_transient() {
        let mut p = policy();
        p.attempt_timeout = Duration::from_secs(1);
        let outcome: RetryOutcome<()> = fetch_with_retry(&p, "test", |_| async {
            sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        match outcome {
            RetryOutcome::Exhausted { last_error: FeedError::TransientNetwork(_), attempts } => {
                assert_eq!(attempts, 3)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_before_overrun() {
        let mut p = policy();
        p.deadline = Some(Duration::from_millis(150));
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = fetch_with_retry(&p, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FeedError::TransientNetwork("reset".into())) }
        })
        .await;
        // 第一次退避 100ms 在时限内，第二次 200ms 会超出
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.attempts(), 2);
    }
}
