use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;

/// 时间来源。会话过期判断、财报日临近判断都通过它取时间，便于测试注入。
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn today(&self) -> NaiveDate;
}

/// 真实时钟。`now` 走 tokio 时钟，因此在 `start_paused` 测试里同样可控。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// 手动推进的时钟
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
    today: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            today: Mutex::new(today),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += by;
        }
    }

    pub fn set_today(&self, date: NaiveDate) {
        if let Ok(mut today) = self.today.lock() {
            *today = date;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().map(|o| *o).unwrap_or_default();
        self.base + offset
    }

    fn today(&self) -> NaiveDate {
        self.today
            .lock()
            .map(|d| *d)
            .unwrap_or_else(|_| chrono::Local::now().date_naive())
    }
}
