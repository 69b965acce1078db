#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use momentum_feed::error::Result;
use momentum_feed::models::settings::FeedSettings;
use momentum_feed::services::assembler::ResultAssembler;
use momentum_feed::services::transport::{Transport, UpstreamResponse};
use momentum_feed::utils::clock::ManualClock;
use momentum_feed::utils::retry::RetryPolicy;
use momentum_feed::AppState;

/// 按 URL 片段返回预设响应的上游替身，队列只剩一个时重复返回
#[derive(Default)]
pub struct MockUpstream {
    routes: Mutex<Vec<(String, VecDeque<UpstreamResponse>)>>,
    calls: Mutex<Vec<String>>,
}

impl MockUpstream {
    pub fn on(self, fragment: &str, responses: Vec<UpstreamResponse>) -> Self {
        self.routes.lock().unwrap().push((fragment.to_string(), responses.into()));
        self
    }

    pub fn calls(&self, fragment: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| u.contains(fragment)).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn respond(&self, url: &str) -> UpstreamResponse {
        self.calls.lock().unwrap().push(url.to_string());
        let mut routes = self.routes.lock().unwrap();
        for (fragment, queue) in routes.iter_mut() {
            if url.contains(fragment.as_str()) {
                if queue.len() > 1 {
                    return queue.pop_front().unwrap();
                }
                return queue.front().cloned().unwrap();
            }
        }
        UpstreamResponse { status: 404, ..Default::default() }
    }
}

#[async_trait]
impl Transport for MockUpstream {
    async fn get(&self, url: &str, _cookie: Option<&str>) -> Result<UpstreamResponse> {
        Ok(self.respond(url))
    }

    async fn post_form(&self, url: &str, _form: &[(&str, &str)], _cookie: Option<&str>) -> Result<UpstreamResponse> {
        Ok(self.respond(url))
    }
}

pub fn csv(body: &str) -> UpstreamResponse {
    UpstreamResponse {
        status: 200,
        content_type: "text/csv".to_string(),
        set_cookies: vec![],
        body: body.to_string(),
    }
}

pub fn status(code: u16) -> UpstreamResponse {
    UpstreamResponse { status: code, ..Default::default() }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_base: Duration::from_millis(10),
        drift_backoff_base: Duration::from_millis(20),
        attempt_timeout: Duration::from_secs(5),
        deadline: None,
    }
}

pub fn app_state(upstream: Arc<MockUpstream>, cookie: Option<&str>) -> Arc<AppState> {
    let settings = FeedSettings {
        base_url: "https://upstream.test".into(),
        session_cookie: cookie.map(|c| c.to_string()),
        ..Default::default()
    };
    let clock = Arc::new(ManualClock::new(NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()));
    let assembler = ResultAssembler::new(upstream, clock, settings).with_retry_policy(fast_retry());
    Arc::new(AppState { assembler })
}
