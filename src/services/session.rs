use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use crate::error::{FeedError, Result};
use crate::models::settings::FeedSettings;
use crate::services::transport::{CookieJar, Transport};
use crate::utils::clock::Clock;

const LOGIN_SEED_PATH: &str = "/login.ashx";
const LOGIN_SUBMIT_PATH: &str = "/login_submit.ashx";

/// 上游会话凭证：不透明的 cookie 串 + 过期时间
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCredential {
    pub cookie: String,
    pub expires_at: Instant,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub raw_cookie: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ttl: Duration,
}

impl SessionConfig {
    pub fn from_settings(settings: &FeedSettings) -> Self {
        let non_empty = |v: &Option<String>| v.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            raw_cookie: non_empty(&settings.session_cookie),
            username: non_empty(&settings.username),
            password: non_empty(&settings.password),
            ttl: settings.session_ttl(),
        }
    }
}

type LoginFuture = Shared<BoxFuture<'static, Result<SessionCredential>>>;

#[derive(Default)]
struct SessionState {
    cached: Option<SessionCredential>,
    inflight: Option<LoginFuture>,
}

/// 进程级会话缓存。
///
/// 凭证在过期前直接复用；过期后优先使用配置里的原始 cookie，否则走登录流程。
/// 登录期间的并发调用共享同一个 in-flight future，不会重复登录。
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    logins: AtomicU32,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        Self {
            transport,
            clock,
            config,
            state: Mutex::new(SessionState::default()),
            logins: AtomicU32::new(0),
        }
    }

    /// 不发请求，仅检查是否具备取得会话的条件
    pub fn ensure_configured(&self) -> Result<()> {
        if self.config.raw_cookie.is_some() {
            return Ok(());
        }
        if self.config.username.is_some() && self.config.password.is_some() {
            return Ok(());
        }
        Err(FeedError::Configuration(
            "未配置 FINVIZ_COOKIE，也未配置 FINVIZ_EMAIL / FINVIZ_PASSWORD".to_string(),
        ))
    }

    pub async fn get_session(&self) -> Result<SessionCredential> {
        let pending = {
            let mut state = self.lock_state();
            if let Some(cred) = &state.cached {
                if self.clock.now() < cred.expires_at {
                    return Ok(cred.clone());
                }
            }

            if let Some(raw) = &self.config.raw_cookie {
                let cred = SessionCredential {
                    cookie: raw.clone(),
                    expires_at: self.clock.now() + self.config.ttl,
                };
                state.cached = Some(cred.clone());
                return Ok(cred);
            }

            self.ensure_configured()?;

            match &state.inflight {
                Some(fut) => fut.clone(),
                None => {
                    let fut = self.start_login();
                    state.inflight = Some(fut.clone());
                    fut
                }
            }
        };

        let result = pending.clone().await;

        let mut state = self.lock_state();
        let is_current = state.inflight.as_ref().map(|f| f.ptr_eq(&pending)).unwrap_or(false);
        if is_current {
            state.inflight = None;
            if let Ok(cred) = &result {
                state.cached = Some(cred.clone());
            }
        }
        result
    }

    /// 丢弃缓存的凭证，下次调用会重新取得
    pub fn invalidate(&self) {
        let mut state = self.lock_state();
        if state.cached.take().is_some() {
            log::info!("会话凭证已失效，下次请求将重新登录");
        }
    }

    /// 实际发起登录的次数
    pub fn login_count(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    fn start_login(&self) -> LoginFuture {
        self.logins.fetch_add(1, Ordering::SeqCst);
        let transport = self.transport.clone();
        let clock = self.clock.clone();
        let config = self.config.clone();
        async move { login(transport.as_ref(), clock.as_ref(), &config).await }
            .boxed()
            .shared()
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 登录流程：GET 登录页拿初始 cookie，再 POST 账号密码，合并两次的 cookie
async fn login(
    transport: &dyn Transport,
    clock: &dyn Clock,
    config: &SessionConfig,
) -> Result<SessionCredential> {
    let (username, password) = match (&config.username, &config.password) {
        (Some(u), Some(p)) => (u.as_str(), p.as_str()),
        _ => {
            return Err(FeedError::Configuration("缺少登录账号或密码".to_string()));
        }
    };

    log::info!("开始登录上游站点");
    let mut jar = CookieJar::default();

    let seed = transport
        .get(&format!("{}{}", config.base_url, LOGIN_SEED_PATH), None)
        .await?;
    jar.merge_set_cookies(&seed.set_cookies);

    let seed_cookie = jar.header_value();
    let form = [("email", username), ("password", password), ("remember", "true")];
    let resp = transport
        .post_form(
            &format!("{}{}", config.base_url, LOGIN_SUBMIT_PATH),
            &form,
            (!seed_cookie.is_empty()).then_some(seed_cookie.as_str()),
        )
        .await?;

    if resp.status == 429 {
        return Err(FeedError::RateLimited);
    }
    if !resp.is_success() && !resp.is_redirect() {
        return Err(FeedError::Authentication(format!("登录返回 HTTP {}", resp.status)));
    }
    if jar.merge_set_cookies(&resp.set_cookies) == 0 {
        return Err(FeedError::Authentication("登录响应未下发会话 cookie，账号或密码可能错误".to_string()));
    }

    log::info!("登录成功，会话有效期 {}s", config.ttl.as_secs());
    Ok(SessionCredential {
        cookie: jar.header_value(),
        expires_at: clock.now() + config.ttl,
    })
}
