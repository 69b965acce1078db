use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 运行配置。所有字段都有默认值，配置文件里只需写要覆盖的部分。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 直接提供的会话 cookie，优先于账号密码登录
    #[serde(default)]
    pub session_cookie: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default = "default_themes")]
    pub themes: Vec<ThemeDefinition>,
    /// 额外的表头别名：规范字段名 -> 上游列名列表，追加在内置别名之后
    #[serde(default)]
    pub extra_aliases: HashMap<String, Vec<String>>,
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default = "default_watchlist_cap")]
    pub watchlist_cap: usize,
    #[serde(default = "default_watchlist_batch")]
    pub watchlist_batch_size: usize,
    #[serde(default = "default_universe_batch")]
    pub universe_batch_size: usize,
    #[serde(default = "default_inter_batch_delay")]
    pub inter_batch_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    /// 拿到 HTML 拦截页时的退避基数，通常比 429 更长
    #[serde(default = "default_drift_backoff")]
    pub schema_drift_backoff_ms: u64,
    /// 单次重试循环的总时限，0 表示不限制
    #[serde(default)]
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThemeDefinition {
    pub name: String,
    pub tickers: Vec<String>,
}

fn default_base_url() -> String { "https://elite.finviz.com".to_string() }
fn default_session_ttl() -> u64 { 30 * 60 }
fn default_request_timeout() -> u64 { 15 }
fn default_watchlist_cap() -> usize { 30 }
fn default_watchlist_batch() -> usize { 50 }
fn default_universe_batch() -> usize { 200 }
fn default_inter_batch_delay() -> u64 { 1200 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_base() -> u64 { 2000 }
fn default_drift_backoff() -> u64 { 5000 }
fn default_bind() -> String { "0.0.0.0:8787".to_string() }

fn default_themes() -> Vec<ThemeDefinition> {
    let theme = |name: &str, tickers: &[&str]| ThemeDefinition {
        name: name.to_string(),
        tickers: tickers.iter().map(|t| t.to_string()).collect(),
    };
    vec![
        theme("AI Semis", &["NVDA", "AMD", "AVGO", "MRVL", "ARM", "SMCI", "TSM", "MU"]),
        theme("Cybersecurity", &["CRWD", "PANW", "ZS", "FTNT", "S", "NET", "OKTA"]),
        theme("Nuclear & Uranium", &["CCJ", "CEG", "VST", "SMR", "OKLO", "LEU", "NNE"]),
        theme("Crypto Miners", &["MARA", "RIOT", "CLSK", "HUT", "CIFR", "WULF", "COIN"]),
        theme("Space", &["RKLB", "ASTS", "LUNR", "PL", "RDW", "BKSY"]),
        theme("Quantum", &["IONQ", "RGTI", "QBTS", "QUBT"]),
        theme("Biotech Leaders", &["VKTX", "LLY", "NVO", "MDGL", "ALNY", "VRTX"]),
    ]
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            watchlist_cap: default_watchlist_cap(),
            watchlist_batch_size: default_watchlist_batch(),
            universe_batch_size: default_universe_batch(),
            inter_batch_delay_ms: default_inter_batch_delay(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            schema_drift_backoff_ms: default_drift_backoff(),
            deadline_ms: 0,
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            session_cookie: None,
            username: None,
            password: None,
            session_ttl_secs: default_session_ttl(),
            request_timeout_secs: default_request_timeout(),
            batch: BatchSettings::default(),
            retry: RetrySettings::default(),
            themes: default_themes(),
            extra_aliases: HashMap::new(),
            bind: default_bind(),
        }
    }
}

impl FeedSettings {
    /// 读取配置：先读 `MOMENTUM_FEED_CONFIG` 指向的 JSON 文件（可选），再用环境变量覆盖
    pub fn load() -> Result<Self> {
        let mut settings = match std::env::var("MOMENTUM_FEED_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("配置文件格式错误: {}", path.display()))
    }

    /// 环境变量覆盖，空字符串视为未设置
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("FINVIZ_COOKIE") {
            self.session_cookie = Some(v);
        }
        if let Some(v) = get("FINVIZ_EMAIL") {
            self.username = Some(v);
        }
        if let Some(v) = get("FINVIZ_PASSWORD") {
            self.password = Some(v);
        }
        if let Some(v) = get("FINVIZ_BASE_URL") {
            self.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("MOMENTUM_FEED_BIND") {
            self.bind = v;
        }
    }

    /// 是否至少配置了一种取得会话的方式
    pub fn has_credentials(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        filled(&self.session_cookie) || (filled(&self.username) && filled(&self.password))
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch.inter_batch_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let s: FeedSettings = serde_json::from_str(r#"{"batch": {"universe_batch_size": 100}}"#).unwrap();
        assert_eq!(s.batch.universe_batch_size, 100);
        assert_eq!(s.batch.watchlist_cap, 30);
        assert_eq!(s.batch.watchlist_batch_size, 50);
        assert_eq!(s.retry.max_attempts, 3);
        assert!(!s.themes.is_empty());
        assert!(!s.has_credentials());
    }

    #[test]
    fn test_env_overrides() {
        let mut s = FeedSettings::default();
        s.apply_env(|key| match key {
            "FINVIZ_EMAIL" => Some("me@example.com".to_string()),
            "FINVIZ_PASSWORD" => Some("secret".to_string()),
            "FINVIZ_COOKIE" => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(s.username.as_deref(), Some("me@example.com"));
        assert!(s.session_cookie.is_none());
        assert!(s.has_credentials());
    }

    #[test]
    fn test_username_without_password_is_not_enough() {
        let s = FeedSettings {
            username: Some("me".into()),
            ..Default::default()
        };
        assert!(!s.has_credentials());
    }
}
