use thiserror::Error;

/// 上游抓取与评分链路的错误分类。
///
/// 除 `Configuration` 外都在单个批次/单个模块内降级处理，不会拖垮整个响应。
/// 需要 `Clone`：登录过程通过共享 future 分发给所有并发调用方。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    /// 既没有原始 cookie 也没有账号密码，致命，不重试
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 超时、连接被重置等
    #[error("网络错误: {0}")]
    TransientNetwork(String),

    /// HTTP 429
    #[error("触发上游限流 (HTTP 429)")]
    RateLimited,

    /// 返回内容与预期格式不符（通常是登录页/拦截页），重新登录后可能恢复
    #[error("响应格式异常: {0}")]
    SchemaDrift(String),

    #[error("登录失败: {0}")]
    Authentication(String),

    #[error("解析失败: {0}")]
    Parse(String),
}

impl FeedError {
    /// 是否值得退避后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::TransientNetwork(_) | FeedError::RateLimited | FeedError::SchemaDrift(_)
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, FeedError::Configuration(_))
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16()) == Some(429) {
            return FeedError::RateLimited;
        }
        FeedError::TransientNetwork(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FeedError::RateLimited.is_retryable());
        assert!(FeedError::TransientNetwork("reset by peer".into()).is_retryable());
        assert!(FeedError::SchemaDrift("text/html".into()).is_retryable());
        assert!(!FeedError::Configuration("缺少凭证".into()).is_retryable());
        assert!(!FeedError::Authentication("401".into()).is_retryable());
        assert!(FeedError::Configuration("x".into()).is_configuration());
    }
}
