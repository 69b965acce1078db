use std::sync::Arc;

use crate::error::{FeedError, Result};
use crate::models::settings::FeedSettings;
use crate::services::homepage::{parse_homepage, HomepageSnapshot};
use crate::services::scrape::Extracted;
use crate::services::session::SessionManager;
use crate::services::snapshot_page::{parse_snapshot_page, SnapshotPage};
use crate::services::transport::{classify_status, Transport};
use crate::utils::retry::{fetch_with_retry, RetryPolicy};

const QUOTE_PATH: &str = "/quote.ashx";

/// 个股页与首页的 HTML 抓取
pub struct MarketDataService {
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
    policy: RetryPolicy,
    base_url: String,
}

impl MarketDataService {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<SessionManager>, settings: &FeedSettings) -> Self {
        Self {
            transport,
            session,
            policy: RetryPolicy::from_settings(settings),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 抓取并解析个股页。页面上找不到数据表视为拦截页，丢弃会话后重试。
    pub async fn get_snapshot_page(&self, ticker: &str) -> Result<SnapshotPage> {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(FeedError::Parse("代码为空".to_string()));
        }
        self.session.ensure_configured()?;

        let url = format!("{}{}?t={}&p=d", self.base_url, QUOTE_PATH, urlencoding::encode(&ticker));
        let label = format!("个股页 {}", ticker);
        let (url, ticker) = (url.as_str(), ticker.as_str());
        fetch_with_retry(&self.policy, &label, move |_| async move {
            let body = self.get_html(url).await?;
            let page = parse_snapshot_page(&body);
            if !page.fields.is_found() {
                self.session.invalidate();
                return Err(FeedError::SchemaDrift(format!("{} 页面缺少行情数据表", ticker)));
            }
            if let Extracted::Fallback { pattern, .. } = &page.fields {
                log::warn!("{} 数据表走了第 {} 个备用模式，页面可能已改版", ticker, pattern);
            }
            Ok(page)
        })
        .await
        .into_result()
    }

    /// 抓取首页市场宽度
    pub async fn get_homepage(&self) -> Result<HomepageSnapshot> {
        self.session.ensure_configured()?;
        let url = format!("{}/", self.base_url);
        let url = url.as_str();
        fetch_with_retry(&self.policy, "首页", move |_| async move {
            let body = self.get_html(url).await?;
            let snapshot = parse_homepage(&body);
            if snapshot.is_empty() {
                self.session.invalidate();
                return Err(FeedError::SchemaDrift("首页缺少市场宽度区块".to_string()));
            }
            Ok(snapshot)
        })
        .await
        .into_result()
    }

    async fn get_html(&self, url: &str) -> Result<String> {
        let session = self.session.get_session().await?;
        let resp = self.transport.get(url, Some(&session.cookie)).await?;
        if resp.is_redirect() {
            // 会话失效时上游重定向到登录页
            self.session.invalidate();
            return Err(FeedError::SchemaDrift(format!("HTTP {} 重定向", resp.status)));
        }
        classify_status(&resp)?;
        Ok(resp.body)
    }
}
