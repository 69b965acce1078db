use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{FeedError, Result};
use crate::models::settings::FeedSettings;
use crate::models::stock::QuoteRecord;
use crate::services::normalizer::AliasTable;
use crate::services::session::SessionManager;
use crate::services::tabular::{header_names, parse_delimited};
use crate::services::transport::{classify_status, Transport};
use crate::utils::retry::{fetch_with_retry, RetryOutcome, RetryPolicy};

const EXPORT_PATH: &str = "/export.ashx";
/// 自定义列视图
const EXPORT_VIEW: &str = "152";
/// 导出的列：基本信息、估值、表现、技术指标、成长、股本结构
const EXPORT_COLUMNS: &str =
    "1,2,3,4,5,6,7,16,17,18,19,20,21,22,23,26,29,30,33,42,43,44,46,47,49,52,53,57,58,59,61,62,63,64,65,66,67,68,69,70";

/// 一次分批抓取的结果。
///
/// `missing` 为请求了但上游没有返回的代码（PartialCoverage），属于软信号，不是错误；
/// 重试用尽的批次整体计入 `missing`，并累加 `failed_chunks`。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub quotes: Vec<QuoteRecord>,
    pub missing: Vec<String>,
    pub failed_chunks: usize,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.failed_chunks == 0
    }
}

/// 通过 CSV 导出接口分批抓取行情
pub struct BatchFetcher {
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
    aliases: AliasTable,
    policy: RetryPolicy,
    base_url: String,
    /// 已经告警过的未知表头，避免每批都刷屏
    reported_headers: Mutex<HashSet<String>>,
}

impl BatchFetcher {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<SessionManager>, settings: &FeedSettings) -> Self {
        Self {
            transport,
            session,
            aliases: AliasTable::with_extra(&settings.extra_aliases),
            policy: RetryPolicy::from_settings(settings),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            reported_headers: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// 按顺序分批抓取，批次之间休眠 `inter_batch_delay`（第一批之前不休眠）。
    ///
    /// 只有配置错误会返回 `Err`；其余失败都降级为该批次为空并记录日志。
    pub async fn fetch_batched(
        &self,
        items: &[String],
        batch_size: usize,
        inter_batch_delay: Duration,
    ) -> Result<BatchOutcome> {
        let tickers = dedupe_tickers(items);
        let mut outcome = BatchOutcome::default();
        if tickers.is_empty() {
            return Ok(outcome);
        }
        self.session.ensure_configured()?;

        let chunks: Vec<&[String]> = tickers.chunks(batch_size.max(1)).collect();
        let total = chunks.len();

        for (idx, chunk) in chunks.into_iter().enumerate() {
            if idx > 0 && !inter_batch_delay.is_zero() {
                tokio::time::sleep(inter_batch_delay).await;
            }

            let url = self.export_url(&format!("&t={}", encode_list(&chunk.join(","))));
            let label = format!("导出批次 {}/{}", idx + 1, total);
            let quotes = match self.fetch_export(&url, &label).await? {
                Some(quotes) => quotes,
                None => {
                    outcome.failed_chunks += 1;
                    Vec::new()
                }
            };

            let quotes = keep_requested(chunk, quotes);
            let returned: HashSet<&str> = quotes.iter().map(|q| q.ticker.as_str()).collect();
            let missing: Vec<String> = chunk.iter().filter(|t| !returned.contains(t.as_str())).cloned().collect();
            if !missing.is_empty() {
                log::warn!("{} 部分缺失 {}/{}: {}", label, missing.len(), chunk.len(), missing.join(","));
            }

            outcome.missing.extend(missing);
            outcome.quotes.extend(quotes);
        }

        log::info!(
            "分批抓取完成: 请求 {} 只，返回 {} 只，失败批次 {}",
            tickers.len(),
            outcome.quotes.len(),
            outcome.failed_chunks
        );
        Ok(outcome)
    }

    /// 按筛选条件抓取（不指定代码列表），例如 `ta_change_u10,sh_relvol_o4`
    pub async fn fetch_screen(&self, filter: &str) -> Result<BatchOutcome> {
        self.session.ensure_configured()?;
        let url = self.export_url(&format!("&f={}", encode_list(filter)));
        let label = format!("筛选 {}", filter);
        let outcome = match self.fetch_export(&url, &label).await? {
            Some(quotes) => BatchOutcome { quotes, ..Default::default() },
            None => BatchOutcome { failed_chunks: 1, ..Default::default() },
        };
        log::info!("{} 返回 {} 只", label, outcome.quotes.len());
        Ok(outcome)
    }

    fn export_url(&self, query: &str) -> String {
        format!(
            "{}{}?v={}&c={}{}",
            self.base_url, EXPORT_PATH, EXPORT_VIEW, EXPORT_COLUMNS, query
        )
    }

    /// 带重试抓取一次导出。`Ok(None)` 表示重试用尽或不可恢复的非配置错误。
    async fn fetch_export(&self, url: &str, label: &str) -> Result<Option<Vec<QuoteRecord>>> {
        match fetch_with_retry(&self.policy, label, move |_| self.fetch_export_once(url)).await {
            RetryOutcome::Success { value, attempts } => {
                if attempts > 1 {
                    log::info!("{} 第 {} 次尝试成功", label, attempts);
                }
                Ok(Some(value))
            }
            RetryOutcome::Exhausted { last_error, attempts } => {
                log::warn!("{} 在 {} 次尝试后放弃，按空结果处理: {}", label, attempts, last_error);
                Ok(None)
            }
            RetryOutcome::Fatal(e) if e.is_configuration() => Err(e),
            RetryOutcome::Fatal(e) => {
                log::warn!("{} 失败，按空结果处理: {}", label, e);
                Ok(None)
            }
        }
    }

    async fn fetch_export_once(&self, url: &str) -> Result<Vec<QuoteRecord>> {
        let session = self.session.get_session().await?;
        let resp = self.transport.get(url, Some(&session.cookie)).await?;
        classify_status(&resp)?;

        if resp.looks_like_html() {
            // 拿到的通常是登录页，丢掉会话让下一次重新登录
            self.session.invalidate();
            return Err(FeedError::SchemaDrift(format!(
                "期望 CSV，实际返回 {}",
                if resp.content_type.is_empty() { "HTML" } else { resp.content_type.as_str() }
            )));
        }

        let headers = header_names(&resp.body);
        if headers.is_empty() {
            return Ok(Vec::new());
        }
        self.report_unknown_headers(&headers);
        if !self.aliases.aliases("ticker").iter().any(|a| headers.contains(a)) {
            return Err(FeedError::SchemaDrift(format!("导出缺少代码列，表头: {}", headers.join(","))));
        }

        let quotes = parse_delimited(&resp.body)
            .iter()
            .map(|raw| self.aliases.normalize_row(raw))
            .filter_map(|row| self.aliases.quote_from_row(&row))
            .collect();
        Ok(quotes)
    }

    fn report_unknown_headers(&self, headers: &[String]) {
        let unknown = self.aliases.unknown_headers(headers);
        if unknown.is_empty() {
            return;
        }
        let mut reported = self.reported_headers.lock().unwrap_or_else(|e| e.into_inner());
        let fresh: Vec<&str> = unknown.into_iter().filter(|h| reported.insert(h.to_string())).collect();
        if !fresh.is_empty() {
            log::warn!("导出中出现未识别的列（可能是上游改版）: {}", fresh.join(", "));
        }
    }
}

/// 去空白、转大写、去重，保持原顺序
pub fn dedupe_tickers(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// 只保留本批请求的代码，重复行取第一行
fn keep_requested(chunk: &[String], quotes: Vec<QuoteRecord>) -> Vec<QuoteRecord> {
    let requested: HashSet<&str> = chunk.iter().map(|t| t.as_str()).collect();
    let mut seen = HashSet::new();
    let before = quotes.len();
    let kept: Vec<QuoteRecord> = quotes
        .into_iter()
        .filter(|q| requested.contains(q.ticker.as_str()) && seen.insert(q.ticker.clone()))
        .collect();
    if kept.len() < before {
        log::debug!("丢弃 {} 行未请求或重复的导出数据", before - kept.len());
    }
    kept
}

fn encode_list(list: &str) -> String {
    list.split(',')
        .map(|part| urlencoding::encode(part.trim()).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}
