use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::{FeedError, Result};
use crate::models::response::{
    DashboardResponse, FacetRequest, MarketAggregates, ScoredQuote, TickerDetail, UniverseFacet, WatchlistFacet,
};
use crate::models::settings::FeedSettings;
use crate::models::signal::EpisodicPivot;
use crate::models::stock::QuoteRecord;
use crate::services::batch_fetcher::{dedupe_tickers, BatchFetcher};
use crate::services::eps_quality::score_eps_quality;
use crate::services::episodic_pivot::{detect_pivots, GAP_SCREEN_FILTER, POWER_SCREEN_FILTER};
use crate::services::market_data::MarketDataService;
use crate::services::session::{SessionConfig, SessionManager};
use crate::services::stock_quality::{rs_percentiles, QualityContext, StockQualityScorer};
use crate::services::tabular::RawRow;
use crate::services::theme_rotation::{leading_theme_index, score_themes};
use crate::services::transport::Transport;
use crate::utils::clock::Clock;
use crate::utils::retry::RetryPolicy;

/// 把各数据模块组装成一次响应
pub struct ResultAssembler {
    settings: FeedSettings,
    session: Arc<SessionManager>,
    fetcher: BatchFetcher,
    market: MarketDataService,
    clock: Arc<dyn Clock>,
}

impl ResultAssembler {
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>, settings: FeedSettings) -> Self {
        let session = Arc::new(SessionManager::new(
            transport.clone(),
            clock.clone(),
            SessionConfig::from_settings(&settings),
        ));
        let fetcher = BatchFetcher::new(transport.clone(), session.clone(), &settings);
        let market = MarketDataService::new(transport, session.clone(), &settings);
        Self { settings, session, fetcher, market, clock }
    }

    /// 替换所有上游请求的重试策略（测试里用较短的退避）
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.fetcher = self.fetcher.with_policy(policy.clone());
        self.market = self.market.with_policy(policy);
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    /// 并发执行请求的各模块。单个模块失败降级为 `None`；
    /// 任何模块遇到配置错误时整个请求失败。
    pub async fn assemble(&self, request: &FacetRequest) -> Result<DashboardResponse> {
        if request.is_empty() {
            return Ok(DashboardResponse::empty());
        }
        self.session.ensure_configured()?;

        let scorer = StockQualityScorer::new();
        let (watchlist, universe, detail, homepage, pivots) = tokio::join!(
            facet("自选股", !request.watchlist.is_empty(), self.watchlist_facet(&request.watchlist, &scorer)),
            facet("主题股票池", !request.universe.is_empty(), self.universe_facet(&request.universe, &scorer)),
            facet("个股详情", request.detail.is_some(), self.detail_facet(request.detail.as_deref())),
            facet("首页宽度", request.homepage, self.homepage_facet()),
            facet("情绪拐点", request.episodic_scan, self.pivot_facet()),
        );

        Ok(DashboardResponse {
            ok: true,
            watchlist: watchlist?,
            universe: universe?,
            detail: detail?,
            homepage: homepage?,
            episodic_pivots: pivots?,
        })
    }

    async fn watchlist_facet(&self, tickers: &[String], scorer: &StockQualityScorer) -> Result<WatchlistFacet> {
        let mut tickers = dedupe_tickers(tickers);
        let cap = self.settings.batch.watchlist_cap;
        if tickers.len() > cap {
            log::warn!("自选股 {} 只，超过上限 {}，只取前 {} 只", tickers.len(), cap, cap);
            tickers.truncate(cap);
        }

        let outcome = self
            .fetcher
            .fetch_batched(&tickers, self.settings.batch.watchlist_batch_size, self.settings.inter_batch_delay())
            .await?;
        if outcome.quotes.is_empty() && outcome.failed_chunks > 0 {
            return Err(FeedError::TransientNetwork("自选股批次全部失败".to_string()));
        }

        let rs = rs_percentiles(&outcome.quotes);
        let no_themes = HashMap::new();
        let quotes = in_request_order(&tickers, self.score_quotes(outcome.quotes, &rs, &no_themes, scorer));
        Ok(WatchlistFacet { quotes, missing: outcome.missing })
    }

    async fn universe_facet(&self, tickers: &[String], scorer: &StockQualityScorer) -> Result<UniverseFacet> {
        let tickers = dedupe_tickers(tickers);
        let outcome = self
            .fetcher
            .fetch_batched(&tickers, self.settings.batch.universe_batch_size, self.settings.inter_batch_delay())
            .await?;
        if outcome.quotes.is_empty() && outcome.failed_chunks > 0 {
            return Err(FeedError::TransientNetwork("股票池批次全部失败".to_string()));
        }

        let themes = score_themes(&self.settings.themes, &outcome.quotes);
        let leaders = leading_theme_index(&self.settings.themes, &themes);
        let rs = rs_percentiles(&outcome.quotes);

        let mut quotes = self.score_quotes(outcome.quotes, &rs, &leaders, scorer);
        quotes.sort_by(|a, b| {
            b.quality.value.cmp(&a.quality.value).then_with(|| a.quote.ticker.cmp(&b.quote.ticker))
        });
        Ok(UniverseFacet { quotes, missing: outcome.missing, themes })
    }

    fn score_quotes(
        &self,
        quotes: Vec<QuoteRecord>,
        rs: &HashMap<String, f64>,
        leaders: &HashMap<String, &str>,
        scorer: &StockQualityScorer,
    ) -> Vec<ScoredQuote> {
        let today = self.clock.today();
        quotes
            .into_iter()
            .map(|quote| {
                let rs_percentile = rs.get(&quote.ticker).copied();
                let ctx = QualityContext {
                    // 批量导出没有季度数据，只能用年度字段兜底
                    eps_score: score_eps_quality(&[], &quote.annual).map(|e| e.score),
                    rs_percentile,
                    leading_theme: leaders.get(&quote.ticker).copied(),
                    today: Some(today),
                };
                let quality = scorer.score(&quote, &ctx);
                ScoredQuote { quote, rs_percentile, quality }
            })
            .collect()
    }

    async fn detail_facet(&self, ticker: Option<&str>) -> Result<TickerDetail> {
        let ticker = ticker.unwrap_or_default().trim().to_uppercase();
        let page = self.market.get_snapshot_page(&ticker).await?;

        let fields = page.fields.into_option().unwrap_or_default();
        let quarterly = page.quarterly.into_option().unwrap_or_default();

        let mut raw: RawRow = fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        raw.insert("Ticker".to_string(), ticker.clone());
        let aliases = self.fetcher.aliases();
        let annual = aliases
            .quote_from_row(&aliases.normalize_row(&raw))
            .map(|q| q.annual)
            .unwrap_or_default();

        let eps_quality = score_eps_quality(&quarterly, &annual).map(|e| e.score);
        Ok(TickerDetail {
            ticker,
            fields,
            news: page.news.into_option().unwrap_or_default(),
            peers: page.peers.into_option().unwrap_or_default(),
            profile: page.profile.into_option(),
            quarterly,
            eps_quality,
        })
    }

    async fn homepage_facet(&self) -> Result<MarketAggregates> {
        Ok(self.market.get_homepage().await?.into_aggregates())
    }

    /// 两个筛选按顺序请求，避免同时打到导出接口
    async fn pivot_facet(&self) -> Result<Vec<EpisodicPivot>> {
        let power = self.fetcher.fetch_screen(POWER_SCREEN_FILTER).await?;
        let gap = self.fetcher.fetch_screen(GAP_SCREEN_FILTER).await?;
        if power.failed_chunks > 0 && gap.failed_chunks > 0 {
            return Err(FeedError::TransientNetwork("情绪拐点筛选全部失败".to_string()));
        }
        let pivots = detect_pivots(&power.quotes, &gap.quotes, self.clock.today());
        log::info!("情绪拐点扫描: 候选 {} 只，命中 {} 只", power.quotes.len() + gap.quotes.len(), pivots.len());
        Ok(pivots)
    }
}

/// 未请求的模块直接为 `None`；失败的模块记录日志后降级为 `None`，配置错误向上传递
async fn facet<T, F>(label: &str, requested: bool, fut: F) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
{
    if !requested {
        return Ok(None);
    }
    match fut.await {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_configuration() => Err(e),
        Err(e) => {
            log::warn!("{} 模块降级为空: {}", label, e);
            Ok(None)
        }
    }
}

fn in_request_order(tickers: &[String], mut quotes: Vec<ScoredQuote>) -> Vec<ScoredQuote> {
    let position: HashMap<&str, usize> = tickers.iter().enumerate().map(|(i, t)| (t.as_str(), i)).collect();
    quotes.sort_by_key(|q| position.get(q.quote.ticker.as_str()).copied().unwrap_or(usize::MAX));
    quotes
}
