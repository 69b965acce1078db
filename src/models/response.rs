use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::financial::QuarterlyFinancial;
use super::signal::{CompositeScore, EpisodicPivot, ThemeRotation};
use super::stock::{NewsItem, QuoteRecord};

/// 一次请求需要的数据模块
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetRequest {
    pub watchlist: Vec<String>,
    pub universe: Vec<String>,
    pub detail: Option<String>,
    pub homepage: bool,
    pub episodic_scan: bool,
}

impl FacetRequest {
    pub fn is_empty(&self) -> bool {
        self.watchlist.is_empty()
            && self.universe.is_empty()
            && self.detail.is_none()
            && !self.homepage
            && !self.episodic_scan
    }
}

/// 带评分的行情
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredQuote {
    #[serde(flatten)]
    pub quote: QuoteRecord,
    pub rs_percentile: Option<f64>,
    pub quality: CompositeScore,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchlistFacet {
    pub quotes: Vec<ScoredQuote>,
    /// 请求了但上游没有返回的代码
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UniverseFacet {
    pub quotes: Vec<ScoredQuote>,
    pub missing: Vec<String>,
    pub themes: Vec<ThemeRotation>,
}

/// 个股详情页抓取结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TickerDetail {
    pub ticker: String,
    pub fields: BTreeMap<String, String>,
    pub news: Vec<NewsItem>,
    pub peers: Vec<String>,
    pub profile: Option<String>,
    pub quarterly: Vec<QuarterlyFinancial>,
    pub eps_quality: Option<u32>,
}

/// 首页市场宽度统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketAggregates {
    pub advancing: Option<BreadthPair>,
    pub new_high_low: Option<BreadthPair>,
    pub sma50: Option<BreadthPair>,
    pub sma200: Option<BreadthPair>,
}

/// 一组对立计数，例如 上涨/下跌 家数及占比
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreadthPair {
    pub positive: u32,
    pub negative: u32,
    pub positive_pct: Option<f64>,
    pub negative_pct: Option<f64>,
}

/// 对外响应：各模块独立可空
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardResponse {
    pub ok: bool,
    pub watchlist: Option<WatchlistFacet>,
    pub universe: Option<UniverseFacet>,
    pub detail: Option<TickerDetail>,
    pub homepage: Option<MarketAggregates>,
    pub episodic_pivots: Option<Vec<EpisodicPivot>>,
}

impl DashboardResponse {
    pub fn empty() -> Self {
        Self {
            ok: true,
            watchlist: None,
            universe: None,
            detail: None,
            homepage: None,
            episodic_pivots: None,
        }
    }
}
