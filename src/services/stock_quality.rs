use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;

use crate::models::signal::CompositeScore;
use crate::models::stock::QuoteRecord;

const BASE_SCORE: i32 = 30;

/// RS 综合表现的权重：季度 / 月 / 周
const RS_WEIGHTS: [f64; 3] = [0.4, 0.3, 0.3];

/// 单只股票评分时的上下文
#[derive(Debug, Clone, Default)]
pub struct QualityContext<'a> {
    pub eps_score: Option<u32>,
    pub rs_percentile: Option<f64>,
    /// 该股所属的领涨主题（主题轮动得分靠前时由调用方传入）
    pub leading_theme: Option<&'a str>,
    pub today: Option<NaiveDate>,
}

/// 综合质量分：基础分 30，各因子按固定顺序加减分并记录标签，最终截断到 [0, 100]。
///
/// 没有领涨主题上下文时按 代码 + 上下文 缓存，同一次请求里重复出现的股票只算一次。
/// RS 百分位按各模块自己的股票池计算，同一代码在不同模块里上下文可能不同。
#[derive(Default)]
pub struct StockQualityScorer {
    memo: Mutex<HashMap<MemoKey, CompositeScore>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    ticker: String,
    eps_score: Option<u32>,
    rs_bits: Option<u64>,
    today: Option<NaiveDate>,
}

impl MemoKey {
    fn new(quote: &QuoteRecord, ctx: &QualityContext<'_>) -> Self {
        Self {
            ticker: quote.ticker.clone(),
            eps_score: ctx.eps_score,
            rs_bits: ctx.rs_percentile.map(f64::to_bits),
            today: ctx.today,
        }
    }
}

impl StockQualityScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self, quote: &QuoteRecord, ctx: &QualityContext<'_>) -> CompositeScore {
        if ctx.leading_theme.is_some() {
            return Self::compute(quote, ctx);
        }
        let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        memo.entry(MemoKey::new(quote, ctx))
            .or_insert_with(|| Self::compute(quote, ctx))
            .clone()
    }

    pub fn compute(quote: &QuoteRecord, ctx: &QualityContext<'_>) -> CompositeScore {
        let mut acc = Adjustments::new(BASE_SCORE);

        if let Some(eps) = ctx.eps_score {
            acc.apply("eps", eps_adjustment(eps));
        }
        if let Some(h) = quote.high_52w_pct {
            acc.apply("near_high", high_proximity_adjustment(h));
        }
        if let Some(f) = quote.float_m {
            acc.apply("float", float_adjustment(f));
        }
        if let Some(rs) = ctx.rs_percentile {
            acc.apply("rs", rs_adjustment(rs));
        }
        if let Some(inst) = quote.inst_own_pct {
            acc.apply("inst_own", inst_adjustment(inst));
        }
        if let Some(short) = quote.short_float_pct {
            acc.apply("short_float", if short >= 20.0 { 3 } else { 0 });
        }
        if let Some(cap) = quote.market_cap_m {
            acc.apply("market_cap", market_cap_adjustment(cap));
        }
        if let (Some(ipo), Some(today)) = (quote.ipo_date.as_deref().and_then(parse_ipo_date), ctx.today) {
            acc.apply("ipo", ipo_adjustment((today - ipo).num_days()));
        }
        if let Some(theme) = ctx.leading_theme {
            acc.apply(&format!("theme_leader[{}]", theme), 8);
        }
        if let Some(adr) = quote.adr_pct() {
            acc.apply("adr", adr_adjustment(adr));
        }
        if let Some(recom) = quote.analyst_recom {
            let (grade, delta) = letter_grade(recom);
            // 评级总是记标签，C 档为 +0
            acc.record(&format!("grade_{}", grade), delta);
        }
        if let Some(rsi) = quote.rsi {
            acc.apply("rsi_overextended", rsi_adjustment(rsi));
        }

        acc.finish()
    }
}

struct Adjustments {
    total: i32,
    factors: Vec<String>,
}

impl Adjustments {
    fn new(base: i32) -> Self {
        Self { total: base, factors: Vec::new() }
    }

    /// 非零调整才记标签
    fn apply(&mut self, tag: &str, delta: i32) {
        if delta != 0 {
            self.record(tag, delta);
        }
    }

    fn record(&mut self, tag: &str, delta: i32) {
        self.total += delta;
        self.factors.push(format!("{}:{:+}", tag, delta));
    }

    fn finish(self) -> CompositeScore {
        CompositeScore {
            value: self.total.clamp(0, 100) as u32,
            factors: self.factors,
        }
    }
}

fn eps_adjustment(eps: u32) -> i32 {
    match eps {
        e if e >= 80 => 15,
        e if e >= 60 => 10,
        e if e >= 40 => 5,
        e if e >= 20 => 0,
        _ => -5,
    }
}

fn high_proximity_adjustment(pct_from_high: f64) -> i32 {
    if pct_from_high >= -5.0 {
        10
    } else if pct_from_high >= -15.0 {
        5
    } else if pct_from_high <= -40.0 {
        -10
    } else {
        0
    }
}

/// 流通股（百万股）
fn float_adjustment(float_m: f64) -> i32 {
    if float_m < 20.0 {
        8
    } else if float_m < 50.0 {
        5
    } else if float_m < 100.0 {
        2
    } else if float_m > 1000.0 {
        -3
    } else {
        0
    }
}

fn rs_adjustment(percentile: f64) -> i32 {
    if percentile >= 90.0 {
        12
    } else if percentile >= 80.0 {
        8
    } else if percentile >= 70.0 {
        4
    } else if percentile < 30.0 {
        -8
    } else {
        0
    }
}

fn inst_adjustment(pct: f64) -> i32 {
    if (20.0..=80.0).contains(&pct) {
        4
    } else if pct < 5.0 {
        -3
    } else {
        0
    }
}

/// 市值（百万美元）
fn market_cap_adjustment(cap_m: f64) -> i32 {
    if cap_m < 300.0 {
        -5
    } else if cap_m <= 10_000.0 {
        5
    } else if cap_m > 200_000.0 {
        -2
    } else {
        0
    }
}

fn ipo_adjustment(days_since: i64) -> i32 {
    match days_since {
        d if d < 0 => 0,
        d if d <= 365 => 6,
        d if d <= 3 * 365 => 3,
        _ => 0,
    }
}

fn adr_adjustment(adr: f64) -> i32 {
    if adr >= 5.0 {
        6
    } else if adr >= 3.5 {
        3
    } else if adr < 2.0 {
        -5
    } else {
        0
    }
}

/// 分析师评级 1.0（强烈买入）~ 5.0（卖出） -> A~E
fn letter_grade(recom: f64) -> (char, i32) {
    if recom <= 1.5 {
        ('A', 6)
    } else if recom <= 2.0 {
        ('B', 3)
    } else if recom <= 2.5 {
        ('C', 0)
    } else if recom <= 3.0 {
        ('D', -3)
    } else {
        ('E', -6)
    }
}

fn rsi_adjustment(rsi: f64) -> i32 {
    if rsi > 80.0 {
        -8
    } else if rsi > 70.0 {
        -3
    } else {
        0
    }
}

fn parse_ipo_date(text: &str) -> Option<NaiveDate> {
    let s = text.trim();
    ["%m/%d/%Y", "%Y-%m-%d", "%b %d, %Y", "%b %d %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// 加权综合表现：缺失的周期按剩余权重重新归一
pub fn weighted_performance(quote: &QuoteRecord) -> Option<f64> {
    let windows = [quote.perf_quarter, quote.perf_month, quote.perf_week];
    let (sum, weight) = windows
        .iter()
        .zip(RS_WEIGHTS)
        .filter_map(|(v, w)| v.map(|v| (v * w, w)))
        .fold((0.0, 0.0), |(s, tw), (v, w)| (s + v, tw + w));
    (weight > 0.0).then(|| sum / weight)
}

/// 在本次抓取到的股票中计算 RS 百分位（不低于自身的占比，0~100）。
/// 没有任何表现数据的股票不参与排名。
pub fn rs_percentiles(quotes: &[QuoteRecord]) -> HashMap<String, f64> {
    let composites: Vec<(&str, f64)> = quotes
        .iter()
        .filter_map(|q| weighted_performance(q).map(|v| (q.ticker.as_str(), v)))
        .collect();
    let values: Vec<f64> = composites.iter().map(|(_, v)| *v).collect();

    composites
        .iter()
        .map(|(ticker, v)| (ticker.to_string(), (percentile_rank(*v, &values) * 1000.0).round() / 10.0))
        .collect()
}

fn percentile_rank(val: f64, vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return 0.5;
    }
    let count_at_or_below = vals.iter().filter(|&&v| v <= val).count();
    count_at_or_below as f64 / vals.len() as f64
}
