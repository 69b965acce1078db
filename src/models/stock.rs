use serde::{Deserialize, Serialize};

/// 个股行情快照（来自上游 CSV 导出，经表头归一化后构造）
///
/// 数值字段一律为 `Option<f64>`：上游标记为不可用（"-"、空串、非数字）时为 `None`，
/// 绝不以 0 代替。构造后不再修改，每次请求都生成新的记录。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuoteRecord {
    pub ticker: String,
    pub company: String,
    pub sector: String,
    pub industry: String,
    pub country: String,
    pub price: Option<f64>,
    pub change_pct: Option<f64>,
    pub gap_pct: Option<f64>,
    pub volume: Option<f64>,
    pub avg_volume: Option<f64>,
    pub rel_volume: Option<f64>,
    pub perf_week: Option<f64>,
    pub perf_month: Option<f64>,
    pub perf_quarter: Option<f64>,
    pub atr: Option<f64>,
    pub rsi: Option<f64>,
    /// 相对各均线的偏离 %
    pub sma20_pct: Option<f64>,
    pub sma50_pct: Option<f64>,
    pub sma200_pct: Option<f64>,
    /// 距 52 周高点 %（通常为负数，-2 表示低于高点 2%）
    pub high_52w_pct: Option<f64>,
    pub low_52w_pct: Option<f64>,
    pub pe: Option<f64>,
    /// 原始财报日文本，例如 "Oct 30 AMC"
    pub earnings_date: Option<String>,
    /// 市值（百万美元）
    pub market_cap_m: Option<f64>,
    /// 流通股（百万股）
    pub float_m: Option<f64>,
    pub inst_own_pct: Option<f64>,
    pub short_float_pct: Option<f64>,
    /// 月波动率 %，作为 ADR% 的近似
    pub volatility_month_pct: Option<f64>,
    /// 分析师评级 1.0（强烈买入）~ 5.0（卖出）
    pub analyst_recom: Option<f64>,
    pub ipo_date: Option<String>,
    #[serde(default)]
    pub annual: AnnualGrowth,
}

/// 年度/同比增长字段，季度数据缺失时用于 EPS 质量分的兜底计算
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnnualGrowth {
    pub eps_this_y: Option<f64>,
    pub eps_next_y: Option<f64>,
    pub eps_past_5y: Option<f64>,
    pub sales_past_5y: Option<f64>,
    pub eps_qoq: Option<f64>,
    pub sales_qoq: Option<f64>,
}

impl QuoteRecord {
    /// ADR%：优先使用月波动率，缺失时用 ATR / 价格 估算
    pub fn adr_pct(&self) -> Option<f64> {
        if let Some(v) = self.volatility_month_pct {
            return Some(v);
        }
        match (self.atr, self.price) {
            (Some(atr), Some(price)) if price > 0.0 => Some(atr / price * 100.0),
            _ => None,
        }
    }
}

/// 单只股票的新闻条目（来自个股页面新闻表）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    /// 页面上的原始时间文本，同日新闻只有时间部分时补全为上一条的日期
    pub published: String,
    pub title: String,
    pub url: String,
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adr_prefers_monthly_volatility() {
        let q = QuoteRecord {
            volatility_month_pct: Some(4.2),
            atr: Some(3.0),
            price: Some(50.0),
            ..Default::default()
        };
        assert_eq!(q.adr_pct(), Some(4.2));
    }

    #[test]
    fn test_adr_falls_back_to_atr() {
        let q = QuoteRecord {
            atr: Some(2.0),
            price: Some(40.0),
            ..Default::default()
        };
        assert_eq!(q.adr_pct(), Some(5.0));
        assert_eq!(QuoteRecord::default().adr_pct(), None);
    }
}
