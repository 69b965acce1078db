use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};

use crate::models::signal::{EpisodicPivot, PivotTrigger};
use crate::models::stock::QuoteRecord;

/// 上游筛选条件。返回结果仍会在本地按下面的阈值复核。
pub const POWER_SCREEN_FILTER: &str = "ta_change_u10,sh_relvol_o4";
pub const GAP_SCREEN_FILTER: &str = "ta_gap_u4,ta_change_u8,sh_relvol_o4";

pub const MIN_REL_VOLUME: f64 = 4.0;
pub const POWER_MIN_CHANGE: f64 = 10.0;
pub const GAP_MIN_GAP: f64 = 4.0;
pub const GAP_MIN_CHANGE: f64 = 8.0;

const BASE_QUALITY: i32 = 50;
const EARNINGS_WINDOW_DAYS: i64 = 3;
const RSI_OVERHEATED: f64 = 85.0;

/// 判断单只股票是否满足某种拐点条件
pub fn classify(quote: &QuoteRecord, trigger: PivotTrigger) -> bool {
    let (Some(change), Some(rvol)) = (quote.change_pct, quote.rel_volume) else {
        return false;
    };
    if rvol < MIN_REL_VOLUME {
        return false;
    }
    match trigger {
        PivotTrigger::Power => change >= POWER_MIN_CHANGE,
        PivotTrigger::Gap => change >= GAP_MIN_CHANGE && quote.gap_pct.is_some_and(|g| g >= GAP_MIN_GAP),
    }
}

/// 合并两组筛选结果：先大涨后跳空，按代码去重，先命中的保留；
/// 结果按质量分降序、跳空幅度降序排列
pub fn detect_pivots(power: &[QuoteRecord], gap: &[QuoteRecord], today: NaiveDate) -> Vec<EpisodicPivot> {
    let mut seen = HashSet::new();
    let mut pivots: Vec<EpisodicPivot> = power
        .iter()
        .map(|q| (q, PivotTrigger::Power))
        .chain(gap.iter().map(|q| (q, PivotTrigger::Gap)))
        .filter(|(q, trigger)| classify(q, *trigger))
        .filter(|(q, _)| seen.insert(q.ticker.clone()))
        .filter_map(|(q, trigger)| build_pivot(q, trigger, today))
        .collect();

    pivots.sort_by(|a, b| {
        b.quality.cmp(&a.quality).then_with(|| {
            let (ga, gb) = (a.gap_pct.unwrap_or(f64::MIN), b.gap_pct.unwrap_or(f64::MIN));
            gb.total_cmp(&ga)
        })
    });
    pivots
}

fn build_pivot(quote: &QuoteRecord, trigger: PivotTrigger, today: NaiveDate) -> Option<EpisodicPivot> {
    let near_earnings = quote
        .earnings_date
        .as_deref()
        .and_then(|text| parse_earnings_date(text, today))
        .is_some_and(|d| (d - today).num_days().abs() <= EARNINGS_WINDOW_DAYS);

    Some(EpisodicPivot {
        ticker: quote.ticker.clone(),
        company: quote.company.clone(),
        trigger,
        change_pct: quote.change_pct?,
        gap_pct: quote.gap_pct,
        rel_volume: quote.rel_volume?,
        high_52w_pct: quote.high_52w_pct,
        rsi: quote.rsi,
        quality: pivot_quality(quote, near_earnings),
        near_earnings,
    })
}

/// 质量分 = 50 + 量能档 + 跳空档 + 52 周高点距离档 + 财报临近加分 − RSI 过热扣分，截断到 [0, 100]
pub fn pivot_quality(quote: &QuoteRecord, near_earnings: bool) -> u32 {
    let mut total = BASE_QUALITY;
    total += quote.rel_volume.map(volume_tier).unwrap_or(0);
    total += quote.gap_pct.map(gap_tier).unwrap_or(0);
    total += quote.high_52w_pct.map(high_tier).unwrap_or(0);
    if near_earnings {
        total += 10;
    }
    if quote.rsi.is_some_and(|r| r > RSI_OVERHEATED) {
        total -= 10;
    }
    total.clamp(0, 100) as u32
}

fn volume_tier(rvol: f64) -> i32 {
    if rvol >= 10.0 {
        20
    } else if rvol >= 7.0 {
        15
    } else if rvol >= 5.0 {
        10
    } else if rvol >= 4.0 {
        5
    } else {
        0
    }
}

fn gap_tier(gap: f64) -> i32 {
    if gap >= 15.0 {
        15
    } else if gap >= 10.0 {
        10
    } else if gap >= 6.0 {
        6
    } else if gap >= 4.0 {
        3
    } else {
        0
    }
}

fn high_tier(pct_from_high: f64) -> i32 {
    if pct_from_high >= -3.0 {
        10
    } else if pct_from_high >= -10.0 {
        5
    } else {
        0
    }
}

/// 解析财报日文本。
///
/// 上游常见格式为 "Oct 30 AMC" / "Oct 30 BMO" / "Mar 04/a"，不带年份，取离今天最近的那一年；
/// 也兼容带年份的 "10/30/2025"、"2025-10-30"，以及后面跟时间的 "03/04/2025 04:30:00 PM"。
pub fn parse_earnings_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let s = text.trim();
    if s.is_empty() || s == "-" {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%b %d, %Y") {
        return Some(d);
    }

    let mut parts = s.split_whitespace();
    let first = parts.next()?;
    for fmt in ["%m/%d/%Y", "%Y-%m-%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(first, fmt) {
            return Some(d);
        }
    }

    // "/a" 盘后、"/b" 盘前
    let day = parts.next()?;
    let day = day
        .strip_suffix("/a")
        .or_else(|| day.strip_suffix("/b"))
        .or_else(|| day.strip_suffix("/A"))
        .or_else(|| day.strip_suffix("/B"))
        .unwrap_or(day)
        .trim_end_matches(',');
    let year = today.year();
    let parsed = [year - 1, year, year + 1]
        .iter()
        .filter_map(|y| NaiveDate::parse_from_str(&format!("{} {} {}", first, day, y), "%b %d %Y").ok())
        .min_by_key(|d| (*d - today).num_days().abs());
    if parsed.is_none() {
        log::debug!("无法识别的财报日格式: {}", s);
    }
    parsed
}
