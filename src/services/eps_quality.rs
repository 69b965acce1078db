use serde::Serialize;

use crate::models::financial::QuarterlyFinancial;
use crate::models::stock::AnnualGrowth;

/// 分档表：(阈值, 分数)，按阈值从高到低排列，取第一个 `value >= 阈值` 的档位
type TierTable = &'static [(f64, u32)];

/// 近两季 EPS 同比均值
const EPS_GROWTH_TIERS: TierTable = &[(100.0, 30), (50.0, 25), (25.0, 18), (15.0, 12), (0.0, 5)];
/// 近两季营收同比均值
const SALES_GROWTH_TIERS: TierTable = &[(50.0, 25), (25.0, 20), (15.0, 14), (10.0, 9), (0.0, 4)];
/// 三季 EPS 同比的平均变化（百分点）
const EPS_ACCEL_TIERS: TierTable = &[(20.0, 15), (10.0, 11), (0.0, 6), (-10.0, 2)];
const SALES_ACCEL_TIERS: TierTable = &[(10.0, 10), (5.0, 7), (0.0, 4), (-5.0, 1)];
/// 利润率相对去年同期（缺失时相对上一季）的变化（百分点）
const MARGIN_DELTA_TIERS: TierTable = &[(5.0, 20), (2.0, 14), (0.0, 8), (-2.0, 3)];
/// 五年 EPS 复合增长，只在年度兜底里使用
const LONG_TERM_TIERS: TierTable = &[(25.0, 15), (15.0, 11), (5.0, 6), (0.0, 2)];

/// 按参与计算的分项个数限制上限，分项越少越不可信
const CONFIDENCE_CEILING: [u32; 6] = [0, 60, 70, 80, 90, 99];
/// 只有年度数据时的硬上限
const ANNUAL_FALLBACK_CAP: u32 = 49;
const SCALE: f64 = 99.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpsQualitySource {
    Quarterly,
    Annual,
}

/// EPS 质量分 [0, 99] 及其来源
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpsQuality {
    pub score: u32,
    pub components: usize,
    pub source: EpsQualitySource,
}

fn tier(value: f64, table: TierTable) -> u32 {
    table.iter().find(|(threshold, _)| value >= *threshold).map(|(_, pts)| *pts).unwrap_or(0)
}

fn max_points(table: TierTable) -> u32 {
    table.first().map(|(_, pts)| *pts).unwrap_or(0)
}

#[derive(Default)]
struct Tally {
    points: u32,
    max: u32,
    components: usize,
}

impl Tally {
    fn add(&mut self, value: Option<f64>, table: TierTable) {
        if let Some(v) = value {
            self.points += tier(v, table);
            self.max += max_points(table);
            self.components += 1;
        }
    }

    fn scaled(&self) -> u32 {
        if self.max == 0 {
            return 0;
        }
        (self.points as f64 / self.max as f64 * SCALE).round() as u32
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// 前 `n` 个季度里该字段的可用值
fn recent<F>(quarters: &[QuarterlyFinancial], n: usize, field: F) -> Vec<f64>
where
    F: Fn(&QuarterlyFinancial) -> Option<f64>,
{
    quarters.iter().take(n).filter_map(field).collect()
}

/// 三个连续季度的同比值都存在时，取两次变化的均值
fn acceleration<F>(quarters: &[QuarterlyFinancial], field: F) -> Option<f64>
where
    F: Fn(&QuarterlyFinancial) -> Option<f64>,
{
    if quarters.len() < 3 {
        return None;
    }
    let (y0, y1, y2) = (field(&quarters[0])?, field(&quarters[1])?, field(&quarters[2])?);
    Some(((y0 - y1) + (y1 - y2)) / 2.0)
}

fn margin_delta(quarters: &[QuarterlyFinancial]) -> Option<f64> {
    let latest = quarters.first()?.margin_pct?;
    let base = quarters
        .get(4)
        .and_then(|q| q.margin_pct)
        .or_else(|| quarters.get(1).and_then(|q| q.margin_pct))?;
    Some(latest - base)
}

/// 计算 EPS 质量分。
///
/// `quarterly` 需按时间从新到旧排列。季度数据不足以算出任何分项时，
/// 用年度增长字段兜底（上限 49）；两者都没有返回 `None`。
pub fn score_eps_quality(quarterly: &[QuarterlyFinancial], annual: &AnnualGrowth) -> Option<EpsQuality> {
    let mut tally = Tally::default();
    tally.add(mean(&recent(quarterly, 2, |q| q.eps_yoy_pct)), EPS_GROWTH_TIERS);
    tally.add(mean(&recent(quarterly, 2, |q| q.revenue_yoy_pct)), SALES_GROWTH_TIERS);
    tally.add(acceleration(quarterly, |q| q.eps_yoy_pct), EPS_ACCEL_TIERS);
    tally.add(acceleration(quarterly, |q| q.revenue_yoy_pct), SALES_ACCEL_TIERS);
    tally.add(margin_delta(quarterly), MARGIN_DELTA_TIERS);

    if tally.components > 0 {
        let ceiling = CONFIDENCE_CEILING[tally.components.min(5)];
        return Some(EpsQuality {
            score: tally.scaled().min(ceiling),
            components: tally.components,
            source: EpsQualitySource::Quarterly,
        });
    }

    let mut tally = Tally::default();
    tally.add(annual.eps_this_y, EPS_GROWTH_TIERS);
    tally.add(annual.eps_qoq, EPS_GROWTH_TIERS);
    tally.add(annual.sales_qoq, SALES_GROWTH_TIERS);
    tally.add(annual.eps_past_5y, LONG_TERM_TIERS);
    if tally.components == 0 {
        return None;
    }
    log::debug!("季度财务数据不足，EPS 质量分使用年度字段兜底（{} 项）", tally.components);
    Some(EpsQuality {
        score: tally.scaled().min(ANNUAL_FALLBACK_CAP),
        components: tally.components,
        source: EpsQualitySource::Annual,
    })
}
