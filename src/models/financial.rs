use serde::{Deserialize, Serialize};

/// 利润率口径，按 净利率 -> 营业利润率 -> 毛利率 的顺序取第一个可用值
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarginKind {
    Net,
    Operating,
    Gross,
}

/// 单季财务数据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuarterlyFinancial {
    pub period: String,
    pub revenue: Option<f64>,
    pub revenue_yoy_pct: Option<f64>,
    pub eps: Option<f64>,
    pub eps_yoy_pct: Option<f64>,
    pub margin_pct: Option<f64>,
    pub margin_kind: Option<MarginKind>,
}

impl QuarterlyFinancial {
    /// 从三种利润率里挑第一个有值的
    pub fn pick_margin(
        net: Option<f64>,
        operating: Option<f64>,
        gross: Option<f64>,
    ) -> (Option<f64>, Option<MarginKind>) {
        if let Some(v) = net {
            return (Some(v), Some(MarginKind::Net));
        }
        if let Some(v) = operating {
            return (Some(v), Some(MarginKind::Operating));
        }
        if let Some(v) = gross {
            return (Some(v), Some(MarginKind::Gross));
        }
        (None, None)
    }
}

/// 同比增长 %。基数为 0 或缺失时无意义，返回 None；基数为负时按绝对值计算方向
pub fn yoy_pct(current: Option<f64>, year_ago: Option<f64>) -> Option<f64> {
    let (cur, prev) = (current?, year_ago?);
    if prev == 0.0 {
        return None;
    }
    Some((cur - prev) / prev.abs() * 100.0)
}

/// 对按时间从新到旧排列的季度序列，补全缺失的同比字段（与 4 个季度前比较）
pub fn fill_missing_yoy(quarters: &mut [QuarterlyFinancial]) {
    let len = quarters.len();
    for i in 0..len {
        if i + 4 >= len {
            break;
        }
        let (rev_ago, eps_ago) = (quarters[i + 4].revenue, quarters[i + 4].eps);
        let q = &mut quarters[i];
        if q.revenue_yoy_pct.is_none() {
            q.revenue_yoy_pct = yoy_pct(q.revenue, rev_ago);
        }
        if q.eps_yoy_pct.is_none() {
            q.eps_yoy_pct = yoy_pct(q.eps, eps_ago);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(period: &str, revenue: f64, eps: f64) -> QuarterlyFinancial {
        QuarterlyFinancial {
            period: period.to_string(),
            revenue: Some(revenue),
            revenue_yoy_pct: None,
            eps: Some(eps),
            eps_yoy_pct: None,
            margin_pct: None,
            margin_kind: None,
        }
    }

    #[test]
    fn test_margin_first_available_wins() {
        assert_eq!(
            QuarterlyFinancial::pick_margin(None, Some(12.0), Some(40.0)),
            (Some(12.0), Some(MarginKind::Operating))
        );
        assert_eq!(QuarterlyFinancial::pick_margin(None, None, None), (None, None));
    }

    #[test]
    fn test_yoy_negative_base() {
        // -0.5 -> 0.5 视为改善 200%
        assert_eq!(yoy_pct(Some(0.5), Some(-0.5)), Some(200.0));
        assert_eq!(yoy_pct(Some(1.0), Some(0.0)), None);
        assert_eq!(yoy_pct(None, Some(1.0)), None);
    }

    #[test]
    fn test_fill_missing_yoy_uses_year_ago_quarter() {
        let mut qs = vec![
            q("Q4 24", 150.0, 1.5),
            q("Q3 24", 140.0, 1.2),
            q("Q2 24", 130.0, 1.1),
            q("Q1 24", 120.0, 1.0),
            q("Q4 23", 100.0, 1.0),
        ];
        qs[1].eps_yoy_pct = Some(99.0);
        fill_missing_yoy(&mut qs);
        assert_eq!(qs[0].revenue_yoy_pct, Some(50.0));
        assert_eq!(qs[0].eps_yoy_pct, Some(50.0));
        // 已有值不覆盖，没有 4 季度前数据的保持 None
        assert_eq!(qs[1].eps_yoy_pct, Some(99.0));
        assert_eq!(qs[1].revenue_yoy_pct, None);
    }
}
