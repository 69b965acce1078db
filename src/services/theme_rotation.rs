use std::collections::HashMap;

use crate::models::settings::ThemeDefinition;
use crate::models::signal::ThemeRotation;
use crate::models::stock::QuoteRecord;

const BREADTH_WEIGHT: f64 = 40.0;
const VOLUME_WEIGHT: f64 = 35.0;
const SHIFT_WEIGHT: f64 = 25.0;

/// 轮动得分达到该值的主题视为领涨主题
pub const LEADING_THEME_SCORE: u32 = 60;

fn unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// score = 40·breadth/100 + 35·clamp((rvol−0.5)/2.5) + 25·clamp((Δbreadth+30)/60)
pub fn rotation_score(breadth_pct: f64, avg_rel_volume: f64, breadth_shift: f64) -> u32 {
    let raw = BREADTH_WEIGHT * breadth_pct / 100.0
        + VOLUME_WEIGHT * unit((avg_rel_volume - 0.5) / 2.5)
        + SHIFT_WEIGHT * unit((breadth_shift + 30.0) / 60.0);
    raw.max(0.0).round() as u32
}

fn share_positive(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let up = values.iter().filter(|v| **v > 0.0).count();
    Some(up as f64 / values.len() as f64 * 100.0)
}

/// 计算各主题的轮动强度，按得分降序返回。没有任何成员数据的主题跳过。
///
/// 基线宽度取成员近一周表现为正的占比，Δ宽度 = 当日宽度 − 基线；
/// 缺少周表现时 Δ 按 0 处理。
pub fn score_themes(themes: &[ThemeDefinition], quotes: &[QuoteRecord]) -> Vec<ThemeRotation> {
    let by_ticker: HashMap<&str, &QuoteRecord> = quotes.iter().map(|q| (q.ticker.as_str(), q)).collect();

    let mut rotations: Vec<ThemeRotation> = themes
        .iter()
        .filter_map(|theme| {
            let members: Vec<&QuoteRecord> = theme
                .tickers
                .iter()
                .filter_map(|t| by_ticker.get(t.trim().to_uppercase().as_str()).copied())
                .collect();

            let changes: Vec<f64> = members.iter().filter_map(|q| q.change_pct).collect();
            if changes.is_empty() {
                return None;
            }
            let avg_change_pct = changes.iter().sum::<f64>() / changes.len() as f64;
            let breadth_pct = share_positive(&changes)?;

            let rvols: Vec<f64> = members.iter().filter_map(|q| q.rel_volume).filter(|v| *v > 0.0).collect();
            let avg_rel_volume = if rvols.is_empty() {
                0.0
            } else {
                rvols.iter().sum::<f64>() / rvols.len() as f64
            };

            let weekly: Vec<f64> = members.iter().filter_map(|q| q.perf_week).collect();
            let baseline_breadth_pct = share_positive(&weekly);
            let shift = baseline_breadth_pct.map(|b| breadth_pct - b).unwrap_or(0.0);

            Some(ThemeRotation {
                theme: theme.name.clone(),
                members: members.len(),
                avg_change_pct: round2(avg_change_pct),
                breadth_pct: round2(breadth_pct),
                avg_rel_volume: round2(avg_rel_volume),
                baseline_breadth_pct: baseline_breadth_pct.map(round2),
                score: rotation_score(breadth_pct, avg_rel_volume, shift),
            })
        })
        .collect();

    rotations.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.theme.cmp(&b.theme)));
    rotations
}

/// 代码 -> 所属领涨主题（取得分最高的那个）
pub fn leading_theme_index<'a>(
    themes: &'a [ThemeDefinition],
    rotations: &[ThemeRotation],
) -> HashMap<String, &'a str> {
    let mut index = HashMap::new();
    for rotation in rotations.iter().filter(|r| r.score >= LEADING_THEME_SCORE) {
        let Some(theme) = themes.iter().find(|t| t.name == rotation.theme) else {
            continue;
        };
        for ticker in &theme.tickers {
            index.entry(ticker.trim().to_uppercase()).or_insert(theme.name.as_str());
        }
    }
    index
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theme(name: &str, tickers: &[&str]) -> ThemeDefinition {
        ThemeDefinition {
            name: name.to_string(),
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn quote(ticker: &str, change: f64, rvol: Option<f64>, week: Option<f64>) -> QuoteRecord {
        QuoteRecord {
            ticker: ticker.to_string(),
            change_pct: Some(change),
            rel_volume: rvol,
            perf_week: week,
            ..Default::default()
        }
    }

    #[test]
    fn test_rotation_score_bounds() {
        assert_eq!(rotation_score(100.0, 10.0, 100.0), 100);
        assert_eq!(rotation_score(0.0, 0.0, -100.0), 0);
        for breadth in [0.0, 25.0, 50.0, 100.0] {
            for rvol in [0.0, 0.5, 1.5, 3.0, 8.0] {
                for shift in [-100.0, -30.0, 0.0, 30.0, 100.0] {
                    assert!(rotation_score(breadth, rvol, shift) <= 100);
                }
            }
        }
    }

    #[test]
    fn test_rotation_score_formula() {
        // 40*0.5 + 35*(1.0/2.5) + 25*(30/60) = 20 + 14 + 12.5
        assert_eq!(rotation_score(50.0, 1.5, 0.0), 47);
    }

    #[test]
    fn test_score_themes_aggregates_members() {
        let themes = vec![theme("Quantum", &["IONQ", "RGTI", "QBTS", "QUBT"]), theme("Empty", &["ZZZZ"])];
        let quotes = vec![
            quote("IONQ", 8.0, Some(3.0), Some(-2.0)),
            quote("RGTI", 4.0, Some(2.0), Some(-1.0)),
            quote("QBTS", -2.0, Some(0.0), Some(3.0)),
        ];
        let rotations = score_themes(&themes, &quotes);
        assert_eq!(rotations.len(), 1);
        let r = &rotations[0];
        assert_eq!(r.members, 3);
        assert_eq!(r.avg_change_pct, 3.33);
        assert_eq!(r.breadth_pct, 66.67);
        // 0 的量比不计入平均
        assert_eq!(r.avg_rel_volume, 2.5);
        assert_eq!(r.baseline_breadth_pct, Some(33.33));
        // 40*0.6667 + 35*0.8 + 25*min(1, (33.33+30)/60) = 26.67 + 28 + 25
        assert_eq!(r.score, 80);
    }

    #[test]
    fn test_missing_baseline_means_no_shift() {
        let themes = vec![theme("Space", &["RKLB"])];
        let rotations = score_themes(&themes, &[quote("RKLB", 5.0, None, None)]);
        assert_eq!(rotations[0].baseline_breadth_pct, None);
        // 40 + 0 + 12.5
        assert_eq!(rotations[0].score, 53);
    }

    #[test]
    fn test_leading_theme_index() {
        let themes = vec![theme("Quantum", &["IONQ"]), theme("Space", &["RKLB"])];
        let rotations = vec![
            ThemeRotation {
                theme: "Quantum".into(),
                members: 1,
                avg_change_pct: 8.0,
                breadth_pct: 100.0,
                avg_rel_volume: 3.0,
                baseline_breadth_pct: None,
                score: 80,
            },
            ThemeRotation {
                theme: "Space".into(),
                members: 1,
                avg_change_pct: -1.0,
                breadth_pct: 0.0,
                avg_rel_volume: 1.0,
                baseline_breadth_pct: None,
                score: 20,
            },
        ];
        let index = leading_theme_index(&themes, &rotations);
        assert_eq!(index.get("IONQ"), Some(&"Quantum"));
        assert!(!index.contains_key("RKLB"));
    }
}
