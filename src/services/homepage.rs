use std::sync::OnceLock;

use regex::Regex;

use crate::models::response::{BreadthPair, MarketAggregates};
use crate::services::scrape::{clean_html_text, compile_patterns, scan_section, AnchoredPattern, Extracted};

/// 市场宽度每一栏锚点之后的扫描窗口
pub const BREADTH_SCAN_WINDOW: usize = 2_000;

/// "53.2% (2845) (2453) 45.8%"
const PAIR_PATTERN: &str =
    r"(?P<pos_pct>[\d.]+)%\s*\((?P<pos>[\d,]+)\)\s*\((?P<neg>[\d,]+)\)\s*(?P<neg_pct>[\d.]+)%";
/// 只有家数、没有百分比的旧版布局
const COUNTS_PATTERN: &str = r"\((?P<pos>[\d,]+)\)\s*\((?P<neg>[\d,]+)\)";

#[derive(Debug, Clone, PartialEq)]
pub struct HomepageSnapshot {
    pub advancing: Extracted<BreadthPair>,
    pub new_high_low: Extracted<BreadthPair>,
    pub sma50: Extracted<BreadthPair>,
    pub sma200: Extracted<BreadthPair>,
}

impl HomepageSnapshot {
    pub fn is_empty(&self) -> bool {
        !(self.advancing.is_found()
            || self.new_high_low.is_found()
            || self.sma50.is_found()
            || self.sma200.is_found())
    }

    pub fn into_aggregates(self) -> MarketAggregates {
        MarketAggregates {
            advancing: self.advancing.into_option(),
            new_high_low: self.new_high_low.into_option(),
            sma50: self.sma50.into_option(),
            sma200: self.sma200.into_option(),
        }
    }
}

fn breadth_patterns(anchor: &'static str) -> Vec<AnchoredPattern> {
    compile_patterns(&[(anchor, PAIR_PATTERN), (anchor, COUNTS_PATTERN)])
}

fn pattern_sets() -> &'static [Vec<AnchoredPattern>; 4] {
    static SETS: OnceLock<[Vec<AnchoredPattern>; 4]> = OnceLock::new();
    SETS.get_or_init(|| {
        [
            breadth_patterns(">Advancing"),
            breadth_patterns(">New High"),
            breadth_patterns(">Above SMA50"),
            breadth_patterns(">Above SMA200"),
        ]
    })
}

pub fn parse_homepage(html: &str) -> HomepageSnapshot {
    let [advancing, new_high, sma50, sma200] = pattern_sets();
    HomepageSnapshot {
        advancing: scan_section(html, advancing, BREADTH_SCAN_WINDOW, extract_pair),
        new_high_low: scan_section(html, new_high, BREADTH_SCAN_WINDOW, extract_pair),
        sma50: scan_section(html, sma50, BREADTH_SCAN_WINDOW, extract_pair),
        sma200: scan_section(html, sma200, BREADTH_SCAN_WINDOW, extract_pair),
    }
}

fn extract_pair(slice: &str, re: &Regex) -> Option<BreadthPair> {
    let text = clean_html_text(slice);
    let caps = re.captures(&text)?;
    let count = |name: &str| -> Option<u32> { caps.name(name)?.as_str().replace(',', "").parse().ok() };
    let pct = |name: &str| -> Option<f64> { caps.name(name)?.as_str().parse().ok() };

    let (positive, negative) = (count("pos")?, count("neg")?);
    let total = positive + negative;
    let share = |n: u32| (total > 0).then(|| (n as f64 / total as f64 * 1000.0).round() / 10.0);

    Some(BreadthPair {
        positive,
        negative,
        positive_pct: pct("pos_pct").or_else(|| share(positive)),
        negative_pct: pct("neg_pct").or_else(|| share(negative)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOMEPAGE: &str = r#"
<div class="market-stats">
  <div class="market-stats_labels">
    <p class="market-stats_labels_left"><span>Advancing</span> <span>53.2% (2,845)</span></p>
    <p class="market-stats_labels_right"><span>(2453) 45.8%</span><span>Declining</span></p>
  </div>
</div>
<div class="market-stats">
  <p><span>New High</span> <span>61.0% (122)</span></p>
  <p><span>(78) 39.0%</span><span>New Low</span></p>
</div>
<div class="market-stats">
  <p><span>Above SMA50</span> <span>(3010)</span></p><p><span>(2290)</span><span>Below</span></p>
</div>
"#;

    #[test]
    fn test_primary_breadth_pairs() {
        let snap = parse_homepage(HOMEPAGE);
        assert_eq!(
            snap.advancing,
            Extracted::Primary(BreadthPair {
                positive: 2845,
                negative: 2453,
                positive_pct: Some(53.2),
                negative_pct: Some(45.8),
            })
        );
        assert_eq!(snap.new_high_low.value().map(|p| p.positive), Some(122));
    }

    #[test]
    fn test_counts_only_fallback_derives_percent() {
        let snap = parse_homepage(HOMEPAGE);
        match &snap.sma50 {
            Extracted::Fallback { pattern: 1, value } => {
                assert_eq!(value.positive, 3010);
                assert_eq!(value.negative, 2290);
                assert_eq!(value.positive_pct, Some(56.8));
            }
            other => panic!("expected counts fallback, got {:?}", other),
        }
        assert_eq!(snap.sma200, Extracted::NotFound);
    }

    #[test]
    fn test_unrelated_page_is_empty() {
        let snap = parse_homepage("<html><body><h1>Please log in</h1></body></html>");
        assert!(snap.is_empty());
        assert_eq!(snap.into_aggregates(), MarketAggregates::default());
    }
}
