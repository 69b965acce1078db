use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::models::financial::{fill_missing_yoy, QuarterlyFinancial};
use crate::models::stock::NewsItem;
use crate::services::normalizer::{coerce_millions, coerce_number, coerce_percent};
use crate::services::scrape::{clean_html_text, compile_patterns, scan_section, AnchoredPattern, Extracted};

/// 各区块锚点之后允许扫描的最大字节数
pub const SNAPSHOT_SCAN_WINDOW: usize = 40_000;
pub const NEWS_SCAN_WINDOW: usize = 80_000;
pub const PEERS_SCAN_WINDOW: usize = 6_000;
pub const PROFILE_SCAN_WINDOW: usize = 12_000;
pub const QUARTERLY_SCAN_WINDOW: usize = 40_000;

const MAX_NEWS_ITEMS: usize = 30;

/// 个股页面各区块的抽取结果
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPage {
    pub fields: Extracted<BTreeMap<String, String>>,
    pub news: Extracted<Vec<NewsItem>>,
    pub peers: Extracted<Vec<String>>,
    pub profile: Extracted<String>,
    pub quarterly: Extracted<Vec<QuarterlyFinancial>>,
}

pub fn parse_snapshot_page(html: &str) -> SnapshotPage {
    SnapshotPage {
        fields: scan_section(html, snapshot_patterns(), SNAPSHOT_SCAN_WINDOW, extract_label_pairs),
        news: scan_section(html, news_patterns(), NEWS_SCAN_WINDOW, extract_news),
        peers: scan_section(html, peer_patterns(), PEERS_SCAN_WINDOW, extract_peers),
        profile: scan_section(html, profile_patterns(), PROFILE_SCAN_WINDOW, extract_profile),
        quarterly: scan_section(html, quarterly_patterns(), QUARTERLY_SCAN_WINDOW, extract_quarterly),
    }
}

fn snapshot_patterns() -> &'static [AnchoredPattern] {
    static PATTERNS: OnceLock<Vec<AnchoredPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile_patterns(&[
            (
                "snapshot-table2",
                r#"(?s)<td[^>]*class="snapshot-td2[^"]*"[^>]*>(.*?)</td>\s*<td[^>]*class="snapshot-td2[^"]*"[^>]*>(.*?)</td>"#,
            ),
            (
                "snapshot-table",
                r#"(?s)<div[^>]*class="snapshot-td-label"[^>]*>(.*?)</div>\s*<div[^>]*class="snapshot-td-content"[^>]*>(.*?)</div>"#,
            ),
            ("snapshot-table2", r#"(?s)<td[^>]*>(.*?)</td>\s*<td[^>]*>(.*?)</td>"#),
        ])
    })
}

fn news_patterns() -> &'static [AnchoredPattern] {
    static PATTERNS: OnceLock<Vec<AnchoredPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile_patterns(&[
            (
                "id=\"news-table\"",
                r#"(?s)<tr[^>]*>\s*<td[^>]*>(?P<date>.*?)</td>\s*<td[^>]*>.*?<a[^>]*href="(?P<url>[^"]+)"[^>]*class="tab-link-news"[^>]*>(?P<title>.*?)</a>(?P<rest>.*?)</tr>"#,
            ),
            (
                "id=\"news-table\"",
                r#"(?s)<a[^>]*class="tab-link-news"[^>]*href="(?P<url>[^"]+)"[^>]*>(?P<title>.*?)</a>"#,
            ),
            (
                "id=\"news-table\"",
                r#"(?s)<a[^>]*class="nn-tab-link"[^>]*href="(?P<url>[^"]+)"[^>]*>(?P<title>.*?)</a>"#,
            ),
        ])
    })
}

fn peer_patterns() -> &'static [AnchoredPattern] {
    static PATTERNS: OnceLock<Vec<AnchoredPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile_patterns(&[
            ("quote-links", r#"screener\.ashx\?t=([A-Z0-9.,\-]+)[^"]*"[^>]*>\s*Peers"#),
            (">Peers<", r#"quote\.ashx\?t=([A-Z0-9.\-]+)"#),
        ])
    })
}

fn profile_patterns() -> &'static [AnchoredPattern] {
    static PATTERNS: OnceLock<Vec<AnchoredPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile_patterns(&[
            ("quote_profile-bio", r#"(?s)^[^>]*>(.*?)</(?:td|div)>"#),
            ("fullview-profile", r#"(?s)^[^>]*>(.*?)</td>"#),
            ("<meta name=\"description\"", r#"<meta name="description" content="([^"]+)""#),
        ])
    })
}

fn quarterly_patterns() -> &'static [AnchoredPattern] {
    static PATTERNS: OnceLock<Vec<AnchoredPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile_patterns(&[
            ("id=\"statements-quarterly\"", r#"(?s)^[^>]*>(.*?)</table>"#),
            ("financials-table", r#"(?s)^[^>]*>(.*?)</table>"#),
        ])
    })
}

fn extract_label_pairs(slice: &str, re: &Regex) -> Option<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    for caps in re.captures_iter(slice) {
        let label = clean_html_text(&caps[1]);
        let value = clean_html_text(&caps[2]);
        if label.is_empty() || value.is_empty() {
            continue;
        }
        fields.entry(label).or_insert(value);
    }
    (!fields.is_empty()).then_some(fields)
}

fn extract_news(slice: &str, re: &Regex) -> Option<Vec<NewsItem>> {
    let mut items = Vec::new();
    // 同一天的后续新闻只显示时间，沿用上一条的日期
    let mut current_date: Option<String> = None;

    for caps in re.captures_iter(slice) {
        let title = clean_html_text(caps.name("title").map(|m| m.as_str()).unwrap_or(""));
        let url = caps.name("url").map(|m| m.as_str().trim().to_string()).unwrap_or_default();
        if title.is_empty() || url.is_empty() {
            continue;
        }

        let stamp = clean_html_text(caps.name("date").map(|m| m.as_str()).unwrap_or(""));
        let published = match stamp.split_once(' ') {
            Some((date, time)) => {
                current_date = Some(date.to_string());
                format!("{} {}", date, time)
            }
            None if !stamp.is_empty() => match &current_date {
                Some(date) => format!("{} {}", date, stamp),
                None => stamp,
            },
            None => String::new(),
        };

        let source = caps
            .name("rest")
            .map(|m| clean_html_text(m.as_str()))
            .unwrap_or_default()
            .trim_matches(|c| c == '(' || c == ')' || c == ' ')
            .to_string();

        items.push(NewsItem { published, title, url, source });
        if items.len() >= MAX_NEWS_ITEMS {
            break;
        }
    }
    (!items.is_empty()).then_some(items)
}

fn extract_peers(slice: &str, re: &Regex) -> Option<Vec<String>> {
    let mut peers: Vec<String> = Vec::new();
    for caps in re.captures_iter(slice) {
        for t in caps[1].split(',') {
            let t = t.trim().to_uppercase();
            if !t.is_empty() && !peers.contains(&t) {
                peers.push(t);
            }
        }
    }
    (!peers.is_empty()).then_some(peers)
}

fn extract_profile(slice: &str, re: &Regex) -> Option<String> {
    let caps = re.captures(slice)?;
    let text = clean_html_text(&caps[1]);
    (!text.is_empty()).then_some(text)
}

fn extract_quarterly(slice: &str, re: &Regex) -> Option<Vec<QuarterlyFinancial>> {
    let caps = re.captures(slice)?;
    parse_statement_table(&caps[1])
}

/// 财报表行名 -> 字段
const STATEMENT_ROWS: &[(&str, &[&str])] = &[
    ("revenue", &["total revenue", "revenue", "sales", "net sales"]),
    ("revenue_yoy", &["revenue yoy", "revenue growth", "sales yoy", "sales growth"]),
    ("eps", &["eps (diluted)", "diluted eps", "eps diluted", "eps"]),
    ("eps_yoy", &["eps yoy", "eps growth", "eps (diluted) yoy"]),
    ("net_margin", &["net margin", "net profit margin", "profit margin"]),
    ("operating_margin", &["operating margin", "oper. margin"]),
    ("gross_margin", &["gross margin"]),
];

fn row_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<tr[^>]*>(.*?)</tr>").ok()).as_ref()
}

fn cell_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<t[dh][^>]*>(.*?)</t[dh]>").ok()).as_ref()
}

/// 解析季度财报表：首行为期间标签，其余每行第一格为行名
fn parse_statement_table(table: &str) -> Option<Vec<QuarterlyFinancial>> {
    let (row_re, cell_re) = (row_regex()?, cell_regex()?);
    let rows: Vec<Vec<String>> = row_re
        .captures_iter(table)
        .map(|r| cell_re.captures_iter(&r[1]).map(|c| clean_html_text(&c[1])).collect::<Vec<_>>())
        .filter(|cells| cells.len() >= 2)
        .collect();

    let (header, body) = rows.split_first()?;
    let periods: Vec<&String> = header[1..].iter().collect();

    let mut by_field: BTreeMap<&str, &[String]> = BTreeMap::new();
    for cells in body {
        let label = cells[0].trim_end_matches(':').trim().to_lowercase();
        for (field, aliases) in STATEMENT_ROWS {
            if aliases.contains(&label.as_str()) && !by_field.contains_key(field) {
                by_field.insert(field, &cells[1..]);
            }
        }
    }

    let cell = |field: &str, col: usize| -> Option<&str> {
        by_field.get(field).and_then(|vals| vals.get(col)).map(|s| s.as_str())
    };

    let mut quarters: Vec<(Option<(i32, u32)>, QuarterlyFinancial)> = Vec::new();
    for (col, period) in periods.iter().enumerate() {
        let period = period.trim();
        if period.is_empty() || period.eq_ignore_ascii_case("ttm") {
            continue;
        }
        let (margin_pct, margin_kind) = QuarterlyFinancial::pick_margin(
            cell("net_margin", col).and_then(coerce_percent),
            cell("operating_margin", col).and_then(coerce_percent),
            cell("gross_margin", col).and_then(coerce_percent),
        );
        let q = QuarterlyFinancial {
            period: period.to_string(),
            revenue: cell("revenue", col).and_then(coerce_millions),
            revenue_yoy_pct: cell("revenue_yoy", col).and_then(coerce_percent),
            eps: cell("eps", col).and_then(coerce_number),
            eps_yoy_pct: cell("eps_yoy", col).and_then(coerce_percent),
            margin_pct,
            margin_kind,
        };
        if q.revenue.is_some() || q.eps.is_some() {
            quarters.push((parse_period_key(period), q));
        }
    }

    // 期间标签都能识别时按时间从新到旧排序，否则保留页面顺序（默认新在前）
    if !quarters.is_empty() && quarters.iter().all(|(k, _)| k.is_some()) {
        quarters.sort_by(|a, b| b.0.cmp(&a.0));
    }
    let mut quarters: Vec<QuarterlyFinancial> = quarters.into_iter().map(|(_, q)| q).collect();
    fill_missing_yoy(&mut quarters);
    (!quarters.is_empty()).then_some(quarters)
}

fn period_regexes() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"(?i)^Q([1-4])\W*'?(\d{2}|\d{4})$",
            r"(?i)^([1-4])Q\W*'?(\d{2}|\d{4})$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// "Q3 2024" / "3Q24" / "9/30/2024" / "2024-09-30" -> (年, 季度)
pub fn parse_period_key(label: &str) -> Option<(i32, u32)> {
    let s = label.trim();
    for fmt in ["%m/%d/%Y", "%Y-%m-%d", "%m/%d/%y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some((d.year(), (d.month() - 1) / 3 + 1));
        }
    }
    for re in period_regexes() {
        if let Some(caps) = re.captures(s) {
            let quarter: u32 = caps[1].parse().ok()?;
            let mut year: i32 = caps[2].parse().ok()?;
            if year < 100 {
                year += 2000;
            }
            return Some((year, quarter));
        }
    }
    None
}
