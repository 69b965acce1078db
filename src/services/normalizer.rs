use std::collections::HashMap;

use crate::models::stock::{AnnualGrowth, QuoteRecord};
use crate::services::tabular::RawRow;

/// 归一化后的行：规范字段名 -> 原始文本（只保留非空字段）
pub type CanonicalRow = HashMap<String, String>;

/// 字段值的解析方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Percent,
    /// 以百万为单位，可带 K/M/B/T 后缀（市值、流通股）
    Millions,
    /// 绝对数量，可带 K/M/B 后缀（成交量）
    Count,
}

/// 内置别名表：规范字段名、解析方式、上游历史上用过的列名（按优先级）。
/// 规范名本身总是第一个别名，保证 normalize 幂等。
const DEFAULT_ALIASES: &[(&str, FieldKind, &[&str])] = &[
    ("ticker", FieldKind::Text, &["Ticker", "Symbol"]),
    ("company", FieldKind::Text, &["Company", "Company Name", "Name"]),
    ("sector", FieldKind::Text, &["Sector"]),
    ("industry", FieldKind::Text, &["Industry"]),
    ("country", FieldKind::Text, &["Country"]),
    ("market_cap", FieldKind::Millions, &["Market Cap", "Market Cap.", "Mkt Cap"]),
    ("pe", FieldKind::Number, &["P/E", "PE", "Price/Earnings"]),
    ("price", FieldKind::Number, &["Price", "Last", "Close"]),
    ("change", FieldKind::Percent, &["Change", "Change %", "Chg"]),
    ("gap", FieldKind::Percent, &["Gap", "Gap %"]),
    ("volume", FieldKind::Count, &["Volume"]),
    ("avg_volume", FieldKind::Count, &["Average Volume", "Avg Volume", "Avg. Volume"]),
    ("rel_volume", FieldKind::Number, &["Relative Volume", "Rel Volume", "Rel. Volume", "RVOL"]),
    ("perf_week", FieldKind::Percent, &["Performance (Week)", "Perf Week"]),
    ("perf_month", FieldKind::Percent, &["Performance (Month)", "Perf Month"]),
    ("perf_quarter", FieldKind::Percent, &["Performance (Quarter)", "Perf Quarter"]),
    ("atr", FieldKind::Number, &["Average True Range", "ATR", "ATR (14)"]),
    ("rsi", FieldKind::Number, &["Relative Strength Index (14)", "RSI (14)", "RSI"]),
    ("sma20", FieldKind::Percent, &["20-Day Simple Moving Average", "SMA20"]),
    ("sma50", FieldKind::Percent, &["50-Day Simple Moving Average", "SMA50"]),
    ("sma200", FieldKind::Percent, &["200-Day Simple Moving Average", "SMA200"]),
    ("high_52w", FieldKind::Percent, &["52-Week High", "52W High"]),
    ("low_52w", FieldKind::Percent, &["52-Week Low", "52W Low"]),
    ("earnings", FieldKind::Text, &["Earnings Date", "Earnings"]),
    ("float", FieldKind::Millions, &["Shares Float", "Shs Float", "Float"]),
    ("inst_own", FieldKind::Percent, &["Institutional Ownership", "Inst Own"]),
    ("short_float", FieldKind::Percent, &["Float Short", "Short Float", "Short Float / Ratio"]),
    ("volatility_month", FieldKind::Percent, &["Volatility (Month)", "Volatility M", "Volatility"]),
    ("recom", FieldKind::Number, &["Analyst Recom", "Recom"]),
    ("ipo_date", FieldKind::Text, &["IPO Date", "IPO"]),
    ("eps_this_y", FieldKind::Percent, &["EPS growth this year", "EPS this Y"]),
    ("eps_next_y", FieldKind::Percent, &["EPS growth next year", "EPS next Y"]),
    ("eps_past_5y", FieldKind::Percent, &["EPS growth past 5 years", "EPS past 5Y"]),
    ("sales_past_5y", FieldKind::Percent, &["Sales growth past 5 years", "Sales past 5Y"]),
    ("eps_qoq", FieldKind::Percent, &["EPS growth quarter over quarter", "EPS Q/Q"]),
    ("sales_qoq", FieldKind::Percent, &["Sales growth quarter over quarter", "Sales Q/Q"]),
];

#[derive(Debug, Clone)]
struct AliasEntry {
    canonical: String,
    kind: FieldKind,
    aliases: Vec<String>,
}

/// 数据驱动的表头别名表。上游改列名时只需追加别名配置，不改代码。
#[derive(Debug, Clone)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
}

impl Default for AliasTable {
    fn default() -> Self {
        let entries = DEFAULT_ALIASES
            .iter()
            .map(|(canonical, kind, aliases)| AliasEntry {
                canonical: canonical.to_string(),
                kind: *kind,
                aliases: std::iter::once(canonical.to_string())
                    .chain(aliases.iter().map(|a| a.to_string()))
                    .collect(),
            })
            .collect();
        Self { entries }
    }
}

impl AliasTable {
    /// 在内置别名之后追加配置中的别名；未知的规范名忽略并告警
    pub fn with_extra(extra: &HashMap<String, Vec<String>>) -> Self {
        let mut table = Self::default();
        for (canonical, aliases) in extra {
            match table.entries.iter_mut().find(|e| &e.canonical == canonical) {
                Some(entry) => {
                    for a in aliases {
                        if !entry.aliases.contains(a) {
                            entry.aliases.push(a.clone());
                        }
                    }
                }
                None => log::warn!("忽略未知字段的别名配置: {}", canonical),
            }
        }
        table
    }

    pub fn aliases(&self, canonical: &str) -> &[String] {
        self.entries
            .iter()
            .find(|e| e.canonical == canonical)
            .map(|e| e.aliases.as_slice())
            .unwrap_or(&[])
    }

    pub fn kind(&self, canonical: &str) -> Option<FieldKind> {
        self.entries.iter().find(|e| e.canonical == canonical).map(|e| e.kind)
    }

    /// 每个规范字段取别名列表中第一个非空值
    pub fn normalize_row(&self, raw: &RawRow) -> CanonicalRow {
        let mut out = CanonicalRow::new();
        for entry in &self.entries {
            let value = entry
                .aliases
                .iter()
                .filter_map(|a| raw.get(a))
                .map(|v| v.trim())
                .find(|v| !v.is_empty());
            if let Some(v) = value {
                out.insert(entry.canonical.clone(), v.to_string());
            }
        }
        out
    }

    /// 上游返回的列里没有被任何别名覆盖的，用于格式漂移日志
    pub fn unknown_headers<'a>(&self, headers: &'a [String]) -> Vec<&'a str> {
        headers
            .iter()
            .filter(|h| !h.is_empty() && h.as_str() != "No.")
            .filter(|h| !self.entries.iter().any(|e| e.aliases.iter().any(|a| a == *h)))
            .map(|h| h.as_str())
            .collect()
    }

    pub fn number(&self, row: &CanonicalRow, canonical: &str) -> Option<f64> {
        let raw = row.get(canonical)?;
        match self.kind(canonical)? {
            FieldKind::Text => None,
            FieldKind::Number => coerce_number(raw),
            FieldKind::Percent => coerce_percent(raw),
            FieldKind::Millions => coerce_millions(raw),
            FieldKind::Count => coerce_count(raw),
        }
    }

    /// 从归一化行构造行情记录，缺少代码的行返回 None
    pub fn quote_from_row(&self, row: &CanonicalRow) -> Option<QuoteRecord> {
        let ticker = row.get("ticker")?.trim().to_uppercase();
        if ticker.is_empty() {
            return None;
        }
        let text = |k: &str| row.get(k).cloned().unwrap_or_default();
        let opt_text = |k: &str| row.get(k).filter(|v| coerce_text(v).is_some()).cloned();
        let num = |k: &str| self.number(row, k);

        Some(QuoteRecord {
            ticker,
            company: text("company"),
            sector: text("sector"),
            industry: text("industry"),
            country: text("country"),
            price: num("price"),
            change_pct: num("change"),
            gap_pct: num("gap"),
            volume: num("volume"),
            avg_volume: num("avg_volume"),
            rel_volume: num("rel_volume"),
            perf_week: num("perf_week"),
            perf_month: num("perf_month"),
            perf_quarter: num("perf_quarter"),
            atr: num("atr"),
            rsi: num("rsi"),
            sma20_pct: num("sma20"),
            sma50_pct: num("sma50"),
            sma200_pct: num("sma200"),
            high_52w_pct: num("high_52w"),
            low_52w_pct: num("low_52w"),
            pe: num("pe"),
            earnings_date: opt_text("earnings"),
            market_cap_m: num("market_cap"),
            float_m: num("float"),
            inst_own_pct: num("inst_own"),
            short_float_pct: num("short_float"),
            volatility_month_pct: num("volatility_month"),
            analyst_recom: num("recom"),
            ipo_date: opt_text("ipo_date"),
            annual: AnnualGrowth {
                eps_this_y: num("eps_this_y"),
                eps_next_y: num("eps_next_y"),
                eps_past_5y: num("eps_past_5y"),
                sales_past_5y: num("sales_past_5y"),
                eps_qoq: num("eps_qoq"),
                sales_qoq: num("sales_qoq"),
            },
        })
    }
}

/// 使用内置别名表归一化
pub fn normalize_row(raw: &RawRow) -> CanonicalRow {
    AliasTable::default().normalize_row(raw)
}

fn coerce_text(raw: &str) -> Option<&str> {
    let s = raw.trim();
    if s.is_empty() || s == "-" || s.eq_ignore_ascii_case("n/a") {
        None
    } else {
        Some(s)
    }
}

/// "1,234.5" -> 1234.5；"-" / 空 / 非数字 -> None
pub fn coerce_number(raw: &str) -> Option<f64> {
    let s = coerce_text(raw)?;
    let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// "12.5%" -> 12.5。字段含多个数值时（如 "199.62 -3.20%"）取最后一个带 % 的
pub fn coerce_percent(raw: &str) -> Option<f64> {
    let s = coerce_text(raw)?;
    let token = if s.split_whitespace().count() > 1 {
        s.split_whitespace().filter(|t| t.ends_with('%')).last()?
    } else {
        s
    };
    coerce_number(token.trim_end_matches('%'))
}

fn split_suffix(s: &str) -> (&str, Option<char>) {
    match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - c.len_utf8()], Some(c.to_ascii_uppercase())),
        _ => (s, None),
    }
}

/// 以百万为单位："3.4T" -> 3_400_000，"850K" -> 0.85，无后缀原样
pub fn coerce_millions(raw: &str) -> Option<f64> {
    let s = coerce_text(raw)?;
    let (num, suffix) = split_suffix(s);
    let v = coerce_number(num)?;
    match suffix {
        None | Some('M') => Some(v),
        Some('K') => Some(v / 1_000.0),
        Some('B') => Some(v * 1_000.0),
        Some('T') => Some(v * 1_000_000.0),
        Some(_) => None,
    }
}

/// 带 K/M/B/T 缩写的绝对数值："45.6M" -> 45_600_000
pub fn coerce_abbreviated(raw: &str) -> Option<f64> {
    let s = coerce_text(raw)?;
    let (num, suffix) = split_suffix(s);
    let v = coerce_number(num)?;
    match suffix {
        None => Some(v),
        Some('K') => Some(v * 1e3),
        Some('M') => Some(v * 1e6),
        Some('B') => Some(v * 1e9),
        Some('T') => Some(v * 1e12),
        Some(_) => None,
    }
}

/// 成交量等绝对数量
pub fn coerce_count(raw: &str) -> Option<f64> {
    coerce_abbreviated(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> RawRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_coerce_percent() {
        assert_eq!(coerce_percent("-"), None);
        assert_eq!(coerce_percent(""), None);
        assert_eq!(coerce_percent("12.5%"), Some(12.5));
        assert_eq!(coerce_percent("-3.20%"), Some(-3.2));
        assert_eq!(coerce_percent("199.62 -3.20%"), Some(-3.2));
        assert_eq!(coerce_percent("abc%"), None);
    }

    #[test]
    fn test_coerce_number() {
        assert_eq!(coerce_number("1,234"), Some(1234.0));
        assert_eq!(coerce_number(" 0.00 "), Some(0.0));
        assert_eq!(coerce_number("-"), None);
        assert_eq!(coerce_number("N/A"), None);
        assert_eq!(coerce_number("12x"), None);
        assert_eq!(coerce_number("NaN"), None);
    }

    #[test]
    fn test_coerce_suffixed() {
        assert_eq!(coerce_millions("3.4T"), Some(3_400_000.0));
        assert_eq!(coerce_millions("15.32M"), Some(15.32));
        assert_eq!(coerce_millions("2.1B"), Some(2100.0));
        assert_eq!(coerce_millions("512.25"), Some(512.25));
        assert_eq!(coerce_count("45.6M"), Some(45_600_000.0));
        assert_eq!(coerce_count("12,345,678"), Some(12_345_678.0));
        assert_eq!(coerce_count("-"), None);
        assert_eq!(coerce_abbreviated("1.2T"), Some(1.2e12));
        assert_eq!(coerce_abbreviated("3X"), None);
    }

    #[test]
    fn test_alias_fallback_order() {
        let row = normalize_row(&raw(&[
            ("Ticker", "AAPL"),
            ("Average Volume", ""),
            ("Avg Volume", "55.2M"),
            ("Rel Volume", "1.3"),
        ]));
        assert_eq!(row["avg_volume"], "55.2M");
        assert_eq!(row["rel_volume"], "1.3");
        assert!(!row.contains_key("volume"));
    }

    #[test]
    fn test_normalize_idempotent_on_canonical_input() {
        let canonical = raw(&[("ticker", "NVDA"), ("price", "120.5"), ("change", "3.1%"), ("rel_volume", "2.0")]);
        let once = normalize_row(&canonical);
        assert_eq!(once, canonical);
        assert_eq!(normalize_row(&once), once);

        let upstream = normalize_row(&raw(&[("Ticker", "NVDA"), ("Relative Volume", "2.0")]));
        assert_eq!(normalize_row(&upstream), upstream);
    }

    #[test]
    fn test_extra_aliases_from_config() {
        let mut extra = HashMap::new();
        extra.insert("rel_volume".to_string(), vec!["Volume Ratio".to_string()]);
        extra.insert("bogus".to_string(), vec!["X".to_string()]);
        let table = AliasTable::with_extra(&extra);
        let row = table.normalize_row(&raw(&[("Ticker", "AMD"), ("Volume Ratio", "4.5")]));
        assert_eq!(table.number(&row, "rel_volume"), Some(4.5));
        assert_eq!(table.aliases("rel_volume").first().map(|s| s.as_str()), Some("rel_volume"));
    }

    #[test]
    fn test_quote_nulls_never_zero() {
        let table = AliasTable::default();
        let row = table.normalize_row(&raw(&[
            ("Ticker", "aapl"),
            ("Price", "189.5"),
            ("Change", "-"),
            ("P/E", ""),
            ("Earnings Date", "-"),
            ("Shares Float", "15,100.2"),
        ]));
        let q = table.quote_from_row(&row).unwrap();
        assert_eq!(q.ticker, "AAPL");
        assert_eq!(q.price, Some(189.5));
        assert_eq!(q.change_pct, None);
        assert_eq!(q.pe, None);
        assert_eq!(q.earnings_date, None);
        assert_eq!(q.float_m, Some(15_100.2));
    }

    #[test]
    fn test_unknown_headers() {
        let table = AliasTable::default();
        let headers = vec!["No.".to_string(), "Ticker".to_string(), "Beta".to_string()];
        assert_eq!(table.unknown_headers(&headers), vec!["Beta"]);
    }
}
