use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;

/// 某个页面区块的抽取结果：命中了哪一个模式，或者没找到
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "match", content = "value", rename_all = "snake_case")]
pub enum Extracted<T> {
    NotFound,
    /// 首选模式命中
    Primary(T),
    /// 第 `pattern` 个备用模式命中（从 1 开始）
    Fallback { pattern: usize, value: T },
}

impl<T> Extracted<T> {
    pub fn is_found(&self) -> bool {
        !matches!(self, Extracted::NotFound)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Extracted::NotFound => None,
            Extracted::Primary(v) | Extracted::Fallback { value: v, .. } => Some(v),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Extracted::NotFound => None,
            Extracted::Primary(v) | Extracted::Fallback { value: v, .. } => Some(v),
        }
    }
}

/// 锚点 + 正则。正则只在锚点之后的有限窗口内匹配，避免串到别的区块
pub struct AnchoredPattern {
    pub anchor: &'static str,
    pub regex: Regex,
}

/// 编译一组模式；编译失败的模式记录日志后跳过
pub fn compile_patterns(defs: &[(&'static str, &str)]) -> Vec<AnchoredPattern> {
    defs
        .iter()
        .filter_map(|&(anchor, pattern)| match Regex::new(pattern) {
            Ok(regex) => Some(AnchoredPattern { anchor, regex }),
            Err(e) => {
                log::error!("抓取正则编译失败 {}: {}", pattern, e);
                None
            }
        })
        .collect()
}

/// 锚点首次出现处起最多 `window` 字节的切片（按字符边界截断）
pub fn window_after<'a>(html: &'a str, anchor: &str, window: usize) -> Option<&'a str> {
    let start = html.find(anchor)?;
    let mut end = (start + window).min(html.len());
    while !html.is_char_boundary(end) {
        end -= 1;
    }
    Some(&html[start..end])
}

/// 按顺序尝试各模式，第一个抽取出非空结果的胜出
pub fn scan_section<T, F>(html: &str, patterns: &[AnchoredPattern], window: usize, extract: F) -> Extracted<T>
where
    F: Fn(&str, &Regex) -> Option<T>,
{
    for (idx, p) in patterns.iter().enumerate() {
        let Some(slice) = window_after(html, p.anchor, window) else {
            continue;
        };
        if let Some(value) = extract(slice, &p.regex) {
            return if idx == 0 {
                Extracted::Primary(value)
            } else {
                Extracted::Fallback { pattern: idx, value }
            };
        }
    }
    Extracted::NotFound
}

/// 去标签、解常见实体、合并空白
pub fn clean_html_text(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for ch in fragment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    let decoded = decode_numeric_entities(&out)
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn numeric_entity_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));").ok()).as_ref()
}

/// `&#8217;` / `&#x27;` -> 对应字符，无效码点原样保留
fn decode_numeric_entities(text: &str) -> String {
    let Some(re) = numeric_entity_regex() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (None, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            _ => None,
        };
        match code.and_then(char::from_u32) {
            Some(ch) => ch.to_string(),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_respects_char_boundary() {
        let html = "xx<anchor>价格123";
        let w = window_after(html, "<anchor>", 10).unwrap();
        assert!(w.starts_with("<anchor>"));
        assert!(w.len() <= 10);
        assert!(window_after(html, "<missing>", 10).is_none());
    }

    #[test]
    fn test_scan_section_reports_fallback_index() {
        let patterns = compile_patterns(&[("<a1>", r"v=(\d+)"), ("<a2>", r"w=(\d+)")]);
        let html = "<a1>nothing here</a1> <a2>w=42</a2>";
        let got = scan_section(html, &patterns, 100, |s, re| {
            re.captures(s).map(|c| c[1].to_string())
        });
        assert_eq!(got, Extracted::Fallback { pattern: 1, value: "42".to_string() });
    }

    #[test]
    fn test_window_blocks_far_matches() {
        let patterns = compile_patterns(&[("<a1>", r"v=(\d+)")]);
        let html = format!("<a1>{}v=7", " ".repeat(500));
        let got: Extracted<String> = scan_section(&html, &patterns, 100, |s, re| {
            re.captures(s).map(|c| c[1].to_string())
        });
        assert_eq!(got, Extracted::NotFound);
    }

    #[test]
    fn test_clean_html_text() {
        assert_eq!(clean_html_text("<b>Apple&nbsp;Inc.</b>\n <i>&amp; Co</i>"), "Apple Inc. & Co");
    }

    #[test]
    fn test_clean_html_text_numeric_entities() {
        assert_eq!(clean_html_text("Apple&#x27;s iPhone&#8217;s &#39;17&#039;"), "Apple's iPhone\u{2019}s '17'");
        assert_eq!(clean_html_text("A&#X2014;B"), "A\u{2014}B");
        // 代理区码点无效，保持原样
        assert_eq!(clean_html_text("x&#xD800;y"), "x&#xD800;y");
        assert_eq!(clean_html_text("&amp;#39;"), "&#39;");
    }
}
