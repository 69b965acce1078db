use std::collections::HashMap;

/// 一行原始数据：上游表头 -> 字段文本
pub type RawRow = HashMap<String, String>;

const DELIMITER: char = ',';
const QUOTE: char = '"';

/// 解析上游 CSV 导出。
///
/// 第一行为表头；引号内的逗号不拆分；字段去除首尾空白；
/// 字段数不足的行用空串补齐，多余字段丢弃；空行忽略。
pub fn parse_delimited(text: &str) -> Vec<RawRow> {
    let mut lines = text
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty());

    let headers = match lines.next() {
        Some(line) => split_fields(line.trim_start_matches('\u{feff}')),
        None => return vec![],
    };

    lines
        .map(|line| {
            let mut fields = split_fields(line).into_iter();
            headers
                .iter()
                .map(|h| (h.clone(), fields.next().unwrap_or_default()))
                .collect()
        })
        .collect()
}

/// 表头列表（保持上游顺序），用于格式漂移日志
pub fn header_names(text: &str) -> Vec<String> {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| split_fields(l.trim_start_matches('\u{feff}')))
        .unwrap_or_default()
}

/// 引号感知的逐字符扫描：遇到 `"` 切换 in-quote 状态，仅在引号外按分隔符切分
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            QUOTE => in_quotes = !in_quotes,
            DELIMITER if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_fields_with_embedded_delimiters() {
        let text = "\"No.\",\"Ticker\",\"Company\",\"Market Cap\"\n\
                    \"1\",\"AAPL\",\"Apple Inc.\",\"3,400,000.00\"\n\
                    \"2\",\"BRK-B\",\"Berkshire Hathaway, Inc.\",\"900,000\"\n";
        let rows = parse_delimited(text);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 4);
        assert_eq!(rows[0]["Market Cap"], "3,400,000.00");
        assert_eq!(rows[1]["Company"], "Berkshire Hathaway, Inc.");
        assert_eq!(rows[1]["Ticker"], "BRK-B");
    }

    #[test]
    fn test_short_rows_are_padded() {
        let rows = parse_delimited("Ticker,Price,Change\nAAPL,189.5\n");
        assert_eq!(rows[0]["Price"], "189.5");
        assert_eq!(rows[0]["Change"], "");
    }

    #[test]
    fn test_blank_lines_and_crlf_ignored() {
        let rows = parse_delimited("Ticker,Price\r\nAAPL, 1 \r\n\r\n   \nMSFT,2\r\n\r\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Price"], "1");
        assert_eq!(rows[1]["Ticker"], "MSFT");
    }

    #[test]
    fn test_bom_and_empty_input() {
        let rows = parse_delimited("\u{feff}\"Ticker\",\"Price\"\n\"NVDA\",\"120\"");
        assert_eq!(rows[0]["Ticker"], "NVDA");
        assert!(parse_delimited("").is_empty());
        assert!(parse_delimited("Ticker,Price\n").is_empty());
        assert_eq!(header_names("\u{feff}Ticker,Price\n"), vec!["Ticker", "Price"]);
    }
}
