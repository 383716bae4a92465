//! Structured strategy: object notation (JSON), CEF records and delimited
//! lines with a header

use super::cef;
use super::types::{ParseFailure, ParsedFields, RawLine, StrategyKind};
use serde_json::Value;
use std::collections::HashMap;

/// Substrings that mark a cell as a likely column name
const COLUMN_WORDS: [&str; 11] = [
    "id", "name", "type", "date", "time", "ip", "user", "session", "attack", "protocol",
    "browser",
];

/// Share of header-like cells above which a first line counts as a header
const HEADER_SCORE_THRESHOLD: f64 = 0.6;

/// Header detected on the first line of a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub delimiter: u8,
    pub columns: Vec<String>,
}

/// Per-source header registry, reset at the start of every batch
#[derive(Debug, Clone, Default)]
pub struct HeaderBook {
    delimiters: Vec<u8>,
    headers: HashMap<String, Header>,
}

impl HeaderBook {
    pub fn new(delimiters: Vec<u8>) -> Self {
        Self {
            delimiters,
            headers: HashMap::new(),
        }
    }

    /// Inspect a line; the first line of a source may register a header
    pub fn observe(&mut self, line: &RawLine) {
        if line.line_number != 1 {
            return;
        }

        // Most cells wins, ties to the configured order
        let mut best: Option<(u8, Vec<String>)> = None;
        for &delimiter in &self.delimiters {
            if !line.text.as_bytes().contains(&delimiter) {
                continue;
            }
            let Some(cells) = split_record(&line.text, delimiter) else {
                continue;
            };
            if cells.len() >= 2 && best.as_ref().map_or(true, |(_, b)| cells.len() > b.len()) {
                best = Some((delimiter, cells));
            }
        }

        let Some((delimiter, cells)) = best else {
            return;
        };

        if header_score(&cells) > HEADER_SCORE_THRESHOLD {
            let columns = cells
                .iter()
                .enumerate()
                .map(|(i, cell)| clean_column(cell, i))
                .collect();
            tracing::debug!("Registered header for {} (delimiter {:?})", line.source, delimiter as char);
            self.headers
                .insert(line.source.clone(), Header { delimiter, columns });
        }
    }

    pub fn header(&self, source: &str) -> Option<&Header> {
        self.headers.get(source)
    }

    pub fn clear(&mut self) {
        self.headers.clear();
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

fn clean_column(cell: &str, index: usize) -> String {
    let cleaned = cell.trim().replace([' ', '-'], "_").to_lowercase();
    if cleaned.is_empty() {
        format!("field_{}", index + 1)
    } else {
        cleaned
    }
}

fn header_score(cells: &[String]) -> f64 {
    let mut score = 0.0;
    for cell in cells {
        let cell = cell.trim();
        if cell.is_empty() {
            continue;
        }
        let lower = cell.to_lowercase();
        let has_digit = cell.chars().any(|c| c.is_ascii_digit());
        let letters_only = cell
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .all(char::is_alphabetic);

        if COLUMN_WORDS.iter().any(|w| lower.contains(w)) || letters_only {
            score += 1.0;
        } else if cell.chars().count() <= 20 && !has_digit {
            score += 0.5;
        }

        if has_digit {
            score -= 0.5;
            if cell.contains('.') {
                score -= 1.0;
            }
        }
    }
    score / cells.len() as f64
}

/// Split one delimited record, honouring quotes
fn split_record(text: &str, delimiter: u8) -> Option<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let record = reader.records().next()?.ok()?;
    Some(record.iter().map(|cell| cell.trim().to_string()).collect())
}

/// Flatten a JSON value into dotted keys
fn flatten(prefix: &str, value: &Value, out: &mut ParsedFields) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, nested, out);
            }
        }
        Value::String(s) => out.push(prefix, s.clone()),
        Value::Null => out.push(prefix, String::new()),
        other => out.push(prefix, other.to_string()),
    }
}

/// JSON objects, CEF records and delimited-with-header lines
#[derive(Debug, Clone)]
pub struct StructuredParser {
    message_keys: Vec<String>,
}

impl StructuredParser {
    pub fn new(message_keys: Vec<String>) -> Self {
        Self { message_keys }
    }

    fn looks_like_object(text: &str) -> bool {
        let trimmed = text.trim();
        trimmed.starts_with('{') && trimmed.ends_with('}')
    }

    /// True for object notation, a CEF prefix, or a row whose cell count
    /// matches the source's header
    pub fn can_handle(&self, line: &RawLine, headers: &HeaderBook) -> bool {
        if Self::looks_like_object(&line.text) || cef::is_cef(&line.text) {
            return true;
        }
        headers
            .header(&line.source)
            .is_some_and(|h| Self::fits_header(&line.text, h))
    }

    fn fits_header(text: &str, header: &Header) -> bool {
        text.as_bytes().contains(&header.delimiter)
            && split_record(text, header.delimiter)
                .is_some_and(|cells| cells.len() == header.columns.len())
    }

    pub fn parse(
        &self,
        line: &RawLine,
        headers: &HeaderBook,
    ) -> Result<ParsedFields, ParseFailure> {
        let mut parsed = if Self::looks_like_object(&line.text) {
            self.parse_object(line)?
        } else if cef::is_cef(&line.text) {
            Self::parse_cef(line)?
        } else {
            self.parse_delimited(line, headers)?
        };

        if parsed.is_empty() {
            return Err(ParseFailure::new(
                StrategyKind::Structured,
                line,
                "no fields extracted",
            ));
        }

        parsed.message = self.message_for(&parsed);
        Ok(parsed)
    }

    fn parse_cef(line: &RawLine) -> Result<ParsedFields, ParseFailure> {
        let fields = cef::parse_cef(&line.text).ok_or_else(|| {
            ParseFailure::new(StrategyKind::Structured, line, "incomplete CEF header")
        })?;

        let mut parsed = ParsedFields::new(StrategyKind::Structured, "cef");
        parsed.fields = fields;
        Ok(parsed)
    }

    fn parse_object(&self, line: &RawLine) -> Result<ParsedFields, ParseFailure> {
        let value: Value = serde_json::from_str(line.text.trim()).map_err(|e| {
            ParseFailure::new(StrategyKind::Structured, line, format!("invalid JSON: {}", e))
        })?;

        if !value.is_object() {
            return Err(ParseFailure::new(
                StrategyKind::Structured,
                line,
                "JSON value is not an object",
            ));
        }

        let mut parsed = ParsedFields::new(StrategyKind::Structured, "json");
        flatten("", &value, &mut parsed);
        Ok(parsed)
    }

    fn parse_delimited(
        &self,
        line: &RawLine,
        headers: &HeaderBook,
    ) -> Result<ParsedFields, ParseFailure> {
        let header = headers.header(&line.source).ok_or_else(|| {
            ParseFailure::new(StrategyKind::Structured, line, "no header for source")
        })?;

        let cells = split_record(&line.text, header.delimiter).ok_or_else(|| {
            ParseFailure::new(StrategyKind::Structured, line, "unreadable delimited record")
        })?;

        if cells.len() != header.columns.len() {
            return Err(ParseFailure::new(
                StrategyKind::Structured,
                line,
                format!(
                    "{} cells for a {}-column header",
                    cells.len(),
                    header.columns.len()
                ),
            ));
        }

        let mut parsed = ParsedFields::new(StrategyKind::Structured, "delimited");
        for (column, cell) in header.columns.iter().zip(cells) {
            parsed.push(column.clone(), cell);
        }
        Ok(parsed)
    }

    fn message_for(&self, parsed: &ParsedFields) -> String {
        let explicit = self.message_keys.iter().find_map(|key| parsed.get(key));
        // CEF carries a human-readable event name in its header
        let named = || (parsed.parser == "cef").then(|| parsed.get("name")).flatten();

        explicit
            .or_else(named)
            .map(str::to_string)
            .unwrap_or_else(|| {
                parsed
                    .fields
                    .iter()
                    .map(|(_, v)| v.as_str())
                    .filter(|v| !v.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> StructuredParser {
        StructuredParser::new(vec!["message".to_string(), "msg".to_string()])
    }

    fn book() -> HeaderBook {
        HeaderBook::new(vec![b',', b';', b'|', b'\t'])
    }

    #[test]
    fn test_json_is_flattened_in_order() {
        let line = RawLine::new(
            "app.log",
            7,
            r#"{"level":"warn","ctx":{"user":"alice","port":22},"msg":"denied"}"#,
        );
        let parsed = parser().parse(&line, &book()).unwrap();

        let keys: Vec<&str> = parsed.fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["level", "ctx.user", "ctx.port", "msg"]);
        assert_eq!(parsed.get("ctx.port"), Some("22"));
        assert_eq!(parsed.message, "denied");
        assert_eq!(parsed.parser, "json");
    }

    #[test]
    fn test_invalid_json_fails() {
        let line = RawLine::new("app.log", 3, "{not json}");
        assert!(parser().can_handle(&line, &book()));
        assert!(parser().parse(&line, &book()).is_err());
    }

    #[test]
    fn test_header_registration_and_rows() {
        let mut headers = book();
        let header = RawLine::new("events.csv", 1, "timestamp,src_ip,User Name,action");
        headers.observe(&header);

        let registered = headers.header("events.csv").unwrap();
        assert_eq!(registered.columns, vec!["timestamp", "src_ip", "user_name", "action"]);

        let parsed = parser().parse(&header, &headers).unwrap();
        assert_eq!(parsed.get("src_ip"), Some("src_ip"));

        let row = RawLine::new(
            "events.csv",
            2,
            r#"2024-01-01T00:00:00Z,10.0.0.1,"Smith, J",login"#,
        );
        assert!(parser().can_handle(&row, &headers));
        let parsed = parser().parse(&row, &headers).unwrap();
        assert_eq!(parsed.get("user_name"), Some("Smith, J"));
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed.parser, "delimited");
    }

    #[test]
    fn test_rows_must_match_header_width() {
        let mut headers = book();
        headers.observe(&RawLine::new("mixed.log", 1, "time,user,action"));

        let kv = RawLine::new("mixed.log", 3, "user=alice, ip=10.0.0.1");
        let prose = RawLine::new("mixed.log", 4, "service restarted, all good");
        let wide = RawLine::new("mixed.log", 5, "09:00,bob,login,extra");
        for line in [&kv, &prose, &wide] {
            assert!(!parser().can_handle(line, &headers), "{}", line.text);
            assert!(parser().parse(line, &headers).is_err());
        }

        let row = RawLine::new("mixed.log", 2, "09:00,bob,login");
        assert!(parser().can_handle(&row, &headers));
    }

    #[test]
    fn test_cef_record() {
        let line = RawLine::new(
            "fw.cef",
            9,
            "CEF:0|Fortinet|FortiGate|7.2|13|traffic forward|5|src=10.0.0.1 act=accept",
        );
        assert!(parser().can_handle(&line, &book()));
        let parsed = parser().parse(&line, &book()).unwrap();

        assert_eq!(parsed.parser, "cef");
        assert_eq!(parsed.get("device_product"), Some("FortiGate"));
        assert_eq!(parsed.get("act"), Some("accept"));
        assert_eq!(parsed.message, "traffic forward");

        let with_msg = RawLine::new("fw.cef", 10, "CEF:0|A|B|1|2|n|3|msg=port scan from host");
        assert_eq!(parser().parse(&with_msg, &book()).unwrap().message, "port scan from host");
    }

    #[test]
    fn test_data_first_line_is_not_a_header() {
        let mut headers = book();
        headers.observe(&RawLine::new("data.csv", 1, "1.5,2.25,3.75"));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_only_first_line_is_observed() {
        let mut headers = book();
        headers.observe(&RawLine::new("x.csv", 2, "name,type,value"));
        assert!(headers.header("x.csv").is_none());
    }

    #[test]
    fn test_plain_line_is_not_structured() {
        let line = RawLine::new("x.log", 5, "service started, pid 42");
        assert!(!parser().can_handle(&line, &book()));
    }
}
