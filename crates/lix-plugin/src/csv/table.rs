//! RFC 4180 reading and writing.
//!
//! Fields are separated by `,` and records by `\n` or `\r\n`. Fields that
//! contain a separator, a quote or a line break are quoted, with embedded
//! quotes doubled. The writer quotes only when required, so files written
//! by it parse back to identical bytes.

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, Result};

/// Record terminator of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    #[default]
    Lf,
    Crlf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::Crlf => "\r\n",
        }
    }
}

/// A parsed file: all records plus layout details needed to write it back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub records: Vec<Vec<String>>,
    pub line_ending: LineEnding,
    pub trailing_newline: bool,
}

impl Table {
    /// Parse raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| PluginError::Parse(format!("file is not valid UTF-8: {}", e)))?;

        let mut table = Table::default();
        let mut line_ending = None;
        let mut record: Vec<String> = Vec::new();
        let mut field = String::new();
        let mut at_record_start = true;
        let mut chars = text.chars().peekable();
        let mut line = 1usize;

        while let Some(c) = chars.next() {
            at_record_start = false;
            match c {
                '"' if field.is_empty() => {
                    // Quoted field: read until the closing quote.
                    loop {
                        match chars.next() {
                            Some('"') if chars.peek() == Some(&'"') => {
                                chars.next();
                                field.push('"');
                            }
                            Some('"') => break,
                            Some(ch) => {
                                if ch == '\n' {
                                    line += 1;
                                }
                                field.push(ch);
                            }
                            None => {
                                return Err(PluginError::Parse(format!(
                                    "unterminated quoted field on line {}",
                                    line
                                )))
                            }
                        }
                    }
                    match chars.peek() {
                        None | Some(',') | Some('\n') | Some('\r') => {}
                        Some(_) => {
                            return Err(PluginError::Parse(format!(
                                "unexpected character after closing quote on line {}",
                                line
                            )))
                        }
                    }
                }
                '"' => {
                    return Err(PluginError::Parse(format!(
                        "quote inside unquoted field on line {}",
                        line
                    )))
                }
                ',' => record.push(std::mem::take(&mut field)),
                '\r' if chars.peek() == Some(&'\n') => {
                    chars.next();
                    line_ending.get_or_insert(LineEnding::Crlf);
                    record.push(std::mem::take(&mut field));
                    table.records.push(std::mem::take(&mut record));
                    at_record_start = true;
                    line += 1;
                }
                '\n' => {
                    line_ending.get_or_insert(LineEnding::Lf);
                    record.push(std::mem::take(&mut field));
                    table.records.push(std::mem::take(&mut record));
                    at_record_start = true;
                    line += 1;
                }
                other => field.push(other),
            }
        }

        if !at_record_start {
            record.push(field);
            table.records.push(record);
        }

        table.trailing_newline = at_record_start && !table.records.is_empty();
        table.line_ending = line_ending.unwrap_or_default();
        Ok(table)
    }

    /// Serialize back to bytes.
    pub fn write(&self) -> Vec<u8> {
        let eol = self.line_ending.as_str();
        let mut out = String::new();
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                out.push_str(eol);
            }
            write_record(&mut out, record);
        }
        if self.trailing_newline && !self.records.is_empty() {
            out.push_str(eol);
        }
        out.into_bytes()
    }
}

fn write_record(out: &mut String, record: &[String]) {
    // A lone empty field would otherwise vanish as a blank line.
    if let [only] = record {
        if only.is_empty() {
            out.push_str("\"\"");
            return;
        }
    }
    for (i, field) in record.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_field(out, field);
    }
}

fn write_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_parse_simple() {
        let table = Table::parse(b"a,b\n1,2\n").unwrap();
        assert_eq!(table.records, records(&[&["a", "b"], &["1", "2"]]));
        assert_eq!(table.line_ending, LineEnding::Lf);
        assert!(table.trailing_newline);
    }

    #[test]
    fn test_parse_crlf_without_trailing_newline() {
        let table = Table::parse(b"a,b\r\n1,2").unwrap();
        assert_eq!(table.records, records(&[&["a", "b"], &["1", "2"]]));
        assert_eq!(table.line_ending, LineEnding::Crlf);
        assert!(!table.trailing_newline);
    }

    #[test]
    fn test_parse_quoted_fields() {
        let table = Table::parse(b"name,note\n\"Doe, J\",\"said \"\"hi\"\"\nthen left\"\n").unwrap();
        assert_eq!(
            table.records,
            records(&[&["name", "note"], &["Doe, J", "said \"hi\"\nthen left"]])
        );
    }

    #[test]
    fn test_parse_empty() {
        let table = Table::parse(b"").unwrap();
        assert!(table.records.is_empty());
        assert!(!table.trailing_newline);
        assert!(table.write().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Table::parse(b"a\n\"open"), Err(PluginError::Parse(_))));
        assert!(matches!(Table::parse(b"a\nb\"c\n"), Err(PluginError::Parse(_))));
        assert!(matches!(Table::parse(b"a\n\"x\"y\n"), Err(PluginError::Parse(_))));
        assert!(matches!(Table::parse(&[0xff, 0xfe]), Err(PluginError::Parse(_))));
    }

    #[test]
    fn test_write_roundtrip() {
        for input in [
            &b"a,b\n1,2\n"[..],
            b"a,b\r\n1,2",
            b"name\n\"Doe, J\"\n\"x\"\"y\"\n",
            b"a\n\"\"\n",
            b"a,b",
        ] {
            let table = Table::parse(input).unwrap();
            assert_eq!(table.write(), input, "input {:?}", String::from_utf8_lossy(input));
        }
    }
}
