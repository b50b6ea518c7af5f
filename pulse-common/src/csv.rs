//! Minimal CSV reading and writing
//!
//! Handles the fixed tabular formats this service exchanges: customer
//! transaction uploads and derived feature sets. Supports quoted fields
//! (embedded commas, doubled quotes) and both LF and CRLF line endings.
//! Not a general-purpose CSV implementation.

use crate::{Error, Result};

/// Parsed CSV document: header row plus data rows
#[derive(Debug, Clone)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Index of a named column, if present
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Verify all named columns exist, reporting the first missing one
    pub fn require_columns(&self, names: &[&str]) -> Result<()> {
        for name in names {
            if self.column_index(name).is_none() {
                return Err(Error::InvalidInput(format!(
                    "Missing required column: {}",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Parse CSV text into a table
///
/// The first record is the header. Records with a field count different from
/// the header are kept as-is; callers decide how to treat short rows.
pub fn parse(text: &str) -> Result<CsvTable> {
    let mut records = parse_records(text)?;
    if records.is_empty() {
        return Err(Error::InvalidInput("CSV is empty".to_string()));
    }
    let headers = records.remove(0);
    if headers.iter().all(|h| h.is_empty()) {
        return Err(Error::InvalidInput("CSV header row is empty".to_string()));
    }
    Ok(CsvTable {
        headers,
        rows: records,
    })
}

fn parse_records(text: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
        } else {
            match c {
                '"' => {
                    if field.is_empty() {
                        in_quotes = true;
                    } else {
                        return Err(Error::InvalidInput(
                            "Unexpected quote inside unquoted field".to_string(),
                        ));
                    }
                }
                ',' => {
                    record.push(std::mem::take(&mut field));
                }
                '\r' => {
                    // Consumed as part of CRLF; stray CR is ignored
                }
                '\n' => {
                    record.push(std::mem::take(&mut field));
                    // Skip fully blank lines (trailing newline included)
                    if !(record.len() == 1 && record[0].is_empty()) {
                        records.push(std::mem::take(&mut record));
                    } else {
                        record.clear();
                    }
                }
                _ => field.push(c),
            }
        }
    }

    if in_quotes {
        return Err(Error::InvalidInput("Unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}

/// Write a table back to CSV text with deterministic quoting
///
/// Fields are quoted only when they contain a comma, quote, or newline, so
/// the same table always serializes to identical bytes.
pub fn write(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    write_record(&mut out, headers);
    for row in rows {
        write_record(&mut out, row);
    }
    out
}

fn write_record(out: &mut String, fields: &[String]) {
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if f.contains(',') || f.contains('"') || f.contains('\n') {
            out.push('"');
            out.push_str(&f.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(f);
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let table = parse("customer_id,event_date,amount\nC1,2024-01-15,150.50\nC2,2024-01-16,75.00\n").unwrap();
        assert_eq!(table.headers, vec!["customer_id", "event_date", "amount"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["C1", "2024-01-15", "150.50"]);
    }

    #[test]
    fn test_parse_quoted_fields() {
        let table = parse("id,name\n1,\"Smith, Jane\"\n2,\"He said \"\"hi\"\"\"\n").unwrap();
        assert_eq!(table.rows[0][1], "Smith, Jane");
        assert_eq!(table.rows[1][1], "He said \"hi\"");
    }

    #[test]
    fn test_parse_crlf_and_blank_lines() {
        let table = parse("a,b\r\n1,2\r\n\r\n3,4\r\n").unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["3", "4"]);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_unterminated_quote() {
        assert!(parse("a,b\n1,\"oops\n").is_err());
    }

    #[test]
    fn test_require_columns() {
        let table = parse("customer_id,event_date\nC1,2024-01-01\n").unwrap();
        assert!(table.require_columns(&["customer_id", "event_date"]).is_ok());
        assert!(table.require_columns(&["customer_id", "amount"]).is_err());
    }

    #[test]
    fn test_write_round_trip_is_byte_identical() {
        let headers: Vec<String> = ["id", "note"].iter().map(|s| s.to_string()).collect();
        let rows = vec![
            vec!["1".to_string(), "plain".to_string()],
            vec!["2".to_string(), "has, comma".to_string()],
        ];
        let text = write(&headers, &rows);
        let reparsed = parse(&text).unwrap();
        assert_eq!(write(&reparsed.headers, &reparsed.rows), text);
    }
}
