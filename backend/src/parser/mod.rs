//! CSV ingestion and export with encoding and delimiter auto-detection.
//!
//! ```text
//! bytes ─▶ detect_encoding ─▶ decode_content ─▶ detect_delimiter ─▶ csv::Reader ─▶ Dataset
//! ```
//!
//! Cell typing on the way in:
//! - empty field -> `null`
//! - integer or decimal whose canonical form is the field itself -> number
//!   (`"42"`, `"1.5"`; `"007"`, `"1.50"` and `" 42"` stay strings so export
//!   is lossless)
//! - anything else -> string

use serde_json::{Map, Number, Value};
use std::path::Path;
use tracing::debug;

use crate::error::{CsvError, CsvResult};
use crate::models::{cell_text, Dataset};

/// Result of parsing with metadata
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub dataset: Dataset,
    /// Detected or used encoding
    pub encoding: String,
    /// Detected or used delimiter
    pub delimiter: char,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding.
///
/// Unknown encodings fall back to lossy UTF-8.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.into_owned()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        _ => {
            let (text, _, _) = encoding_rs::UTF_8.decode(bytes);
            text.into_owned()
        }
    }
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Type a raw field.
fn parse_cell(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = raw.parse::<i64>() {
        if n.to_string() == raw {
            return Value::Number(n.into());
        }
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            if n.to_string() == raw {
                return Value::Number(n);
            }
        }
    }
    Value::String(raw.to_string())
}

/// Parse CSV text with an explicit delimiter.
///
/// Blank lines are skipped, short rows padded with `null`, extra fields
/// dropped.
///
/// # Example
/// ```
/// use regexflow::parser::parse_str;
///
/// let dataset = parse_str("name;age\nAlice;30\nBob;", ';').unwrap();
///
/// assert_eq!(dataset.columns, vec!["name", "age"]);
/// assert_eq!(dataset.rows[0]["age"], 30);
/// assert!(dataset.rows[1]["age"].is_null());
/// ```
pub fn parse_str(content: &str, delimiter: char) -> CsvResult<Dataset> {
    let content = content.trim_start_matches('\u{feff}');
    if content.trim().is_empty() {
        return Err(CsvError::EmptyFile);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| parse_error(&e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| parse_error(&e))?;
        let mut row = Map::new();
        for (i, header) in headers.iter().enumerate() {
            let value = record.get(i).map(parse_cell).unwrap_or(Value::Null);
            row.insert(header.clone(), value);
        }
        rows.push(row);
    }

    Ok(Dataset::new(headers, rows)?)
}

fn parse_error(e: &csv::Error) -> CsvError {
    CsvError::ParseError {
        line: e.position().map(|p| p.line() as usize).unwrap_or(0),
        message: e.to_string(),
    }
}

/// Parse CSV bytes with auto-detection of encoding and delimiter.
pub fn parse_bytes_auto(bytes: &[u8]) -> CsvResult<ParseResult> {
    if bytes.is_empty() {
        return Err(CsvError::EmptyFile);
    }

    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = detect_delimiter(&content);
    let dataset = parse_str(&content, delimiter)?;

    debug!(
        encoding = %encoding,
        delimiter = %format_delimiter(delimiter),
        rows = dataset.row_count(),
        columns = dataset.columns.len(),
        "parsed CSV"
    );

    Ok(ParseResult {
        dataset,
        encoding,
        delimiter,
    })
}

/// Workbook extensions that are rejected instead of being misread as text.
const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "ods"];

/// Reject file names that point at a spreadsheet workbook.
pub fn check_file_name(name: &str) -> CsvResult<()> {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension {
        Some(ext) if SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) => {
            Err(CsvError::UnsupportedFormat(ext))
        }
        _ => Ok(()),
    }
}

/// Parse CSV file with auto-detection of encoding and delimiter.
pub fn parse_csv_file_auto<P: AsRef<Path>>(path: P) -> CsvResult<ParseResult> {
    if let Some(name) = path.as_ref().file_name().and_then(|n| n.to_str()) {
        check_file_name(name)?;
    }
    let bytes = std::fs::read(path.as_ref())?;
    parse_bytes_auto(&bytes)
}

/// Serialize a dataset as CSV, header first. Nulls become empty fields.
pub fn to_csv(dataset: &Dataset, delimiter: char) -> CsvResult<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter as u8)
        .from_writer(Vec::new());

    let export = |e: csv::Error| CsvError::Export(e.to_string());

    writer.write_record(&dataset.columns).map_err(export)?;
    for row in &dataset.rows {
        let fields = dataset.columns.iter().map(|c| {
            row.get(c)
                .and_then(cell_text)
                .unwrap_or_default()
        });
        writer.write_record(fields).map_err(export)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| CsvError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CsvError::Export(e.to_string()))
}

/// Display name for a delimiter
pub fn format_delimiter(delimiter: char) -> String {
    match delimiter {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_simple_csv() {
        let ds = parse_str("name;age\nAlice;30\nBob;25", ';').unwrap();

        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.rows[0]["name"], "Alice");
        assert_eq!(ds.rows[0]["age"], 30);
        assert_eq!(ds.rows[1]["name"], "Bob");
    }

    #[test]
    fn test_quoted_values() {
        let ds = parse_str("name,value\n\"Smith, Alice\",\"Hello \"\"World\"\"\"", ',').unwrap();

        assert_eq!(ds.rows[0]["name"], "Smith, Alice");
        assert_eq!(ds.rows[0]["value"], "Hello \"World\"");
    }

    #[test]
    fn test_empty_lines_skipped() {
        let ds = parse_str("a;b\n1;2\n\n3;4\n", ';').unwrap();
        assert_eq!(ds.row_count(), 2);
    }

    #[test]
    fn test_missing_and_extra_values() {
        let ds = parse_str("a;b;c\n1;;3\n4\n5;6;7;8", ';').unwrap();

        assert_eq!(ds.rows[0]["b"], Value::Null);
        assert_eq!(ds.rows[1]["c"], Value::Null);
        assert_eq!(ds.rows[2]["c"], 7);
        assert_eq!(ds.rows[2].len(), 3);
    }

    #[test]
    fn test_cell_typing_is_lossless() {
        assert_eq!(parse_cell("42"), json!(42));
        assert_eq!(parse_cell("-3"), json!(-3));
        assert_eq!(parse_cell("1.5"), json!(1.5));
        assert_eq!(parse_cell("007"), json!("007"));
        assert_eq!(parse_cell("1.50"), json!("1.50"));
        assert_eq!(parse_cell("12abc"), json!("12abc"));
        assert_eq!(parse_cell(""), Value::Null);
    }

    #[test]
    fn test_padded_fields_round_trip() {
        assert_eq!(parse_cell(" 42"), json!(" 42"));
        assert_eq!(parse_cell("  "), json!("  "));

        let ds = parse_str("id,code\n 42,  \n", ',').unwrap();
        assert_eq!(to_csv(&ds, ',').unwrap(), "id,code\n 42,  \n");
    }

    #[test]
    fn test_empty_csv_error() {
        assert!(matches!(parse_str("", ';'), Err(CsvError::EmptyFile)));
        assert!(matches!(parse_bytes_auto(b""), Err(CsvError::EmptyFile)));
    }

    #[test]
    fn test_header_only() {
        let ds = parse_str("a,b\n", ',').unwrap();
        assert_eq!(ds.columns, vec!["a", "b"]);
        assert!(ds.is_empty());
    }

    #[test]
    fn test_duplicate_header_rejected() {
        assert!(matches!(parse_str("a,a\n1,2", ','), Err(CsvError::Header(_))));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3"), '\t');
        assert_eq!(detect_delimiter("a|b|c\n1|2|3"), '|');
        assert_eq!(detect_delimiter("single"), ',');
    }

    #[test]
    fn test_auto_parse() {
        let result = parse_bytes_auto(b"name;age\nAlice;30\nBob;25").unwrap();

        assert_eq!(result.delimiter, ';');
        assert_eq!(result.encoding, "utf-8");
        assert_eq!(result.dataset.row_count(), 2);
        assert_eq!(result.dataset.columns, vec!["name", "age"]);
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let decoded = decode_content(bytes, "iso-8859-1");
        assert_eq!(decoded, "Société");
    }

    #[test]
    fn test_spreadsheets_rejected() {
        assert!(check_file_name("people.csv").is_ok());
        assert!(check_file_name("export").is_ok());
        assert!(matches!(
            check_file_name("People.XLSX"),
            Err(CsvError::UnsupportedFormat(ext)) if ext == "xlsx"
        ));

        let file = tempfile::Builder::new().suffix(".xls").tempfile().unwrap();
        assert!(matches!(
            parse_csv_file_auto(file.path()),
            Err(CsvError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_to_csv() {
        let ds = parse_str("Name,Note,Age\nAda,\"a, b\",36\nBob,,", ',').unwrap();
        let out = to_csv(&ds, ',').unwrap();
        assert_eq!(out, "Name,Note,Age\nAda,\"a, b\",36\nBob,,\n");
    }

    #[test]
    fn test_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "id;email\n1;ada@example.com\n2;bob@example.org\n").unwrap();

        let result = parse_csv_file_auto(file.path()).unwrap();
        assert_eq!(result.delimiter, ';');
        let out = to_csv(&result.dataset, result.delimiter).unwrap();
        assert_eq!(out, "id;email\n1;ada@example.com\n2;bob@example.org\n");
    }
}
