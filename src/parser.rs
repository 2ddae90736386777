//! Upload parsing: CSV/TSV text and spreadsheets into header-keyed records.
//!
//! - **Delimited text**: UTF-8 BOM stripped, an optional leading `sep=<char>`
//!   directive honoured and dropped, delimiter auto-detected among comma,
//!   semicolon and tab by occurrence count in the header line. Bytes that are
//!   not valid UTF-8 are decoded as Windows-1252.
//! - **Spreadsheets**: first sheet only, empty cells become empty strings.
//! - Headers are normalized to lowercase with spaces turned into underscores.
//!
//! Blank lines are dropped before reading, so the record count equals the
//! number of non-empty lines minus the header. Quoted fields are handled by the
//! `csv` reader, so delimiters and line breaks inside quotes stay in the cell.

use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
    path::Path,
};

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use encoding_rs::{UTF_8, WINDOWS_1252};
use log::{debug, warn};

use crate::error::ParseError;

const CANDIDATE_DELIMITERS: &[u8] = b",;\t";
const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];
const DELIMITED_EXTENSIONS: &[&str] = &["csv", "tsv", "txt"];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

/// One input row keyed by normalized header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, header: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(header.into(), value.into());
    }

    /// Trimmed value of `header`, `None` when absent or blank.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .get(header)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// First non-blank value among `headers`, with the header it came from.
    pub fn first_of<'a>(&'a self, headers: &[&'a str]) -> Option<(&'a str, &'a str)> {
        headers
            .iter()
            .find_map(|header| self.get(header).map(|value| (*header, value)))
    }

    pub fn has_any(&self, headers: &[&str]) -> bool {
        self.first_of(headers).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for RawRecord
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub records: Vec<RawRecord>,
}

impl ParsedTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Delimited,
    Spreadsheet,
}

fn detect_kind(bytes: &[u8], file_name: &str) -> Result<FileKind, ParseError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some(ext) if SPREADSHEET_EXTENSIONS.contains(&ext) => return Ok(FileKind::Spreadsheet),
        Some(ext) if DELIMITED_EXTENSIONS.contains(&ext) => return Ok(FileKind::Delimited),
        _ => {}
    }
    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
        Ok(FileKind::Spreadsheet)
    } else if std::str::from_utf8(bytes).is_ok() {
        Ok(FileKind::Delimited)
    } else {
        Err(ParseError::Unsupported(file_name.to_string()))
    }
}

/// Parses an uploaded file, choosing the reader from its name and contents.
pub fn parse(bytes: &[u8], file_name: &str) -> Result<ParsedTable, ParseError> {
    parse_with_delimiter(bytes, file_name, None)
}

/// Like [`parse`], with an explicit delimiter overriding detection for text input.
pub fn parse_with_delimiter(
    bytes: &[u8],
    file_name: &str,
    delimiter: Option<u8>,
) -> Result<ParsedTable, ParseError> {
    let table = match detect_kind(bytes, file_name)? {
        FileKind::Spreadsheet => parse_spreadsheet(bytes, file_name)?,
        FileKind::Delimited => parse_delimited(&decode_text(bytes), file_name, delimiter)?,
    };
    debug!(
        "Parsed '{}': {} header(s), {} record(s)",
        file_name,
        table.headers.len(),
        table.records.len()
    );
    Ok(table)
}

fn decode_text(bytes: &[u8]) -> String {
    let (text, _, had_errors) = UTF_8.decode(bytes);
    if !had_errors {
        return text.into_owned();
    }
    debug!("Input is not valid UTF-8; decoding as {}", WINDOWS_1252.name());
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    text.into_owned()
}

pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

fn parse_sep_directive(line: &str) -> Option<Option<u8>> {
    let trimmed = line.trim().trim_matches('"');
    let rest = trimmed
        .get(..4)
        .filter(|prefix| prefix.eq_ignore_ascii_case("sep="))
        .map(|_| &trimmed[4..])?;
    let delimiter = match rest {
        "\\t" | "\t" => Some(b'\t'),
        other => other
            .bytes()
            .next()
            .filter(|b| CANDIDATE_DELIMITERS.contains(b)),
    };
    Some(delimiter)
}

/// Picks the candidate delimiter occurring most often in `header_line`.
/// Ties keep the earlier candidate (comma, then semicolon, then tab).
pub fn detect_delimiter(header_line: &str) -> u8 {
    let mut best = b',';
    let mut best_count = 0usize;
    for &candidate in CANDIDATE_DELIMITERS {
        let count = header_line.bytes().filter(|b| *b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

fn parse_delimited(
    text: &str,
    file_name: &str,
    forced: Option<u8>,
) -> Result<ParsedTable, ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.lines().filter(|line| !line.trim().is_empty()).peekable();

    let mut directive = None;
    if let Some(first) = lines.peek()
        && let Some(parsed) = parse_sep_directive(first)
    {
        if parsed.is_none() {
            warn!(
                "Ignoring unsupported delimiter directive '{}' in '{}'",
                first.trim(),
                file_name
            );
        }
        directive = parsed;
        lines.next();
    }

    let Some(header_line) = lines.peek().copied() else {
        return Err(ParseError::MissingHeader(file_name.to_string()));
    };
    let delimiter = forced
        .or(directive)
        .unwrap_or_else(|| detect_delimiter(header_line));
    debug!(
        "Reading '{}' with delimiter '{}'",
        file_name,
        crate::printable_delimiter(delimiter)
    );

    let body = lines.collect::<Vec<_>>().join("\n");
    let mut reader = open_reader(body.as_bytes(), delimiter);
    let headers = reader
        .headers()?
        .iter()
        .map(normalize_header)
        .collect::<Vec<_>>();
    if headers.iter().all(String::is_empty) {
        return Err(ParseError::MissingHeader(file_name.to_string()));
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let record = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !header.is_empty())
            .map(|(idx, header)| {
                let cell = row.get(idx).unwrap_or("");
                (header.clone(), unquote(cell))
            })
            .collect::<RawRecord>();
        records.push(record);
    }
    Ok(ParsedTable { headers, records })
}

fn open_reader<R: Read>(reader: R, delimiter: u8) -> csv::Reader<R> {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true)
        .trim(csv::Trim::All);
    builder.from_reader(reader)
}

fn unquote(cell: &str) -> String {
    let trimmed = cell.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

fn parse_spreadsheet(bytes: &[u8], file_name: &str) -> Result<ParsedTable, ParseError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|err| ParseError::Spreadsheet(err.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ParseError::MissingHeader(file_name.to_string()))?
        .map_err(|err| ParseError::Spreadsheet(err.to_string()))?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .ok_or_else(|| ParseError::MissingHeader(file_name.to_string()))?
        .iter()
        .map(|cell| normalize_header(&cell_to_string(cell)))
        .collect::<Vec<_>>();
    if headers.iter().all(String::is_empty) {
        return Err(ParseError::MissingHeader(file_name.to_string()));
    }

    let mut records = Vec::new();
    for row in rows {
        let cells = row.iter().map(cell_to_string).collect::<Vec<_>>();
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let record = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !header.is_empty())
            .map(|(idx, header)| (header.clone(), cells.get(idx).cloned().unwrap_or_default()))
            .collect::<RawRecord>();
        records.push(record);
    }
    Ok(ParsedTable { headers, records })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) if dt.is_datetime() => {
            let (year, month, day, hour, minute, second, _) = dt.to_ymd_hms_milli();
            if (hour, minute, second) == (0, 0, 0) {
                format!("{year:04}-{month:02}-{day:02}")
            } else {
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
            }
        }
        Data::DateTime(dt) => dt.as_f64().to_string(),
    }
}
