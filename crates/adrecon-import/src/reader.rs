//! Turn an uploaded file into a header row plus string cells.
//!
//! Delimited text is decoded by trying UTF-8 (with or without BOM) and then
//! GB18030. Spreadsheets are read from their first worksheet with date cells
//! rendered as ISO dates, so both paths hand the same shape of data to the
//! parser.

use std::path::Path;

use calamine::{open_workbook_auto, Data, DataType, Reader};
use encoding_rs::{Encoding, GB18030, UTF_8};
use thiserror::Error;

/// First-cell values of the category row some platforms put above the real
/// header in their spreadsheet exports.
const CATEGORY_LABELS: &[&str] = &[
    "基础信息",
    "基本信息",
    "投放数据",
    "互动数据",
    "转化数据",
    "basic info",
    "basic information",
    "delivery data",
    "engagement data",
];

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported file type '{0}': expected .csv, .tsv, .txt, .xlsx, .xlsm, .xls or .ods")]
    UnsupportedExtension(String),
    #[error("file is not valid text in any supported encoding (tried {tried})")]
    Encoding { tried: String },
    #[error("malformed delimited file: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to open spreadsheet: {0}")]
    Spreadsheet(String),
    #[error("spreadsheet has no worksheets")]
    NoWorksheet,
    #[error("file has no header row")]
    EmptyFile,
    #[error(
        "the first row starts with the category label '{label}'; remove the category row so \
         the column names are the first row"
    )]
    MultiLevelHeader { label: String },
}

/// One data row and its 1-based position in the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub line: usize,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<TableRow>,
}

/// Read a delimited or spreadsheet file, chosen by extension.
///
/// # Errors
///
/// Returns [`ReadError`] for an unreadable or undecodable file, an unknown
/// extension, a missing header, or a multi-level header.
pub fn read_table(path: &Path) -> Result<Table, ReadError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let raw_rows = match extension.as_str() {
        "csv" => read_delimited(path, b',')?,
        "tsv" | "txt" => read_delimited(path, b'\t')?,
        "xlsx" | "xlsm" | "xls" | "ods" => read_spreadsheet(path)?,
        other => return Err(ReadError::UnsupportedExtension(other.to_string())),
    };

    into_table(raw_rows)
}

/// Decode bytes with the first codec that accepts them without replacement.
///
/// # Errors
///
/// Returns [`ReadError::Encoding`] when every codec rejects the input.
pub fn decode_text(bytes: &[u8]) -> Result<String, ReadError> {
    let body = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) if encoding == UTF_8 => &bytes[bom_len..],
        _ => bytes,
    };

    let codecs = [UTF_8, GB18030];
    for codec in codecs {
        if let Some(text) = codec.decode_without_bom_handling_and_without_replacement(body) {
            return Ok(text.into_owned());
        }
    }

    Err(ReadError::Encoding {
        tried: codecs
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn read_delimited(path: &Path, delimiter: u8) -> Result<Vec<Vec<String>>, ReadError> {
    let bytes = std::fs::read(path).map_err(|source| ReadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let text = decode_text(&bytes)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|c| c.trim().to_string()).collect());
    }
    Ok(rows)
}

fn read_spreadsheet(path: &Path) -> Result<Vec<Vec<String>>, ReadError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| ReadError::Spreadsheet(e.to_string()))?;
    let first_sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ReadError::NoWorksheet)?;
    let range = workbook
        .worksheet_range(&first_sheet)
        .map_err(|e| ReadError::Spreadsheet(e.to_string()))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(_) => cell
            .as_date()
            .map_or_else(|| cell.to_string(), |d| d.format("%Y-%m-%d").to_string()),
    }
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

fn into_table(raw_rows: Vec<Vec<String>>) -> Result<Table, ReadError> {
    let mut numbered = raw_rows
        .into_iter()
        .enumerate()
        .map(|(i, cells)| (i + 1, cells))
        .filter(|(_, cells)| !is_blank(cells));

    let (_, header_cells) = numbered.next().ok_or(ReadError::EmptyFile)?;
    let headers: Vec<String> = header_cells
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect();

    if let Some(first) = headers.first() {
        let lowered = first.to_lowercase();
        if CATEGORY_LABELS.iter().any(|label| lowered == *label) {
            return Err(ReadError::MultiLevelHeader {
                label: first.clone(),
            });
        }
    }

    let rows = numbered
        .map(|(line, cells)| TableRow { line, cells })
        .collect();

    Ok(Table { headers, rows })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_temp(suffix: &str, bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn reads_utf8_csv_with_bom() {
        let file = write_temp(".csv", "\u{feff}日期,消耗\n2024-03-01,1.50\n".as_bytes());
        let table = read_table(file.path()).unwrap();

        assert_eq!(table.headers, vec!["日期", "消耗"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].cells, vec!["2024-03-01", "1.50"]);
        assert_eq!(table.rows[0].line, 2);
    }

    #[test]
    fn falls_back_to_gb18030() {
        let (encoded, _, had_errors) = GB18030.encode("日期,账户ID\n2024-03-01,A1\n");
        assert!(!had_errors);
        let file = write_temp(".csv", &encoded);

        let table = read_table(file.path()).unwrap();
        assert_eq!(table.headers, vec!["日期", "账户ID"]);
        assert_eq!(table.rows[0].cells[1], "A1");
    }

    #[test]
    fn undecodable_bytes_are_an_encoding_error() {
        let file = write_temp(".csv", b"date,cost\n\xff\xff\xff,1\n");
        let err = read_table(file.path()).unwrap_err();
        assert!(matches!(err, ReadError::Encoding { .. }));
    }

    #[test]
    fn tsv_and_txt_use_tab_delimiter() {
        for suffix in [".tsv", ".txt"] {
            let file = write_temp(suffix, b"date\tcost\n2024-03-01\t2,000\n");
            let table = read_table(file.path()).unwrap();
            assert_eq!(table.headers, vec!["date", "cost"]);
            assert_eq!(table.rows[0].cells, vec!["2024-03-01", "2,000"]);
        }
    }

    #[test]
    fn blank_lines_are_skipped_but_line_numbers_are_kept() {
        let file = write_temp(".csv", b"date,cost\n,\n2024-03-02,3\n");
        let table = read_table(file.path()).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].line, 3);
    }

    #[test]
    fn category_row_above_header_is_rejected() {
        let file = write_temp(".csv", "基础信息,,投放数据\n日期,账户ID,消耗\n".as_bytes());
        let err = read_table(file.path()).unwrap_err();
        assert!(matches!(err, ReadError::MultiLevelHeader { ref label } if label == "基础信息"));
        assert!(err.to_string().contains("remove the category row"));
    }

    #[test]
    fn empty_file_has_no_header() {
        let file = write_temp(".csv", b"");
        assert!(matches!(read_table(file.path()), Err(ReadError::EmptyFile)));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let file = write_temp(".pdf", b"%PDF");
        assert!(matches!(
            read_table(file.path()),
            Err(ReadError::UnsupportedExtension(ref ext)) if ext == "pdf"
        ));
    }

    #[test]
    fn spreadsheet_cells_render_as_text() {
        assert_eq!(cell_text(&Data::Float(12_345.0)), "12345");
        assert_eq!(cell_text(&Data::Int(7)), "7");
        assert_eq!(cell_text(&Data::String("  A1 ".to_string())), "A1");
        assert_eq!(cell_text(&Data::Empty), "");
    }
}
