use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;

use crate::dataset::Dataset;
use crate::excel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Xlsx,
    Csv,
    Tsv,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "xlsx" | "xlsm" => Ok(SourceFormat::Xlsx),
            "csv" => Ok(SourceFormat::Csv),
            "tsv" | "tab" | "txt" => Ok(SourceFormat::Tsv),
            other => bail!(
                "unsupported input format '{}' for {}: expected xlsx, xlsm, csv, or tsv",
                other,
                path.display()
            ),
        }
    }
}

/// Reads a tabular file into a dataset. The first row is the header and
/// every cell is kept as text.
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    match SourceFormat::from_path(path)? {
        SourceFormat::Xlsx => excel::read_sheet_dataset(path),
        SourceFormat::Csv => read_delimited(path, b','),
        SourceFormat::Tsv => read_delimited(path, b'\t'),
    }
}

/// Header names of a tabular file, in file order and without renaming.
pub fn read_header_names(path: &Path) -> Result<Vec<String>> {
    match SourceFormat::from_path(path)? {
        SourceFormat::Xlsx => excel::read_sheet_headers(path),
        SourceFormat::Csv => delimited_headers(path, b','),
        SourceFormat::Tsv => delimited_headers(path, b'\t'),
    }
}

pub fn reader_for_path(path: &Path, delimiter: u8) -> Result<csv::Reader<File>> {
    let reader =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    // csv strips a leading UTF-8 BOM on its own.
    Ok(ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(reader))
}

fn delimited_headers(path: &Path, delimiter: u8) -> Result<Vec<String>> {
    let mut reader = reader_for_path(path, delimiter)?;
    Ok(reader
        .headers()
        .with_context(|| format!("failed reading header from {:?}", path))?
        .iter()
        .map(|s| s.to_string())
        .collect())
}

fn read_delimited(path: &Path, delimiter: u8) -> Result<Dataset> {
    let mut reader = reader_for_path(path, delimiter)?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("failed reading header from {:?}", path))?
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("failed reading from {:?}", path))?;
        rows.push(record.iter().map(|s| s.to_string()).collect());
    }
    Ok(Dataset::from_rows(headers, rows))
}

/// Turns literal `\n` escape sequences into newline characters so that
/// multi-line header labels can be typed on a command line.
pub fn unescape_newlines(value: &str) -> String {
    value.replace("\\n", "\n")
}

/// Splits a comma-separated list of column names. Surrounding whitespace is
/// part of the name and kept; empty entries are rejected.
pub fn parse_column_list(list: &str) -> Result<Vec<String>> {
    if list.is_empty() {
        bail!("column list must not be empty");
    }
    list.split(',')
        .map(|token| {
            if token.is_empty() {
                bail!("empty column name in '{}'", list);
            }
            Ok(unescape_newlines(token))
        })
        .collect()
}

/// Spreadsheet letter label of a 1-based column position (1 -> A, 27 -> AA).
pub fn column_letter(position: usize) -> String {
    assert!(position > 0, "column positions are 1-based");
    let mut n = position;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push((b'A' + (n % 26) as u8) as char);
        n /= 26;
    }
    letters.iter().rev().collect()
}

/// Escapes tabs and newlines for single-line TSV output.
pub fn escape_field(value: &str) -> String {
    value
        .replace('\t', "\\t")
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}
