use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use calamine::{Data, ExcelDateTime, Range, Reader, Xlsx, open_workbook};
use chrono::NaiveTime;
use rust_xlsxwriter::{Format, Formula, Workbook, Worksheet, XlsxError};
use tracing::debug;

use crate::common::column_letter;
use crate::dataset::Dataset;
use crate::error::MergeError;
use crate::mapping::ColumnMapping;

type CellValue = Data;

/// Where the template receives data and which path rules apply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateOptions {
    /// 1-based row of the first data cell; row 1 is the header.
    pub data_start_row: u32,
    /// Some deployments drive the template through an external tool that
    /// only accepts absolute paths.
    pub require_absolute_path: bool,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        TemplateOptions {
            data_start_row: 2,
            require_absolute_path: cfg!(windows),
        }
    }
}

/// Capability needed to populate a spreadsheet template.
pub trait TemplateWriter: Sized {
    fn open(path: &Path) -> Result<Self, MergeError>;

    /// Writes `values` top-down into the 1-based column `position`, starting
    /// at the 1-based row `start_row`.
    fn write_column(
        &mut self,
        position: usize,
        start_row: u32,
        values: &[&str],
    ) -> Result<(), MergeError>;

    fn save_as(&mut self, path: &Path) -> Result<(), MergeError>;
}

#[derive(Debug, Clone, PartialEq)]
enum TemplateCell {
    Value(CellValue),
    Formula(String),
}

/// In-memory copy of the first sheet of an xlsx template. Cell values and
/// formulas survive a round trip; styling does not.
#[derive(Debug)]
pub struct XlsxTemplate {
    path: PathBuf,
    sheet_name: String,
    cells: BTreeMap<(u32, u16), TemplateCell>,
}

impl XlsxTemplate {
    fn load(path: &Path) -> Result<Self> {
        let mut workbook: Xlsx<_> = open_workbook(path)
            .with_context(|| format!("failed to open workbook {}", path.display()))?;
        let sheet_name = first_sheet_name(&workbook)?;
        let values = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| anyhow!("failed loading sheet '{}': {}", sheet_name, e))?;
        let formulas = workbook
            .worksheet_formula(&sheet_name)
            .map_err(|e| anyhow!("failed reading formulas from '{}': {}", sheet_name, e))?;

        let mut cells = BTreeMap::new();
        let origin = values.start().unwrap_or((0, 0));
        for (row, col, value) in values.used_cells() {
            let key = absolute_key(origin, row, col)?;
            cells.insert(key, TemplateCell::Value(value.clone()));
        }
        let origin = formulas.start().unwrap_or((0, 0));
        for (row, col, formula) in formulas.used_cells() {
            if formula.is_empty() {
                continue;
            }
            let key = absolute_key(origin, row, col)?;
            cells.insert(key, TemplateCell::Formula(formula.clone()));
        }

        Ok(XlsxTemplate {
            path: path.to_path_buf(),
            sheet_name,
            cells,
        })
    }

    fn write_cell(
        worksheet: &mut Worksheet,
        (row, col): (u32, u16),
        cell: &TemplateCell,
    ) -> Result<(), XlsxError> {
        match cell {
            TemplateCell::Formula(formula) => {
                worksheet.write_formula(row, col, Formula::new(formula))?;
            }
            TemplateCell::Value(value) => match value {
                CellValue::Empty => {}
                CellValue::String(s) | CellValue::DateTimeIso(s) | CellValue::DurationIso(s) => {
                    worksheet.write_string(row, col, s)?;
                }
                CellValue::Float(f) => {
                    worksheet.write_number(row, col, *f)?;
                }
                CellValue::Int(i) => {
                    worksheet.write_number(row, col, *i as f64)?;
                }
                CellValue::Bool(b) => {
                    worksheet.write_boolean(row, col, *b)?;
                }
                CellValue::DateTime(dt) => {
                    let format = Format::new().set_num_format(datetime_num_format(dt));
                    worksheet.write_number_with_format(row, col, dt.as_f64(), &format)?;
                }
                CellValue::Error(err) => {
                    worksheet.write_string(row, col, format!("#ERROR:{:?}", err))?;
                }
            },
        }
        Ok(())
    }
}

impl TemplateWriter for XlsxTemplate {
    fn open(path: &Path) -> Result<Self, MergeError> {
        XlsxTemplate::load(path)
            .map_err(|e| MergeError::template_access(path, format!("{:#}", e)))
    }

    fn write_column(
        &mut self,
        position: usize,
        start_row: u32,
        values: &[&str],
    ) -> Result<(), MergeError> {
        if position == 0 || start_row == 0 {
            return Err(MergeError::template_access(
                &self.path,
                "template positions and rows are 1-based",
            ));
        }
        let col = u16::try_from(position - 1).map_err(|_| {
            MergeError::template_access(
                &self.path,
                format!("column position {} is out of range", position),
            )
        })?;
        for (offset, value) in values.iter().enumerate() {
            let row = u32::try_from(offset)
                .ok()
                .and_then(|offset| (start_row - 1).checked_add(offset))
                .ok_or_else(|| MergeError::template_access(&self.path, "row index out of range"))?;
            if value.is_empty() {
                self.cells.remove(&(row, col));
            } else {
                self.cells
                    .insert((row, col), TemplateCell::Value(CellValue::String(value.to_string())));
            }
        }
        Ok(())
    }

    fn save_as(&mut self, path: &Path) -> Result<(), MergeError> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(&self.sheet_name)
            .map_err(|e| MergeError::template_access(&self.path, e))?;
        for (&key, cell) in &self.cells {
            XlsxTemplate::write_cell(worksheet, key, cell).map_err(|e| {
                MergeError::template_access(
                    path,
                    format!(
                        "failed writing cell {}{} on '{}': {}",
                        column_letter(key.1 as usize + 1),
                        key.0 + 1,
                        self.sheet_name,
                        e
                    ),
                )
            })?;
        }
        workbook
            .save(path)
            .map_err(|e| MergeError::template_access(path, e))
    }
}

/// Fails when the platform needs an absolute template path and `path` is
/// relative. Runs before anything touches the template.
pub fn check_template_path(path: &Path, options: &TemplateOptions) -> Result<(), MergeError> {
    if options.require_absolute_path && !path.is_absolute() {
        return Err(MergeError::PathRequirement {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Copies every mapped column of `result` into `writer`.
pub fn write_mapped_columns<W: TemplateWriter>(
    writer: &mut W,
    result: &Dataset,
    mapping: &ColumnMapping,
    start_row: u32,
) -> Result<(), MergeError> {
    for (result_index, name) in result.column_names().into_iter().enumerate() {
        let Some(entry) = mapping.get(result_index) else {
            continue;
        };
        let values = result.column_values(name)?;
        debug!(
            column = %entry.name.escape_debug(),
            letter = %entry.letter(),
            rows = values.len(),
            "writing column into template"
        );
        writer.write_column(entry.position, start_row, &values)?;
    }
    Ok(())
}

/// Opens the template, writes the mapped columns of `result` into it and
/// saves it as `output` with an `.xlsx` extension. Returns the saved path.
pub fn project_into_template<W: TemplateWriter>(
    result: &Dataset,
    template_path: &Path,
    mapping: &ColumnMapping,
    output: &Path,
    options: &TemplateOptions,
) -> Result<PathBuf, MergeError> {
    check_template_path(template_path, options)?;
    let mut template = W::open(template_path)?;
    write_mapped_columns(&mut template, result, mapping, options.data_start_row)?;
    let output = output.with_extension("xlsx");
    template.save_as(&output)?;
    Ok(output)
}

/// Reads the first sheet of a workbook as a dataset of text cells. Row 1 is
/// the header and column A is the first column, even when they are blank.
pub fn read_sheet_dataset(path: &Path) -> Result<Dataset> {
    let values = load_first_sheet(path)?;
    let headers = absolute_row(&values, 0);
    let last_row = values.end().map(|(row, _)| row).unwrap_or(0);
    let rows = (1..=last_row)
        .map(|row| absolute_row(&values, row))
        .collect();
    Ok(Dataset::from_rows(headers, rows))
}

/// Header row of the first sheet of a workbook, names kept verbatim. Blank
/// cells before the first used column come back as empty names so that
/// positions stay anchored at column A.
pub fn read_sheet_headers(path: &Path) -> Result<Vec<String>> {
    let values = load_first_sheet(path)?;
    Ok(absolute_row(&values, 0))
}

/// Cells of the 0-based sheet row `row`, from column A to the last used column.
fn absolute_row(values: &Range<CellValue>, row: u32) -> Vec<String> {
    let Some((_, last_col)) = values.end() else {
        return Vec::new();
    };
    (0..=last_col)
        .map(|col| values.get_value((row, col)).map(render_cell).unwrap_or_default())
        .collect()
}

fn load_first_sheet(path: &Path) -> Result<Range<CellValue>> {
    let mut workbook: Xlsx<_> = open_workbook(path)
        .with_context(|| format!("failed to open workbook {}", path.display()))?;
    let sheet_name = first_sheet_name(&workbook)?;
    workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| anyhow!("failed loading sheet '{}': {}", sheet_name, e))
}

fn first_sheet_name<R>(workbook: &Xlsx<R>) -> Result<String>
where
    R: std::io::Read + std::io::Seek,
{
    match workbook.sheet_names().into_iter().next() {
        Some(name) => Ok(name),
        None => bail!("workbook contains no sheets"),
    }
}

fn absolute_key(origin: (u32, u32), row: usize, col: usize) -> Result<(u32, u16)> {
    let row = origin.0 as usize + row;
    let col = origin.1 as usize + col;
    Ok((
        u32::try_from(row).with_context(|| format!("row {} out of range", row + 1))?,
        u16::try_from(col).with_context(|| format!("column {} out of range", col + 1))?,
    ))
}

/// Number format that shows every part of a template date cell.
fn datetime_num_format(dt: &ExcelDateTime) -> &'static str {
    if dt.is_duration() {
        return "hh:mm:ss";
    }
    match dt.as_datetime() {
        Some(datetime) if datetime.time() != NaiveTime::MIN => "yyyy-mm-dd hh:mm:ss",
        _ => "yyyy-mm-dd",
    }
}

fn render_cell(value: &CellValue) -> String {
    match value {
        CellValue::Empty => String::new(),
        CellValue::String(s) => s.clone(),
        CellValue::Float(f) => format_float(*f),
        CellValue::Int(i) => i.to_string(),
        CellValue::Bool(b) => b.to_string(),
        CellValue::DateTime(dt) => render_datetime(dt),
        CellValue::DateTimeIso(s) => s.clone(),
        CellValue::DurationIso(s) => s.clone(),
        CellValue::Error(err) => format!("#ERROR:{:?}", err),
    }
}

fn format_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

fn render_datetime(dt: &ExcelDateTime) -> String {
    if dt.is_duration() {
        return format_float(dt.as_f64());
    }
    match dt.as_datetime() {
        Some(datetime) if datetime.time() == NaiveTime::MIN => datetime.date().to_string(),
        Some(datetime) => datetime.to_string(),
        None => format_float(dt.as_f64()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::dataset_of;
    use crate::mapping::build_column_mapping;

    fn write_template(path: &Path) {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name("Upload").unwrap();
        for (col, header) in ["Name", "Qty", "Code"].iter().enumerate() {
            worksheet.write_string(0, col as u16, *header).unwrap();
        }
        worksheet.write_string(1, 0, "placeholder").unwrap();
        worksheet.write_number(1, 1, 7.0).unwrap();
        worksheet.write_formula(5, 1, "=SUM(B2:B5)").unwrap();
        workbook.save(path).unwrap();
    }

    fn read_back(path: &Path) -> (String, Range<CellValue>, Range<String>) {
        let mut workbook: Xlsx<_> = open_workbook(path).unwrap();
        let name = workbook.sheet_names()[0].clone();
        let values = workbook.worksheet_range(&name).unwrap();
        let formulas = workbook.worksheet_formula(&name).unwrap();
        (name, values, formulas)
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Vec<(usize, u32, Vec<String>)>,
    }

    impl TemplateWriter for RecordingWriter {
        fn open(_path: &Path) -> Result<Self, MergeError> {
            Ok(RecordingWriter::default())
        }

        fn write_column(
            &mut self,
            position: usize,
            start_row: u32,
            values: &[&str],
        ) -> Result<(), MergeError> {
            self.writes.push((
                position,
                start_row,
                values.iter().map(|v| v.to_string()).collect(),
            ));
            Ok(())
        }

        fn save_as(&mut self, _path: &Path) -> Result<(), MergeError> {
            Ok(())
        }
    }

    #[test]
    fn mapped_columns_are_written_at_template_positions() {
        let result = dataset_of(&["Code", "Extra", "Name"], &[&["A1", "e", "shirt"]]);
        let mapping = build_column_mapping(&["Name", "Qty", "Code"], &["Code", "Extra", "Name"]);
        let mut writer = RecordingWriter::default();
        write_mapped_columns(&mut writer, &result, &mapping, 2).unwrap();
        assert_eq!(
            writer.writes,
            vec![
                (3, 2, vec!["A1".to_string()]),
                (1, 2, vec!["shirt".to_string()]),
            ]
        );
    }

    #[test]
    fn relative_template_path_is_rejected_before_opening() {
        let options = TemplateOptions {
            data_start_row: 2,
            require_absolute_path: true,
        };
        let result = dataset_of(&["Name"], &[]);
        let mapping = build_column_mapping(&["Name"], &["Name"]);
        let err = project_into_template::<XlsxTemplate>(
            &result,
            Path::new("does-not-exist.xlsx"),
            &mapping,
            Path::new("out.xlsx"),
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, MergeError::PathRequirement { .. }));
    }

    #[test]
    fn relative_path_allowed_when_not_required() {
        let options = TemplateOptions {
            data_start_row: 2,
            require_absolute_path: false,
        };
        assert!(check_template_path(Path::new("template.xlsx"), &options).is_ok());
    }

    #[test]
    fn unreadable_template_is_a_template_access_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = XlsxTemplate::open(&dir.path().join("missing.xlsx")).unwrap_err();
        assert!(matches!(err, MergeError::TemplateAccess { .. }));
    }

    #[test]
    fn projection_round_trips_through_xlsx() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("template.xlsx");
        write_template(&template_path);

        let result = dataset_of(
            &["Code", "Extra", "Name"],
            &[&["A1", "x", "shirt"], &["B2", "y", ""]],
        );
        let mapping =
            build_column_mapping(&["Name", "Qty", "Code"], result.column_names().as_slice());
        let options = TemplateOptions {
            data_start_row: 2,
            require_absolute_path: false,
        };
        let saved = project_into_template::<XlsxTemplate>(
            &result,
            &template_path,
            &mapping,
            &dir.path().join("merged.csv"),
            &options,
        )
        .unwrap();
        assert_eq!(saved, dir.path().join("merged.xlsx"));

        let (name, values, formulas) = read_back(&saved);
        assert_eq!(name, "Upload");
        let text = |row: u32, col: u32| {
            values
                .get_value((row, col))
                .map(render_cell)
                .unwrap_or_default()
        };
        assert_eq!(text(0, 0), "Name");
        assert_eq!(text(0, 2), "Code");
        assert_eq!(text(1, 0), "shirt");
        assert_eq!(text(1, 1), "7");
        assert_eq!(text(1, 2), "A1");
        assert_eq!(text(2, 0), "");
        assert_eq!(text(2, 2), "B2");
        assert_eq!(
            formulas.get_value((5, 1)).map(|f| f.trim_start_matches('=').to_string()),
            Some("SUM(B2:B5)".to_string())
        );
    }

    #[test]
    fn header_positions_are_anchored_at_column_a() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offset.xlsx");
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        for (col, header) in ["Name", "Qty", "Code"].iter().enumerate() {
            worksheet.write_string(0, col as u16 + 1, *header).unwrap();
        }
        workbook.save(&path).unwrap();

        let headers = read_sheet_headers(&path).unwrap();
        assert_eq!(headers, vec!["", "Name", "Qty", "Code"]);
        let mapping = build_column_mapping(headers.as_slice(), &["Name"]);
        assert_eq!(mapping.get(0).unwrap().letter(), "B");
    }

    #[test]
    fn blank_first_row_gives_empty_header_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank-row.xlsx");
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.write_string(1, 0, "Name").unwrap();
        worksheet.write_string(2, 0, "shirt").unwrap();
        workbook.save(&path).unwrap();

        assert_eq!(read_sheet_headers(&path).unwrap(), vec![""]);
        let dataset = read_sheet_dataset(&path).unwrap();
        assert_eq!(dataset.column_names(), vec![""]);
        assert_eq!(dataset.rows(), &[vec!["Name"], vec!["shirt"]]);
    }

    #[test]
    fn date_cells_with_a_time_keep_the_time_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dates.xlsx");
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        let stamp = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");
        let day = Format::new().set_num_format("yyyy-mm-dd");
        // 2024-03-09 10:30 and 2024-03-09 as Excel serials.
        worksheet.write_number_with_format(0, 0, 45360.4375, &stamp).unwrap();
        worksheet.write_number_with_format(0, 1, 45360.0, &day).unwrap();
        workbook.save(&path).unwrap();

        let template = XlsxTemplate::open(&path).unwrap();
        let format_at = |col: u16| match template.cells.get(&(0, col)) {
            Some(TemplateCell::Value(CellValue::DateTime(dt))) => datetime_num_format(dt),
            other => panic!("expected a date cell, got {:?}", other),
        };
        assert_eq!(format_at(0), "yyyy-mm-dd hh:mm:ss");
        assert_eq!(format_at(1), "yyyy-mm-dd");
    }

    #[test]
    fn reads_first_sheet_as_text_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.xlsx");
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.write_string(0, 0, "Product\nCode").unwrap();
        worksheet.write_string(0, 1, "Qty").unwrap();
        worksheet.write_string(1, 0, "007").unwrap();
        worksheet.write_number(1, 1, 3.0).unwrap();
        worksheet.write_number(2, 1, 2.5).unwrap();
        workbook.save(&path).unwrap();

        let dataset = read_sheet_dataset(&path).unwrap();
        assert_eq!(dataset.column_names(), vec!["Product\nCode", "Qty"]);
        assert_eq!(dataset.rows(), &[vec!["007", "3"], vec!["", "2.5"]]);
        assert_eq!(
            read_sheet_headers(&path).unwrap(),
            vec!["Product\nCode", "Qty"]
        );
    }
}
