use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};

use crate::aggregate::OptionColumns;
use crate::excel::TemplateOptions;

pub const OUTPUT_FILE_NAME: &str = "MERGED_OPTIONS.xlsx";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Everything one merge run needs. Built once from the command line and
/// passed by reference; nothing in it changes during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConfig {
    pub input_file: PathBuf,
    pub template_file: PathBuf,
    pub first_column: String,
    pub second_column: String,
    pub join_by: String,
    /// Column whose values are joined across duplicates.
    pub output_column: String,
    pub column_to_dropna: String,
    pub columns_to_drop_duplicates: Vec<String>,
    pub output_dir: PathBuf,
    pub template: TemplateOptions,
    pub run_date: NaiveDate,
}

impl MergeConfig {
    pub fn option_columns(&self) -> OptionColumns<'_> {
        OptionColumns {
            first: &self.first_column,
            second: &self.second_column,
            value: &self.output_column,
            join_by: &self.join_by,
            dropna: &self.column_to_dropna,
        }
    }

    /// `<output_dir>/<YYYYMMDD>/MERGED_OPTIONS.xlsx`
    pub fn output_path(&self) -> PathBuf {
        self.output_dir
            .join(date_stamp(self.run_date))
            .join(OUTPUT_FILE_NAME)
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn date_stamp(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

pub fn default_log_file(date: NaiveDate) -> PathBuf {
    Path::new(DEFAULT_LOG_DIR).join(format!("{}.log", date_stamp(date)))
}

#[cfg(test)]
pub(crate) fn sample_config(dir: &Path) -> MergeConfig {
    MergeConfig {
        input_file: dir.join("INPUT_options.xlsx"),
        template_file: dir.join("template.xlsx"),
        first_column: "Product\nCode".to_string(),
        second_column: "Size".to_string(),
        join_by: ",".to_string(),
        output_column: "Option".to_string(),
        column_to_dropna: "Stock".to_string(),
        columns_to_drop_duplicates: vec!["Product\nCode".to_string(), "Size".to_string()],
        output_dir: dir.join(DEFAULT_OUTPUT_DIR),
        template: TemplateOptions {
            data_start_row: 2,
            require_absolute_path: false,
        },
        run_date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
    }
}
