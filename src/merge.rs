use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::aggregate::{OptionColumns, merge_options};
use crate::common::{
    escape_field, parse_column_list, read_dataset, read_header_names, unescape_newlines,
};
use crate::config::{self, DEFAULT_OUTPUT_DIR, MergeConfig};
use crate::dataset::Dataset;
use crate::error::MergeError;
use crate::excel::{TemplateOptions, XlsxTemplate, project_into_template};
use crate::mapping::{build_column_mapping, unmatched_names};

/// Pattern used to locate an input file when the given one is missing.
const INPUT_FALLBACK_PATTERN: &str = r"^INPUT_.*\.xlsx$";

/// Column roles shared by every subcommand that aggregates. Use `\n` for
/// line breaks inside multi-line header names.
#[derive(Args, Debug, Clone)]
pub struct ColumnArgs {
    /// First key column
    #[arg(long = "first-column", value_name = "NAME")]
    pub first_column: String,

    /// Second key column
    #[arg(long = "second-column", value_name = "NAME")]
    pub second_column: String,

    /// Separator inserted between merged option values
    #[arg(long = "join-by", value_name = "STR")]
    pub join_by: String,

    /// Column whose values are merged across duplicate rows
    #[arg(long = "output-column", value_name = "NAME")]
    pub output_column: String,

    /// Rows with an empty value in this column are dropped
    #[arg(long = "column-to-dropna", value_name = "NAME")]
    pub column_to_dropna: String,

    /// Comma-separated column names identifying duplicate output rows
    #[arg(long = "columns-to-drop-duplicates", value_name = "NAMES")]
    pub columns_to_drop_duplicates: String,
}

#[derive(Args, Debug)]
#[command(
    about = "Merge duplicate options and write them into a template",
    long_about = "Reads the input file, merges rows sharing the two key columns, and saves the result into a copy of the template under <output-dir>/<YYYYMMDD>/MERGED_OPTIONS.xlsx."
)]
pub struct MergeArgs {
    /// Input data file (xlsx, csv, or tsv)
    #[arg(long = "input-file", value_name = "FILE")]
    pub input_file: PathBuf,

    /// Excel template receiving the merged rows
    #[arg(long = "template-file", value_name = "FILE")]
    pub template_file: PathBuf,

    #[command(flatten)]
    pub columns: ColumnArgs,

    /// Directory receiving the dated output folders
    #[arg(long = "output-dir", value_name = "DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// 1-based template row where data starts (row 1 holds the headers)
    #[arg(
        long = "data-start-row",
        value_name = "ROW",
        default_value_t = 2,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub data_start_row: u32,

    /// Refuse relative template paths (defaults to true on Windows)
    #[arg(
        long = "require-absolute-template",
        value_name = "BOOL",
        action = ArgAction::Set,
        default_value_t = cfg!(windows)
    )]
    pub require_absolute_template: bool,
}

#[derive(Args, Debug)]
#[command(
    about = "Print merged options as TSV",
    long_about = "Runs the merge on the input file and prints the resulting rows as TSV on stdout without touching any template. Tabs and newlines inside fields are escaped."
)]
pub struct AggregateArgs {
    /// Input data file (xlsx, csv, or tsv)
    #[arg(value_name = "FILE")]
    pub input_file: PathBuf,

    #[command(flatten)]
    pub columns: ColumnArgs,
}

#[derive(Args, Debug)]
#[command(
    about = "Show how data columns line up with a template",
    long_about = "Prints one line per data column that also exists in the template (data index, name, template position, template letter), followed by the names present on one side only."
)]
pub struct ColumnsArgs {
    /// Excel template file
    #[arg(long = "template-file", value_name = "FILE")]
    pub template_file: PathBuf,

    /// Data file whose header is matched against the template
    #[arg(value_name = "FILE")]
    pub data_file: PathBuf,
}

impl MergeArgs {
    fn into_config(self) -> Result<MergeConfig> {
        let columns = self.columns;
        Ok(MergeConfig {
            input_file: self.input_file,
            template_file: self.template_file,
            first_column: unescape_newlines(&columns.first_column),
            second_column: unescape_newlines(&columns.second_column),
            join_by: columns.join_by,
            output_column: unescape_newlines(&columns.output_column),
            column_to_dropna: unescape_newlines(&columns.column_to_dropna),
            columns_to_drop_duplicates: parse_column_list(&columns.columns_to_drop_duplicates)?,
            output_dir: self.output_dir,
            template: TemplateOptions {
                data_start_row: self.data_start_row,
                require_absolute_path: self.require_absolute_template,
            },
            run_date: config::today(),
        })
    }
}

pub fn run(args: MergeArgs) -> Result<()> {
    let mut config = args.into_config()?;
    config.input_file = resolve_input_file(&config.input_file, Path::new("."))?;
    let saved = run_merge(&config)?;
    info!("File saved to {}", saved.display());
    Ok(())
}

pub fn run_aggregate(args: AggregateArgs) -> Result<()> {
    let columns = args.columns;
    let first = unescape_newlines(&columns.first_column);
    let second = unescape_newlines(&columns.second_column);
    let value = unescape_newlines(&columns.output_column);
    let dropna = unescape_newlines(&columns.column_to_dropna);
    let subset = parse_column_list(&columns.columns_to_drop_duplicates)?;

    let dataset = read_dataset(&args.input_file)?;
    let merged = merge_options(
        dataset,
        &OptionColumns {
            first: &first,
            second: &second,
            value: &value,
            join_by: &columns.join_by,
            dropna: &dropna,
        },
    )?;
    let merged = finalize(merged, &dropna, &subset)?;

    let mut writer = BufWriter::new(io::stdout().lock());
    write_tsv(&mut writer, &merged)?;
    writer.flush()?;
    Ok(())
}

pub fn run_columns(args: ColumnsArgs) -> Result<()> {
    let template = read_header_names(&args.template_file)?;
    let data = read_header_names(&args.data_file)?;
    let mapping = build_column_mapping(template.as_slice(), data.as_slice());

    let mut writer = BufWriter::new(io::stdout().lock());
    for (idx, entry) in mapping.iter() {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            idx + 1,
            escape_field(&entry.name),
            entry.position,
            entry.letter()
        )?;
    }
    for name in unmatched_names(data.as_slice(), template.as_slice()) {
        writeln!(writer, "#data-only\t{}", escape_field(name))?;
    }
    for name in unmatched_names(template.as_slice(), data.as_slice()) {
        writeln!(writer, "#template-only\t{}", escape_field(name))?;
    }
    writer.flush()?;
    Ok(())
}

/// Runs the whole pipeline for `config` and returns the saved output path.
pub fn run_merge(config: &MergeConfig) -> Result<PathBuf> {
    let template_name = config
        .template_file
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    info!("Template file: {}", template_name);
    info!("Today's date: {}", config::date_stamp(config.run_date));

    let dataset = read_dataset(&config.input_file)?;
    debug!(rows = dataset.len(), columns = dataset.width(), "input dataset loaded");

    info!("Creating {} ...", config::OUTPUT_FILE_NAME);
    let result = merge_dataset(dataset, config)?;
    if result.is_empty() {
        warn!("merge produced no rows; the template will only keep its own contents");
    }

    let output = config.output_path();
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {}", parent.display()))?;
    }
    if output.exists() {
        fs::remove_file(&output)
            .with_context(|| format!("failed to remove previous output {}", output.display()))?;
    }

    let template_path = std::path::absolute(&config.template_file).with_context(|| {
        format!("failed to resolve template path {}", config.template_file.display())
    })?;
    let template_headers = read_header_names(&template_path)
        .map_err(|e| MergeError::template_access(&template_path, format!("{:#}", e)))?;
    let mapping = build_column_mapping(
        template_headers.as_slice(),
        result.column_names().as_slice(),
    );
    if mapping.is_empty() {
        warn!("no data column matches a template header; only the template is copied");
    }
    debug!(mapped = mapping.len(), "column mapping built");

    info!("Formatting {} ...", config::OUTPUT_FILE_NAME);
    let saved = project_into_template::<XlsxTemplate>(
        &result,
        &template_path,
        &mapping,
        &output,
        &config.template,
    )?;
    Ok(saved)
}

/// Aggregates `dataset` and applies the post-processing steps: drop rows
/// with an empty drop-na column, clear null placeholders, and keep the first
/// row of each duplicate group.
pub fn merge_dataset(dataset: Dataset, config: &MergeConfig) -> Result<Dataset, MergeError> {
    let merged = merge_options(dataset, &config.option_columns())?;
    finalize(
        merged,
        &config.column_to_dropna,
        &config.columns_to_drop_duplicates,
    )
}

fn finalize(dataset: Dataset, dropna: &str, subset: &[String]) -> Result<Dataset, MergeError> {
    dataset
        .drop_empty(dropna)?
        .normalize_missing()
        .dedup_by(subset)
}

/// Returns `path` when it exists, otherwise the first `INPUT_*.xlsx` file
/// (by name) in `search_dir`.
pub fn resolve_input_file(path: &Path, search_dir: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    let pattern = Regex::new(INPUT_FALLBACK_PATTERN).context("invalid input fallback pattern")?;
    let mut candidates = Vec::new();
    let entries = fs::read_dir(search_dir)
        .with_context(|| format!("failed to list {}", search_dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", search_dir.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if pattern.is_match(&name) && entry.path().is_file() {
            candidates.push(entry.path());
        }
    }
    candidates.sort();
    match candidates.into_iter().next() {
        Some(found) => {
            warn!(
                "input file {} not found, using {}",
                path.display(),
                found.display()
            );
            Ok(found)
        }
        None => bail!(
            "input file {} not found and no INPUT_*.xlsx file in {}",
            path.display(),
            search_dir.display()
        ),
    }
}

fn write_tsv<W: Write>(writer: &mut W, dataset: &Dataset) -> Result<()> {
    let header: Vec<String> = dataset.column_names().into_iter().map(escape_field).collect();
    writeln!(writer, "{}", header.join("\t"))?;
    for row in dataset.rows() {
        let fields: Vec<String> = row.iter().map(|v| escape_field(v)).collect();
        writeln!(writer, "{}", fields.join("\t"))?;
    }
    Ok(())
}
