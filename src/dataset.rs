use std::cmp::Ordering;

use indexmap::{IndexMap, IndexSet};

use crate::error::MergeError;

/// Placeholder some exporters leave behind for missing cells.
pub const NULL_PLACEHOLDER: &str = "nan";

/// Composite identity used for grouping and reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPair {
    pub first: String,
    pub second: String,
}

impl KeyPair {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        KeyPair {
            first: first.into(),
            second: second.into(),
        }
    }
}

/// Rows of text cells sharing one ordered, unique column-name sequence.
///
/// Every row holds exactly one value per column, in column order; `push_row`
/// pads or truncates ragged input to keep that invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    columns: IndexSet<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    /// Creates an empty dataset. Repeated names are disambiguated as
    /// `name.1`, `name.2`, ... so that every column stays addressable.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = columns.into_iter().map(Into::into).collect();
        Dataset {
            columns: unique_column_names(names).into_iter().collect(),
            rows: Vec::new(),
        }
    }

    pub fn from_rows<I, S>(columns: I, rows: Vec<Vec<String>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dataset = Dataset::new(columns);
        for row in rows {
            dataset.push_row(row);
        }
        dataset
    }

    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(String::as_str).collect()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn column_index(&self, column: &str) -> Result<usize, MergeError> {
        self.columns
            .get_index_of(column)
            .ok_or_else(|| MergeError::missing_column(column))
    }

    pub fn column_values(&self, column: &str) -> Result<Vec<&str>, MergeError> {
        let idx = self.column_index(column)?;
        Ok(self.rows.iter().map(|row| row[idx].as_str()).collect())
    }

    pub(crate) fn key_pair_at(&self, row: usize, first: usize, second: usize) -> KeyPair {
        let values = &self.rows[row];
        KeyPair::new(values[first].as_str(), values[second].as_str())
    }

    pub(crate) fn set_value(&mut self, row: usize, column: usize, value: String) {
        self.rows[row][column] = value;
    }

    pub(crate) fn with_rows(&self, rows: Vec<Vec<String>>) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Drops every row whose `column` is empty.
    pub fn drop_empty(self, column: &str) -> Result<Dataset, MergeError> {
        let idx = self.column_index(column)?;
        let Dataset { columns, rows } = self;
        let rows = rows
            .into_iter()
            .filter(|row| !row[idx].is_empty())
            .collect();
        Ok(Dataset { columns, rows })
    }

    /// Replaces cells holding the null placeholder with empty strings.
    pub fn normalize_missing(mut self) -> Dataset {
        for cell in self.rows.iter_mut().flatten() {
            if *cell == NULL_PLACEHOLDER {
                cell.clear();
            }
        }
        self
    }

    /// Keeps the first row of every distinct combination of `subset` values.
    pub fn dedup_by(self, subset: &[String]) -> Result<Dataset, MergeError> {
        let indices = subset
            .iter()
            .map(|name| self.column_index(name))
            .collect::<Result<Vec<_>, _>>()?;
        let Dataset { columns, rows } = self;
        let mut seen: IndexSet<Vec<String>> = IndexSet::with_capacity(rows.len());
        let rows = rows
            .into_iter()
            .filter(|row| seen.insert(indices.iter().map(|&idx| row[idx].clone()).collect()))
            .collect();
        Ok(Dataset { columns, rows })
    }

    /// Stable ascending sort on the two key columns.
    pub(crate) fn sort_by_keys(&mut self, first: usize, second: usize) {
        self.rows.sort_by(|a, b| compare_keys(a, b, first, second));
    }

    /// Row indices grouped by key pair, groups in order of first appearance.
    pub(crate) fn group_indices(
        &self,
        first: usize,
        second: usize,
    ) -> IndexMap<KeyPair, Vec<usize>> {
        let mut groups: IndexMap<KeyPair, Vec<usize>> = IndexMap::new();
        for row in 0..self.rows.len() {
            groups
                .entry(self.key_pair_at(row, first, second))
                .or_default()
                .push(row);
        }
        groups
    }
}

fn compare_keys(a: &[String], b: &[String], first: usize, second: usize) -> Ordering {
    a[first]
        .cmp(&b[first])
        .then_with(|| a[second].cmp(&b[second]))
}

/// Renames repeated column names so that each one is unique, keeping the
/// first occurrence untouched.
pub fn unique_column_names(names: Vec<String>) -> Vec<String> {
    let mut taken: IndexSet<String> = IndexSet::with_capacity(names.len());
    let mut counters: IndexMap<String, usize> = IndexMap::new();
    for name in names {
        if !taken.contains(&name) {
            taken.insert(name);
            continue;
        }
        let counter = counters.entry(name.clone()).or_insert(0);
        let renamed = loop {
            *counter += 1;
            let candidate = format!("{}.{}", name, counter);
            if !taken.contains(&candidate) {
                break candidate;
            }
        };
        taken.insert(renamed);
    }
    taken.into_iter().collect()
}

#[cfg(test)]
pub(crate) fn dataset_of(columns: &[&str], rows: &[&[&str]]) -> Dataset {
    Dataset::from_rows(
        columns.iter().copied(),
        rows.iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn duplicate_headers_get_numeric_suffixes() {
        let names = vec!["a", "b", "a", "a.1", "a"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            unique_column_names(names),
            vec!["a", "b", "a.1", "a.1.1", "a.2"]
        );
    }

    #[test]
    fn ragged_rows_are_padded_and_truncated() {
        let mut dataset = Dataset::new(["x", "y"]);
        dataset.push_row(vec!["1".into()]);
        dataset.push_row(vec!["1".into(), "2".into(), "3".into()]);
        assert_eq!(dataset.rows()[0], vec!["1", ""]);
        assert_eq!(dataset.rows()[1], vec!["1", "2"]);
    }

    #[test]
    fn drop_empty_removes_blank_rows() {
        let dataset = dataset_of(&["k", "v"], &[&["a", ""], &["b", "x"]]);
        let filtered = dataset.drop_empty("v").unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.column_values("k").unwrap(), vec!["b"]);
    }

    #[test]
    fn drop_empty_reports_missing_column() {
        let dataset = dataset_of(&["k"], &[&["a"]]);
        let err = dataset.drop_empty("missing").unwrap_err();
        assert!(matches!(err, MergeError::MissingColumn { column } if column == "missing"));
    }

    #[test]
    fn column_lookup_is_exact_including_newlines() {
        let dataset = dataset_of(&["Option\nName"], &[&["red"]]);
        assert!(dataset.column_index("Option\nName").is_ok());
        assert!(dataset.column_index("Option Name").is_err());
        assert!(dataset.column_index("Option\n Name").is_err());
    }

    #[test]
    fn normalize_missing_only_touches_exact_placeholders() {
        let dataset = dataset_of(&["v"], &[&["nan"], &["banana"], &[""]]);
        let normalized = dataset.normalize_missing();
        assert_eq!(normalized.column_values("v").unwrap(), vec!["", "banana", ""]);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let dataset = dataset_of(
            &["k", "v"],
            &[&["a", "1"], &["b", "2"], &["a", "3"]],
        );
        let deduped = dataset.dedup_by(&["k".to_string()]).unwrap();
        assert_eq!(deduped.column_values("v").unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn dedup_with_empty_subset_keeps_single_row() {
        let dataset = dataset_of(&["k"], &[&["a"], &["b"]]);
        let deduped = dataset.dedup_by(&[]).unwrap();
        assert_eq!(deduped.len(), 1);
    }

    #[test]
    fn from_rows_keeps_column_order_and_renames_duplicates() {
        let dataset = Dataset::from_rows(
            ["b", "a", "b"],
            vec![vec!["2".to_string(), "1".to_string(), "3".to_string()]],
        );
        assert_eq!(dataset.column_names(), vec!["b", "a", "b.1"]);
        assert_eq!(dataset.column_values("b.1").unwrap(), vec!["3"]);
    }

    fn small_dataset() -> impl Strategy<Value = Dataset> {
        prop::collection::vec(
            (
                prop::sample::select(vec!["", "a", "b"]),
                prop::sample::select(vec!["", "x", "y", "nan"]),
            ),
            0..20,
        )
        .prop_map(|rows| {
            Dataset::from_rows(
                ["k", "v"],
                rows.into_iter()
                    .map(|(k, v)| vec![k.to_string(), v.to_string()])
                    .collect(),
            )
        })
    }

    proptest! {
        #[test]
        fn drop_empty_is_idempotent(dataset in small_dataset()) {
            let once = dataset.drop_empty("v").unwrap();
            let twice = once.clone().drop_empty("v").unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn dedup_is_idempotent(dataset in small_dataset()) {
            let subset = vec!["k".to_string()];
            let once = dataset.dedup_by(&subset).unwrap();
            let twice = once.clone().dedup_by(&subset).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
