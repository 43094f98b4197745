use std::collections::HashSet;

use indexmap::IndexMap;

use crate::common::column_letter;

/// Template column that receives one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPosition {
    pub name: String,
    /// 1-based ordinal of the column in the template.
    pub position: usize,
}

impl ColumnPosition {
    pub fn letter(&self) -> String {
        column_letter(self.position)
    }
}

/// Result column index -> template column, ordered by result index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    entries: IndexMap<usize, ColumnPosition>,
}

impl ColumnMapping {
    pub fn get(&self, result_index: usize) -> Option<&ColumnPosition> {
        self.entries.get(&result_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ColumnPosition)> {
        self.entries.iter().map(|(&idx, pos)| (idx, pos))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Aligns result columns with template columns by exact name.
///
/// Names present on one side only are skipped, and blank template header
/// cells never match. When a name repeats, the
/// first occurrence wins on both sides: the template's earliest position is
/// used, and only the earliest result column with that name gets an entry.
pub fn build_column_mapping<T, R>(template: &[T], result: &[R]) -> ColumnMapping
where
    T: AsRef<str>,
    R: AsRef<str>,
{
    let mut positions: IndexMap<&str, usize> = IndexMap::with_capacity(template.len());
    for (idx, name) in template.iter().enumerate() {
        if name.as_ref().is_empty() {
            continue;
        }
        positions.entry(name.as_ref()).or_insert(idx + 1);
    }

    let mut claimed: HashSet<&str> = HashSet::with_capacity(result.len());
    let mut entries = IndexMap::new();
    for (result_index, name) in result.iter().enumerate() {
        let name = name.as_ref();
        if !claimed.insert(name) {
            continue;
        }
        if let Some(&position) = positions.get(name) {
            entries.insert(
                result_index,
                ColumnPosition {
                    name: name.to_string(),
                    position,
                },
            );
        }
    }
    ColumnMapping { entries }
}

/// Names from `names` that do not occur in `other`, in order.
pub fn unmatched_names<'a, T, R>(names: &'a [T], other: &[R]) -> Vec<&'a str>
where
    T: AsRef<str>,
    R: AsRef<str>,
{
    let other: HashSet<&str> = other.iter().map(|name| name.as_ref()).collect();
    names
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| !other.contains(name))
        .collect()
}
