use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::debug;

use crate::dataset::{Dataset, KeyPair};
use crate::error::MergeError;

/// Column roles and join rule for one aggregation run.
#[derive(Debug, Clone, Copy)]
pub struct OptionColumns<'a> {
    pub first: &'a str,
    pub second: &'a str,
    pub value: &'a str,
    pub join_by: &'a str,
    pub dropna: &'a str,
}

struct KeyIndices {
    first: usize,
    second: usize,
    value: usize,
}

impl KeyIndices {
    fn resolve(dataset: &Dataset, columns: &OptionColumns<'_>) -> Result<Self, MergeError> {
        let indices = KeyIndices {
            first: dataset.column_index(columns.first)?,
            second: dataset.column_index(columns.second)?,
            value: dataset.column_index(columns.value)?,
        };
        dataset.column_index(columns.dropna)?;
        Ok(indices)
    }

    fn key_of(&self, dataset: &Dataset, row: usize) -> KeyPair {
        dataset.key_pair_at(row, self.first, self.second)
    }

    fn keys(&self, dataset: &Dataset) -> Vec<KeyPair> {
        (0..dataset.len()).map(|row| self.key_of(dataset, row)).collect()
    }
}

/// Collapses rows sharing a key pair into one row whose value column is the
/// joined text of the whole group.
///
/// Every column of the input survives. Each output row carries the fields of
/// the first row of its group (after a stable sort on the key pair), with the
/// value column replaced by the group's values joined with `join_by` in that
/// same order. Rows with an empty `dropna` cell never take part.
pub fn merge_options(dataset: Dataset, columns: &OptionColumns<'_>) -> Result<Dataset, MergeError> {
    let keys = KeyIndices::resolve(&dataset, columns)?;

    let mut base = dataset.drop_empty(columns.dropna)?;
    base.sort_by_keys(keys.first, keys.second);
    debug!(rows = base.len(), "sorted rows with non-empty drop-na column");

    let aggregated = aggregate_groups(&base, &keys, columns.join_by);
    debug!(groups = aggregated.len(), "aggregated option groups");

    let representatives = reconciliation_candidates(&base, &aggregated, &keys);
    let mask = positional_overlap(
        &keys.keys(&base),
        &keys.keys(&aggregated),
        representatives.len(),
    );
    let mut new_only = retain_by_mask(representatives, &mask);
    new_only.sort_by_keys(keys.first, keys.second);
    debug!(rows = new_only.len(), "rows retained after positional overlap check");

    backfill_values(&mut new_only, &aggregated, &keys);
    Ok(new_only)
}

fn aggregate_groups(base: &Dataset, keys: &KeyIndices, join_by: &str) -> Dataset {
    let rows = base
        .group_indices(keys.first, keys.second)
        .into_values()
        .map(|members| {
            let mut row = base.rows()[members[0]].clone();
            row[keys.value] = members
                .iter()
                .map(|&idx| base.rows()[idx][keys.value].as_str())
                .collect::<Vec<_>>()
                .join(join_by);
            row
        })
        .collect();
    let mut aggregated = base.with_rows(rows);
    aggregated.sort_by_keys(keys.first, keys.second);
    aggregated
}

/// Rows of `base` whose key pair also exists in `aggregated`, reduced to the
/// first row per key pair.
fn reconciliation_candidates(base: &Dataset, aggregated: &Dataset, keys: &KeyIndices) -> Dataset {
    let known: HashSet<KeyPair> = keys.keys(aggregated).into_iter().collect();
    let common: Vec<Vec<String>> = (0..base.len())
        .filter(|&row| known.contains(&keys.key_of(base, row)))
        .map(|row| base.rows()[row].clone())
        .collect();

    let mut common = base.with_rows(common);
    common.sort_by_keys(keys.first, keys.second);

    let mut seen: HashSet<KeyPair> = HashSet::with_capacity(common.len());
    let rows = (0..common.len())
        .filter(|&row| seen.insert(keys.key_of(&common, row)))
        .map(|row| common.rows()[row].clone())
        .collect();
    common.with_rows(rows)
}

/// Position-bounded overlap: entry `i` is true when the key pair at position
/// `i` of `base_keys` occurs among the first `limit` key pairs of
/// `aggregated_keys`. Only the first `limit` positions of `base_keys` are
/// inspected, so the result has at most `limit` entries.
pub fn positional_overlap(
    base_keys: &[KeyPair],
    aggregated_keys: &[KeyPair],
    limit: usize,
) -> Vec<bool> {
    let window: HashSet<&KeyPair> = aggregated_keys.iter().take(limit).collect();
    base_keys
        .iter()
        .take(limit)
        .map(|key| window.contains(key))
        .collect()
}

/// Keeps row `i` when `mask[i]` is true. Rows past the end of the mask are
/// not retained.
fn retain_by_mask(dataset: Dataset, mask: &[bool]) -> Dataset {
    let rows = dataset
        .rows()
        .iter()
        .zip(mask)
        .filter(|(_, keep)| **keep)
        .map(|(row, _)| row.clone())
        .collect();
    dataset.with_rows(rows)
}

fn backfill_values(target: &mut Dataset, aggregated: &Dataset, keys: &KeyIndices) {
    let mut first_match: IndexMap<KeyPair, usize> = IndexMap::with_capacity(aggregated.len());
    for row in 0..aggregated.len() {
        first_match.entry(keys.key_of(aggregated, row)).or_insert(row);
    }
    for row in 0..target.len() {
        if let Some(&matched) = first_match.get(&keys.key_of(target, row)) {
            let joined = aggregated.rows()[matched][keys.value].clone();
            target.set_value(row, keys.value, joined);
        }
    }
}
