//! Keyed tables and per-table diffs.

use std::collections::BTreeMap;

use clusterboard_model::Row;
use serde::{Deserialize, Serialize};

/// An ordered table of rows keyed by [`Row::key`].
#[derive(Debug, Clone, PartialEq)]
pub struct Table<R: Row> {
    rows: BTreeMap<R::Key, R>,
}

impl<R: Row> Default for Table<R> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

impl<R: Row> Table<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &R::Key) -> bool {
        self.rows.contains_key(key)
    }

    /// Iterate rows in key order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &R::Key> {
        self.rows.keys()
    }

    /// Insert or replace a row, returning the previous row for its key.
    pub(crate) fn upsert(&mut self, row: R) -> Option<R> {
        self.rows.insert(row.key(), row)
    }

    pub(crate) fn remove(&mut self, key: &R::Key) -> Option<R> {
        self.rows.remove(key)
    }

    /// Remove every row matching the predicate, returning the removed rows.
    pub(crate) fn remove_where<F>(&mut self, mut predicate: F) -> Vec<R>
    where
        F: FnMut(&R) -> bool,
    {
        let keys: Vec<R::Key> = self
            .rows
            .iter()
            .filter(|(_, row)| predicate(row))
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter().filter_map(|key| self.rows.remove(key)).collect()
    }

    /// Compute the difference between this table and an incoming row set.
    ///
    /// The incoming rows must have unique keys. Rows are compared with
    /// [`Row::same_content`]; a row whose only difference is its observation
    /// timestamp lands in `touched`, not `updated`.
    pub fn diff(&self, incoming: &[R]) -> TableDiff<R> {
        let mut diff = TableDiff::default();
        let mut seen = std::collections::BTreeSet::new();

        for row in incoming {
            let key = row.key();
            match self.rows.get(&key) {
                None => diff.inserted.push(row.clone()),
                Some(existing) if existing == row => {}
                Some(existing) if existing.same_content(row) => diff.touched.push(row.clone()),
                Some(_) => diff.updated.push(row.clone()),
            }
            seen.insert(key);
        }

        diff.deleted = self
            .rows
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();

        diff
    }
}

impl<R: Row> FromIterator<R> for Table<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().map(|row| (row.key(), row)).collect(),
        }
    }
}

/// Difference between a stored table and an incoming row set.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDiff<R: Row> {
    /// Rows present only in the incoming set.
    pub inserted: Vec<R>,
    /// Rows present in both whose content changed.
    pub updated: Vec<R>,
    /// Rows present in both that differ only in their observation timestamp.
    pub touched: Vec<R>,
    /// Keys present only in the stored table.
    pub deleted: Vec<R::Key>,
}

impl<R: Row> Default for TableDiff<R> {
    fn default() -> Self {
        Self {
            inserted: Vec::new(),
            updated: Vec::new(),
            touched: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<R: Row> TableDiff<R> {
    /// Rows to write (inserted, updated and touched), in that order.
    pub fn writes(&self) -> impl Iterator<Item = &R> {
        self.inserted
            .iter()
            .chain(self.updated.iter())
            .chain(self.touched.iter())
    }

    /// Row counts for this diff.
    pub fn counts(&self) -> TableCounts {
        TableCounts {
            inserted: self.inserted.len(),
            updated: self.updated.len(),
            touched: self.touched.len(),
            deleted: self.deleted.len(),
        }
    }
}

/// Row counts of a single table diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub inserted: usize,
    pub updated: usize,
    pub touched: usize,
    pub deleted: usize,
}

impl TableCounts {
    /// Inserts, updates and deletes; timestamp-only refreshes are not churn.
    pub fn churn(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}
