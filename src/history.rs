use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::form::SearchForm;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("No search history entry at index {0}")]
    UnknownEntry(usize),
    #[error("Cannot choose the same search history to compare")]
    CannotDiffSelf,
}

/// A past search: the backend reference id and the form that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub form: SearchForm,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only log of searches with a pointer to the entry currently shown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHistory {
    entries: Vec<HistoryEntry>,
    current: Option<usize>,
}

impl SearchHistory {
    /// Append an entry; it becomes current. Returns its index.
    pub fn append(&mut self, form: SearchForm, id: impl Into<String>) -> usize {
        self.entries.push(HistoryEntry {
            id: id.into(),
            form,
            recorded_at: Utc::now(),
        });
        let index = self.entries.len() - 1;
        self.current = Some(index);
        index
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn get(&self, index: usize) -> Result<&HistoryEntry, HistoryError> {
        self.entries.get(index).ok_or(HistoryError::UnknownEntry(index))
    }

    pub fn set_current(&mut self, index: usize) -> Result<(), HistoryError> {
        self.get(index)?;
        self.current = Some(index);
        Ok(())
    }

    /// Entry to compare against in diff mode; the current entry is refused.
    pub fn diff_target(&self, index: usize) -> Result<&HistoryEntry, HistoryError> {
        let entry = self.get(index)?;
        if self.current == Some(index) {
            return Err(HistoryError::CannotDiffSelf);
        }
        Ok(entry)
    }

    /// Index reached by moving `offset` entries from the current one,
    /// clamped to the log. `None` when the log is empty.
    pub fn step(&self, offset: isize) -> Option<usize> {
        let last = self.entries.len().checked_sub(1)?;
        let from = self.current.unwrap_or(last) as isize;
        Some(from.saturating_add(offset).clamp(0, last as isize) as usize)
    }
}
