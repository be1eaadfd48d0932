use serde::{Deserialize, Serialize};

use super::domain::{ApplicationId, ApplicationStatus, HistoryEntry};

/// Display ordering for an audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HistoryOrder {
    #[default]
    #[serde(rename = "asc")]
    OldestFirst,
    #[serde(rename = "desc")]
    NewestFirst,
}

/// A finished, ordered audit trail for one application.
///
/// Iteration borrows the trail, so it can be walked any number of times and always yields
/// the same entries in the same order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTrail {
    application_id: ApplicationId,
    order: HistoryOrder,
    entries: Vec<HistoryEntry>,
}

impl HistoryTrail {
    /// Builds a trail from entries in any order. Sorting is stable on (`created_at`, `id`).
    pub fn new(
        application_id: ApplicationId,
        mut entries: Vec<HistoryEntry>,
        order: HistoryOrder,
    ) -> Self {
        entries.sort_by(|left, right| {
            (left.created_at, left.id).cmp(&(right.created_at, right.id))
        });
        if order == HistoryOrder::NewestFirst {
            entries.reverse();
        }
        Self {
            application_id,
            order,
            entries,
        }
    }

    pub fn application_id(&self) -> ApplicationId {
        self.application_id
    }

    pub fn order(&self) -> HistoryOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HistoryEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Statuses recorded by transition entries, oldest first. Notes are skipped.
    pub fn status_path(&self) -> Vec<ApplicationStatus> {
        let mut path: Vec<_> = self.entries.iter().filter_map(|entry| entry.status).collect();
        if self.order == HistoryOrder::NewestFirst {
            path.reverse();
        }
        path
    }

    pub fn into_entries(self) -> Vec<HistoryEntry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a HistoryTrail {
    type Item = &'a HistoryEntry;
    type IntoIter = std::slice::Iter<'a, HistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for HistoryTrail {
    type Item = HistoryEntry;
    type IntoIter = std::vec::IntoIter<HistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
