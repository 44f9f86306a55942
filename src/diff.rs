use std::collections::HashSet;

use crate::model::{DiffTag, ResultSet};

/// Classify two result sets against each other.
///
/// Papers of `current` missing from `historical` are tagged `Added`, the
/// rest `Common`. Papers of `historical` missing from `current` are tagged
/// `Removed`; the shared ones are left as they are, so `Common` only ever
/// appears on the current side. Identifiers are compared exactly.
pub fn reconcile(current: &ResultSet, historical: &ResultSet) -> (ResultSet, ResultSet) {
    let current_ids: HashSet<&str> = current.results.iter().map(|p| p.id.as_str()).collect();
    let historical_ids: HashSet<&str> = historical.results.iter().map(|p| p.id.as_str()).collect();

    let mut current_annotated = current.clone();
    for paper in &mut current_annotated.results {
        paper.diff = Some(if historical_ids.contains(paper.id.as_str()) {
            DiffTag::Common
        } else {
            DiffTag::Added
        });
    }

    let mut historical_annotated = historical.clone();
    for paper in &mut historical_annotated.results {
        if !current_ids.contains(paper.id.as_str()) {
            paper.diff = Some(DiffTag::Removed);
        }
    }

    tracing::debug!(
        current = current_annotated.results.len(),
        historical = historical_annotated.results.len(),
        "Reconciled result sets"
    );
    (current_annotated, historical_annotated)
}
