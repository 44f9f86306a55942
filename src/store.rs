use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matching::MatchStrategy;
use crate::model::{
    LlmAnswerSet, MetadataPatch, Paper, ResultSet, SnowballDirection, SnowballEntry,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Paper not in the result list: {0}")]
    UnknownPaper(String),
}

/// Which nested list of a paper to show or hide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sublist {
    References,
    Citations,
}

/// The current result set together with the selection.
///
/// Top-level identifiers are unique and the selection only ever holds
/// identifiers that are present in the top-level list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultStore {
    results: ResultSet,
    selected: Vec<String>,
}

impl ResultStore {
    pub fn result_set(&self) -> &ResultSet {
        &self.results
    }

    pub fn papers(&self) -> &[Paper] {
        &self.results.results
    }

    pub fn paper(&self, paper_id: &str) -> Option<&Paper> {
        self.results.results.iter().find(|p| p.id == paper_id)
    }

    /// Selected identifiers in selection order.
    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn is_selected(&self, paper_id: &str) -> bool {
        self.selected.iter().any(|id| id == paper_id)
    }

    /// Overwrite the result set. Duplicate identifiers keep their first
    /// occurrence and the selection is pruned to what is still listed.
    pub fn replace(&mut self, mut results: ResultSet) {
        let mut seen = std::collections::HashSet::new();
        results.results.retain(|p| seen.insert(p.id.clone()));
        self.results = results;
        self.prune_selection();
    }

    /// Apply metadata to papers with an exactly matching identifier.
    /// Returns the number of papers updated.
    pub fn merge_metadata(&mut self, patches: &[MetadataPatch]) -> usize {
        let mut applied = 0;
        for paper in &mut self.results.results {
            let mut touched = false;
            for patch in patches.iter().filter(|m| MatchStrategy::Exact.matches(&paper.id, &m.paper_id)) {
                paper.metadata.merge_from(&patch.metadata);
                if let Some(title) = patch.paper_title.as_ref().filter(|t| !t.is_empty()) {
                    paper.title = title.clone();
                }
                touched = true;
            }
            if touched {
                applied += 1;
            }
        }
        applied
    }

    /// Attach snowballing results. Forward attaches references and shows
    /// them, backward attaches citations and shows them. Each entry goes to
    /// the first paper whose identifier matches leniently.
    pub fn merge_snowball(&mut self, direction: SnowballDirection, entries: Vec<SnowballEntry>) -> usize {
        let mut applied = 0;
        for entry in entries {
            let Some(paper) = self
                .results
                .results
                .iter_mut()
                .find(|p| MatchStrategy::DoiContains.matches(&p.id, &entry.paper_id))
            else {
                tracing::debug!(paper_id = %entry.paper_id, "Snowball entry matched no paper");
                continue;
            };
            match direction {
                SnowballDirection::Forward => {
                    paper.references = Some(entry.references.unwrap_or_default());
                    paper.show_references = true;
                }
                SnowballDirection::Backward => {
                    paper.citations = Some(entry.citations.unwrap_or_default());
                    paper.show_citations = true;
                }
            }
            applied += 1;
        }
        applied
    }

    /// Replace LLM answers with the latest response. Papers with an exactly
    /// matching identifier get their answers; every other top-level paper
    /// loses answers given to an earlier question set.
    pub fn merge_llm_answers(&mut self, answers: Vec<LlmAnswerSet>) -> usize {
        let mut applied = 0;
        for paper in &mut self.results.results {
            let answer = answers
                .iter()
                .find(|a| MatchStrategy::Exact.matches(&paper.id, &a.paper_id));
            paper.llm_responses = answer.map(|a| a.response.clone());
            if answer.is_some() {
                applied += 1;
            }
        }
        applied
    }

    /// Append manually added papers, replacing top-level entries that carry
    /// the same identifiers.
    pub fn add_manual(&mut self, papers: Vec<Paper>) {
        self.results
            .results
            .retain(|existing| !papers.iter().any(|p| p.id == existing.id));
        for paper in papers {
            if !self.results.contains(&paper.id) {
                self.results.results.push(paper);
            }
        }
        self.prune_selection();
    }

    pub fn toggle_visibility(&mut self, paper_id: &str, which: Sublist) -> Result<(), StoreError> {
        let paper = self.paper_mut(paper_id)?;
        match which {
            Sublist::References => paper.show_references = !paper.show_references,
            Sublist::Citations => paper.show_citations = !paper.show_citations,
        }
        Ok(())
    }

    /// First nested reference or citation carrying `paper_id`.
    pub fn find_nested(&self, paper_id: &str) -> Option<&Paper> {
        self.results.results.iter().find_map(|p| {
            p.references
                .iter()
                .chain(p.citations.iter())
                .flatten()
                .find(|nested| nested.id == paper_id)
        })
    }

    /// Pull a referenced or citing paper into the main list: it is removed
    /// from every reference/citation list and appended top-level unless a
    /// top-level paper already carries its identifier.
    pub fn promote(&mut self, paper: Paper) {
        for top in &mut self.results.results {
            for list in [&mut top.references, &mut top.citations].into_iter().flatten() {
                list.retain(|nested| nested.id != paper.id);
            }
        }
        if !self.results.contains(&paper.id) {
            self.results.results.push(Paper {
                show_references: false,
                show_citations: false,
                ..paper
            });
        }
    }

    pub fn remove(&mut self, paper_id: &str) -> Result<Paper, StoreError> {
        let pos = self
            .results
            .results
            .iter()
            .position(|p| p.id == paper_id)
            .ok_or_else(|| StoreError::UnknownPaper(paper_id.to_string()))?;
        self.selected.retain(|id| id != paper_id);
        Ok(self.results.results.remove(pos))
    }

    pub fn select(&mut self, paper_id: &str) -> Result<(), StoreError> {
        if !self.results.contains(paper_id) {
            return Err(StoreError::UnknownPaper(paper_id.to_string()));
        }
        if !self.is_selected(paper_id) {
            self.selected.push(paper_id.to_string());
        }
        Ok(())
    }

    pub fn deselect(&mut self, paper_id: &str) {
        self.selected.retain(|id| id != paper_id);
    }

    pub fn select_all(&mut self) {
        self.selected = self.results.results.iter().map(|p| p.id.clone()).collect();
    }

    pub fn deselect_all(&mut self) {
        self.selected.clear();
    }

    /// Drop every diff tag on the top-level list.
    pub fn clear_diff(&mut self) {
        for paper in &mut self.results.results {
            paper.diff = None;
        }
    }

    fn paper_mut(&mut self, paper_id: &str) -> Result<&mut Paper, StoreError> {
        self.results
            .results
            .iter_mut()
            .find(|p| p.id == paper_id)
            .ok_or_else(|| StoreError::UnknownPaper(paper_id.to_string()))
    }

    fn prune_selection(&mut self) {
        let results = &self.results;
        self.selected.retain(|id| results.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiffTag, PaperMetadata};

    fn store(ids: &[&str]) -> ResultStore {
        let mut store = ResultStore::default();
        store.replace(ResultSet {
            results: ids.iter().map(|id| Paper::new(*id, format!("Title {}", id))).collect(),
            ..Default::default()
        });
        store
    }

    fn ids(store: &ResultStore) -> Vec<&str> {
        store.papers().iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_merge_metadata_touches_only_matching_ids() {
        let mut store = store(&["A", "B"]);
        let before_b = store.paper("B").cloned();
        let applied = store.merge_metadata(&[MetadataPatch {
            paper_id: "A".into(),
            paper_title: None,
            metadata: PaperMetadata {
                abstract_text: Some("abstract".into()),
                ..Default::default()
            },
        }]);
        assert_eq!(applied, 1);
        assert_eq!(ids(&store), vec!["A", "B"]);
        assert_eq!(store.paper("A").unwrap().metadata.abstract_text.as_deref(), Some("abstract"));
        assert_eq!(store.paper("B").cloned(), before_b);
    }

    #[test]
    fn test_forward_snowball_matches_leniently() {
        let mut store = store(&["10.1/X"]);
        let applied = store.merge_snowball(
            SnowballDirection::Forward,
            vec![SnowballEntry {
                paper_id: "10.1/x-v2".into(),
                references: Some(vec![Paper::new("10.1/x", "Cited")]),
                citations: None,
            }],
        );
        assert_eq!(applied, 1);
        let paper = store.paper("10.1/X").unwrap();
        assert!(paper.show_references);
        assert!(!paper.show_citations);
        assert_eq!(paper.references.as_ref().unwrap()[0].id, "10.1/x");
    }

    #[test]
    fn test_backward_snowball_sets_citations() {
        let mut store = store(&["DOI:10.5/ABC", "DOI:10.5/DEF"]);
        store.merge_snowball(
            SnowballDirection::Backward,
            vec![SnowballEntry {
                paper_id: "10.5/def".into(),
                references: None,
                citations: Some(vec![Paper::new("C1", "Citing")]),
            }],
        );
        assert!(store.paper("DOI:10.5/ABC").unwrap().citations.is_none());
        let def = store.paper("DOI:10.5/DEF").unwrap();
        assert!(def.show_citations);
        assert_eq!(def.citations.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_promote_moves_nested_paper_and_is_idempotent() {
        let mut store = store(&["A", "B"]);
        store.merge_snowball(
            SnowballDirection::Forward,
            vec![
                SnowballEntry {
                    paper_id: "A".into(),
                    references: Some(vec![Paper::new("R", "Reference")]),
                    citations: None,
                },
            ],
        );
        let nested = store.find_nested("R").cloned().unwrap();
        store.promote(nested.clone());
        assert!(store.paper("A").unwrap().references.as_ref().unwrap().is_empty());
        assert_eq!(ids(&store), vec!["A", "B", "R"]);

        store.promote(nested);
        assert_eq!(ids(&store), vec!["A", "B", "R"]);
    }

    #[test]
    fn test_selection_stays_within_results() {
        let mut store = store(&["A", "B", "C"]);
        store.select("A").unwrap();
        store.select("C").unwrap();
        assert_eq!(store.select("Z"), Err(StoreError::UnknownPaper("Z".into())));

        store.remove("C").unwrap();
        assert_eq!(store.selected(), &["A".to_string()]);

        store.replace(ResultSet {
            results: vec![Paper::new("B", "B")],
            ..Default::default()
        });
        assert!(store.selected().is_empty());
    }

    #[test]
    fn test_select_all_and_deselect_all() {
        let mut store = store(&["A", "B"]);
        store.select_all();
        assert_eq!(store.selected().len(), 2);
        store.deselect("A");
        assert_eq!(store.selected(), &["B".to_string()]);
        store.deselect_all();
        assert!(store.selected().is_empty());
    }

    #[test]
    fn test_toggle_visibility() {
        let mut store = store(&["A"]);
        store.toggle_visibility("A", Sublist::Citations).unwrap();
        assert!(store.paper("A").unwrap().show_citations);
        store.toggle_visibility("A", Sublist::Citations).unwrap();
        assert!(!store.paper("A").unwrap().show_citations);
        assert!(store.toggle_visibility("Q", Sublist::References).is_err());
    }

    #[test]
    fn test_add_manual_replaces_existing_entries() {
        let mut store = store(&["A", "B"]);
        store.add_manual(vec![Paper::new("A", "Fresh A"), Paper::new("D", "D")]);
        assert_eq!(ids(&store), vec!["B", "A", "D"]);
        assert_eq!(store.paper("A").unwrap().title, "Fresh A");
    }

    #[test]
    fn test_llm_answers_from_an_earlier_filter_are_cleared() {
        let mut store = store(&["A", "B"]);
        let answers = |id: &str, question: &str| LlmAnswerSet {
            paper_id: id.into(),
            response: vec![crate::model::LlmQuestion {
                id: 1,
                question: question.into(),
                answer: "yes".into(),
            }],
        };
        store.merge_llm_answers(vec![answers("A", "Q1")]);
        assert_eq!(store.merge_llm_answers(vec![answers("B", "Q2")]), 1);
        assert!(store.paper("A").unwrap().llm_responses.is_none());
        assert_eq!(store.paper("B").unwrap().llm_responses.as_ref().unwrap()[0].question, "Q2");
    }

    #[test]
    fn test_merge_llm_answers_and_clear_diff() {
        let mut store = store(&["A", "B"]);
        store.merge_llm_answers(vec![LlmAnswerSet {
            paper_id: "B".into(),
            response: vec![crate::model::LlmQuestion {
                id: 1,
                question: "Is it empirical?".into(),
                answer: "yes".into(),
            }],
        }]);
        assert!(store.paper("A").unwrap().llm_responses.is_none());
        assert_eq!(store.paper("B").unwrap().llm_responses.as_ref().unwrap()[0].answer, "yes");

        let mut tagged = store.result_set().clone();
        tagged.results[0].diff = Some(DiffTag::Added);
        store.replace(tagged);
        store.clear_diff();
        assert!(store.papers().iter().all(|p| p.diff.is_none()));
    }
}
