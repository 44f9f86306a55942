//! The single application-state aggregate and its reducer.
//!
//! Every user action and every backend response is one [`Action`]; applying
//! it with [`AppState::reduce`] yields the next state value or a rejection
//! that leaves the state untouched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diff;
use crate::form::{FormError, Layer, SearchForm, SearchMode};
use crate::history::{HistoryError, SearchHistory};
use crate::model::{
    LlmAnswerSet, LlmQuestion, MetadataPatch, Paper, ResultSet, SearchSource, SnowballDirection,
    SnowballEntry,
};
use crate::store::{ResultStore, StoreError, Sublist};

/// Backend operations guarded by an in-flight flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Search,
    HistoryFetch,
    ManualAdd,
    Metadata,
    Snowball,
    LlmFilter,
    Export,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0:?} is already in progress")]
    AlreadyInFlight(Operation),
    #[error("Diff mode is not enabled")]
    DiffModeDisabled,
    #[error("Delete mode is not enabled")]
    DeleteModeDisabled,
    #[error("At least one question is required")]
    NoLlmQuestions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A transient message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }
}

/// Layout variant driven by state rather than by touching the view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub fullscreen: bool,
    /// Two-pane layout while diff mode is on.
    pub split_view: bool,
}

/// Historical result set shown next to the current one in diff mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffPane {
    pub index: usize,
    pub results: ResultSet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffState {
    pub enabled: bool,
    pub pane: Option<DiffPane>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    /// Incremented on every applied action.
    pub revision: u64,
    pub form: SearchForm,
    pub store: ResultStore,
    pub history: SearchHistory,
    pub diff: DiffState,
    pub llm_questions: Vec<LlmQuestion>,
    pub in_flight: BTreeSet<Operation>,
    pub layout: Layout,
    pub show_metadata: bool,
    pub delete_mode: bool,
    pub notice: Option<Notice>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            revision: 0,
            form: SearchForm::default(),
            store: ResultStore::default(),
            history: SearchHistory::default(),
            diff: DiffState::default(),
            llm_questions: default_questions(),
            in_flight: BTreeSet::new(),
            layout: Layout::default(),
            show_metadata: false,
            delete_mode: false,
            notice: None,
        }
    }
}

fn default_questions() -> Vec<LlmQuestion> {
    vec![LlmQuestion {
        id: 1,
        question: String::new(),
        answer: String::new(),
    }]
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // Search form
    SetLayer { layer: Layer, terms: Vec<String> },
    SetBooleanExpression(String),
    SetMode(SearchMode),
    SetYearRange { start: i32, end: i32 },
    ToggleSource(SearchSource),
    SetValidationInput(String),
    ApplyVariation { keyword: String, replacement: String, layer: Layer },
    ResetSearch,

    // In-flight bookkeeping
    Begin(Operation),
    Finish(Operation),

    // Backend responses
    SearchCompleted { form: SearchForm, id: String, results: ResultSet },
    HistoryLoaded { index: usize, results: ResultSet },
    DiffLoaded { index: usize, results: ResultSet },
    PapersAdded(Vec<Paper>),
    MetadataMerged(Vec<MetadataPatch>),
    SnowballMerged { direction: SnowballDirection, entries: Vec<SnowballEntry> },
    LlmAnswersMerged(Vec<LlmAnswerSet>),

    // Result table
    Select(Vec<String>),
    Deselect(Vec<String>),
    SelectAll,
    DeselectAll,
    ToggleVisibility { paper_id: String, which: Sublist },
    Promote { paper_id: String },
    Remove { paper_id: String },
    SetDeleteMode(bool),
    ToggleShowMetadata,

    // Views
    SetDiffMode(bool),
    ToggleFullscreen,
    SetLlmQuestions(Vec<(String, String)>),

    Notify(Notice),
    DismissNotice,
}

impl AppState {
    pub fn is_in_flight(&self, op: Operation) -> bool {
        self.in_flight.contains(&op)
    }

    /// Drop the in-flight flag of `op`. Never rejected.
    pub fn release(&self, op: Operation) -> AppState {
        let mut next = self.clone();
        next.in_flight.remove(&op);
        next.revision = self.revision + 1;
        next
    }

    /// Apply one action. On error the current state is left as it is.
    pub fn reduce(&self, action: Action) -> Result<AppState, StateError> {
        let mut next = self.clone();
        match action {
            Action::SetLayer { layer, terms } => next.form.set_layer(layer, terms),
            Action::SetBooleanExpression(expression) => next.form.set_boolean_expression(expression),
            Action::SetMode(mode) => next.form.mode = mode,
            Action::SetYearRange { start, end } => next.form.set_year_range(start, end)?,
            Action::ToggleSource(source) => next.form.toggle_source(source),
            Action::SetValidationInput(raw) => next.form.set_validation_input(&raw),
            Action::ApplyVariation { keyword, replacement, layer } => {
                next.form.insert_variation(&keyword, &replacement, layer)?;
            }
            Action::ResetSearch => {
                next.form = SearchForm::default();
                next.store = ResultStore::default();
                next.llm_questions = default_questions();
                next.diff.pane = None;
            }

            Action::Begin(op) => {
                if !next.in_flight.insert(op) {
                    return Err(StateError::AlreadyInFlight(op));
                }
            }
            Action::Finish(op) => return Ok(self.release(op)),

            Action::SearchCompleted { form, id, results } => {
                next.in_flight.remove(&Operation::Search);
                next.store.replace(results);
                next.history.append(form, id);
                next.diff.pane = None;
            }
            Action::HistoryLoaded { index, results } => {
                next.in_flight.remove(&Operation::HistoryFetch);
                next.history.set_current(index)?;
                next.store.replace(results);
                next.diff.pane = None;
            }
            Action::DiffLoaded { index, results } => {
                if !next.diff.enabled {
                    return Err(StateError::DiffModeDisabled);
                }
                next.history.diff_target(index)?;
                next.in_flight.remove(&Operation::HistoryFetch);
                let (current, historical) = diff::reconcile(next.store.result_set(), &results);
                next.store.replace(current);
                next.diff.pane = Some(DiffPane { index, results: historical });
            }
            Action::PapersAdded(papers) => {
                next.in_flight.remove(&Operation::ManualAdd);
                next.store.add_manual(papers);
            }
            Action::MetadataMerged(patches) => {
                next.in_flight.remove(&Operation::Metadata);
                next.store.merge_metadata(&patches);
            }
            Action::SnowballMerged { direction, entries } => {
                next.in_flight.remove(&Operation::Snowball);
                next.store.merge_snowball(direction, entries);
            }
            Action::LlmAnswersMerged(answers) => {
                next.in_flight.remove(&Operation::LlmFilter);
                next.store.merge_llm_answers(answers);
            }

            Action::Select(ids) => {
                for id in &ids {
                    next.store.select(id)?;
                }
            }
            Action::Deselect(ids) => {
                for id in &ids {
                    next.store.deselect(id);
                }
            }
            Action::SelectAll => next.store.select_all(),
            Action::DeselectAll => next.store.deselect_all(),
            Action::ToggleVisibility { paper_id, which } => next.store.toggle_visibility(&paper_id, which)?,
            Action::Promote { paper_id } => match next.store.find_nested(&paper_id).cloned() {
                Some(paper) => next.store.promote(paper),
                None if next.store.paper(&paper_id).is_some() => {}
                None => return Err(StoreError::UnknownPaper(paper_id).into()),
            },
            Action::Remove { paper_id } => {
                if !next.delete_mode {
                    return Err(StateError::DeleteModeDisabled);
                }
                next.store.remove(&paper_id)?;
            }
            Action::SetDeleteMode(enabled) => next.delete_mode = enabled,
            Action::ToggleShowMetadata => next.show_metadata = !next.show_metadata,

            Action::SetDiffMode(enabled) => {
                if !enabled {
                    next.store.clear_diff();
                    next.diff.pane = None;
                }
                next.diff.enabled = enabled;
                next.layout.split_view = enabled;
            }
            Action::ToggleFullscreen => next.layout.fullscreen = !next.layout.fullscreen,
            Action::SetLlmQuestions(questions) => {
                if questions.is_empty() {
                    return Err(StateError::NoLlmQuestions);
                }
                next.llm_questions = questions
                    .into_iter()
                    .zip(1..)
                    .map(|((question, answer), id)| LlmQuestion { id, question, answer })
                    .collect();
            }

            Action::Notify(notice) => next.notice = Some(notice),
            Action::DismissNotice => next.notice = None,
        }
        next.revision = self.revision + 1;
        Ok(next)
    }
}
