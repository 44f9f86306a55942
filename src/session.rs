use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use crate::export;
use crate::gateway::{Gateway, GatewayError};
use crate::import::{self, ImportError};
use crate::model::{ResultSet, SnowballDirection};
use crate::state::{Action, AppState, Notice, Operation, StateError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Rejected(#[from] StateError),
    #[error("{}", .0.render())]
    Gateway(#[from] GatewayError),
    #[error("No papers selected")]
    NothingSelected,
    #[error("No DOIs given")]
    NoDois,
    #[error("Search history is empty")]
    EmptyHistory,
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error("Failed to save export: {0}")]
    Io(#[from] std::io::Error),
}

/// One user's research session: the application state plus the backend it
/// talks to.
///
/// The state lives in a watch channel; every applied action publishes a new
/// value to subscribers. Backend calls run concurrently across operations but
/// at most one per [`Operation`] at a time. Responses are reduced into the
/// state as it is when they arrive. A failed call releases its flag, leaves
/// the state untouched and posts an error notice.
pub struct Session {
    gateway: Arc<dyn Gateway>,
    state: watch::Sender<AppState>,
    export_dir: PathBuf,
}

impl Session {
    pub fn new(gateway: Arc<dyn Gateway>, export_dir: PathBuf) -> Self {
        let (state, _) = watch::channel(AppState::default());
        Self {
            gateway,
            state,
            export_dir,
        }
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> AppState {
        self.state.borrow().clone()
    }

    /// Apply a local action. A rejected action is reported as a notice.
    pub fn dispatch(&self, action: Action) -> Result<(), SessionError> {
        self.apply(action).map_err(|e| {
            self.notify(Notice::error(e.to_string()));
            e.into()
        })
    }

    fn apply(&self, action: Action) -> Result<(), StateError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| match state.reduce(action) {
            Ok(next) => {
                *state = next;
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    fn notify(&self, notice: Notice) {
        self.state.send_modify(|state| {
            if let Ok(next) = state.reduce(Action::Notify(notice)) {
                *state = next;
            }
        });
    }

    fn release(&self, op: Operation) {
        self.state.send_modify(|state| *state = state.release(op));
    }

    /// Reduce a backend response. If the state no longer accepts it, the
    /// flag is released and the rejection reported.
    fn complete(&self, op: Operation, action: Action) -> Result<(), SessionError> {
        self.apply(action).map_err(|e| {
            tracing::warn!("Discarding {:?} response: {}", op, e);
            self.release(op);
            self.notify(Notice::error(e.to_string()));
            SessionError::from(e)
        })
    }

    fn failed(&self, op: Operation, err: GatewayError) -> SessionError {
        tracing::warn!("{:?} failed: {}", op, err);
        self.release(op);
        self.notify(Notice::error(err.render()));
        err.into()
    }

    fn selection(&self) -> Result<Vec<String>, SessionError> {
        let selected = self.state.borrow().store.selected().to_vec();
        if selected.is_empty() {
            self.notify(Notice::info("Select at least one paper first"));
            return Err(SessionError::NothingSelected);
        }
        Ok(selected)
    }

    /// Validate the form and run a search. On success the result set is
    /// replaced and the search appended to the history.
    pub async fn search(&self) -> Result<(), SessionError> {
        let form = self.state.borrow().form.clone();
        let request = form.to_request().map_err(|e| {
            self.notify(Notice::error(e.to_string()));
            SessionError::from(StateError::from(e))
        })?;
        self.dispatch(Action::Begin(Operation::Search))?;
        self.notify(Notice::info("Searching..."));

        let resp = match self.gateway.search(&request).await {
            Ok(resp) => resp,
            Err(e) => return Err(self.failed(Operation::Search, e)),
        };
        let count = resp.results.len();
        let id = resp.id.clone();
        self.complete(
            Operation::Search,
            Action::SearchCompleted {
                form,
                id,
                results: resp.into_result_set(),
            },
        )?;
        self.notify(Notice::success(format!("Found {} papers", count)));
        Ok(())
    }

    /// Show a past search. In diff mode the entry is compared against the
    /// current results instead of replacing them.
    pub async fn activate_history(&self, index: usize) -> Result<(), SessionError> {
        let lookup = {
            let state = self.state.borrow();
            let diff_mode = state.diff.enabled;
            let entry = if diff_mode {
                state.history.diff_target(index)
            } else {
                state.history.get(index)
            };
            entry.map(|e| (e.id.clone(), diff_mode))
        };
        let (id, diff_mode) = lookup.map_err(|e| {
            let e = StateError::from(e);
            self.notify(Notice::info(e.to_string()));
            SessionError::from(e)
        })?;

        self.dispatch(Action::Begin(Operation::HistoryFetch))?;
        let results: ResultSet = match self.gateway.fetch_historical(&id).await {
            Ok(results) => results,
            Err(e) => return Err(self.failed(Operation::HistoryFetch, e)),
        };
        let action = if diff_mode {
            Action::DiffLoaded { index, results }
        } else {
            Action::HistoryLoaded { index, results }
        };
        self.complete(Operation::HistoryFetch, action)
    }

    /// Move through the history by `offset` entries (clamped) and show the
    /// entry reached.
    pub async fn step_history(&self, offset: isize) -> Result<usize, SessionError> {
        let index = self
            .state
            .borrow()
            .history
            .step(offset)
            .ok_or(SessionError::EmptyHistory)?;
        self.activate_history(index).await?;
        Ok(index)
    }

    /// Fetch papers by DOI and add them to the results.
    pub async fn add_papers(&self, dois: Vec<String>) -> Result<usize, SessionError> {
        let dois: Vec<String> = dois
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if dois.is_empty() {
            self.notify(Notice::info("Enter at least one DOI"));
            return Err(SessionError::NoDois);
        }
        self.dispatch(Action::Begin(Operation::ManualAdd))?;
        self.notify(Notice::info("Adding papers..."));
        let papers = match self.gateway.add_manual(&dois).await {
            Ok(papers) => papers,
            Err(e) => return Err(self.failed(Operation::ManualAdd, e)),
        };
        let count = papers.len();
        self.complete(Operation::ManualAdd, Action::PapersAdded(papers))?;
        self.notify(Notice::success("Papers added successfully"));
        Ok(count)
    }

    /// Add the papers listed in the `DOI` column of a CSV file.
    pub async fn import_csv(&self, path: &Path) -> Result<usize, SessionError> {
        let dois = match tokio::fs::read_to_string(path).await {
            Ok(content) => import::dois_from_csv(&content).map_err(SessionError::from),
            Err(source) => Err(SessionError::Read {
                path: path.to_path_buf(),
                source,
            }),
        };
        let dois = dois.map_err(|e| {
            self.notify(Notice::error(e.to_string()));
            e
        })?;
        self.add_papers(dois).await
    }

    /// Enrich the selected papers with metadata.
    pub async fn populate_metadata(&self) -> Result<usize, SessionError> {
        let ids = self.selection()?;
        self.dispatch(Action::Begin(Operation::Metadata))?;
        let resp = match self.gateway.populate_metadata(&ids).await {
            Ok(resp) => resp,
            Err(e) => return Err(self.failed(Operation::Metadata, e)),
        };
        let count = resp.metadata.len();
        self.complete(Operation::Metadata, Action::MetadataMerged(resp.metadata))?;
        self.notify(Notice::success("Metadata populated successfully"));
        Ok(count)
    }

    /// Forward (references) or backward (citations) snowballing for the
    /// selected papers.
    pub async fn snowball(&self, direction: SnowballDirection) -> Result<usize, SessionError> {
        let ids = self.selection()?;
        self.dispatch(Action::Begin(Operation::Snowball))?;
        let entries = match self.gateway.snowball(&ids, direction).await {
            Ok(entries) => entries,
            Err(e) => return Err(self.failed(Operation::Snowball, e)),
        };
        let count = entries.len();
        self.complete(Operation::Snowball, Action::SnowballMerged { direction, entries })?;
        self.notify(Notice::info(format!("{} snowballing search completed", direction.as_str())));
        Ok(count)
    }

    /// Ask the configured LLM questions about the selected papers.
    pub async fn llm_filter(&self) -> Result<usize, SessionError> {
        let ids = self.selection()?;
        let questions = self.state.borrow().llm_questions.clone();
        self.dispatch(Action::Begin(Operation::LlmFilter))?;
        let answers = match self.gateway.llm_filter(&questions, &ids).await {
            Ok(answers) => answers,
            Err(e) => return Err(self.failed(Operation::LlmFilter, e)),
        };
        let count = answers.len();
        self.complete(Operation::LlmFilter, Action::LlmAnswersMerged(answers))?;
        Ok(count)
    }

    /// Export the selected papers and save the file into the export
    /// directory under the name the backend chose.
    pub async fn export(&self, format: export::ExportFormat) -> Result<PathBuf, SessionError> {
        let ids = self.selection()?;
        self.dispatch(Action::Begin(Operation::Export))?;
        let file = match self.gateway.export(&ids, format).await {
            Ok(file) => file,
            Err(e) => return Err(self.failed(Operation::Export, e)),
        };
        let saved = export::save(&file, &self.export_dir).await;
        self.release(Operation::Export);
        match saved {
            Ok(path) => {
                self.notify(Notice::success(format!("Exported to {}", path.display())));
                Ok(path)
            }
            Err(e) => {
                self.notify(Notice::error(format!("Failed to save export: {}", e)));
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{ExportFile, ExportFormat};
    use crate::form::{Layer, SearchRequest};
    use crate::gateway::{MetadataResponse, SearchResponse};
    use crate::model::{
        DiffTag, LlmAnswerSet, LlmQuestion, MetadataPatch, Paper, PaperMetadata, SnowballEntry,
    };
    use crate::state::NoticeLevel;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// In-memory backend: each search returns the next scripted result list
    /// and historical ids resolve to what that search returned.
    #[derive(Default)]
    struct ScriptedGateway {
        searches: Mutex<Vec<Vec<&'static str>>>,
        stored: Mutex<HashMap<String, Vec<&'static str>>>,
        next_id: AtomicUsize,
        fail_with: Mutex<Option<String>>,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
    }

    impl ScriptedGateway {
        fn with_searches(searches: Vec<Vec<&'static str>>) -> Self {
            Self {
                searches: Mutex::new(searches),
                ..Default::default()
            }
        }

        fn papers(ids: &[&str]) -> Vec<Paper> {
            ids.iter().map(|id| Paper::new(*id, format!("Title {}", id))).collect()
        }

        fn failure(&self) -> Option<GatewayError> {
            self.fail_with.lock().unwrap().clone().map(|body| GatewayError::Backend { status: 400, body })
        }
    }

    #[async_trait]
    impl Gateway for ScriptedGateway {
        async fn search(&self, _request: &SearchRequest) -> Result<SearchResponse, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(err) = self.failure() {
                return Err(err);
            }
            let ids = self.searches.lock().unwrap().remove(0);
            let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            self.stored.lock().unwrap().insert(id.clone(), ids.clone());
            Ok(SearchResponse {
                id,
                results: Self::papers(&ids),
                ..Default::default()
            })
        }

        async fn fetch_historical(&self, id: &str) -> Result<ResultSet, GatewayError> {
            if let Some(err) = self.failure() {
                return Err(err);
            }
            let ids = self.stored.lock().unwrap().get(id).cloned().unwrap_or_default();
            Ok(ResultSet {
                results: Self::papers(&ids),
                ..Default::default()
            })
        }

        async fn add_manual(&self, dois: &[String]) -> Result<Vec<Paper>, GatewayError> {
            Ok(dois.iter().map(|d| Paper::new(format!("DOI:{}", d), d.clone())).collect())
        }

        async fn populate_metadata(&self, paper_ids: &[String]) -> Result<MetadataResponse, GatewayError> {
            if let Some(err) = self.failure() {
                return Err(err);
            }
            Ok(MetadataResponse {
                metadata: paper_ids
                    .iter()
                    .map(|id| MetadataPatch {
                        paper_id: id.clone(),
                        paper_title: None,
                        metadata: PaperMetadata {
                            citation_count: Some(7),
                            ..Default::default()
                        },
                    })
                    .collect(),
                failed: Vec::new(),
            })
        }

        async fn snowball(
            &self,
            paper_ids: &[String],
            direction: SnowballDirection,
        ) -> Result<Vec<SnowballEntry>, GatewayError> {
            Ok(paper_ids
                .iter()
                .map(|id| {
                    let found = Some(vec![Paper::new(format!("{}-linked", id), "Linked")]);
                    match direction {
                        SnowballDirection::Forward => SnowballEntry {
                            paper_id: id.to_lowercase(),
                            references: found,
                            citations: None,
                        },
                        SnowballDirection::Backward => SnowballEntry {
                            paper_id: id.to_lowercase(),
                            references: None,
                            citations: found,
                        },
                    }
                })
                .collect())
        }

        async fn llm_filter(
            &self,
            questions: &[LlmQuestion],
            paper_ids: &[String],
        ) -> Result<Vec<LlmAnswerSet>, GatewayError> {
            Ok(paper_ids
                .iter()
                .map(|id| LlmAnswerSet {
                    paper_id: id.clone(),
                    response: questions
                        .iter()
                        .map(|q| LlmQuestion { answer: "yes".into(), ..q.clone() })
                        .collect(),
                })
                .collect())
        }

        async fn export(&self, paper_ids: &[String], format: ExportFormat) -> Result<ExportFile, GatewayError> {
            Ok(ExportFile {
                filename: format!("results.{}", format.extension()),
                bytes: paper_ids.join("\n").into_bytes(),
            })
        }
    }

    fn session(gateway: ScriptedGateway) -> Session {
        Session::new(Arc::new(gateway), std::env::temp_dir())
    }

    fn ready(session: &Session) {
        session
            .dispatch(Action::SetLayer {
                layer: Layer::Primary,
                terms: vec!["AI".into()],
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_validation_error_makes_no_request() {
        let gateway = Arc::new(ScriptedGateway::with_searches(vec![vec!["A"]]));
        let session = Session::new(gateway.clone(), std::env::temp_dir());
        let err = session.search().await.unwrap_err();
        assert!(err.to_string().contains("Primary search term is required"));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
        let state = session.snapshot();
        assert_eq!(state.notice.unwrap().level, NoticeLevel::Error);
        assert!(state.history.is_empty());
    }

    #[tokio::test]
    async fn test_search_notifies_subscribers() {
        let session = session(ScriptedGateway::with_searches(vec![vec!["A", "B"]]));
        let mut rx = session.subscribe();
        ready(&session);
        session.search().await.unwrap();
        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.store.papers().len(), 2);
        assert_eq!(state.history.len(), 1);
        assert!(state.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_search_is_rejected_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let gateway = ScriptedGateway {
            searches: Mutex::new(vec![vec!["A"]]),
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let session = Arc::new(session(gateway));
        ready(&session);

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.search().await }
        });
        let mut rx = session.subscribe();
        rx.wait_for(|s| s.is_in_flight(Operation::Search)).await.unwrap();

        let second = session.search().await.unwrap_err();
        assert!(matches!(
            second,
            SessionError::Rejected(StateError::AlreadyInFlight(Operation::Search))
        ));

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(session.snapshot().history.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_call_releases_flag_and_keeps_state() {
        let gateway = Arc::new(ScriptedGateway::with_searches(vec![vec!["A"]]));
        let session = Session::new(gateway.clone(), std::env::temp_dir());
        ready(&session);
        session.search().await.unwrap();
        session.dispatch(Action::SelectAll).unwrap();
        let before = session.snapshot().store;

        *gateway.fail_with.lock().unwrap() = Some(r#"{"paper_ids": ["This field is required."]}"#.into());
        let err = session.populate_metadata().await.unwrap_err();
        assert_eq!(err.to_string(), "paper_ids: This field is required.");

        let state = session.snapshot();
        assert!(!state.is_in_flight(Operation::Metadata));
        assert_eq!(state.store, before);
        assert_eq!(state.notice.unwrap().message, "paper_ids: This field is required.");
    }

    #[tokio::test]
    async fn test_failed_search_keeps_history_and_results() {
        let gateway = Arc::new(ScriptedGateway::with_searches(vec![vec!["A"], vec!["B"]]));
        let session = Session::new(gateway.clone(), std::env::temp_dir());
        ready(&session);
        session.search().await.unwrap();
        let before = session.snapshot();

        *gateway.fail_with.lock().unwrap() = Some("Internal Server Error".into());
        let err = session.search().await.unwrap_err();
        assert!(matches!(err, SessionError::Gateway(_)));

        let state = session.snapshot();
        assert_eq!(state.history, before.history);
        assert_eq!(state.store, before.store);
        assert!(!state.is_in_flight(Operation::Search));
        assert_eq!(state.notice.unwrap().message, "Internal Server Error");
    }

    #[tokio::test]
    async fn test_failed_diff_fetch_keeps_tags_and_pane() {
        let gateway = Arc::new(ScriptedGateway::with_searches(vec![vec!["B", "C"], vec!["A", "B"]]));
        let session = Session::new(gateway.clone(), std::env::temp_dir());
        ready(&session);
        session.search().await.unwrap();
        session.search().await.unwrap();
        session.dispatch(Action::SetDiffMode(true)).unwrap();
        let before = session.snapshot();

        *gateway.fail_with.lock().unwrap() = Some(r#"{"id": "Not found."}"#.into());
        let err = session.activate_history(0).await.unwrap_err();
        assert_eq!(err.to_string(), "id: Not found.");

        let state = session.snapshot();
        assert_eq!(state.store, before.store);
        assert!(state.store.papers().iter().all(|p| p.diff.is_none()));
        assert!(state.diff.pane.is_none());
        assert_eq!(state.history.current(), Some(1));
        assert!(!state.is_in_flight(Operation::HistoryFetch));
    }

    #[tokio::test]
    async fn test_import_csv_reports_every_failure() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(ScriptedGateway::default());

        let missing = dir.path().join("missing.csv");
        let err = session.import_csv(&missing).await.unwrap_err();
        assert!(matches!(err, SessionError::Read { .. }));
        let notice = session.snapshot().notice.unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.message.starts_with("Cannot read"));

        let no_column = dir.path().join("titles.csv");
        std::fs::write(&no_column, "Title\nA\n").unwrap();
        let err = session.import_csv(&no_column).await.unwrap_err();
        assert!(matches!(err, SessionError::Import(ImportError::MissingDoiColumn)));
        assert_eq!(
            session.snapshot().notice.unwrap().message,
            "No 'DOI' column found in the CSV file"
        );

        let good = dir.path().join("dois.csv");
        std::fs::write(&good, "Title,DOI\nA,10.1/a\nB,10.1/b\n").unwrap();
        assert_eq!(session.import_csv(&good).await.unwrap(), 2);
        assert_eq!(session.snapshot().store.papers().len(), 2);
    }

    #[tokio::test]
    async fn test_history_diff_flow() {
        let session = session(ScriptedGateway::with_searches(vec![vec!["B", "C"], vec!["A", "B"]]));
        ready(&session);
        session.search().await.unwrap();
        session.search().await.unwrap();

        session.dispatch(Action::SetDiffMode(true)).unwrap();
        let err = session.activate_history(1).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Rejected(StateError::History(crate::history::HistoryError::CannotDiffSelf))
        ));

        session.activate_history(0).await.unwrap();
        let state = session.snapshot();
        assert_eq!(state.history.current(), Some(1));
        let tags: Vec<_> = state.store.papers().iter().map(|p| (p.id.clone(), p.diff)).collect();
        assert_eq!(
            tags,
            vec![("A".to_string(), Some(DiffTag::Added)), ("B".to_string(), Some(DiffTag::Common))]
        );

        session.dispatch(Action::SetDiffMode(false)).unwrap();
        session.activate_history(0).await.unwrap();
        let state = session.snapshot();
        assert_eq!(state.history.current(), Some(0));
        let ids: Vec<_> = state.store.papers().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_step_history_clamps() {
        let session = session(ScriptedGateway::with_searches(vec![vec!["A"], vec!["B"]]));
        assert!(matches!(session.step_history(-1).await, Err(SessionError::EmptyHistory)));
        ready(&session);
        session.search().await.unwrap();
        session.search().await.unwrap();
        assert_eq!(session.step_history(-4).await.unwrap(), 0);
        assert_eq!(session.snapshot().store.papers()[0].id, "A");
    }

    #[tokio::test]
    async fn test_selection_driven_operations() {
        let session = session(ScriptedGateway::with_searches(vec![vec!["10.1/X", "10.1/Y"]]));
        ready(&session);
        session.search().await.unwrap();
        assert!(matches!(session.populate_metadata().await, Err(SessionError::NothingSelected)));

        session.dispatch(Action::Select(vec!["10.1/X".into()])).unwrap();
        assert_eq!(session.populate_metadata().await.unwrap(), 1);
        session.snowball(SnowballDirection::Forward).await.unwrap();
        session
            .dispatch(Action::SetLlmQuestions(vec![("Empirical?".into(), "yes,no".into())]))
            .unwrap();
        session.llm_filter().await.unwrap();

        let state = session.snapshot();
        let x = state.store.paper("10.1/X").unwrap();
        assert_eq!(x.metadata.citation_count, Some(7));
        assert!(x.show_references);
        assert_eq!(x.references.as_ref().unwrap()[0].id, "10.1/X-linked");
        assert_eq!(x.llm_responses.as_ref().unwrap()[0].answer, "yes");
        let y = state.store.paper("10.1/Y").unwrap();
        assert!(y.metadata.is_empty());
        assert!(y.references.is_none());
    }

    #[tokio::test]
    async fn test_add_papers_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(Arc::new(ScriptedGateway::default()), dir.path().to_path_buf());
        assert_eq!(session.add_papers(vec![" 10.1/a ".into(), "".into()]).await.unwrap(), 1);
        session.dispatch(Action::SelectAll).unwrap();
        let path = session.export(ExportFormat::Ris).await.unwrap();
        assert_eq!(path, dir.path().join("results.ris"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "DOI:10.1/a");
        assert!(!session.snapshot().is_in_flight(Operation::Export));
    }
}
