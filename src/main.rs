use std::sync::Arc;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters,
    model::*, tool, tool_handler, tool_router,
    transport::stdio, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

mod config;
mod diff;
mod export;
mod form;
mod gateway;
mod history;
mod import;
mod matching;
mod model;
mod session;
mod state;
mod store;

use config::Config;
use export::ExportFormat;
use form::{Layer, SearchMode};
use model::{SearchSource, SnowballDirection};
use session::{Session, SessionError};
use state::{Action, AppState, Notice, Operation};
use store::Sublist;

// ── Parameter structs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchTermsParams {
    #[schemars(description = "Keyword layer: 'primary', 'secondary' or 'tertiary'")]
    layer: Layer,
    #[schemars(description = "Terms for the layer (replaces the current terms)")]
    terms: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct BooleanExpressionParams {
    #[schemars(description = "Boolean search string, e.g. AI and \"Machine Learning\" and not Education")]
    expression: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchModeParams {
    #[schemars(description = "'simple' (keyword layers) or 'advanced' (boolean expression)")]
    mode: SearchMode,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct YearRangeParams {
    #[schemars(description = "First publication year (inclusive)")]
    start: i32,
    #[schemars(description = "Last publication year (inclusive)")]
    end: i32,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SourceParams {
    #[schemars(description = "Database: DBLP, SEMANTIC_SCHOLAR, WEB_OF_SCIENCE, IEEE_XPLORE or SCOPUS")]
    source: SearchSource,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ValidationPapersParams {
    #[schemars(description = "Comma-separated DOIs or titles the search is expected to find")]
    input: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct VariationParams {
    #[schemars(description = "Search word the suggestion belongs to")]
    keyword: String,
    #[schemars(description = "Chosen synonym or variant")]
    replacement: String,
    #[schemars(description = "Layer to append to in simple mode (default 'primary')")]
    layer: Option<Layer>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct HistoryIndexParams {
    #[schemars(description = "Index into the search history (0 = oldest)")]
    index: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct HistoryStepParams {
    #[schemars(description = "Number of entries to move; negative moves back")]
    offset: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ToggleParams {
    #[schemars(description = "Whether the mode is on")]
    enabled: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AddPapersParams {
    #[schemars(description = "DOIs of the papers to add")]
    dois: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ImportCsvParams {
    #[schemars(description = "Path to a CSV file with a 'DOI' header column")]
    path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SnowballParams {
    #[schemars(description = "'forward' (references) or 'backward' (citations)")]
    direction: SnowballDirection,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct QuestionParam {
    question: String,
    #[schemars(description = "Comma-separated categorical answers")]
    answer: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct LlmQuestionsParams {
    #[schemars(description = "Filter questions; at least one is required")]
    questions: Vec<QuestionParam>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SelectParams {
    #[schemars(description = "Paper IDs from the result list")]
    paper_ids: Vec<String>,
    #[schemars(description = "true to select, false to deselect")]
    selected: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct VisibilityParams {
    paper_id: String,
    #[schemars(description = "'references' or 'citations'")]
    which: Sublist,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PaperParams {
    #[schemars(description = "Paper ID")]
    paper_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExportParams {
    #[schemars(description = "Export format: CSV, BIBTEX or RIS")]
    format: ExportFormat,
}

// ── Responses ───────────────────────────────────────────────────────────────

/// Compact view of the session returned after every action.
#[derive(Debug, Serialize)]
struct Overview {
    revision: u64,
    mode: SearchMode,
    papers: usize,
    selected: usize,
    history_entries: usize,
    history_current: Option<usize>,
    diff_mode: bool,
    diff_against: Option<usize>,
    in_flight: Vec<Operation>,
    notice: Option<Notice>,
}

impl From<&AppState> for Overview {
    fn from(state: &AppState) -> Self {
        Self {
            revision: state.revision,
            mode: state.form.mode,
            papers: state.store.papers().len(),
            selected: state.store.selected().len(),
            history_entries: state.history.len(),
            history_current: state.history.current(),
            diff_mode: state.diff.enabled,
            diff_against: state.diff.pane.as_ref().map(|p| p.index),
            in_flight: state.in_flight.iter().copied().collect(),
            notice: state.notice.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SourceStatus {
    name: SearchSource,
    label: &'static str,
    selected: bool,
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn session_error(err: SessionError) -> McpError {
    match err {
        SessionError::Rejected(_)
        | SessionError::NothingSelected
        | SessionError::NoDois
        | SessionError::EmptyHistory
        | SessionError::Read { .. }
        | SessionError::Import(_) => McpError::invalid_params(err.to_string(), None),
        SessionError::Gateway(_) | SessionError::Io(_) => McpError::internal_error(err.to_string(), None),
    }
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ReviewServer {
    tool_router: ToolRouter<Self>,
    session: Arc<Session>,
}

#[tool_router]
impl ReviewServer {
    pub fn create() -> anyhow::Result<Self> {
        let config = Config::from_env();
        let gateway = config.build_gateway()?;

        tracing::info!(
            "Backend at {}, exports to {}",
            config.base_url,
            config.export_dir.display()
        );

        let session = Arc::new(Session::new(Arc::new(gateway), config.export_dir.clone()));
        spawn_state_logger(&session);

        Ok(Self {
            tool_router: Self::tool_router(),
            session,
        })
    }

    fn overview(&self) -> Result<CallToolResult, McpError> {
        json_result(&Overview::from(&self.session.snapshot()))
    }

    fn act(&self, action: Action) -> Result<CallToolResult, McpError> {
        self.session.dispatch(action).map_err(session_error)?;
        self.overview()
    }

    #[tool(description = "Get the full session state: search form, results, selection, history, diff view and notices")]
    async fn get_state(&self) -> Result<CallToolResult, McpError> {
        json_result(&self.session.snapshot())
    }

    #[tool(description = "List searchable databases and whether each is selected")]
    async fn list_sources(&self) -> Result<CallToolResult, McpError> {
        let state = self.session.snapshot();
        let statuses: Vec<SourceStatus> = SearchSource::ALL
            .iter()
            .map(|source| SourceStatus {
                name: *source,
                label: source.display_name(),
                selected: state.form.sources.contains(source),
            })
            .collect();
        json_result(&statuses)
    }

    #[tool(description = "Set the terms of one keyword layer (simple mode)")]
    async fn edit_search_terms(
        &self,
        Parameters(params): Parameters<SearchTermsParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::SetLayer {
            layer: params.layer,
            terms: params.terms,
        })
    }

    #[tool(description = "Set the boolean search expression (advanced mode)")]
    async fn set_boolean_expression(
        &self,
        Parameters(params): Parameters<BooleanExpressionParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::SetBooleanExpression(params.expression))
    }

    #[tool(description = "Switch between simple (keyword layers) and advanced (boolean) search")]
    async fn set_search_mode(
        &self,
        Parameters(params): Parameters<SearchModeParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::SetMode(params.mode))
    }

    #[tool(description = "Set the publication year range (inclusive)")]
    async fn set_year_range(
        &self,
        Parameters(params): Parameters<YearRangeParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::SetYearRange {
            start: params.start,
            end: params.end,
        })
    }

    #[tool(description = "Select or deselect a database to search")]
    async fn toggle_source(
        &self,
        Parameters(params): Parameters<SourceParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::ToggleSource(params.source))
    }

    #[tool(description = "Set validation papers (comma-separated DOIs or titles) used to measure search coverage")]
    async fn set_validation_papers(
        &self,
        Parameters(params): Parameters<ValidationPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::SetValidationInput(params.input))
    }

    #[tool(description = "Insert a suggested synonym or variant of a search word into the query")]
    async fn apply_variation(
        &self,
        Parameters(params): Parameters<VariationParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::ApplyVariation {
            keyword: params.keyword,
            replacement: params.replacement,
            layer: params.layer.unwrap_or(Layer::Primary),
        })
    }

    #[tool(description = "Reset all search parameters and results (history is kept)")]
    async fn reset_search(&self) -> Result<CallToolResult, McpError> {
        self.act(Action::ResetSearch)
    }

    #[tool(description = "Validate the search form and run the search. Results replace the current list and the search is added to the history.")]
    async fn search(&self) -> Result<CallToolResult, McpError> {
        self.session.search().await.map_err(session_error)?;
        let state = self.session.snapshot();
        json_result(&serde_json::json!({
            "overview": Overview::from(&state),
            "matches": state.store.result_set().matches,
            "variations": state.store.result_set().variations,
        }))
    }

    #[tool(description = "List past searches with their backend ids")]
    async fn list_history(&self) -> Result<CallToolResult, McpError> {
        let state = self.session.snapshot();
        json_result(&serde_json::json!({
            "current": state.history.current(),
            "entries": state.history.entries(),
        }))
    }

    #[tool(description = "Show a past search. In diff mode, compare it against the current results instead.")]
    async fn activate_history(
        &self,
        Parameters(params): Parameters<HistoryIndexParams>,
    ) -> Result<CallToolResult, McpError> {
        self.session.activate_history(params.index).await.map_err(session_error)?;
        self.overview()
    }

    #[tool(description = "Move backwards or forwards through the search history")]
    async fn step_history(
        &self,
        Parameters(params): Parameters<HistoryStepParams>,
    ) -> Result<CallToolResult, McpError> {
        let offset = isize::try_from(params.offset)
            .map_err(|_| McpError::invalid_params(format!("Offset out of range: {}", params.offset), None))?;
        self.session.step_history(offset).await.map_err(session_error)?;
        self.overview()
    }

    #[tool(description = "Turn diff mode on or off. Turning it off clears all diff tags.")]
    async fn set_diff_mode(
        &self,
        Parameters(params): Parameters<ToggleParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::SetDiffMode(params.enabled))
    }

    #[tool(description = "Toggle the fullscreen result layout")]
    async fn toggle_fullscreen(&self) -> Result<CallToolResult, McpError> {
        self.act(Action::ToggleFullscreen)
    }

    #[tool(description = "Add papers to the results by DOI")]
    async fn add_papers(
        &self,
        Parameters(params): Parameters<AddPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        self.session.add_papers(params.dois).await.map_err(session_error)?;
        self.overview()
    }

    #[tool(description = "Add papers from the 'DOI' column of a CSV file")]
    async fn import_csv(
        &self,
        Parameters(params): Parameters<ImportCsvParams>,
    ) -> Result<CallToolResult, McpError> {
        self.session
            .import_csv(std::path::Path::new(&params.path))
            .await
            .map_err(session_error)?;
        self.overview()
    }

    #[tool(description = "Populate metadata (abstract, authors, venue, citations...) for the selected papers")]
    async fn populate_metadata(&self) -> Result<CallToolResult, McpError> {
        self.session.populate_metadata().await.map_err(session_error)?;
        self.overview()
    }

    #[tool(description = "Snowball the selected papers: 'forward' fetches references, 'backward' fetches citing papers")]
    async fn snowball(
        &self,
        Parameters(params): Parameters<SnowballParams>,
    ) -> Result<CallToolResult, McpError> {
        self.session.snowball(params.direction).await.map_err(session_error)?;
        self.overview()
    }

    #[tool(description = "Set the LLM filter questions")]
    async fn set_llm_questions(
        &self,
        Parameters(params): Parameters<LlmQuestionsParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::SetLlmQuestions(
            params
                .questions
                .into_iter()
                .map(|q| (q.question, q.answer))
                .collect(),
        ))
    }

    #[tool(description = "Ask the LLM filter questions about the selected papers")]
    async fn llm_filter(&self) -> Result<CallToolResult, McpError> {
        self.session.llm_filter().await.map_err(session_error)?;
        self.overview()
    }

    #[tool(description = "Select or deselect papers in the result list")]
    async fn select_papers(
        &self,
        Parameters(params): Parameters<SelectParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.selected {
            self.act(Action::Select(params.paper_ids))
        } else {
            self.act(Action::Deselect(params.paper_ids))
        }
    }

    #[tool(description = "Select every paper in the result list")]
    async fn select_all(&self) -> Result<CallToolResult, McpError> {
        self.act(Action::SelectAll)
    }

    #[tool(description = "Clear the selection")]
    async fn deselect_all(&self) -> Result<CallToolResult, McpError> {
        self.act(Action::DeselectAll)
    }

    #[tool(description = "Show or hide a paper's references or citations")]
    async fn toggle_visibility(
        &self,
        Parameters(params): Parameters<VisibilityParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::ToggleVisibility {
            paper_id: params.paper_id,
            which: params.which,
        })
    }

    #[tool(description = "Move a referenced or citing paper into the main result list")]
    async fn promote_paper(
        &self,
        Parameters(params): Parameters<PaperParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::Promote {
            paper_id: params.paper_id,
        })
    }

    #[tool(description = "Turn delete mode on or off; papers can only be removed in delete mode")]
    async fn set_delete_mode(
        &self,
        Parameters(params): Parameters<ToggleParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::SetDeleteMode(params.enabled))
    }

    #[tool(description = "Remove a paper from the result list (delete mode only)")]
    async fn remove_paper(
        &self,
        Parameters(params): Parameters<PaperParams>,
    ) -> Result<CallToolResult, McpError> {
        self.act(Action::Remove {
            paper_id: params.paper_id,
        })
    }

    #[tool(description = "Show or hide paper metadata in the result view")]
    async fn toggle_metadata(&self) -> Result<CallToolResult, McpError> {
        self.act(Action::ToggleShowMetadata)
    }

    #[tool(description = "Dismiss the current notice")]
    async fn dismiss_notice(&self) -> Result<CallToolResult, McpError> {
        self.act(Action::DismissNotice)
    }

    #[tool(description = "Export the selected papers as CSV, BIBTEX or RIS and save the file")]
    async fn export(
        &self,
        Parameters(params): Parameters<ExportParams>,
    ) -> Result<CallToolResult, McpError> {
        let path = self.session.export(params.format).await.map_err(session_error)?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Exported to {}",
            path.display()
        ))]))
    }
}

#[tool_handler]
impl ServerHandler for ReviewServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Automated Review Companion: build keyword or boolean literature searches \
                 over DBLP, Semantic Scholar, Web of Science, IEEE Xplore and Scopus, refine \
                 results, snowball citations, compare past searches in diff mode, ask LLM \
                 filter questions and export selections as CSV, BibTeX or RIS."
                    .into(),
            ),
        }
    }
}

/// Log every state transition published by the session.
fn spawn_state_logger(session: &Session) {
    let mut rx = session.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let (revision, papers, in_flight) = {
                let state = rx.borrow_and_update();
                (state.revision, state.store.papers().len(), state.in_flight.len())
            };
            tracing::debug!(revision, papers, in_flight, "State updated");
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting arc-review MCP server");

    let server = ReviewServer::create()?;
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
