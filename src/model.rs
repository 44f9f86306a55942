use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Bibliographic databases the backend can query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchSource {
    Dblp,
    SemanticScholar,
    WebOfScience,
    IeeeXplore,
    Scopus,
}

impl SearchSource {
    pub const ALL: [SearchSource; 5] = [
        SearchSource::Dblp,
        SearchSource::SemanticScholar,
        SearchSource::WebOfScience,
        SearchSource::IeeeXplore,
        SearchSource::Scopus,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            SearchSource::Dblp => "DBLP",
            SearchSource::SemanticScholar => "Semantic Scholar",
            SearchSource::WebOfScience => "Web of Science",
            SearchSource::IeeeXplore => "IEEE Xplore",
            SearchSource::Scopus => "Scopus",
        }
    }
}

/// A value the backend sends either as a single string or as a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::One(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "AuthorRepr")]
pub struct Author {
    pub name: String,
    pub affiliation: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AuthorRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        affiliation: Vec<String>,
    },
}

impl From<AuthorRepr> for Author {
    fn from(repr: AuthorRepr) -> Self {
        match repr {
            AuthorRepr::Name(name) => Author { name, affiliation: Vec::new() },
            AuthorRepr::Full { name, affiliation } => Author { name, affiliation },
        }
    }
}

/// Enrichment fields filled in by the metadata endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperMetadata {
    #[serde(default, rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<Author>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conference_journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_type: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_scholar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_of_study: Option<String>,
}

impl PaperMetadata {
    /// Overwrite every field that is present in `patch`; absent fields keep
    /// their current value.
    pub fn merge_from(&mut self, patch: &PaperMetadata) {
        fn take<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
            if let Some(value) = incoming {
                *slot = Some(value.clone());
            }
        }
        take(&mut self.abstract_text, &patch.abstract_text);
        take(&mut self.authors, &patch.authors);
        take(&mut self.citation_count, &patch.citation_count);
        take(&mut self.conference_journal, &patch.conference_journal);
        take(&mut self.doi, &patch.doi);
        take(&mut self.doi_url, &patch.doi_url);
        take(&mut self.keywords, &patch.keywords);
        take(&mut self.publication_date, &patch.publication_date);
        take(&mut self.publication_type, &patch.publication_type);
        take(&mut self.publisher, &patch.publisher);
        take(&mut self.semantic_scholar_url, &patch.semantic_scholar_url);
        take(&mut self.field_of_study, &patch.field_of_study);
    }

    pub fn is_empty(&self) -> bool {
        *self == PaperMetadata::default()
    }
}

/// Diff classification of a paper while diff mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffTag {
    Added,
    Removed,
    Common,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LlmQuestion {
    pub id: u32,
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

/// One publication as the backend returns it, plus the client-side flags
/// the result table needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    #[serde(rename = "paper_id")]
    pub id: String,
    #[serde(rename = "paper_title", default)]
    pub title: String,
    #[serde(default)]
    pub searched_from: String,
    #[serde(default)]
    pub search_string: OneOrMany,
    #[serde(default)]
    pub formatted_search_string: String,
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub metadata: PaperMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<Paper>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Paper>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_responses: Option<Vec<LlmQuestion>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffTag>,
    #[serde(default)]
    pub show_references: bool,
    #[serde(default)]
    pub show_citations: bool,
}

impl Paper {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }
}

/// A `{doi, title}` pair: what the client sends as a validation paper and
/// what the backend reports back as matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPaper {
    #[serde(default)]
    pub doi: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMatch {
    #[serde(default)]
    pub num_matches: u32,
    #[serde(default)]
    pub percentage_match: f64,
    #[serde(default)]
    pub papers: Vec<ValidationPaper>,
}

/// Spelling variants and synonyms the backend suggests for a search word.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordVariation {
    pub word: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    #[serde(default)]
    pub matches: ValidationMatch,
    #[serde(default)]
    pub results: Vec<Paper>,
    #[serde(default)]
    pub variations: Vec<KeywordVariation>,
}

impl ResultSet {
    pub fn contains(&self, paper_id: &str) -> bool {
        self.results.iter().any(|p| p.id == paper_id)
    }
}

/// Snowballing direction. Forward collects the papers a paper cites
/// (references), backward collects the papers citing it (citations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SnowballDirection {
    Forward,
    Backward,
}

impl SnowballDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnowballDirection::Forward => "forward",
            SnowballDirection::Backward => "backward",
        }
    }
}

/// Metadata for one paper as returned by the enrichment endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub paper_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_title: Option<String>,
    #[serde(flatten)]
    pub metadata: PaperMetadata,
}

/// Snowballing result for one paper. Only the list matching the requested
/// direction is expected to be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnowballEntry {
    pub paper_id: String,
    #[serde(default)]
    pub references: Option<Vec<Paper>>,
    #[serde(default)]
    pub citations: Option<Vec<Paper>>,
}

/// LLM filter answers for one paper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmAnswerSet {
    pub paper_id: String,
    #[serde(default)]
    pub response: Vec<LlmQuestion>,
}
