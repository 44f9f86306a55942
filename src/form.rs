use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{SearchSource, ValidationPaper};

static DOI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)10\.\d{4,9}/[-._;()/:A-Z0-9]+").expect("Invalid DOI regex")
});

pub const DEFAULT_YEAR_START: i32 = 2023;
pub const DEFAULT_YEAR_END: i32 = 2024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("Primary search term is required")]
    MissingPrimaryTerm,
    #[error("At least one database must be selected")]
    NoSourceSelected,
    #[error("Invalid year range: {start} is after {end}")]
    InvalidYearRange { start: i32, end: i32 },
    #[error("Keyword not found in boolean expression: {0}")]
    KeywordNotInExpression(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Three keyword layers combined by the backend.
    #[default]
    Simple,
    /// A single boolean expression.
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Primary,
    Secondary,
    Tertiary,
}

/// Search terms in the shape the backend expects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTerms {
    pub advanced: String,
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
    pub tertiary: Vec<String>,
}

impl SearchTerms {
    fn layer_mut(&mut self, layer: Layer) -> &mut Vec<String> {
        match layer {
            Layer::Primary => &mut self.primary,
            Layer::Secondary => &mut self.secondary,
            Layer::Tertiary => &mut self.tertiary,
        }
    }
}

/// The query specification being edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchForm {
    pub mode: SearchMode,
    pub terms: SearchTerms,
    pub year_start: i32,
    pub year_end: i32,
    pub sources: Vec<SearchSource>,
    /// Raw validation tokens (DOIs or titles) as typed by the user.
    pub validation_papers: Vec<String>,
}

impl Default for SearchForm {
    fn default() -> Self {
        Self {
            mode: SearchMode::Simple,
            terms: SearchTerms::default(),
            year_start: DEFAULT_YEAR_START,
            year_end: DEFAULT_YEAR_END,
            sources: vec![SearchSource::Dblp],
            validation_papers: Vec::new(),
        }
    }
}

/// Normalised search payload, built from a validated form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub validation_papers: Vec<ValidationPaper>,
    pub search_terms: SearchTerms,
    pub year_start: i32,
    pub year_end: i32,
    pub sources: Vec<SearchSource>,
}

impl SearchForm {
    /// Replace a keyword layer. Terms are trimmed, blanks dropped and
    /// duplicates removed, keeping first-seen order.
    pub fn set_layer(&mut self, layer: Layer, terms: Vec<String>) {
        let slot = self.terms.layer_mut(layer);
        slot.clear();
        for term in terms {
            let term = term.trim();
            if !term.is_empty() && !slot.iter().any(|t| t == term) {
                slot.push(term.to_string());
            }
        }
    }

    pub fn set_boolean_expression(&mut self, expression: impl Into<String>) {
        self.terms.advanced = expression.into();
    }

    pub fn set_year_range(&mut self, start: i32, end: i32) -> Result<(), FormError> {
        if start > end {
            return Err(FormError::InvalidYearRange { start, end });
        }
        self.year_start = start;
        self.year_end = end;
        Ok(())
    }

    pub fn toggle_source(&mut self, source: SearchSource) {
        if let Some(pos) = self.sources.iter().position(|s| *s == source) {
            self.sources.remove(pos);
        } else {
            self.sources.push(source);
        }
    }

    /// Set the validation papers from the comma-separated input field.
    pub fn set_validation_input(&mut self, raw: &str) {
        self.validation_papers = raw.split(',').map(|s| s.trim().to_string()).collect();
    }

    pub fn validate(&self) -> Result<(), FormError> {
        if self.mode == SearchMode::Simple && self.terms.primary.iter().all(|t| t.trim().is_empty()) {
            return Err(FormError::MissingPrimaryTerm);
        }
        if self.sources.is_empty() {
            return Err(FormError::NoSourceSelected);
        }
        Ok(())
    }

    /// Validate and build the payload sent to the backend. Only the terms of
    /// the active mode are kept.
    pub fn to_request(&self) -> Result<SearchRequest, FormError> {
        self.validate()?;
        let search_terms = match self.mode {
            SearchMode::Simple => SearchTerms {
                advanced: String::new(),
                ..self.terms.clone()
            },
            SearchMode::Advanced => SearchTerms {
                advanced: self.terms.advanced.clone(),
                ..SearchTerms::default()
            },
        };
        Ok(SearchRequest {
            validation_papers: classify_validation_papers(&self.validation_papers),
            search_terms,
            year_start: self.year_start,
            year_end: self.year_end,
            sources: self.sources.clone(),
        })
    }

    /// Insert a suggested synonym or variant into the query.
    ///
    /// In simple mode the replacement is appended to `layer`. In advanced
    /// mode the first occurrence of `keyword` in the expression becomes
    /// `(keyword or replacement)`, with multi-word phrases quoted.
    pub fn insert_variation(&mut self, keyword: &str, replacement: &str, layer: Layer) -> Result<(), FormError> {
        match self.mode {
            SearchMode::Simple => {
                let slot = self.terms.layer_mut(layer);
                if !slot.iter().any(|t| t == replacement) {
                    slot.push(replacement.to_string());
                }
                Ok(())
            }
            SearchMode::Advanced => {
                let keyword = quote_phrase(keyword);
                let replacement = quote_phrase(replacement);
                if !self.terms.advanced.contains(&keyword) {
                    return Err(FormError::KeywordNotInExpression(keyword));
                }
                let alternative = format!("({} or {})", keyword, replacement);
                self.terms.advanced = self.terms.advanced.replacen(&keyword, &alternative, 1);
                Ok(())
            }
        }
    }
}

fn quote_phrase(phrase: &str) -> String {
    if phrase.split(' ').count() > 1 {
        format!("\"{}\"", phrase)
    } else {
        phrase.to_string()
    }
}

/// Classify validation tokens: a token containing a DOI is sent as that DOI,
/// anything else as a title. Blank tokens are dropped.
pub fn classify_validation_papers(tokens: &[String]) -> Vec<ValidationPaper> {
    tokens
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|token| match DOI_PATTERN.find(token) {
            Some(doi) => ValidationPaper {
                doi: doi.as_str().to_string(),
                title: String::new(),
            },
            None => ValidationPaper {
                doi: String::new(),
                title: token.to_string(),
            },
        })
        .collect()
}
