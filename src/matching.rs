/// How two paper identifiers are compared.
///
/// Diff reconciliation and metadata/LLM merges compare identifiers exactly.
/// Snowballing responses are matched leniently: databases hand back DOIs
/// with extra prefixes, suffixes or different casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Byte-for-byte identifier equality.
    Exact,
    /// Case-insensitive containment in either direction (`10.1/X` matches
    /// `DOI:10.1/x` and `10.1/x-v2`). Empty identifiers never match.
    DoiContains,
}

impl MatchStrategy {
    pub fn matches(self, local: &str, remote: &str) -> bool {
        match self {
            MatchStrategy::Exact => local == remote,
            MatchStrategy::DoiContains => doi_contains(local, remote),
        }
    }
}

fn doi_contains(local: &str, remote: &str) -> bool {
    let local = local.trim().to_lowercase();
    let remote = remote.trim().to_lowercase();
    if local.is_empty() || remote.is_empty() {
        return false;
    }
    local.contains(&remote) || remote.contains(&local)
}
