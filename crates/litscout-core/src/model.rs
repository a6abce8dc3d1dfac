//! Records passed between the research, analysis and writing stages.

use std::collections::BTreeSet;
use std::fmt;

use reqwest::Url;
use serde::{Deserialize, Serialize};

/// A discovered bibliographic or web document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    /// `None` when the provider reported no citation count.
    #[serde(default)]
    pub citation_count: Option<u64>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Tools that returned this document, first-seen first.
    #[serde(default)]
    pub provenance: Vec<String>,
}

impl Source {
    pub fn new(title: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            provenance: vec![provider.into()],
            ..Self::default()
        }
    }

    /// Stable identifier: the normalized DOI, else the normalized URL, else the title.
    pub fn id(&self) -> String {
        if let Some(doi) = self.doi.as_deref().and_then(normalize_doi) {
            return format!("doi:{doi}");
        }
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return format!("url:{}", normalize_url(url));
        }
        let title = self
            .title
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        format!("title:{title}")
    }

    /// Link suitable for a reference list.
    pub fn link(&self) -> Option<String> {
        if let Some(doi) = self.doi.as_deref().and_then(normalize_doi) {
            return Some(format!("https://doi.org/{doi}"));
        }
        self.url.clone()
    }

    /// Whether the source clears a minimum citation count.
    pub fn meets_citations(&self, minimum: u64, allow_missing: bool) -> bool {
        match self.citation_count {
            Some(count) => count >= minimum,
            None => allow_missing,
        }
    }

    /// Combine two records of the same document.
    ///
    /// `self` is the first-seen copy: its fields win unless empty, the higher
    /// citation count is kept and provenance lists both providers.
    pub fn merged_with(&self, later: &Source) -> Source {
        let mut merged = self.clone();
        merged.citation_count = match (self.citation_count, later.citation_count) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if merged.year.is_none() {
            merged.year = later.year;
        }
        if merged.authors.is_empty() {
            merged.authors = later.authors.clone();
        }
        if merged.abstract_text.trim().is_empty() {
            merged.abstract_text = later.abstract_text.clone();
        }
        if merged.venue.is_none() {
            merged.venue = later.venue.clone();
        }
        if merged.doi.is_none() {
            merged.doi = later.doi.clone();
        }
        if merged.url.is_none() {
            merged.url = later.url.clone();
        }
        for provider in &later.provenance {
            if !merged.provenance.contains(provider) {
                merged.provenance.push(provider.clone());
            }
        }
        merged
    }
}

/// Normalize a DOI to its bare lowercase form (`10.x/...`).
pub fn normalize_doi(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let bare = [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
    ]
    .iter()
    .find_map(|prefix| lowered.strip_prefix(prefix))
    .unwrap_or(&lowered)
    .trim();
    (!bare.is_empty()).then(|| bare.to_string())
}

/// Normalize a URL for deduplication: no scheme, no `www.`, no fragment, no trailing slash.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            let host = host.strip_prefix("www.").unwrap_or(host);
            let path = url.path().trim_end_matches('/');
            match url.query() {
                Some(query) => format!("{host}{path}?{query}"),
                None => format!("{host}{path}"),
            }
        }
        Err(_) => raw.trim().trim_end_matches('/').to_lowercase(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Draft,
    Verified,
    Rejected,
}

/// A single assertion intended for the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: String,
    pub text: String,
    /// Identifiers (see [`Source::id`]) of the sources backing this claim.
    pub supporting: BTreeSet<String>,
    pub status: ClaimStatus,
}

impl ClaimRecord {
    pub fn draft(
        id: impl Into<String>,
        text: impl Into<String>,
        supporting: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            supporting: supporting.into_iter().collect(),
            status: ClaimStatus::Draft,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Query the user turn was resolved to before research.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
}

const FOLLOW_UP_PREFIXES: &[&str] = &[
    "and ",
    "also ",
    "what about ",
    "how about ",
    "more on ",
    "more about ",
];

/// Append-only history of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        self.turns.push(Turn {
            role,
            text: text.into(),
            resolved: None,
        });
    }

    /// Record a research question together with the query it resolved to.
    pub fn push_query(&mut self, text: impl Into<String>, resolved: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::User,
            text: text.into(),
            resolved: Some(resolved.into()),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.text.as_str())
    }

    /// Topic of the latest user turn: its resolved query when one was recorded.
    pub fn last_topic(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.resolved.as_deref().unwrap_or(&turn.text))
    }

    /// Resolve a follow-up such as "what about surface codes" against the
    /// previous topic; standalone queries pass through trimmed.
    pub fn contextualize(&self, query: &str) -> String {
        let query = query.trim();
        let lowered = query.to_lowercase();
        let Some(prefix) = FOLLOW_UP_PREFIXES
            .iter()
            .find(|prefix| lowered.starts_with(*prefix))
        else {
            return query.to_string();
        };
        match self.last_topic() {
            Some(previous) => {
                let rest = query
                    .get(prefix.len()..)
                    .unwrap_or(query)
                    .trim()
                    .trim_end_matches('?');
                format!("{} {}", previous.trim(), rest)
            }
            None => query.to_string(),
        }
    }
}
