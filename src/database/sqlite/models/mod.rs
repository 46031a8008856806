
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, Type};

/// Category partitioning the thesaurus for sync and search scope
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Type,
    clap::ValueEnum,
)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Archival,
    Library,
    Museum,
    General,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::Archival,
        Domain::Library,
        Domain::Museum,
        Domain::General,
    ];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Archival => "archival",
            Domain::Library => "library",
            Domain::Museum => "museum",
            Domain::General => "general",
        }
    }
}

impl std::fmt::Display for Domain {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a term came from. `Local` entries are curated by hand and are
/// never overwritten by sync nor removed by retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TermSource {
    Local,
    WordNet,
    Wikidata,
}

impl TermSource {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            TermSource::Local => "local",
            TermSource::WordNet => "wordnet",
            TermSource::Wikidata => "wikidata",
        }
    }

    #[inline]
    pub fn is_authoritative(self) -> bool {
        self == TermSource::Local
    }
}

impl std::fmt::Display for TermSource {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            TermSource::Local => write!(f, "Local"),
            TermSource::WordNet => write!(f, "WordNet"),
            TermSource::Wikidata => write!(f, "Wikidata"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Term {
    pub id: i64,
    pub term: String,
    pub domain: Domain,
    pub source: TermSource,
    pub synonyms: Json<Vec<String>>,
    pub embedding: Option<Vec<u8>>,
    pub embedding_updated_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Term {
    #[inline]
    pub fn synonyms(&self) -> &[String] {
        &self.synonyms.0
    }

    /// Decoded embedding, or `None` when absent or not `dimension` wide
    #[inline]
    pub fn embedding_vector(&self, dimension: usize) -> Option<Vec<f32>> {
        self.embedding
            .as_deref()
            .and_then(|bytes| decode_embedding(bytes, dimension))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTerm {
    pub term: String,
    pub domain: Domain,
    pub source: TermSource,
    pub synonyms: Vec<String>,
}

impl NewTerm {
    /// Build a term with its synonym list normalized
    #[inline]
    pub fn new<I, S>(term: &str, domain: Domain, source: TermSource, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let term = term.trim().to_string();
        let synonyms = normalize_synonyms(&term, synonyms);
        Self {
            term,
            domain,
            source,
            synonyms,
        }
    }
}

/// What an external upsert did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
    Skipped,
}

/// Term due for embedding generation
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EmbeddingCandidate {
    pub id: i64,
    pub term: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for SyncStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SyncStatus::Running => write!(f, "Running"),
            SyncStatus::Completed => write!(f, "Completed"),
            SyncStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SyncRun {
    pub id: i64,
    pub source: TermSource,
    pub status: SyncStatus,
    pub terms_added: i64,
    pub terms_updated: i64,
    pub terms_skipped: i64,
    pub error_message: Option<String>,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermStatistics {
    pub total: i64,
    pub by_source: Vec<(TermSource, i64)>,
    pub by_domain: Vec<(Domain, i64)>,
    pub with_embedding: i64,
    pub synonym_groups: i64,
}

/// Trim, drop blanks and the term itself, and de-duplicate case-insensitively
/// while keeping the first spelling seen.
#[inline]
pub fn normalize_synonyms<I, S>(term: &str, synonyms: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let term_key = term.trim().to_lowercase();
    let mut seen = std::collections::HashSet::new();
    let mut normalized = Vec::new();

    for synonym in synonyms {
        let synonym = synonym.as_ref().trim();
        if synonym.is_empty() {
            continue;
        }
        let key = synonym.to_lowercase();
        if key == term_key || !seen.insert(key) {
            continue;
        }
        normalized.push(synonym.to_string());
    }

    normalized
}

/// Little-endian `f32` encoding used for the `embedding` column
#[inline]
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

#[inline]
pub fn decode_embedding(bytes: &[u8], dimension: usize) -> Option<Vec<f32>> {
    if dimension == 0 || bytes.len() != dimension * 4 {
        return None;
    }

    let vector: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if vector.iter().all(|value| value.is_finite()) {
        Some(vector)
    } else {
        None
    }
}
