//! Synonym snapshot for the search engine.
//!
//! Output is a pure function of the stored terms, so an unchanged store
//! produces a byte-identical file.


use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info};

use crate::ThesaurusError;
use crate::config::ExportFormat;
use crate::database::sqlite::{Database, Domain, Term, TermQueries};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    /// Synonym groups written, or that would be written in a dry run
    pub count: usize,
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
struct SynonymsSet<'a> {
    synonyms_set: Vec<SynonymRule<'a>>,
}

#[derive(Debug, Serialize)]
struct SynonymRule<'a> {
    id: String,
    synonyms: &'a str,
}

pub struct Exporter<'a> {
    database: &'a Database,
    path: PathBuf,
    format: ExportFormat,
    dry_run: bool,
}

impl<'a> Exporter<'a> {
    #[inline]
    pub fn new(database: &'a Database, path: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            database,
            path: path.into(),
            format,
            dry_run: false,
        }
    }

    #[inline]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Write every term with at least one synonym, optionally limited to a
    /// single domain.
    #[inline]
    pub async fn export(&self, domain: Option<Domain>) -> Result<ExportSummary> {
        if self.dry_run {
            let count = TermQueries::count_synonym_groups(self.database.pool(), domain).await?;
            info!(
                "[DRY RUN] Would export {} synonym groups to {}",
                count,
                self.path.display()
            );
            return Ok(ExportSummary {
                count: usize::try_from(count).unwrap_or_default(),
                path: self.path.clone(),
            });
        }

        let terms = TermQueries::list_synonym_groups(self.database.pool(), domain).await?;
        let contents = match self.format {
            ExportFormat::Solr => render_solr(&terms),
            ExportFormat::Json => render_json(&terms)?,
        };

        write_atomic(&self.path, contents.as_bytes())?;
        info!(
            "Exported {} synonym groups to {}",
            terms.len(),
            self.path.display()
        );

        Ok(ExportSummary {
            count: terms.len(),
            path: self.path.clone(),
        })
    }
}

/// Escape a value for a Solr synonyms line
#[inline]
pub fn escape_synonym(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == ',' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `term, syn1, syn2` with every element escaped
#[inline]
pub fn synonym_line(term: &Term) -> String {
    std::iter::once(term.term.as_str())
        .chain(term.synonyms().iter().map(String::as_str))
        .map(escape_synonym)
        .join(", ")
}

#[inline]
pub fn render_solr(terms: &[Term]) -> String {
    let mut out = String::new();
    for term in terms {
        out.push_str(&synonym_line(term));
        out.push('\n');
    }
    out
}

/// Request body for the Elasticsearch synonyms set API; rule ids are
/// `<domain>-<n>`, numbered from 1 within each domain.
#[inline]
pub fn render_json(terms: &[Term]) -> Result<String> {
    let lines: Vec<(Domain, String)> = terms
        .iter()
        .map(|term| (term.domain, synonym_line(term)))
        .collect();

    let mut rules = Vec::with_capacity(lines.len());
    let mut current: Option<Domain> = None;
    let mut n = 0_usize;
    for (domain, line) in &lines {
        if current != Some(*domain) {
            current = Some(*domain);
            n = 0;
        }
        n += 1;
        rules.push(SynonymRule {
            id: format!("{domain}-{n}"),
            synonyms: line,
        });
    }

    let mut body = serde_json::to_string_pretty(&SynonymsSet {
        synonyms_set: rules,
    })
    .context("Failed to serialize synonyms set")?;
    body.push('\n');
    Ok(body)
}

/// Replace `path` with `contents` via a sibling temp file and a rename
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ThesaurusError::Export(format!("Invalid export path: {}", path.display())))?
        .to_string_lossy()
        .into_owned();
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());

    if let Some(parent) = parent {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create export directory: {}", parent.display())
        })?;
    }

    let temp_name = format!(".{}.{}.tmp", file_name, std::process::id());
    let temp_path = parent.map_or_else(|| PathBuf::from(&temp_name), |p| p.join(&temp_name));
    debug!("Writing export to {}", temp_path.display());

    let result = (|| -> Result<()> {
        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(contents)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to flush {}", temp_path.display()))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to move export into {}", path.display()))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
