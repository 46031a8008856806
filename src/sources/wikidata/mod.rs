//! Domain vocabulary from the Wikidata SPARQL endpoint.
//!
//! Each configured class (a QID) anchors a domain. Every subclass of it
//! becomes a term: the English (or configured language) label is the term
//! and its `skos:altLabel`s are the synonyms.


use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ExternalTerm, SyncCounts, apply_external_terms, record_sync_run};
use crate::ThesaurusError;
use crate::config::WikidataConfig;
use crate::database::sqlite::{Database, Domain, TermSource};

const ENTITY_PREFIX: &str = "http://www.wikidata.org/entity/";

pub trait KnowledgeGraphSource: Send + Sync {
    fn fetch_terms(&self, domains: &[Domain], limit: usize) -> Result<Vec<ExternalTerm>>;
}

#[derive(Debug, Clone)]
pub struct WikidataClient {
    endpoint: String,
    language: String,
    user_agent: String,
    classes: Vec<(Domain, String)>,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<HashMap<String, SparqlValue>>,
}

#[derive(Debug, Deserialize)]
struct SparqlValue {
    value: String,
}

impl WikidataClient {
    #[inline]
    pub fn new(config: &WikidataConfig) -> Result<Self> {
        url::Url::parse(&config.endpoint)
            .with_context(|| format!("Invalid Wikidata endpoint: {}", config.endpoint))?;

        if config.language.is_empty()
            || !config
                .language
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(anyhow::anyhow!(
                "Invalid Wikidata language tag: '{}'",
                config.language
            ));
        }

        let mut classes = Vec::new();
        for (domain, qids) in &config.classes {
            for qid in qids {
                if is_qid(qid) {
                    classes.push((*domain, qid.clone()));
                } else {
                    warn!("Ignoring invalid Wikidata class '{}' for {}", qid, domain);
                }
            }
        }

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            endpoint: config.endpoint.clone(),
            language: config.language.clone(),
            user_agent: config.user_agent.clone(),
            classes,
            agent,
        })
    }

    /// Configured classes restricted to `domains`
    #[inline]
    pub fn classes_for(&self, domains: &[Domain]) -> Vec<(Domain, &str)> {
        self.classes
            .iter()
            .filter(|(domain, _)| domains.contains(domain))
            .map(|(domain, qid)| (*domain, qid.as_str()))
            .collect()
    }

    #[inline]
    pub fn build_query(&self, classes: &[(Domain, &str)], limit: usize) -> String {
        let values = classes
            .iter()
            .map(|(_, qid)| format!("wd:{qid}"))
            .join(" ");

        format!(
            r#"SELECT ?item ?class ?label ?altLabel WHERE {{
  VALUES ?class {{ {values} }}
  ?item wdt:P279* ?class .
  ?item rdfs:label ?label .
  FILTER(LANG(?label) = "{lang}")
  OPTIONAL {{
    ?item skos:altLabel ?altLabel .
    FILTER(LANG(?altLabel) = "{lang}")
  }}
}}
LIMIT {limit}"#,
            lang = self.language,
        )
    }
}

impl KnowledgeGraphSource for WikidataClient {
    fn fetch_terms(&self, domains: &[Domain], limit: usize) -> Result<Vec<ExternalTerm>> {
        let classes = self.classes_for(domains);
        if classes.is_empty() {
            debug!("No Wikidata classes configured for {:?}", domains);
            return Ok(Vec::new());
        }

        let query = self.build_query(&classes, limit);
        debug!("Running Wikidata query:\n{}", query);

        let body = self
            .agent
            .post(self.endpoint.as_str())
            .header("Accept", "application/sparql-results+json")
            .header("User-Agent", self.user_agent.as_str())
            .send_form([("query", query.as_str())])
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| ThesaurusError::Network(format!("Wikidata query failed: {e}")))?;

        parse_results(&body, &classes)
    }
}

/// Group SPARQL rows into one term per `(label, domain)`
#[inline]
pub fn parse_results(body: &str, classes: &[(Domain, &str)]) -> Result<Vec<ExternalTerm>> {
    let response: SparqlResponse =
        serde_json::from_str(body).context("Failed to parse Wikidata response")?;

    let mut terms: Vec<ExternalTerm> = Vec::new();
    let mut index: HashMap<(String, Domain), usize> = HashMap::new();

    for row in response.results.bindings {
        let (Some(label), Some(class)) = (row.get("label"), row.get("class")) else {
            continue;
        };
        let qid = class
            .value
            .strip_prefix(ENTITY_PREFIX)
            .unwrap_or(&class.value);
        let Some(domain) = classes
            .iter()
            .find(|(_, class_qid)| *class_qid == qid)
            .map(|(domain, _)| *domain)
        else {
            continue;
        };

        let key = (label.value.to_lowercase(), domain);
        let position = *index.entry(key).or_insert_with(|| {
            terms.push(ExternalTerm::new(
                label.value.clone(),
                domain,
                Vec::<String>::new(),
            ));
            terms.len() - 1
        });

        if let Some(alt) = row.get("altLabel") {
            terms[position].synonyms.push(alt.value.clone());
        }
    }

    Ok(terms)
}

fn is_qid(value: &str) -> bool {
    value
        .strip_prefix('Q')
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

pub struct WikidataSync<'a> {
    database: &'a Database,
    source: &'a dyn KnowledgeGraphSource,
}

impl<'a> WikidataSync<'a> {
    #[inline]
    pub fn new(database: &'a Database, source: &'a dyn KnowledgeGraphSource) -> Self {
        Self { database, source }
    }

    /// One query for all `domains`, upserted and recorded in `sync_runs`
    #[inline]
    pub async fn sync_all(&self, domains: &[Domain], limit: usize) -> Result<SyncCounts> {
        record_sync_run(
            self.database,
            TermSource::Wikidata,
            |counts: &SyncCounts| *counts,
            async {
                let terms = self.source.fetch_terms(domains, limit)?;
                debug!("Wikidata returned {} terms", terms.len());
                apply_external_terms(self.database, TermSource::Wikidata, &terms).await
            },
        )
        .await
    }
}
