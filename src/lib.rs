use thiserror::Error;

pub type Result<T> = std::result::Result<T, ThesaurusError>;

#[derive(Error, Debug)]
pub enum ThesaurusError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Export error: {0}")]
    Export(String),
}

pub mod budget;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod export;
pub mod lock;
pub mod logging;
pub mod orchestrator;
pub mod retention;
pub mod sources;
